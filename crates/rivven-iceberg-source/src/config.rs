//! Source configuration
//!
//! ```yaml
//! catalog:
//!   type: rest
//!   rest:
//!     uri: http://localhost:8181
//!     warehouse: s3://bucket/warehouse
//!     credential: ${CATALOG_TOKEN}
//!
//! namespaces: [analytics]
//! tables: [analytics.events]
//!
//! streams:
//!   analytics-events:
//!     replication_key: event_date
//!   analytics-scratch:
//!     selected: false
//! ```
//!
//! `${VAR}` and `${VAR:-default}` are expanded from the environment before
//! parsing.

use crate::error::{ConnectorError, Result};
use crate::types::SensitiveString;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use validator::Validate;

/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Iceberg catalog type
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CatalogType {
    /// REST catalog (Polaris, Lakekeeper, Tabular)
    #[default]
    Rest,
    /// In-memory catalog (for testing)
    Memory,
}

/// REST catalog configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, Validate)]
pub struct RestCatalogConfig {
    /// REST catalog URI (e.g., "http://localhost:8181")
    #[validate(length(min = 1))]
    pub uri: String,

    /// Warehouse location (e.g., "s3://bucket/warehouse")
    #[serde(default)]
    pub warehouse: Option<String>,

    /// OAuth2 credential/token for authentication
    #[serde(default)]
    pub credential: Option<SensitiveString>,

    /// Additional properties for the catalog
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Catalog configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
pub struct CatalogConfig {
    #[serde(rename = "type", default)]
    pub catalog_type: CatalogType,

    /// Name the catalog client registers under
    #[serde(default = "default_catalog_name")]
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    /// REST catalog settings
    #[serde(default)]
    #[validate(nested)]
    pub rest: Option<RestCatalogConfig>,

    /// Warehouse location (can be set at catalog level)
    #[serde(default)]
    pub warehouse: Option<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalog_type: CatalogType::default(),
            name: default_catalog_name(),
            rest: None,
            warehouse: None,
        }
    }
}

fn default_catalog_name() -> String {
    "rivven-iceberg".to_string()
}

/// S3 storage configuration for data file access
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, Validate)]
pub struct S3StorageConfig {
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint URL (for MinIO, Cloudflare R2, etc.)
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub access_key_id: Option<SensitiveString>,

    #[serde(default)]
    pub secret_access_key: Option<SensitiveString>,

    /// Use path-style URLs (required for MinIO)
    #[serde(default)]
    pub path_style_access: bool,

    /// IAM role assumed for data file access
    #[serde(default)]
    pub role_arn: Option<String>,

    /// Session name used when assuming `role_arn`
    #[serde(default)]
    pub role_session_name: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Per-stream overrides
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct StreamOverride {
    /// Replication key to use instead of the one implied by the sort order
    #[serde(default)]
    pub replication_key: Option<String>,

    /// Whether the stream is read
    #[serde(default = "default_true")]
    pub selected: bool,
}

impl Default for StreamOverride {
    fn default() -> Self {
        Self {
            replication_key: None,
            selected: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Iceberg source configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, Validate)]
pub struct IcebergSourceConfig {
    #[validate(nested)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    #[validate(nested)]
    pub s3: Option<S3StorageConfig>,

    /// Namespaces to discover; all when empty
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Tables to discover as `namespace.table`; all when empty
    #[serde(default)]
    pub tables: Vec<String>,

    /// Overrides keyed by stream name (`namespace-table`)
    #[serde(default)]
    pub streams: HashMap<String, StreamOverride>,
}

impl IcebergSourceConfig {
    /// Load and validate configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConnectorError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate configuration from YAML, expanding environment variables
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)?;
        config.validate_config()?;
        Ok(config)
    }

    pub fn validate_config(&self) -> Result<()> {
        self.validate()
            .map_err(|e| ConnectorError::config(e.to_string()))?;

        if self.catalog.catalog_type == CatalogType::Rest && self.catalog.rest.is_none() {
            return Err(ConnectorError::config(
                "REST catalog configuration is required",
            ));
        }
        if let Some(bad) = self.tables.iter().find(|t| split_table(t).is_none()) {
            return Err(ConnectorError::config(format!(
                "table '{}' must be given as namespace.table",
                bad
            )));
        }
        Ok(())
    }

    /// Whether tables in `namespace` are discovered
    pub fn namespace_selected(&self, namespace: &str) -> bool {
        self.namespaces.is_empty() || self.namespaces.iter().any(|n| n == namespace)
    }

    /// Whether `namespace.table` is discovered
    pub fn table_selected(&self, namespace: &str, table: &str) -> bool {
        if !self.namespace_selected(namespace) {
            return false;
        }
        self.tables.is_empty()
            || self
                .tables
                .iter()
                .filter_map(|t| split_table(t))
                .any(|(ns, name)| ns == namespace && name == table)
    }

    /// Overrides for a stream, defaults when none are configured
    pub fn stream_override(&self, stream_name: &str) -> StreamOverride {
        self.streams.get(stream_name).cloned().unwrap_or_default()
    }

    /// Properties handed to the catalog builder
    pub fn catalog_properties(&self) -> HashMap<String, String> {
        let mut props = HashMap::new();

        if let Some(ref rest) = self.catalog.rest {
            props.insert("uri".to_string(), rest.uri.clone());
            if let Some(ref warehouse) = rest.warehouse {
                props.insert("warehouse".to_string(), warehouse.clone());
            }
            if let Some(ref cred) = rest.credential {
                props.insert("credential".to_string(), cred.expose_secret().to_string());
            }
            props.extend(rest.properties.clone());
        }

        if !props.contains_key("warehouse") {
            if let Some(ref warehouse) = self.catalog.warehouse {
                props.insert("warehouse".to_string(), warehouse.clone());
            }
        }

        if let Some(ref s3) = self.s3 {
            props.insert("s3.region".to_string(), s3.region.clone());
            if let Some(ref endpoint) = s3.endpoint {
                props.insert("s3.endpoint".to_string(), endpoint.clone());
            }
            if let Some(ref access_key) = s3.access_key_id {
                props.insert(
                    "s3.access-key-id".to_string(),
                    access_key.expose_secret().to_string(),
                );
            }
            if let Some(ref secret_key) = s3.secret_access_key {
                props.insert(
                    "s3.secret-access-key".to_string(),
                    secret_key.expose_secret().to_string(),
                );
            }
            if s3.path_style_access {
                props.insert("s3.path-style-access".to_string(), "true".to_string());
            }
            if let Some(ref role_arn) = s3.role_arn {
                props.insert("client.assume-role.arn".to_string(), role_arn.clone());
                if let Some(ref session_name) = s3.role_session_name {
                    props.insert(
                        "client.assume-role.session-name".to_string(),
                        session_name.clone(),
                    );
                }
            }
        }

        props
    }

    /// JSON schema of the configuration
    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(IcebergSourceConfig);
        serde_json::to_value(schema).unwrap_or_default()
    }
}

/// Split `namespace.table` on the last dot; nested namespaces keep their dots
fn split_table(identifier: &str) -> Option<(&str, &str)> {
    identifier
        .rsplit_once('.')
        .filter(|(ns, table)| !ns.is_empty() && !table.is_empty())
}

/// Expand environment variables in the format ${VAR} or ${VAR:-default}
fn expand_env_vars(content: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str());

            std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REST_YAML: &str = r#"
catalog:
  type: rest
  rest:
    uri: http://localhost:8181
    warehouse: s3://bucket/warehouse
    credential: client:secret
namespaces: [analytics]
tables: [analytics.events]
streams:
  analytics-events:
    replication_key: event_date
  analytics-scratch:
    selected: false
"#;

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("ICEBERG_SOURCE_TEST_URI", "http://catalog:8181");
        let expanded = expand_env_vars("uri: ${ICEBERG_SOURCE_TEST_URI}");
        assert_eq!(expanded, "uri: http://catalog:8181");
    }

    #[test]
    fn test_env_var_with_default() {
        std::env::remove_var("ICEBERG_SOURCE_MISSING_VAR");
        let expanded = expand_env_vars("warehouse: ${ICEBERG_SOURCE_MISSING_VAR:-file:///tmp/wh}");
        assert_eq!(expanded, "warehouse: file:///tmp/wh");
    }

    #[test]
    fn test_parse_rest_config() {
        let config = IcebergSourceConfig::from_yaml_str(REST_YAML).unwrap();
        assert_eq!(config.catalog.catalog_type, CatalogType::Rest);
        assert_eq!(config.catalog.name, "rivven-iceberg");

        let rest = config.catalog.rest.as_ref().unwrap();
        assert_eq!(rest.uri, "http://localhost:8181");
        assert_eq!(rest.credential.as_ref().unwrap().expose_secret(), "client:secret");

        assert_eq!(
            config.stream_override("analytics-events").replication_key,
            Some("event_date".to_string())
        );
        assert!(!config.stream_override("analytics-scratch").selected);
        assert!(config.stream_override("analytics-other").selected);
    }

    #[test]
    fn test_rest_requires_rest_section() {
        let err = IcebergSourceConfig::from_yaml_str("catalog:\n  type: rest\n").unwrap_err();
        assert!(matches!(err, ConnectorError::Config(_)));

        let err = IcebergSourceConfig::from_yaml_str(
            "catalog:\n  type: rest\n  rest:\n    uri: \"\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[test]
    fn test_memory_catalog_needs_no_rest_section() {
        let config = IcebergSourceConfig::from_yaml_str(
            "catalog:\n  type: memory\n  warehouse: file:///tmp/warehouse\n",
        )
        .unwrap();
        assert_eq!(config.catalog.catalog_type, CatalogType::Memory);
        assert_eq!(
            config.catalog_properties().get("warehouse"),
            Some(&"file:///tmp/warehouse".to_string())
        );
    }

    #[test]
    fn test_invalid_table_identifier() {
        let err = IcebergSourceConfig::from_yaml_str(
            "catalog:\n  type: memory\ntables: [events]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("namespace.table"));
    }

    #[test]
    fn test_table_selection() {
        let config = IcebergSourceConfig::from_yaml_str(REST_YAML).unwrap();
        assert!(config.table_selected("analytics", "events"));
        assert!(!config.table_selected("analytics", "clicks"));
        assert!(!config.table_selected("staging", "events"));

        let open = IcebergSourceConfig::default();
        assert!(open.table_selected("any", "table"));
        assert_eq!(split_table("db.sales.orders"), Some(("db.sales", "orders")));
    }

    #[test]
    fn test_catalog_properties_rest_and_s3() {
        let mut config = IcebergSourceConfig::from_yaml_str(REST_YAML).unwrap();
        config.s3 = Some(S3StorageConfig {
            region: "eu-west-1".to_string(),
            endpoint: Some("http://minio:9000".to_string()),
            path_style_access: true,
            ..Default::default()
        });

        let props = config.catalog_properties();
        assert_eq!(props.get("uri"), Some(&"http://localhost:8181".to_string()));
        assert_eq!(props.get("warehouse"), Some(&"s3://bucket/warehouse".to_string()));
        assert_eq!(props.get("credential"), Some(&"client:secret".to_string()));
        assert_eq!(props.get("s3.region"), Some(&"eu-west-1".to_string()));
        assert_eq!(props.get("s3.path-style-access"), Some(&"true".to_string()));
        assert!(!props.contains_key("client.assume-role.arn"));
    }

    #[test]
    fn test_s3_assume_role_properties() {
        let yaml = r#"
catalog:
  type: memory
  warehouse: s3://bucket/warehouse
s3:
  region: us-west-2
  role_arn: arn:aws:iam::123456789012:role/reader
  role_session_name: tap-iceberg
"#;
        let config = IcebergSourceConfig::from_yaml_str(yaml).unwrap();
        let props = config.catalog_properties();
        assert_eq!(
            props.get("client.assume-role.arn"),
            Some(&"arn:aws:iam::123456789012:role/reader".to_string())
        );
        assert_eq!(
            props.get("client.assume-role.session-name"),
            Some(&"tap-iceberg".to_string())
        );
        assert_eq!(props.get("s3.region"), Some(&"us-west-2".to_string()));
    }

    #[test]
    fn test_config_json_schema() {
        let schema = IcebergSourceConfig::json_schema();
        assert!(schema["properties"]["catalog"].is_object());
        assert!(schema["properties"]["streams"].is_object());
    }
}
