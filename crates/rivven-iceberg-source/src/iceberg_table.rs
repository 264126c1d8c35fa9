//! Apache Iceberg table layer
//!
//! Loads tables through a REST or in-memory catalog and exposes them as
//! [`Table`]s. Scan predicates are pushed down as Iceberg expressions and
//! re-applied to the returned batches, so a predicate that cannot be pushed
//! down (decimal, uuid and time keys) still filters exactly.
//!
//! # Example Configuration
//!
//! ```yaml
//! catalog:
//!   type: rest
//!   rest:
//!     uri: http://localhost:8181
//!     warehouse: s3://bucket/warehouse
//!     credential: ${CATALOG_TOKEN}
//! s3:
//!   region: us-east-1
//!   endpoint: http://minio:9000
//!   path_style_access: true
//! ```

use crate::batch::{BatchStream, RowBatch};
use crate::config::{CatalogType, IcebergSourceConfig};
use crate::error::{ConnectorError, Result};
use crate::filter::{CursorLiteral, ScanPredicate};
use crate::schema::{ColumnSchema, ColumnType, TableSchema};
use crate::sort::{SortDirection, SortField, SortOrder};
use crate::source::IcebergSource;
use crate::table::Table;
use async_trait::async_trait;
use futures::StreamExt;
use iceberg::expr::{Predicate, Reference};
use iceberg::spec::{
    Datum, NestedFieldRef, PrimitiveType, Schema as IcebergSchema,
    SortDirection as IcebergSortDirection, Type,
};
use iceberg::{Catalog, CatalogBuilder, NamespaceIdent, TableIdent};
use iceberg_catalog_rest::{
    RestCatalogBuilder, REST_CATALOG_PROP_URI, REST_CATALOG_PROP_WAREHOUSE,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An Iceberg table loaded from a catalog
#[derive(Debug)]
pub struct IcebergTable {
    namespace: String,
    name: String,
    table: iceberg::table::Table,
    schema: TableSchema,
    sort_order: SortOrder,
}

impl IcebergTable {
    /// Wrap a loaded table, reading its current schema and default sort order
    pub fn new(table: iceberg::table::Table) -> Result<Self> {
        let ident = table.identifier().clone();
        let namespace = namespace_name(ident.namespace());
        let name = ident.name().to_string();

        let metadata = table.metadata();
        let iceberg_schema = metadata.current_schema();
        let schema = table_schema(iceberg_schema)?;
        let sort_order = sort_order(iceberg_schema, &metadata.default_sort_order().fields)?;

        Ok(Self {
            namespace,
            name,
            table,
            schema,
            sort_order,
        })
    }

    /// Underlying Iceberg table
    pub fn inner(&self) -> &iceberg::table::Table {
        &self.table
    }

    fn push_down(&self, predicate: &ScanPredicate) -> Predicate {
        let ScanPredicate::GreaterThan { field, value } = predicate else {
            return Predicate::AlwaysTrue;
        };
        let datum = self
            .schema
            .column(field)
            .and_then(|column| to_datum(&column.column_type, value));
        match datum {
            Some(datum) => Reference::new(field.clone()).greater_than(datum),
            None => {
                warn!(
                    table = %self.name,
                    filter = %predicate,
                    "Filter cannot be pushed down, filtering after scan"
                );
                Predicate::AlwaysTrue
            }
        }
    }
}

#[async_trait]
impl Table for IcebergTable {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> Result<TableSchema> {
        Ok(self.schema.clone())
    }

    fn sort_order(&self) -> Result<SortOrder> {
        Ok(self.sort_order.clone())
    }

    async fn scan(&self, predicate: &ScanPredicate) -> Result<BatchStream> {
        let filter = self.push_down(predicate);
        debug!(table = %self.name, filter = %predicate, "Planning Iceberg scan");

        let scan = self
            .table
            .scan()
            .with_filter(filter)
            .build()
            .map_err(|e| {
                ConnectorError::scan(format!("failed to plan scan of {}: {}", self.name, e))
            })?;
        let batches = scan
            .to_arrow()
            .await
            .map_err(|e| ConnectorError::scan(format!("failed to scan {}: {}", self.name, e)))?;

        let predicate = predicate.clone();
        Ok(batches
            .map(move |batch| {
                let batch = batch.map_err(|e| ConnectorError::scan(e.to_string()))?;
                RowBatch::new(batch).filter(&predicate)
            })
            .boxed())
    }
}

fn namespace_name(namespace: &NamespaceIdent) -> String {
    namespace.clone().inner().join(".")
}

fn table_schema(schema: &IcebergSchema) -> Result<TableSchema> {
    Ok(TableSchema::new(columns(schema.as_struct().fields())?))
}

fn columns(fields: &[NestedFieldRef]) -> Result<Vec<ColumnSchema>> {
    fields
        .iter()
        .map(|f| {
            Ok(ColumnSchema {
                name: f.name.clone(),
                column_type: column_type(&f.field_type)?,
                nullable: !f.required,
            })
        })
        .collect()
}

fn column_type(field_type: &Type) -> Result<ColumnType> {
    let column_type = match field_type {
        Type::Primitive(primitive) => match primitive {
            PrimitiveType::Boolean => ColumnType::Boolean,
            PrimitiveType::Int => ColumnType::Int,
            PrimitiveType::Long => ColumnType::Long,
            PrimitiveType::Float => ColumnType::Float,
            PrimitiveType::Double => ColumnType::Double,
            PrimitiveType::Decimal { precision, scale } => ColumnType::Decimal {
                precision: *precision,
                scale: *scale,
            },
            PrimitiveType::Date => ColumnType::Date,
            PrimitiveType::Time => ColumnType::Time,
            PrimitiveType::Timestamp | PrimitiveType::TimestampNs => ColumnType::Timestamp,
            PrimitiveType::Timestamptz | PrimitiveType::TimestamptzNs => ColumnType::TimestampTz,
            PrimitiveType::String => ColumnType::String,
            PrimitiveType::Uuid => ColumnType::Uuid,
            PrimitiveType::Fixed(len) => ColumnType::Fixed(*len),
            PrimitiveType::Binary => ColumnType::Binary,
        },
        Type::Struct(st) => ColumnType::Struct(columns(st.fields())?),
        Type::List(list) => ColumnType::List {
            element: Box::new(column_type(&list.element_field.field_type)?),
            element_nullable: !list.element_field.required,
        },
        Type::Map(map) => ColumnType::Map {
            key: Box::new(column_type(&map.key_field.field_type)?),
            value: Box::new(column_type(&map.value_field.field_type)?),
            value_nullable: !map.value_field.required,
        },
    };
    Ok(column_type)
}

fn sort_order(schema: &IcebergSchema, fields: &[iceberg::spec::SortField]) -> Result<SortOrder> {
    let fields = fields
        .iter()
        .map(|f| {
            let source = schema.field_by_id(f.source_id).ok_or_else(|| {
                ConnectorError::schema(format!(
                    "sort order references unknown field id {}",
                    f.source_id
                ))
            })?;
            // transforms (bucket, day, ...) are treated as ordering by the source field
            Ok(SortField {
                field: source.name.clone(),
                direction: match f.direction {
                    IcebergSortDirection::Ascending => SortDirection::Ascending,
                    IcebergSortDirection::Descending => SortDirection::Descending,
                },
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(SortOrder::new(fields))
}

/// Iceberg literal for a cursor, `None` when the key type is not pushed down
fn to_datum(column_type: &ColumnType, literal: &CursorLiteral) -> Option<Datum> {
    match (column_type, literal) {
        (ColumnType::Date, CursorLiteral::Timestamp(ts)) => {
            let days = ts.and_utc().timestamp().div_euclid(86_400);
            i32::try_from(days).ok().map(Datum::date)
        }
        (ColumnType::Timestamp, CursorLiteral::Timestamp(ts)) => {
            Some(Datum::timestamp_micros(ts.and_utc().timestamp_micros()))
        }
        (ColumnType::TimestampTz, CursorLiteral::Timestamp(ts)) => {
            Some(Datum::timestamptz_micros(ts.and_utc().timestamp_micros()))
        }
        (ColumnType::Int, CursorLiteral::Integer(n)) => i32::try_from(*n).ok().map(Datum::int),
        (ColumnType::Long, CursorLiteral::Integer(n)) => Some(Datum::long(*n)),
        (ColumnType::Float, CursorLiteral::Float(n)) => Some(Datum::float(*n as f32)),
        (ColumnType::Double, CursorLiteral::Float(n)) => Some(Datum::double(*n)),
        (ColumnType::String, CursorLiteral::Text(s)) => Some(Datum::string(s)),
        _ => None,
    }
}

/// A connected catalog
#[allow(clippy::large_enum_variant)]
pub enum CatalogInstance {
    Rest(Box<iceberg_catalog_rest::RestCatalog>),
    Memory(iceberg::MemoryCatalog),
}

impl CatalogInstance {
    pub fn as_catalog(&self) -> &dyn Catalog {
        match self {
            CatalogInstance::Rest(c) => c.as_ref(),
            CatalogInstance::Memory(c) => c,
        }
    }
}

/// Connect to the configured catalog
pub async fn load_catalog(config: &IcebergSourceConfig) -> Result<CatalogInstance> {
    let props = config.catalog_properties();

    match config.catalog.catalog_type {
        CatalogType::Rest => {
            let rest = config.catalog.rest.as_ref().ok_or_else(|| {
                ConnectorError::config("REST catalog configuration is required")
            })?;

            let mut catalog_props = props;
            catalog_props.insert(REST_CATALOG_PROP_URI.to_string(), rest.uri.clone());
            if let Some(warehouse) = catalog_props.remove("warehouse") {
                catalog_props.insert(REST_CATALOG_PROP_WAREHOUSE.to_string(), warehouse);
            }

            let catalog = RestCatalogBuilder::default()
                .load(&config.catalog.name, catalog_props)
                .await
                .map_err(|e| {
                    ConnectorError::connection(format!("failed to create REST catalog: {}", e))
                })?;

            info!(uri = %rest.uri, "Connected to REST catalog");
            Ok(CatalogInstance::Rest(Box::new(catalog)))
        }
        CatalogType::Memory => {
            use iceberg::memory::{MemoryCatalogBuilder, MEMORY_CATALOG_WAREHOUSE};

            let warehouse = config
                .catalog
                .warehouse
                .clone()
                .unwrap_or_else(|| "file:///tmp/iceberg-warehouse".to_string());

            let mut catalog_props: HashMap<String, String> = props;
            catalog_props.insert(MEMORY_CATALOG_WAREHOUSE.to_string(), warehouse.clone());

            let catalog = MemoryCatalogBuilder::default()
                .load(&config.catalog.name, catalog_props)
                .await
                .map_err(|e| {
                    ConnectorError::connection(format!("failed to create memory catalog: {}", e))
                })?;

            info!(warehouse = %warehouse, "Created memory catalog");
            Ok(CatalogInstance::Memory(catalog))
        }
    }
}

/// Namespaces to discover: the configured list, or every namespace in the
/// catalog (nested ones included)
async fn namespaces(
    catalog: &dyn Catalog,
    config: &IcebergSourceConfig,
) -> Result<Vec<NamespaceIdent>> {
    if !config.namespaces.is_empty() {
        return config
            .namespaces
            .iter()
            .map(|ns| {
                NamespaceIdent::from_strs(ns.split('.')).map_err(|e| {
                    ConnectorError::config(format!("invalid namespace '{}': {}", ns, e))
                })
            })
            .collect();
    }

    let roots = catalog
        .list_namespaces(None)
        .await
        .map_err(|e| ConnectorError::connection(format!("failed to list namespaces: {}", e)))?;
    let found = walk_namespaces(roots, |ns| async move {
        catalog.list_namespaces(Some(&ns)).await
    })
    .await;
    Ok(found)
}

/// Expand `roots` with all nested namespaces, sorted by name.
///
/// A namespace whose children cannot be listed is kept; its children are
/// skipped with a warning.
async fn walk_namespaces<F, Fut>(
    roots: Vec<NamespaceIdent>,
    list_children: F,
) -> Vec<NamespaceIdent>
where
    F: Fn(NamespaceIdent) -> Fut,
    Fut: Future<Output = iceberg::Result<Vec<NamespaceIdent>>>,
{
    let mut found = Vec::new();
    let mut pending = roots;
    while let Some(ns) = pending.pop() {
        let children = match list_children(ns.clone()).await {
            Ok(children) => children,
            Err(e) => {
                warn!(
                    namespace = %namespace_name(&ns),
                    error = %e,
                    "Failed to list nested namespaces, skipping them"
                );
                Vec::new()
            }
        };
        pending.extend(children.into_iter().filter(|child| child != &ns));
        found.push(ns);
    }
    found.sort_by_key(namespace_name);
    found
}

/// Load every selected table of the catalog
pub async fn discover_tables(
    catalog: &dyn Catalog,
    config: &IcebergSourceConfig,
) -> Result<Vec<Arc<dyn Table>>> {
    let mut tables: Vec<Arc<dyn Table>> = Vec::new();

    for ns in namespaces(catalog, config).await? {
        let namespace = namespace_name(&ns);
        let idents: Vec<TableIdent> =
            catalog
                .list_tables(&ns)
                .await
                .map_err(|e| match e.kind() {
                    iceberg::ErrorKind::NamespaceNotFound => {
                        ConnectorError::NotFound(format!("namespace {}", namespace))
                    }
                    _ => ConnectorError::connection(format!(
                        "failed to list tables in {}: {}",
                        namespace, e
                    )),
                })?;

        for ident in idents {
            if !config.table_selected(&namespace, ident.name()) {
                continue;
            }
            let table = catalog.load_table(&ident).await.map_err(|e| {
                ConnectorError::connection(format!(
                    "failed to load table {}.{}: {}",
                    namespace,
                    ident.name(),
                    e
                ))
            })?;
            tables.push(Arc::new(IcebergTable::new(table)?));
        }
    }

    info!(tables = tables.len(), "Discovered Iceberg tables");
    Ok(tables)
}

impl IcebergSource {
    /// Connect to the configured catalog and load the selected tables
    pub async fn connect(config: IcebergSourceConfig) -> Result<Self> {
        config.validate_config()?;
        let catalog = load_catalog(&config).await?;
        let tables = discover_tables(catalog.as_catalog(), &config).await?;
        Self::from_tables(config, tables)
    }
}
