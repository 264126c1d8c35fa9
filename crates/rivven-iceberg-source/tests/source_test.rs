//! Integration tests for the source runner
//!
//! Covers discovery, event ordering and state round-trips across two syncs.

use arrow::array::{
    ArrayRef, Decimal128Array, FixedSizeBinaryArray, Int64Array, StringArray,
    Time64MicrosecondArray,
};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use rivven_iceberg_source::prelude::*;
use rivven_iceberg_source::{
    ColumnSchema, ColumnType, SortField, SortOrder, StreamOverride, SyncMode, TableSchema,
};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

fn orders_table(batches: &[&[(i64, &str)]]) -> Arc<dyn Table> {
    let table = MemoryTable::new(
        "sales",
        "orders",
        TableSchema::new(vec![
            ColumnSchema::required("order_id", ColumnType::Long),
            ColumnSchema::required("customer", ColumnType::String),
        ]),
    )
    .unwrap()
    .with_sort_order(SortOrder::new(vec![SortField::ascending("order_id")]));

    for rows in batches {
        let ids: ArrayRef = Arc::new(Int64Array::from(
            rows.iter().map(|r| r.0).collect::<Vec<_>>(),
        ));
        let customers: ArrayRef = Arc::new(StringArray::from(
            rows.iter().map(|r| r.1).collect::<Vec<_>>(),
        ));
        let batch = RecordBatch::try_new(table.arrow_schema(), vec![ids, customers]).unwrap();
        table.push_batch(batch).unwrap();
    }
    Arc::new(table)
}

fn customers_table() -> Arc<dyn Table> {
    Arc::new(
        MemoryTable::new(
            "sales",
            "customers",
            TableSchema::new(vec![ColumnSchema::required("name", ColumnType::String)]),
        )
        .unwrap(),
    )
}

#[test]
fn test_discover_catalog() {
    let source = IcebergSource::from_tables(
        IcebergSourceConfig::default(),
        vec![orders_table(&[]), customers_table()],
    )
    .unwrap();

    let catalog = source.discover();
    assert_eq!(catalog.streams.len(), 2);

    let orders = catalog.find_stream("sales-orders").unwrap();
    assert_eq!(orders.namespace.as_deref(), Some("sales"));
    assert_eq!(
        orders.supported_sync_modes,
        vec![SyncMode::FullRefresh, SyncMode::Incremental]
    );
    assert_eq!(
        orders.json_schema["properties"]["order_id"],
        json!({"type": ["integer"]})
    );

    let customers = catalog.find_stream("sales-customers").unwrap();
    assert_eq!(customers.supported_sync_modes, vec![SyncMode::FullRefresh]);
    assert_eq!(customers.default_cursor_field, None);
}

#[tokio::test]
async fn test_two_syncs_resume_from_emitted_state() {
    let source = IcebergSource::from_tables(
        IcebergSourceConfig::default(),
        vec![orders_table(&[&[(1, "ann"), (2, "bob")], &[(3, "cy")]])],
    )
    .unwrap();

    let first: Vec<SourceEvent> = source.read(None).try_collect().await.unwrap();
    let last = first.last().unwrap();
    assert_eq!(last.event_type, SourceEventType::State);
    assert_eq!(first.iter().filter(|e| e.is_record()).count(), 3);

    let state: State = serde_json::from_value(last.data.clone()).unwrap();
    assert_eq!(
        state.cursor_value("sales-orders", "order_id", None),
        Some(&json!(3))
    );

    // nothing past the watermark: schema only, no new state
    let second: Vec<SourceEvent> = source.read(Some(state)).try_collect().await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].event_type, SourceEventType::Schema);
}

#[tokio::test]
async fn test_full_refresh_stream_emits_no_state() {
    let table = MemoryTable::new(
        "sales",
        "notes",
        TableSchema::new(vec![ColumnSchema::optional("text", ColumnType::String)]),
    )
    .unwrap();
    let batch = RecordBatch::try_new(
        table.arrow_schema(),
        vec![Arc::new(StringArray::from(vec![Some("x"), None])) as ArrayRef],
    )
    .unwrap();
    table.push_batch(batch).unwrap();

    let source =
        IcebergSource::from_tables(IcebergSourceConfig::default(), vec![Arc::new(table)]).unwrap();
    let events: Vec<SourceEvent> = source.read(None).try_collect().await.unwrap();

    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.event_type != SourceEventType::State));
    assert_eq!(events[2].data, json!({"text": null}));
}

#[tokio::test]
async fn test_singer_bookmarks_are_honored() {
    let source = IcebergSource::from_tables(
        IcebergSourceConfig::default(),
        vec![orders_table(&[&[(1, "ann"), (2, "bob"), (3, "cy")]])],
    )
    .unwrap();

    let state = State::from_json_str(
        r#"{"bookmarks": {"sales-orders": {"replication_key": "order_id", "replication_key_value": 1}}}"#,
    )
    .unwrap();
    let events: Vec<SourceEvent> = source.read(Some(state)).try_collect().await.unwrap();

    let customers: Vec<&str> = events
        .iter()
        .filter(|e| e.is_record())
        .filter_map(|e| e.data["customer"].as_str())
        .collect();
    assert_eq!(customers, vec!["bob", "cy"]);
}

// ============================================================================
// Replication key types
// ============================================================================

fn keyed_source(table: Arc<MemoryTable>, key: &str) -> IcebergSource {
    let mut config = IcebergSourceConfig::default();
    config.streams.insert(
        table.stream_name(),
        StreamOverride {
            replication_key: Some(key.to_string()),
            selected: true,
        },
    );
    IcebergSource::from_tables(config, vec![table as Arc<dyn Table>]).unwrap()
}

fn single_column_table(column: ColumnSchema, array: ArrayRef) -> Arc<MemoryTable> {
    let table = MemoryTable::new("ops", "readings", TableSchema::new(vec![column])).unwrap();
    let batch = RecordBatch::try_new(table.arrow_schema(), vec![array]).unwrap();
    table.push_batch(batch).unwrap();
    Arc::new(table)
}

async fn sync(source: &IcebergSource, state: Option<State>) -> (Vec<JsonValue>, Option<State>) {
    let events: Vec<SourceEvent> = source.read(state).try_collect().await.unwrap();
    let records = events
        .iter()
        .filter(|e| e.is_record())
        .map(|e| e.data.clone())
        .collect();
    let state = events
        .iter()
        .rev()
        .find(|e| e.event_type == SourceEventType::State)
        .map(|e| serde_json::from_value(e.data.clone()).unwrap());
    (records, state)
}

#[tokio::test]
async fn test_time_replication_key() {
    let hour = |h: i64| h * 3_600_000_000;
    let source = keyed_source(
        single_column_table(
            ColumnSchema::required("at", ColumnType::Time),
            Arc::new(Time64MicrosecondArray::from(vec![hour(9), hour(11), hour(12)])),
        ),
        "at",
    );

    let state = State::builder()
        .stream_cursor("ops-readings", "at", json!("10:00:00"))
        .build();
    let (records, _) = sync(&source, Some(state)).await;
    assert_eq!(
        records,
        vec![json!({"at": "11:00:00"}), json!({"at": "12:00:00"})]
    );

    let (records, state) = sync(&source, None).await;
    assert_eq!(records.len(), 3);
    let state = state.unwrap();
    assert_eq!(
        state.cursor_value("ops-readings", "at", None),
        Some(&json!("12:00:00"))
    );

    let (records, _) = sync(&source, Some(state)).await;
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_uuid_replication_key() {
    let tokens = |lasts: &[u8]| -> ArrayRef {
        let ids = lasts.iter().map(|last| {
            let mut bytes = [0u8; 16];
            bytes[15] = *last;
            bytes
        });
        Arc::new(FixedSizeBinaryArray::try_from_iter(ids).unwrap())
    };
    let table = single_column_table(
        ColumnSchema::required("token", ColumnType::Uuid),
        tokens(&[2, 1, 3]),
    );
    let source = keyed_source(table.clone(), "token");

    let (records, state) = sync(&source, None).await;
    assert_eq!(
        records,
        vec![
            json!({"token": "00000000-0000-0000-0000-000000000001"}),
            json!({"token": "00000000-0000-0000-0000-000000000002"}),
            json!({"token": "00000000-0000-0000-0000-000000000003"}),
        ]
    );
    let state = state.unwrap();
    assert_eq!(
        state.cursor_value("ops-readings", "token", None),
        Some(&json!("00000000-0000-0000-0000-000000000003"))
    );

    let batch = RecordBatch::try_new(table.arrow_schema(), vec![tokens(&[3, 4])]).unwrap();
    table.push_batch(batch).unwrap();

    let (records, _) = sync(&source, Some(state)).await;
    assert_eq!(
        records,
        vec![json!({"token": "00000000-0000-0000-0000-000000000004"})]
    );
}

#[tokio::test]
async fn test_decimal_records_are_numbers() {
    let amounts = Decimal128Array::from(vec![950_i128, 1000])
        .with_precision_and_scale(10, 2)
        .unwrap();
    let source = keyed_source(
        single_column_table(
            ColumnSchema::required(
                "amt",
                ColumnType::Decimal {
                    precision: 10,
                    scale: 2,
                },
            ),
            Arc::new(amounts),
        ),
        "amt",
    );

    let catalog = source.discover();
    assert_eq!(
        catalog.streams[0].json_schema["properties"]["amt"],
        json!({"type": ["number"]})
    );

    let (records, state) = sync(&source, None).await;
    assert_eq!(records, vec![json!({"amt": 9.5}), json!({"amt": 10.0})]);

    // numeric watermark: 10.00 beats 9.50
    let state = state.unwrap();
    assert_eq!(
        state.cursor_value("ops-readings", "amt", None),
        Some(&json!(10.0))
    );

    let (records, _) = sync(&source, Some(state)).await;
    assert!(records.is_empty());
}
