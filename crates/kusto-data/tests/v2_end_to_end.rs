use kusto_core::error::Operation;
use kusto_core::{ScalarPayload, TableKind};
use kusto_data::{Dataset, DatasetOptions};
use tokio_util::sync::CancellationToken;

fn frame_array(frames: &[&str]) -> Vec<u8> {
    format!("[{}]", frames.join(",")).into_bytes()
}

#[tokio::test]
async fn progressive_dataset_yields_rows_in_order() {
    let body = frame_array(&[
        r#"{"FrameType":"dataSetHeader","IsProgressive":true,"Version":"v2.0"}"#,
        r#"{"FrameType":"TableHeader","TableId":1,"TableName":"PrimaryResult","TableKind":"PrimaryResult","Columns":[{"ColumnName":"x","ColumnType":"long"}]}"#,
        r#"{"FrameType":"TableFragment","TableId":1,"FieldCount":1,"TableFragmentType":"DataAppend","Rows":[[1],[2],[3]]}"#,
        r#"{"FrameType":"TableCompletion","TableId":1,"RowCount":3}"#,
        r#"{"FrameType":"DataSetCompletion","HasErrors":false,"Cancelled":false}"#,
    ]);

    let reader = std::io::Cursor::new(body);
    let mut dataset =
        Dataset::from_v2_reader(Operation::Query, reader, DatasetOptions::default(), CancellationToken::new());

    let meta = dataset.next_table().await.unwrap().unwrap();
    assert_eq!(meta.name, "PrimaryResult");
    assert_eq!(meta.kind, TableKind::PrimaryResult);
    assert_eq!(meta.columns.len(), 1);

    let mut values = Vec::new();
    while let Some(row) = dataset.next_row().await {
        let row = row.unwrap();
        match row.get(0).unwrap().payload() {
            Some(ScalarPayload::Long(n)) => values.push(*n),
            other => panic!("unexpected payload: {other:?}"),
        }
    }
    assert_eq!(values, vec![1, 2, 3]);

    assert!(dataset.next_table().await.is_none());
    let completion = dataset.completion().unwrap();
    assert!(!completion.has_errors);
    assert!(!completion.cancelled);
}

#[tokio::test]
async fn non_progressive_data_table_is_self_contained() {
    let body = frame_array(&[
        r#"{"FrameType":"dataSetHeader","IsProgressive":false,"Version":"v2.0"}"#,
        r#"{"FrameType":"DataTable","TableId":1,"TableName":"PrimaryResult","TableKind":"PrimaryResult","Columns":[{"ColumnName":"s","ColumnType":"string"}],"Rows":[["hi"]]}"#,
        r#"{"FrameType":"DataSetCompletion","HasErrors":false,"Cancelled":false}"#,
    ]);

    let reader = std::io::Cursor::new(body);
    let mut dataset =
        Dataset::from_v2_reader(Operation::Query, reader, DatasetOptions::default(), CancellationToken::new());

    let meta = dataset.next_table().await.unwrap().unwrap();
    assert_eq!(meta.columns[0].name, "s");

    let row = dataset.next_row().await.unwrap().unwrap();
    match row.get(0).unwrap().payload() {
        Some(ScalarPayload::String(s)) => assert_eq!(s, "hi"),
        other => panic!("unexpected payload: {other:?}"),
    }
    assert!(dataset.next_row().await.is_none());
    assert!(dataset.next_table().await.is_none());
}

#[tokio::test]
async fn data_table_row_errors_trail_the_data_rows() {
    let body = frame_array(&[
        r#"{"FrameType":"dataSetHeader","IsProgressive":false,"Version":"v2.0"}"#,
        r#"{"FrameType":"DataTable","TableId":1,"TableName":"PrimaryResult","TableKind":"PrimaryResult","Columns":[{"ColumnName":"x","ColumnType":"long"}],"Rows":[[1],[2],[3],[4],[5],{"OneApiErrors":[{"error":{"code":"LimitsExceeded","message":"Query exceeded the allowed limits."}}]}]}"#,
        r#"{"FrameType":"DataSetCompletion","HasErrors":true,"Cancelled":false}"#,
    ]);

    let reader = std::io::Cursor::new(body);
    let mut dataset =
        Dataset::from_v2_reader(Operation::Query, reader, DatasetOptions::default(), CancellationToken::new());

    dataset.next_table().await.unwrap().unwrap();

    let mut values = Vec::new();
    while let Some(row) = dataset.next_row().await {
        match row.unwrap().get(0).unwrap().payload() {
            Some(ScalarPayload::Long(n)) => values.push(*n),
            other => panic!("unexpected payload: {other:?}"),
        }
    }
    assert_eq!(values, vec![1, 2, 3, 4, 5]);

    let row_errors = dataset.current_table_row_errors();
    assert_eq!(row_errors.len(), 1);
    assert_eq!(row_errors[0].payload.code, "LimitsExceeded");
    assert!(row_errors[0].payload.message.contains("exceeded the allowed limits"));

    assert!(dataset.next_table().await.is_none());
    assert!(dataset.completion().unwrap().has_errors);
}

#[tokio::test]
async fn v1_whole_response_decodes_into_same_dataset_shape() {
    let body = br#"{"Tables":[{"TableName":"Table_0","Columns":[{"ColumnName":"n","DataType":"System.Int64"}],"Rows":[[42]]}]}"#.to_vec();

    let mut dataset = Dataset::from_v1_body(Operation::Query, body, DatasetOptions::default());
    let meta = dataset.next_table().await.unwrap().unwrap();
    assert_eq!(meta.columns[0].name, "n");

    let row = dataset.next_row().await.unwrap().unwrap();
    match row.get(0).unwrap().payload() {
        Some(ScalarPayload::Long(n)) => assert_eq!(*n, 42),
        other => panic!("unexpected payload: {other:?}"),
    }
}
