//! Iceberg table creation on a provisioned volume

use snowberg_core::memory::{MemoryCloud, MemoryWarehouse};
use snowberg_core::table::{create_iceberg_table, verify_table_storage, IcebergTableRequest};
use snowberg_core::{AwsRegion, BucketDescriptor, ErrorCode, Workflow, WorkflowRequest};

fn table_request() -> IcebergTableRequest {
    IcebergTableRequest {
        database: "ANALYTICS".into(),
        schema: "PUBLIC".into(),
        table: "STOCK_PRICES".into(),
        columns: vec![
            "TICKER:VARCHAR".parse().unwrap(),
            "TRADE_DATE:DATE".parse().unwrap(),
            "CLOSE_PRICE:DOUBLE".parse().unwrap(),
        ],
        external_volume: "ICEBERG_EXTERNAL_VOLUME".into(),
    }
}

#[tokio::test]
async fn test_table_on_provisioned_volume() {
    let cloud = MemoryCloud::new();
    let warehouse = MemoryWarehouse::default();
    let request = WorkflowRequest {
        bucket: BucketDescriptor::new("demo-bkt", AwsRegion::UsEast1),
        policy_name: "p".into(),
        role_name: "r".into(),
        volume_name: "ICEBERG_EXTERNAL_VOLUME".into(),
        allow_writes: true,
    };
    Workflow::new(&cloud, &warehouse).run(&request).await.unwrap();

    let table = table_request();
    create_iceberg_table(&warehouse, &table).await.unwrap();
    assert_eq!(warehouse.tables(), vec!["ANALYTICS.PUBLIC.STOCK_PRICES"]);

    assert!(verify_table_storage(&cloud, "demo-bkt", &table)
        .await
        .unwrap()
        .is_empty());

    cloud.add_object(
        "demo-bkt",
        "analytics.public.stock_prices/metadata/00000-a.metadata.json",
        1523,
    );
    cloud.add_object("demo-bkt", "elsewhere/file.parquet", 10);
    let objects = verify_table_storage(&cloud, "demo-bkt", &table).await.unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].size, 1523);
}

#[tokio::test]
async fn test_table_without_volume_is_rejected() {
    let warehouse = MemoryWarehouse::default();
    let err = create_iceberg_table(&warehouse, &table_request())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::E105WarehouseProvisioning);
}
