use store::{GatewayError, PgGateway, RecordGateway, StoreError};

use crate::common::{TABLE, TestDb};

#[tokio::test]
async fn save_upserts_within_a_branch() {
    let t = TestDb::spawn().await;
    let store = t.store("main").await;

    store.save("f", "k", b"A").await.unwrap();
    store.save("f", "k", b"A2").await.unwrap();

    assert_eq!(store.read("f", "k").await.unwrap(), b"A2");
    assert_eq!(t.count("main").await, 1);
}

#[tokio::test]
async fn missing_record_surfaces_not_found() {
    let t = TestDb::spawn().await;
    let store = t.store("main").await;

    let err = store.read("f", "nope").await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Gateway(GatewayError::NotFound { ref key, .. }) if key == "nope"
    ));
}

#[tokio::test]
async fn payload_bytes_are_returned_verbatim() {
    let t = TestDb::spawn().await;
    let store = t.store("main").await;
    let payload: Vec<u8> = (0..=255).collect();

    store.save("bin", "all", &payload).await.unwrap();
    assert_eq!(store.read("bin", "all").await.unwrap(), payload);

    t.execute(&format!(
        "INSERT INTO {TABLE} (file_name, key, version, data) VALUES ('nul', 'k', 'main', NULL)"
    ))
    .await;
    assert!(store.read("nul", "k").await.unwrap().is_empty());
}

#[tokio::test]
async fn oversized_fields_are_rejected_before_writing() {
    let t = TestDb::spawn().await;
    let mut store = t.store("main").await;

    let err = store.save("f", &"k".repeat(41), b"A").await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Gateway(GatewayError::InvalidField { field: "key", .. })
    ));
    assert!(store.set_version(&"v".repeat(501)).await.is_err());
    assert_eq!(store.branch(), "main");
    assert_eq!(t.count("main").await, 0);
}

#[tokio::test]
async fn preload_serves_reads_from_cache() {
    let t = TestDb::spawn().await;
    let writer = t.store("main").await;
    writer.save("f", "k1", b"X").await.unwrap();
    writer.save("f", "k2", b"Y").await.unwrap();

    let reader = t.cached_store("main").await;
    assert_eq!(reader.preload().await.unwrap(), 2);
    assert_eq!(reader.gateway().cached(), 2);

    // Rows vanish underneath; the warmed cache still answers.
    t.execute(&format!("DELETE FROM {TABLE}")).await;
    assert_eq!(reader.read("f", "k1").await.unwrap(), b"X");
}

#[tokio::test]
async fn config_snapshot_builds_an_equivalent_gateway() {
    let t = TestDb::spawn().await;
    let mut store = t.store("main").await;
    store.set_version("dev").await.unwrap();
    store.save("f", "k", b"B").await.unwrap();

    let config = store.config();
    assert_eq!(config.version, "dev");
    assert_eq!(config.table, TABLE);

    let twin = PgGateway::new(t.db.clone(), config.clone()).unwrap();
    assert_eq!(twin.read("f", "k").await.unwrap(), b"B");
    assert_eq!(twin.config(), config);
}

#[tokio::test]
async fn branch_operations_invalidate_the_cache() {
    let t = TestDb::spawn().await;
    let cancel = tokio_util::sync::CancellationToken::new();
    let mut store = t.cached_store("main").await;

    store.save("f", "k", b"A").await.unwrap();
    store.set_version("dev").await.unwrap();
    store.save("f", "k", b"B").await.unwrap();
    assert_eq!(store.gateway().cached(), 1);

    store.replace_from(&cancel, "main").await.unwrap();
    assert_eq!(store.gateway().cached(), 0);
    assert_eq!(store.read("f", "k").await.unwrap(), b"A");
}

#[tokio::test]
async fn empty_file_name_and_key_are_valid() {
    let t = TestDb::spawn().await;
    let mut store = t.store("main").await;

    store.save("", "", b"E").await.unwrap();
    store.save("f", "", b"F").await.unwrap();
    assert_eq!(store.read("", "").await.unwrap(), b"E");
    assert_eq!(store.read("f", "").await.unwrap(), b"F");
    assert_eq!(t.count("main").await, 2);

    assert!(store.set_version("").await.is_err());
    assert_eq!(store.branch(), "main");
}
