use sea_orm::{ConnectionTrait, DbBackend, FromQueryResult, Statement};
use store::schema::{TableName, ensure_table};
use store::{BranchStore, StoreError};

use crate::common::{TABLE, TestDb};

#[derive(FromQueryResult)]
struct Constraint {
    name: String,
}

#[tokio::test]
async fn ensure_table_is_idempotent() {
    let t = TestDb::spawn().await;
    let table = TableName::new(TABLE);

    ensure_table(&t.db, &table).await.unwrap();
    let store = t.store("main").await;
    store.save("f", "k", b"A").await.unwrap();

    ensure_table(&t.db, &table).await.unwrap();
    assert_eq!(t.count("main").await, 1);
}

#[tokio::test]
async fn schema_qualified_table_gets_dotless_constraints() {
    let t = TestDb::spawn().await;
    t.execute("CREATE SCHEMA cache").await;

    let store = BranchStore::open(t.db.clone(), "main", "cache.records", false)
        .await
        .unwrap();
    store.save("f", "k", b"A").await.unwrap();
    assert_eq!(store.read("f", "k").await.unwrap(), b"A");

    let names: Vec<String> = Constraint::find_by_statement(Statement::from_string(
        DbBackend::Postgres,
        "SELECT conname::text AS name FROM pg_constraint \
         WHERE conrelid = 'cache.records'::regclass ORDER BY conname",
    ))
    .all(&t.db)
    .await
    .unwrap()
    .into_iter()
    .map(|c| c.name)
    .collect();

    assert_eq!(names, vec!["cacherecords_pkey", "cacherecords_uxk"]);
}

#[tokio::test]
async fn incompatible_existing_table_is_a_schema_failure() {
    let t = TestDb::spawn().await;
    t.execute(&format!(
        "CREATE TABLE {TABLE} (id serial PRIMARY KEY, payload text)"
    ))
    .await;

    let err = ensure_table(&t.db, &TableName::new(TABLE))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Schema { ref table, .. } if table == TABLE));
}

#[tokio::test]
async fn duplicate_triple_is_rejected_by_the_database() {
    let t = TestDb::spawn().await;
    let _store = t.store("main").await;

    t.execute(&format!(
        "INSERT INTO {TABLE} (file_name, key, version, data) VALUES ('f', 'k', 'main', 'A')"
    ))
    .await;
    let dup = t
        .db
        .execute_unprepared(&format!(
            "INSERT INTO {TABLE} (file_name, key, version, data) VALUES ('f', 'k', 'main', 'B')"
        ))
        .await;
    assert!(dup.is_err());
}
