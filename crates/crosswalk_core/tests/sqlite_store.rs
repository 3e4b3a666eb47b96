mod support;

use crosswalk_core::db::migrations::latest_version;
use crosswalk_core::db::{open_db, open_db_in_memory, DbError};
use crosswalk_core::{RegistryStore, RegistrySynchronizer, SqliteRegistryStore};
use rusqlite::Connection;
use support::{csv_store, definition, env, field, form, registry, seeded_snapshot, subform, MockEnvironment};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    for table in [
        "protocols",
        "protocol_mappings",
        "forms",
        "form_mappings",
        "fields",
        "field_mappings",
    ] {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn snapshot_survives_file_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.db");
    let snapshot = seeded_snapshot();
    {
        let conn = open_db(&path).unwrap();
        let store = SqliteRegistryStore::try_new(&conn).unwrap();
        store.save_protocols(&snapshot.protocols).unwrap();
        store.save_forms(&snapshot.forms).unwrap();
        store.save_fields(&snapshot.fields).unwrap();
    }

    let conn = open_db(&path).unwrap();
    let store = SqliteRegistryStore::try_new(&conn).unwrap();
    assert_eq!(store.load_snapshot().unwrap(), snapshot);
}

#[test]
fn sqlite_and_csv_stores_agree_after_full_sync() {
    let test = MockEnvironment::new("test");
    test.state().form(
        form(10, "Demographics", "demo", 100),
        definition(vec![
            field("RC", "Race"),
            subform("FH", "FamilyHistory", vec![field("REL", "Relation")]),
        ]),
    );
    test.state().protocol(1, "CP1", "Protocol One");
    let clients = registry(&[test]);
    let environments = [env("test")];

    let conn = open_db_in_memory().unwrap();
    let sqlite = SqliteRegistryStore::try_new(&conn).unwrap();
    RegistrySynchronizer::new(&sqlite, &clients)
        .full_sync(&environments)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let csv = csv_store(dir.path(), &["test"]);
    RegistrySynchronizer::new(&csv, &clients)
        .full_sync(&environments)
        .unwrap();

    assert_eq!(sqlite.load_snapshot().unwrap(), csv.load_snapshot().unwrap());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
