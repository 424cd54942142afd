use modhost_core::db::migrations::latest_version;
use modhost_core::db::{open_db, open_db_in_memory, DbError};
use modhost_core::{RepoError, SqliteModuleStore};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().expect("open in-memory db");

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "module_options");
    assert_table_exists(&conn, "module_errors");
    assert_column_exists(&conn, "module_errors", "session_id");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("modhost.db");

    let conn_first = open_db(&path).expect("first open");
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).expect("second open");
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "module_errors");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).expect("open raw connection");
    conn.execute_batch("PRAGMA user_version = 999;")
        .expect("set future version");
    drop(conn);

    let err = open_db(&path).expect_err("newer schema must be rejected");
    match err {
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
fn store_rejects_unmigrated_connection() {
    let conn = Connection::open_in_memory().expect("open raw connection");

    let err = match SqliteModuleStore::try_new(&conn) {
        Ok(_) => panic!("unmigrated connection must be rejected"),
        Err(err) => err,
    };
    assert!(matches!(
        err,
        RepoError::UninitializedConnection {
            actual_version: 0,
            ..
        }
    ));
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .expect("read user_version")
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
        .expect("query sqlite_master");
    assert_eq!(exists, 1, "table {table_name} does not exist");
}

fn assert_column_exists(conn: &Connection, table_name: &str, column: &str) {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table_name});"))
        .expect("prepare table_info");
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>("name"))
        .expect("query table_info")
        .collect::<Result<_, _>>()
        .expect("collect columns");
    assert!(
        columns.iter().any(|name| name == column),
        "column {table_name}.{column} does not exist"
    );
}
