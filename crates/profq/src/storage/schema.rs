use rusqlite::Connection;

pub const SCHEMA_VERSION: i32 = 1;

/// Create all tables (drops existing tables first to ensure clean state)
pub fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS markers;
        DROP TABLE IF EXISTS samples;
        DROP TABLE IF EXISTS threads;
        DROP TABLE IF EXISTS stacks;
        DROP TABLE IF EXISTS funcs;
        DROP TABLE IF EXISTS libs;
        DROP TABLE IF EXISTS meta;

        -- Metadata table
        CREATE TABLE meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE libs (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            path TEXT NOT NULL
        );

        CREATE TABLE funcs (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            lib_id INTEGER,
            file TEXT,
            line INTEGER,
            FOREIGN KEY (lib_id) REFERENCES libs(id)
        );

        -- Prefix tree of frames; prefix always precedes the row
        CREATE TABLE stacks (
            id INTEGER PRIMARY KEY,
            prefix_id INTEGER,
            func_id INTEGER NOT NULL,
            FOREIGN KEY (prefix_id) REFERENCES stacks(id),
            FOREIGN KEY (func_id) REFERENCES funcs(id)
        );

        CREATE TABLE threads (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            process_name TEXT NOT NULL,
            pid TEXT NOT NULL,
            tid TEXT NOT NULL,
            is_main INTEGER NOT NULL,
            register_time REAL NOT NULL,
            unregister_time REAL
        );

        -- weight and cpu_delta are NULL when the thread has no such column
        CREATE TABLE samples (
            thread_id INTEGER NOT NULL,
            idx INTEGER NOT NULL,
            time REAL NOT NULL,
            stack_id INTEGER,
            weight REAL,
            cpu_delta REAL,
            PRIMARY KEY (thread_id, idx),
            FOREIGN KEY (thread_id) REFERENCES threads(id)
        );

        -- Payload is stored as JSON text
        CREATE TABLE markers (
            thread_id INTEGER NOT NULL,
            idx INTEGER NOT NULL,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            start REAL NOT NULL,
            end REAL,
            data TEXT,
            stack_id INTEGER,
            PRIMARY KEY (thread_id, idx),
            FOREIGN KEY (thread_id) REFERENCES threads(id)
        );
        "#,
    )
}

/// Set a metadata key
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
        [key, value],
    )?;
    Ok(())
}

/// Get a metadata key
pub fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?", [key], |row| {
        row.get(0)
    })
    .optional()
}

trait OptionalExt<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalExt<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
