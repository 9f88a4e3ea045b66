use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("attendance.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            shortname TEXT NOT NULL UNIQUE,
            fullname TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            name TEXT NOT NULL,
            subnet TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_course ON activities(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(course_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_groups_course ON groups(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            activity_id TEXT NOT NULL,
            group_id TEXT,
            sess_start INTEGER NOT NULL,
            duration INTEGER NOT NULL,
            description TEXT NOT NULL,
            description_format INTEGER NOT NULL,
            description_item_id INTEGER NOT NULL,
            session_type TEXT NOT NULL DEFAULT '',
            students_can_mark INTEGER NOT NULL,
            password TEXT NOT NULL,
            random_password INTEGER NOT NULL,
            subnet TEXT NOT NULL,
            status_set INTEGER NOT NULL,
            time_modified INTEGER NOT NULL,
            FOREIGN KEY(activity_id) REFERENCES activities(id),
            FOREIGN KEY(group_id) REFERENCES groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_activity ON sessions(activity_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_activity_start ON sessions(activity_id, sess_start)",
        [],
    )?;

    // Workspaces created before the typed-session variant lack session_type.
    ensure_sessions_session_type(conn)?;

    Ok(())
}

fn ensure_sessions_session_type(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "sessions", "session_type")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE sessions ADD COLUMN session_type TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
