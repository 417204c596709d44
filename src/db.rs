use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "scorebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            class_level TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT
        )",
        [],
    )?;
    ensure_students_updated_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_level ON students(class_level)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            starts_on TEXT,
            ends_on TEXT,
            is_active INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_terms_sort ON terms(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_subjects(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            class_level TEXT NOT NULL,
            term_id TEXT NOT NULL,
            weight REAL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            UNIQUE(subject_id, class_level, term_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_subjects_term ON class_subjects(term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_subjects_level_term
         ON class_subjects(class_level, term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_components(
            id TEXT PRIMARY KEY,
            class_subject_id TEXT NOT NULL,
            name TEXT NOT NULL,
            weight REAL NOT NULL,
            FOREIGN KEY(class_subject_id) REFERENCES class_subjects(id),
            UNIQUE(class_subject_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_components_subject
         ON subject_components(class_subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS component_grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_subject_id TEXT NOT NULL,
            component_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            score REAL NOT NULL,
            recorded_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_subject_id) REFERENCES class_subjects(id),
            FOREIGN KEY(component_id) REFERENCES subject_components(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            UNIQUE(student_id, component_id, term_id)
        )",
        [],
    )?;
    ensure_component_grades_recorded_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_component_grades_term ON component_grades(term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_component_grades_student
         ON component_grades(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_component_grades_component
         ON component_grades(component_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

// Workspaces created before grade recording was timestamped lack the
// column; choose-latest dedupe then falls back to rowid order.
fn ensure_component_grades_recorded_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "component_grades", "recorded_at")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE component_grades ADD COLUMN recorded_at TEXT",
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
