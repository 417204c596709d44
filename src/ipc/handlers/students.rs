use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store;
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn student_json(s: &store::StudentRow) -> serde_json::Value {
    json!({
        "studentId": s.id,
        "fullName": s.full_name,
        "classLevel": s.class_level,
        "active": s.active,
    })
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let Some(full_name) = req.params.get("fullName").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing fullName", None);
    };
    let full_name = full_name.trim();
    if full_name.is_empty() {
        return err(&req.id, "bad_params", "fullName must not be empty", None);
    }
    let Some(class_level) = req.params.get("classLevel").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing classLevel", None);
    };
    let class_level = class_level.trim();
    if class_level.is_empty() {
        return err(&req.id, "bad_params", "classLevel must not be empty", None);
    }

    let student_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, full_name, class_level, active, updated_at)
         VALUES(?, ?, ?, 1, ?)",
        (&student_id, full_name, class_level, &now),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

// Identity is immutable; name, class level and active flag are the
// administration-mutable fields.
fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    let full_name = req
        .params
        .get("fullName")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    if let Some(n) = &full_name {
        if n.is_empty() {
            return err(&req.id, "bad_params", "fullName must not be empty", None);
        }
    }
    let class_level = req
        .params
        .get("classLevel")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    if let Some(l) = &class_level {
        if l.is_empty() {
            return err(&req.id, "bad_params", "classLevel must not be empty", None);
        }
    }
    let active = req.params.get("active").and_then(|v| v.as_bool());

    let now = Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE students SET
            full_name = COALESCE(?, full_name),
            class_level = COALESCE(?, class_level),
            active = COALESCE(?, active),
            updated_at = ?
         WHERE id = ?",
        (
            &full_name,
            &class_level,
            active.map(|b| b as i64),
            &now,
            student_id,
        ),
    );
    match changed {
        Ok(0) => err(&req.id, "not_found", "student not found", None),
        Ok(_) => ok(&req.id, json!({ "studentId": student_id })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let students = match store::load_students(conn) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, e),
    };

    let class_level = req.params.get("classLevel").and_then(|v| v.as_str());
    let search = req
        .params
        .get("search")
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_lowercase());

    let rows: Vec<serde_json::Value> = students
        .iter()
        .filter(|s| class_level.map(|l| s.class_level == l).unwrap_or(true))
        .filter(|s| {
            search
                .as_ref()
                .map(|needle| s.full_name.to_ascii_lowercase().contains(needle))
                .unwrap_or(true)
        })
        .map(student_json)
        .collect();

    ok(&req.id, json!({ "students": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
