use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let Some(raw) = req.params.get(key).and_then(|v| v.as_str()) else {
        return Err(err(&req.id, "bad_params", format!("missing {}", key), None));
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be empty", key),
            None,
        ));
    }
    Ok(trimmed.to_string())
}

fn row_exists(
    conn: &Connection,
    req: &Request,
    sql: &str,
    id: &str,
    what: &str,
) -> Result<(), serde_json::Value> {
    let found: Option<i64> = conn
        .query_row(sql, [id], |r| r.get(0))
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if found.is_none() {
        return Err(err(
            &req.id,
            "not_found",
            format!("{} not found", what),
            Some(json!({ "id": id })),
        ));
    }
    Ok(())
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, name) VALUES(?, ?)",
        (&subject_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "name": name })),
        );
    }
    ok(&req.id, json!({ "subjectId": subject_id }))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare("SELECT id, name FROM subjects ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "subjectId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(v) => ok(&req.id, json!({ "subjects": v })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn parse_optional_weight(req: &Request, key: &str) -> Result<Option<f64>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_f64() {
            Some(w) => Ok(Some(w)),
            None => Err(err(
                &req.id,
                "bad_params",
                format!("{} must be a number or null", key),
                None,
            )),
        },
    }
}

fn handle_class_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_level = match required_str(req, "classLevel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let weight = match parse_optional_weight(req, "weight") {
        Ok(v) => v,
        Err(e) => return e,
    };

    if let Err(e) = row_exists(
        conn,
        req,
        "SELECT 1 FROM subjects WHERE id = ?",
        &subject_id,
        "subject",
    ) {
        return e;
    }
    if let Err(e) = row_exists(conn, req, "SELECT 1 FROM terms WHERE id = ?", &term_id, "term") {
        return e;
    }

    let class_subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO class_subjects(id, subject_id, class_level, term_id, weight)
         VALUES(?, ?, ?, ?, ?)",
        (&class_subject_id, &subject_id, &class_level, &term_id, weight),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "classSubjectId": class_subject_id }))
}

fn handle_class_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_level = req.params.get("classLevel").and_then(|v| v.as_str());
    let term_id = req.params.get("termId").and_then(|v| v.as_str());

    let mut stmt = match conn.prepare(
        "SELECT cs.id, cs.subject_id, s.name, cs.class_level, cs.term_id, cs.weight
         FROM class_subjects cs
         JOIN subjects s ON s.id = cs.subject_id
         WHERE (?1 IS NULL OR cs.class_level = ?1)
           AND (?2 IS NULL OR cs.term_id = ?2)
         ORDER BY cs.class_level, s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((class_level, term_id), |r| {
            Ok(json!({
                "classSubjectId": r.get::<_, String>(0)?,
                "subjectId": r.get::<_, String>(1)?,
                "subjectName": r.get::<_, String>(2)?,
                "classLevel": r.get::<_, String>(3)?,
                "termId": r.get::<_, String>(4)?,
                "weight": r.get::<_, Option<f64>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(v) => ok(&req.id, json!({ "classSubjects": v })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

// Nothing is cached; a weight edit is visible to the next computation
// even when grades already exist.
fn handle_class_subjects_set_weight(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_subject_id = match required_str(req, "classSubjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let weight = match parse_optional_weight(req, "weight") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let changed = conn.execute(
        "UPDATE class_subjects SET weight = ? WHERE id = ?",
        (weight, &class_subject_id),
    );
    match changed {
        Ok(0) => err(&req.id, "not_found", "class subject not found", None),
        Ok(_) => ok(
            &req.id,
            json!({ "classSubjectId": class_subject_id, "weight": weight }),
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_components_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_subject_id = match required_str(req, "classSubjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(weight) = req.params.get("weight").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing numeric weight", None);
    };

    if let Err(e) = row_exists(
        conn,
        req,
        "SELECT 1 FROM class_subjects WHERE id = ?",
        &class_subject_id,
        "class subject",
    ) {
        return e;
    }

    let component_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subject_components(id, class_subject_id, name, weight)
         VALUES(?, ?, ?, ?)",
        (&component_id, &class_subject_id, &name, weight),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "componentId": component_id }))
}

fn handle_components_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_subject_id = match required_str(req, "classSubjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, weight FROM subject_components
         WHERE class_subject_id = ?
         ORDER BY rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_subject_id], |r| {
            Ok(json!({
                "componentId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "weight": r.get::<_, f64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(v) => ok(&req.id, json!({ "components": v })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_components_set_weight(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let component_id = match required_str(req, "componentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(weight) = req.params.get("weight").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing numeric weight", None);
    };

    let changed = conn.execute(
        "UPDATE subject_components SET weight = ? WHERE id = ?",
        (weight, &component_id),
    );
    match changed {
        Ok(0) => err(&req.id, "not_found", "component not found", None),
        Ok(_) => ok(
            &req.id,
            json!({ "componentId": component_id, "weight": weight }),
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "classSubjects.create" => Some(handle_class_subjects_create(state, req)),
        "classSubjects.list" => Some(handle_class_subjects_list(state, req)),
        "classSubjects.setWeight" => Some(handle_class_subjects_set_weight(state, req)),
        "components.create" => Some(handle_components_create(state, req)),
        "components.list" => Some(handle_components_list(state, req)),
        "components.setWeight" => Some(handle_components_set_weight(state, req)),
        _ => None,
    }
}
