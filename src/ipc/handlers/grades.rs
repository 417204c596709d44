use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const BULK_RECORD_MAX_ENTRIES: usize = 5000;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn resolve_student(conn: &Connection, student_id: &str) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    if found.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    }
    Ok(())
}

// A component implies its class subject; the grade row stores both.
fn resolve_component_subject(
    conn: &Connection,
    component_id: &str,
) -> Result<String, HandlerErr> {
    let class_subject_id: Option<String> = conn
        .query_row(
            "SELECT class_subject_id FROM subject_components WHERE id = ?",
            [component_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    class_subject_id.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "component not found".to_string(),
        details: Some(json!({ "componentId": component_id })),
    })
}

fn resolve_term(conn: &Connection, term_id: &str) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM terms WHERE id = ?", [term_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    if found.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "term not found".to_string(),
            details: Some(json!({ "termId": term_id })),
        });
    }
    Ok(())
}

// Scores are stored as given; averaging and classification consume the
// raw value. Upstream validation owns range policy.
fn upsert_grade(
    conn: &Connection,
    student_id: &str,
    class_subject_id: &str,
    component_id: &str,
    term_id: &str,
    score: f64,
) -> Result<(), HandlerErr> {
    let grade_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO component_grades(id, student_id, class_subject_id, component_id, term_id, score, recorded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, component_id, term_id) DO UPDATE SET
           score = excluded.score,
           recorded_at = excluded.recorded_at",
        (
            &grade_id,
            student_id,
            class_subject_id,
            component_id,
            term_id,
            score,
            &now,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "component_grades" })),
    })?;
    Ok(())
}

fn handle_grades_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(component_id) = req.params.get("componentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing componentId", None);
    };
    let Some(term_id) = req.params.get("termId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing termId", None);
    };
    let Some(score) = req.params.get("score").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing numeric score", None);
    };

    if let Err(e) = resolve_student(conn, student_id) {
        return e.response(&req.id);
    }
    if let Err(e) = resolve_term(conn, term_id) {
        return e.response(&req.id);
    }
    let class_subject_id = match resolve_component_subject(conn, component_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    if let Err(e) = upsert_grade(conn, student_id, &class_subject_id, component_id, term_id, score)
    {
        return e.response(&req.id);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_grades_bulk_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let Some(term_id) = req.params.get("termId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing termId", None);
    };
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing entries[]", None);
    };

    if entries.len() > BULK_RECORD_MAX_ENTRIES {
        return err(
            &req.id,
            "bad_params",
            format!(
                "bulk payload exceeds max entries: {} > {}",
                entries.len(),
                BULK_RECORD_MAX_ENTRIES
            ),
            Some(json!({ "maxEntries": BULK_RECORD_MAX_ENTRIES })),
        );
    }

    if let Err(e) = resolve_term(conn, term_id) {
        return e.response(&req.id);
    }

    let mut recorded: usize = 0;
    let mut errors: Vec<serde_json::Value> = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": "entry must be an object",
            }));
            continue;
        };

        let Some(student_id) = obj.get("studentId").and_then(|v| v.as_str()) else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": "entry missing studentId",
            }));
            continue;
        };
        let Some(component_id) = obj.get("componentId").and_then(|v| v.as_str()) else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": "entry missing componentId",
            }));
            continue;
        };
        let Some(score) = obj.get("score").and_then(|v| v.as_f64()) else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": "entry missing numeric score",
            }));
            continue;
        };

        if let Err(e) = resolve_student(conn, student_id) {
            errors.push(json!({ "index": i, "code": e.code, "message": e.message }));
            continue;
        }
        let class_subject_id = match resolve_component_subject(conn, component_id) {
            Ok(v) => v,
            Err(e) => {
                errors.push(json!({ "index": i, "code": e.code, "message": e.message }));
                continue;
            }
        };

        match upsert_grade(conn, student_id, &class_subject_id, component_id, term_id, score) {
            Ok(()) => recorded += 1,
            Err(e) => errors.push(json!({ "index": i, "code": e.code, "message": e.message })),
        }
    }

    let mut result = json!({ "ok": true, "recorded": recorded });
    if !errors.is_empty() {
        result
            .as_object_mut()
            .expect("result should be object")
            .insert("rejected".into(), json!(errors.len()));
        result
            .as_object_mut()
            .expect("result should be object")
            .insert("errors".into(), json!(errors));
    }
    ok(&req.id, result)
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(term_id) = req.params.get("termId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing termId", None);
    };
    let student_id = req.params.get("studentId").and_then(|v| v.as_str());

    let mut stmt = match conn.prepare(
        "SELECT student_id, class_subject_id, component_id, score, recorded_at
         FROM component_grades
         WHERE term_id = ?1 AND (?2 IS NULL OR student_id = ?2)
         ORDER BY recorded_at, rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((term_id, student_id), |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "classSubjectId": r.get::<_, String>(1)?,
                "componentId": r.get::<_, String>(2)?,
                "score": r.get::<_, f64>(3)?,
                "recordedAt": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(v) => ok(&req.id, json!({ "grades": v })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.record" => Some(handle_grades_record(state, req)),
        "grades.bulkRecord" => Some(handle_grades_bulk_record(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        _ => None,
    }
}
