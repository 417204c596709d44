use crate::calc;
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, RosterFilter, RosterSortKey, SortDirection};
use crate::store::{self, StudentRow, TermRow};
use rusqlite::Connection;
use serde_json::json;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

// Resolves the reporting term exactly once per request: explicit param,
// else first active term, else first term. The engine only ever sees the
// resolved term's snapshot.
fn resolve_term(conn: &Connection, req: &Request) -> Result<TermRow, serde_json::Value> {
    let terms = store::load_terms(conn).map_err(|e| store_err(&req.id, e))?;
    let requested = req.params.get("termId").and_then(|v| v.as_str());
    match store::resolve_reporting_term(&terms, requested) {
        Some(t) => Ok(t.clone()),
        None => {
            if let Some(id) = requested {
                Err(err(
                    &req.id,
                    "not_found",
                    "term not found",
                    Some(json!({ "termId": id })),
                ))
            } else {
                Err(err(&req.id, "no_terms", "no terms are configured", None))
            }
        }
    }
}

fn load_student_or_err(
    conn: &Connection,
    req: &Request,
) -> Result<StudentRow, serde_json::Value> {
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) else {
        return Err(err(&req.id, "bad_params", "missing studentId", None));
    };
    let student =
        store::load_student(conn, student_id).map_err(|e| store_err(&req.id, e))?;
    student.ok_or_else(|| {
        err(
            &req.id,
            "not_found",
            "student not found",
            Some(json!({ "studentId": student_id })),
        )
    })
}

fn handle_classify(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(score) = req.params.get("score").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing numeric score", None);
    };
    let c = calc::classify(score);
    ok(&req.id, json!({ "letter": c.letter, "band": c.band }))
}

fn handle_student_overall(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student = match load_student_or_err(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let term = match resolve_term(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };

    let snapshot = match store::load_term_snapshot(conn, &term.id) {
        Ok(s) => s,
        Err(e) => return store_err(&req.id, e),
    };
    let result = calc::student_overall(&snapshot, &student.class_level, &student.id);

    ok(
        &req.id,
        json!({
            "studentId": student.id,
            "termId": snapshot.term_id,
            "overall": result.overall,
            "hasGrades": result.has_grades,
            "subjectsCount": result.subjects_count,
        }),
    )
}

fn handle_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let term = match resolve_term(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };

    let sort = match req.params.get("sortBy").and_then(|v| v.as_str()) {
        None => RosterSortKey::Name,
        Some(raw) => match RosterSortKey::parse(raw) {
            Some(k) => k,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "sortBy must be one of: name, classLevel, score",
                    Some(json!({ "sortBy": raw })),
                )
            }
        },
    };
    let direction = match req.params.get("direction").and_then(|v| v.as_str()) {
        None => SortDirection::Ascending,
        Some(raw) => match SortDirection::parse(raw) {
            Some(d) => d,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "direction must be asc or desc",
                    Some(json!({ "direction": raw })),
                )
            }
        },
    };
    let filter = RosterFilter {
        class_level: req
            .params
            .get("classLevel")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        search: req
            .params
            .get("search")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    };

    let students = match store::load_students(conn) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, e),
    };
    let snapshot = match store::load_term_snapshot(conn, &term.id) {
        Ok(s) => s,
        Err(e) => return store_err(&req.id, e),
    };

    let rep = report::build_roster(&students, &snapshot, &filter, sort, direction);
    ok(
        &req.id,
        json!({
            "term": { "termId": term.id, "name": term.name },
            "rows": rep.rows,
            "stats": rep.stats,
        }),
    )
}

fn handle_student_profile(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student = match load_student_or_err(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let term = match resolve_term(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };

    let snapshot = match store::load_term_snapshot(conn, &term.id) {
        Ok(s) => s,
        Err(e) => return store_err(&req.id, e),
    };
    let profile = calc::student_profile(&snapshot, &student.class_level, &student.id);

    ok(
        &req.id,
        json!({
            "student": {
                "studentId": student.id,
                "fullName": student.full_name,
                "classLevel": student.class_level,
            },
            "term": { "termId": term.id, "name": term.name },
            "subjects": profile.subjects,
            "profileAverage": profile.profile_average,
            "hasGrades": profile.has_grades,
            "weightedOverall": profile.weighted_overall,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "perf.classify" => Some(handle_classify(state, req)),
        "perf.studentOverall" => Some(handle_student_overall(state, req)),
        "perf.roster" => Some(handle_roster(state, req)),
        "perf.studentProfile" => Some(handle_student_profile(state, req)),
        _ => None,
    }
}
