use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn parse_date(
    req: &Request,
    key: &str,
) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("{} must be a YYYY-MM-DD string", key),
                    None,
                ));
            };
            if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_err() {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("{} must be a valid YYYY-MM-DD date", key),
                    Some(json!({ key: s })),
                ));
            }
            Ok(Some(s.to_string()))
        }
    }
}

fn term_json(t: &store::TermRow) -> serde_json::Value {
    json!({
        "termId": t.id,
        "name": t.name,
        "startsOn": t.starts_on,
        "endsOn": t.ends_on,
        "isActive": t.is_active,
        "sortOrder": t.sort_order,
    })
}

fn handle_terms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let Some(name) = req.params.get("name").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing name", None);
    };
    let name = name.trim();
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let starts_on = match parse_date(req, "startsOn") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ends_on = match parse_date(req, "endsOn") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let (Some(start), Some(end)) = (&starts_on, &ends_on) {
        if start > end {
            return err(
                &req.id,
                "bad_params",
                "startsOn must not be after endsOn",
                Some(json!({ "startsOn": start, "endsOn": end })),
            );
        }
    }
    let is_active = req
        .params
        .get("isActive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let next_sort: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM terms",
        [],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let term_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO terms(id, name, starts_on, ends_on, is_active, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &term_id,
            name,
            &starts_on,
            &ends_on,
            is_active as i64,
            next_sort,
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "termId": term_id, "sortOrder": next_sort }))
}

fn handle_terms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let terms = match store::load_terms(conn) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, e),
    };
    let rows: Vec<serde_json::Value> = terms.iter().map(term_json).collect();
    ok(&req.id, json!({ "terms": rows }))
}

fn handle_terms_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(term_id) = req.params.get("termId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing termId", None);
    };

    let name = req
        .params
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    if let Some(n) = &name {
        if n.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
    }
    let starts_on = match parse_date(req, "startsOn") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ends_on = match parse_date(req, "endsOn") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let changed = conn.execute(
        "UPDATE terms SET
            name = COALESCE(?, name),
            starts_on = COALESCE(?, starts_on),
            ends_on = COALESCE(?, ends_on)
         WHERE id = ?",
        (&name, &starts_on, &ends_on, term_id),
    );
    match changed {
        Ok(0) => err(&req.id, "not_found", "term not found", None),
        Ok(_) => ok(&req.id, json!({ "termId": term_id })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

// Maintains the single-active convention on write. Readers never rely on
// it: zero or several active rows still resolve via the fallback chain.
fn handle_terms_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(term_id) = req.params.get("termId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing termId", None);
    };

    let exists: Result<i64, _> = conn.query_row(
        "SELECT COUNT(*) FROM terms WHERE id = ?",
        [term_id],
        |r| r.get(0),
    );
    match exists {
        Ok(0) => return err(&req.id, "not_found", "term not found", None),
        Ok(_) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute("UPDATE terms SET is_active = 0", []) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    if let Err(e) = conn.execute("UPDATE terms SET is_active = 1 WHERE id = ?", [term_id]) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "termId": term_id, "isActive": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "terms.create" => Some(handle_terms_create(state, req)),
        "terms.list" => Some(handle_terms_list(state, req)),
        "terms.update" => Some(handle_terms_update(state, req)),
        "terms.setActive" => Some(handle_terms_set_active(state, req)),
        _ => None,
    }
}
