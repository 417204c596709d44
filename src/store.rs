use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

/// Read-layer failure surfaced to the IPC envelope. The aggregation
/// functions themselves never produce one of these; only the lookups that
/// feed them do.
#[derive(Debug, Clone, Serialize)]
pub struct StoreError {
    pub code: String,
    pub message: String,
}

impl StoreError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub full_name: String,
    pub class_level: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermRow {
    pub id: String,
    pub name: String,
    pub starts_on: Option<String>,
    pub ends_on: Option<String>,
    pub is_active: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone)]
pub struct SubjectRow {
    /// class_subjects row id: the (subject, class level, term) triple.
    pub id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub class_level: String,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ComponentRow {
    pub id: String,
    pub class_subject_id: String,
    pub name: String,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct GradeRow {
    pub student_id: String,
    pub component_id: String,
    pub score: f64,
}

/// Immutable per-term view of everything the engine needs: subjects for
/// every class level, their components, and the recorded grades. Fetched
/// once per request; the engine never re-reads during a computation, so a
/// single aggregation cannot observe a half-applied weight edit.
#[derive(Debug, Clone)]
pub struct TermSnapshot {
    pub term_id: String,
    subjects: Vec<SubjectRow>,
    components_by_subject: HashMap<String, Vec<ComponentRow>>,
    grades: HashMap<(String, String), f64>,
}

impl TermSnapshot {
    /// Grade rows are applied in order with the last row winning, which
    /// resolves duplicate (student, component) facts choose-latest when the
    /// caller supplies them sorted by recording time.
    pub fn new(
        term_id: String,
        subjects: Vec<SubjectRow>,
        components: Vec<ComponentRow>,
        grades: Vec<GradeRow>,
    ) -> Self {
        let mut components_by_subject: HashMap<String, Vec<ComponentRow>> = HashMap::new();
        for c in components {
            components_by_subject
                .entry(c.class_subject_id.clone())
                .or_default()
                .push(c);
        }

        let mut grade_map: HashMap<(String, String), f64> = HashMap::new();
        for g in grades {
            grade_map.insert((g.student_id, g.component_id), g.score);
        }

        Self {
            term_id,
            subjects,
            components_by_subject,
            grades: grade_map,
        }
    }

    pub fn subjects_for_level<'a>(
        &'a self,
        class_level: &'a str,
    ) -> impl Iterator<Item = &'a SubjectRow> {
        self.subjects
            .iter()
            .filter(move |s| s.class_level == class_level)
    }

    pub fn components_of(&self, class_subject_id: &str) -> &[ComponentRow] {
        self.components_by_subject
            .get(class_subject_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn grade(&self, student_id: &str, component_id: &str) -> Option<f64> {
        self.grades
            .get(&(student_id.to_string(), component_id.to_string()))
            .copied()
    }
}

pub fn load_students(conn: &Connection) -> Result<Vec<StudentRow>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, full_name, class_level, active
             FROM students
             ORDER BY full_name, id",
        )
        .map_err(StoreError::query)?;
    stmt.query_map([], |r| {
        Ok(StudentRow {
            id: r.get(0)?,
            full_name: r.get(1)?,
            class_level: r.get(2)?,
            active: r.get::<_, i64>(3)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(StoreError::query)
}

pub fn load_student(conn: &Connection, student_id: &str) -> Result<Option<StudentRow>, StoreError> {
    conn.query_row(
        "SELECT id, full_name, class_level, active FROM students WHERE id = ?",
        [student_id],
        |r| {
            Ok(StudentRow {
                id: r.get(0)?,
                full_name: r.get(1)?,
                class_level: r.get(2)?,
                active: r.get::<_, i64>(3)? != 0,
            })
        },
    )
    .optional()
    .map_err(StoreError::query)
}

pub fn load_terms(conn: &Connection) -> Result<Vec<TermRow>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, starts_on, ends_on, is_active, sort_order
             FROM terms
             ORDER BY sort_order, rowid",
        )
        .map_err(StoreError::query)?;
    stmt.query_map([], |r| {
        Ok(TermRow {
            id: r.get(0)?,
            name: r.get(1)?,
            starts_on: r.get(2)?,
            ends_on: r.get(3)?,
            is_active: r.get::<_, i64>(4)? != 0,
            sort_order: r.get(5)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(StoreError::query)
}

/// Explicit replacement for the ambient "current term" lookup: an explicit
/// request wins; otherwise the first term flagged active (zero or several
/// flagged rows are tolerated states); otherwise the first term in sort
/// order. `None` only when `requested` names an unknown term or no terms
/// exist. Resolved once by the IPC layer, never inside the engine.
pub fn resolve_reporting_term<'a>(
    terms: &'a [TermRow],
    requested: Option<&str>,
) -> Option<&'a TermRow> {
    if let Some(id) = requested {
        return terms.iter().find(|t| t.id == id);
    }
    terms
        .iter()
        .find(|t| t.is_active)
        .or_else(|| terms.first())
}

/// Fetch-once snapshot load for one term. Grades are read ordered by
/// recording time so the snapshot's last-row-wins insertion resolves any
/// duplicated (student, component) facts to the latest one.
pub fn load_term_snapshot(conn: &Connection, term_id: &str) -> Result<TermSnapshot, StoreError> {
    let mut subjects_stmt = conn
        .prepare(
            "SELECT cs.id, cs.subject_id, s.name, cs.class_level, cs.weight
             FROM class_subjects cs
             JOIN subjects s ON s.id = cs.subject_id
             WHERE cs.term_id = ?
             ORDER BY cs.class_level, s.name, cs.rowid",
        )
        .map_err(StoreError::query)?;
    let subjects: Vec<SubjectRow> = subjects_stmt
        .query_map([term_id], |r| {
            Ok(SubjectRow {
                id: r.get(0)?,
                subject_id: r.get(1)?,
                subject_name: r.get(2)?,
                class_level: r.get(3)?,
                weight: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)?;

    let components = if subjects.is_empty() {
        Vec::new()
    } else {
        let placeholders = std::iter::repeat("?")
            .take(subjects.len())
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT id, class_subject_id, name, weight
             FROM subject_components
             WHERE class_subject_id IN ({})
             ORDER BY rowid",
            placeholders
        );
        let bind_values: Vec<Value> = subjects
            .iter()
            .map(|s| Value::Text(s.id.clone()))
            .collect();
        let mut stmt = conn.prepare(&sql).map_err(StoreError::query)?;
        stmt.query_map(params_from_iter(bind_values), |r| {
            Ok(ComponentRow {
                id: r.get(0)?,
                class_subject_id: r.get(1)?,
                name: r.get(2)?,
                weight: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)?
    };

    let mut grades_stmt = conn
        .prepare(
            "SELECT student_id, component_id, score
             FROM component_grades
             WHERE term_id = ?
             ORDER BY recorded_at, rowid",
        )
        .map_err(StoreError::query)?;
    let grades: Vec<GradeRow> = grades_stmt
        .query_map([term_id], |r| {
            Ok(GradeRow {
                student_id: r.get(0)?,
                component_id: r.get(1)?,
                score: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)?;

    Ok(TermSnapshot::new(
        term_id.to_string(),
        subjects,
        components,
        grades,
    ))
}
