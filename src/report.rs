use serde::Serialize;
use std::cmp::Ordering;

use crate::calc::{self, Band};
use crate::store::{StudentRow, TermSnapshot};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterRow {
    pub student_id: String,
    pub full_name: String,
    pub class_level: String,
    pub overall: f64,
    pub letter_grade: Option<&'static str>,
    pub has_grades: bool,
    pub subjects_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterSortKey {
    Name,
    ClassLevel,
    Score,
}

impl RosterSortKey {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "name" => Some(RosterSortKey::Name),
            "classLevel" => Some(RosterSortKey::ClassLevel),
            "score" => Some(RosterSortKey::Score),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "asc" => Some(SortDirection::Ascending),
            "desc" => Some(SortDirection::Descending),
            _ => None,
        }
    }

    fn apply(self, ord: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RosterFilter {
    pub class_level: Option<String>,
    pub search: Option<String>,
}

impl RosterFilter {
    fn matches(&self, student: &StudentRow) -> bool {
        if let Some(level) = &self.class_level {
            if student.class_level != *level {
                return false;
            }
        }
        if let Some(needle) = &self.search {
            let haystack = student.full_name.to_ascii_lowercase();
            if !haystack.contains(&needle.to_ascii_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStats {
    pub excellent: usize,
    pub satisfactory: usize,
    pub needs_attention: usize,
    pub ungraded: usize,
    pub average: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterReport {
    pub rows: Vec<RosterRow>,
    pub stats: RosterStats,
}

fn name_order(a: &RosterRow, b: &RosterRow) -> Ordering {
    a.full_name
        .to_ascii_lowercase()
        .cmp(&b.full_name.to_ascii_lowercase())
        .then_with(|| a.student_id.cmp(&b.student_id))
}

/// Roster report for one term: per-student rows plus band counts and the
/// graded-only average. Inactive students are left out; every row is
/// recomputed from the snapshot on each call so weight edits show up
/// immediately.
pub fn build_roster(
    students: &[StudentRow],
    snapshot: &TermSnapshot,
    filter: &RosterFilter,
    sort: RosterSortKey,
    direction: SortDirection,
) -> RosterReport {
    let mut rows: Vec<RosterRow> = students
        .iter()
        .filter(|s| s.active && filter.matches(s))
        .map(|s| {
            let result = calc::student_overall(snapshot, &s.class_level, &s.id);
            RosterRow {
                student_id: s.id.clone(),
                full_name: s.full_name.clone(),
                class_level: s.class_level.clone(),
                overall: result.overall,
                letter_grade: result
                    .has_grades
                    .then(|| calc::letter_grade(result.overall)),
                has_grades: result.has_grades,
                subjects_count: result.subjects_count,
            }
        })
        .collect();

    rows.sort_by(|a, b| match sort {
        RosterSortKey::Name => direction.apply(name_order(a, b)),
        RosterSortKey::ClassLevel => direction.apply(
            a.class_level
                .to_ascii_lowercase()
                .cmp(&b.class_level.to_ascii_lowercase())
                .then_with(|| name_order(a, b)),
        ),
        // Ungraded rows trail graded rows in both directions; only the
        // graded block responds to the requested direction.
        RosterSortKey::Score => match (a.has_grades, b.has_grades) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => name_order(a, b),
            (true, true) => direction
                .apply(a.overall.partial_cmp(&b.overall).unwrap_or(Ordering::Equal))
                .then_with(|| name_order(a, b)),
        },
    });

    let stats = roster_stats(&rows);
    RosterReport { rows, stats }
}

fn roster_stats(rows: &[RosterRow]) -> RosterStats {
    let mut excellent = 0usize;
    let mut satisfactory = 0usize;
    let mut needs_attention = 0usize;
    let mut ungraded = 0usize;
    let mut graded_sum = 0.0_f64;
    let mut graded_count = 0usize;

    for row in rows {
        if !row.has_grades {
            ungraded += 1;
            continue;
        }
        graded_count += 1;
        graded_sum += row.overall;
        match calc::band_of(row.overall) {
            Band::Excellent => excellent += 1,
            Band::Satisfactory => satisfactory += 1,
            Band::NeedsAttention => needs_attention += 1,
        }
    }

    RosterStats {
        excellent,
        satisfactory,
        needs_attention,
        ungraded,
        average: if graded_count > 0 {
            calc::round2(graded_sum / (graded_count as f64))
        } else {
            0.0
        },
    }
}
