use serde::Serialize;

use crate::store::TermSnapshot;

/// Reporting rounding used everywhere an average leaves the engine:
/// two decimals, half away from zero.
pub fn round2(x: f64) -> f64 {
    (100.0 * x).round() / 100.0
}

/// Weight applied to a class-subject whose weight column is unset.
pub const DEFAULT_SUBJECT_WEIGHT: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Excellent,
    Satisfactory,
    NeedsAttention,
}

impl Band {
    pub fn as_str(self) -> &'static str {
        match self {
            Band::Excellent => "excellent",
            Band::Satisfactory => "satisfactory",
            Band::NeedsAttention => "needs attention",
        }
    }
}

/// Status band for a numeric average. The 80/60 split is independent of the
/// letter table below; the two must not be unified.
pub fn band_of(score: f64) -> Band {
    match score {
        s if s >= 80.0 => Band::Excellent,
        s if s >= 60.0 => Band::Satisfactory,
        _ => Band::NeedsAttention,
    }
}

/// Letter grade for a numeric average. Closed lower bounds, highest match
/// wins. No clamping: out-of-range input falls through the same ladder.
pub fn letter_grade(score: f64) -> &'static str {
    match score {
        s if s >= 96.0 => "A+",
        s if s >= 93.0 => "A",
        s if s >= 90.0 => "A-",
        s if s >= 86.0 => "B+",
        s if s >= 83.0 => "B",
        s if s >= 80.0 => "B-",
        s if s >= 76.0 => "C+",
        s if s >= 73.0 => "C",
        s if s >= 70.0 => "C-",
        s if s >= 66.0 => "D+",
        s if s >= 63.0 => "D",
        s if s >= 60.0 => "D-",
        _ => "F",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub letter: &'static str,
    pub band: &'static str,
}

pub fn classify(score: f64) -> Classification {
    Classification {
        letter: letter_grade(score),
        band: band_of(score).as_str(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubjectAverage {
    pub average: f64,
    pub graded_count: usize,
    pub component_count: usize,
}

/// Grade-weighted mean over the components that actually carry a grade.
///
/// Returns `None` when the subject is excluded from aggregation: no
/// component has a grade, or the graded components' weights sum to zero.
/// An absent grade is exclusion, never an implicit zero.
pub fn subject_average<I>(parts: I) -> Option<SubjectAverage>
where
    I: IntoIterator<Item = (f64, Option<f64>)>,
{
    let mut numerator = 0.0_f64;
    let mut denominator = 0.0_f64;
    let mut graded_count: usize = 0;
    let mut component_count: usize = 0;

    for (weight, score) in parts {
        component_count += 1;
        let Some(score) = score else {
            continue;
        };
        graded_count += 1;
        numerator += score * weight;
        denominator += weight;
    }

    if graded_count == 0 || denominator == 0.0 {
        return None;
    }

    Some(SubjectAverage {
        average: numerator / denominator,
        graded_count,
        component_count,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallResult {
    pub overall: f64,
    pub has_grades: bool,
    pub subjects_count: usize,
}

/// Subject-weighted overall average for one student in one term.
///
/// Excluded subjects (no components, no graded components, zero weight sum)
/// contribute to neither the numerator nor the denominator, so an
/// unconfigured or ungraded subject never drags the overall toward zero.
/// Total over its inputs: every input combination yields a result.
pub fn student_overall(
    snapshot: &TermSnapshot,
    class_level: &str,
    student_id: &str,
) -> OverallResult {
    let mut numerator = 0.0_f64;
    let mut denominator = 0.0_f64;
    let mut graded_subjects: usize = 0;

    for subject in snapshot.subjects_for_level(class_level) {
        let components = snapshot.components_of(&subject.id);
        if components.is_empty() {
            // Not yet gradeable; skipped entirely.
            continue;
        }
        let parts = components
            .iter()
            .map(|c| (c.weight, snapshot.grade(student_id, &c.id)));
        let Some(avg) = subject_average(parts) else {
            continue;
        };

        let weight = subject.weight.unwrap_or(DEFAULT_SUBJECT_WEIGHT);
        numerator += avg.average * weight;
        denominator += weight;
        graded_subjects += 1;
    }

    if graded_subjects == 0 || denominator == 0.0 {
        return OverallResult {
            overall: 0.0,
            has_grades: false,
            subjects_count: graded_subjects,
        };
    }

    OverallResult {
        overall: round2(numerator / denominator),
        has_grades: true,
        subjects_count: graded_subjects,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentLine {
    pub component_id: String,
    pub name: String,
    pub weight: f64,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectBreakdown {
    pub class_subject_id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub weight: Option<f64>,
    pub components: Vec<ComponentLine>,
    pub graded_count: usize,
    pub average: Option<f64>,
    pub letter_grade: Option<&'static str>,
    pub band: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub subjects: Vec<SubjectBreakdown>,
    /// Unweighted mean of the visible per-subject averages. A review metric,
    /// intentionally distinct from `weighted_overall`.
    pub profile_average: f64,
    pub has_grades: bool,
    /// The roster/admission metric of `student_overall`, carried alongside
    /// the profile average under its own name.
    pub weighted_overall: OverallResult,
}

/// Per-subject breakdown for the student detail view. Subjects with
/// components appear with their component lines even when ungraded; only
/// subjects carrying an average enter the profile mean.
pub fn student_profile(
    snapshot: &TermSnapshot,
    class_level: &str,
    student_id: &str,
) -> StudentProfile {
    let mut subjects: Vec<SubjectBreakdown> = Vec::new();
    let mut average_sum = 0.0_f64;
    let mut averaged_count: usize = 0;

    for subject in snapshot.subjects_for_level(class_level) {
        let components = snapshot.components_of(&subject.id);
        if components.is_empty() {
            continue;
        }

        let lines: Vec<ComponentLine> = components
            .iter()
            .map(|c| ComponentLine {
                component_id: c.id.clone(),
                name: c.name.clone(),
                weight: c.weight,
                score: snapshot.grade(student_id, &c.id),
            })
            .collect();

        let avg = subject_average(lines.iter().map(|l| (l.weight, l.score)));
        let shown = avg.map(|a| round2(a.average));
        if let Some(v) = shown {
            average_sum += v;
            averaged_count += 1;
        }

        subjects.push(SubjectBreakdown {
            class_subject_id: subject.id.clone(),
            subject_id: subject.subject_id.clone(),
            subject_name: subject.subject_name.clone(),
            weight: subject.weight,
            components: lines,
            graded_count: avg.map(|a| a.graded_count).unwrap_or(0),
            average: shown,
            letter_grade: shown.map(letter_grade),
            band: shown.map(|v| band_of(v).as_str()),
        });
    }

    let profile_average = if averaged_count > 0 {
        round2(average_sum / (averaged_count as f64))
    } else {
        0.0
    };

    StudentProfile {
        subjects,
        profile_average,
        has_grades: averaged_count > 0,
        weighted_overall: student_overall(snapshot, class_level, student_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ComponentRow, GradeRow, SubjectRow, TermSnapshot};

    fn subject(id: &str, name: &str, weight: Option<f64>) -> SubjectRow {
        SubjectRow {
            id: id.to_string(),
            subject_id: format!("cat-{}", id),
            subject_name: name.to_string(),
            class_level: "7".to_string(),
            weight,
        }
    }

    fn component(id: &str, subject_id: &str, weight: f64) -> ComponentRow {
        ComponentRow {
            id: id.to_string(),
            class_subject_id: subject_id.to_string(),
            name: id.to_string(),
            weight,
        }
    }

    fn grade(student: &str, component: &str, score: f64) -> GradeRow {
        GradeRow {
            student_id: student.to_string(),
            component_id: component.to_string(),
            score,
        }
    }

    fn snapshot(
        subjects: Vec<SubjectRow>,
        components: Vec<ComponentRow>,
        grades: Vec<GradeRow>,
    ) -> TermSnapshot {
        TermSnapshot::new("t1".to_string(), subjects, components, grades)
    }

    #[test]
    fn round2_is_half_away_from_zero() {
        assert_eq!(round2(78.0), 78.0);
        assert_eq!(round2(220.0 / 3.0), 73.33);
        assert_eq!(round2(206.0 / 3.0), 68.67);
        assert_eq!(round2(-205.0 / 3.0), -68.33);
    }

    #[test]
    fn letter_ladder_boundaries() {
        assert_eq!(letter_grade(100.0), "A+");
        assert_eq!(letter_grade(96.0), "A+");
        assert_eq!(letter_grade(95.99), "A");
        assert_eq!(letter_grade(93.0), "A");
        assert_eq!(letter_grade(90.0), "A-");
        assert_eq!(letter_grade(89.99), "B+");
        assert_eq!(letter_grade(86.0), "B+");
        assert_eq!(letter_grade(83.0), "B");
        assert_eq!(letter_grade(80.0), "B-");
        assert_eq!(letter_grade(76.0), "C+");
        assert_eq!(letter_grade(73.0), "C");
        assert_eq!(letter_grade(70.0), "C-");
        assert_eq!(letter_grade(66.0), "D+");
        assert_eq!(letter_grade(63.0), "D");
        assert_eq!(letter_grade(60.0), "D-");
        assert_eq!(letter_grade(59.99), "F");
        assert_eq!(letter_grade(0.0), "F");
    }

    #[test]
    fn letter_ladder_applies_outside_expected_range() {
        // No clamping: the same thresholds classify out-of-range input.
        assert_eq!(letter_grade(140.0), "A+");
        assert_eq!(letter_grade(-12.0), "F");
        assert_eq!(band_of(140.0), Band::Excellent);
        assert_eq!(band_of(-12.0), Band::NeedsAttention);
    }

    #[test]
    fn band_thresholds_are_independent_of_letters() {
        // 79.99 is a C+ but still satisfactory; 80 flips the band while the
        // letter table flips at 80/83/86.
        assert_eq!(letter_grade(79.99), "C+");
        assert_eq!(band_of(79.99), Band::Satisfactory);
        assert_eq!(letter_grade(80.0), "B-");
        assert_eq!(band_of(80.0), Band::Excellent);
        assert_eq!(letter_grade(60.0), "D-");
        assert_eq!(band_of(60.0), Band::Satisfactory);
        assert_eq!(letter_grade(59.0), "F");
        assert_eq!(band_of(59.0), Band::NeedsAttention);
    }

    #[test]
    fn letter_rank_is_non_decreasing() {
        let order = [
            "F", "D-", "D", "D+", "C-", "C", "C+", "B-", "B", "B+", "A-", "A", "A+",
        ];
        let rank = |letter: &str| order.iter().position(|l| *l == letter).unwrap();
        let mut last = 0usize;
        let mut x = -5.0_f64;
        while x <= 105.0 {
            let r = rank(letter_grade(x));
            assert!(r >= last, "rank dropped at {}", x);
            last = r;
            x += 0.25;
        }
    }

    #[test]
    fn subject_average_excludes_missing_grades() {
        // Graded component only: 90*40/40.
        let avg = subject_average(vec![(40.0, Some(90.0)), (60.0, None)]).unwrap();
        assert_eq!(avg.average, 90.0);
        assert_eq!(avg.graded_count, 1);
        assert_eq!(avg.component_count, 2);
    }

    #[test]
    fn subject_average_none_when_ungraded_or_weightless() {
        assert!(subject_average(vec![(40.0, None), (60.0, None)]).is_none());
        assert!(subject_average(Vec::<(f64, Option<f64>)>::new()).is_none());
        // All graded components carry zero weight: excluded, not divided.
        assert!(subject_average(vec![(0.0, Some(88.0)), (0.0, Some(70.0))]).is_none());
    }

    #[test]
    fn worked_example_two_components() {
        // C1 w40 s90, C2 w60 s70 under one full-weight subject:
        // (90*40 + 70*60) / 100 = 78.
        let snap = snapshot(
            vec![subject("math", "Mathematics", Some(100.0))],
            vec![component("c1", "math", 40.0), component("c2", "math", 60.0)],
            vec![grade("s1", "c1", 90.0), grade("s1", "c2", 70.0)],
        );
        let r = student_overall(&snap, "7", "s1");
        assert_eq!(
            r,
            OverallResult {
                overall: 78.0,
                has_grades: true,
                subjects_count: 1
            }
        );
        let c = classify(r.overall);
        assert_eq!(c.letter, "C+");
        assert_eq!(c.band, "satisfactory");
    }

    #[test]
    fn worked_example_missing_component_grade() {
        // Same shape but C2 never graded: subject average from C1 alone.
        let snap = snapshot(
            vec![subject("math", "Mathematics", Some(100.0))],
            vec![component("c1", "math", 40.0), component("c2", "math", 60.0)],
            vec![grade("s1", "c1", 90.0)],
        );
        let r = student_overall(&snap, "7", "s1");
        assert_eq!(r.overall, 90.0);
        assert!(r.has_grades);
        assert_eq!(r.subjects_count, 1);
        assert_eq!(classify(r.overall).letter, "A-");
        assert_eq!(classify(r.overall).band, "excellent");
    }

    #[test]
    fn ungraded_subject_does_not_dilute_the_denominator() {
        let graded_only = snapshot(
            vec![subject("math", "Mathematics", Some(100.0))],
            vec![component("c1", "math", 40.0), component("c2", "math", 60.0)],
            vec![grade("s1", "c1", 90.0), grade("s1", "c2", 70.0)],
        );
        let with_ungraded = snapshot(
            vec![
                subject("math", "Mathematics", Some(100.0)),
                subject("sci", "Science", Some(50.0)),
            ],
            vec![
                component("c1", "math", 40.0),
                component("c2", "math", 60.0),
                component("c3", "sci", 100.0),
            ],
            vec![grade("s1", "c1", 90.0), grade("s1", "c2", 70.0)],
        );
        assert_eq!(
            student_overall(&graded_only, "7", "s1"),
            student_overall(&with_ungraded, "7", "s1")
        );
    }

    #[test]
    fn componentless_and_zero_weight_additions_change_nothing() {
        let base = snapshot(
            vec![subject("math", "Mathematics", Some(100.0))],
            vec![component("c1", "math", 40.0)],
            vec![grade("s1", "c1", 90.0)],
        );
        let baseline = student_overall(&base, "7", "s1");

        // A class-subject with zero components is skipped entirely.
        let with_empty_subject = snapshot(
            vec![
                subject("math", "Mathematics", Some(100.0)),
                subject("art", "Art", Some(75.0)),
            ],
            vec![component("c1", "math", 40.0)],
            vec![grade("s1", "c1", 90.0)],
        );
        assert_eq!(student_overall(&with_empty_subject, "7", "s1"), baseline);

        // A weight-0 ungraded component is invisible to the average.
        let with_zero_weight = snapshot(
            vec![subject("math", "Mathematics", Some(100.0))],
            vec![component("c1", "math", 40.0), component("cz", "math", 0.0)],
            vec![grade("s1", "c1", 90.0)],
        );
        assert_eq!(student_overall(&with_zero_weight, "7", "s1"), baseline);
    }

    #[test]
    fn configured_but_ungraded_student_is_ungraded_not_zero() {
        let snap = snapshot(
            vec![subject("math", "Mathematics", Some(100.0))],
            vec![component("c1", "math", 40.0), component("c2", "math", 60.0)],
            vec![],
        );
        assert_eq!(
            student_overall(&snap, "7", "s1"),
            OverallResult {
                overall: 0.0,
                has_grades: false,
                subjects_count: 0
            }
        );
    }

    #[test]
    fn no_subjects_means_not_yet_gradeable() {
        let snap = snapshot(vec![], vec![], vec![]);
        assert_eq!(
            student_overall(&snap, "7", "s1"),
            OverallResult {
                overall: 0.0,
                has_grades: false,
                subjects_count: 0
            }
        );
    }

    #[test]
    fn unset_subject_weight_defaults_to_full_share() {
        // Subj1 weight unset (100 by default), Subj2 weight 50:
        // (80*100 + 60*50) / 150 = 73.33.
        let snap = snapshot(
            vec![
                subject("one", "One", None),
                subject("two", "Two", Some(50.0)),
            ],
            vec![component("c1", "one", 10.0), component("c2", "two", 10.0)],
            vec![grade("s1", "c1", 80.0), grade("s1", "c2", 60.0)],
        );
        let r = student_overall(&snap, "7", "s1");
        assert_eq!(r.overall, 73.33);
        assert_eq!(r.subjects_count, 2);
    }

    #[test]
    fn all_zero_subject_weights_degrade_to_ungraded() {
        let snap = snapshot(
            vec![subject("one", "One", Some(0.0))],
            vec![component("c1", "one", 10.0)],
            vec![grade("s1", "c1", 80.0)],
        );
        let r = student_overall(&snap, "7", "s1");
        assert!(!r.has_grades);
        assert_eq!(r.overall, 0.0);
        assert_eq!(r.subjects_count, 1);
    }

    #[test]
    fn recomputation_is_idempotent() {
        let snap = snapshot(
            vec![subject("math", "Mathematics", Some(100.0))],
            vec![component("c1", "math", 40.0), component("c2", "math", 60.0)],
            vec![grade("s1", "c1", 90.0), grade("s1", "c2", 70.0)],
        );
        let first = student_overall(&snap, "7", "s1");
        for _ in 0..10 {
            assert_eq!(student_overall(&snap, "7", "s1"), first);
        }
    }

    #[test]
    fn duplicate_grade_rows_resolve_to_latest() {
        let snap = snapshot(
            vec![subject("math", "Mathematics", Some(100.0))],
            vec![component("c1", "math", 100.0)],
            vec![grade("s1", "c1", 55.0), grade("s1", "c1", 85.0)],
        );
        assert_eq!(student_overall(&snap, "7", "s1").overall, 85.0);
    }

    #[test]
    fn profile_average_is_unweighted_mean_of_visible_subjects() {
        // Weighted overall: (90*100 + 60*300) / 400 = 67.5.
        // Profile average: (90 + 60) / 2 = 75.
        let snap = snapshot(
            vec![
                subject("math", "Mathematics", Some(100.0)),
                subject("sci", "Science", Some(300.0)),
            ],
            vec![component("c1", "math", 50.0), component("c2", "sci", 50.0)],
            vec![grade("s1", "c1", 90.0), grade("s1", "c2", 60.0)],
        );
        let profile = student_profile(&snap, "7", "s1");
        assert_eq!(profile.profile_average, 75.0);
        assert_eq!(profile.weighted_overall.overall, 67.5);
        assert!(profile.has_grades);
        assert_eq!(profile.subjects.len(), 2);
    }

    #[test]
    fn profile_keeps_ungraded_subjects_visible_without_an_average() {
        let snap = snapshot(
            vec![
                subject("math", "Mathematics", Some(100.0)),
                subject("sci", "Science", Some(100.0)),
            ],
            vec![component("c1", "math", 50.0), component("c2", "sci", 50.0)],
            vec![grade("s1", "c1", 90.0)],
        );
        let profile = student_profile(&snap, "7", "s1");
        assert_eq!(profile.subjects.len(), 2);

        let sci = profile
            .subjects
            .iter()
            .find(|s| s.subject_name == "Science")
            .unwrap();
        assert!(sci.average.is_none());
        assert!(sci.letter_grade.is_none());
        assert_eq!(sci.graded_count, 0);
        assert_eq!(sci.components.len(), 1);
        assert!(sci.components[0].score.is_none());

        assert_eq!(profile.profile_average, 90.0);
    }
}
