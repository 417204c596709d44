use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_scorebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn scorebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

#[test]
fn profile_shows_unweighted_mean_beside_the_weighted_overall() {
    let workspace = temp_dir("scorebook-profile");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let term_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "terms.create",
            json!({ "name": "Term 1", "isActive": true }),
        ),
        "termId",
    );

    // Mathematics weight 100, Science weight 300; one component each.
    let math = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "subjects.create",
            json!({ "name": "Mathematics" }),
        ),
        "subjectId",
    );
    let science = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "4",
            "subjects.create",
            json!({ "name": "Science" }),
        ),
        "subjectId",
    );
    let cs_math = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "5",
            "classSubjects.create",
            json!({ "subjectId": math, "classLevel": "7", "termId": term_id, "weight": 100.0 }),
        ),
        "classSubjectId",
    );
    let cs_science = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "6",
            "classSubjects.create",
            json!({ "subjectId": science, "classLevel": "7", "termId": term_id, "weight": 300.0 }),
        ),
        "classSubjectId",
    );
    let math_exam = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "7",
            "components.create",
            json!({ "classSubjectId": cs_math, "name": "Exam", "weight": 50.0 }),
        ),
        "componentId",
    );
    let science_exam = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "8",
            "components.create",
            json!({ "classSubjectId": cs_science, "name": "Exam", "weight": 50.0 }),
        ),
        "componentId",
    );

    let student = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "9",
            "students.create",
            json!({ "fullName": "Avery Stone", "classLevel": "7" }),
        ),
        "studentId",
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "grades.record",
        json!({ "studentId": student, "componentId": math_exam, "termId": term_id, "score": 90.0 }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "grades.record",
        json!({ "studentId": student, "componentId": science_exam, "termId": term_id, "score": 60.0 }),
    );

    // Term omitted on purpose: the active term resolves.
    let profile = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "perf.studentProfile",
        json!({ "studentId": student }),
    );
    assert_eq!(
        str_field(profile.get("term").expect("term"), "termId"),
        term_id
    );

    // The two overall metrics differ and are both present under their own
    // names: (90 + 60) / 2 = 75 vs (90*100 + 60*300) / 400 = 67.5.
    assert_eq!(
        profile.get("profileAverage").and_then(|v| v.as_f64()),
        Some(75.0)
    );
    let weighted = profile.get("weightedOverall").expect("weightedOverall");
    assert_eq!(weighted.get("overall").and_then(|v| v.as_f64()), Some(67.5));
    assert_eq!(weighted.get("hasGrades").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(weighted.get("subjectsCount").and_then(|v| v.as_i64()), Some(2));

    let subjects = profile.get("subjects").and_then(|v| v.as_array()).unwrap();
    assert_eq!(subjects.len(), 2);
    let math_row = subjects
        .iter()
        .find(|s| str_field(s, "subjectName") == "Mathematics")
        .expect("math breakdown");
    assert_eq!(math_row.get("average").and_then(|v| v.as_f64()), Some(90.0));
    assert_eq!(
        math_row.get("letterGrade").and_then(|v| v.as_str()),
        Some("A-")
    );
    assert_eq!(math_row.get("band").and_then(|v| v.as_str()), Some("excellent"));
    let science_row = subjects
        .iter()
        .find(|s| str_field(s, "subjectName") == "Science")
        .expect("science breakdown");
    assert_eq!(
        science_row.get("letterGrade").and_then(|v| v.as_str()),
        Some("D-")
    );
    assert_eq!(
        science_row.get("band").and_then(|v| v.as_str()),
        Some("satisfactory")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn ungraded_subject_stays_visible_in_the_breakdown() {
    let workspace = temp_dir("scorebook-profile-ungraded");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let term_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "terms.create",
            json!({ "name": "Term 1" }),
        ),
        "termId",
    );
    let math = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "subjects.create",
            json!({ "name": "Mathematics" }),
        ),
        "subjectId",
    );
    let history = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "4",
            "subjects.create",
            json!({ "name": "History" }),
        ),
        "subjectId",
    );
    let cs_math = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "5",
            "classSubjects.create",
            json!({ "subjectId": math, "classLevel": "7", "termId": term_id }),
        ),
        "classSubjectId",
    );
    let cs_history = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "6",
            "classSubjects.create",
            json!({ "subjectId": history, "classLevel": "7", "termId": term_id }),
        ),
        "classSubjectId",
    );
    let math_quiz = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "7",
            "components.create",
            json!({ "classSubjectId": cs_math, "name": "Quiz", "weight": 100.0 }),
        ),
        "componentId",
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "components.create",
        json!({ "classSubjectId": cs_history, "name": "Essay", "weight": 100.0 }),
    );
    let student = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "9",
            "students.create",
            json!({ "fullName": "Jordan Vale", "classLevel": "7" }),
        ),
        "studentId",
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "grades.record",
        json!({ "studentId": student, "componentId": math_quiz, "termId": term_id, "score": 82.0 }),
    );

    let profile = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "perf.studentProfile",
        json!({ "studentId": student, "termId": term_id }),
    );

    // History is shown with its component line but carries no average, and
    // the profile mean covers Mathematics alone.
    let subjects = profile.get("subjects").and_then(|v| v.as_array()).unwrap();
    assert_eq!(subjects.len(), 2);
    let history_row = subjects
        .iter()
        .find(|s| str_field(s, "subjectName") == "History")
        .expect("history breakdown");
    assert!(history_row.get("average").map(|v| v.is_null()).unwrap_or(false));
    assert!(history_row
        .get("letterGrade")
        .map(|v| v.is_null())
        .unwrap_or(false));
    let essay = history_row
        .get("components")
        .and_then(|v| v.as_array())
        .unwrap();
    assert_eq!(essay.len(), 1);
    assert!(essay[0].get("score").map(|v| v.is_null()).unwrap_or(false));

    assert_eq!(
        profile.get("profileAverage").and_then(|v| v.as_f64()),
        Some(82.0)
    );
    assert_eq!(profile.get("hasGrades").and_then(|v| v.as_bool()), Some(true));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
