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
    let exe = env!("CARGO_BIN_EXE_examd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn examd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
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
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn course_thresholds_are_validated_and_codes_unique() {
    let workspace = temp_dir("examd-courses");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "code": "MTH201", "name": "Linear Algebra", "maxMarks": 100, "passMarks": 50 }),
    );
    assert!(created["courseId"].as_str().is_some());

    let dup = request(
        &mut stdin,
        &mut reader,
        "3",
        "courses.create",
        json!({ "code": "MTH201", "name": "Again", "maxMarks": 100, "passMarks": 50 }),
    );
    assert_eq!(error_code(&dup), Some("conflict"));

    for (i, (max, pass)) in [(0, 1), (100, 0), (100, 101)].iter().enumerate() {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("bad{}", i),
            "courses.create",
            json!({ "code": format!("X{}", i), "name": "X", "maxMarks": max, "passMarks": pass }),
        );
        assert_eq!(error_code(&resp), Some("bad_params"), "max {} pass {}", max, pass);
    }

    let listed = request_ok(&mut stdin, &mut reader, "4", "courses.list", json!({}));
    let courses = listed["courses"].as_array().cloned().unwrap_or_default();
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0]["maxMarks"].as_i64(), Some(100));
    assert_eq!(courses[0]["passMarks"].as_i64(), Some(50));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn course_max_cannot_drop_below_existing_score() {
    let workspace = temp_dir("examd-courses-update");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "code": "ART101", "name": "Art", "maxMarks": 100, "passMarks": 40 }),
    )["courseId"]
        .as_str()
        .expect("courseId")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "rollNo": "R100", "name": "Dana" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "marks.enter",
        json!({ "studentId": student, "courseId": course, "score": 80, "recordedBy": "r" }),
    );

    let shrink = request(
        &mut stdin,
        &mut reader,
        "5",
        "courses.update",
        json!({ "courseId": course, "patch": { "maxMarks": 75, "passMarks": 30 } }),
    );
    assert_eq!(error_code(&shrink), Some("conflict"));

    let ok_update = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "courses.update",
        json!({ "courseId": course, "patch": { "maxMarks": 80, "name": "Fine Art" } }),
    );
    assert_eq!(ok_update["maxMarks"].as_i64(), Some(80));
    assert_eq!(ok_update["name"].as_str(), Some("Fine Art"));

    let unknown = request(
        &mut stdin,
        &mut reader,
        "7",
        "courses.update",
        json!({ "courseId": "nope", "patch": { "name": "X" } }),
    );
    assert_eq!(error_code(&unknown), Some("not_found"));

    let bad_field = request(
        &mut stdin,
        &mut reader,
        "8",
        "courses.update",
        json!({ "courseId": course, "patch": { "credits": 3 } }),
    );
    assert_eq!(error_code(&bad_field), Some("bad_params"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deleting_a_student_removes_their_marks() {
    let workspace = temp_dir("examd-students-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let mut courses = Vec::new();
    for i in 0..2 {
        let c = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "courses.create",
            json!({ "code": format!("GEO{}", i), "name": "Geo", "maxMarks": 100, "passMarks": 40 }),
        );
        courses.push(c["courseId"].as_str().expect("courseId").to_string());
    }
    let leaving = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({ "rollNo": "R200", "name": "Leaving" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let staying = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "students.create",
        json!({ "rollNo": "R201", "name": "Staying" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();

    let dup = request(
        &mut stdin,
        &mut reader,
        "s3",
        "students.create",
        json!({ "rollNo": "R201", "name": "Twin" }),
    );
    assert_eq!(error_code(&dup), Some("conflict"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "b",
        "marks.bulkEnter",
        json!({
            "recordedBy": "r",
            "entries": [
                { "studentId": leaving, "courseId": courses[0], "score": 50 },
                { "studentId": leaving, "courseId": courses[1], "score": 60 },
                { "studentId": staying, "courseId": courses[0], "score": 70 }
            ]
        }),
    );

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "d",
        "students.delete",
        json!({ "studentId": leaving }),
    );
    assert_eq!(deleted["marksRemoved"].as_i64(), Some(2));

    let listed = request_ok(&mut stdin, &mut reader, "l", "marks.list", json!({}));
    let marks = listed["marks"].as_array().cloned().unwrap_or_default();
    assert_eq!(marks.len(), 1);
    assert_eq!(marks[0]["rollNo"].as_str(), Some("R201"));
    assert_eq!(marks[0]["studentName"].as_str(), Some("Staying"));

    let again = request(
        &mut stdin,
        &mut reader,
        "d2",
        "students.delete",
        json!({ "studentId": leaving }),
    );
    assert_eq!(error_code(&again), Some("not_found"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn marks_can_be_deleted_by_id() {
    let workspace = temp_dir("examd-marks-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "code": "ECO101", "name": "Economics", "maxMarks": 100, "passMarks": 40 }),
    )["courseId"]
        .as_str()
        .expect("courseId")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "rollNo": "R300", "name": "Kim" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let entered = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "marks.enter",
        json!({ "studentId": student, "courseId": course, "score": 45, "recordedBy": "r" }),
    );
    let mark_id = entered["markId"].as_str().expect("markId").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "marks.delete",
        json!({ "markId": mark_id }),
    );
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "marks.get",
        json!({ "studentId": student, "courseId": course }),
    );
    assert!(got["mark"].is_null());

    let again = request(
        &mut stdin,
        &mut reader,
        "7",
        "marks.delete",
        json!({ "markId": mark_id }),
    );
    assert_eq!(error_code(&again), Some("not_found"));

    let _ = std::fs::remove_dir_all(workspace);
}
