use crate::db;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{require_db, require_i64, require_str, write_err};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn check_thresholds(max_marks: i64, pass_marks: i64) -> Result<(), HandlerErr> {
    if max_marks <= 0 {
        return Err(HandlerErr::new("bad_params", "maxMarks must be > 0")
            .with_details(json!({ "maxMarks": max_marks })));
    }
    if pass_marks < 1 || pass_marks > max_marks {
        return Err(HandlerErr::new(
            "bad_params",
            format!("passMarks must be in 1..={}", max_marks),
        )
        .with_details(json!({ "maxMarks": max_marks, "passMarks": pass_marks })));
    }
    Ok(())
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.code,
           c.name,
           c.max_marks,
           c.pass_marks,
           (SELECT COUNT(*) FROM marks m WHERE m.course_id = c.id) AS mark_count
         FROM courses c
         ORDER BY c.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let code: String = row.get(1)?;
            let name: String = row.get(2)?;
            let max_marks: i64 = row.get(3)?;
            let pass_marks: i64 = row.get(4)?;
            let mark_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "code": code,
                "name": name,
                "maxMarks": max_marks,
                "passMarks": pass_marks,
                "markCount": mark_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn create_course(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let code = require_str(req, "code")?;
    let name = require_str(req, "name")?;
    let max_marks = require_i64(req, "maxMarks")?;
    let pass_marks = require_i64(req, "passMarks")?;
    check_thresholds(max_marks, pass_marks)?;

    let course_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, code, name, max_marks, pass_marks, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &course_id,
            &code,
            &name,
            max_marks,
            pass_marks,
            db::now_timestamp(),
        ),
    )
    .map_err(|e| write_err(e, "courses"))?;

    tracing::info!(course_id = %course_id, code = %code, max_marks, pass_marks, "course created");
    Ok(json!({
        "courseId": course_id,
        "code": code,
        "name": name,
        "maxMarks": max_marks,
        "passMarks": pass_marks
    }))
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    match create_course(conn, req) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn update_course(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let course_id = require_str(req, "courseId")?;
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new("bad_params", "missing patch"));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let current: Option<(String, i64, i64)> = tx
        .query_row(
            "SELECT name, max_marks, pass_marks FROM courses WHERE id = ?",
            [&course_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let Some((mut name, mut max_marks, mut pass_marks)) = current else {
        return Err(HandlerErr::new("not_found", "course not found")
            .with_details(json!({ "courseId": course_id })));
    };

    for (k, v) in patch {
        match k.as_str() {
            "name" => match v.as_str().map(str::trim) {
                Some(s) if !s.is_empty() => name = s.to_string(),
                _ => return Err(HandlerErr::new("bad_params", "name must be a non-empty string")),
            },
            "maxMarks" => {
                max_marks = v
                    .as_i64()
                    .ok_or_else(|| HandlerErr::new("bad_params", "maxMarks must be an integer"))?;
            }
            "passMarks" => {
                pass_marks = v
                    .as_i64()
                    .ok_or_else(|| HandlerErr::new("bad_params", "passMarks must be an integer"))?;
            }
            other => {
                return Err(HandlerErr::new(
                    "bad_params",
                    format!("unknown course field: {}", other),
                ))
            }
        }
    }
    check_thresholds(max_marks, pass_marks)?;

    // Stored marks must stay within the course maximum.
    let highest: Option<f64> = tx
        .query_row(
            "SELECT MAX(score_obtained) FROM marks WHERE course_id = ?",
            [&course_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if let Some(h) = highest {
        if h > max_marks as f64 {
            return Err(HandlerErr::new(
                "conflict",
                format!(
                    "maxMarks {} is below an existing score of {}",
                    max_marks, h
                ),
            )
            .with_details(json!({ "maxMarks": max_marks, "highestScore": h })));
        }
    }

    tx.execute(
        "UPDATE courses SET name = ?, max_marks = ?, pass_marks = ? WHERE id = ?",
        (&name, max_marks, pass_marks, &course_id),
    )
    .map_err(|e| write_err(e, "courses"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    tracing::info!(course_id = %course_id, max_marks, pass_marks, "course updated");
    Ok(json!({
        "courseId": course_id,
        "name": name,
        "maxMarks": max_marks,
        "passMarks": pass_marks
    }))
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    match update_course(conn, req) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.update" => Some(handle_courses_update(state, req)),
        _ => None,
    }
}
