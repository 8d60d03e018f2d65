use crate::db;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{require_db, require_str, write_err};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           s.id,
           s.roll_no,
           s.name,
           (SELECT COUNT(*) FROM marks m WHERE m.student_id = s.id) AS mark_count
         FROM students s
         ORDER BY s.roll_no",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let roll_no: String = row.get(1)?;
            let name: String = row.get(2)?;
            let mark_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "rollNo": roll_no,
                "name": name,
                "markCount": mark_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn create_student(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let roll_no = require_str(req, "rollNo")?;
    let name = require_str(req, "name")?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, roll_no, name, created_at) VALUES(?, ?, ?, ?)",
        (&student_id, &roll_no, &name, db::now_timestamp()),
    )
    .map_err(|e| write_err(e, "students"))?;

    tracing::info!(student_id = %student_id, roll_no = %roll_no, "student created");
    Ok(json!({ "studentId": student_id, "rollNo": roll_no, "name": name }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    match create_student(conn, req) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

/// Removes the student; their marks go with them through the cascade.
fn delete_student(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = require_str(req, "studentId")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let marks_removed: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM marks WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let n = tx
        .execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| write_err(e, "students"))?;
    if n == 0 {
        return Err(HandlerErr::new("not_found", "student not found")
            .with_details(json!({ "studentId": student_id })));
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    tracing::info!(student_id = %student_id, marks_removed, "student deleted");
    Ok(json!({ "deleted": true, "marksRemoved": marks_removed }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    match delete_student(conn, req) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
