use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{optional_str, require_db, require_f64, require_str};
use crate::ipc::types::{AppState, Request};
use crate::marks::{self, BulkInput, MarkEntry, MarkFilter, MarkKey, BULK_MAX_ENTRIES};
use serde_json::json;

fn enter(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let entry = MarkEntry {
        student_id: require_str(req, "studentId")?,
        course_id: require_str(req, "courseId")?,
        score: require_f64(req, "score")?,
    };
    let recorded_by = require_str(req, "recordedBy")?;

    match marks::enter_marks(conn, &state.grading, &entry, &recorded_by) {
        Ok(outcome) => Ok(json!(outcome)),
        Err(e) => {
            tracing::warn!(
                student_id = %entry.student_id,
                course_id = %entry.course_id,
                code = e.code(),
                "mark entry rejected: {}",
                e
            );
            Err(e.into())
        }
    }
}

fn parse_bulk_input(index: usize, raw: &serde_json::Value) -> BulkInput {
    let student_id = raw
        .get("studentId")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    if !raw.is_object() {
        return BulkInput::Malformed {
            student_id,
            reason: format!("entry at index {} must be an object", index),
        };
    }
    match serde_json::from_value::<MarkEntry>(raw.clone()) {
        Ok(entry) => BulkInput::Entry(entry),
        Err(e) => BulkInput::Malformed {
            student_id,
            reason: format!("entry at index {} is invalid: {}", index, e),
        },
    }
}

fn bulk_enter(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let recorded_by = require_str(req, "recordedBy")?;
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing entries[]"));
    };

    if entries.len() > BULK_MAX_ENTRIES {
        let rejected = entries.len();
        return Ok(json!({
            "success": false,
            "successCount": 0,
            "errorCount": rejected,
            "limitExceeded": true,
            "errors": [{
                "index": -1,
                "studentId": "",
                "code": "too_many_entries",
                "message": format!(
                    "bulk payload exceeds max entries: {} > {}",
                    rejected, BULK_MAX_ENTRIES
                )
            }],
            "message": "bulk payload too large; nothing was entered"
        }));
    }

    let inputs = entries
        .iter()
        .enumerate()
        .map(|(i, raw)| parse_bulk_input(i, raw));
    let outcome = marks::bulk_enter_marks(conn, &state.grading, inputs, &recorded_by);
    tracing::info!(
        success = outcome.success,
        success_count = outcome.success_count,
        error_count = outcome.error_count,
        "bulk mark entry finished"
    );
    Ok(json!(outcome))
}

fn get(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let key = MarkKey {
        student_id: require_str(req, "studentId")?,
        course_id: require_str(req, "courseId")?,
    };
    let mark = marks::get_mark(conn, &key)?;
    Ok(json!({ "mark": mark }))
}

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let filter = MarkFilter {
        course_id: optional_str(req, "courseId"),
        student_id: optional_str(req, "studentId"),
    };
    let rows = marks::list_marks(conn, &filter)?;
    Ok(json!({ "marks": rows }))
}

fn delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let mark_id = require_str(req, "markId")?;
    marks::delete_mark(conn, &mark_id)?;
    Ok(json!({ "deleted": true }))
}

fn respond(
    req: &Request,
    result: Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "marks.enter" => enter(state, req),
        "marks.bulkEnter" => bulk_enter(state, req),
        "marks.get" => get(state, req),
        "marks.list" => list(state, req),
        "marks.delete" => delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
