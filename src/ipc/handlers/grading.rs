use crate::db;
use crate::grading::{self, CourseThresholds, GradingScale, GradingScaleConfig};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{require_db, require_f64, require_i64};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn scale_json(scale: &GradingScale) -> serde_json::Value {
    json!({ "scale": scale })
}

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, scale_json(&state.grading))
}

fn handle_config_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    let cfg: GradingScaleConfig = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("invalid grading scale: {}", e),
                None,
            )
        }
    };
    let scale = match GradingScale::from_config(cfg) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };

    if let Err(e) = db::store_grading_scale(conn, &scale) {
        return err(
            &req.id,
            "db_write_failed",
            format!("{e:#}"),
            Some(json!({ "table": "settings" })),
        );
    }
    tracing::info!(
        bands = scale.bands().len(),
        fallback = scale.fallback_symbol(),
        "grading scale updated"
    );
    state.grading = scale;
    ok(&req.id, scale_json(&state.grading))
}

fn handle_config_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = db::settings_delete(conn, db::GRADING_SCALE_KEY) {
        return err(&req.id, "db_write_failed", format!("{e:#}"), None);
    }
    tracing::info!("grading scale reset to default");
    state.grading = GradingScale::default();
    ok(&req.id, scale_json(&state.grading))
}

fn parse_preview(req: &Request) -> Result<(f64, CourseThresholds), HandlerErr> {
    let score = require_f64(req, "score")?;
    let max_marks = require_i64(req, "maxMarks")?;
    let pass_marks = require_i64(req, "passMarks")?;
    if max_marks <= 0 {
        return Err(HandlerErr::new("bad_params", "maxMarks must be > 0"));
    }
    if pass_marks < 1 || pass_marks > max_marks {
        return Err(HandlerErr::new(
            "bad_params",
            format!("passMarks must be in 1..={}", max_marks),
        ));
    }
    if score < 0.0 {
        return Err(HandlerErr::new("bad_params", "score must be >= 0"));
    }
    Ok((
        score,
        CourseThresholds {
            max_marks,
            pass_marks,
        },
    ))
}

fn handle_evaluate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (score, thresholds) = match parse_preview(req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let eval = grading::evaluate(&state.grading, score, thresholds);
    ok(&req.id, json!(eval))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.config.get" => Some(handle_config_get(state, req)),
        "grading.config.update" => Some(handle_config_update(state, req)),
        "grading.config.reset" => Some(handle_config_reset(state, req)),
        "grading.evaluate" => Some(handle_evaluate(state, req)),
        _ => None,
    }
}
