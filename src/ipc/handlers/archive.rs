use crate::archive::{self, ArchiveError};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::handlers::core::open_workspace;
use crate::ipc::helpers::{require_db, require_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn archive_err(e: anyhow::Error, path: &str) -> HandlerErr {
    let code = if e.downcast_ref::<ArchiveError>().is_some() {
        "invalid_archive"
    } else {
        "io_failed"
    };
    HandlerErr::new(code, format!("{e:#}")).with_details(json!({ "path": path }))
}

fn export(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let out_path = require_str(req, "outPath")?;
    let Some(workspace) = state.workspace.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };

    let manifest = archive::export_archive(conn, workspace, &PathBuf::from(&out_path))
        .map_err(|e| archive_err(e, &out_path))?;
    tracing::info!(
        path = %out_path,
        marks = manifest.counts.marks,
        sha256 = %manifest.db_sha256,
        "archive exported"
    );
    Ok(json!({
        "path": out_path,
        "format": manifest.format,
        "counts": manifest.counts,
        "dbSha256": manifest.db_sha256
    }))
}

/// Replaces the open workspace's records with an archive. Nothing on disk
/// changes unless the archive passes every check.
fn import(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let in_path = require_str(req, "inPath")?;
    let Some(workspace) = state.workspace.clone() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::new("not_found", "archive file not found")
            .with_details(json!({ "path": in_path })));
    }

    let staged = archive::stage_import(&src, &workspace).map_err(|e| {
        tracing::warn!(path = %in_path, "archive rejected: {:#}", e);
        archive_err(e, &in_path)
    })?;
    let format = staged.format;
    let counts = staged.counts;

    state.db = None;
    if let Err(e) = staged.commit() {
        if let Err(reopen) = open_workspace(state, &workspace) {
            tracing::warn!("failed to reopen workspace after import error: {:#}", reopen);
        }
        return Err(archive_err(e, &in_path));
    }

    open_workspace(state, &workspace)
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;
    tracing::info!(format, marks = counts.marks, "archive imported");
    Ok(json!({
        "format": format,
        "counts": counts,
        "scale": state.grading
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "archive.export" => export(state, req),
        "archive.import" => import(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
