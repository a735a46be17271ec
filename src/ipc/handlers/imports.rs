use crate::attempts::{AttemptState, ImportAttempt};
use crate::db;
use crate::detect::classify_test_name;
use crate::formats::merge::merge_files;
use crate::formats::FormatKind;
use crate::ipc::error::{err, import_err, ok};
use crate::ipc::helpers::{
    get_optional_i64, get_optional_str, get_required_i64, get_required_str, get_str_list, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::pipeline::{self, ApplyRequest, BatchOverrides};
use crate::tabular::{Delimiter, TabularFile};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::info;

fn bad_state(id: &str, attempt: &ImportAttempt, message: impl Into<String>) -> Value {
    err(
        id,
        "bad_state",
        message,
        Some(json!({ "attemptId": attempt.id, "state": attempt.state.as_str() })),
    )
}

fn attempt_not_found(id: &str, attempt_id: &str) -> Value {
    err(
        id,
        "not_found",
        "import attempt not found",
        Some(json!({ "attemptId": attempt_id })),
    )
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn resolve_delimiter(
    requested: Option<String>,
    configured: &str,
    path: &Path,
) -> Result<Delimiter, HandlerErr> {
    let setting = requested.unwrap_or_else(|| configured.to_string());
    match Delimiter::parse_setting(&setting).map_err(HandlerErr::bad_params)? {
        Some(d) => Ok(d),
        None => Delimiter::sniff(path).map_err(|e| HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details: Some(json!({ "path": path.to_string_lossy() })),
        }),
    }
}

fn handle_upload(state: &mut AppState, req: &Request) -> Value {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_ref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let format_raw = match get_required_str(&req.params, "format") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(kind) = FormatKind::parse(&format_raw) else {
        let allowed: Vec<&str> = FormatKind::ALL.iter().map(|k| k.as_str()).collect();
        return err(
            &req.id,
            "bad_params",
            format!("format must be one of: {}", allowed.join(", ")),
            None,
        );
    };
    let in_paths = match get_str_list(&req.params, "inPaths") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let settings = db::import_settings(conn);
    let requested_delimiter = get_optional_str(&req.params, "delimiter");

    let mut files = Vec::with_capacity(in_paths.len());
    let mut source_files = Vec::with_capacity(in_paths.len());
    for p in &in_paths {
        let path = PathBuf::from(p);
        if !path.is_file() {
            return err(
                &req.id,
                "io_failed",
                "input file not found",
                Some(json!({ "path": p })),
            );
        }
        let delimiter =
            match resolve_delimiter(requested_delimiter.clone(), &settings.default_delimiter, &path) {
                Ok(d) => d,
                Err(e) => return e.response(&req.id),
            };
        source_files.push(
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.clone()),
        );
        files.push(TabularFile::new(path, delimiter));
    }

    let label = get_optional_str(&req.params, "label")
        .unwrap_or_else(|| file_stem(files[0].path()));

    let uploads = workspace.join(db::UPLOADS_DIR);
    if let Err(e) = std::fs::create_dir_all(&uploads) {
        return err(&req.id, "io_failed", e.to_string(), None);
    }
    let merged = match merge_files(kind, &files, &uploads) {
        Ok(m) => m,
        Err(e) => return import_err(&req.id, &e),
    };

    let hints = classify_test_name(merged.title.as_deref().unwrap_or(&label));
    let mut attempt = ImportAttempt::new(kind, label, source_files, merged);
    if let Err(e) = attempt.advance(AttemptState::Validated) {
        attempt.remove_upload();
        return bad_state(&req.id, &attempt, e.to_string());
    }
    info!(
        attempt = %attempt.id,
        format = kind.as_str(),
        files = attempt.upload.files,
        data_rows = attempt.upload.data_rows,
        "upload validated"
    );

    let mut result = attempt.to_json();
    result["subject"] = json!(hints.subject);
    result["unitCycle"] = json!(hints.unit_cycle);
    state.attempts.insert(attempt);
    ok(&req.id, result)
}

fn handle_preview(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let attempt_id = match get_required_str(&req.params, "attemptId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let district_id = match get_required_i64(&req.params, "districtId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(attempt) = state.attempts.get_mut(&attempt_id) else {
        return attempt_not_found(&req.id, &attempt_id);
    };
    if !matches!(attempt.state, AttemptState::Validated | AttemptState::Previewed) {
        return bad_state(
            &req.id,
            attempt,
            format!("cannot preview an attempt that is {}", attempt.state),
        );
    }

    let settings = db::import_settings(conn);
    let preview = match pipeline::preview(
        conn,
        attempt.format,
        &attempt.upload.tabular(),
        &attempt.label,
        district_id,
        &settings,
    ) {
        Ok(p) => p,
        Err(e) => return import_err(&req.id, &e),
    };
    if let Err(e) = attempt.advance(AttemptState::Previewed) {
        return bad_state(&req.id, attempt, e.to_string());
    }
    attempt.previewed_district = Some(district_id);

    let mut result = json!(preview);
    result["attemptId"] = json!(attempt.id);
    result["state"] = json!(attempt.state.as_str());
    result["districtId"] = json!(district_id);
    ok(&req.id, result)
}

fn handle_apply(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let attempt_id = match get_required_str(&req.params, "attemptId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let district_id = match get_required_i64(&req.params, "districtId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let unit_cycle = match get_optional_i64(&req.params, "unitCycle") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let overrides = BatchOverrides {
        test_id: get_optional_str(&req.params, "testId"),
        subject: get_optional_str(&req.params, "subject"),
        unit_cycle,
    };
    let Some(attempt) = state.attempts.get_mut(&attempt_id) else {
        return attempt_not_found(&req.id, &attempt_id);
    };
    if attempt.state != AttemptState::Previewed {
        return bad_state(
            &req.id,
            attempt,
            format!("preview the attempt before applying it (currently {})", attempt.state),
        );
    }
    if attempt.previewed_district != Some(district_id) {
        return bad_state(
            &req.id,
            attempt,
            "attempt was previewed for a different district; preview it again",
        );
    }

    let settings = db::import_settings(conn);
    let file = attempt.upload.tabular();
    let (analysis, aggregation) =
        match pipeline::build_rows(conn, attempt.format, &file, &attempt.label) {
            Ok(v) => v,
            Err(e) => return import_err(&req.id, &e),
        };
    if let Err(e) = attempt.advance(AttemptState::Aggregated) {
        return bad_state(&req.id, attempt, e.to_string());
    }
    if let Err(e) = attempt.advance(AttemptState::Loading) {
        return bad_state(&req.id, attempt, e.to_string());
    }

    let source_label = attempt.source_label();
    let apply_req = ApplyRequest {
        label: &attempt.label,
        source_file: &source_label,
        source_sha256: Some(&attempt.upload.sha256),
        district_id,
        overrides,
        school_year: db::school_year_for(chrono::Local::now().date_naive()),
    };
    let outcome = pipeline::aggregate_and_load(
        conn,
        &apply_req,
        &aggregation,
        &analysis.parsed.records,
        &settings,
    );
    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            let resp = import_err(&req.id, &e);
            if let Err(t) = attempt.roll_back(e.to_string()) {
                return bad_state(&req.id, attempt, t.to_string());
            }
            return resp;
        }
    };
    if let Err(e) = attempt.advance(AttemptState::Committed) {
        return bad_state(&req.id, attempt, e.to_string());
    }
    let sha256 = attempt.upload.sha256.clone();

    if let Some(done) = state.attempts.remove(&attempt_id) {
        done.remove_upload();
    }

    let mut result = json!(outcome);
    result["attemptId"] = json!(attempt_id);
    result["state"] = json!(AttemptState::Committed.as_str());
    result["districtId"] = json!(district_id);
    result["sha256"] = json!(sha256);
    ok(&req.id, result)
}

fn handle_discard(state: &mut AppState, req: &Request) -> Value {
    let attempt_id = match get_required_str(&req.params, "attemptId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(attempt) = state.attempts.remove(&attempt_id) else {
        return attempt_not_found(&req.id, &attempt_id);
    };
    attempt.remove_upload();
    info!(attempt = %attempt.id, "attempt discarded");
    ok(&req.id, json!({ "ok": true, "attemptId": attempt.id }))
}

fn handle_list(state: &mut AppState, req: &Request) -> Value {
    let attempts: Vec<Value> = state.attempts.list().iter().map(|a| a.to_json()).collect();
    ok(&req.id, json!({ "attempts": attempts }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "imports.upload" => Some(handle_upload(state, req)),
        "imports.preview" => Some(handle_preview(state, req)),
        "imports.apply" => Some(handle_apply(state, req)),
        "imports.discard" => Some(handle_discard(state, req)),
        "imports.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
