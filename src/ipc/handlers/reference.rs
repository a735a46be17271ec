//! Catalog and roster loads. Both are plain upserts from a delimited file.

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_i64, get_required_str, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::roster;
use crate::standards;
use crate::tabular::Delimiter;
use serde_json::{json, Value};
use std::path::PathBuf;

fn parse_delimiter(params: &Value) -> Result<Option<Delimiter>, HandlerErr> {
    match get_optional_str(params, "delimiter") {
        None => Ok(None),
        Some(s) => Delimiter::parse_setting(&s).map_err(HandlerErr::bad_params),
    }
}

fn existing_file(params: &Value) -> Result<PathBuf, HandlerErr> {
    let in_path = PathBuf::from(get_required_str(params, "inPath")?);
    if !in_path.is_file() {
        return Err(HandlerErr {
            code: "io_failed",
            message: "input file not found".to_string(),
            details: Some(json!({ "path": in_path.to_string_lossy() })),
        });
    }
    Ok(in_path)
}

fn handle_catalog_import(state: &mut AppState, req: &Request) -> Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let in_path = match existing_file(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let delimiter = match parse_delimiter(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match standards::import_catalog_csv(conn, &in_path, delimiter) {
        Ok(out) => ok(&req.id, json!(out)),
        Err(e) => err(
            &req.id,
            "catalog_import_failed",
            format!("{e:#}"),
            Some(json!({ "path": in_path.to_string_lossy() })),
        ),
    }
}

fn handle_roster_import(state: &mut AppState, req: &Request) -> Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let district_id = match get_required_i64(&req.params, "districtId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let in_path = match existing_file(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let delimiter = match parse_delimiter(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match roster::import_roster_csv(conn, district_id, &in_path, delimiter) {
        Ok(out) => {
            let mut result = json!(out);
            result["districtId"] = json!(district_id);
            ok(&req.id, result)
        }
        Err(e) => err(
            &req.id,
            "roster_import_failed",
            format!("{e:#}"),
            Some(json!({ "path": in_path.to_string_lossy() })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "catalog.importCsv" => Some(handle_catalog_import(state, req)),
        "roster.importCsv" => Some(handle_roster_import(state, req)),
        _ => None,
    }
}
