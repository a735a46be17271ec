use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, require_db};
use crate::ipc::types::{AppState, Request};
use crate::tabular::Delimiter;
use serde_json::{json, Map, Value};

const IMPORTS_KEY: &str = "setup.imports";

fn default_imports() -> Value {
    let d = db::ImportSettings::default();
    json!({
        "importSource": d.import_source,
        "missingSampleSize": d.missing_sample_size,
        "bulkTimeoutMs": d.bulk_timeout_ms,
        "defaultDelimiter": d.default_delimiter
    })
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() || s.len() > max_len {
        return Err(format!("{} length must be 1..={}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_imports_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal settings object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match k.as_str() {
            "importSource" => {
                obj.insert(k.clone(), Value::String(parse_string_max(v, k, 64)?));
            }
            "missingSampleSize" => {
                obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 500)?));
            }
            "bulkTimeoutMs" => {
                obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1_000, 3_600_000)?));
            }
            "defaultDelimiter" => {
                let s = parse_string_max(v, k, 8)?.to_ascii_lowercase();
                let canonical = match Delimiter::parse_setting(&s)? {
                    Some(d) => d.as_str(),
                    None => "auto",
                };
                obj.insert(k.clone(), Value::String(canonical.to_string()));
            }
            _ => return Err(format!("unknown {} field: {}", IMPORTS_KEY, k)),
        }
    }
    Ok(())
}

fn load_value(conn: &rusqlite::Connection, key: &str) -> anyhow::Result<Value> {
    let saved = db::settings_get_json(conn, key)?;
    if key != IMPORTS_KEY {
        return Ok(saved.unwrap_or(Value::Null));
    }
    let mut current = default_imports();
    if let Some(saved_obj) = saved.as_ref().and_then(|v| v.as_object()) {
        // Malformed historical values fall back to defaults.
        let _ = merge_imports_patch(&mut current, saved_obj);
    }
    Ok(current)
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let key = match get_required_str(&req.params, "key") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match load_value(conn, &key) {
        Ok(value) => ok(&req.id, json!({ "key": key, "value": value })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_settings_set(state: &mut AppState, req: &Request) -> Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let key = match get_required_str(&req.params, "key") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(value) = req.params.get("value") else {
        return err(&req.id, "bad_params", "missing value", None);
    };

    let to_store = if key == IMPORTS_KEY {
        let Some(patch) = value.as_object() else {
            return err(&req.id, "bad_params", "value must be an object", None);
        };
        let mut current = match load_value(conn, &key) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if let Err(msg) = merge_imports_patch(&mut current, patch) {
            return err(&req.id, "bad_params", msg, None);
        }
        current
    } else {
        value.clone()
    };

    if let Err(e) = db::settings_set_json(conn, &key, &to_store) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "key": key, "value": to_store }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.set" => Some(handle_settings_set(state, req)),
        _ => None,
    }
}
