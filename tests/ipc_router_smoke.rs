mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};

use test_support::{request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn every_method_is_routed() {
    let workspace = temp_dir("assessmentd-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let methods = [
        ("health", json!({})),
        ("settings.get", json!({ "key": "setup.imports" })),
        ("settings.set", json!({ "key": "setup.imports", "value": {} })),
        ("catalog.importCsv", json!({})),
        ("roster.importCsv", json!({})),
        ("imports.upload", json!({})),
        ("imports.preview", json!({})),
        ("imports.apply", json!({})),
        ("imports.discard", json!({})),
        ("imports.list", json!({})),
        ("batches.list", json!({})),
        ("batches.get", json!({})),
    ];
    for (i, (method, params)) in methods.iter().enumerate() {
        let id = format!("m{}", i);
        let value = request(&mut stdin, &mut reader, &id, method, params.clone());
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|c| c.as_str());
        assert_ne!(code, Some("not_implemented"), "{} is not routed", method);
    }

    let unknown = request(&mut stdin, &mut reader, "u", "imports.frobnicate", json!({}));
    assert_eq!(unknown["ok"].as_bool(), Some(false));
    assert_eq!(unknown["error"]["code"].as_str(), Some("not_implemented"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn methods_needing_a_workspace_say_so() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "h", "health", json!({}));
    assert!(health["workspacePath"].is_null());
    assert_eq!(health["openAttempts"].as_u64(), Some(0));

    for (i, method) in ["settings.get", "imports.upload", "imports.preview", "batches.list"]
        .iter()
        .enumerate()
    {
        let value = request(&mut stdin, &mut reader, &format!("w{}", i), method, json!({}));
        assert_eq!(value["ok"].as_bool(), Some(false));
        assert_eq!(
            value["error"]["code"].as_str(),
            Some("no_workspace"),
            "{} answered {}",
            method,
            value
        );
    }

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn malformed_lines_get_an_error_and_the_loop_continues() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read error line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("json error response");
    assert_eq!(value["ok"].as_bool(), Some(false));
    assert_eq!(value["error"]["code"].as_str(), Some("bad_json"));

    let health = request_ok(&mut stdin, &mut reader, "after", "health", json!({}));
    assert!(health["version"].as_str().is_some());

    drop(stdin);
    let _ = child.wait();
}
