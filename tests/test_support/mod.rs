#![allow(dead_code)]

use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const RI_ID: &str = "11111111-1111-4111-8111-111111111111";
pub const RL_ID: &str = "22222222-2222-4222-8222-222222222222";
pub const APR_ID: &str = "33333333-3333-4333-8333-333333333333";
pub const SL2_ID: &str = "44444444-4444-4444-8444-444444444444";
pub const SL3_ID: &str = "55555555-5555-4555-8555-555555555555";

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_assessmentd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn assessmentd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
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

pub fn request_ok(
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

/// Returns the `error` object after checking the call failed.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().unwrap_or_else(|| json!({}))
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let p = dir.join(name);
    std::fs::write(&p, contents).expect("write fixture");
    p
}

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join("assessments.sqlite3")
}

pub fn open_db(workspace: &Path) -> Connection {
    Connection::open(db_path(workspace)).expect("open workspace db")
}

pub fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |r| r.get(0)).expect("count query")
}

pub fn uploads_in(workspace: &Path) -> usize {
    std::fs::read_dir(workspace.join("uploads"))
        .map(|d| d.count())
        .unwrap_or(0)
}

/// Selects `workspace`, loads a small catalog and a roster for district 7.
pub fn seed_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &Path,
) {
    let _ = request_ok(
        stdin,
        reader,
        "seed-1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let catalog = write_file(
        workspace,
        "catalog.csv",
        &format!(
            "id,human_coding_scheme\n{RI_ID},RI.9-10.3\n{RL_ID},RL.9-10.1\n{APR_ID},HSA.APR.A.1\n{SL2_ID},SL.9-10.2\n{SL3_ID},SL.9-10.3\n"
        ),
    );
    let loaded = request_ok(
        stdin,
        reader,
        "seed-2",
        "catalog.importCsv",
        json!({ "inPath": catalog.to_string_lossy() }),
    );
    assert_eq!(loaded["upserted"].as_u64(), Some(5));
    let roster = write_file(
        workspace,
        "roster.csv",
        "local_student_id,school_id,inactive\n1001,HS,0\n1002,HS,0\n1003,HS,1\n",
    );
    let loaded = request_ok(
        stdin,
        reader,
        "seed-3",
        "roster.importCsv",
        json!({ "districtId": 7, "inPath": roster.to_string_lossy() }),
    );
    assert_eq!(loaded["upserted"].as_u64(), Some(3));
}
