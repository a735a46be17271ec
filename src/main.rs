mod aggregate;
mod attempts;
mod db;
mod detect;
mod error;
mod formats;
mod ipc;
mod loader;
mod logging;
mod pipeline;
mod roster;
mod standards;
mod tabular;

use std::io::{self, BufRead, Write};

fn main() {
    logging::init_logging();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "assessmentd starting");

    let mut state = ipc::AppState::default();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "unparseable request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{resp}");
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    state.attempts.clear();
    tracing::info!("stdin closed; exiting");
}
