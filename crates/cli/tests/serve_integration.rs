//! Integration tests for the `rapid serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port with an
//! in-memory store, makes HTTP requests, and verifies the responses.

use std::io::Read;
use std::net::TcpStream;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use tempfile::TempDir;

const PROBLEM: &str = "block-v1:Org+Poll+2025+type@problem+block@q1";
const CONTEXT: &str = "course-v1:Org+Poll+2025";
const STAFF: &str = "staff-key";

/// Atomic port counter to avoid port conflicts between parallel tests.
/// Base port is derived from process ID so parallel test binaries don't
/// collide on the same port range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 20000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

/// A running server; killed on drop.
struct Server {
    port: u16,
    child: Child,
    _dir: TempDir,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Start `rapid serve` with the given extra config sections appended.
fn start_server(extra: &str) -> Server {
    let port = next_port();
    let dir = TempDir::new().expect("temp dir");
    let config = format!(
        r#"
[server]
rate_limit = 0

[storage]
backend = "memory"

[auth]
staff_keys = ["{STAFF}"]
{extra}

[[problems]]
id = "{PROBLEM}"
choices = [
    {{ answer_id = "choice_0", answer_text = "wrong" }},
    {{ answer_id = "choice_1", answer_text = "right" }},
]
"#
    );
    let config_path = dir.path().join("rapid.toml");
    std::fs::write(&config_path, config).expect("write config");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_rapid"));
    cmd.current_dir(dir.path());
    cmd.env_remove("RAPID_PORT")
        .env_remove("RAPID_DB")
        .env_remove("RAPID_RATE_LIMIT")
        .env_remove("RAPID_STAFF_KEYS")
        .env("RUST_LOG", "off");
    cmd.arg("--config")
        .arg(&config_path)
        .arg("serve")
        .arg("--port")
        .arg(port.to_string());
    // Redirect stdout/stderr to avoid blocking
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let child = cmd.spawn().expect("failed to start rapid serve");
    // Wait for server to be ready by polling the port
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Server {
        port,
        child,
        _dir: dir,
    }
}

/// Make an HTTP request with optional extra headers and body; return (status, body).
fn http(
    port: u16,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: Option<&str>,
) -> (u16, String) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut header_lines = String::new();
    for (name, value) in headers {
        header_lines.push_str(&format!("{}: {}\r\n", name, value));
    }
    let body = body.unwrap_or("");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost:{port}\r\n{header_lines}Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    std::io::Write::write_all(&mut stream, request.as_bytes()).expect("failed to write");

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);

    parse_http_response(&response)
}

fn staff_get(port: u16, path: &str) -> (u16, String) {
    let auth = format!("Bearer {STAFF}");
    http(port, "GET", path, &[("Authorization", auth.as_str())], None)
}

fn staff_post(port: u16, path: &str) -> (u16, String) {
    let auth = format!("Bearer {STAFF}");
    http(port, "POST", path, &[("Authorization", auth.as_str())], None)
}

/// Parse an HTTP response into (status_code, body).
fn parse_http_response(response: &str) -> (u16, String) {
    let parts: Vec<&str> = response.splitn(2, "\r\n\r\n").collect();
    let headers = parts.first().unwrap_or(&"").to_string();
    let body = parts.get(1).unwrap_or(&"").to_string();

    let status = headers
        .lines()
        .next()
        .unwrap_or("")
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);

    let body = if headers.to_lowercase().contains("transfer-encoding: chunked") {
        decode_chunked(&body)
    } else {
        body
    };
    (status, body)
}

/// Decode chunked transfer encoding.
fn decode_chunked(data: &str) -> String {
    let mut result = String::new();
    let mut remaining = data;

    while let Some(line_end) = remaining.find("\r\n") {
        let size = match usize::from_str_radix(remaining[..line_end].trim(), 16) {
            Ok(s) => s,
            Err(_) => break,
        };
        if size == 0 {
            break;
        }
        let chunk_start = line_end + 2;
        let chunk_end = chunk_start + size;
        if chunk_end > remaining.len() {
            result.push_str(&remaining[chunk_start..]);
            break;
        }
        result.push_str(&remaining[chunk_start..chunk_end]);
        remaining = remaining.get(chunk_end + 2..).unwrap_or("");
    }

    result
}

fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("invalid JSON {body:?}: {e}"))
}

fn scope(action: &str) -> String {
    format!("/problems/{PROBLEM}/contexts/{CONTEXT}/{action}")
}

fn answer(user_id: u32, answer_id: &str) -> serde_json::Value {
    serde_json::json!({
        "event_type": "problem_check",
        "context": {"user_id": user_id, "course_id": CONTEXT},
        "event": {
            "problem_id": PROBLEM,
            "submission": {"q1_2_1": {"answer": "text"}},
            "answers": {"q1_2_1": answer_id}
        }
    })
}

// ──────────────────────────────────────────────

#[test]
fn health_returns_200_with_version() {
    let server = start_server("");
    let (status, body) = http(server.port, "GET", "/health", &[], None);
    assert_eq!(status, 200);
    let v = json(&body);
    assert_eq!(v["status"], "ok");
    assert!(v["version"].is_string());
}

#[test]
fn unknown_route_is_404_json() {
    let server = start_server("");
    let (status, body) = http(server.port, "GET", "/nope", &[], None);
    assert_eq!(status, 404);
    assert_eq!(json(&body)["error"], "not found");
}

#[test]
fn staff_routes_reject_non_staff() {
    let server = start_server("");
    for (method, path) in [
        ("POST", scope("toggle")),
        ("GET", scope("responses")),
        ("POST", format!("/problems/{PROBLEM}/enabled/toggle")),
    ] {
        let (status, body) = http(server.port, method, &path, &[], None);
        assert_eq!(status, 403, "{method} {path}");
        assert_eq!(json(&body)["error"], "Unauthorized (staff only)");

        let (status, _) = http(
            server.port,
            method,
            &path,
            &[("Authorization", "Bearer wrong-key")],
            None,
        );
        assert_eq!(status, 403, "{method} {path} with wrong key");
    }

    // The rejected toggles never touched the store.
    let (_, body) = staff_get(server.port, &scope("responses"));
    assert!(json(&body)["runs"].as_array().unwrap().is_empty());
}

#[test]
fn toggle_ingest_and_responses_round() {
    let server = start_server("");
    let (status, body) = staff_post(server.port, &scope("toggle"));
    assert_eq!(status, 200);
    assert_eq!(json(&body), serde_json::json!({"is_open": true}));

    let batch = serde_json::json!([
        answer(1, "choice_1"),
        answer(2, "choice_0"),
        answer(2, "choice_1"),
        {"event_type": "play_video"},
    ]);
    let (status, body) = http(
        server.port,
        "POST",
        "/events",
        &[],
        Some(&batch.to_string()),
    );
    assert_eq!(status, 200);
    let summary = json(&body);
    assert_eq!(summary["recorded"], 3);
    assert_eq!(summary["skipped"], 1);
    assert_eq!(summary["outcomes"][3]["reason"], "wrong_event_type");

    let (status, body) = staff_get(server.port, &scope("responses"));
    assert_eq!(status, 200);
    let payload = json(&body);
    assert_eq!(payload["is_open"], true);
    let run_id = payload["runs"][0]["id"].to_string();
    assert_eq!(payload["counts"]["choice_0"][&run_id], 0);
    assert_eq!(payload["counts"]["choice_1"][&run_id], 2);

    let (_, body) = staff_post(server.port, &scope("toggle"));
    assert_eq!(json(&body)["is_open"], false);

    // Closed: further events are skipped.
    let (_, body) = http(
        server.port,
        "POST",
        "/events",
        &[],
        Some(&answer(3, "choice_0").to_string()),
    );
    let summary = json(&body);
    assert_eq!(summary["recorded"], 0);
    assert_eq!(summary["outcomes"][0]["reason"], "no_open_run");
}

#[test]
fn status_is_open_to_participants() {
    let server = start_server("");
    let (status, body) = http(server.port, "GET", &scope("status"), &[], None);
    assert_eq!(status, 200);
    assert_eq!(
        json(&body),
        serde_json::json!({"is_open": false, "is_staff": false, "is_enabled": false})
    );

    staff_post(server.port, &format!("/problems/{PROBLEM}/enabled/toggle"));
    staff_post(server.port, &scope("toggle"));
    let (_, body) = staff_get(server.port, &scope("status"));
    assert_eq!(
        json(&body),
        serde_json::json!({"is_open": true, "is_staff": true, "is_enabled": true})
    );
}

#[test]
fn unknown_problem_is_404_and_bad_identifier_is_400() {
    let server = start_server("");
    let (status, body) = staff_get(
        server.port,
        &format!("/problems/block-v1:Org+Poll+2025+type@problem+block@zz/contexts/{CONTEXT}/responses"),
    );
    assert_eq!(status, 404);
    assert!(json(&body)["error"]
        .as_str()
        .unwrap()
        .contains("unknown problem"));

    let (status, _) = staff_get(
        server.port,
        &format!("/problems/{PROBLEM}/contexts/bad%20course/responses"),
    );
    assert_eq!(status, 400);
}

#[test]
fn malformed_event_body_is_400() {
    let server = start_server("");
    let (status, body) = http(server.port, "POST", "/events", &[], Some("{not json"));
    assert_eq!(status, 400);
    assert!(json(&body)["error"].as_str().unwrap().contains("invalid JSON"));
}

#[test]
fn ingest_key_is_enforced_when_configured() {
    let server = start_server("ingest_key = \"tracker\"");
    let event = answer(1, "choice_0").to_string();

    let (status, _) = http(server.port, "POST", "/events", &[], Some(&event));
    assert_eq!(status, 401);

    let (status, _) = http(
        server.port,
        "POST",
        "/events",
        &[("X-API-Key", "wrong")],
        Some(&event),
    );
    assert_eq!(status, 403);

    let (status, body) = http(
        server.port,
        "POST",
        "/events",
        &[("X-API-Key", "tracker")],
        Some(&event),
    );
    assert_eq!(status, 200);
    assert_eq!(json(&body)["skipped"], 1);

    // Other routes are unaffected.
    let (status, _) = http(server.port, "GET", "/health", &[], None);
    assert_eq!(status, 200);
}

#[test]
fn rate_limit_returns_429() {
    let port = next_port();
    let dir = TempDir::new().expect("temp dir");
    let config_path = dir.path().join("rapid.toml");
    std::fs::write(
        &config_path,
        "[server]\nrate_limit = 2\n\n[storage]\nbackend = \"memory\"\n",
    )
    .unwrap();

    let mut child = Command::new(env!("CARGO_BIN_EXE_rapid"))
        .current_dir(dir.path())
        .env_remove("RAPID_RATE_LIMIT")
        .env("RUST_LOG", "off")
        .arg("--config")
        .arg(&config_path)
        .args(["serve", "--port", &port.to_string()])
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .expect("failed to start rapid serve");
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    // The readiness probe above opened connections but sent no requests.
    let statuses: Vec<u16> = (0..3)
        .map(|_| http(port, "GET", "/health", &[], None).0)
        .collect();
    let _ = child.kill();
    let _ = child.wait();
    assert_eq!(statuses, vec![200, 200, 429]);
}
