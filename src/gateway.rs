/*!
Gateway: compiled route handlers and the per-connection request pipeline.

For one connection: read request → route → extract → redirect → order → build → spawn →
deliver. Each step runs strictly after the previous one on the connection's own thread.

Delivery modes:
- buffered: wait for the child, reply `200` with the decimal exit code as the whole body;
  if the OS refused to spawn, the errno takes the exit code's place.
- streaming: reply with a chunked body fed from the child's output as it arrives; a spawn
  failure is a plain `500` (no chunked prelude). When the client goes away mid-stream the
  process group is killed and reaped.
*/

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::args::{self, RequestParts};
use crate::config::RouteRule;
use crate::errors::{
    display_for_gateway_error, exit_code_for_spawn_error, http_status_for_gateway_error,
    GatewayError,
};
use crate::http::{
    read_http_request, respond_chunked_end, respond_chunked_prelude,
    respond_chunked_write_chunk, respond_plain, HttpRequest,
};
use crate::invocation::{self, Identity, Invocation};
use crate::order::order_args;
use crate::redirect;
use crate::router::{route, RouteMatch};
use crate::runner::{self, RunningProcess};
use crate::util::id::create_request_id;

/// How often a silent stream checks whether the client is still there.
pub const PROBE_INTERVAL: Duration = Duration::from_millis(200);

/// Chunks buffered between the output reader thread and the socket writer.
const CHANNEL_CAP: usize = 64;

/// A client socket the streaming loop can probe for disconnects.
pub trait ClientConnection: Read + Write {
    /// True once the peer has closed or reset the connection.
    fn peer_gone(&self) -> bool {
        false
    }
}

impl ClientConnection for TcpStream {
    fn peer_gone(&self) -> bool {
        if self.set_nonblocking(true).is_err() {
            return true;
        }
        let mut probe = [0u8; 1];
        let gone = match self.peek(&mut probe) {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) => !matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ),
        };
        let _ = self.set_nonblocking(false);
        gone
    }
}

/// How a request ended; the buffered errno case is kept distinct from a real exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Exited(i32),
    SpawnFailed(i32),
    Streamed(i32),
    Disconnected,
    Rejected(&'static str),
}

/// One registered rule, compiled once; owns its rule by value.
#[derive(Debug, Clone)]
pub struct RouteHandler {
    rule: RouteRule,
}

impl RouteHandler {
    pub fn new(rule: RouteRule) -> Self {
        RouteHandler { rule }
    }

    pub fn rule(&self) -> &RouteRule {
        &self.rule
    }

    /// Everything up to (not including) spawn: extraction, redirection, ordering, build.
    pub fn prepare(
        &self,
        req: &HttpRequest,
        vars: &HashMap<String, String>,
        identity: &Identity,
    ) -> Result<Invocation, GatewayError> {
        let parts = RequestParts {
            method: &req.method,
            path_vars: vars,
            query: req.query.as_deref().filter(|q| !q.is_empty()),
            body: &req.body,
        };
        let mut groups = args::extract(self.rule.template.as_str(), &parts);
        let redirection = redirect::resolve(&mut groups, &self.rule.redirect)?;
        let ordered = order_args(&self.rule.order, &groups);
        invocation::build(
            &self.rule.target,
            ordered,
            self.rule.user.as_deref(),
            self.rule.output,
            redirection,
            identity,
        )
    }
}

/// Immutable routing table plus the identity used for impersonation checks.
#[derive(Debug, Clone)]
pub struct Gateway {
    handlers: Vec<RouteHandler>,
    identity: Identity,
}

impl Gateway {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self::with_identity(rules, Identity::current())
    }

    pub fn with_identity(rules: Vec<RouteRule>, identity: Identity) -> Self {
        Gateway {
            handlers: rules.into_iter().map(RouteHandler::new).collect(),
            identity,
        }
    }

    pub fn handlers(&self) -> &[RouteHandler] {
        &self.handlers
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Serve exactly one request on `stream`.
    pub fn handle_connection<S: ClientConnection>(&self, stream: &mut S) -> ExecOutcome {
        let req = match read_http_request(stream) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "unreadable request");
                let _ = respond_plain(stream, "400 Bad Request", b"malformed request\n");
                return ExecOutcome::Rejected("400 Bad Request");
            }
        };
        self.handle_request(&req, stream)
    }

    pub fn handle_request<S: ClientConnection>(
        &self,
        req: &HttpRequest,
        stream: &mut S,
    ) -> ExecOutcome {
        let table = self
            .handlers
            .iter()
            .map(|h| (&h.rule.template, h.rule.methods.as_slice()));
        let (handler, vars) = match route(table, &req.method, &req.path) {
            RouteMatch::Found { index, vars } => (&self.handlers[index], vars),
            RouteMatch::MethodNotAllowed => {
                return reject(stream, "405 Method Not Allowed", "method not allowed\n")
            }
            RouteMatch::NotFound => return reject(stream, "404 Not Found", "not found\n"),
        };

        let request_id = create_request_id();
        let inv = match handler.prepare(req, &vars, &self.identity) {
            Ok(inv) => inv,
            Err(e) => {
                tracing::warn!(request_id = %request_id, path = %req.path, error = %e, "request refused");
                let status = http_status_for_gateway_error(&e);
                return reject(stream, status, &format!("{}\n", display_for_gateway_error(&e)));
            }
        };
        tracing::info!(
            request_id = %request_id,
            method = %req.method,
            path = %req.path,
            query = req.query.as_deref().unwrap_or(""),
            argv = %inv.preview(),
            stream = inv.stream_output,
            "exec"
        );

        let started = Instant::now();
        let outcome = if inv.stream_output {
            run_streaming(&inv, stream, &request_id)
        } else {
            run_buffered(&inv, stream)
        };
        tracing::info!(
            request_id = %request_id,
            outcome = ?outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "done"
        );
        outcome
    }
}

fn reject<W: Write>(stream: &mut W, status: &'static str, body: &str) -> ExecOutcome {
    let _ = respond_plain(stream, status, body.as_bytes());
    ExecOutcome::Rejected(status)
}

fn run_buffered<S: ClientConnection>(inv: &Invocation, stream: &mut S) -> ExecOutcome {
    let (outcome, code) = match runner::spawn(inv) {
        Ok(mut proc) => match proc.wait_exit_code() {
            Ok(code) => (ExecOutcome::Exited(code), code),
            Err(e) => {
                tracing::warn!(error = %e, "waiting for child failed");
                return reject(stream, "500 Internal Server Error", &format!("{e}\n"));
            }
        },
        Err(GatewayError::Spawn(e)) => {
            tracing::warn!(error = %e, "spawn failed");
            let code = exit_code_for_spawn_error(&e);
            (ExecOutcome::SpawnFailed(code), code)
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot start child");
            let status = http_status_for_gateway_error(&e);
            return reject(stream, status, &format!("{}\n", display_for_gateway_error(&e)));
        }
    };
    let _ = respond_plain(stream, "200 OK", code.to_string().as_bytes());
    outcome
}

fn run_streaming<S: ClientConnection>(
    inv: &Invocation,
    stream: &mut S,
    request_id: &str,
) -> ExecOutcome {
    let mut proc = match runner::spawn(inv) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "spawn failed; no stream");
            return reject(
                stream,
                "500 Internal Server Error",
                &format!("{}\n", display_for_gateway_error(&e)),
            );
        }
    };

    if respond_chunked_prelude(stream, Some(request_id)).is_err() {
        return disconnect(&mut proc, request_id);
    }
    let Some(chunks) = proc.take_chunks() else {
        let code = proc.wait_exit_code().unwrap_or(1);
        let _ = respond_chunked_end(stream, Some(code));
        return ExecOutcome::Streamed(code);
    };

    let (tx, rx) = mpsc::sync_channel::<io::Result<Vec<u8>>>(CHANNEL_CAP);
    std::thread::spawn(move || {
        for chunk in chunks {
            if tx.send(chunk).is_err() {
                break;
            }
        }
    });

    let mut total_bytes: usize = 0;
    loop {
        match rx.recv_timeout(PROBE_INTERVAL) {
            Ok(Ok(chunk)) => {
                if let Err(e) = respond_chunked_write_chunk(stream, &chunk) {
                    tracing::debug!(request_id = %request_id, error = %e, "chunk write failed");
                    drop(rx);
                    return disconnect(&mut proc, request_id);
                }
                total_bytes = total_bytes.saturating_add(chunk.len());
            }
            Ok(Err(e)) => {
                tracing::warn!(request_id = %request_id, error = %e, "reading child output failed");
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if stream.peer_gone() {
                    drop(rx);
                    return disconnect(&mut proc, request_id);
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    // Output closed; the child may still be running with its streams redirected elsewhere.
    let code = loop {
        match proc.wait_for(PROBE_INTERVAL) {
            Ok(Some(c)) => break c,
            Ok(None) => {
                if stream.peer_gone() {
                    return disconnect(&mut proc, request_id);
                }
            }
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "waiting for child failed");
                break 1;
            }
        }
    };
    tracing::debug!(request_id = %request_id, total_bytes, "stream complete");
    if respond_chunked_end(stream, Some(code)).is_err() {
        tracing::debug!(request_id = %request_id, "client left before the final chunk");
    }
    ExecOutcome::Streamed(code)
}

fn disconnect(proc: &mut RunningProcess, request_id: &str) -> ExecOutcome {
    tracing::warn!(
        request_id = %request_id,
        pgid = proc.pgid(),
        "client disconnected; killing process group"
    );
    if let Err(e) = proc.terminate() {
        tracing::warn!(request_id = %request_id, error = %e, "terminating process group failed");
    }
    ExecOutcome::Disconnected
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::parse_rules_json;
    use crate::http::decode_chunked;
    use std::io::Cursor;

    /// In-memory connection: fixed request bytes in, response bytes collected.
    struct FakeConn {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
        fail_writes_after: Option<usize>,
        gone: bool,
    }

    impl FakeConn {
        fn new(req: &str) -> Self {
            FakeConn {
                input: Cursor::new(req.as_bytes().to_vec()),
                output: Vec::new(),
                fail_writes_after: None,
                gone: false,
            }
        }

        fn text(&self) -> String {
            String::from_utf8_lossy(&self.output).into_owned()
        }

        fn body(&self) -> Vec<u8> {
            let pos = self
                .output
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .expect("header end");
            self.output[pos + 4..].to_vec()
        }
    }

    impl Read for FakeConn {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for FakeConn {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(limit) = self.fail_writes_after {
                if self.output.len() >= limit {
                    return Err(io::Error::from(io::ErrorKind::BrokenPipe));
                }
            }
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ClientConnection for FakeConn {
        fn peer_gone(&self) -> bool {
            self.gone
        }
    }

    fn gateway(json: &str) -> Gateway {
        let loaded = parse_rules_json(json).unwrap();
        assert!(loaded.rejected.is_empty(), "{:?}", loaded.rejected);
        Gateway::with_identity(
            loaded.rules,
            Identity {
                name: "bob".into(),
                is_superuser: false,
            },
        )
    }

    #[test]
    fn buffered_command_returns_exit_code_body() {
        let gw = gateway(r#"[{"route": "/t2", "command": "exit 4 #"}]"#);
        let mut c = FakeConn::new("GET /t2?x=1&y=2 HTTP/1.1\r\n\r\n");
        assert_eq!(gw.handle_connection(&mut c), ExecOutcome::Exited(4));
        assert!(c.text().starts_with("HTTP/1.1 200 OK"));
        assert_eq!(c.body(), b"4");
    }

    #[test]
    fn streamed_script_output_reaches_body() {
        let gw = gateway(r#"[{"route": "/t/<v>", "script": "echo", "output": true}]"#);
        let mut c = FakeConn::new("GET /t/hello HTTP/1.1\r\n\r\n");
        assert_eq!(gw.handle_connection(&mut c), ExecOutcome::Streamed(0));
        assert!(c.text().contains("Transfer-Encoding: chunked"));
        assert_eq!(decode_chunked(&c.body()), b"hello\n");
    }

    #[test]
    fn query_path_post_default_order() {
        let gw = gateway(
            r#"[{"route": "/o/<p>", "script": "echo", "output": true, "methods": ["POST"]}]"#,
        );
        let mut c = FakeConn::new(
            "POST /o/P?q=1 HTTP/1.1\r\nContent-Length: 3\r\n\r\nb=2",
        );
        gw.handle_connection(&mut c);
        assert_eq!(decode_chunked(&c.body()), b"q=1 P b=2\n");
    }

    #[test]
    fn missing_required_input_is_400_without_spawn() {
        let gw = gateway(
            r#"[{"route": "/c", "script": "/nonexistent/never-run", "require_in_redir": true}]"#,
        );
        let mut c = FakeConn::new("GET /c?a=1 HTTP/1.1\r\n\r\n");
        assert_eq!(
            gw.handle_connection(&mut c),
            ExecOutcome::Rejected("400 Bad Request")
        );
    }

    #[test]
    fn impersonation_without_root_is_403() {
        let gw = gateway(r#"[{"route": "/d", "command": "true", "user": "alice"}]"#);
        let mut c = FakeConn::new("GET /d HTTP/1.1\r\n\r\n");
        assert_eq!(
            gw.handle_connection(&mut c),
            ExecOutcome::Rejected("403 Forbidden")
        );
        assert!(c.text().contains("permission denied"));
    }

    #[test]
    fn buffered_spawn_failure_reports_errno() {
        let gw = gateway(r#"[{"route": "/m", "script": "/nonexistent/xonrequest-missing"}]"#);
        let mut c = FakeConn::new("GET /m HTTP/1.1\r\n\r\n");
        assert_eq!(gw.handle_connection(&mut c), ExecOutcome::SpawnFailed(2));
        assert!(c.text().starts_with("HTTP/1.1 200 OK"));
        assert_eq!(c.body(), b"2");
    }

    #[test]
    fn streaming_spawn_failure_is_plain_500() {
        let gw = gateway(
            r#"[{"route": "/m", "script": "/nonexistent/xonrequest-missing", "output": true}]"#,
        );
        let mut c = FakeConn::new("GET /m HTTP/1.1\r\n\r\n");
        assert_eq!(
            gw.handle_connection(&mut c),
            ExecOutcome::Rejected("500 Internal Server Error")
        );
        assert!(!c.text().contains("Transfer-Encoding: chunked"));
    }

    #[test]
    fn unknown_route_and_wrong_method() {
        let gw = gateway(r#"[{"route": "/only-post", "command": "true", "methods": ["POST"]}]"#);
        let mut a = FakeConn::new("GET /nope HTTP/1.1\r\n\r\n");
        assert_eq!(gw.handle_connection(&mut a), ExecOutcome::Rejected("404 Not Found"));
        let mut b = FakeConn::new("GET /only-post HTTP/1.1\r\n\r\n");
        assert_eq!(
            gw.handle_connection(&mut b),
            ExecOutcome::Rejected("405 Method Not Allowed")
        );
    }

    #[test]
    fn write_failure_mid_stream_kills_child() {
        let gw = gateway(
            r#"[{"route": "/s", "command": "while true; do echo tick; sleep 0.05; done", "output": true}]"#,
        );
        let mut c = FakeConn::new("GET /s HTTP/1.1\r\n\r\n");
        c.fail_writes_after = Some(400);
        let started = Instant::now();
        assert_eq!(gw.handle_connection(&mut c), ExecOutcome::Disconnected);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn client_gone_after_output_closed_kills_child() {
        let gw = gateway(
            r#"[{"route": "/q", "command": "echo started; exec >/dev/null 2>&1; sleep 30", "output": true}]"#,
        );
        let mut c = FakeConn::new("GET /q HTTP/1.1\r\n\r\n");
        c.gone = true;
        let started = Instant::now();
        assert_eq!(gw.handle_connection(&mut c), ExecOutcome::Disconnected);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn child_exit_after_output_closed_still_reports_code() {
        let gw = gateway(
            r#"[{"route": "/q", "command": "exec >/dev/null 2>&1; sleep 0.5; exit 3", "output": true}]"#,
        );
        let mut c = FakeConn::new("GET /q HTTP/1.1\r\n\r\n");
        assert_eq!(gw.handle_connection(&mut c), ExecOutcome::Streamed(3));
        assert!(c.text().ends_with("0\r\nX-Exit-Code: 3\r\n\r\n"));
    }
}
