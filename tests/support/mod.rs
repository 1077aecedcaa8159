/*!
Test support helpers shared across integration tests.

- start_gateway_with(json): register rules and serve them on an ephemeral localhost port
- write_script(dir, name, body): executable shell script in a scratch directory
- http_get / http_post_form / http_raw: one request over a raw TcpStream, read to EOF
- process_alive(pid): liveness probe that treats zombies as dead
*/

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use xonrequest::config::parse_rules_json;
use xonrequest::{start_gateway, Gateway, Identity};

/// Running gateway; stops accepting when dropped.
pub struct TestGateway {
    pub addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestGateway {
    #[allow(dead_code)]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Identity of an unprivileged account, so impersonation checks do not depend on the test user.
#[allow(dead_code)]
pub fn unprivileged() -> Identity {
    Identity {
        name: "xonrequest-tester".to_string(),
        is_superuser: false,
    }
}

#[allow(dead_code)]
pub fn start_gateway_with(json: &str) -> TestGateway {
    start_gateway_as(json, unprivileged())
}

#[allow(dead_code)]
pub fn start_gateway_as(json: &str, identity: Identity) -> TestGateway {
    let loaded = parse_rules_json(json).expect("rules parse");
    assert!(loaded.rejected.is_empty(), "rejected: {:?}", loaded.rejected);
    let gw = Gateway::with_identity(loaded.rules, identity);
    let (addr, running, handle) =
        start_gateway("127.0.0.1:0", Arc::new(gw)).expect("start gateway");
    TestGateway {
        addr,
        running,
        handle: Some(handle),
    }
}

/// Write an executable script and return its absolute path.
#[allow(dead_code)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let p = dir.join(name);
    std::fs::write(&p, body).expect("write script");
    std::fs::set_permissions(&p, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    p
}

/// JSON string literal for embedding paths in rule documents.
#[allow(dead_code)]
pub fn json_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

#[allow(dead_code)]
pub fn urlencode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Parsed raw response: status code, header block, body bytes (still chunk-framed if chunked).
#[allow(dead_code)]
pub struct RawResponse {
    pub status: u16,
    pub headers: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    #[allow(dead_code)]
    pub fn is_chunked(&self) -> bool {
        self.headers
            .to_ascii_lowercase()
            .contains("transfer-encoding: chunked")
    }

    /// Body text, de-chunked when needed.
    #[allow(dead_code)]
    pub fn text(&self) -> String {
        let bytes = if self.is_chunked() {
            xonrequest::http::decode_chunked(&self.body)
        } else {
            self.body.clone()
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Exit code trailer of a streamed response.
    #[allow(dead_code)]
    pub fn exit_code_trailer(&self) -> Option<i32> {
        let raw = String::from_utf8_lossy(&self.body);
        raw.lines()
            .find_map(|l| l.trim().strip_prefix("X-Exit-Code:"))
            .and_then(|v| v.trim().parse().ok())
    }
}

#[allow(dead_code)]
pub fn parse_response(buf: &[u8]) -> RawResponse {
    let end = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4)
        .unwrap_or(buf.len());
    let headers = String::from_utf8_lossy(&buf[..end]).into_owned();
    let status = headers
        .lines()
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);
    RawResponse {
        status,
        headers,
        body: buf[end..].to_vec(),
    }
}

/// Send raw request bytes and read the full response until the server closes.
#[allow(dead_code)]
pub fn http_raw(port: u16, request: &[u8]) -> RawResponse {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect failed");
    stream
        .set_read_timeout(Some(Duration::from_secs(20)))
        .expect("read timeout");
    stream.write_all(request).expect("write failed");
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    loop {
        match stream.read(&mut tmp) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    parse_response(&buf)
}

#[allow(dead_code)]
pub fn http_get(port: u16, target: &str) -> RawResponse {
    let req = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    http_raw(port, req.as_bytes())
}

/// POST a urlencoded form built from `body_kv`.
#[allow(dead_code)]
pub fn http_post_form(port: u16, target: &str, body_kv: &[(&str, &str)]) -> RawResponse {
    let body = body_kv
        .iter()
        .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let req = format!(
        "POST {target} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    http_raw(port, req.as_bytes())
}

/// True while `pid` exists and is not a zombie.
#[allow(dead_code)]
pub fn process_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    match kill(Pid::from_raw(pid), None) {
        Err(Errno::ESRCH) => false,
        _ => {
            #[cfg(target_os = "linux")]
            {
                if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
                    let state = stat
                        .rsplit_once(')')
                        .and_then(|(_, rest)| rest.split_whitespace().next());
                    return state != Some("Z");
                }
            }
            true
        }
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
#[allow(dead_code)]
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    cond()
}
