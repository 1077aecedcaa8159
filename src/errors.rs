//! Error mapping guide:
//! - Config: rule rejected at load time; never surfaces at request time.
//! - Usage/Permission: request refused before anything is spawned (client-facing 4xx).
//! - Spawn: the OS refused to start the child; buffered routes report the errno as body.
//! - Io: anything else on the request path (redirect files, socket writes).
use std::fmt;
use std::io;

#[derive(Debug)]
pub enum GatewayError {
    Config(String),
    Usage(String),
    Permission(String),
    Spawn(io::Error),
    Io(io::Error),
}

impl From<io::Error> for GatewayError {
    fn from(e: io::Error) -> Self {
        GatewayError::Io(e)
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&display_for_gateway_error(self))
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GatewayError::Spawn(e) | GatewayError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Render a user-facing string for GatewayError.
pub fn display_for_gateway_error(e: &GatewayError) -> String {
    match e {
        GatewayError::Config(s) => format!("configuration error: {s}"),
        GatewayError::Usage(s) => format!("usage error: {s}"),
        GatewayError::Permission(s) => format!("permission denied: {s}"),
        GatewayError::Spawn(ioe) => format!("spawn failed: {ioe}"),
        GatewayError::Io(ioe) => ioe.to_string(),
    }
}

/// HTTP status line for an error that ends a request before any output was produced.
pub fn http_status_for_gateway_error(e: &GatewayError) -> &'static str {
    match e {
        GatewayError::Usage(_) => "400 Bad Request",
        GatewayError::Permission(_) => "403 Forbidden",
        GatewayError::Config(_) | GatewayError::Spawn(_) | GatewayError::Io(_) => {
            "500 Internal Server Error"
        }
    }
}

/// Numeric stand-in for an exit code when the child never started:
/// the raw OS errno when available, 1 otherwise.
pub fn exit_code_for_spawn_error(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(1)
}
