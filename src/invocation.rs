/*!
Invocation builder: turns an ordered argument list into a fully resolved process description.

- Script targets run as an argv array; arguments are never escaped.
- Command targets become one `/bin/sh -c` line; each argument has the shell operators
  `; > < | &` backslash-escaped, the template itself is left untouched.
- A route `user` other than the effective user is honoured only when running as root
  (via `sudo -u <user> --`); otherwise the request is refused before spawning.
*/

use std::path::PathBuf;

use once_cell::sync::Lazy;

#[cfg(unix)]
use nix::unistd::{geteuid, User};

use crate::errors::GatewayError;
use crate::redirect::Redirection;
use crate::util::{escape_shell_metachars, shell_join};

pub const SHELL: &str = "/bin/sh";

static SUDO: Lazy<PathBuf> =
    Lazy::new(|| which::which("sudo").unwrap_or_else(|_| PathBuf::from("sudo")));

/// What a route executes; fixed at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Script { path: String },
    Command { template: String },
}

/// The OS identity the gateway runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub is_superuser: bool,
}

impl Identity {
    #[cfg(unix)]
    pub fn current() -> Identity {
        let uid = geteuid();
        let name = match User::from_uid(uid) {
            Ok(Some(u)) => u.name,
            _ => uid.to_string(),
        };
        Identity {
            name,
            is_superuser: uid.is_root(),
        }
    }

    #[cfg(not(unix))]
    pub fn current() -> Identity {
        Identity {
            name: std::env::var("USERNAME").unwrap_or_default(),
            is_superuser: false,
        }
    }
}

/// A fully resolved process launch. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program and arguments (script mode) or the single shell line (command mode).
    pub argv: Vec<String>,
    pub use_shell: bool,
    pub impersonate_user: Option<String>,
    pub stdin_file: Option<String>,
    pub stdout_file: Option<String>,
    pub stream_output: bool,
}

impl Invocation {
    /// Exact argv handed to the OS, including the shell and sudo wrappers.
    pub fn command_line(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(user) = &self.impersonate_user {
            out.push(SUDO.display().to_string());
            out.push("-u".to_string());
            out.push(user.clone());
            out.push("--".to_string());
        }
        if self.use_shell {
            out.push(SHELL.to_string());
            out.push("-c".to_string());
        }
        out.extend(self.argv.iter().cloned());
        out
    }

    /// Single-line preview for logs.
    pub fn preview(&self) -> String {
        let mut s = shell_join(&self.command_line());
        if let Some(f) = &self.stdin_file {
            s.push_str(&format!(" < {f}"));
        }
        if let Some(f) = &self.stdout_file {
            s.push_str(&format!(" > {f}"));
        }
        s
    }
}

/// Join a command template with escaped arguments.
pub fn command_line_for(template: &str, args: &[String]) -> String {
    let mut line = template.to_string();
    for a in args {
        line.push(' ');
        line.push_str(&escape_shell_metachars(a));
    }
    line
}

/// Decide whether `user` can be honoured from `identity`.
///
/// Returns the user to impersonate, `None` when no switch is needed.
pub fn resolve_user(
    user: Option<&str>,
    identity: &Identity,
) -> Result<Option<String>, GatewayError> {
    match user {
        None => Ok(None),
        Some(u) if u == identity.name => Ok(None),
        Some(u) if identity.is_superuser => Ok(Some(u.to_string())),
        Some(u) => Err(GatewayError::Permission(format!(
            "cannot run as '{u}' while the gateway runs as '{}'",
            identity.name
        ))),
    }
}

/// Build the invocation for one request.
///
/// An output file always disables streaming; the caller reads results from the file.
pub fn build(
    target: &Target,
    args: Vec<String>,
    user: Option<&str>,
    stream_output: bool,
    redirection: Redirection,
    identity: &Identity,
) -> Result<Invocation, GatewayError> {
    let impersonate_user = resolve_user(user, identity)?;
    let (argv, use_shell) = match target {
        Target::Script { path } => {
            let mut argv = Vec::with_capacity(args.len() + 1);
            argv.push(path.clone());
            argv.extend(args);
            (argv, false)
        }
        Target::Command { template } => (vec![command_line_for(template, &args)], true),
    };
    let stream_output = stream_output && redirection.stdout_file.is_none();
    Ok(Invocation {
        argv,
        use_shell,
        impersonate_user,
        stdin_file: redirection.stdin_file,
        stdout_file: redirection.stdout_file,
        stream_output,
    })
}
