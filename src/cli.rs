use std::path::PathBuf;

use clap::Parser;

pub(crate) const BIND_ENV: &str = "XONREQUEST_BIND";
pub(crate) const DEFAULT_BIND: &str = "0.0.0.0:5000";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "xonrequest",
    version,
    about = "Run configured scripts and shell commands when their HTTP route is requested.",
    after_long_help = "Examples:\n  xonrequest rules.json\n  xonrequest --bind 127.0.0.1:8080 rules.yaml\n  xonrequest --check rules.json\n\n"
)]
pub(crate) struct Cli {
    /// Route rules file (JSON array, or YAML sequence for .yml/.yaml)
    pub(crate) config: PathBuf,

    /// Listen address (overrides XONREQUEST_BIND; default 0.0.0.0:5000)
    #[arg(long)]
    pub(crate) bind: Option<String>,

    /// Debug-level logging unless XONREQUEST_LOG/RUST_LOG is set
    #[arg(long, short = 'v')]
    pub(crate) verbose: bool,

    /// Validate the rules file, print the registered routes and exit
    #[arg(long)]
    pub(crate) check: bool,
}

impl Cli {
    /// `--bind`, then `XONREQUEST_BIND`, then the default.
    pub(crate) fn bind_addr(&self) -> String {
        self.bind
            .clone()
            .or_else(|| std::env::var(BIND_ENV).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
    }
}
