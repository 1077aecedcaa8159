use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use xonrequest::{load_rules, start_gateway, Gateway, RouteRule, Target};

mod cli;

use crate::cli::Cli;

fn describe(rule: &RouteRule) -> String {
    let target = match &rule.target {
        Target::Script { path } => format!("script {path}"),
        Target::Command { template } => format!("command {template:?}"),
    };
    let mut line = format!(
        "{:<8} {:<32} {}",
        rule.methods.join(","),
        rule.template.as_str(),
        target
    );
    if rule.output {
        line.push_str(" [stream]");
    }
    if let Some(u) = &rule.user {
        line.push_str(&format!(" [user={u}]"));
    }
    line
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let loaded = load_rules(&cli.config)
        .with_context(|| format!("loading rules from {}", cli.config.display()))?;
    for (index, err) in &loaded.rejected {
        eprintln!("xonrequest: rule #{index} skipped: {err}");
    }

    if cli.check {
        for rule in &loaded.rules {
            println!("{}", describe(rule));
        }
        return Ok(if loaded.rules.is_empty() {
            ExitCode::from(1)
        } else {
            ExitCode::SUCCESS
        });
    }
    if loaded.rules.is_empty() {
        tracing::warn!(config = %cli.config.display(), "no routes registered");
    }

    let bind = cli.bind_addr();
    let gateway = Arc::new(Gateway::new(loaded.rules));
    let (addr, _running, handle) =
        start_gateway(&bind, gateway).with_context(|| format!("starting gateway on {bind}"))?;
    tracing::info!(%addr, "serving");
    handle
        .join()
        .map_err(|_| anyhow::anyhow!("accept loop panicked"))?;
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    xonrequest::logging::init(cli.verbose);
    tracing::info!("{}", xonrequest::logging::build_banner());
    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("xonrequest: {e:#}");
            ExitCode::from(1)
        }
    }
}
