/*!
Route configuration: a JSON array (or YAML sequence) of rule records.

Each record is validated on its own; a bad record is reported and skipped while the rest
still register. Recognised keys:

- `route` (required), `script` | `command` (one required; `script` wins if both)
- `methods` (default `["GET"]`), `order` (subset of `query`, `path`, `post`), `user`
- `output` (stream output), `in_redir`, `require_in_redir` (implies `in_redir`), `out_redir`
*/

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::errors::GatewayError;
use crate::invocation::Target;
use crate::order::{validate_order, ArgGroup};
use crate::redirect::RedirectPolicy;
use crate::router::RouteTemplate;

pub const DEFAULT_METHOD: &str = "GET";

/// One rule as written in the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRouteRule {
    pub route: Option<String>,
    pub script: Option<String>,
    pub command: Option<String>,
    pub methods: Option<Vec<String>>,
    pub order: Option<Vec<ArgGroup>>,
    pub user: Option<String>,
    #[serde(default)]
    pub output: bool,
    #[serde(default, alias = "in_redirect")]
    pub in_redir: bool,
    #[serde(default, alias = "require_in_redirect")]
    pub require_in_redir: bool,
    #[serde(default, alias = "out_redirect")]
    pub out_redir: bool,
}

/// A validated, registrable rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub template: RouteTemplate,
    pub target: Target,
    pub methods: Vec<String>,
    pub order: Vec<ArgGroup>,
    pub user: Option<String>,
    pub output: bool,
    pub redirect: RedirectPolicy,
}

impl RouteRule {
    pub fn from_raw(raw: RawRouteRule) -> Result<Self, GatewayError> {
        let route = raw
            .route
            .filter(|r| !r.is_empty())
            .ok_or_else(|| GatewayError::Config("rule has no 'route'".to_string()))?;
        let template = RouteTemplate::parse(&route).map_err(GatewayError::Config)?;

        let target = match (raw.script, raw.command) {
            (Some(path), command) => {
                if command.is_some() {
                    tracing::warn!(route = %route, "rule sets both 'script' and 'command'; using 'script'");
                }
                Target::Script { path }
            }
            (None, Some(template)) => Target::Command { template },
            (None, None) => {
                return Err(GatewayError::Config(format!(
                    "rule for '{route}' has neither 'script' nor 'command'"
                )))
            }
        };

        let order = raw.order.unwrap_or_default();
        validate_order(&order)
            .map_err(|e| GatewayError::Config(format!("rule for '{route}': {e}")))?;

        let mut methods: Vec<String> = raw
            .methods
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
        if methods.is_empty() {
            methods.push(DEFAULT_METHOD.to_string());
        }

        Ok(RouteRule {
            template,
            target,
            methods,
            order,
            user: raw.user.filter(|u| !u.is_empty()),
            output: raw.output,
            redirect: RedirectPolicy {
                stdin: raw.in_redir || raw.require_in_redir,
                require_stdin: raw.require_in_redir,
                stdout: raw.out_redir,
            },
        })
    }
}

/// Outcome of loading a configuration document.
#[derive(Debug, Default)]
pub struct LoadedRules {
    pub rules: Vec<RouteRule>,
    /// Zero-based record index and reason for every skipped record.
    pub rejected: Vec<(usize, GatewayError)>,
}

impl LoadedRules {
    fn push(&mut self, index: usize, result: Result<RouteRule, GatewayError>) {
        match result {
            Ok(rule) => self.rules.push(rule),
            Err(e) => {
                tracing::warn!(index, error = %e, "skipping route rule");
                self.rejected.push((index, e));
            }
        }
    }
}

pub fn parse_rules_json(text: &str) -> Result<LoadedRules, GatewayError> {
    let values: Vec<serde_json::Value> = serde_json::from_str(text)
        .map_err(|e| GatewayError::Config(format!("expected a JSON array of rules: {e}")))?;
    let mut out = LoadedRules::default();
    for (i, v) in values.into_iter().enumerate() {
        let rule = serde_json::from_value::<RawRouteRule>(v)
            .map_err(|e| GatewayError::Config(e.to_string()))
            .and_then(RouteRule::from_raw);
        out.push(i, rule);
    }
    Ok(out)
}

pub fn parse_rules_yaml(text: &str) -> Result<LoadedRules, GatewayError> {
    let values: Vec<serde_yaml::Value> = serde_yaml::from_str(text)
        .map_err(|e| GatewayError::Config(format!("expected a YAML sequence of rules: {e}")))?;
    let mut out = LoadedRules::default();
    for (i, v) in values.into_iter().enumerate() {
        let rule = serde_yaml::from_value::<RawRouteRule>(v)
            .map_err(|e| GatewayError::Config(e.to_string()))
            .and_then(RouteRule::from_raw);
        out.push(i, rule);
    }
    Ok(out)
}

/// Load rules from a file; `.yml`/`.yaml` are read as YAML, anything else as JSON.
pub fn load_rules(path: &Path) -> Result<LoadedRules, GatewayError> {
    let text = fs::read_to_string(path)?;
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yml") || e.eq_ignore_ascii_case("yaml"))
        .unwrap_or(false);
    if is_yaml {
        parse_rules_yaml(&text)
    } else {
        parse_rules_json(&text)
    }
}
