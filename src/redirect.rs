/*!
Redirection resolver: the reserved keys `<` (stdin file) and `>` (stdout file).

Only routes that opt in see these keys interpreted. Every entry with the reserved key is
removed from both `post` and `query`; the first non-empty value wins, body before query.
A legitimate parameter literally named `<` or `>` is therefore swallowed on such routes.
*/

use crate::args::{ArgumentGroups, Param};
use crate::errors::GatewayError;

pub const STDIN_KEY: &str = "<";
pub const STDOUT_KEY: &str = ">";

/// Which redirections a route accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedirectPolicy {
    pub stdin: bool,
    pub require_stdin: bool,
    pub stdout: bool,
}

impl RedirectPolicy {
    pub fn is_enabled(&self) -> bool {
        self.stdin || self.require_stdin || self.stdout
    }
}

/// Filenames resolved for one request; at most one per direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redirection {
    pub stdin_file: Option<String>,
    pub stdout_file: Option<String>,
}

/// Strip reserved keys from `groups` according to `policy` and return the chosen files.
pub fn resolve(
    groups: &mut ArgumentGroups,
    policy: &RedirectPolicy,
) -> Result<Redirection, GatewayError> {
    let mut out = Redirection::default();
    if !policy.is_enabled() {
        return Ok(out);
    }
    if policy.stdin || policy.require_stdin {
        out.stdin_file = pop_first(groups, STDIN_KEY);
        if policy.require_stdin && out.stdin_file.is_none() {
            return Err(GatewayError::Usage(format!(
                "this route requires an input file via '{STDIN_KEY}'"
            )));
        }
    }
    if policy.stdout {
        out.stdout_file = pop_first(groups, STDOUT_KEY);
    }
    Ok(out)
}

fn pop_first(groups: &mut ArgumentGroups, key: &str) -> Option<String> {
    let from_post = pop_all(&mut groups.post, key);
    let from_query = pop_all(&mut groups.query, key);
    from_post.into_iter().chain(from_query).next()
}

/// Remove every entry named `key`, returning their non-empty values in order.
fn pop_all(params: &mut Vec<Param>, key: &str) -> Vec<String> {
    let mut values = Vec::new();
    params.retain(|p| {
        if p.key != key {
            return true;
        }
        if let Some(v) = p.non_empty_value() {
            values.push(v.to_string());
        }
        false
    });
    values
}
