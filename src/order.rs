//! Argument ordering: declared group order first, then the fixed fallback `query, path, post`.

use serde::Deserialize;

use crate::args::ArgumentGroups;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgGroup {
    Query,
    Path,
    Post,
}

/// Tail appended to every declared order; also the default order.
pub const FALLBACK_ORDER: [ArgGroup; 3] = [ArgGroup::Query, ArgGroup::Path, ArgGroup::Post];

impl ArgGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArgGroup::Query => "query",
            ArgGroup::Path => "path",
            ArgGroup::Post => "post",
        }
    }
}

/// Reject orders that name a group twice.
pub fn validate_order(order: &[ArgGroup]) -> Result<(), String> {
    for (i, g) in order.iter().enumerate() {
        if order[..i].contains(g) {
            return Err(format!("group '{}' listed more than once", g.as_str()));
        }
    }
    Ok(())
}

/// Flatten the groups into one argv tail. Each group is emitted exactly once.
pub fn order_args(order: &[ArgGroup], groups: &ArgumentGroups) -> Vec<String> {
    let mut seen: Vec<ArgGroup> = Vec::with_capacity(3);
    let mut out = Vec::new();
    for g in order.iter().chain(FALLBACK_ORDER.iter()) {
        if seen.contains(g) {
            continue;
        }
        seen.push(*g);
        match g {
            ArgGroup::Query => out.extend(groups.query_tokens()),
            ArgGroup::Path => out.extend(groups.path.iter().cloned()),
            ArgGroup::Post => out.extend(groups.post_tokens()),
        }
    }
    out
}
