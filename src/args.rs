/*!
Argument extraction: turns one request into the three argument groups
(`path`, `query`, `post`) that are later stripped of redirections and ordered.

Query and body use the same rules: split on `&`, percent-decode each token, then split
on the first `=`. A token without `=` (or with an empty value) is a bare key.
*/

use std::collections::HashMap;

use crate::util::url_decode;

/// One `key[=value]` entry from the query string or the body, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub key: String,
    pub value: Option<String>,
}

impl Param {
    pub fn new(key: impl Into<String>, value: Option<&str>) -> Self {
        Param {
            key: key.into(),
            value: value.map(str::to_string),
        }
    }

    /// Value if present and non-empty.
    pub fn non_empty_value(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.is_empty())
    }

    /// Render as a single argv token: `key` or `key=value`.
    pub fn to_token(&self) -> String {
        match self.non_empty_value() {
            Some(v) => format!("{}={}", self.key, v),
            None => self.key.clone(),
        }
    }
}

/// The three argument sources of a request, before ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentGroups {
    pub path: Vec<String>,
    pub query: Vec<Param>,
    pub post: Vec<Param>,
}

impl ArgumentGroups {
    pub fn query_tokens(&self) -> Vec<String> {
        self.query.iter().map(Param::to_token).collect()
    }

    pub fn post_tokens(&self) -> Vec<String> {
        self.post.iter().map(Param::to_token).collect()
    }
}

/// Converter annotation on a route template variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    String,
    Int,
    Float,
    /// Rest of the path, slashes included.
    Path,
}

/// A `<name>` / `<type:name>` template segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVar {
    pub kind: VarKind,
    pub name: String,
}

/// Parse one slash-delimited template segment.
///
/// Returns `None` for literal segments, `Some(Err(..))` for a variable with an unknown converter.
pub fn parse_template_var(segment: &str) -> Option<Result<TemplateVar, String>> {
    let inner = segment.strip_prefix('<')?.strip_suffix('>')?;
    let (kind, name) = match inner.split_once(':') {
        Some((k, n)) => (k, n),
        None => ("string", inner),
    };
    if name.is_empty() {
        return Some(Err(format!("empty variable name in segment '{segment}'")));
    }
    let kind = match kind {
        "string" => VarKind::String,
        "int" => VarKind::Int,
        "float" => VarKind::Float,
        "path" => VarKind::Path,
        other => return Some(Err(format!("unknown converter '{other}' in '{segment}'"))),
    };
    Some(Ok(TemplateVar {
        kind,
        name: name.to_string(),
    }))
}

/// Variables of a route template in left-to-right order (invalid segments skipped).
pub fn template_vars(template: &str) -> Vec<TemplateVar> {
    template
        .split('/')
        .filter_map(parse_template_var)
        .filter_map(Result::ok)
        .collect()
}

/// Methods whose body is read as `post` arguments.
pub fn method_allows_body(method: &str) -> bool {
    matches!(
        method.to_ascii_uppercase().as_str(),
        "POST" | "PUT" | "PATCH"
    )
}

/// Raw request pieces the extractor consumes.
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    pub method: &'a str,
    pub path_vars: &'a HashMap<String, String>,
    pub query: Option<&'a str>,
    pub body: &'a [u8],
}

/// Build the three argument groups for one request.
pub fn extract(template: &str, parts: &RequestParts<'_>) -> ArgumentGroups {
    let path = path_args(template, parts.path_vars);
    let query = parts.query.map(parse_params).unwrap_or_default();
    let post = if method_allows_body(parts.method) && !parts.body.is_empty() {
        parse_params(&String::from_utf8_lossy(parts.body))
    } else {
        Vec::new()
    };
    ArgumentGroups { path, query, post }
}

/// Values bound to the template's variables, in template order, stringified per converter.
pub fn path_args(template: &str, vars: &HashMap<String, String>) -> Vec<String> {
    template_vars(template)
        .into_iter()
        .map(|var| {
            let raw = vars.get(&var.name).map(String::as_str).unwrap_or_default();
            match var.kind {
                VarKind::String | VarKind::Path => raw.to_string(),
                VarKind::Int => normalize_int(raw),
                VarKind::Float => normalize_float(raw),
            }
        })
        .collect()
}

/// Parse `a=1&b&c=x%3Dy` into ordered params. Empty tokens are skipped.
pub fn parse_params(raw: &str) -> Vec<Param> {
    let mut out = Vec::new();
    for token in raw.split('&') {
        // `a&&b` or a trailing `&` would otherwise pass an empty argv element
        if token.is_empty() {
            continue;
        }
        let decoded = url_decode(token);
        let param = match decoded.split_once('=') {
            Some((k, v)) => Param::new(k, Some(v)),
            None => Param::new(decoded.as_str(), None),
        };
        out.push(param);
    }
    out
}

fn normalize_int(raw: &str) -> String {
    let trimmed = raw.trim_start_matches('0');
    if trimmed.is_empty() && !raw.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn normalize_float(raw: &str) -> String {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => format!("{v:.1}"),
        Ok(v) => v.to_string(),
        Err(_) => raw.to_string(),
    }
}
