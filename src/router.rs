/*!
Route templates and request matching.

A template is a slash-delimited path where a segment may be `<name>` or `<type:name>`
(`string`, `int`, `float`, `path`). Matching is per segment; variable values are percent-decoded
and validated against their converter. Literal segments compare exactly. A `path` variable
spans as many request segments as the segments around it leave over, so at most one is allowed.
*/

use std::collections::HashMap;

use crate::args::{parse_template_var, VarKind};
use crate::util::url_decode;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var { kind: VarKind, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl RouteTemplate {
    pub fn parse(raw: &str) -> Result<Self, String> {
        if !raw.starts_with('/') {
            return Err(format!("route '{raw}' must start with '/'"));
        }
        let mut segments = Vec::new();
        let mut names: Vec<String> = Vec::new();
        let mut spans = 0;
        for seg in raw.split('/').skip(1) {
            match parse_template_var(seg) {
                None => segments.push(Segment::Literal(seg.to_string())),
                Some(Err(e)) => return Err(e),
                Some(Ok(var)) => {
                    if names.contains(&var.name) {
                        return Err(format!("variable '{}' used twice in '{raw}'", var.name));
                    }
                    if var.kind == VarKind::Path {
                        spans += 1;
                        if spans > 1 {
                            return Err(format!("more than one 'path' variable in '{raw}'"));
                        }
                    }
                    names.push(var.name.clone());
                    segments.push(Segment::Var {
                        kind: var.kind,
                        name: var.name,
                    });
                }
            }
        }
        Ok(RouteTemplate {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Bind the template's variables against a request path.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.strip_prefix('/')?.split('/').collect();
        let spanning = self
            .segments
            .iter()
            .any(|s| matches!(s, Segment::Var { kind: VarKind::Path, .. }));
        let width = if spanning {
            // segments other than the `path` variable take one part each
            parts.len().checked_sub(self.segments.len() - 1)?
        } else if parts.len() == self.segments.len() {
            1
        } else {
            return None;
        };
        if width == 0 {
            return None;
        }

        let mut vars = HashMap::new();
        let mut rest = &parts[..];
        for seg in &self.segments {
            match seg {
                Segment::Literal(lit) => {
                    let (part, tail) = rest.split_first()?;
                    if lit != part {
                        return None;
                    }
                    rest = tail;
                }
                Segment::Var { kind, name } => {
                    let take = if *kind == VarKind::Path { width } else { 1 };
                    let (taken, tail) = rest.split_at(take);
                    let value = url_decode(&taken.join("/"));
                    if !converter_accepts(*kind, &value) {
                        return None;
                    }
                    vars.insert(name.clone(), value);
                    rest = tail;
                }
            }
        }
        Some(vars)
    }
}

fn converter_accepts(kind: VarKind, value: &str) -> bool {
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    match kind {
        VarKind::String => !value.is_empty() && !value.contains('/'),
        VarKind::Path => !value.is_empty() && !value.starts_with('/'),
        VarKind::Int => digits(value),
        VarKind::Float => match value.split_once('.') {
            Some((a, b)) => digits(a) && digits(b),
            None => false,
        },
    }
}

/// Result of routing one request against a table of `(template, methods)` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatch {
    Found {
        index: usize,
        vars: HashMap<String, String>,
    },
    MethodNotAllowed,
    NotFound,
}

/// First entry whose template matches and whose methods include `method`.
pub fn route<'a, I>(entries: I, method: &str, path: &str) -> RouteMatch
where
    I: IntoIterator<Item = (&'a RouteTemplate, &'a [String])>,
{
    let mut path_matched = false;
    for (index, (template, methods)) in entries.into_iter().enumerate() {
        if let Some(vars) = template.matches(path) {
            if methods.iter().any(|m| m.eq_ignore_ascii_case(method)) {
                return RouteMatch::Found { index, vars };
            }
            path_matched = true;
        }
    }
    if path_matched {
        RouteMatch::MethodNotAllowed
    } else {
        RouteMatch::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_and_variable_segments() {
        let t = RouteTemplate::parse("/t/<v>").unwrap();
        let vars = t.matches("/t/hello").unwrap();
        assert_eq!(vars.get("v").map(String::as_str), Some("hello"));
        assert!(t.matches("/t").is_none());
        assert!(t.matches("/t/a/b").is_none());
        assert!(t.matches("/u/hello").is_none());
    }

    #[test]
    fn variables_are_percent_decoded() {
        let t = RouteTemplate::parse("/t1/<val>").unwrap();
        let vars = t.matches("/t1/1%202%203").unwrap();
        assert_eq!(vars["val"], "1 2 3");
    }

    #[test]
    fn typed_converters_validate() {
        let t = RouteTemplate::parse("/n/<int:a>/<float:b>").unwrap();
        assert!(t.matches("/n/12/3.5").is_some());
        assert!(t.matches("/n/x/3.5").is_none());
        assert!(t.matches("/n/12/3").is_none());
        assert!(t.matches("/n/-1/3.5").is_none());
    }

    #[test]
    fn invalid_templates_rejected() {
        assert!(RouteTemplate::parse("no-slash").is_err());
        assert!(RouteTemplate::parse("/a/<uuid:p>").is_err());
        assert!(RouteTemplate::parse("/a/<path:p>/<path:q>").is_err());
        assert!(RouteTemplate::parse("/a/<x>/<x>").is_err());
    }

    #[test]
    fn root_route_matches_only_root() {
        let t = RouteTemplate::parse("/").unwrap();
        assert!(t.matches("/").is_some());
        assert!(t.matches("/x").is_none());
    }

    #[test]
    fn routing_distinguishes_404_and_405() {
        let a = RouteTemplate::parse("/a").unwrap();
        let b = RouteTemplate::parse("/b/<x>").unwrap();
        let get = vec!["GET".to_string()];
        let post = vec!["POST".to_string()];
        let table = [(&a, &get[..]), (&b, &post[..])];

        assert!(matches!(
            route(table.iter().copied(), "GET", "/a"),
            RouteMatch::Found { index: 0, .. }
        ));
        assert!(matches!(
            route(table.iter().copied(), "post", "/b/1"),
            RouteMatch::Found { index: 1, .. }
        ));
        assert_eq!(
            route(table.iter().copied(), "GET", "/b/1"),
            RouteMatch::MethodNotAllowed
        );
        assert_eq!(
            route(table.iter().copied(), "GET", "/zzz"),
            RouteMatch::NotFound
        );
    }

    #[test]
    fn path_variable_spans_remaining_segments() {
        let t = RouteTemplate::parse("/files/<path:p>").unwrap();
        // (request path, bound value)
        let cases = [
            ("/files/a", Some("a")),
            ("/files/a/b/c.txt", Some("a/b/c.txt")),
            ("/files/dir%20x/f", Some("dir x/f")),
            ("/files/a/", Some("a/")),
            ("/files", None),
            ("/files/", None),
            ("/files//a", None),
            ("/other/a", None),
        ];
        for (path, expected) in cases {
            let got = t.matches(path);
            assert_eq!(
                got.as_ref().map(|v| v["p"].as_str()),
                expected,
                "path={path}"
            );
        }
    }

    #[test]
    fn path_variable_between_other_segments() {
        let t = RouteTemplate::parse("/run/<int:n>/<path:p>/end").unwrap();
        let vars = t.matches("/run/3/x/y/end").unwrap();
        assert_eq!(vars["n"], "3");
        assert_eq!(vars["p"], "x/y");
        assert!(t.matches("/run/3/end").is_none());
        assert!(t.matches("/run/3/x/y").is_none());
    }
}
