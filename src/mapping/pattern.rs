use super::MappingError;
use crate::http::ParamVec;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// `{name}` or `{name:regex}` or `{*name}`
#[allow(clippy::expect_used)]
static VARIABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\{(\*)?([A-Za-z_][A-Za-z0-9_\-]*)(?::(.+))?\}$")
        .expect("path variable regex should be valid")
});

/// One compiled path segment
#[derive(Debug, Clone)]
pub enum Segment {
    /// Must equal the request segment
    Literal(String),
    /// Binds one segment, optionally constrained by a regex
    Variable {
        name: Arc<str>,
        constraint: Option<Regex>,
    },
    /// `*`: any single segment, not bound
    Wildcard,
    /// `**` or `{*name}`: the rest of the path (possibly empty); must be last
    CatchAll { name: Option<Arc<str>> },
}

impl Segment {
    pub fn is_literal(&self) -> bool {
        matches!(self, Segment::Literal(_))
    }
}

/// How specific a pattern is; greater is more specific
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PatternSpecificity {
    no_catch_all: bool,
    literals: usize,
    constrained: usize,
    variables: usize,
    fewer_wildcards: std::cmp::Reverse<usize>,
}

/// A compiled path pattern such as `/users/{id:\d+}/files/**`
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, MappingError> {
        let mut segments = Vec::new();
        let parts: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
        for (i, part) in parts.iter().enumerate() {
            let last = i + 1 == parts.len();
            let segment = if *part == "**" {
                Segment::CatchAll { name: None }
            } else if *part == "*" {
                Segment::Wildcard
            } else if let Some(caps) = VARIABLE.captures(part) {
                let name: Arc<str> = Arc::from(caps.get(2).map_or("", |m| m.as_str()));
                if caps.get(1).is_some() {
                    if caps.get(3).is_some() {
                        return Err(MappingError::InvalidPattern {
                            pattern: raw.to_string(),
                            reason: "catch-all variables cannot carry a constraint".to_string(),
                        });
                    }
                    Segment::CatchAll { name: Some(name) }
                } else {
                    let constraint = match caps.get(3) {
                        Some(re) => Some(
                            Regex::new(&format!("^(?:{})$", re.as_str())).map_err(|e| {
                                MappingError::InvalidPattern {
                                    pattern: raw.to_string(),
                                    reason: e.to_string(),
                                }
                            })?,
                        ),
                        None => None,
                    };
                    Segment::Variable { name, constraint }
                }
            } else if part.contains('{') || part.contains('}') || part.contains('*') {
                return Err(MappingError::InvalidPattern {
                    pattern: raw.to_string(),
                    reason: format!("unsupported segment '{}'", part),
                });
            } else {
                Segment::Literal((*part).to_string())
            };
            if matches!(segment, Segment::CatchAll { .. }) && !last {
                return Err(MappingError::InvalidPattern {
                    pattern: raw.to_string(),
                    reason: "catch-all must be the last segment".to_string(),
                });
            }
            segments.push(segment);
        }
        Ok(Self {
            raw: normalize(raw),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Match decoded request segments, returning bound variables
    pub fn matches(&self, path: &[String]) -> Option<ParamVec> {
        let mut params = ParamVec::new();
        let mut i = 0;
        for segment in &self.segments {
            match segment {
                Segment::CatchAll { name } => {
                    if let Some(name) = name {
                        let rest = path.get(i..).unwrap_or(&[]).join("/");
                        params.push((Arc::clone(name), rest));
                    }
                    return Some(params);
                }
                _ => {
                    let actual = path.get(i)?;
                    match segment {
                        Segment::Literal(lit) => {
                            if lit != actual {
                                return None;
                            }
                        }
                        Segment::Variable { name, constraint } => {
                            if let Some(re) = constraint {
                                if !re.is_match(actual) {
                                    return None;
                                }
                            }
                            params.push((Arc::clone(name), actual.clone()));
                        }
                        Segment::Wildcard | Segment::CatchAll { .. } => {}
                    }
                    i += 1;
                }
            }
        }
        (i == path.len()).then_some(params)
    }

    pub fn specificity(&self) -> PatternSpecificity {
        let mut rank = PatternSpecificity {
            no_catch_all: true,
            literals: 0,
            constrained: 0,
            variables: 0,
            fewer_wildcards: std::cmp::Reverse(0),
        };
        for segment in &self.segments {
            match segment {
                Segment::Literal(_) => rank.literals += 1,
                Segment::Variable { constraint, .. } => {
                    rank.variables += 1;
                    if constraint.is_some() {
                        rank.constrained += 1;
                    }
                }
                Segment::Wildcard => rank.fewer_wildcards.0 += 1,
                Segment::CatchAll { .. } => rank.no_catch_all = false,
            }
        }
        rank
    }

    /// Concatenate a parent and child pattern; an empty side yields the other
    pub fn join(parent: &str, child: &str) -> String {
        let p = parent.trim_end_matches('/');
        let c = child.trim_start_matches('/');
        match (p.is_empty(), c.is_empty()) {
            (true, true) => "/".to_string(),
            (true, false) => format!("/{}", c),
            (false, true) => normalize(p),
            (false, false) => normalize(&format!("{}/{}", p, c)),
        }
    }
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl PartialOrd for PathPattern {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.specificity().cmp(&other.specificity()))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn normalize(raw: &str) -> String {
    let trimmed = raw.trim_matches('/');
    format!("/{}", trimmed)
}

/// Split a request path into percent-decoded segments, collecting `;name=value` matrix
/// variables. Empty segments are skipped so `/users/` matches `/users`.
pub fn split_request_path(path: &str, segments: &mut Vec<String>, matrix: &mut ParamVec) {
    segments.clear();
    for raw in path.split('/').filter(|s| !s.is_empty()) {
        let mut parts = raw.split(';');
        let head = parts.next().unwrap_or("");
        for m in parts {
            let (k, v) = m.split_once('=').unwrap_or((m, ""));
            if !k.is_empty() {
                matrix.push((Arc::from(decode(k).as_str()), decode(v)));
            }
        }
        segments.push(decode(head));
    }
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(path: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut matrix = ParamVec::new();
        split_request_path(path, &mut out, &mut matrix);
        out
    }

    #[test]
    fn test_literal_and_variable() {
        let p = PathPattern::parse("/users/{id}").unwrap();
        let params = p.matches(&segs("/users/42")).unwrap();
        assert_eq!(params[0].0.as_ref(), "id");
        assert_eq!(params[0].1, "42");
        assert!(p.matches(&segs("/users")).is_none());
        assert!(p.matches(&segs("/users/42/extra")).is_none());
        assert!(p.matches(&segs("/accounts/42")).is_none());
    }

    #[test]
    fn test_constrained_variable() {
        let p = PathPattern::parse(r"/users/{id:\d+}").unwrap();
        assert!(p.matches(&segs("/users/42")).is_some());
        assert!(p.matches(&segs("/users/me")).is_none());
    }

    #[test]
    fn test_wildcards() {
        let single = PathPattern::parse("/files/*/meta").unwrap();
        assert!(single.matches(&segs("/files/a/meta")).is_some());
        assert!(single.matches(&segs("/files/a/b/meta")).is_none());

        let rest = PathPattern::parse("/static/{*path}").unwrap();
        let params = rest.matches(&segs("/static/css/site.css")).unwrap();
        assert_eq!(params[0].1, "css/site.css");
        let params = rest.matches(&segs("/static")).unwrap();
        assert_eq!(params[0].1, "");

        let anon = PathPattern::parse("/assets/**").unwrap();
        assert!(anon.matches(&segs("/assets/x/y/z")).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(PathPattern::parse("/a/**/b").is_err());
        assert!(PathPattern::parse("/file.{ext}").is_err());
        assert!(PathPattern::parse("/a/{id:(}").is_err());
        assert!(PathPattern::parse("/a/{*rest:.*}").is_err());
    }

    #[test]
    fn test_specificity_ordering() {
        let literal = PathPattern::parse("/users/me").unwrap();
        let constrained = PathPattern::parse(r"/users/{id:\d+}").unwrap();
        let variable = PathPattern::parse("/users/{id}").unwrap();
        let wildcard = PathPattern::parse("/users/*").unwrap();
        let catch_all = PathPattern::parse("/users/**").unwrap();
        assert!(literal.specificity() > constrained.specificity());
        assert!(constrained.specificity() > variable.specificity());
        assert!(variable.specificity() > wildcard.specificity());
        assert!(wildcard.specificity() > catch_all.specificity());
    }

    #[test]
    fn test_join() {
        assert_eq!(PathPattern::join("/api", "/users"), "/api/users");
        assert_eq!(PathPattern::join("/api/", "users/"), "/api/users");
        assert_eq!(PathPattern::join("", "/users"), "/users");
        assert_eq!(PathPattern::join("/api", ""), "/api");
        assert_eq!(PathPattern::join("", ""), "/");
    }

    #[test]
    fn test_split_request_path_decodes_and_extracts_matrix() {
        let mut out = Vec::new();
        let mut matrix = ParamVec::new();
        split_request_path("/cars;color=red;year=2012/hello%20world/", &mut out, &mut matrix);
        assert_eq!(out, vec!["cars".to_string(), "hello world".to_string()]);
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix[0].0.as_ref(), "color");
        assert_eq!(matrix[1].1, "2012");
    }
}
