use super::MappingError;
use crate::media::MediaType;
use std::fmt;

/// `name`, `!name`, `name=value` or `name!=value`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameValuePredicate {
    name: String,
    value: Option<String>,
    negated: bool,
}

impl NameValuePredicate {
    pub fn parse(expr: &str) -> Result<Self, MappingError> {
        let expr = expr.trim();
        let invalid = || MappingError::InvalidPredicate(expr.to_string());
        let predicate = if let Some((name, value)) = expr.split_once("!=") {
            Self {
                name: name.trim().to_string(),
                value: Some(value.trim().to_string()),
                negated: true,
            }
        } else if let Some((name, value)) = expr.split_once('=') {
            Self {
                name: name.trim().to_string(),
                value: Some(value.trim().to_string()),
                negated: false,
            }
        } else if let Some(name) = expr.strip_prefix('!') {
            Self {
                name: name.trim().to_string(),
                value: None,
                negated: true,
            }
        } else {
            Self {
                name: expr.to_string(),
                value: None,
                negated: false,
            }
        };
        if predicate.name.is_empty() || predicate.name.starts_with('!') {
            return Err(invalid());
        }
        Ok(predicate)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Whether `actual` (the request's value for this name, if any) satisfies the predicate.
    /// `name!=value` is satisfied by an absent value.
    pub fn matches(&self, actual: Option<&str>) -> bool {
        match (&self.value, self.negated) {
            (None, false) => actual.is_some(),
            (None, true) => actual.is_none(),
            (Some(v), false) => actual == Some(v.as_str()),
            (Some(v), true) => actual != Some(v.as_str()),
        }
    }

    pub(crate) fn names_header(&self, header: &str) -> bool {
        self.name.eq_ignore_ascii_case(header)
    }
}

impl fmt::Display for NameValuePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.value, self.negated) {
            (None, false) => write!(f, "{}", self.name),
            (None, true) => write!(f, "!{}", self.name),
            (Some(v), false) => write!(f, "{}={}", self.name, v),
            (Some(v), true) => write!(f, "{}!={}", self.name, v),
        }
    }
}

/// A media type in `consumes`/`produces`, possibly negated (`!text/plain`)
#[derive(Debug, Clone, PartialEq)]
pub struct MediaTypeExpr {
    pub media: MediaType,
    pub negated: bool,
}

impl MediaTypeExpr {
    pub fn parse(expr: &str) -> Result<Self, MappingError> {
        let expr = expr.trim();
        let (raw, negated) = match expr.strip_prefix('!') {
            Some(rest) => (rest, true),
            None => (expr, false),
        };
        let media = MediaType::parse(raw)
            .map_err(|e| MappingError::InvalidMediaType(format!("{}: {}", expr, e)))?;
        Ok(Self { media, negated })
    }

    /// Parse a header predicate value; `Accept=a/b, c/d` expands to several expressions
    pub fn parse_list(value: &str) -> Result<Vec<Self>, MappingError> {
        value
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(Self::parse)
            .collect()
    }
}

impl fmt::Display for MediaTypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("!")?;
        }
        write!(f, "{}", self.media)
    }
}

/// Compiled `consumes` condition, checked against the request `Content-Type`
#[derive(Debug, Clone, Default)]
pub struct ConsumesCondition {
    exprs: Vec<MediaTypeExpr>,
}

impl ConsumesCondition {
    pub fn new(exprs: Vec<MediaTypeExpr>) -> Self {
        Self { exprs }
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    /// An absent `Content-Type` is treated as `application/octet-stream`; an unparsable one
    /// never matches a non-empty condition.
    pub fn matches(&self, content_type: Option<&str>) -> bool {
        if self.exprs.is_empty() {
            return true;
        }
        let actual = match content_type {
            Some(raw) => match MediaType::parse(raw) {
                Ok(m) => m,
                Err(_) => return false,
            },
            None => MediaType::octet_stream(),
        };
        let mut positives = 0;
        let mut positive_hit = false;
        for expr in &self.exprs {
            if expr.negated {
                if expr.media.includes(&actual) {
                    return false;
                }
            } else {
                positives += 1;
                positive_hit |= expr.media.includes(&actual);
            }
        }
        positives == 0 || positive_hit
    }
}

/// Compiled `produces` condition, checked against the negotiated `Accept` list
#[derive(Debug, Clone, Default)]
pub struct ProducesCondition {
    exprs: Vec<MediaTypeExpr>,
}

impl ProducesCondition {
    pub fn new(exprs: Vec<MediaTypeExpr>) -> Self {
        Self { exprs }
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    /// Positive media types the route declares it can write
    pub fn producible(&self) -> impl Iterator<Item = &MediaType> {
        self.exprs.iter().filter(|e| !e.negated).map(|e| &e.media)
    }

    /// `accept` is the request's acceptable types, best first. Entries with `q=0` are
    /// ignored; a negated type only excludes concrete accepted types.
    pub fn matches(&self, accept: &[MediaType]) -> bool {
        if self.exprs.is_empty() {
            return true;
        }
        let has_positive = self.exprs.iter().any(|e| !e.negated);
        accept.iter().filter(|a| a.quality() > 0.0).any(|a| {
            let excluded = self
                .exprs
                .iter()
                .any(|e| e.negated && !a.is_wildcard_type() && e.media.includes(a));
            if excluded {
                return false;
            }
            !has_positive || self.producible().any(|p| p.is_compatible_with(a))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::parse_accept;

    #[test]
    fn test_name_value_forms() {
        let present = NameValuePredicate::parse("debug").unwrap();
        assert!(present.matches(Some("")));
        assert!(!present.matches(None));

        let absent = NameValuePredicate::parse("!debug").unwrap();
        assert!(absent.matches(None));
        assert!(!absent.matches(Some("1")));

        let equals = NameValuePredicate::parse("mode=fast").unwrap();
        assert!(equals.matches(Some("fast")));
        assert!(!equals.matches(Some("slow")));
        assert!(!equals.matches(None));

        let differs = NameValuePredicate::parse("mode!=fast").unwrap();
        assert!(differs.matches(Some("slow")));
        assert!(differs.matches(None));
        assert!(!differs.matches(Some("fast")));
        assert_eq!(differs.to_string(), "mode!=fast");
    }

    #[test]
    fn test_invalid_predicates() {
        assert!(NameValuePredicate::parse("").is_err());
        assert!(NameValuePredicate::parse("!").is_err());
        assert!(NameValuePredicate::parse("=value").is_err());
        assert!(MediaTypeExpr::parse("json").is_err());
    }

    #[test]
    fn test_consumes() {
        let json = ConsumesCondition::new(vec![MediaTypeExpr::parse("application/json").unwrap()]);
        assert!(json.matches(Some("application/json; charset=utf-8")));
        assert!(!json.matches(Some("text/plain")));
        assert!(!json.matches(None));
        assert!(!json.matches(Some("garbage")));

        let not_text = ConsumesCondition::new(vec![MediaTypeExpr::parse("!text/plain").unwrap()]);
        assert!(not_text.matches(Some("application/json")));
        assert!(!not_text.matches(Some("text/plain")));

        assert!(ConsumesCondition::default().matches(Some("anything/else")));
    }

    #[test]
    fn test_produces() {
        let json = ProducesCondition::new(vec![MediaTypeExpr::parse("application/json").unwrap()]);
        assert!(json.matches(&parse_accept(Some("application/json"))));
        assert!(json.matches(&parse_accept(None)));
        assert!(json.matches(&parse_accept(Some("text/html, application/*;q=0.5"))));
        assert!(!json.matches(&parse_accept(Some("text/html"))));
        assert!(!json.matches(&parse_accept(Some("application/json;q=0"))));

        let not_text = ProducesCondition::new(vec![MediaTypeExpr::parse("!text/plain").unwrap()]);
        assert!(not_text.matches(&parse_accept(Some("*/*"))));
        assert!(!not_text.matches(&parse_accept(Some("text/plain"))));
    }
}
