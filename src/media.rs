//! Media types for `Content-Type` / `Accept` handling
//!
//! Used by the route registry for `consumes` / `produces` predicates and by the resolver
//! framework for body and response negotiation.

use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_YAML: &str = "application/yaml";
pub const TEXT_PLAIN: &str = "text/plain";
pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";

/// Error returned when a media type string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid media type '{0}'")]
pub struct MediaTypeError(pub String);

/// A parsed `type/subtype;param=value` media type
#[derive(Debug, Clone, PartialEq)]
pub struct MediaType {
    main: String,
    sub: String,
    params: SmallVec<[(String, String); 2]>,
    quality: f32,
}

impl MediaType {
    /// Parse a media type such as `application/json; charset=utf-8` or `text/*;q=0.5`.
    ///
    /// A bare `*` is accepted as `*/*`.
    pub fn parse(raw: &str) -> Result<Self, MediaTypeError> {
        let mut parts = raw.split(';');
        let essence = parts.next().unwrap_or("").trim();
        let (main, sub) = if essence == "*" {
            ("*", "*")
        } else {
            essence
                .split_once('/')
                .ok_or_else(|| MediaTypeError(raw.to_string()))?
        };
        let main = main.trim().to_ascii_lowercase();
        let sub = sub.trim().to_ascii_lowercase();
        if main.is_empty() || sub.is_empty() || (main == "*" && sub != "*") {
            return Err(MediaTypeError(raw.to_string()));
        }

        let mut params = SmallVec::new();
        let mut quality = 1.0;
        for part in parts {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (k, v) = part
                .split_once('=')
                .ok_or_else(|| MediaTypeError(raw.to_string()))?;
            let k = k.trim().to_ascii_lowercase();
            let v = v.trim().trim_matches('"').to_string();
            if k == "q" {
                quality = v
                    .parse::<f32>()
                    .ok()
                    .filter(|q| (0.0..=1.0).contains(q))
                    .ok_or_else(|| MediaTypeError(raw.to_string()))?;
            } else {
                params.push((k, v));
            }
        }

        Ok(Self {
            main,
            sub,
            params,
            quality,
        })
    }

    pub fn all() -> Self {
        Self::of("*", "*")
    }

    pub fn json() -> Self {
        Self::of("application", "json")
    }

    pub fn yaml() -> Self {
        Self::of("application", "yaml")
    }

    pub fn text_plain() -> Self {
        Self::of("text", "plain")
    }

    pub fn octet_stream() -> Self {
        Self::of("application", "octet-stream")
    }

    fn of(main: &str, sub: &str) -> Self {
        Self {
            main: main.to_string(),
            sub: sub.to_string(),
            params: SmallVec::new(),
            quality: 1.0,
        }
    }

    /// Map a short format name (as used by the negotiation query parameter) to a media type
    pub fn from_short_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Some(Self::json()),
            "yaml" | "yml" => Some(Self::yaml()),
            "text" | "txt" | "plain" => Some(Self::text_plain()),
            _ => None,
        }
    }

    pub fn main_type(&self) -> &str {
        &self.main
    }

    pub fn sub_type(&self) -> &str {
        &self.sub
    }

    /// `type/subtype` without parameters
    pub fn essence(&self) -> String {
        format!("{}/{}", self.main, self.sub)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn is_wildcard_type(&self) -> bool {
        self.main == "*"
    }

    pub fn is_wildcard_subtype(&self) -> bool {
        self.sub == "*" || self.sub.starts_with("*+")
    }

    /// Structured syntax suffix, e.g. `json` for `application/vnd.api+json`
    fn suffix(&self) -> Option<&str> {
        self.sub.rsplit_once('+').map(|(_, s)| s)
    }

    /// Whether this (possibly wildcard) type includes `other`.
    ///
    /// `*/*` includes everything, `text/*` includes `text/plain`, and
    /// `application/*+json` includes `application/vnd.api+json`.
    pub fn includes(&self, other: &MediaType) -> bool {
        if self.is_wildcard_type() {
            return true;
        }
        if self.main != other.main {
            return false;
        }
        if self.sub == other.sub || self.sub == "*" {
            return true;
        }
        if let Some(suffix) = self.sub.strip_prefix("*+") {
            return other.suffix() == Some(suffix);
        }
        false
    }

    /// Symmetric inclusion check
    pub fn is_compatible_with(&self, other: &MediaType) -> bool {
        self.includes(other) || other.includes(self)
    }

    /// Ordering key: concrete types before wildcards, more parameters before fewer
    fn specificity(&self) -> (u8, u8, usize) {
        (
            u8::from(!self.is_wildcard_type()),
            u8::from(!self.is_wildcard_subtype()),
            self.params.len(),
        )
    }

    /// Copy of this type without `q` or other parameters, for writing a `Content-Type`
    pub fn without_params(&self) -> Self {
        Self::of(&self.main, &self.sub)
    }

    /// The concrete type to write when negotiation picked `self` against `other`
    pub fn most_specific<'a>(&'a self, other: &'a MediaType) -> &'a MediaType {
        if self.specificity() >= other.specificity() {
            self
        } else {
            other
        }
    }
}

impl FromStr for MediaType {
    type Err = MediaTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main, self.sub)?;
        for (k, v) in &self.params {
            write!(f, ";{}={}", k, v)?;
        }
        Ok(())
    }
}

/// Parse an `Accept` header into media types ordered by preference.
///
/// Entries are sorted by quality (highest first) and then by specificity; unparsable entries
/// are skipped. An absent or empty header means `*/*`.
pub fn parse_accept(header: Option<&str>) -> Vec<MediaType> {
    let mut types: Vec<MediaType> = header
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| MediaType::parse(s).ok())
        .collect();
    if types.is_empty() {
        return vec![MediaType::all()];
    }
    types.sort_by(|a, b| {
        b.quality
            .partial_cmp(&a.quality)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.specificity().cmp(&a.specificity()))
    });
    types
}

/// Whether `accept` explicitly refuses `candidate`: the most specific entry that includes
/// it carries `q=0`. `application/json;q=0, */*` refuses JSON but nothing else.
pub fn refuses(accept: &[MediaType], candidate: &MediaType) -> bool {
    accept
        .iter()
        .filter(|a| a.includes(candidate))
        .max_by_key(|a| a.specificity())
        .map_or(false, |a| a.quality() <= 0.0)
}

/// Requested response types for one request.
///
/// A negotiation parameter value (`?format=yaml`) wins over the `Accept` header; an unknown
/// short name yields an empty list, which no `produces` condition or serializer satisfies.
pub fn negotiate_accept(format: Option<&str>, accept: Option<&str>) -> Vec<MediaType> {
    match format {
        Some(name) => MediaType::from_short_name(name).into_iter().collect(),
        None => parse_accept(accept),
    }
}
