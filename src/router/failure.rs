use http::Method;
use std::fmt;

/// Why a request did not match any route.
///
/// Variants are declared in predicate evaluation order; a later variant means the request got
/// further through a candidate's predicates, which makes it the more useful reason to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RouteFailure {
    PatternMismatch,
    MethodMismatch,
    ParamMismatch,
    HeaderMismatch,
    ConsumesMismatch,
    ProducesMismatch,
}

impl RouteFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteFailure::PatternMismatch => "PATTERN_MISMATCH",
            RouteFailure::MethodMismatch => "METHOD_MISMATCH",
            RouteFailure::ParamMismatch => "PARAM_MISMATCH",
            RouteFailure::HeaderMismatch => "HEADER_MISMATCH",
            RouteFailure::ConsumesMismatch => "CONSUMES_MISMATCH",
            RouteFailure::ProducesMismatch => "PRODUCES_MISMATCH",
        }
    }

    /// Status the internal exception mapper writes for this reason
    pub fn status(&self) -> u16 {
        match self {
            RouteFailure::PatternMismatch => 404,
            RouteFailure::MethodMismatch => 405,
            RouteFailure::ParamMismatch | RouteFailure::HeaderMismatch => 400,
            RouteFailure::ConsumesMismatch => 415,
            RouteFailure::ProducesMismatch => 406,
        }
    }
}

impl fmt::Display for RouteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing failure signal: the mismatch reason plus the request it was computed for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMismatch {
    pub reason: RouteFailure,
    pub method: Method,
    pub path: String,
    /// Methods of routes whose path matched, for an `Allow` header on 405
    pub allowed_methods: Vec<Method>,
}

impl RouteMismatch {
    pub fn new(reason: RouteFailure, method: Method, path: impl Into<String>) -> Self {
        Self {
            reason,
            method,
            path: path.into(),
            allowed_methods: Vec::new(),
        }
    }
}

impl fmt::Display for RouteMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {} {}", self.reason, self.method, self.path)
    }
}

impl std::error::Error for RouteMismatch {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons_are_ranked_by_evaluation_order() {
        assert!(RouteFailure::ProducesMismatch > RouteFailure::ConsumesMismatch);
        assert!(RouteFailure::ConsumesMismatch > RouteFailure::HeaderMismatch);
        assert!(RouteFailure::MethodMismatch > RouteFailure::PatternMismatch);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(RouteFailure::PatternMismatch.status(), 404);
        assert_eq!(RouteFailure::MethodMismatch.status(), 405);
        assert_eq!(RouteFailure::ParamMismatch.status(), 400);
        assert_eq!(RouteFailure::ConsumesMismatch.status(), 415);
        assert_eq!(RouteFailure::ProducesMismatch.status(), 406);
    }
}
