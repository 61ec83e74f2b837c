use std::fmt;
use std::hash::{Hash, Hasher};

/// A node in the failure type hierarchy.
///
/// Kinds are `static` values linked to their parent, which gives every failure a
/// single-inheritance chain up to [`FAILURE`]. Exception mappers match on these kinds using the
/// number of parent hops as the distance. Equality and hashing use the name, so names must be
/// unique across the application.
///
/// Application kinds are declared with [`error_kind!`](crate::error_kind):
///
/// ```rust
/// use brrtdispatch::error_kind;
/// use brrtdispatch::exception::ILLEGAL_ARGUMENT;
///
/// error_kind!(pub INVALID_USER_ID = "InvalidUserId": ILLEGAL_ARGUMENT);
///
/// assert_eq!(INVALID_USER_ID.distance_to(&ILLEGAL_ARGUMENT), Some(1));
/// ```
pub struct ErrorKind {
    name: &'static str,
    parent: Option<&'static ErrorKind>,
}

impl ErrorKind {
    /// A kind with no parent. Only [`FAILURE`] should normally be a root.
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    pub const fn new(name: &'static str, parent: &'static ErrorKind) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static ErrorKind> {
        self.parent
    }

    /// Number of parent hops from `self` up to `ancestor`, or `None` if unrelated
    pub fn distance_to(&self, ancestor: &ErrorKind) -> Option<usize> {
        if self == ancestor {
            return Some(0);
        }
        let mut hops = 0;
        let mut current = self.parent;
        while let Some(kind) = current {
            hops += 1;
            if kind == ancestor {
                return Some(hops);
            }
            current = kind.parent;
        }
        None
    }

    /// Whether a failure of this kind can be handled by a mapper registered for `ancestor`
    pub fn is_a(&self, ancestor: &ErrorKind) -> bool {
        self.distance_to(ancestor).is_some()
    }

    /// Parent chain, nearest first, excluding `self`
    pub fn ancestors(&self) -> impl Iterator<Item = &'static ErrorKind> {
        std::iter::successors(self.parent, |k| k.parent)
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ErrorKind {}

impl Hash for ErrorKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Declare a `static` [`ErrorKind`] with a parent.
#[macro_export]
macro_rules! error_kind {
    ($(#[$meta:meta])* $vis:vis $ident:ident = $name:literal : $parent:path) => {
        $(#[$meta])*
        $vis static $ident: $crate::exception::ErrorKind =
            $crate::exception::ErrorKind::new($name, &$parent);
    };
}

/// Root of every failure
pub static FAILURE: ErrorKind = ErrorKind::root("Failure");

/// Failures raised by the dispatch machinery itself
pub static FRAMEWORK_FAILURE: ErrorKind = ErrorKind::new("FrameworkFailure", &FAILURE);
/// No route matched; carries a [`RouteMismatch`](crate::router::RouteMismatch)
pub static ROUTING_FAILURE: ErrorKind = ErrorKind::new("RoutingFailure", &FRAMEWORK_FAILURE);
/// A handler argument or body could not be produced
pub static RESOLUTION_FAILURE: ErrorKind =
    ErrorKind::new("ResolutionFailure", &FRAMEWORK_FAILURE);
pub static MISSING_REQUIRED_VALUE: ErrorKind =
    ErrorKind::new("MissingRequiredValue", &RESOLUTION_FAILURE);
pub static UNSUPPORTED_MEDIA_TYPE: ErrorKind =
    ErrorKind::new("UnsupportedMediaType", &RESOLUTION_FAILURE);
pub static NOT_ACCEPTABLE: ErrorKind = ErrorKind::new("NotAcceptable", &RESOLUTION_FAILURE);
pub static CONVERSION_FAILURE: ErrorKind =
    ErrorKind::new("ConversionFailure", &RESOLUTION_FAILURE);
/// A scheduler refused the task; carries a [`RejectReason`](crate::scheduler::RejectReason)
pub static SCHEDULING_FAILURE: ErrorKind =
    ErrorKind::new("SchedulingFailure", &FRAMEWORK_FAILURE);
/// A completion was dropped before it produced a value
pub static ABANDONED: ErrorKind = ErrorKind::new("Abandoned", &FRAMEWORK_FAILURE);

/// Failures raised by application handler code
pub static RUNTIME_FAILURE: ErrorKind = ErrorKind::new("RuntimeFailure", &FAILURE);
pub static ILLEGAL_ARGUMENT: ErrorKind = ErrorKind::new("IllegalArgument", &RUNTIME_FAILURE);
pub static ILLEGAL_STATE: ErrorKind = ErrorKind::new("IllegalState", &RUNTIME_FAILURE);
/// Handler code panicked; the panic payload becomes the message
pub static HANDLER_PANIC: ErrorKind = ErrorKind::new("HandlerPanic", &RUNTIME_FAILURE);

#[cfg(test)]
mod tests {
    use super::*;

    crate::error_kind!(NUMBER_FORMAT = "NumberFormat": ILLEGAL_ARGUMENT);

    #[test]
    fn test_distance() {
        assert_eq!(NUMBER_FORMAT.distance_to(&NUMBER_FORMAT), Some(0));
        assert_eq!(NUMBER_FORMAT.distance_to(&ILLEGAL_ARGUMENT), Some(1));
        assert_eq!(NUMBER_FORMAT.distance_to(&RUNTIME_FAILURE), Some(2));
        assert_eq!(NUMBER_FORMAT.distance_to(&FAILURE), Some(3));
        assert_eq!(NUMBER_FORMAT.distance_to(&FRAMEWORK_FAILURE), None);
        assert_eq!(RUNTIME_FAILURE.distance_to(&ILLEGAL_ARGUMENT), None);
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let names: Vec<&str> = MISSING_REQUIRED_VALUE.ancestors().map(|k| k.name()).collect();
        assert_eq!(
            names,
            vec!["ResolutionFailure", "FrameworkFailure", "Failure"]
        );
        assert_eq!(FAILURE.ancestors().count(), 0);
    }

    #[test]
    fn test_equality_by_name() {
        static SHADOW: ErrorKind = ErrorKind::root("IllegalArgument");
        assert_eq!(SHADOW, ILLEGAL_ARGUMENT);
        assert!(HANDLER_PANIC.is_a(&RUNTIME_FAILURE));
        assert!(!HANDLER_PANIC.is_a(&FRAMEWORK_FAILURE));
    }
}
