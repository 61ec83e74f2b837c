//! # Router Module
//!
//! Route selection for incoming requests.
//!
//! ## Overview
//!
//! A [`RouteRegistry`] holds routes compiled from [`Mapping`](crate::mapping::Mapping)s.
//! For each request it:
//!
//! 1. Decodes the path into segments (percent-decoding, splitting off `;k=v` matrix
//!    variables) using the caller's [`Scratch`](crate::scheduler::Scratch)
//! 2. Collects candidate patterns from a segment tree (literal children, one dynamic child,
//!    catch-all lists)
//! 3. Evaluates each candidate's predicates in order: method, params, headers, consumes,
//!    produces
//! 4. Picks the winner among full matches: most specific path, then most declared
//!    predicates, then first registered
//!
//! When nothing matches, the reported [`RouteFailure`] is the furthest step any candidate
//! reached, so a request whose path and method matched but whose `Content-Type` did not
//! surfaces as `CONSUMES_MISMATCH` (415) rather than a blanket 404.
//!
//! ## Example
//!
//! ```rust
//! use brrtdispatch::http::RequestContext;
//! use brrtdispatch::mapping::Mapping;
//! use brrtdispatch::router::{RouteFailure, RouteRegistry};
//! use http::Method;
//!
//! let registry = RouteRegistry::builder()
//!     .route(Mapping::get("/users/{id}"), "show_user")
//!     .build()
//!     .unwrap();
//!
//! let m = registry.route(&RequestContext::new(Method::GET, "/users/42")).unwrap();
//! assert_eq!(*m.target, "show_user");
//! assert_eq!(m.get_path_param("id"), Some("42"));
//!
//! let miss = registry.route(&RequestContext::new(Method::POST, "/users/42")).unwrap_err();
//! assert_eq!(miss.reason, RouteFailure::MethodMismatch);
//! ```

mod core;
mod failure;
mod radix;

pub use core::{Route, RouteMatch, RouteRegistry, RouteRegistryBuilder};
pub use failure::{RouteFailure, RouteMismatch};
