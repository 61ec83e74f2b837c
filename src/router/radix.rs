//! Segment tree used to narrow the candidate set before predicates are evaluated.
//!
//! Every compiled path pattern is inserted by segment:
//! - literal segments (`users`) become literal children and match exactly
//! - `{name}`, `{name:re}` and `*` share a single dynamic child per node, since each consumes
//!   exactly one request segment
//! - `**` and `{*name}` register the pattern on the node itself as a catch-all, matching any
//!   remaining suffix including an empty one
//!
//! Lookup walks literal and dynamic children together and returns every pattern whose shape
//! fits the request. Regex constraints and variable binding are left to
//! [`PathPattern::matches`](crate::mapping::PathPattern::matches), so the tree never decides
//! a winner on its own.

use crate::mapping::{PathPattern, Segment};
use smallvec::SmallVec;
use std::borrow::Cow;

/// `(route index, pattern index within the route)`
pub(crate) type Candidate = (usize, usize);

pub(crate) type Candidates = SmallVec<[Candidate; 8]>;

#[derive(Debug, Clone)]
struct RadixNode {
    segment: Cow<'static, str>,
    /// Patterns ending exactly at this node
    terminals: Vec<Candidate>,
    /// Patterns with a catch-all at this depth
    catch_all: Vec<Candidate>,
    children: Vec<RadixNode>,
    dynamic: Option<Box<RadixNode>>,
}

impl RadixNode {
    fn new(segment: Cow<'static, str>) -> Self {
        Self {
            segment,
            terminals: Vec::new(),
            catch_all: Vec::new(),
            children: Vec::new(),
            dynamic: None,
        }
    }

    fn insert(&mut self, segments: &[Segment], candidate: Candidate) {
        let Some((first, remaining)) = segments.split_first() else {
            self.terminals.push(candidate);
            return;
        };
        match first {
            Segment::CatchAll { .. } => self.catch_all.push(candidate),
            Segment::Variable { .. } | Segment::Wildcard => self
                .dynamic
                .get_or_insert_with(|| Box::new(RadixNode::new(Cow::Borrowed("*"))))
                .insert(remaining, candidate),
            Segment::Literal(lit) => {
                if let Some(child) = self.children.iter_mut().find(|c| c.segment == lit.as_str()) {
                    child.insert(remaining, candidate);
                    return;
                }
                let mut child = RadixNode::new(Cow::Owned(lit.clone()));
                child.insert(remaining, candidate);
                self.children.push(child);
            }
        }
    }

    fn search(&self, segments: &[String], out: &mut Candidates) {
        out.extend(self.catch_all.iter().copied());
        let Some((first, remaining)) = segments.split_first() else {
            out.extend(self.terminals.iter().copied());
            return;
        };
        if let Some(child) = self.children.iter().find(|c| c.segment == first.as_str()) {
            child.search(remaining, out);
        }
        if let Some(dynamic) = &self.dynamic {
            dynamic.search(remaining, out);
        }
    }
}

/// Structural index over every pattern in a registry
#[derive(Debug, Clone)]
pub(crate) struct RadixIndex {
    root: RadixNode,
}

impl RadixIndex {
    pub(crate) fn new() -> Self {
        Self {
            root: RadixNode::new(Cow::Borrowed("")),
        }
    }

    pub(crate) fn insert(&mut self, pattern: &PathPattern, candidate: Candidate) {
        self.root.insert(pattern.segments(), candidate);
    }

    /// Candidates in registration order, without duplicates
    pub(crate) fn candidates(&self, segments: &[String]) -> Candidates {
        let mut out = Candidates::new();
        self.root.search(segments, &mut out);
        out.sort_unstable();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(patterns: &[&str]) -> RadixIndex {
        let mut index = RadixIndex::new();
        for (i, p) in patterns.iter().enumerate() {
            index.insert(&PathPattern::parse(p).unwrap(), (i, 0));
        }
        index
    }

    fn segs(path: &str) -> Vec<String> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn routes(c: Candidates) -> Vec<usize> {
        c.into_iter().map(|(r, _)| r).collect()
    }

    #[test]
    fn test_literal_and_dynamic_children_both_searched() {
        let idx = index(&["/users/me", "/users/{id}", "/users/{id}/posts", "/health"]);
        assert_eq!(routes(idx.candidates(&segs("/users/me"))), vec![0, 1]);
        assert_eq!(routes(idx.candidates(&segs("/users/42"))), vec![1]);
        assert_eq!(routes(idx.candidates(&segs("/users/42/posts"))), vec![2]);
        assert_eq!(routes(idx.candidates(&segs("/health"))), vec![3]);
        assert!(idx.candidates(&segs("/nothing")).is_empty());
    }

    #[test]
    fn test_catch_all_matches_any_suffix() {
        let idx = index(&["/static/**", "/static/{*rest}", "/static/index.html"]);
        assert_eq!(routes(idx.candidates(&segs("/static"))), vec![0, 1]);
        assert_eq!(routes(idx.candidates(&segs("/static/a/b/c"))), vec![0, 1]);
        assert_eq!(
            routes(idx.candidates(&segs("/static/index.html"))),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_root_pattern() {
        let idx = index(&["/", "/**"]);
        assert_eq!(routes(idx.candidates(&[])), vec![0, 1]);
        assert_eq!(routes(idx.candidates(&segs("/x"))), vec![1]);
    }
}
