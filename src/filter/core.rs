use crate::completion::Completion;
use std::fmt;
use std::sync::Arc;

/// One link of a filter chain.
///
/// A filter receives the context and the rest of the chain. It continues by calling
/// [`Next::run`], short-circuits by returning a completion without calling it, and may be
/// asynchronous by chaining `next` onto a pending completion.
pub trait Filter<C: Send + 'static>: Send + Sync {
    fn filter(&self, ctx: C, next: Next<C>) -> Completion<C>;
}

/// The end of a chain: what runs once every filter has called `next`
pub type Terminal<C> = Arc<dyn Fn(C) -> Completion<C> + Send + Sync>;

/// Continuation handed to a filter. Owned and `'static`, so a filter may move it into a
/// completion callback.
pub struct Next<C: Send + 'static> {
    filters: Arc<[Arc<dyn Filter<C>>]>,
    index: usize,
    terminal: Terminal<C>,
}

impl<C: Send + 'static> Next<C> {
    /// Run the remaining filters and then the terminal
    pub fn run(self, ctx: C) -> Completion<C> {
        match self.filters.get(self.index) {
            Some(filter) => {
                let filter = Arc::clone(filter);
                let next = Next {
                    filters: self.filters,
                    index: self.index + 1,
                    terminal: self.terminal,
                };
                filter.filter(ctx, next)
            }
            None => (self.terminal)(ctx),
        }
    }

    /// Filters still to run before the terminal
    pub fn remaining(&self) -> usize {
        self.filters.len().saturating_sub(self.index)
    }
}

/// Ordered, immutable list of filters
pub struct FilterChain<C: Send + 'static> {
    filters: Arc<[Arc<dyn Filter<C>>]>,
}

impl<C: Send + 'static> FilterChain<C> {
    pub fn new(filters: Vec<Arc<dyn Filter<C>>>) -> Self {
        Self {
            filters: filters.into(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Drive `ctx` through every filter and then `terminal`
    pub fn run(&self, ctx: C, terminal: Terminal<C>) -> Completion<C> {
        Next {
            filters: Arc::clone(&self.filters),
            index: 0,
            terminal,
        }
        .run(ctx)
    }
}

impl<C: Send + 'static> Clone for FilterChain<C> {
    fn clone(&self) -> Self {
        Self {
            filters: Arc::clone(&self.filters),
        }
    }
}

impl<C: Send + 'static> Default for FilterChain<C> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<C: Send + 'static> fmt::Debug for FilterChain<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.filters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::pair;
    use parking_lot::Mutex;

    struct Push(&'static str, Arc<Mutex<Vec<&'static str>>>);

    impl Filter<Vec<&'static str>> for Push {
        fn filter(&self, mut ctx: Vec<&'static str>, next: Next<Vec<&'static str>>) -> Completion<Vec<&'static str>> {
            ctx.push(self.0);
            self.1.lock().push(self.0);
            next.run(ctx)
        }
    }

    struct Stop;

    impl Filter<Vec<&'static str>> for Stop {
        fn filter(&self, mut ctx: Vec<&'static str>, _next: Next<Vec<&'static str>>) -> Completion<Vec<&'static str>> {
            ctx.push("stop");
            Completion::ready(ctx)
        }
    }

    fn terminal() -> Terminal<Vec<&'static str>> {
        Arc::new(|mut ctx: Vec<&'static str>| {
            ctx.push("end");
            Completion::ready(ctx)
        })
    }

    #[test]
    fn test_filters_run_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain: FilterChain<Vec<&'static str>> = FilterChain::new(vec![
            Arc::new(Push("a", Arc::clone(&seen))),
            Arc::new(Push("b", Arc::clone(&seen))),
        ]);
        let out = chain.run(Vec::new(), terminal()).wait().unwrap();
        assert_eq!(out, vec!["a", "b", "end"]);
        assert_eq!(*seen.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_short_circuit_skips_rest() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain: FilterChain<Vec<&'static str>> = FilterChain::new(vec![
            Arc::new(Stop),
            Arc::new(Push("never", Arc::clone(&seen))),
        ]);
        let out = chain.run(Vec::new(), terminal()).wait().unwrap();
        assert_eq!(out, vec!["stop"]);
        assert!(seen.lock().is_empty());
    }

    struct Deferred(Arc<Mutex<Option<crate::completion::Completer<()>>>>);

    impl Filter<Vec<&'static str>> for Deferred {
        fn filter(&self, ctx: Vec<&'static str>, next: Next<Vec<&'static str>>) -> Completion<Vec<&'static str>> {
            let (completer, gate) = pair::<()>();
            *self.0.lock() = Some(completer);
            gate.and_then(move |()| next.run(ctx))
        }
    }

    #[test]
    fn test_async_filter_awaits_before_next() {
        let slot = Arc::new(Mutex::new(None));
        let chain: FilterChain<Vec<&'static str>> =
            FilterChain::new(vec![Arc::new(Deferred(Arc::clone(&slot)))]);
        let pending = chain.run(vec!["start"], terminal());
        assert!(!pending.is_done());
        let completer = slot.lock().take().unwrap();
        completer.succeed(());
        assert_eq!(pending.wait().unwrap(), vec!["start", "end"]);
    }
}
