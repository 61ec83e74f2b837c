//! Structured logging setup for processes embedding the dispatcher
//!
//! The library itself only emits `tracing` events and spans. Hosts call [`init_logging`]
//! (or [`init_logging_with_config`]) once at startup to install a subscriber:
//!
//! - `json`, `pretty` or `compact` line format
//! - stdout, stderr or a daily-rolling file as the sink
//! - optional non-blocking writer through `tracing-appender`
//! - volume control for routine events: keep all, keep warnings only, or keep every Nth
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `BRRTD_LOG_LEVEL` | `info` | base level when `RUST_LOG` is unset |
//! | `BRRTD_LOG_FORMAT` | `json` | `json`, `pretty`, `compact` |
//! | `BRRTD_LOG_OUTPUT` | `stdout` | `stdout`, `stderr`, or a directory for rolling files |
//! | `BRRTD_LOG_SAMPLING` | `all` | `all`, `warn-only`, `sampled` |
//! | `BRRTD_LOG_SAMPLE_EVERY` | `10` | keep one routine event out of N when sampled |
//! | `BRRTD_LOG_ASYNC` | `true` | buffer writes on a background thread |
//! | `BRRTD_LOG_DIRECTIVES` | | extra comma-separated directives, e.g. `brrtdispatch::router=trace` |
//! | `BRRTD_LOG_LOCATION` | `false` | include `file:line` |

use anyhow::{Context, Result};
use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::subscriber::Interest;
use tracing::{Level, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Unknown values fall back to JSON
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" | "text" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Where formatted lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily-rolling files named `brrtdispatch.log.YYYY-MM-DD` in this directory
    Directory(PathBuf),
}

impl LogOutput {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "" | "stdout" => LogOutput::Stdout,
            "stderr" => LogOutput::Stderr,
            dir => LogOutput::Directory(PathBuf::from(dir)),
        }
    }
}

/// Which routine (below WARN) events survive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampling {
    All,
    WarnOnly,
    /// Keep one routine event out of `n`; warnings and errors are always kept
    EveryNth(u64),
}

impl Sampling {
    pub fn parse(mode: &str, every: u64) -> Self {
        match mode.trim().to_ascii_lowercase().as_str() {
            "warn-only" | "warn_only" | "error-only" | "error_only" => Sampling::WarnOnly,
            "sampled" => Sampling::EveryNth(every.max(1)),
            _ => Sampling::All,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    pub sampling: Sampling,
    pub non_blocking: bool,
    pub directives: Vec<String>,
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            sampling: Sampling::All,
            non_blocking: true,
            directives: Vec::new(),
            include_location: false,
        }
    }
}

impl LogConfig {
    /// Read `BRRTD_LOG_*`; unset or malformed values keep their defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let flag = |name: &str, default: bool| {
            env::var(name)
                .ok()
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(default)
        };
        let every = env::var("BRRTD_LOG_SAMPLE_EVERY")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);
        Self {
            level: env::var("BRRTD_LOG_LEVEL")
                .ok()
                .and_then(|v| parse_level(&v))
                .unwrap_or(defaults.level),
            format: env::var("BRRTD_LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.format),
            output: env::var("BRRTD_LOG_OUTPUT")
                .map(|v| LogOutput::parse(&v))
                .unwrap_or(defaults.output),
            sampling: env::var("BRRTD_LOG_SAMPLING")
                .map(|v| Sampling::parse(&v, every))
                .unwrap_or(defaults.sampling),
            non_blocking: flag("BRRTD_LOG_ASYNC", defaults.non_blocking),
            directives: env::var("BRRTD_LOG_DIRECTIVES")
                .map(|v| split_directives(&v))
                .unwrap_or_default(),
            include_location: flag("BRRTD_LOG_LOCATION", defaults.include_location),
        }
    }

    /// Human-readable, synchronous, everything at DEBUG
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Pretty,
            non_blocking: false,
            include_location: true,
            ..Self::default()
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str()));
        for directive in &self.directives {
            match directive.parse() {
                Ok(d) => filter = filter.add_directive(d),
                Err(e) => eprintln!("Ignoring log directive '{}': {}", directive, e),
            }
        }
        filter
    }
}

fn parse_level(s: &str) -> Option<Level> {
    s.trim().parse().ok()
}

fn split_directives(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

/// Drops routine events according to a [`Sampling`] policy
pub struct SamplingLayer {
    sampling: Sampling,
    seen: AtomicU64,
}

impl SamplingLayer {
    pub fn new(sampling: Sampling) -> Self {
        Self {
            sampling,
            seen: AtomicU64::new(0),
        }
    }

    fn keep(&self, metadata: &Metadata<'_>) -> bool {
        // Spans always pass so request fields stay attached to kept events
        metadata.is_span() || self.keep_event(*metadata.level())
    }

    fn keep_event(&self, level: Level) -> bool {
        if level <= Level::WARN {
            return true;
        }
        match self.sampling {
            Sampling::All => true,
            Sampling::WarnOnly => false,
            Sampling::EveryNth(n) => self.seen.fetch_add(1, Ordering::Relaxed) % n == 0,
        }
    }
}

impl<S> Layer<S> for SamplingLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    // Decisions vary per event, so callsites must not cache them
    fn register_callsite(&self, _metadata: &'static Metadata<'static>) -> Interest {
        Interest::sometimes()
    }

    fn enabled(&self, metadata: &Metadata<'_>, _ctx: LayerContext<'_, S>) -> bool {
        self.keep(metadata)
    }
}

fn fmt_layer<S, W>(config: &LogConfig, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_writer(writer);
    match config.format {
        LogFormat::Json => base
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_thread_ids(true)
            .boxed(),
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Compact => base.compact().boxed(),
    }
}

/// Install the global subscriber described by `config`.
///
/// With `non_blocking` the returned guard flushes buffered lines when dropped; hold it until
/// the process exits.
///
/// ```no_run
/// use brrtdispatch::logging::{init_logging_with_config, LogConfig};
///
/// let _guard = init_logging_with_config(&LogConfig::development()).expect("logging");
/// ```
pub fn init_logging_with_config(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let (writer, guard) = match (&config.output, config.non_blocking) {
        (LogOutput::Stdout, false) => (fmt_writer(io::stdout), None),
        (LogOutput::Stderr, false) => (fmt_writer(io::stderr), None),
        (LogOutput::Stdout, true) => {
            let (w, g) = tracing_appender::non_blocking(io::stdout());
            (fmt_writer(w), Some(g))
        }
        (LogOutput::Stderr, true) => {
            let (w, g) = tracing_appender::non_blocking(io::stderr());
            (fmt_writer(w), Some(g))
        }
        (LogOutput::Directory(dir), non_blocking) => {
            let rolling = tracing_appender::rolling::daily(dir, "brrtdispatch.log");
            if non_blocking {
                let (w, g) = tracing_appender::non_blocking(rolling);
                (fmt_writer(w), Some(g))
            } else {
                (fmt_writer(rolling), None)
            }
        }
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(SamplingLayer::new(config.sampling))
        .with(fmt_layer(config, writer))
        .try_init()
        .with_context(|| format!("installing {:?} subscriber", config.format))?;
    Ok(guard)
}

/// [`init_logging_with_config`] with [`LogConfig::from_env`]
pub fn init_logging() -> Result<Option<WorkerGuard>> {
    init_logging_with_config(&LogConfig::from_env())
}

type BoxedWriter = tracing_subscriber::fmt::writer::BoxMakeWriter;

fn fmt_writer<W>(writer: W) -> BoxedWriter
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    BoxedWriter::new(writer)
}
