use crate::utils::error::{BizError, Result};
use crate::utils::rotation::{SizeRotatingFile, DEFAULT_BACKUP_COUNT, DEFAULT_MAX_BYTES};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{Event, Level, Metadata, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::{FmtContext, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

pub const DEFAULT_LOGGER_NAME: &str = "biztools";
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Maps a level name (case-insensitive) to a tracing level, falling back to INFO.
pub fn parse_log_level(value: &str) -> Level {
    match value.trim().to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "INFO" => Level::INFO,
        "WARNING" | "WARN" => Level::WARN,
        "ERROR" | "CRITICAL" => Level::ERROR,
        _ => Level::INFO,
    }
}

pub fn log_level_from_env() -> Level {
    std::env::var("LOG_LEVEL")
        .map(|value| parse_log_level(&value))
        .unwrap_or(Level::INFO)
}

pub fn log_dir_from_env() -> PathBuf {
    std::env::var("LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR))
}

/// Describes a logger that has been set up for this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerHandle {
    pub name: String,
    pub level: Level,
    pub log_file: PathBuf,
}

struct LoggerState {
    loggers: HashMap<String, LoggerHandle>,
    filter: Option<reload::Handle<EnvFilter, Registry>>,
    guards: Vec<WorkerGuard>,
}

static STATE: Lazy<Mutex<LoggerState>> = Lazy::new(|| {
    Mutex::new(LoggerState {
        loggers: HashMap::new(),
        filter: None,
        guards: Vec::new(),
    })
});

static ROUTER: Lazy<FileRouter> = Lazy::new(FileRouter::default);

/// Sets up the named logger with `LOG_DIR` (default `logs`) as its file directory.
pub fn setup_logger(name: &str, level: Level) -> Result<LoggerHandle> {
    setup_logger_in(name, level, &log_dir_from_env())
}

/// Sets up the process-wide logger `name`: stdout plus `<log_dir>/<name>.log`.
///
/// Calling this again for a name that is already set up returns the existing
/// handle without adding another writer. The global subscriber is installed by
/// the first call; later names only extend the level filter and the file routes.
pub fn setup_logger_in(name: &str, level: Level, log_dir: &Path) -> Result<LoggerHandle> {
    let mut state = STATE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(existing) = state.loggers.get(name) {
        return Ok(existing.clone());
    }

    std::fs::create_dir_all(log_dir)?;
    let log_file = log_dir.join(format!("{}.log", name));
    let file = SizeRotatingFile::open(&log_file, DEFAULT_MAX_BYTES, DEFAULT_BACKUP_COUNT)?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let handle = LoggerHandle {
        name: name.to_string(),
        level,
        log_file,
    };

    // Nothing is registered until the subscriber accepts the new filter.
    let filter = build_filter(state.loggers.values().chain(std::iter::once(&handle)));
    match state.filter.clone() {
        Some(reload_handle) => reload_handle.reload(filter).map_err(|e| BizError::LoggerError {
            message: format!("failed to update log filter: {}", e),
        })?,
        None => {
            let (filter_layer, reload_handle) = reload::Layer::new(filter);
            let json_stdout = std::env::var("LOG_FORMAT")
                .map(|format| format.eq_ignore_ascii_case("json"))
                .unwrap_or(false);

            tracing_subscriber::registry()
                .with(filter_layer)
                .with((!json_stdout).then(|| {
                    tracing_subscriber::fmt::layer()
                        .event_format(DashFormat)
                        .with_writer(io::stdout)
                }))
                .with(json_stdout.then(|| {
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(io::stdout)
                }))
                .with(
                    tracing_subscriber::fmt::layer()
                        .event_format(DashFormat)
                        .with_ansi(false)
                        .with_writer(ROUTER.clone()),
                )
                .try_init()
                .map_err(|e| BizError::LoggerError {
                    message: format!("failed to install global subscriber: {}", e),
                })?;
            state.filter = Some(reload_handle);
        }
    }

    ROUTER.add_route(target_prefix(name), writer);
    state.loggers.insert(name.to_string(), handle.clone());
    state.guards.push(guard);

    Ok(handle)
}

/// Sets up the crate's default logger from `LOG_LEVEL` and `LOG_DIR`.
pub fn init_default_logger() -> Result<LoggerHandle> {
    setup_logger(DEFAULT_LOGGER_NAME, log_level_from_env())
}

fn target_prefix(name: &str) -> String {
    name.replace('.', "::")
}

fn build_filter<'a>(loggers: impl Iterator<Item = &'a LoggerHandle>) -> EnvFilter {
    let directives = loggers
        .map(|logger| {
            format!(
                "{}={}",
                target_prefix(&logger.name),
                logger.level.as_str().to_lowercase()
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::new(directives)
}

fn matches_target(target: &str, prefix: &str) -> bool {
    target == prefix
        || target
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with("::"))
}

/// Sends each event to the file of the most specific logger owning its target.
#[derive(Clone, Default)]
struct FileRouter {
    routes: Arc<RwLock<Vec<(String, NonBlocking)>>>,
}

impl FileRouter {
    fn add_route(&self, prefix: String, writer: NonBlocking) {
        let mut routes = self.routes.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        routes.push((prefix, writer));
    }

    fn route_for(&self, target: &str) -> Option<NonBlocking> {
        let routes = self.routes.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        routes
            .iter()
            .filter(|(prefix, _)| matches_target(target, prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, writer)| writer.clone())
    }
}

enum RoutedWriter {
    File(NonBlocking),
    Sink,
}

impl io::Write for RoutedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            RoutedWriter::File(writer) => writer.write(buf),
            RoutedWriter::Sink => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            RoutedWriter::File(writer) => writer.flush(),
            RoutedWriter::Sink => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for FileRouter {
    type Writer = RoutedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RoutedWriter::Sink
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        self.route_for(meta.target())
            .map(RoutedWriter::File)
            .unwrap_or(RoutedWriter::Sink)
    }
}

/// `timestamp - target - LEVEL - message`
struct DashFormat;

impl<S, N> FormatEvent<S, N> for DashFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        write!(
            writer,
            "{} - {} - {} - ",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
            meta.target(),
            meta.level()
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
