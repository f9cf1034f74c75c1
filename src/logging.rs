//! Log routing for the server and the CLI.
//!
//! Every event is printed to stdout. A plain-text copy is appended to the file named by
//! `MULTIRAG_LOG_FILE`, or to `logs/multirag.log` when the variable is unset. Setting it to
//! `off` keeps stdout only. File writes go through a background worker so ingestion tasks
//! never block on disk.
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_VAR: &str = "MULTIRAG_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_NAME: &str = "multirag.log";

/// Flushes buffered file output when the process exits.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where the file copy of the logs goes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogFile {
    Disabled,
    Path(PathBuf),
    Default,
}

impl LogFile {
    fn from_setting(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Default,
            Some(value) if value.eq_ignore_ascii_case("off") => Self::Disabled,
            Some(path) => Self::Path(PathBuf::from(path)),
        }
    }

    fn writer(&self) -> std::io::Result<Option<NonBlocking>> {
        let (writer, guard) = match self {
            Self::Disabled => return Ok(None),
            Self::Path(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                tracing_appender::non_blocking(file)
            }
            Self::Default => {
                std::fs::create_dir_all(DEFAULT_LOG_DIR)?;
                tracing_appender::non_blocking(tracing_appender::rolling::never(
                    DEFAULT_LOG_DIR,
                    DEFAULT_LOG_NAME,
                ))
            }
        };
        let _ = FILE_GUARD.set(guard);
        Ok(Some(writer))
    }
}

/// Install the global subscriber: `RUST_LOG` filtering (default `info`), a compact stdout
/// layer, and the file layer described in the module docs.
///
/// A file that cannot be opened is reported on stderr and logging continues on stdout.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).compact());

    let target = LogFile::from_setting(std::env::var(LOG_FILE_VAR).ok().as_deref());
    let writer = target.writer().unwrap_or_else(|err| {
        eprintln!("File logging disabled ({target:?}): {err}");
        None
    });

    match writer {
        Some(writer) => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_ansi(false)
                    .compact(),
            )
            .init(),
        None => registry.init(),
    }
}
