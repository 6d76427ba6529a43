//! 로깅 초기화 모듈
//!
//! JSON lines on stdout plus a daily rolling file under `LOG_DIR`.
//! If the log directory cannot be used the watcher keeps running with stdout only.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "pihole-notifier";
const LOG_FILE_SUFFIX: &str = "log";
const DEFAULT_FILTER: &str = "info,pihole_notifier=debug";
const DEFAULT_MAX_LOG_FILES: usize = 14;

/// 로그 출력 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub log_dir: PathBuf,
    /// Rolled files kept on disk
    pub max_log_files: usize,
}

impl LogSettings {
    /// `LOG_DIR` (default `logs`) and `LOG_MAX_FILES` (default 14)
    pub fn from_env() -> Self {
        let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());
        let max_log_files = std::env::var("LOG_MAX_FILES")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_LOG_FILES);

        Self {
            log_dir: PathBuf::from(log_dir),
            max_log_files,
        }
    }
}

/// 로깅 시스템을 초기화합니다.
///
/// The filter comes from `RUST_LOG`, defaulting to `info,pihole_notifier=debug`.
/// Files are named `pihole-notifier.YYYY-MM-DD.log`.
///
/// 반환되는 `WorkerGuard`를 main에서 유지해야 버퍼링된 로그가 손실되지 않습니다.
/// `None` means file logging is off.
pub fn init_logging(settings: &LogSettings) -> Option<WorkerGuard> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(settings.max_log_files)
        .build(&settings.log_dir);

    let (file_layer, guard, file_error) = match appender {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_current_span(true)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard), None)
        }
        Err(e) => (None, None, Some(e)),
    };

    let stdout_layer = fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_current_span(true);

    let installed = tracing_subscriber::registry()
        .with(default_filter())
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    // A second init (tests, embedding) keeps the first subscriber
    if let Err(e) = installed {
        eprintln!("Tracing already initialised: {}", e);
    }

    if let Some(e) = file_error {
        tracing::warn!(
            error = %e,
            log_dir = %settings.log_dir.display(),
            "File logging disabled, writing to stdout only"
        );
    }

    guard
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
