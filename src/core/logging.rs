//! Tracing setup: human-readable stdout plus a daily-rolled file under the
//! data directory.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::core::config::AppPaths;

const LOG_FILE_PREFIX: &str = "ragchat.log";

/// Used when `RUST_LOG` is unset. Per-run pipeline transitions are logged at
/// debug and stay hidden unless asked for.
const DEFAULT_DIRECTIVES: &str = "info,ragchat_backend=info,tower_http=info,sqlx=warn,hyper=warn";

fn env_filter(raw: Option<&str>) -> EnvFilter {
    raw.and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Installs the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
pub fn init(paths: &AppPaths) -> Option<WorkerGuard> {
    let filter = env_filter(std::env::var("RUST_LOG").ok().as_deref());
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    let (file_layer, guard) = match std::fs::create_dir_all(&paths.log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(&paths.log_dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(err) => {
            eprintln!(
                "Log directory {} unavailable ({}), logging to stdout only",
                paths.log_dir.display(),
                err
            );
            (None, None)
        }
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("Logging already initialised: {}", err);
    }

    guard
}
