//! File-backed tracing setup so wrapper diagnostics never touch the user's terminal.

use std::env;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;

const LOG_PATH_ENV: &str = "BUTTERFISH_LOG";
const LOG_FILE_NAME: &str = "butterfish.log";
const LOG_FILE_MODE: u32 = 0o600;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Resolve the log file location: env override, `/var/tmp`, then the OS temp dir.
pub fn log_file_path() -> PathBuf {
    if let Ok(path) = env::var(LOG_PATH_ENV) {
        let path = path.trim();
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    let var_tmp = PathBuf::from("/var/tmp");
    if var_tmp.is_dir() {
        return var_tmp.join(LOG_FILE_NAME);
    }
    env::temp_dir().join(LOG_FILE_NAME)
}

fn level_for_verbosity(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn init_tracing_once(verbosity: u8, once: &OnceLock<()>) {
    let _ = once.get_or_init(|| {
        let path = log_file_path();
        let file = match OpenOptions::new()
            .create(true)
            .append(true)
            .mode(LOG_FILE_MODE)
            .open(&path)
        {
            Ok(file) => file,
            Err(_) => return,
        };
        let subscriber = tracing_subscriber::fmt()
            .with_timer(UtcTime::rfc_3339())
            .with_max_level(level_for_verbosity(verbosity))
            .with_writer(file)
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Install the global file subscriber; `verbosity` is the count of `-v` flags.
pub fn init_tracing(verbosity: u8) {
    init_tracing_once(verbosity, &TRACING_INIT);
}

pub fn log_debug(message: &str) {
    tracing::debug!(target: "butterfish", "{message}");
}

pub fn log_error(message: &str) {
    tracing::error!(target: "butterfish", "{message}");
}
