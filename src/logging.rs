use std::fs::{self, File, OpenOptions};
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::ResolvedConfig;
use crate::error::EtlError;

/// Logging for one ETL run.
///
/// [`LogConfig::install`] makes it the default subscriber of the calling
/// thread until the returned guard is dropped; nothing process-wide changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub console: bool,
    /// Console filter directive, `RUST_LOG` takes precedence.
    pub level: String,
    /// Receives `<name>_info.log` and `<name>_debug.log` when set.
    pub log_dir: Option<Utf8PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console: true,
            level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl LogConfig {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            console: true,
            level: config.log_level.clone(),
            log_dir: config.log_dir.clone(),
        }
    }

    pub fn log_files(&self, name: &str) -> Option<(Utf8PathBuf, Utf8PathBuf)> {
        self.log_dir.as_ref().map(|dir| {
            (
                dir.join(format!("{name}_info.log")),
                dir.join(format!("{name}_debug.log")),
            )
        })
    }

    pub fn install(&self, name: &str) -> Result<DefaultGuard, EtlError> {
        let console = if self.console {
            let filter = EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&self.level))
                .map_err(|err| EtlError::InvalidConfig(format!("log level: {err}")))?;
            Some(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_filter(filter),
            )
        } else {
            None
        };

        let (info_file, debug_file) = match self.log_files(name) {
            Some((info, debug)) => (Some(open_log(&info)?), Some(open_log(&debug)?)),
            None => (None, None),
        };
        let info_layer = info_file.map(|file| {
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(LevelFilter::INFO)
        });
        let debug_layer = debug_file.map(|file| {
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(LevelFilter::DEBUG)
        });

        let subscriber = tracing_subscriber::registry()
            .with(console)
            .with(info_layer)
            .with(debug_layer);
        Ok(tracing::subscriber::set_default(subscriber))
    }
}

fn open_log(path: &Utf8Path) -> Result<File, EtlError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| EtlError::Filesystem(format!("{parent}: {err}")))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_std_path())
        .map_err(|err| EtlError::Filesystem(format!("{path}: {err}")))
}
