use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const DEFAULT_LOG_FILE: &str = "relay.logs.jsonl";

static INIT: OnceCell<()> = OnceCell::new();

/// Where relay logs go.
#[derive(Clone, Debug, PartialEq, Eq)]
enum LogTarget {
    Disabled,
    Console,
    JsonFile { dir: PathBuf, file_name: String },
}

impl LogTarget {
    fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("RELAY_OBSERVABILITY_ENABLED")
            .and_then(|value| parse_bool_env(&value))
            .unwrap_or(true);
        if !enabled {
            return Self::Disabled;
        }
        match lookup("RELAY_JSON_LOG_PATH") {
            Some(raw) if !raw.trim().is_empty() => {
                let path = PathBuf::from(raw.trim());
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(DEFAULT_LOG_FILE)
                    .to_string();
                Self::JsonFile { dir, file_name }
            }
            _ => Self::Console,
        }
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_filter(lookup: impl Fn(&str) -> Option<String>) -> tracing_subscriber::EnvFilter {
    lookup("RELAY_LOG_LEVEL")
        .and_then(|level| tracing_subscriber::EnvFilter::try_new(level).ok())
        .or_else(|| tracing_subscriber::EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new("info"))
}

/// Installs the relay's tracing subscriber. Later calls are no-ops.
///
/// - `RELAY_OBSERVABILITY_ENABLED`: `false`/`0`/`off` skips installation.
/// - `RELAY_LOG_LEVEL`: filter directive, falling back to `RUST_LOG`, then `info`.
/// - `RELAY_JSON_LOG_PATH`: write JSON lines to this file instead of stdout.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let lookup = |key: &str| std::env::var(key).ok();
        let filter = env_filter(lookup);
        match LogTarget::resolve(lookup) {
            LogTarget::Disabled => {}
            LogTarget::Console => {
                let console = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stdout);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(console)
                    .try_init();
            }
            LogTarget::JsonFile { dir, file_name } => {
                let _ = std::fs::create_dir_all(&dir);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let json = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(json)
                    .try_init();
            }
        }
    });
}
