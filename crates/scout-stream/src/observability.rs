use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "scout.logs.jsonl";

/// Where decoder and session logs end up.
#[derive(Debug, PartialEq, Eq)]
enum LogSink {
    /// Compact lines on stderr; stdout belongs to command output.
    Console,
    /// One flattened JSON object per event, appended to `dir/file_name`.
    JsonFile { dir: PathBuf, file_name: String },
}

impl LogSink {
    fn from_path(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Self::Console;
        };
        let path = Path::new(raw);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(DEFAULT_LOG_FILE)
            .to_string();
        Self::JsonFile { dir, file_name }
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// `SCOUT_LOG_LEVEL` wins over `RUST_LOG`; an unparsable value falls through.
fn env_filter(scout_level: Option<&str>) -> EnvFilter {
    scout_level
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Installs the global `tracing` subscriber, at most once per process.
///
/// - `SCOUT_OBSERVABILITY_ENABLED`: set to `false`/`off` to install nothing.
/// - `SCOUT_LOG_LEVEL`: filter directive such as `scout_stream=debug`; `RUST_LOG` is the fallback.
/// - `SCOUT_JSON_LOG_PATH`: write JSON lines to this file instead of stderr.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let enabled = std::env::var("SCOUT_OBSERVABILITY_ENABLED")
            .ok()
            .and_then(|value| parse_bool_env(&value))
            .unwrap_or(true);
        if !enabled {
            return;
        }

        let filter = env_filter(std::env::var("SCOUT_LOG_LEVEL").ok().as_deref());
        let sink = LogSink::from_path(std::env::var("SCOUT_JSON_LOG_PATH").ok().as_deref());
        match sink {
            LogSink::JsonFile { dir, file_name } if std::fs::create_dir_all(&dir).is_ok() => {
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_writer(tracing_appender::rolling::never(dir, file_name));
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(json_layer)
                    .try_init();
            }
            _ => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_env_values_parse() {
        assert_eq!(parse_bool_env(" Off "), Some(false));
        assert_eq!(parse_bool_env("enabled"), Some(true));
        assert_eq!(parse_bool_env("maybe"), None);
    }

    #[test]
    fn log_path_selects_sink() {
        assert_eq!(LogSink::from_path(None), LogSink::Console);
        assert_eq!(LogSink::from_path(Some("  ")), LogSink::Console);
        assert_eq!(
            LogSink::from_path(Some("scout.jsonl")),
            LogSink::JsonFile {
                dir: PathBuf::from("."),
                file_name: "scout.jsonl".into()
            }
        );
        assert_eq!(
            LogSink::from_path(Some("logs/runs/grounding.jsonl")),
            LogSink::JsonFile {
                dir: PathBuf::from("logs/runs"),
                file_name: "grounding.jsonl".into()
            }
        );
    }

    #[test]
    fn scout_level_overrides_default_filter() {
        assert_eq!(env_filter(Some("scout_stream=debug")).to_string(), "scout_stream=debug");
    }

    #[test]
    fn init_is_idempotent() {
        init_observability();
        init_observability();
        assert!(INIT.get().is_some());
    }
}
