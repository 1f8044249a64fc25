//! Configuration loading
//!
//! Options resolve in a fixed order: command-line flags, then environment
//! variables with the `OMNICAST_` prefix, then a JSON configuration file,
//! then built-in defaults.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::error::StreamError;

/// Default request/response bind address
pub const DEFAULT_REQUEST_ADDR: &str = "0.0.0.0:5557";
/// Default publish bind address
pub const DEFAULT_PUBLISH_ADDR: &str = "0.0.0.0:5556";

const DEFAULT_LOG_LEVEL: &str = "INFO";
const DEFAULT_MAX_CONNECTIONS: usize = 100;
const DEFAULT_BUFFER_SIZE: usize = 24 * 1024 * 1024;

/// Command-line flags
#[derive(Debug, Parser, Default)]
#[command(name = "omnicastd", about = "Multi-tenant audio streaming engine")]
pub struct Flags {
    /// Worker threads; 0 auto-detects hardware parallelism
    #[arg(long)]
    num_threads: Option<usize>,

    /// Logging level
    #[arg(long)]
    log_level: Option<String>,

    /// Maximum idle HTTP connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Capacity of the fixed byte buffer for file-mode tasks
    #[arg(long)]
    default_buffer_size: Option<usize>,

    /// Request/response bind address
    #[arg(long)]
    request_addr: Option<String>,

    /// Publish bind address
    #[arg(long)]
    publish_addr: Option<String>,

    /// Path to a JSON configuration file
    #[arg(long)]
    config_file: Option<PathBuf>,
}

/// Optional values read from the configuration file
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    num_threads: Option<usize>,
    log_level: Option<String>,
    max_connections: Option<usize>,
    default_buffer_size: Option<usize>,
    request_addr: Option<String>,
    publish_addr: Option<String>,
}

/// Resolved process configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Worker threads for the runtime
    pub num_threads: usize,
    /// Logging level
    pub log_level: String,
    /// Maximum idle HTTP connections
    pub max_connections: usize,
    /// Capacity of the fixed byte buffer for file-mode tasks
    pub default_buffer_size: usize,
    /// Request/response bind address
    pub request_addr: String,
    /// Publish bind address
    pub publish_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: auto_threads(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            default_buffer_size: DEFAULT_BUFFER_SIZE,
            request_addr: DEFAULT_REQUEST_ADDR.to_string(),
            publish_addr: DEFAULT_PUBLISH_ADDR.to_string(),
        }
    }
}

impl Config {
    /// Parse flags from the process arguments and resolve the full chain.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration file cannot be read or
    /// parsed, or an environment value cannot be parsed.
    pub fn load() -> Result<Self, StreamError> {
        Self::resolve(Flags::parse())
    }

    /// Resolve flags → environment → file → defaults
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration file cannot be read or
    /// parsed, or an environment value cannot be parsed.
    pub fn resolve(flags: Flags) -> Result<Self, StreamError> {
        let file = match &flags.config_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| StreamError::Config {
                    message: format!("{}: {e}", path.display()),
                })?;
                serde_json::from_str::<FileConfig>(&raw).map_err(|e| StreamError::Config {
                    message: format!("{}: {e}", path.display()),
                })?
            }
            None => FileConfig::default(),
        };

        let num_threads = flags
            .num_threads
            .or(env_parsed("OMNICAST_NUM_THREADS")?)
            .or(file.num_threads)
            .unwrap_or(0);
        let log_level = flags
            .log_level
            .or(env_string("OMNICAST_LOG_LEVEL"))
            .or(file.log_level)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        let max_connections = flags
            .max_connections
            .or(env_parsed("OMNICAST_MAX_CONNECTIONS")?)
            .or(file.max_connections)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);
        let default_buffer_size = flags
            .default_buffer_size
            .or(env_parsed("OMNICAST_DEFAULT_BUFFER_SIZE")?)
            .or(file.default_buffer_size)
            .unwrap_or(DEFAULT_BUFFER_SIZE);
        let request_addr = flags
            .request_addr
            .or(env_string("OMNICAST_REQUEST_ADDR"))
            .or(file.request_addr)
            .unwrap_or_else(|| DEFAULT_REQUEST_ADDR.to_string());
        let publish_addr = flags
            .publish_addr
            .or(env_string("OMNICAST_PUBLISH_ADDR"))
            .or(file.publish_addr)
            .unwrap_or_else(|| DEFAULT_PUBLISH_ADDR.to_string());

        Ok(Self {
            num_threads: if num_threads == 0 {
                auto_threads()
            } else {
                num_threads
            },
            log_level,
            max_connections,
            default_buffer_size,
            request_addr,
            publish_addr,
        })
    }
}

fn auto_threads() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn env_parsed(key: &str) -> Result<Option<usize>, StreamError> {
    match env_string(key) {
        Some(value) => value
            .parse::<usize>()
            .map(Some)
            .map_err(|e| StreamError::Config {
                message: format!("{key}={value}: {e}"),
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    // Environment mutations are process-global; serialise the tests that
    // touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let config = Config::resolve(Flags::default()).unwrap();
        assert!(config.num_threads >= 1);
        assert_eq!(config.log_level, "INFO");
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.default_buffer_size, 24 * 1024 * 1024);
    }

    #[test]
    fn test_flags_override_everything() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("OMNICAST_MAX_CONNECTIONS", "7");
        let flags = Flags {
            max_connections: Some(3),
            ..Flags::default()
        };
        let config = Config::resolve(flags).unwrap();
        assert_eq!(config.max_connections, 3);
        std::env::remove_var("OMNICAST_MAX_CONNECTIONS");
    }

    #[test]
    fn test_env_beats_file_and_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("OMNICAST_LOG_LEVEL", "debug");
        let config = Config::resolve(Flags::default()).unwrap();
        assert_eq!(config.log_level, "debug");
        std::env::remove_var("OMNICAST_LOG_LEVEL");
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("OMNICAST_NUM_THREADS", "not-a-number");
        let result = Config::resolve(Flags::default());
        assert!(result.is_err());
        std::env::remove_var("OMNICAST_NUM_THREADS");
    }

    #[test]
    fn test_config_file_layer() {
        let dir = std::env::temp_dir();
        let path = dir.join("omnicast-config-test.json");
        std::fs::write(&path, r#"{"default_buffer_size": 1048576}"#).unwrap();
        let flags = Flags {
            config_file: Some(path.clone()),
            ..Flags::default()
        };
        let config = Config::resolve(flags).unwrap();
        assert_eq!(config.default_buffer_size, 1_048_576);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_zero_threads_auto_detects() {
        let flags = Flags {
            num_threads: Some(0),
            ..Flags::default()
        };
        let config = Config::resolve(flags).unwrap();
        assert!(config.num_threads >= 1);
    }
}
