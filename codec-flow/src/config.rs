//! Runtime configuration loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Default budget for a decode run.
pub const DEFAULT_DECODE_TIMEOUT: Duration = Duration::from_secs(600);
/// Default budget for an encode run.
pub const DEFAULT_ENCODE_TIMEOUT: Duration = Duration::from_secs(1800);
/// Default budget for a vector search run.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(900);

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Per-video working directories and decoded HLS output.
    pub data_dir: PathBuf,
    /// Rolling log files.
    pub log_dir: PathBuf,
    /// Working directory the codec scripts are launched from.
    pub codec_root: PathBuf,
    /// Interpreter used to launch the scripts.
    pub python_bin: String,
    /// Where raw source videos live.
    pub raw_video_dir: PathBuf,
    /// Where trained checkpoints live.
    pub model_dir: PathBuf,
    /// Encode output directory, relative to `codec_root` unless absolute.
    pub results_dir: PathBuf,
    pub decode_timeout: Duration,
    pub encode_timeout: Duration,
    pub search_timeout: Duration,
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Default for AppConfig {
    fn default() -> Self {
        let home = home_dir();
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            enable_cors: true,
            data_dir: PathBuf::from("./data"),
            log_dir: PathBuf::from("./logs"),
            codec_root: PathBuf::from("."),
            python_bin: "python".to_string(),
            raw_video_dir: home.join("DEV/sparse_codec/data/raw"),
            model_dir: home.join("models/sparse_video_codec"),
            results_dir: PathBuf::from("./results"),
            decode_timeout: DEFAULT_DECODE_TIMEOUT,
            encode_timeout: DEFAULT_ENCODE_TIMEOUT,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
        }
    }
}

impl AppConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `API_BIND_ADDRESS`, `API_PORT`, `API_ENABLE_CORS`
    /// - `DATA_DIR`, `LOG_DIR`, `CODEC_ROOT`, `RESULTS_DIR`
    /// - `PYTHON_BIN`, `RAW_VIDEO_DIR`, `MODEL_DIR`
    /// - `DECODE_TIMEOUT_SECS`, `ENCODE_TIMEOUT_SECS`, `SEARCH_TIMEOUT_SECS`
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Some(bind_address) = env_string("API_BIND_ADDRESS") {
            config.bind_address = bind_address;
        }
        if let Some(port) = env_string("API_PORT")
            && let Ok(parsed) = port.parse::<u16>()
        {
            config.port = parsed;
        }
        if let Some(cors) = env_string("API_ENABLE_CORS") {
            config.enable_cors = matches!(cors.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Some(dir) = env_string("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("CODEC_ROOT") {
            config.codec_root = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("RESULTS_DIR") {
            config.results_dir = PathBuf::from(dir);
        }
        if let Some(bin) = env_string("PYTHON_BIN") {
            config.python_bin = bin;
        }
        if let Some(dir) = env_string("RAW_VIDEO_DIR") {
            config.raw_video_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }

        if let Some(timeout) = env_secs("DECODE_TIMEOUT_SECS") {
            config.decode_timeout = timeout;
        }
        if let Some(timeout) = env_secs("ENCODE_TIMEOUT_SECS") {
            config.encode_timeout = timeout;
        }
        if let Some(timeout) = env_secs("SEARCH_TIMEOUT_SECS") {
            config.search_timeout = timeout;
        }

        config
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_string(key)?
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
