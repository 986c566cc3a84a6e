//! Configuration loading for mender.
//!
//! All settings come from the environment, with documented defaults. The
//! binary calls [`Config::from_env`] once at startup; everything downstream
//! receives an owned or borrowed `Config`.
//!
//! # Environment Variables
//!
//! | Variable | Default | Purpose |
//! |----------|---------|---------|
//! | `PORT` | `3000` | HTTP listen port |
//! | `FRONTEND_URL` | (none) | CORS origin for the web client |
//! | `GITHUB_TOKEN` | (none) | Credential injected into clone/push URLs and CI API calls |
//! | `OPENAI_API_KEY` | (none) | LLM access key |
//! | `LLM_BASE_URL` | OpenAI endpoint | Chat-completions endpoint |
//! | `LLM_MODELS` | `gpt-4o-mini,gpt-4o` | Ordered model fallback chain |
//! | `RETRY_LIMIT` | `5` | Maximum repair iterations per run |
//! | `DOCKER_HOST` | (local daemon) | Container daemon address |
//! | `SANDBOX_TIMEOUT_SECS` | `120` | Per-command sandbox timeout |
//! | `CI_POLL_TIMEOUT_SECS` | `300` | CI observation timeout |
//! | `MENDER_RESULTS_DIR` | `results` | Final report documents |
//! | `MENDER_WORK_DIR` | `tmp` | Transient working trees |
//! | `MENDER_LOG_FILE` | `mender.log` | Rotated file log |

use std::path::PathBuf;

/// Root configuration for the mender service.
///
/// Constructed once from the environment and shared across the HTTP layer
/// and every pipeline task.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,

    /// Allowed CORS origin for the web client, if any.
    pub frontend_url: Option<String>,

    /// GitHub access token for private clones, pushes, and the Actions API.
    pub github_token: Option<String>,

    /// LLM access key. Without it the Fix Generator runs in degraded mode.
    pub llm_api_key: Option<String>,

    /// Chat-completions endpoint for the LLM client.
    pub llm_base_url: String,

    /// Ordered list of model identifiers to try, first to last.
    pub llm_models: Vec<String>,

    /// Maximum number of repair iterations after the initial analysis.
    pub retry_limit: u32,

    /// Container daemon address. `None` connects to the local default socket.
    pub docker_host: Option<String>,

    /// Timeout for a single sandboxed command, in seconds.
    pub sandbox_timeout_secs: u64,

    /// Timeout for CI observation, in seconds.
    pub ci_poll_timeout_secs: u64,

    /// Directory where final reports are written as `{run_id}.json`.
    pub results_dir: PathBuf,

    /// Directory holding transient per-run working trees (`{run_id}/`).
    pub work_dir: PathBuf,

    /// Path of the rotated log file.
    pub log_file: PathBuf,
}

const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";

impl Config {
    /// Builds a configuration from the process environment.
    ///
    /// Missing variables fall back to the documented defaults; unparseable
    /// numeric values also fall back rather than aborting startup.
    pub fn from_env() -> Self {
        Self {
            port: env_parsed("PORT", 3000),
            frontend_url: env_nonempty("FRONTEND_URL"),
            github_token: env_nonempty("GITHUB_TOKEN"),
            llm_api_key: env_nonempty("OPENAI_API_KEY"),
            llm_base_url: env_nonempty("LLM_BASE_URL")
                .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            llm_models: env_nonempty("LLM_MODELS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_else(default_models),
            retry_limit: env_parsed("RETRY_LIMIT", 5),
            docker_host: env_nonempty("DOCKER_HOST"),
            sandbox_timeout_secs: env_parsed("SANDBOX_TIMEOUT_SECS", 120),
            ci_poll_timeout_secs: env_parsed("CI_POLL_TIMEOUT_SECS", 300),
            results_dir: env_nonempty("MENDER_RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("results")),
            work_dir: env_nonempty("MENDER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("tmp")),
            log_file: env_nonempty("MENDER_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("mender.log")),
        }
    }

    /// Working tree path for a run.
    pub fn run_work_dir(&self, run_id: &str) -> PathBuf {
        self.work_dir.join(run_id)
    }

    /// On-disk report path for a run.
    pub fn result_path(&self, run_id: &str) -> PathBuf {
        self.results_dir.join(format!("{run_id}.json"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            frontend_url: None,
            github_token: None,
            llm_api_key: None,
            llm_base_url: DEFAULT_LLM_BASE_URL.to_string(),
            llm_models: default_models(),
            retry_limit: 5,
            docker_host: None,
            sandbox_timeout_secs: 120,
            ci_poll_timeout_secs: 300,
            results_dir: PathBuf::from("results"),
            work_dir: PathBuf::from("tmp"),
            log_file: PathBuf::from("mender.log"),
        }
    }
}

fn default_models() -> Vec<String> {
    vec!["gpt-4o-mini".to_string(), "gpt-4o".to_string()]
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
