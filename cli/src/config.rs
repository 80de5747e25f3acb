use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use std::path::PathBuf;
use std::time::Duration;

use homechef_core::gemini::DEFAULT_MODEL;
use homechef_core::orchestrator::OrchestratorConfig;

use crate::gemini::{DEFAULT_BASE_URL, GeminiSettings};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    pub gemini: GeminiSettings,
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "homechef").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Self::from_lookup(|key| std::env::var(key).ok(), data_dir)
    }

    /// Build the config from an environment lookup, falling back to defaults
    /// for anything unset or blank.
    pub fn from_lookup<F>(lookup: F, data_dir: PathBuf) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let db_path = var("HOMECHEF_DB").map_or_else(|| data_dir.join("homechef.db"), PathBuf::from);

        let timeout_secs = parse_var(&var, "GEMINI_TIMEOUT_SECS")?.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            bail!("GEMINI_TIMEOUT_SECS must be at least 1");
        }
        let gemini = GeminiSettings {
            api_key: var("GEMINI_API_KEY").unwrap_or_default(),
            model: var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: var("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: Duration::from_secs(timeout_secs),
        };

        let mut orchestrator = OrchestratorConfig::default();
        if let Some(score) = parse_var::<f64>(&var, "HOMECHEF_MIN_MATCH_SCORE")? {
            if !(0.0..=1.0).contains(&score) {
                bail!("HOMECHEF_MIN_MATCH_SCORE must be between 0 and 1, got {score}");
            }
            orchestrator.min_match_score = score;
        }
        if let Some(retries) = parse_var(&var, "HOMECHEF_MAX_RETRIES")? {
            orchestrator.max_retries = retries;
        }
        if let Some(ms) = parse_var(&var, "HOMECHEF_BACKOFF_MS")? {
            orchestrator.backoff_base = Duration::from_millis(ms);
        }
        if let Some(turns) = parse_var::<usize>(&var, "HOMECHEF_CHAT_MAX_TURNS")? {
            if turns == 0 {
                bail!("HOMECHEF_CHAT_MAX_TURNS must be at least 1");
            }
            orchestrator.chat_max_turns = turns;
        }

        Ok(Config {
            db_path,
            data_dir,
            gemini,
            orchestrator,
        })
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>()
                .ok()
                .with_context(|| format!("Invalid value for {key}: '{raw}'"))
        })
        .transpose()
}
