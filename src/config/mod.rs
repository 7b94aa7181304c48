// src/config/mod.rs
//! Settings: TOML file, then `SH_*` environment overrides, then the secrets gate.
//!
//! Resolution order for the file:
//! 1) explicit path
//! 2) $SH_CONFIG_FILE (must exist)
//! 3) config/default.toml
//! 4) built-in defaults

pub mod secrets;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::http::RetryPolicy;
use crate::orchestrator::ProviderSelection;
use crate::providers::{FreshnessPolicy, FreshnessRule, ProviderKind};
use crate::query::schema::{DEFAULT_MAX_RESULTS, MAX_RESULTS_CAP};
use crate::query::Filters;

pub const ENV_CONFIG_FILE: &str = "SH_CONFIG_FILE";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const DEFAULT_PROMPT_PATH: &str = "config/prompts/rewrite_query.txt";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://source_harvester.db";

/// Used when the configured prompt file is missing.
pub const DEFAULT_PROMPT: &str = "\
You convert a natural language web search request into JSON with exactly these fields:
keywords (array of 1-12 strings), boolean (\"AND\" or \"OR\"),
filters {sites (array of up to 20 domains), date_after, date_before (YYYY-MM-DD or
{{today}}, {{yesterday}}, {{days_ago:N}}), lang, geo, max_results (1-100)}.
Omit filters you cannot infer. Output JSON only.
";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Test,
    Staging,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "test" => Ok(Environment::Test),
            "staging" => Ok(Environment::Staging),
            "prod" => Ok(Environment::Prod),
            other => Err(anyhow!("unknown environment: {other}")),
        }
    }
}

/// `auto` walks the cascade order; anything else pins one provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderChoice {
    #[default]
    Auto,
    Serper,
    Google,
    Brave,
}

impl ProviderChoice {
    pub fn pinned(&self) -> Option<ProviderKind> {
        match self {
            ProviderChoice::Auto => None,
            ProviderChoice::Serper => Some(ProviderKind::Serper),
            ProviderChoice::Google => Some(ProviderKind::Google),
            ProviderChoice::Brave => Some(ProviderKind::Brave),
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.pinned().map(|k| k.as_str()).unwrap_or("auto")
    }
}

impl FromStr for ProviderChoice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(ProviderChoice::Auto);
        }
        let kind: ProviderKind = s.parse().map_err(|e: String| anyhow!(e))?;
        Ok(match kind {
            ProviderKind::Serper => ProviderChoice::Serper,
            ProviderKind::Google => ProviderChoice::Google,
            ProviderKind::Brave => ProviderChoice::Brave,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultOptions {
    pub lang: Option<String>,
    pub geo: Option<String>,
    pub max_results: u32,
}

impl Default for DefaultOptions {
    fn default() -> Self {
        Self {
            lang: None,
            geo: None,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

impl DefaultOptions {
    /// Filters the offline rewriter starts from.
    pub fn filters(&self) -> Filters {
        Filters {
            lang: self.lang.clone(),
            geo: self.geo.clone(),
            max_results: self.max_results,
            ..Filters::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub provider: ProviderChoice,
    pub cascade_order: Vec<ProviderKind>,
    pub default_options: DefaultOptions,
    pub timeout_seconds: f64,
    pub retry: RetryPolicy,
    pub freshness: Vec<FreshnessRule>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            provider: ProviderChoice::Auto,
            cascade_order: ProviderKind::ALL.to_vec(),
            default_options: DefaultOptions::default(),
            timeout_seconds: 10.0,
            retry: RetryPolicy::default(),
            freshness: FreshnessPolicy::default().rules().to_vec(),
        }
    }
}

impl SearchSettings {
    pub fn selection(&self) -> ProviderSelection {
        match self.provider.pinned() {
            Some(kind) => ProviderSelection::Pinned(kind.as_str().to_string()),
            None => ProviderSelection::Cascade(
                self.cascade_order.iter().map(|k| k.as_str().to_string()).collect(),
            ),
        }
    }

    pub fn freshness_policy(&self) -> FreshnessPolicy {
        FreshnessPolicy::new(self.freshness.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAi,
    /// No network: keywords are the query's words.
    Local,
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "local" => Ok(LlmProvider::Local),
            other => Err(anyhow!("unsupported llm provider: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub prompt_path: String,
    pub model: Option<String>,
    pub temperature: f32,
    pub timeout_seconds: f64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            prompt_path: DEFAULT_PROMPT_PATH.to_string(),
            model: None,
            temperature: 0.0,
            timeout_seconds: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: Environment,
    pub debug: bool,
    pub search: SearchSettings,
    pub llm: LlmSettings,
    pub database_url: String,
    pub api_bearer_token: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Dev,
            debug: false,
            search: SearchSettings::default(),
            llm: LlmSettings::default(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            api_bearer_token: None,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        let max = self.search.default_options.max_results;
        if max == 0 || max > MAX_RESULTS_CAP {
            bail!("search.default_options.max_results must be in 1..=100, got {max}");
        }
        if self.search.cascade_order.is_empty() {
            bail!("search.cascade_order must list at least one provider");
        }
        if !positive(self.search.timeout_seconds) {
            bail!("search.timeout_seconds must be positive");
        }
        if !positive(self.llm.timeout_seconds) {
            bail!("llm.timeout_seconds must be positive");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!("llm.temperature must be in 0.0..=2.0");
        }
        Ok(())
    }

    /// Bearer token if one is set and non-blank.
    pub fn bearer_token(&self) -> Option<&str> {
        self.api_bearer_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Loaded settings plus the prompt they point at.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub settings: AppConfig,
    pub config_path: Option<PathBuf>,
    pub prompt_path: PathBuf,
    pub prompt_text: String,
    pub prompt_sha256: String,
    pub prompt_size: usize,
}

pub fn parse_toml(s: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(s).context("parsing config TOML")?;
    Ok(cfg)
}

pub fn load_from(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    parse_toml(&content).with_context(|| format!("invalid config in {}", path.display()))
}

fn positive(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Apply `SH_*` overrides. A set-but-unparseable variable is an error naming it.
pub fn apply_env_overrides<F>(cfg: &mut AppConfig, env: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| env(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("SH_ENVIRONMENT") {
        cfg.environment = v.parse().context("SH_ENVIRONMENT")?;
    }
    if let Some(v) = get("SH_DEBUG") {
        cfg.debug = parse_bool(&v).ok_or_else(|| anyhow!("SH_DEBUG: not a boolean: {v}"))?;
    }
    if let Some(v) = get("SH_SEARCH__PROVIDER") {
        cfg.search.provider = v.parse().context("SH_SEARCH__PROVIDER")?;
    }
    if let Some(v) = get("SH_SEARCH__CASCADE_ORDER") {
        cfg.search.cascade_order = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<ProviderKind>().map_err(|e| anyhow!(e)))
            .collect::<Result<Vec<_>>>()
            .context("SH_SEARCH__CASCADE_ORDER")?;
    }
    if let Some(v) = get("SH_LLM__PROVIDER") {
        cfg.llm.provider = v.parse().context("SH_LLM__PROVIDER")?;
    }
    if let Some(v) = get("SH_LLM__MODEL") {
        cfg.llm.model = Some(v);
    }
    if let Some(v) = get("SH_LLM__PROMPT_PATH") {
        cfg.llm.prompt_path = v;
    }
    if let Some(v) = get("SH_LLM__TEMPERATURE") {
        cfg.llm.temperature = v.trim().parse().context("SH_LLM__TEMPERATURE")?;
    }
    if let Some(v) = get("SH_LLM__TIMEOUT_SECONDS") {
        cfg.llm.timeout_seconds = v.trim().parse().context("SH_LLM__TIMEOUT_SECONDS")?;
    }
    if let Some(v) = get("SH_DATABASE_URL") {
        cfg.database_url = v;
    }
    if let Some(v) = get("SH_API_BEARER_TOKEN") {
        cfg.api_bearer_token = Some(v);
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn load_prompt(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "prompt file unavailable, using built-in prompt");
        DEFAULT_PROMPT.to_string()
    })
}

/// Full load with an injectable environment lookup.
pub fn load_with<F>(path: Option<&Path>, env: F) -> Result<RuntimeConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let config_path: Option<PathBuf> = match (path, env(ENV_CONFIG_FILE)) {
        (Some(p), _) => Some(p.to_path_buf()),
        (None, Some(p)) if !p.trim().is_empty() => {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_FILE} points to non-existent path {}", pb.display());
            }
            Some(pb)
        }
        _ => Some(PathBuf::from(DEFAULT_CONFIG_PATH)).filter(|p| p.exists()),
    };

    let mut settings = match &config_path {
        Some(p) => load_from(p)?,
        None => AppConfig::default(),
    };
    apply_env_overrides(&mut settings, &env)?;
    settings.validate()?;
    secrets::validate(&settings, &env)?;

    let prompt_path = PathBuf::from(&settings.llm.prompt_path);
    let prompt_text = load_prompt(&prompt_path);
    let prompt_sha256 = sha256_hex(prompt_text.as_bytes());
    let prompt_size = prompt_text.len();

    tracing::info!(
        env = %settings.environment,
        provider = settings.search.provider.as_str(),
        config = ?config_path,
        prompt_sha256 = %prompt_sha256,
        "configuration loaded"
    );

    Ok(RuntimeConfig {
        settings,
        config_path,
        prompt_path,
        prompt_text,
        prompt_sha256,
        prompt_size,
    })
}

pub fn load_runtime_config() -> Result<RuntimeConfig> {
    load_with(None, |k| std::env::var(k).ok())
}
