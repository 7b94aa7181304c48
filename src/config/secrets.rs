// src/config/secrets.rs
//! Startup check that the keys the configuration depends on are present.

use anyhow::{bail, Result};

use super::{AppConfig, Environment, LlmProvider};
use crate::providers::{required_keys, ProviderKind};

pub const ENV_VALIDATE_SECRETS: &str = "SH_VALIDATE_SECRETS";
pub const ENV_OPENAI_KEY: &str = "OPENAI_API_KEY";
pub const ENV_OPENAI_KEY_FALLBACK: &str = "SH_OPENAI_API_KEY";

/// Gate is on in prod, or anywhere `SH_VALIDATE_SECRETS` is 1/true/yes.
pub fn enforced<F>(cfg: &AppConfig, env: &F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    cfg.environment == Environment::Prod
        || env(ENV_VALIDATE_SECRETS)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
}

/// `OPENAI_API_KEY`, falling back to `SH_OPENAI_API_KEY`.
pub fn openai_api_key<F>(env: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    [ENV_OPENAI_KEY, ENV_OPENAI_KEY_FALLBACK]
        .iter()
        .find_map(|k| env(k).filter(|v| !v.trim().is_empty()))
}

fn has<F>(env: &F, name: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    env(name).is_some_and(|v| !v.trim().is_empty())
}

fn provider_ready<F>(env: &F, kind: ProviderKind) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    required_keys(kind).iter().all(|k| has(env, k))
}

/// Every missing secret name, in a stable order.
pub fn missing<F>(cfg: &AppConfig, env: &F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = Vec::new();

    match cfg.search.provider.pinned() {
        Some(kind) => {
            out.extend(
                required_keys(kind)
                    .iter()
                    .filter(|k| !has(env, k))
                    .map(|k| k.to_string()),
            );
        }
        None => {
            if !cfg.search.cascade_order.iter().any(|k| provider_ready(env, *k)) {
                out.push("one of: SH_SERPER_KEY | SH_GOOGLE_API_KEY+SH_GOOGLE_CSE_ID | SH_BRAVE_KEY".into());
            }
        }
    }

    if cfg.llm.provider == LlmProvider::OpenAi && openai_api_key(env).is_none() {
        out.push(ENV_OPENAI_KEY.to_string());
    }
    out
}

pub fn validate<F>(cfg: &AppConfig, env: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if !enforced(cfg, env) {
        return Ok(());
    }
    let missing = missing(cfg, env);
    if !missing.is_empty() {
        bail!("missing required secrets: {}", missing.join(", "));
    }
    Ok(())
}
