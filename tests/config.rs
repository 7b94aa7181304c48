// tests/config.rs
//
// Config loading: file resolution, env overrides, prompt hashing, secrets gate.
// Tests that touch the real process env are #[serial].

use std::collections::HashMap;
use std::env;
use std::fs;

use serial_test::serial;
use sha2::{Digest, Sha256};

use source_harvester::config::{self, Environment, LlmProvider, ProviderChoice, DEFAULT_PROMPT};

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |k| map.get(k).cloned()
}

/// Snapshot & restore env vars for the duration of a test.
struct EnvSnapshot {
    saved: Vec<(String, Option<String>)>,
}

impl EnvSnapshot {
    fn set(pairs: &[(&str, Option<&str>)]) -> Self {
        let mut saved = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            saved.push((k.to_string(), env::var(k).ok()));
            match v {
                Some(val) => env::set_var(k, val),
                None => env::remove_var(k),
            }
        }
        Self { saved }
    }
}

impl Drop for EnvSnapshot {
    fn drop(&mut self) {
        for (k, v) in self.saved.drain(..) {
            match v {
                Some(v) => env::set_var(&k, v),
                None => env::remove_var(&k),
            }
        }
    }
}

#[test]
fn explicit_file_and_prompt_are_loaded_and_hashed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let prompt = dir.path().join("prompt.txt");
    fs::write(&prompt, "return JSON only").expect("write prompt");
    let cfg_path = dir.path().join("app.toml");
    fs::write(
        &cfg_path,
        format!(
            "environment = \"staging\"\n[search]\nprovider = \"serper\"\n[llm]\nprovider = \"local\"\nprompt_path = {:?}\n",
            prompt.display().to_string()
        ),
    )
    .expect("write config");

    let rc = config::load_with(Some(&cfg_path), env_of(&[])).expect("load");
    assert_eq!(rc.settings.environment, Environment::Staging);
    assert_eq!(rc.settings.search.provider, ProviderChoice::Serper);
    assert_eq!(rc.settings.llm.provider, LlmProvider::Local);
    assert_eq!(rc.prompt_text, "return JSON only");
    assert_eq!(rc.prompt_size, 16);
    assert_eq!(rc.prompt_sha256, format!("{:x}", Sha256::digest(b"return JSON only")));
    assert_eq!(rc.config_path.as_deref(), Some(cfg_path.as_path()));
}

#[test]
fn missing_prompt_falls_back_to_builtin() {
    let rc = config::load_with(
        None,
        env_of(&[
            ("SH_CONFIG_FILE", ""),
            ("SH_LLM__PROMPT_PATH", "/definitely/not/here.txt"),
        ]),
    )
    .expect("load");
    assert_eq!(rc.prompt_text, DEFAULT_PROMPT);
}

#[test]
fn config_file_env_must_point_somewhere() {
    let err = config::load_with(None, env_of(&[("SH_CONFIG_FILE", "/nope/app.toml")])).unwrap_err();
    assert!(err.to_string().contains("SH_CONFIG_FILE"));
}

#[test]
fn env_overrides_apply_on_top_of_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg_path = dir.path().join("app.toml");
    fs::write(&cfg_path, "database_url = \"sqlite://from-file.db\"\n").expect("write config");

    let rc = config::load_with(
        Some(&cfg_path),
        env_of(&[("SH_DATABASE_URL", "memory"), ("SH_SEARCH__PROVIDER", "brave")]),
    )
    .expect("load");
    assert_eq!(rc.settings.database_url, "memory");
    assert_eq!(rc.settings.search.provider, ProviderChoice::Brave);
}

#[test]
fn prod_without_secrets_refuses_to_start() {
    let err = config::load_with(
        None,
        env_of(&[("SH_CONFIG_FILE", ""), ("SH_ENVIRONMENT", "prod")]),
    )
    .unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("missing required secrets"), "{msg}");
    assert!(msg.contains("OPENAI_API_KEY"), "{msg}");
}

#[test]
fn prod_with_secrets_loads() {
    let rc = config::load_with(
        None,
        env_of(&[
            ("SH_CONFIG_FILE", ""),
            ("SH_ENVIRONMENT", "prod"),
            ("SH_BRAVE_KEY", "b"),
            ("OPENAI_API_KEY", "sk"),
        ]),
    )
    .expect("load");
    assert_eq!(rc.settings.environment, Environment::Prod);
}

#[test]
fn invalid_toml_is_reported_with_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg_path = dir.path().join("broken.toml");
    fs::write(&cfg_path, "[search\nprovider=").expect("write config");
    let err = config::load_with(Some(&cfg_path), env_of(&[])).unwrap_err();
    assert!(format!("{err:#}").contains("broken.toml"));
}

#[test]
#[serial]
fn process_env_drives_runtime_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg_path = dir.path().join("app.toml");
    fs::write(&cfg_path, "[llm]\nprovider = \"local\"\n").expect("write config");
    let cfg_str = cfg_path.display().to_string();

    let _env = EnvSnapshot::set(&[
        ("SH_CONFIG_FILE", Some(cfg_str.as_str())),
        ("SH_ENVIRONMENT", Some("test")),
        ("SH_DATABASE_URL", Some("memory")),
        ("SH_VALIDATE_SECRETS", None),
        ("SH_SEARCH__PROVIDER", None),
    ]);

    let rc = config::load_runtime_config().expect("load");
    assert_eq!(rc.settings.environment, Environment::Test);
    assert_eq!(rc.settings.database_url, "memory");
    assert_eq!(rc.settings.llm.provider, LlmProvider::Local);
}

#[test]
fn shipped_default_config_parses() {
    let rc = config::load_with(
        Some(std::path::Path::new(config::DEFAULT_CONFIG_PATH)),
        env_of(&[]),
    )
    .expect("config/default.toml loads");
    assert_eq!(rc.settings.search.cascade_order.len(), 3);
    assert_eq!(rc.settings.search.freshness_policy().hint_for(Some("{{days_ago:7}}")), Some("pw"));
    assert_ne!(rc.prompt_text, DEFAULT_PROMPT, "shipped prompt file should be found");
}
