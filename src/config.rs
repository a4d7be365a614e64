// config.rs — TOML config loading with XDG-compliant directory resolution.
// The API key may come from OPENAI_API_KEY (or a .env file) or from the
// config file; without one the tutor refuses to start.

use anyhow::{Context, Result};
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Input, Select};
use directories::ProjectDirs;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::TutorError;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Application configuration persisted to disk.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_hsk_level")]
    pub hsk_level: u8,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_model() -> String {
    "gpt-4".into()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".into()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}

fn default_hsk_level() -> u8 {
    4
}

fn default_currency() -> String {
    "USD".into()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_key: String::new(),
            model: default_model(),
            temperature: default_temperature(),
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            hsk_level: default_hsk_level(),
            currency: default_currency(),
        }
    }
}

pub const HSK_LEVELS: std::ops::RangeInclusive<u8> = 1..=6;

impl Config {
    /// Reject values the tutor cannot use.
    pub fn validate(&self) -> Result<(), TutorError> {
        if !HSK_LEVELS.contains(&self.hsk_level) {
            return Err(TutorError::Configuration(format!(
                "hsk_level must be between {} and {}, got {}",
                HSK_LEVELS.start(),
                HSK_LEVELS.end(),
                self.hsk_level
            )));
        }
        Ok(())
    }

    /// Chat completions endpoint. The key travels in a header, never here.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.api_base.trim_end_matches('/'))
    }

    /// System prompt for the configured HSK level.
    pub fn system_prompt(&self) -> String {
        system_prompt(self.hsk_level)
    }
}

/// Build the tutor's system prompt, including the JSON reply contract.
pub fn system_prompt(hsk_level: u8) -> String {
    format!(
        r#"You are a helpful Chinese language tutor specifically teaching at the HSK {hsk_level} level.
You should:
1. Respond to student messages in Chinese (using HSK {hsk_level} level vocabulary and grammar)
2. Provide pinyin for all Chinese characters
3. Provide English translations
4. If the student writes in Chinese, correct any mistakes they make
5. Use appropriate HSK {hsk_level} vocabulary and grammar patterns in your responses
6. Be encouraging and supportive

Format your responses as JSON with the following structure:
{{
    "chinese": "Chinese text",
    "pinyin": "Pinyin with tones",
    "english": "English translation",
    "corrections": "Any corrections (if applicable)",
    "explanation": "Brief explanation of grammar or vocabulary used",
    "tips": "Optional study tip"
}}"#
    )
}

// ── Paths ──────────────────────────────────────────────────

/// Linux:   ~/.config/hsk-tutor/
/// macOS:   ~/Library/Application Support/hsk-tutor/
/// Windows: %APPDATA%\hsk-tutor\
fn config_dir() -> Result<PathBuf> {
    let proj = ProjectDirs::from("", "", "hsk-tutor")
        .context("Cannot determine home directory for config")?;
    Ok(proj.config_dir().to_path_buf())
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

// ── Load ───────────────────────────────────────────────────

/// Load configuration and resolve the API key.
/// A missing config file means defaults; a missing key is a `TutorError::Configuration`.
pub fn load() -> Result<Config> {
    let path = config_path()?;
    let mut cfg = read_file(&path)?.unwrap_or_default();

    cfg.validate()?;
    cfg.api_key = resolve_api_key(std::env::var(API_KEY_ENV).ok(), &cfg.api_key)?;

    debug!(path = %path.display(), model = %cfg.model, "Config loaded");
    Ok(cfg)
}

fn read_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        debug!(path = %path.display(), "No config file, using defaults");
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config at {}", path.display()))?;
    let cfg = toml::from_str(&raw)
        .with_context(|| format!("Failed to parse config at {}", path.display()))?;
    Ok(Some(cfg))
}

/// Environment wins over the file; blank values count as missing.
pub fn resolve_api_key(env_key: Option<String>, file_key: &str) -> Result<String, TutorError> {
    env_key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .or_else(|| Some(file_key.trim().to_string()).filter(|k| !k.is_empty()))
        .ok_or_else(|| {
            TutorError::Configuration(format!(
                "No API key found. Set {API_KEY_ENV} or run `hsk-tutor setup`."
            ))
        })
}

// ── Interactive Setup Wizard ───────────────────────────────

/// Prompt for API key, model, level and currency, verify the key, and save.
pub async fn interactive_setup(path: &Path) -> Result<Config> {
    println!();
    println!("{}", "╔══════════════════════════════════════════════╗".cyan().bold());
    println!("{}", "║        HSK Tutor — First Time Setup          ║".cyan().bold());
    println!("{}", "╚══════════════════════════════════════════════╝".cyan().bold());
    println!();
    println!("  HSK Tutor needs an OpenAI API key to work.");
    println!(
        "  Create one at: {}",
        "https://platform.openai.com/api-keys".underline()
    );
    println!();

    let theme = ColorfulTheme::default();
    let mut cfg = read_file(path)?.unwrap_or_default();

    // ── Step 1: API Key ────────────────────────────────────
    let api_key: String = Input::with_theme(&theme)
        .with_prompt("🔑 OpenAI API Key")
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("API Key cannot be empty")
            } else if input.trim().len() < 20 {
                Err("API Key seems too short")
            } else {
                Ok(())
            }
        })
        .interact_text()?;
    cfg.api_key = api_key.trim().to_string();

    // ── Step 2: Verify API key with a real call ────────────
    verify_api_key_spinner(&cfg).await?;

    // ── Step 3: Model ──────────────────────────────────────
    let models = ["gpt-4", "gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "gpt-3.5-turbo"];
    let model_idx = Select::with_theme(&theme)
        .with_prompt("🤖 Select model")
        .default(0)
        .items(&models)
        .interact()?;
    cfg.model = models[model_idx].to_string();

    // ── Step 4: HSK level ──────────────────────────────────
    let levels: Vec<String> = HSK_LEVELS.map(|l| format!("HSK {l}")).collect();
    let level_idx = Select::with_theme(&theme)
        .with_prompt("📚 Tutoring level")
        .default(3)
        .items(&levels)
        .interact()?;
    cfg.hsk_level = level_idx as u8 + 1;

    // ── Step 5: Currency ───────────────────────────────────
    let currency_labels: Vec<String> = crate::tracking::CURRENCIES
        .iter()
        .map(|(code, sym, _)| format!("{code}  ({sym})"))
        .collect();
    let currency_idx = Select::with_theme(&theme)
        .with_prompt("💱 Display currency for cost tracking")
        .default(0)
        .items(&currency_labels)
        .interact()?;
    cfg.currency = crate::tracking::CURRENCIES[currency_idx].0.to_string();

    save(&cfg, path)?;

    println!();
    println!("  {} Config saved to {}", "✔".green().bold(), path.display());
    println!("  {} Start chatting with: {}", "✔".green().bold(), "hsk-tutor".bold());
    println!();

    Ok(cfg)
}

/// Verify the key against the models endpoint, with a spinner.
async fn verify_api_key_spinner(cfg: &Config) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .expect("invalid spinner template"),
    );
    spinner.set_message("Verifying API key...");
    spinner.enable_steady_tick(Duration::from_millis(80));

    let result = verify_api_key(cfg).await;

    match &result {
        Ok(()) => spinner.finish_with_message(format!("{}", "✔ API key is valid!".green().bold())),
        Err(e) => spinner.finish_with_message(format!("{} {}", "✘".red().bold(), e)),
    }

    result
}

async fn verify_api_key(cfg: &Config) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .context("Failed to build HTTP client for verification")?;

    let response = client
        .get(cfg.models_url())
        .bearer_auth(&cfg.api_key)
        .send()
        .await
        .context("Network error — check your internet connection")?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else if status.as_u16() == 401 || status.as_u16() == 403 {
        anyhow::bail!("API key is invalid or has insufficient permissions (HTTP {})", status)
    } else {
        anyhow::bail!("Unexpected response from the API (HTTP {}). Try again later.", status)
    }
}

// ── Save / Update ──────────────────────────────────────────

fn save(cfg: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create config directory {}", parent.display()))?;
    }

    let content = toml::to_string_pretty(cfg).context("Failed to serialize config")?;

    fs::write(path, &content)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    info!(path = %path.display(), "Config saved");
    Ok(())
}

/// Update just the API key, creating the config file if needed.
pub fn set_api_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        anyhow::bail!("API key cannot be empty");
    }
    let path = config_path()?;
    let mut cfg = read_file(&path)?.unwrap_or_default();
    cfg.api_key = key.trim().to_string();
    save(&cfg, &path)?;
    println!("  {} API key updated.", "✔".green().bold());
    Ok(())
}
