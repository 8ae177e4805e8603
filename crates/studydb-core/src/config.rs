//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars.
//! Retrieval settings live under the `studydb` key; every field has a default
//! so an empty configuration is valid.
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const SETTINGS_KEY: &str = "studydb";

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            other => tracing::warn!(env = other, "unknown RUST_ENV, using config.toml only"),
        }
        // APP_STUDYDB__RRF_K=30 -> studydb.rrf_k
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.figment.contains(key)
    }

    /// Typed retrieval settings; a missing `studydb` section means defaults.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings = if self.contains(SETTINGS_KEY) {
            self.get::<Settings>(SETTINGS_KEY)?
        } else {
            Settings::default()
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding one sub-directory per session.
    pub session_root: String,
    /// RRF offset constant `C`.
    pub rrf_k: f64,
    /// Rank substituted for a chunk absent from one source list.
    pub missing_rank: usize,
    /// Each engine is asked for `oversample * top_k` candidates before fusion.
    pub oversample: usize,
    pub bm25: Bm25Settings,
    pub splitter: SplitterSettings,
    pub embedding: EmbeddingSettings,
    pub show_progress: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            session_root: "user_session".to_string(),
            rrf_k: 60.0,
            missing_rank: 1000,
            oversample: 2,
            bm25: Bm25Settings::default(),
            splitter: SplitterSettings::default(),
            embedding: EmbeddingSettings::default(),
            show_progress: false,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if !(self.rrf_k > 0.0) {
            return Err(Error::InvalidConfig(format!("rrf_k must be > 0, got {}", self.rrf_k)));
        }
        if self.oversample == 0 {
            return Err(Error::InvalidConfig("oversample must be >= 1".to_string()));
        }
        if self.splitter.chunk_size == 0 || self.splitter.chunk_overlap >= self.splitter.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "splitter.chunk_overlap ({}) must be smaller than a non-zero chunk_size ({})",
                self.splitter.chunk_overlap, self.splitter.chunk_size
            )));
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::InvalidConfig("embedding.batch_size must be > 0".to_string()));
        }
        Ok(())
    }

    /// `session_root` expanded and resolved against `base`.
    pub fn session_root_path(&self, base: &Path) -> PathBuf {
        resolve_with_base(base, &self.session_root)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Settings {
    pub k1: f64,
    pub b: f64,
    /// Floor for negative idf values, as a fraction of the mean idf.
    pub epsilon: f64,
}

impl Default for Bm25Settings {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75, epsilon: 0.25 }
    }
}

/// Sizes are in characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for SplitterSettings {
    fn default() -> Self {
        Self { chunk_size: 1000, chunk_overlap: 150 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model_dir: Option<String>,
    pub use_fake: bool,
    pub fake_dim: usize,
    pub batch_size: usize,
    pub max_len: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { model_dir: None, use_fake: false, fake_dim: 384, batch_size: 32, max_len: 256 }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
