//! Configuration file management for coursegen.
//!
//! Provides a TOML-based config file at `~/.config/coursegen/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.
//!
//! API keys never live in the config file; they come from the environment
//! (`ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, `COURSEGEN_SEARCH_API_KEY`).

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use coursegen_core::llm::anthropic::AnthropicConfig;
use coursegen_core::llm::openai::OpenAiConfig;
use coursegen_core::llm::{AnthropicProvider, OpenAiProvider, ProviderRegistry};
use coursegen_core::search::{SearchClient, SearchConfig};
use coursegen_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub search: SearchSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LlmSection {
    pub anthropic_base_url: String,
    pub openai_base_url: String,
    pub image_model: String,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            anthropic_base_url: AnthropicConfig::DEFAULT_BASE_URL.to_owned(),
            openai_base_url: OpenAiConfig::DEFAULT_BASE_URL.to_owned(),
            image_model: OpenAiConfig::DEFAULT_IMAGE_MODEL.to_owned(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SearchSection {
    /// Search API base URL; empty disables the web_search step's client.
    #[serde(default)]
    pub base_url: String,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the coursegen config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/coursegen` or
/// `~/.config/coursegen`. We intentionally ignore the platform-specific
/// `dirs::config_dir()` (which returns `~/Library/Application Support` on
/// macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("coursegen");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("coursegen")
}

/// Return the path to the coursegen config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix (the database URL may carry
/// credentials).
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct CoursegenConfig {
    pub db_config: DbConfig,
    pub llm: LlmSection,
    pub search: SearchSection,
}

impl CoursegenConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default.
    ///
    /// DB URL: `cli_db_url` > `COURSEGEN_DATABASE_URL` env >
    /// `config_file.database.url` > `DbConfig::DEFAULT_URL`.
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("COURSEGEN_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        let (llm, search) = match file_config {
            Some(cfg) => (cfg.llm, cfg.search),
            None => (LlmSection::default(), SearchSection::default()),
        };

        Ok(Self {
            db_config,
            llm,
            search,
        })
    }

    /// Build the provider registry from resolved config plus API-key env
    /// vars. Providers without a key are simply not registered.
    pub fn build_registry(&self) -> Result<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();

        if let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") {
            registry.register(AnthropicProvider::new(AnthropicConfig {
                base_url: self.llm.anthropic_base_url.clone(),
                api_key,
            }));
        }

        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            registry.register(OpenAiProvider::new(OpenAiConfig {
                base_url: self.llm.openai_base_url.clone(),
                api_key,
                image_model: self.llm.image_model.clone(),
            }));
            registry.set_image_provider("openai")?;
        }

        if registry.is_empty() {
            anyhow::bail!(
                "no LLM providers configured; set ANTHROPIC_API_KEY and/or OPENAI_API_KEY"
            );
        }

        Ok(registry)
    }

    /// Build the optional search client.
    pub fn build_search(&self) -> Option<SearchClient> {
        if self.search.base_url.is_empty() {
            return None;
        }
        let api_key = std::env::var("COURSEGEN_SEARCH_API_KEY").unwrap_or_default();
        Some(SearchClient::new(SearchConfig {
            base_url: self.search.base_url.clone(),
            api_key,
        }))
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[test]
    fn config_roundtrip_through_toml() {
        let original = ConfigFile {
            database: DatabaseSection {
                url: "postgresql://testhost:5432/testdb".to_string(),
            },
            llm: LlmSection::default(),
            search: SearchSection {
                base_url: "https://search.example".to_string(),
            },
        };

        let contents = toml::to_string_pretty(&original).unwrap();
        let loaded: ConfigFile = toml::from_str(&contents).unwrap();

        assert_eq!(loaded.database.url, original.database.url);
        assert_eq!(loaded.llm.image_model, "dall-e-3");
        assert_eq!(loaded.search.base_url, "https://search.example");
    }

    #[test]
    fn config_parses_without_optional_sections() {
        let loaded: ConfigFile =
            toml::from_str("[database]\nurl = \"postgresql://localhost:5432/coursegen\"\n")
                .unwrap();
        assert_eq!(
            loaded.llm.anthropic_base_url,
            AnthropicConfig::DEFAULT_BASE_URL
        );
        assert!(loaded.search.base_url.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let _lock = lock_env();

        // Test the permission-setting logic directly on a temp file.
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("test.toml");
        std::fs::write(&file, "test").unwrap();

        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&file, perms).unwrap();

        let meta = std::fs::metadata(&file).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn resolve_with_cli_flag_overrides_all() {
        let _lock = lock_env();

        unsafe { std::env::set_var("COURSEGEN_DATABASE_URL", "postgresql://env:5432/envdb") };

        let config = CoursegenConfig::resolve(Some("postgresql://cli:5432/clidb")).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");

        unsafe { std::env::remove_var("COURSEGEN_DATABASE_URL") };
    }

    #[test]
    fn resolve_with_env_var_overrides_config_file() {
        let _lock = lock_env();

        unsafe { std::env::set_var("COURSEGEN_DATABASE_URL", "postgresql://env:5432/envdb") };

        let config = CoursegenConfig::resolve(None).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://env:5432/envdb");

        unsafe { std::env::remove_var("COURSEGEN_DATABASE_URL") };
    }

    #[test]
    fn resolve_defaults_db_url_when_nothing_set() {
        let _lock = lock_env();

        unsafe { std::env::remove_var("COURSEGEN_DATABASE_URL") };
        // Point HOME and XDG_CONFIG_HOME at a temp dir so load_config()
        // cannot find a real config file.
        let tmp = tempfile::TempDir::new().unwrap();
        let orig_home = std::env::var("HOME").ok();
        let orig_xdg = std::env::var("XDG_CONFIG_HOME").ok();
        unsafe { std::env::set_var("HOME", tmp.path()) };
        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };

        let config = CoursegenConfig::resolve(None).unwrap();

        match orig_home {
            Some(h) => unsafe { std::env::set_var("HOME", h) },
            None => unsafe { std::env::remove_var("HOME") },
        }
        match orig_xdg {
            Some(x) => unsafe { std::env::set_var("XDG_CONFIG_HOME", x) },
            None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
        }

        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
    }

    #[test]
    fn build_registry_requires_a_key() {
        let _lock = lock_env();

        let orig_anthropic = std::env::var("ANTHROPIC_API_KEY").ok();
        let orig_openai = std::env::var("OPENAI_API_KEY").ok();
        unsafe { std::env::remove_var("ANTHROPIC_API_KEY") };
        unsafe { std::env::remove_var("OPENAI_API_KEY") };

        let config = CoursegenConfig {
            db_config: DbConfig::new(DbConfig::DEFAULT_URL),
            llm: LlmSection::default(),
            search: SearchSection::default(),
        };
        let result = config.build_registry();

        match orig_anthropic {
            Some(k) => unsafe { std::env::set_var("ANTHROPIC_API_KEY", k) },
            None => unsafe { std::env::remove_var("ANTHROPIC_API_KEY") },
        }
        match orig_openai {
            Some(k) => unsafe { std::env::set_var("OPENAI_API_KEY", k) },
            None => unsafe { std::env::remove_var("OPENAI_API_KEY") },
        }

        assert!(result.is_err(), "registry with no keys should error");
    }

    #[test]
    fn build_search_disabled_without_base_url() {
        let config = CoursegenConfig {
            db_config: DbConfig::new(DbConfig::DEFAULT_URL),
            llm: LlmSection::default(),
            search: SearchSection::default(),
        };
        assert!(config.build_search().is_none());
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("coursegen/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
