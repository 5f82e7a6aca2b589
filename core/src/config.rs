//! Layered configuration.
//!
//! Sources, lowest priority first: built-in defaults, the config file, `COROFY__*`
//! environment variables (a `.env` file is loaded first), then builder overrides.
//!
//! The config file is the explicit path, else `COROFY_CONFIG_PATH`, else `corofy.toml`
//! in the working directory when present.

use anyhow::{Context, Result};
use config::{Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::instrument::InstrumentOptions;
use crate::specs::SpecTable;

const DEFAULT_FILE: &str = "corofy.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    pub log: LogConfig,
    pub instrument: InstrumentConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstrumentConfig {
    pub fail_fast: bool,
    /// Method names treated as coroutine entries when no declaration says otherwise.
    pub entry_names: Vec<String>,
    /// Restore-point tables merged into every run.
    pub spec_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuntimeConfig {
    /// Print console output as it is produced.
    pub echo_console: bool,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load with no overrides.
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    pub fn instrument_options(&self) -> InstrumentOptions {
        InstrumentOptions {
            fail_fast: self.instrument.fail_fast,
        }
    }

    /// Spec table holding the configured entry names and every configured spec file.
    pub fn spec_table(&self) -> Result<SpecTable> {
        let mut table = SpecTable::new().with_entry_names(self.instrument.entry_names.clone());
        for path in &self.instrument.spec_files {
            table.extend(SpecTable::load(path)?);
        }
        Ok(table)
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    log_filter: Option<String>,
    fail_fast: Option<bool>,
}

impl ConfigBuilder {
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn log_filter(mut self, filter: Option<String>) -> Self {
        self.log_filter = filter;
        self
    }

    pub fn fail_fast(mut self, fail_fast: Option<bool>) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn build(self) -> Result<Config> {
        dotenvy::dotenv().ok();

        let explicit = self
            .config_path
            .or_else(|| std::env::var_os("COROFY_CONFIG_PATH").map(PathBuf::from));

        let mut builder = config::Config::builder()
            .set_default("log.filter", "info")?
            .set_default("instrument.fail_fast", false)?
            .set_default("instrument.entry_names", vec!["run"])?
            .set_default("instrument.spec_files", Vec::<String>::new())?
            .set_default("runtime.echo_console", true)?;

        builder = match &explicit {
            Some(path) => builder.add_source(File::from(path.as_path()).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_FILE).required(false)),
        };

        builder = builder
            .add_source(
                Environment::with_prefix("COROFY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("instrument.entry_names")
                    .with_list_parse_key("instrument.spec_files"),
            )
            .set_override_option("log.filter", self.log_filter)?
            .set_override_option("instrument.fail_fast", self.fail_fast)?;

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| match &explicit {
                Some(path) => format!("Failed to load configuration from {}", path.display()),
                None => "Failed to load configuration".to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.instrument.entry_names.iter().any(|n| n.trim().is_empty()) {
            anyhow::bail!("instrument.entry_names must not contain empty names");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_and_overrides() {
        let dir = std::env::temp_dir().join(format!("corofy-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("corofy.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[instrument]\nentry_names = [\"run\", \"main\"]\n\n[runtime]\necho_console = false"
        )
        .unwrap();

        let config = Config::builder()
            .config_path(Some(path.clone()))
            .fail_fast(Some(true))
            .build()
            .unwrap();
        assert_eq!(config.instrument.entry_names, vec!["run", "main"]);
        assert!(config.instrument.fail_fast);
        assert!(!config.runtime.echo_console);
        assert!(config.instrument_options().fail_fast);
        assert_eq!(config.spec_table().unwrap().entry_names(), vec!["run", "main"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_spec_file_without_entry_names_keeps_configured_names() {
        let dir = std::env::temp_dir().join(format!("corofy-config-specs-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let specs = dir.join("specs.toml");
        std::fs::write(
            &specs,
            "[[methods]]\nowner = \"demo/A\"\nname = \"main\"\n\n[[methods.restore_points]]\nname = \"yield\"\n",
        )
        .unwrap();
        let path = dir.join("corofy.toml");
        std::fs::write(
            &path,
            format!(
                "[instrument]\nentry_names = [\"main\"]\nspec_files = [{:?}]\n",
                specs.display().to_string()
            ),
        )
        .unwrap();

        let config = Config::builder().config_path(Some(path)).build().unwrap();
        let table = config.spec_table().unwrap();
        assert_eq!(table.entry_names(), vec!["main"]);
        assert_eq!(table.methods.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let missing = std::env::temp_dir().join("corofy-does-not-exist/corofy.toml");
        let err = Config::builder().config_path(Some(missing)).build().unwrap_err();
        assert!(err.to_string().contains("Failed to load configuration"));
    }
}
