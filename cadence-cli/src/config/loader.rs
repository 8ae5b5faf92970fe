use anyhow::{Context, Result};
use cadence_core::CadenceConfig;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<CadenceConfig> {
        Self::load_layers(
            Self::user_config_path().as_deref(),
            &Self::project_config_path(),
        )
    }

    /// Load configuration from an optional user file overlaid by a project file.
    ///
    /// Missing files are skipped. Keys set in the project file win; anything
    /// neither file sets keeps its default.
    pub fn load_layers(user: Option<&Path>, project: &Path) -> Result<CadenceConfig> {
        let mut merged = toml::Table::new();

        // Layer 1: User config
        if let Some(user_path) = user
            && user_path.exists()
        {
            merged = Self::merge_tables(merged, Self::read_table(user_path)?);
        }

        // Layer 2: Project config
        if project.exists() {
            merged = Self::merge_tables(merged, Self::read_table(project)?);
        }

        let config: CadenceConfig = toml::Value::Table(merged)
            .try_into()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Get user config path (platform-specific)
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "cadence").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get project config path
    /// Can be overridden with CADENCE_PROJECT_CONFIG_DIR env var
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("CADENCE_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".cadence/config.toml")
        }
    }

    fn read_table(path: &Path) -> Result<toml::Table> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Merge two tables; overlay keys replace base keys, nested tables merge recursively
    fn merge_tables(mut base: toml::Table, overlay: toml::Table) -> toml::Table {
        for (key, value) in overlay {
            let merged = match (base.remove(&key), value) {
                (Some(toml::Value::Table(b)), toml::Value::Table(o)) => {
                    toml::Value::Table(Self::merge_tables(b, o))
                }
                (_, value) => value,
            };
            base.insert(key, merged);
        }
        base
    }
}
