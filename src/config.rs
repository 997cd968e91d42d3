use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GridstoreConfig {
    pub database: Option<String>,
    pub auth_realm: Option<String>,
    pub friends_realm: Option<String>,
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("gridstore.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".gridstore").join("grid.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<GridstoreConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: GridstoreConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &GridstoreConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config(Some(&dir.path().join("gridstore.toml"))).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn write_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gridstore.toml");

        let config = GridstoreConfig {
            database: Some("grid.db".to_string()),
            auth_realm: Some("auth".to_string()),
            friends_realm: None,
        };
        write_config(&path, &config, false).unwrap();

        let loaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded.database.as_deref(), Some("grid.db"));
        assert_eq!(loaded.auth_realm.as_deref(), Some("auth"));
        assert!(loaded.friends_realm.is_none());
    }

    #[test]
    fn write_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gridstore.toml");
        let config = GridstoreConfig::default();

        write_config(&path, &config, false).unwrap();
        assert!(write_config(&path, &config, false).is_err());
        write_config(&path, &config, true).unwrap();
    }
}
