use std::path::{Path, PathBuf};

use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const REMOTE_KIND_LOCAL_DIR: &str = "local_dir";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub version: u32,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Relative paths resolve against the data directory.
    pub db_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub kind: String,
    /// Defaults to `<data_dir>/remote`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_SCHEMA_VERSION,
            store: StoreConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_file: "seishin.sqlite".to_string(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            kind: REMOTE_KIND_LOCAL_DIR.to_string(),
            dir: None,
        }
    }
}

impl AppConfig {
    pub fn db_path(&self, data_dir: &Path) -> PathBuf {
        resolve_under(data_dir, &self.store.db_file)
    }

    pub fn remote_dir(&self, data_dir: &Path) -> PathBuf {
        match self.remote.dir.as_deref() {
            Some(dir) => resolve_under(data_dir, dir),
            None => data_dir.join("remote"),
        }
    }
}

fn resolve_under(base: &Path, p: &str) -> PathBuf {
    let p = Path::new(p);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

pub fn config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("config.toml")
}

/// Load `<config_dir>/config.toml`; a missing file yields the defaults.
pub fn load_config(config_dir: &Path) -> Result<AppConfig> {
    let path = config_path(config_dir);
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let text = std::fs::read_to_string(&path).map_err(|e| Error::InvalidConfig {
        message: format!("config read failed: {e}"),
    })?;

    let config = parse_config(&text).map_err(|e| Error::InvalidConfig {
        message: format!("config invalid: {e}"),
    })?;
    validate_config(&config)?;
    Ok(config)
}

pub fn parse_config(text: &str) -> std::result::Result<AppConfig, toml::de::Error> {
    let raw: toml::Value = toml::from_str(text)?;
    let version = raw
        .get("version")
        .and_then(|v| v.as_integer())
        .and_then(|v| u32::try_from(v).ok());

    match version {
        Some(CONFIG_SCHEMA_VERSION) => toml::from_str::<AppConfig>(text),
        Some(other) => Err(toml::de::Error::custom(format!(
            "unsupported config schema version: {other} (expected {CONFIG_SCHEMA_VERSION})"
        ))),
        None => Err(toml::de::Error::custom("missing config version")),
    }
}

pub fn to_toml(config: &AppConfig) -> Result<String> {
    validate_config(config)?;
    toml::to_string(config).map_err(|e| Error::InvalidConfig {
        message: format!("config encode failed: {e}"),
    })
}

pub fn save_config(config_dir: &Path, config: &AppConfig) -> Result<()> {
    let text = to_toml(config)?;

    let path = config_path(config_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::InvalidConfig {
            message: format!("config dir create failed: {e}"),
        })?;
    }

    atomic_write(&path, text.as_bytes()).map_err(|e| Error::InvalidConfig {
        message: format!("config write failed: {e}"),
    })?;
    Ok(())
}

pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.version != CONFIG_SCHEMA_VERSION {
        return Err(Error::InvalidConfig {
            message: format!(
                "version must be {CONFIG_SCHEMA_VERSION} (got {})",
                config.version
            ),
        });
    }
    if config.store.db_file.trim().is_empty() {
        return Err(Error::InvalidConfig {
            message: "store.db_file must not be empty".to_string(),
        });
    }
    if config.remote.kind != REMOTE_KIND_LOCAL_DIR {
        return Err(Error::InvalidConfig {
            message: format!(
                "remote.kind must be \"{REMOTE_KIND_LOCAL_DIR}\" (got {:?})",
                config.remote.kind
            ),
        });
    }
    if let Some(dir) = config.remote.dir.as_deref()
        && dir.trim().is_empty()
    {
        return Err(Error::InvalidConfig {
            message: "remote.dir must not be empty when set".to_string(),
        });
    }
    Ok(())
}

/// Read a dotted key (`store.db_file`, `remote.dir`, ...) as display text.
pub fn get_key(config: &AppConfig, key: &str) -> Result<Option<String>> {
    match key {
        "store.db_file" => Ok(Some(config.store.db_file.clone())),
        "remote.kind" => Ok(Some(config.remote.kind.clone())),
        "remote.dir" => Ok(config.remote.dir.clone()),
        other => Err(unknown_key(other)),
    }
}

/// Set a dotted key from text. The result is validated as a whole.
pub fn set_key(config: &mut AppConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "store.db_file" => config.store.db_file = value.to_string(),
        "remote.kind" => config.remote.kind = value.to_string(),
        "remote.dir" => {
            config.remote.dir = (!value.is_empty()).then(|| value.to_string());
        }
        other => return Err(unknown_key(other)),
    }
    validate_config(config)
}

fn unknown_key(key: &str) -> Error {
    Error::InvalidConfig {
        message: format!("unknown config key: {key}"),
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(
            config.db_path(Path::new("/data")),
            PathBuf::from("/data/seishin.sqlite")
        );
        assert_eq!(
            config.remote_dir(Path::new("/data")),
            PathBuf::from("/data/remote")
        );
    }

    #[test]
    fn sections_are_optional() {
        let c = parse_config("version = 1\n[remote]\nkind = \"local_dir\"\ndir = \"/mnt/nas\"\n")
            .unwrap();
        assert_eq!(c.store, StoreConfig::default());
        assert_eq!(c.remote_dir(Path::new("/data")), PathBuf::from("/mnt/nas"));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let err = parse_config("version = 9\n").unwrap_err();
        assert!(err.to_string().contains("unsupported config schema version"));
        assert!(parse_config("[store]\ndb_file = \"x\"\n").is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        set_key(&mut config, "remote.dir", "backups").unwrap();
        save_config(dir.path(), &config).unwrap();

        let loaded = load_config(dir.path()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            get_key(&loaded, "remote.dir").unwrap().as_deref(),
            Some("backups")
        );
        assert!(!dir.path().join("config.tmp").exists());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = AppConfig::default();
        assert!(set_key(&mut config, "remote.kind", "gdrive").is_err());

        let config = AppConfig::default();
        assert!(get_key(&config, "nope").is_err());
    }

    #[test]
    fn kdf_cost_is_not_configurable() {
        // The envelope carries no iteration count, so every reader must use
        // the same fixed cost.
        let mut config = AppConfig::default();
        assert!(set_key(&mut config, "backup.kdf_iterations", "200000").is_err());
        assert!(get_key(&config, "backup.kdf_iterations").is_err());

        let old = parse_config("version = 1\n[backup]\nkdf_iterations = 200000\n").unwrap();
        assert_eq!(old, AppConfig::default());
        assert!(!to_toml(&old).unwrap().contains("kdf_iterations"));

        let kdf = crate::crypto::KdfParams::default();
        assert_eq!(kdf.iterations, crate::crypto::KDF_ITERATIONS);
        assert_eq!(kdf.iterations, 600_000);
        assert_eq!(crate::BackupConfig::new("pw").kdf, kdf);
        assert_eq!(crate::RestoreConfig::new("pw").kdf, kdf);
    }
}
