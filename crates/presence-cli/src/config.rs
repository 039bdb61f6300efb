use anyhow::{bail, Context, Result};
use presence_core::{DEFAULT_MATCH_THRESHOLD, DEFAULT_MAX_UPLOAD_BYTES};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Settings file shape. Every key is optional; missing keys fall back to
/// defaults derived from `data_dir`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    encodings_path: Option<PathBuf>,
    uploads_dir: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    match_threshold: Option<f32>,
    max_upload_bytes: Option<u64>,
    archive_scans: Option<bool>,
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Base directory for everything not configured explicitly.
    pub data_dir: PathBuf,
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Encoding store file.
    pub encodings_path: PathBuf,
    /// Registered photos and archived scans.
    pub uploads_dir: PathBuf,
    pub backup_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Euclidean distance a match must stay under.
    pub match_threshold: f32,
    pub max_upload_bytes: u64,
    /// Keep a copy of every recognised scan.
    pub archive_scans: bool,
}

impl Config {
    /// Defaults, then the TOML file (`path` or `$PRESENCE_CONFIG`), then
    /// `PRESENCE_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("PRESENCE_CONFIG").map(PathBuf::from));
        let file = match &path {
            Some(p) => FileConfig::read(p)?,
            None => FileConfig::default(),
        };

        let config = Self::resolve(file, |key| std::env::var(key).ok())?;
        config.validate()?;
        tracing::debug!(config = ?config, file = ?path, "configuration loaded");
        Ok(config)
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path_var = |key: &str| env(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        let data_dir = path_var("PRESENCE_DATA_DIR")
            .or(file.data_dir)
            .unwrap_or_else(|| default_data_dir(&env));

        let pick = |key: &str, from_file: Option<PathBuf>, default: PathBuf| {
            path_var(key).or(from_file).unwrap_or(default)
        };

        let match_threshold = match env("PRESENCE_MATCH_THRESHOLD") {
            Some(v) => parse_env("PRESENCE_MATCH_THRESHOLD", &v)?,
            None => file.match_threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD),
        };
        let max_upload_bytes = match env("PRESENCE_MAX_UPLOAD_BYTES") {
            Some(v) => parse_env("PRESENCE_MAX_UPLOAD_BYTES", &v)?,
            None => file.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        };
        let archive_scans = match env("PRESENCE_ARCHIVE_SCANS") {
            Some(v) => v != "0" && !v.eq_ignore_ascii_case("false"),
            None => file.archive_scans.unwrap_or(true),
        };

        Ok(Self {
            db_path: pick("PRESENCE_DB_PATH", file.db_path, data_dir.join("attendance.db")),
            encodings_path: pick(
                "PRESENCE_ENCODINGS_PATH",
                file.encodings_path,
                data_dir.join("face_data").join("encodings.bin"),
            ),
            uploads_dir: pick("PRESENCE_UPLOADS_DIR", file.uploads_dir, data_dir.join("uploads")),
            backup_dir: pick("PRESENCE_BACKUP_DIR", file.backup_dir, data_dir.join("backups")),
            model_dir: pick("PRESENCE_MODEL_DIR", file.model_dir, presence_vision::default_model_dir()),
            data_dir,
            match_threshold,
            max_upload_bytes,
            archive_scans,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            bail!("match_threshold must be a positive number, got {}", self.match_threshold);
        }
        if self.max_upload_bytes == 0 {
            bail!("max_upload_bytes must be greater than zero");
        }
        Ok(())
    }
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("presence")
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {key}: {value:?}"))
}
