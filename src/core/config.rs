//! `accolade.toml` loading.
//!
//! A missing file is not an error: every section has defaults. Command-line flags
//! and their environment variables are layered on top by the CLI.

use crate::core::deadline::DEFAULT_OP_TIMEOUT;
use crate::core::error::AccoladeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "accolade.toml";
pub const DEFAULT_DATA_DIR: &str = ".accolade/data";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub data_dir: PathBuf,
    pub coordinator: CoordinatorConfig,
    pub logging: LoggingConfig,
    pub directory: DirectoryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            coordinator: CoordinatorConfig::default(),
            logging: LoggingConfig::default(),
            directory: DirectoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    pub op_timeout_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            op_timeout_secs: DEFAULT_OP_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `accolade=debug`.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UserEntry {
    pub id: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StudentEntry {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub student_number: String,
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub advisor_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct DirectoryConfig {
    pub users: Vec<UserEntry>,
    pub students: Vec<StudentEntry>,
    /// role id -> granted permissions
    pub roles: BTreeMap<String, Vec<String>>,
}

impl Config {
    pub fn parse(content: &str) -> Result<Self, AccoladeError> {
        let config: Config =
            toml::from_str(content).map_err(|e| AccoladeError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path (must exist) or from `./accolade.toml` (optional).
    pub fn load(explicit: Option<&Path>) -> Result<Self, AccoladeError> {
        match explicit {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|e| {
                    AccoladeError::ConfigError(format!("{}: {}", path.display(), e))
                })?;
                Self::parse(&content)
            }
            None => {
                let path = Path::new(CONFIG_FILE_NAME);
                if path.exists() {
                    let content = fs::read_to_string(path).map_err(AccoladeError::IoError)?;
                    Self::parse(&content)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), AccoladeError> {
        if self.coordinator.op_timeout_secs == 0 {
            return Err(AccoladeError::ConfigError(
                "coordinator.op_timeout_secs must be at least 1".into(),
            ));
        }
        for student in &self.directory.students {
            if !self.directory.users.iter().any(|u| u.id == student.user_id) {
                return Err(AccoladeError::ConfigError(format!(
                    "student profile {} belongs to unknown user {}",
                    student.id, student.user_id
                )));
            }
        }
        Ok(())
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.coordinator.op_timeout_secs)
    }

    /// Flag/env overrides; `None` keeps the file value.
    pub fn with_overrides(mut self, data_dir: Option<PathBuf>, op_timeout_secs: Option<u64>) -> Result<Self, AccoladeError> {
        if let Some(dir) = data_dir {
            self.data_dir = dir;
        }
        if let Some(secs) = op_timeout_secs {
            self.coordinator.op_timeout_secs = secs;
        }
        self.validate()?;
        Ok(self)
    }
}
