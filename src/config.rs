use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "live-streaming.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// if left empty, the deploy script falls back to "live-streaming"
    pub stack_name: String,
    pub region: String,
    /// only used by dry runs, a real deployment resolves it from the caller's credentials
    pub account_id: String,
    pub solution_id: String,
    pub version: String,
    /// value of the AnonymousData mapping
    pub send_anonymous_data: bool,
    pub handler: HandlerConfig,
    pub metrics: MetricsConfig,
    pub logger: LoggerConfig,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            stack_name: "live-streaming".into(),
            region: "us-east-1".into(),
            account_id: "123456789012".into(),
            solution_id: "SO0109".into(),
            version: "v1.0.0".into(),
            send_anonymous_data: true,
            handler: Default::default(),
            metrics: Default::default(),
            logger: Default::default(),
        }
    }
}

/// where the custom resource handler code lives, and how its function is configured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    pub code_bucket: String,
    pub code_key: String,
    pub runtime: String,
    pub timeout_seconds: u32,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            code_bucket: "solutions-us-east-1".into(),
            code_key: "live-streaming-on-aws-with-amazon-s3/v1.0.0/custom-resource.zip".into(),
            runtime: "nodejs18.x".into(),
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub endpoint: String,
    pub timeout_seconds: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://metrics.awssolutionsbuilder.com/generic".into(),
            timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: String,
    pub format: LoggerFormat,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LoggerFormat::Pretty,
        }
    }
}

impl CompilerConfig {
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// a missing file is not an error, every field has a default.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(?path, "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn solution_identifier(&self) -> String {
        format!("AwsSolution/{}/{}", self.solution_id, self.version)
    }

    pub fn template_description(&self) -> String {
        format!(
            "({}) Live Streaming on AWS with Amazon S3 Solution {}",
            self.solution_id, self.version
        )
    }
}
