use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ParameterError {
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("Invalid value '{value}' for parameter {name}. Allowed values are: {}", allowed.join(", "))]
    NotAllowed {
        name: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("Malformed parameter line {line}: '{content}'. Expected Key=Value")]
    Malformed { line: usize, content: String },
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Logical id '{0}' is declared more than once")]
    DuplicateLogicalId(String),

    #[error("Failed to serialize template: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Unresolved reference '{0}'")]
    UnknownReference(String),

    #[error("Resource '{resource}' has no attribute '{attribute}'")]
    UnknownAttribute { resource: String, attribute: String },

    #[error("Unknown condition '{0}'")]
    UnknownCondition(String),

    #[error("Mapping lookup {map}.{top_key}.{second_key} failed")]
    MissingMapping {
        map: String,
        top_key: String,
        second_key: String,
    },

    #[error("Resource '{0}' is referenced before it was provisioned")]
    NotProvisioned(String),

    #[error("Unsupported intrinsic function '{0}'")]
    UnsupportedIntrinsic(String),

    #[error("Malformed {function}: {reason}")]
    Malformed { function: String, reason: String },

    #[error("Dependency cycle between resources: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Resource '{resource}' depends on undeclared resource '{missing}'")]
    MissingDependency { resource: String, missing: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Resource {logical_id} failed: {reason}")]
    ResourceFailed { logical_id: String, reason: String },

    #[error("Stack {0} already exists")]
    StackExists(String),

    #[error("Stack {0} does not exist")]
    NoStack(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Metrics request failed: {0}")]
    Http(String),

    #[error("Metrics sink rejected record: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to make {path:?} executable: {reason}")]
    Chmod { path: PathBuf, reason: String },

    #[error(transparent)]
    Template(#[from] TemplateError),
}
