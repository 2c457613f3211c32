use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum MillError {
    #[error("parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("build error: {0}")]
    BuildError(String),

    #[error("command error: {0}")]
    CommandError(String),

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("circular dependency: {0}")]
    CircularDependency(String),

    #[error("boolean expression error: {0}")]
    BoolExprError(String),

    #[error("module error: {0}")]
    ModuleError(String),

    #[error("duplicate target {name} declared at {first} and {second}")]
    DuplicateTarget {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("TOML deserialization error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, MillError>;

/// Extension trait that adds `.context()` to any Result, converting errors
/// into `MillError::BuildError` with a context message. Mirrors
/// `anyhow::Context` so engine code can use familiar syntax without pulling
/// `anyhow` into the library.
pub trait ResultExt<T> {
    fn context(self, msg: impl std::fmt::Display) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| MillError::BuildError(format!("{}: {}", msg, e)))
    }
}
