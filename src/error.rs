use thiserror::Error;

/// Errors surfaced by the planner, detector, registry, fetcher and executor.
///
/// A cycle or a missing provider aborts planning whole; no variant here is
/// recovered internally, all are propagated to the caller.
#[derive(Debug, Error)]
pub enum ThinCiError {
    #[error("malformed intent: {0}")]
    MalformedIntent(String),

    #[error("provider '{name}' not registered (available: {})", available.join(", "))]
    ProviderUnavailable { name: String, available: Vec<String> },

    #[error("provider '{0}' has no thinCI.actions section")]
    ProviderMissingThinCi(String),

    #[error("circular dependency detected in component graph")]
    DependencyCycle { remaining: Vec<String> },

    #[error("component '{0}' not found in intent")]
    ComponentMissing(String),

    #[error("template error: {0}")]
    TemplateFailure(String),

    #[error("execution failed in {phase} step '{step}' (exit {status:?}): {stderr}")]
    ExecutionFailure {
        phase: String,
        step: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("serialization error: {0}")]
    SerializationFailure(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ThinCiError>;
