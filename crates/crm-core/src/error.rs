use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("configuration not found: {0}")]
    ConfigNotFound(String),

    #[error("duplicate action id {0} in transition graph")]
    DuplicateAction(i32),

    #[error("synapse {synapse} references unknown input action {action}")]
    UnknownInput { synapse: i32, action: i32 },

    #[error("action not found: {0}")]
    ActionNotFound(i32),

    #[error("invalid action type: {0}")]
    InvalidActionType(String),

    #[error("invalid completion action: {0}")]
    InvalidCompletionAction(String),

    #[error("cannot decode transition key '{0}'")]
    InvalidTransitionKey(String),

    #[error("cannot decode transition magic '{0}'")]
    InvalidTransitionMagic(String),

    #[error("result for transition {got} does not belong to transition {expected}")]
    StaleResult { expected: i32, got: i32 },

    #[error("result for engine {got} does not belong to engine {expected}")]
    ForeignResult { expected: String, got: String },

    #[error("unknown fencing call: {0}")]
    UnknownFenceCall(u64),

    #[error("fencing request failed: {0}")]
    Fencing(String),

    #[error("status update failed: {0}")]
    StatusUpdate(String),

    #[error("invalid configuration snapshot: {0}")]
    InvalidSnapshot(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CrmError>;
