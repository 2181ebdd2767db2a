//! Error types for the want reconciliation engine.
//!
//! Each subsystem defines its own error type; user-facing errors (config,
//! validation) carry miette `#[diagnostic]` derives for actionable CLI
//! output, while internal plumbing errors stay plain `thiserror`.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the engine.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    PubSub(#[from] PubSubError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Convenience alias for functions returning engine results.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

// ---------------------------------------------------------------------------
// Config errors — surfaced to a human operator, so these carry diagnostics.
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("want definition is missing required field: {field}")]
    #[diagnostic(
        code(wantengine::config::missing_field),
        help("Every want needs `metadata.name` and either `metadata.type` or `spec.recipe`.")
    )]
    MissingField { field: String },

    #[error("want name '{name}' is already taken")]
    #[diagnostic(
        code(wantengine::config::duplicate_name),
        help("Want names must be unique within the store. Pick a different name or delete the existing want first.")
    )]
    DuplicateName { name: String },

    #[error("failed to parse want definition: {message}")]
    #[diagnostic(
        code(wantengine::config::parse_error),
        help("Check the YAML/JSON syntax against the documented want schema.")
    )]
    ParseError { message: String },

    #[error("unknown want type: {want_type}")]
    #[diagnostic(
        code(wantengine::config::unknown_type),
        help("No factory is registered for this want type. Register one with `Engine::register_want_type` before submitting wants of this type.")
    )]
    UnknownType { want_type: String },

    #[error("invalid schedule expression: {expr}")]
    #[diagnostic(
        code(wantengine::config::invalid_schedule),
        help("`when` entries take the form `{{at: RFC3339|\"HH:MM\", every: \"<N> <unit>\"}}` with unit in second(s)/minute(s)/hour(s)/day(s).")
    )]
    InvalidSchedule { expr: String },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("want not found: {id}")]
    NotFound { id: String },

    #[error("name '{name}' already registered to want {id}")]
    DuplicateName { name: String, id: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },
}

// ---------------------------------------------------------------------------
// Pub/sub errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("topic '{topic}' has no subscriber '{consumer_id}'")]
    NoSuchSubscription { topic: String, consumer_id: String },
}

// ---------------------------------------------------------------------------
// Mutation queue errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("mutation queue is closed")]
    QueueClosed,

    #[error("mutation queue is full")]
    QueueFull,

    #[error("mutation reply channel dropped before a response arrived")]
    ReplyDropped,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Module errors — a want type's own `Progress()` reporting that it cannot
// make progress at all, as opposed to a transient `AgentExecutionError`
// (spec §7). Raising one transitions the want straight to `failed`.
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone)]
pub enum ModuleError {
    #[error("{message}")]
    Fatal { message: String },
}

// ---------------------------------------------------------------------------
// Agent errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("no agent registered under name '{name}'")]
    NotFound { name: String },

    #[error("agent '{name}' already registered")]
    DuplicateName { name: String },

    #[error("no agent provides capability '{capability}'")]
    NoCapableAgent { capability: String },

    #[error("agent '{name}' execution failed: {message}")]
    ExecutionFailed { name: String, message: String },

    #[error("agent '{name}' invocation timed out after {timeout_secs}s")]
    Timeout { name: String, timeout_secs: u64 },
}

// ---------------------------------------------------------------------------
// Scheduler errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid duration string: {value}")]
    InvalidDuration { value: String },

    #[error("invalid time-of-day anchor: {value}")]
    InvalidAnchor { value: String },
}

// ---------------------------------------------------------------------------
// Webhook errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum WebhookError {
    #[error("unknown want: {id}")]
    #[diagnostic(code(wantengine::webhook::unknown_want))]
    UnknownWant { id: String },

    #[error("HMAC signature mismatch")]
    #[diagnostic(
        code(wantengine::webhook::hmac_mismatch),
        help("Recompute `base64(HMAC-SHA256(body, webhook_secret))` and send it as `Authorization: HMAC <value>`.")
    )]
    HmacMismatch,

    #[error("missing Authorization header but want declares a webhook_secret")]
    #[diagnostic(code(wantengine::webhook::missing_signature))]
    MissingSignature,

    #[error("malformed Authorization header: {message}")]
    #[diagnostic(code(wantengine::webhook::malformed_header))]
    MalformedHeader { message: String },

    #[error("payload is not valid JSON: {message}")]
    #[diagnostic(code(wantengine::webhook::invalid_payload))]
    InvalidPayload { message: String },
}

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("I/O error writing snapshot to {path}: {source}")]
    #[diagnostic(
        code(wantengine::persistence::io),
        help("Check that the parent directory exists and is writable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize snapshot: {message}")]
    #[diagnostic(code(wantengine::persistence::serialize))]
    Serialize { message: String },

    #[error("failed to parse snapshot at {path}: {message}")]
    #[diagnostic(
        code(wantengine::persistence::deserialize),
        help("The memory file may be from an incompatible version, or corrupted. Remove it to start from an empty store.")
    )]
    Deserialize { path: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_converts_to_engine_error() {
        let err = StoreError::NotFound { id: "abc".into() };
        let engine: EngineError = err.into();
        assert!(matches!(engine, EngineError::Store(StoreError::NotFound { .. })));
    }

    #[test]
    fn config_error_converts_to_engine_error() {
        let err = ConfigError::DuplicateName { name: "g".into() };
        let engine: EngineError = err.into();
        assert!(matches!(engine, EngineError::Config(ConfigError::DuplicateName { .. })));
    }

    #[test]
    fn mutation_error_wraps_config_error() {
        let cfg_err = ConfigError::MissingField { field: "metadata.name".into() };
        let mut_err: MutationError = cfg_err.into();
        assert!(matches!(mut_err, MutationError::Config(ConfigError::MissingField { .. })));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = ConfigError::UnknownType { want_type: "flight".into() };
        let msg = format!("{err}");
        assert!(msg.contains("flight"));
    }

    #[test]
    fn module_error_display_carries_the_message() {
        let err = ModuleError::Fatal { message: "unrecoverable config drift".into() };
        assert_eq!(format!("{err}"), "unrecoverable config drift");
    }
}
