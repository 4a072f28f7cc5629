//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Resource with id [{logical_id}] is invalid. {message}")]
    InvalidResource { logical_id: String, message: String },

    #[error("Event with id [{event_id}] of resource [{logical_id}] is invalid. {message}")]
    InvalidEvent {
        logical_id: String,
        event_id: String,
        message: String,
    },

    #[error(
        "Transform failed. Resource with id [{generated_id}] generated by [{logical_id}] \
         already exists in the template."
    )]
    DuplicateLogicalId {
        logical_id: String,
        generated_id: String,
    },

    #[error("Structure of the template is invalid. {message}")]
    InvalidTemplate { message: String },

    /// An orchestrator/caller bug rather than bad user input. Not recoverable.
    #[error("Internal contract violated: {message}")]
    Contract { message: String },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

impl CoreError {
    /// Schema or property violation scoped to one resource.
    pub fn invalid_resource(logical_id: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::InvalidResource {
            logical_id: logical_id.into(),
            message: message.into(),
        }
    }

    /// Trigger-scoped violation. Carries the owning resource id and the
    /// trigger's own relative id.
    pub fn invalid_event(
        logical_id: impl Into<String>,
        event_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CoreError::InvalidEvent {
            logical_id: logical_id.into(),
            event_id: event_id.into(),
            message: message.into(),
        }
    }

    pub fn invalid_template(message: impl Into<String>) -> Self {
        CoreError::InvalidTemplate {
            message: message.into(),
        }
    }

    pub fn contract(message: impl Into<String>) -> Self {
        CoreError::Contract {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
