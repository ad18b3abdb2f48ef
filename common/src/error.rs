use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a tree selection could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("No item selected.")]
    NoSelection,
    #[error("Could not find server node.")]
    NoServer,
    #[error("Action '{action}' is not available for the current selection.")]
    NotApplicable { action: &'static str },
}

/// A field-level validation failure, reported inline on `field`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    /// Row index when the failure belongs to a collection row.
    pub row: Option<usize>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            row: None,
        }
    }

    pub fn in_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Transport(String),

    /// An operation type outside the closed audit enumeration.
    #[error("Invalid operation type: {0}")]
    QueryConstruction(String),

    #[error("Invalid filter value for {key}: {value}")]
    InvalidFilter { key: &'static str, value: String },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected response to {request}")]
    UnexpectedResponse { request: &'static str },
}

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport(message.into())
    }
}
