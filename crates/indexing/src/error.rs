use thiserror::Error;

/// Errors raised while coordinating index maintenance.
#[derive(Debug, Error)]
pub enum IndexingError {
    /// The index engine rejected or failed the operation.
    #[error("Index engine failure: {0}")]
    Engine(String),

    /// A wire attribute was missing or unparseable.
    #[error("Bad task attribute '{name}': {value}")]
    BadAttribute { name: String, value: String },

    /// The metadata store failed underneath the operation.
    #[error(transparent)]
    Store(#[from] repo_store::StoreError),
}

impl IndexingError {
    pub(crate) fn bad_attribute(name: &str, value: impl Into<String>) -> Self {
        Self::BadAttribute {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexingError>;
