/// Shared error type used across all mongo-configs crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A bundle definition is unusable: missing document id, duplicate
    /// flattened keys, an accessor that derives an empty key. Raised at
    /// registration, never at runtime.
    #[error("schema: {0}")]
    Schema(String),

    /// A strict read on a record that has no persisted document.
    #[error("not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// A decoded value does not fit the declared shape.
    #[error("type mismatch at `{path}`: {detail}")]
    TypeMismatch { path: String, detail: String },

    /// Gateway-level failure: timeout, network, auth. Retriable by the
    /// caller; the change-stream pump retries on its own.
    #[error("transport: {0}")]
    Transport(String),

    /// The pump exhausted its retries for one collection. Coherence for
    /// that collection is gone until the watch is restarted.
    #[error("change stream lost for {collection} after {failures} consecutive failures")]
    StreamLost { collection: String, failures: u32 },

    /// Cooperative cancellation of an in-flight operation.
    #[error("operation canceled")]
    Canceled,

    #[error("config: {0}")]
    Config(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for a [`Error::TypeMismatch`] at the given dotted path.
    pub fn mismatch(path: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Error::TypeMismatch {
            path: path.into(),
            detail: detail.to_string(),
        }
    }
}
