use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {message}")]
    Backend { message: String },
    #[error("store key `{key}` holds a different value kind")]
    WrongKind { key: String },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn wrong_kind(key: impl Into<String>) -> Self {
        Self::WrongKind { key: key.into() }
    }
}
