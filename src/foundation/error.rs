pub type ForgeResult<T> = Result<T, ForgeError>;

#[derive(thiserror::Error, Debug)]
pub enum ForgeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("decode error: layer {layer} trait '{trait_name}': {reason}")]
    Decode {
        layer: usize,
        trait_name: String,
        reason: String,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ForgeError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn decode(layer: usize, trait_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            layer,
            trait_name: trait_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }

    /// Errors that end the whole batch rather than a single attempt.
    pub fn aborts_batch(&self) -> bool {
        !matches!(self, Self::Decode { .. })
    }
}

impl From<serde_json::Error> for ForgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::serde(err.to_string())
    }
}
