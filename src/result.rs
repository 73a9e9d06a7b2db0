//! Results delivered to callers, one per received chunk or error.

use serde::de::DeserializeOwned;

/// Method name missing from the resolved API table. No bytes are sent.
pub const WRONG_METHOD_CODE: i64 = -100;
/// Connection ended while the session was still open.
pub const DISCONNECTED_CODE: i64 = -101;
/// Call arguments could not be packed. No bytes are sent.
pub const INVALID_ARGUMENTS_CODE: i64 = -102;
/// The call could not be written to the connection.
pub const SEND_FAILED_CODE: i64 = -103;

/// Failure reported for a single session, remote or synthesised locally.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
}

impl RemoteError {
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    #[must_use]
    pub fn wrong_method() -> Self {
        Self::new(WRONG_METHOD_CODE, "Wrong method name")
    }

    #[must_use]
    pub fn disconnected() -> Self {
        Self::new(DISCONNECTED_CODE, "connection closed")
    }
}

/// Error returned by [`ServiceResult::extract`].
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The result carries a remote error instead of a payload.
    #[error("remote error: {0}")]
    Remote(RemoteError),
    /// The payload does not decode into the requested shape.
    #[error("failed to decode payload: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// One item of a session's result stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceResult {
    /// Raw MessagePack payload of a chunk, decoded lazily by [`Self::extract`].
    Chunk(Vec<u8>),
    Error(RemoteError),
}

impl ServiceResult {
    /// Decode the chunk payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Remote`] for error results and
    /// [`ExtractError::Decode`] when the payload does not match `T`.
    pub fn extract<T: DeserializeOwned>(&self) -> Result<T, ExtractError> {
        match self {
            Self::Chunk(payload) => Ok(rmp_serde::from_slice(payload)?),
            Self::Error(err) => Err(ExtractError::Remote(err.clone())),
        }
    }

    /// The error carried by this result, if any.
    #[must_use]
    pub fn err(&self) -> Option<&RemoteError> {
        match self {
            Self::Chunk(_) => None,
            Self::Error(err) => Some(err),
        }
    }

    /// Raw payload bytes of a chunk.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Self::Chunk(payload) => Some(payload),
            Self::Error(_) => None,
        }
    }

    /// Convert into a standard `Result` over the raw payload.
    ///
    /// # Errors
    ///
    /// Returns the carried [`RemoteError`] for error results.
    pub fn into_result(self) -> Result<Vec<u8>, RemoteError> {
        match self {
            Self::Chunk(payload) => Ok(payload),
            Self::Error(err) => Err(err),
        }
    }
}

#[cfg(test)]
#[path = "result_test.rs"]
mod tests;
