use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::flag::{null_as_default, Flag, Override};
use crate::identity::Identity;

/// Path of the endpoint that serves the full flag state.
pub const STATE_PATH: &str = "/sdk/initialize";

/// Path of the endpoint that serves the identity for `identifier`.
pub fn identity_path(identifier: &str) -> String {
    format!("/sdk/identities/{}", identifier)
}

/// The payload of a state fetch: every flag definition and every global override.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct State {
    #[serde(default, deserialize_with = "null_as_default")]
    pub flags: Vec<Flag>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub overrides: Vec<Override>,
}

/// Fetcher is the transport collaborator the [crate::Client] pulls its data from.
///
/// Implementations perform the actual network calls (and enforce whatever timeouts they need);
/// the client only decides when to call them. Both methods may be called concurrently from
/// several threads.
pub trait Fetcher: Send + Sync {
    /// Fetch every flag and global override.
    fn fetch_state(&self) -> Result<State, FetchError>;

    /// Fetch the override profile of the subject `identifier`.
    fn fetch_identity(&self, identifier: &str) -> Result<Identity, FetchError>;
}

impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    fn fetch_state(&self) -> Result<State, FetchError> {
        (**self).fetch_state()
    }

    fn fetch_identity(&self, identifier: &str) -> Result<Identity, FetchError> {
        (**self).fetch_identity(identifier)
    }
}

impl<F: Fetcher + ?Sized> Fetcher for Box<F> {
    fn fetch_state(&self) -> Result<State, FetchError> {
        (**self).fetch_state()
    }

    fn fetch_identity(&self, identifier: &str) -> Result<Identity, FetchError> {
        (**self).fetch_identity(identifier)
    }
}

/// Errors a [Fetcher] reports.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request could not be completed.
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The response body could not be decoded.
    #[error("decoding failure: {0}")]
    Decoding(#[from] serde_json::Error),
    /// The service answered with an error, e.g. an unknown identity.
    #[error("api error: {0}")]
    Api(ApiError),
}

impl FetchError {
    pub fn transport<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        FetchError::Transport(error.into())
    }
}

/// An error reported by the service in its response body.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ApiError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status_code: u16,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.status_code, self.code, self.message)
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ApiError>,
}

/// Decode a state response with HTTP status `status`.
pub fn decode_state(status: u16, body: &[u8]) -> Result<State, FetchError> {
    decode(status, body)
}

/// Decode an identity response with HTTP status `status`.
pub fn decode_identity(status: u16, body: &[u8]) -> Result<Identity, FetchError> {
    decode(status, body)
}

fn decode<T: DeserializeOwned>(status: u16, body: &[u8]) -> Result<T, FetchError> {
    if status >= 400 {
        let envelope: ErrorEnvelope = serde_json::from_slice(body)?;
        let error = envelope.error.unwrap_or_else(|| ApiError {
            code: String::new(),
            message: String::new(),
            status_code: status,
        });
        return Err(FetchError::Api(error));
    }
    Ok(serde_json::from_slice(body)?)
}
