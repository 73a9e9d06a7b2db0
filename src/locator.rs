//! Service name resolution through the locator.
//!
//! DESIGN
//! ======
//! The locator is itself a service whose `resolve` method is number 0. One
//! resolution is one short-lived exchange: connect, send `resolve(name)`,
//! wait for the single reply chunk, drop the connection. Candidates are
//! tried in configured order; the first success wins and every failure is
//! kept for the aggregated error.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use frames::{Call, Frame, StreamUnpacker};
use rmpv::Value;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::transport::{DEFAULT_CONNECT_TIMEOUT, Transport, TransportError};

const RESOLVE_METHOD: u64 = 0;
const RESOLVE_SESSION: u64 = 1;
const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no locator endpoints configured")]
    NoLocators,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("locator i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("locator frame decode failed: {0}")]
    Codec(#[from] frames::CodecError),
    #[error("malformed resolve reply: {0}")]
    MalformedReply(#[from] rmp_serde::decode::Error),
    #[error("locator refused to resolve: {message} (code {code})")]
    Remote { code: i64, message: String },
    #[error("locator closed the session without a reply")]
    EmptyReply,
    #[error("locator closed the connection before replying")]
    Closed,
    #[error("timed out waiting for locator reply")]
    Timeout,
    #[error("all locators failed: {}", describe_failures(.0))]
    AllFailed(Vec<(String, ResolveError)>),
}

fn describe_failures(failures: &[(String, ResolveError)]) -> String {
    let mut out = String::new();
    for (i, (endpoint, err)) in failures.iter().enumerate() {
        if i > 0 {
            out.push_str("; ");
        }
        let _ = write!(out, "{endpoint}: {err}");
    }
    out
}

/// Connection endpoint and method table of a resolved service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub host: String,
    pub port: u16,
    pub version: i64,
    /// Method name to method number.
    pub api: HashMap<String, u64>,
}

impl ResolvedEndpoint {
    /// `host:port`, bracketing IPv6 literals.
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    #[must_use]
    pub fn method_number(&self, name: &str) -> Option<u64> {
        self.api.get(name).copied()
    }
}

/// Wire shape of the reply: `[[host, port], version, {number: name}]`.
#[derive(Deserialize)]
struct ResolveReply((String, u16), i64, HashMap<u64, String>);

impl From<ResolveReply> for ResolvedEndpoint {
    fn from(ResolveReply((host, port), version, methods): ResolveReply) -> Self {
        let api = methods.into_iter().map(|(number, name)| (name, number)).collect();
        Self { host, port, version, api }
    }
}

pub struct Locator {
    endpoints: Vec<String>,
    timeout: Duration,
}

impl Locator {
    #[must_use]
    pub fn new(endpoints: Vec<String>) -> Self {
        Self { endpoints, timeout: DEFAULT_RESOLVE_TIMEOUT }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.locators().to_vec())
    }

    /// Per-candidate deadline covering connect and exchange.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve `name` against each candidate in order.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::NoLocators`] for an empty candidate list and
    /// [`ResolveError::AllFailed`] when no candidate produced a reply.
    pub async fn resolve(&self, name: &str) -> Result<ResolvedEndpoint, ResolveError> {
        if self.endpoints.is_empty() {
            return Err(ResolveError::NoLocators);
        }

        let mut failures = Vec::new();
        for endpoint in &self.endpoints {
            match self.resolve_at(endpoint, name).await {
                Ok(resolved) => {
                    info!(service = %name, locator = %endpoint, address = %resolved.address(), "service resolved");
                    return Ok(resolved);
                }
                Err(err) => {
                    warn!(service = %name, locator = %endpoint, error = %err, "locator failed");
                    failures.push((endpoint.clone(), err));
                }
            }
        }
        Err(ResolveError::AllFailed(failures))
    }

    async fn resolve_at(&self, endpoint: &str, name: &str) -> Result<ResolvedEndpoint, ResolveError> {
        let connect_timeout = DEFAULT_CONNECT_TIMEOUT.min(self.timeout);
        tokio::time::timeout(self.timeout, connect_and_resolve(endpoint, name, connect_timeout))
            .await
            .map_err(|_| ResolveError::Timeout)?
    }
}

async fn connect_and_resolve(
    endpoint: &str,
    name: &str,
    connect_timeout: Duration,
) -> Result<ResolvedEndpoint, ResolveError> {
    let transport = Transport::connect(endpoint, connect_timeout).await?;
    resolve_over(transport, name).await
}

/// Run one resolve exchange on an open transport, then release it.
///
/// # Errors
///
/// Returns [`ResolveError::Remote`] when the locator answers with an error,
/// [`ResolveError::EmptyReply`] / [`ResolveError::Closed`] when it ends the
/// session or connection without a reply, and i/o or decode failures.
pub async fn resolve_over(transport: Transport, name: &str) -> Result<ResolvedEndpoint, ResolveError> {
    let (mut reader, writer) = transport.into_split();
    let request = Call {
        method: RESOLVE_METHOD,
        session: RESOLVE_SESSION,
        args: vec![Value::from(name)],
    };
    writer.write(&frames::encode_call(&request)).await?;
    debug!(service = %name, "resolve request sent");

    let mut unpacker = StreamUnpacker::<Frame>::new();
    while let Some(buf) = reader.read().await? {
        for frame in unpacker.feed(&buf)? {
            if frame.session() != RESOLVE_SESSION {
                continue;
            }
            match frame {
                Frame::Chunk { data, .. } => {
                    let reply: ResolveReply = rmp_serde::from_slice(&data)?;
                    return Ok(reply.into());
                }
                Frame::Error { code, message, .. } => {
                    return Err(ResolveError::Remote { code, message });
                }
                Frame::Choke { .. } => return Err(ResolveError::EmptyReply),
            }
        }
    }
    Err(ResolveError::Closed)
}

#[cfg(test)]
#[path = "locator_test.rs"]
mod tests;
