//! Client transport for calling services hosted by the cloud runtime.
//!
//! ARCHITECTURE
//! ============
//! A caller names a service; the [`Locator`] resolves it to an endpoint and
//! a method table; [`Service`] opens one connection and multiplexes any
//! number of concurrent calls over it. Each call is a session with its own
//! ordered [`ResultChannel`], fed by a single dispatch task reading the
//! connection. Wire encoding lives in the `frames` crate.

pub mod channel;
pub mod config;
pub mod keeper;
pub mod locator;
pub mod result;
pub mod service;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use channel::{ResultChannel, ResultSink};
pub use config::{Config, ConfigError};
pub use keeper::SessionKeeper;
pub use locator::{Locator, ResolveError, ResolvedEndpoint};
pub use result::{ExtractError, RemoteError, ServiceResult};
pub use service::{Service, ServiceError};
pub use transport::{Transport, TransportError};
