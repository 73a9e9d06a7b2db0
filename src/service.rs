//! Service facade: one connection, many concurrent calls.
//!
//! ARCHITECTURE
//! ============
//! `Service` owns the write side of one connection and the session keeper.
//! A single dispatch task owns the read side: it feeds every received buffer
//! to the stream unpacker and routes each decoded frame to the session it
//! names. Each call gets its own channel pair, so results for one session
//! queue up independently of every other session on the connection.
//!
//! LIFECYCLE
//! =========
//! Per session: `Open` on attach, stays `Open` on chunk and on error,
//! `Closed` on choke (detached, then its sink is dropped). `close()` fires
//! the shared shutdown signal once and closes the connection. If the
//! connection ends any other way (EOF, read error, undecodable bytes), the
//! service is marked disconnected and every still-open session receives a
//! synthesised disconnect error and is closed. Calls made after either end
//! get the same error without touching the connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use frames::{Call, Frame, StreamUnpacker};
use rmpv::Value;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::channel::{self, ResultChannel};
use crate::config::Config;
use crate::keeper::SessionKeeper;
use crate::locator::{Locator, ResolveError, ResolvedEndpoint};
use crate::result::{INVALID_ARGUMENTS_CODE, RemoteError, SEND_FAILED_CODE, ServiceResult};
use crate::transport::{DEFAULT_CONNECT_TIMEOUT, Transport, TransportError, TransportReader, TransportWriter};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to resolve service: {0}")]
    Resolve(#[from] ResolveError),
    #[error("failed to connect to service: {0}")]
    Transport(#[from] TransportError),
}

pub struct Service {
    name: String,
    endpoint: ResolvedEndpoint,
    sessions: Arc<SessionKeeper>,
    /// Set by the dispatch loop before it drains the keeper on an abnormal exit.
    disconnected: Arc<AtomicBool>,
    writer: TransportWriter,
    shutdown: watch::Sender<bool>,
}

impl Service {
    /// Resolve `name` through the configured locators and connect to it.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Resolve`] when no locator resolves the name and
    /// [`ServiceError::Transport`] when the resolved endpoint is unreachable.
    pub async fn connect(name: &str, config: &Config) -> Result<Self, ServiceError> {
        let endpoint = Locator::from_config(config).resolve(name).await?;
        let transport = Transport::connect(&endpoint.address(), DEFAULT_CONNECT_TIMEOUT).await?;
        info!(service = %name, address = %endpoint.address(), "service connected");
        Ok(Self::from_transport(name, endpoint, transport))
    }

    /// Build a facade over an already connected transport and start dispatching.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn from_transport(name: &str, endpoint: ResolvedEndpoint, transport: Transport) -> Self {
        let (reader, writer) = transport.into_split();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let sessions = Arc::new(SessionKeeper::new());
        let disconnected = Arc::new(AtomicBool::new(false));

        tokio::spawn(dispatch_loop(
            name.to_owned(),
            reader,
            Arc::clone(&sessions),
            Arc::clone(&disconnected),
            shutdown_rx,
        ));

        Self { name: name.to_owned(), endpoint, sessions, disconnected, writer, shutdown }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn endpoint(&self) -> &ResolvedEndpoint {
        &self.endpoint
    }

    /// Invoke `method` with `args` and return the session's result stream.
    ///
    /// `args` is packed as the positional argument list: a tuple or sequence
    /// gives one argument per element, `()` gives none, anything else is a
    /// single argument. Unknown methods, unpackable arguments and calls on a
    /// closed or disconnected service yield a one-item error stream without
    /// touching the connection.
    pub async fn call<A: Serialize>(&self, method: &str, args: A) -> ResultChannel {
        if self.is_down() {
            debug!(service = %self.name, %method, "call on closed service");
            return ResultChannel::ready(ServiceResult::Error(RemoteError::disconnected()));
        }
        let Some(number) = self.endpoint.method_number(method) else {
            debug!(service = %self.name, %method, "unknown method");
            return ResultChannel::ready(ServiceResult::Error(RemoteError::wrong_method()));
        };
        let args = match pack_args(&args) {
            Ok(args) => args,
            Err(err) => {
                let err = RemoteError::new(INVALID_ARGUMENTS_CODE, format!("failed to pack arguments: {err}"));
                return ResultChannel::ready(ServiceResult::Error(err));
            }
        };

        let (sink, out) = channel::pair(self.shutdown.subscribe());
        let session = self.sessions.attach(sink);
        // The dispatch loop may have drained the keeper just before the attach.
        if self.disconnected.load(Ordering::SeqCst) {
            if let Some(sink) = self.sessions.detach(session) {
                let _ = sink.send(ServiceResult::Error(RemoteError::disconnected()));
            }
            return out;
        }
        let bytes = frames::encode_call(&Call { method: number, session, args });

        debug!(service = %self.name, %method, session, "call sent");
        if let Err(err) = self.writer.write(&bytes).await {
            warn!(service = %self.name, %method, session, error = %err, "call write failed");
            if let Some(sink) = self.sessions.detach(session) {
                let _ = sink.send(ServiceResult::Error(RemoteError::new(SEND_FAILED_CODE, err.to_string())));
            }
        }
        out
    }

    /// Number of sessions waiting for their closing frame.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn is_down(&self) -> bool {
        *self.shutdown.borrow() || self.disconnected.load(Ordering::SeqCst)
    }

    /// Stop every session worker and close the connection. Later calls are no-ops.
    pub async fn close(&self) {
        let first = self.shutdown.send_if_modified(|stopped| !std::mem::replace(stopped, true));
        if !first {
            return;
        }
        if let Err(err) = self.writer.shutdown().await {
            debug!(service = %self.name, error = %err, "connection shutdown failed");
        }
        info!(service = %self.name, "service closed");
    }
}

fn pack_args<A: Serialize>(args: &A) -> Result<Vec<Value>, rmpv::ext::Error> {
    Ok(match rmpv::ext::to_value(args)? {
        Value::Array(items) => items,
        Value::Nil => Vec::new(),
        single => vec![single],
    })
}

/// Why the dispatch loop stopped.
enum Exit {
    Shutdown,
    Eof,
    ReadFailed(std::io::Error),
    Undecodable(frames::CodecError),
}

async fn dispatch_loop(
    name: String,
    mut reader: TransportReader,
    sessions: Arc<SessionKeeper>,
    disconnected: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut unpacker = StreamUnpacker::<Frame>::new();

    let exit = loop {
        let read = tokio::select! {
            biased;
            () = channel::cancelled(&mut shutdown) => break Exit::Shutdown,
            read = reader.read() => read,
        };
        let buf = match read {
            Ok(Some(buf)) => buf,
            Ok(None) => break Exit::Eof,
            Err(err) => break Exit::ReadFailed(err),
        };

        unpacker.push(&buf);
        let decoded = loop {
            match unpacker.next_message() {
                Ok(Some(frame)) => route(&name, &sessions, frame),
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        if let Err(err) = decoded {
            break Exit::Undecodable(err);
        }
    };

    let abnormal = !matches!(exit, Exit::Shutdown);
    match exit {
        Exit::Shutdown => debug!(service = %name, "dispatch loop stopped"),
        Exit::Eof => warn!(service = %name, "connection closed by peer"),
        Exit::ReadFailed(err) => warn!(service = %name, error = %err, "connection read failed"),
        Exit::Undecodable(err) => warn!(service = %name, error = %err, "undecodable frame, dropping connection"),
    }
    if abnormal {
        disconnected.store(true, Ordering::SeqCst);
        disconnect_all(&name, &sessions);
    }
}

fn route(name: &str, sessions: &SessionKeeper, frame: Frame) {
    match frame {
        Frame::Chunk { session, data } => {
            if let Some(sink) = sessions.get(session) {
                let _ = sink.send(ServiceResult::Chunk(data));
            } else {
                debug!(service = %name, session, "chunk for unknown session dropped");
            }
        }
        Frame::Error { session, code, message } => {
            if let Some(sink) = sessions.get(session) {
                let _ = sink.send(ServiceResult::Error(RemoteError { code, message }));
            } else {
                debug!(service = %name, session, code, "error for unknown session dropped");
            }
        }
        Frame::Choke { session } => {
            // Detaching hands back the registry's sink; dropping it closes the session.
            if sessions.detach(session).is_none() {
                debug!(service = %name, session, "choke for unknown session dropped");
            }
        }
    }
}

fn disconnect_all(name: &str, sessions: &SessionKeeper) {
    let open = sessions.drain();
    if !open.is_empty() {
        warn!(service = %name, sessions = open.len(), "closing sessions after disconnect");
    }
    for (_, sink) in open {
        let _ = sink.send(ServiceResult::Error(RemoteError::disconnected()));
    }
}

#[cfg(test)]
#[path = "service_test.rs"]
mod tests;
