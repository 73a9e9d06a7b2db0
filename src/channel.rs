//! Per-session result queue between the dispatch loop and the caller.
//!
//! DESIGN
//! ======
//! Each call gets a channel pair: an unbounded input end fed by the dispatch
//! loop and a single-slot output end read by the caller. A worker task owns
//! the pending buffer in between, so a slow reader never stalls the dispatch
//! loop. The worker:
//! - moves items from input to output in arrival order,
//! - closes the output once the input is closed and the buffer is drained,
//! - stops at once when the connection-wide shutdown signal fires, dropping
//!   whatever is still pending.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{mpsc, watch};

use crate::result::ServiceResult;

/// Input end of a channel pair, owned by the session keeper.
pub type ResultSink = mpsc::UnboundedSender<ServiceResult>;

/// Output end of a channel pair: yields results until the session closes.
#[derive(Debug)]
pub struct ResultChannel {
    rx: mpsc::Receiver<ServiceResult>,
}

impl ResultChannel {
    /// A closed channel carrying exactly one result.
    #[must_use]
    pub fn ready(result: ServiceResult) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // A fresh channel with capacity one always has room.
        let _ = tx.try_send(result);
        Self { rx }
    }

    /// Next result, or `None` once the session is closed.
    pub async fn recv(&mut self) -> Option<ServiceResult> {
        self.rx.recv().await
    }
}

impl Stream for ResultChannel {
    type Item = ServiceResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Create a channel pair and spawn its worker.
///
/// `shutdown` is the connection-wide cancellation signal; the worker also
/// stops if its sender is dropped.
#[must_use]
pub fn pair(shutdown: watch::Receiver<bool>) -> (ResultSink, ResultChannel) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::channel(1);
    tokio::spawn(run_worker(in_rx, out_tx, shutdown));
    (in_tx, ResultChannel { rx: out_rx })
}

async fn run_worker(
    mut input: mpsc::UnboundedReceiver<ServiceResult>,
    output: mpsc::Sender<ServiceResult>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut pending = VecDeque::new();
    let mut finished = false;

    loop {
        if finished && pending.is_empty() {
            // Dropping `output` closes the caller's end.
            return;
        }

        tokio::select! {
            biased;

            () = cancelled(&mut shutdown) => return,

            item = input.recv(), if !finished => match item {
                Some(result) => pending.push_back(result),
                None => finished = true,
            },

            permit = output.reserve(), if !pending.is_empty() => {
                let Ok(permit) = permit else { return };
                if let Some(result) = pending.pop_front() {
                    permit.send(result);
                }
            }

            // Caller dropped the output end with nothing left to hand over.
            () = output.closed(), if pending.is_empty() => return,
        }
    }
}

/// Resolves once the shutdown signal fires or its sender is dropped.
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
