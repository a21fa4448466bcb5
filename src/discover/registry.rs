//! Pending-request registry
//!
//! Correlates inbound discovery replies with the outstanding requests that
//! caused them. The pending list is owned by a single task; registrations,
//! reply deliveries and deadline sweeps all arrive as events on one channel
//! and are handled one at a time, so the list is never shared or locked.

use crate::core::NodeId;
use crate::discover::error::DiscoveryError;
use crate::discover::packet::{Packet, PacketKind};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// How long a request waits for its reply
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const EVENT_BUFFER: usize = 64;

/// A reply packet together with where it came from
#[derive(Debug, Clone)]
pub struct Inbound {
    pub packet: Packet,
    pub sender: NodeId,
    pub from: SocketAddr,
}

/// Match predicate invoked with every reply of the request's type
pub type MatchFn = Box<dyn FnMut(&Inbound) -> bool + Send>;

type ResultSender = oneshot::Sender<Result<Inbound, DiscoveryError>>;

struct PendingRequest {
    kind: PacketKind,
    deadline: Instant,
    matcher: MatchFn,
    result: ResultSender,
}

enum RegistryEvent {
    Register {
        kind: PacketKind,
        matcher: MatchFn,
        result: ResultSender,
    },
    Reply {
        inbound: Inbound,
        matched: oneshot::Sender<bool>,
    },
}

/// Handle a caller blocks on for the single result of its request
#[derive(Debug)]
pub struct PendingHandle {
    rx: oneshot::Receiver<Result<Inbound, DiscoveryError>>,
}

impl PendingHandle {
    /// Wait for the matched reply, a timeout, or shutdown
    pub async fn wait(self) -> Result<Inbound, DiscoveryError> {
        // A dropped sender means the registry task is gone.
        self.rx.await.unwrap_or(Err(DiscoveryError::Shutdown))
    }
}

/// Cloneable front-end to the registry task
#[derive(Clone, Debug)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryEvent>,
}

impl RegistryHandle {
    /// Add a pending request of `kind`; its deadline starts when the
    /// registry records it
    pub async fn register(&self, kind: PacketKind, matcher: MatchFn) -> PendingHandle {
        let (result, rx) = oneshot::channel();
        // On failure the event, and with it the result sender, is dropped,
        // which the handle reports as shutdown.
        let _ = self
            .tx
            .send(RegistryEvent::Register {
                kind,
                matcher,
                result,
            })
            .await;
        PendingHandle { rx }
    }

    /// Offer a reply to the pending requests of its type. Returns whether at
    /// least one request accepted it.
    pub async fn deliver(&self, inbound: Inbound) -> bool {
        let (matched, rx) = oneshot::channel();
        if self
            .tx
            .send(RegistryEvent::Reply { inbound, matched })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

/// The task owning the pending list
pub struct Registry {
    rx: mpsc::Receiver<RegistryEvent>,
    pending: VecDeque<PendingRequest>,
    timeout: Duration,
    token: CancellationToken,
}

impl Registry {
    /// Spawn the registry task with the standard one-minute timeout
    pub fn spawn(token: CancellationToken) -> (RegistryHandle, JoinHandle<()>) {
        Self::spawn_with_timeout(token, REQUEST_TIMEOUT)
    }

    pub fn spawn_with_timeout(
        token: CancellationToken,
        timeout: Duration,
    ) -> (RegistryHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let registry = Self {
            rx,
            pending: VecDeque::new(),
            timeout,
            token,
        };
        let task = tokio::spawn(registry.run());
        (RegistryHandle { tx }, task)
    }

    async fn run(mut self) {
        loop {
            self.sweep(Instant::now());

            let next_deadline = self.pending.iter().map(|p| p.deadline).min();
            let wake = async move {
                match next_deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;

                _ = self.token.cancelled() => {
                    log::debug!("Pending registry shutting down ({} outstanding)", self.pending.len());
                    self.shutdown();
                    return;
                }
                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.handle(event),
                        None => {
                            self.shutdown();
                            return;
                        }
                    }
                }
                _ = wake => {}
            }
        }
    }

    fn handle(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::Register {
                kind,
                matcher,
                result,
            } => {
                self.pending.push_back(PendingRequest {
                    kind,
                    deadline: Instant::now() + self.timeout,
                    matcher,
                    result,
                });
            }
            RegistryEvent::Reply { inbound, matched } => {
                let accepted = self.deliver(&inbound);
                let _ = matched.send(accepted);
            }
        }
    }

    /// Resolve every request of the reply's type whose predicate accepts it,
    /// in registration order
    fn deliver(&mut self, inbound: &Inbound) -> bool {
        let kind = inbound.packet.kind();
        let mut accepted = false;
        let mut remaining = VecDeque::with_capacity(self.pending.len());

        for mut request in self.pending.drain(..) {
            if request.kind == kind && (request.matcher)(inbound) {
                accepted = true;
                let _ = request.result.send(Ok(inbound.clone()));
            } else {
                remaining.push_back(request);
            }
        }
        self.pending = remaining;

        log::debug!(
            "{} reply from {} accepted={} ({} outstanding)",
            kind.name(),
            inbound.from,
            accepted,
            self.pending.len()
        );
        accepted
    }

    /// Time out requests past their deadline and forget abandoned callers
    fn sweep(&mut self, now: Instant) {
        let mut remaining = VecDeque::with_capacity(self.pending.len());
        for request in self.pending.drain(..) {
            if request.deadline <= now {
                log::debug!("{} request timed out", request.kind.name());
                let _ = request.result.send(Err(DiscoveryError::RequestTimeout));
            } else if !request.result.is_closed() {
                remaining.push_back(request);
            }
        }
        self.pending = remaining;
    }

    fn shutdown(&mut self) {
        for request in self.pending.drain(..) {
            let _ = request.result.send(Err(DiscoveryError::Shutdown));
        }
        self.rx.close();
    }
}
