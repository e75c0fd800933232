//! Per-peer negotiation task.
//!
//! Each link runs on its own tokio task so one slow or failed handshake never
//! stalls another. The manager talks to it through a command channel and
//! stops it through a cancellation token.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parley_common::{ClientId, ClientMessage, PeerError};
use parley_config::IceServerConfig;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::peer::{LocalMedia, PeerConnection, PeerConnector, PeerEvent};

/// Signaling input for one link, in arrival order.
#[derive(Debug)]
pub(crate) enum LinkCommand {
    Offer(Value),
    Answer(Value),
    Candidate(Value),
}

#[derive(Debug)]
pub(crate) enum LinkStatus {
    Connected,
    Failed(PeerError),
}

/// What a link task tells the manager. `generation` tells apart reports
/// from an old link to the same remote.
#[derive(Debug)]
pub(crate) struct LinkReport {
    pub remote: ClientId,
    pub generation: u64,
    pub status: LinkStatus,
}

/// Manager-side handle to a running link.
pub struct PeerLink {
    pub remote_id: ClientId,
    pub initiator: bool,
    pub connected: bool,
    pub(crate) generation: u64,
    commands: mpsc::UnboundedSender<LinkCommand>,
    cancel: CancellationToken,
}

impl PeerLink {
    pub(crate) fn command(&self, command: LinkCommand) {
        if self.commands.send(command).is_err() {
            debug!(remote = %self.remote_id, "Link task already finished");
        }
    }

    /// Abort the task. Pending backend calls are dropped, not awaited.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub(crate) struct LinkSpawn {
    pub remote: ClientId,
    pub initiator: bool,
    pub generation: u64,
    pub connector: Arc<dyn PeerConnector>,
    pub media: LocalMedia,
    pub ice_servers: Vec<IceServerConfig>,
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    pub reports: mpsc::UnboundedSender<LinkReport>,
    pub handshake_timeout: Duration,
}

/// Start a link task and return its handle.
pub(crate) fn spawn_link(spawn: LinkSpawn) -> PeerLink {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let link = PeerLink {
        remote_id: spawn.remote.clone(),
        initiator: spawn.initiator,
        connected: false,
        generation: spawn.generation,
        commands: commands_tx,
        cancel: cancel.clone(),
    };
    tokio::spawn(run_link(spawn, commands_rx, cancel));
    link
}

async fn run_link(
    spawn: LinkSpawn,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    cancel: CancellationToken,
) {
    let guard = Guard {
        cancel,
        deadline: Instant::now() + spawn.handshake_timeout,
        timeout: spawn.handshake_timeout,
        connected: false,
    };
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let opened = guard
        .run(
            spawn
                .connector
                .open(&spawn.remote, &spawn.media, &spawn.ice_servers, events_tx),
        )
        .await;
    let mut conn = match opened {
        Ok(Some(conn)) => conn,
        Ok(None) => return,
        Err(e) => {
            warn!(remote = %spawn.remote, error = %e, "Could not open peer connection");
            report(&spawn, LinkStatus::Failed(e));
            return;
        }
    };

    let mut driver = Driver {
        spawn: &spawn,
        conn: conn.as_mut(),
        guard,
        remote_set: false,
        pending: Vec::new(),
    };
    let result = driver.drive(commands, events_rx).await;
    conn.close().await;

    match result {
        Ok(()) => debug!(remote = %spawn.remote, "Link stopped"),
        Err(e) => {
            warn!(remote = %spawn.remote, error = %e, "Link failed");
            report(&spawn, LinkStatus::Failed(e));
        }
    }
}

fn report(spawn: &LinkSpawn, status: LinkStatus) {
    let _ = spawn.reports.send(LinkReport {
        remote: spawn.remote.clone(),
        generation: spawn.generation,
        status,
    });
}

/// Cancellation plus the handshake deadline. Every backend call races both,
/// so a stalled backend cannot outlive the timeout.
struct Guard {
    cancel: CancellationToken,
    deadline: Instant,
    timeout: Duration,
    connected: bool,
}

impl Guard {
    /// Run `fut` unless the link is cancelled or times out first; `Ok(None)`
    /// means cancelled.
    async fn run<T>(
        &self,
        fut: impl Future<Output = Result<T, PeerError>>,
    ) -> Result<Option<T>, PeerError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(None),
            _ = sleep_until(self.deadline), if !self.connected => {
                Err(PeerError::Timeout(self.timeout))
            }
            result = fut => result.map(Some),
        }
    }
}

struct Driver<'a> {
    spawn: &'a LinkSpawn,
    conn: &'a mut dyn PeerConnection,
    guard: Guard,
    remote_set: bool,
    /// Remote candidates that arrived before the remote description.
    pending: Vec<Value>,
}

impl Driver<'_> {
    /// Negotiate until cancelled (`Ok`) or failed (`Err`).
    async fn drive(
        &mut self,
        mut commands: mpsc::UnboundedReceiver<LinkCommand>,
        mut events: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> Result<(), PeerError> {
        let cancel = self.guard.cancel.clone();
        let timeout = self.guard.timeout;
        let deadline = sleep_until(self.guard.deadline);
        tokio::pin!(deadline);

        if self.spawn.initiator {
            let Some(offer) = self.guard.run(self.conn.create_offer()).await? else {
                return Ok(());
            };
            self.send(ClientMessage::Offer {
                target: self.spawn.remote.clone(),
                from: None,
                sdp: offer,
            })?;
            debug!(remote = %self.spawn.remote, "Offer sent");
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = &mut deadline, if !self.guard.connected => return Err(PeerError::Timeout(timeout)),
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.apply(command).await? {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
                event = events.recv() => match event {
                    Some(PeerEvent::LocalCandidate(candidate)) => {
                        self.send(ClientMessage::IceCandidate {
                            target: self.spawn.remote.clone(),
                            from: None,
                            candidate,
                        })?;
                    }
                    Some(PeerEvent::Connected) => {
                        if !self.guard.connected {
                            self.guard.connected = true;
                            report(self.spawn, LinkStatus::Connected);
                        }
                    }
                    Some(PeerEvent::Failed(reason)) => return Err(PeerError::Negotiation(reason)),
                    None => return Err(PeerError::Closed),
                },
            }
        }
    }

    /// Apply one signaling command. Returns `false` if cancelled meanwhile.
    async fn apply(&mut self, command: LinkCommand) -> Result<bool, PeerError> {
        match command {
            LinkCommand::Offer(offer) => {
                if self.spawn.initiator || self.remote_set {
                    warn!(remote = %self.spawn.remote, "Unexpected offer ignored");
                    return Ok(true);
                }
                let Some(answer) = self.guard.run(self.conn.accept_offer(offer)).await?
                else {
                    return Ok(false);
                };
                self.send(ClientMessage::Answer {
                    target: self.spawn.remote.clone(),
                    from: None,
                    sdp: answer,
                })?;
                debug!(remote = %self.spawn.remote, "Answer sent");
                self.remote_description_set().await
            }
            LinkCommand::Answer(answer) => {
                if !self.spawn.initiator || self.remote_set {
                    debug!(remote = %self.spawn.remote, "Stray answer ignored");
                    return Ok(true);
                }
                if self.guard.run(self.conn.accept_answer(answer))
                    .await?
                    .is_none()
                {
                    return Ok(false);
                }
                self.remote_description_set().await
            }
            LinkCommand::Candidate(candidate) => {
                if !self.remote_set {
                    self.pending.push(candidate);
                    return Ok(true);
                }
                Ok(self.guard.run(self.conn.add_ice_candidate(candidate))
                    .await?
                    .is_some())
            }
        }
    }

    async fn remote_description_set(&mut self) -> Result<bool, PeerError> {
        self.remote_set = true;
        if !self.pending.is_empty() {
            debug!(remote = %self.spawn.remote, count = self.pending.len(), "Flushing buffered candidates");
        }
        for candidate in std::mem::take(&mut self.pending) {
            if self.guard.run(self.conn.add_ice_candidate(candidate))
                .await?
                .is_none()
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn send(&self, message: ClientMessage) -> Result<(), PeerError> {
        self.spawn
            .outbound
            .send(message)
            .map_err(|_| PeerError::Closed)
    }
}
