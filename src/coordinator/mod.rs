//! The session coordinator.
//!
//! One task owns the host state, the pending transfers and every client's
//! outbound queue. Connections talk to it only through [`CoordinatorHandle`],
//! so events (timer expiries included) are applied strictly one at a time.

mod session;
mod timer;

pub use session::{Audience, Outbound, Session, TransferRequest};
pub use timer::{ExpiryScheduler, TokioScheduler};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::{ClientId, ClientMessage, RequestId, ServerMessage};
use crate::staging::UploadStaging;

/// serialized frame shared by every recipient of one broadcast
pub type Frame = Arc<str>;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("session coordinator is not running")]
    Closed,
}

/// point-in-time view for health reporting
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub host_id: Option<ClientId>,
    pub clients: usize,
    pub pending_transfers: usize,
}

pub(crate) enum Command {
    Connect {
        client_id: ClientId,
        outbox: mpsc::Sender<Frame>,
    },
    Disconnect {
        client_id: ClientId,
    },
    Message {
        client_id: ClientId,
        message: ClientMessage,
    },
    Expire(RequestId),
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

#[derive(Clone)]
pub struct CoordinatorHandle {
    inbox: mpsc::UnboundedSender<Command>,
}

impl CoordinatorHandle {
    /// start the coordinator task on the current runtime
    pub fn spawn(staging: Arc<UploadStaging>, transfer_timeout: Duration) -> Self {
        let (inbox, commands) = mpsc::unbounded_channel();
        let coordinator = Coordinator {
            session: Session::new(TokioScheduler::new(&inbox), transfer_timeout),
            staging,
            clients: HashMap::new(),
        };
        tokio::spawn(coordinator.run(commands));
        Self { inbox }
    }

    /// register a connection; frames for it are pushed into `outbox`
    pub fn connect(
        &self,
        client_id: ClientId,
        outbox: mpsc::Sender<Frame>,
    ) -> Result<(), CoordinatorError> {
        self.send(Command::Connect { client_id, outbox })
    }

    pub fn disconnect(&self, client_id: ClientId) -> Result<(), CoordinatorError> {
        self.send(Command::Disconnect { client_id })
    }

    pub fn dispatch(
        &self,
        client_id: ClientId,
        message: ClientMessage,
    ) -> Result<(), CoordinatorError> {
        self.send(Command::Message { client_id, message })
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, CoordinatorError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        response.await.map_err(|_| CoordinatorError::Closed)
    }

    fn send(&self, command: Command) -> Result<(), CoordinatorError> {
        self.inbox.send(command).map_err(|_| CoordinatorError::Closed)
    }
}

struct Coordinator {
    session: Session<TokioScheduler>,
    staging: Arc<UploadStaging>,
    clients: HashMap<ClientId, mpsc::Sender<Frame>>,
}

impl Coordinator {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!("Session coordinator started");
        while let Some(command) = commands.recv().await {
            self.apply(command);
        }
        tracing::debug!("Session coordinator stopped");
    }

    fn apply(&mut self, command: Command) {
        let outbound = match command {
            Command::Connect { client_id, outbox } => {
                self.clients.insert(client_id, outbox);
                self.staging.open(client_id);
                tracing::info!("🔌 Client {} connected ({} total)", client_id, self.clients.len());
                self.session.connect(client_id)
            }
            Command::Disconnect { client_id } => {
                self.clients.remove(&client_id);
                let dropped = self.staging.discard(client_id);
                if dropped > 0 {
                    tracing::info!("Discarded {} unfinished upload parts from {}", dropped, client_id);
                }
                tracing::info!("Client {} disconnected ({} remaining)", client_id, self.clients.len());
                self.session.disconnect(client_id)
            }
            Command::Message {
                client_id,
                message: ClientMessage::ProductUploadComplete,
            } => self.flush_uploads(client_id),
            Command::Message { client_id, message } => self.session.handle(client_id, message),
            Command::Expire(request_id) => self.session.expire(request_id),
            Command::Snapshot(reply) => {
                let _ = reply.send(SessionSnapshot {
                    host_id: self.session.host_id(),
                    clients: self.clients.len(),
                    pending_transfers: self.session.pending_count(),
                });
                Vec::new()
            }
        };
        self.deliver(outbound);
    }

    fn flush_uploads(&mut self, sender: ClientId) -> Vec<Outbound> {
        match self.staging.complete(sender) {
            Some(parts) => {
                tracing::info!("📦 Publishing {} product parts from {}", parts.len(), sender);
                vec![Outbound::everyone(ServerMessage::ProductUploadComplete { parts, sender })]
            }
            None => {
                tracing::debug!("No staged uploads for {}", sender);
                Vec::new()
            }
        }
    }

    fn deliver(&mut self, outbound: Vec<Outbound>) {
        let mut evicted = Vec::new();

        for Outbound { audience, message } in outbound {
            let frame: Frame = match serde_json::to_string(&message) {
                Ok(json) => json.into(),
                Err(e) => {
                    tracing::error!("Failed to serialize {:?}: {}", message, e);
                    continue;
                }
            };

            let recipients = self.clients.iter().filter(|(id, _)| match audience {
                Audience::Everyone => true,
                Audience::EveryoneExcept(skip) => **id != skip,
                Audience::Only(target) => **id == target,
            });
            for (client_id, outbox) in recipients {
                match outbox.try_send(frame.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!("Client {} is not keeping up, evicting", client_id);
                        evicted.push(*client_id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => evicted.push(*client_id),
                }
            }
        }

        // dropping the queue ends the connection, which reports its own disconnect;
        // until then an evicted host is still host and its relays still go out
        for client_id in evicted {
            self.clients.remove(&client_id);
        }
    }
}
