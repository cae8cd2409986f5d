//! Host election and handoff state machine.
//!
//! `Session` is pure: it takes one event at a time and returns the messages
//! to fan out. It never touches sockets and only sees timers through
//! [`ExpiryScheduler`], so every transition can be driven directly in tests.
//!
//! A transfer request is resolved exactly once. Release, deny, expiry, the
//! requester leaving, or its authorizing host losing the role all remove the
//! record first; whichever path comes second finds nothing and does nothing.

use std::collections::HashMap;
use std::time::Duration;

use super::timer::ExpiryScheduler;
use crate::protocol::{ClientId, ClientMessage, RequestId, ServerMessage};

/// who a message is delivered to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    EveryoneExcept(ClientId),
    Only(ClientId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub audience: Audience,
    pub message: ServerMessage,
}

impl Outbound {
    pub fn everyone(message: ServerMessage) -> Self {
        Self { audience: Audience::Everyone, message }
    }

    pub fn only(client: ClientId, message: ServerMessage) -> Self {
        Self { audience: Audience::Only(client), message }
    }

    pub fn everyone_except(client: ClientId, message: ServerMessage) -> Self {
        Self { audience: Audience::EveryoneExcept(client), message }
    }
}

/// a pending host transfer negotiation
pub struct TransferRequest<H> {
    pub requester: ClientId,
    /// host at creation time; the only client allowed to resolve the request
    pub authorizer: ClientId,
    expiry: H,
}

pub struct Session<S: ExpiryScheduler> {
    host_id: Option<ClientId>,
    pending: HashMap<RequestId, TransferRequest<S::Handle>>,
    scheduler: S,
    transfer_timeout: Duration,
}

impl<S: ExpiryScheduler> Session<S> {
    pub fn new(scheduler: S, transfer_timeout: Duration) -> Self {
        Self {
            host_id: None,
            pending: HashMap::new(),
            scheduler,
            transfer_timeout,
        }
    }

    pub fn host_id(&self) -> Option<ClientId> {
        self.host_id
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self, request_id: RequestId) -> Option<&TransferRequest<S::Handle>> {
        self.pending.get(&request_id)
    }

    pub fn connect(&mut self, client: ClientId) -> Vec<Outbound> {
        vec![Outbound::only(
            client,
            ServerMessage::Welcome {
                client_id: client,
                host_id: self.host_id,
            },
        )]
    }

    pub fn disconnect(&mut self, client: ClientId) -> Vec<Outbound> {
        let abandoned: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, r)| r.requester == client)
            .map(|(id, _)| *id)
            .collect();
        for request_id in abandoned {
            tracing::debug!("Requester {} left, dropping transfer {}", client, request_id);
            self.drop_request(request_id);
        }

        if self.host_id == Some(client) {
            tracing::info!("Host {} disconnected", client);
            return self.change_host(None);
        }
        Vec::new()
    }

    pub fn handle(&mut self, client: ClientId, message: ClientMessage) -> Vec<Outbound> {
        match message {
            ClientMessage::RegisterHost => {
                tracing::info!("{} claimed host", client);
                self.change_host(Some(client))
            }
            ClientMessage::RequestHost => self.request_host(client),
            ClientMessage::ReleaseHost { request_id } => {
                let Some(requester) = self.take_authorized(request_id, client) else {
                    return Vec::new();
                };
                tracing::info!("{} released host to {}", client, requester);
                self.change_host(Some(requester))
            }
            ClientMessage::DenyHost { request_id } => {
                let Some(requester) = self.take_authorized(request_id, client) else {
                    return Vec::new();
                };
                tracing::info!("{} denied host to {}", client, requester);
                vec![Outbound::only(
                    requester,
                    ServerMessage::TransferDenied { request_id },
                )]
            }
            ClientMessage::GiveUpHost => {
                if self.host_id != Some(client) {
                    tracing::debug!("Ignoring giveUpHost from non-host {}", client);
                    return Vec::new();
                }
                tracing::info!("{} gave up host", client);
                self.change_host(None)
            }
            ClientMessage::CameraUpdate(pose) => {
                self.relay(client, ServerMessage::CameraUpdate(pose))
            }
            ClientMessage::ModelTransform(transform) => {
                self.relay(client, ServerMessage::ModelTransform(transform))
            }
            ClientMessage::HostPointerToggle { active } => {
                self.relay(client, ServerMessage::HostPointerToggle { active })
            }
            ClientMessage::HostPointerUpdate { position } => {
                self.relay(client, ServerMessage::HostPointerUpdate { position })
            }
            // batches live in upload staging, flushed by the coordinator
            ClientMessage::ProductUploadComplete => Vec::new(),
        }
    }

    /// the expiry timer for `request_id` fired
    pub fn expire(&mut self, request_id: RequestId) -> Vec<Outbound> {
        let Some(request) = self.pending.remove(&request_id) else {
            tracing::debug!("Expiry for resolved transfer {} ignored", request_id);
            return Vec::new();
        };
        self.scheduler.cancel(request.expiry);
        tracing::info!(
            "Transfer {} timed out, moving host from {} to {}",
            request_id,
            request.authorizer,
            request.requester
        );
        self.change_host(Some(request.requester))
    }

    fn request_host(&mut self, client: ClientId) -> Vec<Outbound> {
        match self.host_id {
            None => {
                tracing::info!("{} took unowned host", client);
                self.change_host(Some(client))
            }
            Some(host) if host == client => Vec::new(),
            Some(host) => {
                let request_id = RequestId::new();
                let expiry = self.scheduler.schedule(request_id, self.transfer_timeout);
                self.pending.insert(
                    request_id,
                    TransferRequest {
                        requester: client,
                        authorizer: host,
                        expiry,
                    },
                );
                tracing::info!("{} requested host from {} ({})", client, host, request_id);
                vec![Outbound::only(
                    host,
                    ServerMessage::HostTransferRequest {
                        request_id,
                        requester_id: client,
                    },
                )]
            }
        }
    }

    /// remove a request if `sender` may decide it, cancelling its timer;
    /// yields the requester
    fn take_authorized(&mut self, request_id: RequestId, sender: ClientId) -> Option<ClientId> {
        let host_id = self.host_id;
        let authorized = self
            .pending
            .get(&request_id)
            .is_some_and(|r| r.authorizer == sender && host_id == Some(sender));
        if !authorized {
            tracing::debug!("Stale or unauthorized decision on {} from {}", request_id, sender);
            return None;
        }
        let request = self.pending.remove(&request_id)?;
        self.scheduler.cancel(request.expiry);
        Some(request.requester)
    }

    fn drop_request(&mut self, request_id: RequestId) {
        if let Some(request) = self.pending.remove(&request_id) {
            self.scheduler.cancel(request.expiry);
        }
    }

    /// set the host, sweep requests the new host can't answer, and announce it
    fn change_host(&mut self, host_id: Option<ClientId>) -> Vec<Outbound> {
        self.host_id = host_id;

        let orphaned: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, r)| Some(r.authorizer) != host_id)
            .map(|(id, _)| *id)
            .collect();
        for request_id in orphaned {
            tracing::debug!("Sweeping orphaned transfer {}", request_id);
            self.drop_request(request_id);
        }

        vec![Outbound::everyone(ServerMessage::HostChanged { host_id })]
    }

    fn relay(&self, sender: ClientId, message: ServerMessage) -> Vec<Outbound> {
        if self.host_id != Some(sender) {
            tracing::trace!("Dropping host-only update from viewer {}", sender);
            return Vec::new();
        }
        vec![Outbound::everyone_except(sender, message)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    /// records scheduled and cancelled timers instead of running them
    #[derive(Default)]
    struct ManualScheduler {
        next: u64,
        armed: HashSet<u64>,
        scheduled: Vec<RequestId>,
    }

    impl ExpiryScheduler for ManualScheduler {
        type Handle = u64;

        fn schedule(&mut self, request_id: RequestId, _after: Duration) -> u64 {
            self.next += 1;
            self.armed.insert(self.next);
            self.scheduled.push(request_id);
            self.next
        }

        fn cancel(&mut self, handle: u64) {
            self.armed.remove(&handle);
        }
    }

    fn session() -> Session<ManualScheduler> {
        Session::new(ManualScheduler::default(), Duration::from_secs(30))
    }

    fn host_changed(host_id: Option<ClientId>) -> Vec<Outbound> {
        vec![Outbound::everyone(ServerMessage::HostChanged { host_id })]
    }

    /// host x, pending request from y; returns the request id
    fn negotiating(s: &mut Session<ManualScheduler>, x: ClientId, y: ClientId) -> RequestId {
        s.handle(x, ClientMessage::RegisterHost);
        let out = s.handle(y, ClientMessage::RequestHost);
        match out.as_slice() {
            [Outbound {
                audience: Audience::Only(to),
                message: ServerMessage::HostTransferRequest { request_id, requester_id },
            }] => {
                assert_eq!(*to, x);
                assert_eq!(*requester_id, y);
                *request_id
            }
            other => panic!("expected a single transfer request, got {other:?}"),
        }
    }

    #[test]
    fn connect_welcomes_with_current_host() {
        let mut s = session();
        let (x, y) = (ClientId::new(), ClientId::new());
        s.handle(x, ClientMessage::RegisterHost);

        let out = s.connect(y);
        assert_eq!(
            out,
            vec![Outbound::only(y, ServerMessage::Welcome { client_id: y, host_id: Some(x) })]
        );
    }

    #[test]
    fn register_host_always_claims() {
        let mut s = session();
        let (x, y) = (ClientId::new(), ClientId::new());

        assert_eq!(s.handle(x, ClientMessage::RegisterHost), host_changed(Some(x)));
        assert_eq!(s.handle(y, ClientMessage::RegisterHost), host_changed(Some(y)));
        assert_eq!(s.host_id(), Some(y));
    }

    #[test]
    fn request_while_unowned_takes_host_immediately() {
        let mut s = session();
        let x = ClientId::new();

        assert_eq!(s.handle(x, ClientMessage::RequestHost), host_changed(Some(x)));
        assert_eq!(s.pending_count(), 0);
        assert!(s.scheduler.scheduled.is_empty());
    }

    #[test]
    fn request_from_current_host_is_silent() {
        let mut s = session();
        let x = ClientId::new();
        s.handle(x, ClientMessage::RegisterHost);

        assert!(s.handle(x, ClientMessage::RequestHost).is_empty());
        assert_eq!(s.host_id(), Some(x));
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn request_while_owned_creates_one_request() {
        let mut s = session();
        let (x, y) = (ClientId::new(), ClientId::new());
        let request_id = negotiating(&mut s, x, y);

        assert_eq!(s.pending_count(), 1);
        assert_eq!(s.scheduler.scheduled, vec![request_id]);
        assert_eq!(s.scheduler.armed.len(), 1);
        let request = s.pending(request_id).unwrap();
        assert_eq!(request.requester, y);
        assert_eq!(request.authorizer, x);
        assert_eq!(s.host_id(), Some(x));
    }

    #[test]
    fn release_hands_over_and_later_decisions_are_ignored() {
        let mut s = session();
        let (x, y) = (ClientId::new(), ClientId::new());
        let request_id = negotiating(&mut s, x, y);

        assert_eq!(
            s.handle(x, ClientMessage::ReleaseHost { request_id }),
            host_changed(Some(y))
        );
        assert_eq!(s.pending_count(), 0);
        assert!(s.scheduler.armed.is_empty());

        assert!(s.handle(x, ClientMessage::DenyHost { request_id }).is_empty());
        assert!(s.expire(request_id).is_empty());
        assert_eq!(s.host_id(), Some(y));
    }

    #[test]
    fn deny_notifies_only_requester() {
        let mut s = session();
        let (x, y) = (ClientId::new(), ClientId::new());
        let request_id = negotiating(&mut s, x, y);

        assert_eq!(
            s.handle(x, ClientMessage::DenyHost { request_id }),
            vec![Outbound::only(y, ServerMessage::TransferDenied { request_id })]
        );
        assert_eq!(s.host_id(), Some(x));
        assert!(s.scheduler.armed.is_empty());
        assert!(s.expire(request_id).is_empty());
        assert!(s.handle(x, ClientMessage::ReleaseHost { request_id }).is_empty());
    }

    #[test]
    fn expiry_transfers_exactly_once() {
        let mut s = session();
        let (x, y) = (ClientId::new(), ClientId::new());
        let request_id = negotiating(&mut s, x, y);

        assert_eq!(s.expire(request_id), host_changed(Some(y)));
        assert!(s.expire(request_id).is_empty());
        assert!(s.handle(x, ClientMessage::ReleaseHost { request_id }).is_empty());
        assert_eq!(s.host_id(), Some(y));
    }

    #[test]
    fn only_the_authorizing_host_can_decide() {
        let mut s = session();
        let (x, y, z) = (ClientId::new(), ClientId::new(), ClientId::new());
        let request_id = negotiating(&mut s, x, y);

        assert!(s.handle(z, ClientMessage::ReleaseHost { request_id }).is_empty());
        assert!(s.handle(y, ClientMessage::ReleaseHost { request_id }).is_empty());
        assert!(s.handle(z, ClientMessage::DenyHost { request_id }).is_empty());
        assert_eq!(s.pending_count(), 1);
        assert_eq!(s.host_id(), Some(x));
    }

    #[test]
    fn unknown_request_ids_are_ignored() {
        let mut s = session();
        let x = ClientId::new();
        s.handle(x, ClientMessage::RegisterHost);

        let request_id = RequestId::new();
        assert!(s.handle(x, ClientMessage::ReleaseHost { request_id }).is_empty());
        assert!(s.handle(x, ClientMessage::DenyHost { request_id }).is_empty());
        assert!(s.expire(request_id).is_empty());
    }

    #[test]
    fn requester_disconnect_cancels_its_requests() {
        let mut s = session();
        let (x, y) = (ClientId::new(), ClientId::new());
        let first = negotiating(&mut s, x, y);
        s.handle(y, ClientMessage::RequestHost);
        assert_eq!(s.pending_count(), 2);

        assert!(s.disconnect(y).is_empty());
        assert_eq!(s.pending_count(), 0);
        assert!(s.scheduler.armed.is_empty());
        assert!(s.expire(first).is_empty());
        assert_eq!(s.host_id(), Some(x));
    }

    #[test]
    fn host_disconnect_clears_host_and_sweeps_requests() {
        let mut s = session();
        let (x, y) = (ClientId::new(), ClientId::new());
        let request_id = negotiating(&mut s, x, y);

        assert_eq!(s.disconnect(x), host_changed(None));
        assert_eq!(s.host_id(), None);
        assert_eq!(s.pending_count(), 0);
        assert!(s.scheduler.armed.is_empty());
        assert!(s.expire(request_id).is_empty());
        assert!(s.handle(x, ClientMessage::ReleaseHost { request_id }).is_empty());
    }

    #[test]
    fn viewer_disconnect_is_silent() {
        let mut s = session();
        let (x, y) = (ClientId::new(), ClientId::new());
        s.handle(x, ClientMessage::RegisterHost);

        assert!(s.disconnect(y).is_empty());
        assert_eq!(s.host_id(), Some(x));
    }

    #[test]
    fn give_up_only_from_host() {
        let mut s = session();
        let (x, y) = (ClientId::new(), ClientId::new());
        s.handle(x, ClientMessage::RegisterHost);

        assert!(s.handle(y, ClientMessage::GiveUpHost).is_empty());
        assert_eq!(s.host_id(), Some(x));
        assert_eq!(s.handle(x, ClientMessage::GiveUpHost), host_changed(None));
        assert_eq!(s.host_id(), None);
    }

    #[test]
    fn give_up_sweeps_pending_requests() {
        let mut s = session();
        let (x, y) = (ClientId::new(), ClientId::new());
        let request_id = negotiating(&mut s, x, y);

        assert_eq!(s.handle(x, ClientMessage::GiveUpHost), host_changed(None));
        assert_eq!(s.host_id(), None);
        assert_eq!(s.pending_count(), 0);
        assert!(s.scheduler.armed.is_empty());
        assert!(s.expire(request_id).is_empty());
        assert!(s.handle(x, ClientMessage::ReleaseHost { request_id }).is_empty());
        assert_eq!(s.host_id(), None);
    }

    #[test]
    fn force_claim_sweeps_requests_addressed_to_old_host() {
        let mut s = session();
        let (x, y, z) = (ClientId::new(), ClientId::new(), ClientId::new());
        let request_id = negotiating(&mut s, x, y);

        assert_eq!(s.handle(z, ClientMessage::RegisterHost), host_changed(Some(z)));
        assert_eq!(s.pending_count(), 0);
        assert!(s.scheduler.armed.is_empty());
        assert!(s.expire(request_id).is_empty());
        assert_eq!(s.host_id(), Some(z));
    }

    #[test]
    fn competing_requests_resolve_to_one_host() {
        let mut s = session();
        let (x, y, z) = (ClientId::new(), ClientId::new(), ClientId::new());
        let from_y = negotiating(&mut s, x, y);
        s.handle(z, ClientMessage::RequestHost);
        assert_eq!(s.pending_count(), 2);

        assert_eq!(
            s.handle(x, ClientMessage::ReleaseHost { request_id: from_y }),
            host_changed(Some(y))
        );
        // z's request was addressed to x, who is no longer host
        assert_eq!(s.pending_count(), 0);
        assert!(s.scheduler.armed.is_empty());
        assert_eq!(s.host_id(), Some(y));
    }

    #[test]
    fn scene_updates_relay_only_from_host() {
        let mut s = session();
        let (x, y) = (ClientId::new(), ClientId::new());
        s.handle(x, ClientMessage::RegisterHost);
        let pose = json!({ "position": [1, 2, 3] });

        assert!(s.handle(y, ClientMessage::CameraUpdate(pose.clone())).is_empty());
        assert!(s.handle(y, ClientMessage::HostPointerToggle { active: true }).is_empty());
        assert_eq!(
            s.handle(x, ClientMessage::CameraUpdate(pose.clone())),
            vec![Outbound::everyone_except(x, ServerMessage::CameraUpdate(pose))]
        );
        assert_eq!(
            s.handle(x, ClientMessage::HostPointerUpdate { position: json!([0.5, 0.5]) }),
            vec![Outbound::everyone_except(
                x,
                ServerMessage::HostPointerUpdate { position: json!([0.5, 0.5]) }
            )]
        );
    }

    #[test]
    fn scenario_deny_then_timeout() {
        let mut s = session();
        let (x, y) = (ClientId::new(), ClientId::new());

        let r1 = negotiating(&mut s, x, y);
        s.handle(x, ClientMessage::DenyHost { request_id: r1 });
        assert_eq!(s.host_id(), Some(x));

        let out = s.handle(y, ClientMessage::RequestHost);
        assert_eq!(out.len(), 1);
        let r2 = s.scheduler.scheduled[1];
        assert_ne!(r1, r2);

        assert_eq!(s.expire(r2), host_changed(Some(y)));
        assert_eq!(s.host_id(), Some(y));
    }
}
