//! Peer session establisher.
//!
//! Drives the handshake that turns a relayed signaling exchange into a direct
//! peer channel. One instance lives on each device; both sides run the same
//! state machine:
//!
//! ```text
//! Idle → AwaitingPairing → Handshaking → Connected → Open
//!                                   any step → Failed
//!                        Open | Failed → Closed
//! ```
//!
//! The side whose `verify-code` request succeeds becomes the handshake
//! [`Role::Initiator`]: it opens a peer connection, creates the offer and
//! relays it to the paired peer. The code issuer becomes the
//! [`Role::Responder`] and answers the first offer it receives. The role is
//! decided once, when pairing completes, and stored explicitly rather than
//! inferred from the order in which handlers happen to run.
//!
//! The underlying peer connection is a given capability, expressed as the
//! [`PeerTransport`] trait. The transport reports its own lifecycle back to
//! the session as [`TransportEvent`]s.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, ConnectionId};

/// States of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No pairing attempt yet
    Idle,
    /// Waiting for the relay to confirm a pairing
    AwaitingPairing,
    /// Exchanging offer/answer/candidates through the relay
    Handshaking,
    /// Network path established, data channel not yet usable
    Connected,
    /// Data channel ready for use
    Open,
    /// Handshake or transport failed; resources released
    Failed,
    /// Torn down; all resources released
    Closed,
}

/// Which side of the handshake this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Completed code verification locally; creates the offer
    Initiator,
    /// Issued the code; answers the first offer
    Responder,
}

/// Events the underlying transport reports to the session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The network path to the peer is established.
    PathConnected,
    /// The data channel is ready for use.
    ChannelOpen,
    /// The network path failed.
    PathFailed(String),
    /// A local network candidate was discovered and must be relayed.
    LocalCandidate(Value),
}

/// The data-channel-capable peer connection object.
///
/// This is the connection-setup surface of the peer-to-peer transport
/// primitive, which this crate treats as a given capability. Descriptions
/// and candidates are opaque values produced and consumed by the transport;
/// the session only moves them through the relay.
pub trait PeerTransport {
    /// Create the initial connection offer.
    fn create_offer(&mut self) -> impl std::future::Future<Output = Result<Value>> + Send;

    /// Apply the remote side's session description (offer or answer).
    fn apply_remote_description(
        &mut self,
        description: Value,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Create an answer to a previously applied remote offer.
    fn create_answer(&mut self) -> impl std::future::Future<Output = Result<Value>> + Send;

    /// Apply a remote network candidate.
    fn add_remote_candidate(
        &mut self,
        candidate: Value,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Release the transport and all of its resources.
    fn close(&mut self) -> impl std::future::Future<Output = ()> + Send;
}

/// A peer session, one per device per pairing.
pub struct PeerSession<T, F>
where
    T: PeerTransport,
    F: FnMut() -> T,
{
    state: SessionState,
    role: Option<Role>,
    peer: Option<ConnectionId>,
    transport: Option<T>,
    make_transport: F,
    /// True while a locally submitted verify-code is outstanding; decides
    /// the initiator role when pairing succeeds.
    verifying: bool,
    /// Remote candidates that arrived before the transport existed,
    /// replayed in arrival order once it does.
    pending_candidates: Vec<Value>,
    signaling_tx: mpsc::UnboundedSender<ClientMessage>,
}

impl<T, F> std::fmt::Debug for PeerSession<T, F>
where
    T: PeerTransport,
    F: FnMut() -> T,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("state", &self.state)
            .field("role", &self.role)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl<T, F> PeerSession<T, F>
where
    T: PeerTransport,
    F: FnMut() -> T,
{
    /// Create an idle session.
    ///
    /// `make_transport` constructs the peer connection object when the
    /// handshake needs one; `signaling_tx` carries outbound messages to the
    /// relay connection.
    pub fn new(make_transport: F, signaling_tx: mpsc::UnboundedSender<ClientMessage>) -> Self {
        Self {
            state: SessionState::Idle,
            role: None,
            peer: None,
            transport: None,
            make_transport,
            verifying: false,
            pending_candidates: Vec::new(),
            signaling_tx,
        }
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handshake role, once pairing has completed.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Connection id of the paired peer, once pairing has completed.
    #[must_use]
    pub fn peer(&self) -> Option<ConnectionId> {
        self.peer
    }

    /// Ask the relay for a pairing code to display.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not idle or the signaling
    /// connection is gone.
    pub fn request_code(&mut self) -> Result<()> {
        self.expect_state(SessionState::Idle, "request_code")?;
        self.send_signal(ClientMessage::GenerateCode)?;
        self.state = SessionState::AwaitingPairing;
        Ok(())
    }

    /// Submit a code the user typed in.
    ///
    /// If the relay confirms it, this side becomes the handshake initiator.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not idle or the signaling
    /// connection is gone.
    pub fn submit_code(&mut self, code: &str) -> Result<()> {
        self.expect_state(SessionState::Idle, "submit_code")?;
        self.send_signal(ClientMessage::VerifyCode {
            code: code.trim().to_string(),
        })?;
        self.verifying = true;
        self.state = SessionState::AwaitingPairing;
        Ok(())
    }

    /// Handle a `pair-success` message from the relay.
    ///
    /// Decides the role: the verifying side initiates, creating and relaying
    /// the offer; the issuing side waits for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the session was not awaiting pairing, or if
    /// creating or relaying the offer fails.
    pub async fn handle_pair_success(&mut self, peer_id: ConnectionId) -> Result<()> {
        self.expect_state(SessionState::AwaitingPairing, "handle_pair_success")?;

        self.peer = Some(peer_id);
        self.state = SessionState::Handshaking;

        if self.verifying {
            self.role = Some(Role::Initiator);
            tracing::info!("paired with {peer_id}, initiating handshake");

            let mut transport = self.create_transport();
            let offer = match transport.create_offer().await {
                Ok(offer) => offer,
                Err(e) => {
                    self.transport = Some(transport);
                    return self.fail(e).await;
                }
            };
            self.transport = Some(transport);
            self.flush_pending_candidates().await?;
            self.send_signal(ClientMessage::Offer {
                target: peer_id,
                offer,
            })?;
        } else {
            self.role = Some(Role::Responder);
            tracing::info!("paired with {peer_id}, awaiting offer");
        }

        Ok(())
    }

    /// Handle a `pair-error` message from the relay.
    ///
    /// The user may retry with a fresh code; this session is done.
    ///
    /// # Errors
    ///
    /// Always returns [`Error::PairingExpired`] after moving to `Failed`.
    pub async fn handle_pair_error(&mut self, message: &str) -> Result<()> {
        tracing::warn!("pairing failed: {message}");
        self.fail(Error::PairingExpired).await
    }

    /// Handle a forwarded offer.
    ///
    /// The first offer makes the responder create its transport, apply the
    /// remote description and relay an answer back. Later offers (or offers
    /// on a side that already sent one) are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake has not started or the transport
    /// rejects the description.
    pub async fn handle_offer(&mut self, from: ConnectionId, offer: Value) -> Result<()> {
        self.expect_state(SessionState::Handshaking, "handle_offer")?;

        if self.transport.is_some() {
            tracing::warn!("ignoring offer from {from}: peer connection already set up");
            return Ok(());
        }

        let mut transport = self.create_transport();
        let answer = async {
            transport.apply_remote_description(offer).await?;
            transport.create_answer().await
        }
        .await;

        match answer {
            Ok(answer) => {
                self.transport = Some(transport);
                self.flush_pending_candidates().await?;
                self.send_signal(ClientMessage::Answer {
                    target: from,
                    answer,
                })
            }
            Err(e) => {
                self.transport = Some(transport);
                self.fail(e).await
            }
        }
    }

    /// Handle a forwarded answer by applying it as the remote description.
    ///
    /// # Errors
    ///
    /// Returns an error if no offer was sent or the transport rejects the
    /// description.
    pub async fn handle_answer(&mut self, from: ConnectionId, answer: Value) -> Result<()> {
        self.expect_state(SessionState::Handshaking, "handle_answer")?;

        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::HandshakeFailed(format!(
                "answer from {from} but no offer was sent"
            )));
        };

        if let Err(e) = transport.apply_remote_description(answer).await {
            return self.fail(e).await;
        }
        Ok(())
    }

    /// Handle a forwarded network candidate.
    ///
    /// Candidates are applied in arrival order for the lifetime of the
    /// session. A candidate racing ahead of the offer is held back and
    /// replayed once the transport exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the candidate.
    pub async fn handle_candidate(&mut self, candidate: Value) -> Result<()> {
        if matches!(self.state, SessionState::Failed | SessionState::Closed) {
            tracing::debug!("dropping candidate for finished session");
            return Ok(());
        }

        match self.transport.as_mut() {
            Some(transport) => {
                if let Err(e) = transport.add_remote_candidate(candidate).await {
                    return self.fail(e).await;
                }
                Ok(())
            }
            None => {
                self.pending_candidates.push(candidate);
                Ok(())
            }
        }
    }

    /// Handle an event reported by the underlying transport.
    ///
    /// # Errors
    ///
    /// Returns the transport failure when the event is
    /// [`TransportEvent::PathFailed`], or a signaling error when a local
    /// candidate cannot be relayed.
    pub async fn handle_transport_event(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::PathConnected => {
                if self.state == SessionState::Handshaking {
                    self.state = SessionState::Connected;
                    tracing::info!("network path established");
                }
                Ok(())
            }
            TransportEvent::ChannelOpen => {
                if matches!(
                    self.state,
                    SessionState::Handshaking | SessionState::Connected
                ) {
                    self.state = SessionState::Open;
                    tracing::info!("data channel open");
                }
                Ok(())
            }
            TransportEvent::PathFailed(reason) => self.fail(Error::HandshakeFailed(reason)).await,
            TransportEvent::LocalCandidate(candidate) => {
                let Some(peer) = self.peer else {
                    tracing::debug!("discarding local candidate before pairing");
                    return Ok(());
                };
                self.send_signal(ClientMessage::Candidate {
                    target: peer,
                    candidate,
                })
            }
        }
    }

    /// Tear the session down, releasing the transport.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.pending_candidates.clear();
        self.state = SessionState::Closed;
        tracing::debug!("session closed");
    }

    fn create_transport(&mut self) -> T {
        (self.make_transport)()
    }

    async fn flush_pending_candidates(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending_candidates);
        if pending.is_empty() {
            return Ok(());
        }

        tracing::debug!("applying {} buffered candidate(s)", pending.len());
        let transport = self.transport.as_mut().expect("transport present");
        for candidate in pending {
            if let Err(e) = transport.add_remote_candidate(candidate).await {
                return self.fail(e).await;
            }
        }
        Ok(())
    }

    async fn fail(&mut self, error: Error) -> Result<()> {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.pending_candidates.clear();
        self.state = SessionState::Failed;
        tracing::warn!("session failed: {error}");
        Err(error)
    }

    fn expect_state(&self, expected: SessionState, operation: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidSessionState(format!(
                "{operation} requires {expected:?}, session is {:?}",
                self.state
            )))
        }
    }

    fn send_signal(&self, message: ClientMessage) -> Result<()> {
        self.signaling_tx
            .send(message)
            .map_err(|_| Error::HandshakeFailed("signaling connection closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Transport double that records every call in order.
    #[derive(Debug, Default, Clone)]
    struct FakeTransport {
        calls: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
        fail_on_answer: bool,
    }

    impl FakeTransport {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PeerTransport for FakeTransport {
        async fn create_offer(&mut self) -> crate::Result<Value> {
            self.calls.lock().unwrap().push("create_offer".to_string());
            Ok(json!({"sdp": "offer"}))
        }

        async fn apply_remote_description(&mut self, description: Value) -> crate::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("apply_remote:{description}"));
            Ok(())
        }

        async fn create_answer(&mut self) -> crate::Result<Value> {
            if self.fail_on_answer {
                return Err(Error::HandshakeFailed("answer rejected".to_string()));
            }
            self.calls.lock().unwrap().push("create_answer".to_string());
            Ok(json!({"sdp": "answer"}))
        }

        async fn add_remote_candidate(&mut self, candidate: Value) -> crate::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("candidate:{candidate}"));
            Ok(())
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    type TestSession = PeerSession<FakeTransport, Box<dyn FnMut() -> FakeTransport>>;

    fn session_with(
        transport: FakeTransport,
    ) -> (TestSession, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let factory: Box<dyn FnMut() -> FakeTransport> = Box::new(move || transport.clone());
        (PeerSession::new(factory, tx), rx)
    }

    #[tokio::test]
    async fn test_initiator_flow() {
        let transport = FakeTransport::default();
        let (mut session, mut rx) = session_with(transport.clone());
        let peer = ConnectionId::generate();

        assert_eq!(session.state(), SessionState::Idle);

        session.submit_code("4821").unwrap();
        assert_eq!(session.state(), SessionState::AwaitingPairing);
        assert!(matches!(
            rx.try_recv().unwrap(),
            ClientMessage::VerifyCode { code } if code == "4821"
        ));

        session.handle_pair_success(peer).await.unwrap();
        assert_eq!(session.state(), SessionState::Handshaking);
        assert_eq!(session.role(), Some(Role::Initiator));
        assert_eq!(session.peer(), Some(peer));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ClientMessage::Offer { target, .. } if target == peer
        ));

        session
            .handle_answer(peer, json!({"sdp": "answer"}))
            .await
            .unwrap();

        session
            .handle_transport_event(TransportEvent::PathConnected)
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Connected);

        session
            .handle_transport_event(TransportEvent::ChannelOpen)
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_responder_flow() {
        let transport = FakeTransport::default();
        let (mut session, mut rx) = session_with(transport.clone());
        let peer = ConnectionId::generate();

        session.request_code().unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            ClientMessage::GenerateCode
        ));

        session.handle_pair_success(peer).await.unwrap();
        assert_eq!(session.role(), Some(Role::Responder));
        // Responder creates no transport until the offer arrives.
        assert!(rx.try_recv().is_err());

        session
            .handle_offer(peer, json!({"sdp": "offer"}))
            .await
            .unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            ClientMessage::Answer { target, .. } if target == peer
        ));

        let calls = transport.calls();
        assert_eq!(
            calls,
            vec![
                "apply_remote:{\"sdp\":\"offer\"}".to_string(),
                "create_answer".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_offer_ignored() {
        let transport = FakeTransport::default();
        let (mut session, mut rx) = session_with(transport.clone());
        let peer = ConnectionId::generate();

        session.request_code().unwrap();
        session.handle_pair_success(peer).await.unwrap();
        let _ = rx.try_recv();

        session.handle_offer(peer, json!({"n": 1})).await.unwrap();
        let _ = rx.try_recv();
        session.handle_offer(peer, json!({"n": 2})).await.unwrap();

        // Only the first offer reached the transport.
        assert_eq!(
            transport
                .calls()
                .iter()
                .filter(|c| c.starts_with("apply_remote"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_candidates_applied_in_arrival_order() {
        let transport = FakeTransport::default();
        let (mut session, _rx) = session_with(transport.clone());
        let peer = ConnectionId::generate();

        session.request_code().unwrap();
        session.handle_pair_success(peer).await.unwrap();

        // Candidates racing ahead of the offer are buffered...
        session.handle_candidate(json!({"c": 1})).await.unwrap();
        session.handle_candidate(json!({"c": 2})).await.unwrap();

        session.handle_offer(peer, json!({"sdp": "offer"})).await.unwrap();

        // ...and one arriving after the transport exists goes straight in.
        session.handle_candidate(json!({"c": 3})).await.unwrap();

        let candidates: Vec<String> = transport
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("candidate"))
            .collect();
        assert_eq!(
            candidates,
            vec![
                "candidate:{\"c\":1}".to_string(),
                "candidate:{\"c\":2}".to_string(),
                "candidate:{\"c\":3}".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_candidate_before_pairing_replayed_on_initiator() {
        let transport = FakeTransport::default();
        let (mut session, _rx) = session_with(transport.clone());
        let peer = ConnectionId::generate();

        session.submit_code("4821").unwrap();
        // Arrives while the verify-code response is still in flight.
        session.handle_candidate(json!({"c": "early"})).await.unwrap();

        session.handle_pair_success(peer).await.unwrap();

        let candidates: Vec<String> = transport
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("candidate"))
            .collect();
        assert_eq!(candidates, vec!["candidate:{\"c\":\"early\"}".to_string()]);
    }

    #[tokio::test]
    async fn test_local_candidate_relayed_to_peer() {
        let transport = FakeTransport::default();
        let (mut session, mut rx) = session_with(transport);
        let peer = ConnectionId::generate();

        session.submit_code("1000").unwrap();
        session.handle_pair_success(peer).await.unwrap();
        let _ = rx.try_recv(); // VerifyCode
        let _ = rx.try_recv(); // Offer

        session
            .handle_transport_event(TransportEvent::LocalCandidate(json!({"c": "local"})))
            .await
            .unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            ClientMessage::Candidate { target, .. } if target == peer
        ));
    }

    #[tokio::test]
    async fn test_pair_error_fails_session() {
        let transport = FakeTransport::default();
        let (mut session, _rx) = session_with(transport);

        session.submit_code("9999").unwrap();
        let result = session.handle_pair_error("pairing code invalid or expired").await;

        assert!(matches!(result, Err(Error::PairingExpired)));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_path_failure_releases_transport() {
        let transport = FakeTransport::default();
        let (mut session, _rx) = session_with(transport.clone());
        let peer = ConnectionId::generate();

        session.submit_code("4821").unwrap();
        session.handle_pair_success(peer).await.unwrap();

        let result = session
            .handle_transport_event(TransportEvent::PathFailed("ice failed".to_string()))
            .await;

        assert!(matches!(result, Err(Error::HandshakeFailed(_))));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_answer_failure_fails_responder() {
        let transport = FakeTransport {
            fail_on_answer: true,
            ..FakeTransport::default()
        };
        let (mut session, _rx) = session_with(transport.clone());
        let peer = ConnectionId::generate();

        session.request_code().unwrap();
        session.handle_pair_success(peer).await.unwrap();

        let result = session.handle_offer(peer, json!({"sdp": "offer"})).await;
        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_releases_transport() {
        let transport = FakeTransport::default();
        let (mut session, _rx) = session_with(transport.clone());
        let peer = ConnectionId::generate();

        session.submit_code("4821").unwrap();
        session.handle_pair_success(peer).await.unwrap();
        session
            .handle_transport_event(TransportEvent::ChannelOpen)
            .await
            .unwrap();

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_operations_guarded_by_state() {
        let transport = FakeTransport::default();
        let (mut session, _rx) = session_with(transport);
        let peer = ConnectionId::generate();

        // Pairing results and offers mean nothing to an idle session.
        assert!(session.handle_pair_success(peer).await.is_err());
        assert!(session.handle_offer(peer, json!({})).await.is_err());

        session.request_code().unwrap();
        assert!(session.request_code().is_err());
        assert!(session.submit_code("4821").is_err());
    }
}
