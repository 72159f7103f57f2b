//! Transport session over one duplex connection.
//!
//! `LiveLink` owns the lifecycle of a single connection to the chat
//! backend: open, settling delay, message dispatch, close, and the
//! reconnect policy. Payload sends are gated on `Ready`, which the link
//! only enters a fixed delay after the socket opens, giving the remote
//! side time to finish its own session setup before it will accept media.

use crate::protocol::{ClientEnvelope, ServerEnvelope};
use crate::wire::{Connector, WireEvent, CLOSE_NORMAL, CLOSE_NO_STATUS, CLOSE_OVERLOADED};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection lifecycle. `Ready` is the only state in which `send`
/// accepts payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    /// Socket is open but still inside the settling delay.
    Open,
    Ready,
    Closing,
    /// A reconnect attempt is scheduled.
    ReconnectPending,
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Base endpoint, e.g. `ws://127.0.0.1:8000`.
    pub endpoint: String,
    pub client_id: String,
    /// Post-open wait before the remote side is assumed ready to receive.
    pub settle_delay: Duration,
    /// Delay before the single reconnect attempt after an abnormal close.
    pub reconnect_delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8000".to_string(),
            client_id: "livelink".to_string(),
            settle_delay: Duration::from_millis(1500),
            reconnect_delay: Duration::from_secs(3),
        }
    }
}

impl LinkConfig {
    pub fn url(&self) -> String {
        format!("{}/ws/{}", self.endpoint.trim_end_matches('/'), self.client_id)
    }
}

/// Dispatched to the single registered consumer of this link.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    State(LinkState),
    Message(ServerEnvelope),
}

struct LinkInner {
    state: LinkState,
    wire: Option<Box<dyn crate::wire::Wire>>,
    /// Bumped on every open/close so settle, reconnect, and reader tasks
    /// from a previous connection can never act on the current one.
    epoch: u64,
    settle: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

/// Handle to one transport session. Cheap to clone; all clones share the
/// same connection.
#[derive(Clone)]
pub struct LiveLink {
    config: Arc<LinkConfig>,
    connector: Arc<dyn Connector>,
    inner: Arc<Mutex<LinkInner>>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl LiveLink {
    pub fn new(
        config: LinkConfig,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let link = Self {
            config: Arc::new(config),
            connector,
            inner: Arc::new(Mutex::new(LinkInner {
                state: LinkState::Disconnected,
                wire: None,
                epoch: 0,
                settle: None,
                reconnect: None,
                reader: None,
            })),
            events,
        };
        (link, events_rx)
    }

    pub async fn state(&self) -> LinkState {
        self.inner.lock().await.state
    }

    pub async fn is_ready(&self) -> bool {
        self.state().await == LinkState::Ready
    }

    /// Establish the connection. A no-op while an attempt is already in
    /// flight or the link is up, so racing callers can never produce two
    /// concurrent sockets. A failed attempt lands in `ReconnectPending`
    /// with one retry scheduled.
    pub async fn open(&self) {
        self.open_guarded(None).await;
    }

    /// `expect_epoch` is set by the reconnect timer: the attempt only
    /// proceeds if nothing opened or closed the link since it was
    /// scheduled, checked under the same lock that admits the attempt.
    async fn open_guarded(&self, expect_epoch: Option<u64>) {
        let epoch = {
            let mut inner = self.inner.lock().await;
            if let Some(expected) = expect_epoch {
                if inner.epoch != expected || inner.state != LinkState::ReconnectPending {
                    return;
                }
            }
            match inner.state {
                LinkState::Connecting
                | LinkState::Open
                | LinkState::Ready
                | LinkState::Closing => {
                    debug!(state = ?inner.state, "open ignored");
                    return;
                }
                LinkState::Disconnected | LinkState::ReconnectPending => {}
            }
            inner.epoch += 1;
            // Free the reconnect slot; a stale timer dies on the epoch
            // guard above.
            drop(inner.reconnect.take());
            self.set_state(&mut inner, LinkState::Connecting);
            inner.epoch
        };

        let url = self.config.url();
        info!(%url, "connecting");
        match self.connector.connect(&url).await {
            Ok((wire, wire_events)) => {
                let mut inner = self.inner.lock().await;
                if inner.epoch != epoch || inner.state != LinkState::Connecting {
                    // closed while the handshake was in flight
                    return;
                }
                inner.wire = Some(wire);
                self.set_state(&mut inner, LinkState::Open);
                let link = self.clone();
                inner.reader = Some(tokio::spawn(read_loop(link, wire_events, epoch)));
                let link = self.clone();
                inner.settle = Some(tokio::spawn(async move { link.settle(epoch).await }));
            }
            Err(e) => {
                warn!(error = %e, "connect attempt failed");
                let mut inner = self.inner.lock().await;
                if inner.epoch != epoch || inner.state != LinkState::Connecting {
                    return;
                }
                self.set_state(&mut inner, LinkState::ReconnectPending);
                self.schedule_reconnect(&mut inner, epoch);
            }
        }
    }

    /// Transmit one envelope. Returns false without sending unless the
    /// link is `Ready`; rejected sends are dropped, never queued.
    pub async fn send(&self, envelope: &ClientEnvelope) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state != LinkState::Ready {
            debug!(state = ?inner.state, "send rejected: link not ready");
            return false;
        }
        let text = match serde_json::to_string(envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to serialize outbound message");
                return false;
            }
        };
        match inner.wire.as_mut() {
            Some(wire) => match wire.send_text(text).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "send failed");
                    false
                }
            },
            None => false,
        }
    }

    /// Intentional teardown: cancels the settle timer, any pending
    /// reconnect, and the reader, then closes the socket with a normal
    /// close code. Safe to call more than once.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        let reconnect_pending = inner
            .reconnect
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if inner.state == LinkState::Disconnected && inner.wire.is_none() && !reconnect_pending {
            return;
        }
        inner.epoch += 1;
        for handle in [
            inner.settle.take(),
            inner.reconnect.take(),
            inner.reader.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
        self.set_state(&mut inner, LinkState::Closing);
        if let Some(mut wire) = inner.wire.take() {
            if let Err(e) = wire.close(CLOSE_NORMAL, "client stopped").await {
                debug!(error = %e, "close frame not delivered");
            }
        }
        self.set_state(&mut inner, LinkState::Disconnected);
        info!("link closed");
    }

    fn set_state(&self, inner: &mut LinkInner, state: LinkState) {
        if inner.state != state {
            debug!(from = ?inner.state, to = ?state, "link state change");
            inner.state = state;
            let _ = self.events.send(LinkEvent::State(state));
        }
    }

    async fn settle(self, epoch: u64) {
        tokio::time::sleep(self.config.settle_delay).await;
        let mut inner = self.inner.lock().await;
        if inner.epoch == epoch && inner.state == LinkState::Open {
            info!("settling delay elapsed, link ready");
            self.set_state(&mut inner, LinkState::Ready);
        }
    }

    fn schedule_reconnect(&self, inner: &mut LinkInner, epoch: u64) {
        if inner
            .reconnect
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            debug!("reconnect already scheduled");
            return;
        }
        let delay = self.config.reconnect_delay;
        info!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        let link = self.clone();
        inner.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            link.open_guarded(Some(epoch)).await;
        }));
    }

    async fn handle_remote_close(&self, code: u16, reason: &str, epoch: u64) {
        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch
            || matches!(inner.state, LinkState::Closing | LinkState::Disconnected)
        {
            return;
        }
        info!(code, reason, "connection closed by peer");
        inner.wire = None;
        if let Some(handle) = inner.settle.take() {
            handle.abort();
        }
        self.set_state(&mut inner, LinkState::Disconnected);
        match code {
            CLOSE_NORMAL => {}
            CLOSE_OVERLOADED => {
                warn!("peer reported insufficient resources; not reconnecting");
            }
            _ => {
                self.set_state(&mut inner, LinkState::ReconnectPending);
                self.schedule_reconnect(&mut inner, epoch);
            }
        }
    }
}

/// Pumps wire events into the link: inbound frames are parsed and
/// dispatched; a malformed frame is logged and dropped without touching
/// the connection.
async fn read_loop(
    link: LiveLink,
    mut wire_events: mpsc::UnboundedReceiver<WireEvent>,
    epoch: u64,
) {
    while let Some(event) = wire_events.recv().await {
        match event {
            WireEvent::Text(text) => match serde_json::from_str::<ServerEnvelope>(&text) {
                Ok(envelope) => {
                    let _ = link.events.send(LinkEvent::Message(envelope));
                }
                Err(e) => {
                    warn!(error = %e, "dropping malformed inbound message");
                }
            },
            WireEvent::Closed { code, reason } => {
                link.handle_remote_close(code, &reason, epoch).await;
                return;
            }
        }
    }
    link.handle_remote_close(CLOSE_NO_STATUS, "wire dropped", epoch)
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RemoteStatus;
    use crate::testing::FakeConnector;

    fn test_config() -> LinkConfig {
        LinkConfig {
            endpoint: "ws://test.invalid".to_string(),
            client_id: "t1".to_string(),
            ..Default::default()
        }
    }

    fn text_chunk() -> ClientEnvelope {
        ClientEnvelope::TextMessage {
            text: "hello".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_gate_opens_after_settle_delay() {
        let connector = FakeConnector::new();
        let (link, _events) = LiveLink::new(test_config(), connector.clone());

        link.open().await;
        assert_eq!(link.state().await, LinkState::Open);
        assert!(!link.send(&text_chunk()).await);
        assert!(connector.last_wire().sent_texts().is_empty());

        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert!(!link.send(&text_chunk()).await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(link.state().await, LinkState::Ready);
        assert!(link.send(&text_chunk()).await);
        let sent = connector.last_wire().sent_texts();
        assert_eq!(sent.len(), 1);
        let json: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(json["type"], "text_message");
        assert_eq!(json["text"], "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn open_is_a_no_op_while_connected() {
        let connector = FakeConnector::new();
        let (link, _events) = LiveLink::new(test_config(), connector.clone());

        link.open().await;
        link.open().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        link.open().await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(connector.wire_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn normal_close_does_not_reconnect() {
        let connector = FakeConnector::new();
        let (link, _events) = LiveLink::new(test_config(), connector.clone());

        link.open().await;
        connector.last_wire().push_close(CLOSE_NORMAL, "bye");
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(link.state().await, LinkState::Disconnected);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overloaded_close_does_not_reconnect() {
        let connector = FakeConnector::new();
        let (link, _events) = LiveLink::new(test_config(), connector.clone());

        link.open().await;
        connector.last_wire().push_close(CLOSE_OVERLOADED, "insufficient resources");
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(link.state().await, LinkState::Disconnected);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_close_schedules_exactly_one_reconnect() {
        let connector = FakeConnector::new();
        let (link, _events) = LiveLink::new(test_config(), connector.clone());

        link.open().await;
        connector.last_wire().push_close(1011, "server hiccup");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(link.state().await, LinkState::ReconnectPending);
        assert_eq!(connector.attempts(), 1);

        // fires once after the fixed delay, and only once
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(connector.attempts(), 2);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(link.state().await, LinkState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_a_pending_reconnect() {
        let connector = FakeConnector::new();
        let (link, _events) = LiveLink::new(test_config(), connector.clone());

        link.open().await;
        connector.last_wire().push_close(1011, "server hiccup");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(link.state().await, LinkState::ReconnectPending);

        link.close().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(link.state().await, LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent() {
        let connector = FakeConnector::new();
        let (link, _events) = LiveLink::new(test_config(), connector.clone());

        link.open().await;
        link.close().await;
        link.close().await;
        assert_eq!(link.state().await, LinkState::Disconnected);
        let closed = connector.last_wire().close_frame();
        assert_eq!(closed.map(|(code, _)| code), Some(CLOSE_NORMAL));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_enters_reconnect_pending_and_retries() {
        let connector = FakeConnector::new();
        connector.refuse_next(1);
        let (link, _events) = LiveLink::new(test_config(), connector.clone());

        link.open().await;
        assert_eq!(link.state().await, LinkState::ReconnectPending);
        assert_eq!(connector.attempts(), 1);

        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(link.state().await, LinkState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_inbound_message_is_dropped_not_fatal() {
        let connector = FakeConnector::new();
        let (link, mut events) = LiveLink::new(test_config(), connector.clone());

        link.open().await;
        let wire = connector.last_wire();
        wire.push_text("{ this is not json");
        wire.push_text(r#"{"type":"mystery_meat"}"#);
        wire.push_text(r#"{"type":"connection_status","status":"connected"}"#);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut messages = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let LinkEvent::Message(envelope) = event {
                messages.push(envelope);
            }
        }
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            ServerEnvelope::ConnectionStatus { status, .. } => {
                assert_eq!(*status, RemoteStatus::Connected);
            }
            other => panic!("unexpected envelope: {:?}", other),
        }
        // the link itself is unaffected
        assert_eq!(link.state().await, LinkState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn wire_drop_without_close_frame_reconnects() {
        let connector = FakeConnector::new();
        let (link, _events) = LiveLink::new(test_config(), connector.clone());

        link.open().await;
        connector.last_wire().drop_events();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(link.state().await, LinkState::ReconnectPending);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(connector.attempts(), 2);
    }
}
