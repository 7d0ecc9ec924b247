//! Connection ownership and the retry supervisor.
//!
//! The controller owns the single connection handle and its state, runs the
//! connect loop on a dedicated task, and replays the topic registry against
//! every fresh connection. Connect-time failures are never surfaced to the
//! caller; they are logged and retried at a fixed interval until either the
//! broker accepts or a disconnect is requested.

use super::connection::{configure_mqtt_options, ConnectionState, RetryPolicy};
use super::dispatcher::{route_event, DispatcherSlot, EventRoute};
use super::registry::TopicRegistry;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Tagged link state. The live handle exists only inside `Up`, so
/// "connected but no handle" cannot be represented.
enum Link {
    Down,
    Dialing,
    Up(AsyncClient),
}

impl Link {
    fn state(&self) -> ConnectionState {
        match self {
            Link::Down => ConnectionState::Disconnected,
            Link::Dialing => ConnectionState::Connecting,
            Link::Up(_) => ConnectionState::Connected,
        }
    }
}

/// Single owner of the link. The watch channel mirrors the tagged state so
/// callers can observe transitions without holding the lock; the two are
/// only updated together, under the lock.
pub(crate) struct LinkSlot {
    link: Mutex<Link>,
    state_tx: watch::Sender<ConnectionState>,
}

impl LinkSlot {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            link: Mutex::new(Link::Down),
            state_tx,
        }
    }

    async fn set(&self, link: Link) {
        let mut guard = self.link.lock().await;
        self.state_tx.send_replace(link.state());
        *guard = link;
    }

    async fn set_down(&self) {
        self.set(Link::Down).await;
    }

    async fn set_dialing(&self) {
        self.set(Link::Dialing).await;
    }

    async fn set_up(&self, client: AsyncClient) {
        self.set(Link::Up(client)).await;
    }

    /// The live handle, if the link is up. Fetching the handle and checking
    /// the state are one lock acquisition, so a caller can never observe a
    /// handle mid-replacement.
    pub(crate) async fn client(&self) -> Option<AsyncClient> {
        match &*self.link.lock().await {
            Link::Up(client) => Some(client.clone()),
            _ => None,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}

#[derive(Default)]
struct Supervisor {
    handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

/// Owns the connection handle, its state and the connect retry loop.
pub(crate) struct ConnectionController {
    broker_url: String,
    client_id: String,
    retry: RetryPolicy,
    link: Arc<LinkSlot>,
    registry: Arc<TopicRegistry>,
    dispatcher: Arc<DispatcherSlot>,
    supervisor: Mutex<Supervisor>,
}

impl ConnectionController {
    pub(crate) fn new(
        broker_url: String,
        client_id: String,
        retry: RetryPolicy,
        registry: Arc<TopicRegistry>,
        dispatcher: Arc<DispatcherSlot>,
    ) -> Self {
        Self {
            broker_url,
            client_id,
            retry,
            link: Arc::new(LinkSlot::new()),
            registry,
            dispatcher,
            supervisor: Mutex::new(Supervisor::default()),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        // The supervisor downgrades the slot on every drop event it sees,
        // so slot state tracks the live handle rather than a stale cache.
        self.link.state() == ConnectionState::Connected
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.link.state()
    }

    pub(crate) async fn client(&self) -> Option<AsyncClient> {
        self.link.client().await
    }

    /// Start the connect loop and wait until it reaches `Connected` or a
    /// disconnect request stops it. Never returns an error: connect-time
    /// failures are logged and retried forever.
    ///
    /// Calling this while already connected (or while another connect is in
    /// flight) logs and returns without opening a second handle.
    pub(crate) async fn connect(&self) {
        {
            let mut supervisor = self.supervisor.lock().await;

            if self.link.state() == ConnectionState::Connected {
                warn!("connect() called while already connected; ignoring");
                return;
            }
            if supervisor.handle.as_ref().is_some_and(|h| !h.is_finished()) {
                warn!("connect() called while a connect loop is already running; ignoring");
                return;
            }

            let options = match configure_mqtt_options(&self.broker_url, &self.client_id) {
                Ok(options) => options,
                Err(e) => {
                    error!(error = %e, "refusing to start connect loop");
                    return;
                }
            };

            info!(
                broker_url = %self.broker_url,
                client_id = %self.client_id,
                "connecting mqtt session"
            );

            let (client, event_loop) = AsyncClient::new(options, 10);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            self.link.set_dialing().await;
            supervisor.handle = Some(tokio::spawn(Self::run_supervisor(
                client,
                event_loop,
                self.link.clone(),
                self.registry.clone(),
                self.dispatcher.clone(),
                self.retry.clone(),
                shutdown_rx,
            )));
            supervisor.shutdown_tx = Some(shutdown_tx);
        }

        // Wait for the supervisor to reach Connected, or to exit on a
        // disconnect request, in which case the state falls back to
        // Disconnected and we return quietly.
        let mut state_rx = self.link.watch();
        loop {
            match *state_rx.borrow_and_update() {
                ConnectionState::Connected => return,
                ConnectionState::Disconnected => {
                    info!("connect aborted by disconnect request");
                    return;
                }
                ConnectionState::Connecting => {}
            }
            if state_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stop the supervisor, close the live connection if present and drop
    /// the handle. Errors during close are logged and ignored; disconnect
    /// always completes logically. No-op when already disconnected.
    pub(crate) async fn disconnect(&self) {
        let mut supervisor = self.supervisor.lock().await;

        let Some(shutdown_tx) = supervisor.shutdown_tx.take() else {
            debug!("disconnect() with no active session; nothing to do");
            return;
        };
        info!("disconnecting mqtt session");
        let _ = shutdown_tx.send(true);

        if let Some(client) = self.link.client().await {
            if let Err(e) = client.disconnect().await {
                warn!(error = %e, "error while closing mqtt connection; continuing shutdown");
            }
        }
        self.link.set_down().await;

        if let Some(mut handle) = supervisor.handle.take() {
            match tokio::time::timeout(Duration::from_secs(2), &mut handle).await {
                Ok(Ok(())) => info!("session supervisor shut down cleanly"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(error = %e, "session supervisor ended with error")
                }
                Err(_) => {
                    // Dropping the handle would only detach the task; abort
                    // so its exit path can never touch a later session's link
                    warn!("session supervisor did not stop in time; aborting");
                    handle.abort();
                }
                _ => {}
            }
        }

        info!("mqtt session disconnected");
    }

    /// The connect loop and event pump, run on a dedicated task.
    ///
    /// `EventLoop::poll` drives both dialing and the established session:
    /// a `ConnAck` marks the link up, a poll error marks it dialing and
    /// schedules the next attempt after the retry interval. The shutdown
    /// flag is checked at iteration boundaries and interrupts an
    /// in-progress retry wait.
    async fn run_supervisor(
        client: AsyncClient,
        mut event_loop: EventLoop,
        link: Arc<LinkSlot>,
        registry: Arc<TopicRegistry>,
        dispatcher: Arc<DispatcherSlot>,
        retry: RetryPolicy,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(retry_interval_ms = retry.interval_ms, "session supervisor started");

        loop {
            if *shutdown_rx.borrow() {
                info!("disconnect requested, stopping session supervisor");
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("disconnect requested, stopping session supervisor");
                        break;
                    }
                }

                polled = event_loop.poll() => {
                    match polled {
                        Ok(event) => {
                            Self::handle_event(
                                &event,
                                &client,
                                &link,
                                &registry,
                                &dispatcher,
                            )
                            .await;
                        }
                        Err(e) => {
                            link.set_dialing().await;
                            error!(error = %e, "connect attempt failed");
                            info!(
                                delay_ms = retry.interval_ms,
                                "next connect attempt scheduled"
                            );
                            if !Self::interruptible_sleep(shutdown_rx.clone(), retry.interval())
                                .await
                            {
                                break;
                            }
                        }
                    }
                }
            }
        }

        link.set_down().await;
        info!("session supervisor stopped");
    }

    async fn handle_event(
        event: &rumqttc::v5::Event,
        client: &AsyncClient,
        link: &LinkSlot,
        registry: &TopicRegistry,
        dispatcher: &DispatcherSlot,
    ) {
        match route_event(event) {
            EventRoute::ConnectionAcknowledged => {
                info!("mqtt session connected");
                link.set_up(client.clone()).await;
                Self::replay_subscriptions(client, registry).await;
            }
            EventRoute::MessageArrived { topic, payload } => {
                debug!(topic = %topic, bytes = payload.len(), "inbound message");
                dispatcher.forward_message(&topic, &payload).await;
            }
            EventRoute::DeliveryConfirmed { token } => {
                debug!(token, "delivery acknowledged");
                dispatcher.forward_delivery(token).await;
            }
            EventRoute::BrokerDisconnect => {
                warn!("broker closed the connection, re-dialing");
                link.set_dialing().await;
            }
            EventRoute::SubscriptionConfirmed { packet_id } => {
                debug!(packet_id, "subscription confirmed");
            }
            EventRoute::Infrastructure(event) => {
                debug!(target: "mqtt_session", "mqtt event: {event}");
            }
            EventRoute::Outgoing => {}
        }
    }

    /// Re-issue every topic in the registry against a fresh connection and
    /// return how many subscriptions were issued. Individual failures are
    /// logged but never abort the connect.
    async fn replay_subscriptions(client: &AsyncClient, registry: &TopicRegistry) -> usize {
        let topics = registry.snapshot().await;
        if topics.is_empty() {
            return 0;
        }

        info!(count = topics.len(), "replaying topic subscriptions");
        let mut replayed = 0;
        for topic in topics {
            if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
                error!(topic = %topic, error = %e, "failed to re-subscribe");
            } else {
                debug!(topic = %topic, "re-subscribed");
                replayed += 1;
            }
        }
        replayed
    }

    /// Sleep for the retry interval, waking early on a disconnect request.
    /// Returns false if the supervisor should stop.
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("disconnect requested during retry delay");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        // Best effort: async disconnect is not possible here, so just stop
        // the supervisor task. Hosts should call disconnect() for a clean
        // shutdown; skipping it leaks the open connection.
        if let Ok(mut supervisor) = self.supervisor.try_lock() {
            if let Some(shutdown_tx) = supervisor.shutdown_tx.take() {
                let _ = shutdown_tx.send(true);
            }
            if let Some(handle) = supervisor.handle.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, ConnectReturnCode, Packet};
    use rumqttc::v5::Event;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn test_controller(retry_interval_ms: u64) -> ConnectionController {
        ConnectionController::new(
            "mqtt://127.0.0.1:1".to_string(),
            "test-controller".to_string(),
            RetryPolicy::new(retry_interval_ms),
            Arc::new(TopicRegistry::new()),
            Arc::new(DispatcherSlot::new()),
        )
    }

    #[tokio::test]
    async fn test_initial_state_is_disconnected() {
        let controller = test_controller(100);
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(!controller.is_connected());
        assert!(controller.client().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let controller = test_controller(100);
        controller.disconnect().await;
        controller.disconnect().await;
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_link_slot_transitions() {
        let slot = LinkSlot::new();
        assert_eq!(slot.state(), ConnectionState::Disconnected);

        slot.set_dialing().await;
        assert_eq!(slot.state(), ConnectionState::Connecting);
        assert!(slot.client().await.is_none());

        let (client, _event_loop) =
            AsyncClient::new(configure_mqtt_options("mqtt://localhost:1883", "t").unwrap(), 10);
        slot.set_up(client).await;
        assert_eq!(slot.state(), ConnectionState::Connected);
        assert!(slot.client().await.is_some());

        slot.set_down().await;
        assert_eq!(slot.state(), ConnectionState::Disconnected);
        assert!(slot.client().await.is_none());
    }

    #[tokio::test]
    async fn test_link_slot_watch_observes_transitions() {
        let slot = LinkSlot::new();
        let mut rx = slot.watch();

        slot.set_dialing().await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Connecting);

        slot.set_down().await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_tx, rx) = watch::channel(false);
        let completed =
            ConnectionController::interruptible_sleep(rx, Duration::from_millis(10)).await;
        assert!(completed, "sleep should complete without interruption");
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = tx.send(true);
        });

        let completed =
            ConnectionController::interruptible_sleep(rx, Duration::from_secs(60)).await;
        assert!(!completed, "sleep should be interrupted by disconnect");
    }

    #[tokio::test]
    async fn test_connect_retries_until_disconnect() {
        // Port 1 refuses connections, so the supervisor keeps retrying
        let controller = Arc::new(test_controller(50));

        let connecting = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.connect().await })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!controller.is_connected());
        assert_eq!(controller.state(), ConnectionState::Connecting);
        assert!(!connecting.is_finished(), "connect() must block while retrying");

        controller.disconnect().await;
        tokio::time::timeout(Duration::from_secs(2), connecting)
            .await
            .expect("connect() must return after disconnect")
            .unwrap();
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connack_marks_link_up_and_attaches_handle() {
        let registry = Arc::new(TopicRegistry::seeded(vec![
            "shelf/+/battery".to_string(),
            "shelf/+/status".to_string(),
        ]));
        let link = Arc::new(LinkSlot::new());
        let dispatcher = DispatcherSlot::new();
        // The request channel works without a broker, so the replayed
        // subscriptions queue on it instead of erroring
        let (client, _event_loop) =
            AsyncClient::new(configure_mqtt_options("mqtt://localhost:1883", "t").unwrap(), 10);

        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));

        link.set_dialing().await;
        ConnectionController::handle_event(&connack, &client, &link, &registry, &dispatcher).await;

        assert_eq!(link.state(), ConnectionState::Connected);
        assert!(link.client().await.is_some());
    }

    #[tokio::test]
    async fn test_replay_issues_one_subscribe_per_registered_topic() {
        let registry = TopicRegistry::seeded(vec![
            "shelf/+/status".to_string(),
            "shelf/+/battery".to_string(),
            "shelf/+/status".to_string(), // duplicate collapses in the registry
        ]);
        let (client, _event_loop) =
            AsyncClient::new(configure_mqtt_options("mqtt://localhost:1883", "t").unwrap(), 10);

        let replayed = ConnectionController::replay_subscriptions(&client, &registry).await;
        assert_eq!(replayed, 2);

        // A later reconnect replays the unchanged registry in full again
        let replayed_again = ConnectionController::replay_subscriptions(&client, &registry).await;
        assert_eq!(replayed_again, 2);
    }

    #[tokio::test]
    async fn test_replay_with_empty_registry_issues_nothing() {
        let registry = TopicRegistry::new();
        let (client, _event_loop) =
            AsyncClient::new(configure_mqtt_options("mqtt://localhost:1883", "t").unwrap(), 10);

        assert_eq!(
            ConnectionController::replay_subscriptions(&client, &registry).await,
            0
        );
    }

    #[tokio::test]
    async fn test_disconnect_aborts_supervisor_that_ignores_shutdown() {
        let controller = test_controller(50);
        let reached_exit = Arc::new(AtomicBool::new(false));

        // Stand-in supervisor that ignores the shutdown flag for longer
        // than the disconnect grace period but would finish soon after it
        let stuck = {
            let reached_exit = reached_exit.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(2500)).await;
                reached_exit.store(true, Ordering::SeqCst);
            })
        };
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        {
            let mut supervisor = controller.supervisor.lock().await;
            supervisor.handle = Some(stuck);
            supervisor.shutdown_tx = Some(shutdown_tx);
        }

        controller.disconnect().await;

        // Well past the task's own finish line: had disconnect merely
        // dropped the handle, the detached task would have completed by now
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(
            !reached_exit.load(Ordering::SeqCst),
            "a supervisor outliving the disconnect grace period must be aborted, not detached"
        );
    }

    #[tokio::test]
    async fn test_second_connect_while_loop_running_is_rejected() {
        let controller = Arc::new(test_controller(50));

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Returns immediately without spawning a second supervisor
        tokio::time::timeout(Duration::from_millis(500), controller.connect())
            .await
            .expect("re-entrant connect() must not block");

        controller.disconnect().await;
        let _ = tokio::time::timeout(Duration::from_secs(2), first).await;
    }
}
