//! MQTT session of the Homie device
//!
//! The rumqttc event loop runs on its own task for the lifetime of the
//! process. On every ConnAck, the first one and every automatic reconnect,
//! the full announcement is queued and all subscriptions are renewed before
//! the next incoming packet is looked at.

use super::{
    AnnouncementEntry, DeviceState, MessageHandler, TelemetrySink, device_announcement,
    state_topic, topic_matches,
};
use crate::config::MqttConfig;
use crate::error::{BridgeError, Result};
use crate::logging::{StructuredLogger, get_logger};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, LastWill, MqttOptions,
    Outgoing, Packet, QoS,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Capacity of the request queue between callers and the event loop
const REQUEST_CAPACITY: usize = 64;

/// Pause before the event loop retries a failed connection
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How long `disconnect` waits for the event loop to flush and stop
pub const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// What the event loop does after one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopControl {
    Continue,
    /// Wait out the reconnect delay, then poll again
    Retry,
    Stop,
}

/// A registered subscription
#[derive(Clone)]
struct Subscription {
    filter: String,
    handler: MessageHandler,
}

/// Non-blocking request queueing; implemented by the rumqttc client.
pub(crate) trait SessionRequests: Send + Sync {
    fn enqueue_publish(&self, topic: String, qos: QoS, retain: bool, payload: Vec<u8>)
    -> Result<()>;
    fn enqueue_subscribe(&self, filter: String, qos: QoS) -> Result<()>;
}

impl SessionRequests for AsyncClient {
    fn enqueue_publish(
        &self,
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.try_publish(topic, qos, retain, payload)?;
        Ok(())
    }

    fn enqueue_subscribe(&self, filter: String, qos: QoS) -> Result<()> {
        self.try_subscribe(filter, qos)?;
        Ok(())
    }
}

/// State shared between the publisher handle and its event loop task
pub(crate) struct Session {
    connected: AtomicBool,
    closing: AtomicBool,
    subscriptions: Mutex<Vec<Subscription>>,
    announcement: Vec<AnnouncementEntry>,
    logger: StructuredLogger,
}

impl Session {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
            announcement: device_announcement(),
            logger: get_logger("homie"),
        }
    }

    fn subscriptions(&self) -> Vec<Subscription> {
        match self.subscriptions.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn add_subscription(&self, subscription: Subscription) {
        match self.subscriptions.lock() {
            Ok(mut guard) => guard.push(subscription),
            Err(poisoned) => poisoned.into_inner().push(subscription),
        }
    }

    /// Announce the device and renew subscriptions after a ConnAck.
    ///
    /// The session only counts as connected once everything is queued, so
    /// telemetry from the poll loop cannot overtake the announcement.
    pub(crate) fn on_connected(&self, requests: &dyn SessionRequests) {
        self.logger
            .info("Connected to MQTT broker, announcing device");

        let mut failed = 0usize;
        for entry in &self.announcement {
            if let Err(e) = requests.enqueue_publish(
                entry.topic(),
                QoS::AtLeastOnce,
                true,
                entry.value.clone().into_bytes(),
            ) {
                failed += 1;
                self.logger
                    .warn(&format!("Announcing {} failed: {}", entry.topic(), e));
            }
        }
        if failed == 0 {
            self.logger.debug(&format!(
                "Queued {} announcement messages",
                self.announcement.len()
            ));
        }

        for subscription in self.subscriptions() {
            match requests.enqueue_subscribe(subscription.filter.clone(), QoS::AtLeastOnce) {
                Ok(()) => self
                    .logger
                    .debug(&format!("Subscribed to {}", subscription.filter)),
                Err(e) => self.logger.warn(&format!(
                    "Subscribing to {} failed: {}",
                    subscription.filter, e
                )),
            }
        }

        self.connected.store(true, Ordering::SeqCst);
    }

    /// Handle one event from the rumqttc event loop
    pub(crate) fn on_event(&self, event: &Event, requests: &dyn SessionRequests) -> LoopControl {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    self.on_connected(requests);
                } else {
                    self.logger
                        .warn(&format!("MQTT broker refused connection: {:?}", ack.code));
                }
                LoopControl::Continue
            }
            Event::Incoming(Packet::Publish(message)) => {
                self.on_message(&message.topic, &message.payload);
                LoopControl::Continue
            }
            Event::Incoming(Packet::Disconnect) => {
                self.on_connection_lost();
                self.logger.warn("MQTT broker closed the session");
                LoopControl::Continue
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                self.on_connection_lost();
                LoopControl::Stop
            }
            _ => LoopControl::Continue,
        }
    }

    /// Handle a failed poll; the next poll reconnects unless we are closing
    pub(crate) fn on_poll_error(&self, error: &ConnectionError) -> LoopControl {
        self.on_connection_lost();
        if self.closing.load(Ordering::SeqCst) {
            return LoopControl::Stop;
        }
        self.logger.warn(&format!(
            "MQTT connection error: {}; retrying in {}s",
            error, RECONNECT_DELAY.as_secs()
        ));
        LoopControl::Retry
    }

    /// Dispatch an inbound message to every matching handler
    pub(crate) fn on_message(&self, topic: &str, payload: &[u8]) -> usize {
        let mut delivered = 0;
        for subscription in self.subscriptions() {
            if topic_matches(&subscription.filter, topic) {
                (subscription.handler)(topic, payload);
                delivered += 1;
            }
        }
        if delivered == 0 {
            self.logger.trace(&format!("Ignoring message on {}", topic));
        }
        delivered
    }

    fn on_connection_lost(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Homie device publisher backed by a rumqttc session
pub struct HomiePublisher {
    client: Option<AsyncClient>,
    event_loop: Option<JoinHandle<()>>,
    session: Arc<Session>,
}

impl Default for HomiePublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl HomiePublisher {
    /// Create a publisher without a broker session
    pub fn new() -> Self {
        Self {
            client: None,
            event_loop: None,
            session: Arc::new(Session::new()),
        }
    }

    /// Start the MQTT session in the background.
    ///
    /// Returns as soon as the event loop task is running; the broker
    /// connection itself is established (and re-established) by that task.
    pub fn connect(&mut self, config: &MqttConfig) -> Result<()> {
        if self.client.is_some() {
            return Err(BridgeError::mqtt("MQTT session already started"));
        }

        let client_id = config.effective_client_id();
        let mut options = MqttOptions::new(client_id.as_str(), config.host.as_str(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keepalive_seconds));
        options.set_clean_session(true);
        options.set_last_will(LastWill::new(
            state_topic(),
            DeviceState::Lost.as_str(),
            QoS::AtLeastOnce,
            true,
        ));
        if let Some((username, password)) = config.credentials() {
            options.set_credentials(username, password);
        }

        self.session.logger.info(&format!(
            "Connecting to MQTT broker {}:{} as {}",
            config.host, config.port, client_id
        ));

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let handle = tokio::spawn(run_event_loop(
            event_loop,
            client.clone(),
            Arc::clone(&self.session),
        ));
        self.client = Some(client);
        self.event_loop = Some(handle);
        Ok(())
    }

    /// Register a handler for messages matching `filter`.
    ///
    /// The subscription is renewed on every reconnect; when a session is
    /// already up it is also requested right away.
    pub fn subscribe(&mut self, filter: &str, handler: MessageHandler) -> Result<()> {
        self.session.add_subscription(Subscription {
            filter: filter.to_string(),
            handler,
        });
        if let Some(client) = &self.client
            && self.is_connected()
        {
            client.enqueue_subscribe(filter.to_string(), QoS::AtLeastOnce)?;
        }
        Ok(())
    }

    /// Whether the broker session is currently up
    pub fn is_connected(&self) -> bool {
        self.session.connected.load(Ordering::SeqCst)
    }

    fn client(&self) -> Result<&AsyncClient> {
        self.client
            .as_ref()
            .ok_or_else(|| BridgeError::mqtt("MQTT session not started"))
    }
}

#[async_trait::async_trait]
impl TelemetrySink for HomiePublisher {
    async fn publish(
        &mut self,
        topic: &str,
        payload: String,
        qos: QoS,
        retain: bool,
    ) -> Result<()> {
        let client = self.client()?;
        if !self.is_connected() {
            return Err(BridgeError::mqtt(format!(
                "Not connected, dropping message for {}",
                topic
            )));
        }
        client.enqueue_publish(topic.to_string(), qos, retain, payload.into_bytes())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.session.closing.store(true, Ordering::SeqCst);

        let result = match self.client.take() {
            Some(client) => client.try_disconnect().map_err(BridgeError::from),
            None => Ok(()),
        };

        if let Some(mut handle) = self.event_loop.take() {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut handle)
                .await
                .is_err()
            {
                self.session
                    .logger
                    .debug("MQTT event loop did not stop in time, aborting it");
                handle.abort();
            }
        }

        self.session.on_connection_lost();
        self.session.logger.info("MQTT session closed");
        result
    }
}

async fn run_event_loop(mut event_loop: EventLoop, client: AsyncClient, session: Arc<Session>) {
    loop {
        let control = match event_loop.poll().await {
            Ok(event) => session.on_event(&event, &client),
            Err(e) => session.on_poll_error(&e),
        };
        match control {
            LoopControl::Continue => {}
            LoopControl::Retry => tokio::time::sleep(RECONNECT_DELAY).await,
            LoopControl::Stop => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, Publish};

    #[derive(Debug, Clone, PartialEq)]
    enum Request {
        Publish(String, String, bool),
        Subscribe(String),
    }

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<Request>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<Request> {
            std::mem::take(&mut *self.requests.lock().unwrap())
        }
    }

    impl SessionRequests for Recorder {
        fn enqueue_publish(
            &self,
            topic: String,
            _qos: QoS,
            retain: bool,
            payload: Vec<u8>,
        ) -> Result<()> {
            self.requests.lock().unwrap().push(Request::Publish(
                topic,
                String::from_utf8(payload).unwrap(),
                retain,
            ));
            Ok(())
        }

        fn enqueue_subscribe(&self, filter: String, _qos: QoS) -> Result<()> {
            self.requests
                .lock()
                .unwrap()
                .push(Request::Subscribe(filter));
            Ok(())
        }
    }

    fn set_topic() -> String {
        super::super::Property::MaxCurrent.set_topic().unwrap()
    }

    /// Records whether the session already counted as connected per request
    struct ConnectedWatcher {
        session: Arc<Session>,
        seen: Mutex<Vec<bool>>,
    }

    impl ConnectedWatcher {
        fn record(&self) {
            let connected = self.session.connected.load(Ordering::SeqCst);
            self.seen.lock().unwrap().push(connected);
        }
    }

    impl SessionRequests for ConnectedWatcher {
        fn enqueue_publish(&self, _: String, _: QoS, _: bool, _: Vec<u8>) -> Result<()> {
            self.record();
            Ok(())
        }

        fn enqueue_subscribe(&self, _: String, _: QoS) -> Result<()> {
            self.record();
            Ok(())
        }
    }

    fn session_with_setpoint_subscription() -> Session {
        let session = Session::new();
        let handler: MessageHandler = Arc::new(|_, _| {});
        session.add_subscription(Subscription {
            filter: set_topic(),
            handler,
        });
        session
    }

    fn connack(code: ConnectReturnCode) -> Event {
        Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code,
        }))
    }

    #[test]
    fn connack_announces_then_subscribes_every_time() {
        let session = session_with_setpoint_subscription();
        let recorder = Recorder::default();

        for _ in 0..2 {
            let control = session.on_event(&connack(ConnectReturnCode::Success), &recorder);
            assert_eq!(control, LoopControl::Continue);
            let requests = recorder.take();
            let announced = device_announcement().len();
            assert_eq!(requests.len(), announced + 1);
            for request in &requests[..announced] {
                assert!(matches!(request, Request::Publish(_, _, true)));
            }
            assert_eq!(requests[announced], Request::Subscribe(set_topic()));
            assert!(session.connected.load(Ordering::SeqCst));
            session.on_connection_lost();
        }
    }

    #[test]
    fn refused_connack_announces_nothing() {
        let session = session_with_setpoint_subscription();
        let recorder = Recorder::default();

        let control = session.on_event(&connack(ConnectReturnCode::NotAuthorized), &recorder);

        assert_eq!(control, LoopControl::Continue);
        assert!(recorder.take().is_empty());
        assert!(!session.connected.load(Ordering::SeqCst));
    }

    #[test]
    fn session_counts_as_connected_only_after_announcement_is_queued() {
        let session = Arc::new(session_with_setpoint_subscription());
        let watcher = ConnectedWatcher {
            session: Arc::clone(&session),
            seen: Mutex::new(Vec::new()),
        };

        session.on_connected(&watcher);

        let seen = watcher.seen.lock().unwrap();
        assert_eq!(seen.len(), device_announcement().len() + 1);
        assert!(seen.iter().all(|connected| !connected));
        assert!(session.connected.load(Ordering::SeqCst));
    }

    #[test]
    fn poll_error_marks_disconnected_and_retries() {
        let session = session_with_setpoint_subscription();
        session.on_connected(&Recorder::default());
        let error = ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));

        assert_eq!(session.on_poll_error(&error), LoopControl::Retry);
        assert!(!session.connected.load(Ordering::SeqCst));

        session.closing.store(true, Ordering::SeqCst);
        assert_eq!(session.on_poll_error(&error), LoopControl::Stop);
    }

    #[test]
    fn outgoing_disconnect_stops_the_loop() {
        let session = session_with_setpoint_subscription();
        let recorder = Recorder::default();
        session.on_connected(&recorder);
        recorder.take();

        let control = session.on_event(&Event::Outgoing(Outgoing::Disconnect), &recorder);

        assert_eq!(control, LoopControl::Stop);
        assert!(!session.connected.load(Ordering::SeqCst));
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn inbound_publish_reaches_handler_through_event() {
        let session = Session::new();
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let handler: MessageHandler = Arc::new(move |_, _| {
            *counter.lock().unwrap() += 1;
        });
        session.add_subscription(Subscription {
            filter: set_topic(),
            handler,
        });

        let event = Event::Incoming(Packet::Publish(Publish::new(
            set_topic(),
            QoS::AtLeastOnce,
            "16",
        )));
        assert_eq!(
            session.on_event(&event, &Recorder::default()),
            LoopControl::Continue
        );
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn messages_reach_matching_handlers_only() {
        let session = Session::new();
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&seen);
        let handler: MessageHandler = Arc::new(move |_, payload| {
            sink.lock()
                .unwrap()
                .push(String::from_utf8_lossy(payload).to_string());
        });
        session.add_subscription(Subscription {
            filter: set_topic(),
            handler,
        });

        assert_eq!(session.on_message(&set_topic(), b"16"), 1);
        assert_eq!(
            session.on_message("homie/Heidelberg-Wallbox/wallbox/max_current", b"99"),
            0
        );
        assert_eq!(*seen.lock().unwrap(), vec!["16".to_string()]);
    }

    #[tokio::test]
    async fn publish_without_session_is_an_error() {
        let mut publisher = HomiePublisher::new();
        let err = publisher
            .publish("homie/x", "1".to_string(), QoS::AtMostOnce, false)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Mqtt { .. }));
        assert!(publisher.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn publish_while_disconnected_is_an_error() {
        let mut publisher = HomiePublisher::new();
        let config = MqttConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };
        publisher.connect(&config).unwrap();
        assert!(publisher.connect(&config).is_err());
        let err = publisher
            .publish("homie/x", "1".to_string(), QoS::AtMostOnce, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Not connected"));
        publisher.disconnect().await.unwrap();
        assert!(!publisher.is_connected());
    }
}
