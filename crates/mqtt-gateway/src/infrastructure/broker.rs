//! The MQTT side of the gateway: one broker connection on its own thread.
//!
//! # Why a dedicated thread?
//!
//! The HTTP server runs on a single-threaded cooperative event loop.  Broker
//! traffic arrives whenever the broker decides to send it, and the MQTT
//! keep-alive has to be serviced even while every HTTP handler is busy.  So
//! the broker client gets its own OS thread (`mqtt-bridge`) with its own
//! small current-thread Tokio runtime, and the two loops only talk through
//! thread-safe channels:
//!
//! ```text
//!  request loop                         mqtt-bridge thread
//!  ────────────                         ──────────────────
//!  MqttPublisher::submit ──try_publish──► rumqttc EventLoop::poll
//!       ▲                                     │
//!       └──── PendingConfirmations ◄──────────┤ Outgoing::Publish
//!                                             │
//!  run_broadcast_dispatcher ◄─BroadcastQueue──┤ Incoming::Publish
//!  LinkState watchers       ◄──watch──────────┘ ConnAck / SubAck / errors
//! ```
//!
//! # Link state and reconnection
//!
//! `Connecting → Connected` on CONNACK (the subscription is requested right
//! away), `Connected → Subscribed` on SUBACK, and any connection error goes to
//! `Disconnected`.  After an error the thread waits with exponential backoff
//! and polls again, which makes rumqttc reconnect; every new CONNACK
//! re-subscribes, so the link re-enters `Subscribed`.
//!
//! # Publish confirmation
//!
//! rumqttc emits `Outgoing::Publish` when it writes a PUBLISH to the socket.
//! Requests are processed in order, so each such event confirms the oldest
//! waiting publish.  When the link drops, every waiting publish fails with
//! [`PublishError::ConnectionLost`] and is removed from rumqttc's replay
//! queue, so a publish reported as failed is never sent afterwards.  New
//! publishes are refused with [`PublishError::NotConnected`] until the next
//! CONNACK.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use gateway_core::PublishError;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Request,
    SubscribeReasonCode,
};
use thiserror::Error;
use tokio::sync::{oneshot, watch, Notify};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::application::{BrokerPublisher, InboundBridge, PublishConfirmation};
use crate::domain::{BrokerConfig, GatewayConfig, LinkState};

/// Capacity of rumqttc's request queue (publishes, subscribes, disconnect).
const REQUEST_CAPACITY: usize = 64;

/// The first connection to the broker did not come up.
///
/// Logged at startup; the gateway keeps serving cached data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerConnectError {
    #[error("broker did not become ready within {0:?}")]
    Timeout(Duration),

    #[error("connection to broker at {0} failed")]
    Refused(String),

    #[error("broker thread stopped before connecting")]
    Closed,
}

// ── Pending publish confirmations ─────────────────────────────────────────────

type Confirmer = oneshot::Sender<Result<(), PublishError>>;

#[derive(Debug)]
struct Waiters {
    queue: VecDeque<Confirmer>,
    /// Set while the link is down; no publish may be queued.
    closed: bool,
}

/// FIFO of publishes waiting for their `Outgoing::Publish` event.
///
/// Starts closed.  The broker thread opens it on CONNACK and closes it when
/// the connection drops or the bridge stops.
#[derive(Debug, Clone)]
pub struct PendingConfirmations {
    waiters: Arc<Mutex<Waiters>>,
}

impl Default for PendingConfirmations {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingConfirmations {
    pub fn new() -> Self {
        Self {
            waiters: Arc::new(Mutex::new(Waiters {
                queue: VecDeque::new(),
                closed: true,
            })),
        }
    }

    /// Runs `send` and, if it succeeds, registers a confirmation for it.
    ///
    /// The lock is held across `send`, so the order of confirmations always
    /// matches the order requests reached the broker client, and nothing can
    /// be queued between [`close`](Self::close) and the next
    /// [`open`](Self::open).
    ///
    /// # Errors
    ///
    /// [`PublishError::NotConnected`] while closed (`send` is not called),
    /// otherwise whatever `send` returns.
    pub fn enqueue<F>(&self, send: F) -> Result<PublishConfirmation, PublishError>
    where
        F: FnOnce() -> Result<(), PublishError>,
    {
        let mut waiters = self.lock();
        if waiters.closed {
            return Err(PublishError::NotConnected);
        }
        send()?;
        let (tx, rx) = oneshot::channel();
        waiters.queue.push_back(tx);
        Ok(rx)
    }

    /// Accepts publishes again.
    pub fn open(&self) {
        self.lock().closed = false;
    }

    /// Confirms the oldest waiting publish.  Returns `false` if none waited.
    pub fn confirm_next(&self) -> bool {
        let next = self.lock().queue.pop_front();
        match next {
            Some(tx) => {
                // The caller may have timed out already.
                let _ = tx.send(Ok(()));
                true
            }
            None => false,
        }
    }

    /// Stops accepting publishes and fails every waiting one with `err`.
    /// Returns how many were waiting.
    pub fn close(&self, err: &PublishError) -> usize {
        let drained: Vec<Confirmer> = {
            let mut waiters = self.lock();
            waiters.closed = true;
            waiters.queue.drain(..).collect()
        };
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(err.clone()));
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Publisher handle (request loop side) ──────────────────────────────────────

/// [`BrokerPublisher`] backed by the rumqttc client.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    link: watch::Receiver<LinkState>,
    pending: PendingConfirmations,
}

impl BrokerPublisher for MqttPublisher {
    fn submit(&self, topic: &str, payload: Vec<u8>) -> Result<PublishConfirmation, PublishError> {
        // The confirmation queue is open exactly while the link is up.
        self.pending.enqueue(|| {
            self.client
                .try_publish(topic, QoS::AtMostOnce, false, payload)
                .map_err(|e| PublishError::Rejected(e.to_string()))
        })
    }

    fn link_state(&self) -> LinkState {
        *self.link.borrow()
    }
}

// ── Event driver (broker thread side) ─────────────────────────────────────────

/// Owns everything the broker thread mutates and reacts to rumqttc events.
pub struct EventDriver {
    client: AsyncClient,
    inbound: InboundBridge,
    link: watch::Sender<LinkState>,
    pending: PendingConfirmations,
    topic: String,
    broker_addr: String,
    reconnect_delay: Duration,
    max_reconnect_delay: Duration,
    backoff: Duration,
}

impl EventDriver {
    pub fn new(
        client: AsyncClient,
        inbound: InboundBridge,
        link: watch::Sender<LinkState>,
        pending: PendingConfirmations,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            client,
            inbound,
            link,
            pending,
            topic: config.broker.topic.clone(),
            broker_addr: broker_addr(&config.broker),
            reconnect_delay: config.reconnect_delay,
            max_reconnect_delay: config.max_reconnect_delay,
            backoff: config.reconnect_delay,
        }
    }

    /// Reacts to one event from `EventLoop::poll`.
    ///
    /// Returns `Break` once our own DISCONNECT has been sent.
    pub fn handle_event(&mut self, event: Event) -> ControlFlow<()> {
        match event {
            // rumqttc reports a refused CONNACK as a connection error, so
            // every CONNACK seen here is a success.
            Event::Incoming(Packet::ConnAck(_)) => {
                info!("connected to broker at {}", self.broker_addr);
                self.backoff = self.reconnect_delay;
                self.pending.open();
                self.set_link(LinkState::Connected);
                if let Err(e) = self.client.try_subscribe(self.topic.clone(), QoS::AtMostOnce) {
                    error!("could not request subscription to {}: {e}", self.topic);
                }
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                let refused = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                if refused {
                    error!("broker refused the subscription to {}", self.topic);
                } else {
                    info!("subscribed to {}", self.topic);
                    self.set_link(LinkState::Subscribed);
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                self.inbound.on_message(&publish.topic, &publish.payload);
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("broker at {} sent DISCONNECT", self.broker_addr);
            }
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                if !self.pending.confirm_next() {
                    trace!("outgoing publish {pkid} had no waiting caller");
                }
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                info!("DISCONNECT sent to broker at {}", self.broker_addr);
                return ControlFlow::Break(());
            }
            other => trace!("broker event: {other:?}"),
        }
        ControlFlow::Continue(())
    }

    /// Records a lost or failed connection and returns how long to wait
    /// before polling (and so reconnecting) again.
    pub fn handle_connection_error(&mut self, err: &ConnectionError) -> Duration {
        let was = *self.link.borrow();
        self.set_link(LinkState::Disconnected);

        let failed = self.pending.close(&PublishError::ConnectionLost);
        if failed > 0 {
            warn!("{failed} publish(es) failed: connection lost");
        }

        let delay = self.backoff;
        self.backoff = (self.backoff * 2).min(self.max_reconnect_delay);
        match was {
            LinkState::Connecting | LinkState::Disconnected => {
                error!("cannot reach broker at {}: {err}; retrying in {delay:?}", self.broker_addr)
            }
            LinkState::Connected | LinkState::Subscribed => {
                warn!("lost broker at {}: {err}; reconnecting in {delay:?}", self.broker_addr)
            }
        }
        delay
    }

    /// Builds a current-thread runtime and drives the event loop on it until
    /// shutdown.  Meant to be the body of the broker thread.
    fn run_on_own_runtime(self, eventloop: EventLoop, running: Arc<AtomicBool>, shutdown: Arc<Notify>) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("cannot build the broker thread runtime: {e}");
                self.pending.close(&PublishError::ShuttingDown);
                self.set_link(LinkState::Disconnected);
                return;
            }
        };
        runtime.block_on(self.run(eventloop, running, shutdown));
    }

    async fn run(mut self, mut eventloop: EventLoop, running: Arc<AtomicBool>, shutdown: Arc<Notify>) {
        loop {
            let polled = tokio::select! {
                polled = eventloop.poll() => polled,
                _ = shutdown.notified() => break,
            };

            match polled {
                Ok(event) => {
                    if self.handle_event(event).is_break() {
                        break;
                    }
                }
                Err(e) => {
                    if !running.load(Ordering::Relaxed) {
                        debug!("broker event loop ended during shutdown: {e}");
                        break;
                    }
                    let delay = self.recover_from_error(&mut eventloop, &e);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.notified() => break,
                    }
                    self.set_link(LinkState::Connecting);
                }
            }
        }

        self.pending.close(&PublishError::ShuttingDown);
        self.set_link(LinkState::Disconnected);
        info!("broker event loop stopped");
    }

    /// Handles a failed `poll`: records the error, then removes every
    /// publish rumqttc would replay after the next CONNACK.  Those publishes
    /// were just reported to their callers as failed, so they must not be
    /// sent later, and their write events must not confirm newer publishes.
    ///
    /// Returns the delay before polling again.
    pub fn recover_from_error(&mut self, eventloop: &mut EventLoop, err: &ConnectionError) -> Duration {
        let delay = self.handle_connection_error(err);
        // `poll` already cleaned once, but a publish may have entered the
        // request channel before the confirmation queue closed.
        eventloop.clean();
        let before = eventloop.pending.len();
        // SUBSCRIBE is re-sent on every CONNACK, so queued ones go too.
        eventloop
            .pending
            .retain(|request| !matches!(request, Request::Publish(_) | Request::Subscribe(_)));
        let discarded = before - eventloop.pending.len();
        if discarded > 0 {
            debug!("discarded {discarded} unsent request(s) after connection loss");
        }
        delay
    }

    fn set_link(&self, next: LinkState) {
        self.link.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!("broker link {current} -> {next}");
            *current = next;
            true
        });
    }
}

// ── Worker (owned by main) ────────────────────────────────────────────────────

/// Owns the broker thread for the lifetime of the gateway.
pub struct BridgeWorker {
    client: AsyncClient,
    link: watch::Receiver<LinkState>,
    pending: PendingConfirmations,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    stopped: Option<oneshot::Receiver<()>>,
    thread: Option<JoinHandle<()>>,
    broker_addr: String,
}

impl BridgeWorker {
    /// Starts the broker thread; the connection attempt begins immediately.
    ///
    /// # Errors
    ///
    /// Returns an error only if the OS refuses to spawn the thread.  Broker
    /// connection failures are reported through the link state instead.
    pub fn start(config: &GatewayConfig, inbound: InboundBridge) -> std::io::Result<Self> {
        let broker_addr = broker_addr(&config.broker);
        let (client, eventloop) = AsyncClient::new(mqtt_options(&config.broker), REQUEST_CAPACITY);
        let (link_tx, link_rx) = watch::channel(LinkState::Connecting);
        let pending = PendingConfirmations::new();
        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());
        let (stopped_tx, stopped_rx) = oneshot::channel();

        let driver = EventDriver::new(client.clone(), inbound, link_tx, pending.clone(), config);
        let thread = {
            let running = Arc::clone(&running);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("mqtt-bridge".to_string())
                .spawn(move || {
                    driver.run_on_own_runtime(eventloop, running, shutdown);
                    let _ = stopped_tx.send(());
                })?
        };

        info!(
            "broker thread started for {broker_addr} (topic {})",
            config.broker.topic
        );

        Ok(Self {
            client,
            link: link_rx,
            pending,
            running,
            shutdown,
            stopped: Some(stopped_rx),
            thread: Some(thread),
            broker_addr,
        })
    }

    /// A publish handle for the facade.
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
            link: self.link.clone(),
            pending: self.pending.clone(),
        }
    }

    pub fn link_state(&self) -> LinkState {
        *self.link.borrow()
    }

    /// Waits until the link is subscribed, or the first attempt has failed.
    ///
    /// # Errors
    ///
    /// [`BrokerConnectError`] if the broker is unreachable, the wait exceeds
    /// `limit`, or the broker thread is gone.
    pub async fn wait_until_ready(&self, limit: Duration) -> Result<LinkState, BrokerConnectError> {
        let mut link = self.link.clone();
        let resolved = timeout(
            limit,
            link.wait_for(|state| matches!(state, LinkState::Subscribed | LinkState::Disconnected)),
        )
        .await;

        match resolved {
            Err(_) => Err(BrokerConnectError::Timeout(limit)),
            Ok(Err(_)) => Err(BrokerConnectError::Closed),
            Ok(Ok(state)) => match *state {
                LinkState::Disconnected => Err(BrokerConnectError::Refused(self.broker_addr.clone())),
                ready => Ok(ready),
            },
        }
    }

    /// Disconnects from the broker and stops the broker thread.
    ///
    /// Sends a DISCONNECT when the link is up and gives the thread `grace`
    /// to flush it; otherwise (or if that takes too long) the thread is
    /// interrupted.  Waiting publishes fail with
    /// [`PublishError::ShuttingDown`].
    pub async fn shutdown(mut self, grace: Duration) {
        self.running.store(false, Ordering::Relaxed);

        let graceful = self.link_state().can_publish() && self.client.try_disconnect().is_ok();
        if !graceful {
            self.shutdown.notify_one();
        }

        let Some(mut stopped) = self.stopped.take() else {
            return;
        };
        if timeout(grace, &mut stopped).await.is_err() {
            warn!("broker thread did not stop within {grace:?}; interrupting");
            self.shutdown.notify_one();
            if timeout(grace, &mut stopped).await.is_err() {
                warn!("broker thread still busy; detaching it");
                return;
            }
        }

        if let Some(thread) = self.thread.take() {
            // Already signalled completion, so this join does not wait.
            if thread.join().is_err() {
                error!("broker thread panicked");
            }
        }
        info!("broker bridge shut down");
    }
}

fn broker_addr(broker: &BrokerConfig) -> String {
    format!("{}:{}", broker.host, broker.port)
}

fn mqtt_options(broker: &BrokerConfig) -> MqttOptions {
    let mut options = MqttOptions::new(broker.client_id.clone(), broker.host.clone(), broker.port);
    options
        .set_keep_alive(broker.keep_alive)
        .set_clean_session(true);
    options
}

// ── Tests ─────────────────────────────────────────────────────────────────────
