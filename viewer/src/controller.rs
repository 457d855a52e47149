use pixfeed_common::config::MqttConfig;
use pixfeed_common::decoder::{DecodeError, MessageDecoder};
use pixfeed_common::feed::{FeedError, FeedState, SnapshotHandle};
use pixfeed_common::mqtt;
use rumqttc::mqttbytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Packet, Publish, QoS,
    StateError, SubscribeReasonCode,
};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Messages kept between CONNACK and SUBACK when no channel capacity is known.
const DEFAULT_HELD_LIMIT: usize = 10;

/// Lifecycle of the broker subscription. `Subscribed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Disconnected,
    Connecting,
    /// CONNACK received, waiting for SUBACK.
    Subscribing,
    Subscribed,
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("connection to broker failed: {0}")]
    ConnectionFailure(String),
    #[error("subscription failed: {0}")]
    SubscriptionFailure(String),
    #[error("failed to decode payload: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// Outcome of handling one event loop event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// Connection accepted; the subscribe request may now be sent.
    Subscribe,
    /// Subscription acknowledged; messages now reach the feed.
    Subscribed,
    Updated(SnapshotHandle),
    /// Message arrived before SUBACK and is queued.
    Held,
    /// Message could not be decoded and was dropped.
    Skipped,
    /// The client reconnected with a clean session; the topic filter must be
    /// subscribed again.
    Resubscribe,
}

/// Live client handle plus the event loop that drives it.
pub struct MqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
}

impl MqttSession {
    async fn subscribe(&mut self) -> Result<(), ControllerError> {
        self.client
            .subscribe(&self.topic, QoS::AtMostOnce)
            .await
            .map_err(|e| ControllerError::SubscriptionFailure(e.to_string()))
    }
}

pub struct SubscriptionController {
    state: ControllerState,
    decoder: MessageDecoder,
    feed: FeedState,
    held: VecDeque<Publish>,
    held_limit: usize,
    received: u64,
    skipped: u64,
}

impl SubscriptionController {
    pub fn new(decoder: MessageDecoder, feed: FeedState) -> Self {
        Self {
            state: ControllerState::Disconnected,
            decoder,
            feed,
            held: VecDeque::new(),
            held_limit: DEFAULT_HELD_LIMIT,
            received: 0,
            skipped: 0,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn feed(&self) -> &FeedState {
        &self.feed
    }

    /// Connect to the broker, then subscribe to the configured topic filter.
    /// Returns once both the CONNACK and the SUBACK have been received.
    pub async fn connect_and_subscribe(
        &mut self,
        config: &MqttConfig,
    ) -> Result<MqttSession, ControllerError> {
        let client_id = mqtt::client_id(config, "viewer");
        let options = mqtt::mqtt_options(config, &client_id)
            .map_err(|e| ControllerError::ConnectionFailure(e.to_string()))?;
        let (client, eventloop) = AsyncClient::new(options, config.channel_capacity);
        let mut session = MqttSession {
            client,
            eventloop,
            topic: config.topic.clone(),
        };
        self.held_limit = config.channel_capacity.max(1);

        info!(broker = config.broker_uri, client_id, "connecting to broker");
        self.state = ControllerState::Connecting;
        self.drive(&mut session, Some(Step::Subscribe)).await?;
        info!(broker = config.broker_uri, "connected to broker");

        session.subscribe().await?;
        self.drive(&mut session, Some(Step::Subscribed)).await?;
        info!(topic = config.topic, "subscribed, waiting for images");

        Ok(session)
    }

    /// Drive the event loop until the connection fails.
    pub async fn run(&mut self, mut session: MqttSession) -> Result<(), ControllerError> {
        self.drive(&mut session, None).await
    }

    /// Poll until `handle_event` yields `target`, or forever when it is `None`.
    ///
    /// A message over `max_packet_size` makes rumqttc drop the connection; the
    /// next poll reconnects, so it is skipped like any undecodable message.
    async fn drive(
        &mut self,
        session: &mut MqttSession,
        target: Option<Step>,
    ) -> Result<(), ControllerError> {
        loop {
            let event = match session.eventloop.poll().await {
                Ok(event) => event,
                Err(e) if is_oversized(&e) => {
                    self.skipped += 1;
                    warn!(error = %e, skipped = self.skipped, "skipping oversized message");
                    continue;
                }
                Err(e) => return Err(connection_failure(e)),
            };
            let step = self.handle_event(event)?;
            if step == Step::Resubscribe {
                session.subscribe().await?;
            }
            if Some(step) == target {
                return Ok(());
            }
        }
    }

    pub fn handle_event(&mut self, event: Event) -> Result<Step, ControllerError> {
        let packet = match event {
            Event::Incoming(packet) => packet,
            Event::Outgoing(_) => return Ok(Step::Continue),
        };

        match packet {
            Packet::ConnAck(ack) => {
                if ack.code != ConnectReturnCode::Success {
                    return Err(ControllerError::ConnectionFailure(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )));
                }
                match self.state {
                    ControllerState::Disconnected | ControllerState::Connecting => {
                        self.state = ControllerState::Subscribing;
                        Ok(Step::Subscribe)
                    }
                    state => {
                        info!(?state, "session re-established, subscribing again");
                        Ok(Step::Resubscribe)
                    }
                }
            }
            Packet::SubAck(ack) => {
                if !matches!(
                    self.state,
                    ControllerState::Subscribing | ControllerState::Subscribed
                ) {
                    debug!(state = ?self.state, pkid = ack.pkid, "ignoring SUBACK");
                    return Ok(Step::Continue);
                }
                let granted = !ack.return_codes.is_empty()
                    && ack
                        .return_codes
                        .iter()
                        .all(|code| matches!(code, SubscribeReasonCode::Success(_)));
                if !granted {
                    return Err(ControllerError::SubscriptionFailure(format!(
                        "broker rejected subscription: {:?}",
                        ack.return_codes
                    )));
                }
                if self.state == ControllerState::Subscribed {
                    debug!(pkid = ack.pkid, "subscription restored");
                    return Ok(Step::Continue);
                }
                self.enter_subscribed();
                Ok(Step::Subscribed)
            }
            Packet::Publish(publish) => match self.state {
                ControllerState::Subscribed => Ok(self.dispatch(&publish)),
                ControllerState::Subscribing => {
                    if self.held.len() >= self.held_limit {
                        if let Some(oldest) = self.held.pop_front() {
                            debug!(
                                topic = oldest.topic,
                                limit = self.held_limit,
                                "dropping oldest held message"
                            );
                        }
                    }
                    debug!(topic = publish.topic, "holding message until SUBACK");
                    self.held.push_back(publish);
                    Ok(Step::Held)
                }
                state => {
                    debug!(?state, topic = publish.topic, "dropping message received before connect");
                    Ok(Step::Continue)
                }
            },
            Packet::Disconnect => Err(ControllerError::ConnectionFailure(
                "broker closed the session".into(),
            )),
            _ => Ok(Step::Continue),
        }
    }

    /// Decode one message and show it as the latest image.
    pub fn on_message(&mut self, topic: &str, payload: &[u8]) -> Result<SnapshotHandle, ControllerError> {
        let base64 = self.decoder.decode(payload)?;
        let handle = self.feed.update_latest(base64)?;
        self.received += 1;
        debug!(topic, bytes = payload.len(), received = self.received, "image updated");
        Ok(handle)
    }

    fn enter_subscribed(&mut self) {
        self.state = ControllerState::Subscribed;
        self.feed.create_snapshot();
        for publish in std::mem::take(&mut self.held) {
            self.dispatch(&publish);
        }
    }

    fn dispatch(&mut self, publish: &Publish) -> Step {
        match self.on_message(&publish.topic, &publish.payload) {
            Ok(handle) => Step::Updated(handle),
            Err(e) => {
                self.skipped += 1;
                warn!(
                    error = %e,
                    topic = publish.topic,
                    bytes = publish.payload.len(),
                    skipped = self.skipped,
                    "skipping message"
                );
                Step::Skipped
            }
        }
    }
}

fn is_oversized(e: &ConnectionError) -> bool {
    matches!(
        e,
        ConnectionError::MqttState(StateError::Deserialization(
            mqttbytes::Error::PayloadSizeLimitExceeded(_)
        ))
    )
}

fn connection_failure(e: ConnectionError) -> ControllerError {
    ControllerError::ConnectionFailure(e.to_string())
}
