/// MQTT transport
///
/// Connects the hotword service to a Hermes broker. The rumqttc event loop is
/// polled on its own task and hands incoming publishes to the service loop
/// over a channel. Outbound requests never wait on the event loop, so a
/// burst of events cannot stall the connection.

use crate::config::MqttConfig;
use crate::messages::OutboundMessage;
use crate::service::{HotwordService, Publisher, TransportError};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeFilter,
};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Delay before polling again after a connection error
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long shutdown waits for the DISCONNECT packet to go out
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Request queue depth between the client handle and the event loop
pub const CHANNEL_CAPACITY: usize = 128;

/// What the event loop task forwards to the service loop
#[derive(Debug)]
enum Inbound {
    Connected,
    Message { topic: String, payload: Vec<u8> },
}

/// Publishes outbound messages through an MQTT client handle
///
/// Messages are queued without waiting; a full request queue is reported as
/// a publish error and the message is dropped.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError> {
        self.client
            .try_publish(&message.topic, QoS::AtMostOnce, false, message.payload)
            .map_err(|e| TransportError::Publish {
                topic: message.topic.clone(),
                message: e.to_string(),
            })
    }
}

/// MQTT connection driving the hotword service
pub struct MqttTransport {
    config: MqttConfig,
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttTransport {
    pub fn new(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(KEEP_ALIVE);

        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, CHANNEL_CAPACITY);

        Self {
            config: config.clone(),
            client,
            eventloop,
        }
    }

    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }

    /// Run until `shutdown` resolves
    ///
    /// Connection errors are logged and the event loop reconnects on the
    /// next poll. Topics are subscribed again after every reconnect.
    pub async fn run<S>(self, service: &HotwordService, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        let publisher = self.publisher();
        let Self {
            config,
            client,
            eventloop,
        } = self;

        debug!("Connecting to {}:{}", config.host, config.port);

        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut poller = tokio::spawn(poll_events(eventloop, tx));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
                inbound = rx.recv() => match inbound {
                    Some(Inbound::Connected) => {
                        info!("Connected to {}:{}", config.host, config.port);
                        if let Err(e) = subscribe(&client, service.subscriptions()) {
                            error!("on_connect: {}", e);
                        }
                    }
                    Some(Inbound::Message { topic, payload }) => {
                        service.dispatch(&publisher, &topic, &payload).await;
                    }
                    None => {
                        error!("MQTT event loop stopped");
                        break;
                    }
                },
            }
        }

        drop(rx);
        disconnect(&client, &mut poller).await;
    }
}

/// Queue one SUBSCRIBE for every topic
fn subscribe(client: &AsyncClient, topics: Vec<String>) -> Result<(), TransportError> {
    let joined = topics.join(", ");
    let filters = topics
        .into_iter()
        .map(|topic| SubscribeFilter::new(topic, QoS::AtMostOnce));

    client
        .try_subscribe_many(filters)
        .map_err(|e| TransportError::Subscribe {
            topic: joined.clone(),
            message: e.to_string(),
        })?;

    debug!("Subscribed to {}", joined);
    Ok(())
}

/// Send DISCONNECT and give the event loop a moment to flush it
async fn disconnect(client: &AsyncClient, poller: &mut JoinHandle<()>) {
    if let Err(e) = client.try_disconnect() {
        debug!("Disconnect failed: {}", e);
    }

    if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut *poller).await.is_err() {
        debug!("Event loop did not finish disconnecting");
        poller.abort();
    }
}

/// Drive the rumqttc event loop until the DISCONNECT packet is written
async fn poll_events(mut eventloop: EventLoop, tx: mpsc::Sender<Inbound>) {
    loop {
        let inbound = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => Inbound::Connected,
            Ok(Event::Incoming(Packet::Publish(publish))) => Inbound::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            },
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("Disconnected from broker");
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("Disconnected ({}). Trying to reconnect...", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        // Receiver gone means shutdown; keep polling so DISCONNECT goes out
        if tx.send(inbound).await.is_err() {
            debug!("Service loop closed, dropping inbound message");
        }
    }
}
