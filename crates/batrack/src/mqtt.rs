//! MQTT plumbing shared by the VHF unit and the trigger publisher.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MqttConfig;
use crate::error::Result;

/// Requests buffered between a client and its event loop.
pub const REQUEST_CAPACITY: usize = 64;

/// Pause after a connection error before polling again.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Build client options for the configured broker.
#[must_use]
pub fn options(client_id: &str, config: &MqttConfig, clean_session: bool) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keepalive_s.max(5)));
    options.set_clean_session(clean_session);
    options
}

/// Request a disconnect and poll until it has been sent.
pub async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.try_disconnect() {
        debug!("MQTT disconnect request failed: {}", e);
        return;
    }
    let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    if flushed.is_err() {
        debug!("MQTT disconnect timed out");
    }
}

/// A client whose event loop runs in a background task.
///
/// Used for publishing only; incoming packets are ignored.
#[derive(Debug)]
pub struct Publisher {
    client: AsyncClient,
    task: JoinHandle<()>,
}

impl Publisher {
    /// Options of the publisher's session, which the broker keeps across
    /// reconnects.
    #[must_use]
    pub fn options(client_id: &str, config: &MqttConfig) -> MqttOptions {
        options(client_id, config, false)
    }

    /// Connect to the broker in the background.
    #[must_use]
    pub fn connect(client_id: &str, config: &MqttConfig) -> Self {
        let (client, mut eventloop) =
            AsyncClient::new(Self::options(client_id, config), REQUEST_CAPACITY);
        let broker = format!("{}:{}", config.host, config.port);

        let task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                        info!("Publisher connected to {}", broker);
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Publisher connection to {} failed: {}", broker, e);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        Self { client, task }
    }

    /// Queue a message for publishing without waiting for the broker.
    ///
    /// # Errors
    ///
    /// Returns an error if the request queue is full or closed, e.g. while
    /// the broker is unreachable.
    pub fn publish(&self, topic: &str, payload: String) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.into_bytes())?;
        Ok(())
    }

    /// Disconnect and wait briefly for the event loop to finish.
    pub async fn disconnect(self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT disconnect request failed: {}", e);
        }
        let mut task = self.task;
        if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut task).await.is_err() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options() {
        let config = MqttConfig {
            host: "broker.local".to_string(),
            port: 1884,
            keepalive_s: 30,
        };
        let options = options("station-batrack", &config, false);

        assert_eq!(options.client_id(), "station-batrack");
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(!options.clean_session());
    }

    #[test]
    fn test_publisher_keeps_session() {
        let options = Publisher::options("station-batrack", &MqttConfig::default());
        assert_eq!(options.client_id(), "station-batrack");
        assert!(!options.clean_session());
    }

    #[test]
    fn test_keepalive_floor() {
        let config = MqttConfig {
            keepalive_s: 0,
            ..MqttConfig::default()
        };
        assert_eq!(
            options("x", &config, true).keep_alive(),
            Duration::from_secs(5)
        );
    }
}
