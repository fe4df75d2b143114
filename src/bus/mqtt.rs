//! Thin MQTT binding of the control bus: retained publishes under the
//! conventional `/devices/<id>/controls/<name>` topic tree.

use super::{BusError, Control, ControlBus};
use async_trait::async_trait;
use log::warn;
use rumqttc::{AsyncClient, ClientError, MqttOptions, QoS};
use std::time::Duration;

const DEFAULT_MQTT_PORT: u16 = 1883;

pub struct MqttBus {
    client: AsyncClient,
}

impl MqttBus {
    /// Connect to the broker (`host` or `host:port`) and spawn the driver
    /// task that keeps the connection alive.
    pub fn connect(broker: &str, client_id: &str) -> Self {
        let (host, port) = match broker.rsplit_once(':') {
            Some((host, port)) => (
                host.to_string(),
                port.parse().unwrap_or(DEFAULT_MQTT_PORT),
            ),
            None => (broker.to_string(), DEFAULT_MQTT_PORT),
        };

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        tokio::spawn(async move {
            loop {
                if let Err(e) = event_loop.poll().await {
                    warn!("MQTT connection error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });

        Self { client }
    }

    async fn publish(&self, topic: String, payload: String) -> Result<(), BusError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, true, payload)
            .await
            .map_err(|e: ClientError| BusError::Publish(e.to_string()))
    }
}

#[async_trait]
impl ControlBus for MqttBus {
    async fn create_device(&self, id: &str, title: &str) -> Result<(), BusError> {
        self.publish(format!("/devices/{}/meta/name", id), title.to_string())
            .await
    }

    async fn create_control(&self, device_id: &str, control: &Control) -> Result<(), BusError> {
        let base = format!("/devices/{}/controls/{}", device_id, control.name);
        self.publish(format!("{}/meta/type", base), control.control_type.clone())
            .await?;
        self.publish(format!("{}/meta/order", base), control.order.to_string())
            .await?;
        if control.read_only {
            self.publish(format!("{}/meta/readonly", base), "1".to_string())
                .await?;
        }
        self.publish(base, control.value.clone()).await
    }

    async fn update_control_value(
        &self,
        device_id: &str,
        control: &str,
        value: &str,
    ) -> Result<(), BusError> {
        self.publish(
            format!("/devices/{}/controls/{}", device_id, control),
            value.to_string(),
        )
        .await
    }
}
