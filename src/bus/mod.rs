//! Control bus seam: the narrow publisher interface the pipeline emits on.

mod mqtt;

pub use mqtt::MqttBus;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Parameters of a control created on the bus.
#[derive(Debug, Clone)]
pub struct Control {
    pub name: String,
    pub control_type: String,
    pub value: String,
    pub order: i32,
    pub read_only: bool,
}

/// Device/control tree on the external bus.
///
/// Creation is guarded by the publisher's cache, so implementations may
/// treat `create_control` as create-or-replace.
#[async_trait]
pub trait ControlBus: Send + Sync {
    async fn create_device(&self, id: &str, title: &str) -> Result<(), BusError>;

    async fn create_control(&self, device_id: &str, control: &Control) -> Result<(), BusError>;

    async fn update_control_value(
        &self,
        device_id: &str,
        control: &str,
        value: &str,
    ) -> Result<(), BusError>;
}
