//! Publisher: the single consumer of poll results, deduplicating values
//! against its cache and driving the control bus.

use crate::bus::{Control, ControlBus};
use crate::model::SnmpDevice;
use crate::poller::queue::{PollError, PollResult};
use log::{debug, error};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) struct Publisher {
    devices: Arc<HashMap<String, Arc<SnmpDevice>>>,
    bus: Arc<dyn ControlBus>,
    /// Last published value per (device id, channel name).
    cache: HashMap<(String, String), String>,
}

impl Publisher {
    pub(crate) fn new(
        devices: Arc<HashMap<String, Arc<SnmpDevice>>>,
        bus: Arc<dyn ControlBus>,
    ) -> Self {
        Self {
            devices,
            bus,
            cache: HashMap::new(),
        }
    }

    /// Consume results and errors until quit, acknowledging every handled
    /// message with one done token.
    pub(crate) async fn run(
        mut self,
        mut results: mpsc::Receiver<PollResult>,
        mut errors: mpsc::Receiver<PollError>,
        mut quit: mpsc::Receiver<()>,
        done: mpsc::Sender<()>,
    ) {
        loop {
            tokio::select! {
                Some(result) = results.recv() => {
                    self.handle_result(result).await;
                    let _ = done.send(()).await;
                }
                Some(err) = errors.recv() => {
                    debug!("poll error on {}: {}", err.channel.name, err.message);
                    let _ = done.send(()).await;
                }
                _ = quit.recv() => {
                    let _ = done.send(()).await;
                    break;
                }
            }
        }
    }

    async fn handle_result(&mut self, result: PollResult) {
        let channel = &result.channel;
        let device = self
            .devices
            .get(&channel.device_id)
            .unwrap_or_else(|| panic!("device is not found for channel: {}", channel.name))
            .clone();

        let key = (channel.device_id.clone(), channel.name.clone());
        match self.cache.insert(key, result.data.clone()) {
            None => {
                let mut control_type = channel.control_type.clone();
                if !channel.units.is_empty() {
                    control_type = format!("{}:{}", control_type, channel.units);
                }
                debug!("creating control {} on {}", channel.name, device.id);
                let control = Control {
                    name: channel.name.clone(),
                    control_type,
                    value: result.data.clone(),
                    order: channel.order,
                    read_only: true,
                };
                if let Err(e) = self.bus.create_control(&device.id, &control).await {
                    error!(
                        "failed to create control {} on {}: {}",
                        channel.name, device.id, e
                    );
                }
            }
            Some(previous) if previous != result.data => {
                if let Err(e) = self
                    .bus
                    .update_control_value(&device.id, &channel.name, &result.data)
                    .await
                {
                    error!(
                        "failed to publish {} on {}: {}",
                        channel.name, device.id, e
                    );
                }
            }
            // unchanged value, suppress the chatter
            Some(_) => {}
        }
    }
}
