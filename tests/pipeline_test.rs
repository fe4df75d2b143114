//! End-to-end pipeline scenarios: a fake SNMP source, a recording bus and a
//! manually driven poll timer around the real model.

use async_trait::async_trait;
use mqtt_snmp_bridge::bus::{BusError, Control, ControlBus};
use mqtt_snmp_bridge::config::{ChannelConfig, Conv, DaemonConfig, DeviceConfig};
use mqtt_snmp_bridge::model::SnmpModel;
use mqtt_snmp_bridge::poller::PollTimer;
use mqtt_snmp_bridge::snmp::{
    Packet, SnmpError, SnmpFactory, SnmpResult, SnmpTransport, SnmpValue, VarBind,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

/// Fake SNMP source: a shared OID to value map, mutable between ticks.
#[derive(Clone, Default)]
struct FakeSnmp {
    messages: Arc<Mutex<HashMap<String, String>>>,
}

impl FakeSnmp {
    fn insert(&self, oid: &str, value: &str) {
        self.messages
            .lock()
            .unwrap()
            .insert(oid.to_string(), value.to_string());
    }
}

struct FakeTransport {
    messages: Arc<Mutex<HashMap<String, String>>>,
}

#[async_trait]
impl SnmpTransport for FakeTransport {
    async fn get(&self, oid: &str) -> SnmpResult<Packet> {
        match self.messages.lock().unwrap().get(oid) {
            Some(value) => Ok(Packet {
                variables: vec![VarBind {
                    oid: oid.to_string(),
                    value: SnmpValue::OctetString(value.clone().into_bytes()),
                }],
            }),
            None => Err(SnmpError::RequestFailed("no such instance".to_string())),
        }
    }
}

#[async_trait]
impl SnmpFactory for FakeSnmp {
    async fn connect(
        &self,
        _device: &DeviceConfig,
        _debug: bool,
    ) -> SnmpResult<Box<dyn SnmpTransport>> {
        Ok(Box::new(FakeTransport {
            messages: self.messages.clone(),
        }))
    }
}

/// Records every bus request as one line.
#[derive(Default)]
struct MockBus {
    log: Mutex<Vec<String>>,
}

impl MockBus {
    fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl ControlBus for MockBus {
    async fn create_device(&self, id: &str, title: &str) -> Result<(), BusError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("new device: {} ({})", id, title));
        Ok(())
    }

    async fn create_control(&self, device_id: &str, control: &Control) -> Result<(), BusError> {
        self.log.lock().unwrap().push(format!(
            "new control: device {}, name {}, type {}, value {}",
            device_id, control.name, control.control_type, control.value
        ));
        Ok(())
    }

    async fn update_control_value(
        &self,
        device_id: &str,
        control: &str,
        value: &str,
    ) -> Result<(), BusError> {
        self.log.lock().unwrap().push(format!(
            "value: device {}, name {}, value {}",
            device_id, control, value
        ));
        Ok(())
    }
}

/// Timer driven by the test. The reset call after a batch settles doubles
/// as the barrier that the batch is done.
struct ManualTimer {
    ticks: mpsc::Receiver<Instant>,
    resets: mpsc::UnboundedSender<Duration>,
}

#[async_trait]
impl PollTimer for ManualTimer {
    async fn tick(&mut self) -> Option<Instant> {
        self.ticks.recv().await
    }

    fn reset(&mut self, after: Duration) {
        let _ = self.resets.send(after);
    }

    fn stop(&mut self) {}
}

fn manual_timer() -> (
    ManualTimer,
    mpsc::Sender<Instant>,
    mpsc::UnboundedReceiver<Duration>,
) {
    let (tick_tx, ticks) = mpsc::channel(1);
    let (resets, resets_rx) = mpsc::unbounded_channel();
    (ManualTimer { ticks, resets }, tick_tx, resets_rx)
}

fn channel(name: &str, oid: &str, interval_ms: u64) -> ChannelConfig {
    ChannelConfig {
        name: name.to_string(),
        oid: oid.to_string(),
        poll_interval: interval_ms,
        ..ChannelConfig::default()
    }
}

fn device(address: &str, community: &str, channels: Vec<ChannelConfig>) -> DeviceConfig {
    let mut device = DeviceConfig {
        address: address.to_string(),
        community: community.to_string(),
        ..DeviceConfig::default()
    };
    device.id = format!("snmp_{}", device.generate_id());
    device.name = format!("SNMP {}", device.generate_id());
    device.channels = channels
        .into_iter()
        .map(|mut ch| {
            ch.device_id = device.id.clone();
            ch
        })
        .collect();
    device
}

fn config(num_workers: usize, devices: Vec<DeviceConfig>) -> DaemonConfig {
    DaemonConfig {
        debug: false,
        num_workers,
        devices: devices.into_iter().map(|d| (d.id.clone(), d)).collect(),
    }
}

struct Pipeline {
    model: SnmpModel,
    bus: Arc<MockBus>,
    ticks: mpsc::Sender<Instant>,
    resets: mpsc::UnboundedReceiver<Duration>,
    start: Instant,
}

async fn start_pipeline(cfg: DaemonConfig, snmp: &FakeSnmp) -> Pipeline {
    let bus = Arc::new(MockBus::default());
    let (timer, ticks, resets) = manual_timer();
    let start = Instant::now();
    let mut model = SnmpModel::new(snmp, cfg, bus.clone(), start).await.unwrap();
    model.set_poll_timer(Box::new(timer));
    model.start().await.unwrap();
    Pipeline {
        model,
        bus,
        ticks,
        resets,
        start,
    }
}

impl Pipeline {
    /// Fire one tick and wait until the batch has fully settled.
    async fn tick(&mut self, at: Instant) {
        self.ticks.send(at).await.unwrap();
        timeout(Duration::from_secs(5), self.resets.recv())
            .await
            .expect("tick did not settle")
            .expect("timer loop went away");
    }
}

#[tokio::test]
async fn creates_once_and_updates_only_on_change() {
    let snmp = FakeSnmp::default();
    snmp.insert(".1.2.3.4", "foo");
    let cfg = config(
        1,
        vec![device(
            "127.0.0.1",
            "test",
            vec![channel("channel1", ".1.2.3.4", 1000)],
        )],
    );
    let mut p = start_pipeline(cfg, &snmp).await;

    p.tick(p.start).await;
    // unchanged value: no event on the second tick
    p.tick(p.start + Duration::from_secs(1)).await;
    snmp.insert(".1.2.3.4", "baz");
    p.tick(p.start + Duration::from_secs(2)).await;
    p.model.stop().await;

    assert_eq!(
        p.bus.events(),
        vec![
            "new device: snmp_127.0.0.1_test (SNMP 127.0.0.1_test)".to_string(),
            "new control: device snmp_127.0.0.1_test, name channel1, type value, value foo"
                .to_string(),
            "value: device snmp_127.0.0.1_test, name channel1, value baz".to_string(),
        ]
    );
}

#[tokio::test]
async fn missing_oid_does_not_stop_other_channels() {
    let snmp = FakeSnmp::default();
    snmp.insert(".1.2.3.4", "foo");
    let cfg = config(
        1,
        vec![device(
            "127.0.0.1",
            "test",
            vec![
                channel("channel1", ".1.2.3.4", 1000),
                channel("channel2", ".1.2.3.5", 1000),
            ],
        )],
    );
    let mut p = start_pipeline(cfg, &snmp).await;

    // channel2 errors on both ticks yet the batches settle, so the error
    // path keeps the done-token accounting intact
    p.tick(p.start).await;
    snmp.insert(".1.2.3.4", "bar");
    p.tick(p.start + Duration::from_secs(1)).await;
    p.model.stop().await;

    assert_eq!(
        p.bus.events(),
        vec![
            "new device: snmp_127.0.0.1_test (SNMP 127.0.0.1_test)".to_string(),
            "new control: device snmp_127.0.0.1_test, name channel1, type value, value foo"
                .to_string(),
            "value: device snmp_127.0.0.1_test, name channel1, value bar".to_string(),
        ]
    );
}

#[tokio::test]
async fn shorter_intervals_dispatch_first_within_a_tick() {
    let snmp = FakeSnmp::default();
    snmp.insert(".1.1", "1");
    snmp.insert(".1.2", "2");
    // configuration order deliberately lists the slow channel first
    let cfg = config(
        1,
        vec![device(
            "10.0.0.1",
            "",
            vec![channel("slow", ".1.2", 300), channel("fast", ".1.1", 100)],
        )],
    );
    let mut p = start_pipeline(cfg, &snmp).await;

    p.tick(p.start).await;
    p.model.stop().await;

    assert_eq!(
        p.bus.events(),
        vec![
            "new device: snmp_10.0.0.1 (SNMP 10.0.0.1)".to_string(),
            "new control: device snmp_10.0.0.1, name fast, type value, value 1".to_string(),
            "new control: device snmp_10.0.0.1, name slow, type value, value 2".to_string(),
        ]
    );
}

#[tokio::test]
async fn scale_converter_applies_end_to_end() {
    let snmp = FakeSnmp::default();
    snmp.insert(".1.2.3.4", "123");
    let mut scaled = channel("scaled", ".1.2.3.4", 1000);
    scaled.conv = Conv::Scale(0.1);
    let cfg = config(1, vec![device("10.0.0.1", "", vec![scaled])]);
    let mut p = start_pipeline(cfg, &snmp).await;

    p.tick(p.start).await;
    p.model.stop().await;

    assert_eq!(
        p.bus.events(),
        vec![
            "new device: snmp_10.0.0.1 (SNMP 10.0.0.1)".to_string(),
            "new control: device snmp_10.0.0.1, name scaled, type value, value 12.3".to_string(),
        ]
    );
}

#[tokio::test]
async fn stop_terminates_every_task() {
    let snmp = FakeSnmp::default();
    snmp.insert(".1.2.3.4", "foo");
    let cfg = config(
        4,
        vec![device(
            "127.0.0.1",
            "test",
            vec![channel("channel1", ".1.2.3.4", 1000)],
        )],
    );
    let mut p = start_pipeline(cfg, &snmp).await;

    p.tick(p.start).await;
    timeout(Duration::from_secs(5), p.model.stop())
        .await
        .expect("stop timed out");

    // a stopped model accepts a second stop as a no-op
    timeout(Duration::from_secs(5), p.model.stop())
        .await
        .expect("second stop timed out");
}
