//! Supervisor owning the polling pipeline: devices, poll table, worker
//! pool, publisher and the timer loop, with start/stop lifecycle.

use crate::bus::ControlBus;
use crate::config::DaemonConfig;
use crate::poller::{
    poll_worker, PollQuery, PollQueue, PollTable, PollTimer, Publisher, QueueError, RealTimer,
};
use crate::snmp::{SnmpError, SnmpFactory, SnmpTransport};
use log::{debug, error};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Size of the buffers on pipeline channels. Comfortably above
/// `num_workers × typical poll count`; tunable, not semantic.
pub const CHAN_BUFFER_SIZE: usize = 128;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("can't create SNMP device: {0}")]
    Snmp(#[from] SnmpError),

    #[error("poll table error: {0}")]
    Table(#[from] QueueError),

    #[error("model is already started")]
    AlreadyStarted,
}

/// A configured device bound to its SNMP transport.
pub struct SnmpDevice {
    pub id: String,
    pub title: String,
    pub transport: Box<dyn SnmpTransport>,
}

type DoneReceivers = (mpsc::Receiver<()>, mpsc::Receiver<()>);

/// The SNMP polling model: build it from configuration, `start` it, and
/// `stop` it on shutdown.
pub struct SnmpModel {
    num_workers: usize,
    devices: Arc<HashMap<String, Arc<SnmpDevice>>>,
    bus: Arc<dyn ControlBus>,
    poll_table: Option<PollTable>,
    poll_timer: Option<Box<dyn PollTimer>>,
    workers: Vec<(mpsc::Sender<()>, JoinHandle<()>)>,
    publisher: Option<(mpsc::Sender<()>, JoinHandle<()>)>,
    timer_loop: Option<(mpsc::Sender<()>, JoinHandle<DoneReceivers>, mpsc::Receiver<()>)>,
}

impl SnmpModel {
    /// Build the device arena and the poll table. Every query's initial
    /// deadline is `start`, so the first tick dispatches everything.
    pub async fn new(
        factory: &dyn SnmpFactory,
        config: DaemonConfig,
        bus: Arc<dyn ControlBus>,
        start: Instant,
    ) -> Result<Self, ModelError> {
        let mut devices = HashMap::new();
        let mut buckets: HashMap<u64, Vec<PollQuery>> = HashMap::new();

        let mut ids: Vec<&String> = config.devices.keys().collect();
        ids.sort();
        for id in ids {
            let device = &config.devices[id];
            let transport = factory.connect(device, config.debug).await?;
            devices.insert(
                device.id.clone(),
                Arc::new(SnmpDevice {
                    id: device.id.clone(),
                    title: device.name.clone(),
                    transport,
                }),
            );
            for channel in &device.channels {
                buckets
                    .entry(channel.poll_interval)
                    .or_default()
                    .push(PollQuery {
                        channel: Arc::new(channel.clone()),
                        deadline: start,
                    });
            }
        }

        let mut table = PollTable::new();
        let mut intervals: Vec<u64> = buckets.keys().copied().collect();
        intervals.sort_unstable();
        for interval in intervals {
            if let Some(queries) = buckets.remove(&interval) {
                table.add_queue(PollQueue::from_queries(queries), interval)?;
            }
        }

        Ok(Self {
            num_workers: config.num_workers,
            devices: Arc::new(devices),
            bus,
            poll_table: Some(table),
            poll_timer: None,
            workers: Vec::new(),
            publisher: None,
            timer_loop: None,
        })
    }

    /// Inject a poll timer; mainly a testing hook. Must be called before
    /// `start`, which otherwise builds a real timer.
    pub fn set_poll_timer(&mut self, timer: Box<dyn PollTimer>) {
        self.poll_timer = Some(timer);
    }

    /// Announce devices on the bus and spawn workers, publisher and the
    /// timer loop.
    pub async fn start(&mut self) -> Result<(), ModelError> {
        let table = self.poll_table.take().ok_or(ModelError::AlreadyStarted)?;

        let (query_tx, query_rx) = mpsc::channel(CHAN_BUFFER_SIZE);
        let (result_tx, result_rx) = mpsc::channel(CHAN_BUFFER_SIZE);
        let (error_tx, error_rx) = mpsc::channel(CHAN_BUFFER_SIZE);
        let (poll_done_tx, poll_done_rx) = mpsc::channel(CHAN_BUFFER_SIZE);
        let (pub_done_tx, pub_done_rx) = mpsc::channel(CHAN_BUFFER_SIZE);

        let mut ids: Vec<&String> = self.devices.keys().collect();
        ids.sort();
        for id in ids {
            let device = &self.devices[id];
            if let Err(e) = self.bus.create_device(&device.id, &device.title).await {
                error!("failed to create bus device {}: {}", device.id, e);
            }
        }

        let timer: Box<dyn PollTimer> = match self.poll_timer.take() {
            Some(timer) => timer,
            None => {
                let next = table.next_poll_time()?;
                Box::new(RealTimer::new(
                    next.saturating_duration_since(Instant::now()),
                ))
            }
        };

        let shared_queries = Arc::new(Mutex::new(query_rx));
        for id in 0..self.num_workers {
            let (quit_tx, quit_rx) = mpsc::channel(1);
            let handle = tokio::spawn(poll_worker(
                id,
                self.devices.clone(),
                shared_queries.clone(),
                result_tx.clone(),
                error_tx.clone(),
                quit_rx,
                poll_done_tx.clone(),
            ));
            self.workers.push((quit_tx, handle));
        }
        // the spawned clones are the only senders that should stay alive
        drop(result_tx);
        drop(error_tx);
        drop(poll_done_tx);

        let (quit_tx, quit_rx) = mpsc::channel(1);
        let publisher = Publisher::new(self.devices.clone(), self.bus.clone());
        let handle = tokio::spawn(publisher.run(result_rx, error_rx, quit_rx, pub_done_tx));
        self.publisher = Some((quit_tx, handle));

        let (quit_tx, quit_rx) = mpsc::channel(1);
        let (timer_done_tx, timer_done_rx) = mpsc::channel(1);
        let handle = tokio::spawn(poll_timer_worker(
            table,
            timer,
            query_tx,
            poll_done_rx,
            pub_done_rx,
            quit_rx,
            timer_done_tx,
        ));
        self.timer_loop = Some((quit_tx, handle, timer_done_rx));

        Ok(())
    }

    /// Stop the timer loop first so no new batch starts, then the workers
    /// and the publisher, draining one done token per quit signal.
    pub async fn stop(&mut self) {
        let Some((quit, handle, mut timer_done)) = self.timer_loop.take() else {
            return;
        };

        let _ = quit.send(()).await;
        let _ = timer_done.recv().await;
        let receivers = handle.await.ok();

        for (quit, _) in &self.workers {
            let _ = quit.send(()).await;
        }
        let publisher = self.publisher.take();
        if let Some((quit, _)) = &publisher {
            let _ = quit.send(()).await;
        }

        let mut poll_done_drained = 0usize;
        let mut pub_done_drained = 0usize;
        if let Some((mut poll_done, mut pub_done)) = receivers {
            for _ in 0..self.workers.len() {
                if poll_done.recv().await.is_some() {
                    poll_done_drained += 1;
                }
            }
            if publisher.is_some() && pub_done.recv().await.is_some() {
                pub_done_drained += 1;
            }
        }

        for (_, handle) in self.workers.drain(..) {
            let _ = handle.await;
        }
        if let Some((_, handle)) = publisher {
            let _ = handle.await;
        }

        debug!(
            "model stopped: drained {} worker and {} publisher done tokens",
            poll_done_drained, pub_done_drained
        );
    }
}

/// Timer loop: on each tick dispatch every due query, wait for the batch to
/// settle (one worker token and one publisher token per query), then re-arm
/// the timer for the next deadline.
async fn poll_timer_worker(
    mut table: PollTable,
    mut timer: Box<dyn PollTimer>,
    queries: mpsc::Sender<PollQuery>,
    mut poll_done: mpsc::Receiver<()>,
    mut pub_done: mpsc::Receiver<()>,
    mut quit: mpsc::Receiver<()>,
    done: mpsc::Sender<()>,
) -> DoneReceivers {
    loop {
        let t = tokio::select! {
            _ = quit.recv() => {
                timer.stop();
                let _ = done.send(()).await;
                return (poll_done, pub_done);
            }
            tick = timer.tick() => match tick {
                Some(t) => t,
                None => return (poll_done, pub_done),
            },
        };
        debug!("poll tick at {:?}", t);

        let n = table.poll(&queries, t).await;
        let mut pending = 2 * n;
        while pending > 0 {
            tokio::select! {
                Some(_) = poll_done.recv() => pending -= 1,
                Some(_) = pub_done.recv() => pending -= 1,
                else => break,
            }
        }

        let next = table.next_poll_time().expect("poll table is empty");
        timer.reset(next.saturating_duration_since(t));
    }
}
