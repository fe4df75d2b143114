//! Poll workers: concurrent readers draining the shared query channel.

use crate::model::SnmpDevice;
use crate::poller::queue::{PollError, PollQuery, PollResult};
use crate::snmp::decode_value;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Worker loop: take a query, read the OID, emit one result or error, then
/// acknowledge with one done token. One token is also emitted on quit.
pub(crate) async fn poll_worker(
    id: usize,
    devices: Arc<HashMap<String, Arc<SnmpDevice>>>,
    queries: Arc<Mutex<mpsc::Receiver<PollQuery>>>,
    results: mpsc::Sender<PollResult>,
    errors: mpsc::Sender<PollError>,
    mut quit: mpsc::Receiver<()>,
    done: mpsc::Sender<()>,
) {
    loop {
        tokio::select! {
            _ = quit.recv() => {
                let _ = done.send(()).await;
                break;
            }
            query = next_query(&queries) => {
                let Some(query) = query else {
                    // dispatch side is gone
                    let _ = done.send(()).await;
                    break;
                };
                handle_query(id, &devices, query, &results, &errors).await;
                let _ = done.send(()).await;
            }
        }
    }
}

async fn next_query(queries: &Mutex<mpsc::Receiver<PollQuery>>) -> Option<PollQuery> {
    queries.lock().await.recv().await
}

async fn handle_query(
    id: usize,
    devices: &HashMap<String, Arc<SnmpDevice>>,
    query: PollQuery,
    results: &mpsc::Sender<PollResult>,
    errors: &mpsc::Sender<PollError>,
) {
    let channel = &query.channel;
    debug!("[poller {}] request {}", id, channel.oid);

    let device = devices
        .get(&channel.device_id)
        .unwrap_or_else(|| panic!("no device registered for channel {}", channel.name));

    let packet = match device.transport.get(&channel.oid).await {
        Ok(packet) => packet,
        Err(e) => {
            debug!("failed to poll {}:{}: {}", device.id, channel.name, e);
            let _ = errors
                .send(PollError {
                    channel: channel.clone(),
                    message: e.to_string(),
                })
                .await;
            return;
        }
    };

    // a GET response carries one varbind per requested OID
    let Some(variable) = packet.variables.into_iter().next() else {
        let _ = errors
            .send(PollError {
                channel: channel.clone(),
                message: "empty response".to_string(),
            })
            .await;
        return;
    };

    match decode_value(&variable.value) {
        Some(text) => {
            let data = channel.conv.apply(&text);
            debug!("[poller {}] result for {}: {}", id, channel.name, data);
            let _ = results
                .send(PollResult {
                    channel: channel.clone(),
                    data,
                })
                .await;
        }
        None => {
            warn!(
                "failed to poll {}:{}: instance can't be converted to string",
                device.id, channel.name
            );
            let _ = errors
                .send(PollError {
                    channel: channel.clone(),
                    message: "value has no string form".to_string(),
                })
                .await;
        }
    }
}
