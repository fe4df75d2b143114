//! SNMP transport seam and the concrete UDP GET client.
//!
//! Workers only ever see the `SnmpTransport` trait; the factory exists so
//! tests can substitute a fake transport for the whole pipeline.

use super::types::{Packet, SnmpError, SnmpResult, SnmpVersion};
use super::wire;
use crate::config::DeviceConfig;
use async_trait::async_trait;
use log::debug;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

const SNMP_DEFAULT_PORT: u16 = 161;
const MAX_DATAGRAM: usize = 65_535;

/// Minimal SNMP read interface, one OID per request.
#[async_trait]
pub trait SnmpTransport: Send + Sync {
    async fn get(&self, oid: &str) -> SnmpResult<Packet>;
}

/// Constructs one transport per configured device.
#[async_trait]
pub trait SnmpFactory: Send + Sync {
    async fn connect(
        &self,
        device: &DeviceConfig,
        debug: bool,
    ) -> SnmpResult<Box<dyn SnmpTransport>>;
}

/// SNMPv1/v2c GET client over UDP.
///
/// Each request uses a fresh ephemeral socket, so concurrent `get` calls on
/// the same transport cannot cross their responses.
pub struct UdpTransport {
    target: String,
    community: String,
    version: SnmpVersion,
    timeout: Duration,
    debug: bool,
    request_id: AtomicI32,
}

impl UdpTransport {
    pub fn new(
        address: &str,
        community: &str,
        version: SnmpVersion,
        timeout_secs: u64,
        debug: bool,
    ) -> Self {
        let target = if address.contains(':') {
            address.to_string()
        } else {
            format!("{}:{}", address, SNMP_DEFAULT_PORT)
        };
        Self {
            target,
            community: community.to_string(),
            version,
            timeout: Duration::from_secs(timeout_secs),
            debug,
            request_id: AtomicI32::new(1),
        }
    }
}

#[async_trait]
impl SnmpTransport for UdpTransport {
    async fn get(&self, oid: &str) -> SnmpResult<Packet> {
        let request_id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let frame = wire::encode_get(self.version, &self.community, request_id, oid)?;

        if self.debug {
            debug!("GET {} on {} (request id {})", oid, self.target, request_id);
        }

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(self.target.as_str()).await?;
        socket.send(&frame).await?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let n = match timeout_at(deadline, socket.recv(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => return Err(SnmpError::Timeout),
            };
            let response = wire::decode_response(&buf[..n])?;
            if response.request_id != request_id {
                debug!(
                    "discarding stale response on {} (request id {} != {})",
                    self.target, response.request_id, request_id
                );
                continue;
            }
            if response.error_status != 0 {
                return Err(SnmpError::ErrorStatus {
                    status: response.error_status,
                    index: response.error_index,
                });
            }
            return Ok(Packet {
                variables: response.variables,
            });
        }
    }
}

/// Factory producing `UdpTransport` instances from device configuration.
pub struct UdpFactory;

#[async_trait]
impl SnmpFactory for UdpFactory {
    async fn connect(
        &self,
        device: &DeviceConfig,
        debug: bool,
    ) -> SnmpResult<Box<dyn SnmpTransport>> {
        Ok(Box::new(UdpTransport::new(
            &device.address,
            &device.community,
            device.snmp_version,
            device.snmp_timeout,
            debug,
        )))
    }
}
