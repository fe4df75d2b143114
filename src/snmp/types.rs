use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnmpError {
    #[error("SNMP request failed: {0}")]
    RequestFailed(String),

    #[error("invalid OID: {0}")]
    InvalidOid(String),

    #[error("timeout")]
    Timeout,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("error status {status} at index {index}")]
    ErrorStatus { status: i64, index: i64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SnmpResult<T> = Result<T, SnmpError>;

/// SNMP protocol version carried in the message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmpVersion {
    V1,
    V2c,
}

impl SnmpVersion {
    /// Version field value on the wire (RFC 1157 / RFC 1901).
    pub fn wire_value(self) -> i64 {
        match self {
            SnmpVersion::V1 => 0,
            SnmpVersion::V2c => 1,
        }
    }
}

impl fmt::Display for SnmpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnmpVersion::V1 => write!(f, "1"),
            SnmpVersion::V2c => write!(f, "2c"),
        }
    }
}

/// A decoded SNMP variable value.
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    ObjectIdentifier(String),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Counter64(u64),
    Null,
    /// SNMPv2c exception markers returned in place of a value.
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

/// One variable binding from a response packet.
#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: String,
    pub value: SnmpValue,
}

/// An SNMP response reduced to its ordered variable bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub variables: Vec<VarBind>,
}
