mod client;
mod decode;
mod translate;
mod types;
mod wire;

pub use client::{SnmpFactory, SnmpTransport, UdpFactory, UdpTransport};
pub use decode::{decode_value, format_timeticks};
pub use translate::{translate_config, translate_oids, TranslateError};
pub use types::{Packet, SnmpError, SnmpResult, SnmpValue, SnmpVersion, VarBind};
