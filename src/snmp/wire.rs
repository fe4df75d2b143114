//! BER framing for SNMPv1/v2c GET exchanges.
//!
//! Encodes GetRequest PDUs and decodes GetResponse frames into variable
//! bindings. Only the subset of ASN.1 BER that SNMP uses is implemented:
//! definite lengths, the universal types from RFC 1157 and the application
//! types from RFC 2578.

use super::types::{SnmpError, SnmpResult, SnmpValue, SnmpVersion, VarBind};

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_COUNTER64: u8 = 0x46;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;
const TAG_GET_REQUEST: u8 = 0xA0;
const TAG_GET_RESPONSE: u8 = 0xA2;

/// A decoded GetResponse PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsePacket {
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub variables: Vec<VarBind>,
}

/// Encode a single-varbind GetRequest message.
pub fn encode_get(
    version: SnmpVersion,
    community: &str,
    request_id: i32,
    oid: &str,
) -> SnmpResult<Vec<u8>> {
    let mut varbind = Vec::new();
    push_tlv(&mut varbind, TAG_OID, &encode_oid(oid)?);
    push_tlv(&mut varbind, TAG_NULL, &[]);

    let mut varbind_list = Vec::new();
    push_tlv(&mut varbind_list, TAG_SEQUENCE, &varbind);

    let mut pdu = Vec::new();
    push_tlv(&mut pdu, TAG_INTEGER, &encode_integer(request_id as i64));
    push_tlv(&mut pdu, TAG_INTEGER, &encode_integer(0)); // error-status
    push_tlv(&mut pdu, TAG_INTEGER, &encode_integer(0)); // error-index
    push_tlv(&mut pdu, TAG_SEQUENCE, &varbind_list);

    let mut message = Vec::new();
    push_tlv(&mut message, TAG_INTEGER, &encode_integer(version.wire_value()));
    push_tlv(&mut message, TAG_OCTET_STRING, community.as_bytes());
    push_tlv(&mut message, TAG_GET_REQUEST, &pdu);

    let mut frame = Vec::new();
    push_tlv(&mut frame, TAG_SEQUENCE, &message);
    Ok(frame)
}

/// Decode a GetResponse frame into its PDU fields and variable bindings.
pub fn decode_response(frame: &[u8]) -> SnmpResult<ResponsePacket> {
    let mut top = Reader::new(frame);
    let mut message = Reader::new(top.expect(TAG_SEQUENCE)?);
    let _version = parse_integer(message.expect(TAG_INTEGER)?)?;
    let _community = message.expect(TAG_OCTET_STRING)?;
    let mut pdu = Reader::new(message.expect(TAG_GET_RESPONSE)?);
    let request_id = parse_integer(pdu.expect(TAG_INTEGER)?)? as i32;
    let error_status = parse_integer(pdu.expect(TAG_INTEGER)?)?;
    let error_index = parse_integer(pdu.expect(TAG_INTEGER)?)?;
    let mut list = Reader::new(pdu.expect(TAG_SEQUENCE)?);

    let mut variables = Vec::new();
    while !list.is_empty() {
        let mut binding = Reader::new(list.expect(TAG_SEQUENCE)?);
        let oid = decode_oid(binding.expect(TAG_OID)?)?;
        let (tag, content) = binding.tlv()?;
        variables.push(VarBind {
            oid,
            value: decode_value(tag, content)?,
        });
    }

    Ok(ResponsePacket {
        request_id,
        error_status,
        error_index,
        variables,
    })
}

fn push_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    push_length(out, content.len());
    out.extend_from_slice(content);
}

fn push_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        let bytes = &bytes[skip..];
        out.push(0x80 | bytes.len() as u8);
        out.extend_from_slice(bytes);
    }
}

fn encode_integer(value: i64) -> Vec<u8> {
    let mut bytes = value.to_be_bytes().to_vec();
    while bytes.len() > 1 {
        if (bytes[0] == 0x00 && bytes[1] & 0x80 == 0)
            || (bytes[0] == 0xFF && bytes[1] & 0x80 != 0)
        {
            bytes.remove(0);
        } else {
            break;
        }
    }
    bytes
}

fn encode_oid(oid: &str) -> SnmpResult<Vec<u8>> {
    let arcs: Vec<u64> = oid
        .trim_start_matches('.')
        .split('.')
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| SnmpError::InvalidOid(oid.to_string()))
        })
        .collect::<SnmpResult<_>>()?;
    if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] > 39) {
        return Err(SnmpError::InvalidOid(oid.to_string()));
    }
    let mut out = Vec::new();
    push_subid(&mut out, arcs[0] * 40 + arcs[1]);
    for &arc in &arcs[2..] {
        push_subid(&mut out, arc);
    }
    Ok(out)
}

fn push_subid(out: &mut Vec<u8>, mut value: u64) {
    let mut chunks = [0u8; 10];
    let mut n = 0;
    loop {
        chunks[n] = (value & 0x7F) as u8;
        value >>= 7;
        n += 1;
        if value == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let mut byte = chunks[i];
        if i != 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}

fn decode_value(tag: u8, content: &[u8]) -> SnmpResult<SnmpValue> {
    let value = match tag {
        TAG_INTEGER => SnmpValue::Integer(parse_integer(content)?),
        TAG_OCTET_STRING => SnmpValue::OctetString(content.to_vec()),
        TAG_OID => SnmpValue::ObjectIdentifier(decode_oid(content)?),
        TAG_IP_ADDRESS => {
            if content.len() != 4 {
                return Err(SnmpError::Malformed("IpAddress must be 4 bytes".into()));
            }
            SnmpValue::IpAddress([content[0], content[1], content[2], content[3]])
        }
        TAG_COUNTER32 => SnmpValue::Counter32(parse_unsigned(content)? as u32),
        TAG_GAUGE32 => SnmpValue::Gauge32(parse_unsigned(content)? as u32),
        TAG_TIMETICKS => SnmpValue::TimeTicks(parse_unsigned(content)? as u32),
        TAG_COUNTER64 => SnmpValue::Counter64(parse_unsigned(content)?),
        TAG_NO_SUCH_OBJECT => SnmpValue::NoSuchObject,
        TAG_NO_SUCH_INSTANCE => SnmpValue::NoSuchInstance,
        TAG_END_OF_MIB_VIEW => SnmpValue::EndOfMibView,
        // NULL and anything unhandled both carry no usable value
        _ => SnmpValue::Null,
    };
    Ok(value)
}

fn parse_integer(bytes: &[u8]) -> SnmpResult<i64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(SnmpError::Malformed("bad integer length".into()));
    }
    let mut value: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in bytes {
        value = (value << 8) | b as i64;
    }
    Ok(value)
}

fn parse_unsigned(bytes: &[u8]) -> SnmpResult<u64> {
    let bytes = if bytes.first() == Some(&0) {
        &bytes[1..]
    } else {
        bytes
    };
    if bytes.len() > 8 {
        return Err(SnmpError::Malformed("bad unsigned length".into()));
    }
    Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

fn decode_oid(bytes: &[u8]) -> SnmpResult<String> {
    if bytes.is_empty() {
        return Err(SnmpError::Malformed("empty OID".into()));
    }
    let mut arcs: Vec<u64> = Vec::new();
    let mut value = 0u64;
    for (i, &b) in bytes.iter().enumerate() {
        value = (value << 7) | (b & 0x7F) as u64;
        if b & 0x80 == 0 {
            if arcs.is_empty() {
                let (first, second) = if value < 40 {
                    (0, value)
                } else if value < 80 {
                    (1, value - 40)
                } else {
                    (2, value - 80)
                };
                arcs.push(first);
                arcs.push(second);
            } else {
                arcs.push(value);
            }
            value = 0;
        } else if i == bytes.len() - 1 {
            return Err(SnmpError::Malformed("truncated OID".into()));
        }
    }
    let parts: Vec<String> = arcs.iter().map(u64::to_string).collect();
    Ok(format!(".{}", parts.join(".")))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn byte(&mut self) -> SnmpResult<u8> {
        let b = *self.buf.get(self.pos).ok_or_else(truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> SnmpResult<&'a [u8]> {
        if n > self.buf.len() - self.pos {
            return Err(truncated());
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn length(&mut self) -> SnmpResult<usize> {
        let first = self.byte()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }
        let count = (first & 0x7F) as usize;
        if count == 0 || count > 4 {
            return Err(SnmpError::Malformed("unsupported length encoding".into()));
        }
        let mut len = 0usize;
        for &b in self.take(count)? {
            len = (len << 8) | b as usize;
        }
        Ok(len)
    }

    fn tlv(&mut self) -> SnmpResult<(u8, &'a [u8])> {
        let tag = self.byte()?;
        let len = self.length()?;
        Ok((tag, self.take(len)?))
    }

    fn expect(&mut self, tag: u8) -> SnmpResult<&'a [u8]> {
        let (got, content) = self.tlv()?;
        if got != tag {
            return Err(SnmpError::Malformed(format!(
                "expected tag {:#04x}, got {:#04x}",
                tag, got
            )));
        }
        Ok(content)
    }
}

fn truncated() -> SnmpError {
    SnmpError::Malformed("truncated frame".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a GetResponse frame around the given encoded varbind bodies.
    fn build_response(request_id: i32, varbinds: &[Vec<u8>]) -> Vec<u8> {
        let mut list = Vec::new();
        for vb in varbinds {
            push_tlv(&mut list, TAG_SEQUENCE, vb);
        }
        let mut pdu = Vec::new();
        push_tlv(&mut pdu, TAG_INTEGER, &encode_integer(request_id as i64));
        push_tlv(&mut pdu, TAG_INTEGER, &encode_integer(0));
        push_tlv(&mut pdu, TAG_INTEGER, &encode_integer(0));
        push_tlv(&mut pdu, TAG_SEQUENCE, &list);

        let mut message = Vec::new();
        push_tlv(&mut message, TAG_INTEGER, &encode_integer(1));
        push_tlv(&mut message, TAG_OCTET_STRING, b"public");
        push_tlv(&mut message, TAG_GET_RESPONSE, &pdu);

        let mut frame = Vec::new();
        push_tlv(&mut frame, TAG_SEQUENCE, &message);
        frame
    }

    fn build_varbind(oid: &str, tag: u8, content: &[u8]) -> Vec<u8> {
        let mut vb = Vec::new();
        push_tlv(&mut vb, TAG_OID, &encode_oid(oid).unwrap());
        push_tlv(&mut vb, tag, content);
        vb
    }

    #[test]
    fn encodes_well_known_oid() {
        assert_eq!(
            encode_oid(".1.3.6.1.2.1.1.1.0").unwrap(),
            vec![0x2B, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00]
        );
    }

    #[test]
    fn encodes_multibyte_subidentifier() {
        // 8072 = 63 * 128 + 8
        assert_eq!(
            encode_oid("1.3.6.1.4.1.8072").unwrap(),
            vec![0x2B, 0x06, 0x01, 0x04, 0x01, 0xBF, 0x08]
        );
    }

    #[test]
    fn rejects_bad_oids() {
        assert!(encode_oid("").is_err());
        assert!(encode_oid("sysDescr.0").is_err());
        assert!(encode_oid(".1").is_err());
    }

    #[test]
    fn oid_string_roundtrip() {
        for oid in [".1.3.6.1.2.1.1.3.0", ".1.3.6.1.4.1.8072.3.2.10", ".0.0"] {
            let encoded = encode_oid(oid).unwrap();
            assert_eq!(decode_oid(&encoded).unwrap(), oid);
        }
    }

    #[test]
    fn integer_encoding_is_minimal() {
        assert_eq!(encode_integer(0), vec![0x00]);
        assert_eq!(encode_integer(127), vec![0x7F]);
        assert_eq!(encode_integer(128), vec![0x00, 0x80]);
        assert_eq!(encode_integer(300), vec![0x01, 0x2C]);
        assert_eq!(encode_integer(-1), vec![0xFF]);
        assert_eq!(encode_integer(-123), vec![0x85]);
    }

    #[test]
    fn parses_signed_integers() {
        assert_eq!(parse_integer(&[0x00]).unwrap(), 0);
        assert_eq!(parse_integer(&[0x01, 0x2C]).unwrap(), 300);
        assert_eq!(parse_integer(&[0x85]).unwrap(), -123);
        assert_eq!(parse_integer(&[0xFF, 0x85]).unwrap(), -123);
        assert!(parse_integer(&[]).is_err());
    }

    #[test]
    fn parses_unsigned_with_leading_pad() {
        assert_eq!(parse_unsigned(&[0x00, 0xFF]).unwrap(), 255);
        assert_eq!(
            parse_unsigned(&[0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap(),
            u64::MAX
        );
    }

    #[test]
    fn decodes_octet_string_response() {
        let frame = build_response(
            42,
            &[build_varbind(".1.3.6.1.2.1.1.1.0", TAG_OCTET_STRING, b"test")],
        );
        let packet = decode_response(&frame).unwrap();
        assert_eq!(packet.request_id, 42);
        assert_eq!(packet.error_status, 0);
        assert_eq!(packet.variables.len(), 1);
        assert_eq!(packet.variables[0].oid, ".1.3.6.1.2.1.1.1.0");
        assert_eq!(
            packet.variables[0].value,
            SnmpValue::OctetString(b"test".to_vec())
        );
    }

    #[test]
    fn decodes_application_types() {
        let frame = build_response(
            7,
            &[
                build_varbind(".1.2.3.1", TAG_COUNTER32, &[0x01, 0x00]),
                build_varbind(".1.2.3.2", TAG_GAUGE32, &[0x2A]),
                build_varbind(".1.2.3.3", TAG_TIMETICKS, &[0x64]),
                build_varbind(".1.2.3.4", TAG_COUNTER64, &[0x01, 0x00, 0x00, 0x00, 0x00]),
                build_varbind(".1.2.3.5", TAG_IP_ADDRESS, &[192, 168, 1, 1]),
                build_varbind(".1.2.3.6", TAG_NO_SUCH_INSTANCE, &[]),
            ],
        );
        let packet = decode_response(&frame).unwrap();
        let values: Vec<&SnmpValue> = packet.variables.iter().map(|v| &v.value).collect();
        assert_eq!(values[0], &SnmpValue::Counter32(256));
        assert_eq!(values[1], &SnmpValue::Gauge32(42));
        assert_eq!(values[2], &SnmpValue::TimeTicks(100));
        assert_eq!(values[3], &SnmpValue::Counter64(1 << 32));
        assert_eq!(values[4], &SnmpValue::IpAddress([192, 168, 1, 1]));
        assert_eq!(values[5], &SnmpValue::NoSuchInstance);
    }

    #[test]
    fn rejects_truncated_frames() {
        let frame = build_response(
            1,
            &[build_varbind(".1.2.3.4", TAG_OCTET_STRING, b"payload")],
        );
        assert!(decode_response(&frame[..frame.len() - 3]).is_err());
        assert!(decode_response(&[]).is_err());
    }

    #[test]
    fn encoded_request_has_expected_header() {
        let frame = encode_get(SnmpVersion::V2c, "public", 1, ".1.3.6.1.2.1.1.1.0").unwrap();
        // outer SEQUENCE
        assert_eq!(frame[0], TAG_SEQUENCE);
        // version INTEGER 1 (v2c)
        assert_eq!(&frame[2..5], &[TAG_INTEGER, 0x01, 0x01]);
        // community OCTET STRING "public"
        assert_eq!(frame[5], TAG_OCTET_STRING);
        assert_eq!(&frame[7..13], b"public");
        // GetRequest PDU follows
        assert_eq!(frame[13], TAG_GET_REQUEST);
    }
}
