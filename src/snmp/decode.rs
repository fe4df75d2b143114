//! Rendering of SNMP variable values into display strings.

use super::types::SnmpValue;

/// Decode a variable value into its display string.
///
/// Returns `None` for values that have no textual rendering: octet strings
/// that are not valid UTF-8 and types outside the supported table.
pub fn decode_value(value: &SnmpValue) -> Option<String> {
    match value {
        SnmpValue::Counter32(v) => Some(v.to_string()),
        SnmpValue::Gauge32(v) => Some(v.to_string()),
        SnmpValue::Counter64(v) => Some(v.to_string()),
        SnmpValue::Integer(v) => Some(v.to_string()),
        SnmpValue::OctetString(bytes) => String::from_utf8(bytes.clone()).ok(),
        SnmpValue::IpAddress(octets) => Some(format!(
            "{}.{}.{}.{}",
            octets[0], octets[1], octets[2], octets[3]
        )),
        SnmpValue::TimeTicks(ticks) => Some(format_timeticks(*ticks)),
        _ => None,
    }
}

/// Format a TimeTicks value (hundredths of a second) as a duration string,
/// e.g. `"500ms"`, `"1.5s"`, `"1m30s"`, `"1h0m0s"`.
pub fn format_timeticks(ticks: u32) -> String {
    let total_ms = ticks as u64 * 10;
    if total_ms == 0 {
        return "0s".to_string();
    }
    if total_ms < 1000 {
        return format!("{}ms", total_ms);
    }
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) as f64 / 1000.0;
    let seconds = if seconds.fract() == 0.0 {
        format!("{}s", seconds as u64)
    } else {
        format!("{}s", seconds)
    };
    match (hours, minutes) {
        (0, 0) => seconds,
        (0, m) => format!("{}m{}", m, seconds),
        (h, m) => format!("{}h{}m{}", h, m, seconds),
    }
}
