//! Configuration tree: one JSON document, optionally merged over device
//! templates, validated and defaulted into plain data the model consumes.

use crate::snmp::SnmpVersion;
use log::warn;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Default poll interval for channels (ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default channel control type
pub const DEFAULT_CONTROL_TYPE: &str = "value";

/// Default SNMP timeout (s)
pub const DEFAULT_SNMP_TIMEOUT_S: u64 = 5;

/// Default number of poll workers
pub const DEFAULT_NUM_WORKERS: usize = 4;

const FLOAT_EPS: f64 = 0.00001;

type JsonMap = Map<String, Value>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't parse config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{key} must be {expected}, {found} given")]
    FieldType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{0} is not present")]
    MissingField(String),

    #[error("devices list is empty")]
    NoDevices,

    #[error("channels list is empty for {0}")]
    NoChannels(String),

    #[error("device address collision on {0}")]
    DeviceCollision(String),

    #[error("channel name collision: {0}")]
    ChannelCollision(String),

    #[error("no such template: {0}")]
    UnknownTemplate(String),

    #[error("template error in {file}: {message}")]
    Template { file: String, message: String },

    #[error("scale can be applied only to numeric control types")]
    ScaleOnText,

    #[error("{0}")]
    Invalid(String),
}

/// Channel value converter, applied after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Conv {
    AsIs,
    Scale(f64),
}

impl Conv {
    pub fn apply(&self, value: &str) -> String {
        match self {
            Conv::AsIs => value.to_string(),
            Conv::Scale(factor) => {
                let parsed: f64 = match value.parse() {
                    Ok(v) => v,
                    Err(_) => {
                        warn!("can't convert numeric value: {}", value);
                        return value.to_string();
                    }
                };
                // scale of 1 is identity
                if (factor - 1.0).abs() < FLOAT_EPS {
                    return value.to_string();
                }
                format!("{:.1}", parsed * factor)
            }
        }
    }
}

pub fn is_numeric_control_type(control_type: &str) -> bool {
    control_type != "text"
}

/// One pollable SNMP endpoint on one device.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub name: String,
    pub oid: String,
    pub control_type: String,
    pub units: String,
    /// Poll interval in milliseconds.
    pub poll_interval: u64,
    pub conv: Conv,
    /// Control layout hint, assigned in configuration order.
    pub order: i32,
    /// Arena key of the owning device.
    pub device_id: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            oid: String::new(),
            control_type: DEFAULT_CONTROL_TYPE.to_string(),
            units: String::new(),
            poll_interval: DEFAULT_POLL_INTERVAL_MS,
            conv: Conv::AsIs,
            order: 0,
            device_id: String::new(),
        }
    }
}

/// Identity and transport parameters of one SNMP endpoint.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub name: String,
    pub id: String,
    pub address: String,
    pub device_type: String,
    pub community: String,
    pub oid_prefix: String,
    pub snmp_version: SnmpVersion,
    /// SNMP timeout in seconds.
    pub snmp_timeout: u64,
    /// Default poll interval for this device's channels (ms).
    pub poll_interval: u64,
    /// Channels in configuration order.
    pub channels: Vec<ChannelConfig>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            id: String::new(),
            address: String::new(),
            device_type: String::new(),
            community: String::new(),
            oid_prefix: String::new(),
            snmp_version: SnmpVersion::V2c,
            snmp_timeout: DEFAULT_SNMP_TIMEOUT_S,
            poll_interval: DEFAULT_POLL_INTERVAL_MS,
            channels: Vec::new(),
        }
    }
}

impl DeviceConfig {
    /// Device identity from address and community.
    pub fn generate_id(&self) -> String {
        if self.community.is_empty() {
            self.address.clone()
        } else {
            format!("{}_{}", self.address, self.community)
        }
    }

    fn parse_channels(&mut self, entries: &[Value]) -> Result<(), ConfigError> {
        for entry in entries {
            let map = entry.as_object().ok_or_else(|| {
                ConfigError::Invalid("channel config must be an object".to_string())
            })?;
            self.parse_channel_entry(map)?;
        }
        Ok(())
    }

    fn parse_channel_entry(&mut self, channel: &JsonMap) -> Result<(), ConfigError> {
        if let Some(false) = opt_bool(channel, "enabled")? {
            return Ok(());
        }

        let mut ch = ChannelConfig {
            poll_interval: self.poll_interval,
            device_id: self.id.clone(),
            ..ChannelConfig::default()
        };

        ch.name = required_str(channel, "name")?;
        ch.oid = required_str(channel, "oid")?;

        // prefix applies only to MIB names without one
        if !self.oid_prefix.is_empty() && !ch.oid.starts_with('.') && !ch.oid.contains("::") {
            ch.oid = format!("{}::{}", self.oid_prefix, ch.oid);
        }

        if let Some(t) = opt_str(channel, "control_type")? {
            ch.control_type = t;
        }

        if channel.contains_key("scale") {
            if !is_numeric_control_type(&ch.control_type) {
                return Err(ConfigError::ScaleOnText);
            }
            if let Some(scale) = opt_f64(channel, "scale")? {
                ch.conv = Conv::Scale(scale);
            }
        }

        if let Some(p) = opt_u64(channel, "poll_interval")? {
            ch.poll_interval = p;
        }

        if let Some(u) = opt_str(channel, "units")? {
            ch.units = u;
        }
        if !ch.units.is_empty() && ch.control_type != "value" {
            warn!("units given for non-'value' channel {}, skipping it", ch.name);
            ch.units.clear();
        }

        ch.order = self.channels.len() as i32 + 1;
        self.channels.push(ch);
        Ok(())
    }
}

/// Root of the configuration tree.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub debug: bool,
    pub num_workers: usize,
    /// Devices keyed by id.
    pub devices: HashMap<String, DeviceConfig>,
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    debug: bool,
    #[serde(default = "default_num_workers")]
    num_workers: usize,
    #[serde(default)]
    devices: Vec<JsonMap>,
}

fn default_num_workers() -> usize {
    DEFAULT_NUM_WORKERS
}

impl DaemonConfig {
    pub fn from_file(path: &Path, templates_dir: &Path) -> Result<Self, ConfigError> {
        let file = fs::File::open(path)?;
        Self::from_reader(io::BufReader::new(file), templates_dir)
    }

    pub fn from_reader(
        input: impl io::Read,
        templates_dir: &Path,
    ) -> Result<Self, ConfigError> {
        let templates = DeviceTemplates::load(templates_dir)?;
        let raw: RawConfig = serde_json::from_reader(input)?;
        if raw.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }

        let mut config = DaemonConfig {
            debug: raw.debug,
            num_workers: raw.num_workers,
            devices: HashMap::new(),
        };
        for entry in &raw.devices {
            config.parse_device_entry(entry, &templates)?;
        }
        if config.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }
        Ok(config)
    }

    fn parse_device_entry(
        &mut self,
        dev_config: &JsonMap,
        templates: &DeviceTemplates,
    ) -> Result<(), ConfigError> {
        if let Some(false) = opt_bool(dev_config, "enabled")? {
            return Ok(());
        }

        // device_type is optional; without it there is no template to apply
        let mut entry = JsonMap::new();
        if let Some(dev_type) = opt_str(dev_config, "device_type")? {
            entry = templates.entry(&dev_type)?;
        }
        let entry = overlay_device_entry(entry, dev_config)?;

        let mut device = DeviceConfig {
            address: required_str(&entry, "address")?,
            ..DeviceConfig::default()
        };
        if let Some(c) = opt_str(&entry, "community")? {
            device.community = c;
        }

        device.name = format!("SNMP {}", device.generate_id());
        device.id = format!("snmp_{}", device.generate_id());

        if self.devices.contains_key(&device.id) {
            return Err(ConfigError::DeviceCollision(device.id));
        }

        if let Some(n) = opt_str(&entry, "name")? {
            device.name = n;
        }
        if let Some(i) = opt_str(&entry, "id")? {
            device.id = i;
        }
        if let Some(t) = opt_str(&entry, "device_type")? {
            device.device_type = t;
        }
        if let Some(v) = opt_version(&entry, "snmp_version")? {
            device.snmp_version = v;
        }
        if let Some(t) = opt_u64(&entry, "snmp_timeout")? {
            device.snmp_timeout = t;
        }
        if let Some(p) = opt_str(&entry, "oid_prefix")? {
            device.oid_prefix = p;
        }
        if let Some(p) = opt_u64(&entry, "poll_interval")? {
            device.poll_interval = p;
        }

        match entry.get("channels") {
            Some(Value::Array(items)) => device.parse_channels(items)?,
            Some(other) => {
                return Err(ConfigError::FieldType {
                    key: "channels".to_string(),
                    expected: "array of objects",
                    found: json_type_name(other),
                })
            }
            None => {
                return Err(ConfigError::Invalid(format!(
                    "channels list is not present for {}",
                    device.id
                )))
            }
        }
        if device.channels.is_empty() {
            return Err(ConfigError::NoChannels(device.id));
        }

        self.devices.insert(device.id.clone(), device);
        Ok(())
    }
}

/// Device template storage, loaded from `config-*.json` files.
struct DeviceTemplates {
    templates: HashMap<String, JsonMap>,
}

impl DeviceTemplates {
    fn load(dir: &Path) -> Result<Self, ConfigError> {
        let entries = fs::read_dir(dir).map_err(|e| {
            ConfigError::Invalid(format!(
                "failed to read templates dir {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut templates = HashMap::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !(file_name.starts_with("config-") && file_name.ends_with(".json")) {
                continue;
            }

            let data = fs::read_to_string(entry.path())?;
            let json: Value =
                serde_json::from_str(&data).map_err(|e| ConfigError::Template {
                    file: file_name.clone(),
                    message: format!("invalid JSON: {}", e),
                })?;
            let map = json.as_object().cloned().ok_or_else(|| ConfigError::Template {
                file: file_name.clone(),
                message: "template must be an object".to_string(),
            })?;

            match map.get("device_type") {
                Some(Value::String(dev_type)) => {
                    templates.insert(dev_type.clone(), map);
                }
                _ => {
                    return Err(ConfigError::Template {
                        file: file_name,
                        message: "device_type is not present or not a string".to_string(),
                    })
                }
            }
        }
        Ok(Self { templates })
    }

    fn entry(&self, dev_type: &str) -> Result<JsonMap, ConfigError> {
        self.templates
            .get(dev_type)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownTemplate(dev_type.to_string()))
    }
}

/// Lay the device entry over its template. Scalar fields override wholesale;
/// channel lists merge by channel name with device fields winning per-field.
fn overlay_device_entry(template: JsonMap, device: &JsonMap) -> Result<JsonMap, ConfigError> {
    let mut merged = template;
    for (key, value) in device {
        if key != "channels" {
            merged.insert(key.clone(), value.clone());
        }
    }

    let mut channels = channel_list(merged.get("channels"))?;
    for (name, dev_channel) in channel_list(device.get("channels"))? {
        if let Some((_, tpl_channel)) = channels.iter_mut().find(|(n, _)| *n == name) {
            for (key, value) in dev_channel {
                tpl_channel.insert(key, value);
            }
        } else {
            channels.push((name, dev_channel));
        }
    }

    let list: Vec<Value> = channels
        .into_iter()
        .map(|(_, map)| Value::Object(map))
        .collect();
    merged.insert("channels".to_string(), Value::Array(list));
    Ok(merged)
}

/// Index a raw channel list by name, erroring on duplicates.
fn channel_list(entry: Option<&Value>) -> Result<Vec<(String, JsonMap)>, ConfigError> {
    let items = match entry {
        None => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(ConfigError::FieldType {
                key: "channels".to_string(),
                expected: "array of objects",
                found: json_type_name(other),
            })
        }
    };

    let mut out: Vec<(String, JsonMap)> = Vec::new();
    for item in items {
        let map = item.as_object().ok_or_else(|| {
            ConfigError::Invalid("channel config must be an object".to_string())
        })?;
        let name = required_str(map, "name")?;
        if out.iter().any(|(n, _)| *n == name) {
            return Err(ConfigError::ChannelCollision(name));
        }
        out.push((name, map.clone()));
    }
    Ok(out)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn opt_str(map: &JsonMap, key: &str) -> Result<Option<String>, ConfigError> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ConfigError::FieldType {
            key: key.to_string(),
            expected: "string",
            found: json_type_name(other),
        }),
    }
}

fn required_str(map: &JsonMap, key: &str) -> Result<String, ConfigError> {
    opt_str(map, key)?.ok_or_else(|| ConfigError::MissingField(key.to_string()))
}

fn opt_bool(map: &JsonMap, key: &str) -> Result<Option<bool>, ConfigError> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(ConfigError::FieldType {
            key: key.to_string(),
            expected: "bool",
            found: json_type_name(other),
        }),
    }
}

fn opt_u64(map: &JsonMap, key: &str) -> Result<Option<u64>, ConfigError> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_u64() {
                Ok(Some(v))
            } else {
                match n.as_f64() {
                    Some(f) if f >= 0.0 => Ok(Some(f as u64)),
                    _ => Err(ConfigError::FieldType {
                        key: key.to_string(),
                        expected: "non-negative integer",
                        found: "number",
                    }),
                }
            }
        }
        Some(other) => Err(ConfigError::FieldType {
            key: key.to_string(),
            expected: "non-negative integer",
            found: json_type_name(other),
        }),
    }
}

fn opt_f64(map: &JsonMap, key: &str) -> Result<Option<f64>, ConfigError> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(ConfigError::FieldType {
            key: key.to_string(),
            expected: "number",
            found: json_type_name(other),
        }),
    }
}

fn opt_version(map: &JsonMap, key: &str) -> Result<Option<SnmpVersion>, ConfigError> {
    match opt_str(map, key)? {
        None => Ok(None),
        Some(s) => match s.as_str() {
            "1" => Ok(Some(SnmpVersion::V1)),
            "2c" => Ok(Some(SnmpVersion::V2c)),
            other => Err(ConfigError::Invalid(format!(
                "SNMP version must be either 1 or 2c, {} given",
                other
            ))),
        },
    }
}
