//! OID translation through the local `snmptranslate` utility.
//!
//! Runs once before the model starts, so symbolic names resolve against the
//! MIBs installed on this host.

use crate::config::DaemonConfig;
use log::info;
use std::collections::{BTreeSet, HashMap};
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("failed to run snmptranslate: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("error translating OIDs: {0}")]
    Failed(String),

    #[error("unexpected snmptranslate output: {0}")]
    Malformed(String),
}

/// Translate mixed symbolic/numeric OIDs to numeric form.
pub fn translate_oids(oids: &[String]) -> Result<HashMap<String, String>, TranslateError> {
    info!("command to run: snmptranslate {} -On", oids.join(" "));
    let output = Command::new("snmptranslate").args(oids).arg("-On").output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        return Err(TranslateError::Failed(stderr));
    }

    parse_output(&String::from_utf8_lossy(&output.stdout), oids)
}

/// Map blank-line-separated `snmptranslate` records back onto their inputs.
fn parse_output(
    raw: &str,
    oids: &[String],
) -> Result<HashMap<String, String>, TranslateError> {
    let records: Vec<&str> = raw.split("\n\n").collect();
    if records.len() < oids.len() {
        return Err(TranslateError::Malformed(format!(
            "{} records for {} OIDs",
            records.len(),
            oids.len()
        )));
    }

    let mut out = HashMap::new();
    for (oid, record) in oids.iter().zip(records) {
        let translated = record.trim_matches(&[' ', '\n'][..]);
        if translated.is_empty() {
            return Err(TranslateError::Malformed(format!(
                "empty record for {}",
                oid
            )));
        }
        out.insert(oid.clone(), translated.to_string());
    }
    Ok(out)
}

/// Rewrite every channel OID in the configuration to numeric form.
pub fn translate_config(config: &mut DaemonConfig) -> Result<(), TranslateError> {
    let mut unique: BTreeSet<String> = BTreeSet::new();
    for device in config.devices.values() {
        for channel in &device.channels {
            unique.insert(channel.oid.clone());
        }
    }
    let oids: Vec<String> = unique.into_iter().collect();
    if oids.is_empty() {
        return Ok(());
    }

    let translated = translate_oids(&oids)?;
    for device in config.devices.values_mut() {
        for channel in &mut device.channels {
            if let Some(numeric) = translated.get(&channel.oid) {
                channel.oid = numeric.clone();
            }
        }
    }
    Ok(())
}
