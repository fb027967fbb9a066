//! JSON config file loading and validation for the application settings and
//! the zone/schedule map.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::schedule::parse_start_time;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub app_config: AppConfig,
    #[serde(default)]
    pub zone_list: BTreeMap<String, ZoneEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub debug_level: String,
    #[serde(default)]
    pub dry_run: bool,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneEntry {
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub schedule: Vec<ScheduleItem>,
}

/// One watering window.
///
/// `weekdays` is a bit mask with Sunday at bit 0 and Saturday at bit 6;
/// bit 7 is unused. `0b0010_1010` enables Monday, Wednesday and Friday.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleItem {
    pub start_time: String,
    pub duration_minutes: u32,
    pub weekdays: u8,
}

// ---------------------------------------------------------------------------
// Log level
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Map `debugLevel` onto a tracing filter directive. Unknown values fall
    /// back to `info`.
    pub fn log_directive(&self) -> &'static str {
        match self.debug_level.to_uppercase().as_str() {
            "DEBUG" => "debug",
            "INFO" => "info",
            "WARNING" | "WARN" => "warn",
            "ERROR" => "error",
            _ => "info",
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_app(&mut errors);
        self.validate_zones(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_app(&self, errors: &mut Vec<String>) {
        let app = &self.app_config;
        if app.mqtt_broker.trim().is_empty() {
            errors.push("appConfig: mqttBroker is empty".to_string());
        }
        if app.mqtt_port == 0 {
            errors.push("appConfig: mqttPort must be non-zero".to_string());
        }
    }

    fn validate_zones(&self, errors: &mut Vec<String>) {
        for (zone_id, zone) in &self.zone_list {
            if zone_id.trim().is_empty() {
                errors.push("zoneList: zone id is empty".to_string());
            }

            for (i, item) in zone.schedule.iter().enumerate() {
                let ctx = format!("zone '{zone_id}' schedule[{i}]");

                if item.duration_minutes == 0 {
                    errors.push(format!("{ctx}: durationMinutes must be positive"));
                }
                if item.weekdays & 0x80 != 0 {
                    errors.push(format!(
                        "{ctx}: weekdays {:#010b} sets unused bit 7",
                        item.weekdays
                    ));
                }
            }
        }
    }

    /// Warn about schedule items that will never fire. These are not fatal:
    /// the scheduler keeps retrying them and logs each failed parse.
    fn warn_unusable_items(&self) {
        for (zone_id, zone) in &self.zone_list {
            for (i, item) in zone.schedule.iter().enumerate() {
                if let Err(e) = parse_start_time(&item.start_time) {
                    warn!(zone = %zone_id, index = i, "schedule item will never fire: {e}");
                }
                if item.weekdays == 0 {
                    warn!(zone = %zone_id, index = i, "schedule item has no weekdays enabled");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Parse and validate config JSON.
pub fn parse(contents: &str) -> Result<Config> {
    let config: Config = serde_json::from_str(contents).context("failed to parse config json")?;
    config.validate()?;
    Ok(config)
}

/// Read, parse, and validate a JSON config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    parse(&contents).with_context(|| format!("invalid config: {path}"))
}

impl Config {
    /// Log a summary plus any schedule items that can never fire. Called once
    /// logging is up, since the log level itself comes from the config.
    pub fn log_summary(&self) {
        info!(
            zones = self.zone_list.len(),
            items = self
                .zone_list
                .values()
                .map(|z| z.schedule.len())
                .sum::<usize>(),
            dry_run = self.app_config.dry_run,
            "config loaded"
        );
        self.warn_unusable_items();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
