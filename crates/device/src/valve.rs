//! Relay board driving the sprinkler solenoids. The `gpio` feature gates the
//! rppal driver; without it a mock board only tracks and logs state.

use anyhow::Result;
use std::collections::BTreeMap;
use tracing::{info, warn};

#[cfg(feature = "gpio")]
use anyhow::Context;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// GPIO relay board (Raspberry Pi)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
pub(crate) struct ValveBoard {
    pins: BTreeMap<String, OutputPin>,
    states: BTreeMap<String, bool>,
    active_low: bool,
}

#[cfg(feature = "gpio")]
impl ValveBoard {
    pub(crate) fn new(zone_pins: &[(String, u8)], active_low: bool) -> Result<Self> {
        let gpio = Gpio::new().context("opening gpio")?;
        let mut board = Self {
            pins: BTreeMap::new(),
            states: BTreeMap::new(),
            active_low,
        };

        for (zone, pin_num) in zone_pins {
            let pin = gpio
                .get(*pin_num)
                .with_context(|| format!("claiming gpio {pin_num} for {zone}"))?
                .into_output();
            board.pins.insert(zone.clone(), pin);
            board.states.insert(zone.clone(), false);
            info!(zone = %zone, gpio = pin_num, "relay registered");
        }

        // Fail-safe: every relay starts released.
        board.all_off();
        Ok(board)
    }

    /// Drive `zone`'s relay. Returns false for a zone this board does not
    /// know.
    pub(crate) fn set(&mut self, zone: &str, on: bool) -> bool {
        let Some(pin) = self.pins.get_mut(zone) else {
            warn!(zone, "unknown zone");
            return false;
        };
        // Active-low boards energise the coil on LOW.
        if on != self.active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
        self.states.insert(zone.to_string(), on);
        info!(zone, state = if on { "ON" } else { "OFF" }, "relay set");
        true
    }
}

// ---------------------------------------------------------------------------
// Mock relay board (no hardware)
// ---------------------------------------------------------------------------

#[cfg(not(feature = "gpio"))]
pub(crate) struct ValveBoard {
    states: BTreeMap<String, bool>,
}

#[cfg(not(feature = "gpio"))]
impl ValveBoard {
    pub(crate) fn new(zone_pins: &[(String, u8)], _active_low: bool) -> Result<Self> {
        let states = zone_pins
            .iter()
            .map(|(zone, pin)| {
                info!(zone = %zone, gpio = pin, "[mock-gpio] relay registered (not wired)");
                (zone.clone(), false)
            })
            .collect();
        Ok(Self { states })
    }

    pub(crate) fn set(&mut self, zone: &str, on: bool) -> bool {
        let Some(state) = self.states.get_mut(zone) else {
            warn!(zone, "[mock-gpio] unknown zone");
            return false;
        };
        *state = on;
        info!(zone, state = if on { "ON" } else { "OFF" }, "[mock-gpio] relay set");
        true
    }
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

impl ValveBoard {
    pub(crate) fn is_on(&self, zone: &str) -> Option<bool> {
        self.states.get(zone).copied()
    }

    /// Zone ids in sorted order.
    pub(crate) fn zones(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub(crate) fn all_off(&mut self) {
        let zones: Vec<String> = self.states.keys().cloned().collect();
        for zone in zones {
            self.set(&zone, false);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    fn board(zones: &[&str]) -> ValveBoard {
        let pins: Vec<(String, u8)> = zones
            .iter()
            .zip(17u8..)
            .map(|(z, p)| (z.to_string(), p))
            .collect();
        ValveBoard::new(&pins, true).unwrap()
    }

    #[test]
    fn new_registers_zones_released() {
        let b = board(&["zone2", "zone1"]);
        assert_eq!(b.zones().collect::<Vec<_>>(), ["zone1", "zone2"]);
        assert_eq!(b.is_on("zone1"), Some(false));
        assert_eq!(b.is_on("zone2"), Some(false));
    }

    #[test]
    fn set_on_then_off() {
        let mut b = board(&["zone1"]);
        assert!(b.set("zone1", true));
        assert_eq!(b.is_on("zone1"), Some(true));
        assert!(b.set("zone1", false));
        assert_eq!(b.is_on("zone1"), Some(false));
    }

    #[test]
    fn all_off_resets_everything() {
        let mut b = board(&["zone1", "zone2"]);
        b.set("zone1", true);
        b.set("zone2", true);
        b.all_off();
        assert_eq!(b.is_on("zone1"), Some(false));
        assert_eq!(b.is_on("zone2"), Some(false));
    }

    #[test]
    fn unknown_zone_is_rejected_without_new_entry() {
        let mut b = board(&["zone1"]);
        assert!(!b.set("zone9", true));
        assert_eq!(b.is_on("zone9"), None);
        assert_eq!(b.zones().count(), 1);
    }
}
