//! Device-reported sensor metrics.
//!
//! Devices may append raw readings to their request:
//!
//! | Parameter | Meaning | Output |
//! |-----------|---------|--------|
//! | `batt` | Battery voltage | `batt: {v, p, c}` |
//! | `batt_min` / `batt_max` | Voltage range (default 3.4 / 4.2) | |
//! | `batt_chg` | `1` while charging | |
//! | `i_temp` / `e_temp` | Internal/external temperature, `f` or `c` suffix | `{f, c}` |
//! | `i_hum` / `e_hum` | Relative humidity | number |
//! | `i_pres` / `e_pres` | Pressure | number |
//! | `wifi_dbm` | WiFi signal strength | `wifi: {dbm, b}` |
//!
//! The structured result is passed to the screen as `metrics` context.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

/// Default voltage of an empty LiPo cell.
pub const BATTERY_MIN_V: f64 = 3.4;

/// Default voltage of a full LiPo cell.
pub const BATTERY_MAX_V: f64 = 4.2;

const PLAIN_METRICS: &[&str] = &["i_hum", "e_hum", "i_pres", "e_pres"];
const TEMPERATURE_METRICS: &[&str] = &["i_temp", "e_temp"];

/// Build the metrics context from raw request parameters.
pub fn collect(params: &HashMap<String, String>) -> Map<String, Value> {
    let mut out = Map::new();
    let number = |name: &str| params.get(name).and_then(|v| v.trim().parse::<f64>().ok());

    if let Some(voltage) = number("batt") {
        let min = number("batt_min").unwrap_or(BATTERY_MIN_V);
        let max = number("batt_max").unwrap_or(BATTERY_MAX_V);
        let charging = params
            .get("batt_chg")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .is_some_and(|v| v != 0);
        out.insert(
            "batt".to_string(),
            json!({
                "v": voltage,
                "p": battery_fraction(voltage, min, max),
                "c": charging,
            }),
        );
    }

    for name in TEMPERATURE_METRICS {
        if let Some(temps) = params.get(*name).and_then(|raw| temperature(raw)) {
            out.insert(name.to_string(), temps);
        }
    }

    for name in PLAIN_METRICS {
        if let Some(value) = number(name) {
            out.insert(name.to_string(), json!(value));
        }
    }

    if let Some(dbm) = number("wifi_dbm") {
        out.insert(
            "wifi".to_string(),
            json!({ "dbm": dbm, "b": wifi_bars(dbm) }),
        );
    }

    out
}

/// Charge level between 0.0 and 1.0 for a voltage within `[min, max]`.
///
/// ```
/// use fruitstand::metrics::battery_fraction;
///
/// assert_eq!(battery_fraction(4.2, 3.4, 4.2), 1.0);
/// assert_eq!(battery_fraction(3.0, 3.4, 4.2), 0.0);
/// assert!((battery_fraction(3.8, 3.4, 4.2) - 0.5).abs() < 1e-9);
/// ```
pub fn battery_fraction(voltage: f64, min: f64, max: f64) -> f64 {
    if max <= min {
        return if voltage >= max { 1.0 } else { 0.0 };
    }
    ((voltage - min) / (max - min)).clamp(0.0, 1.0)
}

/// Parse a temperature like `72`, `72f` or `21.5c` into both scales.
fn temperature(raw: &str) -> Option<Value> {
    let raw = raw.trim().to_lowercase();
    let (number, unit) = match raw.chars().last()? {
        'f' => (&raw[..raw.len() - 1], 'f'),
        'c' => (&raw[..raw.len() - 1], 'c'),
        _ => (raw.as_str(), 'f'),
    };
    let value: f64 = number.trim().parse().ok()?;
    let (f, c) = if unit == 'c' {
        (value / 5.0 * 9.0 + 32.0, value)
    } else {
        (value, (value - 32.0) * 5.0 / 9.0)
    };
    Some(json!({ "f": f, "c": c }))
}

/// Signal bars from -1 (no usable signal) to 4.
pub fn wifi_bars(dbm: f64) -> i32 {
    if dbm >= -30.0 {
        4
    } else if dbm >= -67.0 {
        3
    } else if dbm >= -70.0 {
        2
    } else if dbm >= -80.0 {
        1
    } else if dbm >= -90.0 {
        0
    } else {
        -1
    }
}
