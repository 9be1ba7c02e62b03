//! Unit normalization (spec §4.2). Converts SignalK's native SI values to
//! the user's preferred units on ingest, and back for outbound round-trips.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Length,
    Speed,
    Temperature,
    Pressure,
    Angle,
    Volume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    M,
    Ft,
    Nm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedUnit {
    #[serde(rename = "m/s")]
    MetersPerSecond,
    #[serde(rename = "kts")]
    Knots,
    #[serde(rename = "km/h")]
    KilometersPerHour,
    #[serde(rename = "mph")]
    MilesPerHour,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    #[serde(rename = "°C")]
    Celsius,
    #[serde(rename = "°F")]
    Fahrenheit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PressureUnit {
    Pa,
    #[serde(rename = "hPa")]
    HPa,
    #[serde(rename = "inHg")]
    InHg,
    Mb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AngleUnit {
    Rad,
    Deg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeUnit {
    L,
    Gal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPreferences {
    pub length: LengthUnit,
    pub speed: SpeedUnit,
    pub temperature: TemperatureUnit,
    pub pressure: PressureUnit,
    pub angle: AngleUnit,
    pub volume: VolumeUnit,
}

impl UnitPreferences {
    pub const IMPERIAL: Self = Self {
        length: LengthUnit::Ft,
        speed: SpeedUnit::Knots,
        temperature: TemperatureUnit::Fahrenheit,
        pressure: PressureUnit::InHg,
        angle: AngleUnit::Deg,
        volume: VolumeUnit::Gal,
    };

    pub const METRIC: Self = Self {
        length: LengthUnit::M,
        speed: SpeedUnit::Knots,
        temperature: TemperatureUnit::Celsius,
        pressure: PressureUnit::HPa,
        angle: AngleUnit::Deg,
        volume: VolumeUnit::L,
    };
}

impl Default for UnitPreferences {
    fn default() -> Self {
        Self::METRIC
    }
}

const ROUND_DP: f64 = 1_000_000.0;

fn round6(v: f64) -> f64 {
    (v * ROUND_DP).round() / ROUND_DP
}

/// Converts a value in SignalK's native SI unit for `dim` into the unit the
/// preferences specify, deterministic to six decimal places. `None` passes
/// through.
pub fn normalize(dim: Dimension, si_value: Option<f64>, prefs: &UnitPreferences) -> (Option<f64>, &'static str) {
    let Some(v) = si_value else {
        return (None, unit_label(dim, prefs));
    };
    let converted = match dim {
        Dimension::Length => length_from_m(v, prefs.length),
        Dimension::Speed => speed_from_mps(v, prefs.speed),
        Dimension::Temperature => temperature_from_k(v, prefs.temperature),
        Dimension::Pressure => pressure_from_pa(v, prefs.pressure),
        Dimension::Angle => match prefs.angle {
            AngleUnit::Rad => normalize_radians(v),
            AngleUnit::Deg => normalize_degrees(v.to_degrees()),
        },
        Dimension::Volume => v, // SignalK has no native volume feed in this pipeline
    };
    (Some(round6(converted)), unit_label(dim, prefs))
}

fn unit_label(dim: Dimension, prefs: &UnitPreferences) -> &'static str {
    match dim {
        Dimension::Length => match prefs.length {
            LengthUnit::M => "m",
            LengthUnit::Ft => "ft",
            LengthUnit::Nm => "nm",
        },
        Dimension::Speed => match prefs.speed {
            SpeedUnit::MetersPerSecond => "m/s",
            SpeedUnit::Knots => "kts",
            SpeedUnit::KilometersPerHour => "km/h",
            SpeedUnit::MilesPerHour => "mph",
        },
        Dimension::Temperature => match prefs.temperature {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        },
        Dimension::Pressure => match prefs.pressure {
            PressureUnit::Pa => "Pa",
            PressureUnit::HPa => "hPa",
            PressureUnit::InHg => "inHg",
            PressureUnit::Mb => "mb",
        },
        Dimension::Angle => match prefs.angle {
            AngleUnit::Rad => "rad",
            AngleUnit::Deg => "deg",
        },
        Dimension::Volume => match prefs.volume {
            VolumeUnit::L => "L",
            VolumeUnit::Gal => "gal",
        },
    }
}

fn length_from_m(m: f64, unit: LengthUnit) -> f64 {
    match unit {
        LengthUnit::M => m,
        LengthUnit::Ft => m * 3.28084,
        LengthUnit::Nm => m / 1852.0,
    }
}

pub fn length_to_m(value: f64, unit: LengthUnit) -> f64 {
    match unit {
        LengthUnit::M => value,
        LengthUnit::Ft => value / 3.28084,
        LengthUnit::Nm => value * 1852.0,
    }
}

fn speed_from_mps(mps: f64, unit: SpeedUnit) -> f64 {
    match unit {
        SpeedUnit::MetersPerSecond => mps,
        SpeedUnit::Knots => mps * 1.943_844,
        SpeedUnit::KilometersPerHour => mps * 3.6,
        SpeedUnit::MilesPerHour => mps * 2.236_936,
    }
}

pub fn speed_to_mps(value: f64, unit: SpeedUnit) -> f64 {
    match unit {
        SpeedUnit::MetersPerSecond => value,
        SpeedUnit::Knots => value / 1.943_844,
        SpeedUnit::KilometersPerHour => value / 3.6,
        SpeedUnit::MilesPerHour => value / 2.236_936,
    }
}

/// Converts a speed already expressed in `unit` into knots, for rules that
/// compare against a knot-denominated threshold (spec §4.6) regardless of
/// the display unit a stored value happens to be in.
pub fn speed_to_knots(value: f64, unit: SpeedUnit) -> f64 {
    speed_from_mps(speed_to_mps(value, unit), SpeedUnit::Knots)
}

/// Maps a unit label as stored on a [`crate::state::TypedValue`] (e.g.
/// `"m/s"`, `"kts"`) back to the [`SpeedUnit`] it came from.
pub fn speed_unit_from_label(label: &str) -> Option<SpeedUnit> {
    match label {
        "m/s" => Some(SpeedUnit::MetersPerSecond),
        "kts" => Some(SpeedUnit::Knots),
        "km/h" => Some(SpeedUnit::KilometersPerHour),
        "mph" => Some(SpeedUnit::MilesPerHour),
        _ => None,
    }
}

fn temperature_from_k(kelvin: f64, unit: TemperatureUnit) -> f64 {
    let celsius = kelvin - 273.15;
    match unit {
        TemperatureUnit::Celsius => celsius,
        TemperatureUnit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
    }
}

fn pressure_from_pa(pa: f64, unit: PressureUnit) -> f64 {
    match unit {
        PressureUnit::Pa => pa,
        PressureUnit::HPa => pa / 100.0,
        PressureUnit::Mb => pa / 100.0,
        PressureUnit::InHg => pa / 3386.39,
    }
}

/// Normalize radians to [0, 2π).
pub fn normalize_radians(rad: f64) -> f64 {
    let two_pi = std::f64::consts::PI * 2.0;
    let r = rad % two_pi;
    if r < 0.0 {
        r + two_pi
    } else {
        r
    }
}

/// Normalize degrees to [0, 360).
pub fn normalize_degrees(deg: f64) -> f64 {
    let d = deg % 360.0;
    if d < 0.0 {
        d + 360.0
    } else {
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_within_tolerance() {
        let prefs = UnitPreferences::IMPERIAL;
        let si = 42.7_f64;
        let (converted, _) = normalize(Dimension::Length, Some(si), &prefs);
        let back = length_to_m(converted.unwrap(), prefs.length);
        assert!((back - si).abs() < 1e-6);
    }

    #[test]
    fn angle_normalization_bounds() {
        assert!((0.0..360.0).contains(&normalize_degrees(-10.0)));
        assert!((0.0..360.0).contains(&normalize_degrees(725.0)));
        let two_pi = std::f64::consts::PI * 2.0;
        assert!((0.0..two_pi).contains(&normalize_radians(-0.1)));
        assert!((0.0..two_pi).contains(&normalize_radians(two_pi + 0.1)));
    }

    #[test]
    fn null_passes_through() {
        let prefs = UnitPreferences::METRIC;
        let (v, _) = normalize(Dimension::Speed, None, &prefs);
        assert_eq!(v, None);
    }
}
