//! Human-readable rendering of distances and durations

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Kilometers per mile
pub const KM_PER_MILE: f64 = 1.60934;

/// Unit system used when rendering range values
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnitSystem {
    #[serde(rename = "miles", alias = "mi")]
    Miles,
    #[default]
    #[serde(rename = "km", alias = "kilometers")]
    Kilometers,
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UnitSystem::Miles => f.write_str("miles"),
            UnitSystem::Kilometers => f.write_str("km"),
        }
    }
}

/// Renders a distance given in miles under the configured unit system
///
/// Miles are rounded to whole miles. Kilometers are converted from the
/// unrounded value with [`KM_PER_MILE`] and rounded to one decimal place by
/// the float formatter, which always rounds the exact binary value to nearest.
pub fn format_distance(units: UnitSystem, miles: f64) -> String {
    match units {
        UnitSystem::Miles => format!("{} mi", miles.round() as i64),
        UnitSystem::Kilometers => format!("{:.1} km", miles * KM_PER_MILE),
    }
}

/// Renders a duration the way Go's `time.Duration` prints whole seconds
/// (`4h30m0s`, `45m0s`, `0s`)
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miles_are_rendered_without_conversion() {
        assert_eq!(format_distance(UnitSystem::Miles, 0.0), "0 mi");
        assert_eq!(format_distance(UnitSystem::Miles, 84.0), "84 mi");
        assert_eq!(format_distance(UnitSystem::Miles, 71.46), "71 mi");
        assert_eq!(format_distance(UnitSystem::Miles, 65.7), "66 mi");
        assert_eq!(format_distance(UnitSystem::Miles, -3.0), "-3 mi");
    }

    #[test]
    fn kilometers_are_converted_to_one_decimal() {
        assert_eq!(format_distance(UnitSystem::Kilometers, 0.0), "0.0 km");
        assert_eq!(format_distance(UnitSystem::Kilometers, 1.0), "1.6 km");
        assert_eq!(format_distance(UnitSystem::Kilometers, 50.0), "80.5 km");
        assert_eq!(format_distance(UnitSystem::Kilometers, 100.0), "160.9 km");
        assert_eq!(format_distance(UnitSystem::Kilometers, 84.0), "135.2 km");
    }

    #[test]
    fn kilometer_rendering_matches_factor_for_a_range_of_values() {
        for whole in 0..500 {
            let miles = whole as f64 + 0.25;
            let expected = format!("{:.1} km", miles * 1.60934);
            assert_eq!(format_distance(UnitSystem::Kilometers, miles), expected);
        }
    }

    #[test]
    fn durations_use_go_style_labels() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_secs(45 * 60)), "45m0s");
        assert_eq!(format_duration(Duration::from_secs(4 * 3600 + 30 * 60)), "4h30m0s");
        assert_eq!(format_duration(Duration::from_secs(18 * 3600)), "18h0m0s");
    }

    #[test]
    fn unit_system_parses_from_config_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            units: UnitSystem,
        }

        let parse = |s: &str| toml::from_str::<Wrapper>(&format!("units = \"{}\"", s)).map(|w| w.units);
        assert_eq!(parse("miles").ok(), Some(UnitSystem::Miles));
        assert_eq!(parse("mi").ok(), Some(UnitSystem::Miles));
        assert_eq!(parse("km").ok(), Some(UnitSystem::Kilometers));
        assert_eq!(parse("kilometers").ok(), Some(UnitSystem::Kilometers));
        assert!(parse("furlongs").is_err());
    }
}
