//! Closed enumeration of canonical state paths (spec §9 Design Note:
//! "model canonical paths with a closed enumeration plus a small registry
//! mapping each enum to a typed accessor"). The RFC-6902 patch form (slash
//! path) remains the on-wire currency and is produced separately by the
//! generic structural diff in [`super::document`].

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};
use crate::units::Dimension;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalPath {
    NavigationPosition,
    NavigationSpeedOverGround,
    NavigationCourseOverGroundTrue,
    NavigationHeadingTrue,
    NavigationHeadingMagnetic,
    NavigationVariation,
    EnvironmentDepth,
    EnvironmentWindSpeedApparent,
    EnvironmentWindAngleApparent,
    EnvironmentWindDirectionTrue,
    EnvironmentWindSpeedTrue,
    EnvironmentTemperatureWater,
    EnvironmentTemperatureOutside,
    EnvironmentPressure,
    VesselName,
    VesselMmsi,
}

impl CanonicalPath {
    /// Validate and resolve a dotted canonical path string.
    ///
    /// Returns `Err(InvalidPath)` only for a malformed path (an empty
    /// segment). A well-formed path this registry doesn't recognize is
    /// dropped silently per spec §3 ("Unknown inbound paths are dropped")
    /// and yields `Ok(None)`.
    pub fn parse(dotted: &str) -> Result<Option<CanonicalPath>> {
        if dotted.is_empty() || dotted.split('.').any(|seg| seg.is_empty()) {
            return Err(RelayError::InvalidPath(dotted.to_string()));
        }
        Ok(Self::from_canonical_str(dotted))
    }

    fn from_canonical_str(dotted: &str) -> Option<CanonicalPath> {
        use CanonicalPath::*;
        Some(match dotted {
            "navigation.position" => NavigationPosition,
            "navigation.speedOverGround" => NavigationSpeedOverGround,
            "navigation.courseOverGroundTrue" => NavigationCourseOverGroundTrue,
            "navigation.headingTrue" => NavigationHeadingTrue,
            "navigation.headingMagnetic" => NavigationHeadingMagnetic,
            "navigation.variation" => NavigationVariation,
            "environment.depth" => EnvironmentDepth,
            "environment.windSpeedApparent" => EnvironmentWindSpeedApparent,
            "environment.windAngleApparent" => EnvironmentWindAngleApparent,
            "environment.windDirectionTrue" => EnvironmentWindDirectionTrue,
            "environment.windSpeedTrue" => EnvironmentWindSpeedTrue,
            "environment.temperatureWater" => EnvironmentTemperatureWater,
            "environment.temperatureOutside" => EnvironmentTemperatureOutside,
            "environment.pressure" => EnvironmentPressure,
            "vessel.name" => VesselName,
            "vessel.mmsi" => VesselMmsi,
            _ => return None,
        })
    }

    /// Resolve an upstream SignalK delta path (spec §4.3) to a canonical
    /// path. `None` means "no mapping" — the value is dropped, not queued.
    pub fn from_signalk(sk_path: &str) -> Option<CanonicalPath> {
        use CanonicalPath::*;
        Some(match sk_path {
            "navigation.position" => NavigationPosition,
            "navigation.speedOverGround" => NavigationSpeedOverGround,
            "navigation.courseOverGroundTrue" => NavigationCourseOverGroundTrue,
            "navigation.headingTrue" => NavigationHeadingTrue,
            "navigation.headingMagnetic" => NavigationHeadingMagnetic,
            "navigation.magneticVariation" => NavigationVariation,
            "environment.depth.belowTransducer" | "environment.depth.belowSurface" => EnvironmentDepth,
            "environment.wind.speedApparent" => EnvironmentWindSpeedApparent,
            "environment.wind.angleApparent" => EnvironmentWindAngleApparent,
            "environment.wind.directionTrue" => EnvironmentWindDirectionTrue,
            "environment.wind.speedTrue" => EnvironmentWindSpeedTrue,
            "environment.water.temperature" => EnvironmentTemperatureWater,
            "environment.outside.temperature" => EnvironmentTemperatureOutside,
            "environment.outside.pressure" => EnvironmentPressure,
            "name" => VesselName,
            "mmsi" => VesselMmsi,
            _ => return None,
        })
    }

    pub fn dimension(&self) -> Option<Dimension> {
        use CanonicalPath::*;
        match self {
            NavigationPosition => None,
            NavigationSpeedOverGround | EnvironmentWindSpeedApparent | EnvironmentWindSpeedTrue => {
                Some(Dimension::Speed)
            }
            NavigationCourseOverGroundTrue
            | NavigationHeadingTrue
            | NavigationHeadingMagnetic
            | NavigationVariation
            | EnvironmentWindAngleApparent
            | EnvironmentWindDirectionTrue => Some(Dimension::Angle),
            EnvironmentDepth => Some(Dimension::Length),
            EnvironmentTemperatureWater | EnvironmentTemperatureOutside => Some(Dimension::Temperature),
            EnvironmentPressure => Some(Dimension::Pressure),
            VesselName | VesselMmsi => None,
        }
    }

    /// The slash-form JSON pointer this path corresponds to, for
    /// documentation/debugging; the actual wire patch is produced by the
    /// generic structural diff over the full snapshot, not from this table.
    pub fn json_pointer(&self) -> &'static str {
        use CanonicalPath::*;
        match self {
            NavigationPosition => "/navigation/position",
            NavigationSpeedOverGround => "/navigation/speedOverGround",
            NavigationCourseOverGroundTrue => "/navigation/courseOverGroundTrue",
            NavigationHeadingTrue => "/navigation/headingTrue",
            NavigationHeadingMagnetic => "/navigation/headingMagnetic",
            NavigationVariation => "/navigation/variation",
            EnvironmentDepth => "/environment/depth",
            EnvironmentWindSpeedApparent => "/environment/windSpeedApparent",
            EnvironmentWindAngleApparent => "/environment/windAngleApparent",
            EnvironmentWindDirectionTrue => "/environment/windDirectionTrue",
            EnvironmentWindSpeedTrue => "/environment/windSpeedTrue",
            EnvironmentTemperatureWater => "/environment/temperatureWater",
            EnvironmentTemperatureOutside => "/environment/temperatureOutside",
            EnvironmentPressure => "/environment/pressure",
            VesselName => "/vessel/name",
            VesselMmsi => "/vessel/mmsi",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_segment() {
        assert!(matches!(CanonicalPath::parse("navigation..latitude"), Err(RelayError::InvalidPath(_))));
        assert!(matches!(CanonicalPath::parse(""), Err(RelayError::InvalidPath(_))));
    }

    #[test]
    fn unknown_well_formed_path_is_dropped_not_errored() {
        assert_eq!(CanonicalPath::parse("some.unknown.path").unwrap(), None);
    }

    #[test]
    fn known_path_resolves() {
        assert_eq!(
            CanonicalPath::parse("navigation.speedOverGround").unwrap(),
            Some(CanonicalPath::NavigationSpeedOverGround)
        );
    }

    #[test]
    fn signalk_mapping_covers_wind_and_heading() {
        assert_eq!(
            CanonicalPath::from_signalk("environment.wind.speedApparent"),
            Some(CanonicalPath::EnvironmentWindSpeedApparent)
        );
        assert_eq!(CanonicalPath::from_signalk("notifications.foo"), None);
    }
}
