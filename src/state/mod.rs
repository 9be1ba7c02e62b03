//! Canonical vessel state document (spec §3/§4.1).
//!
//! `StateTree` is the typed, nested struct that backs every published
//! snapshot and patch: one big struct tree, serialized wholesale, plus
//! the path-keyed accessors the ingestion pipeline needs.

pub mod document;
pub mod path;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A value with an optional unit tag (spec §3 TypedValue). `value: None`
/// means "not yet observed" — a valid, distinct state from zero.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TypedValue {
    pub value: Option<f64>,
    pub units: Option<String>,
}

impl TypedValue {
    pub fn new(value: f64, units: impl Into<String>) -> Self {
        Self { value: Some(value), units: Some(units.into()) }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LatLon {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Navigation {
    pub position: Option<PositionValue>,
    #[serde(rename = "speedOverGround")]
    pub speed_over_ground: TypedValue,
    #[serde(rename = "courseOverGroundTrue")]
    pub course_over_ground_true: TypedValue,
    #[serde(rename = "headingTrue")]
    pub heading_true: TypedValue,
    #[serde(rename = "headingMagnetic")]
    pub heading_magnetic: TypedValue,
    pub variation: TypedValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionValue {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Environment {
    pub depth: TypedValue,
    #[serde(rename = "windSpeedApparent")]
    pub wind_speed_apparent: TypedValue,
    #[serde(rename = "windAngleApparent")]
    pub wind_angle_apparent: TypedValue,
    #[serde(rename = "windDirectionTrue")]
    pub wind_direction_true: TypedValue,
    #[serde(rename = "windSpeedTrue")]
    pub wind_speed_true: TypedValue,
    #[serde(rename = "temperatureWater")]
    pub temperature_water: TypedValue,
    #[serde(rename = "temperatureOutside")]
    pub temperature_outside: TypedValue,
    pub pressure: TypedValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Vessel {
    pub name: Option<String>,
    pub mmsi: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rode {
    pub amount: f64,
    pub units: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RangeSpec {
    pub r: f64,
    pub units: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Breadcrumb {
    pub position: LatLon,
    pub time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnchorDropLocation {
    pub position: LatLon,
    pub time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distances_from_current: Option<TypedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearing: Option<TypedValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnchorLocation {
    pub position: LatLon,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distances_from_current: Option<TypedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distances_from_drop: Option<TypedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearing: Option<TypedValue>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FenceReferenceType {
    Boat,
    AnchorDrop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FenceTargetType {
    Static,
    Ais,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FenceUnits {
    M,
    Ft,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistanceSample {
    pub t: i64,
    pub v: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Fence {
    pub id: String,
    pub enabled: bool,
    pub reference_type: FenceReferenceType,
    pub target_type: FenceTargetType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_position: Option<LatLon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_mmsi: Option<String>,
    pub alert_range: f64,
    pub units: FenceUnits,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_distance_updated_at: Option<i64>,
    #[serde(default)]
    pub distance_history: Vec<DistanceSample>,
    pub in_alert: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnchorState {
    pub anchor_deployed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_drop_location: Option<AnchorDropLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_location: Option<AnchorLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rode: Option<Rode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical_range: Option<RangeSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning_range: Option<RangeSpec>,
    pub dragging: bool,
    pub rode_circle_violation: bool,
    pub ais_warning: bool,
    #[serde(default)]
    pub history: Vec<Breadcrumb>,
    #[serde(default)]
    pub fences: Vec<Fence>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
    Emergency,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub category: String,
    pub source: String,
    pub level: AlertLevel,
    pub label: String,
    pub message: String,
    pub trigger: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub auto_resolvable: bool,
    pub acknowledged: bool,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AisPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AISTarget {
    pub mmsi: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    pub position: AisPosition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sog: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cog: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<serde_json::Value>,
    pub last_updated: i64,
}

impl AISTarget {
    /// spec §4.4 `updated` predicate: position + the three scalar fields.
    pub fn differs_materially(&self, other: &AISTarget) -> bool {
        self.position.latitude != other.position.latitude
            || self.position.longitude != other.position.longitude
            || self.sog != other.sog
            || self.cog != other.cog
            || self.heading != other.heading
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BluetoothDevice {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BluetoothState {
    pub enabled: bool,
    pub scanning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_device_id: Option<String>,
    #[serde(default)]
    pub devices: HashMap<String, BluetoothDevice>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_uuid: Option<String>,
}

/// The canonical, in-memory vessel state tree (spec §3).
///
/// `ais_targets` is the single source of truth for AIS data; `ais.targets`
/// and the legacy `aisTargets` alias are both rendered from it at
/// serialization time (see [`document::StateDocument::snapshot`]) so the two
/// can never drift apart.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StateTree {
    pub navigation: Navigation,
    pub environment: Environment,
    pub vessel: Vessel,
    pub anchor: AnchorState,
    #[serde(skip)]
    pub ais_targets: HashMap<String, AISTarget>,
    #[serde(rename = "alerts", default)]
    pub alerts: AlertsSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tide: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather: Option<serde_json::Value>,
    pub bluetooth: BluetoothState,
    pub meta: Meta,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AlertsSection {
    pub active: Vec<Alert>,
}
