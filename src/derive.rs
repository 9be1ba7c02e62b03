//! Recomputes derived anchor fields and evaluates alert rules on every
//! commit (spec §4.6): a static ordered rule list evaluated against
//! current/previous state, rather than polymorphic rule objects.

use chrono::Utc;
use uuid::Uuid;

use crate::state::document::StateDocument;
use crate::state::{Alert, AlertLevel, Breadcrumb, DistanceSample, LatLon, StateTree};
use crate::units::Dimension;

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const ANCHOR_MOVED_THRESHOLD_M: f64 = 5.0;
const MIN_BREADCRUMB_INTERVAL_MS: i64 = 30_000;
const MAX_HISTORY_ENTRIES: usize = 1000;
const FENCE_HISTORY_WINDOW_MS: i64 = 2 * 60 * 60 * 1000;
const FENCE_HISTORY_INTERVAL_MS: i64 = 30_000;
const HIGH_WIND_THRESHOLD_KTS: f64 = 25.0;

/// Converts a stored (display-unit) wind speed back to knots, since the
/// high-wind rules threshold is fixed in knots (spec §4.6) regardless of
/// the user's preferred speed unit.
fn wind_speed_kts(tv: &crate::state::TypedValue) -> Option<f64> {
    let value = tv.value?;
    let unit = tv
        .units
        .as_deref()
        .and_then(crate::units::speed_unit_from_label)
        .unwrap_or(crate::units::SpeedUnit::Knots);
    Some(crate::units::speed_to_knots(value, unit))
}

pub struct DerivationEngine;

impl DerivationEngine {
    /// Recomputes anchor geometry, then evaluates the alert rule set
    /// against `prev` vs. the just-mutated tree. Spec §4.6: "derivation ops
    /// appear after raw-ingest ops in the same patch" — callers run this
    /// after applying a batch, inside the same commit.
    pub fn derive(doc: &mut StateDocument, prev: &StateTree) {
        Self::derive_anchor(doc);
        Self::derive_fences(doc);
        evaluate_rules(doc, prev);
    }

    fn derive_anchor(doc: &mut StateDocument) {
        let boat = doc.tree().navigation.position;
        let deployed = doc.tree().anchor.anchor_deployed;
        if !deployed || boat.is_none() {
            return;
        }
        let boat = boat.unwrap();
        let boat_ll = LatLon { latitude: boat.latitude, longitude: boat.longitude };

        let drop_pos = doc.tree().anchor.anchor_drop_location.as_ref().map(|d| d.position);
        let anchor_pos = doc.tree().anchor.anchor_location.as_ref().map(|a| a.position);

        let mut d_drop = None;
        if let Some(drop) = drop_pos {
            let dist = haversine_m(boat_ll, drop);
            let bearing = initial_bearing_rad(boat_ll, drop);
            d_drop = Some(dist);
            let dist_tv = doc.typed_value_for(Dimension::Length, dist);
            let bearing_tv = doc.typed_value_for(Dimension::Angle, bearing);
            if let Some(d) = doc.tree_mut().anchor.anchor_drop_location.as_mut() {
                d.distances_from_current = Some(dist_tv);
                d.bearing = Some(bearing_tv);
            }
        }

        let mut d_anchor_drop = None;
        if let (Some(anchor), Some(drop)) = (anchor_pos, drop_pos) {
            d_anchor_drop = Some(haversine_m(anchor, drop));
        }
        if let Some(anchor) = anchor_pos {
            let dist_current = haversine_m(boat_ll, anchor);
            let bearing = initial_bearing_rad(boat_ll, anchor);
            let dist_current_tv = doc.typed_value_for(Dimension::Length, dist_current);
            let bearing_tv = doc.typed_value_for(Dimension::Angle, bearing);
            let dist_drop_tv = d_anchor_drop.map(|d| doc.typed_value_for(Dimension::Length, d));
            if let Some(a) = doc.tree_mut().anchor.anchor_location.as_mut() {
                a.distances_from_current = Some(dist_current_tv);
                a.bearing = Some(bearing_tv);
                if let Some(tv) = dist_drop_tv {
                    a.distances_from_drop = Some(tv);
                }
            }
        }

        let rode_m = doc.tree().anchor.rode.as_ref().map(|r| meters_from(&r.units, r.amount));

        if let (Some(rode_m), Some(d_drop)) = (rode_m, d_drop) {
            let rode_circle_violated = d_drop > rode_m;
            // Without a separately tracked anchor position (no anchor-borne
            // sensor, the common case), there's no independent read on
            // whether the anchor itself moved — a rode-circle violation
            // can't be downgraded to "just a rode-length mismatch", so it's
            // treated as real dragging. Only when `anchor_location` is
            // actually tracked can a violation be attributed to
            // configuration instead (per DESIGN.md's anchor_location open
            // question resolution).
            let anchor_moved = d_anchor_drop.map(|d| d > ANCHOR_MOVED_THRESHOLD_M).unwrap_or(true);
            let dragging = rode_circle_violated && anchor_moved;
            let rode_circle_violation = rode_circle_violated && !anchor_moved;
            doc.tree_mut().anchor.dragging = dragging;
            doc.tree_mut().anchor.rode_circle_violation = rode_circle_violation;
        }

        let now = Utc::now().timestamp_millis();
        let should_breadcrumb = doc
            .tree()
            .anchor
            .history
            .last()
            .map(|b| now - b.time >= MIN_BREADCRUMB_INTERVAL_MS)
            .unwrap_or(true);
        if should_breadcrumb {
            let history = &mut doc.tree_mut().anchor.history;
            history.push(Breadcrumb { position: boat_ll, time: now });
            if history.len() > MAX_HISTORY_ENTRIES {
                let overflow = history.len() - MAX_HISTORY_ENTRIES;
                history.drain(0..overflow);
            }
        }

        if let Some(warning_range) = doc.tree().anchor.warning_range.clone() {
            let warn_m = meters_from(&warning_range.units, warning_range.r);
            let count = doc
                .tree()
                .ais_targets
                .values()
                .filter(|t| {
                    haversine_m(boat_ll, LatLon { latitude: t.position.latitude, longitude: t.position.longitude })
                        <= warn_m
                })
                .count();
            doc.tree_mut().anchor.ais_warning = count > 0;
        }
    }

    fn derive_fences(doc: &mut StateDocument) {
        let boat = doc.tree().navigation.position;
        let drop = doc.tree().anchor.anchor_drop_location.as_ref().map(|d| d.position);
        let now = Utc::now().timestamp_millis();

        let ais_positions: std::collections::HashMap<String, LatLon> = doc
            .tree()
            .ais_targets
            .iter()
            .map(|(mmsi, t)| (mmsi.clone(), LatLon { latitude: t.position.latitude, longitude: t.position.longitude }))
            .collect();

        let fence_count = doc.tree().anchor.fences.len();
        for i in 0..fence_count {
            let (reference_type, target_type, target_position, target_mmsi, enabled, alert_range, units_is_ft) = {
                let f = &doc.tree().anchor.fences[i];
                (f.reference_type, f.target_type, f.target_position, f.target_mmsi.clone(), f.enabled,
                 f.alert_range, matches!(f.units, crate::state::FenceUnits::Ft))
            };
            if !enabled {
                continue;
            }

            let reference = match reference_type {
                crate::state::FenceReferenceType::Boat => boat.map(|p| LatLon { latitude: p.latitude, longitude: p.longitude }),
                crate::state::FenceReferenceType::AnchorDrop => drop,
            };
            let target = match target_type {
                crate::state::FenceTargetType::Static => target_position,
                crate::state::FenceTargetType::Ais => target_mmsi.and_then(|m| ais_positions.get(&m).copied()),
            };

            let (Some(reference), Some(target)) = (reference, target) else { continue };
            let dist_m = haversine_m(reference, target);
            let dist_display = if units_is_ft { dist_m * 3.28084 } else { dist_m };

            let f = &mut doc.tree_mut().anchor.fences[i];
            f.current_distance = Some(dist_display);
            f.minimum_distance = match f.minimum_distance {
                Some(min) if min <= dist_display => Some(min),
                _ => {
                    f.minimum_distance_updated_at = Some(now);
                    Some(dist_display)
                }
            };

            let should_sample = f
                .distance_history
                .last()
                .map(|s| now - s.t >= FENCE_HISTORY_INTERVAL_MS)
                .unwrap_or(true);
            if should_sample {
                f.distance_history.push(DistanceSample { t: now, v: dist_display });
            }
            f.distance_history.retain(|s| now - s.t <= FENCE_HISTORY_WINDOW_MS);

            f.in_alert = dist_display <= f.alert_range;
        }
    }
}

fn meters_from(units: &str, amount: f64) -> f64 {
    match units {
        "ft" => amount / 3.28084,
        _ => amount,
    }
}

fn haversine_m(a: LatLon, b: LatLon) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();
    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Initial bearing in radians (SI for `Dimension::Angle`, matching the
/// SignalK-native unit `units::normalize` expects as input).
fn initial_bearing_rad(from: LatLon, to: LatLon) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let dlon = (to.longitude - from.longitude).to_radians();
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    crate::units::normalize_radians(y.atan2(x))
}

// --- Alert rules, as data (spec §9 "Rules as data") ---

struct AlertSeed {
    alert_type: &'static str,
    category: &'static str,
    source: &'static str,
    level: AlertLevel,
    label: &'static str,
    message: String,
    trigger: &'static str,
    data: Option<serde_json::Value>,
    auto_resolvable: bool,
}

enum RuleAction {
    CreateAlert(fn(&StateTree) -> AlertSeed),
    ResolveAlerts(&'static str),
}

struct AlertRule {
    #[allow(dead_code)]
    name: &'static str,
    condition: fn(&StateTree, &StateTree) -> bool,
    action: RuleAction,
}

fn evaluate_rules(doc: &mut StateDocument, prev: &StateTree) {
    let rules = built_in_rules();
    let now = Utc::now().timestamp_millis();

    for rule in rules {
        let fires = (rule.condition)(doc.tree(), prev);
        if !fires {
            continue;
        }
        match rule.action {
            RuleAction::CreateAlert(seed_fn) => {
                let seed = seed_fn(doc.tree());
                let trigger = seed.trigger;
                let has_unacked = doc
                    .tree()
                    .alerts
                    .active
                    .iter()
                    .any(|a| a.trigger == trigger && !a.acknowledged && a.resolved_at.is_none());
                if !has_unacked {
                    doc.tree_mut().alerts.active.push(Alert {
                        id: Uuid::new_v4().to_string(),
                        alert_type: seed.alert_type.to_string(),
                        category: seed.category.to_string(),
                        source: seed.source.to_string(),
                        level: seed.level,
                        label: seed.label.to_string(),
                        message: seed.message,
                        trigger: seed.trigger.to_string(),
                        data: seed.data,
                        auto_resolvable: seed.auto_resolvable,
                        acknowledged: false,
                        created_at: now,
                        resolved_at: None,
                    });
                }
            }
            RuleAction::ResolveAlerts(trigger) => {
                for alert in doc.tree_mut().alerts.active.iter_mut() {
                    if alert.trigger == trigger && !alert.acknowledged && alert.resolved_at.is_none() {
                        alert.resolved_at = Some(now);
                    }
                }
            }
        }
    }
}

fn built_in_rules() -> Vec<AlertRule> {
    vec![
        AlertRule {
            name: "critical_range_exceeded",
            condition: |s, _prev| {
                let Some(critical) = &s.anchor.critical_range else { return false };
                let Some(drop) = &s.anchor.anchor_drop_location else { return false };
                let Some(dist) = drop.distances_from_current.as_ref().and_then(|v| v.value) else { return false };
                let critical_m = meters_from(&critical.units, critical.r);
                s.anchor.anchor_deployed && dist > critical_m
            },
            action: RuleAction::CreateAlert(|s| AlertSeed {
                alert_type: "anchor",
                category: "anchor",
                source: "derivation",
                level: AlertLevel::Critical,
                label: "Critical range exceeded",
                message: "Boat has exceeded the critical anchor range".to_string(),
                trigger: "critical_range",
                data: s.anchor.anchor_drop_location.as_ref().and_then(|d| serde_json::to_value(d).ok()),
                auto_resolvable: true,
            }),
        },
        AlertRule {
            name: "critical_range_resolved",
            condition: |s, _prev| {
                let Some(critical) = &s.anchor.critical_range else { return false };
                let Some(drop) = &s.anchor.anchor_drop_location else { return false };
                let Some(dist) = drop.distances_from_current.as_ref().and_then(|v| v.value) else { return false };
                let critical_m = meters_from(&critical.units, critical.r);
                s.anchor.anchor_deployed && dist <= critical_m
            },
            action: RuleAction::ResolveAlerts("critical_range"),
        },
        AlertRule {
            name: "anchor_dragging",
            // trigger-only: no paired resolve rule. Undeploying the anchor
            // clears it via StateBus::update_anchor_state's own effect,
            // not a rule here.
            condition: |s, _prev| s.anchor.dragging,
            action: RuleAction::CreateAlert(|_s| AlertSeed {
                alert_type: "anchor",
                category: "anchor",
                source: "derivation",
                level: AlertLevel::Critical,
                label: "Anchor dragging",
                message: "Anchor appears to be dragging".to_string(),
                trigger: "anchor_dragging",
                data: None,
                auto_resolvable: true,
            }),
        },
        AlertRule {
            name: "ais_proximity",
            condition: |s, _prev| s.anchor.anchor_deployed && s.anchor.ais_warning,
            action: RuleAction::CreateAlert(|_s| AlertSeed {
                alert_type: "ais",
                category: "anchor",
                source: "derivation",
                level: AlertLevel::Warning,
                label: "AIS target nearby",
                message: "An AIS target has entered the anchor warning range".to_string(),
                trigger: "ais_proximity",
                data: None,
                auto_resolvable: true,
            }),
        },
        AlertRule {
            name: "ais_proximity_resolved",
            condition: |s, _prev| s.anchor.anchor_deployed && !s.anchor.ais_warning,
            action: RuleAction::ResolveAlerts("ais_proximity"),
        },
        AlertRule {
            name: "high_apparent_wind",
            condition: |s, _prev| {
                wind_speed_kts(&s.environment.wind_speed_apparent).map(|v| v > HIGH_WIND_THRESHOLD_KTS).unwrap_or(false)
            },
            action: RuleAction::CreateAlert(|s| AlertSeed {
                alert_type: "weather",
                category: "wind",
                source: "derivation",
                level: AlertLevel::Warning,
                label: "High apparent wind",
                message: format!(
                    "Apparent wind speed {:.1} kts exceeds threshold",
                    wind_speed_kts(&s.environment.wind_speed_apparent).unwrap_or(0.0)
                ),
                trigger: "high_apparent_wind",
                data: None,
                auto_resolvable: true,
            }),
        },
        AlertRule {
            name: "high_apparent_wind_resolved",
            condition: |s, _prev| {
                wind_speed_kts(&s.environment.wind_speed_apparent).map(|v| v <= HIGH_WIND_THRESHOLD_KTS).unwrap_or(false)
            },
            action: RuleAction::ResolveAlerts("high_apparent_wind"),
        },
        AlertRule {
            name: "high_true_wind",
            condition: |s, _prev| {
                wind_speed_kts(&s.environment.wind_speed_true).map(|v| v > HIGH_WIND_THRESHOLD_KTS).unwrap_or(false)
            },
            action: RuleAction::CreateAlert(|s| AlertSeed {
                alert_type: "weather",
                category: "wind",
                source: "derivation",
                level: AlertLevel::Warning,
                label: "High true wind",
                message: format!(
                    "True wind speed {:.1} kts exceeds threshold",
                    wind_speed_kts(&s.environment.wind_speed_true).unwrap_or(0.0)
                ),
                trigger: "high_true_wind",
                data: None,
                auto_resolvable: true,
            }),
        },
        AlertRule {
            name: "high_true_wind_resolved",
            condition: |s, _prev| {
                wind_speed_kts(&s.environment.wind_speed_true).map(|v| v <= HIGH_WIND_THRESHOLD_KTS).unwrap_or(false)
            },
            action: RuleAction::ResolveAlerts("high_true_wind"),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::UnitPreferences;

    #[test]
    fn high_wind_rule_converts_mps_preference_to_knots() {
        let mps_prefs = UnitPreferences {
            speed: crate::units::SpeedUnit::MetersPerSecond,
            ..UnitPreferences::default()
        };
        let mut doc = StateDocument::new(mps_prefs);
        // 13.5 m/s is ~26.24 kts, above HIGH_WIND_THRESHOLD_KTS; stored
        // display value is 13.5 (m/s), which must not be compared directly
        // against the 25.0kt threshold.
        doc.set_si(crate::state::path::CanonicalPath::EnvironmentWindSpeedApparent, 13.5);
        let prev = doc.tree().clone();
        DerivationEngine::derive(&mut doc, &prev);

        assert!(
            doc.tree().alerts.active.iter().any(|a| a.trigger == "high_apparent_wind" && a.resolved_at.is_none()),
            "13.5 m/s (~26.24kts) should exceed the 25kt threshold even under an m/s display preference"
        );
    }

    #[test]
    fn haversine_matches_known_distance() {
        let a = LatLon { latitude: 40.7128, longitude: -74.0060 };
        let b = LatLon { latitude: 40.7128, longitude: -74.0160 };
        let d = haversine_m(a, b);
        assert!((d - 840.0).abs() < 50.0, "distance was {d}");
    }

    #[test]
    fn dragging_detection_fires_when_both_conditions_hold() {
        let mut doc = StateDocument::new(UnitPreferences::default());
        doc.set_position(40.7128, -74.0060, None);
        doc.tree_mut().anchor.anchor_deployed = true;
        doc.tree_mut().anchor.anchor_drop_location = Some(crate::state::AnchorDropLocation {
            position: LatLon { latitude: 40.7128, longitude: -74.0060 },
            time: 0,
            distances_from_current: None,
            bearing: None,
        });
        doc.tree_mut().anchor.rode = Some(crate::state::Rode { amount: 30.0, units: "m".into() });

        doc.set_position(40.7128, -74.0160, None);
        let prev = doc.tree().clone();
        DerivationEngine::derive(&mut doc, &prev);

        assert!(doc.tree().anchor.dragging);
    }

    #[test]
    fn critical_range_alert_created_and_resolved() {
        let mut doc = StateDocument::new(UnitPreferences::default());
        doc.set_position(0.0, 0.0, None);
        doc.tree_mut().anchor.anchor_deployed = true;
        doc.tree_mut().anchor.anchor_drop_location = Some(crate::state::AnchorDropLocation {
            position: LatLon { latitude: 0.0, longitude: 0.0 },
            time: 0,
            distances_from_current: None,
            bearing: None,
        });
        doc.tree_mut().anchor.critical_range = Some(crate::state::RangeSpec { r: 50.0, units: "m".into() });

        doc.set_position(0.0, 0.001, None); // ~111m east
        let prev = doc.tree().clone();
        DerivationEngine::derive(&mut doc, &prev);
        assert!(doc.tree().alerts.active.iter().any(|a| a.trigger == "critical_range" && a.resolved_at.is_none()));

        doc.set_position(0.0, 0.0, None);
        let prev2 = doc.tree().clone();
        DerivationEngine::derive(&mut doc, &prev2);
        assert!(doc.tree().alerts.active.iter().any(|a| a.trigger == "critical_range" && a.resolved_at.is_some()));
    }
}
