//! `StateDocument`: the mutable holder of [`StateTree`] plus the generic
//! get/set/diff machinery the rest of the relay drives.

use serde_json::{Map, Value};

use crate::error::{RelayError, Result};
use crate::units::{self, Dimension, UnitPreferences};

use super::path::CanonicalPath;
use super::{AISTarget, StateTree, TypedValue};

/// One RFC-6902-ish patch operation. Only the three ops this relay ever
/// produces are modeled; `from`-based `move`/`copy` never appear.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
}

pub type Patch = Vec<PatchOp>;

#[derive(Debug, Default)]
pub struct StateDocument {
    tree: StateTree,
    prefs: UnitPreferences,
}

impl StateDocument {
    pub fn new(prefs: UnitPreferences) -> Self {
        Self { tree: StateTree::default(), prefs }
    }

    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut StateTree {
        &mut self.tree
    }

    pub fn prefs(&self) -> &UnitPreferences {
        &self.prefs
    }

    /// Build a [`TypedValue`] from an already-computed SI quantity (used by
    /// derived fields like anchor distance/bearing, which never pass
    /// through `set_si`'s canonical-path dispatch).
    pub fn typed_value_for(&self, dim: Dimension, si_value: f64) -> TypedValue {
        let (value, units) = units::normalize(dim, Some(si_value), &self.prefs);
        TypedValue { value, units: Some(units.to_string()) }
    }

    /// Set a canonical path to a raw (already-SI) value, converting to the
    /// configured display units. Spec §4.1/§4.2.
    pub fn set_si(&mut self, path: CanonicalPath, si_value: f64) {
        let dim = path.dimension();
        let (value, units) = match dim {
            Some(d) => {
                let (v, u) = units::normalize(d, Some(si_value), &self.prefs);
                (v, Some(u.to_string()))
            }
            None => (Some(si_value), None),
        };
        self.set_typed(path, TypedValue { value, units });
    }

    fn set_typed(&mut self, path: CanonicalPath, tv: TypedValue) {
        use CanonicalPath::*;
        match path {
            NavigationSpeedOverGround => self.tree.navigation.speed_over_ground = tv,
            NavigationCourseOverGroundTrue => self.tree.navigation.course_over_ground_true = tv,
            NavigationHeadingTrue => self.tree.navigation.heading_true = tv,
            NavigationHeadingMagnetic => self.tree.navigation.heading_magnetic = tv,
            NavigationVariation => self.tree.navigation.variation = tv,
            EnvironmentDepth => self.tree.environment.depth = tv,
            EnvironmentWindSpeedApparent => self.tree.environment.wind_speed_apparent = tv,
            EnvironmentWindAngleApparent => self.tree.environment.wind_angle_apparent = tv,
            EnvironmentWindDirectionTrue => self.tree.environment.wind_direction_true = tv,
            EnvironmentWindSpeedTrue => self.tree.environment.wind_speed_true = tv,
            EnvironmentTemperatureWater => self.tree.environment.temperature_water = tv,
            EnvironmentTemperatureOutside => self.tree.environment.temperature_outside = tv,
            EnvironmentPressure => self.tree.environment.pressure = tv,
            NavigationPosition | VesselName | VesselMmsi => {
                // non-scalar / non-TypedValue paths have their own setters
            }
        }
    }

    pub fn set_position(&mut self, lat: f64, lon: f64, timestamp: Option<i64>) {
        self.tree.navigation.position = Some(super::PositionValue { latitude: lat, longitude: lon, timestamp });
    }

    pub fn set_vessel_name(&mut self, name: String) {
        self.tree.vessel.name = Some(name);
    }

    pub fn set_vessel_mmsi(&mut self, mmsi: String) {
        self.tree.vessel.mmsi = Some(mmsi);
    }

    /// Upsert an AIS target. The `ais.targets`/`aisTargets` alias is
    /// synthesized at serialization time from this single map.
    pub fn upsert_ais_target(&mut self, target: AISTarget) {
        self.tree.ais_targets.insert(target.mmsi.clone(), target);
    }

    pub fn remove_ais_target(&mut self, mmsi: &str) {
        self.tree.ais_targets.remove(mmsi);
    }

    /// Render the full tree as the wire `Value`, including both AIS alias
    /// keys with identical content (spec §3 DATA MODEL).
    pub fn to_wire_value(&self) -> Value {
        let mut root = serde_json::to_value(&self.tree).expect("StateTree always serializes");
        let targets_obj: Map<String, Value> = self
            .tree
            .ais_targets
            .iter()
            .map(|(mmsi, t)| (mmsi.clone(), serde_json::to_value(t).expect("AISTarget always serializes")))
            .collect();

        if let Value::Object(ref mut map) = root {
            let ais_section = map.entry("ais").or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(ais_map) = ais_section {
                ais_map.insert("targets".to_string(), Value::Object(targets_obj.clone()));
            }
            map.insert("aisTargets".to_string(), Value::Object(targets_obj));
        }
        root
    }

    pub fn snapshot(&self) -> Value {
        self.to_wire_value()
    }

    /// Apply a previously produced patch to a prior snapshot. Used by tests
    /// to verify `apply(diff(a, b), a) == b` (spec §8 property 1).
    pub fn apply_patch(prev: &Value, patch: &Patch) -> Value {
        let mut out = prev.clone();
        for op in patch {
            match op {
                PatchOp::Add { path, value } | PatchOp::Replace { path, value } => {
                    set_json_pointer(&mut out, path, value.clone());
                }
                PatchOp::Remove { path } => {
                    remove_json_pointer(&mut out, path);
                }
            }
        }
        out
    }

    /// Generic structural diff over two full snapshots (spec §9 Design
    /// Note). Objects recurse key-wise; scalars and arrays replace wholesale.
    /// `diff(a, a)` is always empty.
    pub fn diff(prev: &Value, curr: &Value) -> Patch {
        let mut patch = Vec::new();
        diff_into(prev, curr, String::new(), &mut patch);
        patch
    }
}

fn diff_into(prev: &Value, curr: &Value, pointer: String, out: &mut Patch) {
    match (prev, curr) {
        (Value::Object(p), Value::Object(c)) => {
            for (key, cval) in c {
                let child_ptr = format!("{pointer}/{}", escape_pointer_segment(key));
                match p.get(key) {
                    Some(pval) => diff_into(pval, cval, child_ptr, out),
                    None => out.push(PatchOp::Add { path: child_ptr, value: cval.clone() }),
                }
            }
            for key in p.keys() {
                if !c.contains_key(key) {
                    let child_ptr = format!("{pointer}/{}", escape_pointer_segment(key));
                    out.push(PatchOp::Remove { path: child_ptr });
                }
            }
        }
        _ => {
            if prev != curr {
                out.push(PatchOp::Replace { path: pointer, value: curr.clone() });
            }
        }
    }
}

fn escape_pointer_segment(seg: &str) -> String {
    seg.replace('~', "~0").replace('/', "~1")
}

fn set_json_pointer(root: &mut Value, pointer: &str, value: Value) {
    if pointer.is_empty() {
        *root = value;
        return;
    }
    let segments: Vec<&str> = pointer.trim_start_matches('/').split('/').collect();
    let mut cur = root;
    for (i, seg) in segments.iter().enumerate() {
        let key = seg.replace("~1", "/").replace("~0", "~");
        if i == segments.len() - 1 {
            if let Value::Object(map) = cur {
                map.insert(key, value);
            }
            return;
        }
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        let map = cur.as_object_mut().expect("just ensured object");
        cur = map.entry(key).or_insert_with(|| Value::Object(Map::new()));
    }
}

fn remove_json_pointer(root: &mut Value, pointer: &str) {
    let segments: Vec<&str> = pointer.trim_start_matches('/').split('/').collect();
    if segments.is_empty() {
        return;
    }
    let mut cur = root;
    for seg in &segments[..segments.len() - 1] {
        let key = seg.replace("~1", "/").replace("~0", "~");
        match cur.get_mut(&key) {
            Some(next) => cur = next,
            None => return,
        }
    }
    if let Value::Object(map) = cur {
        let last = segments.last().unwrap().replace("~1", "/").replace("~0", "~");
        map.remove(&last);
    }
}

/// Top-level path/value dispatch used by [`crate::commands`] (spec §4.1
/// `StateDocument.get`/`set`). `InvalidPath` is returned only for a
/// malformed dotted path; an unrecognized-but-valid path resolves to `None`.
pub fn validate_path(dotted: &str) -> Result<Option<CanonicalPath>> {
    CanonicalPath::parse(dotted).map_err(|_| RelayError::InvalidPath(dotted.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_of_identical_snapshots_is_empty() {
        let mut doc = StateDocument::new(UnitPreferences::default());
        doc.set_si(CanonicalPath::EnvironmentDepth, 4.2);
        let snap = doc.snapshot();
        assert!(StateDocument::diff(&snap, &snap).is_empty());
    }

    #[test]
    fn patch_applies_to_reproduce_new_snapshot() {
        let mut doc = StateDocument::new(UnitPreferences::default());
        let before = doc.snapshot();
        doc.set_si(CanonicalPath::NavigationSpeedOverGround, 3.0);
        let after = doc.snapshot();
        let patch = StateDocument::diff(&before, &after);
        assert!(!patch.is_empty());
        let applied = StateDocument::apply_patch(&before, &patch);
        assert_eq!(applied, after);
    }

    #[test]
    fn ais_alias_stays_in_sync() {
        let mut doc = StateDocument::new(UnitPreferences::default());
        doc.upsert_ais_target(AISTarget {
            mmsi: "123456789".into(),
            name: None,
            callsign: None,
            position: super::super::AisPosition { latitude: 1.0, longitude: 2.0, timestamp: 0 },
            sog: None,
            cog: None,
            heading: None,
            dimensions: None,
            last_updated: 0,
        });
        let wire = doc.to_wire_value();
        assert_eq!(wire["ais"]["targets"]["123456789"], wire["aisTargets"]["123456789"]);
    }
}
