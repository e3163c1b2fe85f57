//! # Live Fleet
//!
//! Latest known position per device for the live map.
//!
//! Updates arrive from polling (grouped snapshots) or from a push feed
//! (single records) with no ordering guarantee. Every update is gated on its
//! timestamp: a record older than the one already held for the device is
//! dropped, so a late packet can never move a marker backwards.
//!
//! [`LiveFleet`] also keeps an R-tree over the held positions for viewport
//! and proximity queries. The index is rebuilt lazily after changes.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use log::{debug, info};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::normalize::{extract_chain, first_present, id_string, normalize_record};
use crate::{Bounds, FieldSource, LatLng, MovementStatus, NormalizerConfig};

// ============================================================================
// Types
// ============================================================================

/// Latest position of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveVehicle {
    pub device_id: String,
    /// Display name, when the feed provides one
    pub name: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub speed_kmh: f64,
    /// Compass heading in degrees, `[0, 360)`
    pub heading: f64,
    pub timestamp: String,
    pub recorded_at: NaiveDateTime,
    pub movement_status: MovementStatus,
}

impl LiveVehicle {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    pub fn is_moving(&self) -> bool {
        self.movement_status == MovementStatus::Moving
    }
}

/// Result of merging one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First position for this device
    Inserted,
    /// Replaced an older position
    Updated,
    /// Older than the held position; ignored
    Stale,
    /// No device id, no usable timestamp, or a zero coordinate
    Dropped,
}

impl MergeOutcome {
    pub fn applied(self) -> bool {
        matches!(self, MergeOutcome::Inserted | MergeOutcome::Updated)
    }
}

/// Configuration for live updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Drop fixes where either coordinate is exactly 0 (devices report
    /// these before a GPS lock).
    /// Default: true
    pub drop_zero_positions: bool,

    /// Field chains for position, speed, timestamp and device id.
    /// Default: the batch normalizer chains, with `id` accepted as device id
    pub fields: NormalizerConfig,

    /// Heading fallback chain.
    pub heading: Vec<FieldSource>,

    /// Fields that may carry the display name.
    pub name_fields: Vec<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        let mut fields = NormalizerConfig::default();
        fields.device_id_fields.push("id".to_string());

        Self {
            drop_zero_positions: true,
            fields,
            heading: vec![
                FieldSource::direct("azimuth"),
                FieldSource::direct("heading"),
                FieldSource::direct("detailed.body.parsed.azimuth"),
                FieldSource::direct("detailed.body.azimuth.decimal"),
            ],
            name_fields: vec!["deviceName".to_string(), "name".to_string()],
        }
    }
}

// ============================================================================
// Record Parsing
// ============================================================================

/// Parse one raw record into a live position. `None` when the record has no
/// device id or timestamp, or is a dropped zero-coordinate fix.
pub fn parse_live_record(record: &Value, config: &LiveConfig) -> Option<LiveVehicle> {
    let point = match normalize_record(record, &config.fields) {
        Ok(point) => point,
        Err(reason) => {
            debug!("[LiveFleet] Ignoring update: {:?}", reason);
            return None;
        }
    };
    let device_id = point.device_id?;

    if config.drop_zero_positions && (point.lat == 0.0 || point.lng == 0.0) {
        debug!(
            "[LiveFleet] Dropping zero fix {},{} from {}",
            point.lat, point.lng, device_id
        );
        return None;
    }

    Some(LiveVehicle {
        device_id,
        name: first_present(record, &config.name_fields).and_then(id_string),
        lat: point.lat,
        lng: point.lng,
        speed_kmh: point.speed_kmh,
        heading: extract_chain(record, &config.heading).rem_euclid(360.0),
        timestamp: point.timestamp,
        recorded_at: point.recorded_at,
        movement_status: point.movement_status,
    })
}

/// Replace the held position of a device unless `update` is older. An
/// update without a name keeps the held one.
fn replace_if_newer(held: &mut LiveVehicle, update: LiveVehicle) -> MergeOutcome {
    if update.recorded_at < held.recorded_at {
        debug!(
            "[LiveFleet] Stale update for {} ({} < {})",
            update.device_id, update.timestamp, held.timestamp
        );
        return MergeOutcome::Stale;
    }
    let name = update.name.clone().or_else(|| held.name.take());
    *held = LiveVehicle { name, ..update };
    MergeOutcome::Updated
}

/// Merge one raw update into the held positions.
///
/// The update replaces the device's entry unless it is older than the held
/// one. Updates with no device id or no valid timestamp leave the list as is.
pub fn merge_live_update(existing: &[LiveVehicle], raw_update: &Value) -> Vec<LiveVehicle> {
    merge_live_update_with(existing, raw_update, &LiveConfig::default())
}

/// [`merge_live_update`] with custom configuration.
pub fn merge_live_update_with(
    existing: &[LiveVehicle],
    raw_update: &Value,
    config: &LiveConfig,
) -> Vec<LiveVehicle> {
    let mut vehicles = existing.to_vec();
    if let Some(update) = parse_live_record(raw_update, config) {
        match vehicles.iter_mut().find(|v| v.device_id == update.device_id) {
            Some(held) => {
                replace_if_newer(held, update);
            }
            None => vehicles.push(update),
        }
    }
    vehicles
}

// ============================================================================
// Spatial Index
// ============================================================================

#[derive(Debug, Clone)]
struct IndexedVehicle {
    device_id: String,
    lat: f64,
    lng: f64,
}

impl RTreeObject for IndexedVehicle {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lng, self.lat])
    }
}

impl PointDistance for IndexedVehicle {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dlng = self.lng - point[0];
        let dlat = self.lat - point[1];
        dlng * dlng + dlat * dlat
    }
}

// ============================================================================
// Live Fleet
// ============================================================================

/// Latest position per device with spatial queries.
#[derive(Debug)]
pub struct LiveFleet {
    config: LiveConfig,
    vehicles: HashMap<String, LiveVehicle>,
    spatial_index: RTree<IndexedVehicle>,
    spatial_dirty: bool,
}

impl LiveFleet {
    pub fn new() -> Self {
        Self::with_config(LiveConfig::default())
    }

    pub fn with_config(config: LiveConfig) -> Self {
        Self {
            config,
            vehicles: HashMap::new(),
            spatial_index: RTree::new(),
            spatial_dirty: false,
        }
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    // ========================================================================
    // Updates
    // ========================================================================

    /// Merge a single pushed record.
    pub fn apply_update(&mut self, raw_update: &Value) -> MergeOutcome {
        match parse_live_record(raw_update, &self.config) {
            Some(update) => self.merge(update),
            None => MergeOutcome::Dropped,
        }
    }

    /// Merge a polled snapshot.
    ///
    /// Accepts `{ "data": [...] }` or a bare array of either device groups
    /// (`{ deviceId, deviceName, logs: [...] }`) or flat records. For a group
    /// only its newest log by timestamp is considered; the group's id and
    /// name fill in for logs that lack them. Returns how many devices moved.
    pub fn ingest_snapshot(&mut self, snapshot: &Value) -> usize {
        let items: &[Value] = match snapshot {
            Value::Array(items) => items.as_slice(),
            Value::Object(map) => match map.get("data") {
                Some(Value::Array(items)) => items.as_slice(),
                _ => &[],
            },
            _ => &[],
        };

        let mut applied = 0;
        for item in items {
            let update = match item.get("logs").and_then(Value::as_array) {
                Some(logs) => self.newest_in_group(item, logs),
                None => parse_live_record(item, &self.config),
            };
            if let Some(update) = update {
                if self.merge(update).applied() {
                    applied += 1;
                }
            }
        }

        info!(
            "[LiveFleet] Snapshot: {} of {} devices updated, {} tracked",
            applied,
            items.len(),
            self.vehicles.len()
        );
        applied
    }

    fn newest_in_group(&self, group: &Value, logs: &[Value]) -> Option<LiveVehicle> {
        let group_id = first_present(group, &self.config.fields.device_id_fields).cloned();
        let group_name = first_present(group, &self.config.name_fields).cloned();

        logs.iter()
            .filter_map(|log| {
                let mut log = log.clone();
                if let Some(obj) = log.as_object_mut() {
                    if let Some(id) = &group_id {
                        obj.entry("deviceId").or_insert_with(|| id.clone());
                    }
                    if let Some(name) = &group_name {
                        obj.entry("deviceName").or_insert_with(|| name.clone());
                    }
                }
                parse_live_record(&log, &self.config)
            })
            .max_by_key(|vehicle| vehicle.recorded_at)
    }

    fn merge(&mut self, update: LiveVehicle) -> MergeOutcome {
        let outcome = match self.vehicles.get_mut(&update.device_id) {
            Some(held) => replace_if_newer(held, update),
            None => {
                self.vehicles.insert(update.device_id.clone(), update);
                MergeOutcome::Inserted
            }
        };
        if outcome.applied() {
            self.spatial_dirty = true;
        }
        outcome
    }

    /// Stop tracking a device.
    pub fn remove(&mut self, device_id: &str) -> Option<LiveVehicle> {
        let removed = self.vehicles.remove(device_id);
        if removed.is_some() {
            self.spatial_dirty = true;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.vehicles.clear();
        self.spatial_index = RTree::new();
        self.spatial_dirty = false;
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get(&self, device_id: &str) -> Option<&LiveVehicle> {
        self.vehicles.get(device_id)
    }

    /// All held positions, ordered by device id.
    pub fn vehicles(&self) -> Vec<&LiveVehicle> {
        let mut vehicles: Vec<&LiveVehicle> = self.vehicles.values().collect();
        vehicles.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        vehicles
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// Number of devices currently moving.
    pub fn moving_count(&self) -> usize {
        self.vehicles.values().filter(|v| v.is_moving()).count()
    }

    /// Bounding box of all held positions, for fitting the map.
    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_positions(self.vehicles.values().map(LiveVehicle::position))
    }

    fn ensure_spatial_index(&mut self) {
        if !self.spatial_dirty {
            return;
        }

        let indexed: Vec<IndexedVehicle> = self
            .vehicles
            .values()
            .map(|v| IndexedVehicle {
                device_id: v.device_id.clone(),
                lat: v.lat,
                lng: v.lng,
            })
            .collect();

        self.spatial_index = RTree::bulk_load(indexed);
        self.spatial_dirty = false;
    }

    /// Device ids inside a viewport, sorted.
    pub fn query_viewport(&mut self, bounds: &Bounds) -> Vec<String> {
        self.ensure_spatial_index();

        let search_bounds = AABB::from_corners(
            [bounds.min_lng, bounds.min_lat],
            [bounds.max_lng, bounds.max_lat],
        );

        let mut ids: Vec<String> = self
            .spatial_index
            .locate_in_envelope(&search_bounds)
            .map(|v| v.device_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Device ids within a square of `radius_degrees` around a point.
    pub fn find_nearby(&mut self, lat: f64, lng: f64, radius_degrees: f64) -> Vec<String> {
        self.query_viewport(&Bounds {
            min_lat: lat - radius_degrees,
            max_lat: lat + radius_degrees,
            min_lng: lng - radius_degrees,
            max_lng: lng + radius_degrees,
        })
    }

    /// Closest device to a point.
    pub fn nearest(&mut self, lat: f64, lng: f64) -> Option<&LiveVehicle> {
        self.ensure_spatial_index();
        let id = self
            .spatial_index
            .nearest_neighbor(&[lng, lat])
            .map(|v| v.device_id.clone())?;
        self.vehicles.get(&id)
    }
}

impl Default for LiveFleet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(id: &str, ts: &str, lat: f64, lng: f64, speed: f64) -> Value {
        json!({
            "deviceId": id,
            "timestamp": ts,
            "latitude": lat,
            "longitude": lng,
            "speed": speed,
            "azimuth": 90,
        })
    }

    #[test]
    fn test_merge_inserts_and_updates() {
        let vehicles = merge_live_update(&[], &update("A", "2024-05-01 08:00:00", 51.5, 0.1, 0.0));
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0].heading, 90.0);
        assert!(!vehicles[0].is_moving());

        let vehicles =
            merge_live_update(&vehicles, &update("A", "2024-05-01 08:00:10", 51.6, 0.2, 30.0));
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0].lat, 51.6);
        assert!(vehicles[0].is_moving());

        let vehicles =
            merge_live_update(&vehicles, &update("B", "2024-05-01 07:00:00", 52.0, 0.3, 0.0));
        assert_eq!(vehicles.len(), 2);
    }

    #[test]
    fn test_stale_update_does_not_regress() {
        let vehicles = merge_live_update(&[], &update("A", "2024-05-01 08:00:10", 51.6, 0.2, 30.0));
        let after = merge_live_update(&vehicles, &update("A", "2024-05-01 08:00:05", 51.5, 0.1, 10.0));
        assert_eq!(after, vehicles);
    }

    #[test]
    fn test_equal_timestamp_replaces() {
        let vehicles = merge_live_update(&[], &update("A", "2024-05-01 08:00:10", 51.6, 0.2, 30.0));
        let after = merge_live_update(&vehicles, &update("A", "2024-05-01 08:00:10", 51.7, 0.2, 30.0));
        assert_eq!(after[0].lat, 51.7);
    }

    #[test]
    fn test_unusable_updates_ignored() {
        let vehicles = merge_live_update(&[], &update("A", "2024-05-01 08:00:00", 51.5, 0.1, 0.0));

        let no_id = json!({"timestamp": "2024-05-01 08:00:10", "latitude": 1.0, "longitude": 1.0});
        let no_ts = json!({"deviceId": "A", "latitude": 1.0, "longitude": 1.0});
        let bad_ts = json!({"deviceId": "A", "timestamp": "yesterday", "latitude": 1.0});
        let zero = update("A", "2024-05-01 08:00:10", 0.0, 0.0, 0.0);

        for raw in [no_id, no_ts, bad_ts, zero] {
            assert_eq!(merge_live_update(&vehicles, &raw), vehicles);
        }
    }

    #[test]
    fn test_single_zero_coordinate_dropped() {
        let on_meridian = update("A", "2024-05-01 08:00:00", 51.5, 0.0, 0.0);
        assert!(merge_live_update(&[], &on_meridian).is_empty());
        let on_equator = update("A", "2024-05-01 08:00:00", 0.0, 32.5, 0.0);
        assert!(merge_live_update(&[], &on_equator).is_empty());

        let mut fleet = LiveFleet::new();
        assert_eq!(fleet.apply_update(&on_meridian), MergeOutcome::Dropped);
    }

    #[test]
    fn test_list_and_fleet_merge_agree() {
        let updates = [
            update("A", "2024-05-01 08:00:10", 51.6, 0.2, 30.0),
            update("A", "2024-05-01 08:00:05", 51.5, 0.1, 10.0),
            update("B", "2024-05-01 08:00:00", 52.0, 0.3, 0.0),
            update("A", "2024-05-01 08:00:20", 51.7, 0.3, 0.0),
        ];
        let mut list = Vec::new();
        let mut fleet = LiveFleet::new();
        for raw in &updates {
            list = merge_live_update(&list, raw);
            fleet.apply_update(raw);
        }
        let from_fleet: Vec<LiveVehicle> = fleet.vehicles().into_iter().cloned().collect();
        list.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        assert_eq!(list, from_fleet);
        assert_eq!(list[0].lat, 51.7);
    }

    #[test]
    fn test_zero_fix_kept_when_configured() {
        let config = LiveConfig {
            drop_zero_positions: false,
            ..LiveConfig::default()
        };
        let vehicles = merge_live_update_with(
            &[],
            &update("A", "2024-05-01 08:00:00", 0.0, 0.0, 0.0),
            &config,
        );
        assert_eq!(vehicles.len(), 1);
    }

    #[test]
    fn test_heading_normalized() {
        let mut raw = update("A", "2024-05-01 08:00:00", 51.5, 0.1, 0.0);
        raw["azimuth"] = json!(-90);
        let vehicle = parse_live_record(&raw, &LiveConfig::default()).unwrap();
        assert_eq!(vehicle.heading, 270.0);
    }

    #[test]
    fn test_snapshot_picks_newest_log_per_group() {
        let snapshot = json!({
            "data": [
                {
                    "deviceId": 1001,
                    "deviceName": "Van 1",
                    "logs": [
                        {"timestamp": "2024-05-01 08:00:05", "latitude": 51.51, "longitude": 0.11, "speed": 20},
                        {"timestamp": "2024-05-01 08:00:09", "latitude": 51.52, "longitude": 0.12, "speed": 25},
                        {"timestamp": "2024-05-01 08:00:01", "latitude": 51.50, "longitude": 0.10, "speed": 0}
                    ]
                },
                {
                    "deviceId": "1002",
                    "logs": [
                        {"timestamp": "2024-05-01 08:00:03", "latitude": 0.0, "longitude": 0.0}
                    ]
                },
                {"deviceId": "1003", "logs": []}
            ]
        });

        let mut fleet = LiveFleet::new();
        assert_eq!(fleet.ingest_snapshot(&snapshot), 1);

        let van = fleet.get("1001").unwrap();
        assert_eq!(van.name.as_deref(), Some("Van 1"));
        assert_eq!(van.timestamp, "2024-05-01 08:00:09");
        assert_eq!(van.lat, 51.52);
        assert!(fleet.get("1002").is_none());
        assert_eq!(fleet.moving_count(), 1);
    }

    #[test]
    fn test_snapshot_then_stale_push() {
        let mut fleet = LiveFleet::new();
        fleet.ingest_snapshot(&json!([update("A", "2024-05-01 08:00:10", 51.6, 0.2, 30.0)]));

        let outcome = fleet.apply_update(&update("A", "2024-05-01 08:00:02", 51.5, 0.1, 0.0));
        assert_eq!(outcome, MergeOutcome::Stale);
        assert_eq!(fleet.get("A").unwrap().lat, 51.6);

        let outcome = fleet.apply_update(&update("A", "2024-05-01 08:00:12", 51.7, 0.2, 0.0));
        assert_eq!(outcome, MergeOutcome::Updated);
        assert_eq!(
            fleet.apply_update(&json!({"deviceId": "A"})),
            MergeOutcome::Dropped
        );
    }

    #[test]
    fn test_name_survives_update_without_name() {
        let mut fleet = LiveFleet::new();
        let mut first = update("A", "2024-05-01 08:00:00", 51.5, 0.1, 0.0);
        first["deviceName"] = json!("Truck");
        fleet.apply_update(&first);
        fleet.apply_update(&update("A", "2024-05-01 08:00:05", 51.5, 0.1, 0.0));
        assert_eq!(fleet.get("A").unwrap().name.as_deref(), Some("Truck"));
    }

    #[test]
    fn test_viewport_and_nearby() {
        let mut fleet = LiveFleet::new();
        fleet.apply_update(&update("A", "2024-05-01 08:00:00", 51.50, 0.10, 0.0));
        fleet.apply_update(&update("B", "2024-05-01 08:00:00", 51.51, 0.11, 0.0));
        fleet.apply_update(&update("C", "2024-05-01 08:00:00", 52.50, 1.10, 0.0));

        let viewport = Bounds {
            min_lat: 51.4,
            max_lat: 51.6,
            min_lng: 0.0,
            max_lng: 0.2,
        };
        assert_eq!(fleet.query_viewport(&viewport), vec!["A", "B"]);
        assert_eq!(fleet.find_nearby(52.5, 1.1, 0.01), vec!["C"]);
        assert_eq!(fleet.nearest(51.509, 0.109).unwrap().device_id, "B");

        // Index follows moves and removals
        fleet.apply_update(&update("C", "2024-05-01 08:00:05", 51.45, 0.05, 10.0));
        fleet.remove("A");
        assert_eq!(fleet.query_viewport(&viewport), vec!["B", "C"]);

        let bounds = fleet.bounds().unwrap();
        assert_eq!(bounds.min_lat, 51.45);
        assert_eq!(bounds.max_lng, 0.11);
    }

    #[test]
    fn test_empty_fleet() {
        let mut fleet = LiveFleet::default();
        assert!(fleet.is_empty());
        assert!(fleet.bounds().is_none());
        assert!(fleet.nearest(0.0, 0.0).is_none());
        assert_eq!(fleet.ingest_snapshot(&json!("nope")), 0);
    }
}
