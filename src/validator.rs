// src/validator.rs
//
// Secondary validation pass over upstream-claimed violations.
//
// Deliberately decoupled from the crossing tracker: this path re-derives
// containment from canonical truth (the device's assigned zone and that
// zone's canonical polygon) before a violation is allowed into the
// ledger. A single faulty upstream path cannot corrupt the record on its
// own — stale device state that reports an "exit" for a point that is
// still inside gets discarded here as a false positive.
//
// The pipeline drives it both as a continuous consumer of raw records
// and in a bounded catch-up pass over the most recent backlog.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborators::{DeviceStateStore, RecordStore, RentalLookup, StoreError, ZoneSource};
use crate::containment::point_in_polygon;
use crate::types::{GeoPoint, ValidatorConfig, ViolationKind, ViolationRecord};

/// Why a raw record was not committed. None of these are errors — each is
/// a designed, logged outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Missing device id or unrecognized location encoding.
    MalformedRecord,
    /// Device has no canonical zone assignment to validate against.
    NoZoneAssignment,
    /// Assigned zone not found in the canonical store.
    NoPolygon,
    /// Zone exists but its polygon cannot bound any area. Zero confidence —
    /// the record is not created speculatively.
    DegeneratePolygon,
    /// The point is actually inside the canonical polygon; upstream state
    /// went stale and claimed an exit that never held.
    FalsePositive,
    /// An equivalent violation is already recorded (at-least-once
    /// redelivery of the same raw record).
    Duplicate,
}

#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Committed(ViolationRecord),
    Skipped(SkipReason),
}

impl ValidationOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// Normalize the heterogeneous location encodings upstream writers emit
/// into a canonical (lat, lon) pair. Four shapes are accepted:
///
///   1. geo-point object, private-field convention: {"_latitude", "_longitude"}
///   2. geo-point object, public fields:            {"latitude", "longitude"}
///   3. two-element ordered pair:                   [lat, lon]
///   4. short-key map:                              {"lat", "lng"}
///
/// Anything else is a hard validation failure for the record.
pub fn normalize_location(value: &Value) -> Option<GeoPoint> {
    fn num(v: &Value) -> Option<f64> {
        match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    if let Value::Object(map) = value {
        if let (Some(lat), Some(lon)) = (map.get("_latitude"), map.get("_longitude")) {
            return Some(GeoPoint::new(num(lat)?, num(lon)?));
        }
        if let (Some(lat), Some(lon)) = (map.get("latitude"), map.get("longitude")) {
            return Some(GeoPoint::new(num(lat)?, num(lon)?));
        }
        if let (Some(lat), Some(lon)) = (map.get("lat"), map.get("lng")) {
            return Some(GeoPoint::new(num(lat)?, num(lon)?));
        }
    }

    if let Value::Array(items) = value {
        if items.len() >= 2 {
            return Some(GeoPoint::new(num(&items[0])?, num(&items[1])?));
        }
    }

    None
}

pub struct ViolationValidator {
    config: ValidatorConfig,
    zones: Arc<dyn ZoneSource>,
    devices: Arc<dyn DeviceStateStore>,
    rentals: Arc<dyn RentalLookup>,
    records: Arc<dyn RecordStore>,
}

impl ViolationValidator {
    pub fn new(
        config: ValidatorConfig,
        zones: Arc<dyn ZoneSource>,
        devices: Arc<dyn DeviceStateStore>,
        rentals: Arc<dyn RentalLookup>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            config,
            zones,
            devices,
            rentals,
            records,
        }
    }

    /// Validate one raw violation record and commit it if it holds up.
    ///
    /// `now_ms` backfills a missing timestamp; everything else comes from
    /// the record or the canonical stores.
    pub async fn process_violation(
        &self,
        raw_id: &str,
        data: &Value,
        now_ms: u64,
    ) -> Result<ValidationOutcome, StoreError> {
        let Some(device_id) = data.get("device_id").and_then(Value::as_str) else {
            warn!("Raw violation {} has no device_id — dropping", raw_id);
            return Ok(ValidationOutcome::Skipped(SkipReason::MalformedRecord));
        };

        info!("Validating raw violation {} for {}", raw_id, device_id);

        let Some(point) = data.get("location").and_then(|l| normalize_location(l)) else {
            let location = data.get("location").cloned().unwrap_or(Value::Null);
            warn!(
                "Raw violation {} has an unrecognized location encoding: {} — dropping",
                raw_id, location
            );
            return Ok(ValidationOutcome::Skipped(SkipReason::MalformedRecord));
        };

        // Upstream writers emit both integer and float-encoded timestamps
        let occurred_at_ms = data
            .get("timestamp")
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
            .unwrap_or(now_ms);

        // Canonical zone assignment for the device
        let Some(zone_id) = self.devices.current_zone_id(device_id).await? else {
            warn!(
                "No zone assignment for {} — cannot validate raw violation {}",
                device_id, raw_id
            );
            return Ok(ValidationOutcome::Skipped(SkipReason::NoZoneAssignment));
        };

        // Canonical polygon for that zone
        let Some(zone) = self.zones.fetch_zone(&zone_id).await? else {
            warn!(
                "Zone {} not found — skipping raw violation {} (zero confidence)",
                zone_id, raw_id
            );
            return Ok(ValidationOutcome::Skipped(SkipReason::NoPolygon));
        };
        let zone = zone.normalized();
        if !zone.is_polygon() {
            warn!(
                "Zone {} polygon is degenerate ({} vertices) — skipping raw violation {} (zero confidence)",
                zone.id,
                zone.vertices.len(),
                raw_id
            );
            return Ok(ValidationOutcome::Skipped(SkipReason::DegeneratePolygon));
        }

        // Re-derive containment from canonical inputs
        if point_in_polygon(&point, &zone.vertices) {
            info!(
                "Location ({}, {}) is still inside zone {} — raw violation {} is a FALSE POSITIVE, not recording",
                point.latitude, point.longitude, zone.id, raw_id
            );
            return Ok(ValidationOutcome::Skipped(SkipReason::FalsePositive));
        }
        debug!(
            "Validated: ({}, {}) is outside zone {} — recording",
            point.latitude, point.longitude, zone.id
        );

        // At-least-once redelivery guard
        let existing = self.records.violations_for_device(device_id).await?;
        let duplicate = existing.iter().any(|r| {
            r.zone_id == zone.id
                && r.occurred_at_ms.abs_diff(occurred_at_ms) <= self.config.dedup_tolerance_ms
        });
        if duplicate {
            info!(
                "Violation for {} in zone {} at {} already recorded — skipping duplicate",
                device_id, zone.id, occurred_at_ms
            );
            return Ok(ValidationOutcome::Skipped(SkipReason::Duplicate));
        }

        // Attach the active rental when one exists. A rental-store outage
        // degrades to an unattributed record rather than losing the violation.
        let rental = match self.rentals.find_active_rental(device_id).await {
            Ok(rental) => rental,
            Err(e) => {
                warn!("Rental lookup failed for {}: {} — recording without rental", device_id, e);
                None
            }
        };

        let kind = data
            .get("violation_type")
            .and_then(Value::as_str)
            .map(ViolationKind::from_raw)
            .unwrap_or(ViolationKind::ExitZone);

        let record = ViolationRecord {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            zone_id: zone.id.clone(),
            customer_id: rental.as_ref().and_then(|r| r.customer_id.clone()),
            rental_id: rental.map(|r| r.rental_id),
            kind,
            location: point,
            occurred_at_ms,
            resolved: false,
            resolved_at_ms: None,
            notes: format!("Auto-validated from raw violation {}", raw_id),
        };

        self.records.append_violation(record.clone()).await?;
        info!(
            "✓ Committed violation {} for {} in zone {} at ({}, {})",
            record.id, device_id, zone.name, point.latitude, point.longitude
        );
        Ok(ValidationOutcome::Committed(record))
    }

}
