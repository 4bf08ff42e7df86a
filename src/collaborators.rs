// src/collaborators.rs
//
// External collaborator interfaces. The engine core never talks to a
// concrete backend directly — message transport, the two durable stores,
// the rental ledger, the command channel, and the SMS gateway are all
// behind these traits. In-memory implementations back the tests and the
// demo feed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{AlertRecord, DeviceCommand, DeviceStatus, ViolationRecord, Zone};

/// Errors surfaced by collaborators. Never fatal to the process — every
/// per-event handler recovers by logging and dropping the event.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("operation timed out after {0}ms")]
    Timeout(u64),
}

/// An upstream-claimed violation awaiting validation. The `data` payload
/// is kept raw — upstream writers disagree on the location encoding and
/// the validator owns normalization.
#[derive(Debug, Clone)]
pub struct RawViolation {
    pub id: String,
    pub data: Value,
}

/// Active rental attached to a violation when one exists.
#[derive(Debug, Clone)]
pub struct ActiveRental {
    pub customer_id: Option<String>,
    pub rental_id: String,
}

// ============================================================================
// TRAITS
// ============================================================================

/// Source of active zone polygons (the mutable low-latency store).
#[async_trait]
pub trait ZoneSource: Send + Sync {
    async fn fetch_active_zones(&self) -> Result<Vec<Zone>, StoreError>;

    /// Canonical zone lookup by id, used by the validator.
    async fn fetch_zone(&self, zone_id: &str) -> Result<Option<Zone>, StoreError>;
}

/// Canonical per-device state: current zone assignment and status.
#[async_trait]
pub trait DeviceStateStore: Send + Sync {
    async fn current_zone_id(&self, device_id: &str) -> Result<Option<String>, StoreError>;

    async fn update_device_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
    ) -> Result<(), StoreError>;
}

/// Rental ledger lookup.
#[async_trait]
pub trait RentalLookup: Send + Sync {
    async fn find_active_rental(&self, device_id: &str)
        -> Result<Option<ActiveRental>, StoreError>;
}

/// Append-only historical store for violation and alert records, plus the
/// raw violation feed the validator consumes.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn append_raw_violation(&self, raw: RawViolation) -> Result<(), StoreError>;

    /// Most recent raw violations first, bounded by `limit` (catch-up pass).
    async fn recent_raw_violations(&self, limit: usize) -> Result<Vec<RawViolation>, StoreError>;

    async fn append_violation(&self, record: ViolationRecord) -> Result<(), StoreError>;

    async fn append_alert(&self, record: AlertRecord) -> Result<(), StoreError>;

    /// Validated violations for one device, for duplicate detection.
    async fn violations_for_device(
        &self,
        device_id: &str,
    ) -> Result<Vec<ViolationRecord>, StoreError>;
}

/// Best-effort outbound device command channel. Fire-and-forget — no
/// acknowledgment is required by this core.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn publish(&self, device_id: &str, command: &DeviceCommand) -> Result<(), StoreError>;
}

/// Provider response from one SMS send. The body is matched against the
/// carrier-transient substring contract by the dispatcher.
#[derive(Debug, Clone)]
pub struct SmsResponse {
    pub status: u16,
    pub body: String,
}

impl SmsResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound notification transport.
#[async_trait]
pub trait SmsTransport: Send + Sync {
    async fn send(&self, recipient: &str, message: &str) -> Result<SmsResponse, StoreError>;
}

// ============================================================================
// IN-MEMORY IMPLEMENTATIONS
// ============================================================================

/// In-memory zone source. `set_fail` simulates a store outage.
#[derive(Default)]
pub struct InMemoryZoneSource {
    zones: RwLock<Vec<Zone>>,
    fail: AtomicBool,
}

impl InMemoryZoneSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_zone(&self, zone: Zone) {
        if let Ok(mut zones) = self.zones.write() {
            zones.retain(|z| z.id != zone.id);
            zones.push(zone);
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ZoneSource for InMemoryZoneSource {
    async fn fetch_active_zones(&self) -> Result<Vec<Zone>, StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("zone source outage".to_string()));
        }
        let zones = self
            .zones
            .read()
            .map(|z| z.iter().filter(|z| z.is_active).cloned().collect())
            .unwrap_or_default();
        Ok(zones)
    }

    async fn fetch_zone(&self, zone_id: &str) -> Result<Option<Zone>, StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("zone source outage".to_string()));
        }
        let zone = self
            .zones
            .read()
            .ok()
            .and_then(|z| z.iter().find(|z| z.id == zone_id).cloned());
        Ok(zone)
    }
}

#[derive(Default)]
pub struct InMemoryDeviceStateStore {
    zone_assignments: RwLock<HashMap<String, String>>,
    statuses: RwLock<HashMap<String, DeviceStatus>>,
}

impl InMemoryDeviceStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign_zone(&self, device_id: &str, zone_id: &str) {
        if let Ok(mut map) = self.zone_assignments.write() {
            map.insert(device_id.to_string(), zone_id.to_string());
        }
    }

    pub fn status_of(&self, device_id: &str) -> Option<DeviceStatus> {
        self.statuses
            .read()
            .ok()
            .and_then(|map| map.get(device_id).copied())
    }
}

#[async_trait]
impl DeviceStateStore for InMemoryDeviceStateStore {
    async fn current_zone_id(&self, device_id: &str) -> Result<Option<String>, StoreError> {
        let zone = self
            .zone_assignments
            .read()
            .ok()
            .and_then(|map| map.get(device_id).cloned());
        Ok(zone)
    }

    async fn update_device_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
    ) -> Result<(), StoreError> {
        self.statuses
            .write()
            .map(|mut map| {
                map.insert(device_id.to_string(), status);
            })
            .map_err(|_| StoreError::Unavailable("status map poisoned".to_string()))
    }
}

#[derive(Default)]
pub struct InMemoryRentalLookup {
    rentals: RwLock<HashMap<String, ActiveRental>>,
}

impl InMemoryRentalLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_rental(&self, device_id: &str, rental: ActiveRental) {
        if let Ok(mut map) = self.rentals.write() {
            map.insert(device_id.to_string(), rental);
        }
    }
}

#[async_trait]
impl RentalLookup for InMemoryRentalLookup {
    async fn find_active_rental(
        &self,
        device_id: &str,
    ) -> Result<Option<ActiveRental>, StoreError> {
        let rental = self
            .rentals
            .read()
            .ok()
            .and_then(|map| map.get(device_id).cloned());
        Ok(rental)
    }
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    raw: RwLock<Vec<RawViolation>>,
    violations: RwLock<Vec<ViolationRecord>>,
    alerts: RwLock<Vec<AlertRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn violation_count(&self) -> usize {
        self.violations.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.read().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn violations(&self) -> Vec<ViolationRecord> {
        self.violations.read().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn raw_count(&self) -> usize {
        self.raw.read().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn append_raw_violation(&self, raw: RawViolation) -> Result<(), StoreError> {
        self.raw
            .write()
            .map(|mut v| v.push(raw))
            .map_err(|_| StoreError::Unavailable("raw log poisoned".to_string()))
    }

    async fn recent_raw_violations(&self, limit: usize) -> Result<Vec<RawViolation>, StoreError> {
        let raw = self
            .raw
            .read()
            .map(|v| v.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default();
        Ok(raw)
    }

    async fn append_violation(&self, record: ViolationRecord) -> Result<(), StoreError> {
        self.violations
            .write()
            .map(|mut v| v.push(record))
            .map_err(|_| StoreError::Unavailable("violation log poisoned".to_string()))
    }

    async fn append_alert(&self, record: AlertRecord) -> Result<(), StoreError> {
        self.alerts
            .write()
            .map(|mut a| a.push(record))
            .map_err(|_| StoreError::Unavailable("alert log poisoned".to_string()))
    }

    async fn violations_for_device(
        &self,
        device_id: &str,
    ) -> Result<Vec<ViolationRecord>, StoreError> {
        let records = self
            .violations
            .read()
            .map(|v| v.iter().filter(|r| r.device_id == device_id).cloned().collect())
            .unwrap_or_default();
        Ok(records)
    }
}

#[derive(Default)]
pub struct InMemoryCommandChannel {
    published: Mutex<Vec<(String, DeviceCommand)>>,
}

impl InMemoryCommandChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, DeviceCommand)> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommandChannel for InMemoryCommandChannel {
    async fn publish(&self, device_id: &str, command: &DeviceCommand) -> Result<(), StoreError> {
        self.published
            .lock()
            .map(|mut p| p.push((device_id.to_string(), command.clone())))
            .map_err(|_| StoreError::Transport("command channel poisoned".to_string()))
    }
}
