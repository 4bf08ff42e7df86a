// src/types.rs
//
// Domain types shared across the engine, plus the Config tree loaded
// from YAML. Policy constants (cooldowns, confirmation thresholds, retry
// delays) live in config, not in code — they are tuning knobs, not
// structure.

use serde::{Deserialize, Serialize};

// ============================================================================
// GEOMETRY
// ============================================================================

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A geofence zone. Vertices are immutable once loaded into the cache —
/// the whole set is replaced wholesale on refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    /// Polygon boundary. Stored open (no duplicated closing vertex);
    /// the containment test closes the ring implicitly.
    pub vertices: Vec<GeoPoint>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_color")]
    pub color_code: String,
}

fn default_true() -> bool {
    true
}

fn default_color() -> String {
    "#3388ff".to_string()
}

impl Zone {
    /// Drop a duplicated closing vertex if the source sent the ring closed.
    /// The ray-cast wraps the last edge back to the first vertex itself.
    pub fn normalized(mut self) -> Self {
        if self.vertices.len() >= 2 {
            let first = self.vertices[0];
            let last = self.vertices[self.vertices.len() - 1];
            if first == last {
                self.vertices.pop();
            }
        }
        self
    }

    /// A zone needs at least 3 vertices to bound any area.
    pub fn is_polygon(&self) -> bool {
        self.vertices.len() >= 3
    }

    /// Arithmetic centroid of the vertices, for map display and log context.
    pub fn centroid(&self) -> Option<GeoPoint> {
        if self.vertices.is_empty() {
            return None;
        }
        let n = self.vertices.len() as f64;
        let (lat_sum, lon_sum) = self
            .vertices
            .iter()
            .fold((0.0, 0.0), |(la, lo), v| (la + v.latitude, lo + v.longitude));
        Some(GeoPoint::new(lat_sum / n, lon_sum / n))
    }
}

// ============================================================================
// INBOUND EVENTS
// ============================================================================

/// One position report from field hardware. Consumed once; anything
/// downstream keeps only what it persists itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionReport {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,
    /// Epoch ms at receipt. The transport stamps this; trackers treat it
    /// as "now" so decisions are reproducible.
    pub received_at_ms: u64,
}

impl PositionReport {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Discrete (non-positional) alert kinds from the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscreteAlertKind {
    Movement,
    Crash,
}

impl DiscreteAlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movement => "movement",
            Self::Crash => "crash",
        }
    }
}

/// A discrete alert event (unauthorized movement, crash impact).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub device_id: String,
    pub kind: DiscreteAlertKind,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    pub received_at_ms: u64,
}

// ============================================================================
// RECORDS
// ============================================================================

/// Closed enumeration of violation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    ExitZone,
    UnauthorizedParking,
    SpeedLimit,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExitZone => "EXIT_ZONE",
            Self::UnauthorizedParking => "UNAUTHORIZED_PARKING",
            Self::SpeedLimit => "SPEED_LIMIT",
        }
    }

    /// Map a raw upstream kind string. Upstream historically emitted both
    /// `GEOFENCE_EXIT` and `EXIT_ZONE` for the same condition; anything
    /// unrecognized is treated as an exit.
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "GEOFENCE_EXIT" | "EXIT_ZONE" => Self::ExitZone,
            "UNAUTHORIZED_PARKING" => Self::UnauthorizedParking,
            "SPEED_LIMIT" => Self::SpeedLimit,
            _ => Self::ExitZone,
        }
    }
}

/// A validated violation. Created by the validator only after re-deriving
/// containment from canonical data — never speculatively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub id: String,
    pub device_id: String,
    pub zone_id: String,
    pub customer_id: Option<String>,
    pub rental_id: Option<String>,
    pub kind: ViolationKind,
    pub location: GeoPoint,
    pub occurred_at_ms: u64,
    pub resolved: bool,
    pub resolved_at_ms: Option<u64>,
    pub notes: String,
}

/// Alert kinds persisted alongside an admitted alert decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Movement,
    Crash,
    GeofenceCross,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movement => "movement",
            Self::Crash => "crash",
            Self::GeofenceCross => "geofence_cross",
        }
    }
}

impl From<DiscreteAlertKind> for AlertKind {
    fn from(kind: DiscreteAlertKind) -> Self {
        match kind {
            DiscreteAlertKind::Movement => Self::Movement,
            DiscreteAlertKind::Crash => Self::Crash,
        }
    }
}

/// Side-effect record of an admitted alert decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub device_id: String,
    pub kind: AlertKind,
    pub message: String,
    pub created_at_ms: u64,
    pub resolved: bool,
}

/// Device status values understood by the device-state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Available,
    InUse,
    Maintenance,
    Offline,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::InUse => "IN_USE",
            Self::Maintenance => "MAINTENANCE",
            Self::Offline => "OFFLINE",
        }
    }
}

/// Outbound best-effort command to a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DeviceCommand {
    pub fn alert(reason: &str) -> Self {
        Self {
            command: "alert".to_string(),
            reason: Some(reason.to_string()),
        }
    }

    pub fn lock() -> Self {
        Self {
            command: "lock".to_string(),
            reason: None,
        }
    }
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub zones: ZoneCacheConfig,
    #[serde(default)]
    pub crossing: CrossingConfig,
    #[serde(default)]
    pub movement: MovementConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneCacheConfig {
    /// How long a fetched zone snapshot stays fresh.
    pub ttl_ms: u64,
}

impl Default for ZoneCacheConfig {
    fn default() -> Self {
        Self { ttl_ms: 60_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossingConfig {
    /// Quiet period after an admitted exit alert while the device stays
    /// outside. Throttles repeat notification storms.
    pub alert_cooldown_ms: u64,
    /// Shrunk cooldown applied once a device is confirmed back inside.
    /// A confirmed return may re-trigger faster than a device that never
    /// came back.
    pub post_return_cooldown_ms: u64,
    /// Consecutive inside reports required to clear an active alert.
    /// Filters single spurious "inside" readings from flapping GPS.
    pub inside_confirmations: u32,
}

impl Default for CrossingConfig {
    fn default() -> Self {
        Self {
            alert_cooldown_ms: 5 * 60 * 1000,
            post_return_cooldown_ms: 60 * 1000,
            inside_confirmations: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementConfig {
    /// Minimum gap between admitted movement/crash alerts per device.
    pub cooldown_ms: u64,
    /// Delay before the processing lock is released after an admission
    /// completes (success or failure).
    pub release_buffer_ms: u64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 2 * 60 * 1000,
            release_buffer_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Fixed delay before the single carrier-transient retry.
    pub retry_delay_ms: u64,
    /// Recipients for every alert notification.
    pub recipients: Vec<String>,
    /// SMS gateway endpoint (used by the HTTP transport).
    pub gateway_url: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 5_000,
            recipients: Vec::new(),
            gateway_url: "http://localhost:8080/sms".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Two raw records for the same device+zone whose timestamps differ by
    /// less than this are treated as redeliveries of one violation.
    pub dedup_tolerance_ms: u64,
    /// Maximum raw records consumed by one catch-up pass.
    pub catch_up_limit: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            dedup_tolerance_ms: 2_000,
            catch_up_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on any single collaborator call (store read/write,
    /// command publish). A timeout is a terminal failure for that call.
    pub op_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            op_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "geofence_engine=info".to_string(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_zone(vertices: Vec<GeoPoint>) -> Zone {
        Zone {
            id: "z1".to_string(),
            name: "Test".to_string(),
            vertices,
            is_active: true,
            color_code: "#3388ff".to_string(),
        }
    }

    #[test]
    fn normalized_drops_closing_vertex() {
        let zone = rect_zone(vec![
            GeoPoint::new(14.65, 120.98),
            GeoPoint::new(14.65, 121.05),
            GeoPoint::new(14.71, 121.05),
            GeoPoint::new(14.65, 120.98),
        ])
        .normalized();
        assert_eq!(zone.vertices.len(), 3);
        assert!(zone.is_polygon());
    }

    #[test]
    fn two_vertices_is_not_a_polygon() {
        let zone = rect_zone(vec![GeoPoint::new(14.65, 120.98), GeoPoint::new(14.71, 121.05)]);
        assert!(!zone.is_polygon());
    }

    #[test]
    fn violation_kind_maps_raw_strings() {
        assert_eq!(ViolationKind::from_raw("GEOFENCE_EXIT"), ViolationKind::ExitZone);
        assert_eq!(ViolationKind::from_raw("EXIT_ZONE"), ViolationKind::ExitZone);
        assert_eq!(
            ViolationKind::from_raw("UNAUTHORIZED_PARKING"),
            ViolationKind::UnauthorizedParking
        );
        assert_eq!(ViolationKind::from_raw("SPEED_LIMIT"), ViolationKind::SpeedLimit);
        // Unknown strings default to an exit violation
        assert_eq!(ViolationKind::from_raw("GEOFENCE EXIT"), ViolationKind::ExitZone);
    }

    #[test]
    fn centroid_of_rectangle() {
        let zone = rect_zone(vec![
            GeoPoint::new(14.65, 120.98),
            GeoPoint::new(14.65, 121.05),
            GeoPoint::new(14.71, 121.05),
            GeoPoint::new(14.71, 120.98),
        ]);
        let c = zone.centroid().unwrap();
        assert!((c.latitude - 14.68).abs() < 1e-9);
        assert!((c.longitude - 121.015).abs() < 1e-9);
    }
}
