// src/pipeline/engine.rs
//
// The engine owns one handler per inbound event class:
//
//   handle_position      — containment + crossing decision + side effects
//   handle_discrete_alert — movement/crash admission + side effects
//   handle_raw_violation — raw claim intake + independent validation
//
// Decision modules stay pure; every side effect (record append, device
// command, notification fan-out) happens here. Side-effect failures are
// logged and counted, never propagated — a store hiccup must not undo a
// state transition that already committed. Every collaborator call is
// bounded by the configured operation timeout; a timeout is terminal for
// that call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collaborators::{
    CommandChannel, DeviceStateStore, RawViolation, RecordStore, RentalLookup, SmsTransport,
    StoreError, ZoneSource,
};
use crate::containment::is_inside_any;
use crate::crossing_tracker::{CrossingDecision, CrossingTracker};
use crate::dispatcher::NotificationDispatcher;
use crate::movement_tracker::{MovementDecision, MovementGuard};
use crate::pipeline::metrics::PipelineMetrics;
use crate::types::{
    AlertEvent, AlertKind, AlertRecord, Config, DeviceCommand, DeviceStatus, DiscreteAlertKind,
    PositionReport,
};
use crate::validator::{ValidationOutcome, ViolationValidator};
use crate::zone_cache::ZoneCache;

/// Terminal handling of one discrete alert event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscreteOutcome {
    Processed,
    RejectedCooldown,
    RejectedLocked,
}

pub struct Engine {
    config: Config,
    zones: ZoneCache,
    crossing: CrossingTracker,
    movement: MovementGuard,
    dispatcher: NotificationDispatcher,
    validator: ViolationValidator,
    devices: Arc<dyn DeviceStateStore>,
    records: Arc<dyn RecordStore>,
    commands: Arc<dyn CommandChannel>,
    metrics: Arc<PipelineMetrics>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        zone_source: Arc<dyn ZoneSource>,
        devices: Arc<dyn DeviceStateStore>,
        rentals: Arc<dyn RentalLookup>,
        records: Arc<dyn RecordStore>,
        commands: Arc<dyn CommandChannel>,
        sms: Arc<dyn SmsTransport>,
    ) -> Self {
        let zones = ZoneCache::new(zone_source.clone(), &config.zones);
        let crossing = CrossingTracker::new(config.crossing.clone());
        let movement = MovementGuard::new(config.movement.clone());
        let dispatcher = NotificationDispatcher::new(sms, config.dispatch.retry_delay_ms);
        let validator = ViolationValidator::new(
            config.validator.clone(),
            zone_source,
            devices.clone(),
            rentals,
            records.clone(),
        );
        Self {
            config,
            zones,
            crossing,
            movement,
            dispatcher,
            validator,
            devices,
            records,
            commands,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    /// Bound one collaborator call by the configured operation timeout.
    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let timeout_ms = self.config.engine.op_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(timeout_ms)),
        }
    }

    // ========================================================================
    // POSITION REPORTS
    // ========================================================================

    /// Process one position report end to end. The only error that
    /// propagates is a zone set that cannot be resolved at all (no cache
    /// snapshot has ever loaded); the event is dropped and counted.
    pub async fn handle_position(
        &self,
        report: &PositionReport,
    ) -> Result<CrossingDecision, StoreError> {
        PipelineMetrics::incr(&self.metrics.positions_processed);

        let zones = match self.bounded(self.zones.active_zones()).await {
            Ok(zones) => zones,
            Err(e) => {
                PipelineMetrics::incr(&self.metrics.collaborator_errors);
                error!(
                    "Dropping position report for {}: zone set unavailable ({})",
                    report.device_id, e
                );
                return Err(e);
            }
        };

        let point = report.point();
        let containing = is_inside_any(&point, &zones);
        let decision = self
            .crossing
            .observe(&report.device_id, containing.is_some(), report.received_at_ms)
            .await;

        match decision {
            CrossingDecision::Admit => {
                PipelineMetrics::incr(&self.metrics.crossings_admitted);
                self.emit_crossing_side_effects(report).await;
            }
            CrossingDecision::Suppressed { .. } => {
                PipelineMetrics::incr(&self.metrics.crossings_suppressed);
            }
            CrossingDecision::ReturnConfirmed => {
                PipelineMetrics::incr(&self.metrics.returns_confirmed);
            }
            CrossingDecision::Confirming { .. } | CrossingDecision::Calm => {}
        }
        Ok(decision)
    }

    /// Side effects of an admitted zone exit. The crossing state transition
    /// has already committed; each effect here is independent and
    /// best-effort.
    async fn emit_crossing_side_effects(&self, report: &PositionReport) {
        let device_id = &report.device_id;
        let point = report.point();
        let message = format!(
            "GEOFENCE ALERT: {} left its assigned zone at ({:.5}, {:.5})",
            device_id, point.latitude, point.longitude
        );

        // Device-directed out-of-bounds signal, not required to succeed
        let command = DeviceCommand::alert("geofence_exit");
        if let Err(e) = self
            .bounded(self.commands.publish(device_id, &command))
            .await
        {
            PipelineMetrics::incr(&self.metrics.collaborator_errors);
            warn!("Device command publish failed for {}: {}", device_id, e);
        }

        let alert = AlertRecord {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.clone(),
            kind: AlertKind::GeofenceCross,
            message: message.clone(),
            created_at_ms: report.received_at_ms,
            resolved: false,
        };
        if let Err(e) = self.bounded(self.records.append_alert(alert)).await {
            PipelineMetrics::incr(&self.metrics.collaborator_errors);
            error!("Alert record append failed for {}: {}", device_id, e);
        }

        // Raw violation claim for the independent validation pass. The
        // validator re-derives containment from canonical data before this
        // becomes a trusted ViolationRecord.
        let raw = RawViolation {
            id: Uuid::new_v4().to_string(),
            data: serde_json::json!({
                "device_id": device_id,
                "location": {"latitude": point.latitude, "longitude": point.longitude},
                "timestamp": report.received_at_ms,
                "violation_type": "GEOFENCE_EXIT",
            }),
        };
        if let Err(e) = self.bounded(self.records.append_raw_violation(raw)).await {
            PipelineMetrics::incr(&self.metrics.collaborator_errors);
            error!("Raw violation append failed for {}: {}", device_id, e);
        }

        let result = self
            .dispatcher
            .dispatch(
                device_id,
                AlertKind::GeofenceCross,
                &message,
                &self.config.dispatch.recipients,
            )
            .await;
        PipelineMetrics::add(&self.metrics.notifications_sent, result.successes() as u64);
        PipelineMetrics::add(&self.metrics.notifications_failed, result.failures() as u64);
    }

    // ========================================================================
    // DISCRETE ALERTS
    // ========================================================================

    /// Process one movement/crash alert event. Admission state is written
    /// before any side effect runs; the permit's drop schedules the lock
    /// release whether or not the effects succeed.
    pub async fn handle_discrete_alert(&self, event: &AlertEvent) -> DiscreteOutcome {
        let decision = self
            .movement
            .try_admit(&event.device_id, event.received_at_ms)
            .await;

        let _permit = match decision {
            MovementDecision::Admitted(permit) => permit,
            MovementDecision::RejectedCooldown { remaining_ms } => {
                PipelineMetrics::incr(&self.metrics.discrete_alerts_rejected);
                info!(
                    "🚫 {} alert rejected for {}: {}ms of cooldown remaining",
                    event.kind.as_str(),
                    event.device_id,
                    remaining_ms
                );
                return DiscreteOutcome::RejectedCooldown;
            }
            MovementDecision::RejectedLocked => {
                PipelineMetrics::incr(&self.metrics.discrete_alerts_rejected);
                return DiscreteOutcome::RejectedLocked;
            }
        };

        PipelineMetrics::incr(&self.metrics.discrete_alerts_admitted);

        let (status, message) = match event.kind {
            DiscreteAlertKind::Crash => (
                DeviceStatus::Offline,
                format!("CRASH ALERT: impact detected on {}", event.device_id),
            ),
            DiscreteAlertKind::Movement => (
                DeviceStatus::Maintenance,
                format!(
                    "MOVEMENT ALERT: unauthorized movement detected on {}",
                    event.device_id
                ),
            ),
        };
        info!("🚨 {} admitted for {}", event.kind.as_str(), event.device_id);

        if let Err(e) = self
            .bounded(self.devices.update_device_status(&event.device_id, status))
            .await
        {
            PipelineMetrics::incr(&self.metrics.collaborator_errors);
            error!(
                "Status update to {} failed for {}: {}",
                status.as_str(),
                event.device_id,
                e
            );
        }

        let alert = AlertRecord {
            id: Uuid::new_v4().to_string(),
            device_id: event.device_id.clone(),
            kind: event.kind.into(),
            message: message.clone(),
            created_at_ms: event.received_at_ms,
            resolved: false,
        };
        if let Err(e) = self.bounded(self.records.append_alert(alert)).await {
            PipelineMetrics::incr(&self.metrics.collaborator_errors);
            error!("Alert record append failed for {}: {}", event.device_id, e);
        }

        let result = self
            .dispatcher
            .dispatch(
                &event.device_id,
                event.kind.into(),
                &message,
                &self.config.dispatch.recipients,
            )
            .await;
        PipelineMetrics::add(&self.metrics.notifications_sent, result.successes() as u64);
        PipelineMetrics::add(&self.metrics.notifications_failed, result.failures() as u64);

        // _permit drops here; the lock release task starts its buffer delay
        DiscreteOutcome::Processed
    }

    // ========================================================================
    // RAW VIOLATIONS
    // ========================================================================

    /// Intake one upstream-claimed violation: persist the raw record, then
    /// run it through the independent validation pass immediately.
    pub async fn handle_raw_violation(
        &self,
        raw: RawViolation,
        now_ms: u64,
    ) -> Result<ValidationOutcome, StoreError> {
        debug!("Raw violation {} received", raw.id);
        if let Err(e) = self
            .bounded(self.records.append_raw_violation(raw.clone()))
            .await
        {
            PipelineMetrics::incr(&self.metrics.collaborator_errors);
            error!("Raw violation append failed for {}: {}", raw.id, e);
        }

        let outcome = self
            .bounded(self.validator.process_violation(&raw.id, &raw.data, now_ms))
            .await;
        match &outcome {
            Ok(o) if o.is_committed() => {
                PipelineMetrics::incr(&self.metrics.violations_committed)
            }
            Ok(_) => PipelineMetrics::incr(&self.metrics.violations_skipped),
            Err(_) => PipelineMetrics::incr(&self.metrics.collaborator_errors),
        }
        outcome
    }

    /// Bounded catch-up over the most recent raw violations, for startup
    /// or recovery after downtime. The backlog fetch and each record's
    /// validation carry the same operation timeout as the continuous path.
    /// Returns (processed, committed).
    pub async fn catch_up(&self, now_ms: u64) -> Result<(usize, usize), StoreError> {
        let limit = self.config.validator.catch_up_limit;
        info!("Catch-up pass over the last {} raw violations", limit);

        let raw = self
            .bounded(self.records.recent_raw_violations(limit))
            .await?;

        let mut processed = 0usize;
        let mut committed = 0usize;
        for record in raw {
            processed += 1;
            match self
                .bounded(self.validator.process_violation(&record.id, &record.data, now_ms))
                .await
            {
                Ok(outcome) if outcome.is_committed() => {
                    committed += 1;
                    PipelineMetrics::incr(&self.metrics.violations_committed);
                }
                Ok(_) => PipelineMetrics::incr(&self.metrics.violations_skipped),
                Err(e) => {
                    PipelineMetrics::incr(&self.metrics.collaborator_errors);
                    error!("Catch-up failed on raw violation {}: {}", record.id, e);
                }
            }
        }

        info!(
            "✓ Catch-up processed {} raw violation(s), committed {} record(s)",
            processed, committed
        );
        Ok((processed, committed))
    }
}
