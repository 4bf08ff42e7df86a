// src/crossing_tracker.rs
//
// Per-device geofence crossing state machine.
//
// Conceptual states, encoded in CrossingState fields rather than a tag:
//   Calm            — alert_active = false
//   Alerting        — alert_active = true, inside cooldown window
//   ReturnConfirming — alert_active = true, inside confirmations counting up
//
// Two cooldown magnitudes: the full cooldown throttles repeat
// notification storms for a device that stays outside; the shrunk
// post-return cooldown lets a device that genuinely came back re-trigger
// faster than one that never returned. The confirmation threshold filters
// single noisy "inside" readings from flapping GPS.
//
// The tracker makes decisions only. Side effects (notification, record
// append, device command) belong to the pipeline acting on the decision.

use tracing::{debug, info};

use crate::device_states::DeviceStates;
use crate::types::CrossingConfig;

/// Per-device hysteresis state. Created lazily on first report, never
/// persisted; a restart loses it, which is an accepted staleness window.
#[derive(Debug, Clone)]
pub struct CrossingState {
    /// Epoch ms of the last admitted alert; `None` until the first one.
    /// An explicit absence, not a zero sentinel — an alert legitimately
    /// admitted at epoch 0 must still be remembered.
    pub last_alert_sent_at_ms: Option<u64>,
    pub alert_active: bool,
    pub inside_confirmation_count: u32,
    /// Current required quiet period before the next admission.
    pub cooldown_ms: u64,
}

impl CrossingState {
    fn fresh(config: &CrossingConfig) -> Self {
        Self {
            last_alert_sent_at_ms: None,
            alert_active: false,
            inside_confirmation_count: 0,
            cooldown_ms: config.alert_cooldown_ms,
        }
    }
}

/// Outcome of one position observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingDecision {
    /// Device left the zone set and the cooldown has elapsed — emit
    /// notification, violation record, and device command.
    Admit,
    /// Device is outside but within cooldown (or already alerting).
    Suppressed { remaining_ms: u64 },
    /// Device confirmed back inside; alert cleared, cooldown shrunk.
    ReturnConfirmed,
    /// Device reported inside while alerting, confirmation building up.
    Confirming { count: u32 },
    /// Inside, no active alert. Nothing to do.
    Calm,
}

pub struct CrossingTracker {
    config: CrossingConfig,
    states: DeviceStates<CrossingState>,
}

impl CrossingTracker {
    pub fn new(config: CrossingConfig) -> Self {
        Self {
            config,
            states: DeviceStates::new(),
        }
    }

    /// Feed one containment observation for a device. `now_ms` comes from
    /// the report's receipt timestamp so decisions replay deterministically.
    pub async fn observe(&self, device_id: &str, inside: bool, now_ms: u64) -> CrossingDecision {
        let entry = self
            .states
            .entry_or(device_id, || CrossingState::fresh(&self.config))
            .await;
        let mut state = entry.lock().await;

        if !inside {
            let quiet_elapsed = state
                .last_alert_sent_at_ms
                .map_or(true, |last| now_ms.saturating_sub(last) > state.cooldown_ms);

            if !state.alert_active && quiet_elapsed {
                state.alert_active = true;
                state.last_alert_sent_at_ms = Some(now_ms);
                state.cooldown_ms = self.config.alert_cooldown_ms;
                state.inside_confirmation_count = 0;
                info!(
                    "🚨 Zone exit admitted for {} (cooldown now {}ms)",
                    device_id, state.cooldown_ms
                );
                return CrossingDecision::Admit;
            }

            // Still in cooldown or already alerting. No side effects beyond
            // logging; the confirmation count is deliberately untouched so a
            // single outside blip cannot undo a return that is mid-confirmation.
            let remaining_ms = state
                .last_alert_sent_at_ms
                .map_or(0, |last| (last + state.cooldown_ms).saturating_sub(now_ms));
            debug!(
                "🚫 Zone exit suppressed for {} (alert_active={}, {}ms of cooldown left)",
                device_id, state.alert_active, remaining_ms
            );
            return CrossingDecision::Suppressed { remaining_ms };
        }

        if state.alert_active {
            state.inside_confirmation_count += 1;
            if state.inside_confirmation_count >= self.config.inside_confirmations {
                state.alert_active = false;
                state.inside_confirmation_count = 0;
                state.cooldown_ms = self.config.post_return_cooldown_ms;
                info!(
                    "✅ {} confirmed back inside, alert cleared (cooldown shrunk to {}ms)",
                    device_id, state.cooldown_ms
                );
                return CrossingDecision::ReturnConfirmed;
            }
            debug!(
                "{} inside while alerting ({}/{} confirmations)",
                device_id, state.inside_confirmation_count, self.config.inside_confirmations
            );
            return CrossingDecision::Confirming {
                count: state.inside_confirmation_count,
            };
        }

        CrossingDecision::Calm
    }

    /// Snapshot of one device's state, for diagnostics.
    pub async fn state_of(&self, device_id: &str) -> CrossingState {
        let entry = self
            .states
            .entry_or(device_id, || CrossingState::fresh(&self.config))
            .await;
        let state = entry.lock().await;
        state.clone()
    }

    pub async fn tracked_devices(&self) -> usize {
        self.states.tracked_devices().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: u64 = 60_000;

    fn tracker() -> CrossingTracker {
        CrossingTracker::new(CrossingConfig::default())
    }

    #[tokio::test]
    async fn first_outside_report_admits() {
        let t = tracker();
        assert_eq!(t.observe("BIKE001", false, 1_000).await, CrossingDecision::Admit);
        let state = t.state_of("BIKE001").await;
        assert!(state.alert_active);
        assert_eq!(state.last_alert_sent_at_ms, Some(1_000));
        assert_eq!(state.cooldown_ms, 5 * MIN);
    }

    #[tokio::test]
    async fn admit_at_epoch_zero_is_remembered() {
        // an alert stamped at t=0 must not read as "never alerted"
        let t = tracker();
        assert_eq!(t.observe("BIKE001", false, 0).await, CrossingDecision::Admit);
        assert_eq!(t.state_of("BIKE001").await.last_alert_sent_at_ms, Some(0));

        t.observe("BIKE001", true, 1_000).await;
        t.observe("BIKE001", true, 2_000).await;
        t.observe("BIKE001", true, 3_000).await; // cleared, cooldown = 1 min

        // outside again mid-cooldown: suppressed, not re-admitted
        match t.observe("BIKE001", false, 30_000).await {
            CrossingDecision::Suppressed { remaining_ms } => {
                assert_eq!(remaining_ms, 30_000);
            }
            other => panic!("expected suppression, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn second_outside_within_cooldown_is_suppressed() {
        let t = tracker();
        assert_eq!(t.observe("BIKE001", false, 1_000).await, CrossingDecision::Admit);

        // 10 seconds later, still outside
        match t.observe("BIKE001", false, 11_000).await {
            CrossingDecision::Suppressed { remaining_ms } => {
                assert_eq!(remaining_ms, 5 * MIN - 10_000);
            }
            other => panic!("expected suppression, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn no_readmission_while_outside_even_after_cooldown() {
        // alert_active stays true while the device never comes back inside,
        // so the cooldown alone never re-admits
        let t = tracker();
        t.observe("BIKE001", false, 0).await;
        let d = t.observe("BIKE001", false, 6 * MIN).await;
        assert!(matches!(d, CrossingDecision::Suppressed { .. }));
    }

    #[tokio::test]
    async fn three_inside_reports_clear_the_alert() {
        let t = tracker();
        t.observe("BIKE001", false, 0).await;

        assert_eq!(
            t.observe("BIKE001", true, 1_000).await,
            CrossingDecision::Confirming { count: 1 }
        );
        assert_eq!(
            t.observe("BIKE001", true, 2_000).await,
            CrossingDecision::Confirming { count: 2 }
        );
        assert_eq!(t.observe("BIKE001", true, 3_000).await, CrossingDecision::ReturnConfirmed);

        let state = t.state_of("BIKE001").await;
        assert!(!state.alert_active);
        assert_eq!(state.cooldown_ms, MIN);
    }

    #[tokio::test]
    async fn fewer_than_three_confirmations_leaves_alert_active() {
        let t = tracker();
        t.observe("BIKE001", false, 0).await;
        t.observe("BIKE001", true, 1_000).await;
        t.observe("BIKE001", true, 2_000).await;
        assert!(t.state_of("BIKE001").await.alert_active);
    }

    #[tokio::test]
    async fn outside_blip_does_not_undo_confirmation_progress() {
        let t = tracker();
        t.observe("BIKE001", false, 0).await;
        t.observe("BIKE001", true, 1_000).await;
        t.observe("BIKE001", true, 2_000).await;
        // boundary flap: one outside report, suppressed, count untouched
        let d = t.observe("BIKE001", false, 3_000).await;
        assert!(matches!(d, CrossingDecision::Suppressed { .. }));
        assert_eq!(t.state_of("BIKE001").await.inside_confirmation_count, 2);
        // the next inside report completes the confirmation
        assert_eq!(t.observe("BIKE001", true, 4_000).await, CrossingDecision::ReturnConfirmed);
    }

    #[tokio::test]
    async fn confirmed_return_allows_faster_retrigger() {
        let t = tracker();
        t.observe("BIKE001", false, 0).await;
        t.observe("BIKE001", true, 1_000).await;
        t.observe("BIKE001", true, 2_000).await;
        t.observe("BIKE001", true, 3_000).await; // cleared, cooldown = 1 min

        // Outside again 30s after the original admit: inside shrunk cooldown
        let d = t.observe("BIKE001", false, 30_000).await;
        assert!(matches!(d, CrossingDecision::Suppressed { .. }));

        // Outside 61s after the original admit: shrunk cooldown elapsed
        assert_eq!(t.observe("BIKE001", false, MIN + 1_000).await, CrossingDecision::Admit);
        // and the full cooldown is restored for the new episode
        assert_eq!(t.state_of("BIKE001").await.cooldown_ms, 5 * MIN);
    }

    #[tokio::test]
    async fn inside_and_calm_is_a_no_op() {
        let t = tracker();
        assert_eq!(t.observe("BIKE001", true, 1_000).await, CrossingDecision::Calm);
        assert_eq!(t.observe("BIKE001", true, 2_000).await, CrossingDecision::Calm);
        assert!(!t.state_of("BIKE001").await.alert_active);
    }

    #[tokio::test]
    async fn devices_do_not_interfere() {
        let t = tracker();
        assert_eq!(t.observe("BIKE001", false, 1_000).await, CrossingDecision::Admit);
        // a different device outside at the same time gets its own admit
        assert_eq!(t.observe("BIKE002", false, 1_000).await, CrossingDecision::Admit);
        assert_eq!(t.tracked_devices().await, 2);
    }
}
