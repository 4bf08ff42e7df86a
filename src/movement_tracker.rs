// src/movement_tracker.rs
//
// Cooldown + mutual-exclusion guard for discrete (non-positional) alert
// events: unauthorized movement and crash impacts.
//
// States per device: Idle, Cooling (inside the cooldown window), Locked
// (an admitted alert's side effects are in flight). The lock and the
// cooldown stamp are both set before any side-effecting operation runs,
// closing the race where two near-simultaneous events for one device
// both pass the checks before either mutates state.
//
// Lock release is a scheduled task tied to the admission permit: it runs
// after a fixed buffer delay once the permit drops, whether or not the
// side-effect pipeline succeeded. A device must never be left permanently
// rejecting because a pipeline step threw.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::device_states::DeviceStates;
use crate::types::MovementConfig;

/// Per-device guard state. Same lifecycle as CrossingState: lazy,
/// in-memory, rebuilt from scratch on restart.
#[derive(Debug, Clone, Default)]
pub struct MovementAlertState {
    /// Epoch ms of the last admitted alert; `None` until the first one,
    /// so an admission stamped at epoch 0 still starts its cooldown.
    pub last_sent_at_ms: Option<u64>,
    pub processing_locked: bool,
}

/// Decision for one discrete alert event.
pub enum MovementDecision {
    /// Admitted. Hold the permit while running side effects; dropping it
    /// schedules the lock release.
    Admitted(ProcessingPermit),
    /// Within the per-device cooldown window.
    RejectedCooldown { remaining_ms: u64 },
    /// Another admission for this device is still being processed.
    RejectedLocked,
}

impl MovementDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }
}

/// Admission token. On drop, spawns the delayed release of the device's
/// processing lock — guaranteed cleanup even when side effects fail.
pub struct ProcessingPermit {
    device_id: String,
    entry: Arc<Mutex<MovementAlertState>>,
    release_buffer_ms: u64,
}

impl Drop for ProcessingPermit {
    fn drop(&mut self) {
        let device_id = std::mem::take(&mut self.device_id);
        let entry = self.entry.clone();
        let buffer_ms = self.release_buffer_ms;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(buffer_ms)).await;
            let mut state = entry.lock().await;
            state.processing_locked = false;
            debug!("Processing lock released for {}", device_id);
        });
    }
}

pub struct MovementGuard {
    config: MovementConfig,
    states: DeviceStates<MovementAlertState>,
}

impl MovementGuard {
    pub fn new(config: MovementConfig) -> Self {
        Self {
            config,
            states: DeviceStates::new(),
        }
    }

    /// Run the admission checks for one event. Check order is load-bearing:
    /// cooldown first, then the in-flight lock, and on admission the lock
    /// and stamp are written under the same state lock before returning.
    pub async fn try_admit(&self, device_id: &str, now_ms: u64) -> MovementDecision {
        let entry = self
            .states
            .entry_or(device_id, MovementAlertState::default)
            .await;
        let mut state = entry.lock().await;

        if let Some(last) = state.last_sent_at_ms {
            let elapsed = now_ms.saturating_sub(last);
            if elapsed < self.config.cooldown_ms {
                let remaining_ms = self.config.cooldown_ms - elapsed;
                debug!(
                    "🚫 Alert rejected for {}: cooldown, {}ms remaining",
                    device_id, remaining_ms
                );
                return MovementDecision::RejectedCooldown { remaining_ms };
            }
        }

        if state.processing_locked {
            warn!(
                "🚫 Alert rejected for {}: a concurrent admission is still processing",
                device_id
            );
            return MovementDecision::RejectedLocked;
        }

        state.processing_locked = true;
        state.last_sent_at_ms = Some(now_ms);
        drop(state);

        MovementDecision::Admitted(ProcessingPermit {
            device_id: device_id.to_string(),
            entry,
            release_buffer_ms: self.config.release_buffer_ms,
        })
    }

    pub async fn state_of(&self, device_id: &str) -> MovementAlertState {
        let entry = self
            .states
            .entry_or(device_id, MovementAlertState::default)
            .await;
        let state = entry.lock().await;
        state.clone()
    }
}
