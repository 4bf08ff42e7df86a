// src/device_states.rs
//
// Keyed per-device state map. Two events for the same device must
// serialize on that device's state; events for different devices must
// not contend. Each entry carries its own mutex — the outer map lock is
// held only long enough to clone the entry handle, never across an await.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

pub struct DeviceStates<T> {
    inner: Mutex<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T> DeviceStates<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the state handle for a device, creating it lazily from
    /// `init` on first sight. Entries live for the process lifetime; an
    /// inactivity sweep, if any, is external to this core.
    pub async fn entry_or(&self, device_id: &str, init: impl FnOnce() -> T) -> Arc<Mutex<T>> {
        let mut map = self.inner.lock().await;
        map.entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(init())))
            .clone()
    }

    pub async fn tracked_devices(&self) -> usize {
        self.inner.lock().await.len()
    }
}

impl<T> Default for DeviceStates<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entry_created_lazily_and_reused() {
        let states: DeviceStates<u32> = DeviceStates::new();
        let a = states.entry_or("DEV1", || 7).await;
        *a.lock().await += 1;

        let b = states.entry_or("DEV1", || 0).await;
        assert_eq!(*b.lock().await, 8);
        assert_eq!(states.tracked_devices().await, 1);
    }

    #[tokio::test]
    async fn distinct_devices_do_not_share_state() {
        let states: DeviceStates<u32> = DeviceStates::new();
        let a = states.entry_or("DEV1", || 1).await;
        let b = states.entry_or("DEV2", || 2).await;
        assert_eq!(*a.lock().await, 1);
        assert_eq!(*b.lock().await, 2);
        assert_eq!(states.tracked_devices().await, 2);
    }

    #[tokio::test]
    async fn same_device_serializes_under_contention() {
        let states = Arc::new(DeviceStates::<u64>::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let states = states.clone();
            handles.push(tokio::spawn(async move {
                let entry = states.entry_or("DEV1", || 0).await;
                let mut v = entry.lock().await;
                *v += 1;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let entry = states.entry_or("DEV1", || 0).await;
        assert_eq!(*entry.lock().await, 16);
    }
}
