// src/zone_cache.rs
//
// TTL snapshot cache for the active zone set. Leaf dependency of every
// containment check, so it is read-mostly and must never expose a
// partially-populated set: a refresh builds the full replacement before
// swapping it in under the write lock.
//
// Fetch-failure policy: serve the previous snapshot stale and warn. A
// stale zone set is safer than failing positional processing outright.
// Only when no snapshot has ever been loaded does the error propagate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::collaborators::{StoreError, ZoneSource};
use crate::types::{Zone, ZoneCacheConfig};

struct Snapshot {
    zones: Arc<Vec<Zone>>,
    refreshed_at: Instant,
}

pub struct ZoneCache {
    source: Arc<dyn ZoneSource>,
    ttl: Duration,
    snapshot: RwLock<Option<Snapshot>>,

    // ── Metrics ──
    pub cache_hits: AtomicU64,
    pub refreshes: AtomicU64,
    pub stale_serves: AtomicU64,
}

impl ZoneCache {
    pub fn new(source: Arc<dyn ZoneSource>, config: &ZoneCacheConfig) -> Self {
        Self {
            source,
            ttl: Duration::from_millis(config.ttl_ms),
            snapshot: RwLock::new(None),
            cache_hits: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
            stale_serves: AtomicU64::new(0),
        }
    }

    /// Current active zone set. Served from cache while fresh; refreshed
    /// from the source once the TTL lapses.
    pub async fn active_zones(&self) -> Result<Arc<Vec<Zone>>, StoreError> {
        {
            let guard = self.snapshot.read().await;
            if let Some(snap) = guard.as_ref() {
                if snap.refreshed_at.elapsed() < self.ttl {
                    self.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(snap.zones.clone());
                }
            }
        }

        match self.source.fetch_active_zones().await {
            Ok(fetched) => {
                let mut zones = Vec::with_capacity(fetched.len());
                for zone in fetched {
                    let zone = zone.normalized();
                    if !zone.is_polygon() {
                        warn!(
                            "Zone {} ({}) loaded with {} vertices — will never contain",
                            zone.id,
                            zone.name,
                            zone.vertices.len()
                        );
                    }
                    zones.push(zone);
                }
                let zones = Arc::new(zones);

                let mut guard = self.snapshot.write().await;
                *guard = Some(Snapshot {
                    zones: zones.clone(),
                    refreshed_at: Instant::now(),
                });
                self.refreshes.fetch_add(1, Ordering::Relaxed);
                info!("Zone cache refreshed: {} active zone(s)", zones.len());
                Ok(zones)
            }
            Err(e) => {
                let guard = self.snapshot.read().await;
                if let Some(snap) = guard.as_ref() {
                    self.stale_serves.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Zone fetch failed ({}); serving stale snapshot of {} zone(s), {:?} old",
                        e,
                        snap.zones.len(),
                        snap.refreshed_at.elapsed()
                    );
                    Ok(snap.zones.clone())
                } else {
                    debug!("Zone fetch failed with no snapshot to fall back on");
                    Err(e)
                }
            }
        }
    }
}
