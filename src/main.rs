// src/main.rs
//
// Geofence crossing & alert decision engine.
//
// Binary entrypoint: loads config, wires the in-memory collaborators to
// the pipeline engine, and replays a JSONL event feed through it —
// position reports, discrete alerts, and raw violation claims — then
// runs a validator catch-up pass and logs the metrics summary.
//
// Usage: geofence-engine [config.yaml] [events.jsonl]

mod collaborators;
mod config;
mod containment;
mod crossing_tracker;
mod device_states;
mod dispatcher;
mod movement_tracker;
mod pipeline;
mod types;
mod validator;
mod zone_cache;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::collaborators::{
    InMemoryCommandChannel, InMemoryDeviceStateStore, InMemoryRecordStore, InMemoryRentalLookup,
    InMemoryZoneSource, RawViolation,
};
use crate::dispatcher::HttpSmsTransport;
use crate::pipeline::Engine;
use crate::types::{AlertEvent, Config, PositionReport, Zone};

/// One line of the replay feed.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum FeedEvent {
    /// Load or replace a zone in the zone source.
    Zone {
        zone: Zone,
        #[serde(default)]
        assign_device: Option<String>,
    },
    Position {
        #[serde(flatten)]
        report: PositionReport,
    },
    Alert {
        #[serde(flatten)]
        alert: AlertEvent,
    },
    RawViolation {
        id: String,
        data: Value,
        #[serde(default)]
        received_at_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "config.yaml".to_string());
    let feed_path = args.next().unwrap_or_else(|| "demos/events.jsonl".to_string());

    let config_missing = !Path::new(&config_path).exists();
    let config = if config_missing {
        Config::default()
    } else {
        Config::load(&config_path)?
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    if config_missing {
        warn!("Config file {} not found, using defaults", config_path);
    }
    info!("Geofence engine starting (feed: {})", feed_path);

    let zones = Arc::new(InMemoryZoneSource::new());
    let devices = Arc::new(InMemoryDeviceStateStore::new());
    let rentals = Arc::new(InMemoryRentalLookup::new());
    let records = Arc::new(InMemoryRecordStore::new());
    let commands = Arc::new(InMemoryCommandChannel::new());
    let sms = Arc::new(HttpSmsTransport::new(
        &config.dispatch,
        config.engine.op_timeout_ms,
    )?);

    let engine = Engine::new(
        config,
        zones.clone(),
        devices.clone(),
        rentals,
        records.clone(),
        commands,
        sms,
    );

    let file = File::open(&feed_path)
        .with_context(|| format!("failed to open event feed {}", feed_path))?;
    let reader = BufReader::new(file);

    let mut last_seen_ms = 0u64;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: FeedEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping malformed feed line {}: {}", line_no + 1, e);
                continue;
            }
        };

        match event {
            FeedEvent::Zone { zone, assign_device } => {
                match zone.centroid() {
                    Some(c) => info!(
                        "Loaded zone {} ({}), centered at ({:.5}, {:.5})",
                        zone.id, zone.name, c.latitude, c.longitude
                    ),
                    None => warn!("Loaded zone {} ({}) with no vertices", zone.id, zone.name),
                }
                if let Some(device_id) = assign_device {
                    devices.assign_zone(&device_id, &zone.id);
                }
                zones.put_zone(zone);
            }
            FeedEvent::Position { report } => {
                last_seen_ms = last_seen_ms.max(report.received_at_ms);
                if let Err(e) = engine.handle_position(&report).await {
                    error!("Position report for {} dropped: {}", report.device_id, e);
                }
            }
            FeedEvent::Alert { alert } => {
                last_seen_ms = last_seen_ms.max(alert.received_at_ms);
                engine.handle_discrete_alert(&alert).await;
            }
            FeedEvent::RawViolation {
                id,
                data,
                received_at_ms,
            } => {
                last_seen_ms = last_seen_ms.max(received_at_ms);
                let raw = RawViolation { id, data };
                if let Err(e) = engine.handle_raw_violation(raw, received_at_ms).await {
                    error!("Raw violation dropped: {}", e);
                }
            }
        }
    }

    match engine.catch_up(last_seen_ms).await {
        Ok((processed, committed)) => {
            info!("Catch-up: {} processed, {} committed", processed, committed)
        }
        Err(e) => error!("Catch-up pass failed: {}", e),
    }

    let summary = engine.metrics().summary();
    info!(
        "Feed complete: {} violation(s), {} alert record(s) — {}",
        records.violation_count(),
        records.alert_count(),
        serde_json::to_string(&summary)?
    );
    Ok(())
}
