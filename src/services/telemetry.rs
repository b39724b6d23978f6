//! Build performance telemetry

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{info, warn};

pub trait TelemetrySink: Send + Sync {
    fn start_build_monitoring(&self, build_id: &str, platform: &str, environment: &str);

    fn end_build_monitoring(&self, build_id: &str, bundle_size: u64);
}

/// Telemetry that reports through `tracing`
#[derive(Default)]
pub struct TracingTelemetry {
    active: Mutex<HashMap<String, (Instant, String, String)>>,
}

impl TracingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_builds(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl TelemetrySink for TracingTelemetry {
    fn start_build_monitoring(&self, build_id: &str, platform: &str, environment: &str) {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).insert(
            build_id.to_string(),
            (Instant::now(), platform.to_string(), environment.to_string()),
        );
    }

    fn end_build_monitoring(&self, build_id: &str, bundle_size: u64) {
        let entry = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(build_id);
        match entry {
            Some((started, platform, environment)) => info!(
                build_id,
                platform = platform.as_str(),
                environment = environment.as_str(),
                bundle_size,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Build monitoring finished"
            ),
            None => warn!("end_build_monitoring for unknown build {}", build_id),
        }
    }
}
