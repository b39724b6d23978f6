//! External collaborators: bundler, build cache and telemetry

pub mod bundler;
pub mod cache;
pub mod telemetry;

pub use bundler::{BundleOutput, BundleRequest, Bundler, CommandBundler};
pub use cache::{CacheService, CacheStats, DirectoryCache};
pub use telemetry::{TelemetrySink, TracingTelemetry};

use std::sync::Arc;

/// The collaborators a pipeline run depends on
#[derive(Clone)]
pub struct BuildServices {
    pub bundler: Arc<dyn Bundler>,
    pub cache: Arc<dyn CacheService>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

impl BuildServices {
    pub fn new(
        bundler: Arc<dyn Bundler>,
        cache: Arc<dyn CacheService>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            bundler,
            cache,
            telemetry,
        }
    }
}
