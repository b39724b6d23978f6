//! Core domain models for the build pipeline
//!
//! This module defines configuration, the per-run build context, step and
//! result types.

pub mod config;
pub mod context;
pub mod state;
pub mod step;

pub use config::BuildPipelineConfig;
pub use context::*;
pub use state::*;
pub use step::*;
