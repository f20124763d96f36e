//! FLAMeS inference pipeline
//!
//! Skull-strips a directory of MRI volumes with SynthStrip and segments
//! white-matter lesions with the pretrained FLAMeS nnU-Net model. All heavy
//! lifting happens in external tools; this crate prepares their inputs,
//! fetches their assets and runs them in order.

pub mod config;
pub mod error;
pub mod hardware;
pub mod pipeline;
pub mod setup;
pub mod tools;

pub use config::{Device, PipelineConfig};
pub use error::{FlamesError, FlamesResult};
pub use pipeline::{Pipeline, RunSummary};
