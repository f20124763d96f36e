//! Hardware Detection Module
//!
//! Provides GPU detection for choosing the execution device.

pub mod gpu;

pub use gpu::{detect_gpu, GpuDetector, SystemGpuDetector};
