//! Setup Module
//!
//! Workspace layout, nnU-Net runtime paths, and fetching of the external
//! tooling and model assets.

pub mod assets;
pub mod downloader;
pub mod extractor;
pub mod paths;

pub use paths::{NnUnetEnv, Workspace};
