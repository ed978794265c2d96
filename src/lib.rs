//! Image Pusher Library
//!
//! Publishes locally built container images to a registry. The entry point
//! is [`push::Client`], which resolves the local image through a worker
//! context and uploads its blobs and manifest.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod exporter;
pub mod image;
pub mod output;
pub mod push;
pub mod reference;
pub mod registry;
pub mod upload;
pub mod worker;

pub use config::{AuthConfig, Config};
pub use error::{PushError, PushFailure, Result, Stage};
pub use output::OutputManager;
pub use push::{Client, PushOutcome, PushState};
pub use reference::{Reference, normalize};
