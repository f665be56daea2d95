//! Conversion task orchestration
//!
//! Durable JSON task records, a bounded FIFO conversion queue, ffmpeg argument
//! compilation with subtitle downgrades, stderr progress and error parsing, and
//! expiry-based cleanup of task artifacts.

pub mod analyzer;
pub mod cleanup;
pub mod config;
pub mod encoder;
pub mod error;
pub mod layout;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod settings;
pub mod store;
pub mod utils;

pub use error::AppError;
pub use service::{ConversionService, JobSubmission};
