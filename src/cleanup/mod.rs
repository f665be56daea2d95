pub mod files;
pub mod sweeper;

pub use files::{CleanupReport, FileCleaner, remove_if_exists};
pub use sweeper::{CleanupScheduler, SweepReport, Sweeper, is_expired};
