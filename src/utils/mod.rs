pub mod deps;
pub mod humanize;
pub mod logger;
pub mod retry;

pub use deps::DependencyStatus;
pub use humanize::{file_size_string, format_file_size};
pub use logger::init_logging;
pub use retry::RetryPolicy;
