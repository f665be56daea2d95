pub mod command_builder;
pub mod errors;
pub mod ffmpeg;
pub mod progress;

pub use command_builder::{CommandPlan, Downgrade, EncodingParams, build_ffmpeg_args, compile};
pub use errors::{ConversionFailure, classify};
pub use ffmpeg::{ConversionOutcome, ConversionRequest, Converter, FfmpegConverter};
pub use progress::ProgressParser;
