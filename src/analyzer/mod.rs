pub mod ffprobe;

pub use ffprobe::{FfprobeProbe, SubtitleProbe, SubtitleTrack, count_subtitle_streams, probe_subtitle_tracks};
