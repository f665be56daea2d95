use regex::Regex;
use std::collections::VecDeque;
use std::sync::LazyLock;

/// Percentage reported while the process is still running never exceeds this
pub const RUNNING_CAP: f64 = 95.0;

/// Diagnostic lines retained for error classification
const TAIL_LINES: usize = 50;

static DURATION_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2}(?:\.\d+)?)").ok());

static TIME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"time=(\d{2}):(\d{2}):(\d{2}(?:\.\d+)?)").ok());

/// Incremental parser over ffmpeg's stderr
///
/// Feed raw chunks as they arrive; lines are split on `\n` and `\r` (ffmpeg
/// rewrites its status line with carriage returns). The most recent duration
/// and position markers win.
#[derive(Debug, Default)]
pub struct ProgressParser {
    partial: String,
    duration_secs: Option<f64>,
    position_secs: Option<f64>,
    tail: VecDeque<String>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of output. Returns true if the duration or position moved.
    pub fn feed(&mut self, chunk: &str) -> bool {
        self.partial.push_str(chunk);
        let mut changed = false;

        while let Some(pos) = self.partial.find(['\n', '\r']) {
            let line: String = self.partial.drain(..=pos).collect();
            changed |= self.scan_line(line.trim_end_matches(['\n', '\r']));
        }
        // Status lines may sit unterminated for a while
        if !self.partial.is_empty() {
            changed |= self.scan_markers(&self.partial.clone());
        }
        changed
    }

    /// Flush any trailing unterminated line
    pub fn finish(&mut self) {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.scan_line(&line);
        }
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    pub fn position_secs(&self) -> Option<f64> {
        self.position_secs
    }

    /// `round(min(95, position / duration * 100))`; 0 without a usable duration
    pub fn percent(&self) -> u8 {
        match (self.duration_secs, self.position_secs) {
            (Some(duration), Some(position)) => percent_of(position, duration),
            _ => 0,
        }
    }

    /// Recent diagnostic lines, oldest first
    pub fn tail(&self) -> String {
        self.tail.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }

    fn scan_line(&mut self, line: &str) -> bool {
        if line.trim().is_empty() {
            return false;
        }
        let changed = self.scan_markers(line);
        // Status lines carry no diagnostic value
        if !line.contains("time=") {
            if self.tail.len() == TAIL_LINES {
                self.tail.pop_front();
            }
            self.tail.push_back(line.to_string());
        }
        changed
    }

    fn scan_markers(&mut self, text: &str) -> bool {
        let mut changed = false;
        if let Some(d) = last_timestamp(&DURATION_RE, text)
            && self.duration_secs != Some(d)
        {
            self.duration_secs = Some(d);
            changed = true;
        }
        if let Some(t) = last_timestamp(&TIME_RE, text)
            && self.position_secs != Some(t)
        {
            self.position_secs = Some(t);
            changed = true;
        }
        changed
    }
}

/// Capped running percentage for a position within a duration
pub fn percent_of(position_secs: f64, duration_secs: f64) -> u8 {
    if duration_secs <= 0.0 || !position_secs.is_finite() {
        return 0;
    }
    let pct = (position_secs / duration_secs * 100.0).clamp(0.0, RUNNING_CAP);
    pct.round() as u8
}

fn last_timestamp(re: &LazyLock<Option<Regex>>, text: &str) -> Option<f64> {
    let re = re.as_ref()?;
    let caps = re.captures_iter(text).last()?;
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Input #0, matroska,webm, from 'in.mkv':\n  Duration: 00:02:00.00, start: 0.000000, bitrate: 5000 kb/s\n";

    #[test]
    fn parses_duration_and_position() {
        let mut parser = ProgressParser::new();
        parser.feed(HEADER);
        assert_eq!(parser.duration_secs(), Some(120.0));
        parser.feed("frame=  100 fps=25 q=28.0 size=1024kB time=00:00:30.00 bitrate=279.6kbits/s\r");
        assert_eq!(parser.position_secs(), Some(30.0));
        assert_eq!(parser.percent(), 25);
    }

    #[test]
    fn handles_markers_split_across_chunks() {
        let mut parser = ProgressParser::new();
        parser.feed("  Durat");
        parser.feed("ion: 01:00:00.50, start");
        assert_eq!(parser.duration_secs(), Some(3600.5));
        parser.feed("\nframe=1 time=00:3");
        parser.feed("0:00.00 bitrate=1\r");
        assert_eq!(parser.position_secs(), Some(1800.0));
        assert_eq!(parser.percent(), 50);
    }

    #[test]
    fn latest_marker_wins() {
        let mut parser = ProgressParser::new();
        parser.feed("Duration: 00:00:10.00\nDuration: 00:01:40.00\n");
        assert_eq!(parser.duration_secs(), Some(100.0));
        parser.feed("time=00:00:10.00\rtime=00:00:20.00\r");
        assert_eq!(parser.percent(), 20);
    }

    #[test]
    fn percentage_is_capped_below_completion() {
        let mut parser = ProgressParser::new();
        parser.feed(HEADER);
        parser.feed("time=00:02:00.00\r");
        assert_eq!(parser.percent(), 95);
        parser.feed("time=00:05:00.00\r");
        assert_eq!(parser.percent(), 95);
    }

    #[test]
    fn no_duration_means_zero() {
        let mut parser = ProgressParser::new();
        parser.feed("time=00:00:30.00\r");
        assert_eq!(parser.percent(), 0);
        assert_eq!(percent_of(10.0, 0.0), 0);
    }

    #[test]
    fn increasing_positions_give_non_decreasing_percentages() {
        let mut parser = ProgressParser::new();
        parser.feed(HEADER);
        let mut last = 0;
        for second in 0..=130 {
            parser.feed(&format!("time=00:{:02}:{:02}.00\r", second / 60, second % 60));
            let pct = parser.percent();
            assert!(pct >= last);
            assert!(pct <= 95);
            last = pct;
        }
    }

    #[test]
    fn tail_skips_status_lines() {
        let mut parser = ProgressParser::new();
        parser.feed(HEADER);
        parser.feed("time=00:00:01.00\r");
        parser.feed("Error while decoding stream #0:0\nConversion failed!\n");
        let tail = parser.tail();
        assert!(tail.ends_with("Error while decoding stream #0:0\nConversion failed!"));
        assert!(!tail.contains("time="));
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut parser = ProgressParser::new();
        parser.feed("No space left on device");
        assert!(parser.tail().is_empty());
        parser.finish();
        assert_eq!(parser.tail(), "No space left on device");
    }
}
