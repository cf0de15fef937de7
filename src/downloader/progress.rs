// Progress relay - turns yt-dlp output lines into ProgressEvents
//
// yt-dlp is asked to print machine-readable progress through
// `--progress-template`, so percent/speed/ETA are computed here from the
// cumulative byte counts and the elapsed time. The older human-readable
// `[download]  12.5% of ...` lines are still understood.

use std::path::PathBuf;

use regex::Regex;

use super::models::{Phase, ProgressEvent};
use super::traits::ProgressEmitter;

pub const PROGRESS_MARKER: &str = "__progress__";
pub const POSTPROCESS_MARKER: &str = "__postprocess__";
pub const FILE_MARKER: &str = "__file__:";
pub const TITLE_MARKER: &str = "__title__:";
pub const META_MARKER: &str = "__meta__:";

/// Percent is held below this until the process has exited successfully
const MAX_RUNNING_PERCENT: f32 = 99.9;

/// Value for `--progress-template` (download stage)
pub fn download_template() -> String {
    format!(
        "download:{} %(progress.downloaded_bytes)s %(progress.total_bytes)s \
         %(progress.total_bytes_estimate)s %(progress.elapsed)s",
        PROGRESS_MARKER
    )
}

/// Value for `--progress-template` (post-processing stage)
pub fn postprocess_template() -> String {
    format!(
        "postprocess:{} %(progress.status)s %(progress.postprocessor)s",
        POSTPROCESS_MARKER
    )
}

/// Value for `--print` carrying duration and uploader, tab separated
pub fn meta_template() -> String {
    format!("before_dl:{}%(duration)s\t%(uploader)s", META_MARKER)
}

/// One meaningful line of yt-dlp output
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressLine {
    /// Cumulative bytes of the stream currently downloading
    Bytes {
        downloaded: u64,
        total: Option<u64>,
        /// `total` came from `total_bytes_estimate`
        estimated: bool,
        elapsed_secs: Option<f64>,
    },
    /// Legacy human-readable progress of the current stream
    Percent(f32),
    /// A post-processor (merger, audio extraction, ...) started
    PostProcess(Phase),
    AlreadyDownloaded,
    Title(String),
    Meta {
        duration_secs: Option<u64>,
        uploader: Option<String>,
    },
    FinalPath(PathBuf),
}

/// yt-dlp prints `NA` (or `None`) for fields it does not know
fn parse_number(field: &str) -> Option<f64> {
    match field {
        "NA" | "None" | "" => None,
        other => other.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0),
    }
}

fn postprocessor_phase(name: &str) -> Phase {
    match name {
        "Merger" | "FFmpegMerger" => Phase::Merging,
        "ExtractAudio" | "FFmpegExtractAudio" => Phase::Converting,
        _ => Phase::PostProcessing,
    }
}

/// Parse a single output line; `None` for lines that carry no progress
pub fn parse_line(line: &str) -> Option<ProgressLine> {
    lazy_static::lazy_static! {
        static ref LEGACY_RE: Regex = Regex::new(
            r"^\[download\]\s+(\d+(?:\.\d+)?)%\s+of"
        ).unwrap();
        static ref MERGE_RE: Regex = Regex::new(r"^\[Merger\]\s+Merging").unwrap();
        static ref EXTRACT_RE: Regex = Regex::new(r"^\[ExtractAudio\]\s+Destination:").unwrap();
        static ref ALREADY_RE: Regex = Regex::new(r"has already been downloaded").unwrap();
    }

    let line = line.trim();

    if let Some(rest) = line.strip_prefix(FILE_MARKER) {
        let path = rest.trim();
        return (!path.is_empty() && path != "NA").then(|| ProgressLine::FinalPath(PathBuf::from(path)));
    }

    if let Some(rest) = line.strip_prefix(TITLE_MARKER) {
        return Some(ProgressLine::Title(rest.trim().to_string()));
    }

    if let Some(rest) = line.strip_prefix(META_MARKER) {
        let mut fields = rest.splitn(2, '\t');
        let duration_secs = fields
            .next()
            .and_then(|f| parse_number(f.trim()))
            .map(|d| d.round() as u64);
        let uploader = fields
            .next()
            .map(str::trim)
            .filter(|u| !u.is_empty() && *u != "NA")
            .map(str::to_string);
        return Some(ProgressLine::Meta {
            duration_secs,
            uploader,
        });
    }

    if let Some(rest) = line.strip_prefix(PROGRESS_MARKER) {
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let downloaded = parse_number(fields.first().copied().unwrap_or("NA"))? as u64;
        let field = |i: usize| {
            fields
                .get(i)
                .and_then(|f| parse_number(f))
                .map(|t| t as u64)
                .filter(|t| *t > 0)
        };
        let (total, estimated) = match field(1) {
            Some(t) => (Some(t), false),
            None => (field(2), field(2).is_some()),
        };
        let elapsed_secs = fields.get(3).and_then(|f| parse_number(f));
        return Some(ProgressLine::Bytes {
            downloaded,
            total,
            estimated,
            elapsed_secs,
        });
    }

    if let Some(rest) = line.strip_prefix(POSTPROCESS_MARKER) {
        let mut fields = rest.split_whitespace();
        let status = fields.next().unwrap_or("");
        let name = fields.next().unwrap_or("");
        return match status {
            "started" | "processing" => Some(ProgressLine::PostProcess(postprocessor_phase(name))),
            _ => None,
        };
    }

    if let Some(caps) = LEGACY_RE.captures(line) {
        let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
        return Some(ProgressLine::Percent(percent.clamp(0.0, 100.0)));
    }

    if MERGE_RE.is_match(line) {
        return Some(ProgressLine::PostProcess(Phase::Merging));
    }

    if EXTRACT_RE.is_match(line) {
        return Some(ProgressLine::PostProcess(Phase::Converting));
    }

    if ALREADY_RE.is_match(line) {
        return Some(ProgressLine::AlreadyDownloaded);
    }

    None
}

/// Folds parsed lines of one operation into monotonic ProgressEvents.
///
/// A format selection like `bestvideo+bestaudio` downloads several streams
/// back to back, each going 0..100%. The tracker spreads them over the
/// overall bar and never lets the reported percent go down.
pub struct ProgressTracker {
    emitter: ProgressEmitter,
    expected_streams: u32,
    completed_streams: u32,
    last_bytes: u64,
    last_exact_total: Option<u64>,
    last_fraction: f64,
    current: ProgressEvent,
}

impl ProgressTracker {
    pub fn new(emitter: ProgressEmitter, expected_streams: u32) -> Self {
        Self {
            emitter,
            expected_streams: expected_streams.max(1),
            completed_streams: 0,
            last_bytes: 0,
            last_exact_total: None,
            last_fraction: 0.0,
            current: ProgressEvent::default(),
        }
    }

    /// Reset to zero for a new operation
    pub fn begin(&mut self) {
        self.completed_streams = 0;
        self.last_bytes = 0;
        self.last_exact_total = None;
        self.last_fraction = 0.0;
        self.current = ProgressEvent {
            phase: Phase::Starting,
            ..ProgressEvent::default()
        };
        self.emitter.emit(self.current.clone());
    }

    pub fn apply(&mut self, line: &ProgressLine) {
        match line {
            ProgressLine::Bytes {
                downloaded,
                total,
                estimated,
                elapsed_secs,
            } => self.on_bytes(*downloaded, *total, *estimated, *elapsed_secs),
            ProgressLine::Percent(percent) => self.on_fraction(f64::from(*percent) / 100.0),
            ProgressLine::AlreadyDownloaded => self.on_fraction(1.0),
            ProgressLine::PostProcess(phase) => {
                self.current.phase = *phase;
                self.current.speed_bps = None;
                self.current.eta_secs = None;
                self.emitter.emit(self.current.clone());
            }
            ProgressLine::Title(_) | ProgressLine::Meta { .. } | ProgressLine::FinalPath(_) => {}
        }
    }

    /// Mark the operation complete (100%)
    pub fn finish(&mut self) {
        self.current.percent = 100.0;
        self.current.eta_secs = Some(0);
        self.current.phase = Phase::Finished;
        self.emitter.emit(self.current.clone());
    }

    pub fn current(&self) -> &ProgressEvent {
        &self.current
    }

    fn next_stream(&mut self) {
        if self.completed_streams + 1 < self.expected_streams {
            self.completed_streams += 1;
        }
        self.last_bytes = 0;
        self.last_fraction = 0.0;
    }

    fn on_bytes(
        &mut self,
        downloaded: u64,
        total: Option<u64>,
        estimated: bool,
        elapsed: Option<f64>,
    ) {
        // estimates drift while fragments arrive, only exact sizes mark a new stream
        let exact_total = total.filter(|_| !estimated);
        let new_total = matches!(
            (self.last_exact_total, exact_total),
            (Some(prev), Some(cur)) if prev != cur
        );
        if downloaded < self.last_bytes || new_total {
            self.next_stream();
        }
        self.last_bytes = downloaded;
        if exact_total.is_some() {
            self.last_exact_total = exact_total;
        }

        let speed = elapsed
            .filter(|e| *e > 0.0)
            .map(|e| downloaded as f64 / e);
        let eta = match (total, speed) {
            (Some(t), Some(s)) if s > 0.0 => Some((t.saturating_sub(downloaded) as f64 / s).ceil() as u64),
            _ => None,
        };

        self.current.downloaded_bytes = Some(downloaded);
        self.current.total_bytes = total;
        self.current.speed_bps = speed;
        self.current.eta_secs = eta;

        match total {
            Some(t) => {
                let fraction = (downloaded as f64 / t as f64).min(1.0);
                self.last_fraction = fraction;
                self.publish(fraction);
            }
            None => {
                // size unknown: keep the percent, still relay bytes/speed
                self.current.phase = Phase::Downloading;
                self.emitter.emit(self.current.clone());
            }
        }
    }

    fn on_fraction(&mut self, fraction: f64) {
        if fraction + f64::EPSILON < self.last_fraction {
            self.next_stream();
        }
        self.last_fraction = fraction;
        self.publish(fraction);
    }

    fn publish(&mut self, stream_fraction: f64) {
        let overall = (f64::from(self.completed_streams) + stream_fraction)
            / f64::from(self.expected_streams)
            * 100.0;
        let overall = (overall as f32).min(MAX_RUNNING_PERCENT);

        self.current.percent = self.current.percent.max(overall);
        self.current.phase = Phase::Downloading;
        self.emitter.emit(self.current.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(downloaded: u64, total: u64, elapsed: f64) -> ProgressLine {
        ProgressLine::Bytes {
            downloaded,
            total: Some(total),
            estimated: false,
            elapsed_secs: Some(elapsed),
        }
    }

    #[test]
    fn test_parse_template_line() {
        let line = format!("{} 1048576 4194304 NA 2.0", PROGRESS_MARKER);
        assert_eq!(parse_line(&line), Some(bytes(1_048_576, 4_194_304, 2.0)));

        // total unknown, estimate present
        let line = format!("{} 10 NA 40.5 NA", PROGRESS_MARKER);
        assert_eq!(
            parse_line(&line),
            Some(ProgressLine::Bytes {
                downloaded: 10,
                total: Some(40),
                estimated: true,
                elapsed_secs: None
            })
        );

        let line = format!("{} NA NA NA NA", PROGRESS_MARKER);
        assert_eq!(parse_line(&line), None);
    }

    #[test]
    fn test_parse_markers_and_legacy_lines() {
        assert_eq!(
            parse_line("__file__:/tmp/out/My Song.mp3"),
            Some(ProgressLine::FinalPath(PathBuf::from("/tmp/out/My Song.mp3")))
        );
        assert_eq!(
            parse_line("__title__:My Song"),
            Some(ProgressLine::Title("My Song".into()))
        );
        assert_eq!(
            parse_line("__postprocess__ started ExtractAudio"),
            Some(ProgressLine::PostProcess(Phase::Converting))
        );
        assert_eq!(parse_line("__postprocess__ finished Merger"), None);
        assert_eq!(
            parse_line("[download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)"),
            Some(ProgressLine::Percent(12.5))
        );
        assert_eq!(
            parse_line("[Merger] Merging formats into \"x.mp4\""),
            Some(ProgressLine::PostProcess(Phase::Merging))
        );
        assert_eq!(
            parse_line("[download] x.mp4 has already been downloaded"),
            Some(ProgressLine::AlreadyDownloaded)
        );
        assert_eq!(parse_line("[youtube] abc: Downloading webpage"), None);
    }

    #[test]
    fn test_parse_meta_line() {
        assert_eq!(
            parse_line("__meta__:212.4\tSome Channel"),
            Some(ProgressLine::Meta {
                duration_secs: Some(212),
                uploader: Some("Some Channel".into()),
            })
        );
        assert_eq!(
            parse_line("__meta__:NA\tNA"),
            Some(ProgressLine::Meta {
                duration_secs: None,
                uploader: None,
            })
        );
    }

    #[test]
    fn test_speed_and_eta_from_bytes() {
        let (emitter, rx) = ProgressEmitter::channel();
        let mut tracker = ProgressTracker::new(emitter, 1);
        tracker.begin();
        tracker.apply(&bytes(1000, 4000, 2.0));

        let ev = rx.borrow().clone();
        assert_eq!(ev.percent, 25.0);
        assert_eq!(ev.speed_bps, Some(500.0));
        assert_eq!(ev.eta_secs, Some(6));
        assert_eq!(ev.phase, Phase::Downloading);
    }

    #[test]
    fn test_percent_is_monotonic_across_streams() {
        let (emitter, _rx) = ProgressEmitter::channel();
        let mut tracker = ProgressTracker::new(emitter, 2);
        tracker.begin();

        let mut seen = Vec::new();
        for line in [
            bytes(50, 100, 1.0),
            bytes(100, 100, 2.0),
            // audio stream starts from zero
            bytes(10, 200, 0.5),
            bytes(5, 200, 0.6),
            bytes(200, 200, 3.0),
        ] {
            tracker.apply(&line);
            seen.push(tracker.current().percent);
        }

        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
        assert_eq!(seen[0], 25.0);
        assert!(seen[4] <= MAX_RUNNING_PERCENT);

        tracker.finish();
        assert_eq!(tracker.current().percent, 100.0);
        assert_eq!(tracker.current().phase, Phase::Finished);
    }

    #[test]
    fn test_small_first_stream_advances() {
        let (emitter, _rx) = ProgressEmitter::channel();
        let mut tracker = ProgressTracker::new(emitter, 2);
        tracker.begin();

        let mut seen = Vec::new();
        for line in [
            bytes(50, 100, 0.5),
            bytes(100, 100, 1.0),
            // second stream already past the first one's byte count
            bytes(150, 1000, 1.5),
            bytes(500, 1000, 2.0),
            bytes(900, 1000, 3.0),
        ] {
            tracker.apply(&line);
            seen.push(tracker.current().percent);
        }

        assert_eq!(seen[..2], [25.0, 50.0]);
        assert_eq!(seen[2], 57.5);
        assert_eq!(seen[3], 75.0);
        assert_eq!(seen[4], 95.0);
    }

    #[test]
    fn test_drifting_estimate_is_one_stream() {
        let (emitter, _rx) = ProgressEmitter::channel();
        let mut tracker = ProgressTracker::new(emitter, 2);
        tracker.begin();

        for (downloaded, estimate) in [(100, 1000), (300, 1100), (600, 1200)] {
            tracker.apply(&ProgressLine::Bytes {
                downloaded,
                total: Some(estimate),
                estimated: true,
                elapsed_secs: None,
            });
        }
        assert_eq!(tracker.current().percent, 25.0);
    }

    #[test]
    fn test_begin_resets_to_zero() {
        let (emitter, rx) = ProgressEmitter::channel();
        let mut tracker = ProgressTracker::new(emitter, 1);
        tracker.begin();
        tracker.apply(&ProgressLine::Percent(80.0));
        tracker.finish();
        assert_eq!(rx.borrow().percent, 100.0);

        tracker.begin();
        let ev = rx.borrow().clone();
        assert_eq!(ev.percent, 0.0);
        assert_eq!(ev.phase, Phase::Starting);
        assert_eq!(ev.downloaded_bytes, None);
    }

    #[test]
    fn test_postprocess_keeps_percent() {
        let (emitter, rx) = ProgressEmitter::channel();
        let mut tracker = ProgressTracker::new(emitter, 1);
        tracker.begin();
        tracker.apply(&ProgressLine::Percent(100.0));
        tracker.apply(&ProgressLine::PostProcess(Phase::Converting));

        let ev = rx.borrow().clone();
        assert_eq!(ev.phase, Phase::Converting);
        assert_eq!(ev.percent, MAX_RUNNING_PERCENT);
    }
}
