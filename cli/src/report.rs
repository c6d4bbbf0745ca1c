//! Console rendering of engine events.
//!
//! The reporter thread is the only consumer of the event channel, so it is
//! the only place that draws progress while workers run.

use crossbeam_channel::Receiver;
use engine::{BackupEvent, BackupJob, TransferReport};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const SPINNER_TICK: Duration = Duration::from_millis(120);
const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})";

/// What the reporter saw, for the final summary and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReportStats {
    pub files_found: usize,
    pub explore_failures: usize,
    pub files_done: usize,
    pub files_failed: usize,
    pub bytes_downloaded: u64,
    pub worker_connect_failures: usize,
}

pub struct Reporter {
    verbose: bool,
    hidden: bool,
    spinner: Option<ProgressBar>,
    bar: Option<ProgressBar>,
    stats: ReportStats,
}

impl Reporter {
    pub fn new(verbose: bool) -> Self {
        Reporter {
            verbose,
            hidden: false,
            spinner: None,
            bar: None,
            stats: ReportStats::default(),
        }
    }

    /// Render every event from `events` on a dedicated thread until all
    /// senders are gone.
    pub fn spawn(events: Receiver<BackupEvent>, verbose: bool) -> io::Result<JoinHandle<ReportStats>> {
        thread::Builder::new().name("reporter".to_string()).spawn(move || {
            let mut reporter = Reporter::new(verbose);
            for event in events.iter() {
                reporter.handle(event);
            }
            reporter.finish()
        })
    }

    pub fn handle(&mut self, event: BackupEvent) {
        match event {
            BackupEvent::ScanStarted | BackupEvent::DirectoryFound { .. } => {}
            BackupEvent::ScanFailed { cause } => {
                self.line(format!("Folder scan failed: {}", cause));
            }
            BackupEvent::DiscoveryStarted { roots } => {
                let spinner = ProgressBar::with_draw_target(None, self.draw_target());
                spinner.set_style(ProgressStyle::default_spinner());
                spinner.set_message(format!("Scanning {} ... this may take a while", roots.join(", ")));
                spinner.enable_steady_tick(SPINNER_TICK);
                self.spinner = Some(spinner);
            }
            BackupEvent::FileDiscovered { unit } => {
                self.stats.files_found += 1;
                if let Some(spinner) = &self.spinner {
                    spinner.set_message(format!("{} files found, last: {}", self.stats.files_found, unit.remote_path));
                }
            }
            BackupEvent::ExploreFailed { path, cause } => {
                self.stats.explore_failures += 1;
                self.line(format!("Warning: could not explore {}: {}", path, cause));
            }
            BackupEvent::DiscoveryCompleted { files, total_bytes } => {
                if let Some(spinner) = self.spinner.take() {
                    spinner.finish_and_clear();
                }
                self.line(format!("Found {} files to download ({}).", files, format_bytes(total_bytes)));
            }
            BackupEvent::TransferStarted {
                files,
                total_bytes,
                workers,
            } => {
                self.line(format!("Downloading {} files with {} workers...", files, workers));
                let bar = ProgressBar::with_draw_target(Some(total_bytes), self.draw_target());
                bar.set_style(bar_style());
                self.bar = Some(bar);
            }
            BackupEvent::DownloadProgress { bytes } => {
                self.stats.bytes_downloaded += bytes;
                if let Some(bar) = &self.bar {
                    bar.inc(bytes);
                }
            }
            BackupEvent::FileCompleted { path, bytes } => {
                self.stats.files_done += 1;
                if self.verbose {
                    self.line(format!("Done: {} ({})", path, format_bytes(bytes)));
                }
            }
            BackupEvent::FileFailed { path, cause } => {
                self.stats.files_failed += 1;
                self.line(format!("Warning: error downloading '{}': {}", path, cause));
            }
            BackupEvent::WorkerConnectFailed { worker, cause } => {
                self.stats.worker_connect_failures += 1;
                self.line(format!("Warning: download worker {} could not connect: {}", worker, cause));
            }
            BackupEvent::RunCompleted { .. } => {
                if let Some(bar) = self.bar.take() {
                    bar.finish();
                }
            }
        }
    }

    /// Clear anything still drawn and hand back the counters.
    pub fn finish(mut self) -> ReportStats {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        self.stats
    }

    /// Print a line above any active bar.
    fn line(&self, message: String) {
        if self.hidden {
            return;
        }
        match self.bar.as_ref().or(self.spinner.as_ref()) {
            Some(active) => active.println(message),
            None => eprintln!("{}", message),
        }
    }

    fn draw_target(&self) -> ProgressDrawTarget {
        if self.hidden {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr()
        }
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Final summary printed after the run.
pub fn summary_lines(job: &BackupJob, report: &TransferReport) -> Vec<String> {
    let failures = report.failures();
    let mut lines = Vec::new();

    if failures.is_empty() && job.explore_errors.is_empty() {
        lines.push("Backup complete!".to_string());
    } else {
        lines.push("Backup finished with errors.".to_string());
    }
    lines.push(format!(
        "Summary: {} done, {} failed, {} folders skipped",
        report.done_count(),
        failures.len(),
        job.explore_errors.len()
    ));
    lines.push(format!("Bytes downloaded: {}", format_bytes(report.bytes_written)));
    lines.push(format!("Elapsed: {}", format_duration(report.elapsed)));

    if !job.explore_errors.is_empty() {
        lines.push(String::new());
        lines.push("Skipped folders:".to_string());
        for error in &job.explore_errors {
            lines.push(format!("  {}: {}", error.path, error.cause));
        }
    }

    if !failures.is_empty() {
        lines.push(String::new());
        lines.push("Failed files:".to_string());
        for failure in &failures {
            lines.push(format!("  {}: {}", failure.path, failure.cause));
        }
    }

    lines.push(String::new());
    lines.push(format!("Files have been saved to: {}", job.backup_root.display()));
    lines
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
