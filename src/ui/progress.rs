use crate::monitor::StageOutcome;
use crate::sequencer::{RunSummary, SequenceEvent, ShutdownReport, StageKind, StageRecord};
use crate::ui::icons::{ARM, CHECK, CROSS, GRIPPER, HOURGLASS, RETRY, SPARKLE, TRUCK};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal display for a sequencer run, driven by [`SequenceEvent`]s.
///
/// Two bars are stacked vertically:
/// - Stage bar: completed stages out of the planned pipeline
/// - Status spinner: the stage currently waiting on the monitor
pub struct SequencerUI {
    multi: MultiProgress,
    stage_bar: ProgressBar,
    status_bar: ProgressBar,
    verbose: bool,
}

impl SequencerUI {
    /// `planned_stages` sizes the stage bar; grasp retries extend it.
    pub fn new(planned_stages: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let stage_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░");

        let stage_bar = multi.add(ProgressBar::new(planned_stages));
        stage_bar.set_style(stage_style);
        stage_bar.set_prefix("Stages");

        let status_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let status_bar = multi.add(ProgressBar::new_spinner());
        status_bar.set_style(status_style);
        status_bar.set_prefix("  Cell");

        Self {
            multi,
            stage_bar,
            status_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn handle(&self, event: &SequenceEvent) {
        match event {
            SequenceEvent::Prelude => {
                self.status_bar
                    .set_message(format!("{}preparing cell", TRUCK));
                self.status_bar
                    .enable_steady_tick(Duration::from_millis(100));
            }
            SequenceEvent::StageStarted {
                kind,
                zone,
                attempt,
            } => self.stage_started(*kind, *zone, *attempt),
            SequenceEvent::StageCompleted { record } => self.stage_completed(record),
            SequenceEvent::GraspAttempt {
                zone,
                attempt,
                acquired,
            } => self.grasp_attempt(*zone, *attempt, *acquired),
            SequenceEvent::Aborted { message } => {
                self.status_bar.finish_and_clear();
                self.print_line(format!("{}{}", CROSS, style(message).red().bold()));
            }
            SequenceEvent::Finished { stages } => {
                self.status_bar.finish_and_clear();
                self.stage_bar
                    .finish_with_message(format!("{}{} stages done", SPARKLE, stages));
            }
        }
    }

    fn stage_started(&self, kind: StageKind, zone: Option<usize>, attempt: Option<u32>) {
        let place = match (zone, attempt) {
            (Some(z), Some(a)) if a > 1 => format!(" (zone {}, attempt {})", z, a),
            (Some(z), _) => format!(" (zone {})", z),
            (None, _) => String::new(),
        };
        self.stage_bar
            .set_message(format!("{}{}", style(kind.name()).yellow(), place));
        self.status_bar.set_message(format!(
            "{}{} {}",
            ARM,
            kind.description(),
            style("(waiting for convergence)").dim()
        ));
        self.status_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    fn stage_completed(&self, record: &StageRecord) {
        self.stage_bar.inc(1);
        let (icon, outcome) = match record.outcome {
            StageOutcome::Converged => (CHECK, style("converged").green()),
            StageOutcome::Stagnated => (HOURGLASS, style("stagnated").yellow()),
            StageOutcome::Pending => (HOURGLASS, style("pending").dim()),
        };
        self.print_line(format!(
            "{}{} {} in {}ms",
            icon,
            record.kind,
            outcome,
            record.duration_ms
        ));
        if self.verbose {
            self.print_line(format!(
                "    {} {} tasks, monitored {:?}, {} samples ({} dropped busy)",
                style("→").dim(),
                record.submitted.len(),
                record.monitored,
                record.samples.received,
                record.samples.dropped_busy
            ));
        }
    }

    fn grasp_attempt(&self, zone: usize, attempt: u32, acquired: bool) {
        if acquired {
            self.print_line(format!(
                "{}grasp acquired (zone {}, attempt {})",
                GRIPPER, zone, attempt
            ));
        } else {
            // the approach runs again
            self.stage_bar.inc_length(2);
            self.print_line(format!(
                "{}{}",
                RETRY,
                style(format!(
                    "grasp not acquired (zone {}, attempt {}), retrying",
                    zone, attempt
                ))
                .yellow()
            ));
        }
    }

    pub fn show_summary(&self, summary: &RunSummary) {
        self.print_line(format!(
            "{}Placed {} object(s): {} stages, {} stagnated, {} grasp attempt(s)",
            SPARKLE,
            summary.zones,
            summary.records.len(),
            summary.stagnated(),
            summary.grasp_attempts
        ));
    }

    pub fn show_shutdown(&self, report: &ShutdownReport) {
        let mark = |ok: bool| if ok { style("ok").green() } else { style("FAILED").red() };
        self.print_line(format!(
            "{}Safe shutdown: deactivate {}, clear tasks {}, reset {}",
            if report.is_clean() { CHECK } else { CROSS },
            mark(report.deactivated),
            mark(report.tasks_cleared),
            mark(report.controller_reset)
        ));
    }
}
