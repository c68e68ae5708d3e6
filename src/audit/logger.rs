use super::{RunConfig, RunOutcome, RunRecord};
use crate::sequencer::{ShutdownReport, StageRecord};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Persists run records under `<report_dir>/runs/`.
///
/// The run in progress is mirrored to `current-run.json` after every stage so
/// a crashed process still leaves a trace.
pub struct RunLogger {
    report_dir: PathBuf,
    current_run: Option<RunRecord>,
    current_run_file: PathBuf,
}

impl RunLogger {
    pub fn new(report_dir: &Path) -> Self {
        let current_run_file = report_dir.join("current-run.json");
        Self {
            report_dir: report_dir.to_path_buf(),
            current_run: None,
            current_run_file,
        }
    }

    pub fn start_run(&mut self, config: RunConfig) -> Result<()> {
        self.current_run = Some(RunRecord::new(config));
        self.save_current()
    }

    /// Append a completed stage to the current run.
    ///
    /// Errors when no run is active.
    pub fn add_stage(&mut self, stage: StageRecord) -> Result<()> {
        let run = self
            .current_run
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("add_stage called with no active run"))?;
        run.stages.push(stage);
        self.save_current()
    }

    pub fn record_shutdown(&mut self, report: ShutdownReport) -> Result<()> {
        let run = self
            .current_run
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("record_shutdown called with no active run"))?;
        run.shutdown = Some(report);
        self.save_current()
    }

    pub fn finish_run(&mut self, outcome: RunOutcome) -> Result<PathBuf> {
        let run = self
            .current_run
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("No current run to finish"))?;

        run.finish(outcome);

        let filename = format!(
            "{}_{}.json",
            run.started_at.format("%Y-%m-%dT%H-%M-%S"),
            &run.run_id.to_string()[..8]
        );
        let runs_dir = self.report_dir.join("runs");
        fs::create_dir_all(&runs_dir).context("Failed to create runs directory")?;
        let run_file = runs_dir.join(&filename);

        let json = serde_json::to_string_pretty(&run).context("Failed to serialize run record")?;
        fs::write(&run_file, json).context("Failed to write run record")?;

        if self.current_run_file.exists() {
            fs::remove_file(&self.current_run_file)
                .context("Failed to remove current-run.json after finishing run")?;
        }

        self.current_run = None;
        Ok(run_file)
    }

    pub fn save_current(&self) -> Result<()> {
        if let Some(ref run) = self.current_run {
            let json =
                serde_json::to_string_pretty(&run).context("Failed to serialize current run")?;
            fs::write(&self.current_run_file, json).context("Failed to write current run file")?;
        }
        Ok(())
    }

    pub fn current_run(&self) -> Option<&RunRecord> {
        self.current_run.as_ref()
    }

    pub fn list_runs(&self) -> Result<Vec<PathBuf>> {
        let runs_dir = self.report_dir.join("runs");
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs: Vec<PathBuf> = fs::read_dir(&runs_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();

        runs.sort();
        runs.reverse(); // Most recent first
        Ok(runs)
    }

    pub fn load_run(&self, path: &Path) -> Result<RunRecord> {
        let content = fs::read_to_string(path).context("Failed to read run record")?;
        let run: RunRecord = serde_json::from_str(&content).context("Failed to parse run record")?;
        Ok(run)
    }
}
