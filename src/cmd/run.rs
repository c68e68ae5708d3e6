//! `pickplace run`: the full sequence against the simulated cell.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use super::super::Cli;

/// Exit code when the sequence aborted and the cell was shut down.
pub const EXIT_ABORTED: i32 = 3;
/// Exit code when the run was interrupted with Ctrl-C.
pub const EXIT_INTERRUPTED: i32 = 130;

pub async fn cmd_run(cli: &Cli, work_dir: PathBuf, no_report: bool) -> Result<i32> {
    use pickplace::audit::{RunConfig, RunLogger, RunOutcome};
    use pickplace::config::Config;
    use pickplace::errors::SequenceError;
    use pickplace::logging;
    use pickplace::sequencer::{SequenceEvent, Sequencer};
    use pickplace::sim::{SimController, SimDrivers};
    use pickplace::ui::SequencerUI;

    let config = Config::new(work_dir, cli.config.clone(), cli.verbose)?;
    config.ensure_directories()?;
    let settings = config.settings();

    let level = if cli.verbose {
        "debug"
    } else {
        settings.logging.level.as_str()
    };
    let log_file = settings
        .logging
        .file
        .as_ref()
        .map(|f| config.work_dir.join(f));
    let _log_guard = logging::init(level, settings.logging.format, log_file.as_deref())?;

    for warning in settings.validate() {
        tracing::warn!("{}", warning);
    }

    let plan = settings.stage_plan()?;
    let sequencer_settings = settings.sequencer_settings()?;
    let zones = settings.cell.zones.clone();
    let planned = plan.pipeline(zones.len()).len() as u64;

    let mut audit = if no_report {
        None
    } else {
        let mut logger = RunLogger::new(&config.report_dir);
        logger.start_run(RunConfig {
            config_file: config
                .loaded
                .then(|| config.config_file.display().to_string()),
            zones: zones.len(),
            max_grasp_attempts: sequencer_settings.max_grasp_attempts,
            feedback_deadline_secs: sequencer_settings
                .feedback_deadline
                .map(|d| d.as_secs_f64()),
        })?;
        Some(logger)
    };

    let control = Arc::new(SimController::new(settings.sim_settings()));
    let drivers = Arc::new(SimDrivers::new(settings.sim_drivers_settings()));
    let geometry = Arc::new(settings.cell_geometry());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<SequenceEvent>();
    let mut sequencer = Sequencer::new(control, drivers, geometry)
        .with_plan(plan)
        .with_settings(sequencer_settings)
        .with_zones(zones)
        .with_grasp(settings.cell.grasp.clone())
        .with_event_channel(tx);

    // The display task also mirrors completed stages into the run record.
    let verbose = cli.verbose;
    let events = tokio::spawn(async move {
        let ui = SequencerUI::new(planned, verbose);
        while let Some(event) = rx.recv().await {
            ui.handle(&event);
            if let SequenceEvent::StageCompleted { record } = event
                && let Some(ref mut logger) = audit
                && let Err(e) = logger.add_stage(record)
            {
                tracing::warn!(error = %e, "Failed to record stage");
            }
        }
        (ui, audit)
    });

    let result = tokio::select! {
        result = sequencer.run() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let (code, outcome, report) = match result {
        Some(Ok(summary)) => (
            0,
            RunOutcome::Completed {
                grasp_attempts: summary.grasp_attempts,
            },
            Ok(summary),
        ),
        Some(Err(SequenceError::Aborted { cause, report })) => (
            EXIT_ABORTED,
            RunOutcome::Aborted {
                error: cause.to_string(),
            },
            Err(report),
        ),
        None => {
            tracing::warn!("Interrupted, shutting down the cell");
            let report = sequencer.shutdown().await;
            (EXIT_INTERRUPTED, RunOutcome::Interrupted, Err(report))
        }
    };

    // Closes the event channel so the display task drains and returns.
    drop(sequencer);
    let (ui, mut audit) = events.await?;

    match &report {
        Ok(summary) => ui.show_summary(summary),
        Err(shutdown) => ui.show_shutdown(shutdown),
    }

    if let Some(ref mut logger) = audit {
        if let Err(shutdown) = &report {
            logger.record_shutdown(*shutdown)?;
        }
        let path = logger.finish_run(outcome)?;
        if cli.verbose {
            println!("Run record: {}", path.display());
        }
    }

    Ok(code)
}
