//! `pickplace stages`: print the stage plan.

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use super::super::Cli;

pub fn cmd_stages(cli: &Cli, work_dir: PathBuf) -> Result<()> {
    use pickplace::config::Config;

    let config = Config::new(work_dir, cli.config.clone(), cli.verbose)?;
    let settings = config.settings();
    let plan = settings.stage_plan()?;

    println!();
    println!("{}", style("Stage plan").bold());
    println!();
    println!(
        "  {:<24} {:>9} {:>9} {:>8}  {:<8} {:<13} stiffness",
        "stage", "error_tol", "diff_tol", "timeout", "monitor", "visualize"
    );
    for spec in plan.iter() {
        let stiffness = spec
            .stiffness
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let refresh = if spec.precondition.is_some() {
            style(" (refreshes grasp)").dim().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:<24} {:>9.0e} {:>9.0e} {:>7.2}s  {:<8} {:<13} {}{}",
            spec.kind.name(),
            spec.tolerances.error_tol,
            spec.tolerances.diff_tol,
            spec.tolerances.timeout.as_secs_f64(),
            spec.monitor.to_string(),
            spec.visualize.to_string(),
            stiffness,
            refresh
        );
    }

    let zones = settings.cell.zones.len();
    println!();
    println!(
        "Pipeline for {} zone(s), first grasp succeeding: {} stages",
        zones,
        plan.pipeline(zones).len()
    );
    if cli.verbose {
        for (i, (kind, zone)) in plan.pipeline(zones).iter().enumerate() {
            match zone {
                Some(z) => println!("  {:>2}. {} (zone {})", i + 1, kind, z),
                None => println!("  {:>2}. {}", i + 1, kind),
            }
        }
    }
    println!();

    Ok(())
}
