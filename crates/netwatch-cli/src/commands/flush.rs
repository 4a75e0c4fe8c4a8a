use netwatch_core::{CycleOutcome, Shutdown, unix_now};

use super::{CliResult, Overrides, build_cycle, load_config, open_store};

/// Deliver whatever is pending right now, with the configured retry policy.
pub fn run(overrides: &Overrides) -> CliResult {
    let config = load_config(overrides)?;
    let store = open_store(&config.store_path())?;

    let shutdown = Shutdown::new();
    let handler = shutdown.clone();
    let _ = ctrlc::set_handler(move || handler.trigger());

    let cycle = build_cycle(&config, store.clone(), shutdown)?;
    cycle.initialize()?;
    let report = cycle.run_once(unix_now())?;
    store.flush()?;

    match &report.outcome {
        CycleOutcome::Skipped => println!("Window {} is empty, nothing to send.", report.window),
        CycleOutcome::Delivered => println!(
            "Delivered window {}: {} entries in {} attempt(s).",
            report.window, report.entries, report.attempts
        ),
        CycleOutcome::Spilled(path) => println!(
            "Window {} could not be delivered; spilled to {}.",
            report.window,
            path.display()
        ),
    }
    if report.skipped_records > 0 {
        println!("  {} unreadable record(s) skipped.", report.skipped_records);
    }
    Ok(())
}
