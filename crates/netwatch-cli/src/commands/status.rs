use std::path::Path;

use netwatch_core::{BatchAssembler, Window, WindowTracker, unix_now};

use super::{CliResult, open_store};

/// Print the checkpoint and the size of the window the next cycle would send.
pub fn run(data_dir: &Path, settle_secs: u64) -> CliResult {
    let path = data_dir.join("store");
    let store = open_store(&path)?;
    let now = unix_now();
    let tracker = WindowTracker::new(store.snapshots_handle(), now);

    println!("Store:       {}", path.display());
    let start = match tracker.checkpoint()? {
        Some(ts) => {
            println!("Checkpoint:  {ts} ({}s ago)", now.saturating_sub(ts));
            ts
        }
        None => {
            println!("Checkpoint:  none (no cycle has run yet)");
            return Ok(());
        }
    };

    let window = Window::new(start, now.saturating_sub(settle_secs));
    let batch = BatchAssembler::new(store).assemble(window)?;
    println!("Pending:     {window}");
    println!("  networks      {}", batch.metrics.networks.len());
    println!("  connectivity  {}", batch.metrics.connectivity.len());
    println!("  pings         {}", batch.metrics.pings.len());
    if batch.skipped_records > 0 {
        println!("  unreadable    {}", batch.skipped_records);
    }
    Ok(())
}
