use std::path::PathBuf;
use std::sync::Arc;

use netwatch_server::{NdjsonSink, ServerConfig, run_server};

use super::CliResult;

pub fn run(host: &str, port: u16, out_dir: PathBuf) -> CliResult {
    let mut config = ServerConfig::from_env()?;
    config.host = host.to_string();
    config.port = port;
    config.out_dir = out_dir;

    let sink = NdjsonSink::new(&config.out_dir, config.tables.clone())?;
    let base = format!("http://{}", config.bind_addr());

    println!("netwatch ingestion endpoint v{}", netwatch_core::VERSION);
    println!("   {base}");
    println!();
    println!("   Endpoints:");
    println!("     POST /?key=..&loop=..        Ingest one batch (also /ingest)");
    println!("     GET  /health                 Liveness and batch counters");
    println!();
    println!("   Tables:");
    for table in [
        &config.tables.ssids,
        &config.tables.connectivity,
        &config.tables.pings,
    ] {
        println!("     {}", sink.table_path(table).display());
    }
    println!();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_server(config, Arc::new(sink)))?;
    Ok(())
}
