mod cli;

use bulksync::app::App;
use bulksync::config::Config;
use bulksync::humanize::format_bytes;
use bulksync::observability::init_tracing;
use bulksync::server::{self, AnyError};
use clap::Parser;
use cli::{Cli, Commands};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();
    let config = Config::load()?;
    init_tracing(&config.telemetry.log_level);

    match cli.command {
        Commands::Server(args) => {
            let address = args.address.unwrap_or(config.server.bind_addr);
            // Adapters are linked in by embedding crates; the stock binary
            // runs the engine over whatever the ledger already holds.
            let app = Arc::new(App::build(config, Vec::new())?);
            let installed = app.start()?;
            info!(installed, "Scheduler started");

            server::run(app.clone(), address).await?;
            app.shutdown()?;
        }
        Commands::Stats => {
            let app = App::build(config, Vec::new())?;
            let ledger = app.store.stats()?;
            let catalog = app.catalog.stats()?;

            println!("sources:          {}", ledger.source_count);
            println!("enabled sources:  {}", catalog.enabled_sources);
            println!("products:         {}", ledger.product_count);
            println!("deliveries:       {}", ledger.delivery_count);
            println!("files:            {}", catalog.total_files);
            println!("downloaded files: {}", catalog.downloaded_files);
            println!("pending files:    {}", catalog.pending_files);
            println!("download entries: {}", ledger.download_count);
            println!("webhooks:         {}", ledger.webhook_count);

            let bytes: u64 = app
                .store
                .list_files()?
                .iter()
                .map(|f| f.file_size)
                .sum();
            println!("catalog size:     {}", format_bytes(bytes));
        }
    }

    Ok(())
}
