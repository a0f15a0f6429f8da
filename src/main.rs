use clap::Parser;
use page_snapshot::{load_config, setup_logging, Cli, CliRunner, Commands};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("Starting page-snapshot v{}", env!("CARGO_PKG_VERSION"));

    // Validation only reads the file; it must not touch snapshot or history paths.
    let result = if let Commands::Validate { config } = &args.command {
        CliRunner::validate_config(config).await
    } else {
        run(args).await
    };

    if let Err(e) = result {
        error!("Application error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(args: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args).await?;
    let runner = CliRunner::new(config, &args)?;
    runner.run(args.command).await
}
