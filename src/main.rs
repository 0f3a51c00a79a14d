use clap::Parser;

use cgrb::cli::{Cli, Command};
use cgrb::config::BenchmarkConfig;
use cgrb::driver::{format_report, Driver, EngineSelection};
use cgrb::gpu::list_devices;
use cgrb::{error, Result};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", error::user_friendly_message(&e));
        if let Some(suggestion) = error::suggestion(&e) {
            eprintln!("{}", suggestion);
        }
        log::debug!("{:?}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.command == Command::Devices {
        let devices = list_devices()?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&devices)?);
        } else if devices.is_empty() {
            println!("No compute adapters found");
        } else {
            for device in &devices {
                println!("{}", device);
            }
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => BenchmarkConfig::load_from(path)?,
        None => BenchmarkConfig::load()?,
    };
    let config = cli.command.apply(config);

    let selection = match &cli.command {
        Command::Cpu(_) => EngineSelection::Cpu,
        Command::Gpu(_) => EngineSelection::Gpu,
        _ => EngineSelection::All,
    };

    let driver = Driver::new(config, cli.command.repeat())?;
    driver.install_ctrl_c_handler();
    let report = driver.run(selection).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", format_report(&report));
    }

    Ok(())
}
