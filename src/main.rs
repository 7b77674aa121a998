mod config;
mod error;
mod ethereum;
mod server;

use anyhow::Result;
use clap::{Arg, Command};
use config::Config;
use server::AbiConsoleServer;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the MCP stdio transport, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let matches = Command::new("abi-console")
        .version("0.1.0")
        .about("MCP server for ABI-driven smart contract interaction")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to configuration file"),
        )
        .arg(
            Arg::new("rpc-url")
                .short('r')
                .long("rpc-url")
                .value_name("URL")
                .help("RPC endpoint URL"),
        )
        .arg(
            Arg::new("api-url")
                .long("api-url")
                .value_name("URL")
                .help("Base URL of the contract artifact service"),
        )
        .arg(
            Arg::new("contract")
                .long("contract")
                .value_name("NAME")
                .help("Contract to open at startup"),
        )
        .arg(
            Arg::new("account")
                .short('a')
                .long("account")
                .value_name("ADDRESS")
                .help("Account used as sender for calls and transactions"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a sample configuration file and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("save-config")
                .long("save-config")
                .help("Write the effective configuration to the default path and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config-path")
                .long("config-path")
                .help("Print the default configuration file path and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    if matches.get_flag("generate-config") {
        println!("{}", Config::generate_sample());
        return Ok(());
    }

    if matches.get_flag("config-path") {
        match Config::default_config_path() {
            Ok(path) => {
                println!("{}", path.display());
                return Ok(());
            }
            Err(e) => {
                error!("Could not determine default config path: {}", e);
                return Err(e);
            }
        }
    }

    let config_path = match matches.get_one::<String>("config") {
        Some(path) => Some(std::path::PathBuf::from(path)),
        None => Config::default_config_path()
            .ok()
            .filter(|path| path.exists()),
    };
    let mut config = Config::load_or_default(config_path).await;

    // Override with command line arguments
    if let Some(rpc_url) = matches.get_one::<String>("rpc-url") {
        config.chain.rpc_url = rpc_url.clone();
    }

    if let Some(api_url) = matches.get_one::<String>("api-url") {
        config.artifacts.api_url = api_url.clone();
    }

    if let Some(contract) = matches.get_one::<String>("contract") {
        config.session.default_contract = Some(contract.clone());
    }

    if let Some(account) = matches.get_one::<String>("account") {
        config.session.account = Some(account.clone());
    }

    if matches.get_flag("save-config") {
        let path = Config::default_config_path()?;
        config.save_to_file(&path).await?;
        println!("{}", path.display());
        return Ok(());
    }

    info!("Starting ABI console");
    info!("RPC endpoint: {}", config.chain.rpc_url);
    info!("Artifact service: {}", config.artifacts.api_url);
    if config.session.account.is_none() {
        warn!("No account configured; state-changing calls will fail until one is set");
    }

    let server = AbiConsoleServer::new(config).await?;

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        return Err(e);
    }

    Ok(())
}
