//! CWB CLI - Command line tool for CyAN waterbody aggregation.

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "cwb-cli",
    version,
    about = "CyAN waterbody zonal aggregation toolkit"
)]
struct Cli {
    #[command(flatten)]
    global: cwb_cmd::GlobalOpts,

    #[command(subcommand)]
    command: cwb_cmd::Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    log::debug!("Using database {}", cli.global.database.display());
    cwb_cmd::run(cli.global, cli.command).await
}
