use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = talentdesk_cli::Cli::parse();
    talentdesk_cli::run_cli(cli)
}
