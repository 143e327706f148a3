use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Index bitcoind blocks into PostgreSQL")]
pub struct Cli {
    /// Location of config file. Missing files are allowed when the environment supplies the settings.
    #[arg(short, long, default_value = "indexer.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub subcommand: Option<Subcommand>,
}

#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Subcommand {
    /// Follow the node and load every block into the database (default).
    Index,

    /// Create the database tables if they do not exist, then exit.
    Setup,

    /// Output example config file.
    Init,
}

impl Cli {
    pub fn subcommand(&self) -> Subcommand {
        self.subcommand.clone().unwrap_or(Subcommand::Index)
    }
}
