use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Opts {
    /// Path to the TOML configuration file.
    #[clap(long, default_value = "identity.toml")]
    pub config: PathBuf,

    /// Emit logs as JSON.
    #[clap(long)]
    pub json: bool,
}

impl Opts {
    pub fn read() -> Opts {
        Opts::parse()
    }
}
