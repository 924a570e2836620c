use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

mod cache;
mod catalog;
mod compiler;
mod multi_line;
mod packet;
mod rules;

mod commands {
    pub mod generate;
    pub mod inspect;
}

/// Compile Govee scenes into commands for the LAN API
#[derive(clap::Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Where to keep cached light effect libraries.
    /// Defaults to $GOVEE_CACHE_DIR, or the platform cache directory.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: SubCommand,
}

#[derive(clap::Parser, Debug)]
enum SubCommand {
    /// Fetch the scene catalog for a SKU and write a
    /// govee_<SKU>_scenes.json document of LAN commands
    Generate(commands::generate::GenerateCommand),
    /// Validate and describe a previously generated document
    Inspect(commands::inspect::InspectCommand),
}

pub fn opt_env_var<T: FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    <T as FromStr>::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(p) => {
            Ok(Some(p.parse().map_err(|err| {
                anyhow::anyhow!("parsing ${name}: {err:#}")
            })?))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => anyhow::bail!("${name} is invalid: {err:#}"),
    }
}

impl Args {
    pub async fn run(&self) -> anyhow::Result<()> {
        match &self.cmd {
            SubCommand::Generate(cmd) => cmd.run(self).await,
            SubCommand::Inspect(cmd) => cmd.run(self).await,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    color_backtrace::install();
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loading environment overrides from {path:?}");
    }

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("govee_lan_scenes=info"),
    )
    .init();

    let args = Args::parse();
    args.run().await
}
