use std::path::PathBuf;

use miette::{bail, IntoDiagnostic};

use vigil::config::{KnownNetwork, RootConfig};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Network to preset (mainnet, goerli, gnosis).
    #[arg(long, default_value = "mainnet")]
    network: String,

    /// Where to write the config file.
    #[arg(long, default_value = "vigil.toml")]
    output: PathBuf,

    /// Overwrite an existing config file.
    #[arg(long)]
    force: bool,
}

pub fn run(args: &Args) -> miette::Result<()> {
    let network: KnownNetwork = args.network.parse().into_diagnostic()?;

    if args.output.exists() && !args.force {
        bail!("{} already exists, use --force to overwrite", args.output.display());
    }

    let preset = RootConfig::from(&network);
    let rendered = toml::to_string_pretty(&preset).into_diagnostic()?;

    std::fs::write(&args.output, rendered).into_diagnostic()?;

    println!(
        "wrote {} preset to {}; fill in the oracle key, pool sets and store credentials before starting the daemon",
        network,
        args.output.display()
    );

    Ok(())
}
