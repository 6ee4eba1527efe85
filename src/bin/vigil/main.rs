use clap::Parser;
use miette::Result;

mod common;
mod daemon;
mod init;

#[derive(Parser)]
#[clap(name = "Vigil")]
#[clap(bin_name = "vigil")]
#[clap(author, version, about, long_about = None)]
enum Vigil {
    /// Run the oracle node until interrupted.
    Daemon(daemon::Args),

    /// Write a per-network preset config file.
    Init(init::Args),
}

fn main() -> Result<()> {
    let args = Vigil::parse();

    match args {
        Vigil::Daemon(x) => daemon::run(&x)?,
        Vigil::Init(x) => init::run(&x)?,
    };

    Ok(())
}
