use anyhow::Context;
use clap::{Parser, ValueEnum};
use coopsrs::{
    ArrayStationSource, CoopsClient, CoopsConfig, DataSource, Metadata, TabularStationSource,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[clap(help = "CO-OPS currents station id (e.g. cb0102)")]
    station_id: String,
    #[clap(short, long, value_enum, default_value_t = ContainerKind::Dataframe)]
    container: ContainerKind,
    /// print the schema instead of the data
    #[clap(long)]
    schema: bool,
    /// print the merged metadata instead of the data
    #[clap(long)]
    metadata: bool,
    /// TOML file layered over the defaults; `coops.toml` when omitted
    #[clap(long)]
    config: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Debug)]
enum ContainerKind {
    Dataframe,
    Xarray,
}

fn show<S: DataSource>(source: &mut S, cli: &Cli) -> anyhow::Result<()>
where
    S::Output: std::fmt::Display,
{
    if cli.schema {
        print!("{}", source.schema()?);
    } else if cli.metadata {
        println!("{}", serde_json::to_string_pretty(&source.metadata()?)?);
    } else {
        println!("{}", source.read()?);
    }
    source.close();
    Ok(())
}

fn entrypoint() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = CoopsConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let provider = CoopsClient::from_config(config)?;
    let shown = match cli.container {
        ContainerKind::Dataframe => {
            let mut source =
                TabularStationSource::with_provider(&cli.station_id, Metadata::new(), provider);
            show(&mut source, &cli)
        }
        ContainerKind::Xarray => {
            let mut source =
                ArrayStationSource::with_provider(&cli.station_id, Metadata::new(), provider);
            show(&mut source, &cli)
        }
    };
    shown.with_context(|| format!("station {}", cli.station_id))
}

fn main() -> ExitCode {
    pretty_env_logger::init();
    let exit_code = match entrypoint() {
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
        Ok(_) => ExitCode::SUCCESS,
    };
    exit_code
}
