use anyhow::Context;
use assetflow::{resolve, simulate, PageFixture, PipelineConfig};
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("assetflow")
        .version(assetflow::VERSION)
        .about("Client-side resource-optimization pipeline")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("simulate")
                .about("Run the pipeline over a page fixture and report the outcome")
                .arg(
                    Arg::new("page")
                        .long("page")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Page fixture (TOML)"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Pipeline configuration (TOML)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("resolve")
                .about("Pick the srcset candidate for a viewport")
                .arg(
                    Arg::new("srcset")
                        .long("srcset")
                        .required(true)
                        .help("Descriptor list, e.g. \"a.jpg 400w, b.jpg 800w\""),
                )
                .arg(
                    Arg::new("width")
                        .long("width")
                        .required(true)
                        .value_parser(value_parser!(f64))
                        .help("Viewport width in CSS pixels"),
                )
                .arg(
                    Arg::new("dpr")
                        .long("dpr")
                        .default_value("1")
                        .value_parser(value_parser!(f64))
                        .help("Device pixel ratio"),
                ),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("simulate", args)) => {
            let page = args.get_one::<PathBuf>("page").context("--page is required")?;
            let fixture = PageFixture::load(page)?;
            let config = match args.get_one::<PathBuf>("config") {
                Some(path) => PipelineConfig::load(path)?,
                None => PipelineConfig::default(),
            };

            let report = simulate(&fixture, config).await?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render_text());
            }
            if report.stats.error > 0 {
                std::process::exit(1);
            }
        }
        Some(("resolve", args)) => {
            let srcset = args.get_one::<String>("srcset").context("--srcset is required")?;
            let width = *args.get_one::<f64>("width").context("--width is required")?;
            let dpr = args.get_one::<f64>("dpr").copied().unwrap_or(1.0);
            println!("{}", resolve(srcset, width, dpr)?);
        }
        _ => unreachable!("subcommand_required"),
    }
    Ok(())
}
