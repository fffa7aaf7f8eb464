use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;

use gdctools::cli::{self, CommonArgs};
use gdctools::domain::LoadfileFormat;
use gdctools::loadfile::{self, Loadfile, LoadfileOptions};
use gdctools::output::JsonOutput;

#[derive(Parser)]
#[command(name = "gdc-loadfile")]
#[command(about = "Assemble sample, sample-set and participant loadfiles from diced data")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(short = 'd', long = "dice-dir", value_name = "DIR", help = "Root of the diced tree")]
    dice_dir: Option<String>,

    #[arg(
        short = 'o',
        long = "output-dir",
        value_name = "DIR",
        help = "Root of the loadfile output tree",
    )]
    output_dir: Option<String>,

    #[arg(
        short = 'f',
        long,
        value_name = "FORMAT",
        help = "Loadfile dialect: firecloud or firehose",
    )]
    format: Option<String>,

    #[arg(
        short = 'p',
        long = "file-prefix",
        value_name = "PREFIX",
        help = "Replaces the dice root at the start of every file path",
    )]
    file_prefix: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        return ExitCode::from(cli::exit_code(&report));
    }
    ExitCode::SUCCESS
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let mut config = cli.common.load_config()?;
    if let Some(dir) = &cli.dice_dir {
        config.dice_dir = Some(Utf8PathBuf::from(dir));
    }
    if let Some(dir) = &cli.output_dir {
        config.loadfile_dir = Some(Utf8PathBuf::from(dir));
    }
    if let Some(format) = &cli.format {
        config.format = format.parse::<LoadfileFormat>()?;
    }
    if let Some(prefix) = &cli.file_prefix {
        config.file_prefix = Some(prefix.clone());
    }
    let datestamp = cli.common.resolve_datestamp(&config)?;
    cli::init_logging(
        "gdc-loadfile",
        config.log_dir.as_deref(),
        cli.common.verbose,
        &datestamp,
    )?;

    let blacklist = match &config.blacklist {
        Some(path) => loadfile::load_blacklist(path.as_std_path())?,
        None => Vec::new(),
    };
    let dice_root = config.dice_dir()?;
    let output_root = config.loadfile_dir()?;

    let discovery = Loadfile::new(
        dice_root.clone(),
        output_root.clone(),
        options(&config, &datestamp, &blacklist),
    )
    .with_aggregates(config.aggregates.clone());
    let scope = cli::local_scope(
        &dice_root,
        &config.programs,
        &config.projects,
        |program| discovery.projects(program),
    )?;

    for (program, projects) in &scope {
        let loadfile = Loadfile::new(
            dice_root.clone(),
            output_root.clone(),
            options(&config, &datestamp, &blacklist),
        )
        .with_aggregates(config.aggregates_for(program));
        let summary = loadfile.run(program, projects)?;
        JsonOutput::print_loadfile(&summary).into_diagnostic()?;
    }
    Ok(())
}

fn options(
    config: &gdctools::config::GdcConfig,
    datestamp: &gdctools::domain::Datestamp,
    blacklist: &[String],
) -> LoadfileOptions {
    LoadfileOptions {
        datestamp: datestamp.clone(),
        format: config.format,
        file_prefix: config.file_prefix.clone(),
        missing_file_value: config.missing_file_value.clone(),
        blacklist: blacklist.to_vec(),
    }
}
