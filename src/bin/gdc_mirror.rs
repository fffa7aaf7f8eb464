use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;

use gdctools::api::{ApiContext, GdcHttpClient};
use gdctools::cli::{self, CommonArgs};
use gdctools::domain::Datestamp;
use gdctools::ledger::Ledger;
use gdctools::mirror::{self, Mirror, MirrorOptions};
use gdctools::output::JsonOutput;

#[derive(Parser)]
#[command(name = "gdc-mirror")]
#[command(about = "Mirror open-access GDC files into a datestamped local snapshot")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(short = 'm', long = "mirror-dir", value_name = "DIR", help = "Root of the local mirror")]
    mirror_dir: Option<String>,

    #[arg(long, help = "Mirror the legacy archive, keeping server file names verbatim")]
    legacy: bool,

    #[arg(
        short = 'f',
        long = "force-download",
        help = "Download every file, even when an unchanged copy is on disk",
    )]
    force_download: bool,
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
    if let Some(dir) = &cli.mirror_dir {
        config.mirror_dir = Some(Utf8PathBuf::from(dir));
    }
    if cli.legacy {
        config.legacy = true;
    }
    let datestamp = match cli.common.date.as_deref() {
        Some(value) => value.parse::<Datestamp>()?,
        None => Datestamp::today(),
    };
    cli::init_logging(
        "gdc-mirror",
        config.log_dir.as_deref(),
        cli.common.verbose,
        &datestamp,
    )?;

    let client = GdcHttpClient::new(ApiContext::new(config.legacy))?;
    let scope = mirror::resolve_scope(&client, &config.programs, &config.projects)?;
    let options = MirrorOptions {
        datestamp,
        categories: config.categories.clone(),
        cases: config.cases.clone(),
        workflow: config.workflow.clone(),
        force_download: cli.force_download,
        legacy: config.legacy,
    };
    let mirror = Mirror::new(
        client,
        config.mirror_dir()?,
        Ledger::new(config.datestamps_path()?),
        options,
    );
    let summary = mirror.run(&scope)?;
    JsonOutput::print_mirror(&summary).into_diagnostic()?;
    summary.check()?;
    Ok(())
}
