use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;

use gdctools::annotations::AnnotationTable;
use gdctools::cli::{self, CommonArgs};
use gdctools::dice::{Dice, DiceOptions};
use gdctools::output::JsonOutput;
use gdctools::store::MirrorLayout;

#[derive(Parser)]
#[command(name = "gdc-dice")]
#[command(about = "Convert mirrored GDC files into per-sample diced files")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(short = 'd', long = "dice-dir", value_name = "DIR", help = "Root of the diced tree")]
    dice_dir: Option<String>,

    #[arg(short = 'm', long = "mirror-dir", value_name = "DIR", help = "Root of the local mirror")]
    mirror_dir: Option<String>,

    #[arg(long, help = "Classify files and report what would be produced, writing no diced files")]
    dry_run: bool,

    #[arg(short = 'f', long, help = "Regenerate diced files that already exist")]
    force: bool,
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
    if let Some(dir) = &cli.mirror_dir {
        config.mirror_dir = Some(Utf8PathBuf::from(dir));
    }
    let datestamp = cli.common.resolve_datestamp(&config)?;
    cli::init_logging(
        "gdc-dice",
        config.log_dir.as_deref(),
        cli.common.verbose,
        &datestamp,
    )?;

    let table = match &config.annotations {
        Some(path) => AnnotationTable::load(path.as_std_path())?,
        None => AnnotationTable::builtin()?,
    };
    let mirror_root = config.mirror_dir()?;
    let dice_root = config.dice_dir()?;
    let mirror_layout = MirrorLayout::new(mirror_root.clone());
    let scope = cli::local_scope(
        &mirror_root,
        &config.programs,
        &config.projects,
        |program| mirror_layout.projects(program),
    )?;

    let mut summaries = Vec::new();
    for (program, projects) in &scope {
        let options = DiceOptions {
            datestamp: datestamp.clone(),
            cases: config.cases.clone(),
            categories: config.categories.clone(),
            force: cli.force,
            dry_run: cli.dry_run,
            legacy: config.legacy,
        };
        let dice = Dice::new(mirror_root.clone(), dice_root.clone(), table.clone(), options)
            .with_aggregates(config.aggregates_for(program));
        let summary = dice.run(program, projects)?;
        JsonOutput::print_dice(&summary).into_diagnostic()?;
        summaries.push(summary);
    }
    for summary in &summaries {
        summary.check()?;
    }
    Ok(())
}
