use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;

use gdctools::api::{ApiContext, DEFAULT_PAGE_SIZE, Filter, GdcHttpClient, Query};
use gdctools::cli::{self, CommonArgs};
use gdctools::domain::{Datestamp, Endpoint};
use gdctools::output::JsonOutput;

#[derive(Parser)]
#[command(name = "gdc-list")]
#[command(about = "Query a GDC endpoint and print the results")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(help = "Endpoint to query")]
    feature: Endpoint,

    #[arg(help = "Equality filters, KEY=VALUE")]
    filters: Vec<String>,

    #[arg(short = 'n', long = "num", help = "Print at most this many results")]
    num: Option<usize>,

    #[arg(short = 's', long = "size", default_value_t = DEFAULT_PAGE_SIZE, help = "Page size")]
    size: usize,

    #[arg(short = 'r', long, help = "Print full JSON hits instead of identifiers")]
    raw: bool,

    #[arg(long, help = "Query the legacy archive")]
    legacy: bool,
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
    let config = cli.common.load_config()?;
    cli::init_logging(
        "gdc-list",
        config.log_dir.as_deref(),
        cli.common.verbose,
        &Datestamp::today(),
    )?;

    let mut query = Query::new(cli.feature).size(cli.size);
    for filter in &cli.filters {
        let Some((key, value)) = filter.split_once('=') else {
            miette::bail!("filter must be KEY=VALUE: {filter}");
        };
        query = query.filter(Filter::eq(key.trim(), value.trim()));
    }
    if !cli.common.projects.is_empty() {
        let field = match cli.feature {
            Endpoint::Projects => "project_id",
            Endpoint::Cases => "project.project_id",
            _ => "cases.project.project_id",
        };
        query = query.filter(Filter::in_list(field, cli.common.projects.iter().cloned()));
    }

    let legacy = cli.legacy || config.legacy;
    let client = GdcHttpClient::new(ApiContext::new(legacy))?;
    let mut hits = query.get(&client)?;
    if let Some(limit) = cli.num {
        hits.truncate(limit);
    }
    if cli.raw {
        JsonOutput::print_hits(&hits).into_diagnostic()?;
    } else {
        JsonOutput::print_ids(&hits, cli.feature.sort_key()).into_diagnostic()?;
    }
    Ok(())
}
