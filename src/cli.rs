use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{ArgAction, Args};
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{ConfigLoader, GdcConfig};
use crate::domain::{DateSelector, Datestamp, program_of};
use crate::error::GdcError;
use crate::ledger::Ledger;
use crate::store;

#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    #[arg(
        long = "config",
        value_name = "FILE",
        num_args = 1..,
        help = "Configuration files, later ones overriding earlier ones",
    )]
    pub config: Vec<String>,

    #[arg(long, help = "Datestamp to operate on (YYYY_MM_DD, or `latest`)")]
    pub date: Option<String>,

    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub cases: Vec<String>,

    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub categories: Vec<String>,

    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub programs: Vec<String>,

    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub projects: Vec<String>,

    #[arg(long)]
    pub workflow: Option<String>,

    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<String>,

    #[arg(
        short = 'V',
        long = "verbose",
        action = ArgAction::Count,
        help = "Increase log verbosity (-V debug, -VV trace)",
    )]
    pub verbose: u8,
}

impl CommonArgs {
    pub fn load_config(&self) -> Result<GdcConfig, GdcError> {
        let mut config = ConfigLoader::load(&self.config)?;
        self.apply(&mut config);
        Ok(config)
    }

    pub fn apply(&self, config: &mut GdcConfig) {
        if !self.cases.is_empty() {
            config.cases = self.cases.clone();
        }
        if !self.categories.is_empty() {
            config.categories = self.categories.clone();
        }
        if !self.programs.is_empty() {
            config.programs = self.programs.clone();
        }
        if !self.projects.is_empty() {
            config.projects = self.projects.clone();
        }
        if let Some(workflow) = &self.workflow {
            config.workflow = Some(workflow.clone());
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = Some(Utf8PathBuf::from(dir));
        }
    }

    pub fn resolve_datestamp(&self, config: &GdcConfig) -> Result<Datestamp, GdcError> {
        let selector = match self.date.as_deref() {
            Some(value) => value.parse()?,
            None => DateSelector::Latest,
        };
        Ledger::new(config.datestamps_path()?).resolve(&selector)
    }
}

/// Sends logs to stderr and, with a log directory, to
/// `<log_dir>/<tool>/<tool>.<datestamp>.log`. `RUST_LOG` overrides the
/// verbosity count.
pub fn init_logging(
    tool: &str,
    log_dir: Option<&Utf8Path>,
    verbose: u8,
    datestamp: &Datestamp,
) -> Result<(), GdcError> {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file_layer = match log_dir {
        Some(dir) => {
            let dir = dir.join(tool);
            fs::create_dir_all(dir.as_std_path()).map_err(|err| GdcError::fs(&dir, err))?;
            let path = dir.join(format!("{tool}.{datestamp}.log"));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path.as_std_path())
                .map_err(|err| GdcError::fs(&path, err))?;
            Some(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    Ok(())
}

pub fn map_exit_code(error: &GdcError) -> u8 {
    match error {
        GdcError::MissingConfigKey(_) => 100,
        _ => 1,
    }
}

pub fn exit_code(report: &miette::Report) -> u8 {
    report
        .downcast_ref::<GdcError>()
        .map(map_exit_code)
        .unwrap_or(1)
}

pub fn local_scope<F>(
    root: &Utf8Path,
    programs: &[String],
    projects: &[String],
    list: F,
) -> Result<BTreeMap<String, Vec<String>>, GdcError>
where
    F: Fn(&str) -> Result<Vec<String>, GdcError>,
{
    let mut scope: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if !projects.is_empty() {
        for project in projects {
            scope
                .entry(program_of(project).to_string())
                .or_default()
                .push(project.clone());
        }
        return Ok(scope);
    }

    let explicit = !programs.is_empty();
    let programs = if explicit {
        programs.to_vec()
    } else {
        store::list_subdirs(root.as_std_path())?
    };
    for program in programs {
        let found = list(&program)?;
        if found.is_empty() {
            if explicit {
                return Err(GdcError::UnknownProgram(program));
            }
            warn!(%program, root = %root, "no projects found, skipping");
            continue;
        }
        scope.insert(program, found);
    }
    Ok(scope)
}
