use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use md5::{Digest, Md5};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::api::{self, Filter, GdcClient, Query};
use crate::domain::{Datestamp, Endpoint, program_of};
use crate::error::GdcError;
use crate::ledger::Ledger;
use crate::lock::StageLock;
use crate::meta::{self, FileDescriptor};
use crate::store::{self, MirrorLayout};

pub const DOWNLOAD_ATTEMPTS: usize = 3;
/// Per-attempt download budget; attempt `n` gets `n` times this.
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 180;

pub const FILE_FIELDS: [&str; 19] = [
    "file_id",
    "file_name",
    "md5sum",
    "file_size",
    "data_category",
    "data_type",
    "data_format",
    "experimental_strategy",
    "platform",
    "tags",
    "center.namespace",
    "analysis.workflow_type",
    "cases.project.project_id",
    "cases.submitter_id",
    "cases.case_id",
    "cases.samples.sample_type",
    "cases.samples.is_ffpe",
    "cases.samples.submitter_id",
    "cases.samples.portions.analytes.aliquots.submitter_id",
];

#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub datestamp: Datestamp,
    pub categories: Vec<String>,
    pub cases: Vec<String>,
    pub workflow: Option<String>,
    pub force_download: bool,
    pub legacy: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectMirrorSummary {
    pub project: String,
    pub files: usize,
    pub downloaded: usize,
    pub reused: usize,
    pub failed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MirrorSummary {
    pub datestamp: Datestamp,
    pub projects: Vec<ProjectMirrorSummary>,
    pub ledger_updated: bool,
}

impl MirrorSummary {
    pub fn check(&self) -> Result<(), GdcError> {
        let failed = self
            .projects
            .iter()
            .filter(|project| project.error.is_some() || !project.failed.is_empty())
            .count();
        if failed > 0 {
            return Err(GdcError::StageFailed {
                stage: "mirror".to_string(),
                failed,
                total: self.projects.len(),
            });
        }
        Ok(())
    }
}

pub fn resolve_scope<C: GdcClient + ?Sized>(
    client: &C,
    programs: &[String],
    projects: &[String],
) -> Result<BTreeMap<String, Vec<String>>, GdcError> {
    let mut scope: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if !projects.is_empty() {
        let mut known: HashMap<String, Vec<String>> = HashMap::new();
        for project in projects {
            let program = program_of(project).to_string();
            if !known.contains_key(&program) {
                let listed = api::get_projects(client, &program)?;
                if listed.is_empty() {
                    return Err(GdcError::UnknownProgram(program));
                }
                known.insert(program.clone(), listed);
            }
            if !known[&program].contains(project) {
                return Err(GdcError::UnknownProject(project.clone()));
            }
            scope.entry(program).or_default().push(project.clone());
        }
    } else {
        let programs = if programs.is_empty() {
            api::get_programs(client)?
        } else {
            programs.to_vec()
        };
        for program in programs {
            let listed = api::get_projects(client, &program)?;
            if listed.is_empty() {
                return Err(GdcError::UnknownProgram(program));
            }
            scope.insert(program, listed);
        }
    }
    for projects in scope.values_mut() {
        projects.sort();
        projects.dedup();
    }
    Ok(scope)
}

pub fn file_query(
    project: &str,
    category: &str,
    cases: &[String],
    workflow: Option<&str>,
) -> Query {
    let mut query = Query::new(Endpoint::Files)
        .fields(FILE_FIELDS)
        .filter(Filter::eq("cases.project.project_id", project))
        .filter(Filter::eq("files.data_category", category))
        .filter(Filter::eq("access", "open"));
    if category == "Biospecimen" || category == "Clinical" {
        query = query
            .filter(Filter::neq("files.data_format", "BCR Biotab"))
            .filter(Filter::neq("files.data_type", "Slide Image"));
    }
    if let Some(workflow) = workflow {
        query = query.filter(Filter::eq("files.analysis.workflow_type", workflow));
    }
    if !cases.is_empty() {
        query = query.filter(Filter::in_list("cases.submitter_id", cases.iter().cloned()));
    }
    query
}

pub struct Mirror<C: GdcClient> {
    client: C,
    layout: MirrorLayout,
    ledger: Ledger,
    options: MirrorOptions,
}

enum Existing {
    Reused,
    Absent,
}

impl<C: GdcClient> Mirror<C> {
    pub fn new(client: C, root: Utf8PathBuf, ledger: Ledger, options: MirrorOptions) -> Self {
        Self {
            client,
            layout: MirrorLayout::new(root),
            ledger,
            options,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn layout(&self) -> &MirrorLayout {
        &self.layout
    }

    pub fn run(&self, scope: &BTreeMap<String, Vec<String>>) -> Result<MirrorSummary, GdcError> {
        let datestamp = &self.options.datestamp;
        let mut projects = Vec::new();
        for (program, program_projects) in scope {
            let _lock = StageLock::acquire(self.layout.program_dir(program).as_std_path(), "mirror")?;
            info!(%program, %datestamp, projects = program_projects.len(), "mirroring program");
            for project in program_projects {
                match self.mirror_project(program, project) {
                    Ok(summary) => {
                        info!(
                            %project,
                            files = summary.files,
                            downloaded = summary.downloaded,
                            reused = summary.reused,
                            failed = summary.failed.len(),
                            "project mirrored"
                        );
                        projects.push(summary);
                    }
                    Err(err) => {
                        error!(%project, error = %err, "project mirror failed");
                        projects.push(ProjectMirrorSummary {
                            project: project.clone(),
                            error: Some(err.to_string()),
                            ..ProjectMirrorSummary::default()
                        });
                    }
                }
            }
        }

        let ledger_updated = if projects.iter().any(|project| project.error.is_none()) {
            self.ledger.append(datestamp)?
        } else {
            false
        };
        if ledger_updated {
            info!(%datestamp, ledger = %self.ledger.path(), "datestamp recorded");
        }
        Ok(MirrorSummary {
            datestamp: datestamp.clone(),
            projects,
            ledger_updated,
        })
    }

    pub fn mirror_project(
        &self,
        program: &str,
        project: &str,
    ) -> Result<ProjectMirrorSummary, GdcError> {
        let options = &self.options;
        let categories = if options.categories.is_empty() {
            api::get_project_categories(&self.client, project)?
        } else {
            options.categories.clone()
        };

        let mut files: Vec<FileDescriptor> = Vec::new();
        let mut seen = HashSet::new();
        for category in &categories {
            let hits = file_query(project, category, &options.cases, options.workflow.as_deref())
                .get(&self.client)?;
            info!(%project, %category, files = hits.len(), "file metadata retrieved");
            for hit in hits {
                let descriptor = parse_descriptor(hit)?;
                if seen.insert(descriptor.file_id.clone()) {
                    files.push(descriptor);
                }
            }
        }

        let prior = self.prior_snapshot(program, project)?;
        let mut summary = ProjectMirrorSummary {
            project: project.to_string(),
            files: files.len(),
            ..ProjectMirrorSummary::default()
        };
        for descriptor in &files {
            let path = self
                .layout
                .file_path(program, project, descriptor, options.legacy)?;
            if !options.force_download {
                let prior_path = match prior.get(&descriptor.file_id) {
                    Some(previous) => Some(self.layout.file_path(
                        program,
                        project,
                        previous,
                        options.legacy,
                    )?),
                    None => None,
                };
                let prior_path = prior_path.as_deref().map(|prior| prior.as_std_path());
                if let Existing::Reused = reuse_existing(descriptor, path.as_std_path(), prior_path)? {
                    summary.reused += 1;
                    continue;
                }
            }
            match self.download(descriptor, path.as_std_path()) {
                Ok(()) => {
                    meta::write_companion(path.as_std_path(), &descriptor.md5sum)?;
                    summary.downloaded += 1;
                }
                Err(err) => {
                    error!(
                        file_id = %descriptor.file_id,
                        file_name = %descriptor.file_name,
                        error = %err,
                        "download failed"
                    );
                    summary.failed.push(descriptor.file_id.clone());
                }
            }
        }

        let metadata_path = self
            .layout
            .metadata_path(program, project, &options.datestamp);
        meta::write_metadata(metadata_path.as_std_path(), &files)?;
        Ok(summary)
    }

    fn prior_snapshot(
        &self,
        program: &str,
        project: &str,
    ) -> Result<HashMap<String, FileDescriptor>, GdcError> {
        let metadata_dir = self.layout.metadata_dir(program, project);
        let Some(previous) = store::latest_metadata_datestamp(
            metadata_dir.as_std_path(),
            None,
            Some(&self.options.datestamp),
        )?
        else {
            return Ok(HashMap::new());
        };
        let path = self.layout.metadata_path(program, project, &previous);
        if !path.as_std_path().exists() {
            return Ok(HashMap::new());
        }
        Ok(meta::load_metadata(path.as_std_path())?
            .into_iter()
            .map(|descriptor| (descriptor.file_id.clone(), descriptor))
            .collect())
    }

    fn download(&self, descriptor: &FileDescriptor, path: &Path) -> Result<(), GdcError> {
        let staging = staging_path(path);
        let mut last_error = String::new();
        for attempt in 1..=DOWNLOAD_ATTEMPTS {
            let timeout = Duration::from_secs(DOWNLOAD_TIMEOUT_SECS * attempt as u64);
            let result = self
                .client
                .download(&descriptor.file_id, &staging, timeout)
                .and_then(|()| verify_md5(&staging, &descriptor.md5sum))
                .and_then(|()| {
                    fs::rename(&staging, path).map_err(|err| GdcError::fs(path.display(), err))
                });
            match result {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if staging.exists() {
                        fs::remove_file(&staging)
                            .map_err(|err| GdcError::fs(staging.display(), err))?;
                    }
                    warn!(
                        file_id = %descriptor.file_id,
                        attempt,
                        error = %err,
                        "download attempt failed"
                    );
                    last_error = err.to_string();
                }
            }
        }
        Err(GdcError::DownloadFailed {
            file_id: descriptor.file_id.clone(),
            attempts: DOWNLOAD_ATTEMPTS,
            message: last_error,
        })
    }
}

// The payload is only replaced by rename after its MD5 checks out.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.partial"))
}

fn parse_descriptor(hit: Value) -> Result<FileDescriptor, GdcError> {
    serde_json::from_value(hit).map_err(|err| GdcError::Metadata(err.to_string()))
}

/// Looks for an unchanged copy at the current path, then at the prior
/// snapshot's path. A companion recording a different hash is fatal.
fn reuse_existing(
    descriptor: &FileDescriptor,
    path: &Path,
    prior_path: Option<&Path>,
) -> Result<Existing, GdcError> {
    let candidates = std::iter::once(path).chain(prior_path.filter(|prior| *prior != path));
    for candidate in candidates {
        if !candidate.exists() {
            continue;
        }
        let basename = candidate.file_name().and_then(|name| name.to_str()).unwrap_or("");
        let Some((recorded, name)) = meta::read_companion(candidate) else {
            continue;
        };
        if name != basename {
            continue;
        }
        if !recorded.eq_ignore_ascii_case(&descriptor.md5sum) {
            return Err(GdcError::HashMismatch {
                file: candidate.display().to_string(),
                recorded,
                expected: descriptor.md5sum.clone(),
            });
        }
        if candidate != path {
            store::link_or_copy(candidate, path)?;
            meta::write_companion(path, &descriptor.md5sum)?;
        }
        return Ok(Existing::Reused);
    }
    Ok(Existing::Absent)
}

fn verify_md5(path: &Path, expected: &str) -> Result<(), GdcError> {
    if expected.is_empty() {
        return Ok(());
    }
    let actual = file_md5(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(GdcError::HashMismatch {
            file: path.display().to_string(),
            recorded: actual,
            expected: expected.to_string(),
        })
    }
}

pub fn file_md5(path: &Path) -> Result<String, GdcError> {
    let mut file = File::open(path).map_err(|err| GdcError::fs(path.display(), err))?;
    let mut hasher = Md5::new();
    io::copy(&mut file, &mut hasher).map_err(|err| GdcError::fs(path.display(), err))?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clinical_queries_exclude_biotab_and_slides() {
        let params = file_query("TCGA-ACC", "Clinical", &[], None).params(1);
        let filters = params
            .iter()
            .find(|(key, _)| key == "filters")
            .map(|(_, value)| value.clone())
            .unwrap();
        assert!(filters.contains("BCR Biotab"));
        assert!(filters.contains("Slide Image"));

        let params = file_query("TCGA-ACC", "Copy Number Variation", &[], Some("DNAcopy")).params(1);
        let filters = &params.iter().find(|(key, _)| key == "filters").unwrap().1;
        assert!(!filters.contains("BCR Biotab"));
        assert!(filters.contains("files.analysis.workflow_type"));
    }

    #[test]
    fn md5_of_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("hello.txt");
        fs::write(&path, b"hello").unwrap();
        assert_eq!(file_md5(&path).unwrap(), "5d41402abc4b2a76b9719d911017c592");
        assert!(verify_md5(&path, "5D41402ABC4B2A76B9719D911017C592").is_ok());
        assert!(verify_md5(&path, "0000").is_err());
    }
}
