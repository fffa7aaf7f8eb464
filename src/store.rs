use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;

use crate::domain::Datestamp;
use crate::error::GdcError;
use crate::meta::{self, FileDescriptor};

#[derive(Debug, Clone)]
pub struct MirrorLayout {
    root: Utf8PathBuf,
}

impl MirrorLayout {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn program_dir(&self, program: &str) -> Utf8PathBuf {
        self.root.join(program)
    }

    pub fn project_dir(&self, program: &str, project: &str) -> Utf8PathBuf {
        self.program_dir(program).join(project)
    }

    pub fn file_path(
        &self,
        program: &str,
        project: &str,
        descriptor: &FileDescriptor,
        legacy: bool,
    ) -> Result<Utf8PathBuf, GdcError> {
        let basename = meta::file_basename(descriptor, legacy)?;
        Ok(self
            .project_dir(program, project)
            .join(path_component(descriptor.data_category()))
            .join(path_component(descriptor.data_type()))
            .join(basename))
    }

    pub fn metadata_dir(&self, program: &str, project: &str) -> Utf8PathBuf {
        self.project_dir(program, project).join("metadata")
    }

    pub fn metadata_path(&self, program: &str, project: &str, datestamp: &Datestamp) -> Utf8PathBuf {
        self.metadata_dir(program, project)
            .join(datestamp.as_str())
            .join(format!("metadata.{project}.{datestamp}.json"))
    }

    pub fn projects(&self, program: &str) -> Result<Vec<String>, GdcError> {
        Ok(list_subdirs(self.program_dir(program).as_std_path())?
            .into_iter()
            .filter(|project| self.metadata_dir(program, project).as_std_path().is_dir())
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct DiceLayout {
    root: Utf8PathBuf,
}

impl DiceLayout {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn program_dir(&self, program: &str) -> Utf8PathBuf {
        self.root.join(program)
    }

    pub fn project_dir(&self, program: &str, project: &str) -> Utf8PathBuf {
        self.program_dir(program).join(project)
    }

    pub fn diced_path(
        &self,
        program: &str,
        project: &str,
        annotation: &str,
        barcode: &str,
        file_id: &str,
        extension: &str,
    ) -> Utf8PathBuf {
        self.project_dir(program, project)
            .join(annotation)
            .join(format!("{barcode}.{file_id}.{extension}"))
    }

    pub fn metadata_dir(&self, program: &str, project: &str) -> Utf8PathBuf {
        self.project_dir(program, project).join("metadata")
    }

    pub fn diced_metadata_path(
        &self,
        program: &str,
        project: &str,
        datestamp: &Datestamp,
    ) -> Utf8PathBuf {
        self.metadata_dir(program, project)
            .join(datestamp.as_str())
            .join(format!("{project}.{datestamp}.diced_metadata.tsv"))
    }

    pub fn sample_counts_path(
        &self,
        program: &str,
        project: &str,
        datestamp: &Datestamp,
    ) -> Utf8PathBuf {
        self.metadata_dir(program, project)
            .join(datestamp.as_str())
            .join(format!("{project}.{datestamp}.sample_counts.tsv"))
    }

    pub fn projects(&self, program: &str) -> Result<Vec<String>, GdcError> {
        Ok(list_subdirs(self.program_dir(program).as_std_path())?
            .into_iter()
            .filter(|project| self.metadata_dir(program, project).as_std_path().is_dir())
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct LoadfileLayout {
    root: Utf8PathBuf,
}

impl LoadfileLayout {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn output_dir(&self, program: &str, datestamp: &Datestamp) -> Utf8PathBuf {
        self.root.join(program).join(datestamp.as_str())
    }

    pub fn samples_path(&self, program: &str, cohort: &str, datestamp: &Datestamp) -> Utf8PathBuf {
        self.cohort_file(program, cohort, datestamp, "Sample.loadfile.txt")
    }

    pub fn sample_set_path(
        &self,
        program: &str,
        cohort: &str,
        datestamp: &Datestamp,
    ) -> Utf8PathBuf {
        self.cohort_file(program, cohort, datestamp, "Sample_Set.loadfile.txt")
    }

    pub fn cases_path(&self, program: &str, cohort: &str, datestamp: &Datestamp) -> Utf8PathBuf {
        self.cohort_file(program, cohort, datestamp, "Participant.loadfile.txt")
    }

    pub fn filtered_path(&self, program: &str, cohort: &str, datestamp: &Datestamp) -> Utf8PathBuf {
        self.cohort_file(program, cohort, datestamp, "filtered_samples.txt")
    }

    fn cohort_file(
        &self,
        program: &str,
        cohort: &str,
        datestamp: &Datestamp,
        kind: &str,
    ) -> Utf8PathBuf {
        self.output_dir(program, datestamp)
            .join(format!("{cohort}.{datestamp}.{kind}"))
    }
}

pub fn path_component(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|ch| match ch {
            ' ' | '/' | '\\' => '_',
            other => other,
        })
        .collect();
    if cleaned.is_empty() {
        "Unknown".to_string()
    } else {
        cleaned
    }
}

/// Buffered writer into a temp file next to `dest`; nothing appears at `dest`
/// until `commit`.
pub struct AtomicWriter {
    inner: BufWriter<NamedTempFile>,
    dest: PathBuf,
}

impl AtomicWriter {
    pub fn create(dest: &Path) -> Result<Self, GdcError> {
        let parent = dest
            .parent()
            .ok_or_else(|| GdcError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| GdcError::fs(parent.display(), err))?;
        let temp = tempfile::Builder::new()
            .prefix(".gdc-write")
            .tempfile_in(parent)
            .map_err(|err| GdcError::fs(parent.display(), err))?;
        Ok(Self {
            inner: BufWriter::new(temp),
            dest: dest.to_path_buf(),
        })
    }

    pub fn commit(self) -> Result<(), GdcError> {
        let dest = self.dest;
        let temp = self
            .inner
            .into_inner()
            .map_err(|err| GdcError::fs(dest.display(), err.error()))?;
        temp.persist(&dest)
            .map_err(|err| GdcError::fs(dest.display(), err))?;
        Ok(())
    }
}

impl Write for AtomicWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), GdcError> {
    let mut writer = AtomicWriter::create(path)?;
    writer
        .write_all(content)
        .map_err(|err| GdcError::fs(path.display(), err))?;
    writer.commit()
}

pub fn link_or_copy(source: &Path, dest: &Path) -> Result<(), GdcError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|err| GdcError::fs(parent.display(), err))?;
    }
    if dest.exists() {
        fs::remove_file(dest).map_err(|err| GdcError::fs(dest.display(), err))?;
    }
    match fs::hard_link(source, dest) {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::debug!(
                source = %source.display(),
                error = %err,
                "hardlink failed, copying"
            );
            let mut writer = AtomicWriter::create(dest)?;
            let mut reader =
                fs::File::open(source).map_err(|err| GdcError::fs(source.display(), err))?;
            io::copy(&mut reader, &mut writer).map_err(|err| GdcError::fs(dest.display(), err))?;
            writer.commit()
        }
    }
}

pub fn list_subdirs(dir: &Path) -> Result<Vec<String>, GdcError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    let entries = fs::read_dir(dir).map_err(|err| GdcError::fs(dir.display(), err))?;
    for entry in entries {
        let entry = entry.map_err(|err| GdcError::fs(dir.display(), err))?;
        if entry.path().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Most recent datestamp directory under `metadata_dir` that is at most
/// `upto` and is not `exclude`.
pub fn latest_metadata_datestamp(
    metadata_dir: &Path,
    upto: Option<&Datestamp>,
    exclude: Option<&Datestamp>,
) -> Result<Option<Datestamp>, GdcError> {
    Ok(list_subdirs(metadata_dir)?
        .into_iter()
        .filter_map(|name| name.parse::<Datestamp>().ok())
        .filter(|stamp| upto.is_none_or(|limit| stamp <= limit))
        .filter(|stamp| exclude != Some(stamp))
        .max())
}
