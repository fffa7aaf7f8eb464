use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::Path;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::annotations::{
    self, Annotation, AnnotationTable, REPORT_DATA_TYPES, UNRECOGNIZED,
};
use crate::convert::Target;
use crate::domain::{Datestamp, FFPE_ABBREV, SampleType, main_tumor_sample_type};
use crate::error::GdcError;
use crate::lock::StageLock;
use crate::meta::{self, FileDescriptor};
use crate::store::{AtomicWriter, DiceLayout, MirrorLayout};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DicedRow {
    pub case_id: String,
    pub tcga_barcode: String,
    pub sample_type: String,
    pub annotation: String,
    pub file_name: String,
    pub center: String,
    pub platform: String,
    pub report_type: String,
    pub is_ffpe: String,
}

impl DicedRow {
    pub fn is_case_level(&self) -> bool {
        self.sample_type.is_empty()
    }

    pub fn ffpe(&self) -> bool {
        self.is_ffpe.eq_ignore_ascii_case("true")
    }
}

#[derive(Debug, Clone)]
pub struct DiceOptions {
    pub datestamp: Datestamp,
    pub cases: Vec<String>,
    pub categories: Vec<String>,
    pub force: bool,
    pub dry_run: bool,
    pub legacy: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectDiceSummary {
    pub project: String,
    pub files: usize,
    pub diced: usize,
    pub skipped: usize,
    pub unrecognized: usize,
    pub failed: usize,
    pub rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiceSummary {
    pub program: String,
    pub datestamp: Datestamp,
    pub dry_run: bool,
    pub projects: Vec<ProjectDiceSummary>,
    pub aggregates: Vec<String>,
}

impl DiceSummary {
    pub fn check(&self) -> Result<(), GdcError> {
        let failed = self
            .projects
            .iter()
            .filter(|project| project.error.is_some() || project.failed > 0)
            .count();
        if failed > 0 {
            return Err(GdcError::StageFailed {
                stage: "dice".to_string(),
                failed,
                total: self.projects.len(),
            });
        }
        Ok(())
    }
}

pub struct Dice {
    mirror: MirrorLayout,
    dice: DiceLayout,
    table: AnnotationTable,
    aggregates: BTreeMap<String, Vec<String>>,
    options: DiceOptions,
}

impl Dice {
    pub fn new(
        mirror_root: Utf8PathBuf,
        dice_root: Utf8PathBuf,
        table: AnnotationTable,
        options: DiceOptions,
    ) -> Self {
        Self {
            mirror: MirrorLayout::new(mirror_root),
            dice: DiceLayout::new(dice_root),
            table,
            aggregates: BTreeMap::new(),
            options,
        }
    }

    pub fn with_aggregates(mut self, aggregates: BTreeMap<String, Vec<String>>) -> Self {
        self.aggregates = aggregates;
        self
    }

    pub fn layout(&self) -> &DiceLayout {
        &self.dice
    }

    pub fn run(&self, program: &str, projects: &[String]) -> Result<DiceSummary, GdcError> {
        let options = &self.options;
        let _mirror_lock =
            StageLock::acquire(self.mirror.program_dir(program).as_std_path(), "mirror")?;
        let _dice_lock = StageLock::acquire(self.dice.program_dir(program).as_std_path(), "dice")?;

        let mut projects: Vec<String> = projects.to_vec();
        projects.sort();
        projects.dedup();
        info!(
            %program,
            datestamp = %options.datestamp,
            projects = projects.len(),
            dry_run = options.dry_run,
            "dicing program"
        );

        let mut summaries = Vec::new();
        for project in &projects {
            let summary = match self.dice_project(program, project) {
                Ok(summary) => {
                    info!(
                        %project,
                        diced = summary.diced,
                        skipped = summary.skipped,
                        unrecognized = summary.unrecognized,
                        failed = summary.failed,
                        "project diced"
                    );
                    summary
                }
                Err(err) => {
                    error!(%project, error = %err, "project dice failed");
                    ProjectDiceSummary {
                        project: project.clone(),
                        error: Some(err.to_string()),
                        ..ProjectDiceSummary::default()
                    }
                }
            };
            summaries.push(summary);
        }

        let mut aggregates = Vec::new();
        if !options.dry_run {
            for (name, members) in &self.aggregates {
                if self.dice_aggregate(program, name, members)? {
                    aggregates.push(name.clone());
                }
            }
        }

        Ok(DiceSummary {
            program: program.to_string(),
            datestamp: options.datestamp.clone(),
            dry_run: options.dry_run,
            projects: summaries,
            aggregates,
        })
    }

    pub fn dice_project(&self, program: &str, project: &str) -> Result<ProjectDiceSummary, GdcError> {
        let options = &self.options;
        let metadata_path = self
            .mirror
            .metadata_path(program, project, &options.datestamp);
        if !metadata_path.as_std_path().exists() {
            return Err(GdcError::MissingDatestamp {
                datestamp: options.datestamp.to_string(),
                reason: format!("no mirror metadata for {project} at {metadata_path}"),
            });
        }
        let files = meta::load_metadata(metadata_path.as_std_path())?;

        let mut summary = ProjectDiceSummary {
            project: project.to_string(),
            ..ProjectDiceSummary::default()
        };
        let mut rows = Vec::new();
        for descriptor in &files {
            if !self.selected(descriptor) {
                continue;
            }
            summary.files += 1;
            let Some(annotation) = self.table.lookup(descriptor) else {
                warn!(
                    annotation = UNRECOGNIZED,
                    file_id = %descriptor.file_id,
                    file_name = %descriptor.file_name,
                    data_category = descriptor.data_category(),
                    data_type = descriptor.data_type(),
                    "unrecognized file class, skipping"
                );
                summary.unrecognized += 1;
                continue;
            };
            let mirror_path = self
                .mirror
                .file_path(program, project, descriptor, options.legacy)?;
            if !mirror_path.as_std_path().exists() {
                return Err(GdcError::MissingMirrorFile(mirror_path.into_std_path_buf()));
            }

            match self.dice_file(program, project, descriptor, annotation, mirror_path.as_std_path()) {
                Ok(diced) => {
                    if diced.converted {
                        summary.diced += 1;
                    } else {
                        summary.skipped += 1;
                    }
                    rows.extend(diced.rows);
                }
                Err(err) => {
                    error!(
                        file_id = %descriptor.file_id,
                        file_name = %descriptor.file_name,
                        annotation = %annotation.name,
                        error = %err,
                        "failed to dice file, skipping"
                    );
                    summary.failed += 1;
                }
            }
        }
        summary.rows = rows.len();

        if !options.dry_run {
            let main = main_tumor_sample_type(project);
            self.write_outputs(program, project, &rows, main)?;
        }
        Ok(summary)
    }

    fn selected(&self, descriptor: &FileDescriptor) -> bool {
        let options = &self.options;
        if !options.categories.is_empty()
            && !options
                .categories
                .iter()
                .any(|category| category == descriptor.data_category())
        {
            return false;
        }
        if !options.cases.is_empty()
            && !descriptor
                .cases
                .iter()
                .any(|case| options.cases.contains(&case.submitter_id))
        {
            return false;
        }
        true
    }

    fn dice_file(
        &self,
        program: &str,
        project: &str,
        descriptor: &FileDescriptor,
        annotation: &Annotation,
        mirror_path: &Path,
    ) -> Result<DicedFile, GdcError> {
        let extension = annotations::conventional_extension(descriptor);
        let specimens = self.specimens(descriptor, annotation)?;
        let targets: Vec<Target> = specimens
            .iter()
            .map(|specimen| Target {
                barcode: specimen.barcode.clone(),
                path: self
                    .dice
                    .diced_path(
                        program,
                        project,
                        &annotation.name,
                        &specimen.barcode,
                        &descriptor.file_id,
                        extension,
                    )
                    .into_std_path_buf(),
            })
            .collect();

        let present = targets.iter().all(|target| target.path.exists());
        let converted = if self.options.dry_run {
            debug!(file_id = %descriptor.file_id, outputs = targets.len(), "would dice");
            !present
        } else if present && !self.options.force {
            debug!(file_id = %descriptor.file_id, "diced outputs present, skipping");
            false
        } else {
            let produced = annotation.converter.run(mirror_path, &targets)?;
            if produced.len() != targets.len() {
                return Err(GdcError::Conversion(format!(
                    "{} produced {} of {} outputs",
                    annotation.converter,
                    produced.len(),
                    targets.len()
                )));
            }
            true
        };

        let report_type = annotations::report_type(&annotation.name);
        let rows = specimens
            .into_iter()
            .zip(targets)
            .map(|(specimen, target)| DicedRow {
                case_id: specimen.case_id,
                tcga_barcode: specimen.barcode,
                sample_type: specimen.sample_type,
                annotation: annotation.name.clone(),
                file_name: target.path.display().to_string(),
                center: descriptor.center_namespace().to_string(),
                platform: descriptor.platform().to_string(),
                report_type: report_type.to_string(),
                is_ffpe: if specimen.is_ffpe { "True" } else { "False" }.to_string(),
            })
            .collect();
        Ok(DicedFile { converted, rows })
    }

    fn specimens(
        &self,
        descriptor: &FileDescriptor,
        annotation: &Annotation,
    ) -> Result<Vec<Specimen>, GdcError> {
        if descriptor.has_multiple_samples() {
            if !annotation.converter.splits_samples() {
                return Err(GdcError::Conversion(format!(
                    "file {} spans several samples but {} cannot split it",
                    descriptor.file_id, annotation.converter
                )));
            }
            let mut specimens = Vec::new();
            for case in &descriptor.cases {
                for sample in &case.samples {
                    for info in sample.aliquot_infos() {
                        if info.sample_type.contains("Normal") {
                            continue;
                        }
                        specimens.push(Specimen {
                            case_id: case.submitter_id.clone(),
                            barcode: info.aliquot_id,
                            sample_type: sample_type_abbrev(&info.sample_type),
                            is_ffpe: info.is_ffpe,
                        });
                    }
                }
            }
            return Ok(specimens);
        }

        let case_id = descriptor.case_id()?.to_string();
        Ok(match descriptor.single_aliquot()? {
            Some(info) => vec![Specimen {
                case_id,
                barcode: info.aliquot_id,
                sample_type: sample_type_abbrev(&info.sample_type),
                is_ffpe: info.is_ffpe,
            }],
            None => vec![Specimen {
                barcode: case_id.clone(),
                case_id,
                sample_type: String::new(),
                is_ffpe: false,
            }],
        })
    }

    fn write_outputs(
        &self,
        program: &str,
        project: &str,
        rows: &[DicedRow],
        main: SampleType,
    ) -> Result<(), GdcError> {
        let datestamp = &self.options.datestamp;
        let metadata_path = self.dice.diced_metadata_path(program, project, datestamp);
        write_diced_metadata(metadata_path.as_std_path(), rows)?;
        let counts_path = self.dice.sample_counts_path(program, project, datestamp);
        write_sample_counts(counts_path.as_std_path(), rows, main)?;
        info!(%project, path = %metadata_path, rows = rows.len(), "diced metadata written");
        Ok(())
    }

    fn dice_aggregate(
        &self,
        program: &str,
        name: &str,
        members: &[String],
    ) -> Result<bool, GdcError> {
        let datestamp = &self.options.datestamp;
        let mut rows = Vec::new();
        for member in members {
            let path = self.dice.diced_metadata_path(program, member, datestamp);
            if !path.as_std_path().exists() {
                warn!(
                    aggregate = name,
                    %member,
                    %datestamp,
                    "aggregate member not diced at this datestamp, skipping aggregate"
                );
                return Ok(false);
            }
            rows.extend(read_diced_metadata(path.as_std_path())?);
        }
        let main = members
            .first()
            .map(|member| main_tumor_sample_type(member))
            .unwrap_or_else(|| main_tumor_sample_type(name));
        self.write_outputs(program, name, &rows, main)?;
        Ok(true)
    }
}

#[derive(Debug)]
struct Specimen {
    case_id: String,
    barcode: String,
    sample_type: String,
    is_ffpe: bool,
}

#[derive(Debug)]
struct DicedFile {
    converted: bool,
    rows: Vec<DicedRow>,
}

fn sample_type_abbrev(label: &str) -> String {
    match SampleType::from_label(label) {
        Some(sample_type) => sample_type.abbrev.to_string(),
        None => {
            warn!(sample_type = label, "unknown sample type label");
            label.split_whitespace().collect::<Vec<_>>().join("_")
        }
    }
}

pub fn write_diced_metadata(path: &Path, rows: &[DicedRow]) -> Result<(), GdcError> {
    let writer = AtomicWriter::create(path)?;
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(writer);
    if rows.is_empty() {
        csv_writer
            .write_record(DICED_METADATA_COLUMNS)
            .map_err(|err| GdcError::fs(path.display(), err))?;
    }
    for row in rows {
        csv_writer
            .serialize(row)
            .map_err(|err| GdcError::fs(path.display(), err))?;
    }
    let writer = csv_writer
        .into_inner()
        .map_err(|err| GdcError::fs(path.display(), err.error()))?;
    writer.commit()
}

pub const DICED_METADATA_COLUMNS: [&str; 9] = [
    "case_id",
    "tcga_barcode",
    "sample_type",
    "annotation",
    "file_name",
    "center",
    "platform",
    "report_type",
    "is_ffpe",
];

pub fn read_diced_metadata(path: &Path) -> Result<Vec<DicedRow>, GdcError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .from_path(path)
        .map_err(|err| GdcError::fs(path.display(), err))?;
    reader
        .deserialize()
        .map(|record| record.map_err(|err| GdcError::Metadata(format!("{}: {err}", path.display()))))
        .collect()
}

/// Distinct cases per sample type and report column. Case-level rows count
/// under `main`; FFPE rows under their own bucket.
pub fn sample_counts(
    rows: &[DicedRow],
    main: SampleType,
) -> BTreeMap<String, BTreeMap<&'static str, usize>> {
    let mut cases: HashMap<(String, &'static str), BTreeSet<&str>> = HashMap::new();
    for row in rows {
        let Some(column) = REPORT_DATA_TYPES
            .iter()
            .copied()
            .find(|column| *column == row.report_type)
        else {
            continue;
        };
        let bucket = if row.ffpe() {
            FFPE_ABBREV.to_string()
        } else if row.is_case_level() {
            main.abbrev.to_string()
        } else {
            row.sample_type.clone()
        };
        cases
            .entry((bucket, column))
            .or_default()
            .insert(row.case_id.as_str());
    }

    let mut counts: BTreeMap<String, BTreeMap<&'static str, usize>> = BTreeMap::new();
    for ((bucket, column), ids) in cases {
        counts.entry(bucket).or_default().insert(column, ids.len());
    }
    counts
}

pub fn write_sample_counts(path: &Path, rows: &[DicedRow], main: SampleType) -> Result<(), GdcError> {
    let counts = sample_counts(rows, main);
    let mut writer = AtomicWriter::create(path)?;
    let io = |err: std::io::Error| GdcError::fs(path.display(), err);
    writeln!(writer, "Sample Type\t{}", REPORT_DATA_TYPES.join("\t")).map_err(io)?;

    let line = |label: &str, bucket: Option<&BTreeMap<&'static str, usize>>| {
        let cells: Vec<String> = REPORT_DATA_TYPES
            .iter()
            .map(|column| {
                bucket
                    .and_then(|values| values.get(column))
                    .copied()
                    .unwrap_or(0)
                    .to_string()
            })
            .collect();
        format!("{label}\t{}", cells.join("\t"))
    };

    let mut labels: Vec<&str> = SampleType::all()
        .iter()
        .map(|sample_type| sample_type.abbrev)
        .collect();
    labels.push(FFPE_ABBREV);
    for label in &labels {
        if let Some(bucket) = counts.get(*label) {
            writeln!(writer, "{}", line(label, Some(bucket))).map_err(io)?;
        }
    }
    for (label, bucket) in &counts {
        if !labels.contains(&label.as_str()) {
            writeln!(writer, "{}", line(label, Some(bucket))).map_err(io)?;
        }
    }
    writeln!(writer, "{}", line("Totals", counts.get(main.abbrev))).map_err(io)?;
    writer.commit()
}
