use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::barcode;
use crate::dice::{self, DicedRow};
use crate::domain::{Datestamp, FFPE_ABBREV, LoadfileFormat, cohort_suffix, main_tumor_sample_type};
use crate::error::GdcError;
use crate::store::{self, AtomicWriter, DiceLayout, LoadfileLayout};

pub const REPLICATE_FILTER: &str = "Analyte Replicate Filter";
pub const BLACKLIST_FILTER: &str = "Blacklisted";

#[derive(Debug, Clone)]
pub struct LoadfileOptions {
    pub datestamp: Datestamp,
    pub format: LoadfileFormat,
    pub file_prefix: Option<String>,
    pub missing_file_value: String,
    pub blacklist: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilteredRow {
    pub participant_id: String,
    pub cohort: String,
    pub annotation: String,
    pub reason: String,
    pub removed: String,
    pub chosen: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRecord {
    pub sample_id: String,
    pub case_id: String,
    pub sample_type: String,
    pub ffpe: bool,
    pub set_cohort: String,
    pub program_sample_id: String,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct CohortTable {
    pub samples: BTreeMap<String, SampleRecord>,
    pub annotations: BTreeSet<String>,
    pub filtered: Vec<FilteredRow>,
}

impl CohortTable {
    pub fn merge(&mut self, other: &CohortTable) {
        for (sample_id, record) in &other.samples {
            self.samples
                .entry(sample_id.clone())
                .or_insert_with(|| record.clone());
        }
        self.annotations.extend(other.annotations.iter().cloned());
        self.filtered.extend(other.filtered.iter().cloned());
    }

    pub fn case_ids(&self) -> BTreeSet<&str> {
        self.samples
            .values()
            .map(|record| record.case_id.as_str())
            .collect()
    }
}

#[derive(Debug, Default)]
struct SampleCandidates {
    record: SampleRecord,
    candidates: BTreeMap<String, Vec<(String, String)>>,
}

pub fn build_cohort_table(
    program: &str,
    project: &str,
    rows: &[DicedRow],
    format: LoadfileFormat,
    blacklist: &[String],
) -> CohortTable {
    let cohort = format.cohort_name(program, project);
    let mut table = CohortTable::default();
    let mut samples: BTreeMap<String, SampleCandidates> = BTreeMap::new();
    let mut case_level: BTreeMap<&str, Vec<&DicedRow>> = BTreeMap::new();

    for row in rows {
        if blacklist
            .iter()
            .any(|entry| row.tcga_barcode.starts_with(entry.as_str()))
        {
            table.filtered.push(FilteredRow {
                participant_id: row.case_id.clone(),
                cohort: cohort.clone(),
                annotation: row.annotation.clone(),
                reason: BLACKLIST_FILTER.to_string(),
                removed: row.tcga_barcode.clone(),
                chosen: String::new(),
            });
            continue;
        }
        table.annotations.insert(row.annotation.clone());
        if row.is_case_level() {
            case_level.entry(row.case_id.as_str()).or_default().push(row);
            continue;
        }
        let (cohort_label, abbrev) = if row.ffpe() {
            (format!("{cohort}{FFPE_ABBREV}"), FFPE_ABBREV.to_string())
        } else {
            (cohort.clone(), row.sample_type.clone())
        };
        let sample = samples
            .entry(sample_id(&cohort_label, program, &row.case_id, &abbrev))
            .or_insert_with_key(|sample_id| SampleCandidates {
                record: SampleRecord {
                    sample_id: sample_id.clone(),
                    case_id: row.case_id.clone(),
                    sample_type: abbrev.clone(),
                    ffpe: row.ffpe(),
                    set_cohort: cohort.clone(),
                    ..SampleRecord::default()
                },
                ..SampleCandidates::default()
            });
        sample
            .candidates
            .entry(row.annotation.clone())
            .or_default()
            .push((row.tcga_barcode.clone(), row.file_name.clone()));
    }

    let main = main_tumor_sample_type(project);
    for (case_id, files) in case_level {
        let has_samples = samples.values().any(|sample| sample.record.case_id == case_id);
        if !has_samples {
            let pseudo = sample_id(&cohort, program, case_id, main.abbrev);
            samples.insert(
                pseudo.clone(),
                SampleCandidates {
                    record: SampleRecord {
                        sample_id: pseudo,
                        case_id: case_id.to_string(),
                        sample_type: main.abbrev.to_string(),
                        set_cohort: cohort.clone(),
                        ..SampleRecord::default()
                    },
                    ..SampleCandidates::default()
                },
            );
        }
        for sample in samples
            .values_mut()
            .filter(|sample| sample.record.case_id == case_id)
        {
            for file in &files {
                sample
                    .candidates
                    .entry(file.annotation.clone())
                    .or_default()
                    .push((file.tcga_barcode.clone(), file.file_name.clone()));
            }
        }
    }

    for (sample_id, sample) in samples {
        let SampleCandidates {
            mut record,
            candidates,
        } = sample;
        for (annotation, options) in candidates {
            let Some((chosen, path)) = barcode::choose_replicate(&options).cloned() else {
                continue;
            };
            if options.len() > 1 {
                for (removed, removed_path) in &options {
                    if removed == &chosen && removed_path == &path {
                        continue;
                    }
                    info!(
                        sample = %sample_id,
                        %annotation,
                        %removed,
                        %chosen,
                        "replicate filtered"
                    );
                    table.filtered.push(FilteredRow {
                        participant_id: record.case_id.clone(),
                        cohort: cohort.clone(),
                        annotation: annotation.clone(),
                        reason: REPLICATE_FILTER.to_string(),
                        removed: removed.clone(),
                        chosen: chosen.clone(),
                    });
                }
            }
            if record.program_sample_id.is_empty() && chosen != record.case_id {
                record.program_sample_id = chosen.split('-').take(4).collect::<Vec<_>>().join("-");
            }
            record.attributes.insert(annotation, path);
        }
        if record.program_sample_id.is_empty() {
            record.program_sample_id = record.case_id.clone();
        }
        table.samples.insert(sample_id, record);
    }
    table
}

pub fn sample_id(cohort: &str, program: &str, case_id: &str, abbrev: &str) -> String {
    format!("{cohort}-{}-{abbrev}", cohort_suffix(program, case_id))
}

pub fn sample_set_rows(record: &SampleRecord, relabel: Option<&str>) -> Vec<(String, String)> {
    let cohort = relabel.unwrap_or(&record.set_cohort);
    if record.ffpe {
        vec![(
            format!("{cohort}{FFPE_ABBREV}-{FFPE_ABBREV}"),
            record.sample_id.clone(),
        )]
    } else {
        vec![
            (format!("{cohort}-{}", record.sample_type), record.sample_id.clone()),
            (cohort.to_string(), record.sample_id.clone()),
        ]
    }
}

pub fn load_blacklist(path: &Path) -> Result<Vec<String>, GdcError> {
    let content = fs::read_to_string(path).map_err(|err| GdcError::fs(path.display(), err))?;
    Ok(content
        .lines()
        .map(|line| line.split('#').next().unwrap_or(""))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct CohortSummary {
    pub cohort: String,
    pub samples: usize,
    pub cases: usize,
    pub filtered: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadfileSummary {
    pub program: String,
    pub datestamp: Datestamp,
    pub format: LoadfileFormat,
    pub cohorts: Vec<CohortSummary>,
    pub skipped: Vec<String>,
}

pub struct Loadfile {
    dice: DiceLayout,
    layout: LoadfileLayout,
    aggregates: BTreeMap<String, Vec<String>>,
    options: LoadfileOptions,
}

impl Loadfile {
    pub fn new(dice_root: Utf8PathBuf, output_root: Utf8PathBuf, options: LoadfileOptions) -> Self {
        Self {
            dice: DiceLayout::new(dice_root),
            layout: LoadfileLayout::new(output_root),
            aggregates: BTreeMap::new(),
            options,
        }
    }

    pub fn with_aggregates(mut self, aggregates: BTreeMap<String, Vec<String>>) -> Self {
        self.aggregates = aggregates;
        self
    }

    pub fn layout(&self) -> &LoadfileLayout {
        &self.layout
    }

    pub fn projects(&self, program: &str) -> Result<Vec<String>, GdcError> {
        Ok(self
            .dice
            .projects(program)?
            .into_iter()
            .filter(|project| !self.aggregates.contains_key(project))
            .collect())
    }

    pub fn run(&self, program: &str, projects: &[String]) -> Result<LoadfileSummary, GdcError> {
        let options = &self.options;
        let mut projects = projects.to_vec();
        projects.sort();
        projects.dedup();
        info!(
            %program,
            datestamp = %options.datestamp,
            format = %options.format,
            projects = projects.len(),
            "building loadfiles"
        );

        let mut summary = LoadfileSummary {
            program: program.to_string(),
            datestamp: options.datestamp.clone(),
            format: options.format,
            cohorts: Vec::new(),
            skipped: Vec::new(),
        };
        let mut tables: BTreeMap<String, CohortTable> = BTreeMap::new();
        for project in &projects {
            let Some(rows) = self.diced_rows(program, project)? else {
                warn!(%project, datestamp = %options.datestamp, "no diced metadata, skipping project");
                summary.skipped.push(project.clone());
                continue;
            };
            let table = build_cohort_table(program, project, &rows, options.format, &options.blacklist);
            summary
                .cohorts
                .push(self.write_cohort(program, project, &table, None)?);
            tables.insert(project.clone(), table);
        }

        for (name, members) in &self.aggregates {
            let mut aggregate = CohortTable::default();
            let mut complete = true;
            for member in members {
                match tables.get(member) {
                    Some(table) => aggregate.merge(table),
                    None => match self.diced_rows(program, member)? {
                        Some(rows) => aggregate.merge(&build_cohort_table(
                            program,
                            member,
                            &rows,
                            options.format,
                            &options.blacklist,
                        )),
                        None => {
                            complete = false;
                            break;
                        }
                    },
                }
            }
            if !complete {
                warn!(aggregate = %name, "aggregate member has no diced metadata, skipping");
                summary.skipped.push(name.clone());
                continue;
            }
            let label = options.format.cohort_name(program, name);
            summary
                .cohorts
                .push(self.write_cohort(program, name, &aggregate, Some(&label))?);
        }

        if !tables.is_empty() {
            let mut pan = CohortTable::default();
            for table in tables.values() {
                pan.merge(table);
            }
            summary.cohorts.push(self.write_cohort(program, program, &pan, None)?);
        }
        Ok(summary)
    }

    fn diced_rows(&self, program: &str, project: &str) -> Result<Option<Vec<DicedRow>>, GdcError> {
        let metadata_dir = self.dice.metadata_dir(program, project);
        let Some(datestamp) = store::latest_metadata_datestamp(
            metadata_dir.as_std_path(),
            Some(&self.options.datestamp),
            None,
        )?
        else {
            return Ok(None);
        };
        let path = self.dice.diced_metadata_path(program, project, &datestamp);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        dice::read_diced_metadata(path.as_std_path()).map(Some)
    }

    fn write_cohort(
        &self,
        program: &str,
        cohort: &str,
        table: &CohortTable,
        relabel: Option<&str>,
    ) -> Result<CohortSummary, GdcError> {
        let options = &self.options;
        let format = options.format;
        let datestamp = &options.datestamp;
        let annotations: Vec<&String> = table.annotations.iter().collect();

        let mut header = vec![
            format!("{}sample_id", format.entity_prefix()),
            format.case_column().to_string(),
            "sample_type".to_string(),
            format!("{}_sample_id", program.to_ascii_lowercase()),
        ];
        header.extend(annotations.iter().map(|annotation| annotation.to_string()));
        let sample_lines = table.samples.values().map(|record| {
            let mut cells = vec![
                record.sample_id.clone(),
                record.case_id.clone(),
                record.sample_type.clone(),
                record.program_sample_id.clone(),
            ];
            cells.extend(annotations.iter().map(|annotation| {
                match record.attributes.get(annotation.as_str()) {
                    Some(path) => self.rewrite_path(path),
                    None => options.missing_file_value.clone(),
                }
            }));
            cells.join("\t")
        });
        let samples_path = self.layout.samples_path(program, cohort, datestamp);
        write_table(&samples_path, &header.join("\t"), sample_lines)?;

        let set_lines = table.samples.values().flat_map(|record| {
            sample_set_rows(record, relabel)
                .into_iter()
                .map(|(set, sample)| format!("{set}\t{sample}"))
        });
        write_table(
            &self.layout.sample_set_path(program, cohort, datestamp),
            &format!("{}sample_set_id\tsample_id", format.membership_prefix()),
            set_lines,
        )?;

        let cases = table.case_ids();
        if format.emits_cases() {
            write_table(
                &self.layout.cases_path(program, cohort, datestamp),
                &format!("{}{}", format.entity_prefix(), format.case_column()),
                cases.iter().map(|case| case.to_string()),
            )?;
        }

        let filtered_lines = table.filtered.iter().map(|row| {
            [
                row.participant_id.as_str(),
                row.cohort.as_str(),
                row.annotation.as_str(),
                row.reason.as_str(),
                row.removed.as_str(),
                row.chosen.as_str(),
            ]
            .join("\t")
        });
        write_table(
            &self.layout.filtered_path(program, cohort, datestamp),
            "Participant Id\tCohort\tAnnotation\tFilter Reason\tRemoved Samples\tChosen Sample",
            filtered_lines,
        )?;

        info!(
            %cohort,
            samples = table.samples.len(),
            filtered = table.filtered.len(),
            path = %samples_path,
            "loadfile written"
        );
        Ok(CohortSummary {
            cohort: cohort.to_string(),
            samples: table.samples.len(),
            cases: cases.len(),
            filtered: table.filtered.len(),
        })
    }

    fn rewrite_path(&self, path: &str) -> String {
        let Some(prefix) = &self.options.file_prefix else {
            return path.to_string();
        };
        match Utf8Path::new(path).strip_prefix(self.dice.root()) {
            Ok(relative) => Utf8Path::new(prefix).join(relative).to_string(),
            Err(_) => path.to_string(),
        }
    }
}

fn write_table(
    path: &Utf8Path,
    header: &str,
    lines: impl Iterator<Item = String>,
) -> Result<(), GdcError> {
    let io = |err: std::io::Error| GdcError::fs(path, err);
    let mut writer = AtomicWriter::create(path.as_std_path())?;
    writeln!(writer, "{header}").map_err(io)?;
    for line in lines {
        writeln!(writer, "{line}").map_err(io)?;
    }
    writer.commit()
}
