use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::convert::Converter;
use crate::error::GdcError;
use crate::meta::FileDescriptor;

pub const UNRECOGNIZED: &str = "UNRECOGNIZED";

pub const REPORT_DATA_TYPES: [&str; 7] =
    ["BCR", "Clinical", "CN", "mRNA", "miR", "MAF", "Methylation"];

const BUILTIN_TABLE: &str = include_str!("../data/annotations_table.tsv");

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature {
    pub data_type: String,
    pub data_category: String,
    pub experimental_strategy: String,
    pub platform: String,
    pub tags: BTreeSet<String>,
    pub center_namespace: String,
    pub workflow_type: String,
}

impl Signature {
    pub fn from_descriptor(descriptor: &FileDescriptor) -> Self {
        Self {
            data_type: descriptor.data_type().to_string(),
            data_category: descriptor.data_category().to_string(),
            experimental_strategy: descriptor.experimental_strategy().to_string(),
            platform: descriptor.platform().to_string(),
            tags: descriptor
                .tags
                .iter()
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty())
                .collect(),
            center_namespace: descriptor.center_namespace().to_string(),
            workflow_type: descriptor.workflow_type().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub name: String,
    pub converter: Converter,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    data_category: String,
    #[serde(default)]
    data_type: String,
    #[serde(default)]
    experimental_strategy: String,
    #[serde(default)]
    platform: String,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    center_namespace: String,
    #[serde(default)]
    workflow_type: String,
    annotation: String,
    converter: String,
}

#[derive(Debug, Clone, Default)]
pub struct AnnotationTable {
    entries: HashMap<Signature, Annotation>,
}

impl AnnotationTable {
    pub fn builtin() -> Result<Self, GdcError> {
        Self::from_reader(BUILTIN_TABLE.as_bytes())
    }

    pub fn load(path: &Path) -> Result<Self, GdcError> {
        let file = fs::File::open(path).map_err(|err| GdcError::fs(path.display(), err))?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, GdcError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .quoting(false)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut entries = HashMap::new();
        let mut conflated_platforms = false;
        for record in csv_reader.deserialize::<TableRow>() {
            let row = record.map_err(|err| GdcError::AnnotationTable(err.to_string()))?;
            let converter = row.converter.parse::<Converter>()?;
            let signature = Signature {
                data_type: row.data_type,
                data_category: row.data_category,
                experimental_strategy: row.experimental_strategy,
                platform: row.platform,
                tags: row
                    .tags
                    .split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect(),
                center_namespace: row.center_namespace,
                workflow_type: row.workflow_type,
            };
            if row.annotation.starts_with("mRNA__") && signature.platform == "Illumina" {
                conflated_platforms = true;
            }
            if let Some(existing) = entries.get(&signature) {
                let existing: &Annotation = existing;
                warn!(
                    annotation = %row.annotation,
                    kept = %existing.name,
                    ?signature,
                    "duplicate annotation signature, keeping the first"
                );
                continue;
            }
            entries.insert(
                signature,
                Annotation {
                    name: row.annotation,
                    converter,
                },
            );
        }
        if conflated_platforms {
            warn!(
                "gene expression annotations key on the generic Illumina platform; \
                 HiSeq and GA data share one annotation"
            );
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, descriptor: &FileDescriptor) -> Option<&Annotation> {
        self.entries.get(&Signature::from_descriptor(descriptor))
    }
}

pub fn report_type(annotation: &str) -> &'static str {
    if annotation.starts_with("clinical__biospecimen") {
        "BCR"
    } else if annotation.starts_with("clinical__") {
        "Clinical"
    } else if annotation.starts_with("CNV__") {
        "CN"
    } else if annotation.starts_with("mRNA__") {
        "mRNA"
    } else if annotation.starts_with("miR__") {
        "miR"
    } else if annotation.starts_with("SNV__") {
        "MAF"
    } else if annotation.starts_with("methylation__") {
        "Methylation"
    } else {
        ""
    }
}

pub fn conventional_extension(descriptor: &FileDescriptor) -> &'static str {
    let category = descriptor.data_category().to_ascii_lowercase();
    let data_type = descriptor.data_type().to_ascii_lowercase();
    if category == "biospecimen" || category == "clinical" {
        "clin.txt"
    } else if category == "copy number variation" {
        "seg.txt"
    } else if category == "dna methylation" || category == "transcriptome profiling" {
        "data.txt"
    } else if data_type == "masked somatic mutation" {
        "maf.txt"
    } else {
        "txt"
    }
}
