use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::GdcError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Datestamp(String);

impl Datestamp {
    pub fn today() -> Self {
        Self(chrono::Local::now().format("%Y_%m_%d").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Datestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Datestamp {
    type Err = GdcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^\d{4}_\d{2}_\d{2}$").expect("datestamp pattern is valid")
        });
        let trimmed = value.trim();
        if !pattern.is_match(trimmed) {
            return Err(GdcError::InvalidDatestamp(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DateSelector {
    #[default]
    Latest,
    Exact(Datestamp),
}

impl FromStr for DateSelector {
    type Err = GdcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().eq_ignore_ascii_case("latest") {
            return Ok(DateSelector::Latest);
        }
        Ok(DateSelector::Exact(value.parse()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Endpoint {
    Projects,
    Cases,
    Files,
    Programs,
    Annotations,
    Submission,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Projects => "projects",
            Endpoint::Cases => "cases",
            Endpoint::Files => "files",
            Endpoint::Programs => "programs",
            Endpoint::Annotations => "annotations",
            Endpoint::Submission => "submission",
        }
    }

    pub fn sort_key(&self) -> &'static str {
        match self {
            Endpoint::Files => "file_id",
            Endpoint::Cases => "case_id",
            Endpoint::Projects | Endpoint::Programs => "project_id",
            Endpoint::Annotations => "annotation_id",
            Endpoint::Submission => "links",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LoadfileFormat {
    Firecloud,
    Firehose,
}

impl LoadfileFormat {
    pub fn entity_prefix(&self) -> &'static str {
        match self {
            LoadfileFormat::Firecloud => "entity:",
            LoadfileFormat::Firehose => "",
        }
    }

    pub fn membership_prefix(&self) -> &'static str {
        match self {
            LoadfileFormat::Firecloud => "membership:",
            LoadfileFormat::Firehose => "",
        }
    }

    pub fn case_column(&self) -> &'static str {
        match self {
            LoadfileFormat::Firecloud => "participant_id",
            LoadfileFormat::Firehose => "individual_id",
        }
    }

    pub fn emits_cases(&self) -> bool {
        matches!(self, LoadfileFormat::Firecloud)
    }

    pub fn cohort_name(&self, program: &str, cohort: &str) -> String {
        let suffix = cohort_suffix(program, cohort);
        match self {
            LoadfileFormat::Firecloud => format!("{program}-{suffix}"),
            LoadfileFormat::Firehose => suffix.to_string(),
        }
    }
}

impl fmt::Display for LoadfileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadfileFormat::Firecloud => write!(f, "firecloud"),
            LoadfileFormat::Firehose => write!(f, "firehose"),
        }
    }
}

impl FromStr for LoadfileFormat {
    type Err = GdcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "firecloud" => Ok(LoadfileFormat::Firecloud),
            "firehose" => Ok(LoadfileFormat::Firehose),
            _ => Err(GdcError::InvalidFormat(value.to_string())),
        }
    }
}

pub fn cohort_suffix<'a>(program: &str, cohort: &'a str) -> &'a str {
    cohort
        .strip_prefix(program)
        .and_then(|rest| rest.strip_prefix('-'))
        .unwrap_or(cohort)
}

pub fn program_of(project: &str) -> &str {
    project.split('-').next().unwrap_or(project)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleType {
    pub label: &'static str,
    pub code: &'static str,
    pub abbrev: &'static str,
}

pub const FFPE_ABBREV: &str = "FFPE";

const SAMPLE_TYPES: &[SampleType] = &[
    SampleType { label: "Primary Tumor", code: "01", abbrev: "TP" },
    SampleType { label: "Recurrent Tumor", code: "02", abbrev: "TR" },
    SampleType {
        label: "Primary Blood Derived Cancer - Peripheral Blood",
        code: "03",
        abbrev: "TB",
    },
    SampleType {
        label: "Recurrent Blood Derived Cancer - Bone Marrow",
        code: "04",
        abbrev: "TRBM",
    },
    SampleType { label: "Additional - New Primary", code: "05", abbrev: "TAP" },
    SampleType { label: "Metastatic", code: "06", abbrev: "TM" },
    SampleType { label: "Additional Metastatic", code: "07", abbrev: "TAM" },
    SampleType { label: "Human Tumor Original Cells", code: "08", abbrev: "THOC" },
    SampleType {
        label: "Primary Blood Derived Cancer - Bone Marrow",
        code: "09",
        abbrev: "TBM",
    },
    SampleType { label: "Blood Derived Normal", code: "10", abbrev: "NB" },
    SampleType { label: "Solid Tissue Normal", code: "11", abbrev: "NT" },
    SampleType { label: "Buccal Cell Normal", code: "12", abbrev: "NBC" },
    SampleType { label: "EBV Immortalized Normal", code: "13", abbrev: "NEBV" },
    SampleType { label: "Bone Marrow Normal", code: "14", abbrev: "NBM" },
    SampleType { label: "Control Analyte", code: "20", abbrev: "CELLC" },
    SampleType {
        label: "Recurrent Blood Derived Cancer - Peripheral Blood",
        code: "40",
        abbrev: "TRB",
    },
    SampleType { label: "Cell Lines", code: "50", abbrev: "CELL" },
    SampleType { label: "Primary Xenograft Tissue", code: "60", abbrev: "XP" },
    SampleType {
        label: "Cell Line Derived Xenograft Tissue",
        code: "61",
        abbrev: "XCL",
    },
];

impl SampleType {
    pub fn all() -> &'static [SampleType] {
        SAMPLE_TYPES
    }

    pub fn from_label(label: &str) -> Option<SampleType> {
        SAMPLE_TYPES
            .iter()
            .find(|entry| entry.label.eq_ignore_ascii_case(label.trim()))
            .copied()
    }

    pub fn from_abbrev(abbrev: &str) -> Option<SampleType> {
        SAMPLE_TYPES
            .iter()
            .find(|entry| entry.abbrev == abbrev)
            .copied()
    }
}

pub fn main_tumor_sample_type(project: &str) -> SampleType {
    let cohort = project.rsplit('-').next().unwrap_or(project);
    let label = match cohort {
        "LAML" | "AML" => "Primary Blood Derived Cancer - Peripheral Blood",
        "SKCM" => "Metastatic",
        _ => "Primary Tumor",
    };
    SampleType::from_label(label).unwrap_or(SAMPLE_TYPES[0])
}
