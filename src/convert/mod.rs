mod clinical;
mod maf;
mod seg;
mod tabular;
mod unzip;

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::GdcError;
use crate::store;

pub use clinical::flatten_clinical_xml;
pub use seg::normalize_chromosome;

pub const NA: &str = "NA";

/// Header column order of methylation tables after reordering: probe, beta
/// value, gene symbol, chromosome, start.
const METHYLATION_COLUMNS: [usize; 5] = [0, 1, 5, 2, 3];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Converter {
    Copy,
    Clinical,
    Seg,
    Tsv2IdTsv,
    Tsv2Magetab {
        column_order: Option<Vec<usize>>,
        data_columns: Option<Vec<usize>>,
    },
    Expression2Magetab {
        value_column: String,
    },
    Maf,
    Unzip(Box<Converter>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub barcode: String,
    pub path: PathBuf,
}

impl Converter {
    pub fn base(&self) -> &Converter {
        match self {
            Converter::Unzip(inner) => inner.base(),
            other => other,
        }
    }

    pub fn splits_samples(&self) -> bool {
        matches!(self.base(), Converter::Maf)
    }

    pub fn run(&self, input: &Path, targets: &[Target]) -> Result<Vec<PathBuf>, GdcError> {
        match self {
            Converter::Copy => {
                let target = single_target(self, targets)?;
                store::link_or_copy(input, &target.path)?;
                Ok(vec![target.path.clone()])
            }
            Converter::Clinical => {
                let target = single_target(self, targets)?;
                clinical::convert(input, &target.path)?;
                Ok(vec![target.path.clone()])
            }
            Converter::Seg => {
                let target = single_target(self, targets)?;
                seg::convert(input, target)?;
                Ok(vec![target.path.clone()])
            }
            Converter::Tsv2IdTsv => {
                let target = single_target(self, targets)?;
                tabular::tsv2idtsv(input, target)?;
                Ok(vec![target.path.clone()])
            }
            Converter::Tsv2Magetab {
                column_order,
                data_columns,
            } => {
                let target = single_target(self, targets)?;
                tabular::tsv2magetab(
                    input,
                    target,
                    column_order.as_deref(),
                    data_columns.as_deref(),
                )?;
                Ok(vec![target.path.clone()])
            }
            Converter::Expression2Magetab { value_column } => {
                let target = single_target(self, targets)?;
                tabular::expression2magetab(input, target, value_column)?;
                Ok(vec![target.path.clone()])
            }
            Converter::Maf => maf::split(input, targets),
            Converter::Unzip(inner) => unzip::run(inner, input, targets),
        }
    }
}

impl FromStr for Converter {
    type Err = GdcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let name = value.trim();
        if let Some(inner) = name.strip_suffix("_unzip") {
            return Ok(Converter::Unzip(Box::new(inner.parse()?)));
        }
        match name {
            "copy" => Ok(Converter::Copy),
            "clinical" => Ok(Converter::Clinical),
            "seg" => Ok(Converter::Seg),
            "tsv2idtsv" => Ok(Converter::Tsv2IdTsv),
            "tsv2magetab" => Ok(Converter::Tsv2Magetab {
                column_order: None,
                data_columns: None,
            }),
            "methylation2magetab" => Ok(Converter::Tsv2Magetab {
                column_order: Some(METHYLATION_COLUMNS.to_vec()),
                data_columns: Some(vec![1]),
            }),
            "fpkm2magetab" => Ok(Converter::Expression2Magetab {
                value_column: "FPKM".to_string(),
            }),
            "counts2magetab" => Ok(Converter::Expression2Magetab {
                value_column: "raw_count".to_string(),
            }),
            "maf" => Ok(Converter::Maf),
            other => Err(GdcError::AnnotationTable(format!(
                "unknown converter: {other}"
            ))),
        }
    }
}

impl fmt::Display for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Converter::Copy => f.write_str("copy"),
            Converter::Clinical => f.write_str("clinical"),
            Converter::Seg => f.write_str("seg"),
            Converter::Tsv2IdTsv => f.write_str("tsv2idtsv"),
            Converter::Tsv2Magetab { column_order, .. } => {
                if column_order.is_some() {
                    f.write_str("methylation2magetab")
                } else {
                    f.write_str("tsv2magetab")
                }
            }
            Converter::Expression2Magetab { value_column } => {
                if value_column == "FPKM" {
                    f.write_str("fpkm2magetab")
                } else {
                    f.write_str("counts2magetab")
                }
            }
            Converter::Maf => f.write_str("maf"),
            Converter::Unzip(inner) => write!(f, "{inner}_unzip"),
        }
    }
}

fn single_target<'a>(converter: &Converter, targets: &'a [Target]) -> Result<&'a Target, GdcError> {
    match targets {
        [target] => Ok(target),
        _ => Err(GdcError::Conversion(format!(
            "{converter} expects exactly one output, got {}",
            targets.len()
        ))),
    }
}

fn read_lines(path: &Path) -> Result<impl Iterator<Item = Result<String, GdcError>>, GdcError> {
    let file = File::open(path).map_err(|_| GdcError::MissingMirrorFile(path.to_path_buf()))?;
    let display = path.display().to_string();
    Ok(BufReader::new(file).lines().map(move |line| {
        line.map(|mut text| {
            if text.ends_with('\r') {
                text.pop();
            }
            text
        })
        .map_err(|err| GdcError::fs(&display, err))
    }))
}

fn split_fields(line: &str) -> Vec<String> {
    line.split('\t')
        .map(|cell| {
            if cell.trim().is_empty() {
                NA.to_string()
            } else {
                cell.to_string()
            }
        })
        .collect()
}

fn io_error(path: &Path, err: std::io::Error) -> GdcError {
    GdcError::fs(path.display(), err)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_names_and_wrappers() {
        assert_eq!("seg".parse::<Converter>().unwrap(), Converter::Seg);
        let maf: Converter = "maf_unzip".parse().unwrap();
        assert_eq!(maf, Converter::Unzip(Box::new(Converter::Maf)));
        assert!(maf.splits_samples());
        assert_eq!(maf.to_string(), "maf_unzip");
        assert_eq!(
            "fpkm2magetab_unzip".parse::<Converter>().unwrap().to_string(),
            "fpkm2magetab_unzip"
        );
        assert_matches!("bogus".parse::<Converter>(), Err(GdcError::AnnotationTable(_)));
    }

    #[test]
    fn empty_cells_become_na() {
        assert_eq!(split_fields("a\t\t \tb"), vec!["a", "NA", "NA", "b"]);
    }

    #[test]
    fn single_output_converters_reject_several_targets() {
        let targets = vec![
            Target {
                barcode: "a".to_string(),
                path: PathBuf::from("a"),
            },
            Target {
                barcode: "b".to_string(),
                path: PathBuf::from("b"),
            },
        ];
        assert_matches!(
            Converter::Seg.run(Path::new("missing"), &targets),
            Err(GdcError::Conversion(_))
        );
    }
}
