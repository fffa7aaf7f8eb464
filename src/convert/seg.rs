use std::io::Write;
use std::path::Path;

use super::{NA, Target, io_error, read_lines, split_fields};
use crate::error::GdcError;
use crate::store::AtomicWriter;

const OUTPUT_HEADER: &str = "Sample\tChromosome\tStart\tEnd\tNum_Probes\tSegment_Mean";

#[derive(Debug)]
struct SegColumns {
    chromosome: usize,
    start: usize,
    end: usize,
    num_probes: Option<usize>,
    segment_mean: usize,
}

impl SegColumns {
    fn from_header(header: &[String]) -> Result<Self, GdcError> {
        let find = |names: &[&str]| {
            header
                .iter()
                .position(|column| names.iter().any(|name| column.eq_ignore_ascii_case(name)))
        };
        let require = |names: &[&str]| {
            find(names).ok_or_else(|| {
                GdcError::Conversion(format!(
                    "segment header lacks {}: {}",
                    names[0],
                    header.join("\t")
                ))
            })
        };
        Ok(Self {
            chromosome: require(&["Chromosome", "chrom"])?,
            start: require(&["Start", "loc.start"])?,
            end: require(&["End", "loc.end"])?,
            num_probes: find(&["Num_Probes", "num.mark"]),
            segment_mean: require(&["Segment_Mean", "seg.mean"])?,
        })
    }
}

pub(super) fn convert(input: &Path, target: &Target) -> Result<(), GdcError> {
    let mut lines = read_lines(input)?;
    let header = match lines.next() {
        Some(line) => split_fields(&line?),
        None => return Err(GdcError::Conversion(format!("{} is empty", input.display()))),
    };
    let columns = SegColumns::from_header(&header)?;

    let mut writer = AtomicWriter::create(&target.path)?;
    writeln!(writer, "{OUTPUT_HEADER}").map_err(|err| io_error(&target.path, err))?;
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_fields(&line);
        let cell = |index: usize| fields.get(index).map(String::as_str).unwrap_or(NA);
        let num_probes = columns.num_probes.map(cell).unwrap_or(NA);
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}",
            target.barcode,
            normalize_chromosome(cell(columns.chromosome)),
            cell(columns.start),
            cell(columns.end),
            num_probes,
            cell(columns.segment_mean)
        )
        .map_err(|err| io_error(&target.path, err))?;
    }
    writer.commit()
}

pub fn normalize_chromosome(value: &str) -> String {
    let trimmed = value.trim();
    let bare = match trimmed.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("chr") && trimmed.len() > 3 => &trimmed[3..],
        _ => trimmed,
    };
    match bare.to_ascii_uppercase().as_str() {
        "X" => "23".to_string(),
        "Y" => "24".to_string(),
        "M" | "MT" => "25".to_string(),
        "XY" => "26".to_string(),
        _ => bare.to_string(),
    }
}
