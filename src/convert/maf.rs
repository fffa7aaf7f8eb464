use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{Target, io_error, read_lines, split_fields};
use crate::error::GdcError;
use crate::store::AtomicWriter;

const TUMOR_BARCODE_COLUMN: &str = "Tumor_Sample_Barcode";

/// Splits a MAF by tumor sample barcode. Every target gets a file carrying
/// the leading `#` comment lines and the column header, even when no
/// mutation rows belong to it.
pub(super) fn split(input: &Path, targets: &[Target]) -> Result<Vec<PathBuf>, GdcError> {
    if targets.is_empty() {
        return Err(GdcError::Conversion(format!(
            "{} has no tumor aliquots to split into",
            input.display()
        )));
    }

    let mut lines = read_lines(input)?;
    let mut preamble = Vec::new();
    let header = loop {
        match lines.next() {
            Some(line) => {
                let line = line?;
                if line.starts_with('#') {
                    preamble.push(line);
                } else {
                    break line;
                }
            }
            None => {
                return Err(GdcError::Conversion(format!(
                    "{} has no MAF header",
                    input.display()
                )));
            }
        }
    };
    let barcode_column = header
        .split('\t')
        .position(|column| column == TUMOR_BARCODE_COLUMN)
        .ok_or_else(|| {
            GdcError::Conversion(format!(
                "{} lacks a {TUMOR_BARCODE_COLUMN} column",
                input.display()
            ))
        })?;

    let mut writers: HashMap<&str, (AtomicWriter, &Path)> = HashMap::new();
    for target in targets {
        let mut writer = AtomicWriter::create(&target.path)?;
        for line in preamble.iter().chain(std::iter::once(&header)) {
            writeln!(writer, "{line}").map_err(|err| io_error(&target.path, err))?;
        }
        writers.insert(target.barcode.as_str(), (writer, target.path.as_path()));
    }

    let mut unmatched = 0usize;
    for line in lines {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let fields = split_fields(&line);
        let barcode = fields.get(barcode_column).map(String::as_str).unwrap_or("");
        match writers.get_mut(barcode) {
            Some((writer, path)) => {
                writeln!(writer, "{}", fields.join("\t")).map_err(|err| io_error(path, err))?;
            }
            None => unmatched += 1,
        }
    }
    if unmatched > 0 {
        debug!(
            file = %input.display(),
            rows = unmatched,
            "MAF rows for samples outside the target set"
        );
    }

    let mut outputs = Vec::with_capacity(targets.len());
    for target in targets {
        if let Some((writer, _)) = writers.remove(target.barcode.as_str()) {
            writer.commit()?;
            outputs.push(target.path.clone());
        }
    }
    Ok(outputs)
}
