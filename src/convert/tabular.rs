use std::io::Write;
use std::path::Path;

use super::{NA, Target, io_error, read_lines, split_fields};
use crate::error::GdcError;
use crate::store::AtomicWriter;

pub(super) fn tsv2idtsv(input: &Path, target: &Target) -> Result<(), GdcError> {
    let mut lines = read_lines(input)?;
    let mut writer = AtomicWriter::create(&target.path)?;
    if let Some(header) = lines.next() {
        let header = split_fields(&header?);
        writeln!(writer, "SampleId\t{}", header.join("\t"))
            .map_err(|err| io_error(&target.path, err))?;
    }
    for line in lines {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        writeln!(writer, "{}\t{}", target.barcode, split_fields(&line).join("\t"))
            .map_err(|err| io_error(&target.path, err))?;
    }
    writer.commit()
}

pub(super) fn tsv2magetab(
    input: &Path,
    target: &Target,
    column_order: Option<&[usize]>,
    data_columns: Option<&[usize]>,
) -> Result<(), GdcError> {
    let mut lines = read_lines(input)?;
    let header = match lines.next() {
        Some(line) => split_fields(&line?),
        None => return Err(GdcError::Conversion(format!("{} is empty", input.display()))),
    };
    write_magetab(target, header, Vec::new(), lines, column_order, data_columns)
}

/// Expression quantification files may lack a header; a first line whose
/// second field is numeric gets `gene_id<TAB><value_column>` put above it.
pub(super) fn expression2magetab(
    input: &Path,
    target: &Target,
    value_column: &str,
) -> Result<(), GdcError> {
    let mut lines = read_lines(input)?;
    let first = match lines.next() {
        Some(line) => split_fields(&line?),
        None => return Err(GdcError::Conversion(format!("{} is empty", input.display()))),
    };
    let headerless = first
        .get(1)
        .is_some_and(|value| value.trim().parse::<f64>().is_ok());
    if headerless {
        let header = vec!["gene_id".to_string(), value_column.to_string()];
        write_magetab(target, header, vec![first], lines, None, None)
    } else {
        write_magetab(target, first, Vec::new(), lines, None, None)
    }
}

fn write_magetab(
    target: &Target,
    header: Vec<String>,
    leading_rows: Vec<Vec<String>>,
    lines: impl Iterator<Item = Result<String, GdcError>>,
    column_order: Option<&[usize]>,
    data_columns: Option<&[usize]>,
) -> Result<(), GdcError> {
    let header = reorder(header, column_order);
    let is_data = |index: usize| match data_columns {
        Some(columns) => columns.contains(&index),
        None => index > 0,
    };
    let barcodes: Vec<&str> = (1..header.len())
        .map(|index| if is_data(index) { target.barcode.as_str() } else { "" })
        .collect();

    let mut writer = AtomicWriter::create(&target.path)?;
    let path = target.path.as_path();
    let mut first_row = vec!["Hybridization REF"];
    first_row.extend(barcodes);
    writeln!(writer, "{}", first_row.join("\t")).map_err(|err| io_error(path, err))?;
    writeln!(writer, "{}", header.join("\t")).map_err(|err| io_error(path, err))?;

    for row in leading_rows {
        writeln!(writer, "{}", reorder(row, column_order).join("\t"))
            .map_err(|err| io_error(path, err))?;
    }
    for line in lines {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let row = reorder(split_fields(&line), column_order);
        writeln!(writer, "{}", row.join("\t")).map_err(|err| io_error(path, err))?;
    }
    writer.commit()
}

fn reorder(fields: Vec<String>, column_order: Option<&[usize]>) -> Vec<String> {
    match column_order {
        Some(order) => order
            .iter()
            .map(|&index| fields.get(index).cloned().unwrap_or_else(|| NA.to_string()))
            .collect(),
        None => fields,
    }
}
