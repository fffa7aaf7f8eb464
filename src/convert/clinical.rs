use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;

use super::{NA, io_error};
use crate::error::GdcError;
use crate::store::AtomicWriter;

#[derive(Debug, Default)]
struct Frame {
    path: String,
    seen: HashMap<String, usize>,
    text: String,
    has_children: bool,
}

pub(super) fn convert(input: &Path, output: &Path) -> Result<(), GdcError> {
    let file = File::open(input).map_err(|_| GdcError::MissingMirrorFile(input.to_path_buf()))?;
    let rows = flatten_clinical_xml(BufReader::new(file))
        .map_err(|err| GdcError::Conversion(format!("{}: {err}", input.display())))?;

    let mut writer = AtomicWriter::create(output)?;
    writeln!(writer, "node_name\tnode_value").map_err(|err| io_error(output, err))?;
    for (name, value) in rows {
        writeln!(writer, "{name}\t{value}").map_err(|err| io_error(output, err))?;
    }
    writer.commit()
}

/// Flattens every leaf element below the document root into a
/// `(dotted.path, value)` pair. Repeated siblings are suffixed `-2`, `-3`
/// and so on. Names and values are lowercased; blank values become `NA`.
pub fn flatten_clinical_xml<R: BufRead>(source: R) -> Result<Vec<(String, String)>, GdcError> {
    let mut reader = Reader::from_reader(source);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut rows = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) => {
                let name = String::from_utf8_lossy(element.local_name().as_ref()).to_lowercase();
                open(&mut stack, &name);
            }
            Ok(Event::Empty(element)) => {
                let name = String::from_utf8_lossy(element.local_name().as_ref()).to_lowercase();
                open(&mut stack, &name);
                close(&mut stack, &mut rows);
            }
            Ok(Event::Text(text)) => {
                let text = text
                    .unescape()
                    .map_err(|err| GdcError::Conversion(err.to_string()))?;
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Ok(Event::End(_)) => close(&mut stack, &mut rows),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(GdcError::Conversion(format!(
                    "malformed XML at byte {}: {err}",
                    reader.error_position()
                )));
            }
        }
        buf.clear();
    }
    Ok(rows)
}

fn open(stack: &mut Vec<Frame>, name: &str) {
    let Some(parent) = stack.last_mut() else {
        stack.push(Frame::default());
        return;
    };
    parent.has_children = true;
    let count = parent.seen.entry(name.to_string()).or_insert(0);
    *count += 1;
    let segment = if *count == 1 {
        name.to_string()
    } else {
        format!("{name}-{count}")
    };
    let path = if parent.path.is_empty() {
        segment
    } else {
        format!("{}.{segment}", parent.path)
    };
    stack.push(Frame {
        path,
        ..Frame::default()
    });
}

fn close(stack: &mut Vec<Frame>, rows: &mut Vec<(String, String)>) {
    let Some(frame) = stack.pop() else {
        return;
    };
    if stack.is_empty() || frame.has_children {
        return;
    }
    let value = frame.text.trim();
    let value = if value.is_empty() {
        NA.to_string()
    } else {
        value.to_lowercase()
    };
    rows.push((frame.path, value));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_with_sibling_suffixes() {
        let xml = r#"<?xml version="1.0"?>
<tcga_bcr xmlns:admin="http://tcga.nci/bcr/xml/administration">
  <admin:admin>
    <admin:disease_code>COAD</admin:disease_code>
  </admin:admin>
  <patient>
    <drug><name>Foo</name></drug>
    <drug><name> </name></drug>
    <vital_status/>
  </patient>
</tcga_bcr>"#;
        let rows = flatten_clinical_xml(xml.as_bytes()).unwrap();
        assert_eq!(
            rows,
            vec![
                ("admin.disease_code".to_string(), "coad".to_string()),
                ("patient.drug.name".to_string(), "foo".to_string()),
                ("patient.drug-2.name".to_string(), "NA".to_string()),
                ("patient.vital_status".to_string(), "NA".to_string()),
            ]
        );
    }

    #[test]
    fn keeps_inner_spacing_of_values() {
        let xml = "<tcga_bcr><patient><histology>  Mucinous  Adenocarcinoma (NOS) </histology></patient></tcga_bcr>";
        let rows = flatten_clinical_xml(xml.as_bytes()).unwrap();
        assert_eq!(
            rows,
            vec![(
                "patient.histology".to_string(),
                "mucinous  adenocarcinoma (nos)".to_string()
            )]
        );
    }
}
