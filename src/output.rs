use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;

use crate::dice::DiceSummary;
use crate::loadfile::LoadfileSummary;
use crate::mirror::MirrorSummary;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_mirror(summary: &MirrorSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_dice(summary: &DiceSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_loadfile(summary: &LoadfileSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_hits(hits: &[Value]) -> io::Result<()> {
        Self::print_json(&hits)
    }

    pub fn print_ids(hits: &[Value], id_field: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        for hit in hits {
            let id = match hit {
                Value::String(value) => Some(value.as_str()),
                other => other.get(id_field).and_then(Value::as_str),
            };
            if let Some(id) = id {
                writeln!(stdout, "{id}")?;
            }
        }
        Ok(())
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
