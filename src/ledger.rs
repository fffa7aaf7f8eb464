use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{DateSelector, Datestamp};
use crate::error::GdcError;

#[derive(Debug, Clone)]
pub struct Ledger {
    path: Utf8PathBuf,
}

impl Ledger {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn datestamps(&self) -> Result<Vec<Datestamp>, GdcError> {
        if !self.path.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|err| GdcError::fs(&self.path, err))?;
        let mut stamps = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::parse::<Datestamp>)
            .collect::<Result<Vec<_>, _>>()?;
        stamps.sort();
        stamps.dedup();
        Ok(stamps)
    }

    pub fn latest(&self) -> Result<Option<Datestamp>, GdcError> {
        Ok(self.datestamps()?.pop())
    }

    pub fn contains(&self, datestamp: &Datestamp) -> Result<bool, GdcError> {
        Ok(self.datestamps()?.binary_search(datestamp).is_ok())
    }

    pub fn append(&self, datestamp: &Datestamp) -> Result<bool, GdcError> {
        let mut stamps = self.datestamps()?;
        if stamps.last() == Some(datestamp) {
            return Ok(false);
        }
        if let Err(position) = stamps.binary_search(datestamp) {
            stamps.insert(position, datestamp.clone());
        } else {
            return Ok(false);
        }
        let mut content = String::new();
        for stamp in &stamps {
            content.push_str(stamp.as_str());
            content.push('\n');
        }
        crate::store::write_bytes_atomic(self.path.as_std_path(), content.as_bytes())?;
        Ok(true)
    }

    pub fn resolve(&self, selector: &DateSelector) -> Result<Datestamp, GdcError> {
        match selector {
            DateSelector::Latest => self.latest()?.ok_or_else(|| GdcError::MissingDatestamp {
                datestamp: "latest".to_string(),
                reason: format!("ledger {} is empty", self.path),
            }),
            DateSelector::Exact(stamp) => {
                if self.contains(stamp)? {
                    Ok(stamp.clone())
                } else {
                    Err(GdcError::MissingDatestamp {
                        datestamp: stamp.to_string(),
                        reason: format!("not recorded in {}", self.path),
                    })
                }
            }
        }
    }
}
