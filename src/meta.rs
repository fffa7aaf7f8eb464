use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GdcError;

pub const RECOGNIZED_EXTENSIONS: [&str; 7] = ["xml", "txt", "tar", "gz", "md5", "xlsx", "xls"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDescriptor {
    pub file_id: String,
    pub file_name: String,
    pub md5sum: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub center: Option<Center>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
    pub cases: Vec<Case>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Center {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Analysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Case {
    pub submitter_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<Sample>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectRef {
    pub project_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sample {
    pub submitter_id: String,
    pub sample_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_ffpe: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub portions: Vec<Portion>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Portion {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub analytes: Vec<Analyte>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Analyte {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliquots: Vec<Aliquot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Aliquot {
    pub submitter_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliquotInfo {
    pub aliquot_id: String,
    pub sample_type: String,
    pub is_ffpe: bool,
}

impl Sample {
    pub fn aliquot_infos(&self) -> Vec<AliquotInfo> {
        let ids: Vec<&str> = self
            .portions
            .iter()
            .flat_map(|portion| portion.analytes.iter())
            .flat_map(|analyte| analyte.aliquots.iter())
            .map(|aliquot| aliquot.submitter_id.as_str())
            .collect();
        let ids = if ids.is_empty() {
            vec![self.submitter_id.as_str()]
        } else {
            ids
        };
        ids.into_iter()
            .map(|id| AliquotInfo {
                aliquot_id: id.to_string(),
                sample_type: self.sample_type.clone(),
                is_ffpe: self.is_ffpe.unwrap_or(false),
            })
            .collect()
    }
}

impl FileDescriptor {
    pub fn data_category(&self) -> &str {
        self.data_category.as_deref().unwrap_or("")
    }

    pub fn data_type(&self) -> &str {
        self.data_type.as_deref().unwrap_or("")
    }

    pub fn experimental_strategy(&self) -> &str {
        self.experimental_strategy.as_deref().unwrap_or("")
    }

    pub fn platform(&self) -> &str {
        self.platform.as_deref().unwrap_or("")
    }

    pub fn center_namespace(&self) -> &str {
        self.center
            .as_ref()
            .and_then(|center| center.namespace.as_deref())
            .unwrap_or("")
    }

    pub fn workflow_type(&self) -> &str {
        self.analysis
            .as_ref()
            .and_then(|analysis| analysis.workflow_type.as_deref())
            .unwrap_or("")
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.cases.iter().flat_map(|case| case.samples.iter())
    }

    pub fn has_multiple_samples(&self) -> bool {
        self.samples().count() > 1
    }

    pub fn is_case_level(&self) -> bool {
        self.samples().next().is_none()
    }

    pub fn aliquots(&self) -> Vec<AliquotInfo> {
        self.samples().flat_map(Sample::aliquot_infos).collect()
    }

    pub fn tumor_aliquots(&self) -> Vec<AliquotInfo> {
        self.aliquots()
            .into_iter()
            .filter(|info| !info.sample_type.contains("Normal"))
            .collect()
    }

    pub fn case(&self) -> Result<&Case, GdcError> {
        match self.cases.as_slice() {
            [case] => Ok(case),
            [] => Err(GdcError::Metadata(format!(
                "file {} has no case",
                self.file_id
            ))),
            _ => Err(GdcError::Metadata(format!(
                "file {} has {} cases, expected exactly one",
                self.file_id,
                self.cases.len()
            ))),
        }
    }

    pub fn case_id(&self) -> Result<&str, GdcError> {
        Ok(self.case()?.submitter_id.as_str())
    }

    pub fn project_id(&self) -> Option<&str> {
        self.cases
            .first()
            .and_then(|case| case.project.as_ref())
            .map(|project| project.project_id.as_str())
    }

    pub fn single_aliquot(&self) -> Result<Option<AliquotInfo>, GdcError> {
        let samples: Vec<&Sample> = self.samples().collect();
        match samples.as_slice() {
            [] => Ok(None),
            [sample] => {
                let mut infos = sample.aliquot_infos();
                if infos.len() != 1 {
                    return Err(GdcError::Metadata(format!(
                        "file {} has {} aliquots, expected exactly one",
                        self.file_id,
                        infos.len()
                    )));
                }
                Ok(infos.pop())
            }
            _ => Err(GdcError::Metadata(format!(
                "file {} spans {} samples",
                self.file_id,
                samples.len()
            ))),
        }
    }

    pub fn tcga_id(&self) -> Result<String, GdcError> {
        match self.single_aliquot()? {
            Some(info) => Ok(info.aliquot_id),
            None => Ok(self.case_id()?.to_string()),
        }
    }
}

/// Name under which the file is stored in the mirror. Strict mode inserts
/// the file id before the first recognized extension.
pub fn file_basename(descriptor: &FileDescriptor, legacy: bool) -> Result<String, GdcError> {
    if legacy {
        return Ok(descriptor.file_name.clone());
    }
    let tokens: Vec<&str> = descriptor.file_name.split('.').collect();
    let position = tokens
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, token)| RECOGNIZED_EXTENSIONS.contains(&token.to_ascii_lowercase().as_str()))
        .map(|(index, _)| index)
        .ok_or_else(|| GdcError::UnrecognizedExtension(descriptor.file_name.clone()))?;
    let stem = tokens[..position].join(".");
    let rest = tokens[position..].join(".");
    Ok(format!("{stem}.{}.{rest}", descriptor.file_id))
}

pub fn companion_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".md5");
    std::path::PathBuf::from(name)
}

pub fn read_companion(path: &Path) -> Option<(String, String)> {
    let content = fs::read_to_string(companion_path(path)).ok()?;
    let mut parts = content.split_whitespace();
    let hash = parts.next()?.to_string();
    let name = parts.next()?.to_string();
    Some((hash, name))
}

pub fn write_companion(path: &Path, md5sum: &str) -> Result<(), GdcError> {
    let basename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| GdcError::Filesystem(format!("invalid file name {}", path.display())))?;
    let companion = companion_path(path);
    crate::store::write_bytes_atomic(&companion, format!("{md5sum}  {basename}\n").as_bytes())
}

pub fn md5_matches(path: &Path, md5sum: &str) -> bool {
    let Some((hash, name)) = read_companion(path) else {
        return false;
    };
    let basename = path.file_name().and_then(|name| name.to_str()).unwrap_or("");
    name == basename && hash.eq_ignore_ascii_case(md5sum)
}

pub fn load_metadata(path: &Path) -> Result<Vec<FileDescriptor>, GdcError> {
    let content = fs::read_to_string(path).map_err(|err| GdcError::fs(path.display(), err))?;
    serde_json::from_str(&content)
        .map_err(|err| GdcError::Metadata(format!("{}: {err}", path.display())))
}

pub fn write_metadata(path: &Path, files: &[FileDescriptor]) -> Result<(), GdcError> {
    let content = serde_json::to_vec_pretty(files)
        .map_err(|err| GdcError::Metadata(err.to_string()))?;
    crate::store::write_bytes_atomic(path, &content)
}
