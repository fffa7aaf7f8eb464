use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use ini::{Ini, ParseOption};

use crate::domain::LoadfileFormat;
use crate::error::GdcError;

pub const DEFAULT_MISSING_FILE_VALUE: &str = "__DELETE__";
const DEFAULT_SECTION: &str = "default";
const MAX_INTERPOLATION_DEPTH: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl RawConfig {
    pub fn merge_str(&mut self, content: &str) -> Result<(), GdcError> {
        let options = ParseOption {
            enabled_escape: false,
            ..ParseOption::default()
        };
        let parsed = Ini::load_from_str_opt(content, options)
            .map_err(|err| GdcError::ConfigParse(err.to_string()))?;
        for (section, properties) in parsed.iter() {
            let name = section
                .map(|value| value.trim().to_ascii_lowercase())
                .unwrap_or_else(|| DEFAULT_SECTION.to_string());
            let entry = self.sections.entry(name).or_default();
            for (key, value) in properties.iter() {
                entry.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }
        Ok(())
    }

    pub fn get(&self, section: &str, key: &str) -> Result<Option<String>, GdcError> {
        match self.lookup(section, key) {
            Some(raw) => self.interpolate(section, raw, 0).map(Some),
            None => Ok(None),
        }
    }

    pub fn explicit_keys(&self, section: &str) -> Vec<String> {
        self.sections
            .get(section)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lookup(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|props| props.get(key))
            .or_else(|| {
                self.sections
                    .get(DEFAULT_SECTION)
                    .and_then(|props| props.get(key))
            })
            .map(String::as_str)
    }

    fn interpolate(&self, section: &str, raw: &str, depth: usize) -> Result<String, GdcError> {
        if depth > MAX_INTERPOLATION_DEPTH {
            return Err(GdcError::ConfigParse(format!(
                "interpolation too deep in [{section}]: {raw}"
            )));
        }
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(pos) = rest.find('%') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(after) = tail.strip_prefix("%%") {
                out.push('%');
                rest = after;
                continue;
            }
            let Some(body) = tail.strip_prefix("%(") else {
                return Err(GdcError::ConfigParse(format!(
                    "bad interpolation syntax in [{section}]: {raw}"
                )));
            };
            let Some(end) = body.find(")s") else {
                return Err(GdcError::ConfigParse(format!(
                    "bad interpolation syntax in [{section}]: {raw}"
                )));
            };
            let name = body[..end].trim().to_ascii_lowercase();
            let value = self
                .lookup(section, &name)
                .ok_or_else(|| GdcError::MissingConfigKey(name.clone()))?;
            out.push_str(&self.interpolate(section, value, depth + 1)?);
            rest = &body[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct GdcConfig {
    pub root_dir: Option<Utf8PathBuf>,
    pub missing_file_value: String,
    pub datestamps: Option<Utf8PathBuf>,
    pub log_dir: Option<Utf8PathBuf>,
    pub programs: Vec<String>,
    pub projects: Vec<String>,
    pub cases: Vec<String>,
    pub categories: Vec<String>,
    pub workflow: Option<String>,
    pub mirror_dir: Option<Utf8PathBuf>,
    pub legacy: bool,
    pub dice_dir: Option<Utf8PathBuf>,
    pub annotations: Option<Utf8PathBuf>,
    pub loadfile_dir: Option<Utf8PathBuf>,
    pub file_prefix: Option<String>,
    pub format: LoadfileFormat,
    pub blacklist: Option<Utf8PathBuf>,
    pub aggregates: BTreeMap<String, Vec<String>>,
}

impl Default for GdcConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            missing_file_value: DEFAULT_MISSING_FILE_VALUE.to_string(),
            datestamps: None,
            log_dir: None,
            programs: Vec::new(),
            projects: Vec::new(),
            cases: Vec::new(),
            categories: Vec::new(),
            workflow: None,
            mirror_dir: None,
            legacy: false,
            dice_dir: None,
            annotations: None,
            loadfile_dir: None,
            file_prefix: None,
            format: LoadfileFormat::Firecloud,
            blacklist: None,
            aggregates: BTreeMap::new(),
        }
    }
}

impl GdcConfig {
    pub fn mirror_dir(&self) -> Result<Utf8PathBuf, GdcError> {
        self.dir_or_root(self.mirror_dir.as_ref(), "mirror", "mirror.dir")
    }

    pub fn dice_dir(&self) -> Result<Utf8PathBuf, GdcError> {
        self.dir_or_root(self.dice_dir.as_ref(), "dice", "dice.dir")
    }

    pub fn loadfile_dir(&self) -> Result<Utf8PathBuf, GdcError> {
        self.dir_or_root(self.loadfile_dir.as_ref(), "loadfiles", "loadfile.dir")
    }

    pub fn datestamps_path(&self) -> Result<Utf8PathBuf, GdcError> {
        self.dir_or_root(self.datestamps.as_ref(), "datestamps.txt", "datestamps")
    }

    pub fn aggregates_for(&self, program: &str) -> BTreeMap<String, Vec<String>> {
        self.aggregates
            .iter()
            .filter(|(_, members)| {
                members
                    .iter()
                    .all(|member| crate::domain::program_of(member) == program)
            })
            .map(|(name, members)| (name.clone(), members.clone()))
            .collect()
    }

    fn dir_or_root(
        &self,
        explicit: Option<&Utf8PathBuf>,
        default_leaf: &str,
        key: &str,
    ) -> Result<Utf8PathBuf, GdcError> {
        if let Some(path) = explicit {
            return Ok(path.clone());
        }
        self.root_dir
            .as_ref()
            .map(|root| root.join(default_leaf))
            .ok_or_else(|| GdcError::MissingConfigKey(key.to_string()))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads every file in `paths` in order, later files overriding earlier
    /// ones. With no paths, falls back to `./gdctools.cfg` and then the user
    /// configuration directory; with nothing found, returns defaults.
    pub fn load(paths: &[String]) -> Result<GdcConfig, GdcError> {
        let candidates: Vec<PathBuf> = if paths.is_empty() {
            default_config_paths()
                .into_iter()
                .filter(|path| path.exists())
                .take(1)
                .collect()
        } else {
            paths.iter().map(PathBuf::from).collect()
        };

        let mut raw = RawConfig::default();
        for path in candidates {
            let content =
                fs::read_to_string(&path).map_err(|_| GdcError::ConfigRead(path.clone()))?;
            raw.merge_str(&content)?;
            tracing::debug!(path = %path.display(), "loaded config");
        }
        Self::resolve(&raw)
    }

    pub fn parse_str(content: &str) -> Result<GdcConfig, GdcError> {
        let mut raw = RawConfig::default();
        raw.merge_str(content)?;
        Self::resolve(&raw)
    }

    pub fn resolve(raw: &RawConfig) -> Result<GdcConfig, GdcError> {
        let path = |section: &str, key: &str| -> Result<Option<Utf8PathBuf>, GdcError> {
            Ok(raw
                .get(section, key)?
                .filter(|value| !value.is_empty())
                .map(Utf8PathBuf::from))
        };
        let text = |section: &str, key: &str| -> Result<Option<String>, GdcError> {
            Ok(raw.get(section, key)?.filter(|value| !value.is_empty()))
        };
        let list = |section: &str, key: &str| -> Result<Vec<String>, GdcError> {
            Ok(raw
                .get(section, key)?
                .map(|value| split_list(&value))
                .unwrap_or_default())
        };

        let format = match text("loadfile", "format")? {
            Some(value) => value.parse()?,
            None => LoadfileFormat::Firecloud,
        };
        let legacy = match text("mirror", "legacy")? {
            Some(value) => parse_bool(&value)?,
            None => false,
        };

        let mut aggregates = BTreeMap::new();
        for key in raw.explicit_keys("aggregates") {
            let members = list("aggregates", &key)?;
            if members.is_empty() {
                continue;
            }
            aggregates.insert(key.to_ascii_uppercase(), members);
        }

        Ok(GdcConfig {
            root_dir: path(DEFAULT_SECTION, "root_dir")?,
            missing_file_value: text(DEFAULT_SECTION, "missing_file_value")?
                .unwrap_or_else(|| DEFAULT_MISSING_FILE_VALUE.to_string()),
            datestamps: path(DEFAULT_SECTION, "datestamps")?,
            log_dir: path(DEFAULT_SECTION, "log_dir")?,
            programs: list(DEFAULT_SECTION, "programs")?,
            projects: list(DEFAULT_SECTION, "projects")?,
            cases: list(DEFAULT_SECTION, "cases")?,
            categories: list(DEFAULT_SECTION, "categories")?,
            workflow: text(DEFAULT_SECTION, "workflow")?,
            mirror_dir: path("mirror", "dir")?,
            legacy,
            dice_dir: path("dice", "dir")?,
            annotations: path("dice", "annotations")?,
            loadfile_dir: path("loadfile", "dir")?,
            file_prefix: text("loadfile", "file_prefix")?,
            format,
            blacklist: match path("loadfile", "blacklist")? {
                Some(value) => Some(value),
                None => path("reports", "blacklist")?,
            },
            aggregates,
        })
    }
}

pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(|ch: char| ch == ',' || ch.is_whitespace())
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str) -> Result<bool, GdcError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" => Ok(false),
        other => Err(GdcError::ConfigParse(format!("not a boolean: {other}"))),
    }
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("gdctools.cfg")];
    if let Some(dirs) = BaseDirs::new() {
        paths.push(dirs.config_dir().join("gdctools").join("gdctools.cfg"));
    }
    paths
}
