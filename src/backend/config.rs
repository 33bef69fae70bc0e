use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::Deserialize;

use crate::backend::BackendError;

/// Name of the resource used when none is requested.
pub const LOCALHOST: &str = "localhost";

/// Backend configuration file, e.g.
///
/// ```json
/// {"resources": {"localhost": {"spooldir": "$HOME/.hrm/results", "resourcedir": "~/.hrm/work"}}}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackendConfig {
    pub resources: BTreeMap<String, ResourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResourceConfig {
    /// Where results are collected, one `results_<uid>` directory per job.
    pub spooldir: String,
    /// Working directories of running jobs. Must be empty at startup.
    pub resourcedir: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// A selected resource with its paths expanded.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    pub spooldir: PathBuf,
    pub resourcedir: PathBuf,
}

impl BackendConfig {
    pub fn load(path: &Path) -> Result<Self, BackendError> {
        info!("Reading backend config file '{}'.", path.display());
        let content = fs::read_to_string(path)
            .map_err(|source| BackendError::ConfigRead { path: path.to_path_buf(), source })?;
        serde_json::from_str(&content)
            .map_err(|source| BackendError::ConfigParse { path: path.to_path_buf(), source })
    }

    /// A single `localhost` resource below the spool base directory.
    pub fn local_default(base: &Path) -> Self {
        let backend = base.join("backend");
        let resource = ResourceConfig {
            spooldir: backend.join("results").to_string_lossy().into_owned(),
            resourcedir: backend.join("work").to_string_lossy().into_owned(),
            enabled: true,
        };
        BackendConfig { resources: BTreeMap::from([(LOCALHOST.to_string(), resource)]) }
    }

    /// Pick the requested resource, or `localhost`, or the first enabled one.
    pub fn select(&self, name: Option<&str>) -> Result<Resource, BackendError> {
        let (name, resource) = match name {
            Some(name) => self
                .resources
                .get_key_value(name)
                .filter(|(_, resource)| resource.enabled)
                .ok_or_else(|| BackendError::UnknownResource(name.to_string()))?,
            None => self
                .resources
                .get_key_value(LOCALHOST)
                .filter(|(_, resource)| resource.enabled)
                .or_else(|| self.resources.iter().find(|(_, resource)| resource.enabled))
                .ok_or(BackendError::NoResource)?,
        };
        let selected = Resource {
            name: name.clone(),
            spooldir: expand_path(&resource.spooldir),
            resourcedir: expand_path(&resource.resourcedir),
        };
        info!("Using backend resource '{}': {:?}", selected.name, selected);
        Ok(selected)
    }
}

/// Expand a leading `~` and `$VAR` / `${VAR}` references.
///
/// Unset variables are left as they are.
pub fn expand_path(raw: &str) -> PathBuf {
    let home = || env::var("HOME").ok();
    let raw = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match home() {
            Some(home) => format!("{home}{rest}"),
            None => raw.to_string(),
        },
        _ => raw.to_string(),
    };

    let mut expanded = String::with_capacity(raw.len());
    let mut rest = raw.as_str();
    while let Some(pos) = rest.find('$') {
        expanded.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };
        let value = if name.is_empty() { None } else { env::var(name).ok() };
        match value {
            Some(value) => expanded.push_str(&value),
            None => expanded.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }
    expanded.push_str(rest);
    PathBuf::from(expanded)
}
