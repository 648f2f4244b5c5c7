//! Skill manifest and its validator.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{PackError, Result, ValidationError};
use crate::utils::version::is_strict_semver;

/// Default file name of the manifest inside a skill directory and archive.
pub const MANIFEST_FILE: &str = "skill.json";

static SLUG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,98}[a-z0-9])?$").expect("valid slug regex")
});

/// Declared metadata and file list of a skill.
///
/// Field types are lenient on input: a non-string value reads as blank and a
/// `files` value that is not a list of strings reads as empty, so malformed
/// documents surface as the same validation errors as missing fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub slug: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub version: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub author: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub license: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub entry: String,
    #[serde(default, deserialize_with = "lenient_files")]
    pub files: Vec<String>,
}

impl Manifest {
    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input)
            .map_err(|err| PackError::from(ValidationError::Malformed(err.to_string())))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate in a fixed order, stopping at the first problem.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        require(&self.name, ValidationError::MissingName)?;
        require(&self.slug, ValidationError::MissingSlug)?;
        validate_slug(&self.slug)?;

        if self.version.trim().is_empty() {
            return Err(ValidationError::MissingVersion);
        }
        if !is_strict_semver(&self.version) {
            return Err(ValidationError::InvalidVersion(self.version.clone()));
        }

        require(&self.description, ValidationError::MissingDescription)?;
        require(&self.author, ValidationError::MissingAuthor)?;
        require(&self.license, ValidationError::MissingLicense)?;
        require(&self.entry, ValidationError::MissingEntry)?;

        if self.files.is_empty() {
            return Err(ValidationError::EmptyFiles);
        }

        let normalized = self.normalized_files()?;
        let entry = normalize_path(&self.entry);
        if !normalized.iter().any(|file| *file == entry) {
            return Err(ValidationError::EntryNotInFiles(entry));
        }
        Ok(())
    }

    /// Normalized file list in declared order; duplicates are an error.
    pub fn normalized_files(&self) -> std::result::Result<Vec<String>, ValidationError> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let normalized = normalize_path(file);
            if !seen.insert(normalized.clone()) {
                return Err(ValidationError::DuplicateFile(normalized));
            }
            out.push(normalized);
        }
        Ok(out)
    }
}

/// Convert backslashes to forward slashes and strip one leading `./`.
pub fn normalize_path(path: &str) -> String {
    let forward = path.replace('\\', "/");
    match forward.strip_prefix("./") {
        Some(rest) => rest.to_string(),
        None => forward,
    }
}

pub fn validate_slug(slug: &str) -> std::result::Result<(), ValidationError> {
    if SLUG_REGEX.is_match(slug) {
        Ok(())
    } else {
        Err(ValidationError::InvalidSlug(slug.to_string()))
    }
}

fn require(value: &str, err: ValidationError) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(err);
    }
    Ok(())
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        _ => String::new(),
    })
}

fn lenient_files<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    let files = items
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>();
    Ok(files.unwrap_or_default())
}
