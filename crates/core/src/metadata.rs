use crate::error::MetadataError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub type TemplateContext = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub directory: String,
    pub name: String,
    pub value: String,
}

impl MetadataEntry {
    pub fn new(directory: &str, name: &str, value: impl Into<String>) -> Self {
        Self {
            directory: sanitize_key(directory),
            name: sanitize_key(name),
            value: value.into(),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.directory, self.name)
    }

    pub fn template_snippet(&self) -> String {
        format!("{{{{{}}}}}", self.qualified_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTag {
    pub directory: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

impl RawTag {
    pub fn new(directory: &str, name: &str, description: impl Into<String>) -> Self {
        Self {
            directory: directory.to_string(),
            name: Some(name.to_string()),
            description: Some(description.into()),
        }
    }
}

pub trait MetadataReader: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<Vec<RawTag>, MetadataError>;
}

impl<F> MetadataReader for F
where
    F: Fn(&Path) -> Result<Vec<RawTag>, MetadataError> + Send + Sync,
{
    fn read_tags(&self, path: &Path) -> Result<Vec<RawTag>, MetadataError> {
        self(path)
    }
}

pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .collect()
}

pub fn build_context(entries: &[MetadataEntry]) -> TemplateContext {
    let mut context = TemplateContext::new();
    for entry in entries {
        context
            .entry(entry.directory.clone())
            .or_default()
            .entry(entry.name.clone())
            .or_insert_with(|| entry.value.clone());
    }
    context
}
