use crate::metadata::{build_context, MetadataEntry, TemplateContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct FileRecord {
    path: PathBuf,
    original_name: String,
    new_name: String,
    metadata: Arc<[MetadataEntry]>,
}

impl FileRecord {
    pub(crate) fn new(path: PathBuf, metadata: Vec<MetadataEntry>) -> Self {
        let original_name = path
            .file_name()
            .map(|v| v.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            path,
            original_name,
            new_name: String::new(),
            metadata: metadata.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn new_name(&self) -> &str {
        &self.new_name
    }

    pub fn metadata(&self) -> &[MetadataEntry] {
        &self.metadata
    }

    pub fn template_context(&self) -> TemplateContext {
        build_context(&self.metadata)
    }

    pub(crate) fn shared_metadata(&self) -> Arc<[MetadataEntry]> {
        Arc::clone(&self.metadata)
    }

    pub(crate) fn set_new_name(&mut self, name: String) -> bool {
        if self.new_name == name {
            return false;
        }
        self.new_name = name;
        true
    }
}
