use crate::error::MetadataError;
use crate::metadata::{MetadataEntry, MetadataReader, RawTag};
use crate::record::FileRecord;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff"];

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

#[derive(Clone)]
pub struct MetadataNormalizer {
    reader: Arc<dyn MetadataReader>,
}

impl MetadataNormalizer {
    pub fn new(reader: Arc<dyn MetadataReader>) -> Self {
        Self { reader }
    }

    pub fn normalize(&self, path: &Path) -> Result<FileRecord, MetadataError> {
        let absolute = std::path::absolute(path).map_err(|source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let tags = self.reader.read_tags(&absolute)?;
        let entries = normalize_tags(&absolute, tags);
        debug!(path = %absolute.display(), entries = entries.len(), "メタデータを読み込みました");
        Ok(FileRecord::new(absolute, entries))
    }
}

pub fn normalize_tags(path: &Path, tags: Vec<RawTag>) -> Vec<MetadataEntry> {
    let mut seen = HashSet::<String>::new();
    let mut entries = Vec::with_capacity(tags.len() + 1);

    for tag in tags {
        let Some(name) = tag.name else {
            continue;
        };
        let Some(description) = tag.description else {
            continue;
        };
        let entry = MetadataEntry::new(&tag.directory, &name, description);
        if entry.directory.is_empty() || entry.name.is_empty() {
            continue;
        }
        if seen.insert(entry.qualified_name()) {
            entries.push(entry);
        }
    }

    if !seen.contains("File.Extension") {
        let extension = path
            .extension()
            .map(|v| v.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        entries.push(MetadataEntry::new("File", "Extension", extension));
    }

    entries.sort_by(|a, b| {
        a.directory
            .cmp(&b.directory)
            .then_with(|| a.name.cmp(&b.name))
    });
    entries
}
