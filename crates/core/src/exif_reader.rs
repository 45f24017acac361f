use crate::error::MetadataError;
use crate::metadata::{MetadataReader, RawTag};
use chrono::{DateTime, Local};
use exif::{Context, Exif, Field, In, Reader};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExifMetadataReader;

impl MetadataReader for ExifMetadataReader {
    fn read_tags(&self, path: &Path) -> Result<Vec<RawTag>, MetadataError> {
        let mut tags = read_exif_tags(path)?;
        tags.extend(read_file_tags(path)?);
        Ok(tags)
    }
}

fn read_exif_tags(path: &Path) -> Result<Vec<RawTag>, MetadataError> {
    let file = File::open(path).map_err(|source| MetadataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut buf = BufReader::new(file);
    let exif = match Reader::new().read_from_container(&mut buf) {
        Ok(exif) => exif,
        // A container without an EXIF block still has file-level metadata.
        Err(exif::Error::NotFound(_)) => return Ok(Vec::new()),
        Err(source) => {
            return Err(MetadataError::Exif {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    Ok(exif
        .fields()
        .map(|field| RawTag {
            directory: directory_name(field),
            name: field
                .tag
                .description()
                .map(|_| field.tag.to_string()),
            description: describe(field, &exif),
        })
        .collect())
}

fn read_file_tags(path: &Path) -> Result<Vec<RawTag>, MetadataError> {
    let meta = fs::metadata(path).map_err(|source| MetadataError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tags = Vec::with_capacity(3);
    if let Some(name) = path.file_name() {
        tags.push(RawTag::new("File", "File Name", name.to_string_lossy()));
    }
    tags.push(RawTag::new(
        "File",
        "File Size",
        format!("{} bytes", meta.len()),
    ));
    if let Ok(modified) = meta.modified() {
        let local: DateTime<Local> = modified.into();
        tags.push(RawTag::new(
            "File",
            "File Modified Date",
            local.format("%Y:%m:%d %H:%M:%S").to_string(),
        ));
    }
    Ok(tags)
}

fn directory_name(field: &Field) -> String {
    match field.tag.context() {
        Context::Tiff if field.ifd_num == In::THUMBNAIL => "Exif Thumbnail".to_string(),
        Context::Tiff if field.ifd_num == In::PRIMARY => "Exif IFD0".to_string(),
        Context::Exif => "Exif SubIFD".to_string(),
        Context::Gps => "GPS".to_string(),
        Context::Interop => "Interoperability".to_string(),
        _ => format!("Exif IFD{}", field.ifd_num.index()),
    }
}

fn describe(field: &Field, exif: &Exif) -> Option<String> {
    let mut out = String::new();
    write!(out, "{}", field.display_value().with_unit(exif)).ok()?;
    let trimmed = out.trim().trim_matches('"').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
