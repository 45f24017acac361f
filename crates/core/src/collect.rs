use crate::normalizer::is_supported_image;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectStats {
    pub scanned_files: usize,
    pub accepted: usize,
    pub skipped_hidden: usize,
    pub skipped_unsupported: usize,
}

pub fn collect_image_files<P: AsRef<Path>>(
    inputs: &[P],
    recursive: bool,
    include_hidden: bool,
) -> Result<(Vec<PathBuf>, CollectStats)> {
    let mut stats = CollectStats::default();
    let mut out = Vec::new();

    for input in inputs {
        let input = input.as_ref();
        let meta = fs::metadata(input)
            .with_context(|| format!("入力パスが存在しません: {}", input.display()))?;
        if meta.is_dir() {
            collect_dir(input, recursive, include_hidden, &mut stats, &mut out)?;
        } else {
            stats.scanned_files += 1;
            stats.accepted += 1;
            out.push(input.to_path_buf());
        }
    }

    Ok((out, stats))
}

fn collect_dir(
    root: &Path,
    recursive: bool,
    include_hidden: bool,
    stats: &mut CollectStats,
    out: &mut Vec<PathBuf>,
) -> Result<()> {
    if recursive {
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| include_hidden || entry.depth() == 0 || !is_hidden(entry.path()));
        for entry in walker {
            let entry =
                entry.with_context(|| format!("フォルダ走査に失敗しました: {}", root.display()))?;
            if entry.file_type().is_dir() {
                continue;
            }
            accept(entry.path(), include_hidden, stats, out);
        }
        return Ok(());
    }

    let mut files = Vec::new();
    for entry in
        fs::read_dir(root).with_context(|| format!("フォルダを読めませんでした: {}", root.display()))?
    {
        let entry = entry.with_context(|| format!("エントリ読み取り失敗: {}", root.display()))?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        files.push(path);
    }
    files.sort();
    for path in files {
        accept(&path, include_hidden, stats, out);
    }
    Ok(())
}

fn accept(path: &Path, include_hidden: bool, stats: &mut CollectStats, out: &mut Vec<PathBuf>) {
    stats.scanned_files += 1;
    if is_hidden(path) && !include_hidden {
        stats.skipped_hidden += 1;
        return;
    }
    if !is_supported_image(path) {
        stats.skipped_unsupported += 1;
        return;
    }
    stats.accepted += 1;
    out.push(path.to_path_buf());
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}
