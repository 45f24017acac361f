use crate::template::CompileError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("メタデータ読み込み対象を開けませんでした: {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("EXIFを解析できませんでした: {}", path.display())]
    Exif {
        path: PathBuf,
        #[source]
        source: exif::Error,
    },
}

#[derive(Debug, Error)]
pub enum MoveError {
    #[error("リネーム先のファイルが既に存在します: {}", destination.display())]
    AlreadyExists { path: PathBuf, destination: PathBuf },
    #[error("ファイル名に使えない名前です: {name}")]
    InvalidName { path: PathBuf, name: String },
    #[error("空いている連番がありません (1〜99999): {pattern}")]
    ExhaustedSequence { path: PathBuf, pattern: String },
    #[error("リネームに失敗しました: {} -> {}", path.display(), destination.display())]
    Io {
        path: PathBuf,
        destination: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MoveError {
    pub fn path(&self) -> &Path {
        match self {
            MoveError::AlreadyExists { path, .. }
            | MoveError::InvalidName { path, .. }
            | MoveError::ExhaustedSequence { path, .. }
            | MoveError::Io { path, .. } => path,
        }
    }
}

#[derive(Debug, Error)]
pub enum RenameError {
    #[error("新しいファイル名が空のファイルがあります: {count}件")]
    IncompleteNames { count: usize },
    #[error("テンプレートが不正です: {0}")]
    InvalidTemplate(CompileError),
    #[error(transparent)]
    Move(#[from] MoveError),
    #[error("別のリネーム処理が実行中です")]
    Busy,
    #[error("バックグラウンド処理が異常終了しました: {0}")]
    Worker(String),
}

impl RenameError {
    pub fn path(&self) -> Option<&Path> {
        match self {
            RenameError::Move(err) => Some(err.path()),
            _ => None,
        }
    }
}
