use crate::error::MoveError;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub const PLACEHOLDER: char = '#';
pub const MAX_SEQUENCE: u32 = 99_999;

#[derive(Debug, Clone, Copy)]
pub struct CollisionSafeMover {
    max_sequence: u32,
}

impl Default for CollisionSafeMover {
    fn default() -> Self {
        Self {
            max_sequence: MAX_SEQUENCE,
        }
    }
}

impl CollisionSafeMover {
    pub fn with_max_sequence(max_sequence: u32) -> Self {
        Self { max_sequence }
    }

    pub fn move_file(&self, original: &Path, target_pattern: &str) -> Result<PathBuf, MoveError> {
        let directory = original.parent().unwrap_or_else(|| Path::new("."));
        let invalid_name = |name: &str| MoveError::InvalidName {
            path: original.to_path_buf(),
            name: name.to_string(),
        };
        if !is_plain_file_name(target_pattern) {
            return Err(invalid_name(target_pattern));
        }

        let Some(run) = placeholder_run(target_pattern) else {
            let destination = directory.join(target_pattern);
            if path_exists(&destination) {
                return Err(MoveError::AlreadyExists {
                    path: original.to_path_buf(),
                    destination,
                });
            }
            move_no_clobber(original, &destination)?;
            return Ok(destination);
        };

        let width = run.len();
        for sequence in 1..=self.max_sequence {
            let name = target_pattern.replace(run, &format!("{sequence:0width$}"));
            if !is_plain_file_name(&name) {
                return Err(invalid_name(&name));
            }
            let destination = directory.join(name);
            if path_exists(&destination) {
                continue;
            }
            move_no_clobber(original, &destination)?;
            return Ok(destination);
        }

        Err(MoveError::ExhaustedSequence {
            path: original.to_path_buf(),
            pattern: target_pattern.to_string(),
        })
    }
}

// A single normal component can only name an entry directly inside the
// directory it is joined to.
pub fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => part == OsStr::new(name),
        _ => false,
    }
}

fn placeholder_run(pattern: &str) -> Option<&str> {
    let start = pattern.find(PLACEHOLDER)?;
    let len = pattern[start..]
        .chars()
        .take_while(|ch| *ch == PLACEHOLDER)
        .count();
    Some(&pattern[start..start + len * PLACEHOLDER.len_utf8()])
}

fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

// `hard_link` fails atomically when the destination exists, which a plain
// `rename` would overwrite.
fn move_no_clobber(from: &Path, to: &Path) -> Result<(), MoveError> {
    let io_error = |source: io::Error| MoveError::Io {
        path: from.to_path_buf(),
        destination: to.to_path_buf(),
        source,
    };

    match fs::hard_link(from, to) {
        Ok(()) => {
            if let Err(err) = fs::remove_file(from) {
                let _ = fs::remove_file(to);
                return Err(io_error(err));
            }
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(MoveError::AlreadyExists {
            path: from.to_path_buf(),
            destination: to.to_path_buf(),
        }),
        Err(err) => {
            debug!(error = %err, "ハードリンクを作成できないためrenameで移動します");
            if path_exists(to) {
                return Err(MoveError::AlreadyExists {
                    path: from.to_path_buf(),
                    destination: to.to_path_buf(),
                });
            }
            fs::rename(from, to).map_err(io_error)
        }
    }
}
