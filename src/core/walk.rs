//! Artifact discovery: recursive filesystem walks filtered by glob patterns.

use crate::core::error::DriftguardError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Lazy, finite, non-restartable sequence of files under `roots` matching
/// `patterns`. Re-invoking `discover` repeats the filesystem walk.
///
/// A root may be a single file (matched against its file name) or a directory
/// (walked recursively, patterns matched against root-relative paths).
/// Unreadable entries and nonexistent roots are skipped, not errors.
pub struct Discovery {
    set: Option<GlobSet>,
    roots: VecDeque<PathBuf>,
    walker: Option<(PathBuf, walkdir::IntoIter)>,
}

pub fn discover(roots: &[PathBuf], patterns: &[String]) -> Result<Discovery, DriftguardError> {
    let set = if patterns.is_empty() {
        None
    } else {
        let mut builder = GlobSetBuilder::new();
        for pat in patterns {
            let glob = Glob::new(pat).map_err(|e| {
                DriftguardError::ValidationError(format!("invalid pattern {:?}: {}", pat, e))
            })?;
            builder.add(glob);
        }
        Some(builder.build().map_err(|e| {
            DriftguardError::ValidationError(format!("pattern set build failed: {}", e))
        })?)
    };
    Ok(Discovery {
        set,
        roots: roots.iter().cloned().collect(),
        walker: None,
    })
}

fn matches(set: &Option<GlobSet>, rel: &Path) -> bool {
    match set {
        None => true,
        Some(set) => set.is_match(rel),
    }
}

impl Iterator for Discovery {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            let set = &self.set;
            if let Some((root, iter)) = self.walker.as_mut() {
                match iter.next() {
                    Some(Ok(entry)) => {
                        if !entry.file_type().is_file() {
                            continue;
                        }
                        let path = entry.into_path();
                        let rel = path
                            .strip_prefix(root.as_path())
                            .unwrap_or(&path)
                            .to_path_buf();
                        if matches(set, &rel) {
                            return Some(path);
                        }
                        continue;
                    }
                    Some(Err(_)) => continue,
                    None => {
                        self.walker = None;
                        continue;
                    }
                }
            }
            let root = self.roots.pop_front()?;
            if root.is_file() {
                let name = root
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| root.clone());
                if matches(&self.set, &name) {
                    return Some(root);
                }
                continue;
            }
            if root.is_dir() {
                self.walker = Some((root.clone(), WalkDir::new(&root).into_iter()));
            }
        }
    }
}
