// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Template Catalog
 * Enumerates template files beneath roots, globs and explicit paths
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod filter;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub use filter::{PathFilter, TagFilter};

const TEMPLATE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

fn is_template_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TEMPLATE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        warn!(dir = %dir.display(), "cannot read template directory");
        return;
    };
    let mut entries: Vec<_> = entries.flatten().map(|e| e.path()).collect();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            walk(&path, out);
        } else if is_template_file(&path) {
            out.push(path);
        }
    }
}

/// Enumerate template files for the given roots. A root may be an
/// explicit file, a directory (walked recursively) or a glob pattern.
/// The returned list is ordered and deduplicated.
pub fn enumerate(roots: &[String]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for root in roots {
        let path = Path::new(root);
        if path.is_file() {
            found.push(path.to_path_buf());
            continue;
        }
        if path.is_dir() {
            walk(path, &mut found);
            continue;
        }
        match glob::glob(root) {
            Ok(matches) => {
                for entry in matches.flatten() {
                    if entry.is_dir() {
                        walk(&entry, &mut found);
                    } else if is_template_file(&entry) {
                        found.push(entry);
                    }
                }
            }
            Err(e) => warn!(root = root.as_str(), "bad template root: {}", e),
        }
    }

    let mut seen = HashSet::new();
    let templates: Vec<PathBuf> = found
        .into_iter()
        .filter(|path| {
            let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
            seen.insert(canonical)
        })
        .collect();
    debug!(count = templates.len(), "enumerated templates");
    templates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerate_directory_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.yaml"), "x").unwrap();
        std::fs::write(dir.path().join("sub/b.yml"), "x").unwrap();
        std::fs::write(dir.path().join("sub/c.json"), "x").unwrap();
        std::fs::write(dir.path().join("README.md"), "x").unwrap();

        let found = enumerate(&[dir.path().display().to_string()]);
        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|p| is_template_file(p)));
    }

    #[test]
    fn test_explicit_file_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("probe.yaml");
        std::fs::write(&file, "x").unwrap();

        let found = enumerate(&[
            file.display().to_string(),
            dir.path().display().to_string(),
        ]);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_glob_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.yaml"), "x").unwrap();
        std::fs::write(dir.path().join("two.yaml"), "x").unwrap();
        std::fs::write(dir.path().join("three.json"), "x").unwrap();

        let pattern = format!("{}/*.yaml", dir.path().display());
        let found = enumerate(&[pattern]);
        assert_eq!(found.len(), 2);
    }
}
