//! Project discovery: turn a directory into a [`ProjectSnapshot`]

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path};

use anyhow::{Context, Result};
use codelens_core::{ProjectFile, ProjectSnapshot};

/// Source files picked up when no `--pattern` is given.
pub const DEFAULT_PATTERNS: &[&str] = &[
    "**/*.rs", "**/*.py", "**/*.js", "**/*.jsx", "**/*.ts", "**/*.tsx", "**/*.go", "**/*.java",
    "**/*.kt", "**/*.rb", "**/*.php", "**/*.c", "**/*.h", "**/*.cpp", "**/*.cs", "**/*.swift",
];

/// Directories never descended into.
const SKIP_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    "dist",
    "build",
    "vendor",
    ".venv",
    "__pycache__",
];

fn skipped(relative: &Path) -> bool {
    relative.components().any(|c| match c {
        Component::Normal(name) => SKIP_DIRS.iter().any(|skip| name == *skip),
        _ => false,
    })
}

/// Project id derived from the directory name: `[A-Za-z0-9._-]`, never empty.
pub fn project_id_for(root: &Path) -> String {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let id: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if id.is_empty() {
        "project".to_string()
    } else {
        id
    }
}

/// Walk `root` with glob patterns and load files up to `max_bytes` each.
///
/// Larger files are listed with their size but no content.
pub fn snapshot(
    root: &Path,
    patterns: &[String],
    max_bytes: u64,
    project_id: Option<String>,
) -> Result<ProjectSnapshot> {
    let root = root
        .canonicalize()
        .with_context(|| format!("cannot open project directory {}", root.display()))?;

    let mut seen = BTreeSet::new();
    let mut files = Vec::new();

    for pattern in patterns {
        let full = format!(
            "{}/{}",
            glob::Pattern::escape(&root.to_string_lossy()),
            pattern
        );
        let entries = glob::glob(&full)
            .with_context(|| format!("invalid pattern '{}'", pattern))?;

        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable path");
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }

            let relative = path.strip_prefix(&root).unwrap_or(&path);
            if skipped(relative) {
                continue;
            }
            let relative = relative.to_string_lossy().replace('\\', "/");
            if !seen.insert(relative.clone()) {
                continue;
            }

            let size = fs::metadata(&path)
                .with_context(|| format!("cannot stat {}", path.display()))?
                .len();
            let mut file = ProjectFile::new(relative, size);
            if size <= max_bytes {
                match fs::read_to_string(&path) {
                    Ok(content) => file = file.with_content(content),
                    // Binary or non-UTF-8
                    Err(e) => tracing::debug!(path = %path.display(), error = %e, "Content not loaded"),
                }
            }
            files.push(file);
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::info!(root = %root.display(), files = files.len(), "Discovered project files");

    let mut snapshot = ProjectSnapshot::new(
        project_id.unwrap_or_else(|| project_id_for(&root)),
        files,
    );
    snapshot.name = root.file_name().map(|n| n.to_string_lossy().to_string());
    snapshot.root = Some(root);
    Ok(snapshot)
}
