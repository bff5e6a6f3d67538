use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::{ComponentSpec, Project, ProjectSource};

/// Per-project file declaring the project's components.
pub const PROJECT_FILE: &str = ".agent-fleet.toml";

/// Directories never worth descending into while looking for projects.
const SKIPPED_DIRS: &[&str] = &["node_modules", "target", "vendor", "dist", "build", "venv"];

#[derive(Debug, Default, Deserialize)]
struct ProjectFile {
    #[serde(default, rename = "component")]
    components: Vec<ComponentSpec>,
}

/// Finds git repositories below the configured roots.
pub struct ProjectScanner {
    roots: Vec<PathBuf>,
    max_depth: usize,
}

impl ProjectScanner {
    pub fn new(roots: Vec<PathBuf>, max_depth: usize) -> Self {
        Self { roots, max_depth }
    }

    fn scan_root(&self, root: &Path, found: &mut BTreeMap<PathBuf, Project>) -> Result<()> {
        if !root.is_dir() {
            bail!("project root {} is not a directory", root.display());
        }

        let mut walker = WalkDir::new(root)
            .max_depth(self.max_depth)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped(e));

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(e).with_context(|| format!("failed to read {}", root.display()));
                }
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            if entry.file_type().is_dir() && entry.path().join(".git").exists() {
                let project = load_project(entry.path());
                found.insert(project.path.clone(), project);
                walker.skip_current_dir();
            }
        }
        Ok(())
    }
}

impl ProjectSource for ProjectScanner {
    fn scan(&self) -> Result<Vec<Project>> {
        let mut found = BTreeMap::new();
        for root in &self.roots {
            self.scan_root(root, &mut found)?;
        }
        Ok(found.into_values().collect())
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

fn load_project(path: &Path) -> Project {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Project {
        name,
        path: path.to_path_buf(),
        components: read_components(path),
        tasks: None,
        specs: None,
        research: None,
    }
}

/// A broken project file costs the project its components, not the scan.
fn read_components(project: &Path) -> Vec<ComponentSpec> {
    let file = project.join(PROJECT_FILE);
    let raw = match std::fs::read_to_string(&file) {
        Ok(raw) => raw,
        Err(_) => return Vec::new(),
    };
    match toml::from_str::<ProjectFile>(&raw) {
        Ok(parsed) => parsed.components,
        Err(e) => {
            warn!(file = %file.display(), error = %e, "ignoring malformed project file");
            Vec::new()
        }
    }
}
