use anyhow::{Context, Result};
use ignore::WalkBuilder;
use std::path::Path;
use std::time::UNIX_EPOCH;

use super::{DocStats, StatsReader, TaskStats};

const TASK_FILES: &[&str] = &["TODO.md", "TASKS.md", "tasks.md"];
const SPEC_DIRS: &[&str] = &["specs"];
const RESEARCH_DIRS: &[&str] = &["research", "reports"];

/// Reads project statistics straight from the working tree.
#[derive(Debug, Default)]
pub struct FsStatsReader;

impl StatsReader for FsStatsReader {
    /// Markdown checkboxes in the first task file found.
    fn task_stats(&self, project: &Path) -> Result<Option<TaskStats>> {
        let Some(file) = TASK_FILES
            .iter()
            .map(|name| project.join(name))
            .find(|path| path.is_file())
        else {
            return Ok(None);
        };

        let content = std::fs::read_to_string(&file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        Ok(Some(count_checkboxes(&content)))
    }

    fn spec_stats(&self, project: &Path) -> Result<Option<DocStats>> {
        doc_stats(project, SPEC_DIRS)
    }

    fn research_stats(&self, project: &Path) -> Result<Option<DocStats>> {
        doc_stats(project, RESEARCH_DIRS)
    }
}

fn count_checkboxes(content: &str) -> TaskStats {
    let mut stats = TaskStats { open: 0, done: 0 };
    for line in content.lines() {
        let line = line.trim_start();
        let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) else {
            continue;
        };
        if rest.starts_with("[ ]") {
            stats.open += 1;
        } else if rest.starts_with("[x]") || rest.starts_with("[X]") {
            stats.done += 1;
        }
    }
    stats
}

/// Markdown files under whichever of `dirs` exist, honouring `.gitignore`.
fn doc_stats(project: &Path, dirs: &[&str]) -> Result<Option<DocStats>> {
    let mut present = dirs.iter().map(|d| project.join(d)).filter(|d| d.is_dir());
    let Some(first) = present.next() else {
        return Ok(None);
    };

    let mut builder = WalkBuilder::new(&first);
    for dir in present {
        builder.add(dir);
    }

    let mut stats = DocStats {
        files: 0,
        latest: None,
    };
    for entry in builder.build() {
        let entry = entry.context("failed to walk document directory")?;
        let is_markdown = entry.path().extension().is_some_and(|ext| ext == "md");
        if !entry.file_type().is_some_and(|t| t.is_file()) || !is_markdown {
            continue;
        }

        stats.files += 1;
        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        stats.latest = stats.latest.max(modified);
    }
    Ok(Some(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_count_checkboxes() {
        let content = "# Tasks\n- [ ] write docs\n- [x] ship it\n  * [X] nested done\n- plain item\n* [ ] star open\n";
        assert_eq!(count_checkboxes(content), TaskStats { open: 2, done: 2 });
    }

    #[test]
    fn test_task_stats_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(FsStatsReader.task_stats(dir.path()).unwrap(), None);
    }

    #[test]
    fn test_task_stats_reads_todo() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("TASKS.md"), "- [ ] one\n- [x] two\n").unwrap();
        assert_eq!(
            FsStatsReader.task_stats(dir.path()).unwrap(),
            Some(TaskStats { open: 1, done: 1 })
        );
    }

    #[test]
    fn test_doc_stats_counts_markdown() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("specs/api")).unwrap();
        fs::write(dir.path().join("specs/overview.md"), "# Overview").unwrap();
        fs::write(dir.path().join("specs/api/auth.md"), "# Auth").unwrap();
        fs::write(dir.path().join("specs/diagram.png"), [0u8; 4]).unwrap();
        fs::create_dir_all(dir.path().join("reports")).unwrap();
        fs::write(dir.path().join("reports/week1.md"), "done").unwrap();

        let specs = FsStatsReader.spec_stats(dir.path()).unwrap().unwrap();
        assert_eq!(specs.files, 2);
        assert!(specs.latest.is_some());

        let research = FsStatsReader.research_stats(dir.path()).unwrap().unwrap();
        assert_eq!(research.files, 1);
    }

    #[test]
    fn test_doc_stats_absent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(FsStatsReader.spec_stats(dir.path()).unwrap(), None);
    }
}
