//! Startup reconciliation: diff the filesystem against the repository's
//! recorded file list.

use crate::cancel::CancellationToken;
use crate::model::now_unix;
use crate::repository::IndexRepository;
use crate::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

pub struct Scanner {
    project_root: PathBuf,
    repository: Arc<dyn IndexRepository>,
}

impl Scanner {
    pub fn new(project_root: PathBuf, repository: Arc<dyn IndexRepository>) -> Self {
        Self { project_root, repository }
    }

    pub fn scan(&self, token: &CancellationToken, accept: &dyn Fn(&str) -> bool) -> Result<ScanDiff> {
        let mut recorded: HashMap<String, u64> = self.repository.list_files(token)?.into_iter().collect();

        let mut added = Vec::new();
        let mut modified = Vec::new();
        let mut seen = std::collections::HashSet::new();

        walk(&self.project_root, &self.project_root, &mut |rel, mtime| {
            if !accept(&rel) {
                return;
            }
            seen.insert(rel.clone());
            match recorded.get(&rel) {
                None => added.push(rel),
                Some(&recorded_mtime) if mtime > recorded_mtime => modified.push(rel),
                Some(_) => {}
            }
        });

        let deleted: Vec<String> = recorded
            .drain()
            .filter(|(path, _)| !seen.contains(path))
            .map(|(path, _)| path)
            .collect();

        Ok(ScanDiff { added, modified, deleted })
    }
}

fn walk(root: &Path, dir: &Path, visit: &mut dyn FnMut(String, u64)) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        let rel = match path.strip_prefix(root) {
            Ok(r) => r.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if rel == crate::ignore::STATE_DIR_NAME {
            continue;
        }
        let Ok(file_type) = entry.file_type() else { continue };
        if file_type.is_dir() {
            walk(root, &path, visit);
        } else if file_type.is_file() {
            let mtime = std::fs::metadata(&path)
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or_else(now_unix);
            visit(rel, mtime);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    #[test]
    fn detects_added_modified_and_deleted() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.go"), "a").unwrap();
        std::fs::write(dir.path().join("b.go"), "b").unwrap();

        let repo = Arc::new(InMemoryRepository::new());
        let token = CancellationToken::new();
        // Record each file's *actual* current mtime, so only the later touch
        // to b.go (below) should register as a modification.
        let a_mtime = std::fs::metadata(dir.path().join("a.go")).unwrap().modified().unwrap();
        let a_mtime = a_mtime.duration_since(std::time::UNIX_EPOCH).unwrap().as_secs();
        repo.insert_file(&token, "a.go", "h", "go", 1, a_mtime).unwrap();
        repo.insert_file(&token, "b.go", "h", "go", 1, a_mtime).unwrap();

        // Touch b.go so its mtime strictly exceeds the recorded one.
        let future = SystemTime::now() + Duration::from_secs(5);
        let f = std::fs::File::create(dir.path().join("b.go")).unwrap();
        f.set_modified(future).unwrap();
        std::fs::write(dir.path().join("c.go"), "c").unwrap();

        let scanner = Scanner::new(dir.path().to_path_buf(), repo);
        let diff = scanner.scan(&token, &|_| true).unwrap();

        assert_eq!(diff.added, vec!["c.go".to_string()]);
        assert_eq!(diff.modified, vec!["b.go".to_string()]);
        assert!(diff.deleted.is_empty());
    }

    #[test]
    fn result_sets_are_disjoint_and_cover_the_union() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("only_fs.go"), "x").unwrap();

        let repo = Arc::new(InMemoryRepository::new());
        let token = CancellationToken::new();
        repo.insert_file(&token, "only_repo.go", "h", "go", 1, 0).unwrap();

        let scanner = Scanner::new(dir.path().to_path_buf(), repo);
        let diff = scanner.scan(&token, &|_| true).unwrap();

        assert_eq!(diff.added, vec!["only_fs.go".to_string()]);
        assert_eq!(diff.deleted, vec!["only_repo.go".to_string()]);
        assert!(diff.modified.is_empty());

        let mut all: Vec<&String> = diff.added.iter().chain(diff.modified.iter()).chain(diff.deleted.iter()).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 2);
    }
}
