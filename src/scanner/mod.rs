pub mod types;

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};

use crate::tree::{DirTree, Entry, NodeId, ReadState};
pub use types::{ScanOptions, ScanReport};

/// Scan a directory tree from the local file system.
///
/// Runs a FIFO queue of directory read jobs on the calling thread, driving the
/// tree through the mutation protocol: a job is counted before its directory
/// is listed, children are inserted as they are discovered, and the job is
/// retired (and the level finalized) when the listing ends. A listing failure
/// marks that directory `Error` and moves on; siblings and ancestors keep
/// their partial results.
pub fn scan_path(path: &Path, options: &ScanOptions) -> Result<(DirTree, ScanReport)> {
    let start = Instant::now();
    let meta = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if !meta.is_dir() {
        bail!("not a directory: {}", path.display());
    }

    let root_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());

    let (_, mode, mtime, root_dev) = stat_fields(&meta);
    let mut tree = DirTree::new(Entry::dir(&root_name, mode, mtime));
    let root = tree.root();
    tracing::info!("Scanning {}", path.display());

    let mut report = ScanReport::default();
    let mut queue: VecDeque<(NodeId, PathBuf, u64)> = VecDeque::new();
    tree.read_job_added(root);
    queue.push_back((root, path.to_path_buf(), root_dev));

    while let Some((dir_id, dir_path, dir_dev)) = queue.pop_front() {
        tree.set_read_state(dir_id, ReadState::Reading);
        read_one_dir(
            &mut tree,
            dir_id,
            &dir_path,
            dir_dev,
            options,
            &mut queue,
            &mut report,
        );
    }

    tree.finalize_all(root);
    report.elapsed_ms = start.elapsed().as_millis() as u64;
    tracing::info!(
        "Scan completed: {} dirs, {} files, {} errors in {} ms",
        report.dirs_read,
        report.files_seen,
        report.errors,
        report.elapsed_ms
    );
    Ok((tree, report))
}

fn read_one_dir(
    tree: &mut DirTree,
    dir_id: NodeId,
    dir_path: &Path,
    dir_dev: u64,
    options: &ScanOptions,
    queue: &mut VecDeque<(NodeId, PathBuf, u64)>,
    report: &mut ScanReport,
) {
    let entries = match fs::read_dir(dir_path) {
        Ok(rd) => rd,
        Err(e) => {
            tracing::warn!("Cannot read {}: {}", dir_path.display(), e);
            report.errors += 1;
            tree.set_read_state(dir_id, ReadState::Error);
            tree.read_job_finished(dir_id);
            tree.finalize_local(dir_id);
            return;
        }
    };

    for dirent in entries {
        let dirent = match dirent {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("Bad entry in {}: {}", dir_path.display(), e);
                report.errors += 1;
                continue;
            }
        };
        // DirEntry::metadata does not follow symlinks; a symlink to a
        // directory is recorded as a plain entry, not descended into.
        let meta = match dirent.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Cannot stat {}: {}", dirent.path().display(), e);
                report.errors += 1;
                continue;
            }
        };
        let name = dirent.file_name().to_string_lossy().to_string();
        let (blocks, mode, mtime, dev) = stat_fields(&meta);

        if !meta.is_dir() {
            tree.insert_child(dir_id, Entry::file(&name, meta.len(), blocks, mode, mtime));
            report.files_seen += 1;
            continue;
        }

        let child = tree.insert_child(dir_id, Entry::dir(&name, mode, mtime));

        if options.exclude.iter().any(|x| x == &name) {
            tracing::debug!("Excluding {}", dirent.path().display());
            tree.set_excluded(child, true);
            tree.set_read_state(child, ReadState::Finished);
            continue;
        }

        if dev != dir_dev {
            tree.set_mount_point(child, true);
            if !options.cross_filesystems {
                tracing::debug!("Not crossing mount point {}", dirent.path().display());
                tree.set_read_state(child, ReadState::Finished);
                continue;
            }
        }

        tree.read_job_added(child);
        queue.push_back((child, dirent.path(), dev));
    }

    report.dirs_read += 1;
    tree.read_job_finished(dir_id);
    tree.finalize_local(dir_id);
}

#[cfg(unix)]
fn stat_fields(meta: &fs::Metadata) -> (u64, u32, i64, u64) {
    use std::os::unix::fs::MetadataExt;
    (meta.blocks(), meta.mode(), meta.mtime(), meta.dev())
}

#[cfg(not(unix))]
fn stat_fields(meta: &fs::Metadata) -> (u64, u32, i64, u64) {
    use std::time::UNIX_EPOCH;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let mode = if meta.is_dir() { 0o40755 } else { 0o100644 };
    (meta.len().div_ceil(512), mode, mtime, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_builds_finished_tree_with_correct_totals() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("a.txt"), vec![0u8; 100]).unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/b.txt"), vec![0u8; 250]).unwrap();

        let (mut tree, report) = scan_path(root, &ScanOptions::default()).unwrap();
        let r = tree.root();

        assert!(tree.is_finished(r));
        assert!(!tree.is_busy(r));
        assert_eq!(tree.read_state(r), ReadState::Finished);
        assert_eq!(tree.total_size(r), 350);
        assert_eq!(tree.total_files(r), 2);
        assert_eq!(tree.total_sub_dirs(r), 1);
        assert_eq!(report.dirs_read, 2);
        assert_eq!(report.files_seen, 2);
        assert_eq!(report.errors, 0);
    }

    #[test]
    fn finalization_leaves_no_stray_dot_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("top.txt"), b"x").unwrap();
        fs::create_dir(root.join("only_files")).unwrap();
        fs::write(root.join("only_files/f"), b"yy").unwrap();
        fs::create_dir(root.join("empty")).unwrap();

        let (tree, _) = scan_path(root, &ScanOptions::default()).unwrap();
        let r = tree.root();

        // root has subdirs, so its file stays separated in a dot entry
        let dot = tree.dot_entry(r).expect("root keeps its dot entry");
        assert_eq!(tree.children(dot).count(), 1);

        for child in tree.children(r).collect::<Vec<_>>() {
            if tree.get(child).is_dir() {
                // no subdirs below these, so dot entries were merged or dropped
                assert!(tree.dot_entry(child).is_none());
            }
        }
    }

    #[test]
    fn excluded_directory_is_flagged_and_not_descended() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir(root.join("skipme")).unwrap();
        fs::write(root.join("skipme/huge.bin"), vec![0u8; 4096]).unwrap();
        fs::write(root.join("small.txt"), vec![0u8; 10]).unwrap();

        let options = ScanOptions {
            exclude: vec!["skipme".into()],
            ..ScanOptions::default()
        };
        let (mut tree, report) = scan_path(root, &options).unwrap();
        let r = tree.root();

        let skipped = tree
            .children(r)
            .find(|&c| tree.get(c).name == "skipme")
            .expect("excluded dir stays visible");
        assert!(tree.is_excluded(skipped));
        assert_eq!(tree.total_size(r), 10);
        assert_eq!(tree.total_sub_dirs(r), 0);
        assert_eq!(report.dirs_read, 1);
    }

    #[test]
    fn scan_of_missing_path_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let gone = tmp.path().join("does-not-exist");
        assert!(scan_path(&gone, &ScanOptions::default()).is_err());
    }

    #[test]
    fn scan_of_a_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let f = tmp.path().join("plain");
        fs::write(&f, b"data").unwrap();
        assert!(scan_path(&f, &ScanOptions::default()).is_err());
    }
}
