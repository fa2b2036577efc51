//! Copy-or-download decider (C4, spec §4.4).

use std::path::Path;

use crate::domain::models::RemoteFile;

pub struct Split {
    pub files_to_copy: Vec<RemoteFile>,
    pub files_to_download: Vec<RemoteFile>,
}

/// Splits `files_to_download` into entries that can be copied/hardlinked
/// from `local_inventory` (identity tuple unchanged) and entries that still
/// need a network transfer. Copied entries get `root` rewritten to
/// `local_root`.
///
/// The identity-tuple comparison against `local_inventory` always runs,
/// regardless of `check_exists` (mirrors the original
/// `if not check_exists or os.path.exists(...)` gate — `check_exists=False`
/// means *skip the on-disk probe*, not *skip the split*). When
/// `check_exists` is true, a tuple match is additionally required to have a
/// real file at `local_root/name` before it's moved to `files_to_copy`; a
/// match with no file on disk falls back to `files_to_download`.
pub fn download_or_copy(
    files_to_download: &[RemoteFile],
    local_inventory: &[RemoteFile],
    local_root: &str,
    check_exists: bool,
) -> Split {
    let mut files_to_copy = Vec::new();
    let mut files_to_download_out = Vec::new();

    for f in files_to_download {
        let local_match = local_inventory
            .iter()
            .find(|local| local.identity_tuple() == f.identity_tuple());

        let eligible = match local_match {
            Some(_) if check_exists => Path::new(local_root).join(f.name.trim_start_matches('/')).exists(),
            Some(_) => true,
            None => false,
        };

        if eligible {
            let mut copy = f.clone();
            copy.root = local_root.to_string();
            files_to_copy.push(copy);
        } else {
            files_to_download_out.push(f.clone());
        }
    }

    Split {
        files_to_copy,
        files_to_download: files_to_download_out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64) -> RemoteFile {
        let mut f = RemoteFile::new(name, "/remote");
        f.size = Some(size);
        f
    }

    /// spec §8 scenario 5: `check_exists=false` still runs the identity-tuple
    /// split — it only skips the on-disk existence probe, not the split.
    #[test]
    fn check_exists_false_still_splits_on_the_identity_tuple() {
        let to_download = vec![file("/a", 10), file("/b", 10), file("/c", 10), file("/d", 10)];
        let inventory = vec![file("/a", 10), file("/b", 20), file("/c", 10)];

        let split = download_or_copy(&to_download, &inventory, "/local", false);

        let copy_names: Vec<_> = split.files_to_copy.iter().map(|f| f.name.clone()).collect();
        let download_names: Vec<_> = split.files_to_download.iter().map(|f| f.name.clone()).collect();

        assert_eq!(copy_names, vec!["/a", "/c"]);
        assert_eq!(download_names, vec!["/b", "/d"]);
        assert!(split.files_to_copy.iter().all(|f| f.root == "/local"));
    }

    #[test]
    fn check_exists_true_additionally_requires_the_file_on_disk() {
        let local = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("a"), b"content").unwrap();
        // "/c" matches the identity tuple but was never actually written to
        // the local cache directory (e.g. a stale inventory entry).

        let to_download = vec![file("/a", 10), file("/c", 10)];
        let inventory = vec![file("/a", 10), file("/c", 10)];

        let split = download_or_copy(&to_download, &inventory, local.path().to_str().unwrap(), true);

        let copy_names: Vec<_> = split.files_to_copy.iter().map(|f| f.name.clone()).collect();
        let download_names: Vec<_> = split.files_to_download.iter().map(|f| f.name.clone()).collect();

        assert_eq!(copy_names, vec!["/a"]);
        assert_eq!(download_names, vec!["/c"]);
    }
}
