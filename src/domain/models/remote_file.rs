//! `RemoteFile` — one remote artifact to list or transfer (spec §3).

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Metadata populated during `list()` and/or `download()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Path under `root`; leading `/` allowed, multiple `/` collapsed.
    pub name: String,
    /// Remote base directory; may be empty for direct downloaders.
    pub root: String,
    /// Local target path; defaults to `name` when unset.
    pub save_as: Option<String>,
    /// Fully-qualified source URL; recomputed from root+name if absent.
    pub url: Option<String>,

    pub size: Option<u64>,
    pub permissions: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub hash: Option<String>,
    pub md5: Option<String>,
    pub format: Option<String>,
    pub download_time: Option<f64>,

    pub param: HashMap<String, String>,
    pub error: bool,
}

impl RemoteFile {
    pub fn new(name: impl Into<String>, root: impl Into<String>) -> Self {
        RemoteFile {
            name: collapse_slashes(&name.into()),
            root: root.into(),
            ..Default::default()
        }
    }

    /// Local target path, falling back to `name` (mirrors `_append_file_to_download`).
    pub fn effective_save_as(&self) -> PathBuf {
        PathBuf::from(self.save_as.clone().unwrap_or_else(|| self.name.clone()))
    }

    /// `(name, year, month, day, size)` identity tuple used by the
    /// copy-or-download decider (§4.4).
    pub fn identity_tuple(&self) -> (String, Option<i32>, Option<u32>, Option<u32>, Option<u64>) {
        (self.name.clone(), self.year, self.month, self.day, self.size)
    }

    /// Local mtime implied by `(year, month, day)` at 00:00 local time.
    pub fn mtime(&self) -> Option<NaiveDateTime> {
        let (y, m, d) = (self.year?, self.month?, self.day?);
        NaiveDate::from_ymd_opt(y, m, d).map(|d| d.and_hms_opt(0, 0, 0).unwrap())
    }

    pub fn with_save_as(mut self, save_as: impl Into<String>) -> Self {
        self.save_as = Some(save_as.into());
        self
    }
}

/// Collapse runs of `/` and normalize a leading `/` out of a relative name,
/// matching `_append_file_to_download`'s `//+` cleanup.
pub fn collapse_slashes(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_slash = false;
    for c in name.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_repeated_slashes() {
        assert_eq!(collapse_slashes("a//b///c"), "a/b/c");
        assert_eq!(collapse_slashes("/a/b"), "/a/b");
    }

    #[test]
    fn save_as_defaults_to_name() {
        let f = RemoteFile::new("dir/file.txt", "/pub");
        assert_eq!(f.effective_save_as(), PathBuf::from("dir/file.txt"));
    }

    #[test]
    fn mtime_requires_all_three_fields() {
        let mut f = RemoteFile::new("x", "/pub");
        assert!(f.mtime().is_none());
        f.year = Some(2020);
        f.month = Some(1);
        f.day = Some(2);
        assert!(f.mtime().is_some());
    }
}
