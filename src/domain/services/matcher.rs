//! Listing matcher (C3, spec §4.3).
//!
//! Applies a list of patterns to a flat file/dir listing for the current
//! prefix, recursing into subdirectories via the caller-supplied `list`
//! callback when a pattern has more than one `/`-separated segment.

use regex::Regex;

use crate::domain::models::RemoteFile;
use crate::error::{DownloadError, Result};

/// One round-trip abstraction so `matcher` doesn't depend on `Downloader`
/// directly: given a subdirectory path (relative to the downloader's root),
/// return its `(files, dirs)` listing.
#[async_trait::async_trait]
pub trait Lister: Send + Sync {
    async fn list(&mut self, subdir: &str) -> Result<(Vec<RemoteFile>, Vec<RemoteFile>)>;
}

/// Matches `patterns` against `files`/`dirs` at `prefix`, recursing through
/// `lister` as needed. `submatch` suppresses the `NoMatchError` on zero
/// matches (recursive calls never fail).
pub async fn match_patterns(
    lister: &mut dyn Lister,
    patterns: &[String],
    files: &[RemoteFile],
    dirs: &[RemoteFile],
    prefix: &str,
    submatch: bool,
) -> Result<Vec<RemoteFile>> {
    let mut matched = Vec::new();

    for pattern in patterns {
        let mut sub = match_one_pattern(lister, pattern, files, dirs, prefix).await?;
        matched.append(&mut sub);
    }

    if matched.is_empty() && !submatch {
        return Err(DownloadError::NoMatch);
    }

    Ok(matched)
}

fn match_one_pattern<'a>(
    lister: &'a mut dyn Lister,
    pattern: &'a str,
    files: &'a [RemoteFile],
    dirs: &'a [RemoteFile],
    prefix: &'a str,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<RemoteFile>>> + Send + 'a>> {
    Box::pin(async move {
        let mut segments: Vec<&str> = pattern.split('/').collect();
        if segments.first() == Some(&"^") {
            segments.remove(0);
        }

        let mut matched = Vec::new();

        if segments.len() == 1 {
            let re = Regex::new(segments[0])
                .map_err(|e| DownloadError::Config(format!("invalid pattern {:?}: {e}", segments[0])))?;
            for f in files {
                if re.is_match(&f.name) {
                    matched.push(rebased(f, prefix));
                }
            }
            return Ok(matched);
        }

        if pattern == "**/*" {
            for f in files {
                matched.push(rebased(f, prefix));
            }
            for d in dirs {
                let sub_prefix = format!("{prefix}/{}", d.name);
                let (sub_files, sub_dirs) = lister.list(&format!("{sub_prefix}/")).await?;
                let mut sub = match_one_pattern(lister, pattern, &sub_files, &sub_dirs, &sub_prefix).await?;
                matched.append(&mut sub);
            }
            return Ok(matched);
        }

        let head = segments[0];
        let rest = segments[1..].join("/");
        let re = Regex::new(head)
            .map_err(|e| DownloadError::Config(format!("invalid pattern {head:?}: {e}")))?;
        for d in dirs {
            if !re.is_match(&d.name) {
                continue;
            }
            let sub_prefix = format!("{prefix}/{}", d.name);
            let (sub_files, sub_dirs) = lister.list(&format!("{sub_prefix}/")).await?;
            let mut sub = match_one_pattern(lister, &rest, &sub_files, &sub_dirs, &sub_prefix).await?;
            matched.append(&mut sub);
        }

        Ok(matched)
    })
}

/// Rewrites `name` to include the accumulated prefix; `root` is left to the
/// caller to set to the downloader's root.
fn rebased(f: &RemoteFile, prefix: &str) -> RemoteFile {
    let mut out = f.clone();
    if prefix.is_empty() {
        out.name = f.name.clone();
    } else {
        out.name = format!("{}/{}", prefix.trim_start_matches('/'), f.name);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoListing;

    #[async_trait::async_trait]
    impl Lister for NoListing {
        async fn list(&mut self, _subdir: &str) -> Result<(Vec<RemoteFile>, Vec<RemoteFile>)> {
            Ok((vec![], vec![]))
        }
    }

    fn file(name: &str) -> RemoteFile {
        RemoteFile::new(name, "")
    }

    #[tokio::test]
    async fn single_segment_regex_matches_flat_files() {
        let files = vec![file("test.fasta"), file("test.fasta.gz"), file("test2.fasta")];
        let mut lister = NoListing;
        let matched = match_patterns(
            &mut lister,
            &[r"^test.*\.gz$".to_string()],
            &files,
            &[],
            "",
            false,
        )
        .await
        .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "test.fasta.gz");
    }

    #[tokio::test]
    async fn caret_prefix_is_dropped_before_split() {
        let files = vec![file("abc")];
        let mut lister = NoListing;
        let matched = match_patterns(&mut lister, &["^abc".to_string()], &files, &[], "", false)
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
    }

    #[tokio::test]
    async fn zero_matches_fails_outermost_only() {
        let mut lister = NoListing;
        let err = match_patterns(&mut lister, &["nope".to_string()], &[], &[], "", false)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::NoMatch));

        let ok = match_patterns(&mut lister, &["nope".to_string()], &[], &[], "", true)
            .await
            .unwrap();
        assert!(ok.is_empty());
    }

    #[tokio::test]
    async fn is_idempotent() {
        let files = vec![file("a.gz"), file("b.txt")];
        let mut l1 = NoListing;
        let mut l2 = NoListing;
        let patterns = vec![r".*\.gz$".to_string()];
        let once = match_patterns(&mut l1, &patterns, &files, &[], "", false).await.unwrap();
        let twice_a = match_patterns(&mut l2, &patterns, &files, &[], "", false).await.unwrap();
        let mut l3 = NoListing;
        let twice_b = match_patterns(&mut l3, &patterns, &files, &[], "", false).await.unwrap();
        assert_eq!(once, twice_a);
        assert_eq!(twice_a, twice_b);
    }
}
