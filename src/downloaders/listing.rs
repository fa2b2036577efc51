//! Listing line parsers and hash/date helpers shared by the FTP, SFTP and
//! HTTP downloaders (spec §4.1, §4.1.1, §9 "Hash stability").

use chrono::{Datelike, NaiveDate};
use md5::{Digest, Md5};

use crate::domain::models::RemoteFile;

/// One parsed listing line, prior to year disambiguation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntry {
    pub name: String,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub size: Option<u64>,
    pub permissions: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub year: Option<i32>,
}

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

fn month_to_num(s: &str) -> Option<u32> {
    let lower = s.to_ascii_lowercase();
    MONTHS.iter().position(|m| *m == lower).map(|i| i as u32 + 1)
}

/// Parses one line of a Unix `ls -l`-style FTP LIST response. Returns `None`
/// if the line does not look like a listing row (fewer than 8 whitespace
/// fields).
pub fn parse_unix_ls_line(line: &str) -> Option<ParsedEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 8 {
        return None;
    }

    let permissions = fields[0].to_string();
    let is_dir = permissions.starts_with('d');

    // Unix listings commonly carry either 8 or 9 name-preceding fields
    // depending on whether group is repeated; the name begins at the last
    // field that isn't part of the fixed metadata prefix. We take the
    // canonical `perms links owner group size mon day (year|time) name...`
    // layout, which is what both proftpd and vsftpd emit.
    if fields.len() < 9 {
        return None;
    }
    let owner = fields[2].to_string();
    let group = fields[3].to_string();
    let size: Option<u64> = fields[4].parse().ok();
    let month = month_to_num(fields[5]);
    let day: Option<u32> = fields[6].parse().ok();
    let year_or_time = fields[7];
    let year: Option<i32> = year_or_time.parse().ok();

    let name_start_field = 8;
    let mut name = fields[name_start_field..].join(" ");
    let mut is_symlink = false;
    if let Some(idx) = name.find(" -> ") {
        is_symlink = true;
        name.truncate(idx);
    }

    Some(ParsedEntry {
        name,
        is_dir,
        is_symlink,
        size,
        permissions: Some(permissions),
        owner: Some(owner),
        group: Some(group),
        month,
        day,
        year,
    })
}

/// Parses one line of an MS-DOS-style FTP LIST response, e.g.
/// `10-23-19  02:14PM       <DIR>          pub` or
/// `10-23-19  02:14PM             123456 readme.txt`.
pub fn parse_msdos_line(line: &str) -> Option<ParsedEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return None;
    }
    let date_parts: Vec<&str> = fields[0].split('-').collect();
    if date_parts.len() != 3 {
        return None;
    }
    let month: u32 = date_parts[0].parse().ok()?;
    let day: u32 = date_parts[1].parse().ok()?;
    let mut year: i32 = date_parts[2].parse().ok()?;
    if year < 100 {
        year += 2000;
    }

    let is_dir = fields[3].eq_ignore_ascii_case("<dir>");
    let size = if is_dir { None } else { fields[3].parse().ok() };
    let name = fields[4..].join(" ");

    Some(ParsedEntry {
        name,
        is_dir,
        is_symlink: false,
        size,
        permissions: None,
        owner: None,
        group: None,
        month: Some(month),
        day: Some(day),
        year: Some(year),
    })
}

/// Parses a full LIST response, trying the Unix parser first and falling
/// back to the MS-DOS parser line by line.
pub fn parse_listing(text: &str) -> Vec<ParsedEntry> {
    parse_listing_with_raw(text).into_iter().map(|(_, entry)| entry).collect()
}

/// Same as `parse_listing`, but keeps each entry paired with the exact raw
/// line it came from (needed for hash stability — see `hash_ftp_line`).
/// Lines that don't parse as either listing style are silently dropped, so
/// the returned pairs stay aligned even when the server emits blank or
/// unparseable rows (e.g. a leading `total 24`).
pub fn parse_listing_with_raw(text: &str) -> Vec<(&str, ParsedEntry)> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| {
            parse_unix_ls_line(l)
                .or_else(|| parse_msdos_line(l))
                .map(|entry| (l, entry))
        })
        .collect()
}

/// FTP listing date disambiguation (spec §4.1.1): when the year is absent,
/// infer it from `(month, day)` relative to today.
pub fn disambiguate_year(month: u32, day: u32, today: NaiveDate) -> i32 {
    let cur_year = today.year();
    let cur_month = today.month();
    let cur_day = today.day();

    if month > cur_month || (month == cur_month && day > cur_day) {
        cur_year - 1
    } else {
        cur_year
    }
}

/// MD5 of the exact listing line bytes, with no unicode normalization —
/// required for hash stability across processes (spec §9).
pub fn hash_ftp_line(raw_line: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(raw_line);
    hex::encode(hasher.finalize())
}

/// Hash for HTTP/local entries: a pure function of `(name, date_string, size)`.
pub fn hash_http_entry(name: &str, date_string: &str, size: Option<u64>) -> String {
    let mut hasher = Md5::new();
    hasher.update(name.as_bytes());
    hasher.update(b"\0");
    hasher.update(date_string.as_bytes());
    hasher.update(b"\0");
    hasher.update(size.map(|s| s.to_string()).unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

/// Parses a human-readable size suffix (`K`, `M`, `G`, case-insensitive) as
/// used in HTML directory listings, e.g. `"4.2K"` -> `4300`.
pub fn parse_human_size(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || s == "-" {
        return None;
    }
    let (number_part, multiplier) = match s.chars().last() {
        Some('K') | Some('k') => (&s[..s.len() - 1], 1024u64),
        Some('M') | Some('m') => (&s[..s.len() - 1], 1024 * 1024),
        Some('G') | Some('g') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    number_part.trim().parse::<f64>().ok().map(|n| (n * multiplier as f64) as u64)
}

/// Converts a parsed listing entry into a `RemoteFile`, applying year
/// disambiguation when the year is missing.
pub fn entry_to_remote_file(entry: &ParsedEntry, raw_line: &str, today: NaiveDate) -> RemoteFile {
    let mut f = RemoteFile::new(&entry.name, "");
    f.size = entry.size;
    f.permissions = entry.permissions.clone();
    f.owner = entry.owner.clone();
    f.group = entry.group.clone();
    f.month = entry.month;
    f.day = entry.day;
    f.year = match (entry.year, entry.month, entry.day) {
        (Some(y), _, _) => Some(y),
        (None, Some(m), Some(d)) => Some(disambiguate_year(m, d, today)),
        _ => None,
    };
    f.hash = Some(hash_ftp_line(raw_line.as_bytes()));
    f
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disambiguates_future_month_to_previous_year() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        assert_eq!(disambiguate_year(12, 1, today), 2025);
        assert_eq!(disambiguate_year(1, 1, today), 2026);
    }

    #[test]
    fn disambiguates_same_month_later_day_to_previous_year() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        assert_eq!(disambiguate_year(3, 20, today), 2025);
        assert_eq!(disambiguate_year(3, 10, today), 2026);
        assert_eq!(disambiguate_year(3, 15, today), 2026);
    }

    #[test]
    fn hash_is_pure_function_of_line_bytes() {
        let a = hash_ftp_line(b"-rw-r--r-- 1 ftp ftp 123 Jan 01 2020 readme.txt");
        let b = hash_ftp_line(b"-rw-r--r-- 1 ftp ftp 123 Jan 01 2020 readme.txt");
        assert_eq!(a, b);
        let c = hash_ftp_line(b"-rw-r--r-- 1 ftp ftp 124 Jan 01 2020 readme.txt");
        assert_ne!(a, c);
    }

    #[test]
    fn parses_unix_listing_line() {
        let line = "-rw-r--r--   1 ftp      ftp        123456 Jan 05 2019 readme.txt";
        let entry = parse_unix_ls_line(line).unwrap();
        assert_eq!(entry.name, "readme.txt");
        assert_eq!(entry.size, Some(123456));
        assert_eq!(entry.month, Some(1));
        assert_eq!(entry.day, Some(5));
        assert_eq!(entry.year, Some(2019));
        assert!(!entry.is_dir);
    }

    #[test]
    fn parses_unix_directory_line() {
        let line = "drwxr-xr-x   4 ftp      ftp          4096 Jun 12 2021 pub";
        let entry = parse_unix_ls_line(line).unwrap();
        assert!(entry.is_dir);
        assert_eq!(entry.name, "pub");
    }

    #[test]
    fn parses_symlink_line() {
        let line = "lrwxrwxrwx   1 ftp      ftp            11 Jun 12 2021 latest -> release_5";
        let entry = parse_unix_ls_line(line).unwrap();
        assert!(entry.is_symlink);
        assert_eq!(entry.name, "latest");
    }

    #[test]
    fn parses_msdos_line() {
        let entry = parse_msdos_line("10-23-19  02:14PM       <DIR>          pub").unwrap();
        assert!(entry.is_dir);
        assert_eq!(entry.name, "pub");
        assert_eq!(entry.year, Some(2019));

        let entry = parse_msdos_line("10-23-19  02:14PM             123456 readme.txt").unwrap();
        assert!(!entry.is_dir);
        assert_eq!(entry.size, Some(123456));
    }

    #[test]
    fn parses_human_size_suffixes() {
        assert_eq!(parse_human_size("4.2K"), Some(4300));
        assert_eq!(parse_human_size("1M"), Some(1024 * 1024));
        assert_eq!(parse_human_size("-"), None);
        assert_eq!(parse_human_size("512"), Some(512));
    }
}
