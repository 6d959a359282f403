//! Directory-listing formatting: the short (names-only) and detailed
//! (Unix-`ls -l`-like) flavors `LIST`/`NLST` produce.

use chrono::{DateTime, Utc};

/// One visible directory child, already past the hide/private gates.
#[derive(Debug, Clone)]
pub struct ListingEntry {
    /// File or directory name (not a full path).
    pub name: String,
    /// Whether this child is a directory.
    pub is_dir: bool,
    /// Owning user name, defaulted when no shadow entry exists.
    pub owner: String,
    /// Owning group name, defaulted when no shadow entry exists.
    pub group: String,
    /// Size in bytes; meaningless (reported `0`) for directories.
    pub size: u64,
    /// Last-modified time.
    pub modified: DateTime<Utc>,
}

/// Sorts entries by name, matching the source's `SortByName`.
pub fn sort_by_name(entries: &mut [ListingEntry]) {
    entries.sort_by(|a, b| a.name.cmp(&b.name));
}

/// The `NLST` flavor: just names, CRLF-separated.
pub fn format_short(entries: &[ListingEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry.name);
        out.push_str("\r\n");
    }
    out
}

fn mode_string(is_dir: bool) -> &'static str {
    if is_dir {
        "drwxrwxr-x"
    } else {
        "-rw-rw-r--"
    }
}

/// Right-justifies `value` within a 12-character field, left-padding with
/// spaces, matching the source's `lpad` helper.
fn pad_size(value: u64) -> String {
    format!("{value:>12}")
}

/// The `LIST` flavor: one `ls -l`-style line per entry.
pub fn format_detailed(entries: &[ListingEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let size = if entry.is_dir { 0 } else { entry.size };
        out.push_str(&format!(
            "{} 1 {} {} {} {} {}\r\n",
            mode_string(entry.is_dir),
            entry.owner,
            entry.group,
            pad_size(size),
            entry.modified.format("%b %e %H:%M"),
            entry.name,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(name: &str, is_dir: bool, size: u64) -> ListingEntry {
        ListingEntry {
            name: name.to_string(),
            is_dir,
            owner: "alice".to_string(),
            group: "staff".to_string(),
            size,
            modified: Utc.with_ymd_and_hms(2026, 1, 5, 3, 4, 0).unwrap(),
        }
    }

    #[test]
    fn short_listing_is_names_only() {
        let entries = vec![entry("b.txt", false, 5), entry("a", true, 0)];
        assert_eq!(format_short(&entries), "b.txt\r\na\r\n");
    }

    #[test]
    fn detailed_listing_right_justifies_size() {
        let entries = vec![entry("f.txt", false, 42)];
        let out = format_detailed(&entries);
        assert!(out.contains("          42 Jan"));
        assert!(out.starts_with("-rw-rw-r-- 1 alice staff"));
    }

    #[test]
    fn sort_is_by_name() {
        let mut entries = vec![entry("b", false, 0), entry("a", false, 0)];
        sort_by_name(&mut entries);
        assert_eq!(entries[0].name, "a");
    }
}
