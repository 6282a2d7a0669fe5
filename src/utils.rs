//! Small helpers shared by the binary and the library.

use crate::error::Result;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string for logging.
///
/// Keeps at most `max` bytes, backing off to the nearest char boundary, and
/// appends `"…(+N bytes)"` with the number of bytes dropped.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Turn an external key (feed guid, permalink) into a path-safe id fragment.
///
/// Every run of characters other than ASCII letters, digits and `_` becomes
/// a single `-`; leading and trailing dashes are dropped. Case is kept so
/// distinct keys stay distinct.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify_key("https://example.com/post?id=7"), "https-example-com-post-id-7");
/// assert_eq!(slugify_key("twir-600"), "twir-600");
/// ```
pub fn slugify_key(key: &str) -> String {
    let mut slug = String::with_capacity(key.len());
    for c in key.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes an empty marker file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).await?;
    let marker = path.join(".write-check");
    fs::write(&marker, b"").await?;
    let _ = fs::remove_file(&marker).await;
    info!("Storage directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        assert_eq!(truncate_for_log("Hello, world!", 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.ends_with("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_multibyte() {
        // 'é' is two bytes; byte 3 falls inside the second one.
        assert_eq!(truncate_for_log("éééé", 3), "é…(+6 bytes)");
    }

    #[test]
    fn test_slugify_key() {
        assert_eq!(slugify_key("https://example.com/post"), "https-example-com-post");
        assert_eq!(slugify_key("twir-600"), "twir-600");
        assert_eq!(slugify_key("  /a//B_c/ "), "a-B_c");
        assert_eq!(slugify_key("///"), "");
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data/tech");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        let mut entries = fs::read_dir(&nested).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
