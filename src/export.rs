//! CSV rendering of the user registry.
//!
//! Fields are quoted only when they contain a comma, a double quote or a line
//! break, with embedded quotes doubled, so any conforming CSV reader gets the
//! original values back.

use crate::db::UserRecord;
use anyhow::{Context, Result};
use std::path::Path;

pub const CSV_HEADER: &str = "user_id,first_name,username,first_seen";

const FIRST_SEEN_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

fn escape_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Renders `users` in the given order below the header row.
pub fn render_users_csv(users: &[UserRecord]) -> String {
    let mut content = String::with_capacity(CSV_HEADER.len() + 1 + users.len() * 48);
    content.push_str(CSV_HEADER);
    content.push('\n');

    for user in users {
        content.push_str(&format!(
            "{},{},{},{}\n",
            user.user_id,
            escape_field(user.first_name.as_deref().unwrap_or_default()),
            escape_field(user.username.as_deref().unwrap_or_default()),
            user.first_seen.format(FIRST_SEEN_FORMAT),
        ));
    }

    content
}

/// Writes the CSV to `path`, creating the parent directory when needed.
pub async fn write_users_csv(path: &Path, users: &[UserRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create export dir: {}", parent.display()))?;
        }
    }
    tokio::fs::write(path, render_users_csv(users))
        .await
        .with_context(|| format!("failed to write export: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn user(id: i64, first_name: Option<&str>, username: Option<&str>) -> UserRecord {
        UserRecord {
            user_id: id,
            first_name: first_name.map(str::to_string),
            username: username.map(str::to_string),
            first_seen: Utc.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap(),
        }
    }

    #[test]
    fn empty_export_is_header_only() {
        assert_eq!(render_users_csv(&[]), format!("{CSV_HEADER}\n"));
    }

    #[test]
    fn missing_names_render_empty() {
        let csv = render_users_csv(&[user(102, Some("Bo"), None), user(103, None, None)]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[1], "102,Bo,,2025-03-09 14:05:07.000");
        assert_eq!(lines[2], "103,,,2025-03-09 14:05:07.000");
    }

    #[test]
    fn delimiters_and_quotes_are_escaped() {
        let csv = render_users_csv(&[user(7, Some("Doe, \"JJ\""), Some("line\nbreak"))]);
        assert_eq!(
            csv,
            format!(
                "{CSV_HEADER}\n7,\"Doe, \"\"JJ\"\"\",\"line\nbreak\",2025-03-09 14:05:07.000\n"
            )
        );
    }

    #[tokio::test]
    async fn write_creates_parent_dir() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("exports").join("users.csv");
        write_users_csv(&path, &[user(1, Some("Ana"), Some("ana_u"))])
            .await
            .unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with(CSV_HEADER));
        assert!(written.contains("1,Ana,ana_u,"));
    }
}
