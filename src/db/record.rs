//! # Catalog rows
//! The [`FileRecord`] row shape, the conversion [`Status`] values and the
//! [`Filter`] used to select rows for a run.
use std::{fmt, str::FromStr};

use chrono::{DateTime, Local};
use rusqlite::{
    Row,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef},
};
use thiserror::Error;

/// The conversion state of a catalog row.
///
/// Every value except `New` is terminal and is only ever assigned by the
/// serialized catalog writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Status {
    #[default]
    New,
    Accepted,
    Protected,
    Removed,
    Skipped,
    Converted,
    Failed,
    Timeout,
    Renamed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Accepted => "accepted",
            Self::Protected => "protected",
            Self::Removed => "removed",
            Self::Skipped => "skipped",
            Self::Converted => "converted",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Renamed => "renamed",
        }
    }

    /// Statuses which `--retry` re-attempts.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Timeout)
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::New)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("Unknown status: '{0}'")]
pub struct ParseStatusError(String);

impl FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "accepted" => Ok(Self::Accepted),
            "protected" => Ok(Self::Protected),
            "removed" => Ok(Self::Removed),
            "skipped" => Ok(Self::Skipped),
            "converted" => Ok(Self::Converted),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            "renamed" => Ok(Self::Renamed),
            _ => Err(ParseStatusError(s.into())),
        }
    }
}

impl ToSql for Status {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// One row of the conversion catalog.
///
/// `path` is relative to the source root for original records and to the
/// destination root for derived records (those with a `source_id`). `kept`
/// is tri-state: `Some(true)` means a usable artifact for this record exists
/// at `path` under the destination, `Some(false)` means the original has
/// been superseded, `None` means renamed or not yet decided.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub source_id: Option<i64>,
    pub mime: Option<String>,
    pub format: Option<String>,
    pub version: Option<String>,
    pub puid: Option<String>,
    pub encoding: Option<String>,
    pub size: Option<i64>,
    pub status: Status,
    pub kept: Option<bool>,
    pub status_ts: Option<DateTime<Local>>,
}

impl FileRecord {
    /// A fresh row for a file discovered at `path`, with identification
    /// still pending.
    pub fn new<S: Into<String>>(path: S) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn is_original(&self) -> bool {
        self.source_id.is_none()
    }

    /// Build a record from a row produced by `select_files.sql` column order.
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            path: row.get("path")?,
            source_id: row.get("source_id")?,
            mime: row.get("mime")?,
            format: row.get("format")?,
            version: row.get("version")?,
            puid: row.get("puid")?,
            encoding: row.get("encoding")?,
            size: row.get("size")?,
            status: row.get("status")?,
            kept: row.get("kept")?,
            status_ts: row.get("status_ts")?,
        })
    }
}

/// Row selection predicates, combined with AND. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub mime: Option<String>,
    pub puid: Option<String>,
    /// Path extension including the leading dot.
    pub ext: Option<String>,
    pub status: Option<Status>,
    /// Only records with an empty `source_id`.
    pub originals_only: bool,
    /// Only records past identification (`status != 'new'`).
    pub finished_only: bool,
    /// Only records still pending (`status = 'new'`).
    pub pending_only: bool,
    /// Only records `--retry` should re-attempt.
    pub retry: bool,
    /// Lexicographic path range `[from_path, to_path)`.
    pub from_path: Option<String>,
    pub to_path: Option<String>,
    /// Exclude rows already touched in the current run.
    pub before: Option<DateTime<Local>>,
}

impl Filter {
    /// Append a WHERE clause for this filter to `sql`, pushing the bound
    /// values onto `params` in matching order.
    pub fn push_sql(&self, sql: &mut String, params: &mut Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();

        if let Some(mime) = &self.mime {
            clauses.push("mime = ?".into());
            params.push(mime.clone().into());
        }
        if let Some(puid) = &self.puid {
            clauses.push("puid = ?".into());
            params.push(puid.clone().into());
        }
        if let Some(ext) = &self.ext {
            clauses.push("path LIKE ?".into());
            params.push(format!("%{ext}").into());
        }
        if self.retry {
            clauses.push("status IN ('failed', 'timeout')".into());
        } else if let Some(status) = self.status {
            clauses.push("status = ?".into());
            params.push(status.as_str().to_owned().into());
        } else if self.pending_only {
            clauses.push("status = 'new'".into());
        }
        if self.finished_only {
            clauses.push("status != 'new'".into());
        }
        if self.originals_only {
            clauses.push("source_id IS NULL".into());
        }
        if let Some(from) = &self.from_path {
            clauses.push("path >= ?".into());
            params.push(from.clone().into());
        }
        if let Some(to) = &self.to_path {
            clauses.push("path < ?".into());
            params.push(to.clone().into());
        }
        if let Some(before) = &self.before {
            // status_ts is stored as RFC 3339 text, which compares
            // lexicographically within a fixed UTC offset
            clauses.push("(status_ts IS NULL OR status_ts < ?)".into());
            params.push(before.to_rfc3339().into());
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            Status::New,
            Status::Accepted,
            Status::Protected,
            Status::Removed,
            Status::Skipped,
            Status::Converted,
            Status::Failed,
            Status::Timeout,
            Status::Renamed,
        ] {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("borked".parse::<Status>().is_err());
    }

    #[test]
    fn empty_filter_has_no_where() {
        let mut sql = String::from("SELECT * FROM Files");
        let mut params = Vec::new();
        Filter::default().push_sql(&mut sql, &mut params);
        assert_eq!(sql, "SELECT * FROM Files");
        assert!(params.is_empty());
    }

    #[test]
    fn filter_clauses_combine_with_and() {
        let filter = Filter {
            mime: Some("application/pdf".into()),
            ext: Some(".pdf".into()),
            pending_only: true,
            originals_only: true,
            from_path: Some("a/".into()),
            to_path: Some("a0".into()),
            ..Filter::default()
        };
        let mut sql = String::new();
        let mut params = Vec::new();
        filter.push_sql(&mut sql, &mut params);
        assert_eq!(
            sql,
            " WHERE mime = ? AND path LIKE ? AND status = 'new' \
             AND source_id IS NULL AND path >= ? AND path < ?"
        );
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn retry_supersedes_status() {
        let filter = Filter {
            status: Some(Status::Converted),
            retry: true,
            ..Filter::default()
        };
        let mut sql = String::new();
        let mut params = Vec::new();
        filter.push_sql(&mut sql, &mut params);
        assert_eq!(sql, " WHERE status IN ('failed', 'timeout')");
        assert!(params.is_empty());
    }
}
