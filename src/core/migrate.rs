// src/core/migrate.rs

//! Applies ordered, idempotent SQL migration files from an embedded source
//! or an on-disk directory.
//!
//! The statement splitter tracks dollar-quoted blocks (`$$…$$`, `$tag$…$tag$`),
//! quoted strings and line comments; a naive semicolon split would corrupt
//! function bodies.

use crate::core::errors::ColdStoreError;
use sqlx::PgPool;
use std::path::PathBuf;
use tracing::{debug, info};

/// The embedded migration set, in apply order. `001_complete_schema.sql`
/// is also reapplied verbatim by the restore service.
pub const EMBEDDED_MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_complete_schema.sql",
        include_str!("../../migrations/001_complete_schema.sql"),
    ),
    (
        "002_sync_indexes.sql",
        include_str!("../../migrations/002_sync_indexes.sql"),
    ),
];

/// Returns the embedded canonical schema.
pub fn canonical_schema() -> &'static str {
    EMBEDDED_MIGRATIONS[0].1
}

/// Where migration files come from.
pub enum MigrationSource {
    Embedded,
    Dir(PathBuf),
}

impl MigrationSource {
    async fn load(&self) -> Result<Vec<(String, String)>, ColdStoreError> {
        match self {
            MigrationSource::Embedded => Ok(EMBEDDED_MIGRATIONS
                .iter()
                .map(|(name, sql)| (name.to_string(), sql.to_string()))
                .collect()),
            MigrationSource::Dir(dir) => {
                let mut files = Vec::new();
                let mut read_dir = tokio::fs::read_dir(dir).await?;
                while let Some(entry) = read_dir.next_entry().await? {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.ends_with(".sql") {
                        let sql = tokio::fs::read_to_string(entry.path()).await?;
                        files.push((name, sql));
                    }
                }
                files.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(files)
            }
        }
    }
}

pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies every pending migration. A single failing statement aborts
    /// the run and the failing file is not recorded as applied.
    pub async fn run(&self, source: MigrationSource) -> Result<usize, ColdStoreError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                filename TEXT PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;

        let mut applied = 0usize;
        for (name, sql) in source.load().await? {
            // Files whose name mentions "reset" are destructive helpers for
            // development databases and are never applied automatically.
            if name.contains("reset") {
                debug!(file = %name, "skipping reset migration");
                continue;
            }
            let already: Option<(String,)> =
                sqlx::query_as("SELECT filename FROM schema_migrations WHERE filename = $1")
                    .bind(&name)
                    .fetch_optional(&self.pool)
                    .await?;
            if already.is_some() {
                continue;
            }

            info!(file = %name, "applying migration");
            for statement in split_statements(&sql) {
                sqlx::raw_sql(&statement)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| {
                        ColdStoreError::Migration(format!("{name}: {e}"))
                    })?;
            }
            sqlx::query("INSERT INTO schema_migrations (filename) VALUES ($1)")
                .bind(&name)
                .execute(&self.pool)
                .await?;
            applied += 1;
        }
        Ok(applied)
    }
}

/// Splits a migration file into statements at top-level semicolons.
///
/// Dollar-quoted blocks may legally contain `;`, as may quoted strings;
/// `--` comments run to end of line. Statements that are empty after
/// trimming are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut i = 0;
    let mut dollar_tag: Option<String> = None;

    while i < bytes.len() {
        let rest = &sql[i..];

        if let Some(tag) = &dollar_tag {
            if rest.starts_with(tag.as_str()) {
                current.push_str(tag);
                i += tag.len();
                dollar_tag = None;
            } else {
                let ch = rest.chars().next().expect("non-empty rest");
                current.push(ch);
                i += ch.len_utf8();
            }
            continue;
        }

        if rest.starts_with("--") {
            let line_end = rest.find('\n').map(|p| i + p + 1).unwrap_or(bytes.len());
            current.push_str(&sql[i..line_end]);
            i = line_end;
            continue;
        }

        if rest.starts_with('\'') {
            // Consume the quoted string, honouring '' escapes.
            let mut j = i + 1;
            while j < bytes.len() {
                if bytes[j] == b'\'' {
                    if bytes.get(j + 1) == Some(&b'\'') {
                        j += 2;
                        continue;
                    }
                    j += 1;
                    break;
                }
                j += 1;
            }
            current.push_str(&sql[i..j.min(bytes.len())]);
            i = j.min(bytes.len());
            continue;
        }

        if rest.starts_with('$') {
            if let Some(tag) = leading_dollar_tag(rest) {
                current.push_str(&tag);
                i += tag.len();
                dollar_tag = Some(tag);
                continue;
            }
        }

        if rest.starts_with(';') {
            let statement = current.trim().to_string();
            if !statement.is_empty() {
                statements.push(statement);
            }
            current.clear();
            i += 1;
            continue;
        }

        let ch = rest.chars().next().expect("non-empty rest");
        current.push(ch);
        i += ch.len_utf8();
    }

    let tail = current.trim().to_string();
    if !tail.is_empty() {
        statements.push(tail);
    }
    statements
}

/// Recognises a dollar-quote opener (`$$` or `$tag$`) at the start of the
/// input and returns it.
fn leading_dollar_tag(input: &str) -> Option<String> {
    let rest = input.strip_prefix('$')?;
    let end = rest.find('$')?;
    let tag_body = &rest[..end];
    if tag_body
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Some(format!("${tag_body}$"))
    } else {
        None
    }
}
