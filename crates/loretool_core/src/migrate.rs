use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::store::RecordStoreWrite;

const PREVIEW_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct StatementResult {
    pub index: usize,
    pub preview: String,
}

/// Report returned after replaying a SQL file against the store.
#[derive(Debug, Clone, Serialize)]
pub struct SqlRunReport {
    pub statements: usize,
    pub executed: usize,
    pub results: Vec<StatementResult>,
    pub request_count: usize,
}

/// Split a SQL script on `;`, trimming whitespace and dropping empty
/// fragments. Deliberately naive: the migration files this replays contain no
/// literals with embedded semicolons.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// First 100 characters of a statement, for progress output.
pub fn statement_preview(statement: &str) -> String {
    let flattened = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= PREVIEW_LIMIT {
        return flattened;
    }
    let mut preview: String = flattened.chars().take(PREVIEW_LIMIT).collect();
    preview.push_str("...");
    preview
}

/// Replay a SQL file statement by statement through the store's `exec_sql`
/// RPC. Unlike slug writes, a statement failure is fatal: later statements
/// usually depend on earlier ones, so the run aborts at the first error.
pub fn run_sql_file<S: RecordStoreWrite>(store: &mut S, path: &Path) -> Result<SqlRunReport> {
    let sql = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    run_sql(store, &sql)
}

pub fn run_sql<S: RecordStoreWrite>(store: &mut S, sql: &str) -> Result<SqlRunReport> {
    let statements = split_sql_statements(sql);
    let mut report = SqlRunReport {
        statements: statements.len(),
        executed: 0,
        results: Vec::new(),
        request_count: 0,
    };

    for (index, statement) in statements.iter().enumerate() {
        let preview = statement_preview(statement);
        store.execute_sql(statement).with_context(|| {
            format!(
                "statement {}/{} failed: {preview}",
                index + 1,
                report.statements
            )
        })?;
        report.executed += 1;
        report.results.push(StatementResult {
            index: index + 1,
            preview,
        });
    }

    report.request_count = store.request_count();
    Ok(report)
}
