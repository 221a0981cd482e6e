//! # Schema Bootstrap
//!
//! Brings the local schema in line with the script served by the backend
//! (`GET /database/schema`). There are no versioned migrations: the script
//! is written to be re-runnable and is applied as a whole every time.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Schema Bootstrap                                 │
//! │                                                                         │
//! │  script (given)  ─or─  SchemaSource::fetch_schema()                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  clean_script → split_statements                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  FAST PATH: BEGIN; <whole script>; COMMIT                              │
//! │       │ ok → done                                                       │
//! │       │ error → ROLLBACK                                                │
//! │       ▼                                                                 │
//! │  FALLBACK: batches of N statements, each in its own transaction        │
//! │       ├── DROP … / "already exists" / "no such …" → ignored            │
//! │       ├── connection lost → reconnect, statement retried once          │
//! │       ├── anything else   → critical, recorded, keep going             │
//! │       └── batch COMMIT failed → ROLLBACK, statements re-run one by one │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  critical errors? → DbError::SchemaApply { failures }                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{BootstrapSettings, RetryPolicy};
use crate::connection::{ConnectionGuard, ConnectionManager};
use crate::error::{DbError, DbResult};
use crate::executor::retry_on_lock;

// =============================================================================
// Schema Source
// =============================================================================

/// Body of the schema endpoint.
///
/// A missing `success` flag or a missing `sql` body is a hard failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SchemaResponse {
    /// Successful response carrying `sql`.
    pub fn ok(sql: impl Into<String>) -> Self {
        SchemaResponse {
            success: Some(true),
            sql: Some(sql.into()),
            ..Default::default()
        }
    }

    /// Parses the raw JSON body.
    pub fn from_json(body: &str) -> DbResult<Self> {
        serde_json::from_str(body)
            .map_err(|e| DbError::SchemaFetch(format!("malformed schema response: {e}")))
    }

    /// Extracts the script, turning every non-success shape into an error.
    pub fn into_script(self) -> DbResult<String> {
        match (self.success, self.sql) {
            (Some(true), Some(sql)) if !sql.trim().is_empty() => Ok(sql),
            (Some(true), _) => Err(DbError::SchemaFetch(
                "schema response carried no SQL".to_string(),
            )),
            (Some(false), _) => Err(DbError::SchemaFetch(
                self.error
                    .or(self.message)
                    .unwrap_or_else(|| "backend reported failure".to_string()),
            )),
            (None, _) => Err(DbError::SchemaFetch(
                "schema response has no success flag".to_string(),
            )),
        }
    }
}

/// Collaborator that fetches the schema script from the backend.
///
/// The HTTP client lives outside this crate and is injected here.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn fetch_schema(&self) -> DbResult<SchemaResponse>;
}

/// A schema source that always serves the same script.
#[derive(Debug, Clone)]
pub struct StaticSchema {
    sql: String,
}

impl StaticSchema {
    pub fn new(sql: impl Into<String>) -> Self {
        StaticSchema { sql: sql.into() }
    }
}

#[async_trait]
impl SchemaSource for StaticSchema {
    async fn fetch_schema(&self) -> DbResult<SchemaResponse> {
        Ok(SchemaResponse::ok(self.sql.clone()))
    }
}

// =============================================================================
// Report Types
// =============================================================================

/// Which strategy applied the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPath {
    FastPath,
    Fallback,
}

/// Outcome of a successful bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub path: BootstrapPath,
    /// Statements found in the script.
    pub statements: usize,
    pub applied: usize,
    /// Statements whose errors were expected and skipped.
    pub ignored: usize,
    /// Informational message from the schema endpoint, if any.
    pub message: Option<String>,
}

/// A statement that failed for a reason other than existing schema state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementFailure {
    /// 0-based position in the script.
    pub index: usize,
    pub statement: String,
    pub message: String,
}

impl fmt::Display for StatementFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "statement {} ({}): {}",
            self.index + 1,
            preview(&self.statement),
            self.message
        )
    }
}

fn preview(statement: &str) -> String {
    const MAX: usize = 60;
    let line = statement.lines().next().unwrap_or_default().trim();
    if line.chars().count() > MAX {
        format!("{}…", line.chars().take(MAX).collect::<String>())
    } else {
        line.to_string()
    }
}

// =============================================================================
// Script Parsing
// =============================================================================

/// Removes `--` and `/* */` comments and blank lines. Quoted text is kept.
pub fn clean_script(script: &str) -> String {
    let mut out = String::with_capacity(script.len());
    let mut chars = script.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(q) = quote {
            out.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }

        match ch {
            '\'' | '"' | '`' => {
                quote = Some(ch);
                out.push(ch);
            }
            '-' if chars.peek() == Some(&'-') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(ch),
        }
    }

    out.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splits a cleaned script into statements on top-level `;`.
///
/// Semicolons inside quotes and inside `CREATE TRIGGER … BEGIN … END`
/// bodies do not split.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut word = String::new();
    let mut head: Vec<String> = Vec::with_capacity(3);
    let mut quote: Option<char> = None;
    let mut depth = 0usize;

    for ch in script.chars() {
        if let Some(q) = quote {
            current.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }

        if ch.is_ascii_alphanumeric() || ch == '_' {
            word.push(ch);
            current.push(ch);
            continue;
        }

        flush_word(&mut word, &mut head, &mut depth);

        match ch {
            '\'' | '"' | '`' => {
                quote = Some(ch);
                current.push(ch);
            }
            ';' if depth == 0 => {
                push_statement(&mut statements, &mut current);
                head.clear();
            }
            _ => current.push(ch),
        }
    }

    flush_word(&mut word, &mut head, &mut depth);
    push_statement(&mut statements, &mut current);
    statements
}

fn flush_word(word: &mut String, head: &mut Vec<String>, depth: &mut usize) {
    if word.is_empty() {
        return;
    }
    let upper = word.to_ascii_uppercase();
    word.clear();

    if head.len() < 3 {
        head.push(upper.clone());
    }
    if !is_trigger_head(head) {
        return;
    }

    match upper.as_str() {
        "BEGIN" => *depth += 1,
        "CASE" if *depth > 0 => *depth += 1,
        "END" if *depth > 0 => *depth -= 1,
        _ => {}
    }
}

fn is_trigger_head(head: &[String]) -> bool {
    match head {
        [create, trigger, ..] if create == "CREATE" && trigger == "TRIGGER" => true,
        [create, temp, trigger] if create == "CREATE" && trigger == "TRIGGER" => {
            temp == "TEMP" || temp == "TEMPORARY"
        }
        _ => false,
    }
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}

fn first_keyword(statement: &str) -> String {
    statement
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

fn is_drop_statement(statement: &str) -> bool {
    first_keyword(statement) == "DROP"
}

/// The fallback owns transaction boundaries; script-level ones are skipped.
fn is_transaction_control(statement: &str) -> bool {
    matches!(
        first_keyword(statement).as_str(),
        "BEGIN" | "COMMIT" | "END" | "ROLLBACK"
    )
}

// =============================================================================
// Bootstrapper
// =============================================================================

enum Outcome {
    Applied,
    Ignored,
    Failed(StatementFailure),
    Lost(StatementFailure),
}

#[derive(Debug, Default)]
struct Tally {
    applied: usize,
    ignored: usize,
    failures: Vec<StatementFailure>,
}

impl Tally {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Applied => self.applied += 1,
            Outcome::Ignored => self.ignored += 1,
            Outcome::Failed(failure) | Outcome::Lost(failure) => self.failures.push(failure),
        }
    }

    fn merge(&mut self, other: Tally) {
        self.applied += other.applied;
        self.ignored += other.ignored;
        self.failures.extend(other.failures);
    }
}

fn classify_outcome(index: usize, statement: &str, result: DbResult<u64>) -> Outcome {
    let failure = |err: &DbError| StatementFailure {
        index,
        statement: statement.to_string(),
        message: err.to_string(),
    };

    match result {
        Ok(_) => Outcome::Applied,
        Err(e) if e.is_connection_lost() => Outcome::Lost(failure(&e)),
        Err(e) if e.is_transient_lock() => {
            error!(index, error = %e, "Schema statement still locked after retries");
            Outcome::Failed(failure(&e))
        }
        Err(e) if is_drop_statement(statement) || e.is_ignorable_schema_error() => {
            warn!(index, error = %e, "Ignoring schema statement error");
            Outcome::Ignored
        }
        Err(e) => {
            error!(index, error = %e, "Schema statement failed");
            Outcome::Failed(failure(&e))
        }
    }
}

/// Applies a schema script to the managed connection.
pub struct SchemaBootstrapper {
    manager: Arc<ConnectionManager>,
    settings: BootstrapSettings,
    retry: RetryPolicy,
    source: Option<Arc<dyn SchemaSource>>,
}

impl SchemaBootstrapper {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        let settings = manager.config().bootstrap;
        let retry = manager.config().retry;
        SchemaBootstrapper {
            manager,
            settings,
            retry,
            source: None,
        }
    }

    /// Sets where the script comes from when none is passed in.
    pub fn with_source(mut self, source: Arc<dyn SchemaSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Ensures the schema exists.
    ///
    /// ## Arguments
    /// * `script` - SQL to apply; fetched from the [`SchemaSource`] when `None`
    ///
    /// ## Returns
    /// * `Ok(BootstrapReport)` - every statement applied or ignorable
    /// * `Err(DbError::SchemaApply)` - one entry per critical statement
    /// * `Err(DbError::SchemaFetch)` - no script could be obtained
    pub async fn bootstrap(&self, script: Option<&str>) -> DbResult<BootstrapReport> {
        let (script, message) = match script {
            Some(script) => (script.to_string(), None),
            None => self.fetch().await?,
        };

        let cleaned = clean_script(&script);
        let statements = split_statements(&cleaned);
        if statements.is_empty() {
            return Err(DbError::SchemaFetch(
                "schema script contains no statements".to_string(),
            ));
        }

        info!(statements = statements.len(), "Applying schema");

        match self.apply_fast(&cleaned).await {
            Ok(()) => {
                info!(statements = statements.len(), "Schema applied in one transaction");
                return Ok(BootstrapReport {
                    path: BootstrapPath::FastPath,
                    statements: statements.len(),
                    applied: statements.len(),
                    ignored: 0,
                    message,
                });
            }
            Err(e) => warn!(error = %e, "Fast schema path failed, falling back to batches"),
        }

        self.apply_batched(&statements, message).await
    }

    async fn fetch(&self) -> DbResult<(String, Option<String>)> {
        let source = self.source.as_ref().ok_or_else(|| {
            DbError::SchemaFetch("no schema script given and no schema source configured".into())
        })?;

        debug!("Fetching schema from backend");
        let response = source.fetch_schema().await?;
        let message = response.message.clone();
        let script = response.into_script()?;
        Ok((script, message))
    }

    async fn apply_fast(&self, script: &str) -> DbResult<()> {
        retry_on_lock(&self.retry, || async move {
            let mut guard = self.manager.acquire().await?;
            guard.exec("BEGIN").await?;

            let applied = match guard.exec(script).await {
                Ok(_) => guard.exec("COMMIT").await.map(|_| ()),
                Err(e) => Err(e),
            };

            if applied.is_err() {
                if let Err(e) = guard.exec("ROLLBACK").await {
                    debug!(error = %e, "Rollback after failed fast path");
                }
            }
            applied
        })
        .await
    }

    async fn apply_batched(
        &self,
        statements: &[String],
        message: Option<String>,
    ) -> DbResult<BootstrapReport> {
        let batch_size = self.settings.batch_size.max(1);
        let batches = statements.len().div_ceil(batch_size);
        let delay = self.settings.batch_delay();
        let mut tally = Tally::default();

        for (number, chunk) in statements.chunks(batch_size).enumerate() {
            debug!(batch = number + 1, batches, "Applying schema batch");
            let batch = self.apply_batch(number * batch_size, chunk).await?;
            tally.merge(batch);

            if number + 1 < batches && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        if !tally.failures.is_empty() {
            error!(
                failures = tally.failures.len(),
                applied = tally.applied,
                "Schema bootstrap finished with critical errors"
            );
            return Err(DbError::SchemaApply {
                failures: tally.failures,
            });
        }

        info!(
            applied = tally.applied,
            ignored = tally.ignored,
            "Schema applied in batches"
        );
        Ok(BootstrapReport {
            path: BootstrapPath::Fallback,
            statements: statements.len(),
            applied: tally.applied,
            ignored: tally.ignored,
            message,
        })
    }

    /// One batch inside one transaction; one-by-one if the transaction fails.
    async fn apply_batch(&self, base: usize, chunk: &[String]) -> DbResult<Tally> {
        let mut guard = self.manager.acquire().await?;

        // IMMEDIATE takes the write lock up front, so statements inside the
        // batch never meet a competing writer.
        if let Err(e) = guard.exec_with_retry("BEGIN IMMEDIATE", &self.retry).await {
            warn!(error = %e, "Could not open batch transaction, applying one by one");
            return apply_individually(&mut guard, &self.retry, base, chunk).await;
        }

        let mut tally = Tally::default();
        let mut intact = true;

        for (offset, statement) in chunk.iter().enumerate() {
            let index = base + offset;
            if is_transaction_control(statement) {
                tally.record(Outcome::Ignored);
                continue;
            }

            let result = guard.exec_with_retry(statement, &self.retry).await;
            match classify_outcome(index, statement, result) {
                Outcome::Lost(failure) => {
                    // The open transaction died with the handle.
                    warn!(index, error = %failure.message, "Connection lost inside batch");
                    intact = false;
                    break;
                }
                outcome => tally.record(outcome),
            }
        }

        if intact {
            match guard.exec_with_retry("COMMIT", &self.retry).await {
                Ok(_) => return Ok(tally),
                Err(e) => warn!(error = %e, "Batch commit failed, applying one by one"),
            }
        }

        if let Err(e) = guard.exec("ROLLBACK").await {
            debug!(error = %e, "Rollback of failed batch");
        }
        apply_individually(&mut guard, &self.retry, base, chunk).await
    }
}

/// Runs each statement in autocommit mode, reconnecting once per statement.
async fn apply_individually(
    guard: &mut ConnectionGuard<'_>,
    retry: &RetryPolicy,
    base: usize,
    chunk: &[String],
) -> DbResult<Tally> {
    let mut tally = Tally::default();

    for (offset, statement) in chunk.iter().enumerate() {
        let index = base + offset;
        if is_transaction_control(statement) {
            tally.record(Outcome::Ignored);
            continue;
        }

        let result = guard.exec_with_retry(statement, retry).await;
        let mut outcome = classify_outcome(index, statement, result);
        if matches!(outcome, Outcome::Lost(_)) {
            warn!(index, "Connection lost, retrying statement on a new connection");
            guard.reconnect().await?;
            let result = guard.exec_with_retry(statement, retry).await;
            outcome = classify_outcome(index, statement, result);
        }
        tally.record(outcome);
    }

    Ok(tally)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::executor::SqlExecutor;

    fn manager() -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(DbConfig::in_memory()))
    }

    async fn table_names(manager: &Arc<ConnectionManager>) -> Vec<String> {
        SqlExecutor::new(Arc::clone(manager))
            .query_all::<(String,)>(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await
            .unwrap()
            .into_iter()
            .map(|(name,)| name)
            .collect()
    }

    struct FailingSource;

    #[async_trait]
    impl SchemaSource for FailingSource {
        async fn fetch_schema(&self) -> DbResult<SchemaResponse> {
            Ok(SchemaResponse {
                success: Some(false),
                error: Some("schema service in maintenance".to_string()),
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_clean_script() {
        let script = "
            -- users table
            CREATE TABLE a (id INTEGER); /* trailing */

            INSERT INTO a VALUES ('--not a comment');
        ";
        let cleaned = clean_script(script);
        assert!(!cleaned.contains("users table"));
        assert!(!cleaned.contains("trailing"));
        assert!(cleaned.contains("'--not a comment'"));
        assert!(cleaned.lines().all(|line| !line.trim().is_empty()));
    }

    #[test]
    fn test_split_simple_and_quoted() {
        let statements =
            split_statements("CREATE TABLE a (x TEXT);\nINSERT INTO a VALUES ('x;y');\nSELECT 1");
        assert_eq!(
            statements,
            vec![
                "CREATE TABLE a (x TEXT)",
                "INSERT INTO a VALUES ('x;y')",
                "SELECT 1",
            ]
        );
    }

    #[test]
    fn test_split_keeps_trigger_bodies_whole() {
        let script = "
            CREATE TABLE a (id INTEGER, kind TEXT);
            CREATE TRIGGER IF NOT EXISTS trg_a AFTER INSERT ON a BEGIN
                UPDATE a SET kind = CASE WHEN NEW.id > 1 THEN 'many' ELSE 'one' END WHERE id = NEW.id;
                DELETE FROM a WHERE id < 0;
            END;
            CREATE TEMP TRIGGER trg_b AFTER DELETE ON a BEGIN SELECT 1; END;
            CREATE INDEX idx_a ON a (kind);
        ";
        let statements = split_statements(&clean_script(script));
        assert_eq!(statements.len(), 4);
        assert!(statements[1].starts_with("CREATE TRIGGER"));
        assert!(statements[1].ends_with("END"));
        assert!(statements[2].starts_with("CREATE TEMP TRIGGER"));
        assert!(statements[3].starts_with("CREATE INDEX"));
    }

    #[test]
    fn test_reference_schema_splits_cleanly() {
        let statements = split_statements(&clean_script(crate::SCHEMA_SQL));
        assert_eq!(statements.len(), 8);

        let trigger = statements
            .iter()
            .find(|s| s.starts_with("CREATE TRIGGER"))
            .unwrap();
        assert!(trigger.contains("WHERE id = NEW.id;"));
        assert!(trigger.ends_with("END"));
    }

    #[test]
    fn test_statement_kinds() {
        assert!(is_drop_statement("drop table if exists legacy"));
        assert!(!is_drop_statement("CREATE TABLE dropped (id)"));
        assert!(is_transaction_control("BEGIN TRANSACTION"));
        assert!(is_transaction_control("commit"));
        assert!(!is_transaction_control("CREATE TRIGGER t AFTER INSERT ON a BEGIN SELECT 1; END"));
    }

    #[test]
    fn test_schema_response_shapes() {
        assert_eq!(
            SchemaResponse::ok("CREATE TABLE a (id)").into_script().unwrap(),
            "CREATE TABLE a (id)"
        );

        let missing_sql = SchemaResponse {
            success: Some(true),
            ..Default::default()
        };
        assert!(matches!(missing_sql.into_script(), Err(DbError::SchemaFetch(_))));

        let no_flag = SchemaResponse::from_json(r#"{"sql": "CREATE TABLE a (id)"}"#).unwrap();
        assert!(matches!(no_flag.into_script(), Err(DbError::SchemaFetch(_))));

        let failed =
            SchemaResponse::from_json(r#"{"success": false, "error": "db offline"}"#).unwrap();
        match failed.into_script() {
            Err(DbError::SchemaFetch(message)) => assert_eq!(message, "db offline"),
            other => panic!("unexpected {other:?}"),
        }

        assert!(SchemaResponse::from_json("not json").is_err());
    }

    #[test]
    fn test_failure_display_is_one_based() {
        let failure = StatementFailure {
            index: 0,
            statement: "CREAT TABLE x (id)".to_string(),
            message: "syntax error".to_string(),
        };
        assert_eq!(failure.to_string(), "statement 1 (CREAT TABLE x (id)): syntax error");
    }

    #[tokio::test]
    async fn test_fast_path() {
        let manager = manager();
        let report = SchemaBootstrapper::new(Arc::clone(&manager))
            .bootstrap(Some(
                "CREATE TABLE IF NOT EXISTS a (id INTEGER);\
                 CREATE TABLE IF NOT EXISTS b (id INTEGER);",
            ))
            .await
            .unwrap();

        assert_eq!(report.path, BootstrapPath::FastPath);
        assert_eq!(report.statements, 2);
        assert_eq!(table_names(&manager).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_rerun_falls_back_and_ignores_existing_objects() {
        let manager = manager();
        let bootstrapper = SchemaBootstrapper::new(Arc::clone(&manager));
        let script = "CREATE TABLE a (id INTEGER);
                      CREATE INDEX idx_a ON a (id);
                      DROP TABLE legacy_orders;
                      CREATE TABLE IF NOT EXISTS b (id INTEGER);";

        // First run: DROP of a missing table sinks the fast path
        let first = bootstrapper.bootstrap(Some(script)).await.unwrap();
        assert_eq!(first.path, BootstrapPath::Fallback);
        assert_eq!(first.applied, 3);
        assert_eq!(first.ignored, 1);

        // Second run: everything already exists
        let second = bootstrapper.bootstrap(Some(script)).await.unwrap();
        assert_eq!(second.path, BootstrapPath::Fallback);
        assert_eq!(second.applied, 1);
        assert_eq!(second.ignored, 3);

        assert_eq!(table_names(&manager).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_one_malformed_statement_is_reported_precisely() {
        let manager = manager();
        let statements: Vec<String> = (0..25)
            .map(|i| {
                if i == 13 {
                    "CREAT TABLE broken (id INTEGER)".to_string()
                } else {
                    format!("CREATE TABLE t{i:02} (id INTEGER)")
                }
            })
            .collect();
        let script = statements.join(";\n");

        let err = SchemaBootstrapper::new(Arc::clone(&manager))
            .bootstrap(Some(&script))
            .await
            .unwrap_err();

        match err {
            DbError::SchemaApply { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 13);
                assert!(failures[0].statement.starts_with("CREAT TABLE"));
            }
            other => panic!("unexpected {other:?}"),
        }

        // Both batches (20 + 5) committed everything valid
        let tables = table_names(&manager).await;
        assert_eq!(tables.len(), 24);
        assert!(!tables.contains(&"broken".to_string()));
    }

    #[test]
    fn test_locked_statements_are_never_ignored() {
        let locked = || Err(DbError::Locked("database is locked".to_string()));

        assert!(matches!(
            classify_outcome(0, "DROP TABLE legacy", locked()),
            Outcome::Failed(ref f) if f.index == 0
        ));
        assert!(matches!(
            classify_outcome(1, "CREATE TABLE a (id INTEGER)", locked()),
            Outcome::Failed(_)
        ));
        assert!(matches!(
            classify_outcome(2, "DROP TABLE legacy", Err(DbError::NoSuchObject("no such table".into()))),
            Outcome::Ignored
        ));
        assert!(matches!(
            classify_outcome(3, "CREATE TABLE a (id INTEGER)", Err(DbError::ConnectionLost("gone".into()))),
            Outcome::Lost(_)
        ));
    }

    #[tokio::test]
    async fn test_fallback_waits_out_a_competing_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contended.db");

        let manager = Arc::new(ConnectionManager::new(DbConfig::new(&path)));
        manager.connect().await.unwrap();

        // Another connection holds the write lock for a while
        let theirs = Arc::new(ConnectionManager::new(DbConfig::new(&path)));
        theirs
            .acquire()
            .await
            .unwrap()
            .exec("BEGIN IMMEDIATE")
            .await
            .unwrap();
        let holder = Arc::clone(&theirs);
        let release = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(150)).await;
            holder.acquire().await.unwrap().exec("COMMIT").await.unwrap();
        });

        // The DROP of a missing table sends the script down the batched path
        let report = SchemaBootstrapper::new(Arc::clone(&manager))
            .bootstrap(Some(
                "DROP TABLE missing_legacy;
                 CREATE TABLE a (id INTEGER);
                 CREATE TABLE b (id INTEGER);",
            ))
            .await
            .unwrap();
        release.await.unwrap();

        assert_eq!(report.path, BootstrapPath::Fallback);
        assert_eq!(report.applied, 2);
        assert_eq!(report.ignored, 1);
        assert_eq!(table_names(&manager).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failed_commit_replays_batch_one_by_one() {
        let manager = manager();
        // OR ROLLBACK ends the batch transaction, so its COMMIT fails
        let script = "CREATE TABLE codes (code TEXT PRIMARY KEY);
                      INSERT INTO codes (code) VALUES ('A');
                      CREATE TABLE before_failure (id INTEGER);
                      INSERT OR ROLLBACK INTO codes (code) VALUES ('A');
                      CREATE TABLE after_failure (id INTEGER);";

        let err = SchemaBootstrapper::new(Arc::clone(&manager))
            .bootstrap(Some(script))
            .await
            .unwrap_err();

        match err {
            DbError::SchemaApply { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 3);
                assert!(failures[0].statement.starts_with("INSERT OR ROLLBACK"));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(
            table_names(&manager).await,
            vec!["after_failure", "before_failure", "codes"]
        );
        // The rolled-back insert was applied exactly once by the replay
        let codes = SqlExecutor::new(Arc::clone(&manager))
            .query_scalar_i64("SELECT COUNT(*) FROM codes", &[])
            .await
            .unwrap();
        assert_eq!(codes, 1);
    }

    #[tokio::test]
    async fn test_connection_lost_inside_batch_replays_statements() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ConnectionManager::new(DbConfig::new(dir.path().join("k.db"))));

        // Inserting into `faults` fails the way a dead native handle does
        SqlExecutor::new(Arc::clone(&manager))
            .exec(
                "CREATE TABLE faults (id INTEGER);
                 CREATE TRIGGER trg_faults BEFORE INSERT ON faults BEGIN
                     SELECT RAISE(ABORT, 'null pointer dereference');
                 END;",
            )
            .await
            .unwrap();

        let err = SchemaBootstrapper::new(Arc::clone(&manager))
            .bootstrap(Some(
                "CREATE TABLE a (id INTEGER);
                 INSERT INTO faults (id) VALUES (1);
                 CREATE TABLE b (id INTEGER);",
            ))
            .await
            .unwrap_err();

        match err {
            DbError::SchemaApply { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 1);
                assert!(failures[0].message.contains("null pointer"));
            }
            other => panic!("unexpected {other:?}"),
        }

        // Statements around the lost one still landed, on a new handle
        assert_eq!(table_names(&manager).await, vec!["a", "b", "faults"]);
        assert!(manager.health_check().await);
    }

    #[tokio::test]
    async fn test_script_transaction_statements_are_skipped() {
        let manager = manager();
        let report = SchemaBootstrapper::new(Arc::clone(&manager))
            .bootstrap(Some("BEGIN TRANSACTION; CREATE TABLE a (id INTEGER); COMMIT;"))
            .await
            .unwrap();

        assert_eq!(report.path, BootstrapPath::Fallback);
        assert_eq!(report.applied, 1);
        assert_eq!(report.ignored, 2);
        assert_eq!(table_names(&manager).await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_schema_from_source() {
        let manager = manager();
        let report = SchemaBootstrapper::new(Arc::clone(&manager))
            .with_source(Arc::new(StaticSchema::new("CREATE TABLE remote (id INTEGER);")))
            .bootstrap(None)
            .await
            .unwrap();

        assert_eq!(report.path, BootstrapPath::FastPath);
        assert_eq!(table_names(&manager).await, vec!["remote"]);
    }

    #[tokio::test]
    async fn test_source_failures() {
        let err = SchemaBootstrapper::new(manager())
            .with_source(Arc::new(FailingSource))
            .bootstrap(None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::SchemaFetch(ref m) if m.contains("maintenance")));

        let err = SchemaBootstrapper::new(manager())
            .bootstrap(None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::SchemaFetch(_)));

        let err = SchemaBootstrapper::new(manager())
            .bootstrap(Some("-- nothing but a comment"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::SchemaFetch(_)));
    }
}
