//! Busy-retry driver
//!
//! Every statement the engine issues runs through [`with_busy_retry`]. The
//! policy is centralized here:
//!
//! - busy in autocommit mode: reset and retry
//! - busy inside an explicit transaction: roll back, reset and retry
//! - any other error: roll back if a transaction is open, surface the fault
//!
//! `commit` is the exception: a busy commit keeps its transaction, so
//! [`commit_with_retry`] reissues it without rolling back.
//!
//! There is no timeout by default. A contended writer keeps retrying until
//! the lock clears or a non-busy error occurs. `RetryConfig` can bound the
//! number of attempts and add exponential backoff between them.

use rusqlite::{Connection, Params, Row, Statement};
use serde::{Deserialize, Serialize};
use sqlpack_core::error::is_busy;
use sqlpack_core::{PackError, PackResult};
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// Retry Configuration
// ============================================================================

/// Configuration for busy-retry behavior
///
/// # Example
/// ```
/// use sqlpack_storage::RetryConfig;
///
/// let config = RetryConfig::new()
///     .with_max_retries(100)
///     .with_base_delay_ms(1)
///     .with_max_delay_ms(20);
/// assert_eq!(config.max_retries, Some(100));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (`None` = retry until the lock clears)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<usize>,
    /// Base delay between retries in milliseconds (exponential backoff, 0 = immediate)
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            base_delay_ms: 0,
            max_delay_ms: 50,
        }
    }
}

impl RetryConfig {
    /// Create a new RetryConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RetryConfig that surfaces the first busy signal
    pub fn no_retry() -> Self {
        Self {
            max_retries: Some(0),
            ..Default::default()
        }
    }

    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set base delay for exponential backoff
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set maximum delay between retries
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Calculate delay for a given attempt (exponential backoff)
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        // Cap the shift to prevent overflow (1 << 63 is the max for u64)
        let shift = attempt.min(63);
        let multiplier = 1u64 << shift;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    fn exhausted(&self, attempt: usize) -> bool {
        self.max_retries.is_some_and(|max| attempt >= max)
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Run `op` until it completes or fails with a non-busy error.
///
/// `op` must be restartable: it is called again from scratch after every
/// busy signal. Statement-based callers get this for free because a
/// statement is reset when its row cursor is dropped.
pub fn with_busy_retry<T, F>(conn: &Connection, config: &RetryConfig, mut op: F) -> PackResult<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    let mut attempt = 0usize;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if is_busy(&e) => {
                if config.exhausted(attempt) {
                    warn!(target: "sqlpack::retry", attempts = attempt + 1, "Giving up on busy backend");
                    rollback_if_open(conn);
                    return Err(PackError::Backend(e));
                }
                if conn.is_autocommit() {
                    debug!(target: "sqlpack::retry", attempt, "Backend busy, retrying");
                } else {
                    warn!(
                        target: "sqlpack::retry",
                        attempt,
                        "Backend busy inside explicit transaction, rolling back and retrying"
                    );
                    rollback_if_open(conn);
                }
                pause(config.calculate_delay(attempt));
                attempt += 1;
            }
            Err(e) => {
                rollback_if_open(conn);
                return Err(PackError::Backend(e));
            }
        }
    }
}

/// Commit the open transaction, retrying on busy without rolling back.
///
/// A busy `commit` leaves the transaction open, so it is simply reissued.
/// The transaction is rolled back only when retries run out or the commit
/// fails for another reason.
pub fn commit_with_retry(conn: &Connection, config: &RetryConfig) -> PackResult<()> {
    let mut attempt = 0usize;
    loop {
        match conn.execute_batch("commit") {
            Ok(()) => return Ok(()),
            Err(e) if is_busy(&e) && !config.exhausted(attempt) => {
                debug!(target: "sqlpack::retry", attempt, "Commit busy, retrying");
                pause(config.calculate_delay(attempt));
                attempt += 1;
            }
            Err(e) => {
                warn!(target: "sqlpack::retry", attempts = attempt + 1, error = %e, "Commit failed");
                rollback_if_open(conn);
                return Err(PackError::Backend(e));
            }
        }
    }
}

/// Step a row-producing statement to completion, mapping every row.
///
/// Rows mapped during an attempt that hit a busy signal are discarded, so
/// the returned rows always come from one complete pass.
pub fn query_with_retry<T, P, F>(
    conn: &Connection,
    stmt: &mut Statement<'_>,
    params: P,
    config: &RetryConfig,
    mut map: F,
) -> PackResult<Vec<T>>
where
    P: Params + Copy,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    with_busy_retry(conn, config, || {
        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(map(row)?);
        }
        Ok(out)
    })
}

/// Step a non-row-producing statement to completion.
///
/// Returns the number of rows changed.
pub fn execute_with_retry<P>(
    conn: &Connection,
    stmt: &mut Statement<'_>,
    params: P,
    config: &RetryConfig,
) -> PackResult<usize>
where
    P: Params + Copy,
{
    with_busy_retry(conn, config, || stmt.execute(params))
}

fn rollback_if_open(conn: &Connection) {
    if conn.is_autocommit() {
        return;
    }
    if let Err(e) = conn.execute_batch("rollback") {
        debug!(target: "sqlpack::retry", error = %e, "Rollback failed");
    }
}

fn pause(delay: Duration) {
    if delay.is_zero() {
        std::thread::yield_now();
    } else {
        std::thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("create table t(k text primary key, v integer);")
            .unwrap();
        conn
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, None);
        assert_eq!(config.base_delay_ms, 0);
        assert_eq!(config.max_delay_ms, 50);
    }

    #[test]
    fn test_retry_config_builder() {
        let config = RetryConfig::new()
            .with_max_retries(5)
            .with_base_delay_ms(20)
            .with_max_delay_ms(500);
        assert_eq!(config.max_retries, Some(5));
        assert_eq!(config.base_delay_ms, 20);
        assert_eq!(config.max_delay_ms, 500);
    }

    #[test]
    fn test_retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_retries, Some(0));
        assert!(config.exhausted(0));
    }

    #[test]
    fn test_unbounded_never_exhausted() {
        let config = RetryConfig::default();
        assert!(!config.exhausted(usize::MAX));
    }

    #[test]
    fn test_retry_config_delay_calculation() {
        let config = RetryConfig::new()
            .with_base_delay_ms(10)
            .with_max_delay_ms(100);

        assert_eq!(config.calculate_delay(0), Duration::from_millis(10));
        assert_eq!(config.calculate_delay(1), Duration::from_millis(20));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(40));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(80));
        assert_eq!(config.calculate_delay(4), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(200), Duration::from_millis(100));
    }

    #[test]
    fn test_zero_base_delay_is_immediate() {
        let config = RetryConfig::default();
        assert!(config.calculate_delay(10).is_zero());
    }

    #[test]
    fn test_query_collects_rows() {
        let conn = memory_conn();
        conn.execute_batch("insert into t values('a', 1), ('b', 2);")
            .unwrap();
        let mut stmt = conn.prepare("select k from t order by k").unwrap();
        let rows = query_with_retry(&conn, &mut stmt, [], &RetryConfig::default(), |row| {
            row.get::<_, String>(0)
        })
        .unwrap();
        assert_eq!(rows, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_execute_reports_changes() {
        let conn = memory_conn();
        let mut stmt = conn.prepare("insert into t values(?, ?)").unwrap();
        let changed =
            execute_with_retry(&conn, &mut stmt, params!["x", 1], &RetryConfig::default())
                .unwrap();
        assert_eq!(changed, 1);
    }

    #[test]
    fn test_constraint_error_surfaces_with_message() {
        let conn = memory_conn();
        conn.execute_batch("insert into t values('dup', 1);").unwrap();
        let mut stmt = conn.prepare("insert into t values(?, ?)").unwrap();
        let err = execute_with_retry(&conn, &mut stmt, params!["dup", 2], &RetryConfig::default())
            .unwrap_err();
        assert!(err.is_backend());
        assert!(err.to_string().contains("UNIQUE"));
    }

    #[test]
    fn test_error_inside_transaction_rolls_back() {
        let conn = memory_conn();
        conn.execute_batch("insert into t values('dup', 1); begin; insert into t values('new', 2);")
            .unwrap();
        assert!(!conn.is_autocommit());

        let mut stmt = conn.prepare("insert into t values(?, ?)").unwrap();
        assert!(
            execute_with_retry(&conn, &mut stmt, params!["dup", 3], &RetryConfig::default())
                .is_err()
        );

        assert!(conn.is_autocommit());
        let count: i64 = conn
            .query_row("select count(*) from t where k = 'new'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_retries_until_op_succeeds() {
        let conn = memory_conn();
        let mut calls = 0;
        let result = with_busy_retry(&conn, &RetryConfig::default(), || {
            calls += 1;
            if calls < 3 {
                Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                    None,
                ))
            } else {
                Ok(calls)
            }
        })
        .unwrap();
        assert_eq!(result, 3);
    }

    #[test]
    fn test_bounded_retry_gives_up() {
        let conn = memory_conn();
        let mut calls = 0;
        let err = with_busy_retry(&conn, &RetryConfig::new().with_max_retries(2), || {
            calls += 1;
            Err::<(), _>(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                None,
            ))
        })
        .unwrap_err();
        assert!(err.is_busy());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_config_toml_round_trip() {
        let config = RetryConfig::new().with_max_retries(7).with_base_delay_ms(2);
        let text = toml::to_string(&config).unwrap();
        let parsed: RetryConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);

        let unbounded: RetryConfig = toml::from_str("base_delay_ms = 1").unwrap();
        assert_eq!(unbounded.max_retries, None);
        assert_eq!(unbounded.max_delay_ms, 50);
    }
}
