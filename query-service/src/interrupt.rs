//! Cooperative query interruption.
//!
//! A timer task raises an [`InterruptToken`]; the worker's connection polls
//! it from SQLite's progress handler, so the running statement fails with
//! `SQLITE_INTERRUPT` at its next VM step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::Connection;

/// Limits below this are polled on every VM instruction.
const FINE_GRAINED_BELOW_MS: i64 = 50;
const COARSE_OPS: i32 = 1000;

#[derive(Debug, Clone, Default)]
pub struct InterruptToken(Arc<AtomicBool>);

impl InterruptToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Installs a progress handler that aborts the statement once `token` is
/// raised.
pub(crate) fn arm(conn: &Connection, token: &InterruptToken, time_limit_ms: i64) {
    let ops = if time_limit_ms < FINE_GRAINED_BELOW_MS { 1 } else { COARSE_OPS };
    let token = token.clone();
    conn.progress_handler(ops, Some(move || token.is_interrupted()));
}

pub(crate) fn disarm(conn: &Connection) {
    conn.progress_handler(0, None::<fn() -> bool>);
}

/// Whether an engine error is the result of an interrupt.
pub(crate) fn is_interrupt(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::OperationInterrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLOW: &str = "with recursive c(x) as (select 1 union all select x + 1 from c) \
                        select count(*) from c";

    #[test]
    fn raised_token_aborts_statement() {
        let conn = Connection::open_in_memory().unwrap();
        let token = InterruptToken::new();
        token.interrupt();
        arm(&conn, &token, 10);
        let err = conn.query_row(SLOW, [], |r| r.get::<_, i64>(0)).unwrap_err();
        assert!(is_interrupt(&err));
    }

    #[test]
    fn disarmed_connection_ignores_token() {
        let conn = Connection::open_in_memory().unwrap();
        let token = InterruptToken::new();
        token.interrupt();
        arm(&conn, &token, 1000);
        disarm(&conn);
        let one: i64 = conn.query_row("select 1", [], |r| r.get(0)).unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn other_errors_are_not_interrupts() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.execute("select * from missing", []).unwrap_err();
        assert!(!is_interrupt(&err));
    }
}
