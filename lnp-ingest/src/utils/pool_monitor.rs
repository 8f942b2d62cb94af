//! Instrumented transactions
//!
//! Every write transaction in the store goes through [`begin_monitored`] so
//! slow pool acquisition and long-held write locks show up in the logs.

use lnp_common::{Error, Result};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::time::Instant;

const SLOW_ACQUIRE_MS: u128 = 1000;
const LONG_HOLD_MS: u128 = 2000;

/// Transaction wrapper that logs acquisition and hold timing
pub struct MonitoredTransaction<'c> {
    tx: Option<Transaction<'c, Sqlite>>,
    caller: &'static str,
    acquired_at: Instant,
}

impl<'c> MonitoredTransaction<'c> {
    pub async fn commit(mut self) -> Result<()> {
        let held_ms = self.acquired_at.elapsed().as_millis();
        let tx = self.take()?;
        tx.commit().await?;
        log_release(self.caller, held_ms, "commit");
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        let held_ms = self.acquired_at.elapsed().as_millis();
        let tx = self.take()?;
        tx.rollback().await?;
        log_release(self.caller, held_ms, "rollback");
        Ok(())
    }

    /// Connection to run statements on
    pub fn conn(&mut self) -> Result<&mut sqlx::SqliteConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| Error::Internal("transaction already finished".to_string()))
    }

    fn take(&mut self) -> Result<Transaction<'c, Sqlite>> {
        self.tx
            .take()
            .ok_or_else(|| Error::Internal("transaction already finished".to_string()))
    }
}

impl Drop for MonitoredTransaction<'_> {
    fn drop(&mut self) {
        // Dropping an open transaction rolls it back (error path)
        if self.tx.is_some() {
            log_release(self.caller, self.acquired_at.elapsed().as_millis(), "drop");
        }
    }
}

fn log_release(caller: &'static str, held_ms: u128, how: &'static str) {
    if held_ms > LONG_HOLD_MS {
        tracing::warn!(caller, held_ms, how, "Long transaction held the write lock");
    } else {
        tracing::debug!(caller, held_ms, how, "Connection released");
    }
}

/// Begin a transaction with pool timing logs
pub async fn begin_monitored<'c>(
    pool: &'c SqlitePool,
    caller: &'static str,
) -> Result<MonitoredTransaction<'c>> {
    let start = Instant::now();
    let tx = pool.begin().await?;

    let wait_ms = start.elapsed().as_millis();
    if wait_ms > SLOW_ACQUIRE_MS {
        tracing::warn!(caller, wait_ms, "Slow connection acquisition, pool may be saturated");
    } else {
        tracing::debug!(caller, wait_ms, "Connection acquired");
    }

    Ok(MonitoredTransaction {
        tx: Some(tx),
        caller,
        acquired_at: Instant::now(),
    })
}
