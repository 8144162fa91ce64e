//! Per-gap advisory locks
//!
//! Every state-machine transition runs inside a transaction that first
//! takes a PostgreSQL advisory lock keyed by the gap id. Concurrent
//! resolve/assign/reopen calls for the same gap therefore serialize: the
//! first commits, the second re-reads the row, observes the new status,
//! and fails its guard with `Conflict`. The lock scope includes the
//! `resolution_history` append on reopen so history and gap fields commit
//! atomically.
//!
//! Locks are transaction-level (`pg_advisory_xact_lock`): released on
//! commit or rollback, never held across provider or file I/O.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use sqlx::{Postgres, Transaction};

/// Namespace tag hashed into every gap lock key, so gap locks cannot
/// collide with any other advisory-lock user of the same database.
const GAP_LOCK_NAMESPACE: &str = "gapops.gap";

/// Derive a stable i64 lock key for a gap.
///
/// Deterministic: the same gap id always hashes to the same key, across
/// restarts and across server instances sharing the database.
pub fn gap_lock_key(gap_id: i64) -> i64 {
    let mut hasher = DefaultHasher::new();
    GAP_LOCK_NAMESPACE.hash(&mut hasher);
    gap_id.hash(&mut hasher);
    hasher.finish() as i64
}

/// Acquire the advisory lock for a gap (blocks until available).
///
/// Released automatically when the transaction ends.
pub async fn lock_gap(
    tx: &mut Transaction<'_, Postgres>,
    gap_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(gap_lock_key(gap_id))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Try to acquire the gap lock without blocking.
///
/// Returns `false` when another transaction holds it.
pub async fn try_lock_gap(
    tx: &mut Transaction<'_, Postgres>,
    gap_id: i64,
) -> Result<bool, sqlx::Error> {
    let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_xact_lock($1)")
        .bind(gap_lock_key(gap_id))
        .fetch_one(&mut **tx)
        .await?;
    Ok(acquired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_deterministic() {
        assert_eq!(gap_lock_key(42), gap_lock_key(42));
    }

    #[test]
    fn test_lock_key_distinct_per_gap() {
        assert_ne!(gap_lock_key(1), gap_lock_key(2));
        assert_ne!(gap_lock_key(0), gap_lock_key(i64::MAX));
    }
}
