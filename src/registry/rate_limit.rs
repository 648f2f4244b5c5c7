//! Fixed-window rate limiter over an injected counter store.
//!
//! A window starts at `floor(now / window_ms) * window_ms`. A counter whose
//! stored window differs from the current one is replaced with a fresh count of
//! one, never accumulated. Bursts straddling a window boundary are admitted.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PackError, Result, ValidationError};
use crate::registry::clock::Clock;

/// Per-operation budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: u32,
    pub window_ms: i64,
}

impl RateLimit {
    pub const fn new(limit: u32, window_ms: i64) -> Self {
        Self { limit, window_ms }
    }
}

/// Stored state of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub window_start: i64,
    pub count: u32,
}

/// Result of one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted(Counter),
    Limited(Counter),
}

/// Apply the fixed-window rule to the stored counter.
pub const fn admit(existing: Option<Counter>, window_start: i64, limit: u32) -> Admission {
    match existing {
        Some(counter) if counter.window_start == window_start => {
            if counter.count >= limit {
                Admission::Limited(counter)
            } else {
                Admission::Admitted(Counter {
                    window_start,
                    count: counter.count + 1,
                })
            }
        }
        _ => Admission::Admitted(Counter {
            window_start,
            count: 1,
        }),
    }
}

/// Keyed counter storage. `hit` must read, decide and write as one atomic step.
pub trait CounterStore: Send + Sync {
    fn hit(&self, key: &str, window_start: i64, limit: u32) -> Result<Admission>;

    fn get(&self, key: &str) -> Result<Option<Counter>>;
}

#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, Counter>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    fn hit(&self, key: &str, window_start: i64, limit: u32) -> Result<Admission> {
        let mut counters = self.counters.lock();
        let admission = admit(counters.get(key).copied(), window_start, limit);
        if let Admission::Admitted(counter) = admission {
            counters.insert(key.to_string(), counter);
        }
        Ok(admission)
    }

    fn get(&self, key: &str) -> Result<Option<Counter>> {
        Ok(self.counters.lock().get(key).copied())
    }
}

/// Counters in the `rate_limits` table, updated inside an IMMEDIATE transaction
/// so concurrent processes cannot both observe spare budget.
pub struct SqliteCounterStore {
    conn: Mutex<Connection>,
}

impl SqliteCounterStore {
    /// Open a dedicated connection to the registry database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = crate::storage::sqlite::open_connection(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

impl CounterStore for SqliteCounterStore {
    fn hit(&self, key: &str, window_start: i64, limit: u32) -> Result<Admission> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing = tx
            .query_row(
                "SELECT window_start, count FROM rate_limits WHERE key = ?",
                [key],
                |row| {
                    Ok(Counter {
                        window_start: row.get(0)?,
                        count: row.get(1)?,
                    })
                },
            )
            .optional()?;

        let admission = admit(existing, window_start, limit);
        if let Admission::Admitted(counter) = admission {
            tx.execute(
                "INSERT INTO rate_limits (key, window_start, count) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET window_start = ?2, count = ?3",
                params![key, counter.window_start, counter.count],
            )?;
        }
        tx.commit()?;
        Ok(admission)
    }

    fn get(&self, key: &str) -> Result<Option<Counter>> {
        let conn = self.conn.lock();
        let counter = conn
            .query_row(
                "SELECT window_start, count FROM rate_limits WHERE key = ?",
                [key],
                |row| {
                    Ok(Counter {
                        window_start: row.get(0)?,
                        count: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(counter)
    }
}

pub struct RateLimiter {
    store: Box<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Box<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Count one request against `key`, failing with `RateLimited` when the
    /// current window's budget is spent.
    pub fn enforce(&self, key: &str, limit: u32, window_ms: i64) -> Result<()> {
        if window_ms <= 0 {
            return Err(ValidationError::field("window_ms", "must be positive").into());
        }
        let now = self.clock.now_ms();
        let window_start = now.div_euclid(window_ms) * window_ms;

        match self.store.hit(key, window_start, limit)? {
            Admission::Admitted(counter) => {
                debug!(key, count = counter.count, limit, "rate limit admitted");
                Ok(())
            }
            Admission::Limited(counter) => {
                let retry_after_ms = window_start + window_ms - now;
                warn!(key, count = counter.count, limit, retry_after_ms, "rate limited");
                Err(PackError::RateLimited {
                    key: key.to_string(),
                    retry_after_ms,
                })
            }
        }
    }

    /// Enforce `limit` for `operation` on behalf of `actor_id`.
    pub fn enforce_operation(&self, actor_id: &str, operation: &str, limit: RateLimit) -> Result<()> {
        self.enforce(&format!("{actor_id}:{operation}"), limit.limit, limit.window_ms)
    }

    pub fn counter(&self, key: &str) -> Result<Option<Counter>> {
        self.store.get(key)
    }
}
