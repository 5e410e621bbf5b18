//! Admission control — daily budgets and per-minute rate windows
//!
//! Per-minute limiting alone does not stop an attacker who paces requests
//! just under the window all day long; the daily budget is the second,
//! coarser layer. Both use day- or minute-bucketed counters over the shared
//! [`CounterStore`]: atomic increment, expiry attached on the bucket's first
//! increment, reset at the bucket boundary via the key itself.
//!
//! Counter-store failure fails **closed** (`DependencyUnavailable`): the
//! limiter exists to cap spend, and admitting traffic while the ledger is
//! down defeats it.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::{GatewayError, QuotaScope, Result};
use crate::store::{CounterStore, StoreError};

/// Expiry attached to daily buckets
const DAY_TTL: Duration = Duration::from_secs(86_400);

/// Expiry attached to minute buckets
const MINUTE_TTL: Duration = Duration::from_secs(60);

/// Current usage, for the monitoring endpoint
#[derive(Debug, Serialize)]
pub struct UsageStats {
    pub global_today: i64,
    pub global_limit: i64,
    pub ip_limit: i64,
}

/// Per-IP and global daily request budgets
pub struct BudgetLimiter {
    counters: Arc<dyn CounterStore>,
    ip_daily_limit: i64,
    global_daily_limit: i64,
}

impl BudgetLimiter {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        ip_daily_limit: i64,
        global_daily_limit: i64,
    ) -> Self {
        Self {
            counters,
            ip_daily_limit,
            global_daily_limit,
        }
    }

    /// Key for today's UTC bucket. The date in the key makes counters go
    /// stale at the day boundary; the TTL cleans them up.
    fn day_key(scope: &str) -> String {
        format!("budget:{}:{}", scope, Utc::now().format("%Y-%m-%d"))
    }

    async fn bump(&self, key: &str) -> Result<i64> {
        let count = self.counters.incr(key).await.map_err(Self::fail_closed)?;
        if count == 1 {
            self.counters
                .expire(key, DAY_TTL)
                .await
                .map_err(Self::fail_closed)?;
        }
        Ok(count)
    }

    fn fail_closed(e: StoreError) -> GatewayError {
        GatewayError::DependencyUnavailable(format!("counter store: {e}"))
    }

    /// Check the per-IP daily budget, counting this request.
    pub async fn check_ip_daily(&self, ip: &str) -> Result<()> {
        let key = Self::day_key(&format!("ip:{ip}"));
        let count = self.bump(&key).await?;

        if count > self.ip_daily_limit {
            warn!(ip, count, limit = self.ip_daily_limit, "IP daily limit exceeded");
            return Err(GatewayError::QuotaExceeded {
                scope: QuotaScope::IpDaily,
                count,
                limit: self.ip_daily_limit,
                retry_after_seconds: 86_400,
            });
        }
        Ok(())
    }

    /// Check the global daily budget — the last line of defense against
    /// distributed traffic, counting this request.
    pub async fn check_global_daily(&self) -> Result<()> {
        let key = Self::day_key("global");
        let count = self.bump(&key).await?;

        if count > self.global_daily_limit {
            tracing::error!(count, limit = self.global_daily_limit, "GLOBAL daily limit exceeded");
            return Err(GatewayError::QuotaExceeded {
                scope: QuotaScope::GlobalDaily,
                count,
                limit: self.global_daily_limit,
                retry_after_seconds: 86_400,
            });
        }
        Ok(())
    }

    /// Current usage statistics. Per-IP counts are not enumerable through
    /// the store trait; only the global bucket is reported.
    pub async fn usage(&self) -> Result<UsageStats> {
        let global_today = self
            .counters
            .get_count(&Self::day_key("global"))
            .await
            .map_err(Self::fail_closed)?
            .unwrap_or(0);

        Ok(UsageStats {
            global_today,
            global_limit: self.global_daily_limit,
            ip_limit: self.ip_daily_limit,
        })
    }
}

/// Fixed-window per-minute limiter
pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
    per_minute_limit: i64,
}

impl RateLimiter {
    pub fn new(counters: Arc<dyn CounterStore>, per_minute_limit: i64) -> Self {
        Self {
            counters,
            per_minute_limit,
        }
    }

    fn window_key(ip: &str) -> String {
        format!("rate:{}:{}", ip, Utc::now().format("%Y%m%d%H%M"))
    }

    /// Check the current minute window, counting this request.
    pub async fn check(&self, ip: &str) -> Result<()> {
        let key = Self::window_key(ip);
        let count = self
            .counters
            .incr(&key)
            .await
            .map_err(BudgetLimiter::fail_closed)?;
        if count == 1 {
            self.counters
                .expire(&key, MINUTE_TTL)
                .await
                .map_err(BudgetLimiter::fail_closed)?;
        }

        if count > self.per_minute_limit {
            warn!(ip, count, limit = self.per_minute_limit, "rate limit exceeded");
            return Err(GatewayError::QuotaExceeded {
                scope: QuotaScope::Minute,
                count,
                limit: self.per_minute_limit,
                retry_after_seconds: 60,
            });
        }
        Ok(())
    }
}
