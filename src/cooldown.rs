// ⏱️ Cooldown Controller - learned per-account delay between bulk actions
//
// new = α·observed + (1−α)·previous, α fixed at 0.3.
// Outcome reports map onto observations: ok → default×0.9, fail → default×1.2,
// flood N → N seconds verbatim.

use crate::config::EMA_ALPHA;
use crate::db::{self, Account, Event};
use crate::error::{Result, StewardError};
use rusqlite::Connection;
use std::str::FromStr;
use tracing::{debug, info};

/// Floor for observations so the estimate stays strictly positive
const MIN_OBSERVED_SECONDS: f64 = 1.0;

// ============================================================================
// OUTCOME REPORTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Fail,
    /// Explicit throttle signal with the wait the service demanded
    Flood(u64),
}

impl Outcome {
    /// Observation fed into the EMA for this outcome
    pub fn observation(&self, default: f64) -> f64 {
        match self {
            Outcome::Ok => default * 0.9,
            Outcome::Fail => default * 1.2,
            Outcome::Flood(seconds) => *seconds as f64,
        }
    }

    /// Parse report tokens: `ok`, `fail`, `flood <seconds>`
    pub fn from_tokens(tokens: &[&str]) -> Result<Self> {
        match tokens {
            ["ok"] => Ok(Outcome::Ok),
            ["fail"] => Ok(Outcome::Fail),
            ["flood", seconds] if !seconds.is_empty() && seconds.bytes().all(|b| b.is_ascii_digit()) => {
                seconds
                    .parse::<u64>()
                    .map(Outcome::Flood)
                    .map_err(|_| report_usage())
            }
            _ => Err(report_usage()),
        }
    }
}

impl FromStr for Outcome {
    type Err = StewardError;

    fn from_str(raw: &str) -> Result<Self> {
        let tokens: Vec<&str> = raw.split_whitespace().collect();
        Outcome::from_tokens(&tokens)
    }
}

fn report_usage() -> StewardError {
    StewardError::Validation(
        "Invalid report format. Examples:\n/report acc1 ok\n/report acc1 fail\n/report acc1 flood 120"
            .to_string(),
    )
}

// ============================================================================
// CONTROLLER
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct CooldownController {
    default: f64,
    alpha: f64,
}

impl CooldownController {
    pub fn new(default: f64) -> Self {
        CooldownController::with_alpha(default, EMA_ALPHA)
    }

    pub fn with_alpha(default: f64, alpha: f64) -> Self {
        CooldownController { default, alpha }
    }

    pub fn default_cooldown(&self) -> f64 {
        self.default
    }

    /// Idempotent creation; an existing account is left untouched
    pub fn register(&self, conn: &Connection, session_name: &str, owner_id: i64) -> Result<bool> {
        let created = db::insert_account_ignore(conn, session_name, owner_id, self.default)?;

        if created {
            db::record_event(
                conn,
                Event::new(
                    "account_registered",
                    "account",
                    session_name,
                    serde_json::json!({ "owner_id": owner_id, "cooldown": self.default }),
                    "cooldown",
                ),
            );
            info!(session = session_name, owner_id, "account registered");
        }

        Ok(created)
    }

    /// Apply one observation. Unknown accounts are created with owner 0
    /// and the default estimate, ignoring the observation.
    pub fn update(&self, conn: &Connection, session_name: &str, observed_seconds: f64) -> Result<f64> {
        let observed = observed_seconds.max(MIN_OBSERVED_SECONDS);

        let estimate = match db::get_account(conn, session_name)? {
            Some(account) => {
                let next = self.alpha * observed + (1.0 - self.alpha) * account.cooldown_estimate;
                db::update_account_cooldown(conn, session_name, next)?;
                next
            }
            None => {
                db::insert_account_ignore(conn, session_name, 0, self.default)?;
                self.default
            }
        };

        db::record_event(
            conn,
            Event::new(
                "cooldown_updated",
                "account",
                session_name,
                serde_json::json!({ "observed": observed, "estimate": estimate }),
                "cooldown",
            ),
        );
        debug!(session = session_name, observed, estimate, "cooldown updated");

        Ok(estimate)
    }

    /// Feed an outcome report through `update`
    pub fn report(&self, conn: &Connection, session_name: &str, outcome: Outcome) -> Result<f64> {
        self.update(conn, session_name, outcome.observation(self.default))
    }

    /// Stored estimate, or the default for unknown accounts (never creates a row)
    pub fn get(&self, conn: &Connection, session_name: &str) -> Result<f64> {
        Ok(db::get_account(conn, session_name)?
            .map(|account| account.cooldown_estimate)
            .unwrap_or(self.default))
    }

    pub fn list_accounts(&self, conn: &Connection) -> Result<Vec<Account>> {
        db::get_all_accounts(conn)
    }
}
