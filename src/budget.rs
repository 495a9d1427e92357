//! Monthly usage budget for the commercial geocoding tier.
//!
//! The counter lives in a small JSON file and every billable call is also
//! appended to a CSV transaction log. Neither file is allowed to block
//! resolution: read or write failures are logged and the ledger fails open
//! (quota assumed available).

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::Result;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub usage_path: PathBuf,
    pub log_path: PathBuf,
    /// Monthly limit used when no usage file exists yet.
    pub default_limit: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            usage_path: PathBuf::from("config/usage.json"),
            log_path: PathBuf::from("config/geocoding_api_log.csv"),
            default_limit: 1000,
        }
    }
}

/// Persisted counter state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageState {
    pub count: u64,
    pub limit: u64,
    /// "YYYY-MM"
    pub current_month: String,
    #[serde(default)]
    pub total_all_time: u64,
}

impl UsageState {
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }

    pub fn is_exhausted(&self) -> bool {
        self.count >= self.limit
    }
}

/// Outcome of one commercial call, as written to the transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Success,
    ZeroResults,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::ZeroResults => "ZERO_RESULTS",
            Self::Error => "ERROR",
        }
    }

    /// Billable units reported in the log. Failed requests are not billed
    /// by the provider, but still count against the local budget.
    pub fn cost(&self) -> u8 {
        match self {
            Self::Error => 0,
            _ => 1,
        }
    }
}

/// One row of the transaction log (`Timestamp,Address,Status,Cost`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transaction {
    /// Local time, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
    pub address: String,
    pub status: CallStatus,
    pub cost: u8,
}

/// Reads and updates the usage file and transaction log.
#[derive(Debug, Clone)]
pub struct UsageLedger {
    config: BudgetConfig,
}

impl UsageLedger {
    pub fn new(config: BudgetConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Whether the commercial tier may be called this month.
    pub fn has_quota(&self) -> bool {
        self.has_quota_in(&current_month())
    }

    pub fn has_quota_in(&self, month: &str) -> bool {
        match self.state_for(month) {
            Ok(state) if state.is_exhausted() => {
                tracing::warn!(count = state.count, limit = state.limit, "commercial geocoding budget reached");
                false
            }
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(error = %err, "usage file unreadable, assuming budget available");
                true
            }
        }
    }

    /// Count one commercial call and append it to the transaction log.
    pub fn record_call(&self, address: &str, status: CallStatus) {
        let now = Local::now().naive_local();
        self.record_call_at(address, status, now);
    }

    pub fn record_call_at(&self, address: &str, status: CallStatus, now: NaiveDateTime) {
        let month = now.format("%Y-%m").to_string();
        let updated = self.state_for(&month).and_then(|mut state| {
            state.count += 1;
            state.total_all_time += 1;
            self.write_state(&state)?;
            Ok(state)
        });
        match updated {
            Ok(state) => tracing::debug!(count = state.count, limit = state.limit, "usage counter updated"),
            Err(err) => tracing::warn!(error = %err, "failed to update usage counter"),
        }

        if let Err(err) = self.append_log(address, status, now) {
            tracing::warn!(error = %err, "failed to append transaction log");
        }
    }

    /// Current state for `month`, resetting (and persisting) the counter if
    /// the stored month is different. A missing file yields a fresh state.
    pub fn state_for(&self, month: &str) -> Result<UsageState> {
        let path = &self.config.usage_path;
        if !path.exists() {
            return Ok(UsageState {
                count: 0,
                limit: self.config.default_limit,
                current_month: month.to_string(),
                total_all_time: 0,
            });
        }

        let mut state: UsageState = serde_json::from_str(&fs::read_to_string(path)?)?;
        if state.current_month != month {
            tracing::info!(from = %state.current_month, to = month, "new month, resetting usage counter");
            state.current_month = month.to_string();
            state.count = 0;
            self.write_state(&state)?;
        }
        Ok(state)
    }

    /// Current state for this month.
    pub fn status(&self) -> Result<UsageState> {
        self.state_for(&current_month())
    }

    /// Last `n` transaction log rows, oldest first.
    pub fn recent_transactions(&self, n: usize) -> Result<Vec<Transaction>> {
        let path = &self.config.log_path;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(path)?;
        let mut rows: Vec<Transaction> = Vec::new();
        for row in reader.deserialize() {
            rows.push(row?);
        }
        let start = rows.len().saturating_sub(n);
        Ok(rows.split_off(start))
    }

    fn write_state(&self, state: &UsageState) -> Result<()> {
        ensure_parent(&self.config.usage_path)?;
        fs::write(&self.config.usage_path, serde_json::to_string_pretty(state)?)?;
        Ok(())
    }

    fn append_log(&self, address: &str, status: CallStatus, now: NaiveDateTime) -> Result<()> {
        let path = &self.config.log_path;
        ensure_parent(path)?;
        let is_new = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        writer.serialize(Transaction {
            timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
            address: address.to_string(),
            status,
            cost: status.cost(),
        })?;
        writer.flush()?;
        Ok(())
    }
}

pub fn current_month() -> String {
    Local::now().format("%Y-%m").to_string()
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
