//! Exit report of engine and pool counters
//!
//! Dumps KPIs when the host program finishes, controlled by `UAL_REPORT`:
//! - Unset or `0` → no report, zero cost
//! - `1` → human-readable to stderr
//! - `json` → JSON to stderr
//! - `json:/path` → JSON to file

use crate::worksteal::{TASKS_RUN, TASKS_STOLEN, scheduler_elapsed};
use serde::Serialize;
use std::io::Write;
use std::sync::OnceLock;
use std::sync::atomic::Ordering;
use tracing::warn;
use ual_core::EngineStats;

// =============================================================================
// Report Configuration (parsed from UAL_REPORT env var)
// =============================================================================

/// Output format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFormat {
    Human,
    Json,
}

/// Output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDestination {
    Stderr,
    File(String),
}

/// Parsed report configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig {
    pub format: ReportFormat,
    pub destination: ReportDestination,
}

impl ReportConfig {
    /// Parse from UAL_REPORT environment variable
    pub fn from_env() -> Option<Self> {
        Self::parse(&std::env::var("UAL_REPORT").ok()?)
    }

    /// Parse a `UAL_REPORT` value; None disables the report
    pub fn parse(val: &str) -> Option<Self> {
        match val {
            "" | "0" => None,
            "1" => Some(ReportConfig {
                format: ReportFormat::Human,
                destination: ReportDestination::Stderr,
            }),
            "json" => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::Stderr,
            }),
            s if s.starts_with("json:") && s.len() > 5 => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::File(s[5..].to_string()),
            }),
            _ => {
                warn!("UAL_REPORT='{}' not recognized, ignoring", val);
                None
            }
        }
    }
}

static REPORT_CONFIG: OnceLock<Option<ReportConfig>> = OnceLock::new();

fn get_report_config() -> &'static Option<ReportConfig> {
    REPORT_CONFIG.get_or_init(ReportConfig::from_env)
}

// =============================================================================
// Report Data
// =============================================================================

/// Collected metrics for the report
#[derive(Debug, Clone, Serialize)]
pub struct ReportData {
    pub wall_clock_ms: u64,
    pub live_stacks: u64,
    pub engine: EngineStats,
    pub tasks_run: u64,
    pub tasks_stolen: u64,
}

/// Collect all metrics
pub fn collect_report_data() -> ReportData {
    let wall_clock_ms = scheduler_elapsed()
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let engine = ual_core::stats::snapshot();

    ReportData {
        wall_clock_ms,
        live_stacks: engine.live_stacks(),
        engine,
        tasks_run: TASKS_RUN.load(Ordering::Relaxed),
        tasks_stolen: TASKS_STOLEN.load(Ordering::Relaxed),
    }
}

// =============================================================================
// Formatting
// =============================================================================

pub fn format_human(data: &ReportData) -> String {
    let e = &data.engine;
    let mut out = String::new();
    out.push_str("=== UAL REPORT ===\n");
    out.push_str(&format!("Wall clock:        {} ms\n", data.wall_clock_ms));
    out.push_str(&format!("Stacks created:    {}\n", e.stacks_created));
    out.push_str(&format!("Stacks released:   {}\n", e.stacks_released));
    out.push_str(&format!("Stacks live:       {}\n", data.live_stacks));
    out.push_str(&format!("Pushes:            {}\n", e.pushes));
    out.push_str(&format!("Pops:              {}\n", e.pops));
    out.push_str(&format!("Peeks:             {}\n", e.peeks));
    out.push_str(&format!("Frozen rejections: {}\n", e.frozen_rejections));
    out.push_str(&format!("Borrows granted:   {}\n", e.borrows_granted));
    out.push_str(&format!("Borrow conflicts:  {}\n", e.borrow_conflicts));
    out.push_str(&format!("Compactions:       {}\n", e.compactions));
    out.push_str(&format!("Transfers:         {}\n", e.transfers));
    out.push_str(&format!("Tasks run:         {}\n", data.tasks_run));
    out.push_str(&format!("Tasks stolen:      {}\n", data.tasks_stolen));
    out.push_str("==================\n");
    out
}

pub fn format_json(data: &ReportData) -> String {
    serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string())
}

// =============================================================================
// Emit
// =============================================================================

/// Write a report for `config`
pub fn write_report(config: &ReportConfig) {
    let data = collect_report_data();

    let mut output = match config.format {
        ReportFormat::Human => format_human(&data),
        ReportFormat::Json => format_json(&data),
    };
    if !output.ends_with('\n') {
        output.push('\n');
    }

    match &config.destination {
        ReportDestination::Stderr => {
            let _ = std::io::stderr().write_all(output.as_bytes());
        }
        ReportDestination::File(path) => {
            if let Ok(mut f) = std::fs::File::create(path) {
                let _ = f.write_all(output.as_bytes());
            } else {
                warn!("could not write report to {}", path);
                let _ = std::io::stderr().write_all(output.as_bytes());
            }
        }
    }
}

/// At-exit report, as configured by `UAL_REPORT`
pub fn emit_report() {
    if let Some(config) = get_report_config() {
        write_report(config);
    }
}

// =============================================================================
// Tests
// =============================================================================
