// Backend module - turns a route table into device programming operations

pub mod rpc;
pub mod script;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::AppResult;
use crate::routes::{Prefix, RouteTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Live connection to the device control endpoint
    #[value(alias = "p4runtime")]
    #[serde(alias = "p4runtime")]
    Rpc,
    /// Command script for replay with the switch CLI
    #[value(alias = "bmv2-cli")]
    #[serde(alias = "bmv2-cli")]
    Script,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Rpc => write!(f, "rpc"),
            BackendKind::Script => write!(f, "script"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteStatus {
    Installed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    pub prefix: Prefix,
    pub status: RouteStatus,
}

/// Per-route result of one backend run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub backend: BackendKind,
    pub outcomes: Vec<RouteOutcome>,
    /// Generated command file, for the script backend
    pub artifact: Option<PathBuf>,
}

impl InstallReport {
    pub fn new(backend: BackendKind) -> Self {
        InstallReport {
            backend,
            outcomes: Vec::new(),
            artifact: None,
        }
    }

    pub fn record_installed(&mut self, prefix: Prefix) {
        self.outcomes.push(RouteOutcome {
            prefix,
            status: RouteStatus::Installed,
        });
    }

    pub fn record_failed(&mut self, prefix: Prefix, reason: impl Into<String>) {
        self.outcomes.push(RouteOutcome {
            prefix,
            status: RouteStatus::Failed(reason.into()),
        });
    }

    pub fn success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == RouteStatus::Installed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RouteOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, RouteStatus::Failed(_)))
    }
}

impl fmt::Display for InstallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failures().count();
        writeln!(
            f,
            "Backend {}: {} of {} routes installed",
            self.backend,
            self.outcomes.len() - failed,
            self.outcomes.len()
        )?;
        for outcome in self.failures() {
            if let RouteStatus::Failed(reason) = &outcome.status {
                writeln!(f, "  {} failed: {}", outcome.prefix, reason)?;
            }
        }
        if let Some(path) = &self.artifact {
            writeln!(f, "CLI commands written to {}", path.display())?;
            writeln!(f, "Run: simple_switch_CLI < {}", path.display())?;
        }
        Ok(())
    }
}

/// A way of programming the forwarding table into the device.
///
/// `install` returns `Err` only when the backend as a whole cannot run.
/// Failures of individual routes go into the report.
#[async_trait]
pub trait BackendAdapter: Send {
    fn kind(&self) -> BackendKind;

    async fn install(&mut self, table: &RouteTable) -> AppResult<InstallReport>;
}
