// Script backend - writes switch CLI commands for manual replay

use async_trait::async_trait;
use std::path::PathBuf;

use super::{BackendAdapter, BackendKind, InstallReport};
use crate::codec::format_ipv4;
use crate::config::PipelineConfig;
use crate::error::AppResult;
use crate::routes::{RouteEntry, RouteTable};

/// Render one `table_add` line for a route.
///
/// The layout is what `simple_switch_CLI` accepts on stdin and must not drift.
pub fn render_command(route: &RouteEntry, pipeline: &PipelineConfig) -> String {
    format!(
        "table_add {} {} {}/{} => {} {}",
        pipeline.table,
        pipeline.action,
        format_ipv4(route.prefix.addr),
        route.prefix.len,
        route.next_hop.mac,
        route.next_hop.port
    )
}

pub fn render_commands(table: &RouteTable, pipeline: &PipelineConfig) -> Vec<String> {
    table
        .entries()
        .iter()
        .map(|route| render_command(route, pipeline))
        .collect()
}

pub struct ScriptBackend {
    path: PathBuf,
    pipeline: PipelineConfig,
}

impl ScriptBackend {
    pub fn new(path: PathBuf, pipeline: PipelineConfig) -> Self {
        ScriptBackend { path, pipeline }
    }
}

#[async_trait]
impl BackendAdapter for ScriptBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Script
    }

    async fn install(&mut self, table: &RouteTable) -> AppResult<InstallReport> {
        let mut content = String::new();
        for line in render_commands(table, &self.pipeline) {
            content.push_str(&line);
            content.push('\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, content).await?;

        let mut report = InstallReport::new(BackendKind::Script);
        for route in table.entries() {
            report.record_installed(route.prefix);
        }
        report.artifact = Some(self.path.clone());

        tracing::info!("CLI commands written to {}", self.path.display());
        tracing::info!("Run: simple_switch_CLI < {}", self.path.display());
        Ok(report)
    }
}
