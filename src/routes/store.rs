// Routing document persistence (JSON)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use super::RouteTable;
use crate::error::{AppError, AppResult};

const GENERATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Serialize, Deserialize)]
struct RouteRecord {
    port: u32,
    mac: String,
}

#[derive(Debug, Deserialize)]
struct RoutingDocument {
    #[serde(default)]
    routes: Map<String, Value>,
    #[serde(default)]
    mac_addresses: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct SavedDocument<'a> {
    routes: Map<String, Value>,
    mac_addresses: &'a Map<String, Value>,
    generated_at: String,
}

/// Load a routing document, falling back to the default table when the file
/// cannot be read. Unreadable input is recoverable; malformed input is not,
/// and that includes content that is not UTF-8.
pub fn load(path: &Path) -> AppResult<RouteTable> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(
                "{} could not be read ({}). Using default routing table.",
                path.display(),
                e
            );
            return Ok(RouteTable::default_routes());
        }
    };

    let content = String::from_utf8(bytes).map_err(|e| {
        AppError::Format(format!("{} is not valid UTF-8: {}", path.display(), e))
    })?;
    let table = parse_document(&content)?;
    tracing::info!("Loaded routing table from {}", path.display());
    tracing::info!("Routes: {}", table.len());
    tracing::info!("MAC addresses: {}", table.mac_addresses().len());
    Ok(table)
}

pub fn parse_document(content: &str) -> AppResult<RouteTable> {
    let document: RoutingDocument = serde_json::from_str(content)?;

    let mut table = RouteTable::new();
    for (prefix, value) in document.routes {
        let record: RouteRecord = serde_json::from_value(value)?;
        table.add(&prefix, record.port, &record.mac)?;
    }
    table.set_mac_addresses(document.mac_addresses);

    Ok(table)
}

pub fn render_document(table: &RouteTable) -> AppResult<String> {
    let mut routes = Map::new();
    for entry in table.entries() {
        let record = RouteRecord {
            port: entry.next_hop.port,
            mac: entry.next_hop.mac.to_string(),
        };
        routes.insert(entry.prefix.to_string(), serde_json::to_value(record)?);
    }

    let document = SavedDocument {
        routes,
        mac_addresses: table.mac_addresses(),
        generated_at: chrono::Local::now().format(GENERATED_AT_FORMAT).to_string(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

pub fn save(table: &RouteTable, path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_document(table)?)?;
    tracing::info!("Routing table saved to {}", path.display());
    Ok(())
}
