// RPC backend - programs routes over a live connection to the device

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use super::{BackendAdapter, BackendKind, InstallReport};
use crate::codec::{encode_num, format_ipv4};
use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult};
use crate::routes::{Prefix, RouteEntry, RouteTable};

const IPV4_BITWIDTH: u32 = 32;
const MAC_BITWIDTH: u32 = 48;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LpmMatch {
    pub field: String,
    pub value: Vec<u8>,
    pub prefix_len: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionParam {
    pub name: String,
    pub value: Vec<u8>,
}

/// Write request for one match-action table entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub table: String,
    pub matches: Vec<LpmMatch>,
    pub action: String,
    pub params: Vec<ActionParam>,
}

impl TableEntry {
    /// CIDR text of the first match field, for error reporting
    pub fn match_text(&self) -> String {
        match self.matches.first() {
            Some(m) => {
                let addr = m.value.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32);
                format!("{}/{}", format_ipv4(addr), m.prefix_len)
            }
            None => self.table.clone(),
        }
    }
}

/// Build the device write request for a route.
///
/// The match value has host bits cleared, since device runtimes reject LPM
/// keys with bits set past the prefix length.
pub fn build_table_entry(route: &RouteEntry, pipeline: &PipelineConfig) -> AppResult<TableEntry> {
    Ok(TableEntry {
        table: pipeline.table.clone(),
        matches: vec![LpmMatch {
            field: pipeline.match_field.clone(),
            value: encode_num(route.prefix.network() as u64, IPV4_BITWIDTH)?,
            prefix_len: route.prefix.len,
        }],
        action: pipeline.action.clone(),
        params: vec![
            ActionParam {
                name: pipeline.mac_param.clone(),
                value: encode_num(route.next_hop.mac.as_u64(), MAC_BITWIDTH)?,
            },
            ActionParam {
                name: pipeline.port_param.clone(),
                value: encode_num(route.next_hop.port as u64, pipeline.port_bitwidth)?,
            },
        ],
    })
}

/// Pairs of routes whose prefixes differ only in host bits.
///
/// Both map to the same device key, so the later write replaces or collides
/// with the earlier one. Each pair is `(earlier, later)` in table order.
pub fn colliding_keys(routes: &[RouteEntry]) -> Vec<(Prefix, Prefix)> {
    let mut first_seen: HashMap<(u32, u8), Prefix> = HashMap::new();
    let mut collisions = Vec::new();
    for route in routes {
        let key = (route.prefix.network(), route.prefix.len);
        match first_seen.get(&key) {
            Some(earlier) => collisions.push((*earlier, route.prefix)),
            None => {
                first_seen.insert(key, route.prefix);
            }
        }
    }
    collisions
}

/// Opens connections to the device control endpoint
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    type Connection: DeviceConnection;

    /// Fails with `AppError::Connection` when the endpoint is unreachable
    async fn connect(&self, address: &str) -> AppResult<Self::Connection>;
}

#[async_trait]
pub trait DeviceConnection: Send {
    /// Fails with `AppError::Write` when the device rejects the entry
    async fn write_entry(&mut self, entry: &TableEntry) -> AppResult<()>;

    async fn close(&mut self) -> AppResult<()>;
}

pub struct RpcBackend<C> {
    connector: C,
    address: String,
    pipeline: PipelineConfig,
}

impl<C: DeviceConnector> RpcBackend<C> {
    pub fn new(connector: C, address: String, pipeline: PipelineConfig) -> Self {
        RpcBackend {
            connector,
            address,
            pipeline,
        }
    }

    async fn write_all_routes(
        &self,
        conn: &mut C::Connection,
        table: &RouteTable,
        report: &mut InstallReport,
    ) {
        for (earlier, later) in colliding_keys(table.entries()) {
            tracing::warn!(
                "Routes {} and {} share device key {}/{}; {} will overwrite or be rejected",
                earlier,
                later,
                format_ipv4(later.network()),
                later.len,
                later
            );
        }

        for route in table.entries() {
            let result = match build_table_entry(route, &self.pipeline) {
                Ok(entry) => conn.write_entry(&entry).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    tracing::info!(
                        "Installed route: {} -> port {}, MAC {}",
                        route.prefix,
                        route.next_hop.port,
                        route.next_hop.mac
                    );
                    report.record_installed(route.prefix);
                }
                Err(e) => {
                    tracing::warn!("Failed to install route {}: {}", route.prefix, e);
                    report.record_failed(route.prefix, e.to_string());
                }
            }
        }
    }
}

#[async_trait]
impl<C: DeviceConnector> BackendAdapter for RpcBackend<C> {
    fn kind(&self) -> BackendKind {
        BackendKind::Rpc
    }

    async fn install(&mut self, table: &RouteTable) -> AppResult<InstallReport> {
        let mut conn = self.connector.connect(&self.address).await?;
        tracing::info!("Connected to device at {}", self.address);

        let mut report = InstallReport::new(BackendKind::Rpc);
        self.write_all_routes(&mut conn, table, &mut report).await;

        if let Err(e) = conn.close().await {
            tracing::warn!("Failed to close connection to {}: {}", self.address, e);
        }

        if report.success() {
            tracing::info!("All routes installed successfully");
        }
        Ok(report)
    }
}

#[derive(Debug, Serialize)]
struct WriteRequest<'a> {
    device_id: u64,
    op: &'static str,
    entry: &'a TableEntry,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Newline-delimited JSON over TCP.
///
/// Each request is one line and the device answers each with one line.
pub struct TcpDeviceConnector {
    device_id: u64,
}

impl TcpDeviceConnector {
    pub fn new(device_id: u64) -> Self {
        TcpDeviceConnector { device_id }
    }
}

pub struct TcpDeviceConnection {
    device_id: u64,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Set after a transport failure, when replies can no longer be paired
    /// with requests. No further requests are sent.
    desynced: bool,
}

#[async_trait]
impl DeviceConnector for TcpDeviceConnector {
    type Connection = TcpDeviceConnection;

    async fn connect(&self, address: &str) -> AppResult<TcpDeviceConnection> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| AppError::Connection {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let (read_half, write_half) = stream.into_split();
        Ok(TcpDeviceConnection {
            device_id: self.device_id,
            reader: BufReader::new(read_half),
            writer: write_half,
            desynced: false,
        })
    }
}

#[async_trait]
impl DeviceConnection for TcpDeviceConnection {
    async fn write_entry(&mut self, entry: &TableEntry) -> AppResult<()> {
        let write_error = |reason: String| AppError::Write {
            prefix: entry.match_text(),
            reason,
        };
        if self.desynced {
            return Err(write_error(
                "not sent, connection lost sync after an earlier transport failure".to_string(),
            ));
        }

        let request = WriteRequest {
            device_id: self.device_id,
            op: "write_table_entry",
            entry,
        };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        // Cleared again once a well-formed reply arrives
        self.desynced = true;

        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| write_error(e.to_string()))?;

        let mut response = String::new();
        let read = self
            .reader
            .read_line(&mut response)
            .await
            .map_err(|e| write_error(e.to_string()))?;
        if read == 0 {
            return Err(write_error("connection closed by device".to_string()));
        }

        let response: WriteResponse = serde_json::from_str(response.trim_end())
            .map_err(|e| write_error(format!("invalid response: {}", e)))?;
        self.desynced = false;
        if response.ok {
            Ok(())
        } else {
            Err(write_error(
                response.error.unwrap_or_else(|| "rejected by device".to_string()),
            ))
        }
    }

    async fn close(&mut self) -> AppResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::FakeConnector;
    use tokio::net::TcpListener;

    fn two_routes() -> RouteTable {
        let mut table = RouteTable::new();
        table.add("192.168.1.0/24", 1, "02:00:00:00:00:01").unwrap();
        table.add("10.0.0.0/8", 3, "02:00:00:00:00:03").unwrap();
        table
    }

    #[test]
    fn test_build_table_entry() {
        let mut table = RouteTable::new();
        table.add("10.1.2.3/8", 3, "02:00:00:00:00:03").unwrap();

        let entry = build_table_entry(&table.entries()[0], &PipelineConfig::default()).unwrap();
        assert_eq!(entry.table, "MyIngress.ipv4_lpm");
        assert_eq!(entry.action, "MyIngress.ipv4_forward");
        assert_eq!(
            entry.matches,
            vec![LpmMatch {
                field: "hdr.ipv4.dstAddr".to_string(),
                value: vec![10, 0, 0, 0],
                prefix_len: 8,
            }]
        );
        assert_eq!(entry.params[0].name, "dstAddr");
        assert_eq!(entry.params[0].value, vec![2, 0, 0, 0, 0, 3]);
        assert_eq!(entry.params[1].name, "port");
        assert_eq!(entry.params[1].value, vec![0, 3]);
        assert_eq!(entry.match_text(), "10.0.0.0/8");
    }

    #[test]
    fn test_build_table_entry_port_too_wide() {
        let mut table = RouteTable::new();
        table.add("10.0.0.0/8", 600, "02:00:00:00:00:03").unwrap();
        assert!(build_table_entry(&table.entries()[0], &PipelineConfig::default()).is_err());
    }

    #[test]
    fn test_colliding_keys() {
        let mut table = RouteTable::new();
        table.add("10.0.0.0/8", 3, "02:00:00:00:00:03").unwrap();
        table.add("10.1.0.0/8", 4, "02:00:00:00:00:04").unwrap();
        table.add("10.1.0.0/16", 5, "02:00:00:00:00:05").unwrap();
        table.add("192.168.1.0/24", 1, "02:00:00:00:00:01").unwrap();

        let collisions = colliding_keys(table.entries());
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].0.to_string(), "10.0.0.0/8");
        assert_eq!(collisions[0].1.to_string(), "10.1.0.0/8");
        assert!(colliding_keys(two_routes().entries()).is_empty());
    }

    #[tokio::test]
    async fn test_install_writes_every_route() {
        let connector = FakeConnector::new();
        let mut backend = RpcBackend::new(connector.clone(), "sw:50051".to_string(), PipelineConfig::default());

        let report = backend.install(&two_routes()).await.unwrap();
        assert!(report.success());
        assert_eq!(report.backend, BackendKind::Rpc);
        assert_eq!(report.artifact, None);
        assert_eq!(connector.written(), vec!["192.168.1.0/24", "10.0.0.0/8"]);
        assert!(connector.closed());
    }

    #[tokio::test]
    async fn test_install_continues_after_write_failure() {
        let connector = FakeConnector::new().rejecting("192.168.1.0/24");
        let mut backend = RpcBackend::new(connector.clone(), "sw:50051".to_string(), PipelineConfig::default());

        let report = backend.install(&two_routes()).await.unwrap();
        assert!(!report.success());
        assert_eq!(report.outcomes.len(), 2);
        assert!(matches!(report.outcomes[0].status, crate::backend::RouteStatus::Failed(_)));
        assert_eq!(report.outcomes[1].status, crate::backend::RouteStatus::Installed);
        assert_eq!(connector.written(), vec!["10.0.0.0/8"]);
        assert!(connector.closed());
    }

    #[tokio::test]
    async fn test_install_fails_when_unreachable() {
        let connector = FakeConnector::unreachable();
        let mut backend = RpcBackend::new(connector.clone(), "sw:50051".to_string(), PipelineConfig::default());

        let err = backend.install(&two_routes()).await.unwrap_err();
        assert!(err.triggers_fallback());
        assert!(connector.written().is_empty());
    }

    #[tokio::test]
    async fn test_tcp_connector_exchanges_json_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let device = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let mut seen = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                let request: serde_json::Value = serde_json::from_str(&line).unwrap();
                let prefix_len = request["entry"]["matches"][0]["prefix_len"].as_u64().unwrap();
                seen.push(request);
                let reply = if prefix_len == 8 {
                    "{\"ok\":false,\"error\":\"table full\"}\n"
                } else {
                    "{\"ok\":true}\n"
                };
                write_half.write_all(reply.as_bytes()).await.unwrap();
            }
            seen
        });

        let mut backend = RpcBackend::new(TcpDeviceConnector::new(7), address, PipelineConfig::default());
        let report = backend.install(&two_routes()).await.unwrap();

        assert_eq!(report.outcomes[0].status, crate::backend::RouteStatus::Installed);
        match &report.outcomes[1].status {
            crate::backend::RouteStatus::Failed(reason) => assert!(reason.contains("table full")),
            other => panic!("unexpected status {:?}", other),
        }

        let seen = device.await.unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0]["device_id"], 7);
        assert_eq!(seen[0]["op"], "write_table_entry");
        assert_eq!(seen[0]["entry"]["table"], "MyIngress.ipv4_lpm");
    }

    #[tokio::test]
    async fn test_tcp_connector_stops_after_garbled_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let device = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let mut seen = 0;
            while let Some(_line) = lines.next_line().await.unwrap() {
                seen += 1;
                write_half.write_all(b"garbled\n").await.unwrap();
            }
            seen
        });

        let mut backend = RpcBackend::new(TcpDeviceConnector::new(7), address, PipelineConfig::default());
        let report = backend.install(&two_routes()).await.unwrap();

        assert_eq!(report.failures().count(), 2);
        match &report.outcomes[1].status {
            crate::backend::RouteStatus::Failed(reason) => assert!(reason.contains("not sent")),
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(device.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tcp_connector_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = match TcpDeviceConnector::new(0).connect(&address).await {
            Ok(_) => panic!("connected to a closed port"),
            Err(e) => e,
        };
        assert!(matches!(err, AppError::Connection { .. }));
    }
}
