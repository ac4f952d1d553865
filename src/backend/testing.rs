// In-memory device connector for backend and installer tests

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::rpc::{DeviceConnection, DeviceConnector, TableEntry};
use crate::error::{AppError, AppResult};

#[derive(Debug, Default)]
struct DeviceState {
    written: Vec<String>,
    closed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    unreachable: bool,
    rejected: Vec<String>,
    state: Arc<Mutex<DeviceState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        FakeConnector::default()
    }

    pub fn unreachable() -> Self {
        FakeConnector {
            unreachable: true,
            ..FakeConnector::default()
        }
    }

    /// Make the device refuse writes for this prefix
    pub fn rejecting(mut self, prefix: &str) -> Self {
        self.rejected.push(prefix.to_string());
        self
    }

    pub fn written(&self) -> Vec<String> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

pub struct FakeConnection {
    rejected: Vec<String>,
    state: Arc<Mutex<DeviceState>>,
}

#[async_trait]
impl DeviceConnector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self, address: &str) -> AppResult<FakeConnection> {
        if self.unreachable {
            return Err(AppError::Connection {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(FakeConnection {
            rejected: self.rejected.clone(),
            state: self.state.clone(),
        })
    }
}

#[async_trait]
impl DeviceConnection for FakeConnection {
    async fn write_entry(&mut self, entry: &TableEntry) -> AppResult<()> {
        let prefix = entry.match_text();
        if self.rejected.contains(&prefix) {
            return Err(AppError::Write {
                prefix,
                reason: "rejected by device".to_string(),
            });
        }
        self.state.lock().unwrap().written.push(prefix);
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}
