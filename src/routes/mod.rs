// Routes module - forwarding table model, persistence and lookups

pub mod lookup;
pub mod store;

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::codec::{self, MacAddress};
use crate::error::{AppError, AppResult};

/// Egress port identifier on the target device
pub type PortId = u32;

/// IPv4 network in CIDR form.
///
/// Host bits past `len` are kept as written so the prefix renders back to the
/// same text; matching masks them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prefix {
    pub addr: u32,
    pub len: u8,
}

impl Prefix {
    pub fn new(addr: u32, len: u8) -> AppResult<Self> {
        if len > 32 {
            return Err(AppError::Format(format!(
                "prefix length {} must be between 0 and 32",
                len
            )));
        }
        Ok(Prefix { addr, len })
    }

    pub fn mask(&self) -> u32 {
        if self.len == 0 {
            0
        } else {
            u32::MAX << (32 - self.len)
        }
    }

    /// Address with host bits cleared
    pub fn network(&self) -> u32 {
        self.addr & self.mask()
    }

    pub fn contains(&self, addr: u32) -> bool {
        (addr & self.mask()) == self.network()
    }
}

impl FromStr for Prefix {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        let (addr, len) = codec::parse_prefix(s)?;
        Prefix::new(addr, len)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", codec::format_ipv4(self.addr), self.len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextHop {
    pub port: PortId,
    pub mac: MacAddress,
}

impl NextHop {
    pub fn new(port: PortId, mac: MacAddress) -> AppResult<Self> {
        if port == 0 {
            return Err(AppError::Format("egress port must be a positive integer".to_string()));
        }
        Ok(NextHop { port, mac })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub prefix: Prefix,
    pub next_hop: NextHop,
}

/// Prefix to next-hop bindings, kept in insertion order.
///
/// `mac_addresses` is carried through load and save untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    mac_addresses: Map<String, Value>,
}

impl RouteTable {
    pub fn new() -> Self {
        RouteTable::default()
    }

    /// Table used when no routing document can be read
    pub fn default_routes() -> Self {
        let mut table = RouteTable::new();
        for (addr, len, port, mac) in [
            ([192, 168, 1, 0], 24, 1, [0x02, 0, 0, 0, 0, 0x01]),
            ([192, 168, 2, 0], 24, 2, [0x02, 0, 0, 0, 0, 0x02]),
            ([10, 0, 0, 0], 8, 3, [0x02, 0, 0, 0, 0, 0x03]),
        ] {
            table.insert(RouteEntry {
                prefix: Prefix { addr: u32::from_be_bytes(addr), len },
                next_hop: NextHop { port, mac: MacAddress::new(mac) },
            });
        }
        table
    }

    /// Validate all three fields, then insert or overwrite the route.
    pub fn add(&mut self, prefix: &str, port: PortId, mac: &str) -> AppResult<()> {
        let prefix: Prefix = prefix.parse()?;
        let mac: MacAddress = mac.parse()?;
        let next_hop = NextHop::new(port, mac)?;

        self.insert(RouteEntry { prefix, next_hop });
        tracing::debug!("Added route: {} -> port {}, MAC {}", prefix, port, mac);
        Ok(())
    }

    /// Insert keeping the original position of an overwritten key
    pub fn insert(&mut self, entry: RouteEntry) {
        match self.entries.iter_mut().find(|e| e.prefix == entry.prefix) {
            Some(existing) => existing.next_hop = entry.next_hop,
            None => self.entries.push(entry),
        }
    }

    pub fn remove(&mut self, prefix: &str) -> AppResult<bool> {
        let prefix: Prefix = prefix.parse()?;
        let before = self.entries.len();
        self.entries.retain(|e| e.prefix != prefix);

        let removed = self.entries.len() != before;
        if removed {
            tracing::debug!("Removed route: {}", prefix);
        } else {
            tracing::debug!("Route not found: {}", prefix);
        }
        Ok(removed)
    }

    pub fn get(&self, prefix: &str) -> AppResult<Option<NextHop>> {
        let prefix: Prefix = prefix.parse()?;
        Ok(self
            .entries
            .iter()
            .find(|e| e.prefix == prefix)
            .map(|e| e.next_hop))
    }

    /// Longest-prefix match for a destination address, for diagnostics only
    pub fn lookup(&self, ip: &str) -> AppResult<Option<&RouteEntry>> {
        let addr = codec::parse_ipv4(ip)?;
        Ok(lookup::RouteEngine::new(self).lookup(addr))
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn mac_addresses(&self) -> &Map<String, Value> {
        &self.mac_addresses
    }

    pub fn set_mac_addresses(&mut self, mac_addresses: Map<String, Value>) {
        self.mac_addresses = mac_addresses;
    }
}

impl fmt::Display for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Routing Table ===")?;
        for entry in &self.entries {
            writeln!(
                f,
                "{:<15} -> port {}, MAC {}",
                entry.prefix.to_string(),
                entry.next_hop.port,
                entry.next_hop.mac
            )?;
        }
        writeln!(f, "====================")
    }
}
