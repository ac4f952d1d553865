// Configuration management for the route controller
// Supports CLI arguments, config file (TOML), and environment variables

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;

use crate::backend::BackendKind;
use crate::error::AppError;
use crate::routes::PortId;

/// P4 route controller - builds an IPv4 forwarding table and installs it on a switch
#[derive(Parser, Debug, Clone)]
#[command(name = "p4-route-controller")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Switch address
    #[arg(long, env = "P4CTL_SWITCH_ADDR")]
    pub switch_addr: Option<String>,

    /// Switch control port
    #[arg(long, env = "P4CTL_SWITCH_PORT")]
    pub switch_port: Option<u16>,

    /// Device identifier sent with each write request
    #[arg(long, env = "P4CTL_DEVICE_ID")]
    pub device_id: Option<u64>,

    /// Routing table JSON file
    #[arg(long, env = "P4CTL_ROUTING_TABLE")]
    pub routing_table: Option<PathBuf>,

    /// Backend used to program the switch
    #[arg(long, value_enum, env = "P4CTL_METHOD")]
    pub method: Option<BackendKind>,

    /// Where the script backend writes switch CLI commands
    #[arg(long, env = "P4CTL_COMMANDS_FILE")]
    pub commands_file: Option<PathBuf>,

    /// Treat the RPC backend as unavailable
    #[arg(long, env = "P4CTL_NO_RPC")]
    pub no_rpc: bool,

    /// Don't write the routing table back after installing
    #[arg(long, env = "P4CTL_NO_SAVE")]
    pub no_save: bool,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(short, long, env = "P4CTL_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Path to configuration file
    #[arg(short, long, env = "P4CTL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Load, show and install the routing table, then save it (default)
    Install,
    /// Print the routing table
    Show,
    /// Add or replace a route and save the table
    Add {
        /// Destination prefix, e.g. 192.168.3.0/24
        #[arg(long)]
        prefix: String,
        /// Egress port
        #[arg(long)]
        port: PortId,
        /// Next-hop MAC address, e.g. 02:00:00:00:00:04
        #[arg(long)]
        mac: String,
    },
    /// Remove a route and save the table
    Remove {
        #[arg(long)]
        prefix: String,
    },
    /// Show which route a destination address would take
    Lookup {
        #[arg(long)]
        ip: String,
    },
}

/// Configuration file structure (TOML format)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    /// Switch connection settings
    #[serde(default)]
    pub switch: SwitchConfig,

    /// Installation settings
    #[serde(default)]
    pub install: InstallConfig,

    /// Match-action table naming in the loaded P4 program
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchConfig {
    #[serde(default = "default_switch_address")]
    pub address: String,

    #[serde(default = "default_switch_port")]
    pub port: u16,

    #[serde(default)]
    pub device_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    #[serde(default = "default_method")]
    pub method: BackendKind,

    /// Allow the RPC backend at all
    #[serde(default = "default_true")]
    pub rpc_enabled: bool,

    #[serde(default = "default_routing_table")]
    pub routing_table: PathBuf,

    #[serde(default = "default_commands_file")]
    pub commands_file: PathBuf,

    /// Write the routing table back after installing
    #[serde(default = "default_true")]
    pub save: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default = "default_action")]
    pub action: String,

    #[serde(default = "default_match_field")]
    pub match_field: String,

    #[serde(default = "default_mac_param")]
    pub mac_param: String,

    #[serde(default = "default_port_param")]
    pub port_param: String,

    /// Width of the egress port field (9 bits on v1model)
    #[serde(default = "default_port_bitwidth")]
    pub port_bitwidth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_switch_address() -> String {
    "127.0.0.1".to_string()
}
fn default_switch_port() -> u16 {
    50051
}
fn default_method() -> BackendKind {
    BackendKind::Script
}
fn default_true() -> bool {
    true
}
fn default_routing_table() -> PathBuf {
    PathBuf::from("control_plane/routing_table.json")
}
fn default_commands_file() -> PathBuf {
    PathBuf::from("control_plane/cli_commands.txt")
}
fn default_table() -> String {
    "MyIngress.ipv4_lpm".to_string()
}
fn default_action() -> String {
    "MyIngress.ipv4_forward".to_string()
}
fn default_match_field() -> String {
    "hdr.ipv4.dstAddr".to_string()
}
fn default_mac_param() -> String {
    "dstAddr".to_string()
}
fn default_port_param() -> String {
    "port".to_string()
}
fn default_port_bitwidth() -> u32 {
    9
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SwitchConfig {
    fn default() -> Self {
        SwitchConfig {
            address: default_switch_address(),
            port: default_switch_port(),
            device_id: 0,
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        InstallConfig {
            method: default_method(),
            rpc_enabled: default_true(),
            routing_table: default_routing_table(),
            commands_file: default_commands_file(),
            save: default_true(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            table: default_table(),
            action: default_action(),
            match_field: default_match_field(),
            mac_param: default_mac_param(),
            port_param: default_port_param(),
            port_bitwidth: default_port_bitwidth(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

/// Merged configuration from all sources
#[derive(Debug, Clone)]
pub struct Config {
    pub switch_addr: String,
    pub switch_port: u16,
    pub device_id: u64,
    pub routing_table: PathBuf,
    pub commands_file: PathBuf,
    pub method: BackendKind,
    /// Resolved once at startup; the installer treats it as plain input
    pub rpc_available: bool,
    pub save_table: bool,
    pub log_level: Level,
    pub pipeline: PipelineConfig,
    pub command: Command,
}

impl Config {
    /// Load configuration from all sources (CLI args, config file, defaults)
    /// Priority: CLI args / environment variables > Config file > Defaults
    pub fn load() -> anyhow::Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli_args: CliArgs) -> anyhow::Result<Self> {
        let config_file = if let Some(config_path) = &cli_args.config {
            tracing::info!("Loading configuration from: {}", config_path.display());
            let config_content = std::fs::read_to_string(config_path)?;
            toml::from_str::<ConfigFile>(&config_content)?
        } else {
            // Try loading from default locations
            let default_paths = vec![
                PathBuf::from("config.toml"),
                PathBuf::from("p4-route-controller.toml"),
            ];

            let mut loaded_config = None;
            for path in default_paths {
                if path.exists() {
                    tracing::info!("Loading configuration from: {}", path.display());
                    let config_content = std::fs::read_to_string(&path)?;
                    loaded_config = Some(toml::from_str::<ConfigFile>(&config_content)?);
                    break;
                }
            }

            loaded_config.unwrap_or_default()
        };

        Self::merge(cli_args, config_file)
    }

    /// Merge configuration (CLI args override config file)
    pub fn merge(cli_args: CliArgs, config_file: ConfigFile) -> anyhow::Result<Self> {
        let log_level = parse_log_level(
            cli_args
                .log_level
                .as_deref()
                .unwrap_or(&config_file.logging.level),
        )?;

        let port_bitwidth = config_file.pipeline.port_bitwidth;
        if port_bitwidth == 0 || port_bitwidth > 32 {
            return Err(AppError::Config(format!(
                "pipeline.port_bitwidth must be between 1 and 32, got {}",
                port_bitwidth
            ))
            .into());
        }

        let rpc_available =
            cfg!(feature = "rpc") && !cli_args.no_rpc && config_file.install.rpc_enabled;

        Ok(Config {
            switch_addr: cli_args.switch_addr.unwrap_or(config_file.switch.address),
            switch_port: cli_args.switch_port.unwrap_or(config_file.switch.port),
            device_id: cli_args.device_id.unwrap_or(config_file.switch.device_id),
            routing_table: cli_args
                .routing_table
                .unwrap_or(config_file.install.routing_table),
            commands_file: cli_args
                .commands_file
                .unwrap_or(config_file.install.commands_file),
            method: cli_args.method.unwrap_or(config_file.install.method),
            rpc_available,
            save_table: !cli_args.no_save && config_file.install.save,
            log_level,
            pipeline: config_file.pipeline,
            command: cli_args.command.unwrap_or(Command::Install),
        })
    }

    /// `host:port` of the device control endpoint
    pub fn switch_address(&self) -> String {
        format!("{}:{}", self.switch_addr, self.switch_port)
    }
}

fn parse_log_level(level_str: &str) -> anyhow::Result<Level> {
    match level_str.to_lowercase().as_str() {
        "error" => Ok(Level::ERROR),
        "warn" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        _ => Err(anyhow::anyhow!("Invalid log level: {}", level_str)),
    }
}
