// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Configuration management for the router
//!
//! Supports command-line arguments and a TOML configuration file. The file
//! is accessed through the [`ConfigProvider`] property contract; a missing
//! file is not an error and yields the compiled-in defaults.

use crate::descriptor::ServiceDescriptor;
use crate::channel::DEFAULT_CHANNEL_QUEUE;
use crate::envelope::MAX_ENVELOPE_SIZE;
use crate::error::ConfigError;
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/mcrouter.toml";

/// What the process was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    Install,
    Uninstall,
    /// Interactive console mode
    RunConsole,
    /// Managed by the OS service manager, no console I/O
    RunService,
}

/// Command-line arguments for the router
#[derive(Parser, Debug, Default)]
#[command(name = "mcrouter")]
#[command(author = "MCRouter Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Multicast message router", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Install the router as an OS service
    #[arg(long, conflicts_with_all = ["uninstall", "console", "service"])]
    pub install: bool,

    /// Uninstall the OS service
    #[arg(long, conflicts_with_all = ["console", "service"])]
    pub uninstall: bool,

    /// Run interactively (default)
    #[arg(long, conflicts_with = "service")]
    pub console: bool,

    /// Run under the OS service manager
    #[arg(long)]
    pub service: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    pub fn command(&self) -> HostCommand {
        if self.install {
            HostCommand::Install
        } else if self.uninstall {
            HostCommand::Uninstall
        } else if self.service {
            HostCommand::RunService
        } else {
            HostCommand::RunConsole
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }
}

/// Property access to the configuration
pub trait ConfigProvider: Send + Sync {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn set_string(&mut self, section: &str, key: &str, value: &str);
    fn save(&self) -> Result<(), ConfigError>;

    /// Service descriptors declared in the configuration
    fn services(&self) -> Result<Vec<ServiceDescriptor>, ConfigError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ServicesSection {
    #[serde(default)]
    services: Vec<ServiceDescriptor>,
}

/// TOML file backed property store
#[derive(Debug, Clone)]
pub struct TomlConfigStore {
    path: PathBuf,
    table: toml::Table,
}

impl TomlConfigStore {
    /// Loads `path`; a missing file gives an empty store
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::empty(path));
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;
        Self::parse(path, &contents)
    }

    /// Parses TOML text as if it had been read from `path`
    pub fn parse(path: impl Into<PathBuf>, contents: &str) -> Result<Self, ConfigError> {
        let table: toml::Table =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(Self {
            path: path.into(),
            table,
        })
    }

    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: toml::Table::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for TomlConfigStore {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        let value = self.table.get(section)?.as_table()?.get(key)?;
        match value {
            toml::Value::String(s) => Some(s.clone()),
            toml::Value::Integer(i) => Some(i.to_string()),
            toml::Value::Float(f) => Some(f.to_string()),
            toml::Value::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn set_string(&mut self, section: &str, key: &str, value: &str) {
        let entry = self
            .table
            .entry(section.to_string())
            .or_insert(toml::Value::Table(toml::Table::new()));
        if !entry.is_table() {
            *entry = toml::Value::Table(toml::Table::new());
        }
        if let toml::Value::Table(table) = entry {
            table.insert(key.to_string(), infer_value(value));
        }
    }

    fn save(&self) -> Result<(), ConfigError> {
        let text = toml::to_string(&self.table).map_err(|e| ConfigError::Write(e.to_string()))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Write(e.to_string()))?;
        }
        fs::write(&self.path, text)
            .map_err(|e| ConfigError::Write(format!("{}: {}", self.path.display(), e)))
    }

    fn services(&self) -> Result<Vec<ServiceDescriptor>, ConfigError> {
        if !self.table.contains_key("services") {
            return Ok(Vec::new());
        }
        let text = toml::to_string(&self.table).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let section: ServicesSection =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(section.services)
    }
}

/// Keeps numbers and booleans typed when written through the string API
fn infer_value(value: &str) -> toml::Value {
    if let Ok(i) = value.parse::<i64>() {
        toml::Value::Integer(i)
    } else if let Ok(b) = value.parse::<bool>() {
        toml::Value::Boolean(b)
    } else {
        toml::Value::String(value.to_string())
    }
}

fn default_router_address() -> String {
    "127.0.0.1".to_string()
}

fn default_router_port() -> u16 {
    8181
}

fn default_queue_capacity() -> usize {
    256
}

fn default_channel_queue_capacity() -> usize {
    DEFAULT_CHANNEL_QUEUE
}

fn default_log_collector_port() -> u16 {
    8282
}

fn default_log_reconnect_ms() -> u64 {
    5000
}

fn default_log_buffer_capacity() -> usize {
    1024
}

fn default_service_name() -> String {
    "mcrouter".to_string()
}

fn default_unit_path() -> PathBuf {
    PathBuf::from("/etc/systemd/system/mcrouter.service")
}

/// Unified configuration after reading the CLI and the property store
#[derive(Debug, Clone)]
pub struct RouterConfiguration {
    /// Listening transport address (host:port)
    pub listen_address: String,
    pub max_envelope_size: usize,
    /// Capacity of the dispatcher queue
    pub queue_capacity: usize,
    /// Envelopes queued towards one peer before it is disconnected
    pub channel_queue_capacity: usize,
    pub log_enabled: bool,
    /// Log collector address (host:port)
    pub log_collector: String,
    pub log_reconnect_ms: u64,
    pub log_buffer_capacity: usize,
    pub service_name: String,
    pub unit_path: PathBuf,
    pub services: Vec<ServiceDescriptor>,
    pub verbose: bool,
}

impl Default for RouterConfiguration {
    fn default() -> Self {
        Self {
            listen_address: format!("{}:{}", default_router_address(), default_router_port()),
            max_envelope_size: MAX_ENVELOPE_SIZE,
            queue_capacity: default_queue_capacity(),
            channel_queue_capacity: default_channel_queue_capacity(),
            log_enabled: false,
            log_collector: format!("{}:{}", default_router_address(), default_log_collector_port()),
            log_reconnect_ms: default_log_reconnect_ms(),
            log_buffer_capacity: default_log_buffer_capacity(),
            service_name: default_service_name(),
            unit_path: default_unit_path(),
            services: Vec::new(),
            verbose: false,
        }
    }
}

impl RouterConfiguration {
    /// Creates configuration from command-line arguments and the file
    pub fn from_cli(args: &CliArgs) -> Result<Self, ConfigError> {
        let store = TomlConfigStore::load(args.config_path())?;
        let mut config = Self::from_provider(&store)?;
        config.verbose |= args.verbose;
        Ok(config)
    }

    /// Reads every setting through the property contract
    pub fn from_provider(provider: &dyn ConfigProvider) -> Result<Self, ConfigError> {
        let address = provider
            .get_string("router", "address")
            .unwrap_or_else(default_router_address);
        let port: u16 = typed(provider, "router", "port", default_router_port())?;

        let log_address = provider
            .get_string("logging", "collector_address")
            .unwrap_or_else(default_router_address);
        let log_port: u16 = typed(provider, "logging", "collector_port", default_log_collector_port())?;

        let max_envelope_size: usize =
            typed(provider, "router", "max_envelope_size", MAX_ENVELOPE_SIZE)?;
        if max_envelope_size == 0 || max_envelope_size > MAX_ENVELOPE_SIZE {
            return Err(ConfigError::InvalidValue {
                section: "router".to_string(),
                key: "max_envelope_size".to_string(),
                value: max_envelope_size.to_string(),
            });
        }

        Ok(Self {
            listen_address: format!("{}:{}", address, port),
            max_envelope_size,
            queue_capacity: typed(provider, "router", "queue_capacity", default_queue_capacity())?,
            channel_queue_capacity: typed(
                provider,
                "router",
                "channel_queue_capacity",
                default_channel_queue_capacity(),
            )?,
            log_enabled: typed(provider, "logging", "enabled", false)?,
            log_collector: format!("{}:{}", log_address, log_port),
            log_reconnect_ms: typed(provider, "logging", "reconnect_ms", default_log_reconnect_ms())?,
            log_buffer_capacity: typed(
                provider,
                "logging",
                "buffer_capacity",
                default_log_buffer_capacity(),
            )?,
            service_name: provider
                .get_string("service", "name")
                .unwrap_or_else(default_service_name),
            unit_path: provider
                .get_string("service", "unit_path")
                .map(PathBuf::from)
                .unwrap_or_else(default_unit_path),
            services: provider.services()?,
            verbose: typed(provider, "logging", "verbose", false)?,
        })
    }

    /// Prints configuration summary
    pub fn print_summary(&self) {
        println!("=== Router Configuration ===");
        println!("Listen Address: {}", self.listen_address);
        println!("Max Envelope Size: {} bytes", self.max_envelope_size);
        if self.log_enabled {
            println!("Log Collector: {}", self.log_collector);
        }
        if !self.services.is_empty() {
            let names: Vec<&str> = self.services.iter().map(|s| s.name.as_str()).collect();
            println!("Service Descriptors: {:?}", names);
        }
        println!();
    }
}

fn typed<T>(provider: &dyn ConfigProvider, section: &str, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match provider.get_string(section, key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: raw,
        }),
    }
}
