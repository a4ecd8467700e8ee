//! Handshake that gates whether a spawned binary is accepted as a plugin.
//!
//! The host passes the magic cookie and supported protocol version through the
//! child's environment. A plugin that accepts them prints one line to stdout:
//!
//! ```text
//! CORE-PROTOCOL-VERSION|APP-PROTOCOL-VERSION|NETWORK-TYPE|NETWORK-ADDR|PROTOCOL
//! 1|1|tcp|127.0.0.1:1234|grpc
//! ```

use crate::config::HandshakeConfig;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const CORE_PROTOCOL_VERSION: u32 = 1;

pub const ENV_PROTOCOL_VERSIONS: &str = "PLUGIN_PROTOCOL_VERSIONS";
pub const ENV_MIN_PORT: &str = "PLUGIN_MIN_PORT";
pub const ENV_MAX_PORT: &str = "PLUGIN_MAX_PORT";

pub const DEFAULT_MIN_PORT: u16 = 10000;
pub const DEFAULT_MAX_PORT: u16 = 25000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkAddress {
    Tcp(String),
    Unix(PathBuf),
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkAddress::Tcp(addr) => write!(f, "tcp://{}", addr),
            NetworkAddress::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Grpc,
    NetRpc,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grpc" => Ok(Protocol::Grpc),
            "netrpc" => Ok(Protocol::NetRpc),
            other => Err(format!("unknown protocol {:?}", other)),
        }
    }
}

/// Connection info announced by a plugin on its first stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeLine {
    pub core_version: u32,
    pub app_version: u32,
    pub address: NetworkAddress,
    pub protocol: Protocol,
}

impl HandshakeLine {
    pub fn parse(line: &str) -> Result<Self, String> {
        let parts: Vec<&str> = line.trim().split('|').collect();
        if parts.len() < 4 {
            return Err(format!(
                "unrecognized handshake line {:?}: expected at least 4 '|' separated fields",
                line.trim()
            ));
        }

        let core_version = parts[0]
            .parse::<u32>()
            .map_err(|_| format!("invalid core protocol version {:?}", parts[0]))?;
        let app_version = parts[1]
            .parse::<u32>()
            .map_err(|_| format!("invalid app protocol version {:?}", parts[1]))?;

        let address = match parts[2] {
            "tcp" => NetworkAddress::Tcp(parts[3].to_string()),
            "unix" => NetworkAddress::Unix(PathBuf::from(parts[3])),
            other => return Err(format!("unsupported network type {:?}", other)),
        };
        if parts[3].is_empty() {
            return Err("empty network address".to_string());
        }

        // Older plugins omit the protocol field and speak net/rpc.
        let protocol = match parts.get(4) {
            Some(p) if !p.is_empty() => p.parse::<Protocol>()?,
            _ => Protocol::NetRpc,
        };

        Ok(Self {
            core_version,
            app_version,
            address,
            protocol,
        })
    }

    /// Checks the announced versions and protocol against what the host speaks.
    pub fn verify(&self, config: &HandshakeConfig) -> Result<(), String> {
        if self.core_version != CORE_PROTOCOL_VERSION {
            return Err(format!(
                "core protocol version {} is not supported (host speaks {})",
                self.core_version, CORE_PROTOCOL_VERSION
            ));
        }
        if self.app_version != config.protocol_version {
            return Err(format!(
                "protocol version {} does not match host protocol version {}",
                self.app_version, config.protocol_version
            ));
        }
        if self.protocol != Protocol::Grpc {
            return Err(format!(
                "plugin speaks {:?}, only gRPC plugins are supported",
                self.protocol
            ));
        }
        Ok(())
    }
}

/// Environment variables handed to every spawned plugin.
pub fn child_env(config: &HandshakeConfig) -> Vec<(String, String)> {
    vec![
        (
            config.magic_cookie_key.clone(),
            config.magic_cookie_value.clone(),
        ),
        (
            ENV_PROTOCOL_VERSIONS.to_string(),
            config.protocol_version.to_string(),
        ),
        (ENV_MIN_PORT.to_string(), DEFAULT_MIN_PORT.to_string()),
        (ENV_MAX_PORT.to_string(), DEFAULT_MAX_PORT.to_string()),
    ]
}
