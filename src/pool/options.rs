//! Pool configuration.
use serde_derive::Deserialize;

use std::convert::TryFrom;
use std::time::Duration;

use crate::connstring::{self, ConnectionString, DEFAULT_PORT};
use crate::error::Error::ArgumentError;
use crate::error::Result;

/// TLS settings handed through to the transport.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TlsOptions {
    pub enabled: bool,
    pub ca_file: Option<String>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub passphrase: Option<String>,
    pub reject_unauthorized: bool,
    pub check_server_identity: bool,
}

/// Options recognized by a `ConnectionPool`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolOptions {
    pub host: String,
    pub port: u16,
    /// Maximum number of sockets.
    pub size: usize,
    /// Sockets opened up front once the first connect succeeds and kept open afterwards.
    pub min_size: usize,
    pub connection_timeout_ms: u64,
    pub socket_timeout_ms: u64,
    /// Socket timeout applied to monitoring writes without their own timeout.
    pub monitoring_socket_timeout_ms: u64,
    pub keep_alive: bool,
    pub keep_alive_initial_delay_ms: u64,
    pub no_delay: bool,
    pub tls: TlsOptions,
    pub reconnect: bool,
    pub reconnect_interval_ms: u64,
    pub reconnect_tries: u32,
}

impl Default for PoolOptions {
    fn default() -> PoolOptions {
        PoolOptions {
            host: String::from("localhost"),
            port: DEFAULT_PORT,
            size: 5,
            min_size: 0,
            connection_timeout_ms: 30_000,
            socket_timeout_ms: 360_000,
            monitoring_socket_timeout_ms: 30_000,
            keep_alive: true,
            keep_alive_initial_delay_ms: 300_000,
            no_delay: true,
            tls: TlsOptions::default(),
            reconnect: true,
            reconnect_interval_ms: 1000,
            reconnect_tries: 30,
        }
    }
}

impl PoolOptions {
    pub fn new<T: Into<String>>(host: T, port: u16) -> PoolOptions {
        PoolOptions {
            host: host.into(),
            port,
            ..PoolOptions::default()
        }
    }

    /// Loads options from a JSON object with camelCase keys. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<PoolOptions> {
        let options: PoolOptions = serde_json::from_str(json)
            .map_err(|err| ArgumentError(format!("invalid pool options: {}", err)))?;
        options.validate()?;
        Ok(options)
    }

    /// Builds options for the host at `index` of a parsed connection string.
    pub fn from_connection_string(config: &ConnectionString, index: usize) -> Result<PoolOptions> {
        let host = config.hosts.get(index).ok_or_else(|| {
            ArgumentError(format!("connection string has no host at index {}.", index))
        })?;

        let mut options = PoolOptions::new(host.host_name.clone(), host.port);
        let opts = &config.options;

        if let Some(size) = opts.get_u64("maxPoolSize")? {
            options.size = checked("maxPoolSize", size)?;
        }
        if let Some(size) = opts.get_u64("minPoolSize")? {
            options.min_size = checked("minPoolSize", size)?;
        }
        if let Some(ms) = opts.get_u64("connectTimeoutMS")? {
            options.connection_timeout_ms = ms;
        }
        if let Some(ms) = opts.get_u64("socketTimeoutMS")? {
            options.socket_timeout_ms = ms;
        }
        if let Some(keep_alive) = opts.get_bool("keepAlive")? {
            options.keep_alive = keep_alive;
        }
        if let Some(tls) = opts.get_bool("tls")? {
            options.tls.enabled = tls;
        } else if let Some(ssl) = opts.get_bool("ssl")? {
            options.tls.enabled = ssl;
        }
        if let Some(reconnect) = opts.get_bool("autoReconnect")? {
            options.reconnect = reconnect;
        }
        if let Some(tries) = opts.get_u64("reconnectTries")? {
            options.reconnect_tries = checked("reconnectTries", tries)?;
        }
        if let Some(ms) = opts.get_u64("reconnectInterval")? {
            options.reconnect_interval_ms = ms;
        }

        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(ArgumentError("pool size must be at least 1.".to_owned()));
        }

        if self.min_size > self.size {
            return Err(ArgumentError(format!(
                "minimum pool size {} exceeds the pool size {}.",
                self.min_size, self.size
            )));
        }

        if self.reconnect && self.reconnect_tries == 0 {
            return Err(ArgumentError(
                "reconnectTries must be at least 1 when reconnect is enabled.".to_owned(),
            ));
        }

        Ok(())
    }

    /// The normalized `host:port` address of the node.
    pub fn address(&self) -> String {
        connstring::Host::new(self.host.as_str(), self.port).to_string()
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn monitoring_socket_timeout(&self) -> Duration {
        Duration::from_millis(self.monitoring_socket_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

fn checked<T: TryFrom<u64>>(name: &str, value: u64) -> Result<T> {
    T::try_from(value).map_err(|_| ArgumentError(format!("{} is out of range: {}.", name, value)))
}
