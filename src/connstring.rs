//! Connection string parsing and host address normalization.
use crate::error::Error::ArgumentError;
use crate::error::Result;

use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_PORT: u16 = 27017;
pub const URI_SCHEME: &str = "mongodb://";

/// Hostname and port of a single node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Host {
    pub host_name: String,
    pub port: u16,
}

impl Host {
    pub fn new<T: Into<String>>(host_name: T, port: u16) -> Host {
        Host {
            host_name: host_name.into().to_ascii_lowercase(),
            port,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if self.host_name.contains(':') {
            write!(fmt, "[{}]:{}", self.host_name, self.port)
        } else {
            write!(fmt, "{}:{}", self.host_name, self.port)
        }
    }
}

/// URI options, keyed case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    options: BTreeMap<String, String>,
}

impl ConnectionOptions {
    pub fn get(&self, key: &str) -> Option<&String> {
        self.options.get(&key.to_ascii_lowercase())
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key).map(|s| s.as_str()) {
            None => Ok(None),
            Some("true") => Ok(Some(true)),
            Some("false") => Ok(Some(false)),
            Some(other) => Err(ArgumentError(format!(
                "option '{}' must be 'true' or 'false', got '{}'.",
                key, other
            ))),
        }
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.get(key) {
            None => Ok(None),
            Some(val) => val.parse::<u64>().map(Some).map_err(|_| {
                ArgumentError(format!("option '{}' must be an unsigned integer.", key))
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    fn insert(&mut self, key: &str, val: &str) {
        self.options.insert(key.to_ascii_lowercase(), val.to_owned());
    }
}

/// A parsed seed list with credentials and options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub hosts: Vec<Host>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub options: ConnectionOptions,
}

impl ConnectionString {
    /// A connection string for a single node.
    pub fn new(host_name: &str, port: u16) -> ConnectionString {
        ConnectionString {
            hosts: vec![Host::new(host_name, port)],
            user: None,
            password: None,
            database: None,
            options: ConnectionOptions::default(),
        }
    }

    /// The configured replica set name, if any.
    pub fn replica_set(&self) -> Option<&String> {
        self.options.get("replicaSet")
    }
}

/// Parses `mongodb://[user:pass@]host[:port][,host...][/db][?opts]`.
pub fn parse(address: &str) -> Result<ConnectionString> {
    if !address.starts_with(URI_SCHEME) {
        return Err(ArgumentError(
            "MongoDB connection string must start with 'mongodb://'.".to_owned(),
        ));
    }

    let addr = &address[URI_SCHEME.len()..];
    let (host_str, path_str) = partition(addr, "/");

    if path_str.is_empty() && host_str.contains('?') {
        return Err(ArgumentError(
            "A '/' is required between the host list and any options.".to_owned(),
        ));
    }

    let (user, password, hosts) = if host_str.contains('@') {
        let (user_info, host_string) = rpartition(host_str, "@");
        let (u, p) = parse_user_info(user_info)?;
        (Some(u.to_owned()), Some(p.to_owned()), split_hosts(host_string)?)
    } else {
        (None, None, split_hosts(host_str)?)
    };

    let (database, opts) = if path_str.starts_with('?') {
        (None, &path_str[1..])
    } else {
        let (db, opts) = partition(path_str, "?");
        let db = if db.is_empty() { None } else { Some(db.to_owned()) };
        (db, opts)
    };

    let options = if opts.is_empty() {
        ConnectionOptions::default()
    } else {
        split_options(opts)?
    };

    Ok(ConnectionString {
        hosts,
        user,
        password,
        database,
        options,
    })
}

fn parse_user_info(user_info: &str) -> Result<(&str, &str)> {
    let (user, password) = rpartition(user_info, ":");
    if user_info.contains('@') || user.contains(':') {
        return Err(ArgumentError(
            "':' or '@' characters in a username or password must be escaped according to RFC 2396."
                .to_owned(),
        ));
    }
    if user.is_empty() {
        return Err(ArgumentError(
            "The empty string is not a valid username.".to_owned(),
        ));
    }
    Ok((user, password))
}

fn parse_ipv6_literal_host(entity: &str) -> Result<Host> {
    let close = entity.find(']').ok_or_else(|| {
        ArgumentError(
            "An IPv6 address must be enclosed in '[' and ']' according to RFC 2732.".to_owned(),
        )
    })?;

    let rest = &entity[close + 1..];
    let port = if rest.is_empty() {
        DEFAULT_PORT
    } else if rest.starts_with(':') {
        rest[1..]
            .parse::<u16>()
            .map_err(|_| ArgumentError("Port must be an integer.".to_owned()))?
    } else {
        return Err(ArgumentError(format!("Invalid IPv6 host '{}'.", entity)));
    };

    Ok(Host::new(&entity[1..close], port))
}

/// Parses `host`, `host:port` or `[v6]:port`. Host names are lowercased.
pub fn parse_host(entity: &str) -> Result<Host> {
    if entity.starts_with('[') {
        return parse_ipv6_literal_host(entity);
    }

    if entity.is_empty() {
        return Err(ArgumentError("Empty host.".to_owned()));
    }

    if !entity.contains(':') {
        return Ok(Host::new(entity, DEFAULT_PORT));
    }

    let (host, port) = partition(entity, ":");
    if port.contains(':') {
        return Err(ArgumentError(
            "An IPv6 address literal must be enclosed in '[' and ']' according to RFC 2732."
                .to_owned(),
        ));
    }

    match port.parse::<u16>() {
        Ok(val) => Ok(Host::new(host, val)),
        Err(_) => Err(ArgumentError("Port must be an unsigned integer.".to_owned())),
    }
}

/// Normalizes a reported address into the `host:port` key used by the topology.
/// Unparseable addresses are kept verbatim.
pub fn normalize_address(address: &str) -> String {
    match parse_host(address) {
        Ok(host) => host.to_string(),
        Err(_) => address.to_owned(),
    }
}

fn split_hosts(host_str: &str) -> Result<Vec<Host>> {
    host_str
        .split(',')
        .map(|entity| {
            if entity.is_empty() {
                Err(ArgumentError(
                    "Empty host, or extra comma in host list.".to_owned(),
                ))
            } else {
                parse_host(entity)
            }
        })
        .collect()
}

fn split_options(opts: &str) -> Result<ConnectionOptions> {
    let delim = match (opts.contains('&'), opts.contains(';')) {
        (true, true) => {
            return Err(ArgumentError(
                "Cannot mix '&' and ';' for option separators.".to_owned(),
            ))
        }
        (true, false) => '&',
        (false, true) => ';',
        (false, false) if !opts.contains('=') => {
            return Err(ArgumentError(
                "InvalidURI: MongoDB URI options are key=value pairs.".to_owned(),
            ))
        }
        (false, false) => '&',
    };

    let mut options = ConnectionOptions::default();
    for opt in opts.split(delim).filter(|opt| !opt.is_empty()) {
        let (key, val) = partition(opt, "=");
        options.insert(key, val);
    }
    Ok(options)
}

// Partitions around the left-most separator.
fn partition<'a>(string: &'a str, sep: &str) -> (&'a str, &'a str) {
    match string.find(sep) {
        Some(idx) => (&string[..idx], &string[idx + sep.len()..]),
        None => (string, ""),
    }
}

// Partitions around the right-most separator.
fn rpartition<'a>(string: &'a str, sep: &str) -> (&'a str, &'a str) {
    match string.rfind(sep) {
        Some(idx) => (&string[..idx], &string[idx + sep.len()..]),
        None => (string, ""),
    }
}
