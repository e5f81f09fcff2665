//! Authentication provider contract.
//!
//! Mechanism handshakes are driven as conversations: the pool asks a provider for a
//! conversation per credential set, then feeds it each server reply until it reports
//! `AuthStep::Done`. Conversation bytes are written straight to the connection being
//! authenticated, bypassing the pool's work queue.
use bson::doc;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use crate::error::Error::{ArgumentError, ResponseError};
use crate::error::Result;

/// Encodes a command document addressed to a database into wire bytes.
pub type CommandEncoder = Rc<dyn Fn(&str, &bson::Document) -> Result<Vec<u8>>>;

/// The mechanism name that resolves to the registry's default provider.
pub const DEFAULT_MECHANISM: &str = "DEFAULT";

/// A credential set for one database.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub mechanism: String,
    /// The database the credentials are authenticated against.
    pub source: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Mechanism-specific properties.
    pub params: bson::Document,
}

impl Credentials {
    pub fn new(mechanism: &str, source: &str, username: &str, password: &str) -> Credentials {
        Credentials {
            mechanism: mechanism.to_ascii_uppercase(),
            source: source.to_owned(),
            username: Some(username.to_owned()),
            password: Some(password.to_owned()),
            params: bson::Document::new(),
        }
    }

    /// Two credential sets replace each other when they target the same database with the
    /// same mechanism.
    pub fn supersedes(&self, other: &Credentials) -> bool {
        self.source == other.source && self.mechanism == other.mechanism
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Credentials")
            .field("mechanism", &self.mechanism)
            .field("source", &self.source)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// What a conversation wants next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthStep {
    /// Write these bytes and feed the reply back in.
    Send(Vec<u8>),
    Done,
}

/// One mechanism exchange on a single connection.
pub trait AuthConversation {
    /// Advances the exchange. The first call receives `None`; each later call receives the
    /// reply to the previous `Send`. Replies that signal a server error never reach here.
    fn step(&mut self, reply: Option<&bson::Document>) -> Result<AuthStep>;
}

/// A mechanism-specific authenticator.
pub trait AuthProvider {
    /// Starts authenticating one connection with `credentials`.
    fn authenticate(&self, credentials: &Credentials) -> Result<Box<dyn AuthConversation>>;

    /// Replays every established credential set on a fresh or stale connection.
    fn reauthenticate(&self, established: &[Credentials]) -> Result<Vec<Box<dyn AuthConversation>>> {
        established
            .iter()
            .map(|credentials| self.authenticate(credentials))
            .collect()
    }
}

/// Sends `{ logout: 1 }` and waits for the acknowledgement.
pub struct LogoutConversation {
    command: Option<Vec<u8>>,
}

impl LogoutConversation {
    pub fn new(encoder: &CommandEncoder, db: &str) -> Result<LogoutConversation> {
        let command = encoder(db, &doc! { "logout": 1 })?;
        Ok(LogoutConversation {
            command: Some(command),
        })
    }
}

impl AuthConversation for LogoutConversation {
    fn step(&mut self, reply: Option<&bson::Document>) -> Result<AuthStep> {
        match (self.command.take(), reply) {
            (Some(bytes), None) => Ok(AuthStep::Send(bytes)),
            (None, Some(_)) => Ok(AuthStep::Done),
            _ => Err(ResponseError("unexpected logout reply.".to_owned())),
        }
    }
}

/// Providers keyed by upper-case mechanism name.
pub struct AuthProviders {
    providers: HashMap<String, Box<dyn AuthProvider>>,
    default_mechanism: Option<String>,
    encoder: CommandEncoder,
}

impl AuthProviders {
    pub fn new(encoder: CommandEncoder) -> AuthProviders {
        AuthProviders {
            providers: HashMap::new(),
            default_mechanism: None,
            encoder,
        }
    }

    /// Registers a provider. The first registered mechanism becomes the default.
    pub fn register<P: AuthProvider + 'static>(&mut self, mechanism: &str, provider: P) {
        let mechanism = mechanism.to_ascii_uppercase();
        if self.default_mechanism.is_none() {
            self.default_mechanism = Some(mechanism.clone());
        }
        self.providers.insert(mechanism, Box::new(provider));
    }

    pub fn set_default(&mut self, mechanism: &str) -> Result<()> {
        let mechanism = mechanism.to_ascii_uppercase();
        if !self.providers.contains_key(&mechanism) {
            return Err(ArgumentError(format!(
                "no provider registered for mechanism {}.",
                mechanism
            )));
        }
        self.default_mechanism = Some(mechanism);
        Ok(())
    }

    pub fn get(&self, mechanism: &str) -> Result<&dyn AuthProvider> {
        let mut name = mechanism.to_ascii_uppercase();
        if name == DEFAULT_MECHANISM {
            name = match self.default_mechanism {
                Some(ref default) => default.clone(),
                None => {
                    return Err(ArgumentError(
                        "no default authentication mechanism registered.".to_owned(),
                    ))
                }
            };
        }

        self.providers
            .get(&name)
            .map(|provider| provider.as_ref())
            .ok_or_else(|| {
                ArgumentError(format!(
                    "authentication mechanism {} not supported.",
                    mechanism
                ))
            })
    }

    pub fn contains(&self, mechanism: &str) -> bool {
        self.get(mechanism).is_ok()
    }

    pub fn authenticate(&self, credentials: &Credentials) -> Result<VecDeque<Box<dyn AuthConversation>>> {
        let conversation = self.get(&credentials.mechanism)?.authenticate(credentials)?;
        let mut conversations = VecDeque::with_capacity(1);
        conversations.push_back(conversation);
        Ok(conversations)
    }

    /// Conversations that replay `established` in order, grouped by provider.
    pub fn reauthenticate(
        &self,
        established: &[Credentials],
    ) -> Result<VecDeque<Box<dyn AuthConversation>>> {
        let mut mechanisms: Vec<&str> = Vec::new();
        for credentials in established {
            if !mechanisms.contains(&credentials.mechanism.as_str()) {
                mechanisms.push(&credentials.mechanism);
            }
        }

        let mut conversations = VecDeque::new();
        for mechanism in mechanisms {
            let group: Vec<Credentials> = established
                .iter()
                .filter(|c| c.mechanism == mechanism)
                .cloned()
                .collect();
            conversations.extend(self.get(mechanism)?.reauthenticate(&group)?);
        }
        Ok(conversations)
    }

    pub fn logout(&self, db: &str) -> Result<Box<dyn AuthConversation>> {
        Ok(Box::new(LogoutConversation::new(&self.encoder, db)?))
    }
}

impl fmt::Debug for AuthProviders {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut mechanisms: Vec<&String> = self.providers.keys().collect();
        mechanisms.sort();
        fmt.debug_struct("AuthProviders")
            .field("mechanisms", &mechanisms)
            .field("default_mechanism", &self.default_mechanism)
            .finish()
    }
}
