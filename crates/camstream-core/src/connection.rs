//! Station connection state machine.
//!
//! [`ConnectionManager`] drives a [`NetworkLink`] from `Disconnected` to
//! `Connected`, retrying without an upper bound. The device has no useful work
//! before the network is up, so `connect` blocks until association succeeds.
//!
//! The delay between attempts comes from a [`Backoff`] strategy and is slept
//! through a [`Sleeper`], so tests can run the loop without wall-clock delay.

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

/// Maximum SSID length accepted by 802.11 stations.
pub const SSID_MAX_LEN: usize = 32;

/// Maximum WPA passphrase length.
pub const PASSWORD_MAX_LEN: usize = 64;

/// Default delay between association attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

// ============================================================================
// State
// ============================================================================

/// Network connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Not associated with any network.
    Disconnected = 0,
    /// Association attempt in progress.
    Connecting = 1,
    /// Associated and addressable.
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => ConnectionState::Connected,
            1 => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Shared, cheaply clonable view of the connection state.
///
/// The connection manager writes it; streaming sessions read it to notice
/// that the network went away.
#[derive(Debug, Clone)]
pub struct LinkStatus(Arc<AtomicU8>);

impl LinkStatus {
    pub fn new(state: ConnectionState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Invalid network credentials. Fatal, never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("WiFi SSID cannot be empty")]
    EmptySsid,

    #[error("WiFi password cannot be empty")]
    EmptyPassword,

    #[error("WiFi SSID is {0} bytes (max {max})", max = SSID_MAX_LEN)]
    SsidTooLong(usize),

    #[error("WiFi password is {0} bytes (max {max})", max = PASSWORD_MAX_LEN)]
    PasswordTooLong(usize),
}

/// Station credentials: network identity and shared secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    ssid: String,
    password: String,
}

impl Credentials {
    /// Validate and build credentials.
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Result<Self, CredentialsError> {
        let ssid = ssid.into();
        let password = password.into();

        if ssid.is_empty() {
            return Err(CredentialsError::EmptySsid);
        }
        if password.is_empty() {
            return Err(CredentialsError::EmptyPassword);
        }
        if ssid.len() > SSID_MAX_LEN {
            return Err(CredentialsError::SsidTooLong(ssid.len()));
        }
        if password.len() > PASSWORD_MAX_LEN {
            return Err(CredentialsError::PasswordTooLong(password.len()));
        }

        Ok(Self { ssid, password })
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// The network layer a device associates through.
///
/// Implementations:
/// - `EspStationLink` on ESP32 (WiFi station mode)
/// - `TcpBindLink` on Linux (binds the listening socket)
pub trait NetworkLink {
    type Error: fmt::Display;

    /// Make one association attempt.
    fn attempt_connect(&mut self, credentials: &Credentials) -> Result<(), Self::Error>;

    /// Address the device is reachable at, once associated.
    fn bound_address(&self) -> Option<IpAddr>;
}

/// Delay policy between failed attempts.
pub trait Backoff {
    /// Delay after the `failures`-th consecutive failure (1-based).
    fn delay(&mut self, failures: u32) -> Duration;
}

/// Same delay after every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff(Duration);

impl FixedBackoff {
    pub fn new(interval: Duration) -> Self {
        Self(interval)
    }

    pub fn interval(&self) -> Duration {
        self.0
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self(DEFAULT_BACKOFF)
    }
}

impl Backoff for FixedBackoff {
    fn delay(&mut self, _failures: u32) -> Duration {
        self.0
    }
}

/// Blocks the calling thread.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Sleeps on the current OS thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Outcome of a successful [`ConnectionManager::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    /// Attempts made in this connect call, including the successful one.
    pub attempts: u32,
    /// Address reported by the link after association.
    pub address: Option<IpAddr>,
}

/// Drives a [`NetworkLink`] to the connected state.
pub struct ConnectionManager<L, B = FixedBackoff, Z = ThreadSleeper> {
    link: L,
    backoff: B,
    sleeper: Z,
    status: LinkStatus,
}

impl<L: NetworkLink> ConnectionManager<L> {
    /// Create a manager with the default 500 ms fixed backoff.
    pub fn new(link: L) -> Self {
        Self {
            link,
            backoff: FixedBackoff::default(),
            sleeper: ThreadSleeper,
            status: LinkStatus::default(),
        }
    }
}

impl<L: NetworkLink, B: Backoff, Z: Sleeper> ConnectionManager<L, B, Z> {
    pub fn with_backoff<B2: Backoff>(self, backoff: B2) -> ConnectionManager<L, B2, Z> {
        ConnectionManager {
            link: self.link,
            backoff,
            sleeper: self.sleeper,
            status: self.status,
        }
    }

    pub fn with_sleeper<Z2: Sleeper>(self, sleeper: Z2) -> ConnectionManager<L, B, Z2> {
        ConnectionManager {
            link: self.link,
            backoff: self.backoff,
            sleeper,
            status: self.status,
        }
    }

    /// Publish state through an existing status handle.
    pub fn with_status(self, status: LinkStatus) -> Self {
        status.set(self.status.get());
        Self { status, ..self }
    }

    /// A handle observing this manager's state.
    pub fn status(&self) -> LinkStatus {
        self.status.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.get()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn sleeper(&self) -> &Z {
        &self.sleeper
    }

    /// Address of the device, only while connected.
    pub fn bound_address(&self) -> Option<IpAddr> {
        if self.status.is_connected() {
            self.link.bound_address()
        } else {
            None
        }
    }

    /// Block until the link is associated.
    ///
    /// Failed attempts are logged and retried after the backoff delay, with no
    /// attempt limit. Returns immediately if already connected.
    pub fn connect(&mut self, credentials: &Credentials) -> Connection {
        if self.status.is_connected() {
            return Connection {
                attempts: 0,
                address: self.link.bound_address(),
            };
        }

        self.status.set(ConnectionState::Connecting);
        info!("Connecting to '{}'...", credentials.ssid());

        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            match self.link.attempt_connect(credentials) {
                Ok(()) => break,
                Err(e) => {
                    let delay = self.backoff.delay(attempts);
                    warn!(
                        attempt = attempts,
                        "Connection to '{}' failed: {} (retrying in {:?})",
                        credentials.ssid(),
                        e,
                        delay
                    );
                    self.sleeper.sleep(delay);
                }
            }
        }

        self.status.set(ConnectionState::Connected);
        let address = self.link.bound_address();
        match address {
            Some(ip) => info!("Connected to '{}' after {} attempt(s), address {}", credentials.ssid(), attempts, ip),
            None => info!("Connected to '{}' after {} attempt(s)", credentials.ssid(), attempts),
        }

        Connection { attempts, address }
    }

    /// Record that the link dropped outside of this manager's control.
    pub fn mark_disconnected(&mut self) {
        if self.status.get() != ConnectionState::Disconnected {
            warn!("Network link lost");
        }
        self.status.set(ConnectionState::Disconnected);
    }
}
