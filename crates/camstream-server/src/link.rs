//! Host network link.
//!
//! A host is already on the network, so "associating" means getting the
//! listening socket bound. Binding is retried through the connection manager
//! like a WiFi association, which covers a port still held by a previous run.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, UdpSocket};

use camstream_core::{Credentials, NetworkLink};

/// [`NetworkLink`] that binds a TCP listener.
#[derive(Debug)]
pub struct TcpBindLink {
    addr: SocketAddr,
    listener: Option<TcpListener>,
}

impl TcpBindLink {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, listener: None }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Hand the bound listener over to the HTTP server.
    pub fn take_listener(&mut self) -> Option<TcpListener> {
        self.listener.take()
    }
}

impl NetworkLink for TcpBindLink {
    type Error = std::io::Error;

    fn attempt_connect(&mut self, _credentials: &Credentials) -> Result<(), Self::Error> {
        if self.listener.is_some() {
            return Ok(());
        }
        let listener = TcpListener::bind(self.addr)?;
        // tokio requires non-blocking sockets in `from_std`.
        listener.set_nonblocking(true)?;
        self.listener = Some(listener);
        Ok(())
    }

    /// Reachable address of the listener; see [`reachable_ip`].
    fn bound_address(&self) -> Option<IpAddr> {
        self.local_addr().map(|addr| reachable_ip(addr.ip()))
    }
}

/// An address a viewer can open for a listener bound to `ip`.
///
/// A wildcard bind (`0.0.0.0`, `::`) is replaced by the interface address of
/// the default route, or loopback when the host has no route. Finding the
/// interface connects a UDP socket, which sends nothing.
pub fn reachable_ip(ip: IpAddr) -> IpAddr {
    if !ip.is_unspecified() {
        return ip;
    }
    route_interface_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn route_interface_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}
