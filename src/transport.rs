//! Transport descriptors attached to server-side queries.

use std::net::SocketAddr;

/// Protocol tag of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Http,
}

impl TransportKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Http => "http",
        }
    }
}

/// Pass-through credential pair. Carried verbatim; no authorization policy
/// lives in the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// Immutable description of the connection a query arrived on.
///
/// Copied into every [`crate::server::Query`] so services can inspect the
/// peer without holding a reference to connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportDescriptor {
    kind: TransportKind,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    credentials: Option<Credentials>,
}

impl TransportDescriptor {
    #[must_use]
    pub const fn new(kind: TransportKind, local_addr: SocketAddr, peer_addr: SocketAddr) -> Self {
        Self {
            kind,
            local_addr,
            peer_addr,
            credentials: None,
        }
    }

    /// Attach the credential pair presented by the peer.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            user: user.into(),
            password: password.into(),
        });
        self
    }

    #[must_use]
    pub const fn kind(&self) -> TransportKind { self.kind }

    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr { self.local_addr }

    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr { self.peer_addr }

    #[must_use]
    pub const fn credentials(&self) -> Option<&Credentials> { self.credentials.as_ref() }
}

impl std::fmt::Display for TransportDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.kind.name(),
            self.peer_addr,
            self.local_addr
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_credentials_verbatim() {
        let descriptor = TransportDescriptor::new(
            TransportKind::Http,
            "127.0.0.1:80".parse().unwrap(),
            "10.0.0.1:4242".parse().unwrap(),
        )
        .with_credentials("user", "pass word");

        let creds = descriptor.credentials().unwrap();
        assert_eq!(creds.user, "user");
        assert_eq!(creds.password, "pass word");
        assert_eq!(descriptor.kind(), TransportKind::Http);
        assert_eq!(descriptor.to_string(), "http 10.0.0.1:4242 -> 127.0.0.1:80");
    }
}
