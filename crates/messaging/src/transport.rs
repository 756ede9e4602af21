//! Broker endpoint addressing.
//!
//! Same-host fleet simulation runs over IPC sockets under `/tmp/ponder/`;
//! distributed deployments with remote gateways use TCP.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Transport {
    /// Unix domain socket, addressed by name under `/tmp/ponder/`.
    Ipc(String),
    /// TCP endpoint.
    Tcp { host: String, port: u16 },
}

impl Transport {
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// The ZeroMQ endpoint address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(name) => format!("ipc:///tmp/ponder/{name}.sock"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    /// Filesystem path of the IPC socket file, if this is an IPC endpoint.
    fn socket_path(&self) -> Option<PathBuf> {
        match self {
            Self::Ipc(name) => Some(PathBuf::from(format!("/tmp/ponder/{name}.sock"))),
            Self::Tcp { .. } => None,
        }
    }

    /// Make the endpoint bindable.
    ///
    /// ZeroMQ needs the IPC directory to exist, and a `.sock` file left
    /// behind by a crashed broker causes `EADDRINUSE` on rebind; both are
    /// handled here. No-op for TCP.
    pub fn prepare_bind(&self) -> std::io::Result<()> {
        let Some(path) = self.socket_path() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "removed stale IPC socket");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_endpoint() {
        let t = Transport::ipc("broker");
        assert_eq!(t.endpoint(), "ipc:///tmp/ponder/broker.sock");
    }

    #[test]
    fn tcp_endpoint() {
        let t = Transport::tcp("127.0.0.1", 5555);
        assert_eq!(t.endpoint(), "tcp://127.0.0.1:5555");
    }

    #[test]
    fn display_matches_endpoint() {
        let t = Transport::tcp("localhost", 9090);
        assert_eq!(t.to_string(), t.endpoint());
    }

    #[test]
    fn prepare_bind_is_a_noop_for_tcp() {
        Transport::tcp("localhost", 9090).prepare_bind().unwrap();
    }
}
