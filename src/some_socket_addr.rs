#[allow(unused_imports)]
use std::{fmt::Display, net::SocketAddr, sync::Arc};

/// Peer address of an accepted connection.
/// Variant depends on the kind of [`crate::ListenSocket`] that produced it.
#[derive(Debug)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum SomeSocketAddr {
    Tcp(SocketAddr),
    #[cfg(all(feature = "unix", unix))]
    #[cfg_attr(docsrs_alt, doc(cfg(all(feature = "unix", unix))))]
    Unix(tokio::net::unix::SocketAddr),
    /// Connection produced by a custom in-process listen socket.
    Custom(Arc<str>),
}

impl Display for SomeSocketAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SomeSocketAddr::Tcp(x) => x.fmt(f),
            #[cfg(all(feature = "unix", unix))]
            SomeSocketAddr::Unix(x) => write!(f, "unix:{x:?}"),
            SomeSocketAddr::Custom(x) => write!(f, "custom:{x}"),
        }
    }
}
