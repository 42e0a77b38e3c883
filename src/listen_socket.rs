#[allow(unused_imports)]
use std::{ffi::c_int, future::Future, net::SocketAddr};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[cfg(all(feature = "unix", unix))]
use tokio::net::UnixListener;

use crate::{
    connection::ConnectionImpl, error::AcceptError, AcceptorOptions, Connection, ListenerAddress,
    SomeSocketAddr,
};

/// Asynchronous accept primitive shared by all acceptors of one listening socket.
///
/// Several acceptors may have accepts in flight on the same socket at once, so
/// [`ListenSocket::accept`] takes `&self`.
pub trait ListenSocket: Send + Sync + 'static {
    /// Synchronous part of submitting an accept request.
    ///
    /// An error here is a submission failure, e.g. [`AcceptError::ListenerClosed`] for a closed socket
    /// or a descriptor limit error.
    fn prepare_accept(&self) -> std::io::Result<()> {
        Ok(())
    }

    /// Wait for the next incoming connection.
    ///
    /// Closing the socket must complete pending accepts with [`AcceptError::ListenerClosed`].
    fn accept(
        &self,
    ) -> impl Future<Output = std::io::Result<(Connection, SomeSocketAddr)>> + Send + '_;

    /// Resolved local address, for diagnostics.
    fn local_addr(&self) -> std::io::Result<ListenerAddress>;
}

/// Listening TCP or `AF_UNIX` socket that can be closed while acceptors are waiting on it.
pub struct SocketListener {
    i: ListenerImpl,
    closed: CancellationToken,
}

enum ListenerImpl {
    Tcp(TcpListener),
    #[cfg(all(feature = "unix", unix))]
    Unix(UnixListener, ListenerAddress),
}

impl std::fmt::Debug for SocketListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.i {
            ListenerImpl::Tcp(..) => f.write_str("tokio_acceptor::SocketListener(tcp)"),
            #[cfg(all(feature = "unix", unix))]
            ListenerImpl::Unix(..) => f.write_str("tokio_acceptor::SocketListener(unix)"),
        }
    }
}

impl SocketListener {
    #[allow(clippy::missing_errors_doc)]
    /// Create a listening socket for `addr`, applying bind-related options.
    ///
    /// Binding may fail due to unsupported address type, e.g. if trying to use UNIX addresses on Windows or
    /// abstract-namespaces sockets on Mac.
    pub async fn bind(addr: &ListenerAddress, opts: &AcceptorOptions) -> std::io::Result<Self> {
        let i = match addr {
            ListenerAddress::Tcp(a) => ListenerImpl::Tcp(listen_tcp(a, opts).await?),
            #[cfg(all(feature = "unix", unix))]
            ListenerAddress::Path(p) => {
                if opts.unix_listen_unlink && std::fs::remove_file(p).is_ok() {
                    debug!(file=?p, "removed UNIX socket before listening");
                }
                ListenerImpl::Unix(UnixListener::bind(p)?, addr.clone())
            }
            #[cfg(all(feature = "unix", any(target_os = "linux", target_os = "android")))]
            ListenerAddress::Abstract(a) => ListenerImpl::Unix(listen_abstract(a)?, addr.clone()),
            #[allow(unreachable_patterns)]
            _ => {
                use crate::error::BindError::{MissingCompileTimeFeature, MissingPlatformSupport};
                let err = if cfg!(not(feature = "unix")) {
                    MissingCompileTimeFeature {
                        reason: "bind UNIX socket",
                        feature: "unix",
                    }
                } else if matches!(addr, ListenerAddress::Abstract(_)) {
                    MissingPlatformSupport {
                        reason: "bind abstract-namespaced UNIX socket",
                        feature: "Linux or Android platform",
                    }
                } else {
                    MissingPlatformSupport {
                        reason: "bind UNIX path socket",
                        feature: "UNIX-like platform",
                    }
                };
                return err.to_io();
            }
        };
        Ok(SocketListener {
            i,
            closed: CancellationToken::new(),
        })
    }

    /// Wrap an already listening Tokio TCP socket.
    #[must_use]
    pub fn from_tcp(s: TcpListener) -> Self {
        SocketListener {
            i: ListenerImpl::Tcp(s),
            closed: CancellationToken::new(),
        }
    }

    /// Close the listening socket for all acceptors.
    ///
    /// In-flight accepts complete with [`AcceptError::ListenerClosed`] and later submissions fail with it.
    /// The file descriptor itself is released when the last reference is dropped.
    pub fn close(&self) {
        debug!("closing listening socket");
        self.closed.cancel();
    }

    /// Whether [`SocketListener::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Underlying Tokio listener, if this is a TCP socket.
    #[must_use]
    pub fn try_borrow_tcp_listener(&self) -> Option<&TcpListener> {
        if let ListenerImpl::Tcp(ref s) = self.i {
            Some(s)
        } else {
            None
        }
    }
}

impl ListenSocket for SocketListener {
    fn prepare_accept(&self) -> std::io::Result<()> {
        if self.is_closed() {
            return AcceptError::ListenerClosed.to_io();
        }
        Ok(())
    }

    fn accept(
        &self,
    ) -> impl Future<Output = std::io::Result<(Connection, SomeSocketAddr)>> + Send + '_ {
        async move {
            tokio::select! {
                biased;
                () = self.closed.cancelled() => AcceptError::ListenerClosed.to_io(),
                ret = self.i.accept() => ret,
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<ListenerAddress> {
        match self.i {
            ListenerImpl::Tcp(ref s) => Ok(ListenerAddress::Tcp(s.local_addr()?)),
            #[cfg(all(feature = "unix", unix))]
            ListenerImpl::Unix(_, ref a) => Ok(a.clone()),
        }
    }
}

impl ListenerImpl {
    async fn accept(&self) -> std::io::Result<(Connection, SomeSocketAddr)> {
        match self {
            ListenerImpl::Tcp(s) => {
                let (c, a) = s.accept().await?;
                Ok((Connection(ConnectionImpl::Tcp(c)), SomeSocketAddr::Tcp(a)))
            }
            #[cfg(all(feature = "unix", unix))]
            ListenerImpl::Unix(s, _) => {
                let (c, a) = s.accept().await?;
                Ok((Connection(ConnectionImpl::Unix(c)), SomeSocketAddr::Unix(a)))
            }
        }
    }
}

#[allow(unused_variables)]
async fn listen_tcp(a: &SocketAddr, opts: &AcceptorOptions) -> std::io::Result<TcpListener> {
    #[cfg(feature = "socket_options")]
    if opts.tcp_only_v6 || opts.tcp_reuse_port || opts.tcp_listen_backlog.is_some() {
        let s = socket2::Socket::new(
            socket2::Domain::for_address(*a),
            socket2::Type::STREAM,
            None,
        )?;
        if opts.tcp_only_v6 {
            s.set_only_v6(true)?;
        }
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        if opts.tcp_reuse_port {
            s.set_reuse_port(true)?;
        }
        s.bind(&socket2::SockAddr::from(*a))?;
        let backlog = opts.tcp_listen_backlog.unwrap_or(1024);
        let Ok(backlog): Result<c_int, _> = backlog.try_into() else {
            return crate::error::BindError::InvalidOption {
                name: "tcp_listen_backlog",
            }
            .to_io();
        };
        s.listen(backlog)?;
        s.set_nonblocking(true)?;
        return TcpListener::from_std(std::net::TcpListener::from(s));
    }
    TcpListener::bind(a).await
}

#[cfg(all(feature = "unix", any(target_os = "linux", target_os = "android")))]
fn listen_abstract(a: &str) -> std::io::Result<UnixListener> {
    #[cfg(target_os = "android")]
    use std::os::android::net::SocketAddrExt;
    #[cfg(target_os = "linux")]
    use std::os::linux::net::SocketAddrExt;
    let a = std::os::unix::net::SocketAddr::from_abstract_name(a)?;
    let s = std::os::unix::net::UnixListener::bind_addr(&a)?;
    s.set_nonblocking(true)?;
    UnixListener::from_std(s)
}
