use crate::{AcceptorOptions, Connection};

/// Hook applied to every freshly accepted connection before it is handed off.
///
/// A failure aborts the hand-off of that one connection: the acceptor closes it and keeps accepting.
/// Failures classified as [`crate::ErrorClass::Quiet`] (peer already gone) are dropped without logging.
///
/// Implemented for closures taking `&Connection`.
pub trait TuneHook: Send + Sync {
    /// Adjust socket options of `conn`.
    fn tune(&self, conn: &Connection) -> std::io::Result<()>;
}

impl<F> TuneHook for F
where
    F: Fn(&Connection) -> std::io::Result<()> + Send + Sync,
{
    fn tune(&self, conn: &Connection) -> std::io::Result<()> {
        self(conn)
    }
}

/// Tuning hook that leaves sockets as they are.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTuning;

impl TuneHook for NoTuning {
    fn tune(&self, _conn: &Connection) -> std::io::Result<()> {
        Ok(())
    }
}

/// Default tuning hook, applying socket options from [`AcceptorOptions`].
///
/// Boxed connections are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SocketTuning {
    nodelay: bool,
    #[cfg(feature = "socket_options")]
    keepalive: Option<socket2::TcpKeepalive>,
    #[cfg(feature = "socket_options")]
    recv_buffer_size: Option<usize>,
    #[cfg(feature = "socket_options")]
    send_buffer_size: Option<usize>,
}

impl SocketTuning {
    /// Pick tuning-related values from `opts`.
    #[must_use]
    pub fn new(opts: &AcceptorOptions) -> Self {
        SocketTuning {
            nodelay: opts.tcp_nodelay,
            #[cfg(feature = "socket_options")]
            keepalive: opts
                .tcp_keepalive
                .as_ref()
                .map(crate::TcpKeepaliveParams::to_socket2),
            #[cfg(feature = "socket_options")]
            recv_buffer_size: opts.recv_buffer_size,
            #[cfg(feature = "socket_options")]
            send_buffer_size: opts.send_buffer_size,
        }
    }
}

impl TuneHook for SocketTuning {
    fn tune(&self, conn: &Connection) -> std::io::Result<()> {
        if let Some(c) = conn.try_borrow_tcp() {
            if self.nodelay {
                c.set_nodelay(true)?;
            }
            #[cfg(feature = "socket_options")]
            {
                let sock_ref = socket2::SockRef::from(c);
                if let Some(ka) = &self.keepalive {
                    sock_ref.set_tcp_keepalive(ka)?;
                }
                apply_socket_buf_opts(&sock_ref, self.recv_buffer_size, self.send_buffer_size)?;
            }
            return Ok(());
        }

        #[cfg(all(feature = "unix", unix, feature = "socket_options"))]
        if let Some(c) = conn.try_borrow_unix() {
            let sock_ref = socket2::SockRef::from(c);
            apply_socket_buf_opts(&sock_ref, self.recv_buffer_size, self.send_buffer_size)?;
        }

        Ok(())
    }
}

#[cfg(feature = "socket_options")]
fn apply_socket_buf_opts(
    sock_ref: &socket2::SockRef<'_>,
    recv_buffer_size: Option<usize>,
    send_buffer_size: Option<usize>,
) -> std::io::Result<()> {
    if let Some(n) = recv_buffer_size {
        sock_ref.set_recv_buffer_size(n)?;
    }
    if let Some(n) = send_buffer_size {
        sock_ref.set_send_buffer_size(n)?;
    }
    Ok(())
}
