use std::time::Duration;

/// Pause applied when accepting fails because file descriptors ran out.
pub const DEFAULT_EXHAUSTION_PAUSE_MS: u64 = 10_000;

/// Bound on how long an [`crate::AcceptorHandle`] control call waits for acknowledgement.
pub const DEFAULT_CONTROL_TIMEOUT_MS: u64 = 5_000;

#[cfg_attr(feature = "clap", derive(clap::Args))]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone)]
#[non_exhaustive]
/// Options of acceptors and of the listening sockets they are bound to.
///
/// With `clap` crate feature, this struct can be `clap(flatten)`-ed directly into your primary command line parameters.
/// With `serde` crate feature, it supportes serialisation and deserialisation; missing fields take default values.
///
/// Create instances with `Default::default()` and modify available fields.
///
/// Bind-related options are only used by [`crate::SocketListener::bind`]; tuning-related ones
/// feed [`crate::SocketTuning`].
pub struct AcceptorOptions {
    /// milliseconds to spend draining (accepting and closing) connections after running out of file descriptors
    #[cfg_attr(feature = "clap", clap(long, default_value_t = DEFAULT_EXHAUSTION_PAUSE_MS))]
    pub exhaustion_pause_ms: u64,

    /// milliseconds to wait for an acceptor to acknowledge a control request, such as a limiter swap
    #[cfg_attr(feature = "clap", clap(long, default_value_t = DEFAULT_CONTROL_TIMEOUT_MS))]
    pub control_timeout_ms: u64,

    /// set TCP_NODELAY on accepted TCP sockets
    #[cfg_attr(feature = "clap", clap(long))]
    pub tcp_nodelay: bool,

    #[cfg(all(feature = "unix", unix))]
    #[cfg_attr(docsrs_alt, doc(cfg(all(feature = "unix", unix))))]
    /// remove UNIX socket prior to binding to it
    #[cfg_attr(feature = "clap", clap(long))]
    pub unix_listen_unlink: bool,

    #[cfg(feature = "socket_options")]
    #[cfg_attr(docsrs_alt, doc(cfg(feature = "socket_options")))]
    /// set SO_KEEPALIVE settings for each accepted TCP connection.
    ///
    /// Value is a colon-separated triplet of time_ms:count:interval_ms, each of which is optional.
    #[cfg_attr(feature = "clap", clap(long))]
    pub tcp_keepalive: Option<crate::TcpKeepaliveParams>,

    #[cfg(feature = "socket_options")]
    #[cfg_attr(docsrs_alt, doc(cfg(feature = "socket_options")))]
    /// Try to set SO_REUSEPORT, so that multiple processes can accept connections from the same port
    /// in a round-robin fashion
    #[cfg_attr(feature = "clap", clap(long))]
    pub tcp_reuse_port: bool,

    #[cfg(feature = "socket_options")]
    #[cfg_attr(docsrs_alt, doc(cfg(feature = "socket_options")))]
    /// Set accepted sockets' SO_RCVBUF value.
    #[cfg_attr(feature = "clap", clap(long))]
    pub recv_buffer_size: Option<usize>,

    #[cfg(feature = "socket_options")]
    #[cfg_attr(docsrs_alt, doc(cfg(feature = "socket_options")))]
    /// Set accepted sockets' SO_SNDBUF value.
    #[cfg_attr(feature = "clap", clap(long))]
    pub send_buffer_size: Option<usize>,

    #[cfg(feature = "socket_options")]
    #[cfg_attr(docsrs_alt, doc(cfg(feature = "socket_options")))]
    /// Set socket's IPV6_V6ONLY to true, to avoid receiving IPv4 connections on IPv6 socket.
    #[cfg_attr(feature = "clap", clap(long))]
    pub tcp_only_v6: bool,

    #[cfg(feature = "socket_options")]
    #[cfg_attr(docsrs_alt, doc(cfg(feature = "socket_options")))]
    /// Maximum number of pending unaccepted connections
    #[cfg_attr(feature = "clap", clap(long))]
    pub tcp_listen_backlog: Option<u32>,
}

impl Default for AcceptorOptions {
    fn default() -> Self {
        AcceptorOptions {
            exhaustion_pause_ms: DEFAULT_EXHAUSTION_PAUSE_MS,
            control_timeout_ms: DEFAULT_CONTROL_TIMEOUT_MS,
            tcp_nodelay: false,
            #[cfg(all(feature = "unix", unix))]
            unix_listen_unlink: false,
            #[cfg(feature = "socket_options")]
            tcp_keepalive: None,
            #[cfg(feature = "socket_options")]
            tcp_reuse_port: false,
            #[cfg(feature = "socket_options")]
            recv_buffer_size: None,
            #[cfg(feature = "socket_options")]
            send_buffer_size: None,
            #[cfg(feature = "socket_options")]
            tcp_only_v6: false,
            #[cfg(feature = "socket_options")]
            tcp_listen_backlog: None,
        }
    }
}

impl AcceptorOptions {
    /// [`AcceptorOptions::exhaustion_pause_ms`] as a `Duration`.
    #[must_use]
    pub fn exhaustion_pause(&self) -> Duration {
        Duration::from_millis(self.exhaustion_pause_ms)
    }

    /// [`AcceptorOptions::control_timeout_ms`] as a `Duration`.
    #[must_use]
    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let o: AcceptorOptions = toml::from_str("tcp_nodelay = true").unwrap();
        assert!(o.tcp_nodelay);
        assert_eq!(o.exhaustion_pause(), Duration::from_secs(10));
        assert_eq!(o.control_timeout(), Duration::from_secs(5));
    }

    #[cfg(feature = "socket_options")]
    #[test]
    fn keepalive_is_parsed_from_string() {
        let o: AcceptorOptions = toml::from_str(r#"tcp_keepalive = "60000:3:""#).unwrap();
        let k = o.tcp_keepalive.unwrap();
        assert_eq!(k.timeout_ms, Some(60000));
        assert_eq!(k.count, Some(3));
        assert_eq!(k.interval_ms, None);
    }
}
