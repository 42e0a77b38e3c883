use std::{fmt::Display, str::FromStr, time::Duration};

#[cfg(feature = "socket_options")]
#[cfg_attr(docsrs_alt, doc(cfg(feature = "socket_options")))]
/// Value of `--tcp-keepalive` option, applied by [`crate::SocketTuning`] to each accepted TCP socket.
///
/// When parsed from string, it expects 0 to 3 colon-separated numbers:
///
/// * Timeout (in milliseconds)
/// * Number of failed pings before failing the connection
/// * Interval of pings (in milliseconds)
///
/// Specifying empty string or "" just requests to enable keepalives without configuring parameters.
///
/// On unsupported platforms, all or some details of keepalives may be ignored.
///
/// Example:
///
/// ```
/// use tokio_acceptor::TcpKeepaliveParams;
/// let k1 : TcpKeepaliveParams = "60000:3:5000".parse().unwrap();
/// let k2 : TcpKeepaliveParams = "60000".parse().unwrap();
/// let k3 : TcpKeepaliveParams = "".parse().unwrap();
///
/// assert_eq!(k1, TcpKeepaliveParams{timeout_ms:Some(60000), count:Some(3), interval_ms:Some(5000)});
/// ```
#[cfg_attr(
    feature = "serde",
    derive(serde_with::DeserializeFromStr, serde_with::SerializeDisplay)
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpKeepaliveParams {
    /// Amount of time after which TCP keepalive probes will be sent on idle connections.
    pub timeout_ms: Option<u32>,
    /// Maximum number of TCP keepalive probes that will be sent before dropping a connection.
    pub count: Option<u32>,
    /// Time interval between TCP keepalive probes.
    pub interval_ms: Option<u32>,
}
#[cfg(feature = "socket_options")]
impl Display for TcpKeepaliveParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields = [self.timeout_ms, self.count, self.interval_ms];
        for (i, x) in fields.into_iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            if let Some(x) = x {
                write!(f, "{x}")?;
            }
        }
        Ok(())
    }
}
#[cfg(feature = "socket_options")]
impl FromStr for TcpKeepaliveParams {
    type Err = &'static str;

    #[allow(clippy::get_first)]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn field(chunk: Option<&&str>, what: &'static str) -> Result<Option<u32>, &'static str> {
            match chunk.map(|x| x.trim()) {
                None | Some("") => Ok(None),
                Some(x) => x.parse().map(Some).map_err(|_| what),
            }
        }

        let chunks: Vec<&str> = s.split(':').collect();
        if chunks.len() > 3 {
            return Err("Too many colon-separated chunks");
        }
        Ok(TcpKeepaliveParams {
            timeout_ms: field(chunks.get(0), "failed to parse timeout as a number")?,
            count: field(chunks.get(1), "failed to parse count as a number")?,
            interval_ms: field(chunks.get(2), "failed to parse interval as a number")?,
        })
    }
}
#[cfg(feature = "socket_options")]
impl TcpKeepaliveParams {
    /// Attempt to convert values of this struct to socket2 format.
    ///
    /// Some fields may be ignored depending on platform.
    #[must_use]
    pub fn to_socket2(&self) -> socket2::TcpKeepalive {
        let mut k = socket2::TcpKeepalive::new();

        if let Some(x) = self.timeout_ms {
            k = k.with_time(Duration::from_millis(u64::from(x)));
        }

        #[cfg(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "fuchsia",
            target_os = "illumos",
            target_os = "ios",
            target_os = "linux",
            target_os = "macos",
            target_os = "netbsd",
            target_os = "tvos",
            target_os = "watchos",
        ))]
        if let Some(x) = self.count {
            k = k.with_retries(x);
        }

        #[cfg(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "fuchsia",
            target_os = "illumos",
            target_os = "ios",
            target_os = "linux",
            target_os = "macos",
            target_os = "netbsd",
            target_os = "tvos",
            target_os = "watchos",
            target_os = "windows",
        ))]
        if let Some(x) = self.interval_ms {
            k = k.with_interval(Duration::from_millis(u64::from(x)));
        }

        k
    }
}

#[cfg(all(test, feature = "socket_options"))]
mod tests {
    use super::TcpKeepaliveParams;

    #[test]
    fn partial_triplets() {
        let k: TcpKeepaliveParams = "::250".parse().unwrap();
        assert_eq!(
            k,
            TcpKeepaliveParams {
                timeout_ms: None,
                count: None,
                interval_ms: Some(250)
            }
        );
        assert_eq!(k.to_string(), "::250");
    }

    #[test]
    fn bad_input() {
        assert!("1:2:3:4".parse::<TcpKeepaliveParams>().is_err());
        assert!("x".parse::<TcpKeepaliveParams>().is_err());
        assert!("1:-2".parse::<TcpKeepaliveParams>().is_err());
    }
}
