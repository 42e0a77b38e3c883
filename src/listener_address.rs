use std::{fmt::Display, net::SocketAddr, path::PathBuf, str::FromStr};

/// Logical listen address of an acceptor: what it was asked to listen on, as opposed to the OS socket handle.
///
/// Used to bind a [`crate::SocketListener`], as part of statistics keys and in diagnostics.
///
/// If serde is enabled, it is serialized/deserialized the same as string, using `FromStr`/`Display`.
///
/// ```
/// # use tokio_acceptor::*;
/// let addr : ListenerAddress = "127.0.0.1:8087".parse().unwrap();
/// let addr : ListenerAddress = "[::]:80".parse().unwrap();
/// let addr : ListenerAddress = "/path/to/socket".parse().unwrap();
/// let addr : ListenerAddress = "@abstract_linux_address".parse().unwrap();
/// ```
#[non_exhaustive]
#[cfg_attr(
    feature = "serde",
    derive(serde_with::DeserializeFromStr, serde_with::SerializeDisplay)
)]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ListenerAddress {
    /// Usual server TCP socket. Triggered by specifying IPv4 or IPv6 address and port pair.
    /// Example: `127.0.0.1:8080`.
    ///
    /// Hostnames are not supported.
    Tcp(SocketAddr),
    /// Path-based UNIX socket. Path must begin with `/` or `.`.
    /// Examples: `/tmp/mysock`, `./mysock`
    Path(PathBuf),
    /// Linux abstract-namespaced UNIX socket. Indicated by using `@` as a first character.
    /// Example: `@server`
    Abstract(String),
}

impl FromStr for ListenerAddress {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('/') || s.starts_with("./") {
            Ok(ListenerAddress::Path(s.into()))
        } else if let Some(x) = s.strip_prefix('@') {
            if x.is_empty() {
                return Err("Empty abstract socket name");
            }
            Ok(ListenerAddress::Abstract(x.to_owned()))
        } else if let Ok(a) = s.parse() {
            Ok(ListenerAddress::Tcp(a))
        } else {
            Err("Invalid tokio-acceptor address type")
        }
    }
}

impl Display for ListenerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerAddress::Tcp(a) => a.fmt(f),
            ListenerAddress::Path(p) => {
                if let Some(s) = p.to_str() {
                    if p.is_absolute() || s.starts_with("./") {
                        s.fmt(f)
                    } else {
                        write!(f, "./{s}")
                    }
                } else if p.is_absolute() {
                    "/???".fmt(f)
                } else {
                    "./???".fmt(f)
                }
            }
            ListenerAddress::Abstract(p) => {
                write!(f, "@{p}")
            }
        }
    }
}

impl From<SocketAddr> for ListenerAddress {
    fn from(a: SocketAddr) -> Self {
        ListenerAddress::Tcp(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_variant() {
        let a: ListenerAddress = "127.0.0.1:8087".parse().unwrap();
        assert_eq!(a, ListenerAddress::Tcp("127.0.0.1:8087".parse().unwrap()));
        let a: ListenerAddress = "/run/app.sock".parse().unwrap();
        assert_eq!(a, ListenerAddress::Path("/run/app.sock".into()));
        let a: ListenerAddress = "@app".parse().unwrap();
        assert_eq!(a, ListenerAddress::Abstract("app".to_owned()));
    }

    #[test]
    fn rejects_garbage() {
        assert!("localhost:80".parse::<ListenerAddress>().is_err());
        assert!("@".parse::<ListenerAddress>().is_err());
        assert!("".parse::<ListenerAddress>().is_err());
    }

    #[test]
    fn relative_paths_display_with_dot_prefix() {
        let a = ListenerAddress::Path("sock".into());
        assert_eq!(a.to_string(), "./sock");
        let a: ListenerAddress = "[::1]:443".parse().unwrap();
        assert_eq!(a.to_string(), "[::1]:443");
    }
}
