#![cfg_attr(docsrs_alt, feature(doc_cfg))]
#![warn(missing_docs)]
//! Connection acceptors for Tokio servers: the part of a listener pool that turns a listening socket into
//! handed-off connections.
//!
//! An [`Acceptor`] keeps exactly one accept in flight on a shared [`ListenSocket`]; run several of them on
//! one socket to accept in parallel. Each accepted connection is tuned ([`TuneHook`]), handed to a
//! [`ConnectionSupervisor`] and charged to an optional, hot-swappable [`Limiter`].
//!
//! Errors are sorted by [`classify()`]:
//!
//! * peer resets and health-check probes failing during hand-off are dropped silently;
//! * aborted accepts are retried at once;
//! * file descriptor exhaustion (`EMFILE`/`ENFILE`) is logged and suspends the acceptor for a while;
//! * a closed listening socket stops the acceptor cleanly, anything else stops it with an error.
//!
//! While suspended (descriptor exhaustion or limiter quota used up), the acceptor keeps accepting and
//! closing connections, so the kernel backlog does not pile up, until a resume timer fires.
//!
//! ```,no_run
//! # tokio_test::block_on(async {
//! # use std::sync::Arc;
//! # use tokio_acceptor::*;
//! let opts = AcceptorOptions::default();
//! let listener = Arc::new(SocketListener::bind(&"127.0.0.1:8087".parse().unwrap(), &opts).await.unwrap());
//! let sup = Arc::new(TaskSupervisor::new(|conn: Connection, peer: SomeSocketAddr| async move {
//!     // serve `conn`
//! }));
//!
//! for _ in 0..4 {
//!     let (acceptor, _handle) = Acceptor::builder(listener.clone(), sup.clone())
//!         .tune_hook(SocketTuning::new(&opts))
//!         .limiter(Arc::new(TokenBucket::new(100, std::time::Duration::from_secs(1))))
//!         .options(&opts)
//!         .build()
//!         .unwrap();
//!     tokio::spawn(acceptor.run());
//! }
//! # });
//! ```
//!
//! ## Feature flags
#![doc = document_features::document_features!()]

mod acceptor;
pub use acceptor::{Acceptor, AcceptorBuilder, AcceptorHandle, AcceptorState, LimiterRef};

mod classify;
pub use classify::{classify, ErrorClass, Exhaustion};

mod error;
pub use error::{AcceptError, BindError, ControlError, StatsError};

mod listen_socket;
pub use listen_socket::{ListenSocket, SocketListener};

mod listener_address;
pub use listener_address::ListenerAddress;

mod connection;
pub use connection::{AsyncReadWrite, Connection};

mod some_socket_addr;
pub use some_socket_addr::SomeSocketAddr;

mod limiter;
pub use limiter::{Consumption, Limiter, TokenBucket, Unlimited};

mod options;
pub use options::{AcceptorOptions, DEFAULT_CONTROL_TIMEOUT_MS, DEFAULT_EXHAUSTION_PAUSE_MS};

mod stats;
pub use stats::{Counter, Counters, NoStats, StatsSink};

mod supervisor;
pub use supervisor::{
    ConnectionSupervisor, HandoffError, TaskSupervisor, Upgrade, UpgradeChain, UpgradeFuture,
};

mod tcp_keepalive_params;
#[cfg(feature = "socket_options")]
pub use tcp_keepalive_params::TcpKeepaliveParams;

mod tune;
pub use tune::{NoTuning, SocketTuning, TuneHook};
