use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use futures_core::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{Connection, SomeSocketAddr};

/// Future returned by an [`Upgrade`].
pub type UpgradeFuture = BoxFuture<'static, std::io::Result<Connection>>;

/// One protocol-upgrade step (e.g. a handshake) run by the connection supervisor before the connection is served.
///
/// Implemented for closures `Fn(Connection) -> UpgradeFuture`.
pub trait Upgrade: Send + Sync {
    /// Transform `conn`, or fail and drop it.
    fn upgrade(&self, conn: Connection) -> UpgradeFuture;
}

impl<F> Upgrade for F
where
    F: Fn(Connection) -> UpgradeFuture + Send + Sync,
{
    fn upgrade(&self, conn: Connection) -> UpgradeFuture {
        self(conn)
    }
}

/// Ordered sequence of [`Upgrade`] steps. Acceptors pass it to the supervisor without looking inside.
#[derive(Clone)]
pub struct UpgradeChain(Arc<[Arc<dyn Upgrade>]>);

impl UpgradeChain {
    /// Chain running `steps` in order.
    #[must_use]
    pub fn new(steps: Vec<Arc<dyn Upgrade>>) -> Self {
        UpgradeChain(steps.into())
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Run all steps on `conn`, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// The error of the failed step.
    pub async fn apply(&self, mut conn: Connection) -> std::io::Result<Connection> {
        for step in self.0.iter() {
            conn = step.upgrade(conn).await?;
        }
        Ok(conn)
    }
}

impl Default for UpgradeChain {
    fn default() -> Self {
        UpgradeChain::new(Vec::new())
    }
}

impl std::fmt::Debug for UpgradeChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UpgradeChain(steps={})", self.0.len())
    }
}

/// Failed hand-off. The connection comes back to the acceptor, which closes it.
#[derive(Debug)]
pub struct HandoffError {
    /// Connection that could not be handed off.
    pub connection: Connection,
    /// Why.
    pub error: std::io::Error,
}

impl HandoffError {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new(connection: Connection, error: std::io::Error) -> Self {
        HandoffError { connection, error }
    }
}

impl std::fmt::Display for HandoffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tokio-acceptor: connection hand-off failed: {}", self.error)
    }
}

impl std::error::Error for HandoffError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Takes ownership of accepted connections and runs whatever serves them.
///
/// Shared by all acceptors of a listener; `start_connection` may be called concurrently.
pub trait ConnectionSupervisor: Send + Sync + 'static {
    /// Reference to the unit now owning the connection.
    type Handler: Send;

    /// Take ownership of `conn` and start serving it, passing `upgrades` along.
    ///
    /// # Errors
    ///
    /// On failure ownership stays with the caller, returned inside [`HandoffError`].
    fn start_connection(
        &self,
        conn: Connection,
        peer: SomeSocketAddr,
        upgrades: &UpgradeChain,
    ) -> Result<Self::Handler, HandoffError>;
}

/// Supervisor spawning one Tokio task per connection: the upgrade chain runs first, then `handler`.
pub struct TaskSupervisor<F> {
    handler: Arc<F>,
    active: Arc<AtomicUsize>,
}

impl<F> std::fmt::Debug for TaskSupervisor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("active", &self.active_connections())
            .finish_non_exhaustive()
    }
}

impl<F> TaskSupervisor<F> {
    #[allow(missing_docs)]
    pub fn new(handler: F) -> Self {
        TaskSupervisor {
            handler: Arc::new(handler),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of connection tasks that have not finished yet.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        ActiveGuard(counter.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<F, Fut> ConnectionSupervisor for TaskSupervisor<F>
where
    F: Fn(Connection, SomeSocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    type Handler = JoinHandle<()>;

    fn start_connection(
        &self,
        conn: Connection,
        peer: SomeSocketAddr,
        upgrades: &UpgradeChain,
    ) -> Result<JoinHandle<()>, HandoffError> {
        let rt = match tokio::runtime::Handle::try_current() {
            Ok(rt) => rt,
            Err(e) => {
                return Err(HandoffError::new(
                    conn,
                    std::io::Error::new(std::io::ErrorKind::Other, e),
                ))
            }
        };
        let guard = ActiveGuard::enter(&self.active);
        let handler = self.handler.clone();
        let upgrades = upgrades.clone();
        Ok(rt.spawn(async move {
            let _guard = guard;
            match upgrades.apply(conn).await {
                Ok(conn) => handler(conn, peer).await,
                Err(e) => debug!(%peer, error=%e, "connection upgrade failed"),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn tagging_step(tag: &'static [u8]) -> Arc<dyn Upgrade> {
        Arc::new(move |mut conn: Connection| -> UpgradeFuture {
            Box::pin(async move {
                conn.write_all(tag).await?;
                Ok(conn)
            })
        })
    }

    #[tokio::test]
    async fn runs_upgrades_in_order_then_handler() {
        let sup = TaskSupervisor::new(|mut conn: Connection, _peer: SomeSocketAddr| async move {
            let _ = conn.write_all(b"!").await;
        });
        let chain = UpgradeChain::new(vec![tagging_step(b"a"), tagging_step(b"b")]);
        assert_eq!(chain.len(), 2);
        assert!(!chain.is_empty());
        assert!(UpgradeChain::default().is_empty());
        let (ours, mut theirs) = tokio::io::duplex(64);
        let task = sup
            .start_connection(ours.into(), SomeSocketAddr::Custom("t".into()), &chain)
            .unwrap();
        task.await.unwrap();
        let mut buf = Vec::new();
        theirs.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"ab!");
        assert_eq!(sup.active_connections(), 0);
    }

    #[tokio::test]
    async fn failed_upgrade_skips_handler() {
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = ran.clone();
        let sup = TaskSupervisor::new(move |_conn: Connection, _peer: SomeSocketAddr| {
            flag.store(true, Ordering::SeqCst);
            async {}
        });
        let failing: Arc<dyn Upgrade> = Arc::new(|_conn: Connection| -> UpgradeFuture {
            Box::pin(async { Err(std::io::ErrorKind::ConnectionReset.into()) })
        });
        let (ours, _theirs) = tokio::io::duplex(64);
        let task = sup
            .start_connection(
                ours.into(),
                SomeSocketAddr::Custom("t".into()),
                &UpgradeChain::new(vec![failing]),
            )
            .unwrap();
        task.await.unwrap();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn without_runtime_connection_is_returned() {
        let sup = TaskSupervisor::new(|_conn: Connection, _peer: SomeSocketAddr| async {});
        let (ours, _theirs) = tokio::io::duplex(64);
        let e = sup
            .start_connection(ours.into(), SomeSocketAddr::Custom("t".into()), &UpgradeChain::default())
            .unwrap_err();
        assert!(e.connection.is_boxed());
    }
}
