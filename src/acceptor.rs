//! Per-socket accept loop with backpressure.
//!
//! An [`Acceptor`] owns its state privately and is driven by one event loop: the completion of its single
//! in-flight accept, the resume timer and control requests from [`AcceptorHandle`]s.
//!
//! In [`AcceptorState::Accepting`] accepted connections are tuned and handed to the [`ConnectionSupervisor`],
//! then charged to the [`Limiter`]. Running out of file descriptors or quota switches to
//! [`AcceptorState::Suspending`]: accepting continues so the kernel backlog keeps draining, but every
//! connection is closed right away until the resume timer fires.

use std::{pin::Pin, sync::Arc, time::Duration};

use futures_core::future::BoxFuture;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::Sleep,
};
use tracing::{debug, error, info, trace};

use crate::{
    classify::{classify, ErrorClass, Exhaustion},
    error::ControlError,
    options::{DEFAULT_CONTROL_TIMEOUT_MS, DEFAULT_EXHAUSTION_PAUSE_MS},
    tune::NoTuning,
    AcceptorOptions, Connection, ConnectionSupervisor, Counter, HandoffError, Limiter,
    ListenSocket, ListenerAddress, NoStats, SomeSocketAddr, StatsSink, TuneHook, UpgradeChain,
};

/// Optional shared limiter; `None` admits without limit.
pub type LimiterRef = Option<Arc<dyn Limiter>>;

/// Externally visible state of an [`Acceptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorState {
    /// Accepted connections are handed off.
    Accepting,
    /// Accepted connections are closed immediately until the resume timer fires.
    Suspending,
}

/// Correlation id of one accept request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AcceptToken(u64);

type AcceptResult = std::io::Result<(Connection, SomeSocketAddr)>;

struct InFlight {
    token: AcceptToken,
    fut: BoxFuture<'static, AcceptResult>,
}

enum Control {
    SetLimiter(LimiterRef, oneshot::Sender<()>),
}

enum Event {
    Completed(AcceptResult),
    Resume,
    Control(Control),
    Idle,
}

/// What the loop does next.
enum Step {
    Accept,
    Suspend(Duration),
    Wait,
    Stop(std::io::Result<()>),
}

enum Outcome {
    Consumed,
    NotAccepted,
}

/// Accepts connections from one listening socket. Run it with [`Acceptor::run`].
///
/// Several acceptors may share one [`ListenSocket`] to accept in parallel.
pub struct Acceptor<L, C> {
    protocol: Arc<str>,
    listen_spec: ListenerAddress,
    listen: Arc<L>,
    local_addr: ListenerAddress,
    tune: Arc<dyn TuneHook>,
    upgrades: UpgradeChain,
    limiter: LimiterRef,
    conn_sup: Arc<C>,
    stats: Arc<dyn StatsSink>,
    exhaustion_pause: Duration,

    pending: Option<InFlight>,
    next_token: u64,
    state: AcceptorState,
    resume_timer: Option<Pin<Box<Sleep>>>,
    control: mpsc::Receiver<Control>,
    state_tx: watch::Sender<AcceptorState>,
}

impl<L, C> std::fmt::Debug for Acceptor<L, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor")
            .field("protocol", &self.protocol)
            .field("listener", &self.local_addr)
            .field("state", &self.state)
            .field("pending", &self.pending.as_ref().map(|p| p.token))
            .finish_non_exhaustive()
    }
}

impl<L: ListenSocket, C: ConnectionSupervisor> Acceptor<L, C> {
    /// Start configuring an acceptor for `listen` that hands connections to `conn_sup`.
    pub fn builder(listen: Arc<L>, conn_sup: Arc<C>) -> AcceptorBuilder<L, C> {
        AcceptorBuilder {
            listen,
            conn_sup,
            protocol: Arc::from("tcp"),
            listen_spec: None,
            tune: Arc::new(NoTuning),
            upgrades: UpgradeChain::default(),
            limiter: None,
            stats: Arc::new(NoStats),
            exhaustion_pause: Duration::from_millis(DEFAULT_EXHAUSTION_PAUSE_MS),
            control_timeout: Duration::from_millis(DEFAULT_CONTROL_TIMEOUT_MS),
        }
    }

    /// Accept until the listening socket is closed or an unrecoverable error occurs.
    ///
    /// # Errors
    ///
    /// The error that stopped the acceptor. `Ok(())` means the listening socket was closed.
    pub async fn run(mut self) -> std::io::Result<()> {
        debug!(listener=%self.local_addr, protocol=%self.protocol, "acceptor started");
        let mut step = Step::Accept;
        let ret = loop {
            step = match step {
                Step::Accept => self.submit_accept(),
                Step::Suspend(pause) => self.suspend(pause),
                Step::Wait => {
                    let ev = self.next_event().await;
                    self.handle(ev)
                }
                Step::Stop(ret) => break ret,
            };
        };
        match ret {
            Ok(()) => debug!(listener=%self.local_addr, "listening socket closed, acceptor stopped"),
            Err(ref e) => debug!(listener=%self.local_addr, error=%e, "acceptor failed"),
        }
        ret
    }

    fn submit_accept(&mut self) -> Step {
        // at most one accept in flight
        if self.pending.is_some() {
            return Step::Wait;
        }
        if let Err(e) = self.listen.prepare_accept() {
            return self.on_submit_error(e);
        }
        let token = AcceptToken(self.next_token);
        self.next_token += 1;
        let listen = self.listen.clone();
        self.pending = Some(InFlight {
            token,
            fut: Box::pin(async move { listen.accept().await }),
        });
        trace!(token = token.0, state = ?self.state, "accept submitted");
        Step::Wait
    }

    fn on_submit_error(&mut self, e: std::io::Error) -> Step {
        match classify(&e) {
            ErrorClass::Closed => Step::Stop(Ok(())),
            ErrorClass::Exhausted(x) => {
                self.log_exhaustion(x, &e);
                match self.state {
                    AcceptorState::Accepting => Step::Suspend(self.exhaustion_pause),
                    AcceptorState::Suspending => Step::Wait,
                }
            }
            ErrorClass::Transient | ErrorClass::Quiet | ErrorClass::Fatal => Step::Stop(Err(e)),
        }
    }

    fn suspend(&mut self, pause: Duration) -> Step {
        info!(
            listener=%self.local_addr,
            pause_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
            "suspending: accepted connections will be closed"
        );
        self.set_state(AcceptorState::Suspending);
        self.resume_timer = Some(Box::pin(tokio::time::sleep(pause)));
        Step::Accept
    }

    fn resume(&mut self) -> Step {
        self.resume_timer = None;
        self.set_state(AcceptorState::Accepting);
        if self.pending.is_some() {
            // the in-flight drain accept now completes under Accepting rules
            debug!(listener=%self.local_addr, "resuming with an accept already in flight");
            Step::Wait
        } else {
            info!(listener=%self.local_addr, "resuming");
            Step::Accept
        }
    }

    async fn next_event(&mut self) -> Event {
        let pending = &mut self.pending;
        let timer = &mut self.resume_timer;
        let control = &mut self.control;
        tokio::select! {
            biased;
            Some(ctl) = control.recv() => Event::Control(ctl),
            ret = async {
                match pending {
                    Some(p) => (&mut p.fut).await,
                    None => std::future::pending().await,
                }
            }, if pending.is_some() => Event::Completed(ret),
            () = async {
                match timer {
                    Some(t) => t.as_mut().await,
                    None => std::future::pending().await,
                }
            }, if timer.is_some() => Event::Resume,
            else => Event::Idle,
        }
    }

    fn handle(&mut self, ev: Event) -> Step {
        match ev {
            Event::Control(Control::SetLimiter(limiter, ack)) => {
                debug!(listener=%self.local_addr, limited = limiter.is_some(), "limiter replaced");
                self.limiter = limiter;
                let _ = ack.send(());
                Step::Wait
            }
            Event::Resume => self.resume(),
            Event::Completed(ret) => {
                let token = self.pending.take().map(|p| p.token);
                trace!(token = token.map(|t| t.0), "accept completed");
                match self.state {
                    AcceptorState::Accepting => self.on_accepted(ret),
                    AcceptorState::Suspending => self.on_drained(ret),
                }
            }
            Event::Idle => Step::Stop(Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "tokio-acceptor: acceptor has nothing to wait for",
            ))),
        }
    }

    fn on_accepted(&mut self, ret: AcceptResult) -> Step {
        let (conn, peer) = match ret {
            Ok(x) => x,
            Err(e) => {
                return match classify(&e) {
                    ErrorClass::Closed => Step::Stop(Ok(())),
                    ErrorClass::Transient => {
                        trace!(listener=%self.local_addr, error=%e, "accept aborted, retrying");
                        Step::Accept
                    }
                    ErrorClass::Exhausted(x) => {
                        self.log_exhaustion(x, &e);
                        Step::Suspend(self.exhaustion_pause)
                    }
                    ErrorClass::Quiet | ErrorClass::Fatal => Step::Stop(Err(e)),
                }
            }
        };
        debug!(listener=%self.local_addr, %peer, "incoming connection");
        if let Err(e) =
            self.stats
                .increment_counter(&self.protocol, &self.listen_spec, Counter::Accepted, 1)
        {
            return Step::Stop(Err(e));
        }
        let outcome = self.hand_off(conn, peer);
        self.apply_limit(outcome)
    }

    fn hand_off(&self, conn: Connection, peer: SomeSocketAddr) -> Outcome {
        if let Err(e) = self.tune.tune(&conn) {
            self.reject(conn, &e, "failed to tune accepted socket");
            return Outcome::NotAccepted;
        }
        match self.conn_sup.start_connection(conn, peer, &self.upgrades) {
            Ok(_handler) => Outcome::Consumed,
            Err(HandoffError { connection, error }) => {
                self.reject(connection, &error, "failed to start connection");
                Outcome::NotAccepted
            }
        }
    }

    fn reject(&self, conn: Connection, e: &std::io::Error, what: &str) {
        drop(conn);
        if classify(e) != ErrorClass::Quiet {
            error!(listener=%self.local_addr, reason=%e, "{what}");
        }
    }

    fn apply_limit(&self, outcome: Outcome) -> Step {
        let Outcome::Consumed = outcome else {
            return Step::Accept;
        };
        let Some(limiter) = &self.limiter else {
            return Step::Accept;
        };
        let c = limiter.consume(1);
        if c.is_exhausted() {
            debug!(listener=%self.local_addr, remaining = c.remaining, "rate limit reached");
            Step::Suspend(c.pause)
        } else {
            Step::Accept
        }
    }

    fn on_drained(&mut self, ret: AcceptResult) -> Step {
        match ret {
            Ok((conn, peer)) => {
                if let Err(e) =
                    self.stats
                        .increment_counter(&self.protocol, &self.listen_spec, Counter::Limited, 1)
                {
                    trace!(error=%e, "limited counter not updated");
                }
                trace!(listener=%self.local_addr, %peer, "closing connection accepted while suspended");
                drop(conn);
                Step::Accept
            }
            Err(e) => match classify(&e) {
                ErrorClass::Closed => Step::Stop(Ok(())),
                ErrorClass::Transient => Step::Accept,
                ErrorClass::Exhausted(x) => {
                    self.log_exhaustion(x, &e);
                    Step::Wait
                }
                ErrorClass::Quiet | ErrorClass::Fatal => Step::Stop(Err(e)),
            },
        }
    }

    fn log_exhaustion(&self, x: Exhaustion, e: &std::io::Error) {
        error!(
            listener=%self.local_addr,
            reason=%e,
            "accept failed, {}; closing new connections for a while",
            x.explain()
        );
    }

    fn set_state(&mut self, state: AcceptorState) {
        if self.state != state {
            trace!(listener=%self.local_addr, ?state, "state change");
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

/// Configures an [`Acceptor`]. Created by [`Acceptor::builder`].
pub struct AcceptorBuilder<L, C> {
    listen: Arc<L>,
    conn_sup: Arc<C>,
    protocol: Arc<str>,
    listen_spec: Option<ListenerAddress>,
    tune: Arc<dyn TuneHook>,
    upgrades: UpgradeChain,
    limiter: LimiterRef,
    stats: Arc<dyn StatsSink>,
    exhaustion_pause: Duration,
    control_timeout: Duration,
}

impl<L: ListenSocket, C: ConnectionSupervisor> AcceptorBuilder<L, C> {
    /// Protocol name used in statistics keys. Defaults to `tcp`.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<Arc<str>>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Logical listen address used in statistics keys. Defaults to the socket's local address.
    #[must_use]
    pub fn listen_spec(mut self, addr: ListenerAddress) -> Self {
        self.listen_spec = Some(addr);
        self
    }

    /// Hook applied to each accepted connection before hand-off. Defaults to [`NoTuning`].
    #[must_use]
    pub fn tune_hook(mut self, hook: impl TuneHook + 'static) -> Self {
        self.tune = Arc::new(hook);
        self
    }

    /// Upgrade steps given to the connection supervisor with every connection.
    #[must_use]
    pub fn upgrades(mut self, upgrades: UpgradeChain) -> Self {
        self.upgrades = upgrades;
        self
    }

    /// Initial limiter. Replace it later with [`AcceptorHandle::set_limiter`].
    #[must_use]
    pub fn limiter(mut self, limiter: Arc<dyn Limiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Where `accepted` and `limited` counters go. Defaults to [`NoStats`].
    #[must_use]
    pub fn stats(mut self, stats: Arc<dyn StatsSink>) -> Self {
        self.stats = stats;
        self
    }

    /// Take pause and timeout durations from `opts`.
    #[must_use]
    pub fn options(mut self, opts: &AcceptorOptions) -> Self {
        self.exhaustion_pause = opts.exhaustion_pause();
        self.control_timeout = opts.control_timeout();
        self
    }

    /// Finish configuration.
    ///
    /// # Errors
    ///
    /// If the local address of the listening socket cannot be determined.
    pub fn build(self) -> std::io::Result<(Acceptor<L, C>, AcceptorHandle)> {
        let local_addr = self.listen.local_addr()?;
        let (control_tx, control_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(AcceptorState::Accepting);
        let handle = AcceptorHandle {
            control: control_tx,
            state: state_rx,
            local_addr: local_addr.clone(),
            timeout: self.control_timeout,
        };
        let acceptor = Acceptor {
            protocol: self.protocol,
            listen_spec: self.listen_spec.unwrap_or_else(|| local_addr.clone()),
            listen: self.listen,
            local_addr,
            tune: self.tune,
            upgrades: self.upgrades,
            limiter: self.limiter,
            conn_sup: self.conn_sup,
            stats: self.stats,
            exhaustion_pause: self.exhaustion_pause,
            pending: None,
            next_token: 0,
            state: AcceptorState::Accepting,
            resume_timer: None,
            control: control_rx,
            state_tx,
        };
        Ok((acceptor, handle))
    }
}

/// Control and diagnostics access to a running [`Acceptor`].
#[derive(Clone)]
pub struct AcceptorHandle {
    control: mpsc::Sender<Control>,
    state: watch::Receiver<AcceptorState>,
    local_addr: ListenerAddress,
    timeout: Duration,
}

impl std::fmt::Debug for AcceptorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptorHandle")
            .field("listener", &self.local_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AcceptorHandle {
    /// Swap the acceptor's limiter. The new one is consulted from the next hand-off on.
    ///
    /// The control timeout bounds only queueing the request. Once queued, the request is applied and this
    /// returns `Ok` unless the acceptor stops first.
    ///
    /// # Errors
    ///
    /// [`ControlError`] packed in an I/O error if the acceptor has stopped or its control queue stays full
    /// for the whole control timeout.
    pub async fn set_limiter(&self, limiter: LimiterRef) -> std::io::Result<()> {
        let (tx, rx) = oneshot::channel();
        match tokio::time::timeout(self.timeout, self.control.send(Control::SetLimiter(limiter, tx)))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return ControlError::AcceptorStopped.to_io(),
            Err(_) => {
                return ControlError::Timeout {
                    millis: self.timeout.as_millis(),
                }
                .to_io()
            }
        }
        match rx.await {
            Ok(()) => Ok(()),
            Err(_) => ControlError::AcceptorStopped.to_io(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AcceptorState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<AcceptorState> {
        self.state.clone()
    }

    /// Local address of the listening socket.
    #[must_use]
    pub fn local_addr(&self) -> &ListenerAddress {
        &self.local_addr
    }
}
