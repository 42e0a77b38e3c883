#![allow(dead_code)]

use std::{
    collections::VecDeque,
    future::Future,
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, DuplexStream},
    sync::mpsc,
};
use tokio_acceptor::{
    AcceptError, Acceptor, AcceptorHandle, Connection, ConnectionSupervisor, Consumption, Counter,
    Counters, HandoffError, Limiter, ListenSocket, ListenerAddress, SomeSocketAddr, StatsSink,
    UpgradeChain,
};
use tracing_subscriber::layer::SubscriberExt;

pub type AcceptResult = io::Result<(Connection, SomeSocketAddr)>;

/// In-memory listen socket: accepts complete with whatever the test pushes.
pub struct ScriptedListener {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<AcceptResult>>,
    submit_errors: Mutex<VecDeque<io::Error>>,
    submissions: AtomicUsize,
    closed: AtomicBool,
}

/// Test side of a [`ScriptedListener`].
#[derive(Clone)]
pub struct Script {
    tx: mpsc::UnboundedSender<AcceptResult>,
    listener: Arc<ScriptedListener>,
}

pub fn scripted() -> (Arc<ScriptedListener>, Script) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = Arc::new(ScriptedListener {
        rx: tokio::sync::Mutex::new(rx),
        submit_errors: Mutex::new(VecDeque::new()),
        submissions: AtomicUsize::new(0),
        closed: AtomicBool::new(false),
    });
    (
        listener.clone(),
        Script { tx, listener },
    )
}

impl ListenSocket for ScriptedListener {
    fn prepare_accept(&self) -> io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AcceptError::ListenerClosed.into());
        }
        if let Some(e) = self.submit_errors.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn accept(&self) -> impl Future<Output = AcceptResult> + Send + '_ {
        async move {
            match self.rx.lock().await.recv().await {
                Some(ret) => ret,
                None => Err(AcceptError::ListenerClosed.into()),
            }
        }
    }

    fn local_addr(&self) -> io::Result<ListenerAddress> {
        Ok("127.0.0.1:4000".parse().unwrap())
    }
}

impl Script {
    /// A client connects; returns the client end.
    pub fn connect(&self) -> DuplexStream {
        let (server, client) = tokio::io::duplex(64);
        self.tx
            .send(Ok((server.into(), SomeSocketAddr::Custom("client".into()))))
            .unwrap();
        client
    }

    /// Complete the pending accept with an error.
    pub fn fail(&self, e: io::Error) {
        self.tx.send(Err(e)).unwrap();
    }

    /// Make the next submission fail.
    pub fn fail_submission(&self, e: io::Error) {
        self.listener.submit_errors.lock().unwrap().push_back(e);
    }

    pub fn close(&self) {
        self.listener.closed.store(true, Ordering::SeqCst);
        self.fail(AcceptError::ListenerClosed.into());
    }

    /// Number of successful accept submissions so far.
    pub fn submissions(&self) -> usize {
        self.listener.submissions.load(Ordering::SeqCst)
    }
}

pub fn emfile() -> io::Error {
    io::Error::from_raw_os_error(nix::errno::Errno::EMFILE as i32)
}

pub fn enfile() -> io::Error {
    io::Error::from_raw_os_error(nix::errno::Errno::ENFILE as i32)
}

/// Supervisor keeping handed-off connections open, optionally refusing them.
#[derive(Default)]
pub struct RecordingSupervisor {
    pub conns: Mutex<Vec<Connection>>,
    refuse_with: Mutex<Option<io::ErrorKind>>,
}

impl RecordingSupervisor {
    pub fn count(&self) -> usize {
        self.conns.lock().unwrap().len()
    }

    pub fn refuse_with(&self, kind: Option<io::ErrorKind>) {
        *self.refuse_with.lock().unwrap() = kind;
    }
}

impl ConnectionSupervisor for RecordingSupervisor {
    type Handler = ();

    fn start_connection(
        &self,
        conn: Connection,
        _peer: SomeSocketAddr,
        _upgrades: &UpgradeChain,
    ) -> Result<(), HandoffError> {
        if let Some(kind) = *self.refuse_with.lock().unwrap() {
            return Err(HandoffError::new(conn, kind.into()));
        }
        self.conns.lock().unwrap().push(conn);
        Ok(())
    }
}

/// Limiter returning scripted answers; unlimited once the script runs out.
#[derive(Default)]
pub struct ScriptedLimiter {
    answers: Mutex<VecDeque<Consumption>>,
    pub calls: AtomicUsize,
}

impl ScriptedLimiter {
    pub fn then(self, remaining: i64, pause: Duration) -> Self {
        self.answers
            .lock()
            .unwrap()
            .push_back(Consumption { remaining, pause });
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Limiter for ScriptedLimiter {
    fn consume(&self, _units: u32) -> Consumption {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers.lock().unwrap().pop_front().unwrap_or(Consumption {
            remaining: 1000,
            pause: Duration::ZERO,
        })
    }
}

/// Stats sink refusing one counter.
pub struct RefusingStats {
    pub inner: Counters,
    pub refuse: Counter,
}

impl StatsSink for RefusingStats {
    fn increment_counter(
        &self,
        protocol: &str,
        listener: &ListenerAddress,
        counter: Counter,
        amount: u64,
    ) -> io::Result<()> {
        if counter == self.refuse {
            return tokio_acceptor::StatsError::Unavailable.to_io();
        }
        self.inner.increment_counter(protocol, listener, counter, amount)
    }
}

/// Counts error-level events emitted on the current thread while the guard lives.
#[derive(Clone, Default)]
pub struct ErrorLogs(Arc<Mutex<Vec<String>>>);

impl ErrorLogs {
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let logs = ErrorLogs::default();
        let subscriber = tracing_subscriber::registry().with(logs.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }

    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct FieldText<'a>(&'a mut String);

impl tracing::field::Visit for FieldText<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        use std::fmt::Write;
        let _ = write!(self.0, "{}={:?} ", field.name(), value);
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorLogs {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if *event.metadata().level() == tracing::Level::ERROR {
            let mut text = String::new();
            event.record(&mut FieldText(&mut text));
            self.0.lock().unwrap().push(text);
        }
    }
}

pub type RunHandle = tokio::task::JoinHandle<io::Result<()>>;

pub struct Harness {
    pub script: Script,
    pub sup: Arc<RecordingSupervisor>,
    pub stats: Arc<Counters>,
    pub handle: AcceptorHandle,
    pub run: RunHandle,
}

pub fn spec() -> ListenerAddress {
    "127.0.0.1:4000".parse().unwrap()
}

impl Harness {
    pub fn accepted(&self) -> u64 {
        self.stats.get("test", &spec(), Counter::Accepted)
    }

    pub fn limited(&self) -> u64 {
        self.stats.get("test", &spec(), Counter::Limited)
    }
}

/// Start an acceptor over a scripted listener; `configure` may add a limiter, tune hook and so on.
pub fn start(
    configure: impl FnOnce(
        tokio_acceptor::AcceptorBuilder<ScriptedListener, RecordingSupervisor>,
    ) -> tokio_acceptor::AcceptorBuilder<ScriptedListener, RecordingSupervisor>,
) -> Harness {
    let (listener, script) = scripted();
    let sup = Arc::new(RecordingSupervisor::default());
    let stats = Arc::new(Counters::new());
    let builder = Acceptor::builder(listener, sup.clone())
        .protocol("test")
        .listen_spec(spec())
        .stats(stats.clone());
    let (acceptor, handle) = configure(builder).build().unwrap();
    Harness {
        script,
        sup,
        stats,
        handle,
        run: tokio::spawn(acceptor.run()),
    }
}

/// Let every task run until all are blocked. Advances the paused clock by 1 ms.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Whether the server side of `client` was dropped.
pub async fn is_closed(client: &mut DuplexStream) -> bool {
    let mut buf = [0u8; 1];
    matches!(
        tokio::time::timeout(Duration::from_millis(1), client.read(&mut buf)).await,
        Ok(Ok(0))
    )
}
