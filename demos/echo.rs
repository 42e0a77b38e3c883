use std::{sync::Arc, time::Duration};

use clap::Parser;
use tokio_acceptor::{
    Acceptor, Connection, Limiter, SocketListener, SocketTuning, SomeSocketAddr, TaskSupervisor,
    TokenBucket,
};

/// Echo server accepting from one socket with several acceptors
#[derive(Parser)]
struct Args {
    /// TCP socket address, UNIX socket file path or @-prefixed abstract name
    listener: tokio_acceptor::ListenerAddress,

    #[clap(flatten)]
    acceptor_options: tokio_acceptor::AcceptorOptions,

    /// number of acceptors sharing the listening socket
    #[clap(long, default_value_t = 4)]
    acceptors: usize,

    /// admit at most this many connections per second, across all acceptors
    #[clap(long)]
    rate: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let opts = args.acceptor_options;

    let listener = Arc::new(SocketListener::bind(&args.listener, &opts).await?);
    let sup = Arc::new(TaskSupervisor::new(
        |conn: Connection, peer: SomeSocketAddr| async move {
            let (mut r, mut w) = tokio::io::split(conn);
            if let Err(e) = tokio::io::copy(&mut r, &mut w).await {
                tracing::debug!(%peer, error=%e, "echo finished");
            }
        },
    ));
    let limiter = args
        .rate
        .map(|n| Arc::new(TokenBucket::new(n, Duration::from_secs(1))) as Arc<dyn Limiter>);

    let mut tasks = Vec::with_capacity(args.acceptors);
    for _ in 0..args.acceptors {
        let mut b = Acceptor::builder(listener.clone(), sup.clone())
            .protocol("echo")
            .listen_spec(args.listener.clone())
            .tune_hook(SocketTuning::new(&opts))
            .options(&opts);
        if let Some(ref l) = limiter {
            b = b.limiter(l.clone());
        }
        let (acceptor, _handle) = b.build()?;
        tasks.push(tokio::spawn(acceptor.run()));
    }

    for t in tasks {
        t.await??;
    }
    Ok(())
}
