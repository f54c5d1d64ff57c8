use std::{borrow::Cow, io, sync::Arc};

use comms::{
    FedReceiver, FedSender,
    msg::{Command, Msg},
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    task::JoinSet,
};

use crate::{BroadcastHub, Coordinator, Submission, store::VersionStore};

/// The aggregator's connection front: one task per client, all feeding the
/// shared coordinator and broadcast hub.
pub struct SyncServer {
    coordinator: Arc<Coordinator>,
    hub: BroadcastHub,
    tasks: JoinSet<io::Result<()>>,
}

impl SyncServer {
    pub fn new(store: VersionStore) -> Self {
        Self {
            coordinator: Arc::new(Coordinator::new(store)),
            hub: BroadcastHub::new(),
            tasks: JoinSet::new(),
        }
    }

    /// The shared round coordinator, e.g. for hyperparameter swaps between
    /// rounds.
    pub fn coordinator(&self) -> Arc<Coordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Accepts connections forever, spawning one task per client.
    pub async fn serve(&mut self, listener: TcpListener) -> io::Result<()> {
        loop {
            tokio::select! {
                res = listener.accept() => {
                    let (stream, addr) = res?;
                    debug!("connection from {addr}");
                    let (rx, tx) = stream.into_split();
                    self.spawn(rx, tx);
                }
                Some(res) = self.tasks.join_next() => Self::reap(res),
            }
        }
    }

    /// Binds one client connection to this server and spawns its task.
    ///
    /// # Arguments
    /// * `rx` - The receiving end of the connection.
    /// * `tx` - The sending end of the connection.
    pub fn spawn<R, W>(&mut self, rx: R, tx: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let coordinator = Arc::clone(&self.coordinator);
        let hub = self.hub.clone();
        let (rx, tx) = comms::channel(rx, tx);
        self.tasks.spawn(connection_loop(coordinator, hub, rx, tx));
    }

    /// Waits for every spawned connection task to finish.
    pub async fn run(&mut self) -> io::Result<()> {
        while let Some(res) = self.tasks.join_next().await {
            res??
        }
        Ok(())
    }

    fn reap(res: Result<io::Result<()>, tokio::task::JoinError>) {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("connection ended: {e}"),
            Err(e) => warn!("connection task failed: {e}"),
        }
    }
}

/// Drives one client connection: the join handshake, then inbound updates
/// and hub broadcasts until either side goes away.
async fn connection_loop<R, W>(
    coordinator: Arc<Coordinator>,
    hub: BroadcastHub,
    mut rx: FedReceiver<R>,
    mut tx: FedSender<W>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let client_id = match rx.recv::<Msg>().await? {
        Msg::Control(Command::Hello { client_id }) => client_id,
        other => {
            let detail = format!("expected hello, got {}", msg_kind(&other));
            tx.send(&Msg::Err(Cow::Borrowed(detail.as_str()))).await?;
            return Err(io::Error::new(io::ErrorKind::InvalidData, detail));
        }
    };

    // Attach before snapshotting the store, so no version can slip between
    // the bootstrap payload and the subscription.
    let mut sub = hub.attach();
    let payload = coordinator.payload();
    tx.send(&payload.init_msg()).await?;
    info!(client_id = client_id.as_str(); "client joined at version {}", payload.head.version);

    // `recv` keeps its progress across a lost `select!` race, so a broadcast
    // landing mid-frame never desynchronizes the inbound stream.
    loop {
        tokio::select! {
            res = rx.recv::<Msg>() => match res {
                Ok(Msg::Update { head, delta }) => {
                    match coordinator.submit(&head, delta) {
                        Submission::Closed(payload) => {
                            let receivers = hub.publish(payload);
                            debug!("broadcast handed to {receivers} connections");
                        }
                        Submission::ShapeMismatch { got, expected } => {
                            let detail = format!(
                                "delta of {got} elements does not fit the canonical {expected}",
                            );
                            tx.send(&Msg::Err(Cow::Borrowed(detail.as_str()))).await?;
                        }
                        Submission::Accepted { .. } | Submission::Stale { .. } => {}
                    }
                }
                Ok(Msg::Control(Command::Disconnect)) => {
                    info!(client_id = client_id.as_str(); "client disconnected");
                    return Ok(());
                }
                Ok(other) => {
                    warn!(
                        client_id = client_id.as_str();
                        "unexpected message: got {}", msg_kind(&other),
                    );
                    tx.send(&Msg::Err(Cow::Borrowed("unexpected message"))).await?;
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!(client_id = client_id.as_str(); "connection closed");
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!(client_id = client_id.as_str(); "malformed frame: {e}");
                    tx.send(&Msg::Err(Cow::Borrowed("malformed frame"))).await?;
                }
                Err(e) => return Err(e),
            },
            payload = sub.recv() => match payload {
                Some(payload) => tx.send(&payload.broadcast_msg()).await?,
                None => return Ok(()),
            },
        }
    }
}

fn msg_kind(msg: &Msg<'_>) -> &'static str {
    match msg {
        Msg::Err(_) => "err",
        Msg::Control(_) => "control",
        Msg::Update { .. } => "update",
        Msg::InitSnapshot { .. } => "init_snapshot",
        Msg::NewVersion { .. } => "new_version",
    }
}
