use std::{
    borrow::Cow,
    fmt, io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use comms::{
    FedReceiver, FedSender,
    hyper::Hyperparameters,
    msg::{Command, Metrics, Msg, SnapshotHead, UpdateHead},
};
use log::{debug, info, warn};
use model::{Example, TrainableModel};
use parking_lot::Mutex;
use rand::Rng;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, ToSocketAddrs},
    sync::mpsc,
    task,
};

use crate::{ClientErr, ExampleBuffer, Result, events::EngineEvents};

/// Tunables for a `SyncEngine` instance.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Stable client identity; a random one is generated when absent.
    pub client_id: Option<String>,
    /// Attach evaluation metrics to every update.
    pub send_metrics: bool,
}

/// What a `federated_update` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The example was stored; `remaining` more are needed before an update
    /// ships.
    Buffered { remaining: usize },
    /// A trained update over `num_examples` examples was handed to the
    /// transport.
    Sent { num_examples: usize },
}

/// An update exactly as it was handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct SentUpdate {
    pub head: UpdateHead,
    pub delta: Vec<f32>,
}

/// One client's synchronization runtime.
///
/// Owns the local trainable model, buffers examples until the server's
/// threshold is met, trains and ships weight deltas, and adopts every newer
/// canonical version broadcast by the aggregator.
pub struct SyncEngine<M> {
    shared: Arc<EngineShared<M>>,
    update_tx: mpsc::Sender<SentUpdate>,
    writer: task::JoinHandle<()>,
}

impl<M> fmt::Debug for SyncEngine<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("client_id", &self.shared.client_id)
            .finish_non_exhaustive()
    }
}

struct EngineShared<M> {
    client_id: String,
    // Lock order: model before hyper.
    model: Mutex<M>,
    hyper: Mutex<Hyperparameters>,
    buffer: ExampleBuffer,
    events: EngineEvents,
    /// Adopted canonical version. Written only under the model lock so that
    /// (weights, version) pairs stay consistent; reads are lock-free.
    version: AtomicU64,
    num_updates: AtomicU64,
    num_versions: AtomicU64,
    send_metrics: bool,
}

impl<M: TrainableModel + 'static> SyncEngine<M> {
    /// Connects to the aggregator and performs the join handshake.
    ///
    /// # Args
    /// * `addr` - The aggregator's address.
    /// * `model` - The local trainable model; its weights are replaced by the
    ///   canonical snapshot before this returns.
    /// * `options` - Engine tunables.
    ///
    /// # Errors
    /// Returns `ClientErr` on I/O failures, on an unexpected handshake reply,
    /// or when the snapshot does not fit the local model.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        model: M,
        options: EngineOptions,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (rx, tx) = stream.into_split();
        Self::from_transport(rx, tx, model, options).await
    }

    /// Performs the join handshake over an already established transport.
    ///
    /// Sends `Hello`, waits for the `InitSnapshot` reply, installs the
    /// canonical weights and hyperparameters, and spawns the writer and
    /// inbound tasks.
    pub async fn from_transport<R, W>(
        rx: R,
        tx: W,
        mut model: M,
        options: EngineOptions,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let client_id = options
            .client_id
            .unwrap_or_else(|| format!("client-{:08x}", rand::rng().random::<u32>()));

        let (mut rx, mut tx) = comms::channel(rx, tx);
        let hello = Msg::Control(Command::Hello {
            client_id: client_id.clone(),
        });
        tx.send(&hello).await?;

        let (head, weights): (SnapshotHead, Vec<f32>) = match rx.recv::<Msg>().await? {
            Msg::InitSnapshot { head, weights } => (head.into_owned(), weights.to_vec()),
            other => {
                return Err(ClientErr::UnexpectedMessage {
                    got: msg_kind(&other),
                });
            }
        };
        model.set_weights(&weights)?;

        info!(client_id = client_id.as_str(); "joined at version {}", head.version);

        let buffer = ExampleBuffer::new(model.input_shape(), model.output_shape());
        let shared = Arc::new(EngineShared {
            client_id,
            model: Mutex::new(model),
            hyper: Mutex::new(head.hyper),
            buffer,
            events: EngineEvents::default(),
            version: AtomicU64::new(head.version),
            num_updates: AtomicU64::new(0),
            num_versions: AtomicU64::new(0),
            send_metrics: options.send_metrics,
        });

        let (update_tx, update_rx) = mpsc::channel(8);
        let writer = task::spawn(writer_loop(Arc::clone(&shared), tx, update_rx));
        task::spawn(inbound_loop(Arc::clone(&shared), rx));

        Ok(Self {
            shared,
            update_tx,
            writer,
        })
    }

    /// Validates and buffers one example, training and shipping an update
    /// once the server's threshold is met.
    ///
    /// Below the threshold this never touches the network. At the threshold
    /// the buffered batch is drained, the model is fit on the blocking pool,
    /// the weight delta against the adopted baseline is computed, the local
    /// weights are rolled back to the baseline, and the update is handed to
    /// the writer task. This resolves once the update is handed over, not
    /// once the server has seen it.
    ///
    /// Calls are expected to be serialized by the caller; concurrent calls
    /// cannot corrupt the buffer but may race the threshold check.
    ///
    /// # Errors
    /// Returns `ClientErr::Model` when the example does not match the model's
    /// shapes and `ClientErr::Disconnected` when the writer task is gone.
    pub async fn federated_update(&self, input: &[f32], target: &[f32]) -> Result<UpdateOutcome> {
        let buffered = self.shared.buffer.add(input, target)?;
        let threshold = self.shared.hyper.lock().examples_per_update.get();
        if buffered < threshold {
            return Ok(UpdateOutcome::Buffered {
                remaining: threshold - buffered,
            });
        }

        let batch = self.shared.buffer.drain();
        if batch.is_empty() {
            // Another call drained the batch first.
            return Ok(UpdateOutcome::Buffered {
                remaining: threshold,
            });
        }

        let num_examples = batch.len();
        let update = self.shared.train_delta(batch).await?;
        if self.update_tx.send(update).await.is_err() {
            return Err(ClientErr::Disconnected);
        }

        Ok(UpdateOutcome::Sent { num_examples })
    }

    /// Computes the model output for `input` on the currently adopted
    /// weights.
    pub fn predict(&self, input: &[f32]) -> Result<Vec<f32>> {
        Ok(self.shared.model.lock().predict(input)?)
    }

    /// Measures prediction quality for one example on the currently adopted
    /// weights.
    pub fn evaluate(&self, input: &[f32], target: &[f32]) -> Result<Metrics> {
        let example = Example::new(input.to_vec(), target.to_vec());
        let metrics = self
            .shared
            .model
            .lock()
            .evaluate(std::slice::from_ref(&example))?;
        Ok(metrics)
    }

    /// Registers a callback fired after every version adoption with
    /// `(old, new)` version numbers.
    pub fn on_new_version(&self, callback: impl Fn(u64, u64) + Send + Sync + 'static) {
        self.shared.events.on_new_version(callback);
    }

    /// Registers a callback fired after every update the transport accepted.
    pub fn on_upload(&self, callback: impl Fn(&SentUpdate) + Send + Sync + 'static) {
        self.shared.events.on_upload(callback);
    }

    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    /// The currently adopted canonical version.
    pub fn model_version(&self) -> u64 {
        self.shared.version.load(Ordering::Acquire)
    }

    /// Updates accepted by the transport over this engine's lifetime.
    pub fn num_updates(&self) -> u64 {
        self.shared.num_updates.load(Ordering::Relaxed)
    }

    /// Version adoptions over this engine's lifetime.
    pub fn num_versions(&self) -> u64 {
        self.shared.num_versions.load(Ordering::Relaxed)
    }

    /// Examples currently buffered.
    pub fn num_examples(&self) -> usize {
        self.shared.buffer.len()
    }

    pub fn num_examples_per_update(&self) -> usize {
        self.shared.hyper.lock().examples_per_update.get()
    }

    pub fn num_examples_remaining(&self) -> usize {
        self.num_examples_per_update()
            .saturating_sub(self.num_examples())
    }

    /// Announces the disconnect to the server and waits for the writer task
    /// to drain.
    pub async fn disconnect(self) {
        let Self {
            shared: _,
            update_tx,
            writer,
        } = self;

        drop(update_tx);
        let _ = writer.await;
    }
}

impl<M: TrainableModel + 'static> EngineShared<M> {
    /// Trains on `batch` and builds the resulting update.
    ///
    /// Runs on the blocking pool and takes the model lock on the blocking
    /// thread, so version adoption waits until the trained weights are rolled
    /// back to the baseline.
    async fn train_delta(self: &Arc<Self>, batch: Vec<Example>) -> Result<SentUpdate> {
        let shared = Arc::clone(self);
        let update = task::spawn_blocking(move || -> Result<SentUpdate> {
            let mut model = shared.model.lock();
            let baseline_version = shared.version.load(Ordering::Acquire);
            let baseline = model.weights();

            model.fit(&batch)?;
            let metrics = if shared.send_metrics {
                Some(model.evaluate(&batch)?)
            } else {
                None
            };
            let trained = model.weights();
            model.set_weights(&baseline)?;
            let layout = model.layout();
            drop(model);

            let delta = trained
                .iter()
                .zip(&baseline)
                .map(|(post, pre)| post - pre)
                .collect();

            Ok(SentUpdate {
                head: UpdateHead {
                    client_id: shared.client_id.clone(),
                    baseline_version,
                    num_examples: batch.len() as u32,
                    metrics,
                    layout,
                },
                delta,
            })
        })
        .await
        .map_err(io::Error::from)??;

        Ok(update)
    }

    /// Installs a newer canonical snapshot, ignoring superseded ones.
    fn adopt(&self, head: &SnapshotHead, weights: &[f32]) {
        let transition = {
            let mut model = self.model.lock();
            let current = self.version.load(Ordering::Acquire);

            if head.version <= current {
                debug!(
                    client_id = self.client_id.as_str();
                    "ignoring superseded version {}", head.version,
                );
                None
            } else if let Err(e) = model.set_weights(weights) {
                warn!(
                    client_id = self.client_id.as_str();
                    "refusing snapshot at version {}: {e}", head.version,
                );
                None
            } else {
                self.version.store(head.version, Ordering::Release);
                *self.hyper.lock() = head.hyper;
                self.num_versions.fetch_add(1, Ordering::Relaxed);
                Some((current, head.version))
            }
        };

        if let Some((old, new)) = transition {
            info!(client_id = self.client_id.as_str(); "adopted version {old} -> {new}");
            self.events.emit_new_version(old, new);
        }
    }
}

/// Ships queued updates, then announces the disconnect once the engine
/// handle is dropped.
///
/// A failed send is logged and the update dropped; its examples are already
/// drained and are not re-queued, so stronger delivery lives here if it is
/// ever needed.
async fn writer_loop<M, W>(
    shared: Arc<EngineShared<M>>,
    mut tx: FedSender<W>,
    mut updates: mpsc::Receiver<SentUpdate>,
) where
    M: TrainableModel + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(update) = updates.recv().await {
        let msg = Msg::Update {
            head: Cow::Borrowed(&update.head),
            delta: &update.delta,
        };

        match tx.send(&msg).await {
            Ok(()) => {
                shared.num_updates.fetch_add(1, Ordering::Relaxed);
                debug!(
                    client_id = shared.client_id.as_str();
                    "update sent: baseline_version={} num_examples={}",
                    update.head.baseline_version, update.head.num_examples,
                );
                shared.events.emit_upload(&update);
            }
            Err(e) => {
                warn!(
                    client_id = shared.client_id.as_str();
                    "dropping update after failed send: {e}",
                );
            }
        }
    }

    let goodbye = Msg::Control(Command::Disconnect);
    if let Err(e) = tx.send(&goodbye).await {
        debug!(client_id = shared.client_id.as_str(); "failed to send disconnect: {e}");
    }
}

/// Applies server broadcasts until the connection closes.
async fn inbound_loop<M, R>(shared: Arc<EngineShared<M>>, mut rx: FedReceiver<R>)
where
    M: TrainableModel + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    loop {
        match rx.recv::<Msg>().await {
            Ok(Msg::NewVersion { head, weights } | Msg::InitSnapshot { head, weights }) => {
                shared.adopt(&head, weights);
            }
            Ok(Msg::Err(detail)) => {
                warn!(client_id = shared.client_id.as_str(); "server reported: {detail}");
            }
            Ok(other) => {
                warn!(
                    client_id = shared.client_id.as_str();
                    "unexpected message: got {}", msg_kind(&other),
                );
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                info!(client_id = shared.client_id.as_str(); "connection closed");
                break;
            }
            Err(e) => {
                warn!(client_id = shared.client_id.as_str(); "receive failed: {e}");
                break;
            }
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
