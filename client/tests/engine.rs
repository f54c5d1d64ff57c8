use std::{borrow::Cow, num::NonZeroUsize, time::Duration};

use tokio::io::{self as tokio_io, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;

use client::{ClientErr, EngineOptions, SyncEngine, UpdateOutcome};
use comms::{
    FedReceiver, FedSender,
    hyper::Hyperparameters,
    msg::{Command, Metrics, Msg, SnapshotHead},
    tensor::{TensorLayout, TensorSpec},
};
use model::{Example, ModelError, TrainableModel};

const PARAMS: usize = 3;
const BUF_SIZE: usize = 4096;

/// Deterministic stand-in model: every `fit` nudges each parameter by the
/// batch size, so deltas are easy to assert.
struct MockModel {
    weights: Vec<f32>,
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
}

impl MockModel {
    fn new() -> Self {
        Self {
            weights: vec![0.0; PARAMS],
            input_shape: vec![2],
            output_shape: vec![1],
        }
    }
}

impl TrainableModel for MockModel {
    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    fn layout(&self) -> TensorLayout {
        TensorLayout::new(vec![TensorSpec::new("params", vec![PARAMS])])
    }

    fn weights(&self) -> Vec<f32> {
        self.weights.clone()
    }

    fn set_weights(&mut self, weights: &[f32]) -> model::Result<()> {
        if weights.len() != self.weights.len() {
            return Err(ModelError::ShapeMismatch {
                what: "weights",
                got: weights.len(),
                expected: self.weights.len(),
            });
        }
        self.weights.copy_from_slice(weights);
        Ok(())
    }

    fn fit(&mut self, examples: &[Example]) -> model::Result<()> {
        for weight in &mut self.weights {
            *weight += examples.len() as f32;
        }
        Ok(())
    }

    fn predict(&self, _input: &[f32]) -> model::Result<Vec<f32>> {
        Ok(vec![self.weights[0]])
    }

    fn evaluate(&self, _examples: &[Example]) -> model::Result<Metrics> {
        Ok(Metrics { loss: 0.25 })
    }
}

type ServerRx = FedReceiver<ReadHalf<DuplexStream>>;
type ServerTx = FedSender<WriteHalf<DuplexStream>>;

fn snapshot_head(version: u64, examples_per_update: usize, min_contributors: usize) -> SnapshotHead {
    SnapshotHead {
        version,
        hyper: Hyperparameters::new(
            NonZeroUsize::new(examples_per_update).unwrap(),
            NonZeroUsize::new(min_contributors).unwrap(),
        ),
        layout: TensorLayout::new(vec![TensorSpec::new("params", vec![PARAMS])]),
    }
}

/// Builds an engine over an in-memory link, answering its handshake with a
/// zero-weight snapshot at version 0.
async fn connect_engine(examples_per_update: usize) -> (SyncEngine<MockModel>, ServerRx, ServerTx) {
    let (sv_stream, cl_stream) = tokio_io::duplex(BUF_SIZE);

    let (sv_rx, sv_tx) = tokio_io::split(sv_stream);
    let (mut sv_rx, mut sv_tx) = comms::channel(sv_rx, sv_tx);

    let (cl_rx, cl_tx) = tokio_io::split(cl_stream);
    let options = EngineOptions {
        client_id: Some("tester".into()),
        send_metrics: false,
    };

    let server = async {
        match sv_rx.recv::<Msg>().await.unwrap() {
            Msg::Control(Command::Hello { client_id }) => assert_eq!(client_id, "tester"),
            other => panic!("expected hello, got {other:?}"),
        }

        let head = snapshot_head(0, examples_per_update, 1);
        let snapshot = Msg::InitSnapshot {
            head: Cow::Owned(head),
            weights: &[0.0; PARAMS],
        };
        sv_tx.send(&snapshot).await.unwrap();
    };

    let engine = SyncEngine::from_transport(cl_rx, cl_tx, MockModel::new(), options);
    let (_, engine) = tokio::join!(server, engine);

    (engine.unwrap(), sv_rx, sv_tx)
}

async fn assert_no_frame_received(sv_rx: &mut ServerRx) {
    match timeout(Duration::from_millis(50), sv_rx.recv::<Msg>()).await {
        Err(_) => {
            // Timeout: no message observed, OK.
        }
        Ok(Err(_)) => {
            // Channel closed, OK for this test.
        }
        Ok(Ok(msg)) => panic!("server unexpectedly received {msg:?}"),
    }
}

#[tokio::test]
async fn below_threshold_buffers_without_network() {
    let (engine, mut sv_rx, _sv_tx) = connect_engine(3).await;

    let first = engine.federated_update(&[1.0, 0.0], &[1.0]).await.unwrap();
    assert_eq!(first, UpdateOutcome::Buffered { remaining: 2 });
    let second = engine.federated_update(&[0.0, 1.0], &[2.0]).await.unwrap();
    assert_eq!(second, UpdateOutcome::Buffered { remaining: 1 });

    assert_eq!(engine.num_examples(), 2);
    assert_eq!(engine.num_examples_remaining(), 1);
    assert_eq!(engine.num_updates(), 0);

    assert_no_frame_received(&mut sv_rx).await;
}

#[tokio::test]
async fn rejects_examples_with_wrong_shapes() {
    let (engine, mut sv_rx, _sv_tx) = connect_engine(1).await;

    let res = engine.federated_update(&[1.0, 2.0, 3.0], &[1.0]).await;
    assert!(matches!(res.unwrap_err(), ClientErr::Model(_)));
    assert_eq!(engine.num_examples(), 0);

    assert_no_frame_received(&mut sv_rx).await;
}

#[tokio::test]
async fn threshold_ships_update_with_baseline_and_delta() {
    let (engine, mut sv_rx, _sv_tx) = connect_engine(2).await;

    let (upload_tx, mut upload_rx) = mpsc::unbounded_channel();
    engine.on_upload(move |update| {
        let _ = upload_tx.send(update.clone());
    });

    engine.federated_update(&[1.0, 0.0], &[1.0]).await.unwrap();
    let outcome = engine.federated_update(&[0.0, 1.0], &[2.0]).await.unwrap();
    assert_eq!(outcome, UpdateOutcome::Sent { num_examples: 2 });

    match sv_rx.recv::<Msg>().await.unwrap() {
        Msg::Update { head, delta } => {
            assert_eq!(head.client_id, "tester");
            assert_eq!(head.baseline_version, 0);
            assert_eq!(head.num_examples, 2);
            assert_eq!(head.metrics, None);
            assert_eq!(delta, [2.0; PARAMS]);
        }
        other => panic!("expected update, got {other:?}"),
    }

    // Weights are rolled back to the baseline while the update is in flight.
    assert_eq!(engine.predict(&[0.0, 0.0]).unwrap(), vec![0.0]);
    assert_eq!(engine.num_examples(), 0);

    let sent = upload_rx.recv().await.unwrap();
    assert_eq!(sent.delta, vec![2.0; PARAMS]);
    assert_eq!(engine.num_updates(), 1);
}

#[tokio::test]
async fn adoption_changes_predictions_and_preserves_buffer() {
    let (engine, _sv_rx, mut sv_tx) = connect_engine(3).await;

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    engine.on_new_version(move |old, new| {
        let _ = seen_tx.send((old, new));
    });

    engine.federated_update(&[1.0, 0.0], &[1.0]).await.unwrap();

    let broadcast = Msg::NewVersion {
        head: Cow::Owned(snapshot_head(1, 3, 1)),
        weights: &[5.0, 6.0, 7.0],
    };
    sv_tx.send(&broadcast).await.unwrap();

    assert_eq!(seen_rx.recv().await.unwrap(), (0, 1));
    assert_eq!(engine.model_version(), 1);
    assert_eq!(engine.num_versions(), 1);
    assert_eq!(engine.predict(&[0.0, 0.0]).unwrap(), vec![5.0]);
    assert_eq!(engine.num_examples(), 1);
}

#[tokio::test]
async fn stale_and_duplicate_broadcasts_are_ignored() {
    let (engine, _sv_rx, mut sv_tx) = connect_engine(3).await;

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    engine.on_new_version(move |old, new| {
        let _ = seen_tx.send((old, new));
    });

    let current = Msg::NewVersion {
        head: Cow::Owned(snapshot_head(2, 3, 1)),
        weights: &[5.0, 6.0, 7.0],
    };
    sv_tx.send(&current).await.unwrap();
    assert_eq!(seen_rx.recv().await.unwrap(), (0, 2));

    let stale = Msg::NewVersion {
        head: Cow::Owned(snapshot_head(1, 3, 1)),
        weights: &[9.0; PARAMS],
    };
    sv_tx.send(&stale).await.unwrap();
    let duplicate = Msg::NewVersion {
        head: Cow::Owned(snapshot_head(2, 3, 1)),
        weights: &[9.0; PARAMS],
    };
    sv_tx.send(&duplicate).await.unwrap();

    assert!(
        timeout(Duration::from_millis(50), seen_rx.recv()).await.is_err(),
        "superseded broadcast fired an adoption event",
    );
    assert_eq!(engine.model_version(), 2);
    assert_eq!(engine.num_versions(), 1);
    assert_eq!(engine.predict(&[0.0, 0.0]).unwrap(), vec![5.0]);
}

#[tokio::test]
async fn handshake_rejects_unexpected_reply() {
    let (sv_stream, cl_stream) = tokio_io::duplex(BUF_SIZE);

    let (sv_rx, sv_tx) = tokio_io::split(sv_stream);
    let (mut sv_rx, mut sv_tx) = comms::channel(sv_rx, sv_tx);
    let (cl_rx, cl_tx) = tokio_io::split(cl_stream);

    let server = async {
        let _ = sv_rx.recv::<Msg>().await.unwrap();
        sv_tx.send(&Msg::Err(Cow::Borrowed("not today"))).await.unwrap();
    };

    let engine = SyncEngine::from_transport(cl_rx, cl_tx, MockModel::new(), EngineOptions::default());
    let (_, res) = tokio::join!(server, engine);

    assert!(matches!(
        res.unwrap_err(),
        ClientErr::UnexpectedMessage { got: "err" }
    ));
}

#[tokio::test]
async fn failed_send_is_dropped_and_engine_survives() {
    let (engine, sv_rx, sv_tx) = connect_engine(1).await;

    // Server goes away entirely: the writer's next send must fail.
    drop(sv_rx);
    drop(sv_tx);

    let outcome = engine.federated_update(&[1.0, 0.0], &[1.0]).await.unwrap();
    assert_eq!(outcome, UpdateOutcome::Sent { num_examples: 1 });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.num_updates(), 0);
    assert_eq!(engine.predict(&[0.0, 0.0]).unwrap(), vec![0.0]);
    assert_eq!(engine.num_examples(), 0);
}

#[tokio::test]
async fn disconnect_sends_goodbye() {
    let (engine, mut sv_rx, _sv_tx) = connect_engine(3).await;

    engine.disconnect().await;

    match sv_rx.recv::<Msg>().await.unwrap() {
        Msg::Control(Command::Disconnect) => {}
        other => panic!("expected disconnect, got {other:?}"),
    }
}
