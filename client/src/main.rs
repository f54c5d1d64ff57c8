use std::{env, io, time::Duration};

use log::{debug, info, warn};
use rand::Rng;
use tokio::{signal, time};

use client::{EngineOptions, SyncEngine, UpdateOutcome};
use model::LinearModel;

const DEFAULT_INPUT_DIM: usize = 4;
const DEFAULT_LEARNING_RATE: f32 = 0.05;
const TICK: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let addr = env::var("SERVER").map_err(io::Error::other)?;
    let input_dim = env_or("INPUT_DIM", DEFAULT_INPUT_DIM);
    let learning_rate = env_or("LEARNING_RATE", DEFAULT_LEARNING_RATE);

    let model = LinearModel::new(input_dim, 1, learning_rate)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let options = EngineOptions {
        client_id: env::var("CLIENT_ID").ok(),
        send_metrics: true,
    };

    let engine = SyncEngine::connect(&addr, model, options).await?;
    info!(
        "connected to {addr}: client_id={} threshold={}",
        engine.client_id(),
        engine.num_examples_per_update(),
    );

    engine.on_new_version(|old, new| info!("new canonical version: {old} -> {new}"));
    engine.on_upload(|update| {
        info!(
            "uploaded: baseline_version={} num_examples={}",
            update.head.baseline_version, update.head.num_examples,
        );
    });

    loop {
        tokio::select! {
            _ = time::sleep(TICK) => {
                let (input, target) = synth_example(input_dim);
                match engine.federated_update(&input, &target).await {
                    Ok(UpdateOutcome::Buffered { remaining }) => {
                        debug!("example buffered: remaining={remaining}");
                    }
                    Ok(UpdateOutcome::Sent { num_examples }) => {
                        info!(
                            "update shipped: num_examples={num_examples} version={}",
                            engine.model_version(),
                        );
                    }
                    Err(e) => {
                        warn!("federated update failed: {e}");
                        break;
                    }
                }
            }
            _ = signal::ctrl_c() => {
                info!("received SIGTERM");
                break;
            }
        }
    }

    engine.disconnect().await;
    Ok(())
}

/// Draws one example of the synthetic target `y = Σx + 1`.
fn synth_example(input_dim: usize) -> (Vec<f32>, Vec<f32>) {
    let mut rng = rand::rng();
    let input: Vec<f32> = (0..input_dim).map(|_| rng.random_range(-1.0..1.0)).collect();
    let target = vec![input.iter().sum::<f32>() + 1.0];
    (input, target)
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
