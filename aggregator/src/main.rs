use std::{env, io, num::NonZeroUsize};

use comms::{
    hyper::Hyperparameters,
    tensor::{TensorLayout, TensorSpec},
};
use log::info;
use tokio::{net::TcpListener, signal};

use aggregator::{SyncServer, VersionStore};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_EXAMPLES_PER_UPDATE: usize = 5;
const DEFAULT_MIN_CONTRIBUTORS: usize = 2;
const DEFAULT_LEARNING_RATE: f32 = 1.0;
const DEFAULT_INPUT_DIM: usize = 4;
const DEFAULT_OUTPUT_DIM: usize = 1;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let host = env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.into());
    let port = env::var("PORT").map_err(io::Error::other)?;
    let examples_per_update = non_zero(env_or("EXAMPLES_PER_UPDATE", DEFAULT_EXAMPLES_PER_UPDATE))?;
    let min_contributors = non_zero(env_or("MIN_CONTRIBUTORS", DEFAULT_MIN_CONTRIBUTORS))?;
    let learning_rate = env_or("LEARNING_RATE", DEFAULT_LEARNING_RATE);
    let input_dim = env_or("INPUT_DIM", DEFAULT_INPUT_DIM);
    let output_dim = env_or("OUTPUT_DIM", DEFAULT_OUTPUT_DIM);

    let hyper =
        Hyperparameters::new(examples_per_update, min_contributors).with_learning_rate(learning_rate);
    let layout = TensorLayout::new(vec![
        TensorSpec::new("weight", vec![output_dim, input_dim]),
        TensorSpec::new("bias", vec![output_dim]),
    ]);

    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    info!(
        "listening on {host}:{port}: params={} examples_per_update={examples_per_update} min_contributors={min_contributors}",
        layout.len(),
    );

    let mut server = SyncServer::new(VersionStore::new(layout, hyper));
    tokio::select! {
        res = server.serve(listener) => res,
        _ = signal::ctrl_c() => {
            info!("received SIGTERM");
            Ok(())
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn non_zero(value: usize) -> io::Result<NonZeroUsize> {
    NonZeroUsize::new(value)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "thresholds must be nonzero"))
}
