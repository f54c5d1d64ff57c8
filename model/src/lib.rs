mod error;
mod linear;
mod trainable;

pub use error::{ModelError, Result};
pub use linear::LinearModel;
pub use trainable::{Example, TrainableModel};
