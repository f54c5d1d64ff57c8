mod deserialize;
pub mod hyper;
pub mod msg;
mod receiver;
mod sender;
mod serialize;
pub mod tensor;

use tokio::io::{AsyncRead, AsyncWrite};

pub use deserialize::Deserialize;
pub use receiver::FedReceiver;
pub use sender::FedSender;
pub use serialize::Serialize;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Upper bound on one frame's byte length, enforced on both ends.
///
/// A peer announcing more than this is treated as corrupt rather than
/// trusted with the allocation; generous enough for a full snapshot of
/// several million `f32` parameters.
pub const MAX_FRAME_LEN: usize = 64 << 20;

/// Creates both `FedReceiver` and `FedSender` network channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// A communication stream in the form of a receiver and sender pair.
pub fn channel<R, W>(rx: R, tx: W) -> (FedReceiver<R>, FedSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FedReceiver::new(rx), FedSender::new(tx))
}
