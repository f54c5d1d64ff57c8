//! The implementation of the receiving end of the application layer protocol.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Deserialize, LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN};

/// The receiving end handle of the communication.
///
/// Owns its frame buffer and keeps partial progress across dropped `recv`
/// futures, so losing a `select!` race mid-frame never desynchronizes the
/// stream.
pub struct FedReceiver<R: AsyncRead + Unpin> {
    rx: R,
    /// Frame bodies land here; `u32`-backed so raw `f32` tensor tails can be
    /// cast in place without copying.
    buf: Vec<u32>,
    len_buf: [u8; LEN_TYPE_SIZE],
    /// Length-prefix bytes received so far for the frame in flight.
    len_got: usize,
    /// Body bytes received so far for the frame in flight.
    body_got: usize,
}

impl<R: AsyncRead + Unpin> FedReceiver<R> {
    /// Creates a new `FedReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            buf: Vec::new(),
            len_buf: [0; LEN_TYPE_SIZE],
            len_got: 0,
            body_got: 0,
        }
    }

    /// Waits to receive a new message from the inner receiver.
    ///
    /// Cancellation-safe: a dropped call leaves its progress in the receiver
    /// and the next call resumes the same frame. A frame announcing more
    /// than `MAX_FRAME_LEN` bytes is rejected before any allocation with
    /// `io::ErrorKind::FileTooLarge`; that error is fatal to the stream, the
    /// bytes behind an untrusted length cannot be resynchronized.
    ///
    /// # Returns
    /// A result object that returns `T`, borrowing from the internal frame
    /// buffer, on success or `io::Error` on failure.
    pub async fn recv<'a, T>(&'a mut self) -> io::Result<T>
    where
        T: Deserialize<'a>,
    {
        while self.len_got < LEN_TYPE_SIZE {
            let read = self.rx.read(&mut self.len_buf[self.len_got..]).await?;
            if read == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            self.len_got += read;
        }

        let len = LenType::from_be_bytes(self.len_buf);
        if len > MAX_FRAME_LEN as LenType {
            return Err(io::Error::new(
                io::ErrorKind::FileTooLarge,
                format!("Frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"),
            ));
        }
        let len = len as usize;

        let needed = len.div_ceil(size_of::<u32>());
        if self.buf.len() < needed {
            self.buf.resize(needed, 0);
        }

        let view: &mut [u8] = bytemuck::cast_slice_mut(&mut self.buf);
        while self.body_got < len {
            let read = self.rx.read(&mut view[self.body_got..len]).await?;
            if read == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            self.body_got += read;
        }

        self.len_got = 0;
        self.body_got = 0;

        let view: &[u8] = bytemuck::cast_slice(&self.buf);
        T::deserialize(&view[..len])
    }
}
