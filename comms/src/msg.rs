use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize, hyper::Hyperparameters, tensor::TensorLayout};

type Kind = u32;
const KIND_SIZE: usize = size_of::<Kind>();

type HeadLen = u32;
const HEAD_LEN_SIZE: usize = size_of::<HeadLen>();

/// Tensor tails are raw `f32`s; their offset inside the frame must stay a
/// multiple of this so the receiver can cast them in place.
const TAIL_ALIGN: usize = size_of::<f32>();

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Hello { client_id: String },
    Disconnect,
}

/// Evaluation results a client may attach to an update.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Metrics {
    pub loss: f32,
}

/// The JSON head of an `Update` frame; the frame tail carries the delta data.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UpdateHead {
    pub client_id: String,
    pub baseline_version: u64,
    pub num_examples: u32,
    pub metrics: Option<Metrics>,
    pub layout: TensorLayout,
}

/// The JSON head of an `InitSnapshot` or `NewVersion` frame; the frame tail
/// carries the full canonical weights.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SnapshotHead {
    pub version: u64,
    pub hyper: Hyperparameters,
    pub layout: TensorLayout,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Err(Cow<'a, str>),
    Control(Command),
    Update {
        head: Cow<'a, UpdateHead>,
        delta: &'a [f32],
    },
    InitSnapshot {
        head: Cow<'a, SnapshotHead>,
        weights: &'a [f32],
    },
    NewVersion {
        head: Cow<'a, SnapshotHead>,
        weights: &'a [f32],
    },
}

impl Msg<'_> {
    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {KIND_SIZE} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(byte: u8) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind byte {byte}"),
        ))
    }
}

/// Appends the kind header plus a length-prefixed JSON head, space-padded so
/// the tensor tail that follows lands 4-byte aligned inside the frame.
fn write_head<H: serde::Serialize>(buf: &mut Vec<u8>, kind: Kind, head: &H) {
    buf.extend_from_slice(&kind.to_be_bytes());

    let len_at = buf.len();
    buf.extend_from_slice(&[0; HEAD_LEN_SIZE]);

    // SAFETY: Serialize impls for the head types are derived and not implemented
    //         by hand. Nor have a non string-key map inside.
    serde_json::to_writer(&mut *buf, head).unwrap();

    while (buf.len() - len_at - HEAD_LEN_SIZE) % TAIL_ALIGN != 0 {
        buf.push(b' ');
    }

    let head_len = (buf.len() - len_at - HEAD_LEN_SIZE) as HeadLen;
    buf[len_at..len_at + HEAD_LEN_SIZE].copy_from_slice(&head_len.to_be_bytes());
}

/// Splits a tensor-bearing frame body into its JSON head and `f32` tail.
fn split_head(body: &[u8]) -> io::Result<(&[u8], &[f32])> {
    if body.len() < HEAD_LEN_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Frame body of {} bytes cannot hold a head length", body.len()),
        ));
    }

    let (len_buf, rest) = body.split_at(HEAD_LEN_SIZE);

    // SAFETY: We splitted the buffer to be of size `HEAD_LEN_SIZE` just above.
    let head_len = HeadLen::from_be_bytes(len_buf.try_into().unwrap()) as usize;

    if rest.len() < head_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Truncated head: got {} bytes, expected {head_len}", rest.len()),
        ));
    }

    let (head, tail) = rest.split_at(head_len);
    let tail = bytemuck::try_cast_slice(tail)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("Bad tensor tail: {e}")))?;

    Ok((head, tail))
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                let header = (0 as Kind).to_be_bytes();
                buf.extend_from_slice(&header);
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                let header = (1 as Kind).to_be_bytes();
                buf.extend_from_slice(&header);

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, &cmd).unwrap();
                None
            }
            Msg::Update { head, delta } => {
                write_head(buf, 2, head.as_ref());
                Some(bytemuck::cast_slice(delta))
            }
            Msg::InitSnapshot { head, weights } => {
                write_head(buf, 3, head.as_ref());
                Some(bytemuck::cast_slice(weights))
            }
            Msg::NewVersion { head, weights } => {
                write_head(buf, 4, head.as_ref());
                Some(bytemuck::cast_slice(weights))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < KIND_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at(KIND_SIZE);

        // SAFETY: We splitted the buffer to be of size `KIND_SIZE` just above.
        let kind = Kind::from_be_bytes(kind_buf.try_into().unwrap()) as u8;

        match kind {
            0 => {
                let string = str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            1 => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            2 => {
                let (head, delta) = split_head(rest)?;
                let head = Cow::Owned(serde_json::from_slice(head)?);
                Ok(Self::Update { head, delta })
            }
            3..5 => {
                let (head, weights) = split_head(rest)?;
                let head = Cow::Owned(serde_json::from_slice(head)?);

                Ok(match kind {
                    3 => Self::InitSnapshot { head, weights },
                    4 => Self::NewVersion { head, weights },
                    _ => unreachable!(),
                })
            }
            byte => Self::invalid_kind_byte(byte),
        }
    }
}
