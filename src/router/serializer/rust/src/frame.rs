/* src/router/serializer/rust/src/frame.rs */

//! Length-prefixed frames: `;0x{8 hex digits};{utf-8 payload}`.
//!
//! The header declares the payload size in bytes, so a reader can buffer
//! exactly one frame regardless of how the transport splits the body.

use bytes::{Buf, Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::stream;
use trellis_router::BoxStream;

use crate::error::SerializationError;

pub const FRAME_HEADER_LEN: usize = 12;
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_MAX_BUFFERED: usize = 32 * 1024 * 1024;

pub fn encode_frame(payload: &str) -> Result<Bytes, SerializationError> {
  let len = u32::try_from(payload.len())
    .map_err(|_| SerializationError::FrameTooLarge { size: payload.len(), limit: u32::MAX as usize })?;
  let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
  out.extend_from_slice(format!(";0x{len:08x};").as_bytes());
  out.extend_from_slice(payload.as_bytes());
  Ok(out.freeze())
}

/// Frame every chunk of `chunks`.
pub fn frame_stream<S>(chunks: S) -> BoxStream<Result<Bytes, SerializationError>>
where
  S: Stream<Item = Result<String, SerializationError>> + Send + 'static,
{
  Box::pin(chunks.map(|chunk| chunk.and_then(|text| encode_frame(&text))))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLimits {
  pub max_frame_size: usize,
  pub max_buffered: usize,
}

impl Default for FrameLimits {
  fn default() -> Self {
    Self { max_frame_size: DEFAULT_MAX_FRAME_SIZE, max_buffered: DEFAULT_MAX_BUFFERED }
  }
}

fn malformed(header: &[u8]) -> SerializationError {
  SerializationError::MalformedHeader(String::from_utf8_lossy(header).into_owned())
}

/// Reject a header as soon as a byte is wrong, even before all 12 arrived.
fn check_header_prefix(partial: &[u8]) -> Result<(), SerializationError> {
  for (i, b) in partial.iter().take(FRAME_HEADER_LEN).enumerate() {
    let ok = match i {
      0 | 11 => *b == b';',
      1 => *b == b'0',
      2 => *b == b'x',
      _ => b.is_ascii_hexdigit(),
    };
    if !ok {
      return Err(malformed(&partial[..partial.len().min(FRAME_HEADER_LEN)]));
    }
  }
  Ok(())
}

fn parse_header(header: &[u8]) -> Result<usize, SerializationError> {
  check_header_prefix(header)?;
  let digits = std::str::from_utf8(&header[3..11]).map_err(|_| malformed(header))?;
  let len = u32::from_str_radix(digits, 16).map_err(|_| malformed(header))?;
  Ok(len as usize)
}

/// Incremental frame parser. Feed bytes with [`push`], drain frames with
/// [`next_frame`], and call [`finish`] at end of input.
///
/// [`push`]: FrameDecoder::push
/// [`next_frame`]: FrameDecoder::next_frame
/// [`finish`]: FrameDecoder::finish
#[derive(Debug, Default)]
pub struct FrameDecoder {
  buf: BytesMut,
  limits: FrameLimits,
}

impl FrameDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_limits(limits: FrameLimits) -> Self {
    Self { buf: BytesMut::new(), limits }
  }

  pub fn buffered(&self) -> usize {
    self.buf.len()
  }

  pub fn push(&mut self, data: &[u8]) -> Result<(), SerializationError> {
    let size = self.buf.len() + data.len();
    if size > self.limits.max_buffered {
      return Err(SerializationError::BufferExceeded { size, limit: self.limits.max_buffered });
    }
    self.buf.extend_from_slice(data);
    Ok(())
  }

  pub fn next_frame(&mut self) -> Result<Option<String>, SerializationError> {
    if self.buf.len() < FRAME_HEADER_LEN {
      check_header_prefix(&self.buf)?;
      return Ok(None);
    }
    let len = parse_header(&self.buf[..FRAME_HEADER_LEN])?;
    if len > self.limits.max_frame_size {
      return Err(SerializationError::FrameTooLarge { size: len, limit: self.limits.max_frame_size });
    }
    if self.buf.len() < FRAME_HEADER_LEN + len {
      return Ok(None);
    }
    self.buf.advance(FRAME_HEADER_LEN);
    let payload = self.buf.split_to(len);
    String::from_utf8(payload.to_vec()).map(Some).map_err(|_| SerializationError::InvalidUtf8)
  }

  /// End of input: anything still buffered is a truncated frame.
  pub fn finish(&self) -> Result<(), SerializationError> {
    match self.buf.len() {
      0 => Ok(()),
      n if n < FRAME_HEADER_LEN => Err(SerializationError::Truncated { expected: FRAME_HEADER_LEN, received: n }),
      n => {
        let expected = parse_header(&self.buf[..FRAME_HEADER_LEN])?;
        Err(SerializationError::Truncated { expected, received: n - FRAME_HEADER_LEN })
      }
    }
  }
}

struct ReaderState<S> {
  input: S,
  decoder: FrameDecoder,
}

/// Decode frames from a byte stream. The stream ends after the first error.
pub fn read_frames<S, E>(input: S, limits: FrameLimits) -> BoxStream<Result<String, SerializationError>>
where
  S: Stream<Item = Result<Bytes, E>> + Send + 'static,
  E: std::fmt::Display + Send + 'static,
{
  let state = Some(ReaderState { input: Box::pin(input), decoder: FrameDecoder::with_limits(limits) });
  Box::pin(stream::unfold(state, |state| async move {
    let mut state = state?;
    loop {
      match state.decoder.next_frame() {
        Ok(Some(frame)) => return Some((Ok(frame), Some(state))),
        Ok(None) => {}
        Err(err) => return Some((Err(fail(err)), None)),
      }
      match state.input.next().await {
        Some(Ok(bytes)) => {
          if let Err(err) = state.decoder.push(&bytes) {
            return Some((Err(fail(err)), None));
          }
        }
        Some(Err(err)) => return Some((Err(fail(SerializationError::Io(err.to_string()))), None)),
        None => return state.decoder.finish().err().map(|err| (Err(fail(err)), None)),
      }
    }
  }))
}

fn fail(err: SerializationError) -> SerializationError {
  tracing::warn!(error = %err, "frame reader stopped");
  err
}
