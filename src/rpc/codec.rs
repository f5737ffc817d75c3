//! Newline-delimited JSON-RPC codec.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum frame length so a
//! peer that never sends `\n` cannot make us buffer without bound. Each
//! non-blank line is one complete [`Message`]; blank lines are skipped.
//! Use the same codec for [`tokio_util::codec::FramedRead`] and
//! [`tokio_util::codec::FramedWrite`].

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use super::message::Message;
use crate::{AppError, Result};

/// Largest accepted frame: 4 MiB.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Line-framed JSON-RPC codec.
///
/// Decoding fails on over-long lines, invalid JSON, or JSON that is not a
/// request, response or notification. Callers treat any decode error as
/// fatal for the connection.
#[derive(Debug)]
pub struct RpcCodec(LinesCodec);

impl RpcCodec {
    /// Create a codec with the [`MAX_FRAME_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_FRAME_BYTES))
    }
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RpcCodec {
    type Item = Message;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode(src).map_err(map_codec_error)? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => {}
                Some(line) => return parse_line(&line).map(Some),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode_eof(src).map_err(map_codec_error)? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => {}
                Some(line) => return parse_line(&line).map(Some),
            }
        }
    }
}

impl Encoder<Message> for RpcCodec {
    type Error = AppError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        // serde_json escapes embedded newlines, so one message is one line.
        let line = serde_json::to_string(&item.to_value())?;
        self.0.encode(line, dst).map_err(map_codec_error)
    }
}

fn parse_line(line: &str) -> Result<Message> {
    let value = serde_json::from_str(line)
        .map_err(|err| AppError::Transport(format!("invalid json: {err}")))?;
    Message::from_value(value)
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Transport(format!("frame too long: exceeded {MAX_FRAME_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
