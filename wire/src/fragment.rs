//! Command fragmentation and reassembly.
//!
//! A command of arbitrary size is carried as a sequence of bounded chunks,
//! each tagged with a continuation code. Every chunk repeats the 4-byte
//! message prefix (`version, kind, keep-alive, continuation`) with the
//! continuation recomputed per chunk; the receiver strips the prefix and
//! accumulates only the bytes after it, enforcing the continuation state
//! machine as it goes.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::message::{parse_argv, MessageKind, PROTOCOL_VERSION};
use crate::token::MAX_TOKEN_DATA;

/// Per-chunk message prefix: version, kind, keep-alive, continuation
pub const COMMAND_HEADER_SIZE: usize = 4;

/// Continuation code tagging each chunk of a command
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContinuationCode {
    /// The entire command fits in this chunk
    Whole = 0,
    /// First chunk of a fragmented command
    Start = 1,
    /// Interior chunk
    Middle = 2,
    /// Final chunk
    End = 3,
}

impl TryFrom<u8> for ContinuationCode {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, crate::WireError> {
        match value {
            0 => Ok(ContinuationCode::Whole),
            1 => Ok(ContinuationCode::Start),
            2 => Ok(ContinuationCode::Middle),
            3 => Ok(ContinuationCode::End),
            _ => Err(crate::WireError::Continuation(value)),
        }
    }
}

/// One fully reassembled command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Argument vector, first entry included
    pub args: Vec<Bytes>,
    /// Whether the connection stays open after this command
    pub keep_alive: bool,
}

/// Encode a complete command message with the WHOLE continuation code.
///
/// The fragmenter splits this buffer when it exceeds the chunk limit.
pub(crate) fn encode_command(args: &[Bytes], keep_alive: bool) -> BytesMut {
    let total: usize = COMMAND_HEADER_SIZE + 4 + args.iter().map(|a| 4 + a.len()).sum::<usize>();
    let mut buf = BytesMut::with_capacity(total);
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(MessageKind::Command as u8);
    buf.put_u8(keep_alive as u8);
    buf.put_u8(ContinuationCode::Whole as u8);
    buf.put_i32(args.len() as i32);
    for arg in args {
        buf.put_i32(arg.len() as i32);
        buf.put_slice(arg);
    }
    buf
}

/// Splits command messages into bounded wire chunks
#[derive(Debug)]
pub struct Fragmenter {
    max_data: usize,
}

impl Fragmenter {
    /// Create a fragmenter with the protocol chunk limit
    pub fn new() -> Self {
        Self {
            max_data: MAX_TOKEN_DATA,
        }
    }

    /// Create a fragmenter with a custom chunk limit.
    ///
    /// The limit must leave room for the per-chunk prefix.
    pub fn with_max_data(max_data: usize) -> Self {
        debug_assert!(max_data > COMMAND_HEADER_SIZE);
        Self { max_data }
    }

    /// Produce the ordered chunk sequence for one command.
    ///
    /// Each returned buffer is the plaintext for exactly one token; chunks
    /// must be wrapped and sent strictly in order.
    pub fn fragment(&self, args: &[Bytes], keep_alive: bool) -> Vec<Bytes> {
        let body = encode_command(args, keep_alive);
        let total = body.len();

        if total <= self.max_data {
            return vec![body.freeze()];
        }

        let prefix = [body[0], body[1], body[2]];
        let mut chunks = Vec::with_capacity(total / self.max_data + 2);
        let mut offset = 0;

        while offset < total {
            let first = offset == 0;
            let take = if first {
                self.max_data
            } else {
                (self.max_data - COMMAND_HEADER_SIZE).min(total - offset)
            };

            let mut chunk = BytesMut::with_capacity(if first {
                take
            } else {
                COMMAND_HEADER_SIZE + take
            });
            if !first {
                chunk.put_slice(&prefix);
                chunk.put_u8(0);
            }
            chunk.put_slice(&body[offset..offset + take]);
            offset += take;

            let code = if first {
                ContinuationCode::Start
            } else if offset == total {
                ContinuationCode::End
            } else {
                ContinuationCode::Middle
            };
            chunk[3] = code as u8;
            chunks.push(chunk.freeze());
        }

        debug!(
            chunks = chunks.len(),
            bytes = total,
            "fragmented command over chunk limit"
        );
        chunks
    }
}

impl Default for Fragmenter {
    fn default() -> Self {
        Self::new()
    }
}

/// Reassembly state, per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyMode {
    /// No chunk of the current command has arrived
    Idle,
    /// More chunks are expected
    Accumulating,
    /// A continuation or parse violation occurred; the connection is dead
    Errored,
}

/// Rebuilds commands from their chunk sequence
#[derive(Debug)]
pub struct Reassembler {
    mode: ReassemblyMode,
    buffer: BytesMut,
    keep_alive: bool,
}

impl Reassembler {
    /// Create an idle reassembler
    pub fn new() -> Self {
        Self {
            mode: ReassemblyMode::Idle,
            buffer: BytesMut::new(),
            keep_alive: true,
        }
    }

    /// Current reassembly mode
    pub fn mode(&self) -> ReassemblyMode {
        self.mode
    }

    /// Bytes accumulated for the command in progress
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any partial command and return to idle
    pub fn reset(&mut self) {
        self.mode = ReassemblyMode::Idle;
        self.buffer.clear();
    }

    /// Feed one COMMAND body (the bytes after the version and kind bytes:
    /// keep-alive, continuation, chunk data).
    ///
    /// Returns the parsed command once the final chunk arrives. Any
    /// continuation-sequence or parse violation leaves the reassembler in
    /// [`ReassemblyMode::Errored`]; the connection must then be closed.
    pub fn push(&mut self, body: &[u8]) -> Result<Option<CommandRequest>, crate::WireError> {
        match self.accept(body) {
            Ok(command) => Ok(command),
            Err(err) => {
                self.mode = ReassemblyMode::Errored;
                Err(err)
            }
        }
    }

    fn accept(&mut self, body: &[u8]) -> Result<Option<CommandRequest>, crate::WireError> {
        if body.len() < 2 {
            return Err(crate::WireError::Truncated);
        }
        let keep_alive = body[0] != 0;
        let code = ContinuationCode::try_from(body[1])?;

        let complete = match (self.mode, code) {
            (ReassemblyMode::Idle, ContinuationCode::Whole) => true,
            (ReassemblyMode::Idle, ContinuationCode::Start) => false,
            (ReassemblyMode::Accumulating, ContinuationCode::Middle) => false,
            (ReassemblyMode::Accumulating, ContinuationCode::End) => true,
            _ => return Err(crate::WireError::ContinuationSequence),
        };

        self.keep_alive = keep_alive;
        let data = &body[2..];
        self.reserve_for(data.len());
        self.buffer.extend_from_slice(data);
        trace!(
            chunk = data.len(),
            buffered = self.buffer.len(),
            code = body[1],
            "accepted command chunk"
        );

        if !complete {
            self.mode = ReassemblyMode::Accumulating;
            return Ok(None);
        }

        let mut buf = std::mem::take(&mut self.buffer).freeze();
        self.mode = ReassemblyMode::Idle;
        let args = parse_argv(&mut buf)?;
        Ok(Some(CommandRequest {
            args,
            keep_alive: self.keep_alive,
        }))
    }

    // Grow with 3/2 headroom so repeated appends stay amortized linear
    fn reserve_for(&mut self, additional: usize) {
        let needed = self.buffer.len() + additional;
        if needed > self.buffer.capacity() {
            let target = needed + needed / 2;
            self.buffer.reserve(target - self.buffer.len());
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg(len: usize) -> Bytes {
        Bytes::from(vec![0xAB; len])
    }

    // Push every chunk of a fragmented command and return the result
    fn reassemble(chunks: &[Bytes]) -> CommandRequest {
        let mut reassembler = Reassembler::new();
        let mut out = None;
        for chunk in chunks {
            assert_eq!(chunk[0], PROTOCOL_VERSION);
            assert_eq!(chunk[1], MessageKind::Command as u8);
            let parsed = reassembler.push(&chunk[2..]).unwrap();
            assert!(out.is_none(), "command completed before the last chunk");
            out = parsed;
        }
        out.expect("command incomplete after the last chunk")
    }

    fn roundtrip(args: Vec<Bytes>, keep_alive: bool, max_data: usize) {
        let fragmenter = Fragmenter::with_max_data(max_data);
        let chunks = fragmenter.fragment(&args, keep_alive);
        let command = reassemble(&chunks);
        assert_eq!(command.args, args);
        assert_eq!(command.keep_alive, keep_alive);
    }

    #[test]
    fn test_roundtrip_sizes_around_chunk_limit() {
        let max = 64;
        // Encoded size is 12 + arg length; cover empty, tiny, and the
        // boundary sizes just below, at, and above the chunk limit.
        for arg_len in [0, 1, max - 13, max - 12, max - 11, 3 * max] {
            roundtrip(vec![arg(arg_len)], true, max);
        }
    }

    #[test]
    fn test_roundtrip_empty_argv() {
        roundtrip(vec![], false, 64);
    }

    #[test]
    fn test_roundtrip_many_args() {
        let args: Vec<Bytes> = (0..40).map(|i| arg(i % 7)).collect();
        roundtrip(args, true, 64);
    }

    #[test]
    fn test_three_chunk_split_sizes() {
        // A body of exactly 2 * 65536 + 10 bytes splits into chunks of
        // 65536, 65536, and 18 bytes tagged START, MIDDLE, END.
        let body_len = 2 * MAX_TOKEN_DATA + 10;
        let args = vec![arg(body_len - 12)];
        let chunks = Fragmenter::new().fragment(&args, false);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), MAX_TOKEN_DATA);
        assert_eq!(chunks[1].len(), MAX_TOKEN_DATA);
        assert_eq!(chunks[2].len(), 18);
        assert_eq!(chunks[0][3], ContinuationCode::Start as u8);
        assert_eq!(chunks[1][3], ContinuationCode::Middle as u8);
        assert_eq!(chunks[2][3], ContinuationCode::End as u8);

        let command = reassemble(&chunks);
        assert_eq!(command.args, args);
    }

    #[test]
    fn test_chunks_repeat_prefix() {
        let chunks = Fragmenter::with_max_data(32).fragment(&[arg(100)], true);
        assert!(chunks.len() > 2);
        for chunk in &chunks {
            assert_eq!(chunk[0], PROTOCOL_VERSION);
            assert_eq!(chunk[1], MessageKind::Command as u8);
            assert_eq!(chunk[2], 1);
            assert!(chunk.len() <= 32);
        }
    }

    #[test]
    fn test_continuation_table_rejects_invalid_transitions() {
        // (state priming chunks, offending code)
        let from_idle = [ContinuationCode::Middle, ContinuationCode::End];
        for code in from_idle {
            let mut reassembler = Reassembler::new();
            let body = [1, code as u8, 0, 0, 0, 0];
            assert!(matches!(
                reassembler.push(&body),
                Err(crate::WireError::ContinuationSequence)
            ));
            assert_eq!(reassembler.mode(), ReassemblyMode::Errored);
        }

        let from_accumulating = [ContinuationCode::Whole, ContinuationCode::Start];
        for code in from_accumulating {
            let mut reassembler = Reassembler::new();
            let start = [1, ContinuationCode::Start as u8, 0xAA];
            assert!(reassembler.push(&start).unwrap().is_none());
            let body = [1, code as u8, 0xBB];
            assert!(matches!(
                reassembler.push(&body),
                Err(crate::WireError::ContinuationSequence)
            ));
            assert_eq!(reassembler.mode(), ReassemblyMode::Errored);
        }
    }

    #[test]
    fn test_unknown_continuation_code() {
        let mut reassembler = Reassembler::new();
        assert!(matches!(
            reassembler.push(&[1, 7, 0]),
            Err(crate::WireError::Continuation(7))
        ));
        assert_eq!(reassembler.mode(), ReassemblyMode::Errored);
    }

    #[test]
    fn test_missing_argument_is_truncation() {
        // argc says two arguments but only one is present
        let mut body = BytesMut::new();
        body.put_u8(1);
        body.put_u8(ContinuationCode::Whole as u8);
        body.put_i32(2);
        body.put_i32(3);
        body.put_slice(b"abc");

        let mut reassembler = Reassembler::new();
        assert!(matches!(
            reassembler.push(&body),
            Err(crate::WireError::Truncated)
        ));
        assert_eq!(reassembler.mode(), ReassemblyMode::Errored);
    }

    #[test]
    fn test_trailing_bytes_after_argv() {
        let mut body = BytesMut::new();
        body.put_u8(0);
        body.put_u8(ContinuationCode::Whole as u8);
        body.put_i32(1);
        body.put_i32(2);
        body.put_slice(b"ok");
        body.put_slice(b"junk");

        let mut reassembler = Reassembler::new();
        assert!(matches!(
            reassembler.push(&body),
            Err(crate::WireError::TrailingData)
        ));
    }

    #[test]
    fn test_keep_alive_read_from_last_chunk() {
        let chunks = Fragmenter::with_max_data(32).fragment(&[arg(80)], true);
        let mut reassembler = Reassembler::new();
        let mut out = None;
        for (i, chunk) in chunks.iter().enumerate() {
            let mut body = chunk[2..].to_vec();
            // Flip keep-alive on the final chunk only
            if i == chunks.len() - 1 {
                body[0] = 0;
            }
            out = reassembler.push(&body).unwrap();
        }
        assert!(!out.unwrap().keep_alive);
    }

    #[test]
    fn test_reset_discards_partial_command() {
        let mut reassembler = Reassembler::new();
        let start = [1, ContinuationCode::Start as u8, 0xAA, 0xBB];
        assert!(reassembler.push(&start).unwrap().is_none());
        assert!(reassembler.buffered() > 0);

        reassembler.reset();
        assert_eq!(reassembler.mode(), ReassemblyMode::Idle);
        assert_eq!(reassembler.buffered(), 0);

        // A WHOLE command parses cleanly after the reset
        let whole = encode_command(&[Bytes::from_static(b"st")], true);
        let command = reassembler.push(&whole[2..]).unwrap().unwrap();
        assert_eq!(command.args, vec![Bytes::from_static(b"st")]);
    }
}
