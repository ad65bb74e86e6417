use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

/// Frame delimiter.
pub const FLAG: u8 = 0x7E;

/// Escape marker; the following byte is XOR-ed with [`ESCAPE_XOR`].
pub const ESCAPE: u8 = 0x7D;

const ESCAPE_XOR: u8 = 0x20;

/// Address (1) + CRC-32 (4).
const MIN_BODY: usize = 1 + CRC_SIZE;
const CRC_SIZE: usize = 4;

/// Default maximum payload size: 64 KiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

/// A decoded frame.
///
/// `valid` is false when the trailing checksum did not match. Invalid frames
/// are never dispatched to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The address selecting the logical channel.
    pub address: u8,
    /// The frame payload.
    pub payload: Bytes,
    /// Whether the integrity check passed.
    pub valid: bool,
}

impl Frame {
    /// Create a new, valid frame.
    pub fn new(address: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            address,
            payload: payload.into(),
            valid: true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────┬──────────────────────────────────────────────┬──────┐
/// │ 0x7E │ escaped( address | payload | crc32 (4B LE) ) │ 0x7E │
/// └──────┴──────────────────────────────────────────────┴──────┘
/// ```
/// The CRC covers the unescaped address and payload.
pub fn encode_frame(address: u8, payload: &[u8], dst: &mut BytesMut) {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[address]);
    hasher.update(payload);
    let crc = hasher.finalize().to_le_bytes();

    dst.reserve(2 + 2 * (MIN_BODY + payload.len()));
    dst.put_u8(FLAG);
    put_escaped(dst, address);
    for &byte in payload.iter().chain(crc.iter()) {
        put_escaped(dst, byte);
    }
    dst.put_u8(FLAG);
}

fn put_escaped(dst: &mut BytesMut, byte: u8) {
    if byte == FLAG || byte == ESCAPE {
        dst.put_u8(ESCAPE);
        dst.put_u8(byte ^ ESCAPE_XOR);
    } else {
        dst.put_u8(byte);
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 64 KiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Discarding bytes until the first flag.
    Hunting,
    /// Collecting frame body bytes.
    Body,
    /// Previous byte was an escape marker.
    Escaped,
    /// Body exceeded the size limit; discarding until the next flag.
    Overflow,
}

/// Restartable streaming decoder.
///
/// Bytes may arrive in chunks of any size; the decoder carries partial
/// frames across calls, so feeding a stream in pieces yields exactly the
/// frames produced by feeding it at once.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecoderState,
    body: BytesMut,
    max_body: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder with default configuration.
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    /// Create a decoder with explicit configuration.
    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            state: DecoderState::Hunting,
            body: BytesMut::new(),
            max_body: config.max_payload_size + MIN_BODY,
        }
    }

    /// Feed a chunk of link bytes, returning every frame it completes.
    ///
    /// Frames whose checksum does not match are returned with
    /// `valid == false`. Truncated and oversized frames produce nothing.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();

        for &byte in data {
            match self.state {
                DecoderState::Hunting => {
                    if byte == FLAG {
                        self.restart();
                    }
                }
                DecoderState::Body => match byte {
                    FLAG => {
                        if let Some(frame) = self.finish() {
                            frames.push(frame);
                        }
                        self.restart();
                    }
                    ESCAPE => self.state = DecoderState::Escaped,
                    other => self.push(other),
                },
                DecoderState::Escaped => {
                    if byte == FLAG {
                        debug!("escape marker followed by flag; dropping frame");
                        self.restart();
                    } else {
                        self.state = DecoderState::Body;
                        self.push(byte ^ ESCAPE_XOR);
                    }
                }
                DecoderState::Overflow => {
                    if byte == FLAG {
                        self.restart();
                    }
                }
            }
        }

        frames
    }

    /// Drop any partial frame and wait for the next flag.
    pub fn reset(&mut self) {
        self.body.clear();
        self.state = DecoderState::Hunting;
    }

    fn restart(&mut self) {
        self.body.clear();
        self.state = DecoderState::Body;
    }

    fn push(&mut self, byte: u8) {
        if self.body.len() >= self.max_body {
            debug!(max = self.max_body, "frame exceeds size limit; discarding");
            self.body.clear();
            self.state = DecoderState::Overflow;
            return;
        }
        self.body.put_u8(byte);
    }

    fn finish(&mut self) -> Option<Frame> {
        if self.body.is_empty() {
            return None;
        }
        if self.body.len() < MIN_BODY {
            trace!(len = self.body.len(), "dropping truncated frame");
            return None;
        }

        let mut body = self.body.split().freeze();
        let crc_bytes = body.split_off(body.len() - CRC_SIZE);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let valid = crc32fast::hash(&body) == expected;
        let address = body[0];
        let payload = body.slice(1..);

        Some(Frame {
            address,
            payload,
            valid,
        })
    }
}
