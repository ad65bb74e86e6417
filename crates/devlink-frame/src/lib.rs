//! Flag-delimited frame codec with address multiplexing.
//!
//! Every frame on a device link is:
//! - delimited by a `0x7E` flag byte on both sides
//! - tagged with a one-byte address selecting the logical channel
//! - protected by a trailing CRC-32 over address and payload
//!
//! Flag and escape bytes inside a frame are escaped, so the decoder can
//! resynchronize on the next flag after any corruption.

pub mod address;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use address::{address_name, is_reserved, LOG, RPC};
pub use codec::{
    encode_frame, Frame, FrameConfig, FrameDecoder, DEFAULT_MAX_PAYLOAD, ESCAPE, FLAG,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
