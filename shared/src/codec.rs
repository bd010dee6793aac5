//! Length-prefixed framing over a byte stream.
//!
//! [`try_extract_packet`] is stateless: it looks at the front of a caller-owned
//! buffer and either reports that more bytes are needed, returns the next frame,
//! or flags a framing violation. [`ReassemblyBuffer`] is the per-connection
//! owner of those bytes.

use crate::packet::{Packet, PacketHeader, PacketType, HEADER_SIZE, MAX_PACKET_SIZE};
use thiserror::Error;

/// Capacity of one connection's reassembly buffer.
pub const REASSEMBLY_CAPACITY: usize = MAX_PACKET_SIZE * 4;

/// Number of leading bytes included in framing-violation diagnostics.
const PREVIEW_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("declared packet size {size} is smaller than the header (leading bytes: {preview})")]
    HeaderTooSmall { size: usize, preview: String },

    #[error("declared packet size {size} exceeds the maximum packet size (leading bytes: {preview})")]
    PacketTooLarge { size: usize, preview: String },

    #[error("reassembly buffer overflow: {buffered} buffered + {incoming} incoming > {capacity}")]
    BufferOverflow {
        buffered: usize,
        incoming: usize,
        capacity: usize,
    },

    #[error("unknown packet type {0}")]
    UnknownType(u16),

    #[error("{packet_type:?} frame must be {expected} bytes, got {actual}")]
    SizeMismatch {
        packet_type: Option<PacketType>,
        expected: usize,
        actual: usize,
    },

    #[error("malformed payload: {0}")]
    Malformed(#[from] bincode::Error),
}

impl ProtocolError {
    /// True for violations after which byte offsets can no longer be trusted,
    /// so everything buffered must be discarded.
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            ProtocolError::HeaderTooSmall { .. }
                | ProtocolError::PacketTooLarge { .. }
                | ProtocolError::BufferOverflow { .. }
        )
    }
}

/// A complete frame lifted off the front of a buffer.
#[derive(Debug)]
pub struct Extracted {
    /// Bytes the frame occupied; always equal to its header's `size`.
    pub consumed: usize,
    /// Decode result. An error here is local to this frame.
    pub packet: Result<Packet, ProtocolError>,
}

/// Returns the next complete frame at the front of `buffer`.
///
/// `Ok(None)` means fewer than a header's worth of bytes, or fewer than the
/// header declares. `Err` means the header's declared size is outside
/// `[HEADER_SIZE, MAX_PACKET_SIZE]`; the caller must discard the buffer.
pub fn try_extract_packet(buffer: &[u8]) -> Result<Option<Extracted>, ProtocolError> {
    let Some(header) = PacketHeader::parse(buffer) else {
        return Ok(None);
    };

    let size = header.size as usize;
    if size < HEADER_SIZE {
        return Err(ProtocolError::HeaderTooSmall {
            size,
            preview: hex_preview(buffer),
        });
    }
    if size > MAX_PACKET_SIZE {
        return Err(ProtocolError::PacketTooLarge {
            size,
            preview: hex_preview(buffer),
        });
    }
    if buffer.len() < size {
        return Ok(None);
    }

    Ok(Some(Extracted {
        consumed: size,
        packet: Packet::decode(&buffer[..size]),
    }))
}

/// Space-separated hex of the first few bytes, for logs.
pub fn hex_preview(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(PREVIEW_LEN)
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Bounded FIFO of received bytes for one connection.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::with_capacity(REASSEMBLY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends a received chunk. If it would not fit, the buffer is cleared,
    /// the chunk is dropped, and `BufferOverflow` is returned.
    pub fn extend(&mut self, chunk: &[u8]) -> Result<(), ProtocolError> {
        if self.data.len() + chunk.len() > self.capacity {
            let buffered = self.data.len();
            self.data.clear();
            return Err(ProtocolError::BufferOverflow {
                buffered,
                incoming: chunk.len(),
                capacity: self.capacity,
            });
        }
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    /// Extracts every complete frame currently buffered, in arrival order.
    ///
    /// Frame-local decode failures appear in place and extraction continues.
    /// A framing violation clears the whole buffer and ends the list with the
    /// violating error.
    pub fn drain_packets(&mut self) -> Vec<Result<Packet, ProtocolError>> {
        let mut packets = Vec::new();
        let mut offset = 0;

        loop {
            match try_extract_packet(&self.data[offset..]) {
                Ok(Some(extracted)) => {
                    offset += extracted.consumed;
                    packets.push(extracted.packet);
                }
                Ok(None) => break,
                Err(e) => {
                    self.data.clear();
                    packets.push(Err(e));
                    return packets;
                }
            }
        }

        self.data.drain(..offset);
        packets
    }
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new()
    }
}
