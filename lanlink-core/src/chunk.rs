//! Chunking: split a file into fixed-size chunks for sending, accumulate and
//! reassemble incoming chunks by index.

use std::collections::HashMap;
use std::net::IpAddr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::identity::TransferId;
use crate::protocol::Envelope;

/// Chunk size in bytes for the send path.
pub const CHUNK_SIZE: usize = 8192; // 8 KiB

/// Number of chunks a file of `file_size` bytes splits into.
pub fn total_chunks(file_size: u64, chunk_size: u64) -> u64 {
    file_size.div_ceil(chunk_size)
}

/// Build the `file_chunk` envelope for one chunk of an outbound transfer.
pub fn chunk_envelope(
    transfer_id: TransferId,
    filename: &str,
    file_size: u64,
    chunk_index: u64,
    total_chunks: u64,
    data: &[u8],
) -> Envelope {
    Envelope::FileChunk {
        transfer_id,
        chunk_data: BASE64.encode(data),
        chunk_index,
        total_chunks,
        file_size,
        filename: filename.to_string(),
    }
}

/// Decode the base64 payload of a received `file_chunk`.
pub fn decode_chunk_data(chunk_data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(chunk_data)
}

/// Receiver-side bookkeeping for one in-flight transfer. Created on the
/// first chunk of an unseen transfer ID, dropped once assembled or failed.
#[derive(Debug)]
pub struct TransferState {
    pub transfer_id: TransferId,
    pub filename: String,
    pub source_peer: IpAddr,
    pub file_size: u64,
    pub total_chunks: u64,
    chunks: HashMap<u64, Vec<u8>>,
}

impl TransferState {
    pub fn new(
        transfer_id: TransferId,
        filename: String,
        source_peer: IpAddr,
        file_size: u64,
        total_chunks: u64,
    ) -> Self {
        Self {
            transfer_id,
            filename,
            source_peer,
            file_size,
            total_chunks,
            chunks: HashMap::new(),
        }
    }

    /// Store a chunk at its index; a re-sent index overwrites harmlessly.
    /// Returns true once every index 0..total_chunks is present.
    pub fn store(&mut self, chunk_index: u64, data: Vec<u8>) -> bool {
        if chunk_index >= self.total_chunks {
            return self.is_complete();
        }
        self.chunks.insert(chunk_index, data);
        self.is_complete()
    }

    /// Complete iff one entry exists per index. Indices out of range are
    /// never stored, so the count check is sufficient.
    pub fn is_complete(&self) -> bool {
        self.chunks.len() as u64 == self.total_chunks
    }

    /// Concatenate chunks in ascending index order. Returns `None` while any
    /// index is missing, regardless of arrival order of the rest. Output is
    /// sized from the stored chunks; the advertised `file_size` is wire
    /// input and never drives an allocation.
    pub fn assemble(&self) -> Option<Vec<u8>> {
        let len: usize = self.chunks.values().map(Vec::len).sum();
        let mut out = Vec::with_capacity(len);
        for i in 0..self.total_chunks {
            out.extend_from_slice(self.chunks.get(&i)?);
        }
        Some(out)
    }
}
