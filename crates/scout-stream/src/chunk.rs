use std::pin::Pin;

use bytes::Bytes;
use futures::StreamExt as _;

use crate::cancel::CancelSignal;
use crate::errors::TransportError;

/// Byte chunks of an open streaming response body.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<Bytes, TransportError>> + Send + 'static>>;

/// Outcome of one read.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkRead {
    Chunk(Bytes),
    /// The transport reported natural end-of-stream.
    End,
    /// Cancellation was requested; not an error.
    Cancelled,
}

/// Pulls chunks from a byte stream until exhaustion or cancellation.
pub(crate) struct ChunkReader {
    stream: ByteStream,
    cancel: CancelSignal,
    chunks_read: u64,
    bytes_read: u64,
}

impl ChunkReader {
    pub fn new(stream: ByteStream, cancel: CancelSignal) -> Self {
        Self {
            stream,
            cancel,
            chunks_read: 0,
            bytes_read: 0,
        }
    }

    /// Waits for the next chunk. A chunk that arrives together with a
    /// cancellation request is discarded.
    pub async fn next_chunk(&mut self) -> Result<ChunkRead, TransportError> {
        if self.cancel.is_cancelled() {
            return Ok(ChunkRead::Cancelled);
        }
        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(ChunkRead::Cancelled),
            next = self.stream.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                self.chunks_read += 1;
                self.bytes_read += chunk.len() as u64;
                Ok(ChunkRead::Chunk(chunk))
            }
            Some(Err(err)) => Err(err),
            None => Ok(ChunkRead::End),
        }
    }

    pub fn chunks_read(&self) -> u64 {
        self.chunks_read
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}
