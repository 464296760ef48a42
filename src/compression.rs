//! Compressing object sink
//!
//! Wraps an `ObjectWriter` so every byte written is zstd-compressed before it
//! reaches the object. Compressed blocks are forwarded as soon as the encoder
//! emits them, so memory use stays bounded by the encoder's window rather
//! than by file size.
//!
//! ## Teardown order
//!
//! ```text
//! close():   encoder.finish() → write epilogue → sink.commit()
//! abandon(): encoder.finish() → sink.abort()
//! ```
//!
//! The encoder holds buffered input and the frame epilogue; committing the
//! sink before `finish()` stores a truncated frame. Both exit paths therefore
//! consume the whole adapter and tear it down in one fixed order.

use crate::storage::{ObjectMeta, ObjectWriter};
use std::io::{Result as IoResult, Write};
use tracing::warn;
use zstd::stream::write::Encoder;

/// Default zstd compression level
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Result of a successful `close`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedObject {
    pub meta: ObjectMeta,
    /// Uncompressed bytes accepted
    pub bytes_in: u64,
    /// Compressed bytes forwarded to the sink
    pub bytes_out: u64,
}

/// Sink adapter that zstd-compresses before forwarding
pub struct CompressingSink {
    encoder: Encoder<'static, Vec<u8>>,
    sink: Box<dyn ObjectWriter>,
    bytes_in: u64,
    bytes_out: u64,
}

impl CompressingSink {
    /// Wrap `sink`. On failure the sink is aborted before returning.
    pub async fn wrap(sink: Box<dyn ObjectWriter>, level: i32) -> IoResult<Self> {
        let encoder = match Encoder::new(Vec::new(), level).and_then(|mut e| {
            e.include_checksum(true)?;
            Ok(e)
        }) {
            Ok(encoder) => encoder,
            Err(e) => {
                if let Err(abort_err) = sink.abort().await {
                    warn!(error = %abort_err, "Failed to abort object after encoder setup failure");
                }
                return Err(e);
            }
        };

        Ok(CompressingSink {
            encoder,
            sink,
            bytes_in: 0,
            bytes_out: 0,
        })
    }

    /// Compress `chunk` and forward whatever the encoder has emitted
    pub async fn write_all(&mut self, chunk: &[u8]) -> IoResult<()> {
        self.encoder.write_all(chunk)?;
        self.bytes_in += chunk.len() as u64;
        self.forward_pending().await
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    async fn forward_pending(&mut self) -> IoResult<()> {
        let pending = self.encoder.get_mut();
        if pending.is_empty() {
            return Ok(());
        }
        let block = std::mem::take(pending);
        self.sink.write(&block).await?;
        self.bytes_out += block.len() as u64;
        Ok(())
    }

    /// Finish the frame, then commit the sink
    pub async fn close(self) -> IoResult<CompressedObject> {
        let CompressingSink {
            encoder,
            mut sink,
            bytes_in,
            mut bytes_out,
        } = self;

        let epilogue = match encoder.finish() {
            Ok(rest) => rest,
            Err(e) => {
                abort_sink(sink).await;
                return Err(e);
            }
        };

        if !epilogue.is_empty() {
            if let Err(e) = sink.write(&epilogue).await {
                abort_sink(sink).await;
                return Err(e);
            }
            bytes_out += epilogue.len() as u64;
        }

        let meta = sink.commit().await?;
        Ok(CompressedObject {
            meta,
            bytes_in,
            bytes_out,
        })
    }

    /// Failure path: close the encoder, then abort the sink
    pub async fn abandon(self) {
        let CompressingSink { encoder, sink, .. } = self;
        // The unfinished frame is discarded along with the object
        let _ = encoder.finish();
        abort_sink(sink).await;
    }
}

async fn abort_sink(sink: Box<dyn ObjectWriter>) {
    if let Err(e) = sink.abort().await {
        warn!(error = %e, "Failed to abort object upload");
    }
}
