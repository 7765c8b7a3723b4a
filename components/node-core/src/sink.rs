#![allow(async_fn_in_trait)]

//! Hand-off of completed batches to the transport side.

use embassy_sync::{
    blocking_mutex::raw::RawMutex,
    channel::{Sender, TrySendError},
};
use embedded_io_async::{Error as _, Write};

use crate::batch::AcquisitionBatch;

/// Large enough for a full batch of BME280 results with tags.
pub const JSON_BUFFER_SIZE: usize = 3072;

/// Consumer of one batch per acquisition cycle.
pub trait BatchSink {
    async fn deliver(&mut self, batch: AcquisitionBatch);
}

/// Queues the batch for another task without waiting. A full queue drops the batch.
impl<'ch, M: RawMutex, const N: usize> BatchSink for Sender<'ch, M, AcquisitionBatch, N> {
    async fn deliver(&mut self, batch: AcquisitionBatch) {
        if let Err(TrySendError::Full(batch)) = self.try_send(batch) {
            warn!("Sink> queue full, dropping batch from {}", batch.timestamp);
        }
    }
}

/// Writes every batch as one line of JSON.
pub struct JsonSink<W: Write, const N: usize = JSON_BUFFER_SIZE> {
    writer: W,
    buffer: [u8; N],
}

impl<W: Write, const N: usize> JsonSink<W, N> {
    pub fn new(writer: W) -> Self {
        Self { writer, buffer: [0u8; N] }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    async fn write_line(&mut self, len: usize) -> Result<(), W::Error> {
        self.writer.write_all(&self.buffer[..len]).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }
}

impl<W: Write, const N: usize> BatchSink for JsonSink<W, N> {
    async fn deliver(&mut self, batch: AcquisitionBatch) {
        let len = match serde_json_core::to_slice(&batch, &mut self.buffer) {
            Ok(len) => len,
            Err(_) => {
                error!("Sink> batch from {} does not fit into {} bytes", batch.timestamp, N);
                return;
            }
        };
        match self.write_line(len).await {
            Ok(()) => trace!("Sink> {} bytes written", len + 1),
            Err(e) => warn!("Sink> write failed: {:?}", e.kind()),
        }
    }
}
