//! Buffered stream reader for sequential handshakes
//!
//! A [`ByteStreamReader`] decouples socket reads from protocol steps. Raw
//! chunks are appended with [`ByteStreamReader::push_chunk`] as they arrive,
//! while the handshake issues ordered reads (`read_exact`, `read_u32_be`, ...)
//! that suspend until enough bytes are buffered or the stream ends.
//!
//! Pending reads are served strictly in the order they were issued. A read is
//! only satisfied once every read queued ahead of it has been satisfied, so
//! the bytes a handshake consumes always match its step order regardless of
//! how the peer's data was fragmented on the wire.
//!
//! [`drive`] ties a reader to an actual socket: it pumps chunks from the
//! socket into the reader while a handshake step runs, and stops pumping the
//! moment that step returns so the socket can be handed to the next phase.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;

use crate::error::ProtocolError;

/// Size of the scratch buffer used when pumping a socket into a reader
const READ_CHUNK_SIZE: usize = 8192;

/// A read waiting for more bytes
struct PendingRead {
    /// Number of bytes this read needs
    wanted: usize,
    /// Where to deliver the bytes (or the end-of-stream failure)
    reply: oneshot::Sender<Result<Bytes, ProtocolError>>,
}

#[derive(Default)]
struct ReaderState {
    /// Unread bytes. Consumed bytes are split off the front, so the read
    /// cursor is always at offset zero.
    buffer: BytesMut,
    /// Reads waiting for data, oldest first
    pending: VecDeque<PendingRead>,
    /// Set once no more data will arrive, with the reason if one was given
    ended: Option<Option<String>>,
}

impl ReaderState {
    /// Hand buffered bytes to queued reads, front to back, until the front
    /// read wants more than is available.
    fn satisfy_pending(&mut self) {
        loop {
            // Reads whose caller gave up no longer hold their place in line
            while self.pending.front().is_some_and(|p| p.reply.is_closed()) {
                self.pending.pop_front();
            }

            let ready = self
                .pending
                .front()
                .is_some_and(|p| p.wanted <= self.buffer.len());
            if !ready {
                break;
            }
            let Some(read) = self.pending.pop_front() else {
                break;
            };

            let data = self.buffer.split_to(read.wanted).freeze();
            if let Err(Ok(data)) = read.reply.send(Ok(data)) {
                // Receiver went away between the check and the send
                self.restore_front(&data);
            }
        }
    }

    /// Fail every queued read with the end-of-stream reason
    fn fail_pending(&mut self) {
        let reason = self.ended.clone().flatten();
        for read in self.pending.drain(..) {
            let _ = read.reply.send(Err(ProtocolError::StreamEnded(reason.clone())));
        }
    }

    /// Put bytes back in front of the unread buffer
    fn restore_front(&mut self, data: &[u8]) {
        let mut restored = BytesMut::with_capacity(data.len() + self.buffer.len());
        restored.extend_from_slice(data);
        restored.extend_from_slice(&self.buffer);
        self.buffer = restored;
    }
}

/// Ordered, suspending reader over an inbound byte stream
///
/// All methods take `&self`; the reader is shared between the task pumping
/// the socket and the handshake step consuming it.
#[derive(Default)]
pub struct ByteStreamReader {
    state: Mutex<ReaderState>,
}

impl ByteStreamReader {
    /// Create an empty reader
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a chunk of inbound data and wake any read it completes
    ///
    /// Chunks pushed after [`finish`](Self::finish) or [`end`](Self::end)
    /// are discarded.
    pub fn push_chunk(&self, chunk: &[u8]) {
        let mut state = self.state();
        if state.ended.is_some() {
            tracing::trace!("Dropping {} bytes pushed after end of stream", chunk.len());
            return;
        }
        state.buffer.extend_from_slice(chunk);
        state.satisfy_pending();
    }

    /// Record that the peer will send nothing more
    ///
    /// Bytes already buffered stay readable: queued reads are served from
    /// them in order, and only the reads the buffer cannot cover fail with
    /// [`ProtocolError::StreamEnded`]. Later reads succeed while buffered
    /// bytes last.
    pub fn finish(&self, reason: Option<String>) {
        let mut state = self.state();
        if state.ended.is_none() {
            state.ended = Some(reason);
        }
        state.satisfy_pending();
        state.fail_pending();
    }

    /// Tear the stream down
    ///
    /// Every pending read fails with [`ProtocolError::StreamEnded`], buffered
    /// data is discarded, and every later read fails immediately. Ending an
    /// already ended stream keeps the first reason.
    pub fn end(&self, reason: Option<String>) {
        let mut state = self.state();
        if state.ended.is_none() {
            state.ended = Some(reason);
        }
        state.fail_pending();
        state.buffer.clear();
    }

    /// Clear the buffer, optionally keeping bytes that arrived but were not
    /// consumed yet
    pub fn reset(&self, keep_unread: bool) {
        let mut state = self.state();
        if !keep_unread {
            state.buffer.clear();
        }
    }

    /// Take every buffered byte that no read has consumed
    pub fn drain_unread(&self) -> Bytes {
        self.state().buffer.split().freeze()
    }

    /// Number of buffered, unconsumed bytes
    pub fn available(&self) -> usize {
        self.state().buffer.len()
    }

    /// Number of reads currently waiting for data
    pub fn pending_reads(&self) -> usize {
        self.state().pending.len()
    }

    /// Whether the stream has finished or been ended
    pub fn is_ended(&self) -> bool {
        self.state().ended.is_some()
    }

    /// Read exactly `n` bytes, waiting until they are available
    pub async fn read_exact(&self, n: usize) -> Result<Bytes, ProtocolError> {
        let reply = {
            let mut state = self.state();
            state.pending.retain(|p| !p.reply.is_closed());
            if state.pending.is_empty() && state.buffer.len() >= n {
                return Ok(state.buffer.split_to(n).freeze());
            }
            if let Some(reason) = &state.ended {
                return Err(ProtocolError::StreamEnded(reason.clone()));
            }

            let (tx, rx) = oneshot::channel();
            state.pending.push_back(PendingRead {
                wanted: n,
                reply: tx,
            });
            rx
        };

        match reply.await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::StreamEnded(None)),
        }
    }

    /// Read `n` bytes and decode them as UTF-8
    pub async fn read_string(&self, n: usize, field: &'static str) -> Result<String, ProtocolError> {
        let data = self.read_exact(n).await?;
        String::from_utf8(data.to_vec()).map_err(|_| ProtocolError::InvalidText(field))
    }

    /// Read an unsigned byte
    pub async fn read_u8(&self) -> Result<u8, ProtocolError> {
        let mut data = self.read_exact(1).await?;
        Ok(data.get_u8())
    }

    /// Read a signed byte
    pub async fn read_i8(&self) -> Result<i8, ProtocolError> {
        let mut data = self.read_exact(1).await?;
        Ok(data.get_i8())
    }

    /// Read a big-endian u16
    pub async fn read_u16_be(&self) -> Result<u16, ProtocolError> {
        let mut data = self.read_exact(2).await?;
        Ok(data.get_u16())
    }

    /// Read a little-endian u16
    pub async fn read_u16_le(&self) -> Result<u16, ProtocolError> {
        let mut data = self.read_exact(2).await?;
        Ok(data.get_u16_le())
    }

    /// Read a big-endian u32
    pub async fn read_u32_be(&self) -> Result<u32, ProtocolError> {
        let mut data = self.read_exact(4).await?;
        Ok(data.get_u32())
    }

    /// Read a little-endian u32
    pub async fn read_u32_le(&self) -> Result<u32, ProtocolError> {
        let mut data = self.read_exact(4).await?;
        Ok(data.get_u32_le())
    }

    /// Read a big-endian i32
    pub async fn read_i32_be(&self) -> Result<i32, ProtocolError> {
        let mut data = self.read_exact(4).await?;
        Ok(data.get_i32())
    }

    /// Read a little-endian i32
    pub async fn read_i32_le(&self) -> Result<i32, ProtocolError> {
        let mut data = self.read_exact(4).await?;
        Ok(data.get_i32_le())
    }
}

/// Run `step` while pumping `source` into `reader`
///
/// Socket reads are pushed into the reader as they arrive. End of file or a
/// read error finishes the reader: bytes that arrived first are still
/// delivered, and only reads they cannot cover fail. Pumping stops as soon as `step` completes, leaving any bytes not yet
/// read in the socket and any bytes read but not consumed in the reader.
pub async fn drive<R, F, T>(source: &mut R, reader: &ByteStreamReader, step: F) -> T
where
    R: AsyncRead + Unpin,
    F: Future<Output = T>,
{
    let pump = async {
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match source.read(&mut chunk).await {
                Ok(0) => {
                    reader.finish(Some("peer closed the connection".to_string()));
                    break;
                }
                Ok(n) => reader.push_chunk(&chunk[..n]),
                Err(e) => {
                    reader.finish(Some(e.to_string()));
                    break;
                }
            }
        }
        // Only the step decides when the phase is over
        std::future::pending::<T>().await
    };

    tokio::select! {
        biased;
        out = step => out,
        out = pump => out,
    }
}
