//! In-process transport.
//!
//! `MemoryTransport` records every frame a call writes and lets the owner inject
//! inbound frames, either directly with [`MemoryTransport::deliver`] or by installing a
//! responder that reacts to writes. It also scripts failures: refused streams, failed
//! writes, held writes and a dead connection.

use crate::{CloseMode, InboundFrame, InboundHandler, OutboundFrame, StreamHandle, Transport, TransportError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use streamcall_core::RequestHead;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Reacts to a successful write by returning frames to deliver on the same stream.
pub type Responder = Arc<dyn Fn(StreamHandle, &OutboundFrame) -> Vec<InboundFrame> + Send + Sync>;

/// A frame accepted by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    /// Position among all write attempts on this transport, failed ones included.
    pub sequence: usize,
    pub stream: StreamHandle,
    pub frame: OutboundFrame,
}

struct StreamState {
    head: RequestHead,
    handler: Option<InboundHandler>,
    // Frames delivered before a handler was registered.
    backlog: Vec<InboundFrame>,
    closed: Option<CloseMode>,
}

struct MemoryInner {
    next_stream: AtomicU32,
    streams: DashMap<StreamHandle, StreamState>,
    writes: Mutex<Vec<RecordedWrite>>,
    write_attempts: AtomicUsize,
    failing_writes: DashMap<usize, TransportError>,
    refuse_next_open: Mutex<Option<TransportError>>,
    write_delay: Mutex<Option<Duration>>,
    write_gate: watch::Sender<bool>,
    responder: Mutex<Option<Responder>>,
    shut_down: AtomicBool,
}

#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("streams", &self.inner.streams.len())
            .field("write_attempts", &self.write_attempts())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (write_gate, _) = watch::channel(true);
        MemoryTransport {
            inner: Arc::new(MemoryInner {
                next_stream: AtomicU32::new(1),
                streams: DashMap::new(),
                writes: Mutex::new(Vec::new()),
                write_attempts: AtomicUsize::new(0),
                failing_writes: DashMap::new(),
                refuse_next_open: Mutex::new(None),
                write_delay: Mutex::new(None),
                write_gate,
                responder: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Make the next `open_stream` fail with `error`.
    pub fn refuse_next_open(&self, error: TransportError) {
        *lock(&self.inner.refuse_next_open) = Some(error);
    }

    /// Make the write attempt with the given sequence number fail.
    pub fn fail_write_at(&self, sequence: usize, error: TransportError) {
        self.inner.failing_writes.insert(sequence, error);
    }

    /// Delay every write by `delay` before it is accepted.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *lock(&self.inner.write_delay) = delay;
    }

    /// Block writes until [`release_writes`](Self::release_writes) is called.
    pub fn hold_writes(&self) {
        self.inner.write_gate.send_replace(false);
    }

    pub fn release_writes(&self) {
        self.inner.write_gate.send_replace(true);
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(StreamHandle, &OutboundFrame) -> Vec<InboundFrame> + Send + Sync + 'static,
    {
        *lock(&self.inner.responder) = Some(Arc::new(responder));
    }

    /// Kill the connection: new streams are refused and writes fail.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
    }

    /// Deliver `frame` to the stream's handler, or queue it until one is registered.
    pub fn deliver(&self, stream: StreamHandle, frame: InboundFrame) -> Result<(), TransportError> {
        let handler = {
            let mut state = self
                .inner
                .streams
                .get_mut(&stream)
                .ok_or(TransportError::UnknownStream(stream))?;
            match state.handler.clone() {
                Some(handler) => handler,
                None => {
                    trace!("Buffering inbound {} frame for {}", frame.kind(), stream);
                    state.backlog.push(frame);
                    return Ok(());
                }
            }
        };
        // The map guard is released before the handler runs so it may call back in.
        handler(frame);
        Ok(())
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        lock(&self.inner.writes).clone()
    }

    pub fn frames_for(&self, stream: StreamHandle) -> Vec<OutboundFrame> {
        lock(&self.inner.writes)
            .iter()
            .filter(|w| w.stream == stream)
            .map(|w| w.frame.clone())
            .collect()
    }

    pub fn write_attempts(&self) -> usize {
        self.inner.write_attempts.load(Ordering::SeqCst)
    }

    pub fn stream_head(&self, stream: StreamHandle) -> Option<RequestHead> {
        self.inner.streams.get(&stream).map(|s| s.head.clone())
    }

    pub fn close_mode(&self, stream: StreamHandle) -> Option<CloseMode> {
        self.inner.streams.get(&stream).and_then(|s| s.closed)
    }

    pub fn stream_handles(&self) -> Vec<StreamHandle> {
        let mut handles: Vec<_> = self.inner.streams.iter().map(|s| *s.key()).collect();
        handles.sort();
        handles
    }

    async fn wait_for_gate(&self) {
        let mut gate = self.inner.write_gate.subscribe();
        // An error means the sender is gone, which cannot happen while `self` lives.
        let _ = gate.wait_for(|open| *open).await;
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn open_stream(&self, head: &RequestHead) -> Result<StreamHandle, TransportError> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if let Some(error) = lock(&self.inner.refuse_next_open).take() {
            return Err(error);
        }

        let stream = StreamHandle::new(self.inner.next_stream.fetch_add(1, Ordering::SeqCst));
        self.inner.streams.insert(
            stream,
            StreamState {
                head: head.clone(),
                handler: None,
                backlog: Vec::new(),
                closed: None,
            },
        );
        debug!("Opened {} for {}", stream, head.path);
        Ok(stream)
    }

    fn register_inbound_handler(
        &self,
        stream: StreamHandle,
        handler: InboundHandler,
    ) -> Result<(), TransportError> {
        let backlog = {
            let mut state = self
                .inner
                .streams
                .get_mut(&stream)
                .ok_or(TransportError::UnknownStream(stream))?;
            state.handler = Some(handler.clone());
            std::mem::take(&mut state.backlog)
        };
        for frame in backlog {
            handler(frame);
        }
        Ok(())
    }

    async fn write(&self, stream: StreamHandle, frame: OutboundFrame) -> Result<(), TransportError> {
        self.wait_for_gate().await;
        let delay = *lock(&self.inner.write_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let sequence = self.inner.write_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some((_, error)) = self.inner.failing_writes.remove(&sequence) {
            debug!("Scripted failure of write #{} on {}", sequence, stream);
            return Err(error);
        }
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        match self.inner.streams.get(&stream) {
            None => return Err(TransportError::UnknownStream(stream)),
            Some(state) if state.closed.is_some() => {
                return Err(TransportError::StreamClosed(stream));
            }
            Some(_) => {}
        }

        trace!("Write #{} on {}: {}", sequence, stream, frame.kind());
        lock(&self.inner.writes).push(RecordedWrite {
            sequence,
            stream,
            frame: frame.clone(),
        });

        let responder = lock(&self.inner.responder).clone();
        if let Some(responder) = responder {
            for reply in responder(stream, &frame) {
                self.deliver(stream, reply)?;
            }
        }
        Ok(())
    }

    async fn close(&self, stream: StreamHandle, mode: CloseMode) -> Result<(), TransportError> {
        let mut state = self
            .inner
            .streams
            .get_mut(&stream)
            .ok_or(TransportError::UnknownStream(stream))?;
        if state.closed.is_none() {
            debug!("Closed {} ({:?})", stream, mode);
            state.closed = Some(mode);
            state.handler = None;
        }
        Ok(())
    }
}
