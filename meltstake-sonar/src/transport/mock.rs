//! Mock transport for testing and simulation

use super::Transport;
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Produces the device's reply to one written command (`None` = stay silent)
pub type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// Mock transport for unit testing
///
/// Clones share state, so a test can keep a handle while the driver owns
/// another. Replies come from pre-injected bytes and, if set, a responder
/// invoked once per `write`.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
    writes: usize,
    responder: Option<Responder>,
    response_delay: Duration,
    ready_at: Instant,
    closed: bool,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                read_buffer: VecDeque::new(),
                write_buffer: Vec::new(),
                writes: 0,
                responder: None,
                response_delay: Duration::ZERO,
                ready_at: Instant::now(),
                closed: false,
            })),
        }
    }

    /// Create a mock that answers every write through `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        let mock = Self::new();
        mock.inner.lock().responder = Some(Box::new(responder));
        mock
    }

    /// Hold back responder replies for `delay` after each write
    pub fn set_response_delay(&self, delay: Duration) {
        self.inner.lock().response_delay = delay;
    }

    /// Inject data to be read
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_buffer.extend(data);
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        self.inner.lock().write_buffer.clone()
    }

    /// Number of `write` calls seen
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if Instant::now() < inner.ready_at {
            return Ok(0);
        }
        let available = inner.read_buffer.len().min(buffer.len());

        for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..available)) {
            *slot = byte;
        }

        Ok(available)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        inner.write_buffer.extend_from_slice(data);
        inner.writes += 1;

        let reply = inner.responder.as_mut().and_then(|respond| respond(data));
        if let Some(reply) = reply {
            inner.ready_at = Instant::now() + inner.response_delay;
            inner.read_buffer.extend(reply);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.inner.lock().read_buffer.clear();
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.inner.lock().read_buffer.len())
    }

    fn close(&mut self) -> Result<()> {
        self.inner.lock().closed = true;
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}
