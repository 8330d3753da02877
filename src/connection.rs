//! Connection lifecycle for the producer's shared memory
//!
//! A [`Connection`] is either disconnected or holds exactly one mapped
//! segment. Reconnecting always releases the previous segment first.

use crate::layout::Signature;
use crate::source::{Segment, SegmentSource};
use tracing::{debug, trace};

/// Owns at most one mapped segment of the producer's shared memory
pub struct Connection<S: SegmentSource> {
    source: S,
    segment: Option<S::Segment>,
}

impl<S: SegmentSource> Connection<S> {
    /// Create a disconnected connection
    pub fn new(source: S) -> Self {
        Self { source, segment: None }
    }

    /// Map the segment, replacing any existing mapping.
    ///
    /// Failure leaves the connection disconnected and is only logged; callers
    /// detect it through [`Connection::is_connected`].
    pub fn connect(&mut self) {
        self.disconnect();

        match self.source.open() {
            Ok(segment) => {
                debug!(region_len = segment.bytes().len(), "Mapped hardware monitoring shared memory");
                self.segment = Some(segment);
            }
            Err(e) => {
                debug!("Hardware monitoring shared memory unavailable: {}", e);
            }
        }
    }

    /// Release the mapping if held. No-op when already disconnected.
    pub fn disconnect(&mut self) {
        if let Some(segment) = self.segment.take() {
            drop(segment);
            debug!("Released hardware monitoring shared memory");
        } else {
            trace!("Disconnect with no mapping held");
        }
    }

    /// Whether a segment is currently mapped
    pub fn is_connected(&self) -> bool {
        self.segment.is_some()
    }

    /// Current signature state, `None` when disconnected
    pub fn signature(&self) -> Option<Signature> {
        self.segment.as_ref().map(|segment| Signature::peek(segment.bytes()))
    }

    /// The mapped region, `None` when disconnected
    pub fn region(&self) -> Option<&[u8]> {
        self.segment.as_ref().map(|segment| segment.bytes())
    }
}
