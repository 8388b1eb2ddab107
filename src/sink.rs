//! Downstream delivery with monotonic timestamp enforcement

use parking_lot::Mutex;

use crate::frame::{Frame, Timestamp};
use crate::output::FrameConsumer;

/// What happened to a frame handed to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Not newer than the last emitted frame
    Stale,
    /// The caller's precondition no longer held at delivery time
    Discarded,
    /// Passed the gate, but the consumer reported an error
    ConsumerFailed,
}

struct SinkState {
    last_emitted: Option<Timestamp>,
    consumer: Box<dyn FrameConsumer>,
}

pub struct OutputSink {
    state: Mutex<SinkState>,
}

impl OutputSink {
    pub fn new(consumer: Box<dyn FrameConsumer>) -> Self {
        Self {
            state: Mutex::new(SinkState {
                last_emitted: None,
                consumer,
            }),
        }
    }

    pub fn emit(&self, frame: Frame) -> Delivery {
        self.emit_if(frame, || true)
    }

    /// Deliver `frame` if it is newer than everything emitted so far and
    /// `still_valid` holds. The check and the delivery happen under one lock.
    pub fn emit_if(&self, frame: Frame, still_valid: impl FnOnce() -> bool) -> Delivery {
        let _span = tracing::debug_span!("emit", ts = frame.timestamp.as_nanos()).entered();

        let mut state = self.state.lock();
        if let Some(last) = state.last_emitted {
            if frame.timestamp <= last {
                tracing::trace!("dropping stale frame {} (last emitted {})", frame.timestamp, last);
                return Delivery::Stale;
            }
        }
        if !still_valid() {
            return Delivery::Discarded;
        }

        state.last_emitted = Some(frame.timestamp);
        let timestamp = frame.timestamp;
        match state.consumer.consume(frame) {
            Ok(()) => Delivery::Delivered,
            Err(e) => {
                tracing::warn!("consumer rejected frame {}: {:#}", timestamp, e);
                Delivery::ConsumerFailed
            }
        }
    }

    pub fn last_emitted(&self) -> Option<Timestamp> {
        self.state.lock().last_emitted
    }

    /// Wait until any delivery in progress has finished
    pub fn barrier(&self) {
        drop(self.state.lock());
    }
}
