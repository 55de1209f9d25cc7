//! Event replay (v0.1)
//!
//! Reconstructs what a live push-protocol consumer would have produced from
//! a previously captured, ordered event sequence. The consumer attaches to a
//! synthetic [`EventSource`] exactly as it would attach to a live engine;
//! replay then walks the sequence once, firing the "any event" channel first
//! and the variant-specific channel second for every record.

use std::collections::HashMap;
use std::sync::Arc;

use crate::event::{BuildContext, Event, EventTag};

type Handler = Box<dyn FnMut(&Event)>;

/// Synthetic event source: one subscription channel per event tag, plus an
/// "any event" channel that observes every record before its tag channel.
#[derive(Default)]
pub struct EventSource {
    any: Vec<Handler>,
    channels: HashMap<EventTag, Vec<Handler>>,
}

impl EventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every record, regardless of tag
    pub fn subscribe_any(&mut self, handler: impl FnMut(&Event) + 'static) {
        self.any.push(Box::new(handler));
    }

    /// Subscribe to records of one tag
    pub fn subscribe(&mut self, tag: EventTag, handler: impl FnMut(&Event) + 'static) {
        self.channels.entry(tag).or_default().push(Box::new(handler));
    }

    /// Any-channel first, then exactly one tag channel
    fn dispatch(&mut self, event: &Event) {
        for handler in &mut self.any {
            handler(event);
        }
        if let Some(handlers) = self.channels.get_mut(&event.tag()) {
            for handler in handlers {
                handler(event);
            }
        }
    }
}

/// A consumer that only understands the live "subscribe and receive" push
/// protocol. `attach` registers its channels; `shutdown` flushes buffered
/// output after the last record.
pub trait EventConsumer {
    fn attach(&self, source: &mut EventSource);
    fn shutdown(&self);
}

/// Replay a captured sequence through a consumer.
///
/// Read-only over the records and deterministic: order is the sequence's
/// insertion order, never emission wall-clock time. Records without a
/// correlation context are dispatched with [`BuildContext::NONE`] so
/// consumers may assume a context is always present.
pub fn replay(records: &[Arc<Event>], consumer: &dyn EventConsumer) {
    let mut source = EventSource::new();
    consumer.attach(&mut source);

    for record in records {
        if record.context.is_none() {
            let mut record = Event::clone(record);
            record.context = Some(BuildContext::NONE);
            source.dispatch(&record);
        } else {
            source.dispatch(record);
        }
    }

    consumer.shutdown();
}
