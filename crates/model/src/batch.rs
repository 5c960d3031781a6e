//! Batch - the unit of event intake
//!
//! A batch is an ordered collection of events handed to the indexer in one
//! call. The pipeline gives no ordering guarantee across events once they
//! are enqueued; a batch is an intake convenience, not a delivery unit.

use crate::event::Event;

/// An ordered collection of events.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    events: Vec<Event>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Append an event.
    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Number of events in the batch.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the batch holds no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The events, in intake order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

impl From<Vec<Event>> for Batch {
    fn from(events: Vec<Event>) -> Self {
        Self { events }
    }
}

impl FromIterator<Event> for Batch {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        Self {
            events: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::event::DataStream;

    #[test]
    fn test_batch_push_and_len() {
        let mut batch = Batch::new();
        assert!(batch.is_empty());

        batch.push(Event::new(Utc::now(), DataStream::new("logs", "a", "b")));
        batch.push(Event::new(Utc::now(), DataStream::new("logs", "a", "b")));

        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_batch_from_vec() {
        let events = vec![Event::new(Utc::now(), DataStream::new("logs", "a", "b"))];
        let batch = Batch::from(events);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.events()[0].data_stream.stream_type, "logs");
    }
}
