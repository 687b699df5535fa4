//! Registry of live stream readers.
//!
//! Both directions of every tracked TCP flow register here; the shutdown
//! flush drains the registry into the finalizer pool. Readers that were
//! already persisted when their connection closed carry the `saved` flag
//! and are skipped by the pool workers.

use std::sync::Arc;

use parking_lot::Mutex;

use super::reader::StreamReader;

#[derive(Default)]
pub struct StreamRegistry {
    readers: Mutex<Vec<Arc<StreamReader>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, reader: Arc<StreamReader>) {
        self.readers.lock().push(reader);
    }

    /// Number of registered readers.
    pub fn len(&self) -> usize {
        self.readers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.lock().is_empty()
    }

    /// Number of registered readers not yet persisted.
    pub fn num_unsaved(&self) -> usize {
        self.readers.lock().iter().filter(|r| !r.saved()).count()
    }

    /// Take every registered reader, leaving the registry empty.
    pub fn drain(&self) -> Vec<Arc<StreamReader>> {
        std::mem::take(&mut *self.readers.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::reader::{Conversation, TransportEndpoints};

    fn reader(saved: bool) -> Arc<StreamReader> {
        let endpoints = TransportEndpoints {
            src_ip: "10.0.0.1".parse().unwrap(),
            src_port: 1,
            dst_ip: "10.0.0.2".parse().unwrap(),
            dst_port: 2,
        };
        let r = Arc::new(StreamReader::new(true, endpoints, Conversation::new()));
        if saved {
            r.mark_saved();
        }
        r
    }

    #[test]
    fn test_register_and_drain() {
        let registry = StreamRegistry::new();
        registry.register(reader(false));
        registry.register(reader(true));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.num_unsaved(), 1);

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }
}
