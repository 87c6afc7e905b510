use std::{collections::HashMap, sync::Mutex};

use uuid::Uuid;

use super::filtering::HierarchyFilter;

type Listener = Box<dyn Fn() + Send + Sync>;

/// An external "the data source changed" signal.  Listeners are identified by
/// the id `add_listener` hands out so they can be removed again.
#[derive(Default)]
pub struct DataChangedEvent {
    listeners: Mutex<HashMap<Uuid, Listener>>,
}

impl DataChangedEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&self, listener: F) -> Uuid
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.listeners
            .lock()
            .unwrap()
            .insert(id, Box::new(listener));
        id
    }

    pub fn remove_listener(&self, id: &Uuid) -> bool {
        self.listeners.lock().unwrap().remove(id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn raise(&self) {
        let listeners = self.listeners.lock().unwrap();
        trace!(listeners = listeners.len(), "data_changed");
        for listener in listeners.values() {
            listener();
        }
    }
}

/// Why previously returned nodes may be stale.
#[derive(Clone, Debug, PartialEq)]
pub enum HierarchyChange {
    /// The hierarchy filter was set or cleared.
    Filter(Option<HierarchyFilter>),
    Formatter,
    DataSource,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[test]
    fn test_listeners() {
        let event = DataChangedEvent::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = {
            let calls = calls.clone();
            event.add_listener(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert_eq!(event.listener_count(), 1);
        event.raise();
        event.raise();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(event.remove_listener(&id));
        assert!(!event.remove_listener(&id));
        event.raise();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(event.listener_count(), 0);
    }
}
