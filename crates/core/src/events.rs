use std::path::PathBuf;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkingSetEvent {
    Appended { start: usize, count: usize },
    Removed { index: usize, path: PathBuf },
    Cleared,
    NewName {
        index: usize,
        path: PathBuf,
        new_name: String,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WorkingSetEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkingSetEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: WorkingSetEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
