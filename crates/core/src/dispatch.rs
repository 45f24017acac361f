use tokio::sync::{mpsc, oneshot};
use tracing::warn;

pub type OwnerTask = Box<dyn FnOnce() + Send + 'static>;

pub trait OwnerDispatcher: Send + Sync {
    fn run_on_owner(&self, task: OwnerTask);
}

impl<F> OwnerDispatcher for F
where
    F: Fn(OwnerTask) + Send + Sync,
{
    fn run_on_owner(&self, task: OwnerTask) {
        self(task)
    }
}

impl dyn OwnerDispatcher {
    pub async fn run_on_owner_async(&self, task: OwnerTask) {
        let (done_tx, done_rx) = oneshot::channel();
        self.run_on_owner(Box::new(move || {
            task();
            let _ = done_tx.send(());
        }));
        if done_rx.await.is_err() {
            warn!("オーナースレッドがタスクを実行せずに破棄しました");
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl OwnerDispatcher for InlineDispatcher {
    fn run_on_owner(&self, task: OwnerTask) {
        task();
    }
}

#[derive(Clone)]
pub struct QueueDispatcher {
    tx: mpsc::UnboundedSender<OwnerTask>,
}

impl OwnerDispatcher for QueueDispatcher {
    fn run_on_owner(&self, task: OwnerTask) {
        if self.tx.send(task).is_err() {
            warn!("オーナーキューが閉じられています");
        }
    }
}

pub struct OwnerQueue {
    rx: mpsc::UnboundedReceiver<OwnerTask>,
}

impl OwnerQueue {
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0usize;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }
}

pub fn owner_queue() -> (QueueDispatcher, OwnerQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueDispatcher { tx }, OwnerQueue { rx })
}
