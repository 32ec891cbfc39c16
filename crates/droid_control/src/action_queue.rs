//! Ordered asynchronous action execution
//!
//! An [`ActionQueue`] owns one worker task that runs posted items strictly in
//! post order. Callers get an [`ActionId`] back immediately and can poll
//! [`ActionQueue::status`] or await [`ActionQueue::wait`].
//!
//! Only the most recent finished statuses are retained; older finished ids
//! read as [`ActionStatus::Invalid`]. Pending and running ids are never dropped.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

/// Identifier of a posted action, unique for the life of the process
pub type ActionId = i64;

/// Ids are shared by every queue so they never collide across controllers
static NEXT_ID: AtomicI64 = AtomicI64::new(1);

/// Finished statuses kept per queue by default
pub const DEFAULT_STATUS_HISTORY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionStatus {
    Pending,
    Running,
    Success,
    Failed,
    /// The id was never issued by this queue, or has aged out of its history
    Invalid,
}

impl ActionStatus {
    pub fn is_done(self) -> bool {
        matches!(
            self,
            ActionStatus::Success | ActionStatus::Failed | ActionStatus::Invalid
        )
    }
}

/// Processing function run by the worker for every item
pub type Processor<T> = Arc<dyn Fn(ActionId, T) -> BoxFuture<'static, bool> + Send + Sync>;

/// Statuses by id, with finished ids remembered in completion order
struct StatusTable {
    statuses: HashMap<ActionId, ActionStatus>,
    finished: VecDeque<ActionId>,
    history_limit: usize,
}

impl StatusTable {
    fn new(history_limit: usize) -> Self {
        Self {
            statuses: HashMap::new(),
            finished: VecDeque::new(),
            history_limit: history_limit.max(1),
        }
    }

    fn get(&self, id: ActionId) -> ActionStatus {
        self.statuses
            .get(&id)
            .copied()
            .unwrap_or(ActionStatus::Invalid)
    }

    fn set(&mut self, id: ActionId, status: ActionStatus) {
        let previous = self.statuses.insert(id, status);
        if status.is_done() && !previous.is_some_and(ActionStatus::is_done) {
            self.finished.push_back(id);
            while self.finished.len() > self.history_limit {
                if let Some(oldest) = self.finished.pop_front() {
                    self.statuses.remove(&oldest);
                }
            }
        }
    }

    fn fail_pending(&mut self) -> usize {
        let pending: Vec<ActionId> = self
            .statuses
            .iter()
            .filter(|(_, status)| **status == ActionStatus::Pending)
            .map(|(id, _)| *id)
            .collect();
        for id in &pending {
            self.set(*id, ActionStatus::Failed);
        }
        pending.len()
    }

    fn len(&self) -> usize {
        self.statuses.len()
    }
}

struct Shared {
    statuses: Mutex<StatusTable>,
    running: AtomicBool,
    released: AtomicBool,
    completed: watch::Sender<u64>,
}

impl Shared {
    fn statuses(&self) -> MutexGuard<'_, StatusTable> {
        self.statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_status(&self, id: ActionId, status: ActionStatus) {
        self.statuses().set(id, status);
        if status.is_done() {
            self.completed.send_modify(|generation| *generation += 1);
        }
    }
}

/// FIFO queue with a single worker task
pub struct ActionQueue<T: Send + 'static> {
    shared: Arc<Shared>,
    sender: Mutex<Option<mpsc::UnboundedSender<(ActionId, T)>>>,
}

impl<T: Send + 'static> ActionQueue<T> {
    /// Start the worker on the current tokio runtime
    pub fn new<F>(process: F) -> Self
    where
        F: Fn(ActionId, T) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        Self::with_history_limit(DEFAULT_STATUS_HISTORY, process)
    }

    /// Like [`ActionQueue::new`], keeping at most `limit` finished statuses
    pub fn with_history_limit<F>(limit: usize, process: F) -> Self
    where
        F: Fn(ActionId, T) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        let (completed, _) = watch::channel(0u64);
        let shared = Arc::new(Shared {
            statuses: Mutex::new(StatusTable::new(limit)),
            running: AtomicBool::new(false),
            released: AtomicBool::new(false),
            completed,
        });
        let (sender, receiver) = mpsc::unbounded_channel();

        tokio::spawn(run_worker(shared.clone(), receiver, Arc::new(process)));

        Self {
            shared,
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Enqueue an item; never blocks
    pub fn post(&self, item: T) -> ActionId {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        match sender.as_ref() {
            Some(tx) => {
                self.shared.set_status(id, ActionStatus::Pending);
                if tx.send((id, item)).is_err() {
                    error!("action worker is gone, id: {}", id);
                    self.shared.set_status(id, ActionStatus::Failed);
                }
            }
            None => {
                warn!("post after release, id: {}", id);
                self.shared.set_status(id, ActionStatus::Failed);
            }
        }
        id
    }

    pub fn status(&self, id: ActionId) -> ActionStatus {
        self.shared.statuses().get(id)
    }

    /// Wait until the action reaches a terminal status
    pub async fn wait(&self, id: ActionId) -> ActionStatus {
        let mut completed = self.shared.completed.subscribe();
        loop {
            let status = self.status(id);
            if status.is_done() {
                return status;
            }
            if completed.changed().await.is_err() {
                return self.status(id);
            }
        }
    }

    pub async fn post_and_wait(&self, item: T) -> ActionStatus {
        let id = self.post(item);
        self.wait(id).await
    }

    /// Whether the worker is currently executing an action
    pub fn running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Stop accepting work and fail everything still pending.
    ///
    /// An action already running finishes normally. Safe to call repeatedly.
    pub fn release(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if sender.is_none() {
            return;
        }
        self.shared.released.store(true, Ordering::SeqCst);

        let failed = self.shared.statuses().fail_pending();
        self.shared.completed.send_modify(|generation| *generation += 1);
        debug!("action queue released, pending failed: {}", failed);
    }
}

impl<T: Send + 'static> Drop for ActionQueue<T> {
    fn drop(&mut self) {
        self.release();
    }
}

async fn run_worker<T: Send + 'static>(
    shared: Arc<Shared>,
    mut receiver: mpsc::UnboundedReceiver<(ActionId, T)>,
    process: Processor<T>,
) {
    while let Some((id, item)) = receiver.recv().await {
        if shared.released.load(Ordering::SeqCst) {
            continue;
        }

        shared.running.store(true, Ordering::SeqCst);
        shared.set_status(id, ActionStatus::Running);

        let outcome = AssertUnwindSafe(process(id, item)).catch_unwind().await;
        let status = match outcome {
            Ok(true) => ActionStatus::Success,
            Ok(false) => ActionStatus::Failed,
            Err(_) => {
                error!("action panicked, id: {}", id);
                ActionStatus::Failed
            }
        };

        shared.running.store(false, Ordering::SeqCst);
        shared.set_status(id, status);
    }
    debug!("action worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn recording_queue(log: Arc<Mutex<Vec<u32>>>) -> ActionQueue<u32> {
        ActionQueue::new(move |_, item: u32| {
            let log = log.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                log.lock().unwrap().push(item);
                item % 2 == 0
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let queue = recording_queue(Arc::new(Mutex::new(Vec::new())));
        let other = recording_queue(Arc::new(Mutex::new(Vec::new())));

        let a = queue.post(0);
        let b = other.post(0);
        let c = queue.post(0);
        assert!(a < b && b < c);

        assert_eq!(queue.status(c + 1000), ActionStatus::Invalid);
        assert_eq!(queue.wait(c + 1000).await, ActionStatus::Invalid);
    }

    #[tokio::test]
    async fn test_fifo_and_wait() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = recording_queue(log.clone());

        let ids: Vec<_> = (0..10).map(|i| queue.post(i)).collect();
        assert_eq!(queue.wait(ids[9]).await, ActionStatus::Failed);

        // the last action finishing implies all earlier ones have
        for (i, id) in ids.iter().enumerate() {
            let expected = if i % 2 == 0 {
                ActionStatus::Success
            } else {
                ActionStatus::Failed
            };
            assert_eq!(queue.status(*id), expected);
        }
        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_panic_becomes_failed() {
        let queue = ActionQueue::new(|_, item: u32| {
            async move {
                if item == 1 {
                    panic!("boom");
                }
                true
            }
            .boxed()
        });

        let bad = queue.post(1);
        let good = queue.post(2);
        assert_eq!(queue.wait(bad).await, ActionStatus::Failed);
        assert_eq!(queue.wait(good).await, ActionStatus::Success);
    }

    #[tokio::test]
    async fn test_release_fails_pending() {
        let gate = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let queue = {
            let gate = gate.clone();
            let started = started.clone();
            ActionQueue::new(move |_, _item: u32| {
                let gate = gate.clone();
                let started = started.clone();
                async move {
                    started.notify_one();
                    gate.notified().await;
                    true
                }
                .boxed()
            })
        };

        let first = queue.post(0);
        let second = queue.post(1);
        started.notified().await;
        assert!(queue.running());
        assert_eq!(queue.status(first), ActionStatus::Running);

        queue.release();
        queue.release();
        assert_eq!(queue.status(second), ActionStatus::Failed);
        assert_eq!(queue.wait(second).await, ActionStatus::Failed);

        let late = queue.post(2);
        assert_eq!(queue.status(late), ActionStatus::Failed);

        gate.notify_one();
        assert_eq!(queue.wait(first).await, ActionStatus::Success);
    }

    #[tokio::test]
    async fn test_post_and_wait() {
        let queue = recording_queue(Arc::new(Mutex::new(Vec::new())));
        assert_eq!(queue.post_and_wait(4).await, ActionStatus::Success);
        assert_eq!(queue.post_and_wait(3).await, ActionStatus::Failed);
        assert!(!queue.running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_posts_run_once_in_id_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::new(recording_queue(log.clone()));

        let posters: Vec<_> = (0..8u32)
            .map(|task| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut posted = Vec::new();
                    for i in 0..25u32 {
                        let item = task * 100 + i;
                        posted.push((queue.post(item), item));
                        if i % 5 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                    posted
                })
            })
            .collect();

        let mut posted = Vec::new();
        for poster in posters {
            posted.extend(poster.await.unwrap());
        }
        let ids: HashSet<ActionId> = posted.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids.len(), 200);

        for (id, item) in &posted {
            let expected = if item % 2 == 0 {
                ActionStatus::Success
            } else {
                ActionStatus::Failed
            };
            assert_eq!(queue.wait(*id).await, expected);
        }

        let ran = log.lock().unwrap().clone();
        assert_eq!(ran.len(), 200);
        let id_of: HashMap<u32, ActionId> = posted.iter().map(|(id, item)| (*item, *id)).collect();
        let run_ids: Vec<ActionId> = ran.iter().map(|item| id_of[item]).collect();
        assert!(run_ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn test_finished_history_is_bounded() {
        let queue =
            ActionQueue::with_history_limit(3, |_, item: u32| async move { item % 2 == 0 }.boxed());

        let ids: Vec<_> = (0..10).map(|i| queue.post(i * 2)).collect();
        assert_eq!(queue.wait(ids[9]).await, ActionStatus::Success);

        assert_eq!(queue.shared.statuses().len(), 3);
        for id in &ids[..7] {
            assert_eq!(queue.status(*id), ActionStatus::Invalid);
        }
        for id in &ids[7..] {
            assert_eq!(queue.status(*id), ActionStatus::Success);
        }
    }

    #[tokio::test]
    async fn test_unfinished_statuses_are_kept() {
        let gate = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let queue = {
            let gate = gate.clone();
            let started = started.clone();
            ActionQueue::with_history_limit(1, move |_, _item: u32| {
                let gate = gate.clone();
                let started = started.clone();
                async move {
                    started.notify_one();
                    gate.notified().await;
                    true
                }
                .boxed()
            })
        };

        let ids: Vec<_> = (0..5).map(|i| queue.post(i)).collect();
        started.notified().await;
        for id in &ids[1..] {
            assert_eq!(queue.status(*id), ActionStatus::Pending);
        }

        queue.release();
        // only the newest failed entry plus the running one survive
        assert_eq!(queue.status(ids[0]), ActionStatus::Running);
        assert_eq!(queue.shared.statuses().len(), 2);

        gate.notify_one();
        assert_eq!(queue.wait(ids[0]).await, ActionStatus::Success);
    }
}
