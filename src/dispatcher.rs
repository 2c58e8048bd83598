//! Per-connection task scheduling.
//!
//! The filter never acts on a backend callback directly: it posts a task and handles the
//! result when the task runs. Tasks run to completion, one at a time, in submission order.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tokio::sync::mpsc;

pub type Task = Box<dyn FnOnce()>;

/// Scheduling primitive of one connection.
pub trait Dispatcher {
    fn post(&self, task: Task);
}

/// A deterministic FIFO of tasks driven by the caller.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Run the oldest pending task. Returns `false` if there was none.
    pub fn run_one(&self) -> bool {
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks, including ones posted while running, until the queue is empty.
    /// Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }
}

impl Dispatcher for TaskQueue {
    fn post(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

/// Sending half of a tokio-backed dispatcher. See [`DispatchLoop`].
#[derive(Clone)]
pub struct TokioDispatcher {
    tx: mpsc::UnboundedSender<Task>,
}

/// Receiving half of a tokio-backed dispatcher.
///
/// Tasks are not `Send`, so the loop must run on the thread that posts to it, e.g. under a
/// `tokio::task::LocalSet` or a current-thread runtime.
pub struct DispatchLoop {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl TokioDispatcher {
    pub fn new() -> (Self, DispatchLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, DispatchLoop { rx })
    }
}

impl Dispatcher for TokioDispatcher {
    fn post(&self, task: Task) {
        if self.tx.send(task).is_err() {
            tracing::debug!("dispatch loop gone, dropping task");
        }
    }
}

impl DispatchLoop {
    /// Run tasks until every [`TokioDispatcher`] handle has been dropped.
    pub async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            task();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_tasks_run_in_submission_order() {
        let queue = TaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = Rc::clone(&log);
            queue.post(Box::new(move || log.borrow_mut().push(i)));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.run_until_idle(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_tasks_posted_while_running_run_later() {
        let queue = TaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let inner_queue = queue.clone();
        let inner_log = Rc::clone(&log);
        queue.post(Box::new(move || {
            let log = Rc::clone(&inner_log);
            inner_queue.post(Box::new(move || log.borrow_mut().push("nested")));
            inner_log.borrow_mut().push("outer");
        }));
        assert!(queue.run_one());
        assert_eq!(*log.borrow(), vec!["outer"]);
        assert_eq!(queue.run_until_idle(), 1);
        assert_eq!(*log.borrow(), vec!["outer", "nested"]);
        assert!(!queue.run_one());
    }

    #[tokio::test]
    async fn test_tokio_dispatcher_runs_tasks_in_order() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (dispatcher, dispatch_loop) = TokioDispatcher::new();
                let handle = tokio::task::spawn_local(dispatch_loop.run());
                let count = Rc::new(Cell::new(0));
                for i in 0..5 {
                    let count = Rc::clone(&count);
                    dispatcher.post(Box::new(move || {
                        assert_eq!(count.get(), i);
                        count.set(i + 1);
                    }));
                }
                drop(dispatcher);
                handle.await.unwrap();
                assert_eq!(count.get(), 5);
            })
            .await;
    }
}
