//! Joinable multi-producer/multi-consumer work queue.
//!
//! The recursion primitive of the engine: workers both drain the queue and
//! push extracted children back onto it, so "queue momentarily empty" and
//! "run finished" are different conditions. Every `put` must be matched by a
//! `task_done` acknowledgement; `join` returns only when all acknowledgements
//! are in, which is the only correct termination signal.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    /// puts not yet acknowledged by task_done
    unfinished: usize,
    shutdown: bool,
}

pub struct JoinableQueue<T> {
    state: Mutex<QueueState<T>>,
    /// signalled on put and on shutdown
    item_available: Condvar,
    /// signalled when `unfinished` drops to zero
    all_done: Condvar,
}

impl<T> JoinableQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                unfinished: 0,
                shutdown: false,
            }),
            item_available: Condvar::new(),
            all_done: Condvar::new(),
        }
    }

    /// Add an item. Panics if the mutex is poisoned (a worker died while
    /// holding it; the run is already lost at that point).
    pub fn put(&self, item: T) {
        let mut state = self.state.lock().expect("work queue poisoned");
        state.items.push_back(item);
        state.unfinished += 1;
        drop(state);
        self.item_available.notify_one();
    }

    /// Block until an item is available or the queue is shut down.
    /// Returns None only on shutdown.
    pub fn get(&self) -> Option<T> {
        let mut state = self.state.lock().expect("work queue poisoned");
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.shutdown {
                return None;
            }
            state = self
                .item_available
                .wait(state)
                .expect("work queue poisoned");
        }
    }

    /// Acknowledge one previously fetched item.
    pub fn task_done(&self) {
        let mut state = self.state.lock().expect("work queue poisoned");
        assert!(state.unfinished > 0, "task_done without matching put");
        state.unfinished -= 1;
        if state.unfinished == 0 {
            self.all_done.notify_all();
        }
    }

    /// Block until every put has been acknowledged. Enqueues made while
    /// joining (workers pushing children) extend the wait.
    pub fn join(&self) {
        let mut state = self.state.lock().expect("work queue poisoned");
        while state.unfinished > 0 {
            state = self.all_done.wait(state).expect("work queue poisoned");
        }
    }

    /// Wake all blocked consumers and make further `get` calls return None.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().expect("work queue poisoned");
        state.shutdown = true;
        drop(state);
        self.item_available.notify_all();
    }

    /// Number of queued (not yet fetched) items.
    pub fn len(&self) -> usize {
        self.state.lock().expect("work queue poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for JoinableQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
