//! Fixed-size worker pool with a block-level completion barrier.
//!
//! The PGN reader submits one task per game and calls
//! [`WorkerPool::wait_for_tasks`] after each input block, which bounds the
//! number of queued games without a bounded channel.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<QueueState>,
    work_ready: Condvar,
    all_done: Condvar,
}

struct QueueState {
    tasks: VecDeque<Task>,
    running: usize,
    shutdown: bool,
}

/// A pool of worker threads executing submitted closures.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `threads` workers; zero means one per available CPU.
    pub fn new(threads: usize) -> Self {
        let threads = if threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            threads
        };

        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                running: 0,
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            all_done: Condvar::new(),
        });

        let workers = (0..threads)
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("chessdb-worker-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("spawning a worker thread")
            })
            .collect();

        WorkerPool { shared, workers }
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Enqueues a task.
    pub fn submit<F: FnOnce() + Send + 'static>(&self, task: F) {
        let mut queue = self.shared.queue.lock().expect("pool lock");
        queue.tasks.push_back(Box::new(task));
        drop(queue);
        self.shared.work_ready.notify_one();
    }

    /// Blocks until the queue is empty and no task is running.
    pub fn wait_for_tasks(&self) {
        let mut queue = self.shared.queue.lock().expect("pool lock");
        while !queue.tasks.is_empty() || queue.running > 0 {
            queue = self.shared.all_done.wait(queue).expect("pool lock");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().expect("pool lock");
            queue.shutdown = true;
        }
        self.shared.work_ready.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().expect("pool lock");
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    queue.running += 1;
                    break task;
                }
                if queue.shutdown {
                    return;
                }
                queue = shared.work_ready.wait(queue).expect("pool lock");
            }
        };

        task();

        let mut queue = shared.queue.lock().expect("pool lock");
        queue.running -= 1;
        if queue.tasks.is_empty() && queue.running == 0 {
            shared.all_done.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_all_submitted_tasks() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait_for_tasks();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn wait_is_a_barrier_between_batches() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for batch in 0..3 {
            for _ in 0..10 {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
            pool.wait_for_tasks();
            assert_eq!(counter.load(Ordering::SeqCst), (batch + 1) * 10);
        }
    }

    #[test]
    fn default_thread_count_is_positive() {
        let pool = WorkerPool::new(0);
        assert!(pool.thread_count() >= 1);
    }

    #[test]
    fn empty_wait_returns_immediately() {
        let pool = WorkerPool::new(1);
        pool.wait_for_tasks();
    }
}
