//! Fork/join helpers over contiguous ranges of a slice.
//!
//! Work is cut into chunks of `grain_size` items. A grain size of zero runs everything
//! on the calling thread. Otherwise the chunks go on a shared queue drained by scoped
//! worker threads, and results are put back in chunk order, so the output never depends
//! on how many threads ran or which thread took which chunk.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::queue::SegQueue;

pub const DEFAULT_GRAIN_SIZE: usize = 1;

/// Shared flag polled by long-running tools between iterations.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// How a cancellable operation ended. Cancellation leaves the tree valid but only
/// partially updated.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    Finished,
    Cancelled,
}

impl Completion {
    pub fn is_finished(self) -> bool {
        self == Completion::Finished
    }
}

pub(crate) fn was_cancelled(cancel: Option<&CancelToken>) -> bool {
    cancel.is_some_and(|c| c.is_cancelled())
}

fn worker_count(chunks: usize) -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(chunks)
        .max(1)
}

fn run_scoped<R: Send>(workers: usize, work: impl Fn() -> Vec<(usize, R)> + Sync) -> Vec<R> {
    let mut results: Vec<(usize, R)> = crossbeam::thread::scope(|s| {
        let handles: Vec<_> = (0..workers).map(|_| s.spawn(|_| work())).collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    })
    .unwrap_or_else(|e| std::panic::resume_unwind(e));
    results.sort_by_key(|(i, _)| *i);
    results.into_iter().map(|(_, r)| r).collect()
}

/// Applies `f` to every item, returning results in item order.
pub fn map<I, R, F>(items: &[I], grain_size: usize, f: F) -> Vec<R>
where
    I: Sync,
    R: Send,
    F: Fn(usize, &I) -> R + Sync,
{
    if grain_size == 0 || items.len() <= grain_size {
        return items.iter().enumerate().map(|(i, item)| f(i, item)).collect();
    }
    let queue = SegQueue::new();
    for (c, chunk) in items.chunks(grain_size).enumerate() {
        queue.push((c, chunk));
    }
    let workers = worker_count(queue.len());
    run_scoped(workers, || {
        let mut done = Vec::new();
        while let Some((c, chunk)) = queue.pop() {
            let base = c * grain_size;
            let out: Vec<R> = chunk.iter().enumerate().map(|(i, item)| f(base + i, item)).collect();
            done.push((c, out));
        }
        done
    })
    .into_iter()
    .flatten()
    .collect()
}

/// Runs `f` on every item with exclusive access; each worker owns the chunks it takes.
pub fn for_each_mut<I, F>(items: &mut [I], grain_size: usize, f: F)
where
    I: Send,
    F: Fn(usize, &mut I) + Sync,
{
    if grain_size == 0 || items.len() <= grain_size {
        for (i, item) in items.iter_mut().enumerate() {
            f(i, item);
        }
        return;
    }
    let queue = SegQueue::new();
    for (c, chunk) in items.chunks_mut(grain_size).enumerate() {
        queue.push((c, chunk));
    }
    let workers = worker_count(queue.len());
    run_scoped(workers, || {
        while let Some((c, chunk)) = queue.pop() {
            let base = c * grain_size;
            for (i, item) in chunk.iter_mut().enumerate() {
                f(base + i, item);
            }
        }
        Vec::<(usize, ())>::new()
    });
}

/// Folds each chunk from `identity()` with `fold`, then joins the partials in chunk order.
pub fn reduce<I, A, Id, Fo, Jo>(items: &[I], grain_size: usize, identity: Id, fold: Fo, join: Jo) -> A
where
    I: Sync,
    A: Send,
    Id: Fn() -> A + Sync,
    Fo: Fn(&mut A, &I) + Sync,
    Jo: Fn(&mut A, A),
{
    let mut total = identity();
    if grain_size == 0 {
        for item in items {
            fold(&mut total, item);
        }
        return total;
    }
    let partials = map(&items.chunks(grain_size).collect::<Vec<_>>(), 1, |_, chunk| {
        let mut acc = identity();
        for item in chunk.iter() {
            fold(&mut acc, item);
        }
        acc
    });
    for partial in partials {
        join(&mut total, partial);
    }
    total
}
