//! Bounded fan-out over scoped threads

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Run `f` over `items` on at most `workers` threads.
///
/// Results come back in input order. With one worker (or one item) everything
/// runs on the calling thread.
pub fn run_bounded<T, R, F>(items: &[T], workers: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let workers = workers.max(1).min(items.len());
    if workers <= 1 {
        return items.iter().map(&f).collect();
    }

    let next = AtomicUsize::new(0);
    let slots: Mutex<Vec<Option<R>>> = Mutex::new((0..items.len()).map(|_| None).collect());

    std::thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                let Some(item) = items.get(i) else { break };
                let result = f(item);
                slots.lock()[i] = Some(result);
            });
        }
    });

    slots.into_inner().into_iter().flatten().collect()
}
