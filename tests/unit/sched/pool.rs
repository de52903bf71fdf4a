use super::*;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;

fn wait_until(deadline_ms: u64, cond: impl Fn() -> bool) -> bool {
    let mut waited = 0;
    while waited < deadline_ms {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
        waited += 10;
    }
    cond()
}

#[test]
fn limit_is_clamped_to_at_least_one() {
    assert_eq!(WorkerPool::new(0).limit(), 1);
    assert_eq!(WorkerPool::new(3).limit(), 3);
}

#[test]
fn admission_bounds_concurrency() {
    let pool = WorkerPool::new(2);
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..6 {
        let current = current.clone();
        let peak = peak.clone();
        let done = done.clone();
        pool.spawn("bound-test", move || {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            current.fetch_sub(1, Ordering::SeqCst);
            done.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    assert!(wait_until(5000, || done.load(Ordering::SeqCst) == 6));
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(pool.active(), 0);
}

#[test]
fn blocking_section_frees_the_slot_for_other_tasks() {
    let pool = WorkerPool::new(1);
    let unblock = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicUsize::new(0));

    {
        let pool2 = pool.clone();
        let unblock = unblock.clone();
        let done = done.clone();
        pool.spawn("blocker", move || {
            let released = pool2.blocking_section();
            while !unblock.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            drop(released);
            done.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    {
        let unblock = unblock.clone();
        let done = done.clone();
        // Only runs if the blocker's slot was actually handed back.
        pool.spawn("unblocker", move || {
            unblock.store(true, Ordering::SeqCst);
            done.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    assert!(wait_until(5000, || done.load(Ordering::SeqCst) == 2));
    assert_eq!(pool.active(), 0);
}

#[test]
fn a_panicking_task_returns_its_slot() {
    let pool = WorkerPool::new(1);
    pool.spawn("panicker", || panic!("task blew up")).unwrap();

    // Only runs if the panicked task's slot came back to the pool.
    let done = Arc::new(AtomicUsize::new(0));
    let done2 = done.clone();
    pool.spawn("after-panic", move || {
        done2.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    assert!(wait_until(5000, || done.load(Ordering::SeqCst) == 1));
    assert_eq!(pool.active(), 0);
}

#[test]
fn worker_flag_tracks_pool_threads() {
    assert!(!WorkerPool::current_thread_is_worker());
    let pool = WorkerPool::new(1);
    let (tx, rx) = mpsc::channel();
    pool.spawn("flag-test", move || {
        tx.send(WorkerPool::current_thread_is_worker()).unwrap();
    })
    .unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
}

#[test]
fn release_and_reserve_are_symmetric() {
    let pool = WorkerPool::new(1);
    assert_eq!(pool.active(), 0);
    pool.release_task();
    assert_eq!(pool.active(), -1);
    assert!(pool.has_idle_capacity());
    pool.reserve_task();
    assert_eq!(pool.active(), 0);
}
