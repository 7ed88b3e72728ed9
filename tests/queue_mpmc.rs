//! Concurrency suite for the volatile queue: multiset conservation under
//! producer/consumer fleets, ticket-order FIFO, and the racy size
//! observation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use turnstile::{Empty, Full, Queue};

#[test]
fn fifo_order_single_thread() {
    let queue = Queue::with_capacity(16).unwrap();
    for i in 0..10 {
        queue.push(i);
    }
    for i in 0..10 {
        assert_eq!(queue.pop(), i);
    }
}

#[test]
fn try_push_reports_full_and_returns_value() {
    let queue = Queue::with_capacity(4).unwrap();
    for i in 0..4 {
        queue.try_push(i).unwrap();
    }
    assert_eq!(queue.try_push(99), Err(Full(99)));
    for _ in 0..4 {
        queue.try_pop().unwrap();
    }
    assert_eq!(queue.try_pop(), Err(Empty));
}

#[test]
fn spsc_threaded_preserves_order() {
    let queue = Arc::new(Queue::with_capacity(128).unwrap());
    let q_send = queue.clone();
    let q_recv = queue.clone();

    let producer = thread::spawn(move || {
        for i in 0..10_000usize {
            q_send.push(i);
        }
    });
    let consumer = thread::spawn(move || {
        for i in 0..10_000usize {
            assert_eq!(q_recv.pop(), i);
        }
    });

    producer.join().unwrap();
    consumer.join().unwrap();
}

#[test]
fn mpmc_multiset_conservation() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: usize = 2_500;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    let queue = Arc::new(Queue::with_capacity(64).unwrap());
    let popped = Arc::new(Mutex::new(Vec::with_capacity(TOTAL)));
    let mut handles = Vec::new();

    for p in 0..PRODUCERS {
        let q = queue.clone();
        handles.push(thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                q.push(p * 1_000_000 + i);
            }
        }));
    }

    for _ in 0..CONSUMERS {
        let q = queue.clone();
        let sink = popped.clone();
        handles.push(thread::spawn(move || {
            let mut local = Vec::with_capacity(TOTAL / CONSUMERS);
            for _ in 0..TOTAL / CONSUMERS {
                local.push(q.pop());
            }
            sink.lock().unwrap().extend(local);
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    let mut got = Arc::try_unwrap(popped).unwrap().into_inner().unwrap();
    got.sort_unstable();
    let mut expected: Vec<usize> = (0..PRODUCERS)
        .flat_map(|p| (0..PER_PRODUCER).map(move |i| p * 1_000_000 + i))
        .collect();
    expected.sort_unstable();
    assert_eq!(got, expected);
    assert_eq!(queue.size(), 0);
}

#[test]
fn mpmc_try_variants_multiset_conservation() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 2;
    const PER_PRODUCER: usize = 1_000;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    let queue = Arc::new(Queue::with_capacity(8).unwrap());
    let consumed = Arc::new(AtomicUsize::new(0));
    let popped = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();

    for p in 0..PRODUCERS {
        let q = queue.clone();
        handles.push(thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                let mut value = p * 1_000_000 + i;
                loop {
                    match q.try_push(value) {
                        Ok(()) => break,
                        Err(Full(v)) => {
                            value = v;
                            thread::yield_now();
                        }
                    }
                }
            }
        }));
    }

    for _ in 0..CONSUMERS {
        let q = queue.clone();
        let count = consumed.clone();
        let sink = popped.clone();
        handles.push(thread::spawn(move || {
            let mut local = Vec::new();
            loop {
                match q.try_pop() {
                    Ok(v) => {
                        local.push(v);
                        count.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(Empty) => {
                        if count.load(Ordering::Relaxed) >= TOTAL {
                            break;
                        }
                        thread::yield_now();
                    }
                }
            }
            sink.lock().unwrap().extend(local);
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    let mut got = Arc::try_unwrap(popped).unwrap().into_inner().unwrap();
    got.sort_unstable();
    let mut expected: Vec<usize> = (0..PRODUCERS)
        .flat_map(|p| (0..PER_PRODUCER).map(move |i| p * 1_000_000 + i))
        .collect();
    expected.sort_unstable();
    assert_eq!(got, expected);
}

#[test]
fn each_value_popped_exactly_once() {
    const TOTAL: usize = 5_000;

    let queue = Arc::new(Queue::with_capacity(32).unwrap());
    let seen = Arc::new(Mutex::new(vec![0u32; TOTAL]));
    let mut handles = Vec::new();

    {
        let q = queue.clone();
        handles.push(thread::spawn(move || {
            for i in 0..TOTAL {
                q.push(i);
            }
        }));
    }

    for _ in 0..3 {
        let q = queue.clone();
        let seen = seen.clone();
        handles.push(thread::spawn(move || loop {
            match q.try_pop() {
                Ok(v) => {
                    seen.lock().unwrap()[v] += 1;
                }
                Err(Empty) => {
                    let done = seen.lock().unwrap().iter().all(|&c| c >= 1);
                    if done {
                        break;
                    }
                    thread::yield_now();
                }
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert!(seen.lock().unwrap().iter().all(|&c| c == 1));
}

#[test]
fn wrap_around_many_laps() {
    let queue = Queue::with_capacity(8).unwrap();
    for round in 0..100usize {
        for i in 0..8 {
            queue.push(round * 100 + i);
        }
        for i in 0..8 {
            assert_eq!(queue.pop(), round * 100 + i);
        }
    }
}

#[test]
fn drop_destroys_only_live_elements() {
    static DROPS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug)]
    struct Counted;
    impl Drop for Counted {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::Relaxed);
        }
    }

    {
        let queue = Queue::with_capacity(8).unwrap();
        for _ in 0..5 {
            queue.push(Counted);
        }
        drop(queue.pop());
    }
    // 4 live in the ring at drop, plus the 1 popped.
    assert_eq!(DROPS.load(Ordering::Relaxed), 5);
}

#[test]
fn size_is_signed_and_settles_at_quiescence() {
    let queue = Queue::with_capacity(4).unwrap();
    assert_eq!(queue.size(), 0);
    queue.push(1);
    queue.push(2);
    assert_eq!(queue.size(), 2);
    let _ = queue.pop();
    let _ = queue.pop();
    assert_eq!(queue.size(), 0);
    assert!(queue.is_empty());
}

#[test]
fn stress_randomized_mixed_roles() {
    use rand::Rng;

    const THREADS: usize = 4;
    const OPS: usize = 20_000;

    let queue = Arc::new(Queue::with_capacity(16).unwrap());
    let pushed = Arc::new(AtomicUsize::new(0));
    let popped = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    // Every thread plays both roles with a random schedule; at quiescence
    // the push and pop totals must reconcile with the remaining size.
    for t in 0..THREADS {
        let q = queue.clone();
        let pushed = pushed.clone();
        let popped = popped.clone();
        handles.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            for i in 0..OPS {
                if rng.gen_bool(0.5) {
                    if q.try_push(t * OPS + i).is_ok() {
                        pushed.fetch_add(1, Ordering::Relaxed);
                    }
                } else if q.try_pop().is_ok() {
                    popped.fetch_add(1, Ordering::Relaxed);
                }
                if rng.gen_bool(0.01) {
                    thread::yield_now();
                }
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    let remaining = pushed.load(Ordering::Relaxed) - popped.load(Ordering::Relaxed);
    assert_eq!(queue.size(), remaining as i64);
    for _ in 0..remaining {
        queue.try_pop().unwrap();
    }
    assert_eq!(queue.try_pop(), Err(Empty));
}

#[test]
fn stress_alternating_under_contention() {
    let queue = Arc::new(Queue::with_capacity(64).unwrap());
    let q1 = queue.clone();
    let q2 = queue.clone();

    let producer = thread::spawn(move || {
        for i in 0..50_000usize {
            q1.push(i);
        }
    });
    let consumer = thread::spawn(move || {
        for _ in 0..50_000usize {
            let _ = q2.pop();
        }
    });

    producer.join().unwrap();
    consumer.join().unwrap();
    assert_eq!(queue.size(), 0);
}
