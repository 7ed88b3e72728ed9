//! Compile-time check that the volatile core works without std.
//!
//! Build with `--no-default-features` to exercise the no_std path.

#![cfg(not(feature = "std"))]

use turnstile::{Empty, Full, Queue};

#[test]
fn volatile_queue_without_std() {
    let q = Queue::with_capacity(4).unwrap();
    q.push(1u32);
    q.push(2u32);
    assert_eq!(q.try_pop(), Ok(1));
    assert_eq!(q.pop(), 2);
    assert_eq!(q.try_pop(), Err(Empty));
}

#[test]
fn full_error_carries_value_without_std() {
    let q = Queue::with_capacity(1).unwrap();
    q.push(9u8);
    assert_eq!(q.try_push(10), Err(Full(10)));
    assert_eq!(q.size(), 1);
}
