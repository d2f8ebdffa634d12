//! Single-slot hand-off channel between ring neighbours.
//!
//! A [`Slot`] holds at most one value. The sender claims the empty slot,
//! writes the value and publishes it; the receiver claims the full slot,
//! moves the value out and marks the slot empty again. Ownership of the value
//! moves with it, nothing is ever shared between the two sides.
//!
//! The state machine of a slot:
//!
//! ```text
//!            try_put: CAS EMPTY -> BUSY, write, store FULL
//!   EMPTY  ───────────────────────────────────────────────►  FULL
//!     ▲                                                        │
//!     └────────────────────────────────────────────────────────┘
//!            try_take: CAS FULL -> BUSY, read, store EMPTY
//! ```
//!
//! `BUSY` is only ever observed while the other side is in the middle of its
//! claim, so both sides treat it like "not ready yet".
use std::{
    cell::UnsafeCell,
    fmt,
    hint,
    mem::MaybeUninit,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
    thread,
    time::{Duration, Instant},
};

const EMPTY: u8 = 0;
const BUSY: u8 = 1;
const FULL: u8 = 2;

pub struct Slot<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: access to `value` is serialized through the `state` claim protocol,
// at most one thread touches it at a time.
unsafe impl<T: Send> Send for Slot<T> {}
unsafe impl<T: Send> Sync for Slot<T> {}

/// Why a blocking hand-off gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffError {
    /// The other side made no progress within the timeout.
    TimedOut(Duration),
    /// The abort flag was raised while waiting.
    Aborted,
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    pub fn is_full(&self) -> bool {
        self.state.load(Ordering::Acquire) == FULL
    }

    /// Puts `value` into the slot if it is empty, otherwise hands it back.
    pub fn try_put(&self, value: T) -> Result<(), T> {
        // Acquire pairs with the Release in `try_take` so the previous value
        // has been moved out before we overwrite the cell.
        match self
            .state
            .compare_exchange(EMPTY, BUSY, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => {
                unsafe {
                    (*self.value.get()).write(value);
                }
                // Publish. Release makes the write above visible to the taker.
                self.state.store(FULL, Ordering::Release);
                Ok(())
            }
            Err(_) => Err(value),
        }
    }

    /// Takes the value out of the slot if there is one.
    pub fn try_take(&self) -> Option<T> {
        match self
            .state
            .compare_exchange(FULL, BUSY, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => {
                let value = unsafe { (*self.value.get()).assume_init_read() };
                self.state.store(EMPTY, Ordering::Release);
                Some(value)
            }
            Err(_) => None,
        }
    }

    /// Blocks until the slot is free and `value` has been placed in it.
    pub fn put(&self, value: T, timeout: Duration, abort: &AtomicBool) -> Result<(), HandoffError> {
        let mut pending = Some(value);
        wait_until(timeout, abort, || match pending.take() {
            Some(v) => match self.try_put(v) {
                Ok(()) => Some(()),
                Err(v) => {
                    pending = Some(v);
                    None
                }
            },
            None => Some(()),
        })
    }

    /// Blocks until a value arrives.
    pub fn take(&self, timeout: Duration, abort: &AtomicBool) -> Result<T, HandoffError> {
        wait_until(timeout, abort, || self.try_take())
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == FULL {
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::Relaxed) {
            EMPTY => "empty",
            FULL => "full",
            _ => "busy",
        };
        f.debug_struct("Slot").field("state", &state).finish()
    }
}

/// Polls `attempt` until it yields a value, the abort flag is raised or
/// `timeout` elapses.
fn wait_until<R>(
    timeout: Duration,
    abort: &AtomicBool,
    mut attempt: impl FnMut() -> Option<R>,
) -> Result<R, HandoffError> {
    let start = Instant::now();
    let mut backoff = Backoff::new();
    loop {
        if let Some(r) = attempt() {
            return Ok(r);
        }
        if abort.load(Ordering::Acquire) {
            return Err(HandoffError::Aborted);
        }
        let waited = start.elapsed();
        if waited >= timeout {
            return Err(HandoffError::TimedOut(waited));
        }
        backoff.snooze();
    }
}

/// Spin, then yield, then sleep with growing intervals.
struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;
    const YIELD_LIMIT: u32 = 10;
    const MAX_SLEEP: Duration = Duration::from_millis(1);

    fn new() -> Self {
        Self { step: 0 }
    }

    fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..(1 << self.step) {
                hint::spin_loop();
            }
        } else if self.step <= Self::YIELD_LIMIT {
            thread::yield_now();
        } else {
            let exp = (self.step - Self::YIELD_LIMIT).min(5);
            let sleep = Duration::from_micros(32 << exp).min(Self::MAX_SLEEP);
            thread::sleep(sleep);
        }
        self.step = self.step.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use shuttle::thread as sthread;

    use super::*;

    const LONG: Duration = Duration::from_secs(10);

    #[test]
    fn put_take_single_thread() {
        let slot = Slot::new();
        assert!(!slot.is_full());
        assert_eq!(slot.try_take(), None::<u32>);

        slot.try_put(7).unwrap();
        assert!(slot.is_full());
        assert_eq!(slot.try_put(8), Err(8));

        assert_eq!(slot.try_take(), Some(7));
        assert_eq!(slot.try_take(), None);
        slot.try_put(9).unwrap();
        assert_eq!(slot.try_take(), Some(9));
    }

    #[test]
    fn leftover_value_is_dropped() {
        static DROP_COUNT: AtomicUsize = AtomicUsize::new(0);

        struct DropCounter;
        impl Drop for DropCounter {
            fn drop(&mut self) {
                DROP_COUNT.fetch_add(1, Ordering::Relaxed);
            }
        }

        DROP_COUNT.store(0, Ordering::Relaxed);
        {
            let slot = Slot::new();
            assert!(slot.try_put(DropCounter).is_ok());
            let taken = slot.try_take();
            assert!(taken.is_some());
            drop(taken);
            assert_eq!(DROP_COUNT.load(Ordering::Relaxed), 1);
            assert!(slot.try_put(DropCounter).is_ok());
        }
        assert_eq!(DROP_COUNT.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn take_times_out() {
        let slot: Slot<u32> = Slot::new();
        let abort = AtomicBool::new(false);
        let err = slot.take(Duration::from_millis(20), &abort).unwrap_err();
        match err {
            HandoffError::TimedOut(waited) => assert!(waited >= Duration::from_millis(20)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn put_observes_abort() {
        let slot = Slot::new();
        slot.try_put(1).unwrap();
        let abort = AtomicBool::new(true);
        assert_eq!(slot.put(2, LONG, &abort), Err(HandoffError::Aborted));
        // The slot still holds the first value.
        assert_eq!(slot.try_take(), Some(1));
    }

    #[test]
    fn blocking_put_waits_for_taker() {
        let slot = Arc::new(Slot::new());
        let abort = Arc::new(AtomicBool::new(false));
        slot.try_put(0u64).unwrap();

        let producer = {
            let slot = slot.clone();
            let abort = abort.clone();
            thread::spawn(move || {
                for i in 1..=100 {
                    slot.put(i, LONG, &abort).unwrap();
                }
            })
        };

        let mut received = Vec::new();
        for _ in 0..=100 {
            received.push(slot.take(LONG, &abort).unwrap());
        }
        producer.join().unwrap();

        assert_eq!(received, (0..=100).collect::<Vec<_>>());
        assert!(!slot.is_full());
    }

    #[test]
    fn shuttle_spsc_in_order() {
        shuttle::check_random(
            || {
                let slot = Arc::new(Slot::new());

                let producer = {
                    let slot = slot.clone();
                    sthread::spawn(move || {
                        for i in 0..8u32 {
                            let mut v = i;
                            loop {
                                match slot.try_put(v) {
                                    Ok(()) => break,
                                    Err(back) => v = back,
                                }
                                sthread::yield_now();
                            }
                        }
                    })
                };

                let consumer = {
                    let slot = slot.clone();
                    sthread::spawn(move || {
                        let mut got = Vec::new();
                        while got.len() < 8 {
                            match slot.try_take() {
                                Some(v) => got.push(v),
                                None => sthread::yield_now(),
                            }
                        }
                        got
                    })
                };

                producer.join().unwrap();
                let got = consumer.join().unwrap();
                assert_eq!(got, (0..8).collect::<Vec<_>>());
                assert!(!slot.is_full());
            },
            100,
        );
    }

    #[test]
    fn shuttle_contended_takers_never_duplicate() {
        shuttle::check_random(
            || {
                let slot = Arc::new(Slot::new());
                let results = Arc::new(shuttle::sync::Mutex::new(vec![]));
                let mut handles = vec![];

                for i in 0..2u32 {
                    let slot = slot.clone();
                    handles.push(sthread::spawn(move || {
                        for j in 0..3 {
                            let mut v = i * 10 + j;
                            loop {
                                match slot.try_put(v) {
                                    Ok(()) => break,
                                    Err(back) => v = back,
                                }
                                sthread::yield_now();
                            }
                        }
                    }));
                }

                for _ in 0..2 {
                    let slot = slot.clone();
                    let r = results.clone();
                    handles.push(sthread::spawn(move || {
                        for _ in 0..3 {
                            loop {
                                if let Some(v) = slot.try_take() {
                                    r.lock().unwrap().push(v);
                                    break;
                                }
                                sthread::yield_now();
                            }
                        }
                    }));
                }

                for h in handles {
                    h.join().unwrap();
                }

                let mut results = results.lock().unwrap();
                results.sort();
                assert_eq!(*results, vec![0, 1, 2, 10, 11, 12]);
            },
            100,
        );
    }
}
