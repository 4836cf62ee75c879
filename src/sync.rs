//! Blocking transfers
//!
//! A [`Signal`] is a completion that stores a message's [`Outcome`] and
//! wakes whoever awaits it. [`transfer`] pairs it with the crate's
//! [`block`](crate::block) helper to submit a message and spin until it
//! finishes.

use crate::engine::{Engine, Hardware};
use crate::transfer::{Complete, Message, Outcome, Segment};
use crate::Result;

use core::{
    cell::{Cell, RefCell},
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};
use critical_section::Mutex;

/// A one-shot completion slot
///
/// Place a `Signal` in a `static`, and use `&'static Signal` as a message's
/// completion.
pub struct Signal {
    outcome: Mutex<Cell<Option<Outcome>>>,
    waker: Mutex<RefCell<Option<Waker>>>,
}

impl Signal {
    pub const fn new() -> Self {
        Signal {
            outcome: Mutex::new(Cell::new(None)),
            waker: Mutex::new(RefCell::new(None)),
        }
    }

    /// Store `outcome` and wake the waiter
    pub fn notify(&self, outcome: Outcome) {
        let waker = critical_section::with(|cs| {
            self.outcome.borrow(cs).set(Some(outcome));
            self.waker.borrow_ref_mut(cs).take()
        });
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Take the stored outcome, if any
    pub fn take(&self) -> Option<Outcome> {
        critical_section::with(|cs| self.outcome.borrow(cs).take())
    }

    /// Forget any stored outcome and waiter
    pub fn reset(&self) {
        critical_section::with(|cs| {
            self.outcome.borrow(cs).set(None);
            *self.waker.borrow_ref_mut(cs) = None;
        });
    }

    /// A future that resolves with the next outcome
    pub fn wait(&self) -> Wait<'_> {
        Wait { signal: self }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Complete for &'static Signal {
    fn complete(self, outcome: Outcome) {
        self.notify(outcome);
    }
}

/// Resolves once a [`Signal`] receives an outcome
pub struct Wait<'a> {
    signal: &'a Signal,
}

impl Future for Wait<'_> {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        critical_section::with(|cs| {
            if let Some(outcome) = self.signal.outcome.borrow(cs).take() {
                return Poll::Ready(outcome);
            }
            *self.signal.waker.borrow_ref_mut(cs) = Some(cx.waker().clone());
            Poll::Pending
        })
    }
}

/// Submit `segments` to `device` and block until they finish
///
/// Returns the outcome of a successful message, or the error it failed
/// with. The interrupts that drive the engine must be able to preempt the
/// caller.
///
/// # Safety
///
/// See [`Engine::submit`]. The buffers are released once `transfer`
/// returns successfully.
pub unsafe fn transfer<H, C, const N: usize>(
    engine: &Engine<H, C, N>,
    signal: &'static Signal,
    device: u8,
    segments: &[Segment],
) -> Result<Outcome>
where
    H: Hardware,
    C: Complete + From<&'static Signal>,
{
    signal.reset();
    let message = Message::with_segments(device, segments, C::from(signal))?;
    engine.submit(message)?;
    let outcome = crate::block(core::pin::pin!(signal.wait()));
    outcome.status.map(|()| outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{poll_no_wake, Error};

    static SIGNAL: Signal = Signal::new();

    #[test]
    fn wait_resolves_after_notify() {
        SIGNAL.reset();
        let mut wait = core::pin::pin!(SIGNAL.wait());
        assert!(poll_no_wake(wait.as_mut()).is_pending());

        let outcome = Outcome {
            device: 1,
            status: Err(Error::ShuttingDown),
            actual_length: 0,
        };
        (&SIGNAL).complete(outcome);
        assert_eq!(poll_no_wake(wait.as_mut()), Poll::Ready(outcome));
        assert_eq!(SIGNAL.take(), None);
    }
}
