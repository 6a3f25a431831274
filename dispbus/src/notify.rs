//! Wake-all notifier for state shared by several producers.
//!
//! `Channel::receive` and `Signal::wait` keep a single waker: a second task
//! parking on the same one evicts and wakes the first, which then evicts the
//! second, and neither ever sleeps. Waiters here register in a
//! `MultiWakerRegistration` instead and re-check their condition on every
//! wake-up.

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;

use crate::config::MAX_WAITERS;

pub(crate) struct Notify<M: RawMutex> {
    wakers: Mutex<M, RefCell<MultiWakerRegistration<MAX_WAITERS>>>,
}

impl<M: RawMutex> Notify<M> {
    pub const fn new() -> Self {
        Self {
            wakers: Mutex::new(RefCell::new(MultiWakerRegistration::new())),
        }
    }

    /// Wake every parked waiter.
    pub fn notify_all(&self) { self.wakers.lock(|wakers| wakers.borrow_mut().wake()); }

    /// Retry `attempt` until it yields a value, parking between notifications.
    pub async fn wait_for<T>(
        &self,
        mut attempt: impl FnMut() -> Option<T>,
    ) -> T {
        poll_fn(|cx| {
            if let Some(value) = attempt() {
                return Poll::Ready(value);
            }
            self.wakers.lock(|wakers| wakers.borrow_mut().register(cx.waker()));
            // A notification may have landed between the attempt and the registration.
            match attempt() {
                Some(value) => Poll::Ready(value),
                None => Poll::Pending,
            }
        })
        .await
    }
}

// =============================================================================
// Tests
// =============================================================================
