//! Completion reaping.
//!
//! Finished descriptors sit in the completion queue until a producer reaps
//! them back into the pool. Producers reap before every waiting submission
//! (so it starts after all earlier work) and when the pool runs dry.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, with_timeout};

use crate::bus::DisplayBus;
use crate::error::{Error, Fault};
use crate::pool::Descriptor;

/// Receipt for one reaped transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Completion {
    /// Pool slot the transfer ran in.
    pub slot: u16,
    pub result: Result<(), Fault>,
    /// The transfer fired the flush event.
    pub signalled_flush: bool,
    /// Payload bytes moved.
    pub bytes: usize,
}

impl Completion {
    #[inline]
    pub const fn is_ok(&self) -> bool { self.result.is_ok() }
}

impl<M: RawMutex, T, const C: usize, const Q: usize> DisplayBus<M, T, C, Q> {
    /// Reap one finished transfer, releasing its descriptor to the pool.
    ///
    /// `None` waits until something completes; otherwise gives up after
    /// `timeout` and returns `None`.
    pub async fn drain_one(
        &self,
        timeout: Option<Duration>,
    ) -> Option<Completion> {
        let desc = match timeout {
            Some(timeout) => with_timeout(timeout, self.queue.receive_completion()).await.ok()?,
            None => self.queue.receive_completion().await,
        };
        Some(self.reclaim(desc))
    }

    /// Reap whatever has already completed without waiting. Returns the number reaped.
    pub fn drain_ready(&self) -> usize {
        let mut reaped = 0;
        while let Some(desc) = self.queue.try_receive_completion() {
            self.reclaim(desc);
            reaped += 1;
        }
        reaped
    }

    /// Reap until every descriptor is back in the pool.
    pub async fn wait_for_all_idle(&self) {
        if !self.pool.is_seeded() {
            return;
        }
        while self.pool.idle_count() < C {
            self.drain_one(self.config.drain_poll).await;
        }
    }

    fn reclaim(
        &self,
        desc: &'static mut Descriptor,
    ) -> Completion {
        let receipt = desc.take_receipt().unwrap_or(Completion {
            slot: desc.slot(),
            result: Ok(()),
            signalled_flush: false,
            bytes: 0,
        });
        if let Err((err, desc)) = self.pool.release(desc) {
            // Only this pool's descriptors enter its queues.
            error!("completion slot {=u16} not returned: {}", desc.slot(), Error::from(err));
        }
        trace!("reaped slot {=u16} ({=usize} bytes)", receipt.slot, receipt.bytes);
        receipt
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_ok() {
        let ok = Completion {
            slot: 3,
            result: Ok(()),
            signalled_flush: true,
            bytes: 10_240,
        };
        assert!(ok.is_ok());

        let failed = Completion {
            result: Err(Fault::Spi),
            ..ok
        };
        assert!(!failed.is_ok());
    }
}
