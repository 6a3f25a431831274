//! Hardware transfer queue and the bus engine.
//!
//! The queue models the SPI peripheral's transaction queue: a depth-`Q`
//! pending channel feeding the engine, and a completion channel the reaper
//! drains. The engine runs in its own task and plays the role of the
//! transfer-complete interrupt: it executes one transfer at a time, records
//! the outcome, releases the payload and fires the flush event when the
//! transfer asked for it.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_sync::signal::Signal;
use embassy_time::{Duration, with_timeout};

use crate::bus::{DisplayBus, Transport, check_limits};
use crate::error::Rejection;
use crate::notify::Notify;
use crate::pool::Descriptor;

/// Per-bus limits checked when a transfer enters the queue.
#[derive(Clone, Copy, Debug)]
pub(crate) struct QueueLimits {
    pub max_transfer_bytes: usize,
    pub timeout: Option<Duration>,
}

pub struct HwQueue<M: RawMutex, const C: usize, const Q: usize> {
    pending: Channel<M, &'static mut Descriptor, Q>,
    done: Channel<M, &'static mut Descriptor, C>,
    slot_freed: Notify<M>,
    completed: Notify<M>,
    flushes: AtomicU32,
    flush_event: Signal<M, ()>,
}

impl<M: RawMutex, const C: usize, const Q: usize> HwQueue<M, C, Q> {
    pub const fn new() -> Self {
        Self {
            pending: Channel::new(),
            done: Channel::new(),
            slot_freed: Notify::new(),
            completed: Notify::new(),
            flushes: AtomicU32::new(0),
            flush_event: Signal::new(),
        }
    }

    /// Transfers waiting for the engine.
    #[inline]
    pub fn pending_len(&self) -> usize { self.pending.len() }

    /// Finished transfers not yet reaped.
    #[inline]
    pub fn completed_len(&self) -> usize { self.done.len() }

    /// Flush-signalling transfers completed so far (wrapping).
    #[inline]
    pub fn flush_count(&self) -> u32 { self.flushes.load(Ordering::Acquire) }

    /// Enqueue a loaded descriptor.
    ///
    /// On rejection the descriptor is handed back so the caller can return it
    /// to the pool.
    pub(crate) async fn queue_trans<T: Transport>(
        &self,
        desc: &'static mut Descriptor,
        limits: QueueLimits,
    ) -> Result<(), (Rejection, &'static mut Descriptor)> {
        if let Err(rejection) = check_limits::<T>(desc.transfer(), limits.max_transfer_bytes) {
            return Err((rejection, desc));
        }

        let mut waiting = match self.pending.try_send(desc) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(desc)) => Some(desc),
        };
        if let Some(desc) = &waiting {
            trace!("hardware queue full, slot {=u16} waiting", desc.slot());
        }

        let enqueue = self.slot_freed.wait_for(|| {
            let desc = waiting.take()?;
            match self.pending.try_send(desc) {
                Ok(()) => Some(()),
                Err(TrySendError::Full(desc)) => {
                    waiting = Some(desc);
                    None
                }
            }
        });
        let queued = match limits.timeout {
            Some(timeout) => with_timeout(timeout, enqueue).await.is_ok(),
            None => {
                enqueue.await;
                true
            }
        };

        match waiting.take() {
            Some(desc) if !queued => Err((Rejection::QueueFull, desc)),
            // Queued: the closure consumed the descriptor.
            _ => Ok(()),
        }
    }

    async fn next_pending(&self) -> &'static mut Descriptor {
        let desc = self.pending.receive().await;
        self.slot_freed.notify_all();
        desc
    }

    fn post_completion(
        &self,
        desc: &'static mut Descriptor,
        flush: bool,
    ) {
        if flush {
            self.flushes.fetch_add(1, Ordering::Release);
            self.flush_event.signal(());
        }
        if let Err(TrySendError::Full(desc)) = self.done.try_send(desc) {
            // Capacity C holds every descriptor in existence.
            error!("completion queue full, slot {=u16}", desc.slot());
        }
        self.completed.notify_all();
    }

    /// Next finished descriptor. Several producers may wait here at once.
    pub(crate) async fn receive_completion(&self) -> &'static mut Descriptor {
        self.completed.wait_for(|| self.done.try_receive().ok()).await
    }

    pub(crate) fn try_receive_completion(&self) -> Option<&'static mut Descriptor> { self.done.try_receive().ok() }

    /// Suspend until at least `target` flush events have fired.
    pub(crate) async fn wait_flush(
        &self,
        target: u32,
    ) {
        // Wrapping comparison: `target` is at most half the counter range ahead.
        while (self.flush_count().wrapping_sub(target) as i32) < 0 {
            self.flush_event.wait().await;
        }
    }
}

impl<M: RawMutex, const C: usize, const Q: usize> Default for HwQueue<M, C, Q> {
    fn default() -> Self { Self::new() }
}

// =============================================================================
// Engine
// =============================================================================

impl<M, T, const C: usize, const Q: usize> DisplayBus<M, T, C, Q>
where
    M: RawMutex,
    T: Transport,
{
    /// Bus engine loop. Spawn once per bus on a dedicated task.
    pub async fn run_engine(&self) -> ! {
        info!("bus engine started (pool {=usize}, queue {=usize})", C, Q);
        loop {
            self.process_next().await;
        }
    }

    /// Execute the next queued transfer and post its completion.
    pub async fn process_next(&self) {
        let desc = self.queue.next_pending().await;

        let result = {
            let mut transport = self.transport.lock().await;
            transport.transfer(desc.transfer_mut()).await
        };

        let receipt = desc.finish(result);
        if let Err(fault) = receipt.result {
            self.stats.record_fault();
            warn!("queued transfer on slot {=u16} failed: {}", receipt.slot, fault);
        }
        self.stats.record_completion(receipt.signalled_flush);
        self.queue.post_completion(desc, receipt.signalled_flush);
    }
}
