//! Bus context and transfer submission.
//!
//! A [`DisplayBus`] owns everything needed to talk to one device: the
//! transport (behind an async mutex), the descriptor pool, the hardware queue
//! and statistics. Every entry point takes the context explicitly; the
//! firmware keeps its instances in `StaticCell`s.
//!
//! Three submission disciplines share the bus:
//!
//! | Discipline    | Waits for earlier transfers | Execution         | Returns            |
//! |---------------|-----------------------------|-------------------|--------------------|
//! | `Polling`     | yes                         | busy-wait, caller | after completion   |
//! | `Synchronous` | yes                         | DMA, caller       | after completion   |
//! | `Queued`      | no                          | DMA, engine task  | once queued        |

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};

use crate::buffer::Lease;
use crate::config::BusConfig;
use crate::error::{Error, Fault, InitError, Rejection, RequestError};
use crate::pool::{Descriptor, DescriptorPool};
use crate::queue::{HwQueue, QueueLimits};
use crate::transfer::{LineMode, Submission, Transfer};

// =============================================================================
// Transport
// =============================================================================

/// Moves one [`Transfer`] over the wire.
///
/// Implementations frame the transaction with chip select, drive D/C, send
/// the address and dummy phases, then the payload. Chip select stays asserted
/// afterwards when the transfer asks for it.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Busy-wait path used by polling submissions.
    fn transfer_blocking(
        &mut self,
        transfer: &mut Transfer<'_>,
    ) -> Result<(), Fault>;

    /// Interrupt/DMA path used by synchronous and queued submissions.
    async fn transfer(
        &mut self,
        transfer: &mut Transfer<'_>,
    ) -> Result<(), Fault>;

    /// Deassert a chip select left active by `keep_cs_active`.
    fn release_hold(&mut self) -> Result<(), Fault>;

    /// Line widths this transport can drive.
    fn supports(mode: LineMode) -> bool { matches!(mode, LineMode::Single) }

    /// Dummy phase lengths this transport can clock exactly. Byte-oriented
    /// buses only manage whole bytes.
    fn supports_dummy_bits(bits: u8) -> bool { bits % 8 == 0 }
}

// =============================================================================
// Statistics
// =============================================================================

/// Per-bus counters.
pub struct BusStats {
    submitted: AtomicU32,
    queued: AtomicU32,
    rejected: AtomicU32,
    completed: AtomicU32,
    faults: AtomicU32,
    backpressure_waits: AtomicU32,
    flushes: AtomicU32,
}

/// Point-in-time copy of [`BusStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatsSnapshot {
    pub submitted: u32,
    pub queued: u32,
    pub rejected: u32,
    pub completed: u32,
    pub faults: u32,
    pub backpressure_waits: u32,
    pub flushes: u32,
}

impl BusStats {
    pub const fn new() -> Self {
        Self {
            submitted: AtomicU32::new(0),
            queued: AtomicU32::new(0),
            rejected: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            faults: AtomicU32::new(0),
            backpressure_waits: AtomicU32::new(0),
            flushes: AtomicU32::new(0),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            backpressure_waits: self.backpressure_waits.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }

    fn record_submission(&self) { self.submitted.fetch_add(1, Ordering::Relaxed); }

    fn record_queued(&self) { self.queued.fetch_add(1, Ordering::Relaxed); }

    fn record_rejection(&self) { self.rejected.fetch_add(1, Ordering::Relaxed); }

    fn record_backpressure(&self) { self.backpressure_waits.fetch_add(1, Ordering::Relaxed); }

    pub(crate) fn record_fault(&self) { self.faults.fetch_add(1, Ordering::Relaxed); }

    pub(crate) fn record_completion(
        &self,
        flush: bool,
    ) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if flush {
            self.flushes.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for BusStats {
    fn default() -> Self { Self::new() }
}

// =============================================================================
// Bus Context
// =============================================================================

/// One bus + device: `C` pooled descriptors, hardware queue depth `Q`.
pub struct DisplayBus<M: RawMutex, T, const C: usize, const Q: usize> {
    pub(crate) config: BusConfig,
    pub(crate) transport: Mutex<M, T>,
    pub(crate) pool: DescriptorPool<M, C>,
    pub(crate) queue: HwQueue<M, C, Q>,
    pub(crate) stats: BusStats,
}

impl<M: RawMutex, T, const C: usize, const Q: usize> DisplayBus<M, T, C, Q> {
    /// Create an unseeded bus. Call [`init`](Self::init) before submitting.
    pub const fn new(
        config: BusConfig,
        transport: T,
    ) -> Self {
        Self {
            config,
            transport: Mutex::new(transport),
            pool: DescriptorPool::new(),
            queue: HwQueue::new(),
            stats: BusStats::new(),
        }
    }

    /// Validate the configuration and seed the pool with `storage`.
    pub fn init(
        &self,
        storage: &'static mut [Descriptor],
    ) -> Result<(), Error> {
        if C == 0 || Q == 0 || self.config.max_transfer_bytes == 0 {
            return Err(InitError::InvalidConfig.into());
        }
        self.pool.seed(storage)?;
        info!(
            "bus ready: {=u32} Hz, pool {=usize} (reserve {=usize}), queue {=usize}, max transfer {=usize}",
            self.config.clock_hz,
            C,
            self.reserve(),
            Q,
            self.config.max_transfer_bytes,
        );
        Ok(())
    }

    #[inline]
    pub const fn config(&self) -> &BusConfig { &self.config }

    #[inline]
    pub const fn pool(&self) -> &DescriptorPool<M, C> { &self.pool }

    #[inline]
    pub const fn queue(&self) -> &HwQueue<M, C, Q> { &self.queue }

    #[inline]
    pub const fn stats(&self) -> &BusStats { &self.stats }

    /// Reserve low-water mark the pool is reaped to when it runs dry.
    #[inline]
    pub const fn reserve(&self) -> usize { self.config.reserve(C) }

    #[inline]
    pub fn idle_count(&self) -> usize { self.pool.idle_count() }

    #[inline]
    pub fn in_flight_count(&self) -> usize { self.pool.in_flight_count() }

    fn limits(&self) -> QueueLimits {
        QueueLimits {
            max_transfer_bytes: self.config.max_transfer_bytes,
            timeout: self.config.queue_timeout,
        }
    }
}

impl<M, T, const C: usize, const Q: usize> DisplayBus<M, T, C, Q>
where
    M: RawMutex,
    T: Transport,
{
    /// Submit a transfer under its discipline.
    ///
    /// Zero-length transfers succeed without touching the bus. Queued
    /// transfers may suspend while the pool is empty or the hardware queue is
    /// full; they never fail for lack of descriptors.
    pub async fn submit(
        &self,
        submission: Submission<'_>,
    ) -> Result<(), Error> {
        if submission.transfer().is_empty() {
            return Ok(());
        }
        if !self.pool.is_seeded() {
            return Err(InitError::PoolNotSeeded.into());
        }
        submission.transfer().validate()?;
        self.stats.record_submission();

        match submission {
            Submission::Polling(mut transfer) => {
                check_limits::<T>(&transfer, self.config.max_transfer_bytes)
                    .inspect_err(|_| self.stats.record_rejection())?;
                self.wait_for_all_idle().await;
                let mut transport = self.transport.lock().await;
                let result = transport.transfer_blocking(&mut transfer);
                self.settle(result)
            }
            Submission::Synchronous(mut transfer) => {
                check_limits::<T>(&transfer, self.config.max_transfer_bytes)
                    .inspect_err(|_| self.stats.record_rejection())?;
                self.wait_for_all_idle().await;
                let mut transport = self.transport.lock().await;
                let result = transport.transfer(&mut transfer).await;
                self.settle(result)
            }
            Submission::Queued(transfer) => self.submit_queued(transfer).await,
        }
    }

    async fn submit_queued(
        &self,
        transfer: Transfer<'static>,
    ) -> Result<(), Error> {
        if transfer.has_rx() {
            return Err(RequestError::ReceiveNotQueueable.into());
        }

        if self.pool.idle_count() == 0 {
            self.stats.record_backpressure();
            let reserve = self.reserve();
            debug!("pool exhausted, reaping to reserve of {=usize}", reserve);
            while self.pool.idle_count() < reserve {
                self.drain_one(self.config.drain_poll).await;
            }
        }

        let desc = self.pool.acquire().await;
        desc.load(transfer);
        match self.queue.queue_trans::<T>(desc, self.limits()).await {
            Ok(()) => {
                self.stats.record_queued();
                Ok(())
            }
            Err((rejection, desc)) => {
                warn!("queued transfer rejected on slot {=u16}: {}", desc.slot(), rejection);
                if let Err((err, desc)) = self.pool.release(desc) {
                    error!("rejected slot {=u16} not returned: {}", desc.slot(), Error::from(err));
                }
                self.stats.record_rejection();
                Err(rejection.into())
            }
        }
    }

    fn settle(
        &self,
        result: Result<(), Fault>,
    ) -> Result<(), Error> {
        if let Err(fault) = result {
            self.stats.record_fault();
            warn!("bus transfer failed: {}", fault);
        }
        result.map_err(Error::from)
    }

    // -------------------------------------------------------------------------
    // Convenience operations
    // -------------------------------------------------------------------------

    /// Send one command byte (D/C low), polling.
    pub async fn send_command(
        &self,
        cmd: u8,
    ) -> Result<(), Error> {
        self.submit(Submission::Polling(Transfer::command_byte(cmd))).await
    }

    /// Send command parameters (D/C high), polling.
    pub async fn send_data(
        &self,
        data: &[u8],
    ) -> Result<(), Error> {
        self.submit(Submission::Polling(Transfer::write(data).data())).await
    }

    /// Queue pixel data (D/C high) and fire the flush event once it is on the wire.
    pub async fn send_colors(
        &self,
        pixels: Lease,
    ) -> Result<(), Error> {
        self.submit(Submission::Queued(Transfer::write_leased(pixels).data().signal_flush())).await
    }

    /// Drain the bus and hold the transport for a sequence of polling transfers.
    ///
    /// Chip select left asserted by `keep_cs_active` is released when the lock drops.
    pub async fn lock_bus(&self) -> BusLock<'_, M, T> {
        self.wait_for_all_idle().await;
        BusLock {
            transport: self.transport.lock().await,
            stats: &self.stats,
            max_transfer_bytes: self.config.max_transfer_bytes,
        }
    }
}

/// Per-transfer limits shared by every discipline.
pub(crate) fn check_limits<T: Transport>(
    transfer: &Transfer<'_>,
    max_transfer_bytes: usize,
) -> Result<(), Rejection> {
    if transfer.len() > max_transfer_bytes {
        return Err(Rejection::TooLong {
            len: transfer.len(),
            max: max_transfer_bytes,
        });
    }
    if !T::supports(transfer.line_mode()) {
        return Err(Rejection::UnsupportedLineMode);
    }
    if !T::supports_dummy_bits(transfer.dummy_bits()) {
        return Err(Rejection::UnsupportedDummyBits {
            bits: transfer.dummy_bits(),
        });
    }
    Ok(())
}

// =============================================================================
// Exclusive Bus Access
// =============================================================================

/// Exclusive transport access for back-to-back polling transfers.
pub struct BusLock<'a, M: RawMutex, T: Transport> {
    transport: MutexGuard<'a, M, T>,
    stats: &'a BusStats,
    max_transfer_bytes: usize,
}

impl<M: RawMutex, T: Transport> BusLock<'_, M, T> {
    /// Run one polling transfer while the bus is held.
    pub fn transfer(
        &mut self,
        mut transfer: Transfer<'_>,
    ) -> Result<(), Error> {
        if transfer.is_empty() {
            return Ok(());
        }
        transfer.validate()?;
        check_limits::<T>(&transfer, self.max_transfer_bytes)?;
        self.stats.record_submission();

        let result = self.transport.transfer_blocking(&mut transfer);
        if result.is_err() {
            self.stats.record_fault();
        }
        result.map_err(Error::from)
    }
}

impl<M: RawMutex, T: Transport> Drop for BusLock<'_, M, T> {
    fn drop(&mut self) {
        if self.transport.release_hold().is_err() {
            warn!("failed to release chip select");
        }
    }
}
