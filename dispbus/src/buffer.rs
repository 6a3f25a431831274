//! Static pixel buffers with checked hand-off to the bus.
//!
//! A [`DmaBuffer`] is either writable by exactly one [`WriteGuard`] or leased
//! to any number of in-flight transfers through [`Lease`]s. The renderer can
//! only start drawing into a buffer again once every transfer reading from it
//! has completed and dropped its lease.
//!
//! ```text
//!   Free ──try_write()──► Writing ──drop(guard)──► Free
//!    │                                               ▲
//!    └──lease()──► Leased(n) ──drop(last lease)──────┘
//! ```

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut, Range};
use core::sync::atomic::{AtomicUsize, Ordering};

/// Buffer state value while a `WriteGuard` exists. Any other value is the lease count.
const WRITING: usize = usize::MAX;

/// Statically allocated byte buffer shared between the renderer and the bus.
pub struct DmaBuffer<const N: usize> {
    data: UnsafeCell<[u8; N]>,
    state: AtomicUsize,
}

// SAFETY: the state word serialises access. Writers are exclusive (CAS from
// 0 to WRITING) and leases only hand out shared slices while no writer exists.
unsafe impl<const N: usize> Sync for DmaBuffer<N> {}

impl<const N: usize> DmaBuffer<N> {
    pub const fn new() -> Self {
        Self {
            data: UnsafeCell::new([0u8; N]),
            state: AtomicUsize::new(0),
        }
    }

    /// Buffer size in bytes.
    #[inline]
    pub const fn len(&self) -> usize { N }

    #[inline]
    pub const fn is_empty(&self) -> bool { N == 0 }

    /// Number of outstanding leases (0 while free or being written).
    pub fn lease_count(&self) -> usize {
        match self.state.load(Ordering::Acquire) {
            WRITING => 0,
            n => n,
        }
    }

    /// Whether any transfer still reads from this buffer.
    pub fn is_leased(&self) -> bool { self.lease_count() > 0 }

    /// Exclusive write access, refused while leased or already being written.
    pub fn try_write(&self) -> Option<WriteGuard<'_>> {
        self.state
            .compare_exchange(0, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;

        // SAFETY: the CAS above makes this the only live reference to the data.
        let bytes = unsafe { &mut *self.data.get() };
        Some(WriteGuard {
            bytes,
            state: &self.state,
        })
    }

    /// Lease `range` of the buffer to the bus.
    ///
    /// Returns `None` while a writer holds the buffer or when `range` is out
    /// of bounds.
    pub fn lease(
        &'static self,
        range: Range<usize>,
    ) -> Option<Lease> {
        if range.start > range.end || range.end > N {
            return None;
        }

        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            if current == WRITING || current == WRITING - 1 {
                return None;
            }
            match self
                .state
                .compare_exchange_weak(current, current + 1, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        // SAFETY: the lease count is non-zero, so no WriteGuard can exist
        // until this lease (and its clones) are dropped.
        let data: &'static [u8; N] = unsafe { &*self.data.get() };
        Some(Lease {
            bytes: &data[range],
            state: &self.state,
        })
    }

    /// Lease the whole buffer.
    pub fn lease_all(&'static self) -> Option<Lease> { self.lease(0..N) }
}

impl<const N: usize> Default for DmaBuffer<N> {
    fn default() -> Self { Self::new() }
}

/// Exclusive write access to a [`DmaBuffer`].
pub struct WriteGuard<'a> {
    bytes: &'a mut [u8],
    state: &'a AtomicUsize,
}

impl Deref for WriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] { self.bytes }
}

impl DerefMut for WriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] { self.bytes }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) { self.state.store(0, Ordering::Release); }
}

/// Shared read access to (part of) a [`DmaBuffer`], held by queued transfers.
pub struct Lease {
    bytes: &'static [u8],
    state: &'static AtomicUsize,
}

impl Lease {
    /// Narrow the lease to `range` (relative to this lease).
    pub fn slice(
        &self,
        range: Range<usize>,
    ) -> Option<Lease> {
        let bytes = self.bytes.get(range)?;
        self.state.fetch_add(1, Ordering::Relaxed);
        Some(Lease {
            bytes,
            state: self.state,
        })
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] { self.bytes }
}

impl Clone for Lease {
    fn clone(&self) -> Self {
        self.state.fetch_add(1, Ordering::Relaxed);
        Self {
            bytes: self.bytes,
            state: self.state,
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) { self.state.fetch_sub(1, Ordering::Release); }
}

impl Deref for Lease {
    type Target = [u8];

    fn deref(&self) -> &[u8] { self.bytes }
}

impl fmt::Debug for Lease {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Lease").field("len", &self.bytes.len()).finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Lease {
    fn format(
        &self,
        f: defmt::Formatter,
    ) {
        defmt::write!(f, "Lease({=usize} bytes)", self.bytes.len());
    }
}

// =============================================================================
// Tests
// =============================================================================
