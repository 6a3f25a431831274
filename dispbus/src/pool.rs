//! Fixed pool of preallocated transfer descriptors.
//!
//! Idle descriptors live in a channel as `&'static mut` references, so a
//! descriptor has exactly one owner at any time: the pool, a producer that
//! is filling it, the hardware queue, or the completion queue.
//!
//! Seeding stamps every descriptor with the pool's id; a pool only takes
//! back descriptors that carry its id and are checked out.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;

use crate::error::{Fault, InitError, RequestError};
use crate::notify::Notify;
use crate::reaper::Completion;
use crate::transfer::Transfer;

/// Source of pool ids; 0 marks a descriptor no pool has seeded.
static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// A reusable transfer slot.
#[derive(Debug)]
pub struct Descriptor {
    slot: u16,
    owner: u32,
    checked_out: bool,
    transfer: Transfer<'static>,
    receipt: Option<Completion>,
}

impl Descriptor {
    pub const fn new() -> Self {
        Self {
            slot: 0,
            owner: 0,
            checked_out: false,
            transfer: Transfer::empty(),
            receipt: None,
        }
    }

    /// Fixed index assigned when the pool is seeded.
    #[inline]
    pub const fn slot(&self) -> u16 { self.slot }

    #[inline]
    pub fn transfer(&self) -> &Transfer<'static> { &self.transfer }

    #[inline]
    pub(crate) fn transfer_mut(&mut self) -> &mut Transfer<'static> { &mut self.transfer }

    pub(crate) fn load(
        &mut self,
        transfer: Transfer<'static>,
    ) {
        self.transfer = transfer;
        self.receipt = None;
    }

    /// Record the outcome and drop the payload (releasing any lease).
    pub(crate) fn finish(
        &mut self,
        result: Result<(), Fault>,
    ) -> Completion {
        let receipt = Completion {
            slot: self.slot,
            result,
            signalled_flush: self.transfer.signals_flush(),
            bytes: self.transfer.len(),
        };
        self.transfer = Transfer::empty();
        self.receipt = Some(receipt);
        receipt
    }

    pub(crate) fn take_receipt(&mut self) -> Option<Completion> { self.receipt.take() }

    fn reset(&mut self) {
        self.transfer = Transfer::empty();
        self.receipt = None;
    }
}

impl Default for Descriptor {
    fn default() -> Self { Self::new() }
}

/// Bounded pool of `C` descriptors.
pub struct DescriptorPool<M: RawMutex, const C: usize> {
    idle: Channel<M, &'static mut Descriptor, C>,
    released: Notify<M>,
    id: AtomicU32,
    seeded: AtomicBool,
    in_flight: AtomicUsize,
}

impl<M: RawMutex, const C: usize> DescriptorPool<M, C> {
    pub const fn new() -> Self {
        Self {
            idle: Channel::new(),
            released: Notify::new(),
            id: AtomicU32::new(0),
            seeded: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Hand the preallocated descriptors to the pool. Only allowed once.
    pub fn seed(
        &self,
        storage: &'static mut [Descriptor],
    ) -> Result<(), InitError> {
        if storage.len() != C {
            return Err(InitError::StorageSize {
                len: storage.len(),
                capacity: C,
            });
        }
        if self.seeded.swap(true, Ordering::AcqRel) {
            return Err(InitError::PoolAlreadySeeded);
        }

        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        self.id.store(id, Ordering::Release);
        for (slot, desc) in storage.iter_mut().enumerate() {
            desc.reset();
            desc.slot = slot as u16;
            desc.owner = id;
            desc.checked_out = false;
            if self.idle.try_send(desc).is_err() {
                return Err(InitError::StorageSize {
                    len: slot + 1,
                    capacity: C,
                });
            }
        }
        debug!("descriptor pool seeded with {=usize} slots", C);
        Ok(())
    }

    /// Take an idle descriptor, suspending until one is released.
    ///
    /// Any number of producers may wait here at once.
    pub async fn acquire(&self) -> &'static mut Descriptor {
        self.released.wait_for(|| self.try_acquire()).await
    }

    pub fn try_acquire(&self) -> Option<&'static mut Descriptor> {
        let desc = self.idle.try_receive().ok()?;
        desc.checked_out = true;
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        Some(desc)
    }

    /// Return a descriptor to the idle set.
    ///
    /// A descriptor seeded by another pool, or one this pool never handed
    /// out, is refused and given back with the counters untouched.
    pub fn release(
        &self,
        desc: &'static mut Descriptor,
    ) -> Result<(), (RequestError, &'static mut Descriptor)> {
        let id = self.id.load(Ordering::Acquire);
        if id == 0 || desc.owner != id || !desc.checked_out {
            warn!("refusing release of foreign descriptor (slot {=u16})", desc.slot);
            return Err((RequestError::ForeignDescriptor { slot: desc.slot }, desc));
        }

        desc.reset();
        desc.checked_out = false;
        let slot = desc.slot;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        if self.idle.try_send(desc).is_err() {
            // Only C checked-out descriptors carry this id, so the idle channel has room.
            error!("pool full on release of slot {=u16}", slot);
        }
        self.released.notify_all();
        Ok(())
    }

    #[inline]
    pub fn idle_count(&self) -> usize { self.idle.len() }

    #[inline]
    pub fn in_flight_count(&self) -> usize { self.in_flight.load(Ordering::Relaxed) }

    #[inline]
    pub const fn capacity(&self) -> usize { C }

    #[inline]
    pub fn is_seeded(&self) -> bool { self.seeded.load(Ordering::Acquire) }
}

impl<M: RawMutex, const C: usize> Default for DescriptorPool<M, C> {
    fn default() -> Self { Self::new() }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::boxed::Box;
    use std::vec::Vec;

    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    use super::*;

    fn storage<const C: usize>() -> &'static mut [Descriptor] {
        Box::leak(Box::new([const { Descriptor::new() }; C]))
    }

    #[test]
    fn test_seed_once() {
        let pool = DescriptorPool::<NoopRawMutex, 4>::new();
        assert_eq!(pool.seed(storage::<4>()), Ok(()));
        assert_eq!(pool.idle_count(), 4);
        assert_eq!(pool.seed(storage::<4>()), Err(InitError::PoolAlreadySeeded));
    }

    #[test]
    fn test_short_storage() {
        let pool = DescriptorPool::<NoopRawMutex, 4>::new();
        assert_eq!(
            pool.seed(storage::<3>()),
            Err(InitError::StorageSize { len: 3, capacity: 4 })
        );
        assert!(!pool.is_seeded());
    }

    #[test]
    fn test_conservation_and_distinct_slots() {
        let pool = DescriptorPool::<NoopRawMutex, 5>::new();
        pool.seed(storage::<5>()).unwrap();

        let mut held = Vec::new();
        while let Some(desc) = pool.try_acquire() {
            assert_eq!(pool.idle_count() + pool.in_flight_count(), pool.capacity());
            held.push(desc);
        }
        assert_eq!(held.len(), 5);

        let mut slots: Vec<u16> = held.iter().map(|d| d.slot()).collect();
        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots, [0, 1, 2, 3, 4]);

        for desc in held {
            pool.release(desc).unwrap();
            assert_eq!(pool.idle_count() + pool.in_flight_count(), pool.capacity());
        }
        assert_eq!(pool.idle_count(), 5);
        assert_eq!(pool.in_flight_count(), 0);
    }

    #[test]
    fn test_release_clears_payload() {
        let pool = DescriptorPool::<NoopRawMutex, 1>::new();
        pool.seed(storage::<1>()).unwrap();

        let desc = pool.try_acquire().unwrap();
        desc.load(Transfer::command_byte(0x29));
        assert_eq!(desc.transfer().len(), 1);
        pool.release(desc).unwrap();

        let desc = pool.try_acquire().unwrap();
        assert!(desc.transfer().is_empty());
    }

    #[test]
    fn test_foreign_descriptor_refused() {
        let display = DescriptorPool::<NoopRawMutex, 4>::new();
        let touch = DescriptorPool::<NoopRawMutex, 2>::new();
        display.seed(storage::<4>()).unwrap();
        touch.seed(storage::<2>()).unwrap();

        let held = display.try_acquire().unwrap();
        let stray = touch.try_acquire().unwrap();

        let (err, stray) = display.release(stray).unwrap_err();
        assert_eq!(err, RequestError::ForeignDescriptor { slot: stray.slot() });
        assert_eq!((display.idle_count(), display.in_flight_count()), (3, 1));
        assert_eq!((touch.idle_count(), touch.in_flight_count()), (1, 1));

        // The rightful pool still takes it back.
        touch.release(stray).unwrap();
        assert_eq!((touch.idle_count(), touch.in_flight_count()), (2, 0));

        display.release(held).unwrap();
        assert_eq!((display.idle_count(), display.in_flight_count()), (4, 0));
    }

    #[test]
    fn test_unseeded_descriptor_refused() {
        let pool = DescriptorPool::<NoopRawMutex, 2>::new();
        pool.seed(storage::<2>()).unwrap();

        for _ in 0..3 {
            let loose: &'static mut Descriptor = Box::leak(Box::new(Descriptor::new()));
            assert!(pool.release(loose).is_err());
        }
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.in_flight_count(), 0);
        assert_eq!(pool.idle_count() + pool.in_flight_count(), pool.capacity());
    }
}
