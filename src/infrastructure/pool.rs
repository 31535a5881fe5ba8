//! Object pooling with generation-tagged handles
//!
//! Slots are never returned to the allocator while the pool lives. A released
//! slot is recycled (payload dropped, reusable capacity kept) and parked on
//! the spare list until the next `acquire`. Every release bumps the slot's
//! 64-bit generation, so a handle that outlived its object is detected as
//! stale instead of silently aliasing the next occupant. A handle could only
//! resolve again after 2^64 reuses of its slot.

use std::collections::{TryReserveError, VecDeque};
use thiserror::Error;

/// Clears an object before it is parked on the spare list
///
/// Implementations drop owned payloads and keep allocations that are worth
/// reusing (buffer capacity).
pub trait Recycle {
    fn recycle(&mut self);
}

/// Reference to a pooled object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u64,
}

impl Handle {
    #[inline(always)]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline(always)]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Pool growth failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("pool allocation failed")]
    OutOfMemory,
}

impl From<TryReserveError> for PoolError {
    fn from(_: TryReserveError) -> Self {
        PoolError::OutOfMemory
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u64,
    active: bool,
    value: T,
}

/// Arena of recyclable objects split into active and spare sets
///
/// # Example
/// ```
/// use tickloop::infrastructure::pool::{Recycle, SlotPool};
///
/// #[derive(Default)]
/// struct Buf(Vec<u8>);
///
/// impl Recycle for Buf {
///     fn recycle(&mut self) {
///         self.0.clear();
///     }
/// }
///
/// let mut pool: SlotPool<Buf> = SlotPool::with_capacity(4).unwrap();
/// let handle = pool.acquire().unwrap();
/// pool.get_mut(handle).unwrap().0.extend_from_slice(b"hello");
///
/// let len = pool.release_with(handle, |buf| buf.0.len());
/// assert_eq!(len, Some(5));
/// assert!(pool.get(handle).is_none());
/// ```
#[derive(Debug)]
pub struct SlotPool<T> {
    slots: Vec<Slot<T>>,
    spare: VecDeque<u32>,
    /// Upper bound on allocated slots, `None` for unbounded
    limit: Option<usize>,
}

impl<T> Default for SlotPool<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            spare: VecDeque::new(),
            limit: None,
        }
    }
}

impl<T: Recycle + Default> SlotPool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool with `capacity` objects already parked on the spare list
    pub fn with_capacity(capacity: usize) -> Result<Self, PoolError> {
        let mut pool = Self::new();
        pool.slots.try_reserve_exact(capacity)?;
        pool.spare.try_reserve_exact(capacity)?;
        for index in 0..capacity {
            pool.slots.push(Slot {
                generation: 0,
                active: false,
                value: T::default(),
            });
            pool.spare.push_back(index as u32);
        }
        Ok(pool)
    }

    /// Take an object out of the spare list, growing the arena if it is empty
    ///
    /// The object is in its recycled state.
    #[inline]
    pub fn acquire(&mut self) -> Result<Handle, PoolError> {
        self.acquire_mut().map(|(handle, _)| handle)
    }

    /// Like `acquire`, also lending the object for initialisation
    pub fn acquire_mut(&mut self) -> Result<(Handle, &mut T), PoolError> {
        let index = match self.spare.pop_front() {
            Some(index) => index,
            None => {
                if self.limit.is_some_and(|limit| self.slots.len() >= limit) {
                    return Err(PoolError::OutOfMemory);
                }
                let index =
                    u32::try_from(self.slots.len()).map_err(|_| PoolError::OutOfMemory)?;
                self.slots.try_reserve(1)?;
                // Keep room so that a later release never has to allocate.
                self.spare.try_reserve(self.slots.len() + 1)?;
                self.slots.push(Slot {
                    generation: 0,
                    active: false,
                    value: T::default(),
                });
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.active = true;
        let handle = Handle {
            index,
            generation: slot.generation,
        };
        Ok((handle, &mut slot.value))
    }

    /// Recycle an active object and park it on the spare list
    ///
    /// `extract` sees the object before it is recycled and can move payload
    /// out of it. Returns `None` for a stale handle.
    pub fn release_with<R, F>(&mut self, handle: Handle, extract: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let slot = self.live_slot_mut(handle)?;
        let out = extract(&mut slot.value);
        slot.value.recycle();
        slot.active = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.spare.push_back(handle.index);
        Some(out)
    }

    /// Recycle an active object, discarding its payload
    #[inline]
    pub fn release(&mut self, handle: Handle) -> bool {
        self.release_with(handle, |_| ()).is_some()
    }
}

impl<T> SlotPool<T> {
    #[inline]
    fn live_slot_mut(&mut self, handle: Handle) -> Option<&mut Slot<T>> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.active && slot.generation == handle.generation)
    }

    /// Borrow an active object
    #[inline]
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.active && slot.generation == handle.generation)
            .map(|slot| &slot.value)
    }

    /// Mutably borrow an active object
    #[inline]
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.live_slot_mut(handle).map(|slot| &mut slot.value)
    }

    /// Whether the handle still refers to a live object
    #[inline]
    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Number of objects handed out
    #[inline]
    pub fn active_len(&self) -> usize {
        self.slots.len() - self.spare.len()
    }

    /// Number of recycled objects waiting for reuse
    #[inline]
    pub fn spare_len(&self) -> usize {
        self.spare.len()
    }

    /// Total number of objects ever allocated by this pool
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Refuse to grow past `limit` allocated objects
    ///
    /// Spare objects are still handed out once the limit is reached; only
    /// growth fails, with `PoolError::OutOfMemory`. Already allocated objects
    /// are never dropped by lowering the limit.
    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    /// Drop every object, active and spare
    pub fn clear(&mut self) {
        self.slots.clear();
        self.spare.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Buf {
        data: Vec<u8>,
        recycled: u32,
    }

    impl Recycle for Buf {
        fn recycle(&mut self) {
            self.data.clear();
            self.recycled += 1;
        }
    }

    #[test]
    fn test_pool_creation() {
        let pool: SlotPool<Buf> = SlotPool::with_capacity(100).unwrap();
        assert_eq!(pool.spare_len(), 100);
        assert_eq!(pool.capacity(), 100);
        assert_eq!(pool.active_len(), 0);
    }

    #[test]
    fn test_acquire_release() {
        let mut pool: SlotPool<Buf> = SlotPool::with_capacity(10).unwrap();

        let handles: Vec<_> = (0..10).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.spare_len(), 0);
        assert_eq!(pool.active_len(), 10);

        for handle in handles {
            assert!(pool.release(handle));
        }
        assert_eq!(pool.spare_len(), 10);
        assert_eq!(pool.capacity(), 10);
    }

    #[test]
    fn test_grows_when_spare_empty() {
        let mut pool: SlotPool<Buf> = SlotPool::new();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a.index(), b.index());
        assert_eq!(pool.capacity(), 2);
    }

    #[test]
    fn test_stale_handle_rejected() {
        let mut pool: SlotPool<Buf> = SlotPool::new();
        let handle = pool.acquire().unwrap();
        assert!(pool.release(handle));

        assert!(!pool.release(handle));
        assert!(pool.get(handle).is_none());
        assert!(!pool.contains(handle));

        // The slot is reused under a new generation; the old handle stays dead.
        let again = pool.acquire().unwrap();
        assert_eq!(again.index(), handle.index());
        assert_ne!(again.generation(), handle.generation());
        assert!(pool.get(handle).is_none());
        assert!(pool.get(again).is_some());
    }

    #[test]
    fn test_release_recycles_and_keeps_capacity() {
        let mut pool: SlotPool<Buf> = SlotPool::new();
        let handle = pool.acquire().unwrap();
        pool.get_mut(handle).unwrap().data.extend_from_slice(&[1u8; 256]);

        let extracted = pool.release_with(handle, |buf| buf.data.len()).unwrap();
        assert_eq!(extracted, 256);

        let again = pool.acquire().unwrap();
        let buf = pool.get(again).unwrap();
        assert!(buf.data.is_empty());
        assert!(buf.data.capacity() >= 256);
        assert_eq!(buf.recycled, 1);
    }

    #[test]
    fn test_spare_reuse_is_fifo() {
        let mut pool: SlotPool<Buf> = SlotPool::new();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.release(b);
        pool.release(a);

        assert_eq!(pool.acquire().unwrap().index(), b.index());
        assert_eq!(pool.acquire().unwrap().index(), a.index());
    }

    #[test]
    fn test_no_growth_under_churn() {
        let mut pool: SlotPool<Buf> = SlotPool::with_capacity(1).unwrap();
        for _ in 0..1000 {
            let handle = pool.acquire().unwrap();
            pool.release(handle);
        }
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn test_limit_stops_growth_not_reuse() {
        let mut pool: SlotPool<Buf> = SlotPool::new();
        pool.set_limit(Some(2));

        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert_eq!(pool.acquire(), Err(PoolError::OutOfMemory));
        assert_eq!(pool.capacity(), 2);

        pool.release(a);
        assert!(pool.acquire().is_ok());

        pool.set_limit(None);
        assert!(pool.acquire().is_ok());
        assert_eq!(pool.capacity(), 3);
    }

    #[test]
    fn test_clear() {
        let mut pool: SlotPool<Buf> = SlotPool::with_capacity(3).unwrap();
        let handle = pool.acquire().unwrap();
        pool.clear();
        assert_eq!(pool.capacity(), 0);
        assert!(pool.get(handle).is_none());
    }
}
