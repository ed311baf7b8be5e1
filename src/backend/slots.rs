// Fixed-capacity slot storage
//
// Swap chain images and in-flight frames live in bounded arrays that never
// reallocate during steady-state rendering. Indexing is bounds-checked.

use crate::error::{PresentError, Result};

/// Upper bound on swap chain images tracked per swap chain.
pub const IMAGE_SLOT_CAPACITY: usize = 3;

/// In-flight depth: number of frames pipelined between CPU and GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Bounded, index-addressed container. Storage is reserved up front and
/// `push` fails instead of growing past `CAP`.
pub struct SlotArray<T, const CAP: usize> {
    items: Vec<T>,
}

impl<T, const CAP: usize> SlotArray<T, CAP> {
    pub fn new() -> Self {
        Self {
            items: Vec::with_capacity(CAP),
        }
    }

    /// Append a slot, returning its index.
    pub fn push(&mut self, item: T) -> Result<usize> {
        if self.items.len() >= CAP {
            return Err(PresentError::SlotCapacity {
                len: self.items.len() + 1,
                capacity: CAP,
            });
        }
        self.items.push(item);
        Ok(self.items.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        CAP
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)
    }

    /// Bounds-checked access that reports the offending index.
    pub fn slot(&self, index: usize) -> Result<&T> {
        self.items.get(index).ok_or_else(|| {
            PresentError::InvalidState(format!(
                "slot {} out of range ({} live)",
                index,
                self.items.len()
            ))
        })
    }

    /// Two distinct slots borrowed mutably at once.
    pub fn pair_mut(&mut self, a: usize, b: usize) -> Option<(&mut T, &mut T)> {
        if a == b || a >= self.items.len() || b >= self.items.len() {
            return None;
        }
        if a < b {
            let (lo, hi) = self.items.split_at_mut(b);
            Some((&mut lo[a], &mut hi[0]))
        } else {
            let (lo, hi) = self.items.split_at_mut(a);
            Some((&mut hi[0], &mut lo[b]))
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    /// Remove every slot, newest first. Calling this on an empty array is a no-op.
    pub fn drain_reverse(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..).rev()
    }
}

impl<T, const CAP: usize> Default for SlotArray<T, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks which swap chain image the orchestrator is working on.
///
/// An acquire signals the semaphore held by the current slot. The driver may
/// hand images back in any order, so when it returns a different image the
/// semaphores of the two slots are swapped and the cursor jumps to the
/// returned index. After present the cursor steps to the next slot, whose
/// semaphore was consumed by an earlier submit, so consecutive acquires never
/// signal the same semaphore.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AcquireCursor {
    current: usize,
}

impl AcquireCursor {
    pub fn new() -> Self {
        Self { current: 0 }
    }

    /// Slot whose semaphore the next acquire must signal.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Record the index returned by acquire and re-pair the semaphore selected
    /// by `semaphore` so it ends up on slot `acquired`.
    pub fn settle<T, S, F, const CAP: usize>(
        &mut self,
        slots: &mut SlotArray<T, CAP>,
        acquired: usize,
        mut semaphore: F,
    ) -> Result<()>
    where
        F: FnMut(&mut T) -> &mut S,
    {
        if acquired >= slots.len() {
            return Err(PresentError::InvalidState(format!(
                "acquire returned image {} but only {} slots are live",
                acquired,
                slots.len()
            )));
        }

        if acquired != self.current {
            if let Some((signaled, target)) = slots.pair_mut(self.current, acquired) {
                std::mem::swap(semaphore(signaled), semaphore(target));
            }
            self.current = acquired;
        }
        Ok(())
    }

    /// Step past the image just presented (or abandoned).
    pub fn advance(&mut self, image_count: usize) {
        if image_count > 0 {
            self.current = (self.current + 1) % image_count;
        }
    }

    /// Forget image ordering after the swap chain was rebuilt.
    pub fn reset(&mut self) {
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slot {
        image: u32,
        semaphore: u64,
    }

    fn ring(count: u32) -> SlotArray<Slot, IMAGE_SLOT_CAPACITY> {
        let mut slots = SlotArray::new();
        for i in 0..count {
            slots
                .push(Slot {
                    image: i,
                    semaphore: 100 + i as u64,
                })
                .unwrap();
        }
        slots
    }

    #[test]
    fn push_past_capacity_fails() {
        let mut slots = ring(3);
        let err = slots
            .push(Slot {
                image: 9,
                semaphore: 9,
            })
            .unwrap_err();
        assert!(matches!(err, PresentError::SlotCapacity { len: 4, capacity: 3 }));
        assert_eq!(slots.len(), 3);
    }

    #[test]
    fn out_of_range_slot_is_an_error() {
        let slots = ring(2);
        assert!(slots.slot(1).is_ok());
        assert!(slots.slot(2).is_err());
        assert!(slots.get(5).is_none());
    }

    #[test]
    fn pair_mut_rejects_aliasing() {
        let mut slots = ring(3);
        assert!(slots.pair_mut(1, 1).is_none());
        assert!(slots.pair_mut(0, 3).is_none());
        let (a, b) = slots.pair_mut(2, 0).unwrap();
        assert_eq!((a.image, b.image), (2, 0));
    }

    #[test]
    fn drain_reverse_is_idempotent() {
        let mut slots = ring(3);
        let order: Vec<u32> = slots.drain_reverse().map(|s| s.image).collect();
        assert_eq!(order, vec![2, 1, 0]);
        assert_eq!(slots.drain_reverse().count(), 0);
        assert!(slots.is_empty());
    }

    #[test]
    fn in_order_acquire_keeps_pairing() {
        let mut slots = ring(3);
        let mut cursor = AcquireCursor::new();
        cursor.settle(&mut slots, 0, |s| &mut s.semaphore).unwrap();
        assert_eq!(cursor.current(), 0);
        assert_eq!(slots.get(0).unwrap().semaphore, 100);
    }

    #[test]
    fn semaphore_follows_the_acquired_image() {
        let mut slots = ring(3);
        let mut cursor = AcquireCursor::new();

        // The driver signals the semaphore on the current slot but returns image 2.
        let signaled = slots.get(cursor.current()).unwrap().semaphore;
        cursor.settle(&mut slots, 2, |s| &mut s.semaphore).unwrap();

        assert_eq!(cursor.current(), 2);
        assert_eq!(slots.get(2).unwrap().semaphore, signaled);
        // The displaced semaphore moved to the previously tracked slot.
        assert_eq!(slots.get(0).unwrap().semaphore, 102);
        assert_eq!(slots.get(1).unwrap().semaphore, 101);
    }

    #[test]
    fn semaphore_ownership_round_trips_over_many_acquires() {
        let mut slots = ring(3);
        let mut cursor = AcquireCursor::new();
        let returned = [1usize, 1, 0, 2, 2, 1, 0, 0, 2];

        for &index in &returned {
            let signaled = slots.get(cursor.current()).unwrap().semaphore;
            cursor.settle(&mut slots, index, |s| &mut s.semaphore).unwrap();
            assert_eq!(slots.get(index).unwrap().semaphore, signaled);
            cursor.advance(slots.len());
        }

        // No semaphore was lost or duplicated.
        let mut all: Vec<u64> = slots.iter().map(|s| s.semaphore).collect();
        all.sort_unstable();
        assert_eq!(all, vec![100, 101, 102]);
    }

    /// Acquire `returned` in order, presenting after each, and collect the
    /// semaphore each acquire signaled.
    fn signaled_sequence(returned: &[usize]) -> Vec<u64> {
        let mut slots = ring(3);
        let mut cursor = AcquireCursor::new();
        returned
            .iter()
            .map(|&index| {
                let signaled = slots.get(cursor.current()).unwrap().semaphore;
                cursor.settle(&mut slots, index, |s| &mut s.semaphore).unwrap();
                cursor.advance(slots.len());
                signaled
            })
            .collect()
    }

    #[test]
    fn consecutive_acquires_signal_distinct_semaphores() {
        let in_order = signaled_sequence(&[0, 1, 2, 0, 1, 2]);
        assert_eq!(in_order, vec![100, 101, 102, 100, 101, 102]);

        let shuffled = signaled_sequence(&[1, 1, 0, 2, 2, 1, 0, 0, 2]);
        for pair in shuffled.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn advance_wraps_and_ignores_empty_ring() {
        let mut cursor = AcquireCursor::new();
        cursor.advance(2);
        assert_eq!(cursor.current(), 1);
        cursor.advance(2);
        assert_eq!(cursor.current(), 0);
        cursor.advance(0);
        assert_eq!(cursor.current(), 0);
    }

    #[test]
    fn settle_rejects_unknown_image() {
        let mut slots = ring(2);
        let mut cursor = AcquireCursor::new();
        assert!(cursor.settle(&mut slots, 2, |s| &mut s.semaphore).is_err());
        assert_eq!(cursor.current(), 0);
    }
}
