// Frame bookkeeping
//
// The frame-in-flight slot and the acquired swapchain image index are two
// independent cycling counters. Keeping them as distinct types stops one
// from being used to index the other's arrays.

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Index of an acquired swapchain image. Valid for swapchain-image-sized
/// arrays: framebuffers, command buffers, the image owner table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageIndex(pub u32);

impl ImageIndex {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Index of a frame-in-flight slot. Valid for slot-sized arrays:
/// semaphore pairs and in-flight fences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSlot(usize);

impl FrameSlot {
    pub fn first() -> Self {
        FrameSlot(0)
    }

    pub fn next(self) -> Self {
        FrameSlot((self.0 + 1) % MAX_FRAMES_IN_FLIGHT)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// One value per swapchain image, indexable only by `ImageIndex`.
pub struct PerImage<T> {
    items: Vec<T>,
}

impl<T> PerImage<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> std::ops::Index<ImageIndex> for PerImage<T> {
    type Output = T;

    fn index(&self, index: ImageIndex) -> &T {
        &self.items[index.as_usize()]
    }
}

impl<T> std::ops::IndexMut<ImageIndex> for PerImage<T> {
    fn index_mut(&mut self, index: ImageIndex) -> &mut T {
        &mut self.items[index.as_usize()]
    }
}

/// One value per frame-in-flight slot, indexable only by `FrameSlot`.
pub struct PerFrame<T> {
    items: Vec<T>,
}

impl<T> PerFrame<T> {
    pub fn new<E>(mut init: impl FnMut(FrameSlot) -> Result<T, E>) -> Result<Self, E> {
        let mut items = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for i in 0..MAX_FRAMES_IN_FLIGHT {
            items.push(init(FrameSlot(i))?);
        }
        Ok(Self { items })
    }
}

impl<T> std::ops::Index<FrameSlot> for PerFrame<T> {
    type Output = T;

    fn index(&self, slot: FrameSlot) -> &T {
        &self.items[slot.index()]
    }
}

impl<T> std::ops::IndexMut<FrameSlot> for PerFrame<T> {
    fn index_mut(&mut self, slot: FrameSlot) -> &mut T {
        &mut self.items[slot.index()]
    }
}

/// Tracks the cycling frame slot and which slot last submitted work
/// targeting each swapchain image.
///
/// An image index can come around again before its previous user's slot
/// has cycled back, so the owner table is what gates image reuse, not the
/// slot fence alone.
pub struct FrameSequencer {
    current: FrameSlot,
    image_owners: Vec<Option<FrameSlot>>,
}

impl FrameSequencer {
    pub fn new(image_count: usize) -> Self {
        Self {
            current: FrameSlot::first(),
            image_owners: vec![None; image_count],
        }
    }

    pub fn current(&self) -> FrameSlot {
        self.current
    }

    pub fn image_count(&self) -> usize {
        self.image_owners.len()
    }

    /// Advances the slot counter. Called once per present attempt,
    /// successful or not.
    pub fn advance(&mut self) {
        self.current = self.current.next();
    }

    /// Which slot's submission last targeted this image, if any.
    pub fn image_owner(&self, image: ImageIndex) -> Option<FrameSlot> {
        self.image_owners[image.as_usize()]
    }

    /// Claims `image` for the current slot and returns the previous owner,
    /// whose fence must be waited on before the image is reused.
    pub fn claim(&mut self, image: ImageIndex) -> Option<FrameSlot> {
        self.image_owners[image.as_usize()].replace(self.current)
    }

    /// Clears ownership after a swapchain rebuild. The image count may
    /// have changed; the slot counter keeps cycling where it was.
    pub fn reset_images(&mut self, image_count: usize) {
        self.image_owners.clear();
        self.image_owners.resize(image_count, None);
    }
}

/// Resize bookkeeping. Size changes land here as generation bumps; the
/// frame loop consumes them when it is safe to rebuild the swapchain.
pub struct SizeTracker {
    width: u32,
    height: u32,
    generation: u64,
    processed_generation: u64,
}

impl SizeTracker {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            generation: 0,
            processed_generation: 0,
        }
    }

    /// Records a new framebuffer size. Every call bumps the generation;
    /// collapsing duplicates is the consumer's job via `mark_processed`.
    pub fn record(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.generation += 1;
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// True while a recorded size has not been handled yet.
    pub fn pending(&self) -> bool {
        self.generation != self.processed_generation
    }

    /// True when the current size cannot back a swapchain (minimized).
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Marks everything recorded so far as handled.
    pub fn mark_processed(&mut self) {
        self.processed_generation = self.generation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_cycles_through_frames_in_flight() {
        let mut slot = FrameSlot::first();
        assert_eq!(slot.index(), 0);

        for n in 1..=8 {
            slot = slot.next();
            assert_eq!(slot.index(), n % MAX_FRAMES_IN_FLIGHT);
        }
    }

    #[test]
    fn sequencer_advances_once_per_present() {
        let mut seq = FrameSequencer::new(3);
        for n in 0..10u64 {
            assert_eq!(seq.current().index(), (n as usize) % MAX_FRAMES_IN_FLIGHT);
            seq.advance();
        }
    }

    #[test]
    fn claim_reports_previous_owner() {
        let mut seq = FrameSequencer::new(3);
        let image = ImageIndex(1);

        assert_eq!(seq.image_owner(image), None);
        assert_eq!(seq.claim(image), None);

        let first_owner = seq.current();
        seq.advance();
        // Same image acquired again on the next slot.
        assert_eq!(seq.claim(image), Some(first_owner));
        assert_eq!(seq.image_owner(image), Some(seq.current()));
    }

    #[test]
    fn reset_images_clears_owners_but_keeps_slot() {
        let mut seq = FrameSequencer::new(2);
        seq.claim(ImageIndex(0));
        seq.advance();
        let slot_before = seq.current();

        seq.reset_images(4);
        assert_eq!(seq.image_count(), 4);
        assert_eq!(seq.current(), slot_before);
        for i in 0..4 {
            assert_eq!(seq.image_owner(ImageIndex(i)), None);
        }
    }

    #[test]
    fn size_tracker_starts_settled() {
        let tracker = SizeTracker::new(800, 600);
        assert!(!tracker.pending());
        assert_eq!(tracker.size(), (800, 600));
    }

    #[test]
    fn repeated_resizes_need_one_processing_pass() {
        let mut tracker = SizeTracker::new(800, 600);
        tracker.record(1024, 768);
        tracker.record(1024, 768);
        tracker.record(1024, 768);

        assert!(tracker.pending());
        tracker.mark_processed();
        assert!(!tracker.pending());
    }

    #[test]
    fn latest_size_wins_across_degenerate_updates() {
        let mut tracker = SizeTracker::new(800, 600);
        tracker.record(800, 600);
        tracker.record(0, 0);
        assert!(tracker.is_degenerate());

        tracker.record(1024, 768);
        assert!(tracker.pending());
        assert!(!tracker.is_degenerate());
        assert_eq!(tracker.size(), (1024, 768));

        tracker.mark_processed();
        assert!(!tracker.pending());
    }

    #[test]
    fn degenerate_size_stays_pending_until_restored() {
        let mut tracker = SizeTracker::new(800, 600);
        tracker.record(0, 300);

        // A minimized window keeps the resize pending across frames.
        assert!(tracker.pending());
        assert!(tracker.is_degenerate());

        tracker.record(640, 480);
        assert!(tracker.pending());
        tracker.mark_processed();
        assert!(!tracker.pending());
    }

    #[test]
    fn per_image_indexes_by_image_index() {
        let mut per_image = PerImage::new(vec![10, 20, 30]);
        assert_eq!(per_image.len(), 3);
        assert_eq!(per_image[ImageIndex(1)], 20);

        per_image[ImageIndex(2)] = 33;
        assert_eq!(per_image[ImageIndex(2)], 33);
    }

    #[test]
    fn per_frame_holds_one_slot_each() {
        let per_frame: PerFrame<usize> =
            PerFrame::new(|slot| Ok::<_, ()>(slot.index() * 100)).unwrap();
        assert_eq!(per_frame[FrameSlot::first()], 0);
        assert_eq!(per_frame[FrameSlot::first().next()], 100);
    }
}
