//! Deferred destruction of GPU objects the frames in flight may still use.

/// Ring of per-frame buckets. An object pushed during frame `f` lands in
/// bucket `f mod N` and is dropped when the ring comes back around to that
/// bucket, i.e. after `N` frame advances.
pub struct RetireRing<T> {
    buckets: Vec<Vec<T>>,
    frame: u64,
}

impl<T> RetireRing<T> {
    /// `frames_in_flight` is clamped to at least one bucket.
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            buckets: (0..frames_in_flight.max(1)).map(|_| Vec::new()).collect(),
            frame: 0,
        }
    }

    fn current(&self) -> usize {
        (self.frame % self.buckets.len() as u64) as usize
    }

    pub fn push(&mut self, object: T) {
        let index = self.current();
        self.buckets[index].push(object);
    }

    /// Rotate to the next frame and drop everything retired `N` frames ago.
    /// Returns how many objects were freed.
    pub fn advance(&mut self) -> usize {
        self.frame += 1;
        let index = self.current();
        let freed = self.buckets[index].len();
        self.buckets[index].clear();
        freed
    }

    /// Drop everything now. Only valid once the device is idle.
    pub fn drain(&mut self) -> usize {
        self.buckets.iter_mut().map(|bucket| bucket.drain(..).count()).sum()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn pending(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_object_survives_until_ring_wraps() {
        let tracked = Arc::new(());
        let mut ring = RetireRing::new(3);
        ring.push(Arc::clone(&tracked));

        assert_eq!(ring.advance(), 0);
        assert_eq!(ring.advance(), 0);
        assert_eq!(Arc::strong_count(&tracked), 2);
        assert_eq!(ring.advance(), 1);
        assert_eq!(Arc::strong_count(&tracked), 1);
        assert_eq!(ring.pending(), 0);
    }

    #[test]
    fn test_buckets_are_per_frame() {
        let mut ring = RetireRing::new(2);
        ring.push("a");
        ring.push("b");
        ring.advance();
        ring.push("c");
        assert_eq!(ring.pending(), 3);

        assert_eq!(ring.advance(), 2);
        assert_eq!(ring.advance(), 1);
        assert_eq!(ring.frame(), 3);
    }

    #[test]
    fn test_drain_frees_everything() {
        let mut ring = RetireRing::new(2);
        ring.push(1);
        ring.advance();
        ring.push(2);
        assert_eq!(ring.drain(), 2);
        assert_eq!(ring.pending(), 0);
    }

    #[test]
    fn test_zero_frames_clamped() {
        let mut ring = RetireRing::new(0);
        ring.push(7);
        assert_eq!(ring.advance(), 1);
    }
}
