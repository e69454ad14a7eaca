use std::collections::VecDeque;

/// Keeps the most recent `capacity` bytes received on a session.
#[derive(Debug)]
pub struct RecentBytes {
    buf: VecDeque<u8>,
    capacity: usize,
    /// Bytes pushed over the lifetime of the cache, evicted ones included.
    seen: u64,
}

impl RecentBytes {
    pub fn new(capacity: usize) -> Self {
        Self {
            // Grows on demand; the configured cache can be far larger than what a run receives.
            buf: VecDeque::with_capacity(capacity.min(64 * 1024)),
            capacity,
            seen: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.seen += data.len() as u64;
        if self.capacity == 0 {
            return;
        }

        let data = if data.len() > self.capacity {
            &data[data.len() - self.capacity..]
        } else {
            data
        };
        let overflow = (self.buf.len() + data.len()).saturating_sub(self.capacity);
        self.buf.drain(..overflow);
        self.buf.extend(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }

    #[cfg(test)]
    pub fn contents(&self) -> Vec<u8> {
        self.buf.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_only_the_tail() {
        let mut cache = RecentBytes::new(5);
        cache.push(b"abc");
        cache.push(b"defg");
        assert_eq!(cache.contents(), b"cdefg");
        assert_eq!(cache.seen(), 7);

        cache.push(b"0123456789");
        assert_eq!(cache.contents(), b"56789");
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn test_zero_capacity_only_counts() {
        let mut cache = RecentBytes::new(0);
        cache.push(b"abc");
        assert!(cache.is_empty());
        assert_eq!(cache.seen(), 3);
    }
}
