//! Fixed-capacity sample ring buffer between the network and the playback loop
//!
//! Writers never block: when full, the oldest samples are overwritten.
//! Readers take whatever is available. Closing is one-way.

use parking_lot::Mutex;

struct RingState {
    buf: Vec<i16>,
    head: usize,
    tail: usize,
    count: usize,
    closed: bool,
}

pub struct RingBuffer {
    state: Mutex<RingState>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                buf: vec![0; capacity.max(1)],
                head: 0,
                tail: 0,
                count: 0,
                closed: false,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().buf.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append samples, dropping the oldest on overflow; ignored once closed
    pub fn write(&self, samples: &[i16]) {
        let mut s = self.state.lock();
        if s.closed {
            return;
        }
        let capacity = s.buf.len();
        for &sample in samples {
            let tail = s.tail;
            s.buf[tail] = sample;
            s.tail = (tail + 1) % capacity;
            if s.count == capacity {
                s.head = (s.head + 1) % capacity;
            } else {
                s.count += 1;
            }
        }
    }

    /// Copy up to `dst.len()` samples out; `None` once closed
    pub fn read_partial(&self, dst: &mut [i16]) -> Option<usize> {
        let mut s = self.state.lock();
        if s.closed {
            return None;
        }
        let capacity = s.buf.len();
        let n = dst.len().min(s.count);
        for slot in dst.iter_mut().take(n) {
            *slot = s.buf[s.head];
            s.head = (s.head + 1) % capacity;
        }
        s.count -= n;
        Some(n)
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overwrite_keeps_newest() {
        let ring = RingBuffer::new(3);
        ring.write(&[1, 2, 3, 4, 5]);

        let mut out = [0i16; 5];
        assert_eq!(ring.read_partial(&mut out), Some(3));
        assert_eq!(&out[..3], &[3, 4, 5]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_partial_reads_preserve_order() {
        let ring = RingBuffer::new(8);
        ring.write(&[1, 2, 3]);

        let mut out = [0i16; 2];
        assert_eq!(ring.read_partial(&mut out), Some(2));
        assert_eq!(out, [1, 2]);

        ring.write(&[4]);
        assert_eq!(ring.read_partial(&mut out), Some(2));
        assert_eq!(out, [3, 4]);
        assert_eq!(ring.read_partial(&mut out), Some(0));
    }

    #[test]
    fn test_wraparound() {
        let ring = RingBuffer::new(4);
        let mut out = [0i16; 3];
        ring.write(&[1, 2, 3]);
        ring.read_partial(&mut out);
        ring.write(&[4, 5, 6]);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.read_partial(&mut out), Some(3));
        assert_eq!(out, [4, 5, 6]);
    }

    #[test]
    fn test_close_is_one_way() {
        let ring = RingBuffer::new(4);
        ring.write(&[1, 2]);
        ring.close();
        ring.write(&[3]);

        let mut out = [0i16; 4];
        assert_eq!(ring.read_partial(&mut out), None);
        assert!(ring.is_closed());
    }
}
