//! Sequence Number Handling
//!
//! Outbound sequence numbers are per connection. The counter resets to zero
//! only when it sits exactly at the ceiling, then increments, so the first
//! number after a wrap is 1, the same as on a fresh connection. This
//! exact-match reset is legacy behaviour that peers rely on and is kept
//! rather than replaced with modular arithmetic.

/// Default sequence ceiling (24 bits)
pub const MAX_SEQUENCE: u32 = 0x00FF_FFFF;

/// Outbound sequence counter for one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceCounter {
    current: u32,
    ceiling: u32,
}

impl SequenceCounter {
    /// Create a counter with the default ceiling
    pub fn new() -> Self {
        Self::with_ceiling(MAX_SEQUENCE)
    }

    /// Create a counter that resets after reaching `ceiling`
    ///
    /// # Panics
    /// Panics if `ceiling` is zero
    pub fn with_ceiling(ceiling: u32) -> Self {
        assert!(ceiling > 0, "Sequence ceiling must be non-zero");
        SequenceCounter {
            current: 0,
            ceiling,
        }
    }

    /// Last number handed out (0 before the first send)
    #[inline]
    pub fn current(&self) -> u32 {
        self.current
    }

    #[inline]
    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// The value [`next`](Self::next) would return, without advancing
    pub fn peek(&self) -> u32 {
        if self.current == self.ceiling {
            1
        } else {
            self.current + 1
        }
    }

    /// Advance and return the next sequence number
    pub fn next(&mut self) -> u32 {
        if self.current == self.ceiling {
            self.current = 0;
        }
        self.current += 1;
        self.current
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_one() {
        let mut seq = SequenceCounter::new();
        assert_eq!(seq.current(), 0);
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
        assert_eq!(seq.current(), 2);
    }

    #[test]
    fn test_peek_does_not_advance() {
        let mut seq = SequenceCounter::with_ceiling(2);
        assert_eq!(seq.peek(), 1);
        assert_eq!(seq.peek(), 1);
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
        assert_eq!(seq.peek(), 1);
        assert_eq!(seq.next(), 1);
    }

    #[test]
    fn test_wraparound_at_ceiling() {
        let mut seq = SequenceCounter::with_ceiling(3);
        let issued: Vec<u32> = (0..7).map(|_| seq.next()).collect();
        assert_eq!(issued, vec![1, 2, 3, 1, 2, 3, 1]);
    }

    #[test]
    fn test_default_ceiling() {
        let mut seq = SequenceCounter::new();
        seq.current = MAX_SEQUENCE - 1;
        assert_eq!(seq.next(), MAX_SEQUENCE);
        assert_eq!(seq.next(), 1);
    }

    #[test]
    fn test_max_u32_ceiling_does_not_overflow() {
        let mut seq = SequenceCounter::with_ceiling(u32::MAX);
        seq.current = u32::MAX - 1;
        assert_eq!(seq.next(), u32::MAX);
        assert_eq!(seq.next(), 1);
    }

    #[test]
    #[should_panic]
    fn test_zero_ceiling() {
        SequenceCounter::with_ceiling(0);
    }
}
