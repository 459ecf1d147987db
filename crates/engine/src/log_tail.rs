//! Bounded FIFO of raw log lines for the log viewer

use std::collections::VecDeque;

/// Default number of lines retained per run view
pub const DEFAULT_LOG_CAPACITY: usize = 2000;

/// Arrival-ordered line buffer that evicts the oldest line when full.
#[derive(Debug, Clone)]
pub struct LogTailBuffer {
    lines: VecDeque<String>,
    capacity: usize,
    evicted: u64,
}

impl Default for LogTailBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogTailBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity,
            evicted: 0,
        }
    }

    pub fn append(&mut self, line: impl Into<String>) -> &mut Self {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
            self.evicted += 1;
        }
        self.lines.push_back(line.into());
        self
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lines dropped since the last clear
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.evicted = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_past_capacity() {
        let mut buffer = LogTailBuffer::default();
        for i in 0..=DEFAULT_LOG_CAPACITY {
            buffer.append(format!("line {}", i));
        }

        assert_eq!(buffer.len(), DEFAULT_LOG_CAPACITY);
        assert_eq!(buffer.evicted(), 1);
        assert_eq!(buffer.lines().next(), Some("line 1"));
        assert_eq!(buffer.lines().last(), Some("line 2000"));
    }

    #[test]
    fn test_keeps_duplicates_in_arrival_order() {
        let mut buffer = LogTailBuffer::new(3);
        buffer.append("b").append("a").append("b");
        assert_eq!(buffer.to_vec(), vec!["b", "a", "b"]);

        buffer.append("c");
        assert_eq!(buffer.to_vec(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_zero_capacity_keeps_latest_line() {
        let mut buffer = LogTailBuffer::new(0);
        buffer.append("first").append("second");
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.to_vec(), vec!["second"]);
    }
}
