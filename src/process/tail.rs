use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Default number of output lines retained per process.
pub const DEFAULT_LOG_CAPACITY: usize = 50;

/// Fixed-capacity log ring, oldest line evicted first.
#[derive(Debug)]
pub struct LogTail {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl LogTail {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Copy of the tail, most recent line last.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for LogTail {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_evicts_oldest() {
        let tail = LogTail::default();
        for i in 0..60 {
            tail.push(format!("line-{:02}", i));
        }

        let lines = tail.snapshot();
        assert_eq!(lines.len(), 50);
        assert_eq!(lines.first().map(String::as_str), Some("line-10"));
        assert_eq!(lines.last().map(String::as_str), Some("line-59"));
    }

    #[test]
    fn test_tail_below_capacity_keeps_everything() {
        let tail = LogTail::new(3);
        tail.push("a");
        tail.push("b");
        assert_eq!(tail.snapshot(), vec!["a", "b"]);
    }

    #[test]
    fn test_zero_capacity_still_keeps_latest() {
        let tail = LogTail::new(0);
        tail.push("a");
        tail.push("b");
        assert_eq!(tail.snapshot(), vec!["b"]);
    }
}
