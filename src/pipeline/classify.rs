//! Size-based routing between in-process and server-side compression.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default size at which files stop being compressed in-process: 20 MiB.
pub const DEFAULT_LOCAL_THRESHOLD: u64 = 20 * 1024 * 1024;

/// Where a compression attempt runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// In the calling process; the document never leaves the machine.
    Local,
    /// On the remote compression endpoint.
    Remote,
}

impl ExecutionMode {
    /// The mode a fallback attempt uses.
    pub fn other(self) -> Self {
        match self {
            ExecutionMode::Local => ExecutionMode::Remote,
            ExecutionMode::Remote => ExecutionMode::Local,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Local => "local",
            ExecutionMode::Remote => "remote",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the execution mode for a file of `file_size_bytes`.
///
/// `Local` when strictly below `threshold`, `Remote` otherwise. Pure and
/// total: the same inputs always give the same mode.
pub fn classify(file_size_bytes: u64, threshold: u64) -> ExecutionMode {
    if file_size_bytes < threshold {
        ExecutionMode::Local
    } else {
        ExecutionMode::Remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_at_threshold() {
        let t = DEFAULT_LOCAL_THRESHOLD;
        assert_eq!(classify(t - 1, t), ExecutionMode::Local);
        assert_eq!(classify(t, t), ExecutionMode::Remote);
        assert_eq!(classify(t + 1, t), ExecutionMode::Remote);
    }

    #[test]
    fn extremes() {
        assert_eq!(classify(0, DEFAULT_LOCAL_THRESHOLD), ExecutionMode::Local);
        assert_eq!(classify(u64::MAX, DEFAULT_LOCAL_THRESHOLD), ExecutionMode::Remote);
        assert_eq!(classify(0, 1), ExecutionMode::Local);
        assert_eq!(classify(1, 1), ExecutionMode::Remote);
    }

    #[test]
    fn deterministic_over_a_sweep() {
        let threshold = 5 * 1024 * 1024;
        for size in (0..12 * 1024 * 1024u64).step_by(333_333) {
            let first = classify(size, threshold);
            for _ in 0..3 {
                assert_eq!(classify(size, threshold), first);
            }
            assert_eq!(first == ExecutionMode::Local, size < threshold);
        }
    }

    #[test]
    fn other_flips_mode() {
        assert_eq!(ExecutionMode::Local.other(), ExecutionMode::Remote);
        assert_eq!(ExecutionMode::Remote.other(), ExecutionMode::Local);
        assert_eq!(ExecutionMode::Remote.to_string(), "remote");
    }
}
