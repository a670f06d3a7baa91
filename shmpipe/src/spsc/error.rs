/// Why a queue operation could not proceed.
///
/// `WouldBlock` is the expected, recoverable outcome of a non-blocking call.
/// The other variants are caller bugs: retrying them can never succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// A single transfer asked for more bytes than the queue can ever hold.
    #[error("transfer of {requested} bytes exceeds queue capacity of {capacity} bytes")]
    ExceedsCapacity { requested: usize, capacity: usize },
    /// A commit tried to publish more bytes than are reserved (writer) or
    /// readable (reader).
    #[error("commit of {requested} bytes exceeds the {available} bytes available")]
    CommitOverrun { requested: usize, available: usize },
    /// Not enough free space (writer) or data (reader) right now.
    #[error("operation would block: {requested} bytes requested, {available} available")]
    WouldBlock { requested: usize, available: usize },
}

impl QueueError {
    #[inline]
    pub fn is_would_block(&self) -> bool {
        matches!(self, Self::WouldBlock { .. })
    }

    /// True for misuse that no amount of waiting will fix.
    #[inline]
    pub fn is_contract_violation(&self) -> bool {
        !self.is_would_block()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let would_block = QueueError::WouldBlock {
            requested: 8,
            available: 4,
        };
        assert!(would_block.is_would_block());
        assert!(!would_block.is_contract_violation());

        let too_big = QueueError::ExceedsCapacity {
            requested: 2000,
            capacity: 1024,
        };
        assert!(too_big.is_contract_violation());
        assert_eq!(
            too_big.to_string(),
            "transfer of 2000 bytes exceeds queue capacity of 1024 bytes"
        );
    }
}
