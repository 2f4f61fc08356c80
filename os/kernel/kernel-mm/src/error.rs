use crate::config::HEAPINFO_USER_GROUP_NUM;

const EFAULT: i32 = 14;
const EINVAL: i32 = 22;

/// Failures surfaced synchronously by heap setup and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("region start address is null")]
    NullStart,
    #[error("region size is zero")]
    ZeroSize,
    #[error("aligning region at {start:#x} overflows the address space")]
    AlignmentOverflow { start: usize },
    #[error("region of {size} bytes cannot hold two guard nodes and a free node")]
    RegionTooSmall { size: usize },
    #[error("region of {size} bytes exceeds the maximum chunk size")]
    RegionTooLarge { size: usize },
    #[error("heap already holds {0} regions")]
    TooManyRegions(usize),
    #[error("{0} user groups configured, at most {max} supported", max = HEAPINFO_USER_GROUP_NUM)]
    TooManyGroups(usize),
    #[error("heap corrupted at node {addr:#x}")]
    Corrupted { addr: usize },
}

impl HeapError {
    /// Negative errno equivalent of this error.
    #[must_use]
    pub const fn errno(&self) -> i32 {
        match self {
            Self::Corrupted { .. } => -EFAULT,
            _ => -EINVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(HeapError::ZeroSize.errno(), -22);
        assert_eq!(HeapError::RegionTooSmall { size: 8 }.errno(), -22);
        assert_eq!(HeapError::Corrupted { addr: 0x1000 }.errno(), -14);
    }
}
