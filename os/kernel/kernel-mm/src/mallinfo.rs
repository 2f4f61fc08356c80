use crate::error::HeapError;
use crate::heap::Heap;
use crate::task::Scheduler;

/// Heap usage figures in the classic `mallinfo` shape.
///
/// `uordblks + fordblks == arena` always holds; guard nodes count as
/// allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MallInfo {
    /// Bytes under management.
    pub arena: usize,
    /// Number of free chunks.
    pub ordblks: usize,
    /// Largest free chunk.
    pub mxordblk: usize,
    /// Bytes in allocated chunks.
    pub uordblks: usize,
    /// Bytes in free chunks.
    pub fordblks: usize,
}

impl Heap {
    /// Walks every region and totals allocated and free chunks.
    ///
    /// # Errors
    /// [`HeapError::Corrupted`] if a region can't be walked.
    pub fn mallinfo<S: Scheduler + ?Sized>(&self, sched: &S) -> Result<MallInfo, HeapError> {
        let mut info = MallInfo::default();
        self.walk(sched, |_, node| {
            if node.allocated {
                info.uordblks += node.size;
            } else {
                info.ordblks += 1;
                info.fordblks += node.size;
                info.mxordblk = info.mxordblk.max(node.size);
            }
        })?;
        info.arena = self.heapsize();
        Ok(info)
    }
}
