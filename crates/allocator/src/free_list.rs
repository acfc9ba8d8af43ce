//! Intrusive split/merge free list.
//!
//! The list manages a single contiguous region. The region is covered by a
//! chain of [`ChunkNode`] headers stored inline, in ascending address order.
//! Each node owns the bytes between the end of its header and the next node
//! (or the end of the region for the last node), and is either free or in use.
//!
//! # Algorithm
//!
//! - **Allocation**: first fit. Before a free node is evaluated, the run of
//!   free nodes directly following it is merged into it (lazy coalescing). A
//!   request needs `size + align` bytes of chunk; if the chunk is large enough
//!   to hold another header after that, the node is split and the tail becomes
//!   a new free node, otherwise the whole chunk is handed out.
//! - **Deallocation**: the chain is scanned for the used node whose aligned
//!   data pointer equals the freed pointer, and that node is flagged free.
//!   Nothing is merged at this point; sizes are never stored.
//!
//! # Memory Layout
//!
//! ```text
//! ┌────────────┬───────────────────┬────────────┬──────────────────────┐
//! │ ChunkNode  │ chunk (used)      │ ChunkNode  │ chunk (free)         │
//! │ next, free │ pad │ data │ pad  │ next, free │                      │
//! └────────────┴───────────────────┴────────────┴──────────────────────┘
//!   ↑ region start (aligned)                                region end ↑
//! ```
//!
//! # Performance Characteristics
//!
//! - **Allocation**: O(n) where n is the number of nodes
//! - **Deallocation**: O(n) where n is the number of nodes
//! - **Memory Overhead**: one header plus up to `align` bytes per allocation

use core::{
    alloc::Layout,
    ptr::{self, NonNull},
};

/// Header stored in front of every chunk of the region.
#[repr(C)]
#[derive(Debug)]
struct ChunkNode {
    /// Next node in address order, or null for the last node.
    next: *mut Self,
    /// Whether the chunk is available.
    free: bool,
}

const NODE_SIZE: usize = size_of::<ChunkNode>();
const NODE_ALIGN: usize = align_of::<ChunkNode>();

impl ChunkNode {
    /// Writes a node header at `node_ptr`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `node_ptr` is valid for writes of a
    /// `ChunkNode` and that it lies inside the managed region.
    unsafe fn new(node_ptr: *mut u8, next: *mut Self, free: bool) -> *mut Self {
        #[expect(clippy::cast_ptr_alignment)]
        let node = node_ptr.cast::<Self>();
        assert!(!node.is_null(), "Node pointer must not be null");
        assert!(node.is_aligned(), "Node pointer must be properly aligned");
        unsafe {
            node.write(Self { next, free });
        }
        node
    }

    /// Returns a pointer to the first byte after the header.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `node` points to a valid `ChunkNode`.
    unsafe fn begin(node: *mut Self) -> *mut u8 {
        assert!(!node.is_null(), "Node must not be null");
        unsafe { node.add(1).cast() }
    }

    /// Merges the run of free nodes following `node` into it.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `node` and every node reachable from it are
    /// valid.
    unsafe fn absorb_free_successors(node: *mut Self) {
        unsafe {
            assert!((*node).free, "Only free nodes absorb their successors");
            while !(*node).next.is_null() && (*(*node).next).free {
                (*node).next = (*(*node).next).next;
            }
        }
    }
}

/// Rounds `ptr` up to the next multiple of `align`.
fn align_up(ptr: *mut u8, align: usize) -> Option<*mut u8> {
    let addr = ptr.addr().checked_next_multiple_of(align)?;
    Some(ptr.with_addr(addr))
}

/// A first-fit free list over one caller-owned region.
///
/// An empty list (created by [`new`](Self::new), or initialized with a
/// region too small to hold a header) fails every allocation.
pub struct FreeList {
    head: *mut ChunkNode,
    start: *mut u8,
    end: *mut u8,
}

unsafe impl Send for FreeList {}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeList {
    /// Size of one chunk header in bytes.
    pub const HEADER_SIZE: usize = NODE_SIZE;

    /// Creates an empty [`FreeList`] that manages no memory.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            start: ptr::null_mut(),
            end: ptr::null_mut(),
        }
    }

    /// Starts managing `region..region + size` as a single free chunk.
    ///
    /// Any previous region is forgotten, together with its allocations.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - the range `region..region + size` is valid for reads and writes
    /// - the range stays valid and is not used by any other code until the
    ///   list is reinitialized or dropped
    pub unsafe fn init(&mut self, region: *mut u8, size: usize) {
        *self = Self::new();

        let end = region.wrapping_add(size);
        let Some(head) = align_up(region, NODE_ALIGN) else {
            return;
        };
        if head.addr().saturating_add(NODE_SIZE) > end.addr() {
            return; // No room for a header
        }

        self.head = unsafe { ChunkNode::new(head, ptr::null_mut(), true) };
        self.start = region;
        self.end = end;
    }

    /// Returns the number of bytes available to the chunk of `node`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `node` is a node of this list.
    unsafe fn chunk_size(&self, node: *mut ChunkNode) -> usize {
        unsafe {
            let end = if (*node).next.is_null() {
                self.end
            } else {
                (*node).next.cast()
            };
            end.addr().saturating_sub(ChunkNode::begin(node).addr())
        }
    }

    /// Allocates a block satisfying `layout`.
    ///
    /// Returns `None` if no chunk can hold `layout.size() + layout.align()`
    /// bytes.
    pub fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let needed = layout.size().checked_add(layout.align())?;
        let split_threshold = needed.saturating_add(NODE_SIZE + NODE_ALIGN);

        unsafe {
            let mut node = self.head;
            while !node.is_null() {
                if (*node).free {
                    ChunkNode::absorb_free_successors(node);

                    let chunk = self.chunk_size(node);
                    let begin = ChunkNode::begin(node);
                    let data = NonNull::new(align_up(begin, layout.align())?)?;
                    if chunk > split_threshold {
                        let tail = align_up(begin.add(needed), NODE_ALIGN)?;
                        let tail = ChunkNode::new(tail, (*node).next, true);
                        (*node).next = tail;
                        (*node).free = false;
                        return Some(data);
                    }
                    if chunk >= needed {
                        (*node).free = false;
                        return Some(data);
                    }
                }
                node = (*node).next;
            }
        }
        None
    }

    /// Releases a block returned by [`allocate`](Self::allocate).
    ///
    /// Returns `false` if no used chunk hands out `ptr` for `layout`, in
    /// which case nothing changes.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the block is no longer referenced.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout) -> bool {
        unsafe {
            let mut node = self.head;
            while !node.is_null() {
                if !(*node).free
                    && align_up(ChunkNode::begin(node), layout.align())
                        .is_some_and(|data| ptr::eq(data, ptr.as_ptr()))
                {
                    (*node).free = true;
                    return true;
                }
                node = (*node).next;
            }
        }
        false
    }

    /// Merges every run of free chunks and returns the size in bytes of the
    /// largest free chunk.
    pub fn max_chunk(&mut self) -> usize {
        let mut max = 0;
        unsafe {
            let mut node = self.head;
            while !node.is_null() {
                if (*node).free {
                    ChunkNode::absorb_free_successors(node);
                    max = max.max(self.chunk_size(node));
                }
                node = (*node).next;
            }
        }
        max
    }

    /// Returns how many elements of `layout` fit in the largest free chunk.
    ///
    /// Zero-sized layouts report `usize::MAX` whenever any chunk can hold
    /// their alignment padding.
    pub fn max_elements(&mut self, layout: Layout) -> usize {
        let chunk = self.max_chunk();
        chunk
            .checked_sub(layout.align())
            .map_or(0, |bytes| bytes.checked_div(layout.size()).unwrap_or(usize::MAX))
    }

    /// Returns `true` if any chunk is currently allocated.
    #[must_use]
    pub fn is_in_use(&self) -> bool {
        let mut node = self.head;
        while !node.is_null() {
            unsafe {
                if !(*node).free {
                    return true;
                }
                node = (*node).next;
            }
        }
        false
    }

    /// Returns `true` if `ptr` lies inside the managed region.
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        !self.head.is_null() && (self.start.addr()..self.end.addr()).contains(&ptr.addr())
    }

    /// Returns the number of chunk headers in the chain.
    #[must_use]
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut node = self.head;
        while !node.is_null() {
            count += 1;
            node = unsafe { (*node).next };
        }
        count
    }
}
