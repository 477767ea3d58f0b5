//! Process-wide resource limits.
//!
//! These knobs size the working buffers allocated on extraction entry. They
//! may be changed between extractions but must not be mutated while an
//! extraction is in flight; the setters are atomic only so that reads from
//! other threads are well-defined.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::consts::{DEFAULT_OBJECT_LIMIT, DEFAULT_PIXSTACK, DEFAULT_SUB_OBJECT_LIMIT};

static EXTRACT_PIXSTACK: AtomicUsize = AtomicUsize::new(DEFAULT_PIXSTACK);
static EXTRACT_OBJECT_LIMIT: AtomicUsize = AtomicUsize::new(DEFAULT_OBJECT_LIMIT);
static SUB_OBJECT_LIMIT: AtomicUsize = AtomicUsize::new(DEFAULT_SUB_OBJECT_LIMIT);

/// Capacity of the shared pixel stack from which per-object pixel lists
/// are drawn.
pub fn extract_pixstack() -> usize {
    EXTRACT_PIXSTACK.load(Ordering::Relaxed)
}

pub fn set_extract_pixstack(size: usize) {
    EXTRACT_PIXSTACK.store(size, Ordering::Relaxed);
}

/// Capacity of the provisional object table used during segmentation.
pub fn extract_object_limit() -> usize {
    EXTRACT_OBJECT_LIMIT.load(Ordering::Relaxed)
}

pub fn set_extract_object_limit(size: usize) {
    EXTRACT_OBJECT_LIMIT.store(size, Ordering::Relaxed);
}

/// Cap on the number of sub-objects considered while deblending a single
/// detection.
pub fn sub_object_limit() -> usize {
    SUB_OBJECT_LIMIT.load(Ordering::Relaxed)
}

pub fn set_sub_object_limit(size: usize) {
    SUB_OBJECT_LIMIT.store(size, Ordering::Relaxed);
}
