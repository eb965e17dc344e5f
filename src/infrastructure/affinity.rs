//! CPU affinity for the I/O thread

use std::thread;

/// Logical cores visible to this process (at least 1)
pub fn core_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Whether `core` names a usable core index
#[inline]
pub fn is_valid_core(core: usize) -> bool {
    core < core_count()
}

/// Pin the calling thread to `core`
///
/// Returns false when the index is out of range or the platform refuses.
pub fn pin_current_thread(core: usize) -> bool {
    let Some(ids) = core_affinity::get_core_ids() else {
        return false;
    };
    match ids.into_iter().find(|id| id.id == core) {
        Some(id) => core_affinity::set_for_current(id),
        None => false,
    }
}
