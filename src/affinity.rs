/*******************************************************************************
 * Copyright (c) 2024 Cénotélie Opérations SAS (cenotelie.fr)
 ******************************************************************************/

//! API for thread affinity to cores.
//! Pinning is supported on Linux and Android, other platforms report no core and pinning always fails.

use core::fmt::Display;

/// The identifier of a CPU core
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CoreId(usize);

impl CoreId {
    /// Gets the identifier for a core index
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Gets the index of the core
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl Display for CoreId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Gets the cores the current thread is allowed to run on
#[must_use]
pub fn available_cores() -> Vec<CoreId> {
    #[cfg(any(target_os = "android", target_os = "linux"))]
    {
        linux::get_core_ids()
    }
    #[cfg(not(any(target_os = "android", target_os = "linux")))]
    {
        Vec::new()
    }
}

/// Pins the current thread to a core.
/// Returns whether the thread was pinned.
#[allow(clippy::must_use_candidate)]
pub fn pin_current_thread(core: CoreId) -> bool {
    #[cfg(any(target_os = "android", target_os = "linux"))]
    {
        linux::set_for_current(core)
    }
    #[cfg(not(any(target_os = "android", target_os = "linux")))]
    {
        let _ = core;
        false
    }
}

#[cfg(any(target_os = "android", target_os = "linux"))]
mod linux {
    use libc::{CPU_ISSET, CPU_SET, CPU_SETSIZE, cpu_set_t, sched_getaffinity, sched_setaffinity};

    use super::CoreId;

    #[allow(clippy::cast_sign_loss)]
    const MAX_CORES: usize = CPU_SETSIZE as usize;

    pub fn get_core_ids() -> Vec<CoreId> {
        let Some(full_set) = get_affinity_mask() else {
            log::warn!("failed to get the affinity mask of the current thread");
            return Vec::new();
        };
        (0..MAX_CORES)
            .filter(|&index| unsafe { CPU_ISSET(index, &full_set) })
            .map(CoreId)
            .collect()
    }

    pub fn set_for_current(core: CoreId) -> bool {
        if core.0 >= MAX_CORES {
            return false;
        }
        let mut set = new_cpu_set();
        unsafe { CPU_SET(core.0, &mut set) };
        // 0 is the current thread
        let result = unsafe { sched_setaffinity(0, core::mem::size_of::<cpu_set_t>(), &set) };
        result == 0
    }

    fn get_affinity_mask() -> Option<cpu_set_t> {
        let mut set = new_cpu_set();
        let result = unsafe { sched_getaffinity(0, core::mem::size_of::<cpu_set_t>(), &mut set) };
        (result == 0).then_some(set)
    }

    fn new_cpu_set() -> cpu_set_t {
        unsafe { core::mem::zeroed::<cpu_set_t>() }
    }
}
