//! Counts the monitors currently attached to the machine.

/// Index-based display enumeration, the shape `EnumDisplayDevices` exposes.
pub trait DisplayEnumerator {
    type Adapter;

    /// The adapter at `index`, or `None` once past the last one.
    fn adapter(&self, index: u32) -> Option<Self::Adapter>;

    /// Whether `adapter` has a monitor at `index`.
    fn has_monitor(&self, adapter: &Self::Adapter, index: u32) -> bool;
}

/// Total monitors across all adapters. Enumerates from scratch on every call.
pub fn display_count<E: DisplayEnumerator>(displays: &E) -> usize {
    let mut count = 0;
    let mut adapter_index = 0;
    while let Some(adapter) = displays.adapter(adapter_index) {
        let mut monitor_index = 0;
        while displays.has_monitor(&adapter, monitor_index) {
            monitor_index += 1;
        }
        count += monitor_index as usize;
        adapter_index += 1;
    }
    count
}
