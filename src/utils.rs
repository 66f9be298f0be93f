use crate::types::Clock;

/// Window index of `clock` in a structure holding `slices` consecutive clocks.
#[inline]
pub(crate) fn window_index(clock: Clock, slices: usize) -> usize {
    debug_assert_ne!(slices, 0, "window_index: zero slices");
    // The remainder is below `slices`, so it always fits.
    (clock % slices as Clock) as usize
}
