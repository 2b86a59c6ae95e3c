//! Constant variables.
///
/// virtual nodes per physical host
pub const DEFAULT_NUM_VNODES: usize = 8;
/// successor list length, also the upper bound of a replication factor
pub const DEFAULT_NUM_SUCCESSORS: usize = 8;
/// lower bound of the stabilization timer in ms
pub const DEFAULT_STABILIZE_MIN_MS: u64 = 15 * 1000;
/// upper bound of the stabilization timer in ms
pub const DEFAULT_STABILIZE_MAX_MS: u64 = 45 * 1000;
/// Routing follows successor lists only, so a lookup may need as many hops as there are
/// vnodes divided by the successor list length.
pub const DEFAULT_LOOKUP_HOP_BUDGET: u32 = 1024;
pub const DEFAULT_FIND_SUCCESSORS_DELAY_MS: u64 = 10;
/// 16M
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
