pub mod accounts;
pub mod cloud_clusters;
pub mod firewalls;
pub mod pools;
pub mod registry;
pub mod servers;
pub mod settings;
pub mod volumes;

/// Chunk size used for batch upserts when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 100;
