//! KlineVault Core — domain types, configuration, downsampling, archive provider.
//!
//! This crate contains everything the pipeline needs that is not concurrency:
//! - Calendar periods and the provider's granularity set
//! - Archive tasks and the on-disk layout of a work root
//! - The row downsampler
//! - Pipeline configuration loaded from TOML
//! - The archive provider trait and the Binance Vision implementation

pub mod binance;
pub mod checksum;
pub mod config;
pub mod downsample;
pub mod granularity;
pub mod layout;
pub mod period;
pub mod provider;
pub mod task;

pub use binance::BinanceVision;
pub use config::{ConfigError, PipelineConfig};
pub use downsample::{should_keep, Downsampler};
pub use granularity::Granularity;
pub use layout::Layout;
pub use period::{Period, PROVIDER_EPOCH_YEAR};
pub use provider::{ArchiveProvider, FetchOutcome, ProviderError};
pub use task::{shard_prefix, ArchiveTask};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types handed to worker threads are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<ArchiveTask>();
        require_sync::<ArchiveTask>();
        require_send::<Layout>();
        require_sync::<Layout>();
        require_send::<PipelineConfig>();
        require_sync::<PipelineConfig>();
        require_send::<Downsampler>();
        require_send::<ProviderError>();
        require_sync::<ProviderError>();
        require_send::<BinanceVision>();
        require_sync::<BinanceVision>();
    }
}
