//! One symbol-month unit of work and its derived names.

use crate::granularity::Granularity;
use crate::period::Period;

/// A calendar month attempted for one symbol.
///
/// The shard id embeds the zero-padded year and month, so sorting shard file
/// names lexicographically orders them chronologically within one symbol and
/// granularity. The merger relies on that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTask {
    pub symbol: String,
    pub quote: String,
    pub granularity: Granularity,
    pub period: Period,
    shard_id: String,
}

impl ArchiveTask {
    pub fn new(symbol: &str, quote: &str, granularity: Granularity, period: Period) -> Self {
        let shard_id = format!("{}{period}", shard_prefix(symbol, quote, granularity));
        Self {
            symbol: symbol.to_string(),
            quote: quote.to_string(),
            granularity,
            period,
            shard_id,
        }
    }

    /// `<symbol><quote>-<granularity>-<year>-<MM>`
    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    /// Trading pair as the provider names it, e.g. `BTCUSDT`.
    pub fn pair(&self) -> String {
        format!("{}{}", self.symbol, self.quote)
    }

    pub fn archive_file_name(&self) -> String {
        format!("{}.zip", self.shard_id)
    }

    pub fn shard_file_name(&self) -> String {
        format!("{}.csv", self.shard_id)
    }
}

/// File name prefix shared by every shard of one symbol at one granularity.
pub fn shard_prefix(symbol: &str, quote: &str, granularity: Granularity) -> String {
    format!("{symbol}{quote}-{granularity}-")
}
