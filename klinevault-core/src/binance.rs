//! Binance public data provider.
//!
//! Monthly kline archives are served as static files from
//! `data.binance.vision`, each with a sibling `.CHECKSUM` file holding the
//! archive's SHA-256. Pair validation goes through the exchange REST API.
//!
//! There is no retry policy: a transfer interrupted mid-stream leaves a
//! `.part` file behind, and the next attempt resumes it with a range request.

use crate::checksum::{parse_checksum, sha256_file};
use crate::provider::{ArchiveProvider, FetchOutcome, ProviderError};
use crate::task::ArchiveTask;
use reqwest::StatusCode;
use serde::Deserialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const DATA_URL: &str = "https://data.binance.vision";
pub const API_URL: &str = "https://api.binance.com";

/// `exchangeInfo` response, reduced to what symbol listing needs.
#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    base_asset: String,
    quote_asset: String,
}

/// Binance Vision archive provider.
pub struct BinanceVision {
    client: reqwest::blocking::Client,
    data_url: String,
    api_url: String,
    verify_checksums: bool,
}

impl BinanceVision {
    pub fn new(verify_checksums: bool) -> Result<Self, ProviderError> {
        Self::with_endpoints(DATA_URL, API_URL, verify_checksums)
    }

    /// Point the provider at alternate hosts (mirrors, local test servers).
    pub fn with_endpoints(
        data_url: &str,
        api_url: &str,
        verify_checksums: bool,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("klinevault/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::NetworkUnreachable(format!("build HTTP client: {e}")))?;

        Ok(Self {
            client,
            data_url: data_url.trim_end_matches('/').to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            verify_checksums,
        })
    }

    /// Archive URL for a symbol-month.
    fn archive_url(&self, task: &ArchiveTask) -> String {
        format!(
            "{}/data/spot/monthly/klines/{}/{}/{}",
            self.data_url,
            task.pair(),
            task.granularity,
            task.archive_file_name()
        )
    }

    /// Check the finished part file against the published checksum, then move it into place.
    fn finish(&self, url: &str, part: &Path, dest: &Path) -> Result<(), ProviderError> {
        if self.verify_checksums {
            match self.published_checksum(url)? {
                Some(expected) => {
                    let actual = sha256_file(part)
                        .map_err(|e| ProviderError::io(format!("hash {}", part.display()), e))?;
                    if actual != expected {
                        let _ = fs::remove_file(part);
                        return Err(ProviderError::ChecksumMismatch {
                            path: dest.to_path_buf(),
                            expected,
                            actual,
                        });
                    }
                    debug!(archive = %dest.display(), "checksum verified");
                }
                None => warn!("no checksum published for {url}, keeping archive unverified"),
            }
        }

        fs::rename(part, dest).map_err(|e| {
            ProviderError::io(
                format!("move {} into {}", part.display(), dest.display()),
                e,
            )
        })
    }

    fn published_checksum(&self, archive_url: &str) -> Result<Option<String>, ProviderError> {
        let url = format!("{archive_url}.CHECKSUM");
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| ProviderError::NetworkUnreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let body = resp
            .text()
            .map_err(|e| ProviderError::NetworkUnreachable(e.to_string()))?;
        parse_checksum(&body)
            .map(Some)
            .ok_or_else(|| ProviderError::ResponseFormat(format!("unreadable checksum at {url}")))
    }
}

impl ArchiveProvider for BinanceVision {
    fn name(&self) -> &str {
        "binance_vision"
    }

    fn fetch_archive(&self, task: &ArchiveTask, dest: &Path) -> Result<FetchOutcome, ProviderError> {
        if dest.is_file() {
            return Ok(FetchOutcome::Cached {
                path: dest.to_path_buf(),
            });
        }

        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| ProviderError::io(format!("create {}", dir.display()), e))?;
        }

        let part = part_path(dest);
        let offset = fs::metadata(&part).map(|m| m.len()).unwrap_or(0);
        let url = self.archive_url(task);

        let mut request = self.client.get(&url);
        if offset > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={offset}-"));
        }
        let mut resp = request
            .send()
            .map_err(|e| ProviderError::NetworkUnreachable(e.to_string()))?;

        let resumed = match resp.status() {
            StatusCode::NOT_FOUND => {
                let _ = fs::remove_file(&part);
                return Ok(FetchOutcome::NotFound);
            }
            StatusCode::PARTIAL_CONTENT => true,
            // The partial file already holds the whole archive.
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                self.finish(&url, &part, dest)?;
                return Ok(FetchOutcome::Downloaded {
                    path: dest.to_path_buf(),
                    resumed: true,
                });
            }
            status if status.is_success() => false,
            status => {
                return Err(ProviderError::UnexpectedStatus {
                    status: status.as_u16(),
                    url,
                })
            }
        };

        debug!(
            archive = %task.shard_id(),
            offset,
            resumed,
            "transferring archive"
        );

        let mut file = if resumed {
            OpenOptions::new().append(true).open(&part)
        } else {
            File::create(&part)
        }
        .map_err(|e| ProviderError::io(format!("open {}", part.display()), e))?;

        resp.copy_to(&mut file)
            .map_err(|e| ProviderError::NetworkUnreachable(format!("transfer {url}: {e}")))?;
        file.flush()
            .map_err(|e| ProviderError::io(format!("flush {}", part.display()), e))?;
        drop(file);

        self.finish(&url, &part, dest)?;
        Ok(FetchOutcome::Downloaded {
            path: dest.to_path_buf(),
            resumed,
        })
    }

    fn validate_pair(&self, symbol: &str, quote: &str) -> Result<bool, ProviderError> {
        let url = format!("{}/api/v3/exchangeInfo?symbol={symbol}{quote}", self.api_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| ProviderError::NetworkUnreachable(e.to_string()))?;
        // An unknown symbol is rejected with 400; anything else is not an answer.
        match resp.status() {
            StatusCode::OK => Ok(true),
            StatusCode::BAD_REQUEST => Ok(false),
            status => Err(ProviderError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            }),
        }
    }

    fn list_symbols(&self, quote: &str) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/v3/exchangeInfo", self.api_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| ProviderError::NetworkUnreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProviderError::UnexpectedStatus {
                status: resp.status().as_u16(),
                url,
            });
        }
        let body = resp
            .text()
            .map_err(|e| ProviderError::NetworkUnreachable(e.to_string()))?;
        parse_symbols(&body, quote)
    }
}

/// Base assets quoted in `quote`, sorted and de-duplicated.
fn parse_symbols(body: &str, quote: &str) -> Result<Vec<String>, ProviderError> {
    let info: ExchangeInfo = serde_json::from_str(body)
        .map_err(|e| ProviderError::ResponseFormat(format!("exchangeInfo: {e}")))?;
    let mut symbols: Vec<String> = info
        .symbols
        .into_iter()
        .filter(|s| s.quote_asset == quote)
        .map(|s| s.base_asset)
        .collect();
    symbols.sort();
    symbols.dedup();
    Ok(symbols)
}

/// `<dest>.part`
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::granularity::Granularity;
    use crate::period::Period;

    fn task() -> ArchiveTask {
        ArchiveTask::new(
            "BTC",
            "USDT",
            Granularity::OneMinute,
            Period::new(2021, 7).unwrap(),
        )
    }

    #[test]
    fn archive_url_format() {
        let provider = BinanceVision::new(true).unwrap();
        assert_eq!(
            provider.archive_url(&task()),
            "https://data.binance.vision/data/spot/monthly/klines/BTCUSDT/1m/BTCUSDT-1m-2021-07.zip"
        );
    }

    #[test]
    fn endpoints_drop_trailing_slash() {
        let provider = BinanceVision::with_endpoints("http://mirror/", "http://api/", false).unwrap();
        assert!(provider
            .archive_url(&task())
            .starts_with("http://mirror/data/spot/monthly/klines/"));
    }

    #[test]
    fn existing_archive_is_reused_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("BTCUSDT-1m-2021-07.zip");
        std::fs::write(&dest, b"zip bytes").unwrap();

        // Unroutable endpoint: any network access would fail the test.
        let provider = BinanceVision::with_endpoints("http://127.0.0.1:9", "http://127.0.0.1:9", true)
            .unwrap();
        let outcome = provider.fetch_archive(&task(), &dest).unwrap();
        assert_eq!(outcome, FetchOutcome::Cached { path: dest });
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/a/BTCUSDT-1m-2021-07.zip")),
            PathBuf::from("/a/BTCUSDT-1m-2021-07.zip.part")
        );
    }

    #[test]
    fn parse_symbols_filters_by_quote() {
        let body = r#"{"timezone":"UTC","symbols":[
            {"symbol":"ETHBTC","baseAsset":"ETH","quoteAsset":"BTC","status":"TRADING"},
            {"symbol":"BTCUSDT","baseAsset":"BTC","quoteAsset":"USDT","status":"TRADING"},
            {"symbol":"ADAUSDT","baseAsset":"ADA","quoteAsset":"USDT","status":"BREAK"}
        ]}"#;
        assert_eq!(parse_symbols(body, "USDT").unwrap(), vec!["ADA", "BTC"]);
    }

    #[test]
    fn parse_symbols_rejects_unexpected_shape() {
        assert!(matches!(
            parse_symbols(r#"{"code":-1121}"#, "USDT"),
            Err(ProviderError::ResponseFormat(_))
        ));
    }
}
