//! # Marketplace Client (§4.5)
//!
//! HTTP client for the plugin registry marketplace: search, info lookups
//! with a 5-minute cache, the full install flow (certification gate →
//! sandbox scan → signed download → integrity verification → sandboxed
//! trial install → metadata write), publish validation, reviews, ratings,
//! and trending queries.
//!
//! The request wrapper, retry-with-backoff, and status-code-to-error
//! mapping follow the SDK's provider HTTP client; the TTL cache follows its
//! response cache.

use crate::error::RuntimeError;
use crate::sandbox::{run_sandboxed, scan_manifest, PluginManifest, RiskLevel};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub enum AuthStrategy {
    Bearer { token: String },
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Relevance,
    Downloads,
    Rating,
    Updated,
}

impl SortBy {
    fn as_str(&self) -> &'static str {
        match self {
            SortBy::Relevance => "relevance",
            SortBy::Downloads => "downloads",
            SortBy::Rating => "rating",
            SortBy::Updated => "updated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewSort {
    Helpful,
    Recent,
    Rating,
}

impl ReviewSort {
    fn as_str(&self) -> &'static str {
        match self {
            ReviewSort::Helpful => "helpful",
            ReviewSort::Recent => "recent",
            ReviewSort::Rating => "rating",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendingPeriod {
    Day,
    Week,
    Month,
}

impl TrendingPeriod {
    fn as_str(&self) -> &'static str {
        match self {
            TrendingPeriod::Day => "day",
            TrendingPeriod::Week => "week",
            TrendingPeriod::Month => "month",
        }
    }
}

/// Published content hashes for a plugin version (§4.5: `info.checksums.sha256`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Checksums {
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Parameters for [`MarketplaceClient::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub author: Option<String>,
    pub min_rating: Option<f64>,
    pub verified: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub sort_by: Option<SortBy>,
}

/// Metadata for one published plugin version.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub kind: String,
    pub download_url: String,
    #[serde(default)]
    pub checksums: Checksums,
    #[serde(default)]
    pub certified: bool,
    #[serde(default)]
    pub available_versions: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub downloads: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub results: Vec<PluginInfo>,
    pub total: usize,
    pub has_more: bool,
    #[serde(default)]
    pub facets: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub author: String,
    pub rating: u8,
    pub comment: String,
    pub helpful_count: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewsPage {
    pub reviews: Vec<Review>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}

/// Parameters for [`MarketplaceClient::install`].
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub require_certified: bool,
    pub sandbox_timeout: Duration,
    pub install_dir: PathBuf,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            require_certified: false,
            sandbox_timeout: crate::sandbox::DEFAULT_SANDBOX_TIMEOUT,
            install_dir: PathBuf::from(".ragforge/plugins"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReceipt {
    pub name: String,
    pub version: String,
    pub install_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub plugin_id: String,
    pub version: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    plugin_id: String,
    version: String,
    url: String,
}

struct CacheEntry {
    info: PluginInfo,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() >= ttl
    }
}

/// Default TTL for cached plugin-info lookups (§4.5).
pub const PLUGIN_INFO_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const ANALYTICS_CAPACITY: usize = 1000;
const ANALYTICS_TRUNCATE_TO: usize = 500;

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// HTTP client for the plugin registry, with a TTL-bounded plugin-info
/// cache, exponential-backoff retries, and a bounded analytics buffer.
pub struct MarketplaceClient {
    http: Client,
    base_url: String,
    auth: AuthStrategy,
    user_agent: String,
    max_retries: u32,
    cache: dashmap::DashMap<String, CacheEntry>,
    cache_ttl: Duration,
    analytics: Mutex<Vec<serde_json::Value>>,
}

impl MarketplaceClient {
    pub fn new(base_url: impl Into<String>, auth: AuthStrategy) -> Result<Self, RuntimeError> {
        let http = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(RuntimeError::Transport)?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            auth,
            user_agent: format!("ragforge-runtime/{}", env!("CARGO_PKG_VERSION")),
            max_retries: DEFAULT_MAX_RETRIES,
            cache: dashmap::DashMap::new(),
            cache_ttl: PLUGIN_INFO_CACHE_TTL,
            analytics: Mutex::new(Vec::new()),
        })
    }

    /// Override the plugin-info cache TTL (tests use a short TTL to assert
    /// expiry without real time passing).
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn apply_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.auth {
            AuthStrategy::Bearer { token } => builder.bearer_auth(token),
            AuthStrategy::None => builder,
        }
    }

    fn is_retryable_status(status: StatusCode) -> bool {
        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
    }

    /// Send a request built fresh on each attempt, retrying up to
    /// `max_retries` times on a 5xx/429 response or a connect/timeout
    /// transport error, with exponential backoff (§4.5).
    async fn send_with_retry(&self, build: impl Fn() -> reqwest::RequestBuilder) -> Result<Response, RuntimeError> {
        let mut attempt = 0;
        loop {
            let req = self.apply_headers(build());
            match req.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if attempt < self.max_retries && Self::is_retryable_status(resp.status()) => {
                    tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
                    attempt += 1;
                }
                Ok(resp) => return Err(map_error_response(resp).await),
                Err(err) if attempt < self.max_retries && (err.is_timeout() || err.is_connect()) => {
                    tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
                    attempt += 1;
                }
                Err(err) => return Err(RuntimeError::Transport(err)),
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, RuntimeError> {
        let url = self.build_url(path);
        let resp = self.send_with_retry(|| self.http.request(Method::GET, &url).query(query)).await?;
        Ok(resp.json::<T>().await?)
    }

    /// Fetch plugin metadata, serving from cache when fresh.
    pub async fn plugin_info(&self, kind: &str, name: &str, version: &str) -> Result<PluginInfo, RuntimeError> {
        let cache_key = format!("{kind}/{name}@{version}");
        if let Some(entry) = self.cache.get(&cache_key) {
            if !entry.is_expired(self.cache_ttl) {
                return Ok(entry.info.clone());
            }
        }

        let info: PluginInfo = self.get_json(&format!("plugins/{kind}/{name}/{version}"), &[]).await?;
        self.cache.insert(
            cache_key,
            CacheEntry {
                info: info.clone(),
                inserted_at: Instant::now(),
            },
        );
        Ok(info)
    }

    /// List all published versions for a plugin, used by the version
    /// resolver for `"latest"` and range resolution.
    pub async fn list_versions(&self, kind: &str, name: &str) -> Result<Vec<String>, RuntimeError> {
        self.get_json(&format!("plugins/{kind}/{name}/versions"), &[]).await
    }

    /// Search the registry, normalizing results to [`PluginInfo`].
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResult, RuntimeError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(q) = &query.q {
            params.push(("q", q.clone()));
        }
        if let Some(category) = &query.category {
            params.push(("category", category.clone()));
        }
        if !query.tags.is_empty() {
            params.push(("tags", query.tags.join(",")));
        }
        if let Some(author) = &query.author {
            params.push(("author", author.clone()));
        }
        if let Some(min_rating) = query.min_rating {
            params.push(("minRating", min_rating.to_string()));
        }
        if let Some(verified) = query.verified {
            params.push(("verified", verified.to_string()));
        }
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(offset) = query.offset {
            params.push(("offset", offset.to_string()));
        }
        if let Some(sort_by) = query.sort_by {
            params.push(("sortBy", sort_by.as_str().to_string()));
        }
        self.get_json("plugins/search", &params).await
    }

    /// Paginated reviews for one plugin.
    pub async fn reviews(&self, kind: &str, name: &str, page: u32, page_size: u32, sort_by: ReviewSort) -> Result<ReviewsPage, RuntimeError> {
        let params = vec![
            ("page", page.to_string()),
            ("pageSize", page_size.to_string()),
            ("sortBy", sort_by.as_str().to_string()),
        ];
        self.get_json(&format!("plugins/{kind}/{name}/reviews"), &params).await
    }

    /// Trending plugins over `period`.
    pub async fn trending(&self, period: TrendingPeriod) -> Result<Vec<PluginInfo>, RuntimeError> {
        self.get_json("plugins/trending", &[("period", period.as_str().to_string())]).await
    }

    /// Submit a `1..=5` rating (and optional comment) for a plugin version.
    pub async fn rate(&self, kind: &str, name: &str, version: &str, rating: u8, comment: Option<&str>) -> Result<(), RuntimeError> {
        if !(1..=5).contains(&rating) {
            return Err(RuntimeError::RatingOutOfRange { rating });
        }
        let url = self.build_url(&format!("plugins/{kind}/{name}/{version}/rate"));
        let body = serde_json::json!({"rating": rating, "comment": comment});
        let resp = self.send_with_retry(|| self.http.post(&url).json(&body)).await?;
        let _ = resp.text().await;
        self.record_analytics(serde_json::json!({"event": "rate", "name": name, "version": version, "rating": rating}));
        Ok(())
    }

    async fn fetch_signed_download_url(&self, kind: &str, name: &str, version: &str) -> Result<String, RuntimeError> {
        let resp: SignedUrlResponse = self.get_json(&format!("plugins/{kind}/{name}/{version}/download-url"), &[]).await?;
        Ok(resp.url)
    }

    async fn download_bytes(&self, url: &str) -> Result<Arc<[u8]>, RuntimeError> {
        let resp = self.send_with_retry(|| self.http.get(url)).await?;
        let bytes = resp.bytes().await?;
        Ok(Arc::from(bytes.as_ref()))
    }

    /// Run the full install flow (§4.5): certification gate, dependency and
    /// permission scan, signed download, SHA-256 verification, a sandboxed
    /// trial install, and metadata persistence.
    pub async fn install<F, Fut>(
        &self,
        kind: &str,
        name: &str,
        version: &str,
        options: &InstallOptions,
        trial_install: F,
    ) -> Result<InstallReceipt, RuntimeError>
    where
        F: FnOnce(Arc<[u8]>) -> Fut,
        Fut: Future<Output = Result<(), RuntimeError>>,
    {
        let info = self.plugin_info(kind, name, version).await?;

        if options.require_certified && !info.certified {
            return Err(RuntimeError::NotCertified {
                name: name.to_string(),
                version: version.to_string(),
            });
        }

        let scan = scan_manifest(&PluginManifest {
            dependencies: info.dependencies.clone(),
            permissions: info.permissions.clone(),
        });
        if scan.risk == RiskLevel::High {
            return Err(RuntimeError::SecurityScanFailed {
                name: name.to_string(),
                version: version.to_string(),
                findings: scan.issues,
            });
        }

        let download_url = self.fetch_signed_download_url(kind, name, version).await?;
        let bytes = self.download_bytes(&download_url).await?;

        if let Some(expected) = &info.checksums.sha256 {
            let actual = sha256_hex(&bytes);
            if &actual != expected {
                return Err(RuntimeError::IntegrityFailed {
                    name: name.to_string(),
                    version: version.to_string(),
                    reason: format!("expected sha256 {expected}, got {actual}"),
                });
            }
        }

        run_sandboxed(options.sandbox_timeout, {
            let bytes = bytes.clone();
            move || trial_install(bytes)
        })
        .await?;

        write_install_metadata(&options.install_dir, &info)?;
        self.record_analytics(serde_json::json!({"event": "install", "name": name, "version": version}));

        Ok(InstallReceipt {
            name: info.name,
            version: info.version,
            install_dir: options.install_dir.clone(),
        })
    }

    /// Validate a plugin package's manifest, run the security scan, and
    /// upload it. Packaging the directory into an archive is the host's
    /// responsibility — this client validates and transports the result.
    pub async fn publish(&self, package_json: &serde_json::Value, package_bytes: &[u8]) -> Result<PublishReceipt, RuntimeError> {
        let name = package_json
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RuntimeError::InvalidPluginPackage { reason: "package.json missing 'name'".to_string() })?;
        let version = package_json
            .get("version")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RuntimeError::InvalidPluginPackage { reason: "package.json missing 'version'".to_string() })?;
        let rag_plugin = package_json
            .get("ragPlugin")
            .ok_or_else(|| RuntimeError::InvalidPluginPackage { reason: "package.json missing 'ragPlugin' section".to_string() })?;

        let dependencies = rag_plugin
            .get("dependencies")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let permissions = rag_plugin
            .get("permissions")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let scan = scan_manifest(&PluginManifest { dependencies, permissions });
        if scan.risk == RiskLevel::High {
            return Err(RuntimeError::SecurityScanFailed {
                name: name.to_string(),
                version: version.to_string(),
                findings: scan.issues,
            });
        }

        let url = self.build_url("plugins/publish");
        let resp = self
            .send_with_retry(|| {
                self.http
                    .post(&url)
                    .header("X-Plugin-Name", name)
                    .header("X-Plugin-Version", version)
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(package_bytes.to_vec())
            })
            .await?;
        let parsed: PublishResponse = resp.json().await?;

        self.record_analytics(serde_json::json!({"event": "publish", "name": name, "version": version}));

        Ok(PublishReceipt {
            plugin_id: parsed.plugin_id,
            version: parsed.version,
            url: parsed.url,
        })
    }

    fn record_analytics(&self, event: serde_json::Value) {
        let mut buffer = self.analytics.lock().unwrap();
        if buffer.len() >= ANALYTICS_CAPACITY {
            let keep_from = buffer.len() - ANALYTICS_TRUNCATE_TO;
            buffer.drain(0..keep_from);
        }
        buffer.push(event);
    }

    /// Snapshot of buffered analytics events, for a host to flush on its own
    /// schedule (no background timer is spawned here — see §4.5).
    pub fn analytics_snapshot(&self) -> Vec<serde_json::Value> {
        self.analytics.lock().unwrap().clone()
    }
}

fn write_install_metadata(install_dir: &Path, info: &PluginInfo) -> Result<(), RuntimeError> {
    std::fs::create_dir_all(install_dir)?;
    let metadata_path = install_dir.join(format!("{}-{}.json", info.name, info.version));
    let contents = serde_json::to_vec_pretty(info).map_err(|err| RuntimeError::InvalidPluginPackage { reason: err.to_string() })?;
    std::fs::write(metadata_path, contents)?;
    Ok(())
}

async fn map_error_response(resp: Response) -> RuntimeError {
    let status = resp.status();
    match resp.text().await {
        Ok(body) => {
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str().map(str::to_string)))
                .unwrap_or(body);
            match status.as_u16() {
                429 => RuntimeError::RateLimited { retry_after_secs: 60 },
                _ => RuntimeError::Registry {
                    message: format!("{status}: {message}"),
                },
            }
        }
        Err(_) => RuntimeError::Registry {
            message: format!("{status}: failed to read error response"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_entry_expires_after_ttl() {
        let entry = CacheEntry {
            info: PluginInfo {
                name: "pdf-loader".to_string(),
                version: "1.0.0".to_string(),
                kind: "loader".to_string(),
                download_url: "https://example.invalid/pdf-loader.tar.gz".to_string(),
                ..Default::default()
            },
            inserted_at: Instant::now() - Duration::from_secs(600),
        };
        assert!(entry.is_expired(PLUGIN_INFO_CACHE_TTL));
    }

    #[test]
    fn cache_entry_is_fresh_immediately_after_insert() {
        let entry = CacheEntry {
            info: PluginInfo {
                name: "pdf-loader".to_string(),
                version: "1.0.0".to_string(),
                kind: "loader".to_string(),
                download_url: "https://example.invalid/pdf-loader.tar.gz".to_string(),
                ..Default::default()
            },
            inserted_at: Instant::now(),
        };
        assert!(!entry.is_expired(PLUGIN_INFO_CACHE_TTL));
    }

    #[tokio::test]
    async fn plugin_info_caches_across_calls() {
        let client = MarketplaceClient::new("https://example.invalid", AuthStrategy::None)
            .unwrap()
            .with_cache_ttl(Duration::from_secs(300));
        client.cache.insert(
            "loader/pdf-loader@1.0.0".to_string(),
            CacheEntry {
                info: PluginInfo {
                    name: "pdf-loader".to_string(),
                    version: "1.0.0".to_string(),
                    kind: "loader".to_string(),
                    download_url: "https://example.invalid/x".to_string(),
                    ..Default::default()
                },
                inserted_at: Instant::now(),
            },
        );
        let info = client.plugin_info("loader", "pdf-loader", "1.0.0").await.unwrap();
        assert_eq!(info.name, "pdf-loader");
    }

    #[tokio::test]
    async fn rate_out_of_range_is_rejected_before_any_request() {
        let client = MarketplaceClient::new("https://example.invalid", AuthStrategy::None).unwrap();
        let result = client.rate("loader", "pdf-loader", "1.0.0", 7, None).await;
        assert!(matches!(result, Err(RuntimeError::RatingOutOfRange { rating: 7 })));
    }

    #[tokio::test]
    async fn install_fails_not_certified_without_reaching_network() {
        let client = MarketplaceClient::new("https://example.invalid", AuthStrategy::None).unwrap();
        client.cache.insert(
            "loader/risky@1.0.0".to_string(),
            CacheEntry {
                info: PluginInfo {
                    name: "risky".to_string(),
                    version: "1.0.0".to_string(),
                    kind: "loader".to_string(),
                    certified: false,
                    ..Default::default()
                },
                inserted_at: Instant::now(),
            },
        );
        let options = InstallOptions {
            require_certified: true,
            ..Default::default()
        };
        let result = client
            .install("loader", "risky", "1.0.0", &options, |_bytes| async { Ok(()) })
            .await;
        assert!(matches!(result, Err(RuntimeError::NotCertified { .. })));
    }

    #[tokio::test]
    async fn install_fails_security_scan_on_denylisted_dependency() {
        let client = MarketplaceClient::new("https://example.invalid", AuthStrategy::None).unwrap();
        client.cache.insert(
            "loader/shady@1.0.0".to_string(),
            CacheEntry {
                info: PluginInfo {
                    name: "shady".to_string(),
                    version: "1.0.0".to_string(),
                    kind: "loader".to_string(),
                    certified: true,
                    dependencies: vec!["shelljs".to_string()],
                    ..Default::default()
                },
                inserted_at: Instant::now(),
            },
        );
        let result = client
            .install("loader", "shady", "1.0.0", &InstallOptions::default(), |_bytes| async { Ok(()) })
            .await;
        assert!(matches!(result, Err(RuntimeError::SecurityScanFailed { .. })));
    }

    #[test]
    fn publish_rejects_manifest_missing_rag_plugin_section() {
        let client = MarketplaceClient::new("https://example.invalid", AuthStrategy::None).unwrap();
        let manifest = serde_json::json!({"name": "pdf-loader", "version": "1.0.0"});
        let result = futures::executor::block_on(client.publish(&manifest, b"data"));
        assert!(matches!(result, Err(RuntimeError::InvalidPluginPackage { .. })));
    }

    #[test]
    fn publish_rejects_manifest_with_denylisted_permission() {
        let client = MarketplaceClient::new("https://example.invalid", AuthStrategy::None).unwrap();
        let manifest = serde_json::json!({
            "name": "pdf-loader",
            "version": "1.0.0",
            "ragPlugin": {"permissions": ["system:admin"]},
        });
        let result = futures::executor::block_on(client.publish(&manifest, b"data"));
        assert!(matches!(result, Err(RuntimeError::SecurityScanFailed { .. })));
    }

    #[test]
    fn analytics_buffer_truncates_on_overflow() {
        let client = MarketplaceClient::new("https://example.invalid", AuthStrategy::None).unwrap();
        for i in 0..(ANALYTICS_CAPACITY + 10) {
            client.record_analytics(serde_json::json!({"i": i}));
        }
        let snapshot = client.analytics_snapshot();
        assert_eq!(snapshot.len(), ANALYTICS_TRUNCATE_TO + 10);
    }
}
