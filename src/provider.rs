//! Resource inventory providers.
//!
//! The engine only ever asks a provider for the current snapshot and for a
//! refresh. Three standard variants exist:
//!
//! - [`StaticProvider`]: fixed in-memory list, refresh is a no-op.
//! - [`FileProvider`]: local JSON file, re-read only when its modification
//!   time changed.
//! - [`HttpProvider`]: remote JSON endpoint, fetched each refresh with
//!   bounded retry/backoff on transient failures.
//!
//! Every snapshot passes inventory validation before it becomes visible;
//! malformed data is fatal and surfaces to the caller of `lock`.

use crate::error::{ReslockError, Result};
use crate::resource::{parse_inventory, validate_inventory, ResourceRecord};
use log::{debug, warn};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// Inventory source consumed by the allocation engine.
pub trait Provider {
    /// Current validated snapshot.
    fn snapshot(&self) -> &[ResourceRecord];

    /// Refresh the snapshot from the backing source.
    fn reload(&mut self) -> Result<()>;
}

/// Create a provider from a URI string.
///
/// `http://` and `https://` URIs get an [`HttpProvider`]; everything else is
/// treated as a local file path. The initial load happens here, so a
/// malformed source fails construction.
pub fn create_provider(uri: &str) -> Result<Box<dyn Provider>> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        Ok(Box::new(HttpProvider::new(uri)?))
    } else {
        Ok(Box::new(FileProvider::new(uri)?))
    }
}

/// Fixed in-memory inventory.
#[derive(Debug)]
pub struct StaticProvider {
    resources: Vec<ResourceRecord>,
}

impl StaticProvider {
    /// Build from an already-parsed record list. Validates once.
    pub fn new(resources: Vec<ResourceRecord>) -> Result<Self> {
        validate_inventory(&resources)?;
        Ok(Self { resources })
    }

    /// Build from a JSON array value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(Self {
            resources: parse_inventory(value)?,
        })
    }
}

impl Provider for StaticProvider {
    fn snapshot(&self) -> &[ResourceRecord] {
        &self.resources
    }

    fn reload(&mut self) -> Result<()> {
        // Nothing to do.
        Ok(())
    }
}

/// Local JSON file inventory with modification-time gating.
#[derive(Debug)]
pub struct FileProvider {
    path: PathBuf,
    mtime: Option<SystemTime>,
    resources: Vec<ResourceRecord>,
}

impl FileProvider {
    /// Build from a file path, performing the initial read.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let mut provider = Self {
            path: path.into(),
            mtime: None,
            resources: Vec::new(),
        };
        provider.reload()?;
        Ok(provider)
    }
}

impl Provider for FileProvider {
    fn snapshot(&self) -> &[ResourceRecord] {
        &self.resources
    }

    fn reload(&mut self) -> Result<()> {
        let metadata = std::fs::metadata(&self.path).map_err(|e| {
            ReslockError::Provider(format!(
                "cannot stat resources file '{}': {e}",
                self.path.display()
            ))
        })?;
        let mtime = metadata.modified().map_err(|e| {
            ReslockError::Provider(format!(
                "cannot read mtime of '{}': {e}",
                self.path.display()
            ))
        })?;
        if self.mtime == Some(mtime) {
            return Ok(());
        }

        debug!("reading resources file {}", self.path.display());
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            ReslockError::Provider(format!(
                "cannot read resources file '{}': {e}",
                self.path.display()
            ))
        })?;
        let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
            ReslockError::Validation(format!(
                "invalid resources json file '{}': {e}",
                self.path.display()
            ))
        })?;
        self.resources = parse_inventory(value)?;
        self.mtime = Some(mtime);
        Ok(())
    }
}

/// Retry policy for the HTTP provider, mirroring a conventional
/// too-many-requests/server-error forcelist with exponential backoff.
const HTTP_RETRY_TOTAL: u32 = 5;
const HTTP_BACKOFF_FACTOR: f64 = 0.5;
const HTTP_RETRY_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

/// Remote JSON endpoint inventory.
#[derive(Debug)]
pub struct HttpProvider {
    uri: String,
    client: reqwest::blocking::Client,
    resources: Vec<ResourceRecord>,
    retry_total: u32,
    backoff_factor: f64,
}

impl HttpProvider {
    /// Build from a URL, performing the initial fetch.
    pub fn new(uri: impl Into<String>) -> Result<Self> {
        Self::with_policy(uri, HTTP_RETRY_TOTAL, HTTP_BACKOFF_FACTOR)
    }

    fn with_policy(uri: impl Into<String>, retry_total: u32, backoff_factor: f64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ReslockError::Provider(format!("cannot build http client: {e}")))?;
        let mut provider = Self {
            uri: uri.into(),
            client,
            resources: Vec::new(),
            retry_total,
            backoff_factor,
        };
        provider.reload()?;
        Ok(provider)
    }

    /// GET the inventory, retrying transient failures with backoff.
    fn fetch(&self) -> Result<serde_json::Value> {
        let mut last_error = String::new();
        for attempt in 1..=self.retry_total {
            if attempt > 1 {
                let backoff = self.backoff_factor * f64::from(1u32 << (attempt - 2));
                warn!(
                    "retrying {} in {backoff}s (attempt {attempt}/{}): {last_error}",
                    self.uri, self.retry_total
                );
                std::thread::sleep(Duration::from_secs_f64(backoff));
            }

            let response = match self.client.get(&self.uri).send() {
                Ok(response) => response,
                Err(e) => {
                    // Connection-level failure: transient, keep trying.
                    last_error = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            if HTTP_RETRY_STATUS.contains(&status.as_u16()) {
                last_error = format!("http status {status}");
                continue;
            }
            if !status.is_success() {
                return Err(ReslockError::Provider(format!(
                    "http status {status} from {}",
                    self.uri
                )));
            }

            return response
                .json()
                .map_err(|e| ReslockError::Provider(format!("invalid json from {}: {e}", self.uri)));
        }
        Err(ReslockError::Provider(format!(
            "giving up on {} after {} attempts: {last_error}",
            self.uri, self.retry_total
        )))
    }
}

impl Provider for HttpProvider {
    fn snapshot(&self) -> &[ResourceRecord] {
        &self.resources
    }

    fn reload(&mut self) -> Result<()> {
        debug!("fetching resources from {}", self.uri);
        let value = self.fetch()?;
        self.resources = parse_inventory(value)?;
        Ok(())
    }
}
