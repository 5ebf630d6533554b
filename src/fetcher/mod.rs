//! Page fetcher implementations

use crate::{PartitionSpec, Record};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod http;
pub mod parser;
pub mod retry_formatter;

pub use http::HttpFetcher;

/// Fetcher errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetcherError {
    /// Every attempt was answered with 429
    #[error("rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded {
        /// Attempts made
        attempts: u32,
    },

    /// Timeouts, connection failures or 5xx on every attempt
    #[error("transient failure after {attempts} attempts: {message}")]
    TransientFailure {
        /// Attempts made
        attempts: u32,
        /// Last error observed
        message: String,
    },

    /// 4xx other than 429; never retried
    #[error("request rejected with HTTP {status}: {message}")]
    FatalRequest {
        /// HTTP status
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// 2xx response whose body could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Request could not be built
    #[error("HTTP client error: {0}")]
    Client(String),

    /// Shutdown was requested while waiting to retry
    #[error("cancelled while waiting to retry")]
    Cancelled,
}

impl FetcherError {
    /// Attempts made before giving up, when the error came out of the retry loop.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RateLimitExceeded { attempts } | Self::TransientFailure { attempts, .. } => {
                Some(*attempts)
            }
            Self::FatalRequest { .. } | Self::InvalidResponse(_) => Some(1),
            Self::Client(_) | Self::Cancelled => None,
        }
    }

    /// Whether the failure concerns one page only, so the partition may skip it.
    pub fn is_page_fatal(&self) -> bool {
        matches!(self, Self::FatalRequest { .. } | Self::InvalidResponse(_))
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Position of the next page to fetch.
///
/// Stored as `page:<n>` or `token:<opaque>`; no cursor means the first page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Cursor {
    /// 1-based page number
    Page(u64),
    /// Opaque continuation token handed out by upstream
    Token(String),
}

impl Cursor {
    /// Cursor of the first page.
    pub fn first() -> Self {
        Self::Page(1)
    }

    /// Page number, for page-based cursors.
    pub fn page_number(&self) -> Option<u64> {
        match self {
            Self::Page(n) => Some(*n),
            Self::Token(_) => None,
        }
    }

    /// The following page, when it can be derived without upstream help.
    pub fn next_page(&self) -> Option<Self> {
        self.page_number().map(|n| Self::Page(n + 1))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page(n) => write!(f, "page:{n}"),
            Self::Token(token) => write!(f, "token:{token}"),
        }
    }
}

impl FromStr for Cursor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(n) = s.strip_prefix("page:") {
            let n = n
                .parse::<u64>()
                .map_err(|e| format!("invalid page cursor '{s}': {e}"))?;
            if n == 0 {
                return Err(format!("invalid page cursor '{s}': pages start at 1"));
            }
            Ok(Self::Page(n))
        } else if let Some(token) = s.strip_prefix("token:") {
            Ok(Self::Token(token.to_string()))
        } else {
            Err(format!("unrecognised cursor '{s}'"))
        }
    }
}

impl TryFrom<String> for Cursor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cursor> for String {
    fn from(cursor: Cursor) -> Self {
        cursor.to_string()
    }
}

/// One page of upstream results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Records in upstream order
    pub records: Vec<Record>,
    /// Where the next page starts, if there is one
    pub next_cursor: Option<Cursor>,
    /// Whether upstream has more data after this page
    pub has_more: bool,
    /// Items dropped because they carried no content
    pub malformed: u64,
    /// Total item count reported by upstream, if any
    pub total_count: Option<u64>,
}

/// Source of pages for a partition.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch the page at `cursor` (`None` is the first page).
    ///
    /// `Ok` with `has_more == false` means the partition is exhausted; an
    /// error means it is unknown whether more data exists.
    async fn fetch_page(
        &self,
        partition: &PartitionSpec,
        cursor: Option<&Cursor>,
    ) -> FetcherResult<Page>;

    /// Human-readable origin of the pages.
    fn base_url(&self) -> &str;
}
