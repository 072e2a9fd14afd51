//! HTTP client for the account-aggregation service.
//!
//! A [`Client`] holds the long-lived client credentials. Every invocation of
//! the sync engine exchanges them once for a short-lived API key through
//! [`Client::authenticate`], and the resulting [`Session`] is used for all
//! item, account and transaction calls of that run. API keys are never
//! persisted.
use std::time::Duration;

use chrono::NaiveDate;
pub use reqwest::StatusCode;

use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

pub mod model;

pub use model::{Account, Connector, Item, ItemError, Transaction, ITEM_STATUS_UPDATED};

use model::{AuthRequest, AuthResponse, Page};

const API_KEY_HEADER: &str = "X-API-KEY";
const DEFAULT_PAGE_SIZE: u32 = 500;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum Error {
    #[error("credential exchange rejected ({status}): {body}")]
    Auth { status: StatusCode, body: String },
    #[error("upstream responded {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unable to decode upstream response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Error {
    /// The upstream error body, when the failure carried one.
    pub fn body(&self) -> Option<&str> {
        match self {
            Error::Auth { body, .. } | Error::Status { body, .. } => Some(body),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

pub struct Builder {
    base_url: Option<String>,
    credentials: Option<Credentials>,
    timeout: Duration,
    page_size: u32,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            credentials: None,
            timeout: DEFAULT_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn build(self) -> Result<Client, Error> {
        let http = reqwest::Client::builder().timeout(self.timeout).build()?;

        Ok(Client {
            http,
            base_url: self
                .base_url
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            credentials: self.credentials.unwrap_or(Credentials {
                client_id: String::new(),
                client_secret: String::new(),
            }),
            page_size: self.page_size,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    page_size: u32,
}

impl Client {
    /// Exchanges the client credentials for a short-lived API key.
    pub async fn authenticate(&self) -> Result<Session, Error> {
        let resp = self
            .http
            .post(format!("{}/auth", self.base_url))
            .json(&AuthRequest {
                client_id: &self.credentials.client_id,
                client_secret: &self.credentials.client_secret,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Auth { status, body });
        }

        let auth: AuthResponse = serde_json::from_slice(&resp.bytes().await?)?;

        Ok(Session {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            page_size: self.page_size,
            api_key: auth.api_key,
        })
    }
}

/// An authenticated handle, valid for the lifetime of one API key.
#[derive(Clone)]
pub struct Session {
    http: reqwest::Client,
    base_url: String,
    page_size: u32,
    api_key: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub async fn item(&self, item_id: &str) -> Result<Item, Error> {
        self.send(self.http.get(self.url(&format!("/items/{}", item_id))))
            .await
    }

    /// Lists every account of `item_id`, following pagination to the last
    /// page.
    pub async fn accounts(&self, item_id: &str) -> Result<Vec<Account>, Error> {
        self.paginated("/accounts", &[("itemId", item_id)]).await
    }

    /// Fetches every transaction booked on `account_id` between `from` and
    /// `to` (both inclusive), following pagination to the last page.
    pub async fn transactions(
        &self,
        account_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>, Error> {
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();

        self.paginated(
            "/transactions",
            &[
                ("accountId", account_id),
                ("from", from.as_str()),
                ("to", to.as_str()),
            ],
        )
        .await
    }

    /// Requests `path` page by page until a page comes back empty or the last
    /// reported page has been read. A response without `totalPages` is a
    /// single page.
    async fn paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<T>, Error> {
        let page_size = self.page_size.to_string();

        let mut records = vec![];
        let mut page_no = 1u32;
        loop {
            let page_param = page_no.to_string();
            let page: Page<T> = self
                .send(
                    self.http
                        .get(self.url(path))
                        .query(params)
                        .query(&[("pageSize", page_size.as_str()), ("page", page_param.as_str())]),
                )
                .await?;

            debug!(
                path,
                page = page_no,
                total_pages = page.total_pages,
                count = page.results.len(),
                "fetched page"
            );

            let exhausted = page.results.is_empty() || page_no >= page.total_pages;
            records.extend(page.results);
            if exhausted {
                break;
            }
            page_no += 1;
        }

        Ok(records)
    }

    /// Revokes the item upstream.
    pub async fn delete_item(&self, item_id: &str) -> Result<(), Error> {
        let resp = self
            .http
            .delete(self.url(&format!("/items/{}", item_id)))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Status { status, body });
        }

        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, Error> {
        let resp = req.header(API_KEY_HEADER, &self.api_key).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Status { status, body });
        }

        Ok(serde_json::from_slice(&resp.bytes().await?)?)
    }
}
