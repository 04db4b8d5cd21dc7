//! Page-by-page traversal of a paginated endpoint.
//!
//! The walker requests `page=1`, hands the decoded page to the caller and then
//! follows the page number carried by the `next` link until the API stops
//! returning one. Callers drive it with
//! `while let Some(page) = walker.next_page().await? { .. }`, so each page is
//! fully processed before the next request goes out.

use super::{BitbucketClient, PaginatedResponse};
use crate::cancel::Cancellation;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use tracing::debug;
use url::Url;

/// When a walk is considered finished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PagePolicy {
    /// Only an absent or empty `next` link ends the walk.
    #[default]
    NextLink,
    /// Additionally stop at the first page that carries no values.
    StopOnEmptyPage,
}

#[derive(Debug)]
enum Cursor {
    Page(u64),
    Failed(Error),
    Done,
}

pub struct PageWalker<'a, T> {
    client: &'a BitbucketClient,
    endpoint: String,
    params: Vec<(String, String)>,
    policy: PagePolicy,
    cancel: Cancellation,
    cursor: Cursor,
    requests: usize,
    _values: PhantomData<fn() -> T>,
}

impl<'a, T: DeserializeOwned> PageWalker<'a, T> {
    pub fn new(client: &'a BitbucketClient, endpoint: impl Into<String>, cancel: Cancellation) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            params: Vec::new(),
            policy: PagePolicy::default(),
            cancel,
            cursor: Cursor::Page(1),
            requests: 0,
            _values: PhantomData,
        }
    }

    /// Add a query parameter sent with every page request.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub const fn policy(mut self, policy: PagePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Number of requests issued so far.
    pub const fn requests(&self) -> usize {
        self.requests
    }

    /// Whether another page request is due.
    pub const fn has_next(&self) -> bool {
        matches!(self.cursor, Cursor::Page(_))
    }

    /// Fetch the next page.
    ///
    /// Returns `Ok(None)` once the walk is over or cancellation was requested.
    /// A malformed `next` link is reported by the call following the page
    /// that carried it, so the values of that page are never lost.
    pub async fn next_page(&mut self) -> Result<Option<PaginatedResponse<T>>> {
        let page = match std::mem::replace(&mut self.cursor, Cursor::Done) {
            Cursor::Done => return Ok(None),
            Cursor::Failed(err) => return Err(err),
            Cursor::Page(page) => page,
        };

        if self.cancel.is_cancelled() {
            debug!(endpoint = %self.endpoint, page, "walk cancelled");
            return Ok(None);
        }

        let page_number = page.to_string();
        let mut params: Vec<(&str, &str)> = self.params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        params.push(("page", page_number.as_str()));

        self.requests += 1;

        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            response = self.client.get::<PaginatedResponse<T>>(&self.endpoint, &params) => Some(response),
        };

        let Some(response) = outcome else {
            debug!(endpoint = %self.endpoint, page, "walk cancelled while waiting for a page");
            return Ok(None);
        };
        let response = response?;

        self.cursor = if self.policy == PagePolicy::StopOnEmptyPage && response.values.is_empty() {
            Cursor::Done
        } else {
            match next_page_number(response.next.as_deref()) {
                Ok(Some(next)) if next <= page => Cursor::Failed(Error::pagination(
                    response.next.clone().unwrap_or_default(),
                    format!("page {next} does not advance past page {page}"),
                )),
                Ok(Some(next)) => Cursor::Page(next),
                Ok(None) => Cursor::Done,
                Err(err) => Cursor::Failed(err),
            }
        };

        Ok(Some(response))
    }

    /// Walk every remaining page and return the union of their values.
    pub async fn collect_values(mut self) -> Result<Vec<T>> {
        let mut values = Vec::new();
        while let Some(page) = self.next_page().await? {
            values.extend(page.values);
        }
        Ok(values)
    }
}

/// Page number carried by a `next` link; `None` when there is no next page.
///
/// # Errors
///
/// `Error::Pagination` when the link is not a URL or has no numeric `page`.
pub fn next_page_number(next: Option<&str>) -> Result<Option<u64>> {
    let Some(link) = next.map(str::trim).filter(|link| !link.is_empty()) else {
        return Ok(None);
    };

    let url = Url::parse(link).map_err(|e| Error::pagination(link, e.to_string()))?;

    let page = url
        .query_pairs()
        .find(|(key, _)| key == "page")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| Error::pagination(link, "no page parameter"))?;

    page.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::pagination(link, format!("page {page:?} is not a number: {e}")))
}
