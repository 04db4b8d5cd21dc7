//! Error taxonomy of the collection core.
//!
//! The CLI and HTTP layers wrap these in `anyhow::Error`; collectors return them
//! to the registry, which logs them and records a failed run. None of them is
//! fatal for the process.

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request could not be built, could not be sent, or came back with a
    /// non-success status.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: BoxError,
    },

    /// The response body does not match the expected envelope.
    #[error("unable to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// The `next` link of a page does not carry a usable page number.
    #[error("invalid next page link {link:?}: {reason}")]
    Pagination { link: String, reason: String },

    /// A sub-collector was started without the configuration it requires.
    #[error("{collector}: {reason}")]
    Config {
        collector: &'static str,
        reason: String,
    },

    /// A spawned unit of work panicked or was aborted before finishing.
    #[error("{collector}: unit of work did not complete: {source}")]
    Task {
        collector: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl Error {
    pub fn transport(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            url: url.into(),
            source: source.into(),
        }
    }

    pub fn pagination(link: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Pagination {
            link: link.into(),
            reason: reason.into(),
        }
    }

    pub fn config(collector: &'static str, reason: impl Into<String>) -> Self {
        Self::Config {
            collector,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
