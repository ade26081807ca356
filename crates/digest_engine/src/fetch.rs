use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use chrono::Utc;
use digest_core::{HttpMethod, Item, Settings, SourceRef, SourceSpec};
use engine_logging::engine_debug;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::decode::{decode_page, DecodeError};
use crate::extract::{json_entries, select_fragments, Extracted, SelectorError};
use crate::{FailureKind, FetchError};

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl FetchSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        let request_timeout = settings.timeout();
        Self {
            connect_timeout: request_timeout.min(Duration::from_secs(10)),
            request_timeout,
            redirect_limit: 5,
            max_bytes: settings.max_body_bytes,
            user_agent: settings.user_agent.clone(),
        }
    }
}

/// Retrieves one source and turns its payload into items.
///
/// Implementations must not panic on bad input; every failure is a
/// `FetchError` scoped to `origin`.
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(
        &self,
        source: &SourceSpec,
        origin: &SourceRef,
    ) -> Result<Vec<Item>, FetchError>;
}

struct Payload {
    bytes: Vec<u8>,
    final_url: Url,
    content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    settings: FetchSettings,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Self {
        Self { settings }
    }

    fn build_client(
        &self,
        origin: &SourceRef,
        redirect_counter: Arc<AtomicUsize>,
    ) -> Result<reqwest::Client, FetchError> {
        let redirect_limit = self.settings.redirect_limit;
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            let count = attempt.previous().len();
            redirect_counter.store(count, Ordering::Relaxed);
            if count >= redirect_limit {
                attempt.error("redirect limit exceeded")
            } else {
                attempt.follow()
            }
        });

        reqwest::Client::builder()
            .connect_timeout(self.settings.connect_timeout)
            .timeout(self.settings.request_timeout)
            .user_agent(self.settings.user_agent.clone())
            .redirect(policy)
            .build()
            .map_err(|err| FetchError::new(origin, FailureKind::Network, err.to_string()))
    }

    fn request(
        &self,
        client: &reqwest::Client,
        source: &SourceSpec,
        url: Url,
    ) -> reqwest::RequestBuilder {
        match source {
            SourceSpec::Api {
                method,
                headers,
                bearer_token,
                ..
            } => {
                let mut builder = client.request(to_reqwest_method(*method), url);
                for (name, value) in headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                if let Some(token) = bearer_token {
                    builder = builder.bearer_auth(token);
                }
                builder
            }
            SourceSpec::Web { .. } => client.get(url),
        }
    }

    async fn download(
        &self,
        source: &SourceSpec,
        origin: &SourceRef,
    ) -> Result<Payload, FetchError> {
        let url = Url::parse(source.url())
            .map_err(|err| FetchError::new(origin, FailureKind::InvalidUrl, err.to_string()))?;
        let redirect_counter = Arc::new(AtomicUsize::new(0));
        let client = self.build_client(origin, redirect_counter.clone())?;

        let response = self
            .request(&client, source, url)
            .send()
            .await
            .map_err(|err| map_reqwest_error(origin, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                origin,
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(self.too_large(origin, content_len));
            }
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| map_reqwest_error(origin, err))?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(self.too_large(origin, next_len));
            }
            bytes.extend_from_slice(&chunk);
        }

        engine_debug!(
            "{}: {} bytes from {} after {} redirects",
            origin.label,
            bytes.len(),
            final_url,
            redirect_counter.load(Ordering::Relaxed)
        );

        Ok(Payload {
            bytes,
            final_url,
            content_type,
        })
    }

    fn too_large(&self, origin: &SourceRef, actual: u64) -> FetchError {
        FetchError::new(
            origin,
            FailureKind::TooLarge {
                max_bytes: self.settings.max_bytes,
                actual: Some(actual),
            },
            "response too large",
        )
    }
}

#[async_trait::async_trait]
impl SourceFetcher for ReqwestFetcher {
    async fn fetch(
        &self,
        source: &SourceSpec,
        origin: &SourceRef,
    ) -> Result<Vec<Item>, FetchError> {
        let payload = self.download(source, origin).await?;
        let entries = parse_payload(source, &payload)
            .map_err(|err| FetchError::new(origin, err.kind(), err.to_string()))?;
        let fetched_at = Utc::now();
        Ok(entries
            .into_iter()
            .map(|entry| {
                Item::new(origin.clone(), entry.content, fetched_at)
                    .with_text(entry.text)
                    .with_title(entry.title)
                    .with_link(entry.link)
                    .with_published(entry.published)
            })
            .collect())
    }
}

/// Failures turning a downloaded body into entries.
#[derive(Debug, thiserror::Error)]
enum PayloadError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Selector(#[from] SelectorError),
}

impl PayloadError {
    fn kind(&self) -> FailureKind {
        match self {
            PayloadError::Json(_) | PayloadError::Decode(_) => FailureKind::Decode,
            PayloadError::Selector(_) => FailureKind::InvalidSelector,
        }
    }
}

fn parse_payload(
    source: &SourceSpec,
    payload: &Payload,
) -> Result<Vec<Extracted>, PayloadError> {
    match source {
        SourceSpec::Api { .. } => {
            let value: serde_json::Value = serde_json::from_slice(&payload.bytes)?;
            Ok(json_entries(value))
        }
        SourceSpec::Web { selector, .. } => {
            let page = decode_page(&payload.bytes, payload.content_type.as_deref())?;
            Ok(select_fragments(&page.html, selector, Some(&payload.final_url))?)
        }
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Head => reqwest::Method::HEAD,
    }
}

fn map_reqwest_error(origin: &SourceRef, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(origin, FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return FetchError::new(origin, FailureKind::RedirectLimitExceeded, err.to_string());
    }
    FetchError::new(origin, FailureKind::Network, err.to_string())
}
