use async_trait::async_trait;
use reqwest::{
    header::CONTENT_TYPE,
    multipart::{Form, Part},
    Client,
};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
    error::DispatchError,
    params::{FormPart, RequestBody, RequestEnvelope},
};

pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid request url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("relative url '{0}' needs a configured server url")]
    NoBaseUrl(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestEnvelope) -> Result<TransportResponse, TransportError>;
}

pub struct MissingTransport;

#[async_trait]
impl Transport for MissingTransport {
    async fn send(&self, request: &RequestEnvelope) -> Result<TransportResponse, TransportError> {
        Err(TransportError::Unavailable(format!(
            "no transport configured for {}",
            request.url
        )))
    }
}

pub struct HttpTransport {
    http: Client,
    base: Option<Url>,
}

impl HttpTransport {
    pub fn new(server_url: Option<&str>) -> Result<Self, TransportError> {
        let base = server_url
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| {
                Url::parse(raw).map_err(|source| TransportError::InvalidUrl {
                    url: raw.to_string(),
                    source,
                })
            })
            .transpose()?;
        Ok(Self {
            http: Client::new(),
            base,
        })
    }

    pub fn resolve(&self, raw: &str) -> Result<Url, TransportError> {
        match Url::parse(raw) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self
                    .base
                    .as_ref()
                    .ok_or_else(|| TransportError::NoBaseUrl(raw.to_string()))?;
                base.join(raw).map_err(|source| TransportError::InvalidUrl {
                    url: raw.to_string(),
                    source,
                })
            }
            Err(source) => Err(TransportError::InvalidUrl {
                url: raw.to_string(),
                source,
            }),
        }
    }

    fn multipart_form(parts: &[(String, FormPart)]) -> Result<Form, TransportError> {
        let mut form = Form::new();
        for (name, part) in parts {
            form = match part {
                FormPart::Text(value) => form.text(name.clone(), value.clone()),
                FormPart::File(file) => {
                    let mut file_part =
                        Part::bytes(file.bytes.clone()).file_name(file.name.clone());
                    if let Some(mime_type) = &file.mime_type {
                        file_part = file_part.mime_str(mime_type)?;
                    }
                    form.part(name.clone(), file_part)
                }
            };
        }
        Ok(form)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &RequestEnvelope) -> Result<TransportResponse, TransportError> {
        let url = self.resolve(&request.url)?;
        let builder = self.http.post(url);
        let builder = match &request.body {
            RequestBody::Encoded(_) => builder
                .header(CONTENT_TYPE, FORM_URLENCODED)
                .body(request.body.encode().unwrap_or_default()),
            RequestBody::Multipart(parts) => builder.multipart(Self::multipart_form(parts)?),
        };
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(status, bytes = body.len(), "transport: response received");
        Ok(TransportResponse { status, body })
    }
}

/// Sends `request` and sorts the outcome into a response body or a failure.
pub async fn perform_call(
    transport: &dyn Transport,
    request: &RequestEnvelope,
) -> Result<String, DispatchError> {
    let response = transport
        .send(request)
        .await
        .map_err(|err| DispatchError::Transport {
            url: request.url.clone(),
            reason: err.to_string(),
        })?;
    if !(200..300).contains(&response.status) {
        return Err(DispatchError::Server {
            status: response.status,
            body: response.body,
        });
    }
    if response.body.trim().is_empty() {
        return Err(DispatchError::EmptyResponse {
            url: request.url.clone(),
        });
    }
    Ok(response.body)
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
