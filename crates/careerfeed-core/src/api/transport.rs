//! HTTP transport seam.
//!
//! The pipeline never talks to `reqwest` directly: it hands an owned
//! [`HttpRequest`] to a [`Transport`]. Request bodies are kept in an owned,
//! clonable form so a request can be rebuilt for its single retry, which a
//! consumed `reqwest::multipart::Form` could not be.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::multipart::{Form, Part};
use reqwest::{header, Client, Method, StatusCode};
use serde::de::DeserializeOwned;

use super::ApiError;

/// A fully resolved outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: RequestBody,
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<FormField>),
}

#[derive(Debug, Clone)]
pub struct FormField {
    pub name: String,
    pub value: FormValue,
}

#[derive(Clone)]
pub enum FormValue {
    Text(String),
    File {
        file_name: String,
        content_type: String,
        bytes: Vec<u8>,
    },
}

impl fmt::Debug for FormValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormValue::Text(text) => f.debug_tuple("Text").field(text).finish(),
            FormValue::File {
                file_name,
                content_type,
                bytes,
            } => f
                .debug_struct("File")
                .field("file_name", file_name)
                .field("content_type", content_type)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

impl FormField {
    pub fn text(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: FormValue::Text(value.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body)
            .map_err(|e| ApiError::InvalidResponse(format!("{} (status {})", e, self.status)))
    }
}

/// Sends one request and returns whatever the server answered, success or not.
/// Only failures to get an answer at all are errors here.
pub trait Transport: Send + Sync {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, ApiError>>;
}

/// Production transport backed by `reqwest`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn build_form(fields: Vec<FormField>) -> Result<Form, ApiError> {
        let mut form = Form::new();
        for field in fields {
            form = match field.value {
                FormValue::Text(text) => form.text(field.name, text),
                FormValue::File {
                    file_name,
                    content_type,
                    bytes,
                } => {
                    let part = Part::bytes(bytes)
                        .file_name(file_name)
                        .mime_str(&content_type)
                        .map_err(|_| {
                            ApiError::Validation(format!("Invalid content type: {}", content_type))
                        })?;
                    form.part(field.name, part)
                }
            };
        }
        Ok(form)
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, ApiError>> {
        Box::pin(async move {
            let mut builder = self
                .client
                .request(request.method, &request.url)
                .header(header::ACCEPT, "application/json");

            if let Some(ref token) = request.bearer {
                builder = builder.bearer_auth(token);
            }

            builder = match request.body {
                RequestBody::Empty => builder,
                RequestBody::Json(value) => builder.json(&value),
                RequestBody::Multipart(fields) => builder.multipart(Self::build_form(fields)?),
            };

            let response = builder.send().await.map_err(ApiError::from_transport)?;
            let status = response.status();
            let body = response.text().await.map_err(ApiError::from_transport)?;

            Ok(HttpResponse { status, body })
        })
    }
}
