use std::path::{Path, PathBuf};

use bytes::Bytes;
use getset::Getters;
use http_body_util::{BodyExt, Empty};
use hyper::{header, Method, Request};
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;

use crate::{config::FlattenConfig, MonoflatError, MonoflatResult};

use super::{HistoryEntry, ImageInspect, ImageRuntime};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A client for the container runtime's remote API.
///
/// Requests go over HTTP/1.1 on the runtime's unix socket. When the socket cannot be reached, or
/// the connection fails mid-request, the request is retried exactly once against the legacy TCP
/// endpoint. Status errors from either transport are not retried.
#[derive(Debug, Getters)]
#[getset(get = "pub")]
pub struct DockerEngine {
    /// The unix socket the runtime listens on.
    socket_path: PathBuf,

    /// The API version prefix used on the unix socket, e.g. `v1.4`.
    api_version: String,

    /// The legacy endpoint including its API version prefix, e.g. `http://localhost:4243/v1.3`.
    legacy_endpoint: String,

    /// The HTTP client used for the legacy endpoint.
    #[getset(skip)]
    legacy_client: reqwest::Client,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DockerEngine {
    /// Creates a new client.
    ///
    /// # Errors
    /// Returns [`MonoflatError::HttpRequest`] if the legacy endpoint's HTTP client cannot be built.
    pub fn new(
        socket_path: impl AsRef<Path>,
        api_version: impl Into<String>,
        legacy_endpoint: impl Into<String>,
    ) -> MonoflatResult<Self> {
        let legacy_client = reqwest::Client::builder().no_proxy().build()?;

        Ok(Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            api_version: api_version.into(),
            legacy_endpoint: legacy_endpoint.into(),
            legacy_client,
        })
    }

    /// Creates a new client from the run configuration.
    pub fn from_config(config: &FlattenConfig) -> MonoflatResult<Self> {
        Self::new(
            config.docker_socket(),
            config.api_version().as_str(),
            config.legacy_endpoint().as_str(),
        )
    }

    /// Performs a GET request and returns the response body.
    async fn get(&self, path: &str) -> MonoflatResult<Bytes> {
        let (status, body) = match self.get_over_socket(path).await {
            Ok(response) => response,
            Err(socket_error) => {
                tracing::warn!(
                    "runtime socket {} unreachable ({}), trying legacy endpoint {}",
                    self.socket_path.display(),
                    socket_error,
                    self.legacy_endpoint
                );

                self.get_over_legacy(path).await.map_err(|legacy_error| {
                    MonoflatError::Unavailable(format!(
                        "socket {}: {}; legacy endpoint {}: {}",
                        self.socket_path.display(),
                        socket_error,
                        self.legacy_endpoint,
                        legacy_error
                    ))
                })?
            }
        };

        check_status(path, status, body)
    }

    /// Performs a GET request over the unix socket.
    async fn get_over_socket(&self, path: &str) -> MonoflatResult<(u16, Bytes)> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let io = TokioIo::new(stream);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("runtime connection closed: {}", e);
            }
        });

        let request = Request::builder()
            .method(Method::GET)
            .uri(format!("/{}/{}", self.api_version, path))
            .header(header::HOST, "localhost")
            .body(Empty::<Bytes>::new())
            .map_err(MonoflatError::custom)?;

        let response = sender.send_request(request).await?;
        let status = response.status().as_u16();
        let body = response.into_body().collect().await?.to_bytes();

        Ok((status, body))
    }

    /// Performs a GET request against the legacy TCP endpoint.
    async fn get_over_legacy(&self, path: &str) -> MonoflatResult<(u16, Bytes)> {
        let url = format!("{}/{}", self.legacy_endpoint.trim_end_matches('/'), path);
        let response = self.legacy_client.get(&url).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        Ok((status, body))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait::async_trait]
impl ImageRuntime for DockerEngine {
    async fn history(&self, image: &str) -> MonoflatResult<Vec<HistoryEntry>> {
        let body = self.get(&format!("images/{}/history", image)).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn inspect(&self, id: &str) -> MonoflatResult<ImageInspect> {
        let body = self.get(&format!("images/{}/json", id)).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Maps a response status to a result.
fn check_status(path: &str, status: u16, body: Bytes) -> MonoflatResult<Bytes> {
    match status {
        200..=299 => Ok(body),
        404 => Err(MonoflatError::NotFound(path.to_string())),
        _ => Err(MonoflatError::custom(anyhow::anyhow!(
            "runtime returned {} for {}: {}",
            status,
            path,
            String::from_utf8_lossy(&body).trim()
        ))),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
