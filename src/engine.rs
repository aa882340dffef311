use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use http_body_util::{BodyExt, BodyStream, Empty};
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper::{header, Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tracing::{debug, instrument, trace};
use url::form_urlencoded;

use crate::error::{Error, Result};

/// An image in the local engine after a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalImage {
    pub id: String,
    /// Every `repository:tag` currently pointing at this image
    pub tags: Vec<String>,
}

impl LocalImage {
    /// `sha256:` followed by the first 10 hex characters of the id.
    pub fn short_id(&self) -> String {
        match self.id.strip_prefix("sha256:") {
            Some(hex) => format!("sha256:{}", &hex[..hex.len().min(10)]),
            None => self.id.chars().take(10).collect(),
        }
    }
}

/// A progress line streamed by the engine during a pull or push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Status {
        status: String,
        id: Option<String>,
        progress: Option<String>,
    },
    Error(String),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    status: Option<String>,
    id: Option<String>,
    progress: Option<String>,
    error: Option<String>,
}

impl From<RawEvent> for EngineEvent {
    fn from(raw: RawEvent) -> Self {
        match raw.error {
            Some(error) => Self::Error(error),
            None => Self::Status {
                status: raw.status.unwrap_or_default(),
                id: raw.id,
                progress: raw.progress,
            },
        }
    }
}

/// Splits the engine's newline delimited JSON into events, across chunk boundaries.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
}

impl EventDecoder {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<EngineEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            events.extend(decode_line(&line));
        }
        events
    }

    pub fn finish(&mut self) -> Option<Result<EngineEvent>> {
        let line = std::mem::take(&mut self.buffer);
        decode_line(&line)
    }
}

fn decode_line(line: &[u8]) -> Option<Result<EngineEvent>> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    trace!("engine: {text}");
    Some(
        serde_json::from_str::<RawEvent>(text)
            .map(EngineEvent::from)
            .map_err(|e| Error::Engine(format!("Unreadable engine event '{text}': {e}"))),
    )
}

/// The local container engine the archive pipeline pulls into and pushes from.
#[async_trait]
pub trait ImageEngine: Send + Sync {
    /// Fails with [Error::EngineUnavailable] when the engine can't be reached.
    async fn ping(&self) -> Result<()>;

    async fn pull(&self, repository: &str, tag: &str) -> Result<LocalImage>;

    /// Point `repository:tag` at the image `image_id`.
    async fn tag(&self, image_id: &str, repository: &str, tag: &str) -> Result<()>;

    /// Push `repository:tag`, yielding the engine's progress events as they arrive.
    async fn push(&self, repository: &str, tag: &str) -> Result<BoxStream<'static, Result<EngineEvent>>>;
}

/// Where the engine's HTTP API listens, as given by `DOCKER_HOST`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAddress {
    /// `host:port`
    Tcp(String),
    Unix(PathBuf),
}

impl EngineAddress {
    /// Accepts `unix:///path`, `tcp://host[:port]` and `http://host[:port]`.
    pub fn parse(host: &str) -> Result<Self> {
        let host = host.trim();
        if let Some(path) = host.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(Error::config(format!("Invalid docker host: {host}")));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        let addr = match host.strip_prefix("tcp://").or_else(|| host.strip_prefix("http://")) {
            Some(addr) => addr.trim_end_matches('/'),
            None if host.starts_with("https://") || host.starts_with("npipe://") => {
                return Err(Error::config(format!(
                    "Docker host {host} is not supported, use a unix:// socket or a plain tcp:// endpoint"
                )))
            }
            None => return Err(Error::config(format!("Invalid docker host: {host}"))),
        };
        if addr.is_empty() || addr.contains('/') {
            return Err(Error::config(format!("Invalid docker host: {host}")));
        }

        if addr.contains(':') {
            Ok(Self::Tcp(addr.to_string()))
        } else {
            Ok(Self::Tcp(format!("{addr}:2375")))
        }
    }

    fn host_header(&self) -> &str {
        match self {
            Self::Tcp(addr) => addr,
            Self::Unix(_) => "localhost",
        }
    }
}

impl fmt::Display for EngineAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Open a fresh HTTP/1 connection over `io`. The connection is driven on its own task.
async fn handshake<T>(io: T) -> std::result::Result<SendRequest<Empty<Bytes>>, BoxError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, connection) = http1::handshake(TokioIo::new(io)).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("Engine connection closed: {e}");
        }
    });
    Ok(sender)
}

/// Turn a non-2xx response into an error carrying the engine's message.
async fn success(response: Response<Incoming>) -> std::result::Result<Response<Incoming>, BoxError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.into_body().collect().await?.to_bytes();
    Err(format!("{status}: {}", String::from_utf8_lossy(&body).trim()).into())
}

/// [ImageEngine] backed by the Docker Engine HTTP API.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    address: EngineAddress,
}

impl DockerEngine {
    /// `host` takes the same form as `DOCKER_HOST`.
    pub fn new(host: &str) -> Result<Self> {
        Ok(Self {
            address: EngineAddress::parse(host)?,
        })
    }

    fn unavailable(&self, source: Option<BoxError>) -> Error {
        Error::EngineUnavailable {
            endpoint: self.address.to_string(),
            source,
        }
    }

    /// Send a request on a new connection. Non-2xx answers are errors.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> std::result::Result<Response<Incoming>, BoxError> {
        let mut uri = path.to_string();
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(&form_urlencoded::Serializer::new(String::new()).extend_pairs(query).finish());
        }

        // The engine insists on an auth header for pushes, even an empty one
        let auth = base64::engine::general_purpose::URL_SAFE.encode(b"{}");
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, self.address.host_header())
            .header("X-Registry-Auth", auth)
            .body(Empty::<Bytes>::new())?;

        let mut sender = match &self.address {
            EngineAddress::Tcp(addr) => handshake(TcpStream::connect(addr.as_str()).await?).await?,
            EngineAddress::Unix(path) => handshake(UnixStream::connect(path).await?).await?,
        };
        success(sender.send_request(request).await?).await
    }

    #[instrument(skip(self))]
    async fn inspect(&self, name: &str) -> Result<LocalImage> {
        #[derive(Debug, Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Inspect {
            id: String,
            #[serde(default)]
            repo_tags: Option<Vec<String>>,
        }

        let fetch = async {
            let response = self.send(Method::GET, &format!("/images/{name}/json"), &[]).await?;
            let body = response.into_body().collect().await?.to_bytes();
            Ok::<_, BoxError>(serde_json::from_slice::<Inspect>(&body)?)
        };
        let response = fetch
            .await
            .map_err(|e| Error::Engine(format!("Failed to inspect image {name}: {e}")))?;

        Ok(LocalImage {
            id: response.id,
            tags: response.repo_tags.unwrap_or_default(),
        })
    }
}

fn event_stream(body: Incoming) -> BoxStream<'static, Result<EngineEvent>> {
    let chunks = BodyStream::new(body)
        .filter_map(|frame| async move {
            match frame {
                Ok(frame) => frame.into_data().ok().map(Ok),
                Err(e) => Some(Err(e)),
            }
        })
        .boxed();
    let state = (chunks, EventDecoder::default(), VecDeque::new(), false);

    stream::unfold(state, |(mut chunks, mut decoder, mut ready, mut done)| async move {
        loop {
            if let Some(event) = ready.pop_front() {
                return Some((event, (chunks, decoder, ready, done)));
            }
            if done {
                return None;
            }

            match chunks.next().await {
                Some(Ok(bytes)) => ready.extend(decoder.feed(&bytes)),
                Some(Err(e)) => {
                    ready.push_back(Err(Error::Engine(format!("Engine stream interrupted: {e}"))));
                    done = true;
                }
                None => {
                    ready.extend(decoder.finish());
                    done = true;
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl ImageEngine for DockerEngine {
    #[instrument(skip(self))]
    async fn ping(&self) -> Result<()> {
        self.send(Method::GET, "/_ping", &[])
            .await
            .map_err(|e| self.unavailable(Some(e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pull(&self, repository: &str, tag: &str) -> Result<LocalImage> {
        let response = self
            .send(Method::POST, "/images/create", &[("fromImage", repository), ("tag", tag)])
            .await
            .map_err(|e| Error::Engine(format!("Failed to pull {repository}:{tag}: {e}")))?;

        let mut events = event_stream(response.into_body());
        while let Some(event) = events.next().await {
            match event? {
                EngineEvent::Error(message) => {
                    return Err(Error::Engine(format!("Failed to pull {repository}:{tag}: {message}")))
                }
                EngineEvent::Status { status, .. } => debug!("{status}"),
            }
        }

        self.inspect(&format!("{repository}:{tag}")).await
    }

    #[instrument(skip(self))]
    async fn tag(&self, image_id: &str, repository: &str, tag: &str) -> Result<()> {
        self.send(
            Method::POST,
            &format!("/images/{image_id}/tag"),
            &[("repo", repository), ("tag", tag)],
        )
        .await
        .map_err(|e| Error::Engine(format!("Failed to tag {image_id} as {repository}:{tag}: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn push(&self, repository: &str, tag: &str) -> Result<BoxStream<'static, Result<EngineEvent>>> {
        let response = self
            .send(Method::POST, &format!("/images/{repository}/push"), &[("tag", tag)])
            .await
            .map_err(|e| Error::Engine(format!("Failed to push {repository}:{tag}: {e}")))?;

        Ok(event_stream(response.into_body()))
    }
}
