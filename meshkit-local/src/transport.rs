//! Local HTTP transport: one JSON POST per command

use std::future::Future;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use meshkit_proto::local::{
    HEADER_NODE_COUNT, HEADER_NODE_MAC, HEADER_ROOT_RESPONSE, HEADER_TOKEN, REQUEST_PATH,
    RequestEnvelope, ResponseBody,
};
use tracing::debug;

use crate::error::TransportError;

/// One command addressed to the nodes behind a LAN address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRequest {
    pub host: String,
    pub port: u16,
    /// MACs of the targeted nodes
    pub nodes: Vec<String>,
    pub envelope: RequestEnvelope,
    pub token: Option<String>,
    /// Only the root node answers, on behalf of all targets
    pub root_response: bool,
    body: Vec<u8>,
}

impl LocalRequest {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        nodes: Vec<String>,
        envelope: RequestEnvelope,
    ) -> serde_json::Result<Self> {
        let body = envelope.to_bytes()?;
        Ok(Self {
            host: host.into(),
            port,
            nodes,
            envelope,
            token: None,
            root_response: false,
            body,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_root_response(mut self, root_response: bool) -> Self {
        self.root_response = root_response;
        self
    }

    pub fn uri(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, REQUEST_PATH)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Protocol headers, in the order they are sent
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_NODE_MAC, self.nodes.join(",")),
            (HEADER_NODE_COUNT, self.nodes.len().to_string()),
        ];
        if self.root_response {
            headers.push((HEADER_ROOT_RESPONSE, "true".to_string()));
        }
        if let Some(token) = &self.token {
            headers.push((HEADER_TOKEN, token.clone()));
        }
        headers
    }

    pub fn to_http(&self) -> Result<hyper::Request<Full<Bytes>>, TransportError> {
        let mut builder = hyper::Request::post(self.uri())
            .header(hyper::header::HOST, format!("{}:{}", self.host, self.port))
            .header(hyper::header::CONTENT_TYPE, "application/json");
        for (name, value) in self.headers() {
            builder = builder.header(name, value);
        }
        Ok(builder.body(Full::new(Bytes::from(self.body.clone())))?)
    }
}

/// Status and body of a device reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl LocalResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_http_ok(&self) -> bool {
        self.status == hyper::StatusCode::OK.as_u16()
    }

    pub fn parse(&self) -> serde_json::Result<ResponseBody> {
        ResponseBody::from_slice(&self.body)
    }
}

/// Sends one request and waits for its response.
///
/// `Err` means no response arrived. Any HTTP status is an `Ok`.
pub trait LocalTransport: Send + Sync + 'static {
    fn send(
        &self,
        request: &LocalRequest,
    ) -> impl Future<Output = Result<LocalResponse, TransportError>> + Send;
}

/// [`LocalTransport`] over HTTP/1.1, one connection per request
#[derive(Debug, Clone)]
pub struct HttpTransport {
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl LocalTransport for HttpTransport {
    async fn send(&self, request: &LocalRequest) -> Result<LocalResponse, TransportError> {
        let http = request.to_http()?;
        debug!(uri = %request.uri(), kind = request.envelope.kind(), "sending local request");
        tokio::time::timeout(self.timeout, exchange(&request.host, request.port, http))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
    }
}

async fn exchange(
    host: &str,
    port: u16,
    request: hyper::Request<Full<Bytes>>,
) -> Result<LocalResponse, TransportError> {
    let stream = tokio::net::TcpStream::connect((host, port)).await?;
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "local connection closed with error");
        }
    });

    let response = sender.send_request(request).await?;
    let status = response.status().as_u16();
    let body = response.into_body().collect().await?.to_bytes();
    debug!(status, len = body.len(), "local response");
    Ok(LocalResponse::new(status, body.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LocalRequest {
        LocalRequest::new(
            "10.0.0.5",
            80,
            vec!["aabbcc".into(), "ddeeff".into()],
            RequestEnvelope::add_whitelist(["112233"]),
        )
        .unwrap()
    }

    #[test]
    fn headers_for_root_response_with_token() {
        let req = request()
            .with_root_response(true)
            .with_token(Some("t0k".into()));
        assert_eq!(
            req.headers(),
            vec![
                (HEADER_NODE_MAC, "aabbcc,ddeeff".to_string()),
                (HEADER_NODE_COUNT, "2".to_string()),
                (HEADER_ROOT_RESPONSE, "true".to_string()),
                (HEADER_TOKEN, "t0k".to_string()),
            ]
        );
    }

    #[test]
    fn http_request_shape() {
        let http = request().to_http().unwrap();
        assert_eq!(http.method(), hyper::Method::POST);
        assert_eq!(http.uri(), "http://10.0.0.5:80/device_request");
        assert_eq!(http.headers()[HEADER_NODE_COUNT], "2");
        assert_eq!(http.headers()[hyper::header::CONTENT_TYPE], "application/json");
        assert!(http.headers().get(HEADER_TOKEN).is_none());
        assert!(http.headers().get(HEADER_ROOT_RESPONSE).is_none());
    }

    #[test]
    fn response_helpers() {
        let ok = LocalResponse::new(200, &br#"{"status_code":0}"#[..]);
        assert!(ok.is_http_ok());
        assert!(ok.parse().unwrap().is_success());
        assert!(!LocalResponse::new(500, Vec::new()).is_http_ok());
        assert!(LocalResponse::new(200, &b"<html>"[..]).parse().is_err());
    }
}
