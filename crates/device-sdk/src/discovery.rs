//! Connection establishment: discovery request, redirect resolution and
//! WebSocket upgrade.
//!
//! ```text
//! device ── GET <destination_url> + identity headers ──▶ discovery
//!        ◀── 307 Location: https://node-7.example.com:8080 ──
//! device ── WS upgrade wss://node-7.example.com:8080/api/v2/device ──▶ node
//! ```

use std::sync::Arc;

use beacon_protocol::DEVICE_ENDPOINT_PATH;
use reqwest::redirect::Policy;
use reqwest::{StatusCode, Url};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

use crate::config::ClientConfig;
use crate::error::{DeviceSdkError, HandshakeFailure, Result, ServerError};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live transport plus where it points.
pub(crate) struct Connection {
    pub ws: WsStream,
    pub connect_url: Url,
    pub hostname: String,
}

/// Perform the full handshake described in the module docs.
pub(crate) async fn establish(config: &ClientConfig) -> Result<Connection> {
    let device_id = config.identity.device_id()?;
    let headers = config.identity.headers();
    for (name, value) in &headers {
        reqwest::header::HeaderValue::from_str(value).map_err(|e| {
            DeviceSdkError::Config(format!("header {name} value {value:?}: {e}"))
        })?;
    }

    let tls = crate::tls::client_config(
        config
            .client_identity_paths()
            .map(|(cert, key)| (cert.as_path(), key.as_path())),
        config.ca_bundle_path().map(|p| p.as_path()),
    )
    .await?;

    let http = reqwest::Client::builder()
        .redirect(Policy::none())
        .connect_timeout(config.timeouts.connect)
        .timeout(config.timeouts.request)
        .tcp_keepalive(config.timeouts.tcp_keepalive)
        .use_preconfigured_tls((*tls).clone())
        .build()?;

    let discovery_url = Url::parse(&config.destination_url).map_err(|e| {
        DeviceSdkError::Config(format!("destination_url {:?}: {e}", config.destination_url))
    })?;

    tracing::info!(device_id = %device_id, url = %discovery_url, "requesting discovery");
    let response = discover(&http, discovery_url, &headers).await?;

    let location = response.redirect_location()?;
    let connect_url = websocket_url(&location)?;
    let hostname = hostname_of(&connect_url)?;

    tracing::info!(
        device_id = %device_id,
        url = %connect_url,
        "redirected, opening websocket"
    );
    let ws = dial(config, &connect_url, &headers, tls).await?;

    Ok(Connection {
        ws,
        connect_url,
        hostname,
    })
}

// ── Discovery ────────────────────────────────────────────────────────

/// The parts of a discovery response the handshake cares about.
#[derive(Debug, Clone)]
pub(crate) struct DiscoveryResponse {
    pub status: u16,
    /// URL this response was received from (base for relative locations).
    pub url: Url,
    pub location: Option<String>,
    pub body: Vec<u8>,
    /// The redirect that led here, when one transparent hop was followed.
    pub prior: Option<Box<DiscoveryResponse>>,
}

impl DiscoveryResponse {
    async fn read(resp: reqwest::Response) -> Result<Self> {
        let status = resp.status().as_u16();
        let url = resp.url().clone();
        let location = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = resp.bytes().await?.to_vec();
        Ok(Self {
            status,
            url,
            location,
            body,
            prior: None,
        })
    }

    /// Locate the `307` (this response first, then the prior one) and
    /// resolve its `Location`.
    pub(crate) fn redirect_location(&self) -> std::result::Result<Url, ServerError> {
        let carrier = if self.status == StatusCode::TEMPORARY_REDIRECT.as_u16() {
            self
        } else {
            match self.prior.as_deref() {
                Some(prior) if prior.status == StatusCode::TEMPORARY_REDIRECT.as_u16() => prior,
                _ => {
                    return Err(ServerError::from_response(
                        self.status,
                        &self.body,
                        HandshakeFailure::UnexpectedStatus(self.status),
                    ))
                }
            }
        };

        let location = match carrier.location.as_deref() {
            Some(l) if !l.trim().is_empty() => l.trim(),
            _ => {
                return Err(ServerError::from_response(
                    carrier.status,
                    &carrier.body,
                    HandshakeFailure::MissingLocation,
                ))
            }
        };

        let invalid = || {
            ServerError::from_response(
                carrier.status,
                &carrier.body,
                HandshakeFailure::InvalidLocation(location.to_owned()),
            )
        };
        let url = carrier.url.join(location).map_err(|_| invalid())?;
        match url.scheme() {
            "http" | "https" if url.host_str().is_some() => Ok(url),
            _ => Err(invalid()),
        }
    }
}

fn is_transparent_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// GET the discovery URL.  A non-307 redirect is followed exactly once so a
/// fronting load balancer can bounce the request to the real discovery
/// service.
async fn discover(
    http: &reqwest::Client,
    url: Url,
    headers: &[(&'static str, String)],
) -> Result<DiscoveryResponse> {
    let first = DiscoveryResponse::read(get(http, url, headers).await?).await?;

    let status = StatusCode::from_u16(first.status).unwrap_or(StatusCode::OK);
    if !is_transparent_redirect(status) {
        return Ok(first);
    }
    let next = match first.location.as_deref().map(|l| first.url.join(l)) {
        Some(Ok(next)) => next,
        _ => return Ok(first),
    };

    tracing::debug!(from = %first.url, to = %next, status = first.status, "following discovery redirect");
    let mut second = DiscoveryResponse::read(get(http, next, headers).await?).await?;
    second.prior = Some(Box::new(first));
    Ok(second)
}

async fn get(
    http: &reqwest::Client,
    url: Url,
    headers: &[(&'static str, String)],
) -> Result<reqwest::Response> {
    let mut rb = http.get(url);
    for (name, value) in headers {
        rb = rb.header(*name, value.as_str());
    }
    Ok(rb.send().await?)
}

// ── Redirect → WebSocket URL ─────────────────────────────────────────

/// `http(s)://host:port/path` → `ws(s)://host:port/path/api/v2/device`.
pub(crate) fn websocket_url(location: &Url) -> std::result::Result<Url, ServerError> {
    let invalid = || {
        ServerError::from_response(
            StatusCode::TEMPORARY_REDIRECT.as_u16(),
            &[],
            HandshakeFailure::InvalidLocation(location.to_string()),
        )
    };

    let scheme = match location.scheme() {
        "http" => "ws",
        "https" => "wss",
        _ => return Err(invalid()),
    };

    let mut url = location.clone();
    url.set_scheme(scheme).map_err(|_| invalid())?;
    let path = format!("{}{}", url.path().trim_end_matches('/'), DEVICE_ENDPOINT_PATH);
    url.set_path(&path);
    Ok(url)
}

fn hostname_of(url: &Url) -> Result<String> {
    url.host_str()
        .map(str::to_owned)
        .ok_or_else(|| DeviceSdkError::Config(format!("redirect target {url} has no host")))
}

// ── WebSocket upgrade ────────────────────────────────────────────────

async fn dial(
    config: &ClientConfig,
    url: &Url,
    headers: &[(&'static str, String)],
    tls: Arc<rustls::ClientConfig>,
) -> Result<WsStream> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(DeviceSdkError::Upgrade)?;
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| DeviceSdkError::Config(format!("header {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| DeviceSdkError::Config(format!("header {name} value {value:?}: {e}")))?;
        request.headers_mut().insert(name, value);
    }

    let mut ws_config = WebSocketConfig::default();
    ws_config.write_buffer_size = config.write_buffer_bytes;
    ws_config.max_message_size = Some(config.max_message_bytes);
    ws_config.max_frame_size = Some(config.max_message_bytes);

    let upgrade = tokio_tungstenite::connect_async_tls_with_config(
        request,
        Some(ws_config),
        false,
        Some(Connector::Rustls(tls)),
    );

    match tokio::time::timeout(config.timeouts.upgrade, upgrade).await {
        Err(_) => Err(DeviceSdkError::HandshakeTimeout(
            "websocket upgrade",
            config.timeouts.upgrade,
        )),
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(tungstenite::Error::Http(resp))) => {
            let status = resp.status().as_u16();
            let body = resp.body().as_deref().unwrap_or_default();
            Err(ServerError::from_response(status, body, HandshakeFailure::UpgradeRejected(status)).into())
        }
        Ok(Err(e)) => Err(DeviceSdkError::Upgrade(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, location: Option<&str>, body: &[u8]) -> DiscoveryResponse {
        DiscoveryResponse {
            status,
            url: Url::parse("http://discovery.example.com:8080/api/v2/device").unwrap(),
            location: location.map(str::to_owned),
            body: body.to_vec(),
            prior: None,
        }
    }

    #[test]
    fn direct_307_uses_its_location() {
        let resp = response(307, Some("http://host:1234/path"), b"");
        let loc = resp.redirect_location().unwrap();
        let ws = websocket_url(&loc).unwrap();
        assert_eq!(ws.as_str(), "ws://host:1234/path/api/v2/device");
        assert_eq!(hostname_of(&ws).unwrap(), "host");
    }

    #[test]
    fn nested_307_is_found_on_the_prior_response() {
        let mut resp = response(400, None, b"not a websocket handshake");
        resp.prior = Some(Box::new(response(307, Some("https://node-7.example.com:8443"), b"")));

        let ws = websocket_url(&resp.redirect_location().unwrap()).unwrap();
        assert_eq!(ws.as_str(), "wss://node-7.example.com:8443/api/v2/device");
        assert_eq!(hostname_of(&ws).unwrap(), "node-7.example.com");
    }

    #[test]
    fn relative_location_resolves_against_response_url() {
        let resp = response(307, Some("/talaria"), b"");
        let ws = websocket_url(&resp.redirect_location().unwrap()).unwrap();
        assert_eq!(
            ws.as_str(),
            "ws://discovery.example.com:8080/talaria/api/v2/device"
        );
    }

    #[test]
    fn trailing_slash_is_not_doubled() {
        let loc = Url::parse("http://host:1234/").unwrap();
        assert_eq!(
            websocket_url(&loc).unwrap().as_str(),
            "ws://host:1234/api/v2/device"
        );
    }

    #[test]
    fn non_redirect_is_a_server_error() {
        let err = response(523, None, b"").redirect_location().unwrap_err();
        assert_eq!(err.status(), 523);
        assert_eq!(err.message(), "ErrorDeviceBusy");
        assert_eq!(err.cause, HandshakeFailure::UnexpectedStatus(523));

        let err = response(404, None, br#"{"code":404,"message":"not found"}"#)
            .redirect_location()
            .unwrap_err();
        assert_eq!(err.message(), "not found");
    }

    #[test]
    fn prior_non_307_does_not_count() {
        let mut resp = response(200, None, b"");
        resp.prior = Some(Box::new(response(302, Some("http://host:1234"), b"")));
        let err = resp.redirect_location().unwrap_err();
        assert_eq!(err.cause, HandshakeFailure::UnexpectedStatus(200));
    }

    #[test]
    fn redirect_without_location_is_rejected() {
        let err = response(307, None, b"").redirect_location().unwrap_err();
        assert_eq!(err.cause, HandshakeFailure::MissingLocation);

        let err = response(307, Some("  "), b"").redirect_location().unwrap_err();
        assert_eq!(err.cause, HandshakeFailure::MissingLocation);
    }

    #[test]
    fn non_http_location_is_rejected() {
        let err = response(307, Some("ftp://host/x"), b"")
            .redirect_location()
            .unwrap_err();
        assert!(matches!(err.cause, HandshakeFailure::InvalidLocation(_)));
    }

    #[test]
    fn transparent_redirect_statuses() {
        assert!(is_transparent_redirect(StatusCode::FOUND));
        assert!(is_transparent_redirect(StatusCode::PERMANENT_REDIRECT));
        assert!(!is_transparent_redirect(StatusCode::TEMPORARY_REDIRECT));
        assert!(!is_transparent_redirect(StatusCode::OK));
    }
}
