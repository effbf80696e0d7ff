// ============================================================================
// WebSocket handshake
// ============================================================================
//
// The room is resolved before the upgrade completes: a request without a
// usable room is answered with HTTP 400 and no session ever exists. Room
// access itself was authorized by the CRUD layer that handed out the link.
//
// Room:     `room` query parameter, else `room` header
// Identity: `identity` query parameter, else `x-identity` header, else
//           "anonymous"
//
// ============================================================================

use quickchat_config::GatewayConfig;
use quickchat_error::AppError;
use quickchat_types::RoomId;
use tokio_tungstenite::tungstenite::handshake::server::{
    Callback, ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode};

use crate::metrics;

pub const ANONYMOUS: &str = "anonymous";

/// What a successful handshake binds the session to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHandshake {
    pub room_id: RoomId,
    pub identity: String,
}

#[derive(Debug)]
pub enum HandshakeRejection {
    InvalidRoom(AppError),
    OriginNotAllowed(String),
}

impl HandshakeRejection {
    fn into_response(self) -> ErrorResponse {
        let (status, reason) = match &self {
            HandshakeRejection::InvalidRoom(_) => (StatusCode::BAD_REQUEST, "Invalid room"),
            HandshakeRejection::OriginNotAllowed(_) => (StatusCode::FORBIDDEN, "Origin not allowed"),
        };
        let mut response = ErrorResponse::new(Some(reason.to_string()));
        *response.status_mut() = status;
        response
    }
}

/// Resolve room and identity from an upgrade request
pub fn resolve(request: &Request, config: &GatewayConfig) -> Result<ResolvedHandshake, HandshakeRejection> {
    let headers = request.headers();

    let origin = header_value(headers, "origin");
    if !config.origin_allowed(origin) {
        return Err(HandshakeRejection::OriginNotAllowed(
            origin.unwrap_or_default().to_string(),
        ));
    }

    let query = request.uri().query().unwrap_or_default();
    let raw_room = query_value(query, "room").or_else(|| header_value(headers, "room").map(str::to_string));
    let room_id = RoomId::parse(raw_room.as_deref().unwrap_or_default())
        .map_err(|e| HandshakeRejection::InvalidRoom(e.into()))?;

    let identity = query_value(query, "identity")
        .or_else(|| header_value(headers, "x-identity").map(str::to_string))
        .map(|identity| identity.trim().to_string())
        .filter(|identity| !identity.is_empty())
        .unwrap_or_else(|| ANONYMOUS.to_string());

    Ok(ResolvedHandshake { room_id, identity })
}

fn query_value(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Handshake callback that records the resolved binding for the caller
pub struct HandshakeCallback<'a> {
    config: &'a GatewayConfig,
    resolved: &'a mut Option<ResolvedHandshake>,
}

impl<'a> HandshakeCallback<'a> {
    pub fn new(config: &'a GatewayConfig, resolved: &'a mut Option<ResolvedHandshake>) -> Self {
        Self { config, resolved }
    }
}

impl Callback for HandshakeCallback<'_> {
    fn on_request(self, request: &Request, response: Response) -> Result<Response, ErrorResponse> {
        match resolve(request, self.config) {
            Ok(handshake) => {
                *self.resolved = Some(handshake);
                Ok(response)
            }
            Err(rejection) => {
                metrics::HANDSHAKE_REJECTIONS.inc();
                match &rejection {
                    HandshakeRejection::InvalidRoom(e) => e.log(),
                    HandshakeRejection::OriginNotAllowed(origin) => {
                        tracing::warn!(origin = %origin, "Handshake rejected: origin not allowed");
                    }
                }
                Err(rejection.into_response())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_room_from_query() {
        let resolved = resolve(&request("/?room=abc&identity=alice", &[]), &GatewayConfig::default()).unwrap();
        assert_eq!(resolved.room_id.as_str(), "abc");
        assert_eq!(resolved.identity, "alice");
    }

    #[test]
    fn test_room_from_header_and_default_identity() {
        let resolved = resolve(&request("/", &[("room", "abc")]), &GatewayConfig::default()).unwrap();
        assert_eq!(resolved.room_id.as_str(), "abc");
        assert_eq!(resolved.identity, ANONYMOUS);
    }

    #[test]
    fn test_query_is_percent_decoded() {
        let resolved = resolve(
            &request("/?room=team%20one", &[("x-identity", "bob")]),
            &GatewayConfig::default(),
        )
        .unwrap();
        assert_eq!(resolved.room_id.as_str(), "team one");
        assert_eq!(resolved.identity, "bob");
    }

    #[test]
    fn test_missing_or_blank_room_is_rejected() {
        for uri in ["/", "/?room=", "/?room=%20%20", "/?identity=alice"] {
            let rejection = resolve(&request(uri, &[]), &GatewayConfig::default()).unwrap_err();
            assert!(matches!(rejection, HandshakeRejection::InvalidRoom(_)), "{uri}");
            assert_eq!(rejection.into_response().status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn test_origin_allow_list() {
        let config = GatewayConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            ..GatewayConfig::default()
        };

        assert!(resolve(&request("/?room=abc", &[("origin", "http://localhost:3000")]), &config).is_ok());

        let rejection =
            resolve(&request("/?room=abc", &[("origin", "http://evil.example")]), &config).unwrap_err();
        assert_eq!(rejection.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_callback_records_binding() {
        let config = GatewayConfig::default();
        let mut resolved = None;
        let callback = HandshakeCallback::new(&config, &mut resolved);

        let result = callback.on_request(&request("/?room=abc", &[]), Response::new(()));
        assert!(result.is_ok());
        assert_eq!(resolved.unwrap().room_id.as_str(), "abc");
    }
}
