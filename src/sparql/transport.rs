//! Wire transports for the SPARQL 1.1 protocol.
//!
//! A [`SparqlTransport`] ships one request body to the store's query or
//! update service and hands back the raw status and body. It knows nothing
//! about result formats; [`ProtocolClient`](super::ProtocolClient) interprets
//! the response.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::config::EndpointConfig;
use crate::error::EndpointError;

/// Which service of the endpoint a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// `POST {endpoint}/query`: SELECT and ASK.
    Query,
    /// `POST {endpoint}/update`: INSERT and DELETE.
    Update,
}

impl Service {
    pub fn path(self) -> &'static str {
        match self {
            Service::Query => "query",
            Service::Update => "update",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Service::Query => "application/sparql-query",
            Service::Update => "application/sparql-update",
        }
    }
}

/// A single protocol request.
#[derive(Debug, Clone)]
pub struct SparqlRequest<'a> {
    pub service: Service,
    pub body: &'a str,
    pub timeout: Duration,
}

/// Raw response from the endpoint, any status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can carry SPARQL protocol requests to a store.
///
/// Implementations must be safe to call from several workers at once; the
/// protocol itself is stateless.
pub trait SparqlTransport: Send + Sync {
    /// Send the request. `Err` is reserved for failures where no HTTP status
    /// was obtained: [`EndpointError::Unreachable`] when the request provably
    /// never reached the store, [`EndpointError::Interrupted`] when it may have.
    fn execute(&self, request: &SparqlRequest<'_>) -> Result<TransportResponse, EndpointError>;

    /// Human-readable endpoint name for logs.
    fn describe(&self) -> String;
}

/// Blocking HTTP transport (ureq) against a Fuseki-style dataset URL.
pub struct HttpTransport {
    endpoint: String,
    authorization: Option<String>,
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(config: &EndpointConfig) -> Self {
        let authorization = config.username.as_ref().map(|user| {
            let password = config.password.as_deref().unwrap_or_default();
            format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
        });
        Self {
            endpoint: config.url.trim_end_matches('/').to_string(),
            authorization,
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    fn url(&self, service: Service) -> String {
        format!("{}/{}", self.endpoint, service.path())
    }
}

impl SparqlTransport for HttpTransport {
    fn execute(&self, request: &SparqlRequest<'_>) -> Result<TransportResponse, EndpointError> {
        let mut req = self
            .agent
            .post(&self.url(request.service))
            .timeout(request.timeout)
            .set("Content-Type", request.service.content_type());
        if request.service == Service::Query {
            req = req.set("Accept", "application/sparql-results+json");
        }
        if let Some(auth) = &self.authorization {
            req = req.set("Authorization", auth);
        }

        match req.send_string(request.body) {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.into_string().map_err(|e| EndpointError::Interrupted {
                    message: format!("reading response body: {e}"),
                })?;
                Ok(TransportResponse { status, body })
            }
            Err(ureq::Error::Status(status, resp)) => Ok(TransportResponse {
                status,
                body: resp.into_string().unwrap_or_default(),
            }),
            Err(ureq::Error::Transport(t)) => Err(classify_transport(&self.endpoint, &t)),
        }
    }

    fn describe(&self) -> String {
        self.endpoint.clone()
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint)
            .field("authenticated", &self.authorization.is_some())
            .finish()
    }
}

/// Split transport failures into "never sent" and "status unknown".
fn classify_transport(endpoint: &str, t: &ureq::Transport) -> EndpointError {
    use ureq::ErrorKind;

    match t.kind() {
        ErrorKind::InvalidUrl
        | ErrorKind::UnknownScheme
        | ErrorKind::Dns
        | ErrorKind::ConnectionFailed
        | ErrorKind::InsecureRequestHttpsOnly
        | ErrorKind::InvalidProxyUrl
        | ErrorKind::ProxyConnect
        | ErrorKind::ProxyUnauthorized => EndpointError::Unreachable {
            endpoint: endpoint.to_string(),
            message: t.to_string(),
        },
        _ => EndpointError::Interrupted {
            message: t.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(user: Option<&str>, password: Option<&str>) -> EndpointConfig {
        EndpointConfig {
            url: "http://localhost:3030/ric/".into(),
            username: user.map(str::to_string),
            password: password.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn service_urls() {
        let t = HttpTransport::new(&config(None, None));
        assert_eq!(t.url(Service::Query), "http://localhost:3030/ric/query");
        assert_eq!(t.url(Service::Update), "http://localhost:3030/ric/update");
        assert_eq!(t.describe(), "http://localhost:3030/ric");
    }

    #[test]
    fn basic_auth_header() {
        let t = HttpTransport::new(&config(Some("admin"), Some("secret")));
        // base64("admin:secret")
        assert_eq!(t.authorization.as_deref(), Some("Basic YWRtaW46c2VjcmV0"));

        let anonymous = HttpTransport::new(&config(None, Some("ignored")));
        assert!(anonymous.authorization.is_none());
    }

    #[test]
    fn unreachable_port_is_reported_without_status() {
        let mut cfg = config(None, None);
        // Port 9 (discard) is closed on test machines; nothing listens there.
        cfg.url = "http://127.0.0.1:9/ric".into();
        let t = HttpTransport::new(&cfg);
        let result = t.execute(&SparqlRequest {
            service: Service::Query,
            body: "ASK { ?s ?p ?o }",
            timeout: Duration::from_secs(2),
        });
        assert!(matches!(
            result,
            Err(EndpointError::Unreachable { .. }) | Err(EndpointError::Interrupted { .. })
        ));
    }

    #[test]
    fn success_range() {
        let ok = TransportResponse {
            status: 204,
            body: String::new(),
        };
        let bad = TransportResponse {
            status: 400,
            body: String::new(),
        };
        assert!(ok.is_success());
        assert!(!bad.is_success());
    }
}
