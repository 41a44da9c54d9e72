//! SPARQL protocol client: the only component that talks to the graph store.
//!
//! Transport failures are absorbed here and turned into signals the caller
//! can reason about:
//!
//! - reads return [`Solutions`] with `complete == false`,
//! - writes return an [`UpdateOutcome`],
//! - existence checks return a [`Presence`] (or `false` via [`ProtocolClient::ask`]).
//!
//! Nothing is retried. The auditor and the propagator have different
//! tolerance for false negatives, so retry policy belongs to them.

pub mod embedded;
pub mod transport;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::EndpointConfig;
use crate::error::EndpointError;
use transport::{HttpTransport, Service, SparqlRequest, SparqlTransport};

/// RiC-O ontology namespace.
pub const RICO_NS: &str = "https://www.ica.org/standards/RiC/ontology#";

/// `PREFIX` line for queries using `rico:` terms.
pub fn rico_prefix() -> String {
    format!("PREFIX rico: <{RICO_NS}>\n")
}

/// A single RDF term as encoded in SPARQL JSON results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdfTerm {
    /// `uri`, `literal`, `bnode` (or `typed-literal` from older servers).
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
}

/// One solution of a SELECT query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SolutionRow {
    bindings: BTreeMap<String, RdfTerm>,
}

impl SolutionRow {
    /// Lexical value bound to `var`, if any.
    pub fn value(&self, var: &str) -> Option<&str> {
        self.bindings.get(var).map(|t| t.value.as_str())
    }

    pub fn term(&self, var: &str) -> Option<&RdfTerm> {
        self.bindings.get(var)
    }
}

/// Result of a SELECT: the rows, and whether the store actually answered.
///
/// `complete == false` means the endpoint was unreachable or refused the
/// query; an empty `rows` then says nothing about the data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Solutions {
    pub rows: Vec<SolutionRow>,
    pub complete: bool,
}

impl Solutions {
    fn unavailable() -> Self {
        Self {
            rows: Vec::new(),
            complete: false,
        }
    }
}

/// Tri-state answer to an existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
    /// The store could not be asked; neither presence nor absence is known.
    Unknown,
}

/// What happened to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// 2xx from the update service.
    Applied,
    /// The store answered non-2xx, or the request never reached it.
    Rejected { status: Option<u16> },
    /// Timed out or interrupted: the write may have been partially applied.
    Unknown { reason: String },
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied)
    }

}

#[derive(Debug, Deserialize)]
struct ResultsDocument {
    #[serde(default)]
    results: Option<ResultsBody>,
    #[serde(default)]
    boolean: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ResultsBody {
    #[serde(default)]
    bindings: Vec<SolutionRow>,
}

/// Executes reads, writes and existence checks against one endpoint.
pub struct ProtocolClient {
    transport: Box<dyn SparqlTransport>,
    query_timeout: Duration,
    ask_timeout: Duration,
}

impl ProtocolClient {
    /// Client over HTTP to the configured endpoint.
    pub fn http(config: &EndpointConfig) -> Self {
        Self::with_transport(config, Box::new(HttpTransport::new(config)))
    }

    /// Client over an arbitrary transport, using the configured timeouts.
    pub fn with_transport(config: &EndpointConfig, transport: Box<dyn SparqlTransport>) -> Self {
        Self {
            transport,
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            ask_timeout: Duration::from_secs(config.ask_timeout_secs),
        }
    }

    /// Endpoint description for logs.
    pub fn endpoint(&self) -> String {
        self.transport.describe()
    }

    /// Run a SELECT. Never fails; see [`Solutions::complete`].
    pub fn query(&self, sparql: &str) -> Solutions {
        let Some(body) = self.read(sparql, self.query_timeout) else {
            return Solutions::unavailable();
        };
        match serde_json::from_str::<ResultsDocument>(&body) {
            Ok(ResultsDocument {
                results: Some(results),
                ..
            }) => Solutions {
                rows: results.bindings,
                complete: true,
            },
            Ok(_) => {
                tracing::warn!(endpoint = %self.endpoint(), "SELECT response carried no bindings");
                Solutions::unavailable()
            }
            Err(e) => {
                tracing::warn!(
                    endpoint = %self.endpoint(),
                    error = %e,
                    "malformed SELECT response"
                );
                Solutions::unavailable()
            }
        }
    }

    /// Run a single-row aggregate SELECT and read `var` as a count.
    ///
    /// `None` when the store did not answer or the value is not a number.
    pub fn count(&self, sparql: &str, var: &str) -> Option<usize> {
        let solutions = self.query(sparql);
        if !solutions.complete {
            return None;
        }
        match solutions.rows.first() {
            Some(row) => row.value(var)?.parse().ok(),
            None => Some(0),
        }
    }

    /// Run an update. `true` only on a 2xx answer.
    pub fn update(&self, sparql: &str) -> bool {
        self.update_outcome(sparql).is_applied()
    }

    /// Run an update whose failure the caller must report.
    ///
    /// A non-applied outcome becomes the [`EndpointError`] for it; an
    /// undelivered update names this client's endpoint.
    pub fn apply(&self, sparql: &str) -> Result<(), EndpointError> {
        match self.update_outcome(sparql) {
            UpdateOutcome::Applied => Ok(()),
            UpdateOutcome::Rejected {
                status: Some(status),
            } => Err(EndpointError::Rejected { status }),
            UpdateOutcome::Rejected { status: None } => Err(EndpointError::Unreachable {
                endpoint: self.endpoint(),
                message: "update was not delivered".into(),
            }),
            UpdateOutcome::Unknown { reason } => Err(EndpointError::OutcomeUnknown { reason }),
        }
    }

    /// Run an update and report exactly what is known about its effect.
    pub fn update_outcome(&self, sparql: &str) -> UpdateOutcome {
        let request = SparqlRequest {
            service: Service::Update,
            body: sparql,
            timeout: self.query_timeout,
        };
        match self.transport.execute(&request) {
            Ok(resp) if resp.is_success() => UpdateOutcome::Applied,
            Ok(resp) => {
                tracing::warn!(
                    endpoint = %self.endpoint(),
                    status = resp.status,
                    body = %truncate(&resp.body),
                    "SPARQL update rejected"
                );
                UpdateOutcome::Rejected {
                    status: Some(resp.status),
                }
            }
            Err(EndpointError::Unreachable { message, .. }) => {
                tracing::warn!(
                    endpoint = %self.endpoint(),
                    error = %message,
                    "SPARQL update not delivered"
                );
                UpdateOutcome::Rejected { status: None }
            }
            Err(e) => {
                tracing::warn!(
                    endpoint = %self.endpoint(),
                    error = %e,
                    "SPARQL update outcome unknown"
                );
                UpdateOutcome::Unknown {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Boolean existence check. Fails closed: an unreachable store answers `false`.
    pub fn ask(&self, sparql: &str) -> bool {
        self.presence(sparql) == Presence::Present
    }

    /// Tri-state existence check.
    pub fn presence(&self, sparql: &str) -> Presence {
        let Some(body) = self.read(sparql, self.ask_timeout) else {
            return Presence::Unknown;
        };
        match serde_json::from_str::<ResultsDocument>(&body) {
            Ok(ResultsDocument {
                boolean: Some(true),
                ..
            }) => Presence::Present,
            Ok(ResultsDocument {
                boolean: Some(false),
                ..
            }) => Presence::Absent,
            Ok(_) => {
                tracing::warn!(endpoint = %self.endpoint(), "ASK response carried no boolean");
                Presence::Unknown
            }
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint(), error = %e, "malformed ASK response");
                Presence::Unknown
            }
        }
    }

    /// POST to the query service; `None` on any failure.
    fn read(&self, sparql: &str, timeout: Duration) -> Option<String> {
        let request = SparqlRequest {
            service: Service::Query,
            body: sparql,
            timeout,
        };
        match self.transport.execute(&request) {
            Ok(resp) if resp.is_success() => Some(resp.body),
            Ok(resp) => {
                tracing::warn!(
                    endpoint = %self.endpoint(),
                    status = resp.status,
                    body = %truncate(&resp.body),
                    "SPARQL query rejected"
                );
                None
            }
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint(), error = %e, "SPARQL query failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("endpoint", &self.endpoint())
            .field("query_timeout", &self.query_timeout)
            .field("ask_timeout", &self.ask_timeout)
            .finish()
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use embedded::EmbeddedTransport;
    use transport::TransportResponse;

    /// Replays canned responses and records what was sent.
    struct Scripted {
        responses: Mutex<Vec<Result<TransportResponse, EndpointError>>>,
        sent: Mutex<Vec<(Service, String, Duration)>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<TransportResponse, EndpointError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl SparqlTransport for Scripted {
        fn execute(&self, request: &SparqlRequest<'_>) -> Result<TransportResponse, EndpointError> {
            self.sent.lock().unwrap().push((
                request.service,
                request.body.to_string(),
                request.timeout,
            ));
            self.responses.lock().unwrap().remove(0)
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn ok(status: u16, body: &str) -> Result<TransportResponse, EndpointError> {
        Ok(TransportResponse {
            status,
            body: body.into(),
        })
    }

    fn client(responses: Vec<Result<TransportResponse, EndpointError>>) -> ProtocolClient {
        ProtocolClient::with_transport(
            &EndpointConfig::default(),
            Box::new(Scripted::new(responses)),
        )
    }

    #[test]
    fn select_parses_bindings() {
        let c = client(vec![ok(
            200,
            r#"{"head":{"vars":["s"]},"results":{"bindings":[
                {"s":{"type":"uri","value":"http://e.org/a"}}
            ]}}"#,
        )]);
        let solutions = c.query("SELECT ?s WHERE { ?s ?p ?o }");
        assert!(solutions.complete);
        assert_eq!(solutions.rows.len(), 1);
        assert_eq!(solutions.rows[0].value("s"), Some("http://e.org/a"));
        assert_eq!(solutions.rows[0].term("s").unwrap().kind, "uri");
    }

    #[test]
    fn failed_select_is_incomplete_not_an_error() {
        let c = client(vec![
            ok(500, "boom"),
            Err(EndpointError::Unreachable {
                endpoint: "x".into(),
                message: "refused".into(),
            }),
            ok(200, "not json"),
        ]);
        for _ in 0..3 {
            let s = c.query("SELECT * WHERE { ?s ?p ?o }");
            assert!(!s.complete);
            assert!(s.rows.is_empty());
        }
    }

    #[test]
    fn update_outcomes() {
        let c = client(vec![
            ok(204, ""),
            ok(403, "forbidden"),
            Err(EndpointError::Unreachable {
                endpoint: "x".into(),
                message: "refused".into(),
            }),
            Err(EndpointError::Interrupted {
                message: "timed out".into(),
            }),
        ]);
        assert_eq!(c.update_outcome("INSERT DATA {}"), UpdateOutcome::Applied);
        assert_eq!(
            c.update_outcome("INSERT DATA {}"),
            UpdateOutcome::Rejected { status: Some(403) }
        );
        assert_eq!(
            c.update_outcome("INSERT DATA {}"),
            UpdateOutcome::Rejected { status: None }
        );
        assert!(matches!(
            c.update_outcome("INSERT DATA {}"),
            UpdateOutcome::Unknown { .. }
        ));
    }

    #[test]
    fn apply_names_the_endpoint_of_an_undelivered_update() {
        let c = client(vec![
            ok(204, ""),
            ok(500, "boom"),
            Err(EndpointError::Unreachable {
                endpoint: "x".into(),
                message: "refused".into(),
            }),
            Err(EndpointError::Interrupted {
                message: "timed out".into(),
            }),
        ]);
        assert!(c.apply("INSERT DATA {}").is_ok());
        assert!(matches!(
            c.apply("INSERT DATA {}"),
            Err(EndpointError::Rejected { status: 500 })
        ));
        let err = c.apply("INSERT DATA {}").unwrap_err();
        match &err {
            EndpointError::Unreachable { endpoint, .. } => assert_eq!(endpoint, &c.endpoint()),
            other => panic!("unexpected error: {other:?}"),
        }
        let message = err.to_string();
        assert!(message.contains(&c.endpoint()), "{message}");
        assert!(!message.contains("  "), "{message}");
        assert!(matches!(
            c.apply("INSERT DATA {}"),
            Err(EndpointError::OutcomeUnknown { .. })
        ));
    }

    #[test]
    fn ask_fails_closed_but_presence_says_unknown() {
        let down = || {
            Err(EndpointError::Interrupted {
                message: "timed out".into(),
            })
        };
        let c = client(vec![
            ok(200, r#"{"head":{},"boolean":true}"#),
            ok(200, r#"{"head":{},"boolean":false}"#),
            down(),
            down(),
        ]);
        assert_eq!(c.presence("ASK {}"), Presence::Present);
        assert_eq!(c.presence("ASK {}"), Presence::Absent);
        assert_eq!(c.presence("ASK {}"), Presence::Unknown);
        assert!(!c.ask("ASK {}"));
    }

    /// Lets a test keep a handle on the transport after handing it over.
    struct Shared(Arc<Scripted>);

    impl SparqlTransport for Shared {
        fn execute(&self, request: &SparqlRequest<'_>) -> Result<TransportResponse, EndpointError> {
            self.0.execute(request)
        }

        fn describe(&self) -> String {
            self.0.describe()
        }
    }

    #[test]
    fn asks_use_the_shorter_timeout() {
        let transport = Arc::new(Scripted::new(vec![
            ok(200, r#"{"head":{},"boolean":true}"#),
            ok(200, r#"{"head":{},"results":{"bindings":[]}}"#),
        ]));
        let config = EndpointConfig {
            query_timeout_secs: 30,
            ask_timeout_secs: 10,
            ..Default::default()
        };
        let c = ProtocolClient::with_transport(&config, Box::new(Shared(Arc::clone(&transport))));
        assert!(c.ask("ASK {}"));
        assert!(c.query("SELECT * {}").complete);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].0, Service::Query);
        assert_eq!(sent[0].2, Duration::from_secs(10));
        assert_eq!(sent[1].2, Duration::from_secs(30));
    }

    #[test]
    fn count_reads_aggregate() {
        let c = ProtocolClient::with_transport(
            &EndpointConfig::default(),
            Box::new(EmbeddedTransport::in_memory().unwrap()),
        );
        assert_eq!(c.count("SELECT (COUNT(*) AS ?n) WHERE { ?s ?p ?o }", "n"), Some(0));
        assert!(c.update(
            "INSERT DATA { <http://e.org/a> <http://e.org/p> <http://e.org/b> . \
             <http://e.org/a> <http://e.org/p> <http://e.org/c> . }"
        ));
        assert_eq!(c.count("SELECT (COUNT(*) AS ?n) WHERE { ?s ?p ?o }", "n"), Some(2));
    }

    #[test]
    fn truncate_long_bodies() {
        let long = "x".repeat(500);
        assert_eq!(truncate(&long).len(), 200);
        assert_eq!(truncate("short"), "short");
    }
}
