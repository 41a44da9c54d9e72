//! In-process SPARQL store backed by oxigraph.
//!
//! Answers the same protocol requests as a remote endpoint and serializes
//! SELECT/ASK results as SPARQL 1.1 JSON, so everything above the transport
//! behaves identically against it. Used for embedded deployments and for
//! exercising the engine without a network.

use std::path::Path;

use oxigraph::model::Term;
use oxigraph::sparql::QueryResults;
use oxigraph::store::Store;
use serde_json::{Map, Value, json};

use super::transport::{Service, SparqlRequest, SparqlTransport, TransportResponse};
use crate::error::EndpointError;

/// SPARQL transport over a local oxigraph [`Store`].
pub struct EmbeddedTransport {
    store: Store,
    label: String,
}

impl EmbeddedTransport {
    /// Create a new in-memory store (no persistence).
    pub fn in_memory() -> Result<Self, EndpointError> {
        let store = Store::new().map_err(|e| EndpointError::Embedded {
            message: format!("failed to create oxigraph store: {e}"),
        })?;
        Ok(Self {
            store,
            label: "embedded:memory".into(),
        })
    }

    /// Open or create a persistent store at the given path.
    pub fn open(path: &Path) -> Result<Self, EndpointError> {
        std::fs::create_dir_all(path).map_err(|e| EndpointError::Embedded {
            message: format!("failed to create oxigraph directory: {e}"),
        })?;
        let store = Store::open(path).map_err(|e| EndpointError::Embedded {
            message: format!("failed to open oxigraph store at {}: {e}", path.display()),
        })?;
        Ok(Self {
            store,
            label: format!("embedded:{}", path.display()),
        })
    }

    /// Number of quads currently stored.
    pub fn len(&self) -> usize {
        self.store.len().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn run_query(&self, sparql: &str) -> TransportResponse {
        let results = match self.store.query(sparql) {
            Ok(r) => r,
            Err(e) => return bad_request(format!("query failed: {e}")),
        };

        let document = match results {
            QueryResults::Solutions(solutions) => {
                let mut vars: Vec<String> = Vec::new();
                let mut bindings = Vec::new();
                for solution in solutions {
                    let solution = match solution {
                        Ok(s) => s,
                        Err(e) => return bad_request(format!("solution error: {e}")),
                    };
                    let mut row = Map::new();
                    for (var, term) in solution.iter() {
                        let name = var.as_str().to_string();
                        if !vars.contains(&name) {
                            vars.push(name.clone());
                        }
                        row.insert(name, term_to_json(term));
                    }
                    bindings.push(Value::Object(row));
                }
                json!({ "head": { "vars": vars }, "results": { "bindings": bindings } })
            }
            QueryResults::Boolean(b) => json!({ "head": {}, "boolean": b }),
            QueryResults::Graph(_) => {
                return bad_request("CONSTRUCT/DESCRIBE queries are not supported".into());
            }
        };

        TransportResponse {
            status: 200,
            body: document.to_string(),
        }
    }

    fn run_update(&self, sparql: &str) -> TransportResponse {
        match self.store.update(sparql) {
            Ok(()) => TransportResponse {
                status: 204,
                body: String::new(),
            },
            Err(e) => bad_request(format!("update failed: {e}")),
        }
    }
}

impl SparqlTransport for EmbeddedTransport {
    fn execute(&self, request: &SparqlRequest<'_>) -> Result<TransportResponse, EndpointError> {
        Ok(match request.service {
            Service::Query => self.run_query(request.body),
            Service::Update => self.run_update(request.body),
        })
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

impl std::fmt::Debug for EmbeddedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedTransport")
            .field("label", &self.label)
            .finish()
    }
}

fn bad_request(message: String) -> TransportResponse {
    TransportResponse {
        status: 400,
        body: message,
    }
}

/// SPARQL 1.1 JSON term encoding.
fn term_to_json(term: &Term) -> Value {
    match term {
        Term::NamedNode(node) => json!({ "type": "uri", "value": node.as_str() }),
        Term::BlankNode(node) => json!({ "type": "bnode", "value": node.as_str() }),
        Term::Literal(literal) => json!({
            "type": "literal",
            "value": literal.value(),
            "datatype": literal.datatype().as_str(),
        }),
        #[allow(unreachable_patterns)]
        other => json!({ "type": "literal", "value": other.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn send(t: &EmbeddedTransport, service: Service, body: &str) -> TransportResponse {
        t.execute(&SparqlRequest {
            service,
            body,
            timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    #[test]
    fn insert_and_select() {
        let t = EmbeddedTransport::in_memory().unwrap();
        let resp = send(
            &t,
            Service::Update,
            "INSERT DATA { <http://e.org/a> <http://e.org/p> <http://e.org/b> . }",
        );
        assert_eq!(resp.status, 204);
        assert_eq!(t.len(), 1);

        let resp = send(&t, Service::Query, "SELECT ?s WHERE { ?s ?p ?o }");
        assert_eq!(resp.status, 200);
        let doc: Value = serde_json::from_str(&resp.body).unwrap();
        assert_eq!(doc["results"]["bindings"][0]["s"]["value"], "http://e.org/a");
        assert_eq!(doc["results"]["bindings"][0]["s"]["type"], "uri");
    }

    #[test]
    fn ask_returns_boolean_document() {
        let t = EmbeddedTransport::in_memory().unwrap();
        let resp = send(&t, Service::Query, "ASK { ?s ?p ?o }");
        let doc: Value = serde_json::from_str(&resp.body).unwrap();
        assert_eq!(doc["boolean"], false);
    }

    #[test]
    fn malformed_sparql_is_a_400() {
        let t = EmbeddedTransport::in_memory().unwrap();
        assert_eq!(send(&t, Service::Query, "SELEKT nothing").status, 400);
        assert_eq!(send(&t, Service::Update, "INSERT nonsense").status, 400);
    }

    #[test]
    fn literals_carry_datatype() {
        let t = EmbeddedTransport::in_memory().unwrap();
        send(
            &t,
            Service::Update,
            "INSERT DATA { <http://e.org/a> <http://e.org/p> \"x\" . }",
        );
        let resp = send(&t, Service::Query, "SELECT (COUNT(*) AS ?n) WHERE { ?s ?p ?o }");
        let doc: Value = serde_json::from_str(&resp.body).unwrap();
        let n = &doc["results"]["bindings"][0]["n"];
        assert_eq!(n["value"], "1");
        assert_eq!(n["datatype"], "http://www.w3.org/2001/XMLSchema#integer");
    }
}
