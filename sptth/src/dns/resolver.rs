use super::{Forwarder, OverrideTable, parse_query, servfail_response};

/// Per-query decision: local override, upstream relay, or SERVFAIL.
#[derive(Debug)]
pub struct Resolver {
    overrides: OverrideTable,
    forwarder: Forwarder,
}

impl Resolver {
    pub fn new(overrides: OverrideTable, forwarder: Forwarder) -> Self {
        Self {
            overrides,
            forwarder,
        }
    }

    /// Produce the response bytes for one inbound packet.
    ///
    /// `None` means nothing is sent back: the packet did not parse as a query
    /// or a local answer could not be encoded. When every upstream fails the
    /// client gets a SERVFAIL carrying its transaction ID and question.
    pub async fn handle(&self, packet: &[u8]) -> Option<Vec<u8>> {
        let request = parse_query(packet)?;

        if let Some(response) = self.overrides.answer(&request) {
            return match response.to_vec() {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    tracing::warn!(id = request.id(), error = %e, "failed to encode local dns answer");
                    None
                }
            };
        }

        match self.forwarder.forward(packet).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                let name = request
                    .queries()
                    .first()
                    .map(|q| q.name().to_ascii())
                    .unwrap_or_default();
                tracing::warn!(id = request.id(), name = %name, error = %e, "answering SERVFAIL");
                servfail_response(&request)
            }
        }
    }
}
