//! DNS override responder and upstream forwarder.
//!
//! Queries for overridden names (A, AAAA, ANY) are answered from the
//! [`OverrideTable`] without touching the network. Everything else is relayed
//! verbatim to the configured upstream resolvers, one at a time, accepting
//! only replies whose source socket address and transaction ID both match.

mod forward;
mod overrides;
mod resolver;
mod server;

pub use forward::{Forwarder, ResolveError};
pub use overrides::{OverrideRecord, OverrideTable};
pub use resolver::Resolver;
pub use server::DnsServer;

use hickory_proto::op::{Message, MessageType, ResponseCode};

/// Largest UDP payload accepted from clients or upstreams.
pub const MAX_UDP_PAYLOAD: usize = 4096;

const DNS_HEADER_LEN: usize = 12;

/// Parse an inbound packet, keeping only well-formed queries with a question.
pub(crate) fn parse_query(packet: &[u8]) -> Option<Message> {
    let request = Message::from_vec(packet).ok()?;
    if request.message_type() != MessageType::Query || request.queries().is_empty() {
        return None;
    }
    Some(request)
}

/// Start a response that mirrors the request header and question.
pub(crate) fn response_for(request: &Message) -> Message {
    let mut response = Message::new();
    response.set_id(request.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(request.op_code());
    response.set_recursion_desired(request.recursion_desired());
    response.set_recursion_available(true);
    if let Some(query) = request.queries().first() {
        response.add_query(query.clone());
    }
    response
}

/// SERVFAIL sent when no upstream produced a validated reply.
pub(crate) fn servfail_response(request: &Message) -> Option<Vec<u8>> {
    let mut response = response_for(request);
    response.set_response_code(ResponseCode::ServFail);
    response.to_vec().ok()
}

/// Transaction ID from the first two bytes of a raw DNS message.
pub(crate) fn transaction_id(packet: &[u8]) -> Option<u16> {
    if packet.len() < DNS_HEADER_LEN {
        return None;
    }
    Some(u16::from_be_bytes([packet[0], packet[1]]))
}

/// QR bit of a raw DNS message header.
pub(crate) fn is_response(packet: &[u8]) -> bool {
    packet.len() >= DNS_HEADER_LEN && packet[2] & 0x80 != 0
}
