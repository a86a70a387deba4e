//! Group messaging: one sender-owned hash ratchet per session, with the
//! ratchet state shared out-of-band (typically through two-party sessions)
//! to every participant.

mod inbound;
mod message;
mod outbound;
mod ratchet;

pub use inbound::InboundGroupSession;
pub use outbound::OutboundGroupSession;

/// HKDF label separating group message keys from the two-party domain.
const MESSAGE_KEYS_INFO: &[u8] = b"MEGOLM_KEYS";
