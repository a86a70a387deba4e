//! An implementation of the Olm and Megolm cryptographic ratchets.
//!
//! [`Account`] holds a device's long-term identity and one-time keys,
//! [`Session`] is a two-party double-ratchet channel established through a
//! triple Diffie-Hellman handshake, and [`OutboundGroupSession`] /
//! [`InboundGroupSession`] implement the sender-key hash ratchet for group
//! messaging. Every stateful entity can be persisted with its `pickle`
//! method and restored with `from_pickle`.

mod account;
pub use account::{Account, IdentityKeys, OneTimeKeys, SignedOneTimeKey};

mod session;
pub use session::{MessageType, Session};

mod group;
pub use group::{InboundGroupSession, OutboundGroupSession};

mod error;
pub use error::Error;

mod types;
pub use types::Curve25519PublicKey;

pub mod utility;

mod cipher;
mod pickle;
mod wire;

/// The version of this library, as `(major, minor, patch)`.
pub fn version() -> (u8, u8, u8) {
    (
        env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
        env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
        env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
    )
}
