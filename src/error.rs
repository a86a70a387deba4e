/// Errors that can occur during Olm/Megolm protocol operations.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// The random source yielded fewer bytes than the operation required.
    /// The entity the operation was called on is left unchanged.
    #[error("The random source did not supply enough bytes")]
    RandomSourceExhausted,

    /// An argument was empty or otherwise unusable where a value is required.
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A key string could not be decoded into a key of the expected type.
    #[error("Invalid or malformed key")]
    InvalidKey,

    /// A message envelope could not be parsed.
    #[error("Bad message format")]
    BadMessageFormat,

    /// Authentication of a message failed. Deliberately indistinguishable
    /// from decrypting with the wrong key.
    #[error("Bad message MAC")]
    BadMessageMac,

    /// A pre-key message referenced a one-time key this account does not
    /// hold, or the embedded keys do not match the session.
    #[error("Unknown one-time key referenced by the message")]
    BadMessageKeyId,

    /// The one-time key a session consumed is not live in the account pool.
    #[error("One-time key not found")]
    KeyNotFound,

    /// The message index is outside the range this ratchet can reach.
    #[error("Unknown message index")]
    UnknownMessageIndex,

    /// An account pickle failed to authenticate under the supplied key.
    #[error("Bad account pickle key")]
    BadAccountKey,

    /// A session pickle failed to authenticate under the supplied key.
    #[error("Bad session pickle key")]
    BadSessionKey,

    /// A pickle blob is structurally invalid or carries an unknown version.
    #[error("Corrupt pickle")]
    CorruptPickle,

    /// An Ed25519 signature did not verify.
    #[error("Signature verification failed")]
    SignatureMismatch,

    /// An internal invariant was violated. Indicates a bug in this crate,
    /// never bad caller input.
    #[error("Internal invariant violated: {0}")]
    Internal(&'static str),
}
