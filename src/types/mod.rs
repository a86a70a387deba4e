mod curve25519;
pub use curve25519::Curve25519PublicKey;
pub(crate) use curve25519::Curve25519SecretKey;

mod ed25519;
pub(crate) use ed25519::{
    signature_from_base64, signing_key_from_bytes, verifying_key_from_base64,
    verifying_key_from_bytes,
};

use crate::Error;
use base64::Engine;

const ENGINE: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD_NO_PAD;

/// Encodes bytes as unpadded standard base64, the convention for every
/// string-typed artifact this crate emits.
pub(crate) fn base64_encode(input: impl AsRef<[u8]>) -> String {
    ENGINE.encode(input)
}

pub(crate) fn base64_decode(input: impl AsRef<[u8]>) -> Result<Vec<u8>, Error> {
    ENGINE
        .decode(input)
        .map_err(|_| Error::BadMessageFormat)
}
