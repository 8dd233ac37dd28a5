//! Credential claims, fingerprinting and the signed-token codec.

pub mod claims;
pub mod codec;
pub mod fingerprint;

pub use claims::{Claims, CredentialClass};
pub use codec::TokenCodec;
pub use fingerprint::Fingerprint;
