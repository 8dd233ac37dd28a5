//! Signing keys: material, lifecycle and the snapshot-read key store.

pub mod material;
pub mod store;

pub use material::{KeyAlgorithm, PrivateMaterial, SigningKey, VerificationKey};
pub use store::{KeyRing, KeyStore};
