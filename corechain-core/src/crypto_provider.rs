use anyhow::Result;

/// The seam between the data model and a concrete signature scheme.
/// `corechain-crypto` provides the production implementation (Ed25519);
/// keeping the trait here lets the validator and the miner depend only on
/// `corechain-core`, never on the concrete crypto backend.
pub trait CryptoProvider: Send + Sync {
    fn sign(&self, secret_key: &[u8], msg: &[u8]) -> Result<Vec<u8>>;
    fn verify(&self, public_key: &[u8], msg: &[u8], sig: &[u8]) -> bool;
}
