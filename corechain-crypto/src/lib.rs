use anyhow::{anyhow, Result};
use corechain_core::{Address, CryptoProvider};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SIGNATURE_LENGTH};
use rand::rngs::OsRng;

#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub public_key: Vec<u8>,
    pub secret_key: Vec<u8>,
}

pub fn generate_keypair() -> KeyMaterial {
    let mut csprng = OsRng;
    let signing = SigningKey::generate(&mut csprng);
    let verify = signing.verifying_key();
    KeyMaterial {
        public_key: verify.to_bytes().to_vec(),
        secret_key: signing.to_bytes().to_vec(),
    }
}

/// Ed25519-backed `CryptoProvider`. Stands in for the spec's "ECDSA" — see
/// DESIGN.md for the rationale.
pub struct DefaultCryptoProvider;

impl DefaultCryptoProvider {
    pub fn new() -> Self {
        Self
    }

    pub fn address_from_public_key(&self, pk: &[u8]) -> Result<Address> {
        Ok(corechain_core::make_address(&[pk.to_vec()], 1))
    }
}

impl Default for DefaultCryptoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoProvider for DefaultCryptoProvider {
    fn sign(&self, secret_key: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
        let sk_arr: [u8; 32] = secret_key
            .try_into()
            .map_err(|_| anyhow!("bad secret key length"))?;
        let signing = SigningKey::from_bytes(&sk_arr);
        Ok(signing.sign(msg).to_bytes().to_vec())
    }

    fn verify(&self, public_key: &[u8], msg: &[u8], sig: &[u8]) -> bool {
        let Ok(pk_arr): std::result::Result<[u8; 32], _> = public_key.try_into() else {
            return false;
        };
        let Ok(vk) = VerifyingKey::from_bytes(&pk_arr) else {
            return false;
        };
        let Ok(sig_arr): std::result::Result<[u8; SIGNATURE_LENGTH], _> = sig.try_into() else {
            return false;
        };
        let signature = Signature::from_bytes(&sig_arr);
        vk.verify(msg, &signature).is_ok()
    }
}

pub fn address_to_string(addr: &Address) -> String {
    bs58::encode(addr).into_string()
}

pub fn address_from_string(s: &str) -> Result<Address> {
    let bytes = bs58::decode(s).into_vec()?;
    if bytes.len() != 32 {
        return Err(anyhow!("invalid address length"));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
