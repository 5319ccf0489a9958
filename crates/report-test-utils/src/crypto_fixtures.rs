//! Deterministic signing keys for testing
//!
//! Two RSA keys (the provider's production algorithm) loaded from PEM
//! fixtures, plus seed-derived Ed25519 keys for the OKP path. Each key has a
//! matching public JWK so a mock key source can publish it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use report_service::auth::Jwk;
use ring::signature::{Ed25519KeyPair, KeyPair};

const RSA_KEY_1_PEM: &str = include_str!("../fixtures/rsa_key_1.pem");
const RSA_KEY_2_PEM: &str = include_str!("../fixtures/rsa_key_2.pem");

const RSA_KEY_1_N: &str = "jPvW3urPcbSbHH74u9ORnY0AN8WsORZbmwOSuDZhYmDZoZUdP4d2YqZxvnBLkev_MSCkbKICjdKXU_FZ-WnLCE75a83yl04KiO24KMG6duQfyDvubfqcHNOd36cphz0YOrn7RhFdO4xWJSpQa5BLKSytzGvQvRoVKJ-NCH3g8cQRVKiN9dymh0S9qIeFgfWp1oog31dC0Q59y_pANgCO_tXc2FGF-g3ESrjbCpIAsNi4Beru2LqbjYF6VplLzhqkxAmQl49NpuqJKSNaySPwkPqljHa2QRHUKWpnzZoooR2W4KKlowY6gSD4QIzXSOC1D-yRPJynbFu6WEOVyAYTKQ";
const RSA_KEY_2_N: &str = "1MhjRnBJVBq3-mzapbTkxCYB3Bmi7ihTyuKxUNfXS_4spwMrkWv6X8m7CWnIKVy9KvtmPwTQj9IolJfsEExc502lBWpg4V57c3k6rf5XiBwBKbod8s1xUUUls0IhgjtZ075cSbCWIopWS3DMJFTlres8NFXip90cINyzNC4itc4QsYgdHkQQ32Tvix4gJt0Yc4nOrxuyh1biBNIZtXGUg4UKT0Wz0SdcnnpHiQJilIOmgrhRjP8TGBVu_mcwkz47C8-A0VpNFkL2noiTtY0q4gGusZ6oVnodx_-V9C-UuRhhPkVRqs7vkXIDWvqtlaOGrRepvmYxx2BUx7UH7ToSlQ";

/// Public RSA exponent shared by both fixtures (65537).
const RSA_EXPONENT: &str = "AQAB";

/// A fixture signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestKey {
    /// RSA key published as `rsa-key-1`.
    Rsa1,
    /// RSA key published as `rsa-key-2`.
    Rsa2,
    /// Ed25519 key derived from `seed`, published as `ed25519-key-<seed>`.
    Ed25519 { seed: u8 },
}

impl TestKey {
    /// Key id the JWK is published under.
    pub fn kid(&self) -> String {
        match self {
            TestKey::Rsa1 => "rsa-key-1".to_string(),
            TestKey::Rsa2 => "rsa-key-2".to_string(),
            TestKey::Ed25519 { seed } => format!("ed25519-key-{seed}"),
        }
    }
}

/// PEM of an RSA fixture's private key. Panics for Ed25519 keys.
pub fn rsa_private_pem(key: TestKey) -> &'static str {
    match key {
        TestKey::Rsa1 => RSA_KEY_1_PEM,
        TestKey::Rsa2 => RSA_KEY_2_PEM,
        TestKey::Ed25519 { .. } => panic!("{key:?} is not an RSA key"),
    }
}

/// Public JWK for `key`, as the provider would publish it.
pub fn test_jwk(key: TestKey) -> Jwk {
    match key {
        TestKey::Rsa1 | TestKey::Rsa2 => Jwk {
            kty: "RSA".to_string(),
            kid: key.kid(),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            n: Some(
                if key == TestKey::Rsa1 { RSA_KEY_1_N } else { RSA_KEY_2_N }.to_string(),
            ),
            e: Some(RSA_EXPONENT.to_string()),
            crv: None,
            x: None,
        },
        TestKey::Ed25519 { seed } => Jwk {
            kty: "OKP".to_string(),
            kid: key.kid(),
            alg: Some("EdDSA".to_string()),
            key_use: Some("sig".to_string()),
            n: None,
            e: None,
            crv: Some("Ed25519".to_string()),
            x: Some(URL_SAFE_NO_PAD.encode(ed25519_public_key(seed))),
        },
    }
}

/// The key source document publishing `keys`.
pub fn jwks_document(keys: &[TestKey]) -> serde_json::Value {
    serde_json::json!({
        "keys": keys.iter().map(|k| test_jwk(*k)).collect::<Vec<_>>()
    })
}

/// Deterministic 32-byte seed; the same `seed` always yields the same key.
fn seed_bytes(seed: u8) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    for (i, byte) in bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }
    bytes
}

/// Raw 32-byte Ed25519 public key for `seed`.
pub fn ed25519_public_key(seed: u8) -> Vec<u8> {
    let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes(seed))
        .expect("seed is 32 bytes");
    key_pair.public_key().as_ref().to_vec()
}

/// PKCS#8 v1 DER of the Ed25519 key for `seed`.
pub fn ed25519_pkcs8(seed: u8) -> Vec<u8> {
    let seed = seed_bytes(seed);

    // SEQUENCE { INTEGER 0, SEQUENCE { OID 1.3.101.112 }, OCTET STRING { OCTET STRING seed } }
    let mut pkcs8 = vec![
        0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04,
        0x20,
    ];
    pkcs8.extend_from_slice(&seed);
    pkcs8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ed25519_keys_are_deterministic() {
        assert_eq!(ed25519_public_key(3), ed25519_public_key(3));
        assert_ne!(ed25519_public_key(3), ed25519_public_key(4));
    }

    #[test]
    fn test_pkcs8_matches_public_key() {
        let pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(&ed25519_pkcs8(7)).unwrap();
        assert_eq!(pair.public_key().as_ref(), ed25519_public_key(7).as_slice());
    }

    #[test]
    fn test_jwks_document_lists_every_key() {
        let doc = jwks_document(&[TestKey::Rsa1, TestKey::Ed25519 { seed: 1 }]);
        let keys = doc["keys"].as_array().unwrap();

        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0]["kid"], "rsa-key-1");
        assert_eq!(keys[0]["kty"], "RSA");
        assert_eq!(keys[1]["kty"], "OKP");
        assert_eq!(keys[1]["crv"], "Ed25519");
    }
}
