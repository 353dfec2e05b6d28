// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

//! Verifies a payload's metadata signature and full-payload signature
//! against a trusted RSA public key before any operation is executed.
//!
//! The teacher crate never does this (it only ever reads payloads, never
//! applies them to a device), so this is grounded in the sibling
//! `update-format-crau` implementation's `parse_signature_data` /
//! `verify_sig_pubkey`: a payload carries a `Signatures` message whose
//! `signatures` list holds one candidate per supported key; verification
//! succeeds if any one of them checks out against the trusted key.

use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::hazmat::PrehashVerifier;
use rsa::RsaPublicKey;
use sha2::Sha256;
use thiserror::Error;

use crate::wire::Signatures;
use prost::Message;

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("failed to parse public key: {0}")]
    InvalidKey(String),
    #[error("failed to decode Signatures message: {0}")]
    DecodeSignatures(#[from] prost::DecodeError),
    #[error("payload carries no signatures to check")]
    NoSignatures,
    #[error("none of the {candidates} candidate signatures verified against the trusted key")]
    NoValidSignature { candidates: usize },
}

/// A parsed RSA public key used to verify payload and metadata
/// signatures. Accepts either PKCS#8 PEM or DER, matching what update
/// servers typically distribute alongside a payload.
#[derive(Clone)]
pub struct TrustedKey {
    key: RsaPublicKey,
}

impl TrustedKey {
    pub fn from_pem(pem: &str) -> Result<Self, VerifierError> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| VerifierError::InvalidKey(e.to_string()))?;
        Ok(TrustedKey { key })
    }

    pub fn from_der(der: &[u8]) -> Result<Self, VerifierError> {
        let key = RsaPublicKey::from_public_key_der(der)
            .map_err(|e| VerifierError::InvalidKey(e.to_string()))?;
        Ok(TrustedKey { key })
    }
}

fn sha256_digest(data: &[u8]) -> [u8; 32] {
    use sha2::Digest;
    sha2::Sha256::digest(data).into()
}

/// Verifies `signed_region` against a serialized `Signatures` protobuf
/// message, trying each candidate signature in turn and returning success
/// on the first one that verifies. `signed_region` is hashed here; the
/// signature itself is over the SHA-256 digest (PKCS#1 v1.5, prehashed).
pub fn verify_signatures(
    signed_region: &[u8],
    signatures_bytes: &[u8],
    key: &TrustedKey,
) -> Result<(), VerifierError> {
    let signatures = Signatures::decode(signatures_bytes)?;
    if signatures.signatures.is_empty() {
        return Err(VerifierError::NoSignatures);
    }

    let digest = sha256_digest(signed_region);
    let verifying_key = VerifyingKey::<Sha256>::new(key.key.clone());

    for candidate in &signatures.signatures {
        let Ok(sig) = RsaSignature::try_from(candidate.data.as_slice()) else {
            continue;
        };
        if verifying_key.verify_prehash(&digest, &sig).is_ok() {
            return Ok(());
        }
    }

    tracing::error!(
        candidates = signatures.signatures.len(),
        "no candidate signature verified against the trusted key"
    );
    Err(VerifierError::NoValidSignature {
        candidates: signatures.signatures.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::SigningKey;
    use rsa::signature::hazmat::PrehashSigner;
    use rsa::traits::PublicKeyParts;
    use rsa::RsaPrivateKey;

    fn test_keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public = private.to_public_key();
        (private, public)
    }

    #[test]
    fn valid_signature_verifies() {
        let (private, public) = test_keypair();
        let data = b"manifest bytes go here";
        let digest = sha256_digest(data);

        let signing_key = SigningKey::<Sha256>::new(private);
        let signature = signing_key.sign_prehash(&digest).unwrap();

        let signatures = Signatures {
            signatures: vec![crate::wire::Signature {
                version: 2,
                data: signature.to_vec(),
            }],
        };
        let signatures_bytes = signatures.encode_to_vec();

        let trusted = TrustedKey { key: public };
        verify_signatures(data, &signatures_bytes, &trusted).unwrap();
    }

    #[test]
    fn wrong_key_is_rejected() {
        let (private, _public) = test_keypair();
        let (_other_private, other_public) = test_keypair();
        let data = b"manifest bytes go here";
        let digest = sha256_digest(data);

        let signing_key = SigningKey::<Sha256>::new(private);
        let signature = signing_key.sign_prehash(&digest).unwrap();

        let signatures = Signatures {
            signatures: vec![crate::wire::Signature {
                version: 2,
                data: signature.to_vec(),
            }],
        };
        let signatures_bytes = signatures.encode_to_vec();

        let trusted = TrustedKey { key: other_public };
        assert!(verify_signatures(data, &signatures_bytes, &trusted).is_err());
    }

    #[test]
    fn second_candidate_is_tried_if_first_fails() {
        let (private, public) = test_keypair();
        let data = b"manifest bytes go here";
        let digest = sha256_digest(data);

        let signing_key = SigningKey::<Sha256>::new(private);
        let good_signature = signing_key.sign_prehash(&digest).unwrap();

        let signatures = Signatures {
            signatures: vec![
                crate::wire::Signature {
                    version: 1,
                    data: vec![0u8; 256],
                },
                crate::wire::Signature {
                    version: 2,
                    data: good_signature.to_vec(),
                },
            ],
        };
        let signatures_bytes = signatures.encode_to_vec();

        let trusted = TrustedKey { key: public };
        verify_signatures(data, &signatures_bytes, &trusted).unwrap();
    }

    #[test]
    fn empty_signatures_message_is_rejected() {
        let (_private, public) = test_keypair();
        let signatures = Signatures { signatures: vec![] };
        let signatures_bytes = signatures.encode_to_vec();
        let trusted = TrustedKey { key: public };
        assert!(matches!(
            verify_signatures(b"data", &signatures_bytes, &trusted),
            Err(VerifierError::NoSignatures)
        ));
    }
}
