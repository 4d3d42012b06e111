//! PKCE (RFC 7636) verifier/challenge generation.

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    rand::Rng,
    secrecy::SecretString,
    sha2::{Digest, Sha256},
};

use crate::types::PkceChallenge;

/// Random bytes behind each verifier; encodes to 43 characters.
const VERIFIER_BYTES: usize = 32;

/// Generate a fresh verifier and its S256 challenge.
pub fn generate() -> PkceChallenge {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = challenge_for(&verifier);
    PkceChallenge {
        verifier: SecretString::new(verifier),
        challenge,
    }
}

/// `base64url(sha256(verifier))` without padding.
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret};

    #[test]
    fn test_verifier_length_within_bounds() {
        let pkce = generate();
        let len = pkce.verifier.expose_secret().len();
        assert!((43..=128).contains(&len), "verifier length {len}");
        assert!(
            pkce.verifier
                .expose_secret()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_challenge_is_sha256_of_verifier() {
        for _ in 0..16 {
            let pkce = generate();
            let decoded = URL_SAFE_NO_PAD.decode(&pkce.challenge).unwrap();
            let expected = Sha256::digest(pkce.verifier.expose_secret().as_bytes());
            assert_eq!(decoded.as_slice(), expected.as_slice());
        }
    }

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        assert_eq!(
            challenge_for("dBjftJeZ4CVP-mJ92K3qTBw_vNiWj2EGcBTZ6GsZ7Mg"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_verifiers_are_unique() {
        let a = generate();
        let b = generate();
        assert_ne!(a.verifier.expose_secret(), b.verifier.expose_secret());
    }
}
