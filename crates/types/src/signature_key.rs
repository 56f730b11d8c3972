// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Types and structs for the validator signature keys

use ed25519_dalek::{Signer, SigningKey, Verifier};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

/// Ed25519 public key used to verify a partial signature
pub type PublicKey = ed25519_dalek::VerifyingKey;
/// Ed25519 private key used to sign a message
pub type PrivateKey = SigningKey;
/// Ed25519 signature over the signable bytes of a message
pub type Signature = ed25519_dalek::Signature;

/// A validator's signing key pair.
#[derive(Clone, Serialize, Deserialize)]
pub struct SignatureKeyPair {
    /// private half
    private_key: PrivateKey,
}

impl std::fmt::Debug for SignatureKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureKeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

impl SignatureKeyPair {
    /// Wrap an existing private key
    #[must_use]
    pub fn new(private_key: PrivateKey) -> Self {
        Self { private_key }
    }

    /// Deterministically derive a key pair from a 32 byte seed and an index.
    ///
    /// Used to generate validator keys for tests and local networks.
    #[must_use]
    pub fn generated_from_seed_indexed(seed: [u8; 32], index: u64) -> Self {
        let mut rng = seeded_rng(seed, index);
        Self {
            private_key: SigningKey::generate(&mut rng),
        }
    }

    /// The public half of the pair
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.private_key.verifying_key()
    }

    /// The raw private key bytes. Also used to seed VRF key derivation.
    #[must_use]
    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.private_key.to_bytes()
    }

    /// Sign arbitrary bytes
    #[must_use]
    pub fn sign(&self, data: &[u8]) -> Signature {
        self.private_key.sign(data)
    }
}

/// Verify `signature` over `data` with `key`.
#[must_use]
pub fn verify_signature(key: &PublicKey, data: &[u8], signature: &Signature) -> bool {
    key.verify(data, signature).is_ok()
}

/// Seeded RNG mixing the index into the seed.
fn seeded_rng(seed: [u8; 32], index: u64) -> ChaCha20Rng {
    let mut mixed = seed;
    for (slot, byte) in mixed.iter_mut().zip(index.to_le_bytes()) {
        *slot ^= byte;
    }
    ChaCha20Rng::from_seed(mixed)
}
