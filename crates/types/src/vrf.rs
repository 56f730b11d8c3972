// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Verifiable random function over edwards25519 with SHA-512.
//!
//! Proving a message yields a 64 byte output plus a proof `(gamma, c, s)`. Anyone holding the
//! verification key can check the proof and recompute the same output, so the output can be used
//! as a publicly checkable lottery ticket for leader sortition.

use std::fmt;

use curve25519_dalek::{
    constants::ED25519_BASEPOINT_POINT,
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar,
    traits::VartimeMultiscalarMul,
};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha512};

/// Number of bytes in a VRF output
pub const VRF_OUTPUT_LEN: usize = 64;

/// Domain tag for hashing the input onto the curve
const HASH_TO_CURVE_TAG: &[u8] = b"HOTPOKT_VRF_H2C";
/// Domain tag for nonce derivation
const NONCE_TAG: &[u8] = b"HOTPOKT_VRF_NONCE";
/// Domain tag for the Fiat-Shamir challenge
const CHALLENGE_TAG: &[u8] = b"HOTPOKT_VRF_CHALLENGE";
/// Domain tag for turning gamma into the output
const OUTPUT_TAG: &[u8] = b"HOTPOKT_VRF_OUTPUT";
/// Domain tag for deriving per-epoch keys
const DERIVE_TAG: &[u8] = b"HOTPOKT_VRF_KEY";

/// Secret scalar used to prove
#[derive(Clone)]
pub struct VrfSecretKey {
    /// the clamped scalar
    scalar: Scalar,
    /// cached verification key
    verification_key: VrfVerificationKey,
}

impl fmt::Debug for VrfSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VrfSecretKey")
            .field("verification_key", &self.verification_key)
            .finish_non_exhaustive()
    }
}

/// Public point used to verify proofs
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VrfVerificationKey {
    /// decompressed point
    point: EdwardsPoint,
    /// compressed encoding, the canonical serialized form
    compressed: [u8; 32],
}

impl fmt::Debug for VrfVerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VrfVerificationKey(")?;
        for byte in &self.compressed[..6] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

impl std::hash::Hash for VrfVerificationKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.compressed.hash(state);
    }
}

/// A proof that an output was computed with the secret matching a verification key
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VrfProof {
    /// `secret * H(input)`, compressed
    pub gamma: [u8; 32],
    /// challenge scalar
    pub c: [u8; 32],
    /// response scalar
    pub s: [u8; 32],
}

/// The pseudorandom output of a proof
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VrfOutput(pub [u8; VRF_OUTPUT_LEN]);

impl fmt::Debug for VrfOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VrfOutput(")?;
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

impl VrfOutput {
    /// Raw output bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; VRF_OUTPUT_LEN] {
        &self.0
    }
}

impl Serialize for VrfOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for VrfOutput {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: serde_bytes::ByteBuf = Deserialize::deserialize(deserializer)?;
        let value: [u8; VRF_OUTPUT_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| D::Error::custom("VRF output must be 64 bytes"))?;
        Ok(Self(value))
    }
}

impl VrfSecretKey {
    /// Derive a key from a 32 byte seed, clamping the scalar the same way ed25519 does.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let digest = Sha512::digest(seed);
        let mut scalar_bytes = [0u8; 32];
        scalar_bytes.copy_from_slice(&digest[..32]);
        scalar_bytes[0] &= 248;
        scalar_bytes[31] &= 127;
        scalar_bytes[31] |= 64;

        let scalar = Scalar::from_bytes_mod_order(scalar_bytes);
        let point = scalar * ED25519_BASEPOINT_POINT;
        Self {
            scalar,
            verification_key: VrfVerificationKey {
                point,
                compressed: point.compress().to_bytes(),
            },
        }
    }

    /// Derive the key a validator uses from `start_height` on.
    ///
    /// Keys are regenerated periodically; mixing the start height into the seed keeps every
    /// generation distinct while remaining reproducible from the signing key alone.
    #[must_use]
    pub fn derive(signing_seed: &[u8; 32], start_height: u64) -> Self {
        let mut hasher = Sha512::new();
        hasher.update(DERIVE_TAG);
        hasher.update(signing_seed);
        hasher.update(start_height.to_le_bytes());
        let digest = hasher.finalize();
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest[..32]);
        Self::from_seed(&seed)
    }

    /// The matching verification key
    #[must_use]
    pub fn verification_key(&self) -> VrfVerificationKey {
        self.verification_key
    }

    /// Evaluate the VRF on `input`.
    #[must_use]
    pub fn prove(&self, input: &[u8]) -> (VrfOutput, VrfProof) {
        let h = hash_to_curve(input);
        let gamma = self.scalar * h;

        let k = self.nonce(input);
        let u = k * ED25519_BASEPOINT_POINT;
        let v = k * h;

        let c = challenge(&self.verification_key.compressed, &h, &gamma, &u, &v);
        let s = k - c * self.scalar;

        let proof = VrfProof {
            gamma: gamma.compress().to_bytes(),
            c: c.to_bytes(),
            s: s.to_bytes(),
        };
        (gamma_to_output(&gamma), proof)
    }

    /// Deterministic nonce bound to the secret and the input
    fn nonce(&self, input: &[u8]) -> Scalar {
        let mut hasher = Sha512::new();
        hasher.update(NONCE_TAG);
        hasher.update(self.scalar.as_bytes());
        hasher.update(input);
        Scalar::from_hash(hasher)
    }
}

impl VrfVerificationKey {
    /// Parse a compressed point; `None` if it is not on the curve.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        let point = CompressedEdwardsY(*bytes).decompress()?;
        Some(Self {
            point,
            compressed: *bytes,
        })
    }

    /// Compressed encoding
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.compressed
    }

    /// Check `proof` for `input`, returning the output it commits to.
    #[must_use]
    pub fn verify(&self, input: &[u8], proof: &VrfProof) -> Option<VrfOutput> {
        let gamma = CompressedEdwardsY(proof.gamma).decompress()?;
        let c = Option::<Scalar>::from(Scalar::from_canonical_bytes(proof.c))?;
        let s = Option::<Scalar>::from(Scalar::from_canonical_bytes(proof.s))?;

        let h = hash_to_curve(input);
        // U = s*G + c*Y and V = s*H + c*Gamma
        let u = EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, &self.point, &s);
        let v = EdwardsPoint::vartime_multiscalar_mul([s, c], [h, gamma]);

        (challenge(&self.compressed, &h, &gamma, &u, &v) == c).then(|| gamma_to_output(&gamma))
    }

    /// Check that `output` is what `proof` commits to for `input`.
    #[must_use]
    pub fn verify_output(&self, input: &[u8], proof: &VrfProof, output: &VrfOutput) -> bool {
        self.verify(input, proof).is_some_and(|o| o == *output)
    }
}

impl Serialize for VrfVerificationKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.compressed.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VrfVerificationKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <[u8; 32]>::deserialize(deserializer)?;
        Self::from_bytes(&bytes).ok_or_else(|| D::Error::custom("invalid VRF verification key"))
    }
}

/// Map the input onto a point of the prime order subgroup.
fn hash_to_curve(input: &[u8]) -> EdwardsPoint {
    let mut hasher = Sha512::new();
    hasher.update(HASH_TO_CURVE_TAG);
    hasher.update(input);
    EdwardsPoint::nonspec_map_to_curve::<Sha512>(&hasher.finalize()).mul_by_cofactor()
}

/// Fiat-Shamir challenge over every public value of the proof
fn challenge(
    key: &[u8; 32],
    h: &EdwardsPoint,
    gamma: &EdwardsPoint,
    u: &EdwardsPoint,
    v: &EdwardsPoint,
) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(CHALLENGE_TAG);
    hasher.update(key);
    for point in [h, gamma, u, v] {
        hasher.update(point.compress().as_bytes());
    }
    Scalar::from_hash(hasher)
}

/// The output is a hash of the cofactor-cleared gamma
fn gamma_to_output(gamma: &EdwardsPoint) -> VrfOutput {
    let mut hasher = Sha512::new();
    hasher.update(OUTPUT_TAG);
    hasher.update(gamma.mul_by_cofactor().compress().as_bytes());
    let mut output = [0u8; VRF_OUTPUT_LEN];
    output.copy_from_slice(&hasher.finalize());
    VrfOutput(output)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn proofs_verify_and_reproduce_the_output() {
        let key = VrfSecretKey::from_seed(&[3; 32]);
        let (output, proof) = key.prove(b"1:0:genesis");
        let vk = key.verification_key();
        assert_eq!(vk.verify(b"1:0:genesis", &proof), Some(output));
        assert!(vk.verify_output(b"1:0:genesis", &proof, &output));

        let (again, _) = key.prove(b"1:0:genesis");
        assert_eq!(again, output);
    }

    #[test]
    fn proofs_fail_for_other_input_or_key() {
        let key = VrfSecretKey::from_seed(&[3; 32]);
        let other = VrfSecretKey::from_seed(&[4; 32]);
        let (_, proof) = key.prove(b"1:0:genesis");
        assert_eq!(key.verification_key().verify(b"1:1:genesis", &proof), None);
        assert_eq!(other.verification_key().verify(b"1:0:genesis", &proof), None);
    }

    #[test]
    fn tampered_proofs_are_rejected() {
        let key = VrfSecretKey::from_seed(&[9; 32]);
        let (output, mut proof) = key.prove(b"seed");
        proof.s[0] ^= 1;
        assert!(!key.verification_key().verify_output(b"seed", &proof, &output));
    }

    #[test]
    fn derived_keys_differ_per_start_height() {
        let a = VrfSecretKey::derive(&[1; 32], 0);
        let b = VrfSecretKey::derive(&[1; 32], 100);
        assert_ne!(a.verification_key(), b.verification_key());
        assert_eq!(
            a.verification_key(),
            VrfSecretKey::derive(&[1; 32], 0).verification_key()
        );
    }

    #[test]
    fn verification_key_serde_round_trip_checks_the_point() {
        let vk = VrfSecretKey::from_seed(&[5; 32]).verification_key();
        let bytes = bincode::serialize(&vk).unwrap();
        let decoded: VrfVerificationKey = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, vk);
    }
}
