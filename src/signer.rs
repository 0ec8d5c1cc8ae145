//! # Identity Signing and Verification
//!
//! The handshake engine is generic over a [`SignVerifier`] capability:
//! hash bytes, sign a digest with the local long-term key, verify a digest
//! against the set of trusted peer keys, and report the scheme's constant
//! signature length.
//!
//! The bundled implementation is Ed25519 ([`Ed25519SignVerifier`]): the
//! 32-byte public key doubles as the node's [`PeerID`], digests are BLAKE3,
//! and signatures are always 64 bytes. The constant length is a
//! protocol-level assumption: the handshake framer strips exactly
//! `sig_len()` trailing bytes from every frame, so a variable-length scheme
//! cannot be used here.

use std::fmt;

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;

use crate::peer::PeerID;

/// BLAKE3 digest of signed payloads.
pub type Digest = [u8; 32];

// ============================================================================
// Signature Error Types
// ============================================================================

/// Error type for signature verification failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    /// Signature is missing (empty).
    Missing,
    /// Signature has invalid length for the scheme.
    InvalidLength,
    /// No trusted key verified the signature.
    VerificationFailed,
    /// A trusted key is not a valid Ed25519 point.
    InvalidPublicKey,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureError::Missing => write!(f, "signature is missing"),
            SignatureError::InvalidLength => write!(f, "signature has invalid length"),
            SignatureError::VerificationFailed => write!(f, "signature verification failed"),
            SignatureError::InvalidPublicKey => write!(f, "invalid public key"),
        }
    }
}

impl std::error::Error for SignatureError {}

// ============================================================================
// Capability Surface
// ============================================================================

/// Hash, sign, and verify on behalf of a node's long-term identity.
pub trait SignVerifier: Send + Sync {
    /// Digest arbitrary bytes.
    fn hash(&self, data: &[u8]) -> Digest;

    /// Sign a digest with the local identity key.
    fn sign(&self, digest: &Digest) -> Vec<u8>;

    /// Verify a digest against the trusted peer set, returning the identity
    /// whose key produced the signature.
    fn verify(&self, digest: &Digest, signature: &[u8]) -> Result<PeerID, SignatureError>;

    /// Constant signature length of the scheme, in bytes.
    fn sig_len(&self) -> usize;
}

// ============================================================================
// Ed25519 Implementation
// ============================================================================

/// Ed25519 signing keypair. The public key is the node's identity.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    pub fn from_secret_key_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        Self { signing_key }
    }

    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn peer_id(&self) -> PeerID {
        PeerID::from_bytes(self.public_key_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("peer_id", &self.peer_id())
            .finish_non_exhaustive()
    }
}

/// Ed25519 signature length in bytes.
pub const ED25519_SIG_LEN: usize = 64;

/// [`SignVerifier`] backed by a local Ed25519 keypair and an explicit set of
/// trusted peer identities.
pub struct Ed25519SignVerifier {
    keypair: Keypair,
    trusted: Vec<PeerID>,
}

impl Ed25519SignVerifier {
    /// A verifier that trusts the given peer identities (their 32-byte values
    /// are Ed25519 public keys).
    pub fn new(keypair: Keypair, trusted: Vec<PeerID>) -> Self {
        Self { keypair, trusted }
    }

    pub fn peer_id(&self) -> PeerID {
        self.keypair.peer_id()
    }

    /// Add a trusted peer identity.
    pub fn trust(&mut self, peer: PeerID) {
        if !self.trusted.contains(&peer) {
            self.trusted.push(peer);
        }
    }
}

impl SignVerifier for Ed25519SignVerifier {
    fn hash(&self, data: &[u8]) -> Digest {
        *blake3::hash(data).as_bytes()
    }

    fn sign(&self, digest: &Digest) -> Vec<u8> {
        self.keypair.sign(digest).to_bytes().to_vec()
    }

    fn verify(&self, digest: &Digest, signature: &[u8]) -> Result<PeerID, SignatureError> {
        if signature.is_empty() {
            return Err(SignatureError::Missing);
        }
        let sig_bytes: [u8; ED25519_SIG_LEN] = signature
            .try_into()
            .map_err(|_| SignatureError::InvalidLength)?;
        let sig = Signature::from_bytes(&sig_bytes);

        for peer in &self.trusted {
            let key = VerifyingKey::from_bytes(peer.as_bytes())
                .map_err(|_| SignatureError::InvalidPublicKey)?;
            if key.verify(digest, &sig).is_ok() {
                return Ok(*peer);
            }
        }
        Err(SignatureError::VerificationFailed)
    }

    fn sig_len(&self) -> usize {
        ED25519_SIG_LEN
    }
}
