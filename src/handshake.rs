//! # Authenticated Session Handshake
//!
//! Proves to a peer that the opposing endpoint controls a long-term identity
//! key, and exchanges fresh RSA keys so either side could encrypt a one-shot
//! challenge to the other. The transport runs this once per TCP connection
//! before any message is exchanged; on success the connection is bound to the
//! verified [`PeerID`] both functions return.
//!
//! ## Wire format
//!
//! Every framed unit is `length:u64 LE ∥ payload ∥ signature`, where the
//! signature covers the digest of the leading `length - sig_len()` bytes and
//! has the constant length reported by the [`SignVerifier`]. Within payloads:
//!
//! - RSA public key: `E:64-bit LE ∥ N_len:u64 LE ∥ N big-endian`
//! - Challenge: `C_len:u64 LE ∥ PKCS#1 v1.5 ciphertext of a 32-byte nonce`
//!
//! ## Protocol
//!
//! 1. initiator → responder: fresh 2048-bit RSA public key
//! 2. responder → initiator: challenge encrypted to that key ∥ responder's
//!    fresh RSA public key
//! 3. initiator → responder: decrypted challenge re-encrypted to the
//!    responder's key
//!
//! The responder succeeds iff every signature verifies and the reply equals
//! the original nonce byte-for-byte. The RSA keys are ephemeral: they are
//! dropped when the handshake ends and never key a session cipher.
//!
//! State machines are strictly sequential (`SendInit → RecvChallenge →
//! SendReply` / `RecvInit → SendChallenge → RecvReply`); any failure
//! terminates the handshake and the caller closes the stream.

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::peer::PeerID;
use crate::signer::{SignVerifier, SignatureError};

/// Modulus size of the ephemeral keys.
const RSA_BITS: usize = 2048;

/// Challenge nonce length. The decrypted plaintext must be exactly this long.
const CHALLENGE_LEN: usize = 32;

/// Upper bound on a framed unit. A 2048-bit public key plus an encrypted
/// challenge plus a signature is well under this.
const MAX_FRAME_LEN: u64 = 4096;

/// Failure modes of a handshake. All of them terminate the session.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// A frame's signature did not verify under a trusted identity.
    #[error("handshake signature invalid: {0}")]
    SignatureInvalid(#[from] SignatureError),

    /// A frame or payload ended before its declared contents.
    #[error("short read: {got} bytes where {want} were declared")]
    ShortRead { want: u64, got: u64 },

    /// A frame's declared length exceeds the protocol bound.
    #[error("frame length {len} exceeds limit {max}")]
    FrameTooLarge { len: u64, max: u64 },

    /// The encrypted challenge did not decrypt to a 32-byte nonce.
    #[error("challenge decrypt failure")]
    ChallengeDecryptFailure,

    /// The decrypted reply differs from the challenge that was issued.
    #[error("challenge mismatch")]
    ChallengeMismatch,

    /// The underlying stream failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Ephemeral key generation or challenge encryption failed.
    #[error("rsa failure: {0}")]
    Rsa(rsa::Error),
}

/// Runs the handshake protocol over any byte stream.
pub struct Handshaker<V> {
    sign_verifier: Arc<V>,
}

impl<V> Clone for Handshaker<V> {
    fn clone(&self) -> Self {
        Self {
            sign_verifier: self.sign_verifier.clone(),
        }
    }
}

impl<V: SignVerifier> Handshaker<V> {
    pub fn new(sign_verifier: Arc<V>) -> Self {
        Self { sign_verifier }
    }

    /// Initiate a handshake with a remote responder. Returns the verified
    /// identity of the responder.
    pub async fn handshake<S>(&self, stream: &mut S) -> Result<PeerID, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let rsa_key = RsaPrivateKey::new(&mut OsRng, RSA_BITS).map_err(HandshakeError::Rsa)?;

        // SendInit: our fresh public key.
        let mut payload = Vec::new();
        write_pub_key(&mut payload, &rsa_key.to_public_key());
        self.send_frame(stream, &payload).await?;

        // RecvChallenge: decrypt their challenge, learn their public key.
        let (payload, responder) = self.recv_frame(stream).await?;
        let mut cursor = payload.as_slice();
        let challenge = read_challenge(&mut cursor, &rsa_key)?;
        let responder_key = read_pub_key(&mut cursor)?;

        // SendReply: the same nonce, encrypted to them.
        let mut payload = Vec::new();
        write_challenge(&mut payload, &challenge, &responder_key)?;
        self.send_frame(stream, &payload).await?;

        Ok(responder)
    }

    /// Wait for a remote initiator and complete the handshake. Returns the
    /// verified identity of the initiator.
    pub async fn accept_handshake<S>(&self, stream: &mut S) -> Result<PeerID, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let rsa_key = RsaPrivateKey::new(&mut OsRng, RSA_BITS).map_err(HandshakeError::Rsa)?;

        // RecvInit: the initiator's public key.
        let (payload, initiator) = self.recv_frame(stream).await?;
        let mut cursor = payload.as_slice();
        let initiator_key = read_pub_key(&mut cursor)?;

        // SendChallenge: a fresh nonce encrypted to them, plus our key.
        let mut challenge = [0u8; CHALLENGE_LEN];
        OsRng.fill_bytes(&mut challenge);
        let mut payload = Vec::new();
        write_challenge(&mut payload, &challenge, &initiator_key)?;
        write_pub_key(&mut payload, &rsa_key.to_public_key());
        self.send_frame(stream, &payload).await?;

        // RecvReply: must come from the same identity and carry our nonce.
        let (payload, replier) = self.recv_frame(stream).await?;
        if replier != initiator {
            return Err(HandshakeError::SignatureInvalid(
                SignatureError::VerificationFailed,
            ));
        }
        let mut cursor = payload.as_slice();
        let reply = read_challenge(&mut cursor, &rsa_key)?;

        if reply != challenge {
            return Err(HandshakeError::ChallengeMismatch);
        }
        Ok(initiator)
    }

    /// Sign the payload digest and emit `len ∥ payload ∥ signature`.
    async fn send_frame<S>(&self, stream: &mut S, payload: &[u8]) -> Result<(), HandshakeError>
    where
        S: AsyncWrite + Unpin,
    {
        let digest = self.sign_verifier.hash(payload);
        let sig = self.sign_verifier.sign(&digest);
        debug_assert_eq!(sig.len(), self.sign_verifier.sig_len());

        stream
            .write_u64_le((payload.len() + sig.len()) as u64)
            .await?;
        stream.write_all(payload).await?;
        stream.write_all(&sig).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Consume one frame, verify its trailing signature, and return the
    /// stripped payload with the identity that signed it.
    async fn recv_frame<S>(&self, stream: &mut S) -> Result<(Vec<u8>, PeerID), HandshakeError>
    where
        S: AsyncRead + Unpin,
    {
        let len = stream.read_u64_le().await?;
        if len > MAX_FRAME_LEN {
            return Err(HandshakeError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }
        let sig_len = self.sign_verifier.sig_len() as u64;
        if len < sig_len {
            return Err(HandshakeError::ShortRead { want: sig_len, got: len });
        }

        let mut frame = vec![0u8; len as usize];
        stream.read_exact(&mut frame).await?;

        let (payload, sig) = frame.split_at((len - sig_len) as usize);
        let digest = self.sign_verifier.hash(payload);
        let peer = self.sign_verifier.verify(&digest, sig)?;
        Ok((payload.to_vec(), peer))
    }
}

// ============================================================================
// Payload primitives
// ============================================================================

fn write_pub_key(buf: &mut Vec<u8>, key: &RsaPublicKey) {
    // The exponent travels as a 64-bit little-endian word; real-world
    // exponents (65537) are far below the bound.
    let mut e = [0u8; 8];
    let e_bytes = key.e().to_bytes_le();
    e[..e_bytes.len()].copy_from_slice(&e_bytes);
    buf.extend_from_slice(&e);

    let n = key.n().to_bytes_be();
    buf.extend_from_slice(&(n.len() as u64).to_le_bytes());
    buf.extend_from_slice(&n);
}

fn read_pub_key(cursor: &mut &[u8]) -> Result<RsaPublicKey, HandshakeError> {
    let e = take_u64_le(cursor)?;
    let n_len = take_u64_le(cursor)?;
    let n_bytes = take(cursor, n_len)?;
    let n = BigUint::from_bytes_be(n_bytes);
    RsaPublicKey::new(n, BigUint::from(e)).map_err(HandshakeError::Rsa)
}

fn write_challenge(
    buf: &mut Vec<u8>,
    challenge: &[u8; CHALLENGE_LEN],
    key: &RsaPublicKey,
) -> Result<(), HandshakeError> {
    let ciphertext = key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, challenge)
        .map_err(HandshakeError::Rsa)?;
    buf.extend_from_slice(&(ciphertext.len() as u64).to_le_bytes());
    buf.extend_from_slice(&ciphertext);
    Ok(())
}

fn read_challenge(
    cursor: &mut &[u8],
    key: &RsaPrivateKey,
) -> Result<[u8; CHALLENGE_LEN], HandshakeError> {
    let len = take_u64_le(cursor)?;
    let ciphertext = take(cursor, len)?;
    let plaintext = key
        .decrypt(Pkcs1v15Encrypt, ciphertext)
        .map_err(|_| HandshakeError::ChallengeDecryptFailure)?;
    let challenge: [u8; CHALLENGE_LEN] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| HandshakeError::ChallengeDecryptFailure)?;
    Ok(challenge)
}

fn take_u64_le(cursor: &mut &[u8]) -> Result<u64, HandshakeError> {
    let bytes = take(cursor, 8)?;
    Ok(u64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
}

fn take<'a>(cursor: &mut &'a [u8], n: u64) -> Result<&'a [u8], HandshakeError> {
    if (cursor.len() as u64) < n {
        return Err(HandshakeError::ShortRead {
            want: n,
            got: cursor.len() as u64,
        });
    }
    let (head, tail) = cursor.split_at(n as usize);
    *cursor = tail;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{Ed25519SignVerifier, Keypair};

    // Unit tests use short RSA keys; the protocol itself always generates
    // 2048-bit keys.
    const TEST_RSA_BITS: usize = 512;

    fn make_handshaker(
        me: &Keypair,
        trusts: &Keypair,
    ) -> Handshaker<Ed25519SignVerifier> {
        let sv = Ed25519SignVerifier::new(me.clone(), vec![trusts.peer_id()]);
        Handshaker::new(Arc::new(sv))
    }

    #[test]
    fn pub_key_roundtrip() {
        let key = RsaPrivateKey::new(&mut OsRng, TEST_RSA_BITS).unwrap();
        let public = key.to_public_key();

        let mut buf = Vec::new();
        write_pub_key(&mut buf, &public);
        let mut cursor = buf.as_slice();
        let decoded = read_pub_key(&mut cursor).unwrap();

        assert_eq!(decoded, public);
        assert!(cursor.is_empty());
    }

    #[test]
    fn challenge_roundtrip() {
        let key = RsaPrivateKey::new(&mut OsRng, TEST_RSA_BITS).unwrap();
        let challenge = [0x5Au8; CHALLENGE_LEN];

        let mut buf = Vec::new();
        write_challenge(&mut buf, &challenge, &key.to_public_key()).unwrap();
        let mut cursor = buf.as_slice();
        assert_eq!(read_challenge(&mut cursor, &key).unwrap(), challenge);
    }

    #[test]
    fn challenge_wrong_key_fails_decrypt() {
        let key = RsaPrivateKey::new(&mut OsRng, TEST_RSA_BITS).unwrap();
        let other = RsaPrivateKey::new(&mut OsRng, TEST_RSA_BITS).unwrap();
        let challenge = [0x5Au8; CHALLENGE_LEN];

        let mut buf = Vec::new();
        write_challenge(&mut buf, &challenge, &key.to_public_key()).unwrap();
        let mut cursor = buf.as_slice();
        assert!(matches!(
            read_challenge(&mut cursor, &other),
            Err(HandshakeError::ChallengeDecryptFailure)
        ));
    }

    #[test]
    fn truncated_payload_is_short_read() {
        let key = RsaPrivateKey::new(&mut OsRng, TEST_RSA_BITS).unwrap();
        let mut buf = Vec::new();
        write_pub_key(&mut buf, &key.to_public_key());
        buf.truncate(buf.len() - 4);

        let mut cursor = buf.as_slice();
        assert!(matches!(
            read_pub_key(&mut cursor),
            Err(HandshakeError::ShortRead { .. })
        ));
    }

    #[tokio::test]
    async fn frame_roundtrip_verifies_signer() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();

        let alice_hs = make_handshaker(&alice, &bob);
        let bob_hs = make_handshaker(&bob, &alice);

        let (mut a, mut b) = tokio::io::duplex(1024);
        alice_hs.send_frame(&mut a, b"hello frame").await.unwrap();

        let (payload, peer) = bob_hs.recv_frame(&mut b).await.unwrap();
        assert_eq!(payload, b"hello frame");
        assert_eq!(peer, alice.peer_id());
    }

    #[tokio::test]
    async fn frame_from_stranger_rejected() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        let mallory = Keypair::generate();

        // Bob only trusts alice.
        let mallory_hs = make_handshaker(&mallory, &alice);
        let bob_hs = make_handshaker(&bob, &alice);

        let (mut a, mut b) = tokio::io::duplex(1024);
        mallory_hs.send_frame(&mut a, b"let me in").await.unwrap();

        assert!(matches!(
            bob_hs.recv_frame(&mut b).await,
            Err(HandshakeError::SignatureInvalid(_))
        ));
    }

    #[tokio::test]
    async fn undersized_frame_is_short_read() {
        let alice = Keypair::generate();
        let hs = make_handshaker(&alice, &alice);

        let (mut a, mut b) = tokio::io::duplex(64);
        // Declared length smaller than any signature.
        a.write_u64_le(5).await.unwrap();
        a.write_all(&[0u8; 5]).await.unwrap();

        assert!(matches!(
            hs.recv_frame(&mut b).await,
            Err(HandshakeError::ShortRead { .. })
        ));
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let alice = Keypair::generate();
        let hs = make_handshaker(&alice, &alice);

        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u64_le(MAX_FRAME_LEN + 1).await.unwrap();

        assert!(matches!(
            hs.recv_frame(&mut b).await,
            Err(HandshakeError::FrameTooLarge { .. })
        ));
    }
}
