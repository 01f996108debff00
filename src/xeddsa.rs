//! XEdDSA signatures over Curve25519 identity keys.
//!
//! Signed prekeys are signed with the same Montgomery key that performs
//! identity DH, following "The XEdDSA and VXEdDSA Signature Schemes"
//! (Trevor Perrin, revision 1).

use crate::error::{Error, Result};
use crate::keys::PublicKey;
use curve25519_dalek::MontgomeryPoint;
use curve25519_dalek::{
    constants::ED25519_BASEPOINT_TABLE,
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar,
};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// XEdDSA signature: 64 bytes (R point + s scalar)
pub const SIGNATURE_LENGTH: usize = 64;

/// XEd25519 signing key derived from X25519 private key
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct XEdDSAPrivateKey {
    /// Ed25519 private scalar a (sign-adjusted so that A has sign bit 0)
    a: Scalar,
    /// Ed25519 public key A = aB
    #[zeroize(skip)]
    public: XEdDSAPublicKey,
}

/// XEd25519 public key (Ed25519 point derived from X25519)
#[derive(Clone, Copy, Debug)]
pub struct XEdDSAPublicKey {
    compressed: CompressedEdwardsY,
}

fn scalar_from_wide_hash(hasher: Sha512) -> Scalar {
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    let scalar = Scalar::from_bytes_mod_order_wide(&wide);
    wide.zeroize();
    scalar
}

impl XEdDSAPrivateKey {
    /// Creates an XEdDSA signing key from X25519 private key bytes.
    pub fn from_x25519_private(k_bytes: &[u8; 32]) -> Result<Self> {
        let secret = StaticSecret::from(*k_bytes);
        let x25519_public = X25519PublicKey::from(&secret);
        let public = XEdDSAPublicKey::from_x25519_public_bytes(x25519_public.as_bytes())?;

        let mut k_clamped = *k_bytes;
        k_clamped[0] &= 248;
        k_clamped[31] &= 127;
        k_clamped[31] |= 64;

        let k_scalar = Scalar::from_bytes_mod_order(k_clamped);
        k_clamped.zeroize();

        // E = kB; negate k when E has its sign bit set
        let e_point = &k_scalar * ED25519_BASEPOINT_TABLE;
        let sign_bit = (e_point.compress().as_bytes()[31] >> 7) & 1;
        let a = if sign_bit == 1 { -k_scalar } else { k_scalar };

        Ok(Self { a, public })
    }

    /// Returns the XEdDSA public key.
    #[must_use]
    pub fn public_key(&self) -> &XEdDSAPublicKey {
        &self.public
    }

    /// Signs a message with XEdDSA using 64 bytes of fresh randomness.
    #[must_use]
    pub fn sign(&self, message: &[u8], random: &[u8; 64]) -> [u8; SIGNATURE_LENGTH] {
        // r = hash1(a || M || Z) (mod q)
        let mut hasher = Sha512::new();
        hasher.update([0xFE]);
        hasher.update([0xFF; 31]);
        hasher.update(self.a.as_bytes());
        hasher.update(message);
        hasher.update(random);
        let r = scalar_from_wide_hash(hasher);

        let r_compressed = (&r * ED25519_BASEPOINT_TABLE).compress();

        // s = r + hash(R || A || M) * a (mod q)
        let h = self.public.challenge(&r_compressed, message);
        let s = r + (h * self.a);

        let mut signature = [0u8; SIGNATURE_LENGTH];
        signature[..32].copy_from_slice(r_compressed.as_bytes());
        signature[32..].copy_from_slice(s.as_bytes());
        signature
    }
}

impl XEdDSAPublicKey {
    /// Creates XEdDSA public key from an X25519 public key.
    pub fn from_x25519_public(public_key: &PublicKey) -> Result<Self> {
        Self::from_x25519_public_bytes(public_key.as_bytes())
    }

    fn from_x25519_public_bytes(u_bytes: &[u8; 32]) -> Result<Self> {
        let mut u_masked = *u_bytes;
        u_masked[31] &= 0x7F;

        // Birational map y = (u - 1) / (u + 1), sign bit forced to 0
        let edwards = MontgomeryPoint(u_masked)
            .to_edwards(0)
            .ok_or(Error::InvalidKey)?;

        let mut bytes = *edwards.compress().as_bytes();
        bytes[31] &= 0x7F;

        Ok(Self {
            compressed: CompressedEdwardsY(bytes),
        })
    }

    /// Returns the compressed Edwards Y coordinate.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.compressed.as_bytes()
    }

    /// Verifies an XEdDSA signature.
    pub fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_LENGTH]) -> Result<()> {
        let mut r_bytes = [0u8; 32];
        let mut s_bytes = [0u8; 32];
        r_bytes.copy_from_slice(&signature[..32]);
        s_bytes.copy_from_slice(&signature[32..]);

        let r_compressed = CompressedEdwardsY(r_bytes);
        r_compressed.decompress().ok_or(Error::InvalidSignature)?;

        // s must be below 2^253
        if (s_bytes[31] & 0xE0) != 0 {
            return Err(Error::InvalidSignature);
        }
        let s = Scalar::from_bytes_mod_order(s_bytes);

        let a_point = self.compressed.decompress().ok_or(Error::InvalidKey)?;
        if !a_point.is_torsion_free() {
            return Err(Error::InvalidKey);
        }

        let h = self.challenge(&r_compressed, message);

        // Rcheck = sB - hA
        let r_check = EdwardsPoint::vartime_double_scalar_mul_basepoint(&h, &-a_point, &s);

        if r_check.compress().as_bytes().ct_eq(&r_bytes).into() {
            Ok(())
        } else {
            Err(Error::InvalidSignature)
        }
    }

    /// hash(R || A || M) mod q
    fn challenge(&self, r_point: &CompressedEdwardsY, message: &[u8]) -> Scalar {
        let mut hasher = Sha512::new();
        hasher.update(r_point.as_bytes());
        hasher.update(self.compressed.as_bytes());
        hasher.update(message);
        scalar_from_wide_hash(hasher)
    }
}

impl std::fmt::Debug for XEdDSAPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "XEdDSAPrivateKey([REDACTED])")
    }
}
