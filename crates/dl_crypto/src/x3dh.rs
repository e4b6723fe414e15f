//! X3DH asynchronous key agreement (C3).
//!
//! Alice (initiator) fetches Bob's published prekey bundle:
//!   IK_B  (identity, Ed25519 public, converted to X25519)
//!   SPK_B (signed prekey, X25519) + Ed25519 signature over SPK_B
//!   OPK_B (optional one-time prekey, X25519)
//!
//! Alice generates one ephemeral keypair EK_A and computes:
//!   DH1 = DH(IK_A, SPK_B)   — mutual authentication
//!   DH2 = DH(EK_A, IK_B)    — forward secrecy
//!   DH3 = DH(EK_A, SPK_B)   — replay protection
//!   DH4 = DH(EK_A, OPK_B)   — one-time forward secrecy, if OPK_B present
//!
//! SK is the chain-key half of `root_kdf(root = [0; 32], DH1 || DH2 || DH3 [|| DH4])`.
//! The associated data carried forward into the ratchet is the 64-byte
//! blob `IK_initiator_pub || IK_responder_pub`, fixed regardless of which
//! party is local so both sides compute the identical bytes.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    identity::{ed25519_pub_to_x25519, IdentityKeyPair},
    kdf,
};

/// Bob's published bundle, consumed once by a session initiator.
pub struct PrekeyBundle {
    pub ik_pub: [u8; 32],
    pub spk_pub: [u8; 32],
    pub spk_sig: [u8; 64],
    pub opk_pub: Option<[u8; 32]>,
}

/// Carried alongside the first ratchet message so the responder can
/// reconstruct the same DH set.
pub struct InitHeader {
    pub ik_pub: [u8; 32],
    pub ek_pub: [u8; 32],
    pub opk_used: bool,
}

pub struct X3DHResult {
    pub shared_secret: [u8; 32],
    /// `IK_initiator_pub || IK_responder_pub`, in that fixed order.
    pub associated_data: [u8; 64],
    pub header: InitHeader,
}

fn associated_data(initiator_ik: &[u8; 32], responder_ik: &[u8; 32]) -> [u8; 64] {
    let mut ad = [0u8; 64];
    ad[..32].copy_from_slice(initiator_ik);
    ad[32..].copy_from_slice(responder_ik);
    ad
}

fn derive_shared_secret(ikm: &mut Vec<u8>) -> Result<[u8; 32], CryptoError> {
    let (_root, shared_secret) = kdf::root_kdf(&[0u8; 32], ikm)?;
    ikm.zeroize();
    Ok(shared_secret)
}

/// Alice initiates a session with Bob using his published bundle.
pub fn initiate(my_ik: &IdentityKeyPair, bundle: &PrekeyBundle) -> Result<X3DHResult, CryptoError> {
    IdentityKeyPair::verify(&bundle.ik_pub, &bundle.spk_pub, &bundle.spk_sig)?;

    let ik_a_x = my_ik.to_x25519_secret();
    let ik_b_x = ed25519_pub_to_x25519(&bundle.ik_pub)?;
    let spk_b = X25519Public::from(bundle.spk_pub);

    let ek_a = StaticSecret::random_from_rng(OsRng);
    let ek_a_pub = X25519Public::from(&ek_a);

    let dh1 = ik_a_x.diffie_hellman(&spk_b);
    let dh2 = ek_a.diffie_hellman(&ik_b_x);
    let dh3 = ek_a.diffie_hellman(&spk_b);

    let mut ikm = Vec::with_capacity(32 * 4);
    ikm.extend_from_slice(dh1.as_bytes());
    ikm.extend_from_slice(dh2.as_bytes());
    ikm.extend_from_slice(dh3.as_bytes());

    let opk_used = if let Some(opk_raw) = bundle.opk_pub {
        let opk_b = X25519Public::from(opk_raw);
        let dh4 = ek_a.diffie_hellman(&opk_b);
        ikm.extend_from_slice(dh4.as_bytes());
        true
    } else {
        false
    };

    let shared_secret = derive_shared_secret(&mut ikm)?;

    Ok(X3DHResult {
        shared_secret,
        associated_data: associated_data(&my_ik.public.0, &bundle.ik_pub),
        header: InitHeader { ik_pub: my_ik.public.0, ek_pub: *ek_a_pub.as_bytes(), opk_used },
    })
}

/// Bob reconstructs the shared secret from Alice's init header.
///
/// `my_opk_secret` must be `Some` exactly when `header.opk_used` is true and
/// the referenced one-time prekey has not already been consumed.
pub fn respond(
    my_ik: &IdentityKeyPair,
    my_spk_secret: &StaticSecret,
    my_opk_secret: Option<&StaticSecret>,
    header: &InitHeader,
) -> Result<([u8; 32], [u8; 64]), CryptoError> {
    let ek_a = X25519Public::from(header.ek_pub);
    let sender_ik_x = ed25519_pub_to_x25519(&header.ik_pub)?;
    let ik_b_x = my_ik.to_x25519_secret();

    let dh1 = my_spk_secret.diffie_hellman(&sender_ik_x);
    let dh2 = ik_b_x.diffie_hellman(&ek_a);
    let dh3 = my_spk_secret.diffie_hellman(&ek_a);

    let mut ikm = Vec::with_capacity(32 * 4);
    ikm.extend_from_slice(dh1.as_bytes());
    ikm.extend_from_slice(dh2.as_bytes());
    ikm.extend_from_slice(dh3.as_bytes());

    if header.opk_used {
        let opk_sec = my_opk_secret.ok_or(CryptoError::NoSession)?;
        let dh4 = opk_sec.diffie_hellman(&ek_a);
        ikm.extend_from_slice(dh4.as_bytes());
    }

    let shared_secret = derive_shared_secret(&mut ikm)?;
    Ok((shared_secret, associated_data(&header.ik_pub, &my_ik.public.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::generate_signed_prekey;

    #[test]
    fn roundtrip_without_opk() {
        let alice_ik = IdentityKeyPair::generate();
        let bob_ik = IdentityKeyPair::generate();
        let bob_spk = generate_signed_prekey(&bob_ik);

        let bundle = PrekeyBundle {
            ik_pub: bob_ik.public.0,
            spk_pub: *bob_spk.public.as_bytes(),
            spk_sig: bob_spk.signature,
            opk_pub: None,
        };

        let alice_result = initiate(&alice_ik, &bundle).unwrap();
        let (bob_secret, bob_ad) = respond(&bob_ik, &bob_spk.secret, None, &alice_result.header).unwrap();

        assert_eq!(alice_result.shared_secret, bob_secret);
        assert_eq!(alice_result.associated_data, bob_ad);
    }

    #[test]
    fn roundtrip_with_opk() {
        let alice_ik = IdentityKeyPair::generate();
        let bob_ik = IdentityKeyPair::generate();
        let bob_spk = generate_signed_prekey(&bob_ik);
        let opks = crate::identity::generate_one_time_prekeys(1);
        let (ref bob_opk_secret, ref bob_opk_pub) = opks[0];

        let bundle = PrekeyBundle {
            ik_pub: bob_ik.public.0,
            spk_pub: *bob_spk.public.as_bytes(),
            spk_sig: bob_spk.signature,
            opk_pub: Some(*bob_opk_pub.as_bytes()),
        };

        let alice_result = initiate(&alice_ik, &bundle).unwrap();
        assert!(alice_result.header.opk_used);

        let (bob_secret, _) =
            respond(&bob_ik, &bob_spk.secret, Some(bob_opk_secret), &alice_result.header).unwrap();
        assert_eq!(alice_result.shared_secret, bob_secret);
    }

    #[test]
    fn missing_opk_still_establishes() {
        let alice_ik = IdentityKeyPair::generate();
        let bob_ik = IdentityKeyPair::generate();
        let bob_spk = generate_signed_prekey(&bob_ik);

        let bundle = PrekeyBundle {
            ik_pub: bob_ik.public.0,
            spk_pub: *bob_spk.public.as_bytes(),
            spk_sig: bob_spk.signature,
            opk_pub: None,
        };

        let alice_result = initiate(&alice_ik, &bundle).unwrap();
        assert!(!alice_result.header.opk_used);
        let (bob_secret, _) = respond(&bob_ik, &bob_spk.secret, None, &alice_result.header).unwrap();
        assert_eq!(alice_result.shared_secret, bob_secret);
    }

    #[test]
    fn rejects_bad_spk_signature() {
        let alice_ik = IdentityKeyPair::generate();
        let bob_ik = IdentityKeyPair::generate();
        let evil_ik = IdentityKeyPair::generate();
        let bob_spk = generate_signed_prekey(&bob_ik);
        let evil_sig = evil_ik.sign(bob_spk.public.as_bytes());

        let bundle = PrekeyBundle {
            ik_pub: bob_ik.public.0,
            spk_pub: *bob_spk.public.as_bytes(),
            spk_sig: evil_sig,
            opk_pub: None,
        };

        assert!(matches!(initiate(&alice_ik, &bundle), Err(CryptoError::BadSignature)));
    }
}
