//! The classical, aggregatable fast-path signature layer (spec.md §1, §4.5).
//!
//! The scheme's internals are an explicit spec.md Non-goal ("the fast-path
//! signature scheme internals"), so this module defines only the trait
//! boundary the consensus core signs/verifies against, plus one reference
//! backend (Ed25519, already in the teacher's `engine` crate dependency
//! table) used for tests and single-process demos.

use std::collections::BTreeMap;

use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::{CryptoRng, RngCore};

use crate::types::ValidatorId;

pub trait FastPathScheme: Send + Sync + 'static {
    type SigningKey: Clone + Send + Sync;
    type VerifyingKey: Clone + Send + Sync + PartialEq + std::fmt::Debug;
    type Signature: Clone + Send + Sync + PartialEq + std::fmt::Debug;

    fn generate_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> (Self::SigningKey, Self::VerifyingKey);
    fn sign(key: &Self::SigningKey, msg: &[u8]) -> Self::Signature;
    fn verify(key: &Self::VerifyingKey, msg: &[u8], sig: &Self::Signature) -> bool;
}

#[derive(Debug, Default, Clone)]
pub struct Ed25519FastPath;

impl FastPathScheme for Ed25519FastPath {
    type SigningKey = SigningKey;
    type VerifyingKey = VerifyingKey;
    type Signature = ed25519_dalek::Signature;

    fn generate_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> (Self::SigningKey, Self::VerifyingKey) {
        let signing_key = SigningKey::generate(rng);
        let verifying_key = signing_key.verifying_key();
        (signing_key, verifying_key)
    }

    fn sign(key: &Self::SigningKey, msg: &[u8]) -> Self::Signature {
        key.sign(msg)
    }

    fn verify(key: &Self::VerifyingKey, msg: &[u8], sig: &Self::Signature) -> bool {
        key.verify(msg, sig).is_ok()
    }
}

/// Per-validator fast-path keys. A single process standing in for what, in
/// production, is one keypair held by each validator; this engine never
/// generates fast-path keys on a validator's behalf outside of tests.
pub struct FastPathKeyring<S: FastPathScheme> {
    keys: BTreeMap<ValidatorId, (S::SigningKey, S::VerifyingKey)>,
}

impl<S: FastPathScheme> FastPathKeyring<S> {
    pub fn generate<R: RngCore + CryptoRng>(validators: &[ValidatorId], rng: &mut R) -> Self {
        let keys = validators
            .iter()
            .map(|v| (v.clone(), S::generate_keypair(rng)))
            .collect();
        Self { keys }
    }

    pub fn sign_for(&self, validator: &ValidatorId, msg: &[u8]) -> Option<S::Signature> {
        self.keys.get(validator).map(|(sk, _)| S::sign(sk, msg))
    }

    pub fn verify_for(&self, validator: &ValidatorId, msg: &[u8], sig: &S::Signature) -> bool {
        match self.keys.get(validator) {
            Some((_, vk)) => S::verify(vk, msg, sig),
            None => false,
        }
    }

    pub fn validators(&self) -> impl Iterator<Item = &ValidatorId> {
        self.keys.keys()
    }
}
