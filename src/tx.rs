//! Transaction parsing and the signature checker backed by it.
//!
//! Signatures are checked against the legacy (pre-segwit) signature hash with `SIGHASH_ALL`,
//! computed over the subscript of the script that executes the `checksig`.

#[cfg(not(feature = "external-secp"))]
use std::sync::OnceLock;

use bitcoin::{
    consensus,
    script::ScriptBuf,
    secp256k1::{self, ecdsa::Signature as EcdsaSignature, Message, PublicKey, Secp256k1},
    sighash::SighashCache,
    Transaction,
};

use crate::{
    codec::Script,
    script::{ScriptFlags, SignatureChecker, SIGHASH_ALL},
    Error, VERIFY_DERSIG,
};

#[cfg(feature = "external-secp")]
type VerificationContext = Secp256k1<secp256k1::All>;
#[cfg(not(feature = "external-secp"))]
type VerificationContext = Secp256k1<secp256k1::VerifyOnly>;

#[cfg(not(feature = "external-secp"))]
static SECP256K1: OnceLock<VerificationContext> = OnceLock::new();

fn with_secp256k1_verification_ctx<R>(f: impl FnOnce(&VerificationContext) -> R) -> R {
    #[cfg(feature = "external-secp")]
    {
        f(&*bitcoin::secp256k1::global::SECP256K1)
    }
    #[cfg(not(feature = "external-secp"))]
    {
        f(SECP256K1.get_or_init(Secp256k1::verification_only))
    }
}

/// Holds the parsed spending transaction.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    tx: Transaction,
}

impl TransactionContext {
    /// Parses a transaction from wire bytes and reserializes it to guarantee canonical encoding.
    pub fn parse(tx_bytes: &[u8]) -> Result<Self, Error> {
        let tx: Transaction = consensus::deserialize(tx_bytes).map_err(|_| Error::TxDeserialize)?;

        let canonical = consensus::serialize(&tx);
        if canonical.len() != tx_bytes.len() {
            return Err(Error::TxSizeMismatch);
        }

        Ok(Self { tx })
    }

    pub fn from_transaction(tx: Transaction) -> Self {
        Self { tx }
    }

    /// Returns the fully parsed transaction.
    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    /// Ensures `input_index` points to an existing transaction input.
    pub fn ensure_input_index(&self, input_index: usize) -> Result<(), Error> {
        if input_index >= self.tx.input.len() {
            Err(Error::TxIndex)
        } else {
            Ok(())
        }
    }
}

/// Checks ECDSA signatures for one input of a transaction.
pub struct TransactionSignatureChecker<'tx> {
    sighash_cache: SighashCache<&'tx Transaction>,
    input_index: usize,
    script_code: Script,
    flags: ScriptFlags,
}

impl<'tx> TransactionSignatureChecker<'tx> {
    /// `script` is the script whose signature checks this checker answers; its subscript is
    /// what the signatures commit to.
    pub fn new(
        tx_ctx: &'tx TransactionContext,
        input_index: usize,
        script: &Script,
        flags: ScriptFlags,
    ) -> Result<Self, Error> {
        tx_ctx.ensure_input_index(input_index)?;
        Ok(Self {
            sighash_cache: SighashCache::new(tx_ctx.tx()),
            input_index,
            script_code: script.subscript(),
            flags,
        })
    }

    fn parse_signature(&self, signature: &[u8]) -> Option<EcdsaSignature> {
        let parsed = if self.flags.contains(VERIFY_DERSIG) {
            EcdsaSignature::from_der(signature)
        } else {
            EcdsaSignature::from_der_lax(signature)
        };
        parsed.ok()
    }

    fn signature_hash(&self, signature: &[u8]) -> Option<Message> {
        // A signature cannot sign itself: drop pushes of it from the script code.
        let mut tagged = signature.to_vec();
        tagged.push(SIGHASH_ALL);
        let script_code = ScriptBuf::from_bytes(self.script_code.without_push(&tagged).encode());

        let sighash = self
            .sighash_cache
            .legacy_signature_hash(self.input_index, &script_code, SIGHASH_ALL as u32)
            .ok()?;
        Some(<Message as From<_>>::from(sighash))
    }
}

impl SignatureChecker for TransactionSignatureChecker<'_> {
    fn check_signature(&self, signature: &[u8], pubkey: &[u8]) -> bool {
        let Ok(pubkey) = PublicKey::from_slice(pubkey) else {
            return false;
        };
        let Some(mut signature_parsed) = self.parse_signature(signature) else {
            return false;
        };
        signature_parsed.normalize_s();
        let Some(message) = self.signature_hash(signature) else {
            return false;
        };

        with_secp256k1_verification_ctx(|secp| {
            secp.verify_ecdsa(&message, &signature_parsed, &pubkey)
                .is_ok()
        })
    }
}
