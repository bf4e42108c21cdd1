//! Bitcoin-style script codec and interpreter.
//!
//! Raw script bytes decode into a [`Script`] of [`Instruction`]s, which the interpreter runs
//! against a [`ScriptStack`] and an optional [`SignatureChecker`]. [`verify`] and friends tie
//! these together for one input of a legacy transaction: the input's scriptSig and the spent
//! output's scriptPubKey run on a shared stack, and the spend is valid when the top of the
//! stack is true afterwards.

mod codec;
mod opcodes;
mod script;
mod tx;

pub use codec::{DecodeError, Instruction, Script, MAX_INLINE_PUSH};
pub use opcodes::Opcode;
pub use script::{
    execute, Interpreter, ScriptError, ScriptFlags, ScriptStack, SignatureChecker, SIGHASH_ALL,
};
pub use tx::{TransactionContext, TransactionSignatureChecker};

use core::fmt;

use crate::script::cast_to_bool;

/// Do not enable any verification.
pub const VERIFY_NONE: u32 = 0;
/// Parse signatures as strict DER (BIP66) instead of lax DER.
pub const VERIFY_DERSIG: u32 = 1 << 2;
/// Require scriptSig to be push only.
pub const VERIFY_SIGPUSHONLY: u32 = 1 << 5;
/// Require a clean stack after evaluation.
pub const VERIFY_CLEANSTACK: u32 = 1 << 8;

/// Detailed failure information returned by the diagnostic verification API.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScriptFailure {
    /// High-level error code.
    pub error: Error,
    /// Detailed interpreter error.
    pub script_error: ScriptError,
}

impl ScriptFailure {
    fn api(error: Error) -> Self {
        Self {
            error,
            script_error: ScriptError::Ok,
        }
    }

    fn script(script_error: ScriptError) -> Self {
        Self {
            error: Error::Script,
            script_error,
        }
    }
}

/// Verifies a single input of a transaction without optional checks.
pub fn verify(
    spent_output_script: &[u8],
    spending_transaction: &[u8],
    input_index: usize,
) -> Result<(), Error> {
    verify_with_flags(
        spent_output_script,
        spending_transaction,
        input_index,
        VERIFY_NONE,
    )
}

/// Same as [`verify`] but with explicit script verification flags.
pub fn verify_with_flags(
    spent_output_script: &[u8],
    spending_transaction: &[u8],
    input_index: usize,
    flags: u32,
) -> Result<(), Error> {
    verify_with_details(spent_output_script, spending_transaction, input_index, flags)
        .map_err(|failure| failure.error)
}

/// Same as [`verify_with_flags`] but also reports the interpreter's [`ScriptError`].
pub fn verify_with_details(
    spent_output_script: &[u8],
    spending_transaction: &[u8],
    input_index: usize,
    flags: u32,
) -> Result<(), ScriptFailure> {
    let result = perform_verification(spent_output_script, spending_transaction, input_index, flags);
    match &result {
        Ok(()) => log::debug!("input {input_index} verified"),
        Err(failure) => log::debug!(
            "input {input_index} failed verification: {} ({:?})",
            failure.error,
            failure.script_error
        ),
    }
    result
}

fn perform_verification(
    spent_output_script: &[u8],
    spending_transaction: &[u8],
    input_index: usize,
    flags: u32,
) -> Result<(), ScriptFailure> {
    let flags = ScriptFlags::from_bits(flags).map_err(ScriptFailure::api)?;
    let tx_ctx = TransactionContext::parse(spending_transaction).map_err(ScriptFailure::api)?;
    tx_ctx
        .ensure_input_index(input_index)
        .map_err(ScriptFailure::api)?;

    let txin = &tx_ctx.tx().input[input_index];
    let script_sig = decode_for_execution(txin.script_sig.as_bytes())?;
    if flags.contains(VERIFY_SIGPUSHONLY) && !script_sig.is_push_only() {
        return Err(ScriptFailure::script(ScriptError::SigPushOnly));
    }
    let script_pubkey = decode_for_execution(spent_output_script)?;

    let mut stack = ScriptStack::new();
    for script in [&script_sig, &script_pubkey] {
        let checker = TransactionSignatureChecker::new(&tx_ctx, input_index, script, flags)
            .map_err(ScriptFailure::api)?;
        Interpreter::new(Some(&checker))
            .eval(script, &mut stack)
            .map_err(ScriptFailure::script)?;
    }

    match stack.last() {
        Some(top) if cast_to_bool(top) => {}
        _ => return Err(ScriptFailure::script(ScriptError::EvalFalse)),
    }
    if flags.contains(VERIFY_CLEANSTACK) && stack.len() != 1 {
        return Err(ScriptFailure::script(ScriptError::CleanStack));
    }

    Ok(())
}

fn decode_for_execution(bytes: &[u8]) -> Result<Script, ScriptFailure> {
    Script::decode(bytes).map_err(|err| {
        log::trace!("script rejected at decode: {err}");
        ScriptFailure::script(ScriptError::BadOpcode)
    })
}

/// Errors returned by the verification API.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The scripts did not validate; see [`ScriptFailure::script_error`] for details.
    Script,
    /// An invalid input index for the spending transaction.
    TxIndex,
    /// The transaction did not reserialize to the same length.
    TxSizeMismatch,
    /// An error deserializing the spending transaction.
    TxDeserialize,
    /// Script verification flags are invalid.
    InvalidFlags,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match *self {
            Error::Script => "script evaluated without success",
            Error::TxIndex => "an invalid index for the spending transaction",
            Error::TxSizeMismatch => "spending transaction is not canonically encoded",
            Error::TxDeserialize => "an error deserializing the spending transaction",
            Error::InvalidFlags => "script verification flags are invalid",
        };

        f.write_str(description)
    }
}

impl std::error::Error for Error {}
