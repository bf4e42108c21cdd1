//! Script interpreter.

use bitcoin::hashes::{hash160, ripemd160, sha1, sha256, sha256d, Hash};

use crate::codec::{Instruction, Script};
use crate::opcodes::Opcode;
use crate::{Error, VERIFY_CLEANSTACK, VERIFY_DERSIG, VERIFY_SIGPUSHONLY};

/// The only sighash type accepted by `checksig` and `checksigverify`.
pub const SIGHASH_ALL: u8 = 0x01;

/// Detailed reason for a script failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScriptError {
    Ok,
    Unknown,
    EvalFalse,
    BadOpcode,
    InvalidStackOperation,
    EqualVerify,
    CheckSigVerify,
    SigHashType,
    NoSigningContext,
    SigPushOnly,
    CleanStack,
}

const SUPPORTED_FLAGS: u32 = VERIFY_DERSIG | VERIFY_SIGPUSHONLY | VERIFY_CLEANSTACK;

/// Wrapper for script verification flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptFlags(u32);

impl ScriptFlags {
    pub fn from_bits(bits: u32) -> Result<Self, Error> {
        if bits & !SUPPORTED_FLAGS != 0 {
            return Err(Error::InvalidFlags);
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag != 0
    }
}

/// Validates a signature on behalf of the interpreter.
///
/// Implementations own whatever transaction data is needed to rebuild the signed message.
pub trait SignatureChecker {
    /// `signature` is DER-encoded with the sighash tag already stripped.
    fn check_signature(&self, signature: &[u8], pubkey: &[u8]) -> bool;
}

/// Minimal stack abstraction used by the interpreter.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScriptStack {
    items: Vec<Vec<u8>>,
}

impl ScriptStack {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn from_items(items: Vec<Vec<u8>>) -> Self {
        Self { items }
    }

    pub fn push(&mut self, data: Vec<u8>) {
        self.items.push(data);
    }

    pub fn push_bool(&mut self, value: bool) {
        self.push(vec![value as u8]);
    }

    pub fn pop_bytes(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.items.pop().ok_or(ScriptError::InvalidStackOperation)
    }

    pub fn last(&self) -> Option<&Vec<u8>> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Vec<u8>] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Vec<u8>> {
        self.items
    }

    fn require(&self, count: usize) -> Result<(), ScriptError> {
        if self.items.len() < count {
            Err(ScriptError::InvalidStackOperation)
        } else {
            Ok(())
        }
    }
}

/// Executes `script` on `stack`, returning whether every instruction succeeded.
pub fn execute(
    script: &Script,
    stack: &mut ScriptStack,
    checker: Option<&dyn SignatureChecker>,
) -> bool {
    Interpreter::new(checker).execute(script, stack)
}

/// Runs scripts against an optional signing context and remembers why the last run failed.
pub struct Interpreter<'a> {
    checker: Option<&'a dyn SignatureChecker>,
    last_error: ScriptError,
}

impl<'a> Interpreter<'a> {
    pub fn new(checker: Option<&'a dyn SignatureChecker>) -> Self {
        Self {
            checker,
            last_error: ScriptError::Ok,
        }
    }

    pub fn execute(&mut self, script: &Script, stack: &mut ScriptStack) -> bool {
        self.eval(script, stack).is_ok()
    }

    pub fn eval(&mut self, script: &Script, stack: &mut ScriptStack) -> Result<(), ScriptError> {
        self.last_error = ScriptError::Ok;
        for (index, instruction) in script.iter().enumerate() {
            if let Err(err) = self.step(instruction, stack) {
                log::trace!("script failed at instruction {index} ({instruction}): {err:?}");
                return Err(self.fail(err));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn last_script_error(&self) -> ScriptError {
        self.last_error
    }

    fn fail(&mut self, error: ScriptError) -> ScriptError {
        self.last_error = error;
        error
    }

    fn step(&self, instruction: &Instruction, stack: &mut ScriptStack) -> Result<(), ScriptError> {
        match instruction {
            Instruction::PushBytes(data) => {
                stack.push(data.clone());
                Ok(())
            }
            Instruction::Op(op) => self.execute_opcode(*op, stack),
            Instruction::Unknown(_) => Err(ScriptError::BadOpcode),
        }
    }

    fn execute_opcode(&self, op: Opcode, stack: &mut ScriptStack) -> Result<(), ScriptError> {
        match op {
            Opcode::Dup => {
                let value = stack
                    .last()
                    .ok_or(ScriptError::InvalidStackOperation)?
                    .clone();
                stack.push(value);
            }
            Opcode::Ripemd160 => {
                op_hash(stack, |data| ripemd160::Hash::hash(data).to_byte_array().to_vec())?
            }
            Opcode::Sha1 => op_hash(stack, |data| sha1::Hash::hash(data).to_byte_array().to_vec())?,
            Opcode::Sha256 => {
                op_hash(stack, |data| sha256::Hash::hash(data).to_byte_array().to_vec())?
            }
            Opcode::Hash160 => {
                op_hash(stack, |data| hash160::Hash::hash(data).to_byte_array().to_vec())?
            }
            Opcode::Hash256 => {
                op_hash(stack, |data| sha256d::Hash::hash(data).to_byte_array().to_vec())?
            }
            Opcode::Equal => {
                let equal = op_equal(stack)?;
                stack.push_bool(equal);
            }
            Opcode::EqualVerify => {
                if !op_equal(stack)? {
                    return Err(ScriptError::EqualVerify);
                }
            }
            Opcode::CodeSeparator => {}
            Opcode::CheckSig => {
                let valid = self.op_checksig(stack)?;
                stack.push_bool(valid);
            }
            Opcode::CheckSigVerify => {
                if !self.op_checksig(stack)? {
                    return Err(ScriptError::CheckSigVerify);
                }
            }
            Opcode::PushData1
            | Opcode::PushData2
            | Opcode::PushData4
            | Opcode::CheckMultiSig
            | Opcode::CheckMultiSigVerify => return Err(ScriptError::BadOpcode),
        }

        Ok(())
    }

    fn op_checksig(&self, stack: &mut ScriptStack) -> Result<bool, ScriptError> {
        stack.require(2)?;
        let checker = self.checker.ok_or(ScriptError::NoSigningContext)?;
        let pubkey = stack.pop_bytes()?;
        let sig = stack.pop_bytes()?;
        let (&sighash_type, signature) = sig.split_last().ok_or(ScriptError::SigHashType)?;
        if sighash_type != SIGHASH_ALL {
            return Err(ScriptError::SigHashType);
        }
        Ok(checker.check_signature(signature, &pubkey))
    }
}

fn op_hash(stack: &mut ScriptStack, digest: impl Fn(&[u8]) -> Vec<u8>) -> Result<(), ScriptError> {
    let data = stack.pop_bytes()?;
    stack.push(digest(&data));
    Ok(())
}

fn op_equal(stack: &mut ScriptStack) -> Result<bool, ScriptError> {
    stack.require(2)?;
    let a = stack.pop_bytes()?;
    let b = stack.pop_bytes()?;
    Ok(a == b)
}

pub(crate) fn cast_to_bool(data: &[u8]) -> bool {
    for (i, &byte) in data.iter().enumerate() {
        if byte != 0 {
            if i == data.len() - 1 && byte == 0x80 {
                return false;
            }
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hex::FromHex;
    use std::cell::Cell;

    struct FixedChecker {
        answer: bool,
        calls: Cell<usize>,
    }

    impl FixedChecker {
        fn new(answer: bool) -> Self {
            Self {
                answer,
                calls: Cell::new(0),
            }
        }
    }

    impl SignatureChecker for FixedChecker {
        fn check_signature(&self, _signature: &[u8], _pubkey: &[u8]) -> bool {
            self.calls.set(self.calls.get() + 1);
            self.answer
        }
    }

    struct ExpectArgs;

    impl SignatureChecker for ExpectArgs {
        fn check_signature(&self, signature: &[u8], pubkey: &[u8]) -> bool {
            signature == [0x30, 0x02] && pubkey == [0x02, 0x03]
        }
    }

    fn push(data: &[u8]) -> Instruction {
        Instruction::PushBytes(data.to_vec())
    }

    fn op(opcode: Opcode) -> Instruction {
        Instruction::Op(opcode)
    }

    fn run(items: Vec<Instruction>, checker: Option<&dyn SignatureChecker>) -> (bool, ScriptStack) {
        let mut stack = ScriptStack::new();
        let ok = execute(&Script::from(items), &mut stack, checker);
        (ok, stack)
    }

    #[test]
    fn eq_pushes_one_byte_result() {
        let (ok, stack) = run(vec![push(&[1]), push(&[1]), op(Opcode::Equal)], None);
        assert!(ok);
        assert_eq!(stack.items(), &[vec![1]]);

        let (ok, stack) = run(vec![push(&[1]), push(&[2]), op(Opcode::Equal)], None);
        assert!(ok);
        assert_eq!(stack.items(), &[vec![0]]);
    }

    #[test]
    fn eqverify_consumes_both_operands() {
        let (ok, stack) = run(vec![push(&[1]), push(&[1]), op(Opcode::EqualVerify)], None);
        assert!(ok);
        assert!(stack.is_empty());

        let mut interpreter = Interpreter::new(None);
        let script = Script::from(vec![push(&[1]), push(&[2]), op(Opcode::EqualVerify)]);
        assert!(!interpreter.execute(&script, &mut ScriptStack::new()));
        assert_eq!(interpreter.last_script_error(), ScriptError::EqualVerify);
    }

    #[test]
    fn underflow_fails() {
        assert!(!run(vec![op(Opcode::Dup)], None).0);
        assert!(!run(vec![op(Opcode::Hash160)], None).0);
        assert!(!run(vec![push(&[1]), op(Opcode::Equal)], None).0);
        assert!(!run(vec![push(&[1]), op(Opcode::EqualVerify)], None).0);

        let checker = FixedChecker::new(true);
        assert!(!run(vec![push(&[1]), op(Opcode::CheckSig)], Some(&checker)).0);
        assert_eq!(checker.calls.get(), 0);
    }

    #[test]
    fn dup_copies_top() {
        let (ok, stack) = run(vec![push(&[7]), op(Opcode::Dup)], None);
        assert!(ok);
        assert_eq!(stack.items(), &[vec![7], vec![7]]);
    }

    #[test]
    fn hash160_matches_known_digest() {
        let (ok, stack) = run(vec![push(b""), op(Opcode::Hash160)], None);
        assert!(ok);
        let expected = Vec::from_hex("b472a266d0bd89c13706a4132ccfb16f7c3b9fcb").unwrap();
        assert_eq!(stack.items(), &[expected]);
    }

    #[test]
    fn sha256_matches_known_digest() {
        let (ok, stack) = run(vec![push(b"abc"), op(Opcode::Sha256)], None);
        assert!(ok);
        let expected =
            Vec::from_hex("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
                .unwrap();
        assert_eq!(stack.items(), &[expected]);
    }

    #[test]
    fn checksig_rejects_unknown_sighash_type() {
        let checker = FixedChecker::new(true);
        let mut interpreter = Interpreter::new(Some(&checker));
        let script = Script::from(vec![push(&[0x30, 0x02]), push(&[0x02]), op(Opcode::CheckSig)]);
        assert!(!interpreter.execute(&script, &mut ScriptStack::new()));
        assert_eq!(interpreter.last_script_error(), ScriptError::SigHashType);
        assert_eq!(checker.calls.get(), 0);
    }

    #[test]
    fn checksig_rejects_empty_signature() {
        let checker = FixedChecker::new(true);
        assert!(!run(vec![push(&[]), push(&[0x02]), op(Opcode::CheckSig)], Some(&checker)).0);
    }

    #[test]
    fn checksig_requires_signing_context() {
        let mut interpreter = Interpreter::new(None);
        let script = Script::from(vec![push(&[0x30, 0x01]), push(&[0x02]), op(Opcode::CheckSig)]);
        assert!(!interpreter.execute(&script, &mut ScriptStack::new()));
        assert_eq!(interpreter.last_script_error(), ScriptError::NoSigningContext);
    }

    #[test]
    fn checksig_strips_tag_and_pushes_result() {
        let items = vec![push(&[0x30, 0x02, 0x01]), push(&[0x02, 0x03]), op(Opcode::CheckSig)];
        let (ok, stack) = run(items, Some(&ExpectArgs));
        assert!(ok);
        assert_eq!(stack.items(), &[vec![1]]);

        let checker = FixedChecker::new(false);
        let items = vec![push(&[0x30, 0x01]), push(&[0x02]), op(Opcode::CheckSig)];
        let (ok, stack) = run(items, Some(&checker));
        assert!(ok);
        assert_eq!(stack.items(), &[vec![0]]);
    }

    #[test]
    fn checksigverify_fails_on_invalid_signature() {
        let checker = FixedChecker::new(false);
        let mut interpreter = Interpreter::new(Some(&checker));
        let script = Script::from(vec![
            push(&[0x30, 0x01]),
            push(&[0x02]),
            op(Opcode::CheckSigVerify),
        ]);
        assert!(!interpreter.execute(&script, &mut ScriptStack::new()));
        assert_eq!(interpreter.last_script_error(), ScriptError::CheckSigVerify);

        let checker = FixedChecker::new(true);
        let (ok, stack) = run(script.into_instructions(), Some(&checker));
        assert!(ok);
        assert!(stack.is_empty());
    }

    #[test]
    fn unknown_and_unsupported_opcodes_fail() {
        assert!(!run(vec![Instruction::Unknown(0xba)], None).0);
        assert!(!run(vec![op(Opcode::PushData1)], None).0);

        let checker = FixedChecker::new(true);
        let items = vec![push(&[]), push(&[0x30, 0x01]), push(&[0x02]), op(Opcode::CheckMultiSig)];
        assert!(!run(items, Some(&checker)).0);
    }

    #[test]
    fn stops_at_first_failure() {
        let (ok, stack) = run(vec![push(&[1]), Instruction::Unknown(0xff), push(&[2])], None);
        assert!(!ok);
        assert_eq!(stack.items(), &[vec![1]]);
    }

    #[test]
    fn code_separator_is_a_no_op() {
        let (ok, stack) = run(vec![push(&[1]), op(Opcode::CodeSeparator)], None);
        assert!(ok);
        assert_eq!(stack.items(), &[vec![1]]);
    }

    #[test]
    fn repeated_execution_is_deterministic() {
        let script = Script::from(vec![push(b"x"), op(Opcode::Dup), op(Opcode::Equal)]);
        let mut first = ScriptStack::new();
        let mut second = ScriptStack::new();
        assert!(execute(&script, &mut first, None));
        assert!(execute(&script, &mut second, None));
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_unknown_flags() {
        let invalid_bit = 1 << 31;
        assert_eq!(ScriptFlags::from_bits(invalid_bit), Err(Error::InvalidFlags));
    }

    #[test]
    fn flag_roundtrip_is_lossless() {
        let bits = VERIFY_SIGPUSHONLY | VERIFY_DERSIG | VERIFY_CLEANSTACK;
        let flags = ScriptFlags::from_bits(bits).unwrap();
        assert_eq!(flags.bits(), bits);
        assert!(flags.contains(VERIFY_DERSIG));
        assert!(!ScriptFlags::default().contains(VERIFY_CLEANSTACK));
    }

    #[test]
    fn cast_to_bool_follows_consensus() {
        assert!(!cast_to_bool(&[]));
        assert!(!cast_to_bool(&[0x00, 0x00]));
        assert!(!cast_to_bool(&[0x00, 0x80]));
        assert!(cast_to_bool(&[0x80, 0x00]));
        assert!(cast_to_bool(&[0x01]));
    }
}
