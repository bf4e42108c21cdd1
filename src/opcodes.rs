//! Opcode registry.
//!
//! Every registered opcode has exactly one short name and one byte value. Bytes without an
//! entry decode to [`Instruction::Unknown`](crate::Instruction::Unknown) and are kept verbatim.

use core::fmt;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Opcodes known to the registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    PushData1 = 0x4c,
    PushData2 = 0x4d,
    PushData4 = 0x4e,
    Dup = 0x76,
    Equal = 0x87,
    EqualVerify = 0x88,
    Ripemd160 = 0xa6,
    Sha1 = 0xa7,
    Sha256 = 0xa8,
    Hash160 = 0xa9,
    Hash256 = 0xaa,
    CodeSeparator = 0xab,
    CheckSig = 0xac,
    CheckSigVerify = 0xad,
    CheckMultiSig = 0xae,
    CheckMultiSigVerify = 0xaf,
}

impl Opcode {
    /// Every registered opcode, in byte order.
    pub const ALL: [Opcode; 16] = [
        Opcode::PushData1,
        Opcode::PushData2,
        Opcode::PushData4,
        Opcode::Dup,
        Opcode::Equal,
        Opcode::EqualVerify,
        Opcode::Ripemd160,
        Opcode::Sha1,
        Opcode::Sha256,
        Opcode::Hash160,
        Opcode::Hash256,
        Opcode::CodeSeparator,
        Opcode::CheckSig,
        Opcode::CheckSigVerify,
        Opcode::CheckMultiSig,
        Opcode::CheckMultiSigVerify,
    ];

    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Looks up the opcode registered for `byte`.
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        registry().by_byte[byte as usize]
    }

    /// Looks up an opcode by its short name (`"dup"`, `"eqverify"`, ...).
    pub fn from_name(name: &str) -> Option<Opcode> {
        registry().by_name.get(name).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::PushData1 => "pushdata1",
            Opcode::PushData2 => "pushdata2",
            Opcode::PushData4 => "pushdata4",
            Opcode::Dup => "dup",
            Opcode::Equal => "eq",
            Opcode::EqualVerify => "eqverify",
            Opcode::Ripemd160 => "ripemd160",
            Opcode::Sha1 => "sha1",
            Opcode::Sha256 => "sha256",
            Opcode::Hash160 => "hash160",
            Opcode::Hash256 => "hash256",
            Opcode::CodeSeparator => "codesep",
            Opcode::CheckSig => "checksig",
            Opcode::CheckSigVerify => "checksigverify",
            Opcode::CheckMultiSig => "checkmultisig",
            Opcode::CheckMultiSigVerify => "checkmultisigverify",
        }
    }

    /// Width in bytes of the length prefix following a push-data opcode.
    pub fn push_length_width(self) -> Option<usize> {
        match self {
            Opcode::PushData1 => Some(1),
            Opcode::PushData2 => Some(2),
            Opcode::PushData4 => Some(4),
            _ => None,
        }
    }

    /// True for the opcodes that end the code-separator scan of a subscript.
    pub fn is_signature_check(self) -> bool {
        matches!(
            self,
            Opcode::CheckSig
                | Opcode::CheckSigVerify
                | Opcode::CheckMultiSig
                | Opcode::CheckMultiSigVerify
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct Registry {
    by_name: HashMap<&'static str, Opcode>,
    by_byte: [Option<Opcode>; 256],
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(build_registry)
}

fn build_registry() -> Registry {
    let mut by_name = HashMap::with_capacity(Opcode::ALL.len());
    let mut by_byte = [None; 256];
    for op in Opcode::ALL {
        by_name.insert(op.name(), op);
        by_byte[op.to_u8() as usize] = Some(op);
    }
    Registry { by_name, by_byte }
}
