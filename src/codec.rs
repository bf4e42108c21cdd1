//! Script serialization and subscript extraction.

use core::{fmt, ops::Deref};

use crate::opcodes::Opcode;

/// Largest operand length encoded with a single inline length byte.
pub const MAX_INLINE_PUSH: usize = 0x75;

/// A single decoded script element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// Literal operand pushed onto the stack.
    PushBytes(Vec<u8>),
    /// Registered opcode.
    Op(Opcode),
    /// Byte with no registry entry, preserved as is.
    Unknown(u8),
}

impl Instruction {
    pub fn is_push(&self) -> bool {
        matches!(self, Instruction::PushBytes(_))
    }

    fn is_op(&self, opcode: Opcode) -> bool {
        matches!(self, Instruction::Op(op) if *op == opcode)
    }
}

impl From<Opcode> for Instruction {
    fn from(op: Opcode) -> Self {
        Instruction::Op(op)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::PushBytes(data) => {
                f.write_str("[")?;
                for byte in data {
                    write!(f, "{byte:02x}")?;
                }
                f.write_str("]")
            }
            Instruction::Op(op) => fmt::Display::fmt(op, f),
            Instruction::Unknown(byte) => write!(f, "0x{byte:02x}"),
        }
    }
}

/// Structural errors found while decoding raw script bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A push-data opcode at `offset` is missing (part of) its `width`-byte length prefix.
    TruncatedLength { offset: usize, width: usize },
    /// The push at `offset` declares more bytes than the input holds.
    TruncatedPush {
        offset: usize,
        declared: usize,
        available: usize,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DecodeError::TruncatedLength { offset, width } => write!(
                f,
                "push at offset {offset} is missing its {width}-byte length prefix"
            ),
            DecodeError::TruncatedPush {
                offset,
                declared,
                available,
            } => write!(
                f,
                "push at offset {offset} declares {declared} bytes but only {available} remain"
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

/// An ordered, immutable sequence of instructions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Script(Vec<Instruction>);

impl Script {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Decodes raw script bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut instructions = Vec::new();
        let mut cursor = 0usize;

        while cursor < bytes.len() {
            let offset = cursor;
            let byte = bytes[cursor];
            cursor += 1;

            let opcode = Opcode::from_u8(byte);
            if let Some(width) = opcode.and_then(Opcode::push_length_width) {
                let len = read_push_length(bytes, &mut cursor, width, offset)?;
                let data = take_push_data(bytes, &mut cursor, len, offset)?;
                instructions.push(Instruction::PushBytes(data));
            } else if (0x01..=MAX_INLINE_PUSH).contains(&(byte as usize)) {
                let data = take_push_data(bytes, &mut cursor, byte as usize, offset)?;
                instructions.push(Instruction::PushBytes(data));
            } else {
                instructions.push(match opcode {
                    Some(op) => Instruction::Op(op),
                    None => Instruction::Unknown(byte),
                });
            }
        }

        Ok(Self(instructions))
    }

    /// Serializes the script, choosing the smallest push encoding that decodes back unchanged.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for instruction in &self.0 {
            match instruction {
                Instruction::PushBytes(data) => encode_push(&mut out, data),
                Instruction::Op(op) => out.push(op.to_u8()),
                Instruction::Unknown(byte) => out.push(*byte),
            }
        }
        out
    }

    /// Returns the part of the script a signature commits to.
    ///
    /// The scan for the last code separator stops at the first signature-check opcode, but the
    /// result runs to the end of the script. All separators are dropped from the result.
    pub fn subscript(&self) -> Script {
        let mut start = 0usize;
        for (index, instruction) in self.0.iter().enumerate() {
            match instruction {
                Instruction::Op(Opcode::CodeSeparator) => start = index + 1,
                Instruction::Op(op) if op.is_signature_check() => break,
                _ => {}
            }
        }

        self.0[start..]
            .iter()
            .filter(|instruction| !instruction.is_op(Opcode::CodeSeparator))
            .cloned()
            .collect()
    }

    /// Returns a copy without any push whose data equals `data`.
    pub fn without_push(&self, data: &[u8]) -> Script {
        self.0
            .iter()
            .filter(|instruction| !matches!(instruction, Instruction::PushBytes(d) if d == data))
            .cloned()
            .collect()
    }

    pub fn is_push_only(&self) -> bool {
        self.0.iter().all(Instruction::is_push)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.0
    }

    pub fn into_instructions(self) -> Vec<Instruction> {
        self.0
    }
}

impl Deref for Script {
    type Target = [Instruction];

    fn deref(&self) -> &[Instruction] {
        &self.0
    }
}

impl From<Vec<Instruction>> for Script {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self(instructions)
    }
}

impl FromIterator<Instruction> for Script {
    fn from_iter<I: IntoIterator<Item = Instruction>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Script {
    type Item = &'a Instruction;
    type IntoIter = core::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, instruction) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{instruction}")?;
        }
        Ok(())
    }
}

fn encode_push(out: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    // Inline lengths that collide with a push-data opcode byte fall through to pushdata1.
    if (1..=MAX_INLINE_PUSH).contains(&len) && Opcode::from_u8(len as u8).is_none() {
        out.push(len as u8);
    } else if len <= 0xff {
        out.push(Opcode::PushData1.to_u8());
        out.push(len as u8);
    } else if len <= 0xffff {
        out.push(Opcode::PushData2.to_u8());
        out.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        out.push(Opcode::PushData4.to_u8());
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }
    out.extend_from_slice(data);
}

fn read_push_length(
    bytes: &[u8],
    cursor: &mut usize,
    width: usize,
    offset: usize,
) -> Result<usize, DecodeError> {
    if bytes.len() < *cursor + width {
        return Err(DecodeError::TruncatedLength { offset, width });
    }
    let mut len: usize = 0;
    for i in 0..width {
        len |= (bytes[*cursor + i] as usize) << (8 * i);
    }
    *cursor += width;
    Ok(len)
}

fn take_push_data(
    bytes: &[u8],
    cursor: &mut usize,
    len: usize,
    offset: usize,
) -> Result<Vec<u8>, DecodeError> {
    let end = cursor
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or(DecodeError::TruncatedPush {
            offset,
            declared: len,
            available: bytes.len() - *cursor,
        })?;
    let data = bytes[*cursor..end].to_vec();
    *cursor = end;
    Ok(data)
}
