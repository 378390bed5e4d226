//! Script bytes, instruction decoding and the human-readable form.

use core::{fmt, str::FromStr};

use bitcoin::{
    consensus::{encode, Decodable, Encodable},
    hex::{DisplayHex, FromHex},
    io,
    opcodes::{all, Opcode},
};
use num_bigint::BigInt;

use crate::{num::encode_num, opcodes};

/// Maximum serialized size of a script accepted for execution.
pub const MAX_SCRIPT_SIZE: usize = 10_000;
/// Maximum size of a single pushed element.
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Raw script bytes.
///
/// Any byte string is a valid `Script`; well-formedness is only checked when
/// the script is decoded or executed.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct Script(Vec<u8>);

impl Script {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lazily decodes the script. The iterator stops after the first error.
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            data: &self.0,
            position: 0,
            failed: false,
        }
    }

    /// Like [`Script::instructions`], paired with each instruction's byte offset.
    pub fn instruction_indices(&self) -> InstructionIndices<'_> {
        InstructionIndices {
            inner: self.instructions(),
        }
    }

    /// True if the script decodes cleanly and contains nothing but pushes.
    ///
    /// `OP_1NEGATE` and `OP_1`..`OP_16` count as pushes, `OP_RESERVED` does
    /// not.
    pub fn is_push_only(&self) -> bool {
        self.instructions().all(|instruction| match instruction {
            Ok(Instruction::PushBytes(_)) => true,
            Ok(Instruction::Op(op)) => {
                let byte = op.to_u8();
                byte <= all::OP_PUSHNUM_16.to_u8() && op != all::OP_RESERVED
            }
            Err(_) => false,
        })
    }
}

impl From<Vec<u8>> for Script {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Script {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for Script {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A single decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    /// Data pushed by `OP_0`, a direct push or one of the `OP_PUSHDATA` forms.
    PushBytes(&'a [u8]),
    /// Any other opcode, including the small-number opcodes.
    Op(Opcode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("push length prefix runs past the end of the script")]
    EarlyEndOfScript,
    #[error("push payload runs past the end of the script")]
    PushPastEnd,
}

/// Iterator over the instructions of a [`Script`].
#[derive(Debug, Clone)]
pub struct Instructions<'a> {
    data: &'a [u8],
    position: usize,
    failed: bool,
}

impl<'a> Instructions<'a> {
    /// Byte offset of the next instruction.
    pub fn position(&self) -> usize {
        self.position
    }

    fn read_push_length(&mut self, width: usize) -> Result<usize, DecodeError> {
        let end = self.position + width;
        if end > self.data.len() {
            return Err(DecodeError::EarlyEndOfScript);
        }
        let mut len = 0usize;
        for (i, byte) in self.data[self.position..end].iter().enumerate() {
            len |= usize::from(*byte) << (8 * i);
        }
        self.position = end;
        Ok(len)
    }

    fn decode_next(&mut self) -> Result<Instruction<'a>, DecodeError> {
        let opcode = self.data[self.position];
        self.position += 1;

        let len = match opcode {
            0x00..=0x4b => usize::from(opcode),
            0x4c => self.read_push_length(1)?,
            0x4d => self.read_push_length(2)?,
            0x4e => self.read_push_length(4)?,
            _ => return Ok(Instruction::Op(Opcode::from(opcode))),
        };

        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(DecodeError::PushPastEnd)?;
        let data = &self.data[self.position..end];
        self.position = end;
        Ok(Instruction::PushBytes(data))
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.data.len() {
            return None;
        }
        let result = self.decode_next();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

impl core::iter::FusedIterator for Instructions<'_> {}

/// Iterator over `(offset, instruction)` pairs.
#[derive(Debug, Clone)]
pub struct InstructionIndices<'a> {
    inner: Instructions<'a>,
}

impl<'a> Iterator for InstructionIndices<'a> {
    type Item = Result<(usize, Instruction<'a>), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.inner.position();
        self.inner
            .next()
            .map(|instruction| instruction.map(|instruction| (start, instruction)))
    }
}

impl core::iter::FusedIterator for InstructionIndices<'_> {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushDataError {
    #[error("push of {0} bytes does not fit OP_PUSHDATA4")]
    TooLarge(usize),
}

/// Appends the minimal push encoding of `data` to `out`.
pub fn push_data(out: &mut Vec<u8>, data: &[u8]) -> Result<(), PushDataError> {
    let len = data.len();
    match len {
        0 => out.push(all::OP_PUSHBYTES_0.to_u8()),
        1..=0x4b => out.push(len as u8),
        0x4c..=0xff => {
            out.push(all::OP_PUSHDATA1.to_u8());
            out.push(len as u8);
        }
        0x100..=0xffff => {
            out.push(all::OP_PUSHDATA2.to_u8());
            out.extend_from_slice(&(len as u16).to_le_bytes());
        }
        _ => {
            let len = u32::try_from(len).map_err(|_| PushDataError::TooLarge(len))?;
            out.push(all::OP_PUSHDATA4.to_u8());
            out.extend_from_slice(&len.to_le_bytes());
        }
    }
    out.extend_from_slice(data);
    Ok(())
}

/// Incremental script construction.
#[derive(Debug, Default, Clone)]
pub struct Builder(Vec<u8>);

impl Builder {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push_opcode(mut self, op: Opcode) -> Self {
        self.0.push(op.to_u8());
        self
    }

    pub fn push_slice(mut self, data: &[u8]) -> Result<Self, PushDataError> {
        push_data(&mut self.0, data)?;
        Ok(self)
    }

    /// Pushes an integer, using `OP_1NEGATE` and `OP_0`..`OP_16` where
    /// possible.
    pub fn push_int(mut self, value: i64) -> Self {
        match value {
            -1 => self.push_opcode(all::OP_PUSHNUM_NEG1),
            0 => self.push_opcode(all::OP_PUSHBYTES_0),
            1..=16 => {
                let offset = value as u8 - 1;
                self.0.push(all::OP_PUSHNUM_1.to_u8() + offset);
                self
            }
            _ => {
                let bytes = encode_num(&BigInt::from(value));
                // At most nine bytes, always a direct push.
                self.0.push(bytes.len() as u8);
                self.0.extend_from_slice(&bytes);
                self
            }
        }
    }

    pub fn into_script(self) -> Script {
        Script(self.0)
    }
}

/// Removes every non-overlapping occurrence of `needle` from `script`.
///
/// Matching is bytewise and resumes right after each removed occurrence.
/// Returns the new script and the number of occurrences removed.
pub fn find_and_delete(script: &Script, needle: &[u8]) -> (Script, usize) {
    let mut rest = script.as_bytes();
    let mut kept = Vec::with_capacity(rest.len());
    let mut removed = 0usize;

    while !needle.is_empty() && rest.len() >= needle.len() {
        if rest.starts_with(needle) {
            rest = &rest[needle.len()..];
            removed += 1;
        } else {
            kept.push(rest[0]);
            rest = &rest[1..];
        }
    }
    kept.extend_from_slice(rest);
    (Script(kept), removed)
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, instruction) in self.instructions().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match instruction {
                Ok(Instruction::PushBytes(data)) if data.is_empty() => f.write_str("OP_0")?,
                Ok(Instruction::PushBytes(data)) => write!(f, "{:x}", data.as_hex())?,
                Ok(Instruction::Op(op)) => {
                    f.write_str(opcodes::name_of(op).unwrap_or("OP_UNKNOWN"))?
                }
                Err(_) => f.write_str("<push past end>")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseScriptError {
    #[error("token `{0}` is neither an opcode nor hex data")]
    BadToken(String),
    #[error(transparent)]
    Push(#[from] PushDataError),
}

impl FromStr for Script {
    type Err = ParseScriptError;

    /// Parses whitespace separated tokens. A token is an `OP_` mnemonic or a
    /// hex string, which becomes a minimal push of those bytes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = Vec::new();
        for token in s.split_whitespace() {
            if let Some(op) = opcodes::from_name(token) {
                bytes.push(op.to_u8());
                continue;
            }
            let data = Vec::<u8>::from_hex(token)
                .map_err(|_| ParseScriptError::BadToken(token.to_string()))?;
            push_data(&mut bytes, &data)?;
        }
        Ok(Script(bytes))
    }
}

impl Encodable for Script {
    fn consensus_encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(writer)
    }
}

impl Decodable for Script {
    fn consensus_decode_from_finite_reader<R: io::Read + ?Sized>(
        reader: &mut R,
    ) -> Result<Self, encode::Error> {
        Ok(Script(Vec::<u8>::consensus_decode_from_finite_reader(reader)?))
    }
}
