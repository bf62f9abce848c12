//! The instruction set.
//!
//! Wasm is a structured stack machine: control flow is encoded in
//! block-like constructs (`block`, `loop`, `if`) that are entered and left
//! rather than jumped between. The interpreter keeps that structure at run
//! time with an explicit label stack per call frame, so instructions are
//! executed straight from the decoded stream — there is no separate
//! translation pass.
//!
//! Every variant of [`Instruction`] corresponds to one opcode byte (or one
//! `0xFC`-prefixed subopcode) together with its decoded immediate operands.
//! [`Instruction::decode`] is the central constructor: it reads an opcode
//! byte, then the immediates that opcode implies, from the same stream.
//! The set is closed — the interpreter matches on it exhaustively, so a
//! forgotten opcode is a compile error rather than a runtime surprise.

use crate::elements::ValueType;
use crate::{leb128, DecodeError};
use std::io::Read;

/// The static type of a block-like construct.
///
/// The binary format encodes `0x40` for a block without results, or a
/// single value type byte. (The multi-value type-index form is not part of
/// this instruction set.)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockType {
    /// The block leaves no value on the stack.
    NoResult,
    /// The block leaves a single value of the given type.
    Value(ValueType),
}

impl BlockType {
    /// Number of values the block leaves on the stack on normal exit.
    pub fn result_arity(&self) -> usize {
        match self {
            BlockType::NoResult => 0,
            BlockType::Value(_) => 1,
        }
    }
}

/// Immediate operands of a load or store: an alignment hint (ignored by
/// execution) and a constant address offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemArg {
    /// Power-of-two alignment hint.
    pub align: u32,
    /// Constant offset added to the dynamic address.
    pub offset: u32,
}

/// A single decoded instruction.
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum Instruction {
    Unreachable,
    Nop,
    Block(BlockType),
    Loop(BlockType),
    If(BlockType),
    Else,
    End,
    Br(u32),
    BrIf(u32),
    BrTable {
        targets: Box<[u32]>,
        default: u32,
    },
    Return,
    Call(u32),

    Drop,
    Select,

    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    I32Load(MemArg),
    I64Load(MemArg),
    F32Load(MemArg),
    F64Load(MemArg),
    I32Load8S(MemArg),
    I32Load8U(MemArg),
    I32Load16S(MemArg),
    I32Load16U(MemArg),
    I64Load8S(MemArg),
    I64Load8U(MemArg),
    I64Load16S(MemArg),
    I64Load16U(MemArg),
    I64Load32S(MemArg),
    I64Load32U(MemArg),
    I32Store(MemArg),
    I64Store(MemArg),
    F32Store(MemArg),
    F64Store(MemArg),
    I32Store8(MemArg),
    I32Store16(MemArg),
    I64Store8(MemArg),
    I64Store16(MemArg),
    I64Store32(MemArg),
    MemorySize,
    MemoryGrow,

    I32Const(i32),
    I64Const(i64),
    /// Stored as raw bits so that NaN payloads survive decoding untouched.
    F32Const(u32),
    /// Stored as raw bits so that NaN payloads survive decoding untouched.
    F64Const(u64),

    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,

    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,

    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,

    I32WrapI64,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64ExtendI32S,
    I64ExtendI32U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,

    I32Extend8S,
    I32Extend16S,
    I64Extend8S,
    I64Extend16S,
    I64Extend32S,

    I32TruncSatF32S,
    I32TruncSatF32U,
    I32TruncSatF64S,
    I32TruncSatF64U,
    I64TruncSatF32S,
    I64TruncSatF32U,
    I64TruncSatF64S,
    I64TruncSatF64U,
}

fn read_byte<R: Read>(reader: &mut R) -> Result<u8, DecodeError> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Reads one opcode byte, or `None` at a clean end of the stream.
fn read_opcode<R: Read>(reader: &mut R) -> Result<Option<u8>, DecodeError> {
    let mut buf = [0u8; 1];
    match reader.read(&mut buf)? {
        0 => Ok(None),
        _ => Ok(Some(buf[0])),
    }
}

fn read_block_type<R: Read>(reader: &mut R) -> Result<BlockType, DecodeError> {
    let byte = read_byte(reader)?;
    match byte {
        0x40 => Ok(BlockType::NoResult),
        _ => Ok(BlockType::Value(ValueType::from_byte(byte)?)),
    }
}

fn read_mem_arg<R: Read>(reader: &mut R) -> Result<MemArg, DecodeError> {
    let align = leb128::u32(reader)?;
    let offset = leb128::u32(reader)?;
    Ok(MemArg { align, offset })
}

fn read_f32_bits<R: Read>(reader: &mut R) -> Result<u32, DecodeError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f64_bits<R: Read>(reader: &mut R) -> Result<u64, DecodeError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn decode_fc_prefixed<R: Read>(reader: &mut R) -> Result<Instruction, DecodeError> {
    let subopcode = leb128::u32(reader)?;
    let instruction = match subopcode {
        0x00 => Instruction::I32TruncSatF32S,
        0x01 => Instruction::I32TruncSatF32U,
        0x02 => Instruction::I32TruncSatF64S,
        0x03 => Instruction::I32TruncSatF64U,
        0x04 => Instruction::I64TruncSatF32S,
        0x05 => Instruction::I64TruncSatF32U,
        0x06 => Instruction::I64TruncSatF64S,
        0x07 => Instruction::I64TruncSatF64U,
        _ => return Err(DecodeError::UnknownExtendedOpcode(subopcode)),
    };
    Ok(instruction)
}

impl Instruction {
    /// Decodes the next instruction from `reader`.
    ///
    /// Returns `Ok(None)` when the stream ends on an opcode boundary, which
    /// is how a function body's instruction sequence terminates (the body's
    /// final `end` is part of the sequence).
    pub(crate) fn decode<R: Read>(reader: &mut R) -> Result<Option<Instruction>, DecodeError> {
        let opcode = match read_opcode(reader)? {
            Some(opcode) => opcode,
            None => return Ok(None),
        };
        let instruction = match opcode {
            0x00 => Instruction::Unreachable,
            0x01 => Instruction::Nop,
            0x02 => Instruction::Block(read_block_type(reader)?),
            0x03 => Instruction::Loop(read_block_type(reader)?),
            0x04 => Instruction::If(read_block_type(reader)?),
            0x05 => Instruction::Else,
            0x0B => Instruction::End,
            0x0C => Instruction::Br(leb128::u32(reader)?),
            0x0D => Instruction::BrIf(leb128::u32(reader)?),
            0x0E => {
                let count = leb128::u32(reader)?;
                let mut targets = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    targets.push(leb128::u32(reader)?);
                }
                Instruction::BrTable {
                    targets: targets.into_boxed_slice(),
                    default: leb128::u32(reader)?,
                }
            }
            0x0F => Instruction::Return,
            0x10 => Instruction::Call(leb128::u32(reader)?),

            0x1A => Instruction::Drop,
            0x1B => Instruction::Select,

            0x20 => Instruction::LocalGet(leb128::u32(reader)?),
            0x21 => Instruction::LocalSet(leb128::u32(reader)?),
            0x22 => Instruction::LocalTee(leb128::u32(reader)?),
            0x23 => Instruction::GlobalGet(leb128::u32(reader)?),
            0x24 => Instruction::GlobalSet(leb128::u32(reader)?),

            0x28 => Instruction::I32Load(read_mem_arg(reader)?),
            0x29 => Instruction::I64Load(read_mem_arg(reader)?),
            0x2A => Instruction::F32Load(read_mem_arg(reader)?),
            0x2B => Instruction::F64Load(read_mem_arg(reader)?),
            0x2C => Instruction::I32Load8S(read_mem_arg(reader)?),
            0x2D => Instruction::I32Load8U(read_mem_arg(reader)?),
            0x2E => Instruction::I32Load16S(read_mem_arg(reader)?),
            0x2F => Instruction::I32Load16U(read_mem_arg(reader)?),
            0x30 => Instruction::I64Load8S(read_mem_arg(reader)?),
            0x31 => Instruction::I64Load8U(read_mem_arg(reader)?),
            0x32 => Instruction::I64Load16S(read_mem_arg(reader)?),
            0x33 => Instruction::I64Load16U(read_mem_arg(reader)?),
            0x34 => Instruction::I64Load32S(read_mem_arg(reader)?),
            0x35 => Instruction::I64Load32U(read_mem_arg(reader)?),
            0x36 => Instruction::I32Store(read_mem_arg(reader)?),
            0x37 => Instruction::I64Store(read_mem_arg(reader)?),
            0x38 => Instruction::F32Store(read_mem_arg(reader)?),
            0x39 => Instruction::F64Store(read_mem_arg(reader)?),
            0x3A => Instruction::I32Store8(read_mem_arg(reader)?),
            0x3B => Instruction::I32Store16(read_mem_arg(reader)?),
            0x3C => Instruction::I64Store8(read_mem_arg(reader)?),
            0x3D => Instruction::I64Store16(read_mem_arg(reader)?),
            0x3E => Instruction::I64Store32(read_mem_arg(reader)?),
            0x3F => {
                // Reserved memory index, always zero in this format.
                leb128::u32(reader)?;
                Instruction::MemorySize
            }
            0x40 => {
                leb128::u32(reader)?;
                Instruction::MemoryGrow
            }

            0x41 => Instruction::I32Const(leb128::i32(reader)?),
            0x42 => Instruction::I64Const(leb128::i64(reader)?),
            0x43 => Instruction::F32Const(read_f32_bits(reader)?),
            0x44 => Instruction::F64Const(read_f64_bits(reader)?),

            0x45 => Instruction::I32Eqz,
            0x46 => Instruction::I32Eq,
            0x47 => Instruction::I32Ne,
            0x48 => Instruction::I32LtS,
            0x49 => Instruction::I32LtU,
            0x4A => Instruction::I32GtS,
            0x4B => Instruction::I32GtU,
            0x4C => Instruction::I32LeS,
            0x4D => Instruction::I32LeU,
            0x4E => Instruction::I32GeS,
            0x4F => Instruction::I32GeU,
            0x50 => Instruction::I64Eqz,
            0x51 => Instruction::I64Eq,
            0x52 => Instruction::I64Ne,
            0x53 => Instruction::I64LtS,
            0x54 => Instruction::I64LtU,
            0x55 => Instruction::I64GtS,
            0x56 => Instruction::I64GtU,
            0x57 => Instruction::I64LeS,
            0x58 => Instruction::I64LeU,
            0x59 => Instruction::I64GeS,
            0x5A => Instruction::I64GeU,
            0x5B => Instruction::F32Eq,
            0x5C => Instruction::F32Ne,
            0x5D => Instruction::F32Lt,
            0x5E => Instruction::F32Gt,
            0x5F => Instruction::F32Le,
            0x60 => Instruction::F32Ge,
            0x61 => Instruction::F64Eq,
            0x62 => Instruction::F64Ne,
            0x63 => Instruction::F64Lt,
            0x64 => Instruction::F64Gt,
            0x65 => Instruction::F64Le,
            0x66 => Instruction::F64Ge,

            0x67 => Instruction::I32Clz,
            0x68 => Instruction::I32Ctz,
            0x69 => Instruction::I32Popcnt,
            0x6A => Instruction::I32Add,
            0x6B => Instruction::I32Sub,
            0x6C => Instruction::I32Mul,
            0x6D => Instruction::I32DivS,
            0x6E => Instruction::I32DivU,
            0x6F => Instruction::I32RemS,
            0x70 => Instruction::I32RemU,
            0x71 => Instruction::I32And,
            0x72 => Instruction::I32Or,
            0x73 => Instruction::I32Xor,
            0x74 => Instruction::I32Shl,
            0x75 => Instruction::I32ShrS,
            0x76 => Instruction::I32ShrU,
            0x77 => Instruction::I32Rotl,
            0x78 => Instruction::I32Rotr,
            0x79 => Instruction::I64Clz,
            0x7A => Instruction::I64Ctz,
            0x7B => Instruction::I64Popcnt,
            0x7C => Instruction::I64Add,
            0x7D => Instruction::I64Sub,
            0x7E => Instruction::I64Mul,
            0x7F => Instruction::I64DivS,
            0x80 => Instruction::I64DivU,
            0x81 => Instruction::I64RemS,
            0x82 => Instruction::I64RemU,
            0x83 => Instruction::I64And,
            0x84 => Instruction::I64Or,
            0x85 => Instruction::I64Xor,
            0x86 => Instruction::I64Shl,
            0x87 => Instruction::I64ShrS,
            0x88 => Instruction::I64ShrU,
            0x89 => Instruction::I64Rotl,
            0x8A => Instruction::I64Rotr,

            0x8B => Instruction::F32Abs,
            0x8C => Instruction::F32Neg,
            0x8D => Instruction::F32Ceil,
            0x8E => Instruction::F32Floor,
            0x8F => Instruction::F32Trunc,
            0x90 => Instruction::F32Nearest,
            0x91 => Instruction::F32Sqrt,
            0x92 => Instruction::F32Add,
            0x93 => Instruction::F32Sub,
            0x94 => Instruction::F32Mul,
            0x95 => Instruction::F32Div,
            0x96 => Instruction::F32Min,
            0x97 => Instruction::F32Max,
            0x98 => Instruction::F32Copysign,
            0x99 => Instruction::F64Abs,
            0x9A => Instruction::F64Neg,
            0x9B => Instruction::F64Ceil,
            0x9C => Instruction::F64Floor,
            0x9D => Instruction::F64Trunc,
            0x9E => Instruction::F64Nearest,
            0x9F => Instruction::F64Sqrt,
            0xA0 => Instruction::F64Add,
            0xA1 => Instruction::F64Sub,
            0xA2 => Instruction::F64Mul,
            0xA3 => Instruction::F64Div,
            0xA4 => Instruction::F64Min,
            0xA5 => Instruction::F64Max,
            0xA6 => Instruction::F64Copysign,

            0xA7 => Instruction::I32WrapI64,
            0xA8 => Instruction::I32TruncF32S,
            0xA9 => Instruction::I32TruncF32U,
            0xAA => Instruction::I32TruncF64S,
            0xAB => Instruction::I32TruncF64U,
            0xAC => Instruction::I64ExtendI32S,
            0xAD => Instruction::I64ExtendI32U,
            0xAE => Instruction::I64TruncF32S,
            0xAF => Instruction::I64TruncF32U,
            0xB0 => Instruction::I64TruncF64S,
            0xB1 => Instruction::I64TruncF64U,
            0xB2 => Instruction::F32ConvertI32S,
            0xB3 => Instruction::F32ConvertI32U,
            0xB4 => Instruction::F32ConvertI64S,
            0xB5 => Instruction::F32ConvertI64U,
            0xB6 => Instruction::F32DemoteF64,
            0xB7 => Instruction::F64ConvertI32S,
            0xB8 => Instruction::F64ConvertI32U,
            0xB9 => Instruction::F64ConvertI64S,
            0xBA => Instruction::F64ConvertI64U,
            0xBB => Instruction::F64PromoteF32,
            0xBC => Instruction::I32ReinterpretF32,
            0xBD => Instruction::I64ReinterpretF64,
            0xBE => Instruction::F32ReinterpretI32,
            0xBF => Instruction::F64ReinterpretI64,

            0xC0 => Instruction::I32Extend8S,
            0xC1 => Instruction::I32Extend16S,
            0xC2 => Instruction::I64Extend8S,
            0xC3 => Instruction::I64Extend16S,
            0xC4 => Instruction::I64Extend32S,

            0xFC => decode_fc_prefixed(reader)?,

            _ => return Err(DecodeError::UnknownOpcode(opcode)),
        };
        Ok(Some(instruction))
    }

    /// Whether this instruction opens a block-like construct that is closed
    /// by a matching `end`.
    pub(crate) fn is_block_like(&self) -> bool {
        matches!(
            self,
            Instruction::Block(_) | Instruction::Loop(_) | Instruction::If(_)
        )
    }
}
