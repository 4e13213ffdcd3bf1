//! Compiled chunk format.
//!
//! A chunk is immutable after compilation: an instruction array, a constant
//! pool, a pool of nested chunks (for closure creation), the number of
//! register slots its frames need, and a pc → source line table. Chunks are
//! shared; several function objects may reference one.

use std::rc::Rc;

use magpie_common::SourceFile;
use thiserror::Error;

use crate::instruction::{Instruction, Opcode};
use crate::value::Atom;

/// A constant pool entry. Strings allocate a fresh heap object when loaded;
/// content equality keeps that invisible to the program.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
}

/// Error raised when a chunk fails validation on construction. Malformed
/// chunks are rejected here so the interpreter can trust what it decodes.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("unknown opcode at pc {pc}")]
    UnknownOpcode { pc: usize },
    #[error("jump target out of range at pc {pc}")]
    JumpOutOfRange { pc: usize },
    #[error("constant index out of range at pc {pc}")]
    ConstantOutOfRange { pc: usize },
    #[error("nested chunk index out of range at pc {pc}")]
    NestedChunkOutOfRange { pc: usize },
    #[error("register slot out of range at pc {pc}")]
    SlotOutOfRange { pc: usize },
    #[error("upvar slot out of range at pc {pc}")]
    UpvarOutOfRange { pc: usize },
    #[error("unknown atom id at pc {pc}")]
    UnknownAtom { pc: usize },
    #[error("expected pseudo-instruction at pc {pc}")]
    BadPseudoInstruction { pc: usize },
    #[error("truncated instruction sequence at pc {pc}")]
    Truncated { pc: usize },
}

#[derive(Clone, Copy, Debug)]
struct LineEntry {
    /// First pc covered by this entry.
    pc: u32,
    line: u32,
}

/// An immutable compiled unit of bytecode plus metadata.
#[derive(Debug)]
pub struct Chunk {
    code: Vec<Instruction>,
    constants: Vec<Constant>,
    chunks: Vec<Rc<Chunk>>,
    num_slots: usize,
    num_upvars: usize,
    source: Option<Rc<SourceFile>>,
    lines: Vec<LineEntry>,
}

impl Chunk {
    #[inline]
    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    #[inline]
    pub fn constant(&self, index: usize) -> &Constant {
        &self.constants[index]
    }

    #[inline]
    pub fn nested(&self, index: usize) -> &Rc<Chunk> {
        &self.chunks[index]
    }

    #[inline]
    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    #[inline]
    pub fn num_upvars(&self) -> usize {
        self.num_upvars
    }

    pub fn source(&self) -> Option<&Rc<SourceFile>> {
        self.source.as_ref()
    }

    /// Locates the source line for an instruction, if the compiler recorded
    /// one. Callers pass `pc - 1` for an already-fetched instruction.
    pub fn locate_line(&self, pc: usize) -> Option<u32> {
        let pc = pc as u32;
        let index = self.lines.partition_point(|entry| entry.pc <= pc);
        index.checked_sub(1).map(|i| self.lines[i].line)
    }
}

/// Builder used by the compiler (and tests) to assemble a chunk.
#[derive(Default)]
pub struct ChunkBuilder {
    code: Vec<Instruction>,
    constants: Vec<Constant>,
    chunks: Vec<Rc<Chunk>>,
    source: Option<Rc<SourceFile>>,
    lines: Vec<LineEntry>,
}

impl ChunkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(source: Rc<SourceFile>) -> Self {
        Self {
            source: Some(source),
            ..Self::default()
        }
    }

    /// Appends an instruction attributed to a source line; returns its pc.
    pub fn write(&mut self, instruction: Instruction, line: u32) -> usize {
        let pc = self.code.len();
        if self.lines.last().map(|entry| entry.line) != Some(line) {
            self.lines.push(LineEntry { pc: pc as u32, line });
        }
        self.code.push(instruction);
        pc
    }

    /// Adds a constant and returns its pool index.
    pub fn add_constant(&mut self, constant: Constant) -> u16 {
        let index = self.constants.len();
        self.constants.push(constant);
        index as u16
    }

    /// Adds a nested chunk and returns its pool index.
    pub fn add_chunk(&mut self, chunk: Rc<Chunk>) -> u16 {
        let index = self.chunks.len();
        self.chunks.push(chunk);
        index as u16
    }

    pub fn build(self, num_slots: usize, num_upvars: usize) -> Result<Rc<Chunk>, ChunkError> {
        let chunk = Chunk {
            code: self.code,
            constants: self.constants,
            chunks: self.chunks,
            num_slots,
            num_upvars,
            source: self.source,
            lines: self.lines,
        };
        validate(&chunk)?;
        Ok(Rc::new(chunk))
    }
}

/// Checks that every instruction decodes to a known opcode, every pool index
/// and register slot is in range, jump targets land inside the code array,
/// and pseudo-instruction sequences are well formed.
fn validate(chunk: &Chunk) -> Result<(), ChunkError> {
    let code = &chunk.code;
    let len = code.len();
    let slots = chunk.num_slots;

    let slot = |pc: usize, reg: u16| {
        if (reg as usize) < slots {
            Ok(())
        } else {
            Err(ChunkError::SlotOutOfRange { pc })
        }
    };
    // Jumps land on the instruction after the offset is applied; `pc` here is
    // the address the interpreter's counter holds when the offset is added.
    let target = |pc: usize, at: usize| {
        if at < len {
            Ok(())
        } else {
            Err(ChunkError::JumpOutOfRange { pc })
        }
    };

    let mut pc = 0;
    while pc < len {
        let ins = code[pc];
        match ins.opcode() {
            Opcode::Move => {
                slot(pc, ins.a)?;
                slot(pc, ins.b)?;
            }
            Opcode::Constant => {
                if ins.a as usize >= chunk.constants.len() {
                    return Err(ChunkError::ConstantOutOfRange { pc });
                }
                slot(pc, ins.b)?;
            }
            Opcode::Atom => {
                if Atom::try_from(ins.a as u8).is_err() || ins.a > u8::MAX as u16 {
                    return Err(ChunkError::UnknownAtom { pc });
                }
                slot(pc, ins.b)?;
            }
            Opcode::Method => {}
            Opcode::Record => {
                slot(pc, ins.a)?;
                slot(pc, ins.c)?;
            }
            Opcode::List => {
                if ins.b > 0 && ins.a as usize + ins.b as usize > slots {
                    return Err(ChunkError::SlotOutOfRange { pc });
                }
                slot(pc, ins.c)?;
            }
            Opcode::Function | Opcode::Async => {
                let nested = chunk
                    .chunks
                    .get(ins.a as usize)
                    .ok_or(ChunkError::NestedChunkOutOfRange { pc })?;
                if ins.opcode() == Opcode::Function {
                    slot(pc, ins.b)?;
                }
                // Capture protocol: one GetUpvar-shaped word per upvar.
                for i in 0..nested.num_upvars() {
                    let at = pc + 1 + i;
                    let capture = code.get(at).ok_or(ChunkError::Truncated { pc })?;
                    if capture.opcode() != Opcode::GetUpvar {
                        return Err(ChunkError::BadPseudoInstruction { pc: at });
                    }
                    if capture.a as usize >= chunk.num_upvars {
                        return Err(ChunkError::UpvarOutOfRange { pc: at });
                    }
                }
                pc += nested.num_upvars();
            }
            Opcode::Class => {
                slot(pc, ins.c)?;
                let word = code.get(pc + 1).ok_or(ChunkError::Truncated { pc })?;
                if word.opcode() != Opcode::Move {
                    return Err(ChunkError::BadPseudoInstruction { pc: pc + 1 });
                }
                if word.a as usize + word.b as usize > slots {
                    return Err(ChunkError::SlotOutOfRange { pc: pc + 1 });
                }
                pc += 1;
            }
            Opcode::GetField => {
                slot(pc, ins.a)?;
                slot(pc, ins.c)?;
            }
            Opcode::TestField => {
                slot(pc, ins.a)?;
                slot(pc, ins.c)?;
                let jump = code.get(pc + 1).ok_or(ChunkError::Truncated { pc })?;
                if jump.opcode() != Opcode::Jump {
                    return Err(ChunkError::BadPseudoInstruction { pc: pc + 1 });
                }
                target(pc, pc + 2 + jump.b as usize)?;
                pc += 1;
            }
            Opcode::GetClassField | Opcode::SetClassField => {}
            Opcode::GetVar => slot(pc, ins.c)?,
            Opcode::SetVar => slot(pc, ins.c)?,
            Opcode::GetUpvar => {
                if ins.a as usize >= chunk.num_upvars {
                    return Err(ChunkError::UpvarOutOfRange { pc });
                }
                slot(pc, ins.b)?;
            }
            Opcode::SetUpvar => {
                if ins.a as usize >= chunk.num_upvars {
                    return Err(ChunkError::UpvarOutOfRange { pc });
                }
                slot(pc, ins.b)?;
            }
            Opcode::Equal => {
                slot(pc, ins.a)?;
                slot(pc, ins.b)?;
                slot(pc, ins.c)?;
            }
            Opcode::Not => slot(pc, ins.a)?,
            Opcode::Is => {
                slot(pc, ins.a)?;
                slot(pc, ins.b)?;
                slot(pc, ins.c)?;
            }
            Opcode::Jump => {
                let offset = ins.b as usize;
                if ins.a == 1 {
                    target(pc, pc + 1 + offset)?;
                } else {
                    let at = (pc + 1)
                        .checked_sub(offset)
                        .ok_or(ChunkError::JumpOutOfRange { pc })?;
                    target(pc, at)?;
                }
            }
            Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
                slot(pc, ins.a)?;
                target(pc, pc + 1 + ins.b as usize)?;
            }
            Opcode::Call => {
                slot(pc, ins.b)?;
                slot(pc, ins.c)?;
            }
            Opcode::Native => slot(pc, ins.c)?,
            Opcode::Return => slot(pc, ins.a)?,
            Opcode::Throw => slot(pc, ins.a)?,
            Opcode::EnterTry => {
                let handler = pc + 1 + ins.a as usize;
                target(pc, handler)?;
                // The handler starts with a Move-shaped word naming the slot
                // that receives the thrown value.
                if code[handler].opcode() != Opcode::Move {
                    return Err(ChunkError::BadPseudoInstruction { pc: handler });
                }
            }
            Opcode::ExitTry => {}
            Opcode::TestMatch => slot(pc, ins.a)?,
            Opcode::Invalid => return Err(ChunkError::UnknownOpcode { pc }),
        }
        pc += 1;
    }
    Ok(())
}
