//! Instruction format and opcodes.

use num_enum::{FromPrimitive, IntoPrimitive};

/// Fixed-width instruction: one opcode byte plus three operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: u8,
    pub a: u16,
    pub b: u16,
    pub c: u16,
}

impl Instruction {
    #[inline]
    pub const fn new(op: Opcode, a: u16, b: u16, c: u16) -> Self {
        Self { op: op as u8, a, b, c }
    }

    #[inline]
    pub fn opcode(&self) -> Opcode {
        Opcode::from(self.op)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
pub enum Opcode {
    // === DATA: Register and constant moves ===
    Move = 0,
    Constant,
    Atom,

    // === DEF: Multimethod and object construction ===
    Method,
    Record,
    List,
    Function,
    Async,
    Class,

    // === FIELD: Record and instance field access ===
    GetField,
    TestField,
    GetClassField,
    SetClassField,

    // === VAR: Module variables and upvars ===
    GetVar,
    SetVar,
    GetUpvar,
    SetUpvar,

    // === TEST: Value tests ===
    Equal,
    Not,
    Is,

    // === JUMP: Control flow ===
    Jump,
    JumpIfFalse,
    JumpIfTrue,

    // === CALL: Calls and returns ===
    Call,
    Native,
    Return,

    // === THROW: Exceptions ===
    Throw,
    EnterTry,
    ExitTry,
    TestMatch,

    // Sentinel for invalid/unknown opcodes
    #[num_enum(default)]
    Invalid = 255,
}
