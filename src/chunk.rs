use super::value::Value;
use std::convert::TryFrom;

#[cfg(feature = "debug-bytecode")]
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Constant,
    Null,
    True,
    False,
    Pop,
    GetLocal,
    SetLocal,
    GetGlobal,
    DefineGlobal,
    SetGlobal,
    GetUpvalue,
    SetUpvalue,
    GetProperty,
    SetProperty,
    GetSuper,
    Equal,
    Greater,
    Less,
    Add,
    Subtract,
    Multiply,
    Divide,
    Negate,
    Not,
    Print,
    Jump,
    JumpIfFalse,
    Loop,
    Call,
    Invoke,
    SuperInvoke,
    Closure,
    CloseUpvalue,
    Return,
    Class,
    Inherit,
    Method,
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> u8 {
        match op {
            OpCode::Constant => 0,
            OpCode::Null => 1,
            OpCode::True => 2,
            OpCode::False => 3,
            OpCode::Pop => 4,
            OpCode::GetLocal => 5,
            OpCode::SetLocal => 6,
            OpCode::GetGlobal => 7,
            OpCode::DefineGlobal => 8,
            OpCode::SetGlobal => 9,
            OpCode::GetUpvalue => 10,
            OpCode::SetUpvalue => 11,
            OpCode::GetProperty => 12,
            OpCode::SetProperty => 13,
            OpCode::GetSuper => 14,
            OpCode::Equal => 15,
            OpCode::Greater => 16,
            OpCode::Less => 17,
            OpCode::Add => 18,
            OpCode::Subtract => 19,
            OpCode::Multiply => 20,
            OpCode::Divide => 21,
            OpCode::Negate => 22,
            OpCode::Not => 23,
            OpCode::Print => 24,
            OpCode::Jump => 25,
            OpCode::JumpIfFalse => 26,
            OpCode::Loop => 27,
            OpCode::Call => 28,
            OpCode::Invoke => 29,
            OpCode::SuperInvoke => 30,
            OpCode::Closure => 31,
            OpCode::CloseUpvalue => 32,
            OpCode::Return => 33,
            OpCode::Class => 34,
            OpCode::Inherit => 35,
            OpCode::Method => 36,
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => OpCode::Constant,
            1 => OpCode::Null,
            2 => OpCode::True,
            3 => OpCode::False,
            4 => OpCode::Pop,
            5 => OpCode::GetLocal,
            6 => OpCode::SetLocal,
            7 => OpCode::GetGlobal,
            8 => OpCode::DefineGlobal,
            9 => OpCode::SetGlobal,
            10 => OpCode::GetUpvalue,
            11 => OpCode::SetUpvalue,
            12 => OpCode::GetProperty,
            13 => OpCode::SetProperty,
            14 => OpCode::GetSuper,
            15 => OpCode::Equal,
            16 => OpCode::Greater,
            17 => OpCode::Less,
            18 => OpCode::Add,
            19 => OpCode::Subtract,
            20 => OpCode::Multiply,
            21 => OpCode::Divide,
            22 => OpCode::Negate,
            23 => OpCode::Not,
            24 => OpCode::Print,
            25 => OpCode::Jump,
            26 => OpCode::JumpIfFalse,
            27 => OpCode::Loop,
            28 => OpCode::Call,
            29 => OpCode::Invoke,
            30 => OpCode::SuperInvoke,
            31 => OpCode::Closure,
            32 => OpCode::CloseUpvalue,
            33 => OpCode::Return,
            34 => OpCode::Class,
            35 => OpCode::Inherit,
            36 => OpCode::Method,
            _ => return Err(()),
        })
    }
}

/// One compiled function body: its bytecode, the constants it references, and a
/// line number per byte for runtime backtraces. Only the line is kept per
/// instruction, not a whole token, since that's all the VM ever needs.
#[derive(Clone, Default)]
pub struct Chunk {
    code: Vec<u8>,
    lines: Vec<u32>,
    constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn byte_at(&self, offset: usize) -> u8 {
        self.code[offset]
    }

    pub fn line_at(&self, offset: usize) -> u32 {
        self.lines[offset]
    }

    pub fn constant_at(&self, index: usize) -> Value {
        self.constants[index]
    }

    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    pub fn emit_byte(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    pub fn emit_op(&mut self, op: OpCode, line: u32) {
        self.emit_byte(op.into(), line);
    }

    pub fn emit_op_byte(&mut self, op: OpCode, operand: u8, line: u32) {
        self.emit_op(op, line);
        self.emit_byte(operand, line);
    }

    pub fn add_constant(&mut self, value: Value) -> usize {
        let index = self.constants.len();
        self.constants.push(value);
        index
    }

    /// Emits `CONSTANT <index>`, returning the index so callers (e.g. the
    /// compiler's global-variable machinery) can reuse it.
    pub fn emit_constant(&mut self, value: Value, line: u32) -> usize {
        let index = self.add_constant(value);
        self.emit_op_byte(OpCode::Constant, index as u8, line);
        index
    }

    /// Emits a two-byte-operand jump instruction with a placeholder offset,
    /// returning the offset of the operand's first byte so it can be patched.
    pub fn emit_jump(&mut self, op: OpCode, line: u32) -> usize {
        self.emit_op(op, line);
        self.emit_byte(0xff, line);
        self.emit_byte(0xff, line);
        self.code.len() - 2
    }

    pub fn patch_jump(&mut self, offset: usize) {
        let jump = self.code.len() - offset - 2;
        self.code[offset] = (jump >> 8) as u8;
        self.code[offset + 1] = jump as u8;
    }

    pub fn emit_loop(&mut self, loop_start: usize, line: u32) {
        self.emit_op(OpCode::Loop, line);
        let offset = self.code.len() - loop_start + 2;
        self.emit_byte((offset >> 8) as u8, line);
        self.emit_byte(offset as u8, line);
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        ((self.code[offset] as u16) << 8) | (self.code[offset + 1] as u16)
    }
}

#[cfg(feature = "debug-bytecode")]
impl Chunk {
    pub fn disassemble(&self, name: &str) -> String {
        let mut buffer = format!("== {} ==\n", name);
        let mut offset = 0;
        while offset < self.len() {
            offset = self.disassemble_instr_at(&mut buffer, offset);
        }
        buffer
    }

    fn simple(buffer: &mut String, name: &str, offset: usize) -> usize {
        buffer.push_str(&format!("{:0>4} {}\n", offset, name));
        offset + 1
    }

    fn byte_operand(&self, buffer: &mut String, name: &str, offset: usize) -> usize {
        let slot = self.code[offset + 1];
        buffer.push_str(&format!("{:0>4} {:<16} {}\n", offset, name, slot));
        offset + 2
    }

    fn constant_operand(&self, buffer: &mut String, name: &str, offset: usize) -> usize {
        let index = self.code[offset + 1] as usize;
        buffer.push_str(&format!(
            "{:0>4} {:<16} {} '{}'\n",
            offset, name, index, self.constants[index]
        ));
        offset + 2
    }

    fn jump_operand(&self, buffer: &mut String, name: &str, sign: i32, offset: usize) -> usize {
        let jump = self.read_u16(offset + 1) as i32;
        let target = offset as i32 + 3 + sign * jump;
        buffer.push_str(&format!("{:0>4} {:<16} -> {}\n", offset, name, target));
        offset + 3
    }

    fn disassemble_instr_at(&self, buffer: &mut String, offset: usize) -> usize {
        let op = OpCode::try_from(self.code[offset]).unwrap();
        match op {
            OpCode::Constant => self.constant_operand(buffer, "CONSTANT", offset),
            OpCode::GetProperty => self.constant_operand(buffer, "GET_PROPERTY", offset),
            OpCode::SetProperty => self.constant_operand(buffer, "SET_PROPERTY", offset),
            OpCode::GetSuper => self.constant_operand(buffer, "GET_SUPER", offset),
            OpCode::GetGlobal => self.constant_operand(buffer, "GET_GLOBAL", offset),
            OpCode::DefineGlobal => self.constant_operand(buffer, "DEFINE_GLOBAL", offset),
            OpCode::SetGlobal => self.constant_operand(buffer, "SET_GLOBAL", offset),
            OpCode::Class => self.constant_operand(buffer, "CLASS", offset),
            OpCode::Method => self.constant_operand(buffer, "METHOD", offset),
            OpCode::GetLocal => self.byte_operand(buffer, "GET_LOCAL", offset),
            OpCode::SetLocal => self.byte_operand(buffer, "SET_LOCAL", offset),
            OpCode::GetUpvalue => self.byte_operand(buffer, "GET_UPVALUE", offset),
            OpCode::SetUpvalue => self.byte_operand(buffer, "SET_UPVALUE", offset),
            OpCode::Call => self.byte_operand(buffer, "CALL", offset),
            OpCode::Jump => self.jump_operand(buffer, "JUMP", 1, offset),
            OpCode::JumpIfFalse => self.jump_operand(buffer, "JUMP_IF_FALSE", 1, offset),
            OpCode::Loop => self.jump_operand(buffer, "LOOP", -1, offset),
            OpCode::Invoke => {
                let index = self.code[offset + 1] as usize;
                let argc = self.code[offset + 2];
                buffer.push_str(&format!(
                    "{:0>4} {:<16} ({} args) '{}'\n",
                    offset, "INVOKE", argc, self.constants[index]
                ));
                offset + 3
            }
            OpCode::SuperInvoke => {
                let index = self.code[offset + 1] as usize;
                let argc = self.code[offset + 2];
                buffer.push_str(&format!(
                    "{:0>4} {:<16} ({} args) '{}'\n",
                    offset, "SUPER_INVOKE", argc, self.constants[index]
                ));
                offset + 3
            }
            OpCode::Closure => {
                let index = self.code[offset + 1] as usize;
                let mut new_offset = offset + 2;
                buffer.push_str(&format!(
                    "{:0>4} {:<16} {} '{}'\n",
                    offset, "CLOSURE", index, self.constants[index]
                ));
                if let Value::Obj(_) = self.constants[index] {
                    let upvalue_count = self.code[new_offset];
                    new_offset += 1;
                    for _ in 0..upvalue_count {
                        let is_local = self.code[new_offset] != 0;
                        let slot = self.code[new_offset + 1];
                        buffer.push_str(&format!(
                            "{:0>4}      |                     {} {}\n",
                            new_offset,
                            if is_local { "local" } else { "upvalue" },
                            slot
                        ));
                        new_offset += 2;
                    }
                }
                new_offset
            }
            OpCode::Null => Self::simple(buffer, "NULL", offset),
            OpCode::True => Self::simple(buffer, "TRUE", offset),
            OpCode::False => Self::simple(buffer, "FALSE", offset),
            OpCode::Pop => Self::simple(buffer, "POP", offset),
            OpCode::Equal => Self::simple(buffer, "EQUAL", offset),
            OpCode::Greater => Self::simple(buffer, "GREATER", offset),
            OpCode::Less => Self::simple(buffer, "LESS", offset),
            OpCode::Add => Self::simple(buffer, "ADD", offset),
            OpCode::Subtract => Self::simple(buffer, "SUBTRACT", offset),
            OpCode::Multiply => Self::simple(buffer, "MULTIPLY", offset),
            OpCode::Divide => Self::simple(buffer, "DIVIDE", offset),
            OpCode::Negate => Self::simple(buffer, "NEGATE", offset),
            OpCode::Not => Self::simple(buffer, "NOT", offset),
            OpCode::Print => Self::simple(buffer, "PRINT", offset),
            OpCode::CloseUpvalue => Self::simple(buffer, "CLOSE_UPVALUE", offset),
            OpCode::Return => Self::simple(buffer, "RETURN", offset),
            OpCode::Inherit => Self::simple(buffer, "INHERIT", offset),
        }
    }
}

#[cfg(feature = "debug-bytecode")]
impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.disassemble("chunk"))
    }
}
