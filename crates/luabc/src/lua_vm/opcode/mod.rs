// Lua 5.1 opcode table
// 38 opcodes; instruction layout [B(9) | C(9) | A(8) | Op(6)] per lopcodes.h

pub mod instruction;

pub use instruction::Instruction;

/// Instruction format of an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,  // R[A] := R[B]
    LoadK,     // R[A] := K[Bx]
    LoadBool,  // R[A] := (bool)B; if C, pc++
    LoadNil,   // R[A], R[A+1], ..., R[B] := nil
    GetUpval,  // R[A] := UpValue[B]
    GetGlobal, // R[A] := _G[K[Bx]]
    GetTable,  // R[A] := R[B][RK(C)]
    SetGlobal, // _G[K[Bx]] := R[A]
    SetUpval,  // UpValue[B] := R[A]
    SetTable,  // R[A][RK(B)] := RK(C)
    NewTable,  // R[A] := {} (array size hint B, hash size hint C, floating bytes)
    Self_,     // R[A+1] := R[B]; R[A] := R[B][RK(C)]
    Add,       // R[A] := RK(B) + RK(C)
    Sub,       // R[A] := RK(B) - RK(C)
    Mul,       // R[A] := RK(B) * RK(C)
    Div,       // R[A] := RK(B) / RK(C)
    Mod,       // R[A] := RK(B) % RK(C)
    Pow,       // R[A] := RK(B) ^ RK(C)
    Unm,       // R[A] := -R[B]
    Not,       // R[A] := not R[B]
    Len,       // R[A] := #R[B]
    Concat,    // R[A] := R[B] .. ... .. R[C]
    Jmp,       // pc += sBx; close upvalues at >= A-1 when A > 0
    Eq,        // if (RK(B) == RK(C)) ~= A then pc++
    Lt,        // if (RK(B) <  RK(C)) ~= A then pc++
    Le,        // if (RK(B) <= RK(C)) ~= A then pc++
    Test,      // if (bool)R[A] ~= C then pc++
    TestSet,   // if (bool)R[B] == C then R[A] := R[B] else pc++
    Call,      // R[A], ... := R[A](args); B-1 args, C-1 results (0 = all)
    TailCall,  // return R[A](args), replacing the current frame
    Return,    // return R[A], ... (B-1 values; B = 0 up to top)
    ForLoop,   // R[A] += R[A+2]; loop back sBx while in limit, R[A+3] := R[A]
    ForPrep,   // R[A] -= R[A+2]; pc += sBx
    TForLoop,  // R[A+3..] := R[A](R[A+1], R[A+2]); nil first result ends loop
    SetList,   // R[A][(C-1)*FPF + i] := R[A+i], i in 1..=B
    Close,     // close upvalues at register >= A
    Closure,   // R[A] := closure(proto[Bx]); consumes upvalue-binding pseudo-ops
    Vararg,    // R[A], ..., R[A+B-2] := vararg (B = 0 copies all, sets top)
}

pub const NUM_OPCODES: usize = 38;

const OPCODES: [OpCode; NUM_OPCODES] = [
    OpCode::Move,
    OpCode::LoadK,
    OpCode::LoadBool,
    OpCode::LoadNil,
    OpCode::GetUpval,
    OpCode::GetGlobal,
    OpCode::GetTable,
    OpCode::SetGlobal,
    OpCode::SetUpval,
    OpCode::SetTable,
    OpCode::NewTable,
    OpCode::Self_,
    OpCode::Add,
    OpCode::Sub,
    OpCode::Mul,
    OpCode::Div,
    OpCode::Mod,
    OpCode::Pow,
    OpCode::Unm,
    OpCode::Not,
    OpCode::Len,
    OpCode::Concat,
    OpCode::Jmp,
    OpCode::Eq,
    OpCode::Lt,
    OpCode::Le,
    OpCode::Test,
    OpCode::TestSet,
    OpCode::Call,
    OpCode::TailCall,
    OpCode::Return,
    OpCode::ForLoop,
    OpCode::ForPrep,
    OpCode::TForLoop,
    OpCode::SetList,
    OpCode::Close,
    OpCode::Closure,
    OpCode::Vararg,
];

const OPCODE_NAMES: [&str; NUM_OPCODES] = [
    "MOVE", "LOADK", "LOADBOOL", "LOADNIL", "GETUPVAL", "GETGLOBAL", "GETTABLE", "SETGLOBAL",
    "SETUPVAL", "SETTABLE", "NEWTABLE", "SELF", "ADD", "SUB", "MUL", "DIV", "MOD", "POW", "UNM",
    "NOT", "LEN", "CONCAT", "JMP", "EQ", "LT", "LE", "TEST", "TESTSET", "CALL", "TAILCALL",
    "RETURN", "FORLOOP", "FORPREP", "TFORLOOP", "SETLIST", "CLOSE", "CLOSURE", "VARARG",
];

impl OpCode {
    /// Decode the 6-bit opcode field; out-of-table values are malformed
    #[inline(always)]
    pub fn from_u6(op: u32) -> Option<OpCode> {
        OPCODES.get(op as usize).copied()
    }

    pub fn name(self) -> &'static str {
        OPCODE_NAMES[self as usize]
    }

    pub fn get_mode(self) -> OpMode {
        use OpCode::*;
        match self {
            LoadK | GetGlobal | SetGlobal | Closure => OpMode::IABx,
            Jmp | ForLoop | ForPrep => OpMode::IAsBx,
            _ => OpMode::IABC,
        }
    }
}
