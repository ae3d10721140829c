use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};

use crate::types::BinaryAction;
use crate::val::Value;
use crate::vm::layout::{self, ScopeLayout};

/// Operand id. Registers are `>= 0`; negative ids name pre-defined arguments
/// or constants (`CONSTANT_OFFSET - index`).
pub type ArgId = i32;

/// Result sink that discards the value.
pub const A_IGNORE: ArgId = -2;
/// The frame's target object.
pub const A_THIS: ArgId = -4;
pub const CONSTANT_OFFSET: ArgId = -17;

#[inline]
pub const fn const_arg(index: u32) -> ArgId {
    CONSTANT_OFFSET - index as ArgId
}

#[inline]
pub const fn const_index(arg: ArgId) -> Option<usize> {
    if arg <= CONSTANT_OFFSET {
        Some((CONSTANT_OFFSET - arg) as usize)
    } else {
        None
    }
}

/// Opcode bytes. Gaps are reserved.
pub mod opcode {
    pub const NOP: u8 = 0x00;
    pub const LINE_1: u8 = 0x01;
    pub const LINE_2: u8 = 0x02;
    pub const LINE_3: u8 = 0x03;
    pub const LINE_N: u8 = 0x04;
    pub const ENTER: u8 = 0x05;
    pub const EXIT: u8 = 0x06;
    pub const GUARD: u8 = 0x07;
    pub const GUARD_END: u8 = 0x08;
    pub const CATCH: u8 = 0x09;
    pub const CATCH_END: u8 = 0x0A;
    pub const GUARD_ALL: u8 = 0x0B;
    pub const FINALLY: u8 = 0x0C;
    pub const FINALLY_END: u8 = 0x0D;
    pub const THROW: u8 = 0x0E;
    pub const GOTO: u8 = 0x0F;
    pub const CALL_00: u8 = 0x10;
    pub const CALL_TT: u8 = 0x1F;
    pub const NEW_0: u8 = 0x38;
    pub const NEW_1: u8 = 0x39;
    pub const NEW_N: u8 = 0x3A;
    pub const RETURN_0: u8 = 0x4C;
    pub const RETURN_1: u8 = 0x4D;
    pub const RETURN_N: u8 = 0x4E;
    pub const RETURN_T: u8 = 0x4F;
    pub const VAR: u8 = 0x50;
    pub const VAR_I: u8 = 0x51;
    pub const VAR_N: u8 = 0x52;
    pub const VAR_IN: u8 = 0x53;
    pub const VAR_D: u8 = 0x54;
    pub const VAR_DN: u8 = 0x55;
    pub const VAR_T: u8 = 0x5A;
    pub const VAR_TN: u8 = 0x5B;
    pub const MOV: u8 = 0x60;
    pub const CMP: u8 = 0x68;
    pub const IS_ZERO: u8 = 0x69;
    pub const IS_EQ: u8 = 0x6D;
    pub const IS_NOT: u8 = 0x73;
    pub const JMP: u8 = 0x79;
    pub const JMP_TRUE: u8 = 0x7A;
    pub const JMP_FALSE: u8 = 0x7B;
    pub const JMP_ZERO: u8 = 0x7C;
    pub const JMP_EQ: u8 = 0x80;
    pub const ASSERT: u8 = 0x8F;
    pub const GP_ADD: u8 = 0x92;
    pub const GP_DIVREM: u8 = 0x9D;
    pub const GP_DOTDOT: u8 = 0x9E;
    pub const GP_DOTDOTEX: u8 = 0x9F;
    pub const GP_NEG: u8 = 0xA0;
    pub const GP_COMPL: u8 = 0xA1;
    pub const P_GET: u8 = 0xA4;
    pub const P_SET: u8 = 0xA5;
    pub const IP_INC: u8 = 0xA8;
    pub const IP_DEC: u8 = 0xA9;
    pub const IP_INCA: u8 = 0xAA;
    pub const IP_DECA: u8 = 0xAB;
    pub const IP_INCB: u8 = 0xAC;
    pub const IP_DECB: u8 = 0xAD;
    pub const IP_ADD: u8 = 0xAE;
    pub const PIP_INC: u8 = 0xB9;
    pub const PIP_DEC: u8 = 0xBA;
    pub const PIP_INCA: u8 = 0xBB;
    pub const PIP_DECA: u8 = 0xBC;
    pub const PIP_INCB: u8 = 0xBD;
    pub const PIP_DECB: u8 = 0xBE;
    pub const PIP_ADD: u8 = 0xBF;
}

/// Arithmetic actions in opcode order; `GP_*`, `IP_*` and `PIP_*` families
/// share this ordering from their base opcode.
pub const ARITH_ACTIONS: [BinaryAction; 11] = [
    BinaryAction::Add,
    BinaryAction::Sub,
    BinaryAction::Mul,
    BinaryAction::Div,
    BinaryAction::Mod,
    BinaryAction::Shl,
    BinaryAction::Shr,
    BinaryAction::UShr,
    BinaryAction::And,
    BinaryAction::Or,
    BinaryAction::Xor,
];

pub fn arith_index(action: BinaryAction) -> Option<u8> {
    ARITH_ACTIONS.iter().position(|a| *a == action).map(|i| i as u8)
}

/// Constant pool entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Constant {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
    /// Index into the program's function table.
    Function(u32),
    /// Class or exception type name.
    Type(Arc<str>),
}

impl Constant {
    pub fn to_value(&self) -> Value {
        match self {
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Str(s) | Constant::Type(s) => Value::Str(Arc::clone(s)),
            Constant::Function(id) => Value::Function(*id),
        }
    }

    /// Name carried by a `Str` or `Type` constant.
    pub fn as_name(&self) -> Option<&Arc<str>> {
        match self {
            Constant::Str(s) | Constant::Type(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Test {
    Zero,
    NZero,
    Null,
    NNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    Eq,
    NEq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Relation {
    pub const ALL: [Relation; 6] = [
        Relation::Eq,
        Relation::NEq,
        Relation::Lt,
        Relation::Lte,
        Relation::Gt,
        Relation::Gte,
    ];

    pub fn holds(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Relation::Eq => ord == Equal,
            Relation::NEq => ord != Equal,
            Relation::Lt => ord == Less,
            Relation::Lte => ord != Greater,
            Relation::Gt => ord == Greater,
            Relation::Gte => ord != Less,
        }
    }
}

impl Test {
    pub const ALL: [Test; 4] = [Test::Zero, Test::NZero, Test::Null, Test::NNull];
}

/// Argument shape of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallArgs {
    None,
    One(ArgId),
    Many(Vec<ArgId>),
    Tuple(ArgId),
}

/// Result shape of a call; selects the callee's return descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallResult {
    Unused,
    One(ArgId),
    Many(Vec<ArgId>),
    Tuple(ArgId),
}

impl CallArgs {
    fn shape(&self) -> u8 {
        match self {
            CallArgs::None => 0,
            CallArgs::One(_) => 1,
            CallArgs::Many(_) => 2,
            CallArgs::Tuple(_) => 3,
        }
    }
}

impl CallResult {
    fn shape(&self) -> u8 {
        match self {
            CallResult::Unused => 0,
            CallResult::One(_) => 1,
            CallResult::Many(_) => 2,
            CallResult::Tuple(_) => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchClause {
    /// Constant naming the caught exception type.
    pub type_const: ArgId,
    /// Constant naming the handler variable.
    pub name_const: ArgId,
    /// Handler address relative to the GUARD op; must land on a CATCH op.
    pub offset: i32,
}

/// One instruction. Relative offsets are added to the op's own address;
/// `Goto` carries an absolute address.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Nop,
    Line1,
    Line2,
    Line3,
    LineN(i32 /*delta*/),
    Enter,
    Exit,
    Guard(Vec<CatchClause>),
    GuardEnd(i32 /*ofs*/),
    Catch,
    CatchEnd(i32 /*ofs*/),
    GuardAll(i32 /*ofs to FINALLY*/),
    Finally,
    FinallyEnd,
    Throw(ArgId),
    Goto(u32 /*addr*/),
    Call {
        fun: ArgId,
        args: CallArgs,
        result: CallResult,
    },
    New0 {
        class: ArgId,
        ret: ArgId,
    },
    New1 {
        class: ArgId,
        arg: ArgId,
        ret: ArgId,
    },
    NewN {
        class: ArgId,
        args: Vec<ArgId>,
        ret: ArgId,
    },
    Return0,
    Return1(ArgId),
    ReturnN(Vec<ArgId>),
    ReturnT(ArgId),
    Var {
        ty: ArgId,
    },
    VarI {
        ty: ArgId,
        init: ArgId,
    },
    VarN {
        ty: ArgId,
        name: ArgId,
    },
    VarIN {
        ty: ArgId,
        name: ArgId,
        init: ArgId,
    },
    VarD {
        ty: ArgId,
    },
    VarDN {
        ty: ArgId,
        name: ArgId,
    },
    VarT {
        ty: ArgId,
        values: Vec<ArgId>,
    },
    VarTN {
        ty: ArgId,
        name: ArgId,
        values: Vec<ArgId>,
    },
    Mov {
        from: ArgId,
        to: ArgId,
    },
    Cmp {
        a: ArgId,
        b: ArgId,
        ret: ArgId,
    },
    IsTest {
        test: Test,
        arg: ArgId,
        ret: ArgId,
    },
    IsCmp {
        rel: Relation,
        a: ArgId,
        b: ArgId,
        ret: ArgId,
    },
    IsNot {
        arg: ArgId,
        ret: ArgId,
    },
    Jmp(i32 /*ofs*/),
    JmpTrue {
        arg: ArgId,
        offset: i32,
    },
    JmpFalse {
        arg: ArgId,
        offset: i32,
    },
    JmpTest {
        test: Test,
        arg: ArgId,
        offset: i32,
    },
    JmpCmp {
        rel: Relation,
        a: ArgId,
        b: ArgId,
        offset: i32,
    },
    Assert(ArgId),
    GpBinary {
        action: BinaryAction,
        target: ArgId,
        arg: ArgId,
        ret: ArgId,
    },
    GpDivRem {
        target: ArgId,
        arg: ArgId,
        quotient: ArgId,
        remainder: ArgId,
    },
    GpNeg {
        target: ArgId,
        ret: ArgId,
    },
    GpCompl {
        target: ArgId,
        ret: ArgId,
    },
    PGet {
        prop: ArgId,
        target: ArgId,
        ret: ArgId,
    },
    PSet {
        prop: ArgId,
        target: ArgId,
        value: ArgId,
    },
    IpInc(ArgId),
    IpDec(ArgId),
    IpIncA {
        target: ArgId,
        ret: ArgId,
    },
    IpDecA {
        target: ArgId,
        ret: ArgId,
    },
    IpIncB {
        target: ArgId,
        ret: ArgId,
    },
    IpDecB {
        target: ArgId,
        ret: ArgId,
    },
    IpBinary {
        action: BinaryAction,
        target: ArgId,
        arg: ArgId,
    },
    PipInc {
        prop: ArgId,
        target: ArgId,
    },
    PipDec {
        prop: ArgId,
        target: ArgId,
    },
    PipIncA {
        prop: ArgId,
        target: ArgId,
        ret: ArgId,
    },
    PipDecA {
        prop: ArgId,
        target: ArgId,
        ret: ArgId,
    },
    PipIncB {
        prop: ArgId,
        target: ArgId,
        ret: ArgId,
    },
    PipDecB {
        prop: ArgId,
        target: ArgId,
        ret: ArgId,
    },
    PipBinary {
        action: BinaryAction,
        prop: ArgId,
        target: ArgId,
        arg: ArgId,
    },
}

impl Op {
    /// Opcode byte. Fails only for in-place ops carrying a range action,
    /// which have no encoding.
    pub fn opcode(&self) -> Result<u8> {
        let arith = |action: BinaryAction, base: u8| {
            arith_index(action)
                .map(|i| base + i)
                .ok_or_else(|| anyhow!("in-place {} has no opcode", action.name()))
        };
        Ok(match self {
            Op::Nop => opcode::NOP,
            Op::Line1 => opcode::LINE_1,
            Op::Line2 => opcode::LINE_2,
            Op::Line3 => opcode::LINE_3,
            Op::LineN(_) => opcode::LINE_N,
            Op::Enter => opcode::ENTER,
            Op::Exit => opcode::EXIT,
            Op::Guard(_) => opcode::GUARD,
            Op::GuardEnd(_) => opcode::GUARD_END,
            Op::Catch => opcode::CATCH,
            Op::CatchEnd(_) => opcode::CATCH_END,
            Op::GuardAll(_) => opcode::GUARD_ALL,
            Op::Finally => opcode::FINALLY,
            Op::FinallyEnd => opcode::FINALLY_END,
            Op::Throw(_) => opcode::THROW,
            Op::Goto(_) => opcode::GOTO,
            Op::Call { args, result, .. } => opcode::CALL_00 + args.shape() * 4 + result.shape(),
            Op::New0 { .. } => opcode::NEW_0,
            Op::New1 { .. } => opcode::NEW_1,
            Op::NewN { .. } => opcode::NEW_N,
            Op::Return0 => opcode::RETURN_0,
            Op::Return1(_) => opcode::RETURN_1,
            Op::ReturnN(_) => opcode::RETURN_N,
            Op::ReturnT(_) => opcode::RETURN_T,
            Op::Var { .. } => opcode::VAR,
            Op::VarI { .. } => opcode::VAR_I,
            Op::VarN { .. } => opcode::VAR_N,
            Op::VarIN { .. } => opcode::VAR_IN,
            Op::VarD { .. } => opcode::VAR_D,
            Op::VarDN { .. } => opcode::VAR_DN,
            Op::VarT { .. } => opcode::VAR_T,
            Op::VarTN { .. } => opcode::VAR_TN,
            Op::Mov { .. } => opcode::MOV,
            Op::Cmp { .. } => opcode::CMP,
            Op::IsTest { test, .. } => opcode::IS_ZERO + *test as u8,
            Op::IsCmp { rel, .. } => opcode::IS_EQ + *rel as u8,
            Op::IsNot { .. } => opcode::IS_NOT,
            Op::Jmp(_) => opcode::JMP,
            Op::JmpTrue { .. } => opcode::JMP_TRUE,
            Op::JmpFalse { .. } => opcode::JMP_FALSE,
            Op::JmpTest { test, .. } => opcode::JMP_ZERO + *test as u8,
            Op::JmpCmp { rel, .. } => opcode::JMP_EQ + *rel as u8,
            Op::Assert(_) => opcode::ASSERT,
            Op::GpBinary { action, .. } => match action {
                BinaryAction::Range => opcode::GP_DOTDOT,
                BinaryAction::RangeExclusive => opcode::GP_DOTDOTEX,
                other => arith(*other, opcode::GP_ADD)?,
            },
            Op::GpDivRem { .. } => opcode::GP_DIVREM,
            Op::GpNeg { .. } => opcode::GP_NEG,
            Op::GpCompl { .. } => opcode::GP_COMPL,
            Op::PGet { .. } => opcode::P_GET,
            Op::PSet { .. } => opcode::P_SET,
            Op::IpInc(_) => opcode::IP_INC,
            Op::IpDec(_) => opcode::IP_DEC,
            Op::IpIncA { .. } => opcode::IP_INCA,
            Op::IpDecA { .. } => opcode::IP_DECA,
            Op::IpIncB { .. } => opcode::IP_INCB,
            Op::IpDecB { .. } => opcode::IP_DECB,
            Op::IpBinary { action, .. } => arith(*action, opcode::IP_ADD)?,
            Op::PipInc { .. } => opcode::PIP_INC,
            Op::PipDec { .. } => opcode::PIP_DEC,
            Op::PipIncA { .. } => opcode::PIP_INCA,
            Op::PipDecA { .. } => opcode::PIP_DECA,
            Op::PipIncB { .. } => opcode::PIP_INCB,
            Op::PipDecB { .. } => opcode::PIP_DECB,
            Op::PipBinary { action, .. } => arith(*action, opcode::PIP_ADD)?,
        })
    }

    /// Result operands in assignment order. A result naming the next free
    /// register introduces it, both in the layout pass and at run time.
    pub fn results(&self) -> Vec<ArgId> {
        match self {
            Op::Call { result, .. } => match result {
                CallResult::Unused => Vec::new(),
                CallResult::One(r) | CallResult::Tuple(r) => vec![*r],
                CallResult::Many(rs) => rs.clone(),
            },
            Op::GpDivRem {
                quotient, remainder, ..
            } => vec![*quotient, *remainder],
            Op::New0 { ret, .. }
            | Op::New1 { ret, .. }
            | Op::NewN { ret, .. }
            | Op::Cmp { ret, .. }
            | Op::IsTest { ret, .. }
            | Op::IsCmp { ret, .. }
            | Op::IsNot { ret, .. }
            | Op::GpBinary { ret, .. }
            | Op::GpNeg { ret, .. }
            | Op::GpCompl { ret, .. }
            | Op::PGet { ret, .. }
            | Op::IpIncA { ret, .. }
            | Op::IpDecA { ret, .. }
            | Op::IpIncB { ret, .. }
            | Op::IpDecB { ret, .. }
            | Op::PipIncA { ret, .. }
            | Op::PipDecA { ret, .. }
            | Op::PipIncB { ret, .. }
            | Op::PipDecB { ret, .. } => vec![*ret],
            Op::Mov { to, .. } => vec![*to],
            _ => Vec::new(),
        }
    }

    /// Absolute target of a jump-like op at `pc`, if it has one.
    pub fn jump_target(&self, pc: usize) -> Option<i64> {
        let rel = |ofs: i32| Some(pc as i64 + ofs as i64);
        match self {
            Op::Goto(addr) => Some(*addr as i64),
            Op::Jmp(ofs) | Op::GuardEnd(ofs) | Op::CatchEnd(ofs) => rel(*ofs),
            Op::JmpTrue { offset, .. }
            | Op::JmpFalse { offset, .. }
            | Op::JmpTest { offset, .. }
            | Op::JmpCmp { offset, .. } => rel(*offset),
            _ => None,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Nop => "NOP",
            Op::Line1 => "LINE_1",
            Op::Line2 => "LINE_2",
            Op::Line3 => "LINE_3",
            Op::LineN(_) => "LINE_N",
            Op::Enter => "ENTER",
            Op::Exit => "EXIT",
            Op::Guard(_) => "GUARD",
            Op::GuardEnd(_) => "GUARD_END",
            Op::Catch => "CATCH",
            Op::CatchEnd(_) => "CATCH_END",
            Op::GuardAll(_) => "GUARD_ALL",
            Op::Finally => "FINALLY",
            Op::FinallyEnd => "FINALLY_END",
            Op::Throw(_) => "THROW",
            Op::Goto(_) => "GOTO",
            Op::Call { .. } => "CALL",
            Op::New0 { .. } => "NEW_0",
            Op::New1 { .. } => "NEW_1",
            Op::NewN { .. } => "NEW_N",
            Op::Return0 => "RETURN_0",
            Op::Return1(_) => "RETURN_1",
            Op::ReturnN(_) => "RETURN_N",
            Op::ReturnT(_) => "RETURN_T",
            Op::Var { .. } => "VAR",
            Op::VarI { .. } => "VAR_I",
            Op::VarN { .. } => "VAR_N",
            Op::VarIN { .. } => "VAR_IN",
            Op::VarD { .. } => "VAR_D",
            Op::VarDN { .. } => "VAR_DN",
            Op::VarT { .. } => "VAR_T",
            Op::VarTN { .. } => "VAR_TN",
            Op::Mov { .. } => "MOV",
            Op::Cmp { .. } => "CMP",
            Op::IsTest { .. } => "IS",
            Op::IsCmp { .. } => "IS",
            Op::IsNot { .. } => "IS_NOT",
            Op::Jmp(_) => "JMP",
            Op::JmpTrue { .. } => "JMP_TRUE",
            Op::JmpFalse { .. } => "JMP_FALSE",
            Op::JmpTest { .. } => "JMP",
            Op::JmpCmp { .. } => "JMP",
            Op::Assert(_) => "ASSERT",
            Op::GpBinary { .. } => "GP",
            Op::GpDivRem { .. } => "GP_DIVREM",
            Op::GpNeg { .. } => "GP_NEG",
            Op::GpCompl { .. } => "GP_COMPL",
            Op::PGet { .. } => "P_GET",
            Op::PSet { .. } => "P_SET",
            Op::IpInc(_) => "IP_INC",
            Op::IpDec(_) => "IP_DEC",
            Op::IpIncA { .. } => "IP_INCA",
            Op::IpDecA { .. } => "IP_DECA",
            Op::IpIncB { .. } => "IP_INCB",
            Op::IpDecB { .. } => "IP_DECB",
            Op::IpBinary { .. } => "IP",
            Op::PipInc { .. } => "PIP_INC",
            Op::PipDec { .. } => "PIP_DEC",
            Op::PipIncA { .. } => "PIP_INCA",
            Op::PipDecA { .. } => "PIP_DECA",
            Op::PipIncB { .. } => "PIP_INCB",
            Op::PipDecB { .. } => "PIP_DECB",
            Op::PipBinary { .. } => "PIP",
        }
    }
}

/// Display adapter for operand ids: `r3`, `k0`, `this`, `_`.
pub struct Arg(pub ArgId);

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            id if id >= 0 => write!(f, "r{id}"),
            A_IGNORE => f.write_str("_"),
            A_THIS => f.write_str("this"),
            id => match const_index(id) {
                Some(k) => write!(f, "k{k}"),
                None => write!(f, "a{id}"),
            },
        }
    }
}

struct Args<'a>(&'a [ArgId]);

impl fmt::Display for Args<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", Arg(*id))?;
        }
        f.write_str("]")
    }
}

fn fmt_call_args(args: &CallArgs) -> String {
    match args {
        CallArgs::None => "()".to_string(),
        CallArgs::One(a) => format!("({})", Arg(*a)),
        CallArgs::Many(v) => format!("{}", Args(v)),
        CallArgs::Tuple(t) => format!("({}...)", Arg(*t)),
    }
}

fn fmt_call_result(result: &CallResult) -> String {
    match result {
        CallResult::Unused => "_".to_string(),
        CallResult::One(r) => format!("{}", Arg(*r)),
        CallResult::Many(v) => format!("{}", Args(v)),
        CallResult::Tuple(r) => format!("({})", Arg(*r)),
    }
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.mnemonic();
        match self {
            Op::Nop
            | Op::Line1
            | Op::Line2
            | Op::Line3
            | Op::Enter
            | Op::Exit
            | Op::Catch
            | Op::Finally
            | Op::FinallyEnd
            | Op::Return0 => f.write_str(m),
            Op::LineN(d) => write!(f, "{m} {d:+}"),
            Op::Guard(clauses) => {
                write!(f, "{m}")?;
                for c in clauses {
                    write!(f, " [{} {} -> {:+}]", Arg(c.type_const), Arg(c.name_const), c.offset)?;
                }
                Ok(())
            }
            Op::GuardEnd(ofs) | Op::CatchEnd(ofs) | Op::GuardAll(ofs) | Op::Jmp(ofs) => write!(f, "{m} {ofs:+}"),
            Op::Throw(a) | Op::Return1(a) | Op::ReturnT(a) | Op::Assert(a) | Op::IpInc(a) | Op::IpDec(a) => {
                write!(f, "{m} {}", Arg(*a))
            }
            Op::Goto(addr) => write!(f, "{m} {addr}"),
            Op::Call { fun, args, result } => {
                write!(f, "{m} {}{} -> {}", Arg(*fun), fmt_call_args(args), fmt_call_result(result))
            }
            Op::New0 { class, ret } => write!(f, "{m} {}() -> {}", Arg(*class), Arg(*ret)),
            Op::New1 { class, arg, ret } => write!(f, "{m} {}({}) -> {}", Arg(*class), Arg(*arg), Arg(*ret)),
            Op::NewN { class, args, ret } => write!(f, "{m} {}{} -> {}", Arg(*class), Args(args), Arg(*ret)),
            Op::ReturnN(args) => write!(f, "{m} {}", Args(args)),
            Op::Var { ty } | Op::VarD { ty } => write!(f, "{m} {}", Arg(*ty)),
            Op::VarI { ty, init } => write!(f, "{m} {} = {}", Arg(*ty), Arg(*init)),
            Op::VarN { ty, name } | Op::VarDN { ty, name } => write!(f, "{m} {} {}", Arg(*ty), Arg(*name)),
            Op::VarIN { ty, name, init } => write!(f, "{m} {} {} = {}", Arg(*ty), Arg(*name), Arg(*init)),
            Op::VarT { ty, values } => write!(f, "{m} {} = {}", Arg(*ty), Args(values)),
            Op::VarTN { ty, name, values } => write!(f, "{m} {} {} = {}", Arg(*ty), Arg(*name), Args(values)),
            Op::Mov { from, to } => write!(f, "{m} {} -> {}", Arg(*from), Arg(*to)),
            Op::Cmp { a, b, ret } => write!(f, "{m} {}, {} -> {}", Arg(*a), Arg(*b), Arg(*ret)),
            Op::IsTest { test, arg, ret } => write!(f, "{m}_{test:?} {} -> {}", Arg(*arg), Arg(*ret)),
            Op::IsCmp { rel, a, b, ret } => write!(f, "{m}_{rel:?} {}, {} -> {}", Arg(*a), Arg(*b), Arg(*ret)),
            Op::IsNot { arg, ret } => write!(f, "{m} {} -> {}", Arg(*arg), Arg(*ret)),
            Op::JmpTrue { arg, offset } | Op::JmpFalse { arg, offset } => write!(f, "{m} {}, {offset:+}", Arg(*arg)),
            Op::JmpTest { test, arg, offset } => write!(f, "{m}_{test:?} {}, {offset:+}", Arg(*arg)),
            Op::JmpCmp { rel, a, b, offset } => write!(f, "{m}_{rel:?} {}, {}, {offset:+}", Arg(*a), Arg(*b)),
            Op::GpBinary {
                action,
                target,
                arg,
                ret,
            } => write!(f, "{m}_{} {}, {} -> {}", action.name(), Arg(*target), Arg(*arg), Arg(*ret)),
            Op::GpDivRem {
                target,
                arg,
                quotient,
                remainder,
            } => write!(
                f,
                "{m} {}, {} -> {}, {}",
                Arg(*target),
                Arg(*arg),
                Arg(*quotient),
                Arg(*remainder)
            ),
            Op::GpNeg { target, ret }
            | Op::GpCompl { target, ret }
            | Op::IpIncA { target, ret }
            | Op::IpDecA { target, ret }
            | Op::IpIncB { target, ret }
            | Op::IpDecB { target, ret } => write!(f, "{m} {} -> {}", Arg(*target), Arg(*ret)),
            Op::PGet { prop, target, ret } => write!(f, "{m} {}.{} -> {}", Arg(*target), Arg(*prop), Arg(*ret)),
            Op::PSet { prop, target, value } => write!(f, "{m} {}.{} = {}", Arg(*target), Arg(*prop), Arg(*value)),
            Op::IpBinary { action, target, arg } => {
                write!(f, "{m}_{} {}, {}", action.name(), Arg(*target), Arg(*arg))
            }
            Op::PipInc { prop, target } | Op::PipDec { prop, target } => {
                write!(f, "{m} {}.{}", Arg(*target), Arg(*prop))
            }
            Op::PipIncA { prop, target, ret }
            | Op::PipDecA { prop, target, ret }
            | Op::PipIncB { prop, target, ret }
            | Op::PipDecB { prop, target, ret } => write!(f, "{m} {}.{} -> {}", Arg(*target), Arg(*prop), Arg(*ret)),
            Op::PipBinary {
                action,
                prop,
                target,
                arg,
            } => write!(f, "{m}_{} {}.{}, {}", action.name(), Arg(*target), Arg(*prop), Arg(*arg)),
        }
    }
}

/// A loaded function: code, constants and the verified scope layout.
#[derive(Debug, Clone)]
pub struct Function {
    name: Arc<str>,
    params: usize,
    consts: Vec<Constant>,
    code: Vec<Op>,
    layout: ScopeLayout,
}

impl Function {
    /// Builds a function and runs the layout pass over its code; any
    /// inconsistency is reported here rather than at run time.
    pub fn new(name: impl Into<Arc<str>>, params: usize, consts: Vec<Constant>, code: Vec<Op>) -> Result<Self> {
        let name = name.into();
        let layout = layout::simulate(&code, params)
            .map_err(|e| e.context(format!("layout check failed for `{name}`")))?;
        Ok(Self {
            name,
            params,
            consts,
            code,
            layout,
        })
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn params(&self) -> usize {
        self.params
    }

    pub fn consts(&self) -> &[Constant] {
        &self.consts
    }

    pub fn code(&self) -> &[Op] {
        &self.code
    }

    pub fn layout(&self) -> &ScopeLayout {
        &self.layout
    }

    pub fn constant(&self, index: usize) -> Option<&Constant> {
        self.consts.get(index)
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.params == other.params && self.consts == other.consts && self.code == other.code
    }
}
