//! XVMB module container and instruction encoding.
//!
//! Layout: magic, u16 version, u16 reserved, u32 flags, then tagged sections
//! (`FUNC` once per function in table order, `TYPE` with JSON class
//! declarations, `ENTR` naming the entry function, `META` with JSON module
//! metadata). Section lengths and fixed-width header fields are little-endian.
//! Instruction operands use the packed integer format from [`super::packed`];
//! the absolute `GOTO` address is a fixed-width u32.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::{Context, Result, anyhow, bail, ensure};
use serde::{Deserialize, Serialize};

use crate::types::{BinaryAction, ClassDecl};

use super::bytecode::{
    ARITH_ACTIONS, ArgId, CallArgs, CallResult, CatchClause, Constant, Function, Op, Relation, Test, opcode,
};
use super::packed::{read_magnitude, read_packed, read_packed_i32, write_packed};

const MAGIC: [u8; 4] = *b"XVMB";
pub const CURRENT_VERSION: u16 = 1;

/// Properties of the encoded module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleFlags(u32);

impl ModuleFlags {
    pub const NONE: ModuleFlags = ModuleFlags(0);
    /// Every function passed the layout check when the module was written.
    pub const VERIFIED: ModuleFlags = ModuleFlags(1 << 0);
    /// At least one function carries line markers.
    pub const LINE_INFO: ModuleFlags = ModuleFlags(1 << 1);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> ModuleFlags {
        ModuleFlags(bits)
    }

    #[inline]
    pub const fn contains(self, other: ModuleFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: ModuleFlags) {
        self.0 |= other.0;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleMeta {
    /// Source path or identifier the module was built from.
    pub source: Option<String>,
    pub checksum: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ModuleMeta {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.checksum.is_none() && self.tags.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BytecodeModule {
    pub version: u16,
    pub flags: ModuleFlags,
    pub functions: Vec<Function>,
    pub classes: Vec<ClassDecl>,
    pub entry: Option<String>,
    pub meta: Option<ModuleMeta>,
}

impl BytecodeModule {
    pub fn new(functions: Vec<Function>) -> Self {
        Self {
            version: CURRENT_VERSION,
            flags: ModuleFlags::NONE,
            functions,
            classes: Vec::new(),
            entry: None,
            meta: None,
        }
    }
}

pub fn encode_module(module: &BytecodeModule) -> Result<Vec<u8>> {
    let mut flags = module.flags;
    flags.insert(ModuleFlags::VERIFIED);
    let has_lines = module.functions.iter().any(|f| {
        f.code()
            .iter()
            .any(|op| matches!(op, Op::Line1 | Op::Line2 | Op::Line3 | Op::LineN(_)))
    });
    if has_lines {
        flags.insert(ModuleFlags::LINE_INFO);
    }

    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    write_u16(&mut out, module.version);
    write_u16(&mut out, 0); // reserved
    write_u32(&mut out, flags.bits());

    for func in &module.functions {
        let payload = encode_function(func).with_context(|| format!("encoding function `{}`", func.name()))?;
        write_section(&mut out, *b"FUNC", &payload);
    }
    if !module.classes.is_empty() {
        write_section(&mut out, *b"TYPE", &serde_json::to_vec(&module.classes)?);
    }
    if let Some(entry) = &module.entry {
        let mut payload = Vec::new();
        write_str(&mut payload, entry);
        write_section(&mut out, *b"ENTR", &payload);
    }
    if let Some(meta) = module.meta.as_ref().filter(|m| !m.is_empty()) {
        write_section(&mut out, *b"META", &serde_json::to_vec(meta)?);
    }
    Ok(out)
}

/// Decodes a module. Every function goes through the layout pass, so an
/// inconsistent instruction stream is rejected here.
pub fn decode_module(bytes: &[u8]) -> Result<BytecodeModule> {
    ensure!(bytes.len() >= 12, "module too small");
    ensure!(bytes[..4] == MAGIC, "invalid XVMB magic");
    let mut cursor = 4;
    let version = read_u16(bytes, &mut cursor)?;
    let _reserved = read_u16(bytes, &mut cursor)?;
    let flags_bits = read_u32(bytes, &mut cursor)?;
    ensure!(
        version <= CURRENT_VERSION,
        "unsupported XVMB version {} (reader supports <= {})",
        version,
        CURRENT_VERSION
    );

    let mut functions = Vec::new();
    let mut classes: Option<Vec<ClassDecl>> = None;
    let mut entry: Option<String> = None;
    let mut meta: Option<ModuleMeta> = None;

    while cursor < bytes.len() {
        let tag = read_tag(bytes, &mut cursor)?;
        let len = read_u32(bytes, &mut cursor)? as usize;
        ensure!(cursor + len <= bytes.len(), "section overruns payload");
        let payload = &bytes[cursor..cursor + len];
        cursor += len;

        match &tag {
            b"FUNC" => {
                let func =
                    decode_function(payload).with_context(|| format!("decoding function #{}", functions.len()))?;
                functions.push(func);
            }
            b"TYPE" => {
                ensure!(classes.is_none(), "duplicate TYPE section");
                classes = Some(serde_json::from_slice(payload)?);
            }
            b"ENTR" => {
                ensure!(entry.is_none(), "duplicate ENTR section");
                let mut c = 0;
                entry = Some(read_string(payload, &mut c)?);
                ensure!(c == payload.len(), "unexpected trailing data in ENTR section");
            }
            b"META" => {
                ensure!(meta.is_none(), "duplicate META section");
                meta = Some(serde_json::from_slice(payload)?);
            }
            _ => {
                // Unknown sections are skipped for forward compatibility.
            }
        }
    }
    ensure!(cursor == bytes.len(), "extra data at end of module");
    ensure!(!functions.is_empty(), "missing FUNC section");

    Ok(BytecodeModule {
        version,
        flags: ModuleFlags::from_bits(flags_bits),
        functions,
        classes: classes.unwrap_or_default(),
        entry,
        meta,
    })
}

fn write_section(out: &mut Vec<u8>, tag: [u8; 4], payload: &[u8]) {
    out.extend_from_slice(&tag);
    write_u32(out, payload.len() as u32);
    out.extend_from_slice(payload);
}

fn encode_function(func: &Function) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_str(&mut out, func.name());
    write_packed(&mut out, func.params() as i64);

    write_packed(&mut out, func.consts().len() as i64);
    for constant in func.consts() {
        encode_constant(&mut out, constant);
    }

    write_packed(&mut out, func.code().len() as i64);
    for (pc, op) in func.code().iter().enumerate() {
        encode_op(&mut out, op).with_context(|| format!("encoding {op:?} at {pc}"))?;
    }
    Ok(out)
}

fn decode_function(bytes: &[u8]) -> Result<Function> {
    let mut cursor = 0usize;
    let name = read_string(bytes, &mut cursor)?;
    let params = read_magnitude(bytes, &mut cursor)?;

    let n_consts = read_magnitude(bytes, &mut cursor)?;
    let mut consts = Vec::with_capacity(n_consts.min(bytes.len()));
    for _ in 0..n_consts {
        consts.push(decode_constant(bytes, &mut cursor)?);
    }

    let n_ops = read_magnitude(bytes, &mut cursor)?;
    let mut code = Vec::with_capacity(n_ops.min(bytes.len()));
    for _ in 0..n_ops {
        let at = cursor;
        code.push(decode_op(bytes, &mut cursor).with_context(|| format!("decoding op at byte {at}"))?);
    }
    ensure!(cursor == bytes.len(), "unexpected trailing data in FUNC section");
    Function::new(name, params, consts, code)
}

fn encode_constant(out: &mut Vec<u8>, constant: &Constant) {
    match constant {
        Constant::Null => write_u8(out, 0),
        Constant::Bool(b) => {
            write_u8(out, 1);
            write_u8(out, *b as u8);
        }
        Constant::Int(i) => {
            write_u8(out, 2);
            write_packed(out, *i);
        }
        Constant::Str(s) => {
            write_u8(out, 3);
            write_str(out, s);
        }
        Constant::Function(id) => {
            write_u8(out, 4);
            write_packed(out, *id as i64);
        }
        Constant::Type(name) => {
            write_u8(out, 5);
            write_str(out, name);
        }
    }
}

fn decode_constant(bytes: &[u8], cursor: &mut usize) -> Result<Constant> {
    let tag = read_u8(bytes, cursor)?;
    Ok(match tag {
        0 => Constant::Null,
        1 => Constant::Bool(read_u8(bytes, cursor)? != 0),
        2 => Constant::Int(read_packed(bytes, cursor)?),
        3 => Constant::Str(Arc::from(read_string(bytes, cursor)?)),
        4 => Constant::Function(read_magnitude(bytes, cursor)? as u32),
        5 => Constant::Type(Arc::from(read_string(bytes, cursor)?)),
        _ => bail!("unknown constant tag {}", tag),
    })
}

fn write_arg(out: &mut Vec<u8>, id: ArgId) {
    write_packed(out, id as i64);
}

fn write_args(out: &mut Vec<u8>, ids: &[ArgId]) {
    write_packed(out, ids.len() as i64);
    for id in ids {
        write_arg(out, *id);
    }
}

fn read_arg(bytes: &[u8], cursor: &mut usize) -> Result<ArgId> {
    read_packed_i32(bytes, cursor)
}

fn read_args(bytes: &[u8], cursor: &mut usize) -> Result<Vec<ArgId>> {
    let n = read_magnitude(bytes, cursor)?;
    let mut ids = Vec::with_capacity(n.min(bytes.len()));
    for _ in 0..n {
        ids.push(read_arg(bytes, cursor)?);
    }
    Ok(ids)
}

/// Appends one instruction: opcode byte, then its operands.
pub fn encode_op(out: &mut Vec<u8>, op: &Op) -> Result<()> {
    write_u8(out, op.opcode()?);
    match op {
        Op::Nop
        | Op::Line1
        | Op::Line2
        | Op::Line3
        | Op::Enter
        | Op::Exit
        | Op::Catch
        | Op::Finally
        | Op::FinallyEnd
        | Op::Return0 => {}
        Op::LineN(n) | Op::GuardEnd(n) | Op::CatchEnd(n) | Op::GuardAll(n) | Op::Jmp(n) => write_arg(out, *n),
        Op::Guard(clauses) => {
            write_packed(out, clauses.len() as i64);
            for c in clauses {
                write_arg(out, c.type_const);
                write_arg(out, c.name_const);
                write_arg(out, c.offset);
            }
        }
        Op::Throw(a) | Op::Return1(a) | Op::ReturnT(a) | Op::Assert(a) | Op::IpInc(a) | Op::IpDec(a) => {
            write_arg(out, *a)
        }
        Op::Goto(addr) => write_u32(out, *addr),
        Op::Call { fun, args, result } => {
            write_arg(out, *fun);
            match args {
                CallArgs::None => {}
                CallArgs::One(a) | CallArgs::Tuple(a) => write_arg(out, *a),
                CallArgs::Many(v) => write_args(out, v),
            }
            match result {
                CallResult::Unused => {}
                CallResult::One(r) | CallResult::Tuple(r) => write_arg(out, *r),
                CallResult::Many(v) => write_args(out, v),
            }
        }
        Op::New0 { class, ret } => {
            write_arg(out, *class);
            write_arg(out, *ret);
        }
        Op::New1 { class, arg, ret } => {
            write_arg(out, *class);
            write_arg(out, *arg);
            write_arg(out, *ret);
        }
        Op::NewN { class, args, ret } => {
            write_arg(out, *class);
            write_args(out, args);
            write_arg(out, *ret);
        }
        Op::ReturnN(args) => write_args(out, args),
        Op::Var { ty } | Op::VarD { ty } => write_arg(out, *ty),
        Op::VarI { ty, init } => {
            write_arg(out, *ty);
            write_arg(out, *init);
        }
        Op::VarN { ty, name } | Op::VarDN { ty, name } => {
            write_arg(out, *ty);
            write_arg(out, *name);
        }
        Op::VarIN { ty, name, init } => {
            write_arg(out, *ty);
            write_arg(out, *name);
            write_arg(out, *init);
        }
        Op::VarT { ty, values } => {
            write_arg(out, *ty);
            write_args(out, values);
        }
        Op::VarTN { ty, name, values } => {
            write_arg(out, *ty);
            write_arg(out, *name);
            write_args(out, values);
        }
        Op::Mov { from, to } => {
            write_arg(out, *from);
            write_arg(out, *to);
        }
        Op::Cmp { a, b, ret } | Op::IsCmp { a, b, ret, .. } => {
            write_arg(out, *a);
            write_arg(out, *b);
            write_arg(out, *ret);
        }
        Op::IsTest { arg, ret, .. } | Op::IsNot { arg, ret } => {
            write_arg(out, *arg);
            write_arg(out, *ret);
        }
        Op::JmpTrue { arg, offset } | Op::JmpFalse { arg, offset } | Op::JmpTest { arg, offset, .. } => {
            write_arg(out, *arg);
            write_arg(out, *offset);
        }
        Op::JmpCmp { a, b, offset, .. } => {
            write_arg(out, *a);
            write_arg(out, *b);
            write_arg(out, *offset);
        }
        Op::GpBinary { target, arg, ret, .. } => {
            write_arg(out, *target);
            write_arg(out, *arg);
            write_arg(out, *ret);
        }
        Op::GpDivRem {
            target,
            arg,
            quotient,
            remainder,
        } => {
            write_arg(out, *target);
            write_arg(out, *arg);
            write_arg(out, *quotient);
            write_arg(out, *remainder);
        }
        Op::GpNeg { target, ret }
        | Op::GpCompl { target, ret }
        | Op::IpIncA { target, ret }
        | Op::IpDecA { target, ret }
        | Op::IpIncB { target, ret }
        | Op::IpDecB { target, ret } => {
            write_arg(out, *target);
            write_arg(out, *ret);
        }
        Op::PGet { prop, target, ret }
        | Op::PipIncA { prop, target, ret }
        | Op::PipDecA { prop, target, ret }
        | Op::PipIncB { prop, target, ret }
        | Op::PipDecB { prop, target, ret } => {
            write_arg(out, *prop);
            write_arg(out, *target);
            write_arg(out, *ret);
        }
        Op::PSet { prop, target, value } => {
            write_arg(out, *prop);
            write_arg(out, *target);
            write_arg(out, *value);
        }
        Op::IpBinary { target, arg, .. } => {
            write_arg(out, *target);
            write_arg(out, *arg);
        }
        Op::PipInc { prop, target } | Op::PipDec { prop, target } => {
            write_arg(out, *prop);
            write_arg(out, *target);
        }
        Op::PipBinary { prop, target, arg, .. } => {
            write_arg(out, *prop);
            write_arg(out, *target);
            write_arg(out, *arg);
        }
    }
    Ok(())
}

fn decode_call(shape: u8, bytes: &[u8], cursor: &mut usize) -> Result<Op> {
    let fun = read_arg(bytes, cursor)?;
    let args = match shape / 4 {
        0 => CallArgs::None,
        1 => CallArgs::One(read_arg(bytes, cursor)?),
        2 => CallArgs::Many(read_args(bytes, cursor)?),
        _ => CallArgs::Tuple(read_arg(bytes, cursor)?),
    };
    let result = match shape % 4 {
        0 => CallResult::Unused,
        1 => CallResult::One(read_arg(bytes, cursor)?),
        2 => CallResult::Many(read_args(bytes, cursor)?),
        _ => CallResult::Tuple(read_arg(bytes, cursor)?),
    };
    Ok(Op::Call { fun, args, result })
}

/// Reads one instruction starting at `cursor`.
pub fn decode_op(bytes: &[u8], cursor: &mut usize) -> Result<Op> {
    let code = read_u8(bytes, cursor)?;
    let a = |c: &mut usize| read_arg(bytes, c);
    let op = match code {
        opcode::NOP => Op::Nop,
        opcode::LINE_1 => Op::Line1,
        opcode::LINE_2 => Op::Line2,
        opcode::LINE_3 => Op::Line3,
        opcode::LINE_N => Op::LineN(a(cursor)?),
        opcode::ENTER => Op::Enter,
        opcode::EXIT => Op::Exit,
        opcode::GUARD => {
            let n = read_magnitude(bytes, cursor)?;
            let mut clauses = Vec::with_capacity(n.min(bytes.len()));
            for _ in 0..n {
                clauses.push(CatchClause {
                    type_const: a(cursor)?,
                    name_const: a(cursor)?,
                    offset: a(cursor)?,
                });
            }
            Op::Guard(clauses)
        }
        opcode::GUARD_END => Op::GuardEnd(a(cursor)?),
        opcode::CATCH => Op::Catch,
        opcode::CATCH_END => Op::CatchEnd(a(cursor)?),
        opcode::GUARD_ALL => Op::GuardAll(a(cursor)?),
        opcode::FINALLY => Op::Finally,
        opcode::FINALLY_END => Op::FinallyEnd,
        opcode::THROW => Op::Throw(a(cursor)?),
        opcode::GOTO => Op::Goto(read_u32(bytes, cursor)?),
        opcode::CALL_00..=opcode::CALL_TT => decode_call(code - opcode::CALL_00, bytes, cursor)?,
        opcode::NEW_0 => Op::New0 {
            class: a(cursor)?,
            ret: a(cursor)?,
        },
        opcode::NEW_1 => Op::New1 {
            class: a(cursor)?,
            arg: a(cursor)?,
            ret: a(cursor)?,
        },
        opcode::NEW_N => Op::NewN {
            class: a(cursor)?,
            args: read_args(bytes, cursor)?,
            ret: a(cursor)?,
        },
        opcode::RETURN_0 => Op::Return0,
        opcode::RETURN_1 => Op::Return1(a(cursor)?),
        opcode::RETURN_N => Op::ReturnN(read_args(bytes, cursor)?),
        opcode::RETURN_T => Op::ReturnT(a(cursor)?),
        opcode::VAR => Op::Var { ty: a(cursor)? },
        opcode::VAR_I => Op::VarI {
            ty: a(cursor)?,
            init: a(cursor)?,
        },
        opcode::VAR_N => Op::VarN {
            ty: a(cursor)?,
            name: a(cursor)?,
        },
        opcode::VAR_IN => Op::VarIN {
            ty: a(cursor)?,
            name: a(cursor)?,
            init: a(cursor)?,
        },
        opcode::VAR_D => Op::VarD { ty: a(cursor)? },
        opcode::VAR_DN => Op::VarDN {
            ty: a(cursor)?,
            name: a(cursor)?,
        },
        opcode::VAR_T => Op::VarT {
            ty: a(cursor)?,
            values: read_args(bytes, cursor)?,
        },
        opcode::VAR_TN => Op::VarTN {
            ty: a(cursor)?,
            name: a(cursor)?,
            values: read_args(bytes, cursor)?,
        },
        opcode::MOV => Op::Mov {
            from: a(cursor)?,
            to: a(cursor)?,
        },
        opcode::CMP => Op::Cmp {
            a: a(cursor)?,
            b: a(cursor)?,
            ret: a(cursor)?,
        },
        c if (opcode::IS_ZERO..opcode::IS_ZERO + 4).contains(&c) => Op::IsTest {
            test: Test::ALL[(c - opcode::IS_ZERO) as usize],
            arg: a(cursor)?,
            ret: a(cursor)?,
        },
        c if (opcode::IS_EQ..opcode::IS_EQ + 6).contains(&c) => Op::IsCmp {
            rel: Relation::ALL[(c - opcode::IS_EQ) as usize],
            a: a(cursor)?,
            b: a(cursor)?,
            ret: a(cursor)?,
        },
        opcode::IS_NOT => Op::IsNot {
            arg: a(cursor)?,
            ret: a(cursor)?,
        },
        opcode::JMP => Op::Jmp(a(cursor)?),
        opcode::JMP_TRUE => Op::JmpTrue {
            arg: a(cursor)?,
            offset: a(cursor)?,
        },
        opcode::JMP_FALSE => Op::JmpFalse {
            arg: a(cursor)?,
            offset: a(cursor)?,
        },
        c if (opcode::JMP_ZERO..opcode::JMP_ZERO + 4).contains(&c) => Op::JmpTest {
            test: Test::ALL[(c - opcode::JMP_ZERO) as usize],
            arg: a(cursor)?,
            offset: a(cursor)?,
        },
        c if (opcode::JMP_EQ..opcode::JMP_EQ + 6).contains(&c) => Op::JmpCmp {
            rel: Relation::ALL[(c - opcode::JMP_EQ) as usize],
            a: a(cursor)?,
            b: a(cursor)?,
            offset: a(cursor)?,
        },
        opcode::ASSERT => Op::Assert(a(cursor)?),
        c if (opcode::GP_ADD..opcode::GP_ADD + 11).contains(&c) => Op::GpBinary {
            action: ARITH_ACTIONS[(c - opcode::GP_ADD) as usize],
            target: a(cursor)?,
            arg: a(cursor)?,
            ret: a(cursor)?,
        },
        opcode::GP_DIVREM => Op::GpDivRem {
            target: a(cursor)?,
            arg: a(cursor)?,
            quotient: a(cursor)?,
            remainder: a(cursor)?,
        },
        opcode::GP_DOTDOT | opcode::GP_DOTDOTEX => Op::GpBinary {
            action: if code == opcode::GP_DOTDOT {
                BinaryAction::Range
            } else {
                BinaryAction::RangeExclusive
            },
            target: a(cursor)?,
            arg: a(cursor)?,
            ret: a(cursor)?,
        },
        opcode::GP_NEG => Op::GpNeg {
            target: a(cursor)?,
            ret: a(cursor)?,
        },
        opcode::GP_COMPL => Op::GpCompl {
            target: a(cursor)?,
            ret: a(cursor)?,
        },
        opcode::P_GET => Op::PGet {
            prop: a(cursor)?,
            target: a(cursor)?,
            ret: a(cursor)?,
        },
        opcode::P_SET => Op::PSet {
            prop: a(cursor)?,
            target: a(cursor)?,
            value: a(cursor)?,
        },
        opcode::IP_INC => Op::IpInc(a(cursor)?),
        opcode::IP_DEC => Op::IpDec(a(cursor)?),
        opcode::IP_INCA => Op::IpIncA {
            target: a(cursor)?,
            ret: a(cursor)?,
        },
        opcode::IP_DECA => Op::IpDecA {
            target: a(cursor)?,
            ret: a(cursor)?,
        },
        opcode::IP_INCB => Op::IpIncB {
            target: a(cursor)?,
            ret: a(cursor)?,
        },
        opcode::IP_DECB => Op::IpDecB {
            target: a(cursor)?,
            ret: a(cursor)?,
        },
        c if (opcode::IP_ADD..opcode::IP_ADD + 11).contains(&c) => Op::IpBinary {
            action: ARITH_ACTIONS[(c - opcode::IP_ADD) as usize],
            target: a(cursor)?,
            arg: a(cursor)?,
        },
        opcode::PIP_INC => Op::PipInc {
            prop: a(cursor)?,
            target: a(cursor)?,
        },
        opcode::PIP_DEC => Op::PipDec {
            prop: a(cursor)?,
            target: a(cursor)?,
        },
        opcode::PIP_INCA => Op::PipIncA {
            prop: a(cursor)?,
            target: a(cursor)?,
            ret: a(cursor)?,
        },
        opcode::PIP_DECA => Op::PipDecA {
            prop: a(cursor)?,
            target: a(cursor)?,
            ret: a(cursor)?,
        },
        opcode::PIP_INCB => Op::PipIncB {
            prop: a(cursor)?,
            target: a(cursor)?,
            ret: a(cursor)?,
        },
        opcode::PIP_DECB => Op::PipDecB {
            prop: a(cursor)?,
            target: a(cursor)?,
            ret: a(cursor)?,
        },
        c if (opcode::PIP_ADD..opcode::PIP_ADD + 11).contains(&c) => Op::PipBinary {
            action: ARITH_ACTIONS[(c - opcode::PIP_ADD) as usize],
            prop: a(cursor)?,
            target: a(cursor)?,
            arg: a(cursor)?,
        },
        _ => bail!("unknown opcode 0x{:02X}", code),
    };
    Ok(op)
}

fn write_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_str(out: &mut Vec<u8>, value: &str) {
    write_u32(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

pub(crate) fn read_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8> {
    if *cursor >= bytes.len() {
        bail!("unexpected end of input while reading u8");
    }
    let value = bytes[*cursor];
    *cursor += 1;
    Ok(value)
}

fn read_array<const N: usize>(bytes: &[u8], cursor: &mut usize, what: &str) -> Result<[u8; N]> {
    let end = cursor
        .checked_add(N)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| anyhow!("unexpected end of input while reading {what}"))?;
    let mut buf = [0u8; N];
    buf.copy_from_slice(&bytes[*cursor..end]);
    *cursor = end;
    Ok(buf)
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> Result<u16> {
    read_array::<2>(bytes, cursor, "u16").map(u16::from_le_bytes)
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    read_array::<4>(bytes, cursor, "u32").map(u32::from_le_bytes)
}

fn read_tag(bytes: &[u8], cursor: &mut usize) -> Result<[u8; 4]> {
    read_array::<4>(bytes, cursor, "section tag")
}

fn read_string(bytes: &[u8], cursor: &mut usize) -> Result<String> {
    let len = read_u32(bytes, cursor)? as usize;
    if *cursor + len > bytes.len() {
        bail!("unexpected end of input while reading string");
    }
    let slice = &bytes[*cursor..*cursor + len];
    *cursor += len;
    String::from_utf8(slice.to_vec()).context("invalid UTF-8 in string")
}
