//! A backend that records the emitted operations instead of producing machine code.
//!
//! The recording can be inspected, printed, and executed by a small evaluator,
//! which makes it both a test double for the compiler and a portable fallback
//! for hosts without a native backend.

use std::fmt;
use crate::BrainfuckError;
use crate::backend::{Backend, Buffer, Condition, HostCall, Label, Memory, Operand, Register, Routine};
use crate::host::{HostIo, InputTarget, OutputTarget};

/// Value every buffer byte holds before the program writes to it.
/// It is deliberately non-zero, so that programs relying on fresh memory being zeroed fail.
const GARBAGE: u8 = 0xCC;

/// A single recorded primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    AllocBuffer { buffer: Buffer, size: usize },
    NewRegister(Register),
    Mov(Operand, i64),
    Add(Operand, i64),
    Sub(Operand, i64),
    Load(Register, Memory),
    Store(Memory, Register),
    NewLabel(Label),
    Bind(Label),
    Jump(Label),
    JumpIf { cond: Condition, lhs: Operand, rhs: i64, target: Label },
    Invoke { call: HostCall, args: Vec<Register>, ret: Option<Register> }
}

struct OperandDisplay<'a>(&'a Operand);

impl<'a> fmt::Display for OperandDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Operand::Register(r) => write!(f, "r{}", r.0),
            Operand::Memory(m) => write!(f, "byte [b{} + r{}]", m.buffer.0, m.index.0)
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Op::*;
        match self {
            AllocBuffer { buffer, size } => write!(f, "    b{} = alloc {}", buffer.0, size),
            NewRegister(r) => write!(f, "    r{} = reg", r.0),
            Mov(dst, imm) => write!(f, "    mov {}, {}", OperandDisplay(dst), imm),
            Add(dst, imm) => write!(f, "    add {}, {}", OperandDisplay(dst), imm),
            Sub(dst, imm) => write!(f, "    sub {}, {}", OperandDisplay(dst), imm),
            Load(dst, src) => write!(f, "    load r{}, {}", dst.0, OperandDisplay(&Operand::Memory(*src))),
            Store(dst, src) => write!(f, "    store {}, r{}", OperandDisplay(&Operand::Memory(*dst)), src.0),
            NewLabel(_) => Ok(()),
            Bind(l) => write!(f, "L{}:", l.0),
            Jump(l) => write!(f, "    jmp L{}", l.0),
            JumpIf { cond, lhs, rhs, target } => {
                let mnemonic = match cond {
                    Condition::Equal => "je",
                    Condition::NotEqual => "jne",
                    Condition::Below => "jb"
                };
                write!(f, "    cmp {}, {}\n    {} L{}", OperandDisplay(lhs), rhs, mnemonic, target.0)
            },
            Invoke { call, args, ret } => {
                write!(f, "    ")?;
                if let Some(r) = ret {
                    write!(f, "r{} = ", r.0)?;
                }
                let args: Vec<String> = args.iter().map(|a| format!("r{}", a.0)).collect();
                write!(f, "call {}({})", call, args.join(", "))
            }
        }
    }
}

/// Backend recording every primitive it is asked to emit.
pub struct RecordingBackend {
    ops: Vec<Op>,
    buffers: Vec<usize>,
    registers: usize,
    labels: usize,
    io: HostIo
}

impl Default for RecordingBackend {
    fn default() -> Self {
        RecordingBackend::new()
    }
}

impl RecordingBackend {

    /// Creates a recording backend whose routine uses the process standard streams.
    pub fn new() -> RecordingBackend {
        RecordingBackend::with_io(InputTarget::Stdin, OutputTarget::Stdout)
    }

    pub fn with_io(input: InputTarget, output: OutputTarget) -> RecordingBackend {
        RecordingBackend {
            ops: Vec::new(),
            buffers: Vec::new(),
            registers: 0,
            labels: 0,
            io: HostIo::new(input, output)
        }
    }

    /// Operations recorded so far, in emission order.
    pub fn ops(&self) -> &[Op] {
        &*self.ops
    }

    fn check_operand(&self, op: &Operand) -> Result<(), String> {
        match op {
            Operand::Register(r) => self.check_register(*r),
            Operand::Memory(m) => self.check_memory(m)
        }
    }

    fn check_register(&self, r: Register) -> Result<(), String> {
        if r.0 < self.registers {
            Ok(())
        } else {
            Err(format!("unknown register r{}", r.0))
        }
    }

    fn check_memory(&self, m: &Memory) -> Result<(), String> {
        if m.buffer.0 >= self.buffers.len() {
            return Err(format!("unknown buffer b{}", m.buffer.0));
        }
        self.check_register(m.index)
    }

    /// Checks the recording is well formed and resolves each label to the index of its `Bind`.
    fn resolve_labels(&self) -> Result<Vec<usize>, String> {
        let mut targets: Vec<Option<usize>> = vec![None; self.labels];
        let mut referenced = Vec::new();

        for (pc, op) in self.ops.iter().enumerate() {
            match op {
                Op::Bind(l) => {
                    let slot = targets.get_mut(l.0).ok_or_else(|| format!("unknown label L{}", l.0))?;
                    if slot.is_some() {
                        return Err(format!("label L{} bound twice", l.0));
                    }
                    *slot = Some(pc);
                },
                Op::Jump(l) => referenced.push(*l),
                Op::JumpIf { lhs, target, .. } => {
                    self.check_operand(lhs)?;
                    referenced.push(*target);
                },
                Op::Mov(dst, _) | Op::Add(dst, _) | Op::Sub(dst, _) => self.check_operand(dst)?,
                Op::Load(r, m) | Op::Store(m, r) => {
                    self.check_register(*r)?;
                    self.check_memory(m)?;
                },
                Op::Invoke { call, args, ret } => {
                    let signature = call.signature();
                    if args.len() != signature.params.len() || (ret.is_some() && signature.ret.is_none()) {
                        return Err(format!("call to {} does not match its signature", call));
                    }
                    for r in args.iter().chain(ret.iter()) {
                        self.check_register(*r)?;
                    }
                },
                _ => {}
            }
        }

        for l in referenced {
            match targets.get(l.0) {
                Some(Some(_)) => {},
                _ => return Err(format!("jump to unbound label L{}", l.0))
            }
        }

        // Labels which are never jumped to may stay unbound
        Ok(targets.into_iter().map(|t| t.unwrap_or(0)).collect())
    }

}

impl Backend for RecordingBackend {
    type Routine = RecordedRoutine;

    fn alloc_buffer(&mut self, size: usize) -> Buffer {
        let buffer = Buffer(self.buffers.len());
        self.buffers.push(size);
        self.ops.push(Op::AllocBuffer { buffer, size });
        buffer
    }

    fn new_register(&mut self) -> Register {
        let r = Register(self.registers);
        self.registers += 1;
        self.ops.push(Op::NewRegister(r));
        r
    }

    fn mov(&mut self, dst: Operand, imm: i64) {
        self.ops.push(Op::Mov(dst, imm));
    }

    fn add(&mut self, dst: Operand, imm: i64) {
        self.ops.push(Op::Add(dst, imm));
    }

    fn sub(&mut self, dst: Operand, imm: i64) {
        self.ops.push(Op::Sub(dst, imm));
    }

    fn load(&mut self, dst: Register, src: Memory) {
        self.ops.push(Op::Load(dst, src));
    }

    fn store(&mut self, dst: Memory, src: Register) {
        self.ops.push(Op::Store(dst, src));
    }

    fn new_label(&mut self) -> Label {
        let l = Label(self.labels);
        self.labels += 1;
        self.ops.push(Op::NewLabel(l));
        l
    }

    fn bind(&mut self, label: Label) {
        self.ops.push(Op::Bind(label));
    }

    fn jump(&mut self, target: Label) {
        self.ops.push(Op::Jump(target));
    }

    fn jump_if(&mut self, cond: Condition, lhs: Operand, rhs: i64, target: Label) {
        self.ops.push(Op::JumpIf { cond, lhs, rhs, target });
    }

    fn invoke(&mut self, call: HostCall, args: &[Register], ret: Option<Register>) {
        self.ops.push(Op::Invoke { call, args: args.to_vec(), ret });
    }

    fn finalize(self) -> Result<RecordedRoutine, BrainfuckError> {
        let targets = self.resolve_labels().map_err(BrainfuckError::BackendFinalize)?;
        debug!("Recorded {} operations.", self.ops.len());
        Ok(RecordedRoutine {
            ops: self.ops,
            targets,
            buffers: self.buffers,
            registers: self.registers,
            io: self.io
        })
    }

}

impl fmt::Display for RecordingBackend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for op in &self.ops {
            if let Op::NewLabel(_) = op {
                continue;
            }
            writeln!(f, "{}", op)?;
        }
        Ok(())
    }
}

/// A validated recording, ready to be evaluated.
pub struct RecordedRoutine {
    ops: Vec<Op>,
    targets: Vec<usize>,
    buffers: Vec<usize>,
    registers: usize,
    io: HostIo
}

/// Machine state of the evaluator.
struct Machine {
    registers: Vec<u64>,
    buffers: Vec<Vec<u8>>
}

impl Machine {

    fn cell(&mut self, m: &Memory) -> Option<&mut u8> {
        let index = self.registers[m.index.0];
        self.buffers[m.buffer.0].get_mut(index as usize)
    }

    fn update(&mut self, dst: &Operand, f: impl FnOnce(u64) -> u64) -> Result<(), String> {
        match dst {
            Operand::Register(r) => {
                let r = &mut self.registers[r.0];
                *r = f(*r);
            },
            Operand::Memory(m) => {
                let cell = self.cell(m).ok_or_else(|| out_of_bounds(m))?;
                *cell = f(u64::from(*cell)) as u8;
            }
        }
        Ok(())
    }

    fn compare(&mut self, cond: Condition, lhs: &Operand, rhs: i64) -> Result<bool, String> {
        let (lhs, rhs) = match lhs {
            Operand::Register(r) => (self.registers[r.0], rhs as u64),
            Operand::Memory(m) => {
                let cell = self.cell(m).ok_or_else(|| out_of_bounds(m))?;
                (u64::from(*cell), u64::from(rhs as u8))
            }
        };
        Ok(match cond {
            Condition::Equal => lhs == rhs,
            Condition::NotEqual => lhs != rhs,
            Condition::Below => lhs < rhs
        })
    }

}

fn out_of_bounds(m: &Memory) -> String {
    format!("access outside of buffer b{}", m.buffer.0)
}

impl RecordedRoutine {

    fn evaluate(&mut self) -> Result<(), String> {
        let mut machine = Machine {
            registers: vec![0; self.registers],
            buffers: self.buffers.iter().map(|size| vec![GARBAGE; *size]).collect()
        };

        let mut pc = 0;
        while let Some(op) = self.ops.get(pc) {
            pc += 1;
            match op {
                Op::Mov(dst, imm) => machine.update(dst, |_| *imm as u64)?,
                Op::Add(dst, imm) => machine.update(dst, |v| v.wrapping_add(*imm as u64))?,
                Op::Sub(dst, imm) => machine.update(dst, |v| v.wrapping_sub(*imm as u64))?,
                Op::Load(dst, src) => {
                    let value = *machine.cell(src).ok_or_else(|| out_of_bounds(src))?;
                    machine.registers[dst.0] = u64::from(value);
                },
                Op::Store(dst, src) => {
                    let value = machine.registers[src.0] as u8;
                    *machine.cell(dst).ok_or_else(|| out_of_bounds(dst))? = value;
                },
                Op::Jump(target) => pc = self.targets[target.0],
                Op::JumpIf { cond, lhs, rhs, target } => {
                    if machine.compare(*cond, lhs, *rhs)? {
                        pc = self.targets[target.0];
                    }
                },
                Op::Invoke { call: HostCall::ReadByte, ret, .. } => {
                    let value = self.io.read_byte();
                    if let Some(r) = ret {
                        machine.registers[r.0] = i64::from(value) as u64;
                    }
                },
                Op::Invoke { call: HostCall::WriteByte, args, .. } => {
                    let value = machine.registers[args[0].0] as i32;
                    self.io.write_byte(value);
                },
                Op::AllocBuffer { .. } | Op::NewRegister(_) | Op::NewLabel(_) | Op::Bind(_) => {}
            }
        }

        Ok(())
    }

}

impl Routine for RecordedRoutine {

    fn call(mut self) {
        if let Err(e) = self.evaluate() {
            error!("Evaluation aborted: {}", e);
        }
        self.io.flush();
    }

}
