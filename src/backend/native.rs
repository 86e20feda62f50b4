//! x86-64 backend, encoding machine code directly and running it from an executable mapping.
//!
//! Generated routines follow the System V calling convention. Registers are
//! handed out from the callee-saved set, so their values survive host calls, and
//! buffers live in the stack frame of the routine:
//!
//! ```text
//!     push rbp
//!     mov rbp, rsp
//!     push rbx, r12, r13, r14, r15
//!     sub rsp, frame             ; buffers are at [rsp + offset]
//!     <body>
//!     add rsp, frame
//!     pop r15, r14, r13, r12, rbx, rbp
//!     ret
//! ```

use std::mem;
use memmap2::{Mmap, MmapMut};
use crate::BrainfuckError;
use crate::backend::{Backend, Buffer, Condition, HostCall, Label, Memory, Operand, Register, Routine};
use crate::host::{self, HostIo, InputTarget, OutputTarget};

// Register numbers, as encoded in the ModRM and SIB bytes (plus the REX extension bit)
const RAX: u8 = 0;
const RCX: u8 = 1;
const RDX: u8 = 2;
const RBX: u8 = 3;
const RSP: u8 = 4;
const RSI: u8 = 6;
const R8: u8 = 8;
const R9: u8 = 9;
const R12: u8 = 12;
const R13: u8 = 13;
const R14: u8 = 14;
const R15: u8 = 15;

/// Registers returned by `new_register`, in order.
const ALLOCATABLE: [u8; 5] = [RBX, R12, R13, R14, R15];

/// Registers for the explicit arguments of host calls. `rdi` always carries the I/O context.
const ARGUMENTS: [u8; 5] = [RSI, RDX, RCX, R8, R9];

/// Largest total size of the buffers of a routine. Buffers live in the stack frame,
/// which is kept within 1 MiB once aligned.
pub const MAX_BUFFER_SIZE: usize = (1 << 20) - 16;

const PROLOGUE: [u8; 13] = [
    0x55,             // push rbp
    0x48, 0x89, 0xe5, // mov rbp, rsp
    0x53,             // push rbx
    0x41, 0x54,       // push r12
    0x41, 0x55,       // push r13
    0x41, 0x56,       // push r14
    0x41, 0x57        // push r15
];

const EPILOGUE: [u8; 10] = [
    0x41, 0x5f, // pop r15
    0x41, 0x5e, // pop r14
    0x41, 0x5d, // pop r13
    0x41, 0x5c, // pop r12
    0x5b,       // pop rbx
    0x5d        // pop rbp
];

/// Native backend for x86-64.
pub struct NativeBackend {
    code: Vec<u8>,
    buffers: Vec<usize>,
    frame_size: usize,
    registers: usize,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
    error: Option<String>,
    io: Box<HostIo>
}

impl Default for NativeBackend {
    fn default() -> Self {
        NativeBackend::new()
    }
}

impl NativeBackend {

    /// Creates a backend whose routine uses the process standard streams.
    pub fn new() -> NativeBackend {
        NativeBackend::with_io(InputTarget::Stdin, OutputTarget::Stdout)
    }

    pub fn with_io(input: InputTarget, output: OutputTarget) -> NativeBackend {
        NativeBackend {
            code: Vec::new(),
            buffers: Vec::new(),
            frame_size: 0,
            registers: 0,
            labels: Vec::new(),
            fixups: Vec::new(),
            error: None,
            io: Box::new(HostIo::new(input, output))
        }
    }

    /// Body of the routine emitted so far. Jump displacements are still unpatched.
    pub fn code(&self) -> &[u8] {
        &*self.code
    }

    // Only the first problem is reported
    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }

    fn physical(&mut self, r: Register) -> u8 {
        match ALLOCATABLE.get(r.0) {
            Some(p) if r.0 < self.registers => *p,
            _ => {
                self.fail(format!("unknown register r{}", r.0));
                RAX
            }
        }
    }

    fn displacement(&mut self, b: Buffer) -> i32 {
        match self.buffers.get(b.0) {
            Some(offset) => *offset as i32,
            None => {
                self.fail(format!("unknown buffer b{}", b.0));
                0
            }
        }
    }

    fn emit_rex(&mut self, wide: bool, reg: u8, index: u8, rm: u8) {
        self.code.push(0x40 | (wide as u8) << 3 | (reg >> 3) << 2 | (index >> 3) << 1 | rm >> 3);
    }

    fn emit_imm32(&mut self, imm: i64) {
        if imm < i64::from(i32::min_value()) || imm > i64::from(i32::max_value()) {
            self.fail(format!("immediate {} does not fit 32 bits", imm));
        }
        self.code.extend_from_slice(&(imm as i32).to_le_bytes());
    }

    /// `opcode reg, r/m` with a register operand in the r/m field.
    fn emit_direct(&mut self, wide: bool, opcode: &[u8], reg: u8, rm: u8) {
        self.emit_rex(wide, reg, 0, rm);
        self.code.extend_from_slice(opcode);
        self.code.push(0b11 << 6 | (reg & 7) << 3 | (rm & 7));
    }

    /// `opcode reg, [rsp + index + disp32]`.
    fn emit_memory(&mut self, wide: bool, opcode: &[u8], reg: u8, m: Memory) {
        let index = self.physical(m.index);
        let disp = self.displacement(m.buffer);
        self.emit_rex(wide, reg, index, RSP);
        self.code.extend_from_slice(opcode);
        self.code.push(0b10 << 6 | (reg & 7) << 3 | 0b100);
        self.code.push((index & 7) << 3 | RSP);
        self.code.extend_from_slice(&disp.to_le_bytes());
    }

    /// Group 1 instruction (`add`, `sub`, `cmp`, ...) with an immediate.
    /// Registers take a 32 bit sign-extended immediate, memory a byte.
    fn emit_group1(&mut self, ext: u8, dst: Operand, imm: i64) {
        match dst {
            Operand::Register(r) => {
                let r = self.physical(r);
                self.emit_direct(true, &[0x81], ext, r);
                self.emit_imm32(imm);
            },
            Operand::Memory(m) => {
                self.emit_memory(false, &[0x80], ext, m);
                self.code.push(imm as u8);
            }
        }
    }

    fn emit_mov_imm64(&mut self, reg: u8, imm: u64) {
        self.emit_rex(true, 0, 0, reg);
        self.code.push(0xb8 + (reg & 7));
        self.code.extend_from_slice(&imm.to_le_bytes());
    }

    fn emit_rel32(&mut self, target: Label) {
        if target.0 >= self.labels.len() {
            self.fail(format!("unknown label L{}", target.0));
        }
        self.fixups.push((self.code.len(), target));
        self.code.extend_from_slice(&[0; 4]);
    }

    fn aligned_frame_size(&self) -> usize {
        // Pushes leave the stack misaligned by 8 bytes, the frame restores 16 bytes alignment
        ((self.frame_size + 15) & !15) + 8
    }

    /// Patches jump displacements and wraps the body in prologue and epilogue.
    fn assemble(mut self) -> Result<(Vec<u8>, Box<HostIo>), String> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        if self.frame_size > MAX_BUFFER_SIZE {
            return Err(format!("buffers of {} bytes do not fit the stack frame (at most {})", self.frame_size, MAX_BUFFER_SIZE));
        }
        let frame = self.aligned_frame_size();

        for (at, label) in &self.fixups {
            let target = match self.labels.get(label.0) {
                Some(Some(target)) => *target,
                _ => return Err(format!("jump to unbound label L{}", label.0))
            };
            let rel = target as i64 - (*at as i64 + 4);
            self.code[*at..*at + 4].copy_from_slice(&(rel as i32).to_le_bytes());
        }

        let mut code = Vec::with_capacity(self.code.len() + 64);
        code.extend_from_slice(&PROLOGUE);
        code.extend_from_slice(&[0x48, 0x81, 0xec]); // sub rsp, frame
        code.extend_from_slice(&(frame as u32).to_le_bytes());
        code.extend_from_slice(&self.code);
        code.extend_from_slice(&[0x48, 0x81, 0xc4]); // add rsp, frame
        code.extend_from_slice(&(frame as u32).to_le_bytes());
        code.extend_from_slice(&EPILOGUE);
        code.push(0xc3); // ret

        Ok((code, self.io))
    }

}

impl Backend for NativeBackend {
    type Routine = NativeRoutine;

    fn alloc_buffer(&mut self, size: usize) -> Buffer {
        let buffer = Buffer(self.buffers.len());
        self.buffers.push(self.frame_size);
        self.frame_size += size;
        buffer
    }

    fn new_register(&mut self) -> Register {
        if self.registers == ALLOCATABLE.len() {
            self.fail(format!("out of registers: only {} are available", ALLOCATABLE.len()));
        }
        let r = Register(self.registers);
        self.registers += 1;
        r
    }

    fn mov(&mut self, dst: Operand, imm: i64) {
        match dst {
            Operand::Register(r) => {
                let r = self.physical(r);
                self.emit_direct(true, &[0xc7], 0, r);
                self.emit_imm32(imm);
            },
            Operand::Memory(m) => {
                self.emit_memory(false, &[0xc6], 0, m);
                self.code.push(imm as u8);
            }
        }
    }

    fn add(&mut self, dst: Operand, imm: i64) {
        self.emit_group1(0, dst, imm);
    }

    fn sub(&mut self, dst: Operand, imm: i64) {
        self.emit_group1(5, dst, imm);
    }

    fn load(&mut self, dst: Register, src: Memory) {
        // movzx r64, byte [m]
        let dst = self.physical(dst);
        self.emit_memory(true, &[0x0f, 0xb6], dst, src);
    }

    fn store(&mut self, dst: Memory, src: Register) {
        // mov byte [m], r8
        let src = self.physical(src);
        self.emit_memory(false, &[0x88], src, dst);
    }

    fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    fn bind(&mut self, label: Label) {
        let offset = self.code.len();
        let res = match self.labels.get_mut(label.0) {
            Some(slot) if slot.is_none() => {
                *slot = Some(offset);
                Ok(())
            },
            Some(_) => Err(format!("label L{} bound twice", label.0)),
            None => Err(format!("unknown label L{}", label.0))
        };
        if let Err(e) = res {
            self.fail(e);
        }
    }

    fn jump(&mut self, target: Label) {
        self.code.push(0xe9);
        self.emit_rel32(target);
    }

    fn jump_if(&mut self, cond: Condition, lhs: Operand, rhs: i64, target: Label) {
        self.emit_group1(7, lhs, rhs);
        let cc = match cond {
            Condition::Equal => 0x84,
            Condition::NotEqual => 0x85,
            Condition::Below => 0x82
        };
        self.code.extend_from_slice(&[0x0f, cc]);
        self.emit_rel32(target);
    }

    fn invoke(&mut self, call: HostCall, args: &[Register], ret: Option<Register>) {
        let signature = call.signature();
        if args.len() != signature.params.len() || (ret.is_some() && signature.ret.is_none()) {
            self.fail(format!("call to {} does not match its signature", call));
            return;
        }

        let io = &mut *self.io as *mut HostIo as u64;
        self.emit_mov_imm64(7, io); // rdi
        for (arg, reg) in args.iter().zip(ARGUMENTS.iter()) {
            let src = self.physical(*arg);
            self.emit_direct(true, &[0x89], src, *reg);
        }

        let address = match call {
            HostCall::ReadByte => host::bf_read_byte as *const () as usize,
            HostCall::WriteByte => host::bf_write_byte as *const () as usize
        };
        self.emit_mov_imm64(RAX, address as u64);
        self.code.extend_from_slice(&[0xff, 0xd0]); // call rax

        if let Some(r) = ret {
            let dst = self.physical(r);
            self.emit_direct(true, &[0x89], RAX, dst);
        }
    }

    fn finalize(self) -> Result<NativeRoutine, BrainfuckError> {
        let (code, io) = self.assemble().map_err(BrainfuckError::BackendFinalize)?;
        debug!("Assembled {} bytes of machine code.", code.len());

        let mut map = MmapMut::map_anon(code.len())
            .map_err(|e| BrainfuckError::BackendFinalize(format!("cannot map code: {}", e)))?;
        map.copy_from_slice(&code);
        let map = map.make_exec()
            .map_err(|e| BrainfuckError::BackendFinalize(format!("cannot make code executable: {}", e)))?;

        Ok(NativeRoutine {
            map,
            io
        })
    }

}

/// Machine code mapped as executable, together with the I/O context it refers to.
pub struct NativeRoutine {
    map: Mmap,
    io: Box<HostIo>
}

impl NativeRoutine {

    /// The assembled routine, prologue and epilogue included.
    pub fn code(&self) -> &[u8] {
        &*self.map
    }

}

impl Routine for NativeRoutine {

    fn call(mut self) {
        unsafe {
            let entry: extern "C" fn() = mem::transmute(self.map.as_ptr());
            entry();
        }
        self.io.flush();
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;
    use crate::Compiler;
    use crate::optimizer::optimize;

    fn run(prog: &str, input: &[u8]) -> Vec<u8> {
        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let backend = NativeBackend::with_io(
            InputTarget::Custom(Rc::new(RefCell::new(Cursor::new(input.to_vec())))),
            OutputTarget::Custom(output.clone())
        );
        let program = Compiler::new(backend)
            .compile_instructions(&optimize(prog.as_bytes()))
            .unwrap()
            .finish()
            .unwrap();
        crate::launch(program).unwrap();
        let bytes = output.borrow().clone();
        bytes
    }

    #[test]
    fn test_encode_memory_operand() {
        let mut b = NativeBackend::new();
        let buf = b.alloc_buffer(8);
        let r = b.new_register();
        b.add(b.indexed(buf, r).into(), 5);
        // add byte [rsp + rbx + 0], 5
        assert_eq!(b.code(), &[0x40, 0x80, 0x84, 0x1c, 0, 0, 0, 0, 0x05]);
    }

    #[test]
    fn test_encode_extended_registers() {
        let mut b = NativeBackend::new();
        b.alloc_buffer(8);
        let buf2 = b.alloc_buffer(8);
        let _ = b.new_register();
        let r = b.new_register();
        // cmp r12, 1024
        b.jump_if(Condition::Below, r.into(), 1024, Label(0));
        assert_eq!(&b.code()[..7], &[0x49, 0x81, 0xfc, 0x00, 0x04, 0x00, 0x00]);
        // movzx r12, byte [rsp + r12 + 8]
        let start = b.code().len();
        b.load(r, b.indexed(buf2, r));
        assert_eq!(&b.code()[start..], &[0x4e, 0x0f, 0xb6, 0xa4, 0x24, 8, 0, 0, 0]);
    }

    #[test]
    fn test_unbound_label_fails() {
        let mut b = NativeBackend::new();
        let l = b.new_label();
        b.jump(l);
        assert!(b.finalize().is_err());
    }

    #[test]
    fn test_register_exhaustion_fails() {
        let mut b = NativeBackend::new();
        for _ in 0..=ALLOCATABLE.len() {
            b.new_register();
        }
        match b.finalize() {
            Err(BrainfuckError::BackendFinalize(m)) => assert!(m.contains("out of registers")),
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("Expected a finalize error")
        }
    }

    #[test]
    fn test_oversized_frame_fails() {
        let mut b = NativeBackend::new();
        b.alloc_buffer(MAX_BUFFER_SIZE + 1);
        match b.finalize() {
            Err(BrainfuckError::BackendFinalize(m)) => assert!(m.contains("stack frame")),
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("Expected a finalize error")
        }
    }

    #[test]
    fn test_largest_frame_fits() {
        let mut b = NativeBackend::new();
        b.alloc_buffer(MAX_BUFFER_SIZE / 2);
        b.alloc_buffer(MAX_BUFFER_SIZE / 2);
        let routine = b.finalize().unwrap();
        // sub rsp, 1 MiB - 8
        assert_eq!(&routine.code()[13..20], &[0x48, 0x81, 0xec, 0xf8, 0xff, 0x0f, 0x00]);
    }

    #[test]
    fn test_empty_routine() {
        let routine = NativeBackend::new().finalize().unwrap();
        assert_eq!(routine.code().first(), Some(&0x55));
        assert_eq!(routine.code().last(), Some(&0xc3));
        routine.call();
    }

    #[test]
    fn test_multiplication() {
        assert_eq!(run("++++++++[>++++++++<-]>.", b""), vec![64]);
    }

    #[test]
    fn test_wraparound() {
        let prog = format!("{}.-.", "+".repeat(256));
        assert_eq!(run(&prog, b""), vec![0, 255]);
    }

    #[test]
    fn test_cursor_wraps() {
        assert_eq!(run("+++<.>>>.", b""), vec![0, 0]);
        assert_eq!(run("<+++>.<.", b""), vec![0, 3]);
    }

    #[test]
    fn test_echo_until_eof() {
        // EOF reads as 255, adding one ends the loop
        assert_eq!(run(",+[-.,+]", b"hello"), b"hello".to_vec());
    }

}
