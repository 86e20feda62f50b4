//! Backend producing LLVM IR, compiled by the MCJIT execution engine.
//!
//! Registers are `alloca`ed 64 bit slots and buffers `alloca`ed byte arrays, all in the
//! entry block; LLVM promotes them to SSA values when optimizing. Labels are basic blocks.

use std::error::Error;
use inkwell::{AddressSpace, IntPredicate, OptimizationLevel};
use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::execution_engine::{ExecutionEngine, JitFunction};
use inkwell::module::{Linkage, Module};
use inkwell::targets::{InitializationConfig, Target};
use inkwell::values::{BasicMetadataValueEnum, FunctionValue, IntValue, PointerValue};
use crate::BrainfuckError;
use crate::backend::{Backend, Buffer, Condition, HostCall, Label, Memory, Operand, Register, Routine};
use crate::host::{self, HostIo, InputTarget, OutputTarget};

/// This is the type of the function emitted by the backend.
type MainFn = unsafe extern "C" fn();

type EmitResult<T> = Result<T, Box<dyn Error>>;

const MAIN: &str = "bf_main";

pub struct LlvmBackend<'ctx> {
    context: &'ctx Context,
    module: Module<'ctx>,
    builder: Builder<'ctx>,
    optimization_level: OptimizationLevel,
    main: FunctionValue<'ctx>,
    entry: BasicBlock<'ctx>,
    buffers: Vec<PointerValue<'ctx>>,
    registers: Vec<PointerValue<'ctx>>,
    labels: Vec<(BasicBlock<'ctx>, bool)>,
    error: Option<String>,
    io: Box<HostIo>,
    io_address: u64
}

impl<'ctx> LlvmBackend<'ctx> {

    /// Creates a new backend with the given optimization level.
    /// For more information about optimization levels, refer to the LLVM documentation.
    pub fn new(context: &'ctx Context, optimization_level: u32, input: InputTarget, output: OutputTarget) -> LlvmBackend<'ctx> {

        // Match the optimization level to one of those available for LLVM
        let opt = match optimization_level {
            0     => OptimizationLevel::None,
            1     => OptimizationLevel::Less,
            2     => OptimizationLevel::Default,
            _     => OptimizationLevel::Aggressive
        };

        let module = context.create_module("brainfuck");
        let builder = context.create_builder();

        let ptr_type = context.ptr_type(AddressSpace::default());
        let i32_type = context.i32_type();

        // Host procedures: both take the I/O context as first argument.
        // Their addresses are mapped when the execution engine is created.
        let read_type = i32_type.fn_type(&[ptr_type.into()], false);
        let write_type = context.void_type().fn_type(&[ptr_type.into(), i32_type.into()], false);
        module.add_function(HostCall::ReadByte.name(), read_type, Some(Linkage::External));
        module.add_function(HostCall::WriteByte.name(), write_type, Some(Linkage::External));

        let main = module.add_function(MAIN, context.void_type().fn_type(&[], false), None);
        let entry = context.append_basic_block(main, "entry");
        builder.position_at_end(entry);

        let mut io = Box::new(HostIo::new(input, output));
        let io_address = &mut *io as *mut HostIo as u64;

        LlvmBackend {
            context,
            module,
            builder,
            optimization_level: opt,
            main,
            entry,
            buffers: Vec::new(),
            registers: Vec::new(),
            labels: Vec::new(),
            error: None,
            io,
            io_address
        }
    }

    /// Dumps the module as LLVM IR.
    pub fn dump(&self) -> String {
        self.module.print_to_string().to_string()
    }

    fn check(&mut self, res: EmitResult<()>) {
        if let Err(e) = res {
            if self.error.is_none() {
                self.error = Some(e.to_string());
            }
        }
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }

    /// A builder inserting at the top of the entry block, where `alloca`s belong.
    fn entry_builder(&self) -> Builder<'ctx> {
        let builder = self.context.create_builder();
        match self.entry.get_first_instruction() {
            Some(i) => builder.position_before(&i),
            None => builder.position_at_end(self.entry)
        }
        builder
    }

    fn register(&self, r: Register) -> EmitResult<PointerValue<'ctx>> {
        Ok(self.registers.get(r.0).cloned().ok_or("unknown register")?)
    }

    fn cell(&self, m: Memory) -> EmitResult<PointerValue<'ctx>> {
        let buffer = self.buffers.get(m.buffer.0).cloned().ok_or("unknown buffer")?;
        let index = self.builder.build_load(self.context.i64_type(), self.register(m.index)?, "index")?;
        let cell = unsafe {
            self.builder.build_in_bounds_gep(self.context.i8_type(), buffer, &[index.into_int_value()], "cell")?
        };
        Ok(cell)
    }

    /// Pointer and current value of an operand.
    fn operand(&self, op: Operand) -> EmitResult<(PointerValue<'ctx>, IntValue<'ctx>)> {
        let (ptr, ty) = match op {
            Operand::Register(r) => (self.register(r)?, self.context.i64_type()),
            Operand::Memory(m) => (self.cell(m)?, self.context.i8_type())
        };
        let value = self.builder.build_load(ty, ptr, "value")?.into_int_value();
        Ok((ptr, value))
    }

    fn emit_mov(&self, dst: Operand, imm: i64) -> EmitResult<()> {
        let (ptr, ty) = match dst {
            Operand::Register(r) => (self.register(r)?, self.context.i64_type()),
            Operand::Memory(m) => (self.cell(m)?, self.context.i8_type())
        };
        self.builder.build_store(ptr, ty.const_int(imm as u64, false))?;
        Ok(())
    }

    fn emit_arith(&self, dst: Operand, imm: i64, add: bool) -> EmitResult<()> {
        let (ptr, value) = self.operand(dst)?;
        let imm = value.get_type().const_int(imm as u64, false);
        let result = if add {
            self.builder.build_int_add(value, imm, "sum")?
        } else {
            self.builder.build_int_sub(value, imm, "difference")?
        };
        self.builder.build_store(ptr, result)?;
        Ok(())
    }

    fn emit_load(&self, dst: Register, src: Memory) -> EmitResult<()> {
        let value = self.builder.build_load(self.context.i8_type(), self.cell(src)?, "byte")?;
        let value = self.builder.build_int_z_extend(value.into_int_value(), self.context.i64_type(), "byte")?;
        self.builder.build_store(self.register(dst)?, value)?;
        Ok(())
    }

    fn emit_store(&self, dst: Memory, src: Register) -> EmitResult<()> {
        let value = self.builder.build_load(self.context.i64_type(), self.register(src)?, "value")?;
        let value = self.builder.build_int_truncate(value.into_int_value(), self.context.i8_type(), "byte")?;
        self.builder.build_store(self.cell(dst)?, value)?;
        Ok(())
    }

    /// Starts a new block for the code following a jump.
    fn continue_after_jump(&self) {
        let next = self.context.append_basic_block(self.main, "next");
        self.builder.position_at_end(next);
    }

    fn emit_jump_if(&self, cond: Condition, lhs: Operand, rhs: i64, target: BasicBlock<'ctx>) -> EmitResult<()> {
        let (_, value) = self.operand(lhs)?;
        let rhs = value.get_type().const_int(rhs as u64, false);
        let predicate = match cond {
            Condition::Equal => IntPredicate::EQ,
            Condition::NotEqual => IntPredicate::NE,
            Condition::Below => IntPredicate::ULT
        };
        let taken = self.builder.build_int_compare(predicate, value, rhs, "cond")?;
        let next = self.context.append_basic_block(self.main, "next");
        self.builder.build_conditional_branch(taken, target, next)?;
        self.builder.position_at_end(next);
        Ok(())
    }

    fn emit_invoke(&self, call: HostCall, args: &[Register], ret: Option<Register>) -> EmitResult<()> {
        let i32_type = self.context.i32_type();
        let function = self.module.get_function(call.name()).ok_or("undeclared host procedure")?;

        // The I/O context is a constant for the whole program
        let io = self.context.i64_type().const_int(self.io_address, false)
            .const_to_pointer(self.context.ptr_type(AddressSpace::default()));

        let mut values: Vec<BasicMetadataValueEnum<'ctx>> = vec![io.into()];
        for arg in args {
            let value = self.builder.build_load(self.context.i64_type(), self.register(*arg)?, "arg")?;
            values.push(self.builder.build_int_truncate(value.into_int_value(), i32_type, "arg")?.into());
        }

        let result = self.builder.build_call(function, &values, "result")?;
        if let Some(r) = ret {
            if let Some(value) = result.try_as_basic_value().left() {
                let value = self.builder.build_int_s_extend(value.into_int_value(), self.context.i64_type(), "result")?;
                self.builder.build_store(self.register(r)?, value)?;
            }
        }
        Ok(())
    }

    fn terminate_current_block(&self, target: Option<BasicBlock<'ctx>>) -> EmitResult<()> {
        if let Some(block) = self.builder.get_insert_block() {
            if block.get_terminator().is_none() {
                match target {
                    Some(target) => { self.builder.build_unconditional_branch(target)?; },
                    None => { self.builder.build_return(None)?; }
                }
            }
        }
        Ok(())
    }

}

impl<'ctx> Backend for LlvmBackend<'ctx> {
    type Routine = LlvmRoutine<'ctx>;

    fn alloc_buffer(&mut self, size: usize) -> Buffer {
        let ty = self.context.i8_type().array_type(size as u32);
        match self.entry_builder().build_alloca(ty, "buffer") {
            Ok(ptr) => self.buffers.push(ptr),
            Err(e) => self.fail(e.to_string())
        }
        Buffer(self.buffers.len().saturating_sub(1))
    }

    fn new_register(&mut self) -> Register {
        match self.entry_builder().build_alloca(self.context.i64_type(), "register") {
            Ok(ptr) => self.registers.push(ptr),
            Err(e) => self.fail(e.to_string())
        }
        Register(self.registers.len().saturating_sub(1))
    }

    fn mov(&mut self, dst: Operand, imm: i64) {
        let res = self.emit_mov(dst, imm);
        self.check(res);
    }

    fn add(&mut self, dst: Operand, imm: i64) {
        let res = self.emit_arith(dst, imm, true);
        self.check(res);
    }

    fn sub(&mut self, dst: Operand, imm: i64) {
        let res = self.emit_arith(dst, imm, false);
        self.check(res);
    }

    fn load(&mut self, dst: Register, src: Memory) {
        let res = self.emit_load(dst, src);
        self.check(res);
    }

    fn store(&mut self, dst: Memory, src: Register) {
        let res = self.emit_store(dst, src);
        self.check(res);
    }

    fn new_label(&mut self) -> Label {
        let block = self.context.append_basic_block(self.main, "label");
        self.labels.push((block, false));
        Label(self.labels.len() - 1)
    }

    fn bind(&mut self, label: Label) {
        let block = match self.labels.get(label.0) {
            Some((block, false)) => *block,
            _ => {
                self.fail(format!("label L{} is unknown or bound twice", label.0));
                return;
            }
        };
        self.labels[label.0].1 = true;

        // Falling through into a label is an explicit branch in LLVM
        let res = self.terminate_current_block(Some(block));
        self.check(res);
        self.builder.position_at_end(block);
    }

    fn jump(&mut self, target: Label) {
        match self.labels.get(target.0).map(|(block, _)| *block) {
            Some(block) => {
                let res = self.builder.build_unconditional_branch(block).map(|_| ()).map_err(Into::into);
                self.check(res);
                self.continue_after_jump();
            },
            None => self.fail(format!("unknown label L{}", target.0))
        }
    }

    fn jump_if(&mut self, cond: Condition, lhs: Operand, rhs: i64, target: Label) {
        match self.labels.get(target.0).map(|(block, _)| *block) {
            Some(block) => {
                let res = self.emit_jump_if(cond, lhs, rhs, block);
                self.check(res);
            },
            None => self.fail(format!("unknown label L{}", target.0))
        }
    }

    fn invoke(&mut self, call: HostCall, args: &[Register], ret: Option<Register>) {
        let signature = call.signature();
        if args.len() != signature.params.len() || (ret.is_some() && signature.ret.is_none()) {
            self.fail(format!("call to {} does not match its signature", call));
            return;
        }
        let res = self.emit_invoke(call, args, ret);
        self.check(res);
    }

    fn finalize(mut self) -> Result<LlvmRoutine<'ctx>, BrainfuckError> {

        // Emit a return
        let res = self.terminate_current_block(None);
        self.check(res);

        // Jumping to a label never bound leaves an empty block behind
        let unbound = self.labels.iter().position(|(block, bound)| !*bound && block.get_first_use().is_some());
        if let Some(i) = unbound {
            self.fail(format!("jump to unbound label L{}", i));
        }
        for (block, bound) in &self.labels {
            if !*bound && block.get_first_use().is_none() {
                block.remove_from_function().ok();
            }
        }

        if let Some(e) = self.error.take() {
            return Err(BrainfuckError::BackendFinalize(e));
        }
        self.module.verify().map_err(|e| BrainfuckError::BackendFinalize(e.to_string()))?;

        Target::initialize_native(&InitializationConfig::default())
            .map_err(|e| BrainfuckError::BackendFinalize(format!("Cannot initialize native target: {}", e)))?;
        let engine = self.module.create_jit_execution_engine(self.optimization_level)
            .map_err(|e| BrainfuckError::BackendFinalize(format!("Cannot create JIT engine: {}", e)))?;

        // Resolve host procedures to our own functions
        for (call, address) in &[
            (HostCall::ReadByte, host::bf_read_byte as *const () as usize),
            (HostCall::WriteByte, host::bf_write_byte as *const () as usize)
        ] {
            if let Some(function) = self.module.get_function(call.name()) {
                engine.add_global_mapping(&function, *address);
            }
        }

        let main = unsafe { engine.get_function::<MainFn>(MAIN) }
            .map_err(|e| BrainfuckError::BackendFinalize(format!("Cannot JIT compile entry point: {:?}", e)))?;

        Ok(LlvmRoutine {
            main,
            _engine: engine,
            _module: self.module,
            io: self.io
        })
    }

}

/// A program compiled by LLVM into native code.
pub struct LlvmRoutine<'ctx> {
    main: JitFunction<'ctx, MainFn>,
    _engine: ExecutionEngine<'ctx>,
    _module: Module<'ctx>,
    io: Box<HostIo>
}

impl<'ctx> Routine for LlvmRoutine<'ctx> {

    fn call(mut self) {
        unsafe {
            self.main.call();
        }
        self.io.flush();
    }

}
