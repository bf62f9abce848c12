use crate::func::{FuncInstanceInternal, FuncRef};
use crate::host::Externals;
use crate::isa::{BlockType, Instruction};
use crate::memory::MemoryRef;
use crate::memory_units::Pages;
use crate::module::{ModuleRef, DEFAULT_MEMORY_INDEX};
use crate::nan_preserving_float::{F32, F64};
use crate::types::Signature;
use crate::value::{
    ArithmeticOps, ExtendInto, Float, FromRuntimeValue, Integer, LittleEndianConvert,
    RuntimeValue, TransmuteInto, TryTruncateInto, WrapInto,
};
use crate::{Trap, TrapKind};
use core::ops;
use std::rc::Rc;

/// Maximum number of entries on the value stack.
pub const DEFAULT_VALUE_STACK_LIMIT: usize = 1024 * 1024;

/// Maximum number of levels on the call stack.
pub const DEFAULT_CALL_STACK_LIMIT: usize = 64 * 1024;

/// Interpreter action to execute after executing instruction.
enum InstructionOutcome {
    /// Continue with next instruction.
    RunNextInstruction,
    /// Branch to the label at the given depth.
    Branch(u32),
    /// Execute function call.
    ExecuteCall(FuncRef),
    /// Return from current function block.
    Return,
}

/// Function run result.
enum RunResult {
    /// Function has returned.
    Return,
    /// Function is calling other function.
    NestedCall(FuncRef),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LabelKind {
    Block,
    Loop,
    If,
}

/// A marker pushed when a block-like construct is entered; branch targets
/// reference labels by depth.
#[derive(Copy, Clone, Debug)]
struct Label {
    kind: LabelKind,
    /// Position of the block-like opcode itself. Branches to a `loop` label
    /// resume here so the next fetched instruction is the loop body's first.
    start_pc: usize,
    /// Position of the matching `end`.
    end_pc: usize,
    /// Operand stack depth when the label was pushed.
    stack_pointer: usize,
    /// Values a branch to this label carries. Zero for loops: a back edge
    /// re-enters the loop with an empty block result.
    arity: usize,
    /// Values the block leaves behind when its `end` executes normally.
    end_arity: usize,
}

/// Function interpreter.
pub(crate) struct Interpreter {
    value_stack: ValueStack,
    call_stack: CallStack,
    /// Result count of the outermost function.
    arity: usize,
}

impl Interpreter {
    pub fn new(func: &FuncRef, args: &[RuntimeValue]) -> Result<Interpreter, Trap> {
        let mut value_stack = ValueStack::with_limit(DEFAULT_VALUE_STACK_LIMIT);
        for &arg in args {
            value_stack.push(arg).map_err(Trap::new)?;
        }

        let initial_frame = FunctionContext::new(func.clone(), &mut value_stack).map_err(Trap::new)?;
        let mut call_stack = CallStack::with_limit(DEFAULT_CALL_STACK_LIMIT);
        call_stack.push(initial_frame);

        let arity = func.signature().arity();

        Ok(Interpreter {
            value_stack,
            call_stack,
            arity,
        })
    }

    pub fn start_execution<E: Externals>(
        &mut self,
        externals: &mut E,
    ) -> Result<Vec<RuntimeValue>, Trap> {
        if let Err(trap) = self.run_interpreter_loop(externals) {
            // Release every frame and operand before surfacing the trap;
            // the store itself keeps any mutations already performed.
            self.value_stack.clear();
            self.call_stack.clear();
            return Err(trap);
        }

        let mut results = Vec::with_capacity(self.arity);
        for _ in 0..self.arity {
            results.push(self.value_stack.pop().map_err(Trap::new)?);
        }
        results.reverse();
        Ok(results)
    }

    fn run_interpreter_loop<E: Externals>(&mut self, externals: &mut E) -> Result<(), Trap> {
        loop {
            let mut function_context = self.call_stack.pop().expect(
                "on loop entry - not empty; on loop continue - checking for emptiness; qed",
            );

            let function_return = self
                .do_run_function(&mut function_context)
                .map_err(Trap::new)?;

            match function_return {
                RunResult::Return => {
                    if self.call_stack.is_empty() {
                        // This was the last frame in the call stack. This
                        // means we are done executing.
                        return Ok(());
                    }
                }
                RunResult::NestedCall(nested_func) => match nested_func.as_internal() {
                    FuncInstanceInternal::Internal { .. } => {
                        if self.call_stack.is_full() {
                            return Err(TrapKind::StackOverflow.into());
                        }
                        let nested_context =
                            FunctionContext::new(nested_func.clone(), &mut self.value_stack)
                                .map_err(Trap::new)?;
                        self.call_stack.push(function_context);
                        self.call_stack.push(nested_context);
                    }
                    FuncInstanceInternal::Host {
                        signature,
                        module,
                        module_name,
                        field_name,
                    } => {
                        let args = self
                            .value_stack
                            .split_off_top(signature.params().len())
                            .map_err(Trap::new)?;
                        self.call_stack.push(function_context);

                        let store = ModuleRef(module.upgrade().expect("module deallocated"));
                        let results = externals.invoke_import(
                            &store,
                            module_name,
                            field_name,
                            (&args[..]).into(),
                        )?;
                        check_function_results(signature, &results)?;
                        for value in results {
                            self.value_stack.push(value).map_err(Trap::new)?;
                        }
                    }
                },
            }
        }
    }

    fn do_run_function(
        &mut self,
        context: &mut FunctionContext,
    ) -> Result<RunResult, TrapKind> {
        let instructions = Rc::clone(&context.instructions);
        loop {
            context.position += 1;
            let instruction = match instructions.get(context.position as usize) {
                Some(instruction) => instruction,
                None => {
                    // Ran past the last instruction: the function ends as if
                    // an `end` at function scope had executed.
                    self.value_stack
                        .unwind(context.stack_pointer, context.arity)?;
                    return Ok(RunResult::Return);
                }
            };

            match self.run_instruction(context, instruction)? {
                InstructionOutcome::RunNextInstruction => {}
                InstructionOutcome::Branch(depth) => self.run_branch(context, depth)?,
                InstructionOutcome::ExecuteCall(func_ref) => {
                    return Ok(RunResult::NestedCall(func_ref));
                }
                InstructionOutcome::Return => {
                    self.value_stack
                        .unwind(context.stack_pointer, context.arity)?;
                    return Ok(RunResult::Return);
                }
            }
        }
    }

    #[rustfmt::skip]
    fn run_instruction(
        &mut self,
        context: &mut FunctionContext,
        instruction: &Instruction,
    ) -> Result<InstructionOutcome, TrapKind> {
        match instruction {
            Instruction::Unreachable => self.run_unreachable(),
            Instruction::Nop => self.run_nop(),
            Instruction::Block(block_type) => self.run_block(context, *block_type),
            Instruction::Loop(block_type) => self.run_loop(context, *block_type),
            Instruction::If(block_type) => self.run_if(context, *block_type),
            Instruction::Else => self.run_else(context),
            Instruction::End => self.run_end(context),
            Instruction::Br(depth) => self.run_br(*depth),
            Instruction::BrIf(depth) => self.run_br_if(*depth),
            Instruction::BrTable { targets, default } => self.run_br_table(targets, *default),
            Instruction::Return => self.run_return(),
            Instruction::Call(index) => self.run_call(context, *index),

            Instruction::Drop => self.run_drop(),
            Instruction::Select => self.run_select(),

            Instruction::LocalGet(index) => self.run_local_get(context, *index),
            Instruction::LocalSet(index) => self.run_local_set(context, *index),
            Instruction::LocalTee(index) => self.run_local_tee(context, *index),
            Instruction::GlobalGet(index) => self.run_global_get(context, *index),
            Instruction::GlobalSet(index) => self.run_global_set(context, *index),

            Instruction::I32Load(mem_arg) => self.run_load::<i32>(context, mem_arg.offset),
            Instruction::I64Load(mem_arg) => self.run_load::<i64>(context, mem_arg.offset),
            Instruction::F32Load(mem_arg) => self.run_load::<F32>(context, mem_arg.offset),
            Instruction::F64Load(mem_arg) => self.run_load::<F64>(context, mem_arg.offset),
            Instruction::I32Load8S(mem_arg) => self.run_load_extend::<i8, i32>(context, mem_arg.offset),
            Instruction::I32Load8U(mem_arg) => self.run_load_extend::<u8, i32>(context, mem_arg.offset),
            Instruction::I32Load16S(mem_arg) => self.run_load_extend::<i16, i32>(context, mem_arg.offset),
            Instruction::I32Load16U(mem_arg) => self.run_load_extend::<u16, i32>(context, mem_arg.offset),
            Instruction::I64Load8S(mem_arg) => self.run_load_extend::<i8, i64>(context, mem_arg.offset),
            Instruction::I64Load8U(mem_arg) => self.run_load_extend::<u8, i64>(context, mem_arg.offset),
            Instruction::I64Load16S(mem_arg) => self.run_load_extend::<i16, i64>(context, mem_arg.offset),
            Instruction::I64Load16U(mem_arg) => self.run_load_extend::<u16, i64>(context, mem_arg.offset),
            Instruction::I64Load32S(mem_arg) => self.run_load_extend::<i32, i64>(context, mem_arg.offset),
            Instruction::I64Load32U(mem_arg) => self.run_load_extend::<u32, i64>(context, mem_arg.offset),
            Instruction::I32Store(mem_arg) => self.run_store::<i32>(context, mem_arg.offset),
            Instruction::I64Store(mem_arg) => self.run_store::<i64>(context, mem_arg.offset),
            Instruction::F32Store(mem_arg) => self.run_store::<F32>(context, mem_arg.offset),
            Instruction::F64Store(mem_arg) => self.run_store::<F64>(context, mem_arg.offset),
            Instruction::I32Store8(mem_arg) => self.run_store_wrap::<i32, i8>(context, mem_arg.offset),
            Instruction::I32Store16(mem_arg) => self.run_store_wrap::<i32, i16>(context, mem_arg.offset),
            Instruction::I64Store8(mem_arg) => self.run_store_wrap::<i64, i8>(context, mem_arg.offset),
            Instruction::I64Store16(mem_arg) => self.run_store_wrap::<i64, i16>(context, mem_arg.offset),
            Instruction::I64Store32(mem_arg) => self.run_store_wrap::<i64, i32>(context, mem_arg.offset),
            Instruction::MemorySize => self.run_memory_size(context),
            Instruction::MemoryGrow => self.run_memory_grow(context),

            Instruction::I32Const(value) => self.run_const(RuntimeValue::I32(*value)),
            Instruction::I64Const(value) => self.run_const(RuntimeValue::I64(*value)),
            Instruction::F32Const(bits) => self.run_const(RuntimeValue::decode_f32(*bits)),
            Instruction::F64Const(bits) => self.run_const(RuntimeValue::decode_f64(*bits)),

            Instruction::I32Eqz => self.run_eqz::<i32>(),
            Instruction::I32Eq => self.run_eq::<i32>(),
            Instruction::I32Ne => self.run_ne::<i32>(),
            Instruction::I32LtS => self.run_lt::<i32>(),
            Instruction::I32LtU => self.run_lt::<u32>(),
            Instruction::I32GtS => self.run_gt::<i32>(),
            Instruction::I32GtU => self.run_gt::<u32>(),
            Instruction::I32LeS => self.run_lte::<i32>(),
            Instruction::I32LeU => self.run_lte::<u32>(),
            Instruction::I32GeS => self.run_gte::<i32>(),
            Instruction::I32GeU => self.run_gte::<u32>(),
            Instruction::I64Eqz => self.run_eqz::<i64>(),
            Instruction::I64Eq => self.run_eq::<i64>(),
            Instruction::I64Ne => self.run_ne::<i64>(),
            Instruction::I64LtS => self.run_lt::<i64>(),
            Instruction::I64LtU => self.run_lt::<u64>(),
            Instruction::I64GtS => self.run_gt::<i64>(),
            Instruction::I64GtU => self.run_gt::<u64>(),
            Instruction::I64LeS => self.run_lte::<i64>(),
            Instruction::I64LeU => self.run_lte::<u64>(),
            Instruction::I64GeS => self.run_gte::<i64>(),
            Instruction::I64GeU => self.run_gte::<u64>(),
            Instruction::F32Eq => self.run_eq::<F32>(),
            Instruction::F32Ne => self.run_ne::<F32>(),
            Instruction::F32Lt => self.run_lt::<F32>(),
            Instruction::F32Gt => self.run_gt::<F32>(),
            Instruction::F32Le => self.run_lte::<F32>(),
            Instruction::F32Ge => self.run_gte::<F32>(),
            Instruction::F64Eq => self.run_eq::<F64>(),
            Instruction::F64Ne => self.run_ne::<F64>(),
            Instruction::F64Lt => self.run_lt::<F64>(),
            Instruction::F64Gt => self.run_gt::<F64>(),
            Instruction::F64Le => self.run_lte::<F64>(),
            Instruction::F64Ge => self.run_gte::<F64>(),

            Instruction::I32Clz => self.run_clz::<i32>(),
            Instruction::I32Ctz => self.run_ctz::<i32>(),
            Instruction::I32Popcnt => self.run_popcnt::<i32>(),
            Instruction::I32Add => self.run_add::<i32>(),
            Instruction::I32Sub => self.run_sub::<i32>(),
            Instruction::I32Mul => self.run_mul::<i32>(),
            Instruction::I32DivS => self.run_div::<i32, i32>(),
            Instruction::I32DivU => self.run_div::<i32, u32>(),
            Instruction::I32RemS => self.run_rem::<i32, i32>(),
            Instruction::I32RemU => self.run_rem::<i32, u32>(),
            Instruction::I32And => self.run_and::<i32>(),
            Instruction::I32Or => self.run_or::<i32>(),
            Instruction::I32Xor => self.run_xor::<i32>(),
            Instruction::I32Shl => self.run_shl::<i32>(0x1F),
            Instruction::I32ShrS => self.run_shr::<i32, i32>(0x1F),
            Instruction::I32ShrU => self.run_shr::<i32, u32>(0x1F),
            Instruction::I32Rotl => self.run_rotl::<i32>(),
            Instruction::I32Rotr => self.run_rotr::<i32>(),
            Instruction::I64Clz => self.run_clz::<i64>(),
            Instruction::I64Ctz => self.run_ctz::<i64>(),
            Instruction::I64Popcnt => self.run_popcnt::<i64>(),
            Instruction::I64Add => self.run_add::<i64>(),
            Instruction::I64Sub => self.run_sub::<i64>(),
            Instruction::I64Mul => self.run_mul::<i64>(),
            Instruction::I64DivS => self.run_div::<i64, i64>(),
            Instruction::I64DivU => self.run_div::<i64, u64>(),
            Instruction::I64RemS => self.run_rem::<i64, i64>(),
            Instruction::I64RemU => self.run_rem::<i64, u64>(),
            Instruction::I64And => self.run_and::<i64>(),
            Instruction::I64Or => self.run_or::<i64>(),
            Instruction::I64Xor => self.run_xor::<i64>(),
            Instruction::I64Shl => self.run_shl::<i64>(0x3F),
            Instruction::I64ShrS => self.run_shr::<i64, i64>(0x3F),
            Instruction::I64ShrU => self.run_shr::<i64, u64>(0x3F),
            Instruction::I64Rotl => self.run_rotl::<i64>(),
            Instruction::I64Rotr => self.run_rotr::<i64>(),

            Instruction::F32Abs => self.run_abs::<F32>(),
            Instruction::F32Neg => self.run_neg::<F32>(),
            Instruction::F32Ceil => self.run_ceil::<F32>(),
            Instruction::F32Floor => self.run_floor::<F32>(),
            Instruction::F32Trunc => self.run_trunc::<F32>(),
            Instruction::F32Nearest => self.run_nearest::<F32>(),
            Instruction::F32Sqrt => self.run_sqrt::<F32>(),
            Instruction::F32Add => self.run_add::<F32>(),
            Instruction::F32Sub => self.run_sub::<F32>(),
            Instruction::F32Mul => self.run_mul::<F32>(),
            Instruction::F32Div => self.run_div::<F32, F32>(),
            Instruction::F32Min => self.run_min::<F32>(),
            Instruction::F32Max => self.run_max::<F32>(),
            Instruction::F32Copysign => self.run_copysign::<F32>(),
            Instruction::F64Abs => self.run_abs::<F64>(),
            Instruction::F64Neg => self.run_neg::<F64>(),
            Instruction::F64Ceil => self.run_ceil::<F64>(),
            Instruction::F64Floor => self.run_floor::<F64>(),
            Instruction::F64Trunc => self.run_trunc::<F64>(),
            Instruction::F64Nearest => self.run_nearest::<F64>(),
            Instruction::F64Sqrt => self.run_sqrt::<F64>(),
            Instruction::F64Add => self.run_add::<F64>(),
            Instruction::F64Sub => self.run_sub::<F64>(),
            Instruction::F64Mul => self.run_mul::<F64>(),
            Instruction::F64Div => self.run_div::<F64, F64>(),
            Instruction::F64Min => self.run_min::<F64>(),
            Instruction::F64Max => self.run_max::<F64>(),
            Instruction::F64Copysign => self.run_copysign::<F64>(),

            Instruction::I32WrapI64 => self.run_wrap::<i64, i32>(),
            Instruction::I32TruncF32S => self.run_trunc_to_int::<F32, i32, i32>(),
            Instruction::I32TruncF32U => self.run_trunc_to_int::<F32, u32, i32>(),
            Instruction::I32TruncF64S => self.run_trunc_to_int::<F64, i32, i32>(),
            Instruction::I32TruncF64U => self.run_trunc_to_int::<F64, u32, i32>(),
            Instruction::I64ExtendI32S => self.run_extend::<i32, i64, i64>(),
            Instruction::I64ExtendI32U => self.run_extend::<u32, u64, i64>(),
            Instruction::I64TruncF32S => self.run_trunc_to_int::<F32, i64, i64>(),
            Instruction::I64TruncF32U => self.run_trunc_to_int::<F32, u64, i64>(),
            Instruction::I64TruncF64S => self.run_trunc_to_int::<F64, i64, i64>(),
            Instruction::I64TruncF64U => self.run_trunc_to_int::<F64, u64, i64>(),
            Instruction::F32ConvertI32S => self.run_extend::<i32, F32, F32>(),
            Instruction::F32ConvertI32U => self.run_extend::<u32, F32, F32>(),
            Instruction::F32ConvertI64S => self.run_wrap::<i64, F32>(),
            Instruction::F32ConvertI64U => self.run_wrap::<u64, F32>(),
            Instruction::F32DemoteF64 => self.run_wrap::<F64, F32>(),
            Instruction::F64ConvertI32S => self.run_extend::<i32, F64, F64>(),
            Instruction::F64ConvertI32U => self.run_extend::<u32, F64, F64>(),
            Instruction::F64ConvertI64S => self.run_extend::<i64, F64, F64>(),
            Instruction::F64ConvertI64U => self.run_extend::<u64, F64, F64>(),
            Instruction::F64PromoteF32 => self.run_extend::<F32, F64, F64>(),
            Instruction::I32ReinterpretF32 => self.run_reinterpret::<F32, i32>(),
            Instruction::I64ReinterpretF64 => self.run_reinterpret::<F64, i64>(),
            Instruction::F32ReinterpretI32 => self.run_reinterpret::<i32, F32>(),
            Instruction::F64ReinterpretI64 => self.run_reinterpret::<i64, F64>(),

            Instruction::I32Extend8S => self.run_unop(|v: i32| v as i8 as i32),
            Instruction::I32Extend16S => self.run_unop(|v: i32| v as i16 as i32),
            Instruction::I64Extend8S => self.run_unop(|v: i64| v as i8 as i64),
            Instruction::I64Extend16S => self.run_unop(|v: i64| v as i16 as i64),
            Instruction::I64Extend32S => self.run_unop(|v: i64| v as i32 as i64),

            // Saturating truncation is exactly the semantics of Rust's
            // float-to-int `as` cast: NaN becomes 0, out-of-range values
            // clamp to the target bounds.
            Instruction::I32TruncSatF32S => self.run_unop(|v: F32| f32::from(v) as i32),
            Instruction::I32TruncSatF32U => self.run_unop(|v: F32| f32::from(v) as u32),
            Instruction::I32TruncSatF64S => self.run_unop(|v: F64| f64::from(v) as i32),
            Instruction::I32TruncSatF64U => self.run_unop(|v: F64| f64::from(v) as u32),
            Instruction::I64TruncSatF32S => self.run_unop(|v: F32| f32::from(v) as i64),
            Instruction::I64TruncSatF32U => self.run_unop(|v: F32| f32::from(v) as u64),
            Instruction::I64TruncSatF64S => self.run_unop(|v: F64| f64::from(v) as i64),
            Instruction::I64TruncSatF64U => self.run_unop(|v: F64| f64::from(v) as u64),
        }
    }

    fn run_unreachable(&mut self) -> Result<InstructionOutcome, TrapKind> {
        Err(TrapKind::Unreachable)
    }

    fn run_nop(&mut self) -> Result<InstructionOutcome, TrapKind> {
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_block(
        &mut self,
        context: &mut FunctionContext,
        block_type: BlockType,
    ) -> Result<InstructionOutcome, TrapKind> {
        let pc = context.position as usize;
        let (end_pc, _) = find_block_end(&context.instructions, pc)?;
        let arity = block_type.result_arity();
        context.labels.push(Label {
            kind: LabelKind::Block,
            start_pc: pc,
            end_pc,
            stack_pointer: self.value_stack.len(),
            arity,
            end_arity: arity,
        });
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_loop(
        &mut self,
        context: &mut FunctionContext,
        block_type: BlockType,
    ) -> Result<InstructionOutcome, TrapKind> {
        let pc = context.position as usize;
        let (end_pc, _) = find_block_end(&context.instructions, pc)?;
        context.labels.push(Label {
            kind: LabelKind::Loop,
            start_pc: pc,
            end_pc,
            stack_pointer: self.value_stack.len(),
            // A branch to a loop is a back edge and carries nothing.
            arity: 0,
            end_arity: block_type.result_arity(),
        });
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_if(
        &mut self,
        context: &mut FunctionContext,
        block_type: BlockType,
    ) -> Result<InstructionOutcome, TrapKind> {
        let condition: bool = self.value_stack.pop_as()?;
        let pc = context.position as usize;
        let (end_pc, else_pc) = find_block_end(&context.instructions, pc)?;
        let arity = block_type.result_arity();
        context.labels.push(Label {
            kind: LabelKind::If,
            start_pc: pc,
            end_pc,
            stack_pointer: self.value_stack.len(),
            arity,
            end_arity: arity,
        });
        if !condition {
            match else_pc {
                // Resume after the `else`, executing the false arm.
                Some(else_pc) => context.position = else_pc as isize,
                // No false arm: resume at the `end` so the label is popped.
                None => context.position = end_pc as isize - 1,
            }
        }
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_else(
        &mut self,
        context: &mut FunctionContext,
    ) -> Result<InstructionOutcome, TrapKind> {
        // Reached only on the true arm; the false arm jumped past it.
        let label = context.labels.last().ok_or(TrapKind::UndefinedLabel)?;
        context.position = label.end_pc as isize - 1;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_end(&mut self, context: &mut FunctionContext) -> Result<InstructionOutcome, TrapKind> {
        match context.labels.pop() {
            Some(label) => {
                context.position = label.end_pc as isize;
                self.value_stack
                    .unwind(label.stack_pointer, label.end_arity)?;
                Ok(InstructionOutcome::RunNextInstruction)
            }
            // `end` at function scope.
            None => Ok(InstructionOutcome::Return),
        }
    }

    fn run_br(&mut self, depth: u32) -> Result<InstructionOutcome, TrapKind> {
        Ok(InstructionOutcome::Branch(depth))
    }

    fn run_br_if(&mut self, depth: u32) -> Result<InstructionOutcome, TrapKind> {
        let condition: bool = self.value_stack.pop_as()?;
        if condition {
            Ok(InstructionOutcome::Branch(depth))
        } else {
            Ok(InstructionOutcome::RunNextInstruction)
        }
    }

    fn run_br_table(
        &mut self,
        targets: &[u32],
        default: u32,
    ) -> Result<InstructionOutcome, TrapKind> {
        let index: u32 = self.value_stack.pop_as()?;
        let depth = targets.get(index as usize).copied().unwrap_or(default);
        Ok(InstructionOutcome::Branch(depth))
    }

    fn run_branch(&mut self, context: &mut FunctionContext, depth: u32) -> Result<(), TrapKind> {
        let index = context
            .labels
            .len()
            .checked_sub(1 + depth as usize)
            .ok_or(TrapKind::UndefinedLabel)?;
        let label = context.labels[index];
        if label.kind == LabelKind::Loop {
            // The loop label survives the back edge.
            context.labels.truncate(index + 1);
            self.value_stack.unwind(label.stack_pointer, label.arity)?;
            context.position = label.start_pc as isize;
        } else {
            context.labels.truncate(index);
            self.value_stack.unwind(label.stack_pointer, label.arity)?;
            context.position = label.end_pc as isize;
        }
        Ok(())
    }

    fn run_return(&mut self) -> Result<InstructionOutcome, TrapKind> {
        Ok(InstructionOutcome::Return)
    }

    fn run_call(
        &mut self,
        context: &mut FunctionContext,
        func_idx: u32,
    ) -> Result<InstructionOutcome, TrapKind> {
        let func = context
            .module
            .func_by_index(func_idx)
            .ok_or(TrapKind::FunctionIndexOutOfRange(func_idx))?;
        Ok(InstructionOutcome::ExecuteCall(func))
    }

    fn run_drop(&mut self) -> Result<InstructionOutcome, TrapKind> {
        self.value_stack.pop()?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_select(&mut self) -> Result<InstructionOutcome, TrapKind> {
        let condition: bool = self.value_stack.pop_as()?;
        let right = self.value_stack.pop()?;
        let left = self.value_stack.pop()?;
        self.value_stack
            .push(if condition { left } else { right })?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_local_get(
        &mut self,
        context: &mut FunctionContext,
        index: u32,
    ) -> Result<InstructionOutcome, TrapKind> {
        let value = *context
            .locals
            .get(index as usize)
            .ok_or(TrapKind::LocalIndexOutOfRange(index))?;
        self.value_stack.push(value)?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_local_set(
        &mut self,
        context: &mut FunctionContext,
        index: u32,
    ) -> Result<InstructionOutcome, TrapKind> {
        let value = self.value_stack.pop()?;
        let slot = context
            .locals
            .get_mut(index as usize)
            .ok_or(TrapKind::LocalIndexOutOfRange(index))?;
        *slot = value;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_local_tee(
        &mut self,
        context: &mut FunctionContext,
        index: u32,
    ) -> Result<InstructionOutcome, TrapKind> {
        let value = *self.value_stack.top()?;
        let slot = context
            .locals
            .get_mut(index as usize)
            .ok_or(TrapKind::LocalIndexOutOfRange(index))?;
        *slot = value;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_global_get(
        &mut self,
        context: &mut FunctionContext,
        index: u32,
    ) -> Result<InstructionOutcome, TrapKind> {
        let global = context
            .module
            .global_by_index(index)
            .ok_or(TrapKind::GlobalIndexOutOfRange(index))?;
        self.value_stack.push(global.get())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_global_set(
        &mut self,
        context: &mut FunctionContext,
        index: u32,
    ) -> Result<InstructionOutcome, TrapKind> {
        let value = self.value_stack.pop()?;
        let global = context
            .module
            .global_by_index(index)
            .ok_or(TrapKind::GlobalIndexOutOfRange(index))?;
        if !global.is_mutable() {
            return Err(TrapKind::ImmutableGlobal);
        }
        global.set(value).map_err(|_| TrapKind::TypeMismatch)?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_load<T>(
        &mut self,
        context: &mut FunctionContext,
        offset: u32,
    ) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: LittleEndianConvert,
    {
        let raw_address = self.value_stack.pop_as()?;
        let address = effective_address(offset, raw_address)?;
        let m = context
            .memory()
            .ok_or(TrapKind::MemoryAccessOutOfBounds)?;
        let n: T = m
            .get_value(address)
            .map_err(|_| TrapKind::MemoryAccessOutOfBounds)?;
        self.value_stack.push(n.into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_load_extend<T, U>(
        &mut self,
        context: &mut FunctionContext,
        offset: u32,
    ) -> Result<InstructionOutcome, TrapKind>
    where
        T: ExtendInto<U> + LittleEndianConvert,
        RuntimeValue: From<U>,
    {
        let raw_address = self.value_stack.pop_as()?;
        let address = effective_address(offset, raw_address)?;
        let m = context
            .memory()
            .ok_or(TrapKind::MemoryAccessOutOfBounds)?;
        let v: T = m
            .get_value(address)
            .map_err(|_| TrapKind::MemoryAccessOutOfBounds)?;
        let stack_value: U = v.extend_into();
        self.value_stack.push(stack_value.into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_store<T>(
        &mut self,
        context: &mut FunctionContext,
        offset: u32,
    ) -> Result<InstructionOutcome, TrapKind>
    where
        T: FromRuntimeValue + LittleEndianConvert,
    {
        let stack_value: T = self.value_stack.pop_as()?;
        let raw_address = self.value_stack.pop_as::<u32>()?;
        let address = effective_address(offset, raw_address)?;

        let m = context
            .memory()
            .ok_or(TrapKind::MemoryAccessOutOfBounds)?;
        m.set_value(address, stack_value)
            .map_err(|_| TrapKind::MemoryAccessOutOfBounds)?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_store_wrap<T, U>(
        &mut self,
        context: &mut FunctionContext,
        offset: u32,
    ) -> Result<InstructionOutcome, TrapKind>
    where
        T: FromRuntimeValue + WrapInto<U>,
        U: LittleEndianConvert,
    {
        let stack_value: T = self.value_stack.pop_as()?;
        let stack_value = stack_value.wrap_into();
        let raw_address = self.value_stack.pop_as::<u32>()?;
        let address = effective_address(offset, raw_address)?;
        let m = context
            .memory()
            .ok_or(TrapKind::MemoryAccessOutOfBounds)?;
        m.set_value(address, stack_value)
            .map_err(|_| TrapKind::MemoryAccessOutOfBounds)?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_memory_size(
        &mut self,
        context: &mut FunctionContext,
    ) -> Result<InstructionOutcome, TrapKind> {
        let m = context
            .memory()
            .ok_or(TrapKind::MemoryAccessOutOfBounds)?;
        let pages = m.current_size().0 as u32;
        self.value_stack.push(pages.into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_memory_grow(
        &mut self,
        context: &mut FunctionContext,
    ) -> Result<InstructionOutcome, TrapKind> {
        let additional: u32 = self.value_stack.pop_as()?;
        let m = context
            .memory()
            .ok_or(TrapKind::MemoryAccessOutOfBounds)?;
        let result = match m.grow(Pages(additional as usize)) {
            Ok(Pages(previous)) => previous as u32,
            // Growth past the declared maximum reports -1 and leaves the
            // memory untouched.
            Err(_) => u32::MAX,
        };
        self.value_stack.push(result.into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_const(&mut self, value: RuntimeValue) -> Result<InstructionOutcome, TrapKind> {
        self.value_stack.push(value)?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_relop<T, F>(&mut self, f: F) -> Result<InstructionOutcome, TrapKind>
    where
        T: FromRuntimeValue,
        F: FnOnce(T, T) -> bool,
    {
        let (left, right) = self.value_stack.pop_pair_as::<T>()?;
        self.value_stack.push(f(left, right).into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_eqz<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        T: FromRuntimeValue + PartialEq<T> + Default,
    {
        let v: T = self.value_stack.pop_as()?;
        self.value_stack.push((v == T::default()).into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_eq<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        T: FromRuntimeValue + PartialEq<T>,
    {
        self.run_relop(|left: T, right: T| left == right)
    }

    fn run_ne<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        T: FromRuntimeValue + PartialEq<T>,
    {
        self.run_relop(|left: T, right: T| left != right)
    }

    fn run_lt<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        T: FromRuntimeValue + PartialOrd<T>,
    {
        self.run_relop(|left: T, right: T| left < right)
    }

    fn run_gt<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        T: FromRuntimeValue + PartialOrd<T>,
    {
        self.run_relop(|left: T, right: T| left > right)
    }

    fn run_lte<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        T: FromRuntimeValue + PartialOrd<T>,
    {
        self.run_relop(|left: T, right: T| left <= right)
    }

    fn run_gte<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        T: FromRuntimeValue + PartialOrd<T>,
    {
        self.run_relop(|left: T, right: T| left >= right)
    }

    fn run_unop<T, U, F>(&mut self, f: F) -> Result<InstructionOutcome, TrapKind>
    where
        F: FnOnce(T) -> U,
        T: FromRuntimeValue,
        RuntimeValue: From<U>,
    {
        let v: T = self.value_stack.pop_as()?;
        self.value_stack.push(f(v).into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_clz<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: Integer<T> + FromRuntimeValue,
    {
        self.run_unop(|v: T| v.leading_zeros())
    }

    fn run_ctz<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: Integer<T> + FromRuntimeValue,
    {
        self.run_unop(|v: T| v.trailing_zeros())
    }

    fn run_popcnt<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: Integer<T> + FromRuntimeValue,
    {
        self.run_unop(|v: T| v.count_ones())
    }

    fn run_add<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: ArithmeticOps<T> + FromRuntimeValue,
    {
        let (left, right) = self.value_stack.pop_pair_as::<T>()?;
        self.value_stack.push(left.add(right).into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_sub<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: ArithmeticOps<T> + FromRuntimeValue,
    {
        let (left, right) = self.value_stack.pop_pair_as::<T>()?;
        self.value_stack.push(left.sub(right).into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_mul<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: ArithmeticOps<T> + FromRuntimeValue,
    {
        let (left, right) = self.value_stack.pop_pair_as::<T>()?;
        self.value_stack.push(left.mul(right).into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_div<T, U>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: TransmuteInto<U> + FromRuntimeValue,
        U: ArithmeticOps<U> + TransmuteInto<T>,
    {
        let (left, right) = self.value_stack.pop_pair_as::<T>()?;
        let (left, right): (U, U) = (left.transmute_into(), right.transmute_into());
        let v = left.div(right)?;
        self.value_stack.push(v.transmute_into().into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_rem<T, U>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: TransmuteInto<U> + FromRuntimeValue,
        U: Integer<U> + TransmuteInto<T>,
    {
        let (left, right) = self.value_stack.pop_pair_as::<T>()?;
        let (left, right): (U, U) = (left.transmute_into(), right.transmute_into());
        let v = left.rem(right)?;
        self.value_stack.push(v.transmute_into().into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_and<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<<T as ops::BitAnd>::Output>,
        T: ops::BitAnd<T> + FromRuntimeValue,
    {
        let (left, right) = self.value_stack.pop_pair_as::<T>()?;
        self.value_stack.push(left.bitand(right).into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_or<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<<T as ops::BitOr>::Output>,
        T: ops::BitOr<T> + FromRuntimeValue,
    {
        let (left, right) = self.value_stack.pop_pair_as::<T>()?;
        self.value_stack.push(left.bitor(right).into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_xor<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<<T as ops::BitXor>::Output>,
        T: ops::BitXor<T> + FromRuntimeValue,
    {
        let (left, right) = self.value_stack.pop_pair_as::<T>()?;
        self.value_stack.push(left.bitxor(right).into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_shl<T>(&mut self, mask: T) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<<T as ops::Shl<T>>::Output>,
        T: ops::Shl<T> + ops::BitAnd<T, Output = T> + FromRuntimeValue,
    {
        let (left, right) = self.value_stack.pop_pair_as::<T>()?;
        self.value_stack.push(left.shl(right & mask).into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_shr<T, U>(&mut self, mask: U) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: TransmuteInto<U> + FromRuntimeValue,
        U: ops::Shr<U> + ops::BitAnd<U, Output = U>,
        <U as ops::Shr<U>>::Output: TransmuteInto<T>,
    {
        let (left, right) = self.value_stack.pop_pair_as::<T>()?;
        let (left, right): (U, U) = (left.transmute_into(), right.transmute_into());
        let v = left.shr(right & mask);
        self.value_stack.push(v.transmute_into().into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_rotl<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: Integer<T> + FromRuntimeValue,
    {
        let (left, right) = self.value_stack.pop_pair_as::<T>()?;
        self.value_stack.push(left.rotl(right).into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_rotr<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: Integer<T> + FromRuntimeValue,
    {
        let (left, right) = self.value_stack.pop_pair_as::<T>()?;
        self.value_stack.push(left.rotr(right).into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_abs<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: Float<T> + FromRuntimeValue,
    {
        self.run_unop(|v: T| v.abs())
    }

    fn run_neg<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<<T as ops::Neg>::Output>,
        T: ops::Neg + FromRuntimeValue,
    {
        self.run_unop(|v: T| v.neg())
    }

    fn run_ceil<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: Float<T> + FromRuntimeValue,
    {
        self.run_unop(|v: T| v.ceil())
    }

    fn run_floor<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: Float<T> + FromRuntimeValue,
    {
        self.run_unop(|v: T| v.floor())
    }

    fn run_trunc<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: Float<T> + FromRuntimeValue,
    {
        self.run_unop(|v: T| v.trunc())
    }

    fn run_nearest<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: Float<T> + FromRuntimeValue,
    {
        self.run_unop(|v: T| v.nearest())
    }

    fn run_sqrt<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: Float<T> + FromRuntimeValue,
    {
        self.run_unop(|v: T| v.sqrt())
    }

    fn run_min<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: Float<T> + FromRuntimeValue,
    {
        let (left, right) = self.value_stack.pop_pair_as::<T>()?;
        self.value_stack.push(left.min(right).into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_max<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: Float<T> + FromRuntimeValue,
    {
        let (left, right) = self.value_stack.pop_pair_as::<T>()?;
        self.value_stack.push(left.max(right).into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_copysign<T>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<T>,
        T: Float<T> + FromRuntimeValue,
    {
        let (left, right) = self.value_stack.pop_pair_as::<T>()?;
        self.value_stack.push(left.copysign(right).into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_wrap<T, U>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<U>,
        T: WrapInto<U> + FromRuntimeValue,
    {
        self.run_unop(|v: T| v.wrap_into())
    }

    fn run_trunc_to_int<T, U, V>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<V>,
        T: TryTruncateInto<U, TrapKind> + FromRuntimeValue,
        U: TransmuteInto<V>,
    {
        let v: T = self.value_stack.pop_as()?;
        let v: U = v.try_truncate_into()?;
        self.value_stack.push(v.transmute_into().into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_extend<T, U, V>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<V>,
        T: ExtendInto<U> + FromRuntimeValue,
        U: TransmuteInto<V>,
    {
        let v: T = self.value_stack.pop_as()?;
        let v: U = v.extend_into();
        self.value_stack.push(v.transmute_into().into())?;
        Ok(InstructionOutcome::RunNextInstruction)
    }

    fn run_reinterpret<T, U>(&mut self) -> Result<InstructionOutcome, TrapKind>
    where
        RuntimeValue: From<U>,
        T: TransmuteInto<U> + FromRuntimeValue,
    {
        self.run_unop(|v: T| v.transmute_into())
    }
}

/// The per-call activation record.
struct FunctionContext {
    #[allow(dead_code)]
    function: FuncRef,
    module: ModuleRef,
    memory: Option<MemoryRef>,
    /// Position within `instructions`. Starts at -1 so the loop's prologue
    /// increment fetches instruction 0.
    position: isize,
    /// Operand stack depth at call entry, used for unwinding.
    stack_pointer: usize,
    /// Number of results this call leaves on the stack.
    arity: usize,
    instructions: Rc<[Instruction]>,
    labels: Vec<Label>,
    /// Parameters followed by zero-initialized local slots.
    locals: Vec<RuntimeValue>,
}

impl FunctionContext {
    /// Builds the frame for an internal function, popping its parameters
    /// off the operand stack into the locals array.
    fn new(function: FuncRef, value_stack: &mut ValueStack) -> Result<FunctionContext, TrapKind> {
        let (module, body) = match function.as_internal() {
            FuncInstanceInternal::Internal { module, body, .. } => (
                ModuleRef(module.upgrade().expect("module deallocated")),
                Rc::clone(body),
            ),
            FuncInstanceInternal::Host { .. } => {
                panic!("host functions are dispatched through Externals, not framed; qed")
            }
        };

        let param_count = function.signature().params().len();
        let mut locals = value_stack.split_off_top(param_count)?;
        for value_type in body.locals() {
            locals.push(RuntimeValue::default(*value_type));
        }

        let memory = module.memory_by_index(DEFAULT_MEMORY_INDEX);
        let arity = function.signature().arity();

        Ok(FunctionContext {
            function,
            module,
            memory,
            position: -1,
            stack_pointer: value_stack.len(),
            arity,
            instructions: Rc::clone(&body.code),
            labels: Vec::new(),
            locals,
        })
    }

    fn memory(&self) -> Option<&MemoryRef> {
        self.memory.as_ref()
    }
}

fn effective_address(offset: u32, address: u32) -> Result<u32, TrapKind> {
    offset
        .checked_add(address)
        .ok_or(TrapKind::MemoryAccessOutOfBounds)
}

/// Depth-tracked forward scan for the `end` matching the block-like
/// instruction at `pc`. Also reports the position of a same-depth `else`,
/// which only `if` blocks can have.
fn find_block_end(
    instructions: &[Instruction],
    pc: usize,
) -> Result<(usize, Option<usize>), TrapKind> {
    let mut depth = 0usize;
    let mut else_pc = None;
    for (position, instruction) in instructions.iter().enumerate().skip(pc + 1) {
        match instruction {
            Instruction::End => {
                if depth == 0 {
                    return Ok((position, else_pc));
                }
                depth -= 1;
            }
            Instruction::Else => {
                if depth == 0 && else_pc.is_none() {
                    else_pc = Some(position);
                }
            }
            other if other.is_block_like() => depth += 1,
            _ => {}
        }
    }
    Err(TrapKind::UndefinedLabel)
}

pub(crate) fn check_function_args(signature: &Signature, args: &[RuntimeValue]) -> Result<(), Trap> {
    if signature.params().len() != args.len() {
        return Err(TrapKind::TypeMismatch.into());
    }

    if signature
        .params()
        .iter()
        .zip(args.iter().map(|arg| arg.value_type()))
        .any(|(expected, actual)| *expected != actual)
    {
        return Err(TrapKind::TypeMismatch.into());
    }

    Ok(())
}

pub(crate) fn check_function_results(
    signature: &Signature,
    results: &[RuntimeValue],
) -> Result<(), Trap> {
    if signature.results().len() != results.len() {
        return Err(TrapKind::TypeMismatch.into());
    }

    if signature
        .results()
        .iter()
        .zip(results.iter().map(|result| result.value_type()))
        .any(|(expected, actual)| *expected != actual)
    {
        return Err(TrapKind::TypeMismatch.into());
    }

    Ok(())
}

struct ValueStack {
    buf: Vec<RuntimeValue>,
    limit: usize,
}

impl ValueStack {
    fn with_limit(limit: usize) -> ValueStack {
        ValueStack {
            buf: Vec::new(),
            limit,
        }
    }

    fn push(&mut self, value: RuntimeValue) -> Result<(), TrapKind> {
        if self.buf.len() == self.limit {
            return Err(TrapKind::StackOverflow);
        }
        self.buf.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<RuntimeValue, TrapKind> {
        self.buf.pop().ok_or(TrapKind::StackUnderflow)
    }

    fn pop_as<T>(&mut self) -> Result<T, TrapKind>
    where
        T: FromRuntimeValue,
    {
        self.pop()?.try_into().ok_or(TrapKind::TypeMismatch)
    }

    fn pop_pair_as<T>(&mut self) -> Result<(T, T), TrapKind>
    where
        T: FromRuntimeValue,
    {
        let right = self.pop_as()?;
        let left = self.pop_as()?;
        Ok((left, right))
    }

    fn top(&self) -> Result<&RuntimeValue, TrapKind> {
        self.buf.last().ok_or(TrapKind::StackUnderflow)
    }

    /// Pops the top `count` values, returned in the order they were pushed.
    fn split_off_top(&mut self, count: usize) -> Result<Vec<RuntimeValue>, TrapKind> {
        let bottom = self
            .buf
            .len()
            .checked_sub(count)
            .ok_or(TrapKind::StackUnderflow)?;
        Ok(self.buf.split_off(bottom))
    }

    /// Shrinks the stack back to `stack_pointer` entries, preserving the
    /// top `arity` values in push order.
    fn unwind(&mut self, stack_pointer: usize, arity: usize) -> Result<(), TrapKind> {
        if self.buf.len() < stack_pointer + arity {
            return Err(TrapKind::StackUnderflow);
        }
        let kept = self.buf.split_off(self.buf.len() - arity);
        self.buf.truncate(stack_pointer);
        self.buf.extend(kept);
        Ok(())
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn clear(&mut self) {
        self.buf.clear();
    }
}

struct CallStack {
    buf: Vec<FunctionContext>,
    limit: usize,
}

impl CallStack {
    fn with_limit(limit: usize) -> CallStack {
        CallStack {
            buf: Vec::new(),
            limit,
        }
    }

    fn push(&mut self, context: FunctionContext) {
        self.buf.push(context);
    }

    fn pop(&mut self) -> Option<FunctionContext> {
        self.buf.pop()
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn is_full(&self) -> bool {
        self.buf.len() + 1 >= self.limit
    }

    fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwind_preserves_kept_values_in_push_order() {
        let mut stack = ValueStack::with_limit(16);
        for value in 0..5 {
            stack.push(RuntimeValue::I32(value)).unwrap();
        }
        stack.unwind(1, 2).unwrap();
        assert_eq!(stack.pop().unwrap(), RuntimeValue::I32(4));
        assert_eq!(stack.pop().unwrap(), RuntimeValue::I32(3));
        assert_eq!(stack.pop().unwrap(), RuntimeValue::I32(0));
        assert!(matches!(stack.pop(), Err(TrapKind::StackUnderflow)));
    }

    #[test]
    fn unwind_checks_for_underflow() {
        let mut stack = ValueStack::with_limit(16);
        stack.push(RuntimeValue::I32(1)).unwrap();
        assert!(matches!(
            stack.unwind(1, 1),
            Err(TrapKind::StackUnderflow)
        ));
    }

    #[test]
    fn value_stack_limit_is_enforced() {
        let mut stack = ValueStack::with_limit(1);
        stack.push(RuntimeValue::I32(1)).unwrap();
        assert!(matches!(
            stack.push(RuntimeValue::I32(2)),
            Err(TrapKind::StackOverflow)
        ));
    }

    #[test]
    fn find_block_end_tracks_nesting() {
        use crate::isa::BlockType;
        // block (if ... else ... end) end
        let instructions = vec![
            Instruction::Block(BlockType::NoResult),
            Instruction::If(BlockType::NoResult),
            Instruction::Nop,
            Instruction::Else,
            Instruction::Nop,
            Instruction::End,
            Instruction::End,
        ];
        assert_eq!(find_block_end(&instructions, 0).unwrap(), (6, None));
        assert_eq!(find_block_end(&instructions, 1).unwrap(), (5, Some(3)));
    }

    #[test]
    fn missing_end_is_reported() {
        use crate::isa::BlockType;
        let instructions = vec![Instruction::Block(BlockType::NoResult), Instruction::Nop];
        assert!(matches!(
            find_block_end(&instructions, 0),
            Err(TrapKind::UndefinedLabel)
        ));
    }
}
