//! Location-expression machine
//!
//! A small stack interpreter for the DWARF location-expression bytecode.
//! The indexer stores each expression as a sequence of [`Operation`]
//! records tagged with the byte offset the operation had in the encoded
//! stream. The machine steps a byte-position counter through the sequence
//! and executes whichever operation is recorded at the current position;
//! bytes that belong to a variable-length operand match no record and are
//! skipped, so no per-opcode operand-width table is needed here. The
//! counter and the recorded offsets are the only decoding the machine
//! performs.
//!
//! Only the opcode subset needed for common variable and parameter
//! locations is supported; anything else terminates the evaluation in the
//! failed state rather than silently skipping part of an expression.

use thiserror::Error;
use tracing::debug;

use crate::context::{ExecutionContext, RegisterId};
use crate::dwarf::index::FunctionEntry;

// DWARF expression opcode numbering (the wire contract with the producing
// compiler). Families lit0..31, reg0..31 and breg0..31 are contiguous.
const OP_ADDR: u8 = gimli::constants::DW_OP_addr.0;
const OP_DEREF: u8 = gimli::constants::DW_OP_deref.0;
const OP_DUP: u8 = gimli::constants::DW_OP_dup.0;
const OP_DROP: u8 = gimli::constants::DW_OP_drop.0;
const OP_PLUS: u8 = gimli::constants::DW_OP_plus.0;
const OP_LIT0: u8 = gimli::constants::DW_OP_lit0.0;
const OP_LIT31: u8 = gimli::constants::DW_OP_lit31.0;
const OP_REG0: u8 = gimli::constants::DW_OP_reg0.0;
const OP_REG31: u8 = gimli::constants::DW_OP_reg31.0;
const OP_BREG0: u8 = gimli::constants::DW_OP_breg0.0;
const OP_BREG31: u8 = gimli::constants::DW_OP_breg31.0;
const OP_FBREG: u8 = gimli::constants::DW_OP_fbreg.0;

/// One decoded location-expression operation.
///
/// `byte_offset` is the position of the opcode byte within the original
/// encoded expression stream. It is recorded at decode time and is what
/// the machine matches its position counter against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub opcode: u8,
    pub operand1: u64,
    pub operand2: u64,
    pub byte_offset: u64,
}

/// One location-list entry: an operation sequence valid over a
/// `[low_pc, high_pc)` range.
///
/// The sentinel ranges `(0, 0)` and `(0, u64::MAX)` mean "valid
/// everywhere" and match any instruction pointer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocationScript {
    pub low_pc: u64,
    pub high_pc: u64,
    pub ops: Vec<Operation>,
}

impl LocationScript {
    /// A script valid at every instruction address.
    pub fn everywhere(ops: Vec<Operation>) -> Self {
        Self {
            low_pc: 0,
            high_pc: u64::MAX,
            ops,
        }
    }

    /// Whether this entry applies at the given instruction pointer.
    pub fn covers(&self, pc: u64) -> bool {
        (self.low_pc == 0 && (self.high_pc == 0 || self.high_pc == u64::MAX))
            || (self.low_pc <= pc && pc < self.high_pc)
    }
}

/// An ordered list of location-list entries for one variable or frame base.
pub type ScriptList = Vec<LocationScript>;

/// Distinct causes for a failed or resultless evaluation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// An opcode outside the supported subset was encountered
    #[error("unsupported opcode 0x{0:02x}")]
    UnsupportedOpcode(u8),

    /// The execution context failed to supply a register value
    #[error("failed to read register {0}")]
    RegisterRead(RegisterId),

    /// The execution context failed to read target memory
    #[error("failed to dereference address 0x{0:08X}")]
    MemoryRead(u64),

    /// Arithmetic on mismatched or non-numeric stack values
    #[error("operand encodings do not match")]
    TypeMismatch,

    /// An operation popped more values than the stack held
    #[error("value stack underflow")]
    StackUnderflow,

    /// The machine terminated without producing a value
    #[error("expression produced no result")]
    EmptyStack,

    /// The variable has no location expression at all
    #[error("empty location list")]
    EmptyLocation,

    /// No location-list entry covers the current instruction pointer
    #[error("no location list entry covers address 0x{0:08X}")]
    NoMatchingRange(u64),

    /// A frame-relative operation was evaluated without an owning function
    #[error("frame-relative operation outside a function")]
    MissingFrameContext,

    /// The execution context failed to supply an instruction pointer
    #[error("no instruction pointer available")]
    NoInstructionPointer,

    /// The expression result is not a memory address
    #[error("result is not a memory address")]
    NotAnAddress,
}

/// A value on the machine's evaluation stack.
///
/// `Register` is a designator, not a value: it records that the variable
/// lives in the named register rather than in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackValue {
    Signed(i64),
    Unsigned(u64),
    Address(u64),
    Register(RegisterId),
}

/// Outcome of an address-style evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarLocation {
    /// The variable occupies memory starting at this address.
    Address(u64),
    /// The variable currently lives in a register.
    Register(RegisterId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MachineState {
    Executing,
    Done,
    Failed(EvalError),
}

/// One evaluation of one operation sequence.
///
/// Constructed per evaluation; the terminal state and the top of the
/// value stack are the result.
struct DwarfMachine<'a> {
    context: &'a dyn ExecutionContext,
    ops: &'a [Operation],
    function: Option<&'a FunctionEntry>,
    pointer_width: u8,
    state: MachineState,
    position: u64,
    stack: Vec<StackValue>,
}

impl<'a> DwarfMachine<'a> {
    fn new(
        context: &'a dyn ExecutionContext,
        ops: &'a [Operation],
        function: Option<&'a FunctionEntry>,
        pointer_width: u8,
    ) -> Self {
        Self {
            context,
            ops,
            function,
            pointer_width,
            state: MachineState::Executing,
            position: 0,
            stack: Vec::new(),
        }
    }

    fn run(mut self) -> Result<StackValue, EvalError> {
        while self.state == MachineState::Executing {
            self.step();
        }
        match self.state {
            MachineState::Failed(cause) => Err(cause),
            _ => self.stack.pop().ok_or(EvalError::EmptyStack),
        }
    }

    /// Advance the byte-position counter by one and execute the operation
    /// recorded at the new position, if any. Positions inside a
    /// variable-length operand match no record and are passed over; the
    /// machine is done once the counter moves past the last recorded
    /// offset.
    fn step(&mut self) {
        match self.ops.iter().find(|op| op.byte_offset == self.position) {
            Some(op) => {
                let op = *op;
                self.execute(op);
            }
            None => {
                if self.ops.iter().all(|op| op.byte_offset < self.position) {
                    self.state = MachineState::Done;
                }
            }
        }
        self.position += 1;
    }

    fn execute(&mut self, op: Operation) {
        match op.opcode {
            OP_LIT0..=OP_LIT31 => self.push(StackValue::Unsigned((op.opcode - OP_LIT0) as u64)),
            OP_ADDR => self.push(StackValue::Address(op.operand1)),
            OP_REG0..=OP_REG31 => {
                self.push(StackValue::Register((op.opcode - OP_REG0) as RegisterId))
            }
            OP_BREG0..=OP_BREG31 => {
                self.op_breg((op.opcode - OP_BREG0) as RegisterId, op.operand1 as i64)
            }
            OP_FBREG => self.op_fbreg(op.operand1 as i64),
            OP_DUP => self.op_dup(),
            OP_DROP => {
                self.pop();
            }
            OP_DEREF => self.op_deref(),
            OP_PLUS => self.op_plus(),
            opcode => {
                debug!(opcode, "unhandled location-expression opcode");
                self.fail(EvalError::UnsupportedOpcode(opcode));
            }
        }
    }

    fn fail(&mut self, cause: EvalError) {
        self.state = MachineState::Failed(cause);
    }

    fn push(&mut self, value: StackValue) {
        self.stack.push(value);
    }

    /// Pop the top of the value stack, failing the machine on underflow.
    fn pop(&mut self) -> Option<StackValue> {
        let value = self.stack.pop();
        if value.is_none() {
            self.fail(EvalError::StackUnderflow);
        }
        value
    }

    fn op_breg(&mut self, reg: RegisterId, offset: i64) {
        match self.context.get_register(reg) {
            Ok(value) => self.push(StackValue::Address(value.wrapping_add_signed(offset))),
            Err(_) => self.fail(EvalError::RegisterRead(reg)),
        }
    }

    /// Evaluate the owning function's frame base and push it plus the
    /// signed offset. A frame base that itself names a register is read
    /// through the context and its value used as the base address.
    fn op_fbreg(&mut self, offset: i64) {
        let Some(function) = self.function else {
            self.fail(EvalError::MissingFrameContext);
            return;
        };
        // The frame base defines fbreg, so it is evaluated without an
        // owning function of its own.
        match evaluate_address(self.context, &function.frame_base, None, self.pointer_width) {
            Ok(VarLocation::Address(base)) => {
                self.push(StackValue::Address(base.wrapping_add_signed(offset)));
            }
            Ok(VarLocation::Register(reg)) => match self.context.get_register(reg) {
                Ok(base) => self.push(StackValue::Address(base.wrapping_add_signed(offset))),
                Err(_) => self.fail(EvalError::RegisterRead(reg)),
            },
            Err(cause) => self.fail(cause),
        }
    }

    fn op_dup(&mut self) {
        if let Some(value) = self.pop() {
            self.push(value);
            self.push(value);
        }
    }

    fn op_deref(&mut self) {
        let Some(value) = self.pop() else { return };
        let StackValue::Address(address) = value else {
            self.fail(EvalError::TypeMismatch);
            return;
        };
        let width = self.pointer_width as usize;
        let mut buffer = [0u8; 8];
        match self.context.read_memory(address, &mut buffer[..width]) {
            Ok(count) if count == width => {
                self.push(StackValue::Address(u64::from_le_bytes(buffer)));
            }
            _ => self.fail(EvalError::MemoryRead(address)),
        }
    }

    fn op_plus(&mut self) {
        let Some(rhs) = self.pop() else { return };
        let Some(lhs) = self.pop() else { return };
        match (lhs, rhs) {
            (StackValue::Unsigned(a), StackValue::Unsigned(b)) => {
                self.push(StackValue::Unsigned(a.wrapping_add(b)));
            }
            (StackValue::Signed(a), StackValue::Signed(b)) => {
                self.push(StackValue::Signed(a.wrapping_add(b)));
            }
            _ => self.fail(EvalError::TypeMismatch),
        }
    }
}

/// Evaluate one operation sequence to a single stack value.
pub fn evaluate_script(
    context: &dyn ExecutionContext,
    ops: &[Operation],
    function: Option<&FunctionEntry>,
    pointer_width: u8,
) -> Result<StackValue, EvalError> {
    DwarfMachine::new(context, ops, function, pointer_width).run()
}

/// Evaluate a location list at the context's current instruction pointer.
///
/// Selects the single entry whose validity range covers the instruction
/// pointer (the "valid everywhere" sentinel always matches) and evaluates
/// its operation sequence.
pub fn evaluate(
    context: &dyn ExecutionContext,
    scripts: &[LocationScript],
    function: Option<&FunctionEntry>,
    pointer_width: u8,
) -> Result<StackValue, EvalError> {
    if scripts.is_empty() {
        return Err(EvalError::EmptyLocation);
    }
    let pc = context
        .get_instruction_pointer()
        .map_err(|_| EvalError::NoInstructionPointer)?;
    match scripts.iter().find(|script| script.covers(pc)) {
        Some(script) => evaluate_script(context, &script.ops, function, pointer_width),
        None => Err(EvalError::NoMatchingRange(pc)),
    }
}

/// Evaluate a location list to a storage location.
///
/// A register designator on top of the stack is a successful outcome of
/// its own kind, so callers can suppress register-backed variables rather
/// than treat them as unresolved.
pub fn evaluate_address(
    context: &dyn ExecutionContext,
    scripts: &[LocationScript],
    function: Option<&FunctionEntry>,
    pointer_width: u8,
) -> Result<VarLocation, EvalError> {
    match evaluate(context, scripts, function, pointer_width)? {
        StackValue::Address(address) => Ok(VarLocation::Address(address)),
        StackValue::Register(reg) => Ok(VarLocation::Register(reg)),
        _ => Err(EvalError::NotAnAddress),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_context::MockContext;
    use proptest::prelude::*;

    fn op(opcode: u8, operand1: u64, byte_offset: u64) -> Operation {
        Operation {
            opcode,
            operand1,
            operand2: 0,
            byte_offset,
        }
    }

    fn frame_function(frame_base: ScriptList) -> FunctionEntry {
        FunctionEntry {
            name: "frame_fn".to_string(),
            unique_id: "frame_fn_1000".to_string(),
            low_pc: 0x1000,
            high_pc: 0x2000,
            frame_base,
            ..Default::default()
        }
    }

    #[test]
    fn test_literal_addition() {
        let ctx = MockContext::new().with_instruction_pointer(0x1000);
        let ops = vec![
            op(OP_LIT0 + 5, 0, 0),
            op(OP_LIT0 + 3, 0, 2),
            op(OP_PLUS, 0, 4),
        ];
        let result = evaluate_script(&ctx, &ops, None, 8).unwrap();
        assert_eq!(result, StackValue::Unsigned(8));
    }

    #[test]
    fn test_unsupported_opcode_fails() {
        let ctx = MockContext::new();
        // DW_OP_const1u is outside the supported subset
        let ops = vec![op(OP_LIT0 + 5, 0, 0), op(0x08, 7, 1)];
        let result = evaluate_script(&ctx, &ops, None, 8);
        assert_eq!(result, Err(EvalError::UnsupportedOpcode(0x08)));
    }

    #[test]
    fn test_empty_sequence_has_no_result() {
        let ctx = MockContext::new();
        assert_eq!(
            evaluate_script(&ctx, &[], None, 8),
            Err(EvalError::EmptyStack)
        );
    }

    #[test]
    fn test_operand_bytes_are_skipped() {
        // addr spans [0, 9); the following plus records offset 9
        let ctx = MockContext::new();
        let ops = vec![
            op(OP_LIT0 + 2, 0, 0),
            op(OP_LIT0 + 4, 0, 1),
            op(OP_PLUS, 0, 9),
        ];
        let result = evaluate_script(&ctx, &ops, None, 8).unwrap();
        assert_eq!(result, StackValue::Unsigned(6));
    }

    #[test]
    fn test_addr_pushes_address() {
        let ctx = MockContext::new();
        let ops = vec![op(OP_ADDR, 0x6000_1000, 0)];
        let result = evaluate_script(&ctx, &ops, None, 8).unwrap();
        assert_eq!(result, StackValue::Address(0x6000_1000));
    }

    #[test]
    fn test_reg_pushes_designator() {
        let ctx = MockContext::new().with_instruction_pointer(0x1000);
        let scripts = vec![LocationScript::everywhere(vec![op(OP_REG0 + 5, 0, 0)])];
        let result = evaluate_address(&ctx, &scripts, None, 8).unwrap();
        assert_eq!(result, VarLocation::Register(5));
    }

    #[test]
    fn test_breg_reads_register() {
        let ctx = MockContext::new().with_register(6, 0x7fff_0010);
        let ops = vec![op(OP_BREG0 + 6, (-16i64) as u64, 0)];
        let result = evaluate_script(&ctx, &ops, None, 8).unwrap();
        assert_eq!(result, StackValue::Address(0x7fff_0000));
    }

    #[test]
    fn test_breg_missing_register_fails() {
        let ctx = MockContext::new();
        let ops = vec![op(OP_BREG0 + 6, 0, 0)];
        assert_eq!(
            evaluate_script(&ctx, &ops, None, 8),
            Err(EvalError::RegisterRead(6))
        );
    }

    #[test]
    fn test_fbreg_offsets_frame_base() {
        let ctx = MockContext::new()
            .with_instruction_pointer(0x1008)
            .with_register(6, 0x7fff_2000);
        let function = frame_function(vec![LocationScript::everywhere(vec![op(
            OP_BREG0 + 6,
            0,
            0,
        )])]);
        let ops = vec![op(OP_FBREG, (-8i64) as u64, 0)];
        let result = evaluate_script(&ctx, &ops, Some(&function), 8).unwrap();
        assert_eq!(result, StackValue::Address(0x7fff_1ff8));
    }

    #[test]
    fn test_fbreg_register_frame_base() {
        // A frame base that names a register outright: its value is the base
        let ctx = MockContext::new()
            .with_instruction_pointer(0x1008)
            .with_register(7, 0x7fff_3000);
        let function = frame_function(vec![LocationScript::everywhere(vec![op(
            OP_REG0 + 7,
            0,
            0,
        )])]);
        let ops = vec![op(OP_FBREG, 16, 0)];
        let result = evaluate_script(&ctx, &ops, Some(&function), 8).unwrap();
        assert_eq!(result, StackValue::Address(0x7fff_3010));
    }

    #[test]
    fn test_fbreg_without_function_fails() {
        let ctx = MockContext::new();
        let ops = vec![op(OP_FBREG, 8, 0)];
        assert_eq!(
            evaluate_script(&ctx, &ops, None, 8),
            Err(EvalError::MissingFrameContext)
        );
    }

    #[test]
    fn test_deref_reads_target_memory() {
        let ctx = MockContext::new().with_memory(0x2000, &0x3000u64.to_le_bytes());
        let ops = vec![op(OP_ADDR, 0x2000, 0), op(OP_DEREF, 0, 9)];
        let result = evaluate_script(&ctx, &ops, None, 8).unwrap();
        assert_eq!(result, StackValue::Address(0x3000));
    }

    #[test]
    fn test_deref_unmapped_memory_fails() {
        let ctx = MockContext::new();
        let ops = vec![op(OP_ADDR, 0x2000, 0), op(OP_DEREF, 0, 9)];
        assert_eq!(
            evaluate_script(&ctx, &ops, None, 8),
            Err(EvalError::MemoryRead(0x2000))
        );
    }

    #[test]
    fn test_deref_non_address_fails() {
        let ctx = MockContext::new();
        let ops = vec![op(OP_LIT0 + 1, 0, 0), op(OP_DEREF, 0, 1)];
        assert_eq!(
            evaluate_script(&ctx, &ops, None, 8),
            Err(EvalError::TypeMismatch)
        );
    }

    #[test]
    fn test_plus_mismatched_encodings_fail() {
        let ctx = MockContext::new();
        let ops = vec![
            op(OP_ADDR, 0x1000, 0),
            op(OP_LIT0 + 1, 0, 9),
            op(OP_PLUS, 0, 10),
        ];
        assert_eq!(
            evaluate_script(&ctx, &ops, None, 8),
            Err(EvalError::TypeMismatch)
        );
    }

    #[test]
    fn test_plus_underflow_fails() {
        let ctx = MockContext::new();
        let ops = vec![op(OP_PLUS, 0, 0)];
        assert_eq!(
            evaluate_script(&ctx, &ops, None, 8),
            Err(EvalError::StackUnderflow)
        );
    }

    #[test]
    fn test_dup_and_drop() {
        let ctx = MockContext::new();
        let ops = vec![op(OP_LIT0 + 7, 0, 0), op(OP_DUP, 0, 1), op(OP_PLUS, 0, 2)];
        assert_eq!(
            evaluate_script(&ctx, &ops, None, 8).unwrap(),
            StackValue::Unsigned(14)
        );

        let ops = vec![
            op(OP_LIT0 + 1, 0, 0),
            op(OP_LIT0 + 2, 0, 1),
            op(OP_DROP, 0, 2),
        ];
        assert_eq!(
            evaluate_script(&ctx, &ops, None, 8).unwrap(),
            StackValue::Unsigned(1)
        );
    }

    #[test]
    fn test_range_selection_picks_covering_entry() {
        let scripts = vec![
            LocationScript {
                low_pc: 0x1000,
                high_pc: 0x1010,
                ops: vec![op(OP_LIT0 + 1, 0, 0)],
            },
            LocationScript {
                low_pc: 0x1010,
                high_pc: 0x1020,
                ops: vec![op(OP_LIT0 + 2, 0, 0)],
            },
        ];

        let at = |pc: u64| {
            let ctx = MockContext::new().with_instruction_pointer(pc);
            evaluate(&ctx, &scripts, None, 8)
        };

        assert_eq!(at(0x1010).unwrap(), StackValue::Unsigned(2));
        assert_eq!(at(0x100f).unwrap(), StackValue::Unsigned(1));
        assert_eq!(at(0x0fff), Err(EvalError::NoMatchingRange(0x0fff)));
        assert_eq!(at(0x1020), Err(EvalError::NoMatchingRange(0x1020)));
    }

    #[test]
    fn test_sentinel_range_matches_anywhere() {
        let ctx = MockContext::new().with_instruction_pointer(0xdead_beef);
        let scripts = vec![LocationScript {
            low_pc: 0,
            high_pc: 0,
            ops: vec![op(OP_LIT0 + 9, 0, 0)],
        }];
        assert_eq!(
            evaluate(&ctx, &scripts, None, 8).unwrap(),
            StackValue::Unsigned(9)
        );
    }

    #[test]
    fn test_empty_location_list() {
        let ctx = MockContext::new().with_instruction_pointer(0x1000);
        assert_eq!(
            evaluate(&ctx, &[], None, 8),
            Err(EvalError::EmptyLocation)
        );
    }

    #[test]
    fn test_missing_instruction_pointer() {
        let ctx = MockContext::new();
        let scripts = vec![LocationScript::everywhere(vec![op(OP_LIT0, 0, 0)])];
        assert_eq!(
            evaluate(&ctx, &scripts, None, 8),
            Err(EvalError::NoInstructionPointer)
        );
    }

    proptest! {
        #[test]
        fn prop_literal_opcodes_push_their_index(n in 0u8..32) {
            let ctx = MockContext::new();
            let ops = vec![op(OP_LIT0 + n, 0, 0)];
            prop_assert_eq!(
                evaluate_script(&ctx, &ops, None, 8).unwrap(),
                StackValue::Unsigned(n as u64)
            );
        }

        #[test]
        fn prop_breg_applies_signed_offset(value in 0x1000u64..0x8000_0000, offset in -512i64..512) {
            let ctx = MockContext::new().with_register(3, value);
            let ops = vec![op(OP_BREG0 + 3, offset as u64, 0)];
            prop_assert_eq!(
                evaluate_script(&ctx, &ops, None, 8).unwrap(),
                StackValue::Address(value.wrapping_add_signed(offset))
            );
        }
    }
}
