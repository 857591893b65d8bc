//! End-to-end tests of the lowering pipeline.
//!
//! Each test builds a function the way the front end would, runs the full
//! pass sequence and checks the emitted program, including the exact move
//! sequences the allocator inserts for spill and range repair.

use bclower::ir::{Imm, IntrinsicOp, OperandKind, ResultDst};
use bclower::passes::lower_function;
use bclower::{
    CompilationSession, CompileError, CompileOptions, Insn, IrFunction, Op, Operand,
    ProgramBuilder, VReg,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn session() -> CompilationSession {
    CompilationSession::new(CompileOptions::default())
}

fn reg_indices(func: &IrFunction, insn: &Insn) -> Vec<u32> {
    insn.operands
        .iter()
        .filter_map(|operand| match operand {
            Operand::Reg(reg) => func.pool.index(*reg),
            _ => None,
        })
        .collect()
}

#[test]
fn spill_sequence_for_oversized_registers() {
    init_logging();
    let session = session();
    let mut func = IrFunction::new("spill", 0);
    let locals: Vec<VReg> = (0..300).map(|_| func.new_local()).collect();
    func.add(Insn::sta(locals[299]));
    func.add(Insn::lda(locals[299]));
    func.add(Insn::return_undefined());

    lower_function(&mut func, &session).unwrap();

    let shape: Vec<(&str, Vec<u32>)> = func
        .insns
        .iter()
        .map(|insn| (insn.mnemonic(), reg_indices(&func, insn)))
        .collect();
    // Store repair, then load repair, reusing the same spill slot.
    let expected: Vec<(&str, Vec<u32>)> = vec![
        ("mov.dyn", vec![300, 0]),
        ("sta.dyn", vec![0]),
        ("mov.dyn", vec![299, 0]),
        ("mov.dyn", vec![0, 300]),
        ("mov.dyn", vec![300, 0]),
        ("mov.dyn", vec![0, 299]),
        ("lda.dyn", vec![0]),
        ("mov.dyn", vec![0, 300]),
        ("return.undefined", vec![]),
    ];
    assert_eq!(shape, expected);
    assert_eq!(func.total_regs, 301);
}

#[test]
fn range_call_gets_a_contiguous_block() {
    init_logging();
    let session = session();
    let mut func = IrFunction::new("range", 0);
    let locals: Vec<VReg> = (0..300).map(|_| func.new_local()).collect();
    let mut operands = vec![Operand::Imm(Imm::Int(0)), Operand::Imm(Imm::Int(4))];
    operands.extend(locals[296..300].iter().map(|&r| Operand::Reg(r)));
    func.add(Insn::new(Op::CalliDynRange, operands));

    lower_function(&mut func, &session).unwrap();

    let call = func
        .insns
        .iter()
        .find(|insn| insn.op == Op::CalliDynRange)
        .expect("range call survives");
    assert_eq!(reg_indices(&func, call), vec![0, 1, 2, 3]);

    // 2 moves per slot in, 1 per slot out.
    let moves = func
        .insns
        .iter()
        .filter(|insn| insn.op == Op::MovDyn)
        .count();
    assert_eq!(moves, 12);
    assert_eq!(session.stats().moves_inserted, 12);
}

#[test]
fn mixed_operand_wide_call_is_block_repaired() {
    init_logging();
    let session = session();
    let mut func = IrFunction::new("wide", 0);
    let locals: Vec<VReg> = (0..4).map(|_| func.new_local()).collect();
    // Five arguments force call.range; the immediate is materialized into a
    // temporary whose index lands after every local, scattering the block.
    func.add(Insn::new(
        Op::Intrinsic(IntrinsicOp::new(
            "callSpread",
            vec![
                OperandKind::SrcReg,
                OperandKind::Imm,
                OperandKind::SrcReg,
                OperandKind::SrcReg,
                OperandKind::SrcReg,
            ],
            ResultDst::Acc,
        )),
        vec![
            Operand::Reg(locals[0]),
            Operand::Imm(Imm::Int(7)),
            Operand::Reg(locals[1]),
            Operand::Reg(locals[2]),
            Operand::Reg(locals[3]),
        ],
    ));

    lower_function(&mut func, &session).unwrap();

    let call = func
        .insns
        .iter()
        .find(|insn| insn.op == Op::CallRange)
        .expect("range call");
    assert_eq!(reg_indices(&func, call), vec![0, 1, 2, 3, 4]);
}

#[test]
fn interleaved_temp_release_breaks_range_contiguity() {
    init_logging();
    let session = session();
    let mut func = IrFunction::new("broken_range", 0);
    let temps: Vec<VReg> = (0..6).map(|_| func.get_temp()).collect();
    let mut operands = vec![Operand::Imm(Imm::Int(0)), Operand::Imm(Imm::Int(6))];
    operands.extend(temps.iter().map(|&r| Operand::Reg(r)));
    func.add(Insn::new(Op::CalliDynRange, operands));
    // Free pool order now differs from creation order, so the assigned
    // indices of the call operands cannot be consecutive.
    func.free_temps([temps[1]]);
    func.free_temps([temps[3]]);
    func.free_temps([temps[5]]);
    func.free_temps([temps[0], temps[2], temps[4]]);

    let err = lower_function(&mut func, &session).unwrap_err();
    assert!(matches!(err, CompileError::SequenceNotContinuous { .. }));
}

#[test]
fn inline_cache_overflow_still_compiles() {
    init_logging();
    let session = session();
    let mut func = IrFunction::new("big_ic", 0);
    let v = func.new_local();
    for _ in 0..9000 {
        func.add(Insn::new(
            Op::Intrinsic(
                IntrinsicOp::new("ldObjByName", vec![OperandKind::SrcReg], ResultDst::Acc)
                    .with_ic(8),
            ),
            vec![Operand::Reg(v)],
        ));
    }

    lower_function(&mut func, &session).unwrap();
    assert!(func.ic_size >= 0xFFFF);

    let mut builder = ProgramBuilder::new(&session);
    builder.add_function(&func).unwrap();
    let program = builder.finish();
    assert_eq!(program.functions[0].ic_size, func.ic_size);
}

#[test]
fn whole_program_emission() {
    init_logging();
    let session = CompilationSession::new(CompileOptions {
        debug_mode: true,
        ..CompileOptions::default()
    });

    let mut func = IrFunction::new("main", 1);
    func.source_file = "snippet.js".into();
    let p = func.new_local();
    let scope = func.open_scope();
    let (begin, end) = (func.new_label(), func.new_label());
    let handler = func.new_label();
    func.add(Insn::label(begin));
    func.add(Insn::new(
        Op::Intrinsic(IntrinsicOp::new(
            "stGlobalVar",
            vec![OperandKind::Id, OperandKind::SrcReg],
            ResultDst::None,
        )),
        vec![Operand::Str("answer".into()), Operand::Reg(p)],
    ));
    func.add(Insn::label(end));
    func.add(Insn::label(handler));
    func.add(Insn::return_undefined());
    func.add_catch_region(begin, end, handler);
    func.close_scope(scope, vec![("p".into(), p)]);

    lower_function(&mut func, &session).unwrap();

    let mut builder = ProgramBuilder::new(&session);
    builder.add_function(&func).unwrap();
    let program = builder.finish();

    assert_eq!(program.intrinsics.len(), 1);
    assert_eq!(program.intrinsics[0].name, "stGlobalVar");

    let emitted = &program.functions[0];
    assert_eq!(emitted.name, "main");
    assert_eq!(emitted.signature.params, 1);
    assert_eq!(emitted.source_file, "snippet.js");
    assert_eq!(emitted.catch_tables.len(), 1);
    assert_eq!(emitted.catch_tables[0].catch_begin, "LABEL_2");
    assert_eq!(emitted.labels, vec!["LABEL_0", "LABEL_1", "LABEL_2"]);

    let variables = emitted.variables.as_ref().expect("debug variables");
    assert_eq!(variables[0].name, "p");

    // Byte spans tile the emitted stream. Labels alias the span of the
    // instruction behind them, so they are skipped here.
    let mut offset = 0;
    for ins in &emitted.ins {
        if ins.op == "label" {
            continue;
        }
        assert_eq!(ins.debug_pos_info.bound_left, Some(offset));
        offset = ins.debug_pos_info.bound_right.unwrap();
    }

    let json = serde_json::to_string_pretty(&program).unwrap();
    assert!(json.contains("Ecmascript.Intrinsics.stGlobalVar"));
}
