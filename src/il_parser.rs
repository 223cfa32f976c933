//! A lifter from textual IL listings.
//!
//! The expected format is line-based: an `IL_PROGRAM` header section, then one
//! blank-line-separated block per function. A block starts with the function's name, optionally
//! followed by `args <type>...` and `stackptr <arg-index>` lines, then instructions:
//!
//! ```text
//! IL_PROGRAM
//!
//! main
//!     args i64
//!     stackptr 0
//!     %p = add arg0 $8:64 : i64
//!     %c = inttoptr %p : i32*
//!     %v = load %c : i32
//!     store %c %v
//! ```
//!
//! `%name` labels are resolved by the lifter; `arg<k>` names a formal argument and
//! `$<value>:<bits>` a constant. Malformed input panics with context, as the input is expected
//! to be machine-produced.

use crate::containers::unordered::UnorderedMap;
use crate::il::{Function, Inst, Opcode, Operand, Program, Type, ValueRef};
use crate::log::*;

/// Lift a textual IL listing to a program on which layout recovery can be performed.
pub fn lift_from(il_text: &str) -> Program {
    // Sanity check that we have a lift-able listing
    assert!(
        il_text.starts_with("IL_PROGRAM"),
        "Expected an IL_PROGRAM header"
    );

    let mut sections = il_text.trim().split("\n\n");
    let header = sections.next().unwrap().trim();
    assert_eq!(header, "IL_PROGRAM", "Expected a bare IL_PROGRAM header");

    let mut prog = Program::new();
    for block in sections {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        prog.functions.push(parse_function(block));
    }
    info!("Lifted IL program"; "functions" => prog.functions.len());
    prog
}

fn parse_function(block: &str) -> Function {
    let (first, rest) = block.split_once('\n').unwrap_or((block, ""));
    let name = first.trim();
    assert_eq!(
        name.split_whitespace().count(),
        1,
        "Expected a function name, got {:?}",
        first,
    );

    let mut args: Vec<Type> = vec![];
    let mut stackptr: Option<usize> = None;
    let mut func: Option<Function> = None;
    let mut values: UnorderedMap<String, ValueRef> = Default::default();

    for line in rest.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match &*tokens {
            ["args", tys @ ..] => {
                assert!(
                    func.is_none(),
                    "`args` must precede the instructions of {}",
                    name,
                );
                args = tys.iter().map(|ty| parse_type(ty)).collect();
            }
            ["stackptr", idx] => {
                stackptr = Some(
                    idx.parse()
                        .unwrap_or_else(|_| panic!("Expected an argument index, got {:?}", idx)),
                );
            }
            ["store", ptr, val] => {
                let func = func.get_or_insert_with(|| Function::new(name, std::mem::take(&mut args)));
                func.push(Inst {
                    opcode: Opcode::Store,
                    inputs: [parse_operand(ptr, &values), parse_operand(val, &values)],
                    result_ty: None,
                });
            }
            [result, "=", op, operands @ .., ":", ty] => {
                assert!(
                    result.starts_with('%'),
                    "Expected a %-label result, got {:?}",
                    result,
                );
                let opcode = match *op {
                    "add" => Opcode::Add,
                    "sub" => Opcode::Sub,
                    "mul" => Opcode::Mul,
                    "inttoptr" => Opcode::IntToPtr,
                    "load" => Opcode::Load,
                    _ => panic!("Unknown opcode {:?}", op),
                };
                let inputs = match operands {
                    [a] => [parse_operand(a, &values), Operand::Unused],
                    [a, b] => [parse_operand(a, &values), parse_operand(b, &values)],
                    _ => panic!("Expected one or two operands, got {:?}", operands),
                };
                let func = func.get_or_insert_with(|| Function::new(name, std::mem::take(&mut args)));
                let value = func.push(Inst {
                    opcode,
                    inputs,
                    result_ty: Some(parse_type(ty)),
                });
                values.insert(result.to_string(), value);
            }
            l => panic!("Unrecognized IL line {:?} in function {}", l, name),
        }
    }

    let mut func = func.unwrap_or_else(|| Function::new(name, std::mem::take(&mut args)));
    func.md.stack_pointer_argument = stackptr;
    func
}

fn parse_operand(token: &str, values: &UnorderedMap<String, ValueRef>) -> Operand {
    if let Some(idx) = token.strip_prefix("arg") {
        let idx = idx
            .parse()
            .unwrap_or_else(|_| panic!("Expected an argument operand, got {:?}", token));
        Operand::Value(ValueRef::Arg { idx })
    } else if token.starts_with('%') {
        let value = values
            .get(token)
            .unwrap_or_else(|| panic!("Operand {:?} is not defined before use", token));
        Operand::Value(*value)
    } else if let Some(constant) = token.strip_prefix('$') {
        let (value, bits) = constant
            .split_once(':')
            .unwrap_or_else(|| panic!("Expected $<value>:<bits>, got {:?}", token));
        Operand::ConstInt {
            value: value
                .parse()
                .unwrap_or_else(|_| panic!("Expected a constant value, got {:?}", value)),
            bits: bits
                .parse()
                .unwrap_or_else(|_| panic!("Expected a constant width, got {:?}", bits)),
        }
    } else {
        panic!("Unrecognized operand {:?}", token)
    }
}

fn parse_type(token: &str) -> Type {
    if let Some(pointee) = token.strip_suffix('*') {
        return Type::ptr_to(parse_type(pointee));
    }
    match token {
        "float" => Type::Float,
        "double" => Type::Double,
        _ => Type::Int {
            bits: token
                .strip_prefix('i')
                .and_then(|bits| bits.parse().ok())
                .unwrap_or_else(|| panic!("Expected a type, got {:?}", token)),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::analysis_config::AnalysisConfig;
    use crate::locals_analysis::identify_locals;

    const STRUCT_OF_TWO: &str = "IL_PROGRAM

two_fields
\targs i64
\tstackptr 0
\t%p0 = add arg0 $0:64 : i64
\t%p4 = add arg0 $4:64 : i64
\t%c0 = inttoptr %p0 : i32*
\t%c4 = inttoptr %p4 : i8*
\t%v0 = load %c0 : i32
\t%v4 = load %c4 : i8

helper
";

    #[test]
    fn lifts_functions_and_metadata() {
        let prog = lift_from(STRUCT_OF_TWO);
        assert_eq!(prog.functions.len(), 2);

        let f = &prog.functions[0];
        assert_eq!(f.name, "two_fields");
        assert_eq!(f.args, vec![Type::Int { bits: 64 }]);
        assert_eq!(f.md.stack_pointer_argument, Some(0));
        assert_eq!(f.num_insts(), 6);
        assert_eq!(f.users_of(ValueRef::Arg { idx: 0 }), &[0, 1]);

        let helper = &prog.functions[1];
        assert_eq!(helper.name, "helper");
        assert_eq!(helper.md.stack_pointer_argument, None);
    }

    #[test]
    fn lifted_program_round_trips_through_analysis() {
        let prog = lift_from(STRUCT_OF_TWO);
        let report = identify_locals(&prog, &AnalysisConfig::default());
        assert_eq!(report.to_string(), "two_fields: {0: (i32*), 4: (i8*)}\n");
    }

    #[test]
    fn parses_pointer_and_float_types() {
        assert_eq!(parse_type("i8"), Type::Int { bits: 8 });
        assert_eq!(parse_type("double"), Type::Double);
        assert_eq!(
            parse_type("float**"),
            Type::ptr_to(Type::ptr_to(Type::Float))
        );
    }

    #[test]
    #[should_panic]
    fn rejects_undefined_labels() {
        lift_from("IL_PROGRAM\n\nbad\n\t%x = load %nope : i32\n");
    }
}
