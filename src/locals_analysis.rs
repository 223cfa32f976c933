//! Recovery of the structured layout of a function's stack frame, purely from how the
//! designated stack-pointer argument is used within the function body.
//!
//! A "base value" is an SSA value that holds a stack-frame-relative address. Examples would be
//! the stack pointer itself, `sp+N` for a constant `N`, or a pointer cast of either. A base
//! value is expected to:
//!
//! * have variable offsets added to it (making it an array);
//! * have constant offsets added to it (making it a structure);
//! * be cast so that it can be loaded from / stored to (giving it a specific type).
//!
//! When a base value is used in several of these ways at once, two rules disambiguate:
//!
//! * offset by a variable anywhere: treat it as an array;
//! * offset only by constant values: treat it as a structure.
//!
//! SSA form rarely lets one non-array pointer value be offset sometimes by a constant and
//! sometimes by a variable: with `struct { int x, y; int z[20]; }` on the stack, accesses to
//! `z` compute `(sp+8)+i`, and it is `sp+8` that behaves as the array. Structures that *begin*
//! with an array can still be misrepresented by this rule.
//!
//! Loads and stores are not examined directly. They apply to pointer casts, each cast becomes a
//! new base value, and casts are usually only loaded from / stored to; the recursion therefore
//! produces structures and arrays, with casts supplying the scalar leaf types.

use std::collections::BTreeMap;

use crate::analysis_config::AnalysisConfig;
use crate::il::{Function, Opcode, Operand, Program, ValueRef};
use crate::layout_dot::DotForest;
use crate::log::*;
use crate::object_arena::{ObjectArena, ObjectHandle};
use crate::stack_object::{PrintableObject, StackObject, StructField};

/// The direct uses of one base value, partitioned by what they tell us about its shape.
#[derive(Debug, Default)]
pub struct ObjectUses {
    /// The pointer cast applied directly to the base value, if any. When several casts exist,
    /// the last one in use-list order wins.
    pub cast_target: Option<usize>,
    /// Additions of a compile-time-constant offset, keyed by offset. The first addition
    /// observed for a given offset wins.
    pub constant_offsets: BTreeMap<i64, usize>,
    /// Additions of a non-constant offset, keyed by stride. Recognized but never populated:
    /// the classifier currently gives up on the whole base value instead (see
    /// [`analyze_object`]), so array element recovery from these remains an extension point.
    pub variable_offset_strides: BTreeMap<i64, usize>,
}

/// Inspect every direct use of `base` and classify it. Returns `None` when a use falls outside
/// the supported patterns: any binary integer arithmetic other than addition, or an addition
/// whose other operand is not a compile-time constant. A `None` poisons the entire base value,
/// not just the offending use; a partial classification would be misreported downstream as a
/// complete structure.
pub fn analyze_object(func: &Function, base: ValueRef) -> Option<ObjectUses> {
    let mut uses = ObjectUses::default();
    for &user in func.users_of(base) {
        let inst = func.inst(user);
        if inst.opcode.is_int_arithmetic() {
            if inst.opcode != Opcode::Add {
                debug!(
                    "Unsupported arithmetic on base value";
                    "base" => ?base,
                    "opcode" => ?inst.opcode,
                    "inst" => user,
                );
                return None;
            }
            let other = if inst.inputs[0] == Operand::Value(base) {
                &inst.inputs[1]
            } else {
                &inst.inputs[0]
            };
            match other.as_const_int() {
                Some(offset) => {
                    uses.constant_offsets.entry(offset).or_insert(user);
                }
                None => {
                    debug!(
                        "Non-constant offset from base value; array recovery not implemented";
                        "base" => ?base,
                        "inst" => user,
                    );
                    return None;
                }
            }
        } else if inst.opcode == Opcode::IntToPtr {
            uses.cast_target = Some(user);
        }
        // Everything else (the base stored as data, compared, ...) says nothing about the
        // frame shape and is ignored.
    }
    Some(uses)
}

/// Recursively build the layout observed at `base`, or `None` if its uses are unsupported or
/// yield nothing interpretable.
///
/// Constant offsets become struct fields: offsets are checked for sign consistency (an earlier
/// pass has normalized stack arithmetic into one direction, so mixed signs are an upstream
/// contract violation), normalized so the smallest offset becomes the record's own zero, and
/// each offset's addition result is recursed into as a fresh base value. A directly-applied
/// pointer cast is folded in as an implicit field at offset 0. A field whose recursive build
/// yields nothing is omitted; the enclosing record survives.
pub fn read_object(
    arena: &mut ObjectArena,
    func: &Function,
    base: ValueRef,
) -> Option<ObjectHandle> {
    let uses = analyze_object(func, base)?;

    let direct = uses
        .cast_target
        .map(|cast| arena.alloc(StackObject::Scalar { pointer_cast: cast }));

    if !uses.variable_offset_strides.is_empty() {
        // Variable strides mean an array. Element recovery from strides is not implemented,
        // and a struct interpretation here would be wrong, so give up on this base value.
        debug!(
            "Variable-stride indexing observed; array recovery not implemented";
            "base" => ?base,
        );
        return None;
    }

    // A structure, possibly with the directly-cast scalar as its first field.
    let mut constant_offsets: BTreeMap<i64, Option<usize>> = uses
        .constant_offsets
        .into_iter()
        .map(|(offset, inst)| (offset, Some(inst)))
        .collect();
    if direct.is_some() {
        // The sentinel must not displace a real addition at offset 0.
        constant_offsets.entry(0).or_insert(None);
    }

    if !constant_offsets.is_empty() {
        let front = *constant_offsets.keys().next().unwrap();
        let back = *constant_offsets.keys().next_back().unwrap();
        assert!(
            front == 0 || back == 0 || (front < 0) == (back < 0),
            "Constant offsets from {:?} in {} mix signs ({} and {}); \
             stack arithmetic was not normalized upstream",
            base,
            func.name,
            front,
            back,
        );

        let mut fields = Vec::new();
        for (&offset, &inst) in constant_offsets.iter() {
            let child = match inst {
                None => direct,
                Some(inst) => read_object(arena, func, ValueRef::Inst { idx: inst }),
            };
            if let Some(child) = child {
                fields.push(StructField {
                    offset: offset - front,
                    ty: child,
                });
            }
        }
        if fields.is_empty() {
            return None;
        }
        return Some(arena.alloc(StackObject::Struct { fields }));
    }

    direct
}

/// Collapse the single-field wrapper records that [`read_object`]'s fold-in step produces even
/// when no real nesting is present: a record with exactly one field at offset zero carries no
/// layout information beyond the field's own type, and is replaced by that type. Applied
/// recursively to fields and array elements; idempotent.
pub fn simplify_trivial_structures(
    arena: &mut ObjectArena,
    obj: Option<ObjectHandle>,
) -> Option<ObjectHandle> {
    obj.map(|obj| simplify(arena, obj))
}

fn simplify(arena: &mut ObjectArena, mut obj: ObjectHandle) -> ObjectHandle {
    // Unwrap any chain of trivial wrappers around this node.
    while let StackObject::Struct { fields } = &arena[obj] {
        if fields.len() == 1 && fields[0].offset == 0 {
            obj = fields[0].ty;
        } else {
            break;
        }
    }

    match arena[obj].clone() {
        StackObject::Scalar { .. } => {}
        StackObject::Array {
            element,
            min_known_count,
        } => {
            let element = simplify(arena, element);
            arena[obj] = StackObject::Array {
                element,
                min_known_count,
            };
        }
        StackObject::Struct { mut fields } => {
            for field in fields.iter_mut() {
                field.ty = simplify(arena, field.ty);
            }
            arena[obj] = StackObject::Struct { fields };
        }
    }
    obj
}

/// What layout recovery concluded for one function. Purely advisory; the function's IR is never
/// modified.
#[derive(Debug, PartialEq, Eq)]
pub enum LayoutOutcome {
    /// No stack-pointer argument was designated upstream; the function is out of scope for this
    /// pass.
    NotAnalyzed,
    /// The stack pointer's uses were unsupported or yielded nothing interpretable.
    NoLayout,
    /// A layout was recovered; rendered per [`PrintableObject`].
    Layout(String),
}

/// Per-function results of layout recovery over a whole program.
#[derive(Debug)]
pub struct IdentifiedLocals {
    /// One entry per function, in program order: the function's name and its outcome.
    pub layouts: Vec<(String, LayoutOutcome)>,
    /// GraphViz rendering of all recovered trees, when requested via
    /// [`AnalysisConfig::collect_graphviz`].
    pub graphviz: Option<String>,
}

impl std::fmt::Display for IdentifiedLocals {
    /// The report: `name: <tree>` per recovered layout, `name: ` for functions where nothing
    /// was found, nothing at all for functions that were not analyzed.
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for (name, outcome) in &self.layouts {
            match outcome {
                LayoutOutcome::NotAnalyzed => {}
                LayoutOutcome::NoLayout => writeln!(f, "{}: ", name)?,
                LayoutOutcome::Layout(rendered) => writeln!(f, "{}: {}", name, rendered)?,
            }
        }
        Ok(())
    }
}

/// Run layout recovery over every function of `prog`. Functions are independent; each gets a
/// fresh arena that is dropped as soon as its result has been rendered.
pub fn identify_locals(prog: &Program, config: &AnalysisConfig) -> IdentifiedLocals {
    let mut forest = config.collect_graphviz.then(DotForest::new);
    let layouts = prog
        .functions
        .iter()
        .map(|func| {
            (
                func.name.clone(),
                analyze_function(func, config, forest.as_mut()),
            )
        })
        .collect();
    IdentifiedLocals {
        layouts,
        graphviz: forest.map(|forest| forest.render()),
    }
}

/// Analyze a single function: locate the designated stack-pointer argument, build and simplify
/// the layout tree in a fresh arena, render the result, and release the arena.
pub fn analyze_function(
    func: &Function,
    config: &AnalysisConfig,
    forest: Option<&mut DotForest>,
) -> LayoutOutcome {
    let base = match stack_pointer_argument(func) {
        Some(base) => base,
        None => {
            trace!("No stack pointer designated; skipping"; "function" => &func.name);
            return LayoutOutcome::NotAnalyzed;
        }
    };

    let mut arena = ObjectArena::new();
    let root = read_object(&mut arena, func, base);
    let root = if config.simplify_trivial_wrappers {
        simplify_trivial_structures(&mut arena, root)
    } else {
        root
    };

    match root {
        Some(root) => {
            if let Some(forest) = forest {
                forest.add_tree(&arena, func, root);
            }
            let rendered = PrintableObject::new(&arena, func, root).to_string();
            debug!("Recovered frame layout"; "function" => &func.name, "layout" => &rendered);
            LayoutOutcome::Layout(rendered)
        }
        None => {
            debug!("No frame layout found"; "function" => &func.name);
            LayoutOutcome::NoLayout
        }
    }
}

/// The designated stack-pointer argument from the function's metadata, if one was designated
/// and actually names a formal argument.
fn stack_pointer_argument(func: &Function) -> Option<ValueRef> {
    let idx = func.md.stack_pointer_argument?;
    if idx >= func.args.len() {
        warn!(
            "Designated stack-pointer argument is out of bounds";
            "function" => &func.name,
            "index" => idx,
            "num_args" => func.args.len(),
        );
        return None;
    }
    Some(ValueRef::Arg { idx })
}
