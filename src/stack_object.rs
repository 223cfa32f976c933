//! The recovered layout tree describing the shape of memory reachable from a base value.

use crate::containers::InsertionOrderedSet;
use crate::il::{Function, Opcode, Operand, Type};
use crate::object_arena::{ObjectArena, ObjectHandle};
use itertools::Itertools;

/// One node of a layout tree. Nodes are owned by the [`ObjectArena`] of the function being
/// analyzed and refer to each other through handles into the same arena.
#[derive(Clone, Debug)]
pub enum StackObject {
    /// A scalar location, observed through at least one pointer cast of its base value.
    Scalar {
        /// The cast instruction through which the location was accessed as a typed pointer. When
        /// the base value is cast more than once, this is the last cast in use-list order; the
        /// full set of observed access types is recovered from it via
        /// [`observed_access_types`].
        pointer_cast: usize,
    },
    /// A homogeneous run of elements.
    Array {
        /// The shape of one element
        element: ObjectHandle,
        /// Minimum element count, inferred from the highest observed index
        min_known_count: u64,
    },
    /// A record with fields at fixed offsets.
    Struct {
        /// The fields, strictly ascending by offset, with the first field's offset normalized
        /// to 0 and all non-zero offsets sharing one sign.
        fields: Vec<StructField>,
    },
}

/// One field of a [`StackObject::Struct`] node.
#[derive(Clone, Copy, Debug)]
pub struct StructField {
    /// Offset of this field relative to the first field of the record
    pub offset: i64,
    /// The field's own recovered shape
    pub ty: ObjectHandle,
}

/// The distinct types under which a scalar location was accessed, in the order each was first
/// observed. Gathered by walking every pointer cast applied to the same base value as the
/// scalar's recorded cast.
///
/// Never empty: a scalar node exists only because at least one cast was observed.
pub fn observed_access_types(func: &Function, pointer_cast: usize) -> Vec<Type> {
    let cast = func.inst(pointer_cast);
    assert_eq!(cast.opcode, Opcode::IntToPtr);

    let mut types = InsertionOrderedSet::new();
    match &cast.inputs[0] {
        Operand::Value(base) => {
            for &user in func.users_of(*base) {
                let inst = func.inst(user);
                if inst.opcode == Opcode::IntToPtr {
                    types.insert(inst.result_ty.clone().unwrap());
                }
            }
        }
        _ => {
            // A cast of a constant address has no sibling casts to gather; its own target type
            // is the whole set.
            types.insert(cast.result_ty.clone().unwrap());
        }
    }
    assert!(!types.is_empty());
    types.into_vec()
}

/// Renders a layout tree in the report format: scalars as `(T1, T2)`, arrays as
/// `[count x element]`, structs as `{offset: type, ...}` in ascending offset order.
pub struct PrintableObject<'a> {
    arena: &'a ObjectArena,
    func: &'a Function,
    root: ObjectHandle,
}

impl<'a> PrintableObject<'a> {
    pub fn new(arena: &'a ObjectArena, func: &'a Function, root: ObjectHandle) -> Self {
        Self { arena, func, root }
    }

    fn fmt_object(&self, f: &mut std::fmt::Formatter, obj: ObjectHandle) -> std::fmt::Result {
        match &self.arena[obj] {
            StackObject::Scalar { pointer_cast } => {
                write!(
                    f,
                    "({})",
                    observed_access_types(self.func, *pointer_cast)
                        .iter()
                        .join(", ")
                )
            }
            StackObject::Array {
                element,
                min_known_count,
            } => {
                write!(f, "[{} x ", min_known_count)?;
                self.fmt_object(f, *element)?;
                write!(f, "]")
            }
            StackObject::Struct { fields } => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: ", field.offset)?;
                    self.fmt_object(f, field.ty)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl std::fmt::Display for PrintableObject<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.fmt_object(f, self.root)
    }
}
