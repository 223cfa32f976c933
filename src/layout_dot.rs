//! GraphViz rendering of recovered layout trees, for debugging.
//!
//! Layout nodes only live as long as their function's arena, so trees are snapshotted into a
//! [`DotForest`] while the arena is still alive; the forest renders one `digraph` for the whole
//! run once every function has been analyzed.

use crate::il::Function;
use crate::object_arena::{ObjectArena, ObjectHandle};
use crate::stack_object::{observed_access_types, StackObject};
use itertools::Itertools;

struct DotNode {
    label: String,
    /// Function anchor nodes are drawn as notes, layout nodes with the default shape
    is_function: bool,
}

type Node = usize;
type Edge = (usize, usize, String);

/// Accumulated snapshots of recovered layout trees, one subtree per analyzed function.
pub struct DotForest {
    nodes: Vec<DotNode>,
    edges: Vec<Edge>,
}

impl DotForest {
    /// A new, empty forest
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Snapshot the tree rooted at `root` (owned by `arena`), anchored under a node carrying
    /// the function's name.
    pub fn add_tree(&mut self, arena: &ObjectArena, func: &Function, root: ObjectHandle) {
        let anchor = self.nodes.len();
        self.nodes.push(DotNode {
            label: func.name.clone(),
            is_function: true,
        });
        let root = self.snapshot(arena, func, root);
        self.edges.push((anchor, root, "frame".to_string()));
    }

    fn snapshot(&mut self, arena: &ObjectArena, func: &Function, obj: ObjectHandle) -> usize {
        let this = self.nodes.len();
        match &arena[obj] {
            StackObject::Scalar { pointer_cast } => {
                self.nodes.push(DotNode {
                    label: format!(
                        "({})",
                        observed_access_types(func, *pointer_cast).iter().join(", ")
                    ),
                    is_function: false,
                });
            }
            StackObject::Array {
                element,
                min_known_count,
            } => {
                self.nodes.push(DotNode {
                    label: format!("array (>= {})", min_known_count),
                    is_function: false,
                });
                let element = *element;
                let child = self.snapshot(arena, func, element);
                self.edges.push((this, child, "elem".to_string()));
            }
            StackObject::Struct { fields } => {
                self.nodes.push(DotNode {
                    label: "struct".to_string(),
                    is_function: false,
                });
                for field in fields.clone() {
                    let child = self.snapshot(arena, func, field.ty);
                    self.edges.push((this, child, format!("+{}", field.offset)));
                }
            }
        }
        this
    }

    /// Render the whole forest as a GraphViz `digraph`
    pub fn render(&self) -> String {
        let mut s: Vec<u8> = vec![];
        dot::render(self, &mut s).unwrap();
        String::from_utf8(s).unwrap()
    }
}

impl Default for DotForest {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> dot::Labeller<'a, Node, Edge> for DotForest {
    fn graph_id(&'a self) -> dot::Id<'a> {
        dot::Id::new("IdentifiedLocals").unwrap()
    }
    fn node_id(&'a self, n: &Node) -> dot::Id<'a> {
        dot::Id::new(format!("n{}", n)).unwrap()
    }
    fn node_label<'b>(&'b self, n: &Node) -> dot::LabelText<'b> {
        dot::LabelText::label(self.nodes[*n].label.clone())
    }
    fn node_shape(&'a self, n: &Node) -> Option<dot::LabelText<'a>> {
        self.nodes[*n]
            .is_function
            .then(|| dot::LabelText::label("note"))
    }
    fn edge_label<'b>(&'b self, e: &Edge) -> dot::LabelText<'b> {
        dot::LabelText::label(e.2.clone())
    }
}

impl<'a> dot::GraphWalk<'a, Node, Edge> for DotForest {
    fn nodes(&'a self) -> dot::Nodes<'a, Node> {
        (0..self.nodes.len()).collect::<Vec<_>>().into()
    }
    fn edges(&'a self) -> dot::Edges<'a, Edge> {
        (&self.edges[..]).into()
    }
    fn source(&'a self, e: &Edge) -> Node {
        e.0
    }
    fn target(&'a self, e: &Edge) -> Node {
        e.1
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::{Inst, Opcode, Operand, Type, ValueRef};

    #[test]
    fn forest_renders_one_digraph() {
        let mut func = Function::new("f", vec![Type::Int { bits: 64 }]);
        func.push(Inst {
            opcode: Opcode::IntToPtr,
            inputs: [Operand::Value(ValueRef::Arg { idx: 0 }), Operand::Unused],
            result_ty: Some(Type::ptr_to(Type::Int { bits: 32 })),
        });

        let mut arena = ObjectArena::new();
        let scalar = arena.alloc(StackObject::Scalar { pointer_cast: 0 });
        let root = arena.alloc(StackObject::Struct {
            fields: vec![crate::stack_object::StructField {
                offset: 0,
                ty: scalar,
            }],
        });

        let mut forest = DotForest::new();
        forest.add_tree(&arena, &func, root);
        let rendered = forest.render();
        assert!(rendered.starts_with("digraph IdentifiedLocals"));
        assert!(rendered.contains("struct"));
        assert!(rendered.contains("(i32*)"));
    }
}
