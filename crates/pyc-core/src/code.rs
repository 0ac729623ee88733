//! Code objects.
//!
//! A code object's scalar fields are stored inline; everything marshal
//! writes as a nested object (bytecode, constants, name tuples, tables) is
//! referenced by [`ObjectId`] so that it can be shared with the rest of the
//! graph.

use serde::{Deserialize, Serialize};

use crate::object::{Object, ObjectGraph, ObjectId};
use crate::version::CodeLayout;

/// `co_flags` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeFlags {
    pub bits: u32,
}

impl CodeFlags {
    pub const OPTIMIZED: u32 = 0x0001;
    pub const NEWLOCALS: u32 = 0x0002;
    pub const VARARGS: u32 = 0x0004;
    pub const VARKEYWORDS: u32 = 0x0008;
    pub const NESTED: u32 = 0x0010;
    pub const GENERATOR: u32 = 0x0020;
    /// Dropped from module code objects in 3.11.
    pub const NOFREE: u32 = 0x0040;
    pub const COROUTINE: u32 = 0x0080;
    pub const ITERABLE_COROUTINE: u32 = 0x0100;
    pub const ASYNC_GENERATOR: u32 = 0x0200;

    const NAMES: [(u32, &'static str); 10] = [
        (Self::OPTIMIZED, "OPTIMIZED"),
        (Self::NEWLOCALS, "NEWLOCALS"),
        (Self::VARARGS, "VARARGS"),
        (Self::VARKEYWORDS, "VARKEYWORDS"),
        (Self::NESTED, "NESTED"),
        (Self::GENERATOR, "GENERATOR"),
        (Self::NOFREE, "NOFREE"),
        (Self::COROUTINE, "COROUTINE"),
        (Self::ITERABLE_COROUTINE, "ITERABLE_COROUTINE"),
        (Self::ASYNC_GENERATOR, "ASYNC_GENERATOR"),
    ];

    pub fn new(bits: u32) -> Self {
        Self { bits }
    }

    pub fn has(&self, flag: u32) -> bool {
        self.bits & flag != 0
    }

    pub fn set(&mut self, flag: u32) {
        self.bits |= flag;
    }

    /// Names of the set flags, for listings.
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.has(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

/// Local-variable naming, which changed shape in 3.11.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeVariables {
    /// 3.7 to 3.10: three separate name tuples.
    Classic {
        varnames: ObjectId,
        freevars: ObjectId,
        cellvars: ObjectId,
    },
    /// 3.11 and later: one name tuple plus a bytes object of per-name kinds.
    LocalsPlus { names: ObjectId, kinds: ObjectId },
}

impl CodeVariables {
    fn ids(&self) -> Vec<ObjectId> {
        match self {
            CodeVariables::Classic {
                varnames,
                freevars,
                cellvars,
            } => vec![*varnames, *freevars, *cellvars],
            CodeVariables::LocalsPlus { names, kinds } => vec![*names, *kinds],
        }
    }
}

/// A marshalled code object, independent of the on-disk field order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeObject {
    pub argcount: u32,
    pub posonlyargcount: u32,
    pub kwonlyargcount: u32,
    /// Only stored by layouts before 3.11.
    pub nlocals: u32,
    pub stacksize: u32,
    pub flags: CodeFlags,
    pub code: ObjectId,
    pub consts: ObjectId,
    pub names: ObjectId,
    pub variables: CodeVariables,
    pub filename: ObjectId,
    pub name: ObjectId,
    pub qualname: Option<ObjectId>,
    pub firstlineno: u32,
    /// `co_lnotab` before 3.10, `co_linetable` afterwards.
    pub linetable: ObjectId,
    pub exceptiontable: Option<ObjectId>,
}

impl CodeObject {
    /// Nested object ids in marshal order.
    pub fn children(&self) -> Vec<ObjectId> {
        let mut ids = vec![self.code, self.consts, self.names];
        ids.extend(self.variables.ids());
        ids.push(self.filename);
        ids.push(self.name);
        ids.extend(self.qualname);
        ids.push(self.linetable);
        ids.extend(self.exceptiontable);
        ids
    }

    /// Scalar fields and layout shape agree; child ids are not compared.
    pub(crate) fn shape_eq(&self, other: &CodeObject) -> bool {
        self.argcount == other.argcount
            && self.posonlyargcount == other.posonlyargcount
            && self.kwonlyargcount == other.kwonlyargcount
            && self.nlocals == other.nlocals
            && self.stacksize == other.stacksize
            && self.flags == other.flags
            && self.firstlineno == other.firstlineno
            && self.qualname.is_some() == other.qualname.is_some()
            && self.exceptiontable.is_some() == other.exceptiontable.is_some()
            && matches!(
                (&self.variables, &other.variables),
                (CodeVariables::Classic { .. }, CodeVariables::Classic { .. })
                    | (CodeVariables::LocalsPlus { .. }, CodeVariables::LocalsPlus { .. })
            )
    }
}

impl ObjectGraph {
    /// A graph holding one code object with no instructions, constants or
    /// names, laid out for `layout`.
    pub fn empty_unit(layout: CodeLayout) -> ObjectGraph {
        let mut graph = ObjectGraph::new();
        let empty_tuple = graph.intern_tuple(Vec::new());
        let empty_bytes = graph.intern_bytes(&[]);
        let empty_str = graph.intern_str("", false);
        let newer = layout == CodeLayout::Py311;
        let variables = if newer {
            CodeVariables::LocalsPlus {
                names: empty_tuple,
                kinds: empty_bytes,
            }
        } else {
            CodeVariables::Classic {
                varnames: empty_tuple,
                freevars: empty_tuple,
                cellvars: empty_tuple,
            }
        };
        let unit = CodeObject {
            argcount: 0,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            nlocals: 0,
            stacksize: 0,
            flags: CodeFlags::default(),
            code: empty_bytes,
            consts: empty_tuple,
            names: empty_tuple,
            variables,
            filename: empty_str,
            name: empty_str,
            qualname: newer.then_some(empty_str),
            firstlineno: 0,
            linetable: empty_bytes,
            exceptiontable: newer.then_some(empty_bytes),
        };
        let root = graph.add(Object::Code(Box::new(unit)));
        graph.set_root(root);
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(graph: &mut ObjectGraph) -> CodeObject {
        let code = graph.intern_bytes(&[0x97, 0x00]);
        let empty = graph.intern_tuple(vec![]);
        let kinds = graph.intern_bytes(&[]);
        let filename = graph.intern_str("<stdin>", false);
        let name = graph.intern_str("<module>", true);
        CodeObject {
            argcount: 0,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            nlocals: 0,
            stacksize: 1,
            flags: CodeFlags::default(),
            code,
            consts: empty,
            names: empty,
            variables: CodeVariables::LocalsPlus { names: empty, kinds },
            filename,
            name,
            qualname: Some(name),
            firstlineno: 1,
            linetable: kinds,
            exceptiontable: Some(kinds),
        }
    }

    #[test]
    fn flags_basic() {
        let mut flags = CodeFlags::new(CodeFlags::NOFREE);
        assert!(flags.has(CodeFlags::NOFREE));
        assert!(!flags.has(CodeFlags::GENERATOR));
        flags.set(CodeFlags::GENERATOR);
        assert_eq!(flags.bits, 0x60);
        assert_eq!(flags.names(), vec!["GENERATOR", "NOFREE"]);
    }

    #[test]
    fn children_follow_marshal_order() {
        let mut graph = ObjectGraph::new();
        let code = sample(&mut graph);
        let children = code.children();
        assert_eq!(children.first(), Some(&code.code));
        assert_eq!(children.last(), code.exceptiontable.as_ref());
        assert_eq!(children.len(), 10);
    }

    #[test]
    fn code_object_is_a_graph_node() {
        let mut graph = ObjectGraph::new();
        let code = sample(&mut graph);
        let root = graph.add(Object::Code(Box::new(code)));
        graph.set_root(root);
        assert_eq!(graph.code_objects().len(), 1);
        // the empty tuple is shared by consts, names and localsplusnames
        let empty = graph.code_objects()[0].1.consts;
        assert_eq!(graph.reference_counts()[empty.index()], 3);
    }

    #[test]
    fn empty_unit_per_layout() {
        let newer = ObjectGraph::empty_unit(CodeLayout::Py311);
        let code = newer.code_objects()[0].1.clone();
        assert!(code.qualname.is_some());
        assert!(matches!(code.variables, CodeVariables::LocalsPlus { .. }));
        assert_eq!(newer[code.code].as_bytes(), Some(&[][..]));

        let older = ObjectGraph::empty_unit(CodeLayout::Py38);
        let code = older.code_objects()[0].1.clone();
        assert!(code.exceptiontable.is_none());
        assert!(matches!(code.variables, CodeVariables::Classic { .. }));
    }
}
