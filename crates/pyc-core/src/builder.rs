//! Programmatic construction of module code objects.
//!
//! The builder collects instructions, constants and names, then lays them
//! out as a code object for the target release. Constants and names are
//! interned in the resulting graph, so a string used twice is stored once
//! and marshalled as a back-reference.

use tracing::debug;

use crate::code::{CodeFlags, CodeObject, CodeVariables};
use crate::error::Result;
use crate::instruction::{encode_instructions, Instruction};
use crate::object::{Object, ObjectGraph, ObjectId};
use crate::opcode::OpcodeTable;
use crate::version::{CodeLayout, PythonVersion};

/// Assembles a module-level code object.
#[derive(Debug, Clone)]
pub struct ProgramBuilder {
    version: PythonVersion,
    table: OpcodeTable,
    graph: ObjectGraph,
    instructions: Vec<Instruction>,
    consts: Vec<ObjectId>,
    names: Vec<ObjectId>,
    depth: u32,
    max_depth: u32,
}

impl ProgramBuilder {
    /// Start a module for `version`, using `table` for opcode values.
    ///
    /// From 3.11 on, code objects open with `RESUME 0`, so the table must
    /// name it.
    pub fn new(version: PythonVersion, table: OpcodeTable) -> Result<Self> {
        let mut builder = Self {
            version,
            table,
            graph: ObjectGraph::new(),
            instructions: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            depth: 0,
            max_depth: 0,
        };
        if version.layout() == CodeLayout::Py311 {
            builder.emit("RESUME", 0)?;
        }
        Ok(builder)
    }

    pub fn version(&self) -> PythonVersion {
        self.version
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Append an instruction followed by its inline cache units.
    pub fn emit(&mut self, mnemonic: &str, arg: u32) -> Result<&mut Self> {
        let opcode = self.table.opcode(mnemonic)?;
        self.instructions.push(Instruction::new(opcode, arg));
        let cache = self.table.opcode("CACHE").unwrap_or(0);
        for _ in 0..self.table.cache_units(opcode) {
            self.instructions.push(Instruction::new(cache, 0));
        }
        Ok(self)
    }

    /// Index of `object` in the constant pool, adding it if needed.
    pub fn add_const(&mut self, object: Object) -> u32 {
        let id = self.graph.intern(object);
        Self::slot(&mut self.consts, id)
    }

    /// Index of `name` in the name table, adding it if needed.
    pub fn add_name(&mut self, name: &str) -> u32 {
        let id = self.graph.intern_str(name, true);
        Self::slot(&mut self.names, id)
    }

    fn slot(pool: &mut Vec<ObjectId>, id: ObjectId) -> u32 {
        let index = match pool.iter().position(|existing| *existing == id) {
            Some(index) => index,
            None => {
                pool.push(id);
                pool.len() - 1
            }
        };
        index as u32
    }

    fn push(&mut self, n: u32) {
        self.depth += n;
        self.max_depth = self.max_depth.max(self.depth);
    }

    fn pop(&mut self, n: u32) {
        self.depth = self.depth.saturating_sub(n);
    }

    /// Emit `print(text)` as a statement.
    pub fn print_str(&mut self, text: &str) -> Result<&mut Self> {
        let name = self.add_name("print");
        let constant = self.add_const(Object::Str {
            text: text.to_string(),
            interned: false,
        });

        match self.version {
            PythonVersion::Py3_7 | PythonVersion::Py3_8 | PythonVersion::Py3_9 | PythonVersion::Py3_10 => {
                self.emit("LOAD_NAME", name)?;
                self.emit("LOAD_CONST", constant)?;
                self.push(2);
                self.emit("CALL_FUNCTION", 1)?;
                self.pop(1);
            }
            PythonVersion::Py3_11 => {
                self.emit("PUSH_NULL", 0)?;
                self.emit("LOAD_NAME", name)?;
                self.emit("LOAD_CONST", constant)?;
                self.push(3);
                self.emit("PRECALL", 1)?;
                self.emit("CALL", 1)?;
                self.pop(2);
            }
            PythonVersion::Py3_12 => {
                self.emit("PUSH_NULL", 0)?;
                self.emit("LOAD_NAME", name)?;
                self.emit("LOAD_CONST", constant)?;
                self.push(3);
                self.emit("CALL", 1)?;
                self.pop(2);
            }
            PythonVersion::Unversioned | PythonVersion::Py3_13 | PythonVersion::Py3_14 => {
                self.emit("LOAD_NAME", name)?;
                self.emit("PUSH_NULL", 0)?;
                self.emit("LOAD_CONST", constant)?;
                self.push(3);
                self.emit("CALL", 1)?;
                self.pop(2);
            }
        }
        self.emit("POP_TOP", 0)?;
        self.pop(1);
        Ok(self)
    }

    /// Finish the module with `return None` and lay it out as a graph whose
    /// root is the module code object.
    pub fn build(mut self, filename: &str, name: &str) -> Result<ObjectGraph> {
        let none = self.add_const(Object::None);
        self.emit("LOAD_CONST", none)?;
        self.push(1);
        self.emit("RETURN_VALUE", 0)?;
        self.pop(1);

        let bytecode = encode_instructions(&self.instructions, &self.table);
        let mut graph = self.graph;
        let code = graph.intern_bytes(&bytecode);
        let consts = graph.intern_tuple(self.consts);
        let names = graph.intern_tuple(self.names);
        let empty_tuple = graph.intern_tuple(Vec::new());
        let empty_bytes = graph.intern_bytes(&[]);
        let filename = graph.intern_str(filename, false);
        let name = graph.intern_str(name, true);

        let layout = self.version.layout();
        let (variables, qualname, exceptiontable, flags) = match layout {
            CodeLayout::Py37 | CodeLayout::Py38 => (
                CodeVariables::Classic {
                    varnames: empty_tuple,
                    freevars: empty_tuple,
                    cellvars: empty_tuple,
                },
                None,
                None,
                CodeFlags::new(CodeFlags::NOFREE),
            ),
            CodeLayout::Py311 => (
                CodeVariables::LocalsPlus {
                    names: empty_tuple,
                    kinds: empty_bytes,
                },
                Some(name),
                Some(empty_bytes),
                CodeFlags::default(),
            ),
        };

        let unit = CodeObject {
            argcount: 0,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            nlocals: 0,
            stacksize: self.max_depth,
            flags,
            code,
            consts,
            names,
            variables,
            filename,
            name,
            qualname,
            firstlineno: 1,
            linetable: empty_bytes,
            exceptiontable,
        };
        let root = graph.add(Object::Code(Box::new(unit)));
        graph.set_root(root);
        debug!(
            version = %self.version,
            instructions = self.instructions.len(),
            bytes = bytecode.len(),
            "built module code object"
        );
        Ok(graph)
    }
}
