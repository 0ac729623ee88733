//! Human-readable rendering of objects and instruction streams.

use std::fmt::Write;

use crate::code::{CodeObject, CodeVariables};
use crate::error::{CoreError, Result};
use crate::instruction::decode_instructions;
use crate::object::{Object, ObjectGraph, ObjectId};
use crate::opcode::OpcodeTable;
use crate::version::PythonVersion;

const MAX_RENDER_DEPTH: usize = 4;
const MAX_RENDER_ITEMS: usize = 8;

/// Short Python-like representation of an object.
pub fn render(graph: &ObjectGraph, id: ObjectId) -> String {
    let mut out = String::new();
    render_into(graph, id, 0, &mut out);
    out
}

fn render_into(graph: &ObjectGraph, id: ObjectId, depth: usize, out: &mut String) {
    let Some(object) = graph.get(id) else {
        let _ = write!(out, "<missing {id}>");
        return;
    };
    if depth > MAX_RENDER_DEPTH {
        out.push_str("...");
        return;
    }
    let _ = match object {
        Object::Null => write!(out, "<null>"),
        Object::None => write!(out, "None"),
        Object::StopIteration => write!(out, "StopIteration"),
        Object::Ellipsis => write!(out, "Ellipsis"),
        Object::Bool(true) => write!(out, "True"),
        Object::Bool(false) => write!(out, "False"),
        Object::Int(v) => write!(out, "{v}"),
        Object::Int64(v) => write!(out, "{v}"),
        Object::Long(long) => match long.to_i128() {
            Some(v) => write!(out, "{v}"),
            None => write!(out, "<long of {} digits>", long.digits.len()),
        },
        Object::Float(v) => write!(out, "{v:?}"),
        Object::Complex { re, im } => write!(out, "({re:?}+{im:?}j)"),
        Object::Bytes(bytes) => write!(out, "b{:?}", String::from_utf8_lossy(bytes)),
        Object::Str { text, .. } => write!(out, "{text:?}"),
        Object::Tuple(items) => {
            render_seq(graph, items, ("(", ")"), depth, out);
            if items.len() == 1 {
                out.insert(out.len() - 1, ',');
            }
            Ok(())
        }
        Object::List(items) => {
            render_seq(graph, items, ("[", "]"), depth, out);
            Ok(())
        }
        Object::Set(items) => {
            render_seq(graph, items, ("{", "}"), depth, out);
            Ok(())
        }
        Object::FrozenSet(items) => {
            out.push_str("frozenset(");
            render_seq(graph, items, ("{", "}"), depth, out);
            out.push(')');
            Ok(())
        }
        Object::Dict(pairs) => {
            out.push('{');
            for (i, (key, value)) in pairs.iter().enumerate() {
                if i == MAX_RENDER_ITEMS {
                    out.push_str(", ...");
                    break;
                }
                if i > 0 {
                    out.push_str(", ");
                }
                render_into(graph, *key, depth + 1, out);
                out.push_str(": ");
                render_into(graph, *value, depth + 1, out);
            }
            out.push('}');
            Ok(())
        }
        Object::Code(code) => {
            let name = graph.get(code.name).and_then(Object::as_str).unwrap_or("?");
            write!(out, "<code {name} {id}>")
        }
    };
}

fn render_seq(
    graph: &ObjectGraph,
    items: &[ObjectId],
    (open, close): (&str, &str),
    depth: usize,
    out: &mut String,
) {
    out.push_str(open);
    for (i, item) in items.iter().enumerate() {
        if i == MAX_RENDER_ITEMS {
            out.push_str(", ...");
            break;
        }
        if i > 0 {
            out.push_str(", ");
        }
        render_into(graph, *item, depth + 1, out);
    }
    out.push_str(close);
}

/// Where an instruction's argument points.
enum Operand {
    Const,
    Name { shift: u32 },
    Local,
    None,
}

fn operand(mnemonic: &str, version: PythonVersion) -> Operand {
    let layout_311 = version >= PythonVersion::Py3_11 || version == PythonVersion::Unversioned;
    let attr_shift = version >= PythonVersion::Py3_12 || version == PythonVersion::Unversioned;
    match mnemonic {
        "LOAD_CONST" | "RETURN_CONST" => Operand::Const,
        "LOAD_GLOBAL" if layout_311 => Operand::Name { shift: 1 },
        "LOAD_ATTR" if attr_shift => Operand::Name { shift: 1 },
        "LOAD_SUPER_ATTR" => Operand::Name { shift: 2 },
        "LOAD_NAME" | "STORE_NAME" | "DELETE_NAME" | "LOAD_GLOBAL" | "STORE_GLOBAL"
        | "DELETE_GLOBAL" | "LOAD_ATTR" | "STORE_ATTR" | "DELETE_ATTR" | "IMPORT_NAME"
        | "IMPORT_FROM" | "LOAD_METHOD" => Operand::Name { shift: 0 },
        "LOAD_FAST" | "STORE_FAST" | "DELETE_FAST" | "LOAD_FAST_CHECK"
        | "LOAD_FAST_AND_CLEAR" => Operand::Local,
        _ => Operand::None,
    }
}

fn tuple_item(graph: &ObjectGraph, tuple: ObjectId, index: u32) -> Option<ObjectId> {
    graph
        .get(tuple)
        .and_then(Object::as_tuple)
        .and_then(|items| items.get(index as usize))
        .copied()
}

fn locals_tuple(code: &CodeObject) -> ObjectId {
    match code.variables {
        CodeVariables::Classic { varnames, .. } => varnames,
        CodeVariables::LocalsPlus { names, .. } => names,
    }
}

/// Instruction listing of one code object.
pub fn disassemble_code(
    graph: &ObjectGraph,
    code: &CodeObject,
    version: PythonVersion,
    table: &OpcodeTable,
) -> Result<String> {
    let bytes = graph
        .get(code.code)
        .ok_or(CoreError::MissingObject(code.code))?
        .as_bytes()
        .ok_or(CoreError::UnexpectedObject {
            id: code.code,
            expected: "bytes",
        })?;
    let cache = table.opcode("CACHE").ok();

    let mut out = String::new();
    for instruction in decode_instructions(bytes, table)? {
        if cache == Some(instruction.opcode) {
            continue;
        }
        let mnemonic = table.mnemonic(instruction.opcode);
        let label = mnemonic.map_or_else(|| format!("<{}>", instruction.opcode), str::to_string);
        let _ = write!(out, "{:>6}  {:<24}", instruction.offset, label);
        if table.takes_argument(instruction.opcode) {
            let _ = write!(out, " {:>5}", instruction.arg);
            let target = match mnemonic.map(|m| operand(m, version)) {
                Some(Operand::Const) => tuple_item(graph, code.consts, instruction.arg),
                Some(Operand::Name { shift }) => {
                    tuple_item(graph, code.names, instruction.arg >> shift)
                }
                Some(Operand::Local) => tuple_item(graph, locals_tuple(code), instruction.arg),
                Some(Operand::None) | None => None,
            };
            if let Some(target) = target {
                let _ = write!(out, "  ({})", render(graph, target));
            }
        }
        out.push('\n');
    }
    Ok(out)
}

/// Listing of every reachable code object, root first.
pub fn disassemble(graph: &ObjectGraph, version: PythonVersion, table: &OpcodeTable) -> Result<String> {
    if graph.root().is_none() {
        return Err(CoreError::NoRoot);
    }
    let mut out = String::new();
    for (id, code) in graph.code_objects() {
        let name = graph.get(code.name).and_then(Object::as_str).unwrap_or("?");
        let filename = graph.get(code.filename).and_then(Object::as_str).unwrap_or("?");
        let _ = writeln!(
            out,
            "code {name} {id} (file {filename}, line {}, stacksize {}, flags {:#x})",
            code.firstlineno, code.stacksize, code.flags.bits
        );
        out.push_str(&disassemble_code(graph, code, version, table)?);
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::object::LongInt;

    #[test]
    fn render_scalars_and_containers() {
        let mut g = ObjectGraph::new();
        let one = g.intern(Object::Int(1));
        let s = g.intern_str("hi", false);
        let t = g.intern_tuple(vec![one]);
        let l = g.add(Object::List(vec![one, s]));
        let big = g.intern(Object::Long(LongInt::from_i128(1 << 40)));
        assert_eq!(render(&g, t), "(1,)");
        assert_eq!(render(&g, l), "[1, \"hi\"]");
        assert_eq!(render(&g, big), (1i128 << 40).to_string());
    }

    #[test]
    fn render_survives_cycles() {
        let mut g = ObjectGraph::new();
        let list = g.reserve();
        g.replace(list, Object::List(vec![list]));
        assert!(render(&g, list).contains("..."));
    }

    #[test]
    fn listing_resolves_operands() {
        let table = OpcodeTable::builtin(PythonVersion::Py3_12).unwrap();
        let mut builder = ProgramBuilder::new(PythonVersion::Py3_12, table.clone()).unwrap();
        builder.print_str("Hello, world").unwrap();
        let graph = builder.build("<string>", "<module>").unwrap();
        let listing = disassemble(&graph, PythonVersion::Py3_12, &table).unwrap();
        assert!(listing.contains("LOAD_NAME"));
        assert!(listing.contains("(\"print\")"));
        assert!(listing.contains("(\"Hello, world\")"));
        assert!(!listing.contains("CACHE"));
    }

    #[test]
    fn empty_graph_has_nothing_to_list() {
        let table = OpcodeTable::builtin(PythonVersion::Py3_12).unwrap();
        assert!(matches!(
            disassemble(&ObjectGraph::new(), PythonVersion::Py3_12, &table),
            Err(CoreError::NoRoot)
        ));
    }
}
