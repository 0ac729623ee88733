//! Structural checks on decoded graphs.
//!
//! A host interpreter trusts the shape of what it loads. These checks catch
//! graphs that decode cleanly but could not be executed: a root that is not
//! code, name tables holding non-strings, instruction streams of odd length.

use tracing::debug;

use pyc_core::{CodeObject, CodeVariables, Object, ObjectGraph, ObjectId};

use crate::error::{FormatError, Result};

/// Check that the graph is a runnable module. Returns the number of code
/// objects checked.
pub fn validate(graph: &ObjectGraph) -> Result<usize> {
    let root = graph.root().ok_or(FormatError::EmptyGraph)?;
    if !matches!(graph.get(root), Some(Object::Code(_))) {
        return Err(FormatError::Validation(format!(
            "root object {root} is not a code object"
        )));
    }
    let units = graph.code_objects();
    for (id, code) in &units {
        check_code(graph, *id, code)?;
    }
    debug!(code_objects = units.len(), "graph is structurally valid");
    Ok(units.len())
}

fn object(graph: &ObjectGraph, id: ObjectId) -> Result<&Object> {
    graph
        .get(id)
        .ok_or_else(|| FormatError::Validation(format!("object {id} is missing")))
}

fn expect_bytes<'g>(graph: &'g ObjectGraph, unit: ObjectId, id: ObjectId, field: &str) -> Result<&'g [u8]> {
    object(graph, id)?.as_bytes().ok_or_else(|| {
        FormatError::Validation(format!("code {unit}: {field} is not bytes"))
    })
}

fn expect_str(graph: &ObjectGraph, unit: ObjectId, id: ObjectId, field: &str) -> Result<()> {
    match object(graph, id)? {
        Object::Str { .. } => Ok(()),
        other => Err(FormatError::Validation(format!(
            "code {unit}: {field} holds {}, not str",
            other.kind()
        ))),
    }
}

fn expect_tuple<'g>(graph: &'g ObjectGraph, unit: ObjectId, id: ObjectId, field: &str) -> Result<&'g [ObjectId]> {
    object(graph, id)?.as_tuple().ok_or_else(|| {
        FormatError::Validation(format!("code {unit}: {field} is not a tuple"))
    })
}

fn expect_name_tuple(graph: &ObjectGraph, unit: ObjectId, id: ObjectId, field: &str) -> Result<usize> {
    let items = expect_tuple(graph, unit, id, field)?;
    for item in items {
        expect_str(graph, unit, *item, field)?;
    }
    Ok(items.len())
}

fn check_code(graph: &ObjectGraph, unit: ObjectId, code: &CodeObject) -> Result<()> {
    let bytecode = expect_bytes(graph, unit, code.code, "code")?;
    if bytecode.len() % 2 != 0 {
        return Err(FormatError::Validation(format!(
            "code {unit}: instruction stream has odd length {}",
            bytecode.len()
        )));
    }
    expect_tuple(graph, unit, code.consts, "consts")?;
    expect_name_tuple(graph, unit, code.names, "names")?;

    match &code.variables {
        CodeVariables::Classic {
            varnames,
            freevars,
            cellvars,
        } => {
            expect_name_tuple(graph, unit, *varnames, "varnames")?;
            expect_name_tuple(graph, unit, *freevars, "freevars")?;
            expect_name_tuple(graph, unit, *cellvars, "cellvars")?;
        }
        CodeVariables::LocalsPlus { names, kinds } => {
            let count = expect_name_tuple(graph, unit, *names, "localsplusnames")?;
            let kinds = expect_bytes(graph, unit, *kinds, "localspluskinds")?;
            if kinds.len() != count {
                return Err(FormatError::Validation(format!(
                    "code {unit}: {count} local names but {} kinds",
                    kinds.len()
                )));
            }
        }
    }

    expect_str(graph, unit, code.filename, "filename")?;
    expect_str(graph, unit, code.name, "name")?;
    if let Some(qualname) = code.qualname {
        expect_str(graph, unit, qualname, "qualname")?;
    }
    expect_bytes(graph, unit, code.linetable, "linetable")?;
    if let Some(table) = code.exceptiontable {
        expect_bytes(graph, unit, table, "exceptiontable")?;
    }
    Ok(())
}
