use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::debug;

use pyc_core::{CodeLayout, CodeObject, CodeVariables, CoreError, LongInt, Object, ObjectGraph, ObjectId};

use super::{tag, FLAG_REF, MAX_DEPTH};
use crate::error::{FormatError, Result};

/// Encode the graph reachable from its root.
///
/// Objects reached more than once are written with [`FLAG_REF`] on first
/// use and as back-references afterwards, so sharing and cycles survive a
/// round trip.
pub fn encode(graph: &ObjectGraph, layout: CodeLayout) -> Result<Vec<u8>> {
    let root = graph.root().ok_or(FormatError::EmptyGraph)?;
    let mut writer = MarshalWriter {
        graph,
        layout,
        out: Vec::new(),
        counts: graph.reference_counts(),
        refs: vec![None; graph.len()],
        next_ref: 0,
        depth: 0,
    };
    writer.write_object(root)?;
    debug!(bytes = writer.out.len(), refs = writer.next_ref, "encoded payload");
    Ok(writer.out)
}

/// Encode into `sink`, returning the number of bytes written.
pub fn encode_to<W: Write>(graph: &ObjectGraph, layout: CodeLayout, sink: &mut W) -> Result<usize> {
    let bytes = encode(graph, layout)?;
    sink.write_all(&bytes)?;
    Ok(bytes.len())
}

struct MarshalWriter<'g> {
    graph: &'g ObjectGraph,
    layout: CodeLayout,
    out: Vec<u8>,
    counts: Vec<u32>,
    /// Reference index assigned to each shared object once written.
    refs: Vec<Option<u32>>,
    next_ref: u32,
    depth: usize,
}

impl<'g> MarshalWriter<'g> {
    fn write_object(&mut self, id: ObjectId) -> Result<()> {
        let graph = self.graph;
        let object = graph
            .get(id)
            .ok_or(FormatError::Core(CoreError::MissingObject(id)))?;

        // a bare null byte only terminates a dict
        if let Object::Null = object {
            return Err(FormatError::Malformed {
                offset: self.out.len(),
                detail: format!("null object {id} has no encoding"),
            });
        }
        if let Some(kind) = singleton_tag(object) {
            self.out.push(kind);
            return Ok(());
        }
        if let Some(index) = self.refs[id.index()] {
            self.out.push(tag::REF);
            self.out.write_u32::<LittleEndian>(index)?;
            return Ok(());
        }
        if self.depth >= MAX_DEPTH {
            return Err(FormatError::NestingTooDeep {
                limit: MAX_DEPTH,
                offset: self.out.len(),
            });
        }

        let flag = if self.counts[id.index()] > 1 {
            self.refs[id.index()] = Some(self.next_ref);
            self.next_ref += 1;
            FLAG_REF
        } else {
            0
        };

        self.depth += 1;
        let result = self.write_body(id, object, flag);
        self.depth -= 1;
        result
    }

    fn write_body(&mut self, id: ObjectId, object: &'g Object, flag: u8) -> Result<()> {
        match object {
            Object::Int(v) => {
                self.out.push(tag::INT | flag);
                self.out.write_i32::<LittleEndian>(*v)?;
            }
            Object::Int64(v) => {
                self.out.push(tag::INT64 | flag);
                self.out.write_i64::<LittleEndian>(*v)?;
            }
            Object::Long(long) => {
                self.check_long(id, long)?;
                self.out.push(tag::LONG | flag);
                let size = i32::try_from(long.digits.len()).map_err(|_| FormatError::Malformed {
                    offset: self.out.len(),
                    detail: "long has too many digits".to_string(),
                })?;
                let size = if long.negative { -size } else { size };
                self.out.write_i32::<LittleEndian>(size)?;
                for digit in &long.digits {
                    self.out.write_u16::<LittleEndian>(*digit)?;
                }
            }
            Object::Float(v) => {
                self.out.push(tag::BINARY_FLOAT | flag);
                self.out.write_f64::<LittleEndian>(*v)?;
            }
            Object::Complex { re, im } => {
                self.out.push(tag::BINARY_COMPLEX | flag);
                self.out.write_f64::<LittleEndian>(*re)?;
                self.out.write_f64::<LittleEndian>(*im)?;
            }
            Object::Bytes(bytes) => {
                self.out.push(tag::STRING | flag);
                self.write_len(bytes.len())?;
                self.out.extend_from_slice(bytes);
            }
            Object::Str { text, interned } => self.write_str(text, *interned, flag)?,
            Object::Tuple(items) => {
                if items.len() < 256 {
                    self.out.push(tag::SMALL_TUPLE | flag);
                    self.out.push(items.len() as u8);
                } else {
                    self.out.push(tag::TUPLE | flag);
                    self.write_len(items.len())?;
                }
                self.write_items(items)?;
            }
            Object::List(items) => self.write_sequence(tag::LIST | flag, items)?,
            Object::Set(items) => self.write_sequence(tag::SET | flag, items)?,
            Object::FrozenSet(items) => self.write_sequence(tag::FROZENSET | flag, items)?,
            Object::Dict(pairs) => {
                self.out.push(tag::DICT | flag);
                for (key, value) in pairs {
                    self.write_object(*key)?;
                    self.write_object(*value)?;
                }
                self.out.push(tag::NULL);
            }
            Object::Code(code) => {
                self.out.push(tag::CODE | flag);
                self.write_code(id, code)?;
            }
            Object::Null
            | Object::None
            | Object::StopIteration
            | Object::Ellipsis
            | Object::Bool(_) => unreachable!("singletons are written by write_object"),
        }
        Ok(())
    }

    /// The reader accepts only normalized longs: base 2^15 digits, no zero
    /// top digit, and no negative zero.
    fn check_long(&self, id: ObjectId, long: &LongInt) -> Result<()> {
        let detail = if long.digits.iter().any(|d| *d > LongInt::DIGIT_MASK) {
            "digit out of range"
        } else if long.digits.last() == Some(&0) {
            "zero top digit"
        } else if long.negative && long.digits.is_empty() {
            "negative zero"
        } else {
            return Ok(());
        };
        Err(FormatError::Malformed {
            offset: self.out.len(),
            detail: format!("unnormalized long {id}: {detail}"),
        })
    }

    fn write_len(&mut self, len: usize) -> Result<()> {
        let len = i32::try_from(len).map_err(|_| FormatError::Malformed {
            offset: self.out.len(),
            detail: format!("length {len} does not fit in 32 bits"),
        })?;
        self.out.write_i32::<LittleEndian>(len)?;
        Ok(())
    }

    /// Shortest tag that represents the string.
    fn write_str(&mut self, text: &str, interned: bool, flag: u8) -> Result<()> {
        if text.is_ascii() {
            if text.len() < 256 {
                let kind = if interned { tag::SHORT_ASCII_INTERNED } else { tag::SHORT_ASCII };
                self.out.push(kind | flag);
                self.out.push(text.len() as u8);
            } else {
                let kind = if interned { tag::ASCII_INTERNED } else { tag::ASCII };
                self.out.push(kind | flag);
                self.write_len(text.len())?;
            }
        } else {
            let kind = if interned { tag::INTERNED } else { tag::UNICODE };
            self.out.push(kind | flag);
            self.write_len(text.len())?;
        }
        self.out.extend_from_slice(text.as_bytes());
        Ok(())
    }

    fn write_sequence(&mut self, kind: u8, items: &[ObjectId]) -> Result<()> {
        self.out.push(kind);
        self.write_len(items.len())?;
        self.write_items(items)
    }

    fn write_items(&mut self, items: &[ObjectId]) -> Result<()> {
        for item in items {
            self.write_object(*item)?;
        }
        Ok(())
    }

    fn mismatch(&self, id: ObjectId, detail: &str) -> FormatError {
        FormatError::LayoutMismatch {
            id,
            layout: self.layout,
            detail: detail.to_string(),
        }
    }

    fn write_field(&mut self, value: u32) -> Result<()> {
        self.out.write_u32::<LittleEndian>(value)?;
        Ok(())
    }

    fn write_code(&mut self, id: ObjectId, code: &CodeObject) -> Result<()> {
        let layout = self.layout;
        match (layout, &code.variables) {
            (CodeLayout::Py311, CodeVariables::Classic { .. }) => {
                return Err(self.mismatch(id, "classic variable tuples need a layout before 3.11"));
            }
            (CodeLayout::Py37 | CodeLayout::Py38, CodeVariables::LocalsPlus { .. }) => {
                return Err(self.mismatch(id, "localsplus tables need the 3.11 layout"));
            }
            _ => {}
        }
        let newer = layout == CodeLayout::Py311;
        if code.qualname.is_some() != newer {
            return Err(self.mismatch(id, "qualname is stored only from 3.11 on"));
        }
        if code.exceptiontable.is_some() != newer {
            return Err(self.mismatch(id, "exception table is stored only from 3.11 on"));
        }
        if layout == CodeLayout::Py37 && code.posonlyargcount != 0 {
            return Err(self.mismatch(id, "positional-only arguments need 3.8 or later"));
        }
        if newer && code.nlocals != 0 {
            return Err(self.mismatch(id, "nlocals is derived from localsplus in 3.11"));
        }

        self.write_field(code.argcount)?;
        if layout != CodeLayout::Py37 {
            self.write_field(code.posonlyargcount)?;
        }
        self.write_field(code.kwonlyargcount)?;
        if !newer {
            self.write_field(code.nlocals)?;
        }
        self.write_field(code.stacksize)?;
        self.write_field(code.flags.bits)?;
        self.write_object(code.code)?;
        self.write_object(code.consts)?;
        self.write_object(code.names)?;
        match &code.variables {
            CodeVariables::Classic {
                varnames,
                freevars,
                cellvars,
            } => {
                self.write_object(*varnames)?;
                self.write_object(*freevars)?;
                self.write_object(*cellvars)?;
            }
            CodeVariables::LocalsPlus { names, kinds } => {
                self.write_object(*names)?;
                self.write_object(*kinds)?;
            }
        }
        self.write_object(code.filename)?;
        self.write_object(code.name)?;
        if let Some(qualname) = code.qualname {
            self.write_object(qualname)?;
        }
        self.write_field(code.firstlineno)?;
        self.write_object(code.linetable)?;
        if let Some(table) = code.exceptiontable {
            self.write_object(table)?;
        }
        Ok(())
    }
}

fn singleton_tag(object: &Object) -> Option<u8> {
    let kind = match object {
        Object::None => tag::NONE,
        Object::StopIteration => tag::STOPITER,
        Object::Ellipsis => tag::ELLIPSIS,
        Object::Bool(true) => tag::TRUE,
        Object::Bool(false) => tag::FALSE,
        _ => return None,
    };
    Some(kind)
}
