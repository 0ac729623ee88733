use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use pyc_core::{CodeFlags, CodeLayout, CodeObject, CodeVariables, LongInt, Object, ObjectGraph, ObjectId};

use super::{tag, FLAG_REF};
use crate::error::{FormatError, Result};

/// Deepest object nesting accepted before decoding gives up.
pub const MAX_DEPTH: usize = 2000;

/// Decode one root object from `bytes`.
pub fn decode(bytes: &[u8], layout: CodeLayout) -> Result<ObjectGraph> {
    decode_at(bytes, 0, layout)
}

/// Decode one root object starting at `start`. Error offsets are relative
/// to the start of `data`, so a container can report file offsets.
pub fn decode_at(data: &[u8], start: usize, layout: CodeLayout) -> Result<ObjectGraph> {
    if start > data.len() {
        return Err(FormatError::TruncatedInput {
            offset: start,
            needed: 1,
            remaining: 0,
        });
    }
    let mut reader = MarshalReader {
        data,
        pos: start,
        layout,
        graph: ObjectGraph::new(),
        refs: Vec::new(),
        depth: 0,
    };
    let root = reader.read_object()?;
    reader.graph.set_root(root);

    let trailing = data.len() - reader.pos;
    if trailing > 0 {
        debug!(offset = reader.pos, trailing, "ignoring bytes after root object");
    }
    debug!(
        objects = reader.graph.len(),
        refs = reader.refs.len(),
        bytes = reader.pos - start,
        "decoded payload"
    );
    Ok(reader.graph)
}

struct MarshalReader<'a> {
    data: &'a [u8],
    pos: usize,
    layout: CodeLayout,
    graph: ObjectGraph,
    /// Objects registered by `FLAG_REF`, in registration order.
    refs: Vec<ObjectId>,
    depth: usize,
}

impl<'a> MarshalReader<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(FormatError::TruncatedInput {
                offset: self.pos,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let data: &'a [u8] = self.data;
        let slice = &data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(LittleEndian::read_i64(self.take(8)?))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }

    fn malformed(offset: usize, detail: impl Into<String>) -> FormatError {
        FormatError::Malformed {
            offset,
            detail: detail.into(),
        }
    }

    /// A signed 32-bit length that must not be negative.
    fn read_len(&mut self) -> Result<usize> {
        let offset = self.pos;
        let n = self.read_i32()?;
        usize::try_from(n).map_err(|_| Self::malformed(offset, format!("negative length {n}")))
    }

    /// Fail early when `count` elements of at least `min_size` bytes each
    /// cannot fit in what is left. Keeps a hostile count from allocating.
    fn check_count(&self, count: usize, min_size: usize) -> Result<()> {
        let needed = count.saturating_mul(min_size);
        if needed > self.remaining() {
            return Err(FormatError::TruncatedInput {
                offset: self.pos,
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    fn read_text_float(&mut self) -> Result<f64> {
        let offset = self.pos;
        let n = usize::from(self.read_u8()?);
        let text = self.take(n)?;
        std::str::from_utf8(text)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .ok_or_else(|| Self::malformed(offset, "bad float literal"))
    }

    fn read_object(&mut self) -> Result<ObjectId> {
        let offset = self.pos;
        let code = self.read_u8()?;
        if self.depth >= MAX_DEPTH {
            return Err(FormatError::NestingTooDeep {
                limit: MAX_DEPTH,
                offset,
            });
        }
        self.depth += 1;
        let result = self.read_tagged(code, offset);
        self.depth -= 1;
        result
    }

    fn read_tagged(&mut self, code: u8, offset: usize) -> Result<ObjectId> {
        let flag = code & FLAG_REF != 0;
        let kind = code & !FLAG_REF;

        // singletons carry no identity and are never registered
        let singleton = match kind {
            tag::NONE => Some(Object::None),
            tag::TRUE => Some(Object::Bool(true)),
            tag::FALSE => Some(Object::Bool(false)),
            tag::STOPITER => Some(Object::StopIteration),
            tag::ELLIPSIS => Some(Object::Ellipsis),
            tag::NULL => return Err(Self::malformed(offset, "unexpected null object")),
            _ => None,
        };
        if let Some(object) = singleton {
            return Ok(self.graph.intern(object));
        }

        if kind == tag::REF {
            let index = self.read_u32()?;
            return self
                .refs
                .get(index as usize)
                .copied()
                .ok_or(FormatError::InvalidReference {
                    index,
                    offset,
                    available: self.refs.len(),
                });
        }

        // reserve first so children can refer back to this object
        let id = self.graph.reserve();
        if flag {
            self.refs.push(id);
        }
        let object = match kind {
            tag::INT => Object::Int(self.read_i32()?),
            tag::INT64 => Object::Int64(self.read_i64()?),
            tag::BINARY_FLOAT => Object::Float(self.read_f64()?),
            tag::FLOAT => Object::Float(self.read_text_float()?),
            tag::BINARY_COMPLEX => Object::Complex {
                re: self.read_f64()?,
                im: self.read_f64()?,
            },
            tag::COMPLEX => Object::Complex {
                re: self.read_text_float()?,
                im: self.read_text_float()?,
            },
            tag::LONG => Object::Long(self.read_long()?),
            tag::STRING => {
                let n = self.read_len()?;
                Object::Bytes(self.take(n)?.to_vec())
            }
            tag::UNICODE | tag::INTERNED => {
                let n = self.read_len()?;
                let data_offset = self.pos;
                let bytes = self.take(n)?;
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| FormatError::InvalidString {
                        offset: data_offset,
                    })?
                    .to_string();
                Object::Str {
                    text,
                    interned: kind == tag::INTERNED,
                }
            }
            tag::ASCII | tag::ASCII_INTERNED => {
                let n = self.read_len()?;
                Object::Str {
                    text: latin1(self.take(n)?),
                    interned: kind == tag::ASCII_INTERNED,
                }
            }
            tag::SHORT_ASCII | tag::SHORT_ASCII_INTERNED => {
                let n = usize::from(self.read_u8()?);
                Object::Str {
                    text: latin1(self.take(n)?),
                    interned: kind == tag::SHORT_ASCII_INTERNED,
                }
            }
            tag::TUPLE => {
                let n = self.read_len()?;
                Object::Tuple(self.read_items(n)?)
            }
            tag::SMALL_TUPLE => {
                let n = usize::from(self.read_u8()?);
                Object::Tuple(self.read_items(n)?)
            }
            tag::LIST => {
                let n = self.read_len()?;
                Object::List(self.read_items(n)?)
            }
            tag::SET => {
                let n = self.read_len()?;
                Object::Set(self.read_items(n)?)
            }
            tag::FROZENSET => {
                let n = self.read_len()?;
                Object::FrozenSet(self.read_items(n)?)
            }
            tag::DICT => Object::Dict(self.read_dict()?),
            tag::CODE => Object::Code(Box::new(self.read_code()?)),
            _ => return Err(FormatError::UnknownTag { tag: code, offset }),
        };
        self.graph.replace(id, object);
        Ok(id)
    }

    fn read_items(&mut self, n: usize) -> Result<Vec<ObjectId>> {
        self.check_count(n, 1)?;
        let mut items = Vec::with_capacity(n);
        for _ in 0..n {
            items.push(self.read_object()?);
        }
        Ok(items)
    }

    fn read_dict(&mut self) -> Result<Vec<(ObjectId, ObjectId)>> {
        let mut pairs = Vec::new();
        loop {
            let next = *self
                .data
                .get(self.pos)
                .ok_or(FormatError::TruncatedInput {
                    offset: self.pos,
                    needed: 1,
                    remaining: 0,
                })?;
            if next & !FLAG_REF == tag::NULL {
                self.pos += 1;
                return Ok(pairs);
            }
            let key = self.read_object()?;
            let value = self.read_object()?;
            pairs.push((key, value));
        }
    }

    fn read_long(&mut self) -> Result<LongInt> {
        let offset = self.pos;
        let size = i64::from(self.read_i32()?);
        let n = size.unsigned_abs() as usize;
        self.check_count(n, 2)?;
        let mut digits = Vec::with_capacity(n);
        for _ in 0..n {
            let digit_offset = self.pos;
            let digit = self.read_u16()?;
            if digit > LongInt::DIGIT_MASK {
                return Err(Self::malformed(digit_offset, format!("long digit {digit} out of range")));
            }
            digits.push(digit);
        }
        if digits.last() == Some(&0) {
            return Err(Self::malformed(offset, "unnormalized long"));
        }
        Ok(LongInt {
            negative: size < 0,
            digits,
        })
    }

    fn read_field(&mut self) -> Result<u32> {
        self.read_u32()
    }

    fn read_code(&mut self) -> Result<CodeObject> {
        let layout = self.layout;
        let argcount = self.read_field()?;
        let posonlyargcount = match layout {
            CodeLayout::Py37 => 0,
            CodeLayout::Py38 | CodeLayout::Py311 => self.read_field()?,
        };
        let kwonlyargcount = self.read_field()?;
        let nlocals = match layout {
            CodeLayout::Py37 | CodeLayout::Py38 => self.read_field()?,
            CodeLayout::Py311 => 0,
        };
        let stacksize = self.read_field()?;
        let flags = CodeFlags::new(self.read_field()?);
        let code = self.read_object()?;
        let consts = self.read_object()?;
        let names = self.read_object()?;

        let variables = match layout {
            CodeLayout::Py37 | CodeLayout::Py38 => CodeVariables::Classic {
                varnames: self.read_object()?,
                freevars: self.read_object()?,
                cellvars: self.read_object()?,
            },
            CodeLayout::Py311 => CodeVariables::LocalsPlus {
                names: self.read_object()?,
                kinds: self.read_object()?,
            },
        };
        let filename = self.read_object()?;
        let name = self.read_object()?;
        let qualname = match layout {
            CodeLayout::Py311 => Some(self.read_object()?),
            _ => None,
        };
        let firstlineno = self.read_field()?;
        let linetable = self.read_object()?;
        let exceptiontable = match layout {
            CodeLayout::Py311 => Some(self.read_object()?),
            _ => None,
        };

        Ok(CodeObject {
            argcount,
            posonlyargcount,
            kwonlyargcount,
            nlocals,
            stacksize,
            flags,
            code,
            consts,
            names,
            variables,
            filename,
            name,
            qualname,
            firstlineno,
            linetable,
            exceptiontable,
        })
    }
}

/// ASCII tags are decoded byte-per-char, so stray high bytes survive.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|b| char::from(*b)).collect()
}
