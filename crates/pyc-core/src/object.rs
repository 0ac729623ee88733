//! The marshalled object graph.
//!
//! Objects live in an arena and refer to their children by [`ObjectId`].
//! Sharing is explicit: when two parents hold the same id, the object is
//! encoded once and back-referenced afterwards. Cycles are representable the
//! same way, without reference counting or raw pointers.

use std::collections::HashMap;
use std::fmt;
use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::code::CodeObject;

/// Index of an object in an [`ObjectGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u32);

impl ObjectId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Arbitrary-precision integer in marshal's base-2^15 digit form.
///
/// Digits are little-endian and normalized: the most significant digit is
/// never zero, and zero has no digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LongInt {
    pub negative: bool,
    pub digits: Vec<u16>,
}

impl LongInt {
    pub const DIGIT_BITS: u32 = 15;
    pub const DIGIT_MASK: u16 = (1 << Self::DIGIT_BITS) - 1;

    pub fn from_i128(value: i128) -> Self {
        let negative = value < 0;
        let mut magnitude = value.unsigned_abs();
        let mut digits = Vec::new();
        while magnitude != 0 {
            digits.push((magnitude & u128::from(Self::DIGIT_MASK)) as u16);
            magnitude >>= Self::DIGIT_BITS;
        }
        Self { negative, digits }
    }

    /// Convert back to a native integer when the value fits.
    pub fn to_i128(&self) -> Option<i128> {
        let mut magnitude: u128 = 0;
        for (i, digit) in self.digits.iter().enumerate() {
            let shift = Self::DIGIT_BITS.checked_mul(i as u32)?;
            if shift >= 128 {
                return None;
            }
            let part = u128::from(*digit).checked_shl(shift)?;
            if part >> shift != u128::from(*digit) {
                return None;
            }
            magnitude = magnitude.checked_add(part)?;
        }
        if self.negative {
            0i128.checked_sub_unsigned(magnitude)
        } else {
            i128::try_from(magnitude).ok()
        }
    }
}

/// A single marshalled object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Object {
    /// Terminator used inside dicts; never a value in its own right.
    Null,
    None,
    StopIteration,
    Ellipsis,
    Bool(bool),
    Int(i32),
    Int64(i64),
    Long(LongInt),
    Float(f64),
    Complex { re: f64, im: f64 },
    Bytes(Vec<u8>),
    Str { text: String, interned: bool },
    Tuple(Vec<ObjectId>),
    List(Vec<ObjectId>),
    Dict(Vec<(ObjectId, ObjectId)>),
    Set(Vec<ObjectId>),
    FrozenSet(Vec<ObjectId>),
    Code(Box<CodeObject>),
}

/// Hashable identity of an internable object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum InternKey {
    Null,
    None,
    StopIteration,
    Ellipsis,
    Bool(bool),
    Int(i32),
    Int64(i64),
    Long(LongInt),
    Float(u64),
    Complex(u64, u64),
    Bytes(Vec<u8>),
    Str(String, bool),
    Tuple(Vec<ObjectId>),
}

impl Object {
    /// Short kind name used in listings and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Object::Null => "null",
            Object::None => "none",
            Object::StopIteration => "stop-iteration",
            Object::Ellipsis => "ellipsis",
            Object::Bool(_) => "bool",
            Object::Int(_) | Object::Int64(_) | Object::Long(_) => "int",
            Object::Float(_) => "float",
            Object::Complex { .. } => "complex",
            Object::Bytes(_) => "bytes",
            Object::Str { .. } => "str",
            Object::Tuple(_) => "tuple",
            Object::List(_) => "list",
            Object::Dict(_) => "dict",
            Object::Set(_) => "set",
            Object::FrozenSet(_) => "frozenset",
            Object::Code(_) => "code",
        }
    }

    /// Singletons carry no identity; marshal never back-references them.
    pub fn is_singleton(&self) -> bool {
        matches!(
            self,
            Object::Null | Object::None | Object::StopIteration | Object::Ellipsis | Object::Bool(_)
        )
    }

    /// Child ids in a fixed order.
    pub fn children(&self) -> Vec<ObjectId> {
        match self {
            Object::Tuple(items)
            | Object::List(items)
            | Object::Set(items)
            | Object::FrozenSet(items) => items.clone(),
            Object::Dict(pairs) => pairs.iter().flat_map(|(k, v)| [*k, *v]).collect(),
            Object::Code(code) => code.children(),
            _ => Vec::new(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::Str { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Object::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[ObjectId]> {
        match self {
            Object::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_code(&self) -> Option<&CodeObject> {
        match self {
            Object::Code(code) => Some(code),
            _ => None,
        }
    }

    fn intern_key(&self) -> Option<InternKey> {
        let key = match self {
            Object::Null => InternKey::Null,
            Object::None => InternKey::None,
            Object::StopIteration => InternKey::StopIteration,
            Object::Ellipsis => InternKey::Ellipsis,
            Object::Bool(b) => InternKey::Bool(*b),
            Object::Int(v) => InternKey::Int(*v),
            Object::Int64(v) => InternKey::Int64(*v),
            Object::Long(v) => InternKey::Long(v.clone()),
            Object::Float(v) => InternKey::Float(v.to_bits()),
            Object::Complex { re, im } => InternKey::Complex(re.to_bits(), im.to_bits()),
            Object::Bytes(b) => InternKey::Bytes(b.clone()),
            Object::Str { text, interned } => InternKey::Str(text.clone(), *interned),
            Object::Tuple(items) => InternKey::Tuple(items.clone()),
            Object::List(_)
            | Object::Dict(_)
            | Object::Set(_)
            | Object::FrozenSet(_)
            | Object::Code(_) => return None,
        };
        Some(key)
    }

    /// Compare payloads, treating child ids as opaque. Children are compared
    /// by the caller; only their count must agree here. Floats compare by bit
    /// pattern so that NaN payloads round-trip.
    fn shallow_eq(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Null, Object::Null)
            | (Object::None, Object::None)
            | (Object::StopIteration, Object::StopIteration)
            | (Object::Ellipsis, Object::Ellipsis) => true,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Int(a), Object::Int(b)) => a == b,
            (Object::Int64(a), Object::Int64(b)) => a == b,
            (Object::Long(a), Object::Long(b)) => a == b,
            (Object::Float(a), Object::Float(b)) => a.to_bits() == b.to_bits(),
            (Object::Complex { re: ar, im: ai }, Object::Complex { re: br, im: bi }) => {
                ar.to_bits() == br.to_bits() && ai.to_bits() == bi.to_bits()
            }
            (Object::Bytes(a), Object::Bytes(b)) => a == b,
            (
                Object::Str { text: at, interned: ai },
                Object::Str { text: bt, interned: bi },
            ) => at == bt && ai == bi,
            (Object::Tuple(a), Object::Tuple(b))
            | (Object::List(a), Object::List(b))
            | (Object::Set(a), Object::Set(b))
            | (Object::FrozenSet(a), Object::FrozenSet(b)) => a.len() == b.len(),
            (Object::Dict(a), Object::Dict(b)) => a.len() == b.len(),
            (Object::Code(a), Object::Code(b)) => a.shape_eq(b),
            _ => false,
        }
    }
}

/// Arena of marshalled objects with an optional root.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectGraph {
    objects: Vec<Object>,
    root: Option<ObjectId>,
    #[serde(skip)]
    interned: HashMap<InternKey, ObjectId>,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn root(&self) -> Option<ObjectId> {
        self.root
    }

    pub fn set_root(&mut self, root: ObjectId) {
        self.root = Some(root);
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(id.index())
    }

    /// Append an object without deduplication.
    pub fn add(&mut self, object: Object) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(object);
        id
    }

    /// Return the id of an identical scalar (or tuple of identical children)
    /// already interned, adding the object if there is none. Mutable
    /// containers and code objects are always added fresh.
    pub fn intern(&mut self, object: Object) -> ObjectId {
        match object.intern_key() {
            Some(key) => {
                if let Some(id) = self.interned.get(&key) {
                    return *id;
                }
                let id = self.add(object);
                self.interned.insert(key, id);
                id
            }
            None => self.add(object),
        }
    }

    /// Intern a string. Identifiers (names, qualnames) should pass
    /// `interned = true`, matching what the interpreter writes.
    pub fn intern_str(&mut self, text: &str, interned: bool) -> ObjectId {
        self.intern(Object::Str {
            text: text.to_string(),
            interned,
        })
    }

    pub fn intern_bytes(&mut self, bytes: &[u8]) -> ObjectId {
        self.intern(Object::Bytes(bytes.to_vec()))
    }

    pub fn intern_tuple(&mut self, items: Vec<ObjectId>) -> ObjectId {
        self.intern(Object::Tuple(items))
    }

    /// Reserve a slot whose contents are filled in later with [`replace`].
    ///
    /// [`replace`]: ObjectGraph::replace
    pub fn reserve(&mut self) -> ObjectId {
        self.add(Object::Null)
    }

    pub fn replace(&mut self, id: ObjectId, object: Object) {
        if let Some(slot) = self.objects.get_mut(id.index()) {
            *slot = object;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &Object)> {
        self.objects
            .iter()
            .enumerate()
            .map(|(i, object)| (ObjectId(i as u32), object))
    }

    /// Ids reachable from the root, in depth-first pre-order, each once.
    pub fn reachable(&self) -> Vec<ObjectId> {
        let mut order = Vec::new();
        let Some(root) = self.root else {
            return order;
        };
        let mut seen = vec![false; self.objects.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            match seen.get_mut(id.index()) {
                Some(flag) if !*flag => *flag = true,
                _ => continue,
            }
            order.push(id);
            if let Some(object) = self.get(id) {
                let children = object.children();
                stack.extend(children.into_iter().rev());
            }
        }
        order
    }

    /// How many times each object is reached from the root. Objects reached
    /// more than once are the ones marshal must back-reference.
    pub fn reference_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.objects.len()];
        let Some(root) = self.root else {
            return counts;
        };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(count) = counts.get_mut(id.index()) else {
                continue;
            };
            *count += 1;
            if *count == 1 {
                if let Some(object) = self.get(id) {
                    stack.extend(object.children());
                }
            }
        }
        counts
    }

    /// Reachable code objects, root first.
    pub fn code_objects(&self) -> Vec<(ObjectId, &CodeObject)> {
        self.reachable()
            .into_iter()
            .filter_map(|id| self.get(id).and_then(Object::as_code).map(|code| (id, code)))
            .collect()
    }

    /// Structural comparison of the graphs reachable from both roots.
    ///
    /// Ids are matched one-to-one, so two graphs are equal only when they
    /// share the same objects in the same places. Singletons are compared
    /// by value since they carry no identity.
    pub fn structurally_eq(&self, other: &ObjectGraph) -> bool {
        let (a, b) = match (self.root, other.root) {
            (None, None) => return true,
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };

        let mut forward: HashMap<ObjectId, ObjectId> = HashMap::new();
        let mut backward: HashMap<ObjectId, ObjectId> = HashMap::new();
        let mut stack = vec![(a, b)];

        while let Some((x, y)) = stack.pop() {
            let (Some(ox), Some(oy)) = (self.get(x), other.get(y)) else {
                return false;
            };
            if ox.is_singleton() || oy.is_singleton() {
                if !ox.shallow_eq(oy) {
                    return false;
                }
                continue;
            }
            match (forward.get(&x), backward.get(&y)) {
                (Some(&fy), Some(&bx)) => {
                    if fy != y || bx != x {
                        return false;
                    }
                    continue;
                }
                (None, None) => {
                    forward.insert(x, y);
                    backward.insert(y, x);
                }
                _ => return false,
            }
            if !ox.shallow_eq(oy) {
                return false;
            }
            let left = ox.children();
            let right = oy.children();
            if left.len() != right.len() {
                return false;
            }
            stack.extend(left.into_iter().zip(right));
        }
        true
    }
}

impl PartialEq for ObjectGraph {
    fn eq(&self, other: &Self) -> bool {
        self.structurally_eq(other)
    }
}

impl Index<ObjectId> for ObjectGraph {
    type Output = Object;

    fn index(&self, id: ObjectId) -> &Object {
        &self.objects[id.index()]
    }
}
