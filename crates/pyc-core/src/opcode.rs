//! Opcode tables.
//!
//! Opcode numbering changes between CPython releases, so every decode or
//! assembly step runs against an [`OpcodeTable`]. Tables for 3.10 and 3.12
//! are built in; tables for other releases are loaded from the JSON document
//! a host interpreter exports (`{"MNEMONIC": value, ...}`).

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::version::PythonVersion;

const EXTENDED_ARG: &str = "EXTENDED_ARG";
const HAVE_ARGUMENT: &str = "HAVE_ARGUMENT";

/// CPython 3.10 `opcode.opmap`.
const OPMAP_3_10: &[(&str, u8)] = &[
    ("POP_TOP", 1),
    ("ROT_TWO", 2),
    ("ROT_THREE", 3),
    ("DUP_TOP", 4),
    ("DUP_TOP_TWO", 5),
    ("ROT_FOUR", 6),
    ("NOP", 9),
    ("UNARY_POSITIVE", 10),
    ("UNARY_NEGATIVE", 11),
    ("UNARY_NOT", 12),
    ("UNARY_INVERT", 15),
    ("BINARY_MATRIX_MULTIPLY", 16),
    ("INPLACE_MATRIX_MULTIPLY", 17),
    ("BINARY_POWER", 19),
    ("BINARY_MULTIPLY", 20),
    ("BINARY_MODULO", 22),
    ("BINARY_ADD", 23),
    ("BINARY_SUBTRACT", 24),
    ("BINARY_SUBSCR", 25),
    ("BINARY_FLOOR_DIVIDE", 26),
    ("BINARY_TRUE_DIVIDE", 27),
    ("INPLACE_FLOOR_DIVIDE", 28),
    ("INPLACE_TRUE_DIVIDE", 29),
    ("GET_LEN", 30),
    ("MATCH_MAPPING", 31),
    ("MATCH_SEQUENCE", 32),
    ("MATCH_KEYS", 33),
    ("COPY_DICT_WITHOUT_KEYS", 34),
    ("WITH_EXCEPT_START", 49),
    ("GET_AITER", 50),
    ("GET_ANEXT", 51),
    ("BEFORE_ASYNC_WITH", 52),
    ("END_ASYNC_FOR", 54),
    ("INPLACE_ADD", 55),
    ("INPLACE_SUBTRACT", 56),
    ("INPLACE_MULTIPLY", 57),
    ("INPLACE_MODULO", 59),
    ("STORE_SUBSCR", 60),
    ("DELETE_SUBSCR", 61),
    ("BINARY_LSHIFT", 62),
    ("BINARY_RSHIFT", 63),
    ("BINARY_AND", 64),
    ("BINARY_XOR", 65),
    ("BINARY_OR", 66),
    ("INPLACE_POWER", 67),
    ("GET_ITER", 68),
    ("GET_YIELD_FROM_ITER", 69),
    ("PRINT_EXPR", 70),
    ("LOAD_BUILD_CLASS", 71),
    ("YIELD_FROM", 72),
    ("GET_AWAITABLE", 73),
    ("LOAD_ASSERTION_ERROR", 74),
    ("INPLACE_LSHIFT", 75),
    ("INPLACE_RSHIFT", 76),
    ("INPLACE_AND", 77),
    ("INPLACE_XOR", 78),
    ("INPLACE_OR", 79),
    ("LIST_TO_TUPLE", 82),
    ("RETURN_VALUE", 83),
    ("IMPORT_STAR", 84),
    ("SETUP_ANNOTATIONS", 85),
    ("YIELD_VALUE", 86),
    ("POP_BLOCK", 87),
    ("POP_EXCEPT", 89),
    ("STORE_NAME", 90),
    ("DELETE_NAME", 91),
    ("UNPACK_SEQUENCE", 92),
    ("FOR_ITER", 93),
    ("UNPACK_EX", 94),
    ("STORE_ATTR", 95),
    ("DELETE_ATTR", 96),
    ("STORE_GLOBAL", 97),
    ("DELETE_GLOBAL", 98),
    ("ROT_N", 99),
    ("LOAD_CONST", 100),
    ("LOAD_NAME", 101),
    ("BUILD_TUPLE", 102),
    ("BUILD_LIST", 103),
    ("BUILD_SET", 104),
    ("BUILD_MAP", 105),
    ("LOAD_ATTR", 106),
    ("COMPARE_OP", 107),
    ("IMPORT_NAME", 108),
    ("IMPORT_FROM", 109),
    ("JUMP_FORWARD", 110),
    ("JUMP_IF_FALSE_OR_POP", 111),
    ("JUMP_IF_TRUE_OR_POP", 112),
    ("JUMP_ABSOLUTE", 113),
    ("POP_JUMP_IF_FALSE", 114),
    ("POP_JUMP_IF_TRUE", 115),
    ("LOAD_GLOBAL", 116),
    ("IS_OP", 117),
    ("CONTAINS_OP", 118),
    ("RERAISE", 119),
    ("JUMP_IF_NOT_EXC_MATCH", 121),
    ("SETUP_FINALLY", 122),
    ("LOAD_FAST", 124),
    ("STORE_FAST", 125),
    ("DELETE_FAST", 126),
    ("GEN_START", 129),
    ("RAISE_VARARGS", 130),
    ("CALL_FUNCTION", 131),
    ("MAKE_FUNCTION", 132),
    ("BUILD_SLICE", 133),
    ("LOAD_CLOSURE", 135),
    ("LOAD_DEREF", 136),
    ("STORE_DEREF", 137),
    ("DELETE_DEREF", 138),
    ("CALL_FUNCTION_KW", 141),
    ("CALL_FUNCTION_EX", 142),
    ("SETUP_WITH", 143),
    ("EXTENDED_ARG", 144),
    ("LIST_APPEND", 145),
    ("SET_ADD", 146),
    ("MAP_ADD", 147),
    ("LOAD_CLASSDEREF", 148),
    ("MATCH_CLASS", 152),
    ("SETUP_ASYNC_WITH", 154),
    ("FORMAT_VALUE", 155),
    ("BUILD_CONST_KEY_MAP", 156),
    ("BUILD_STRING", 157),
    ("LOAD_METHOD", 160),
    ("CALL_METHOD", 161),
    ("LIST_EXTEND", 162),
    ("SET_UPDATE", 163),
    ("DICT_MERGE", 164),
    ("DICT_UPDATE", 165),
];

/// CPython 3.12 `opcode.opmap`, without the pseudo-instructions (>= 256).
const OPMAP_3_12: &[(&str, u8)] = &[
    ("CACHE", 0),
    ("POP_TOP", 1),
    ("PUSH_NULL", 2),
    ("INTERPRETER_EXIT", 3),
    ("END_FOR", 4),
    ("END_SEND", 5),
    ("NOP", 9),
    ("UNARY_NEGATIVE", 11),
    ("UNARY_NOT", 12),
    ("UNARY_INVERT", 15),
    ("RESERVED", 17),
    ("BINARY_SUBSCR", 25),
    ("BINARY_SLICE", 26),
    ("STORE_SLICE", 27),
    ("GET_LEN", 30),
    ("MATCH_MAPPING", 31),
    ("MATCH_SEQUENCE", 32),
    ("MATCH_KEYS", 33),
    ("PUSH_EXC_INFO", 35),
    ("CHECK_EXC_MATCH", 36),
    ("CHECK_EG_MATCH", 37),
    ("WITH_EXCEPT_START", 49),
    ("GET_AITER", 50),
    ("GET_ANEXT", 51),
    ("BEFORE_ASYNC_WITH", 52),
    ("BEFORE_WITH", 53),
    ("END_ASYNC_FOR", 54),
    ("CLEANUP_THROW", 55),
    ("STORE_SUBSCR", 60),
    ("DELETE_SUBSCR", 61),
    ("GET_ITER", 68),
    ("GET_YIELD_FROM_ITER", 69),
    ("LOAD_BUILD_CLASS", 71),
    ("LOAD_ASSERTION_ERROR", 74),
    ("RETURN_GENERATOR", 75),
    ("RETURN_VALUE", 83),
    ("SETUP_ANNOTATIONS", 85),
    ("LOAD_LOCALS", 87),
    ("POP_EXCEPT", 89),
    ("STORE_NAME", 90),
    ("DELETE_NAME", 91),
    ("UNPACK_SEQUENCE", 92),
    ("FOR_ITER", 93),
    ("UNPACK_EX", 94),
    ("STORE_ATTR", 95),
    ("DELETE_ATTR", 96),
    ("STORE_GLOBAL", 97),
    ("DELETE_GLOBAL", 98),
    ("SWAP", 99),
    ("LOAD_CONST", 100),
    ("LOAD_NAME", 101),
    ("BUILD_TUPLE", 102),
    ("BUILD_LIST", 103),
    ("BUILD_SET", 104),
    ("BUILD_MAP", 105),
    ("LOAD_ATTR", 106),
    ("COMPARE_OP", 107),
    ("IMPORT_NAME", 108),
    ("IMPORT_FROM", 109),
    ("JUMP_FORWARD", 110),
    ("POP_JUMP_IF_FALSE", 114),
    ("POP_JUMP_IF_TRUE", 115),
    ("LOAD_GLOBAL", 116),
    ("IS_OP", 117),
    ("CONTAINS_OP", 118),
    ("RERAISE", 119),
    ("COPY", 120),
    ("RETURN_CONST", 121),
    ("BINARY_OP", 122),
    ("SEND", 123),
    ("LOAD_FAST", 124),
    ("STORE_FAST", 125),
    ("DELETE_FAST", 126),
    ("LOAD_FAST_CHECK", 127),
    ("POP_JUMP_IF_NOT_NONE", 128),
    ("POP_JUMP_IF_NONE", 129),
    ("RAISE_VARARGS", 130),
    ("GET_AWAITABLE", 131),
    ("MAKE_FUNCTION", 132),
    ("BUILD_SLICE", 133),
    ("JUMP_BACKWARD_NO_INTERRUPT", 134),
    ("MAKE_CELL", 135),
    ("LOAD_CLOSURE", 136),
    ("LOAD_DEREF", 137),
    ("STORE_DEREF", 138),
    ("DELETE_DEREF", 139),
    ("JUMP_BACKWARD", 140),
    ("LOAD_SUPER_ATTR", 141),
    ("CALL_FUNCTION_EX", 142),
    ("LOAD_FAST_AND_CLEAR", 143),
    ("EXTENDED_ARG", 144),
    ("LIST_APPEND", 145),
    ("SET_ADD", 146),
    ("MAP_ADD", 147),
    ("COPY_FREE_VARS", 149),
    ("YIELD_VALUE", 150),
    ("RESUME", 151),
    ("MATCH_CLASS", 152),
    ("FORMAT_VALUE", 155),
    ("BUILD_CONST_KEY_MAP", 156),
    ("BUILD_STRING", 157),
    ("LIST_EXTEND", 162),
    ("SET_UPDATE", 163),
    ("DICT_MERGE", 164),
    ("DICT_UPDATE", 165),
    ("CALL", 171),
    ("KW_NAMES", 172),
    ("CALL_INTRINSIC_1", 173),
    ("CALL_INTRINSIC_2", 174),
    ("LOAD_FROM_DICT_OR_GLOBALS", 175),
    ("LOAD_FROM_DICT_OR_DEREF", 176),
    ("INSTRUMENTED_LOAD_SUPER_ATTR", 237),
    ("INSTRUMENTED_POP_JUMP_IF_NONE", 238),
    ("INSTRUMENTED_POP_JUMP_IF_NOT_NONE", 239),
    ("INSTRUMENTED_RESUME", 240),
    ("INSTRUMENTED_CALL", 241),
    ("INSTRUMENTED_RETURN_VALUE", 242),
    ("INSTRUMENTED_YIELD_VALUE", 243),
    ("INSTRUMENTED_CALL_FUNCTION_EX", 244),
    ("INSTRUMENTED_JUMP_FORWARD", 245),
    ("INSTRUMENTED_JUMP_BACKWARD", 246),
    ("INSTRUMENTED_RETURN_CONST", 247),
    ("INSTRUMENTED_FOR_ITER", 248),
    ("INSTRUMENTED_POP_JUMP_IF_FALSE", 249),
    ("INSTRUMENTED_POP_JUMP_IF_TRUE", 250),
    ("INSTRUMENTED_END_FOR", 251),
    ("INSTRUMENTED_END_SEND", 252),
    ("INSTRUMENTED_INSTRUCTION", 253),
    ("INSTRUMENTED_LINE", 254),
];

/// Inline cache units following each specializable instruction.
const CACHES_3_11: &[(&str, u8)] = &[
    ("BINARY_SUBSCR", 4),
    ("BINARY_OP", 1),
    ("UNPACK_SEQUENCE", 1),
    ("COMPARE_OP", 2),
    ("LOAD_GLOBAL", 5),
    ("LOAD_ATTR", 4),
    ("STORE_ATTR", 4),
    ("LOAD_METHOD", 10),
    ("PRECALL", 1),
    ("CALL", 4),
    ("STORE_SUBSCR", 1),
];

const CACHES_3_12: &[(&str, u8)] = &[
    ("LOAD_GLOBAL", 4),
    ("BINARY_OP", 1),
    ("UNPACK_SEQUENCE", 1),
    ("COMPARE_OP", 1),
    ("BINARY_SUBSCR", 1),
    ("FOR_ITER", 1),
    ("LOAD_SUPER_ATTR", 1),
    ("LOAD_ATTR", 9),
    ("STORE_ATTR", 4),
    ("CALL", 3),
    ("STORE_SUBSCR", 1),
    ("SEND", 1),
];

const CACHES_3_13: &[(&str, u8)] = &[
    ("LOAD_GLOBAL", 4),
    ("BINARY_OP", 1),
    ("UNPACK_SEQUENCE", 1),
    ("COMPARE_OP", 1),
    ("CONTAINS_OP", 1),
    ("BINARY_SUBSCR", 1),
    ("FOR_ITER", 1),
    ("LOAD_SUPER_ATTR", 1),
    ("LOAD_ATTR", 9),
    ("STORE_ATTR", 4),
    ("CALL", 3),
    ("STORE_SUBSCR", 1),
    ("SEND", 1),
    ("JUMP_BACKWARD", 1),
    ("TO_BOOL", 3),
    ("POP_JUMP_IF_TRUE", 1),
    ("POP_JUMP_IF_FALSE", 1),
    ("POP_JUMP_IF_NONE", 1),
    ("POP_JUMP_IF_NOT_NONE", 1),
];

fn cache_layout(version: PythonVersion) -> &'static [(&'static str, u8)] {
    match version {
        PythonVersion::Py3_11 => CACHES_3_11,
        PythonVersion::Py3_12 => CACHES_3_12,
        PythonVersion::Py3_13 | PythonVersion::Py3_14 => CACHES_3_13,
        _ => &[],
    }
}

/// Bidirectional mnemonic/value map for one interpreter release.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OpcodeTable {
    by_name: BTreeMap<String, u8>,
    by_value: BTreeMap<u8, String>,
    have_argument: Option<u8>,
    caches: BTreeMap<u8, u8>,
}

impl OpcodeTable {
    fn from_pairs(pairs: &[(&str, u8)], have_argument: Option<u8>) -> Self {
        let mut table = Self {
            have_argument,
            ..Self::default()
        };
        for (name, value) in pairs {
            table.insert(name, *value);
        }
        table
    }

    /// The built-in table for a release, if one ships with the crate.
    pub fn builtin(version: PythonVersion) -> Option<Self> {
        let table = match version {
            PythonVersion::Py3_10 => Self::from_pairs(OPMAP_3_10, Some(90)),
            PythonVersion::Py3_12 => Self::from_pairs(OPMAP_3_12, Some(90)),
            _ => return None,
        };
        Some(table.with_cache_layout(version))
    }

    /// Parse an exported `opcode.opmap` document.
    ///
    /// Values above 255 are pseudo-instructions that never appear in
    /// bytecode and are skipped. An optional `HAVE_ARGUMENT` key sets the
    /// argument threshold.
    pub fn from_json(json: &str) -> Result<Self> {
        let map: BTreeMap<String, i64> = serde_json::from_str(json)?;
        let mut table = Self::default();
        for (name, value) in map {
            if name == HAVE_ARGUMENT {
                table.have_argument = u8::try_from(value).ok();
                continue;
            }
            match u8::try_from(value) {
                Ok(byte) => table.insert(&name, byte),
                Err(_) => debug!(mnemonic = %name, value, "skipping pseudo-instruction"),
            }
        }
        Ok(table)
    }

    /// Attach the inline-cache layout `version` uses, matched by mnemonic.
    /// Needed when assembling for 3.11 and later from a loaded table.
    pub fn with_cache_layout(mut self, version: PythonVersion) -> Self {
        self.caches.clear();
        for (name, units) in cache_layout(version) {
            if let Some(value) = self.by_name.get(*name) {
                self.caches.insert(*value, *units);
            }
        }
        self
    }

    /// Flat mnemonic → value document, keys sorted.
    pub fn to_json_pretty(&self) -> Result<String> {
        let map: Map<String, Value> = self
            .by_name
            .iter()
            .map(|(name, value)| (name.clone(), Value::from(*value)))
            .collect();
        Ok(serde_json::to_string_pretty(&Value::Object(map))?)
    }

    fn insert(&mut self, name: &str, value: u8) {
        if let Some(old) = self.by_name.insert(name.to_string(), value) {
            if old != value && self.by_value.get(&old).map(String::as_str) == Some(name) {
                self.by_value.remove(&old);
                // hand the display slot to a remaining alias, if any
                let alias = self
                    .by_name
                    .iter()
                    .find(|(_, v)| **v == old)
                    .map(|(n, _)| n.clone());
                if let Some(alias) = alias {
                    self.by_value.insert(old, alias);
                }
            }
        }
        // several aliases may share a value; the first name wins for display
        self.by_value.entry(value).or_insert_with(|| name.to_string());
    }

    pub fn opcode(&self, mnemonic: &str) -> Result<u8> {
        self.by_name
            .get(mnemonic)
            .copied()
            .ok_or_else(|| CoreError::UnknownMnemonic(mnemonic.to_string()))
    }

    pub fn mnemonic(&self, value: u8) -> Option<&str> {
        self.by_value.get(&value).map(String::as_str)
    }

    pub fn contains(&self, mnemonic: &str) -> bool {
        self.by_name.contains_key(mnemonic)
    }

    pub fn have_argument(&self) -> Option<u8> {
        self.have_argument
    }

    /// Whether the opcode takes a meaningful argument. Without a threshold
    /// every opcode is assumed to.
    pub fn takes_argument(&self, value: u8) -> bool {
        self.have_argument.map_or(true, |threshold| value >= threshold)
    }

    /// Value of `EXTENDED_ARG`, 144 when the table does not name it.
    pub fn extended_arg(&self) -> u8 {
        self.by_name.get(EXTENDED_ARG).copied().unwrap_or(144)
    }

    /// Inline cache units that follow `value` in the instruction stream.
    pub fn cache_units(&self, value: u8) -> u8 {
        self.caches.get(&value).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.by_name.iter().map(|(name, value)| (name.as_str(), *value))
    }
}
