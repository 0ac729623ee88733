//! Codec properties over generated object graphs.

use proptest::prelude::*;

use pyc_core::{LongInt, Object, ObjectGraph, ObjectId, OpcodeTable, ProgramBuilder, PythonVersion};
use pyc_format::marshal::{self, tag};
use pyc_format::{decode_header, encode_header, FormatError, PycFile, PycHeader, HEADER_SIZE};

/// Generated object tree, turned into a graph by `build`.
#[derive(Debug, Clone)]
enum Value {
    None,
    Bool(bool),
    Ellipsis,
    Int(i32),
    Int64(i64),
    Long(i128),
    Float(f64),
    Complex(f64, f64),
    Bytes(Vec<u8>),
    Str(String, bool),
    /// Reuse an object built earlier, creating sharing.
    Shared(usize),
    Module(String),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Set(Vec<Value>),
    FrozenSet(Vec<Value>),
    Dict(Vec<(Value, Value)>),
}

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::None),
        any::<bool>().prop_map(Value::Bool),
        Just(Value::Ellipsis),
        any::<i32>().prop_map(Value::Int),
        any::<i64>().prop_map(Value::Int64),
        any::<i128>().prop_map(Value::Long),
        any::<f64>().prop_map(Value::Float),
        (any::<f64>(), any::<f64>()).prop_map(|(re, im)| Value::Complex(re, im)),
        prop::collection::vec(any::<u8>(), 0..40).prop_map(Value::Bytes),
        (".{0,40}", any::<bool>()).prop_map(|(s, interned)| Value::Str(s, interned)),
        any::<usize>().prop_map(Value::Shared),
        "[a-z ]{0,12}".prop_map(Value::Module),
    ]
}

fn value() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Tuple),
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::List),
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Set),
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::FrozenSet),
            prop::collection::vec((inner.clone(), inner), 0..6).prop_map(Value::Dict),
        ]
    })
}

fn module(graph: &mut ObjectGraph, text: &str) -> ObjectId {
    let table = OpcodeTable::builtin(PythonVersion::Py3_12).unwrap();
    let mut builder = ProgramBuilder::new(PythonVersion::Py3_12, table).unwrap();
    builder.print_str(text).unwrap();
    let built = builder.build("<gen>", "<module>").unwrap();
    copy_into(graph, &built, built.root().unwrap())
}

/// Copy the subgraph at `root` of `from` into `graph`, keeping its sharing.
fn copy_into(graph: &mut ObjectGraph, from: &ObjectGraph, root: ObjectId) -> ObjectId {
    let mut map = std::collections::HashMap::new();
    for id in from.reachable() {
        map.insert(id, graph.reserve());
    }
    for (old, new) in &map {
        let object = match &from[*old] {
            Object::Tuple(items) => Object::Tuple(items.iter().map(|i| map[i]).collect()),
            Object::Code(code) => {
                let mut code = code.clone();
                code.code = map[&code.code];
                code.consts = map[&code.consts];
                code.names = map[&code.names];
                code.variables = match code.variables.clone() {
                    pyc_core::CodeVariables::LocalsPlus { names, kinds } => {
                        pyc_core::CodeVariables::LocalsPlus {
                            names: map[&names],
                            kinds: map[&kinds],
                        }
                    }
                    other => other,
                };
                code.filename = map[&code.filename];
                code.name = map[&code.name];
                code.qualname = code.qualname.map(|q| map[&q]);
                code.linetable = map[&code.linetable];
                code.exceptiontable = code.exceptiontable.map(|t| map[&t]);
                Object::Code(code)
            }
            other => other.clone(),
        };
        graph.replace(*new, object);
    }
    map[&root]
}

fn build(graph: &mut ObjectGraph, built: &mut Vec<ObjectId>, value: &Value) -> ObjectId {
    let id = match value {
        Value::None => graph.intern(Object::None),
        Value::Bool(b) => graph.intern(Object::Bool(*b)),
        Value::Ellipsis => graph.intern(Object::Ellipsis),
        Value::Int(v) => graph.add(Object::Int(*v)),
        Value::Int64(v) => graph.add(Object::Int64(*v)),
        Value::Long(v) => graph.add(Object::Long(LongInt::from_i128(*v))),
        Value::Float(v) => graph.add(Object::Float(*v)),
        Value::Complex(re, im) => graph.add(Object::Complex { re: *re, im: *im }),
        Value::Bytes(b) => graph.add(Object::Bytes(b.clone())),
        Value::Str(text, interned) => graph.add(Object::Str {
            text: text.clone(),
            interned: *interned,
        }),
        Value::Shared(i) if !built.is_empty() => built[i % built.len()],
        Value::Shared(_) => graph.intern(Object::None),
        Value::Module(text) => module(graph, text),
        Value::Tuple(items) => {
            let ids = items.iter().map(|v| build(graph, built, v)).collect();
            graph.add(Object::Tuple(ids))
        }
        Value::List(items) => {
            let ids = items.iter().map(|v| build(graph, built, v)).collect();
            graph.add(Object::List(ids))
        }
        Value::Set(items) => {
            let ids = items.iter().map(|v| build(graph, built, v)).collect();
            graph.add(Object::Set(ids))
        }
        Value::FrozenSet(items) => {
            let ids = items.iter().map(|v| build(graph, built, v)).collect();
            graph.add(Object::FrozenSet(ids))
        }
        Value::Dict(pairs) => {
            let ids = pairs
                .iter()
                .map(|(k, v)| (build(graph, built, k), build(graph, built, v)))
                .collect();
            graph.add(Object::Dict(ids))
        }
    };
    built.push(id);
    id
}

fn graph_of(value: &Value) -> ObjectGraph {
    let mut graph = ObjectGraph::new();
    let root = build(&mut graph, &mut Vec::new(), value);
    graph.set_root(root);
    graph
}

fn container_of(value: &Value) -> Vec<u8> {
    PycFile::new(PycHeader::timestamped(PythonVersion::Py3_12, 7, 99), graph_of(value))
        .to_bytes()
        .unwrap()
}

const KNOWN_TAGS: &[u8] = b"0NFTS.iIfgxylstr([{cu<>aA)zZ";

fn unknown_tag() -> impl Strategy<Value = u8> {
    any::<u8>().prop_filter("known tag", |b| !KNOWN_TAGS.contains(&(b & 0x7f)))
}

proptest! {
    #[test]
    fn payload_round_trip(value in value()) {
        let graph = graph_of(&value);
        let layout = PythonVersion::Py3_12.layout();
        let bytes = marshal::encode(&graph, layout).unwrap();
        let decoded = marshal::decode(&bytes, layout).unwrap();
        prop_assert_eq!(decoded, graph);
    }

    #[test]
    fn header_round_trip(
        magic in any::<[u8; 4]>(),
        flags in any::<u32>(),
        hash_or_time in any::<u32>(),
        size in any::<u32>()
    ) {
        let bytes = encode_header(magic, flags, hash_or_time, size);
        let header = decode_header(&bytes).unwrap();
        prop_assert_eq!(header.magic, magic);
        prop_assert_eq!(header.flags.bits(), flags);
        prop_assert_eq!(header.hash_or_time, hash_or_time);
        prop_assert_eq!(header.size, size);
    }

    #[test]
    fn unknown_root_tag(tag_byte in unknown_tag(), value in value()) {
        let mut bytes = container_of(&value);
        bytes[HEADER_SIZE] = tag_byte;
        let is_unknown_tag = matches!(
            PycFile::from_bytes(&bytes),
            Err(FormatError::UnknownTag { tag, offset }) if tag == tag_byte && offset == HEADER_SIZE
        );
        prop_assert!(is_unknown_tag);
    }

    #[test]
    fn unknown_nested_tag(
        tag_byte in unknown_tag(),
        items in prop::collection::vec(any::<i32>(), 1..20),
        pick in any::<prop::sample::Index>()
    ) {
        let mut graph = ObjectGraph::new();
        let ids = items.iter().map(|v| graph.add(Object::Int(*v))).collect();
        let root = graph.add(Object::List(ids));
        graph.set_root(root);
        let mut bytes = marshal::encode(&graph, PythonVersion::Py3_12.layout()).unwrap();
        // '[' + count, then 5 bytes per int
        let offset = 5 + 5 * pick.index(items.len());
        bytes[offset] = tag_byte;
        let is_unknown_tag = matches!(
            marshal::decode(&bytes, PythonVersion::Py3_12.layout()),
            Err(FormatError::UnknownTag { offset: at, .. }) if at == offset
        );
        prop_assert!(is_unknown_tag);
    }

    #[test]
    fn re_encoding_is_stable(value in value()) {
        let bytes = container_of(&value);
        let first = PycFile::from_bytes(&bytes).unwrap();
        let again = first.to_bytes().unwrap();
        let second = PycFile::from_bytes(&again).unwrap();
        prop_assert_eq!(&second, &first);
        prop_assert_eq!(second.to_bytes().unwrap(), again);
    }
}

proptest! {
    // each case decodes every prefix, so keep the case count down
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_prefix_is_rejected(value in value()) {
        let bytes = container_of(&value);
        for len in 0..bytes.len() {
            let result = PycFile::from_bytes(&bytes[..len]);
            prop_assert!(
                matches!(
                    result,
                    Err(FormatError::TruncatedInput { .. }) | Err(FormatError::MalformedHeader { .. })
                ),
                "prefix of {} bytes gave {:?}",
                len,
                result
            );
        }
    }
}

#[test]
fn empty_unversioned_container_is_an_empty_unit() {
    let bytes = encode_header([0, 0, 0, 0], 0, 0, 0);
    let file = PycFile::from_bytes(&bytes).unwrap();
    assert_eq!(file.version().unwrap(), PythonVersion::Unversioned);
    assert_eq!(pyc_format::validate(&file.objects).unwrap(), 1);
}

#[test]
fn composite_longer_than_input() {
    let mut bytes = vec![tag::LIST, 10, 0, 0, 0];
    bytes.extend([tag::NONE; 4]);
    assert!(matches!(
        marshal::decode(&bytes, PythonVersion::Py3_12.layout()),
        Err(FormatError::TruncatedInput { needed: 10, remaining: 4, .. })
    ));
}

#[test]
fn shared_constants_are_encoded_once() {
    let table = OpcodeTable::builtin(PythonVersion::Py3_12).unwrap();
    let mut builder = ProgramBuilder::new(PythonVersion::Py3_12, table).unwrap();
    builder.print_str("repeated").unwrap();
    builder.print_str("repeated").unwrap();
    let file = PycFile::new(
        PycHeader::timestamped(PythonVersion::Py3_12, 0, 0),
        builder.build("<string>", "<module>").unwrap(),
    );
    let bytes = file.to_bytes().unwrap();
    let occurrences = bytes.windows(8).filter(|w| *w == b"repeated").count();
    assert_eq!(occurrences, 1);
    assert_eq!(PycFile::from_bytes(&bytes).unwrap(), file);
}
