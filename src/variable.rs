//! Grammar tree: variables (Data, Alt, Agg, Repeat, Relation) and the fields wrapping them.
//!
//! Trees are immutable once built. Every node gets a process-unique id at
//! construction; ids key the path's binding maps and the persistent memory.

use crate::checksum::{CrcAlgorithm, CRC32_ISO_HDLC};
use crate::codec::{DataType, Endianness};
use crate::value::Bits;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn fresh_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(u64);

impl VarId {
    pub fn fresh() -> Self {
        VarId(fresh_id())
    }
}

impl FieldId {
    pub fn fresh() -> Self {
        FieldId(fresh_id())
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// A reference to another node whose bound value a relation or a repeat count reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dependency {
    Field(FieldId),
    Variable(VarId),
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Field(id) => write!(f, "{}", id),
            Dependency::Variable(id) => write!(f, "{}", id),
        }
    }
}

/// Lifetime of a bound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// Discarded after one specialize/parse call.
    #[default]
    Ephemeral,
    /// Written back into memory; later calls reuse it.
    Persistent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    pub data_type: DataType,
    pub value: Option<Bits>,
}

impl Data {
    /// Bit length bounds, taking a fixed value into account.
    pub fn bit_bounds(&self) -> (usize, usize) {
        match &self.value {
            Some(v) => (v.len(), v.len()),
            None => self.data_type.bit_bounds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alt {
    pub children: Vec<Variable>,
    /// Relative specialization weights, one per child. `None` is uniform.
    pub weights: Option<Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountSpec {
    Fixed(usize),
    Range { min: usize, max: usize },
    /// Unsigned value of another bound node.
    Dependency(Dependency),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Repeat {
    pub child: Box<Variable>,
    pub count: CountSpec,
    pub delimiter: Option<Bits>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Sum of the dependencies' lengths counted in `unit_bits` units, plus `offset`.
    Size { unit_bits: usize, offset: i64 },
    /// Verbatim copy of the concatenated dependencies.
    Value,
    /// RFC 1071 ones-complement sum.
    Checksum,
    Crc(CrcAlgorithm),
    /// Filler aligning the covered bits, plus `offset`, to a multiple of
    /// `modulo_bits`. With `once`, nothing is added past the first block.
    Padding {
        modulo_bits: usize,
        offset: i64,
        once: bool,
        fill: u8,
    },
}

impl RelationKind {
    /// The result is an integer encoded through the relation's `output_type`.
    pub fn is_encoded(&self) -> bool {
        !matches!(self, RelationKind::Value | RelationKind::Padding { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub kind: RelationKind,
    pub dependencies: Vec<Dependency>,
    /// Fixed-size encoding of the computed integer; ignored for `Value` and `Padding`.
    pub output_type: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VariableKind {
    Data(Data),
    Alt(Alt),
    Agg(Vec<Variable>),
    Repeat(Repeat),
    Relation(Relation),
}

/// A grammar node.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    id: VarId,
    name: String,
    scope: Scope,
    kind: VariableKind,
}

impl Variable {
    pub fn new(name: impl Into<String>, kind: VariableKind) -> Self {
        Variable::with_id(VarId::fresh(), name, kind)
    }

    /// Build with a pre-allocated id (used when references are resolved before the node exists).
    pub fn with_id(id: VarId, name: impl Into<String>, kind: VariableKind) -> Self {
        Variable {
            id,
            name: name.into(),
            scope: Scope::Ephemeral,
            kind,
        }
    }

    pub fn data(data_type: DataType) -> Self {
        Variable::new("data", VariableKind::Data(Data { data_type, value: None }))
    }

    /// Data leaf holding a literal value.
    pub fn fixed(value: impl Into<Bits>) -> Self {
        let value = value.into();
        let data_type = if value.is_byte_aligned() {
            DataType::raw_fixed(value.byte_len())
        } else {
            DataType::bits(value.len(), value.len())
        };
        Variable::new(
            "data",
            VariableKind::Data(Data {
                data_type,
                value: Some(value),
            }),
        )
    }

    /// ASCII literal.
    pub fn ascii(text: &str) -> Self {
        Variable::new(
            "data",
            VariableKind::Data(Data {
                data_type: DataType::ascii(text.len(), text.len()),
                value: Some(Bits::from(text)),
            }),
        )
    }

    pub fn alt(children: Vec<Variable>) -> Self {
        Variable::new("alt", VariableKind::Alt(Alt { children, weights: None }))
    }

    pub fn agg(children: Vec<Variable>) -> Self {
        Variable::new("agg", VariableKind::Agg(children))
    }

    pub fn repeat(child: Variable, count: CountSpec) -> Self {
        Variable::new(
            "repeat",
            VariableKind::Repeat(Repeat {
                child: Box::new(child),
                count,
                delimiter: None,
            }),
        )
    }

    pub fn relation(kind: RelationKind, dependencies: Vec<Dependency>, output_type: DataType) -> Self {
        let name = match kind {
            RelationKind::Size { .. } => "size",
            RelationKind::Value => "value",
            RelationKind::Checksum => "checksum",
            RelationKind::Crc(_) => "crc",
            RelationKind::Padding { .. } => "padding",
        };
        Variable::new(
            name,
            VariableKind::Relation(Relation {
                kind,
                dependencies,
                output_type,
            }),
        )
    }

    /// Byte count of `dependencies`, encoded as `output_type`.
    pub fn size(dependencies: Vec<Dependency>, output_type: DataType) -> Self {
        Variable::relation(
            RelationKind::Size {
                unit_bits: 8,
                offset: 0,
            },
            dependencies,
            output_type,
        )
    }

    pub fn value(dependencies: Vec<Dependency>) -> Self {
        Variable::relation(RelationKind::Value, dependencies, DataType::raw(0, 0))
    }

    /// Zero-byte padding of `dependencies` up to a multiple of `modulo_bits`.
    pub fn padding(dependencies: Vec<Dependency>, modulo_bits: usize) -> Self {
        Variable::relation(
            RelationKind::Padding {
                modulo_bits,
                offset: 0,
                once: false,
                fill: 0,
            },
            dependencies,
            DataType::raw(0, 0),
        )
    }

    pub fn checksum(dependencies: Vec<Dependency>) -> Self {
        Variable::relation(RelationKind::Checksum, dependencies, DataType::uint16(Endianness::Big))
    }

    pub fn crc32(dependencies: Vec<Dependency>) -> Self {
        Variable::relation(
            RelationKind::Crc(CRC32_ISO_HDLC),
            dependencies,
            DataType::uint32(Endianness::Big),
        )
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn persistent(self) -> Self {
        self.with_scope(Scope::Persistent)
    }

    /// Alt weights; ignored on other kinds.
    pub fn with_weights(mut self, weights: Vec<u32>) -> Self {
        if let VariableKind::Alt(alt) = &mut self.kind {
            alt.weights = Some(weights);
        }
        self
    }

    /// Repeat delimiter; ignored on other kinds.
    pub fn with_delimiter(mut self, delimiter: impl Into<Bits>) -> Self {
        if let VariableKind::Repeat(r) = &mut self.kind {
            r.delimiter = Some(delimiter.into());
        }
        self
    }

    /// Size offset (in units) or padding offset (in bits); ignored on other kinds.
    pub fn with_offset(mut self, offset: i64) -> Self {
        if let VariableKind::Relation(Relation {
            kind: RelationKind::Size { offset: o, .. } | RelationKind::Padding { offset: o, .. },
            ..
        }) = &mut self.kind
        {
            *o = offset;
        }
        self
    }

    /// Padding filler byte, repeated bit by bit; ignored on other kinds.
    pub fn with_fill(mut self, byte: u8) -> Self {
        if let VariableKind::Relation(Relation {
            kind: RelationKind::Padding { fill, .. },
            ..
        }) = &mut self.kind
        {
            *fill = byte;
        }
        self
    }

    /// Pad only while the covered bits do not exceed one block; ignored on other kinds.
    pub fn pad_once(mut self) -> Self {
        if let VariableKind::Relation(Relation {
            kind: RelationKind::Padding { once, .. },
            ..
        }) = &mut self.kind
        {
            *once = true;
        }
        self
    }

    /// Size counting unit in bits (8 counts bytes, 1 counts bits); ignored on other kinds.
    pub fn with_unit_bits(mut self, unit: usize) -> Self {
        if let VariableKind::Relation(Relation {
            kind: RelationKind::Size { unit_bits, .. },
            ..
        }) = &mut self.kind
        {
            *unit_bits = unit.max(1);
        }
        self
    }

    pub fn id(&self) -> VarId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn kind(&self) -> &VariableKind {
        &self.kind
    }

    pub fn is_persistent(&self) -> bool {
        self.scope == Scope::Persistent
    }

    /// Reference to this variable for relations and repeat counts.
    pub fn dep(&self) -> Dependency {
        Dependency::Variable(self.id)
    }

    /// Direct children in declaration order.
    pub fn children(&self) -> Vec<&Variable> {
        match &self.kind {
            VariableKind::Data(_) | VariableKind::Relation(_) => Vec::new(),
            VariableKind::Alt(alt) => alt.children.iter().collect(),
            VariableKind::Agg(children) => children.iter().collect(),
            VariableKind::Repeat(r) => vec![r.child.as_ref()],
        }
    }

    /// This node and all its descendants, pre-order.
    pub fn walk(&self) -> Vec<&Variable> {
        let mut out = vec![self];
        for child in self.children() {
            out.extend(child.walk());
        }
        out
    }
}

/// A named structural unit: one domain variable, or ordered child fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    id: FieldId,
    name: String,
    domain: Option<Variable>,
    children: Vec<Field>,
}

impl Field {
    pub fn new(name: impl Into<String>, domain: Variable) -> Self {
        Field::with_id(FieldId::fresh(), name, Some(domain), Vec::new())
    }

    /// A field that groups `children` (a message or sub-header).
    pub fn group(name: impl Into<String>, children: Vec<Field>) -> Self {
        Field::with_id(FieldId::fresh(), name, None, children)
    }

    /// A field without domain. Specializing or parsing it is a grammar error.
    pub fn empty(name: impl Into<String>) -> Self {
        Field::with_id(FieldId::fresh(), name, None, Vec::new())
    }

    pub fn with_id(id: FieldId, name: impl Into<String>, domain: Option<Variable>, children: Vec<Field>) -> Self {
        Field {
            id,
            name: name.into(),
            domain,
            children,
        }
    }

    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> Option<&Variable> {
        self.domain.as_ref()
    }

    pub fn children(&self) -> &[Field] {
        &self.children
    }

    pub fn dep(&self) -> Dependency {
        Dependency::Field(self.id)
    }

    /// Child field by name, searched depth-first.
    pub fn find(&self, name: &str) -> Option<&Field> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Variable by name anywhere under this field.
    pub fn find_variable(&self, name: &str) -> Option<&Variable> {
        if let Some(v) = self
            .domain
            .as_ref()
            .and_then(|d| d.walk().into_iter().find(|v| v.name() == name))
        {
            return Some(v);
        }
        self.children.iter().find_map(|c| c.find_variable(name))
    }
}
