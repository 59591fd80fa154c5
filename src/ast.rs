//! Abstract Syntax Tree for the symbol grammar language, and its lowering into
//! [`Field`]/[`Variable`] trees.

use crate::checksum::{CrcAlgorithm, CRC16_ARC, CRC16_CCITT_FALSE, CRC32_ISO_HDLC};
use crate::codec::{DataType, Endianness};
use crate::value::Bits;
use crate::variable::{
    Alt, CountSpec, Data, Dependency, Field, FieldId, Relation, RelationKind, Repeat, Scope, VarId, Variable,
    VariableKind,
};
use std::collections::HashMap;

/// Root of a grammar source: a list of symbols.
#[derive(Debug, Clone, Default)]
pub struct Protocol {
    pub symbols: Vec<SymbolDecl>,
}

/// `symbol NAME { field* }`
#[derive(Debug, Clone)]
pub struct SymbolDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

/// `field NAME: var;` or `field NAME { field* }`.
#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: String,
    pub domain: Option<VarDecl>,
    pub children: Vec<FieldDecl>,
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    /// Set by `NAME = var`; makes the variable addressable as `$NAME`.
    pub name: Option<String>,
    pub persistent: bool,
    pub kind: VarDeclKind,
}

#[derive(Debug, Clone)]
pub enum VarDeclKind {
    Data {
        data_type: Option<DataType>,
        value: Option<Literal>,
    },
    /// Choices with their optional weight.
    Alt(Vec<(Option<u32>, VarDecl)>),
    Agg(Vec<VarDecl>),
    Repeat {
        child: Box<VarDecl>,
        count: CountDecl,
        delimiter: Option<Literal>,
    },
    Relation(RelationDecl),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountDecl {
    Fixed(usize),
    Range(usize, usize),
    Reference(Reference),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `@name`
    Field(String),
    /// `$name`
    Variable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationOp {
    Size,
    Value,
    Checksum,
    Crc32,
    Crc16,
    Crc16Ccitt,
    Padding,
}

#[derive(Debug, Clone)]
pub struct RelationDecl {
    pub op: RelationOp,
    pub references: Vec<Reference>,
    pub output_type: Option<DataType>,
    pub offset: Option<i64>,
    /// Counting unit in bits (`unit = bits` is 1, `unit = bytes` is 8).
    pub unit_bits: Option<usize>,
    /// Padding block size, in `unit`s.
    pub modulo: Option<usize>,
    pub fill: Option<u8>,
    pub once: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Int(i128),
    Hex(Vec<u8>),
    String(String),
}

impl Literal {
    /// Bits of the literal as a value of `data_type`.
    fn to_bits(&self, data_type: Option<&DataType>) -> Result<Bits, String> {
        match (self, data_type) {
            (Literal::String(s), _) => Ok(Bits::from(s.as_str())),
            (Literal::Hex(bytes), _) => Ok(Bits::from(bytes.clone())),
            (Literal::Int(n), Some(DataType::Integer(t))) => t
                .encode(*n)
                .ok_or_else(|| format!("{} does not fit {}", n, DataType::Integer(*t))),
            (Literal::Int(n), Some(t)) => u64::try_from(*n)
                .ok()
                .and_then(|v| t.encode_unsigned(v))
                .ok_or_else(|| format!("{} cannot be encoded as {}", n, t)),
            (Literal::Int(n), None) => Err(format!("integer literal {} needs a type", n)),
        }
    }
}

/// Symbols lowered into engine trees, addressable by name.
#[derive(Debug, Clone)]
pub struct ResolvedGrammar {
    symbols: Vec<Field>,
    by_name: HashMap<String, usize>,
}

impl ResolvedGrammar {
    pub fn resolve(protocol: &Protocol) -> Result<Self, String> {
        let mut symbols = Vec::with_capacity(protocol.symbols.len());
        let mut by_name = HashMap::new();
        for (i, symbol) in protocol.symbols.iter().enumerate() {
            if by_name.insert(symbol.name.clone(), i).is_some() {
                return Err(format!("Duplicate symbol name: {}", symbol.name));
            }
            symbols.push(lower_symbol(symbol).map_err(|e| format!("symbol {}: {}", symbol.name, e))?);
        }
        Ok(ResolvedGrammar { symbols, by_name })
    }

    pub fn symbol(&self, name: &str) -> Option<&Field> {
        self.by_name.get(name).map(|&i| &self.symbols[i])
    }

    /// Symbols in declaration order.
    pub fn symbols(&self) -> &[Field] {
        &self.symbols
    }

    pub fn into_symbols(self) -> Vec<Field> {
        self.symbols
    }
}

/// Names visible to references inside one symbol. A field name declared twice
/// maps to `None` and is an error only when referenced.
#[derive(Default)]
struct Names {
    fields: HashMap<String, Option<FieldId>>,
    variables: HashMap<String, VarId>,
}

impl Names {
    fn collect_field(&mut self, decl: &FieldDecl) -> Result<(), String> {
        self.fields
            .entry(decl.name.clone())
            .and_modify(|id| *id = None)
            .or_insert_with(|| Some(FieldId::fresh()));
        if let Some(var) = &decl.domain {
            self.collect_var(var)?;
        }
        decl.children.iter().try_for_each(|c| self.collect_field(c))
    }

    fn collect_var(&mut self, decl: &VarDecl) -> Result<(), String> {
        if let Some(name) = &decl.name {
            if self.variables.insert(name.clone(), VarId::fresh()).is_some() {
                return Err(format!("duplicate variable name '{}'", name));
            }
        }
        match &decl.kind {
            VarDeclKind::Alt(choices) => choices.iter().try_for_each(|(_, v)| self.collect_var(v)),
            VarDeclKind::Agg(children) => children.iter().try_for_each(|v| self.collect_var(v)),
            VarDeclKind::Repeat { child, .. } => self.collect_var(child),
            VarDeclKind::Data { .. } | VarDeclKind::Relation(_) => Ok(()),
        }
    }

    fn dependency(&self, reference: &Reference) -> Result<Dependency, String> {
        match reference {
            Reference::Field(name) => match self.fields.get(name) {
                Some(Some(id)) => Ok(Dependency::Field(*id)),
                Some(None) => Err(format!("ambiguous field reference '@{}'", name)),
                None => Err(format!("unknown field '@{}'", name)),
            },
            Reference::Variable(name) => self
                .variables
                .get(name)
                .map(|id| Dependency::Variable(*id))
                .ok_or_else(|| format!("unknown variable '${}'", name)),
        }
    }
}

fn lower_symbol(symbol: &SymbolDecl) -> Result<Field, String> {
    let mut names = Names::default();
    symbol.fields.iter().try_for_each(|f| names.collect_field(f))?;
    let children = symbol
        .fields
        .iter()
        .map(|f| lower_field(f, &names))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Field::group(symbol.name.clone(), children))
}

fn lower_field(decl: &FieldDecl, names: &Names) -> Result<Field, String> {
    let id = names.fields.get(&decl.name).copied().flatten().unwrap_or_else(FieldId::fresh);
    let domain = decl
        .domain
        .as_ref()
        .map(|v| lower_var(v, &decl.name, names))
        .transpose()
        .map_err(|e| format!("field {}: {}", decl.name, e))?;
    let children = decl
        .children
        .iter()
        .map(|c| lower_field(c, names))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Field::with_id(id, decl.name.clone(), domain, children))
}

/// Lower a variable; unnamed variables take `default_name`.
fn lower_var(decl: &VarDecl, default_name: &str, names: &Names) -> Result<Variable, String> {
    let (id, name) = match &decl.name {
        Some(n) => (names.variables.get(n).copied().unwrap_or_else(VarId::fresh), n.as_str()),
        None => (VarId::fresh(), default_name),
    };
    let kind = match &decl.kind {
        VarDeclKind::Data { data_type, value } => lower_data(data_type.as_ref(), value.as_ref())?,
        VarDeclKind::Alt(choices) => {
            let children = choices
                .iter()
                .map(|(_, v)| lower_var(v, "alt", names))
                .collect::<Result<Vec<_>, _>>()?;
            let weights = if choices.iter().any(|(w, _)| w.is_some()) {
                Some(choices.iter().map(|(w, _)| w.unwrap_or(1)).collect())
            } else {
                None
            };
            VariableKind::Alt(Alt { children, weights })
        }
        VarDeclKind::Agg(children) => VariableKind::Agg(
            children
                .iter()
                .map(|v| lower_var(v, "agg", names))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        VarDeclKind::Repeat {
            child,
            count,
            delimiter,
        } => {
            let count = match count {
                CountDecl::Fixed(n) => CountSpec::Fixed(*n),
                CountDecl::Range(min, max) => CountSpec::Range { min: *min, max: *max },
                CountDecl::Reference(r) => CountSpec::Dependency(names.dependency(r)?),
            };
            let delimiter = match delimiter {
                None => None,
                Some(Literal::Int(_)) => return Err("repeat delimiter must be a string or hex literal".into()),
                Some(lit) => Some(lit.to_bits(None)?),
            };
            VariableKind::Repeat(Repeat {
                child: Box::new(lower_var(child, "item", names)?),
                count,
                delimiter,
            })
        }
        VarDeclKind::Relation(r) => VariableKind::Relation(lower_relation(r, names)?),
    };
    let scope = if decl.persistent { Scope::Persistent } else { Scope::Ephemeral };
    Ok(Variable::with_id(id, name, kind).with_scope(scope))
}

fn lower_data(data_type: Option<&DataType>, value: Option<&Literal>) -> Result<VariableKind, String> {
    let data = match (data_type, value) {
        (Some(t), None) => Data {
            data_type: t.clone(),
            value: None,
        },
        (Some(t), Some(lit)) => {
            let bits = lit.to_bits(Some(t))?;
            if !t.accepts(&bits) {
                return Err(format!("literal {} is not a valid {}", bits, t));
            }
            Data {
                data_type: t.clone(),
                value: Some(bits),
            }
        }
        (None, Some(lit)) => {
            let bits = lit.to_bits(None)?;
            let data_type = match lit {
                Literal::String(s) => DataType::ascii(s.len(), s.len()),
                _ => DataType::raw_fixed(bits.byte_len()),
            };
            Data {
                data_type,
                value: Some(bits),
            }
        }
        (None, None) => return Err("data needs a type or a literal".into()),
    };
    Ok(VariableKind::Data(data))
}

fn lower_relation(decl: &RelationDecl, names: &Names) -> Result<Relation, String> {
    let dependencies = decl
        .references
        .iter()
        .map(|r| names.dependency(r))
        .collect::<Result<Vec<_>, _>>()?;
    let sized = matches!(decl.op, RelationOp::Size | RelationOp::Padding);
    if !sized && (decl.offset.is_some() || decl.unit_bits.is_some()) {
        return Err("offset and unit only apply to size and padding relations".into());
    }
    if decl.op != RelationOp::Padding && (decl.modulo.is_some() || decl.fill.is_some() || decl.once) {
        return Err("modulo, fill and once only apply to padding relations".into());
    }
    let crc = |algorithm: CrcAlgorithm| {
        let width = algorithm.width as usize;
        (RelationKind::Crc(algorithm), DataType::integer(width, false, Endianness::Big))
    };
    let (kind, default_type) = match decl.op {
        RelationOp::Size => (
            RelationKind::Size {
                unit_bits: decl.unit_bits.unwrap_or(8),
                offset: decl.offset.unwrap_or(0),
            },
            DataType::uint8(),
        ),
        RelationOp::Value => {
            if decl.output_type.is_some() {
                return Err("value relations take the type of their dependencies".into());
            }
            (RelationKind::Value, DataType::raw(0, 0))
        }
        RelationOp::Checksum => (RelationKind::Checksum, DataType::uint16(Endianness::Big)),
        RelationOp::Crc32 => crc(CRC32_ISO_HDLC),
        RelationOp::Crc16 => crc(CRC16_ARC),
        RelationOp::Crc16Ccitt => crc(CRC16_CCITT_FALSE),
        RelationOp::Padding => {
            if decl.output_type.is_some() {
                return Err("padding relations take no type".into());
            }
            // Padding lengths are counted in bits unless `unit = bytes`.
            let unit = decl.unit_bits.unwrap_or(1);
            let modulo = decl.modulo.ok_or("padding needs a modulo")?;
            let modulo_bits = modulo
                .checked_mul(unit)
                .filter(|m| *m > 0)
                .ok_or_else(|| format!("invalid padding modulo {}", modulo))?;
            (
                RelationKind::Padding {
                    modulo_bits,
                    offset: decl.offset.unwrap_or(0).saturating_mul(unit as i64),
                    once: decl.once,
                    fill: decl.fill.unwrap_or(0),
                },
                DataType::raw(0, 0),
            )
        }
    };
    Ok(Relation {
        kind,
        dependencies,
        output_type: decl.output_type.clone().unwrap_or(default_type),
    })
}
