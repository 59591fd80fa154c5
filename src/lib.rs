//! # protosynth: grammar-driven message specialization and abstraction
//!
//! A symbol grammar describes a family of binary messages as a tree of fields
//! whose domains are variables: literal or typed data, alternatives,
//! aggregates, repetitions, and relations (size, value copy, checksum, CRC)
//! linking one part of a message to others.
//!
//! Two dual operations run over the same grammar:
//!
//! - **specialization** produces a concrete message, resolving relations
//!   through deferred callbacks so a length field can precede its payload;
//! - **abstraction** parses a buffer and returns every binding of the grammar
//!   that matches it, in preference order. [`FlowParser`] extends this to a
//!   stream of consecutive messages.
//!
//! Values of PERSISTENT variables are carried across calls in a [`Memory`].
//!
//! ## Grammar language
//!
//! ```text
//! symbol Packet {
//!     field size: size(@payload, uint16 be);
//!     field payload: data(raw(0..10));
//! }
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use protosynth::{load, Abstractor, Bits, EngineConfig, Specializer};
//!
//! let grammar = load("symbol P { field len: size(@body); field body: data(ascii(1..8)); }").unwrap();
//! let packet = grammar.symbol("P").unwrap();
//! let message = Specializer::new(EngineConfig::default()).specialize(packet).unwrap();
//! let bindings = Abstractor::default().parse(packet, &message.bits(), true).unwrap();
//! assert!(!bindings.is_empty());
//! ```

pub mod abstractor;
pub mod ast;
pub mod checksum;
pub mod codec;
pub mod config;
pub mod dump;
pub mod error;
pub mod flow;
pub mod grammar;
pub mod memory;
pub mod parser;
pub mod path;
mod relation;
pub mod specializer;
pub mod value;
pub mod variable;

pub use abstractor::Abstractor;
pub use ast::{Protocol, ResolvedGrammar};
pub use checksum::{internet_checksum, CrcAlgorithm};
pub use codec::{DataType, Endianness, IntegerType};
pub use config::{EngineConfig, Limits};
pub use error::EngineError;
pub use flow::{FlowIter, FlowMessage, FlowParser};
pub use grammar::GrammarIndex;
pub use memory::Memory;
pub use parser::{load, parse, parse_file};
pub use path::{Binding, Callback, Path};
pub use specializer::{Presets, Specialization, Specializer};
pub use value::Bits;
pub use variable::{CountSpec, Dependency, Field, FieldId, RelationKind, Scope, VarId, Variable, VariableKind};
