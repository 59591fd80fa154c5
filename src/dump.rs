//! Format bindings for display (dump text). Leaf values are rendered through
//! the type of the field's domain when it has one.

use crate::codec::DataType;
use crate::flow::FlowMessage;
use crate::path::Binding;
use crate::value::Bits;
use crate::variable::{Field, Variable, VariableKind};

fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

/// Render `bits` as a value of `data_type`: integers in decimal, ASCII quoted,
/// everything else as hex.
pub fn format_typed(data_type: &DataType, bits: &Bits) -> String {
    match data_type {
        DataType::Integer(t) => match t.decode(bits) {
            Some(n) => format!("{}", n),
            None => format!("hex({})", hex_string(&bits.to_bytes())),
        },
        DataType::Ascii { .. } => match bits.as_bytes().map(String::from_utf8_lossy) {
            Some(s) => format!("{:?}", s),
            None => format!("{}", bits),
        },
        DataType::BitArray { .. } if !bits.is_byte_aligned() => format!("{}", bits),
        _ => format!("hex({})", hex_string(&bits.to_bytes())),
    }
}

fn format_domain(domain: &Variable, binding: &Binding, bits: &Bits) -> String {
    match domain.kind() {
        VariableKind::Data(d) => format_typed(&d.data_type, bits),
        VariableKind::Relation(r) if r.kind.is_encoded() => format_typed(&r.output_type, bits),
        VariableKind::Repeat(_) => {
            let n = binding.repetitions(domain.id()).unwrap_or(0);
            format!("hex({}) [{} items]", hex_string(&bits.to_bytes()), n)
        }
        _ => format!("hex({})", hex_string(&bits.to_bytes())),
    }
}

/// Multi-line dump of the fields of `root` as bound in `binding`.
pub fn format_binding(root: &Field, binding: &Binding) -> String {
    let mut lines = Vec::new();
    dump_field(root, binding, 0, &mut lines);
    lines.join("\n")
}

fn dump_field(field: &Field, binding: &Binding, indent: usize, lines: &mut Vec<String>) {
    let pad = "  ".repeat(indent);
    let value = match (binding.field(field.id()), field.domain()) {
        (None, _) => "<unbound>".to_string(),
        (Some(bits), Some(domain)) => format_domain(domain, binding, bits),
        (Some(bits), None) if field.children().is_empty() => format!("{}", bits),
        (Some(bits), None) => format!("{} bits", bits.len()),
    };
    lines.push(format!("{}{}: {}", pad, field.name(), value));
    for child in field.children() {
        dump_field(child, binding, indent + 1, lines);
    }
}

/// Dump of one flow decomposition, one block per message.
pub fn format_flow(messages: &[FlowMessage<'_>]) -> String {
    messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let (start, end) = m.bit_range;
            format!(
                "[{}] {} bits {}..{}\n{}",
                i,
                m.grammar.name(),
                start,
                end,
                format_binding(m.grammar, &m.binding)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
