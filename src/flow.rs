//! Flow parsing: split a continuous stream into consecutive messages.
//!
//! Every decomposition of the stream into messages matching one of the
//! candidate grammars is produced lazily, depth-first, in grammar order and
//! preferred-binding order.

use crate::abstractor::abstract_field;
use crate::config::{EngineConfig, Limits};
use crate::error::EngineError;
use crate::memory::Memory;
use crate::path::Binding;
use crate::value::Bits;
use crate::variable::Field;
use std::collections::VecDeque;
use tracing::trace;

/// One message of a decomposition.
#[derive(Debug, Clone)]
pub struct FlowMessage<'g> {
    pub grammar: &'g Field,
    /// Position of `grammar` in the candidate list.
    pub grammar_index: usize,
    pub binding: Binding,
    /// Bits `[start, end)` of the stream covered by this message.
    pub bit_range: (usize, usize),
}

#[derive(Debug, Clone, Default)]
pub struct FlowParser {
    config: EngineConfig,
    memory: Memory,
}

impl FlowParser {
    pub fn new(config: EngineConfig) -> Self {
        FlowParser {
            config,
            memory: Memory::new(),
        }
    }

    /// Memory the first message of every decomposition starts from.
    pub fn with_memory(mut self, memory: Memory) -> Self {
        self.memory = memory;
        self
    }

    /// Lazily enumerate the decompositions of `buffer` over `grammars`.
    pub fn parse_flow<'g>(&self, buffer: &Bits, grammars: &'g [Field]) -> FlowIter<'g> {
        let root = Frame {
            offset: 0,
            memory: self.memory.duplicate(),
            next_grammar: 0,
            pending: VecDeque::new(),
            prefix: Vec::new(),
        };
        FlowIter {
            grammars,
            buffer: buffer.clone(),
            limits: self.config.limits,
            stack: if buffer.is_empty() { Vec::new() } else { vec![root] },
        }
    }
}

struct Frame<'g> {
    offset: usize,
    memory: Memory,
    next_grammar: usize,
    /// Bindings found at `offset`, not yet explored further.
    pending: VecDeque<(usize, Binding)>,
    prefix: Vec<FlowMessage<'g>>,
}

/// Iterator over complete decompositions. Fatal errors end the iteration
/// after being yielded once.
pub struct FlowIter<'g> {
    grammars: &'g [Field],
    buffer: Bits,
    limits: Limits,
    stack: Vec<Frame<'g>>,
}

impl<'g> Iterator for FlowIter<'g> {
    type Item = Result<Vec<FlowMessage<'g>>, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;

            if let Some((grammar_index, binding)) = frame.pending.pop_front() {
                let consumed = binding.consumed_bits();
                if consumed == 0 {
                    continue;
                }
                let start = frame.offset;
                let end = start + consumed;
                let memory = binding.memory().duplicate();
                let mut prefix = frame.prefix.clone();
                prefix.push(FlowMessage {
                    grammar: &self.grammars[grammar_index],
                    grammar_index,
                    binding,
                    bit_range: (start, end),
                });
                if end >= self.buffer.len() {
                    return Some(Ok(prefix));
                }
                if prefix.len() >= self.limits.max_flow_messages {
                    self.stack.clear();
                    return Some(Err(EngineError::limit("flow", self.limits.max_flow_messages)));
                }
                self.stack.push(Frame {
                    offset: end,
                    memory,
                    next_grammar: 0,
                    pending: VecDeque::new(),
                    prefix,
                });
                continue;
            }

            if frame.next_grammar < self.grammars.len() {
                let grammar_index = frame.next_grammar;
                frame.next_grammar += 1;
                let grammar = &self.grammars[grammar_index];
                let remainder = self.buffer.slice(frame.offset, self.buffer.len());
                match abstract_field(grammar, &remainder, &frame.memory, false, &self.limits) {
                    Ok(bindings) => {
                        trace!(
                            grammar = grammar.name(),
                            offset = frame.offset,
                            candidates = bindings.len(),
                            "flow step"
                        );
                        frame
                            .pending
                            .extend(bindings.into_iter().map(|b| (grammar_index, b)));
                    }
                    Err(EngineError::UnsatisfiableRelation { location, reason }) => {
                        trace!(grammar = grammar.name(), %location, %reason, "flow dead end");
                    }
                    Err(e) => {
                        self.stack.clear();
                        return Some(Err(e));
                    }
                }
                continue;
            }

            self.stack.pop();
        }
    }
}
