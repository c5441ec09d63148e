// Mapping from template placeholders to partition numbers.
//
// A `QueryMapping` records which placeholder tags a template uses and what
// kind of number each one binds to. Applying a chunk spec to a template
// produces the concrete SQL dispatched to a worker. The mapping keeps the
// partitioning strategy out of the statement-rendering code.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::global::{ChunkId, CHUNK_TAG, SUBCHUNK_TAG};
use crate::query::template::{QueryTemplate, Token};

/// What a placeholder binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    Chunk,
    SubChunk,
}

/// Chunk coverage entry produced by planning: one chunk plus the subchunks
/// involved when the query needs near-neighbour subchunk fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpec {
    pub chunk: ChunkId,
    pub sub_chunks: Vec<ChunkId>,
}

impl ChunkSpec {
    pub fn whole(chunk: ChunkId) -> Self {
        ChunkSpec {
            chunk,
            sub_chunks: Vec::new(),
        }
    }
}

/// One (chunk, subchunk) binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpecSingle {
    pub chunk: ChunkId,
    pub sub_chunk: ChunkId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryMapping {
    subs: BTreeMap<String, Parameter>,
    sub_chunk_tables: BTreeSet<String>,
}

impl QueryMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_entry(&mut self, tag: &str, p: Parameter) {
        self.subs.insert(tag.to_string(), p);
    }

    pub fn insert_chunk_entry(&mut self) {
        self.insert_entry(CHUNK_TAG, Parameter::Chunk);
    }

    pub fn insert_sub_chunk_entry(&mut self) {
        self.insert_entry(SUBCHUNK_TAG, Parameter::SubChunk);
    }

    pub fn insert_sub_chunk_table(&mut self, table: &str) {
        self.sub_chunk_tables.insert(table.to_string());
    }

    /// Fold another mapping into this one.
    pub fn update(&mut self, other: &QueryMapping) {
        for (tag, p) in &other.subs {
            self.subs.insert(tag.clone(), *p);
        }
        for t in &other.sub_chunk_tables {
            self.sub_chunk_tables.insert(t.clone());
        }
    }

    pub fn has_parameter(&self, p: Parameter) -> bool {
        self.subs.values().any(|v| *v == p)
    }

    pub fn has_chunks(&self) -> bool {
        self.has_parameter(Parameter::Chunk)
    }

    pub fn has_sub_chunks(&self) -> bool {
        self.has_parameter(Parameter::SubChunk)
    }

    pub fn sub_chunk_tables(&self) -> impl Iterator<Item = &str> {
        self.sub_chunk_tables.iter().map(String::as_str)
    }

    /// Check that every placeholder the template references has an entry.
    /// Dispatch requires this to hold.
    pub fn validate(&self, template: &QueryTemplate) -> Result<()> {
        for tag in template.placeholders() {
            if !self.subs.contains_key(tag) {
                return Err(Error::Planning(format!(
                    "template placeholder {tag} has no mapping entry"
                )));
            }
        }
        Ok(())
    }

    /// Produce concrete SQL for a whole-chunk binding. Fails if the template
    /// needs a subchunk number.
    pub fn apply(&self, spec: &ChunkSpec, template: &QueryTemplate) -> Result<String> {
        self.substitute(template, spec.chunk, None)
    }

    /// Produce concrete SQL for one (chunk, subchunk) binding.
    pub fn apply_single(
        &self,
        spec: &ChunkSpecSingle,
        template: &QueryTemplate,
    ) -> Result<String> {
        self.substitute(template, spec.chunk, Some(spec.sub_chunk))
    }

    fn substitute(
        &self,
        template: &QueryTemplate,
        chunk: ChunkId,
        sub_chunk: Option<ChunkId>,
    ) -> Result<String> {
        let mut out = String::new();
        for token in template.tokens() {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Placeholder(tag) => {
                    let param = self.subs.get(tag).ok_or_else(|| {
                        Error::Planning(format!("template placeholder {tag} has no mapping entry"))
                    })?;
                    match param {
                        Parameter::Chunk => out.push_str(&chunk.to_string()),
                        Parameter::SubChunk => match sub_chunk {
                            Some(s) => out.push_str(&s.to_string()),
                            None => {
                                return Err(Error::Planning(format!(
                                    "placeholder {tag} needs a subchunk binding"
                                )))
                            }
                        },
                    }
                }
            }
        }
        Ok(out)
    }
}
