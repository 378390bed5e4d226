//! Value stacks.

use num_bigint::BigInt;

use crate::{num::encode_num, ScriptError};

/// Stack of byte strings used for both the main and the alt stack.
///
/// Positions are counted from the top: depth `0` is the most recently pushed
/// element. Every accessor fails with
/// [`ScriptError::InvalidStackOperation`] when the depth is not populated.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScriptStack {
    items: Vec<Vec<u8>>,
}

impl ScriptStack {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Builds a stack whose last item is the top.
    pub fn from_items(items: Vec<Vec<u8>>) -> Self {
        Self { items }
    }

    /// Elements from bottom to top.
    pub fn items(&self) -> &[Vec<u8>] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Vec<u8>> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn last(&self) -> Option<&Vec<u8>> {
        self.items.last()
    }

    pub fn push(&mut self, data: Vec<u8>) {
        self.items.push(data);
    }

    pub fn push_bool(&mut self, value: bool) {
        if value {
            self.push(vec![1]);
        } else {
            self.push(Vec::new());
        }
    }

    pub fn push_num(&mut self, value: &BigInt) {
        self.push(encode_num(value));
    }

    pub fn pop_bytes(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.items.pop().ok_or(ScriptError::InvalidStackOperation)
    }

    /// Fails unless at least `depth` elements are present.
    pub fn require(&self, depth: usize) -> Result<(), ScriptError> {
        if self.items.len() < depth {
            Err(ScriptError::InvalidStackOperation)
        } else {
            Ok(())
        }
    }

    pub fn peek(&self, depth: usize) -> Result<&[u8], ScriptError> {
        let index = self.index_of(depth)?;
        Ok(&self.items[index])
    }

    pub fn remove(&mut self, depth: usize) -> Result<Vec<u8>, ScriptError> {
        let index = self.index_of(depth)?;
        Ok(self.items.remove(index))
    }

    /// Inserts `value` so that it ends up at `depth` from the top.
    pub fn insert(&mut self, depth: usize, value: Vec<u8>) -> Result<(), ScriptError> {
        let index = self
            .items
            .len()
            .checked_sub(depth)
            .ok_or(ScriptError::InvalidStackOperation)?;
        self.items.insert(index, value);
        Ok(())
    }

    pub fn swap(&mut self, a: usize, b: usize) -> Result<(), ScriptError> {
        let a = self.index_of(a)?;
        let b = self.index_of(b)?;
        self.items.swap(a, b);
        Ok(())
    }

    fn index_of(&self, depth: usize) -> Result<usize, ScriptError> {
        if depth >= self.items.len() {
            return Err(ScriptError::InvalidStackOperation);
        }
        Ok(self.items.len() - 1 - depth)
    }
}
