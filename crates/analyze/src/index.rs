//! Lookup tables shared by every tracker pass over one program unit.

use ctxeffects_core::{Callable, Program, TypeHierarchy};
use std::collections::HashMap;

#[derive(Debug)]
pub struct ProgramIndex<'p> {
    callables: HashMap<String, &'p Callable>,
    hierarchy: TypeHierarchy,
}

impl<'p> ProgramIndex<'p> {
    pub fn new(program: &'p Program) -> Self {
        ProgramIndex {
            callables: program.callables.iter().map(|c| (c.id(), c)).collect(),
            hierarchy: program.hierarchy(),
        }
    }

    pub fn callable(&self, id: &str) -> Option<&'p Callable> {
        self.callables.get(id).copied()
    }

    /// Declaring class of a member callable.
    pub fn owner_of(&self, id: &str) -> Option<&'p str> {
        self.callable(id).and_then(|c| c.owner.as_deref())
    }

    pub fn hierarchy(&self) -> &TypeHierarchy {
        &self.hierarchy
    }
}
