// Copyright 2018-2019 Joe Neeman.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
//
// See the LICENSE-APACHE or LICENSE-MIT files at the top-level directory
// of this distribution.

use std::collections::HashMap;

use crate::Error;

/// An interned edge-type name.
pub type TypeId = u32;

/// An interned property-key name.
pub type KeyId = u32;

/// An edge-type constraint: either a concrete interned type, or the distinguished "any" value
/// that matches every type during adjacency filtering.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TypeFilter {
    /// Matches any edge type.
    Any,
    /// Matches only the given type.
    Only(TypeId),
}

impl TypeFilter {
    /// Does this filter accept the given type?
    pub fn matches(self, ty: TypeId) -> bool {
        match self {
            TypeFilter::Any => true,
            TypeFilter::Only(t) => t == ty,
        }
    }
}

// Dense string-to-u32 interner. Ids are handed out in insertion order, so they are small and
// can index side tables directly.
#[derive(Clone, Debug, Default)]
struct Interner {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl Interner {
    fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_owned());
        self.ids.insert(name.to_owned(), id);
        id
    }

    fn get(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    fn name(&self, id: u32) -> &str {
        &self.names[id as usize]
    }
}

/// Interns edge-type and property-key strings to small dense integers.
///
/// Mutation paths intern on demand; query planning only looks names up, and an unknown name at
/// plan time is an error. The registry is plain data meant to be owned by whoever owns the
/// store, rather than living in a process-wide singleton, so tests can run against isolated
/// registries.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    types: Interner,
    keys: Interner,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> TypeRegistry {
        TypeRegistry::default()
    }

    /// Interns an edge-type name, creating it if absent.
    pub fn intern_type(&mut self, name: &str) -> TypeId {
        self.types.intern(name)
    }

    /// Looks up an edge-type constraint for query planning.
    ///
    /// `None` means the pattern left the type unconstrained and resolves to
    /// [`TypeFilter::Any`]; a name that was never interned is an error.
    pub fn lookup_type(&self, name: Option<&str>) -> Result<TypeFilter, Error> {
        match name {
            None => Ok(TypeFilter::Any),
            Some(n) => self
                .types
                .get(n)
                .map(TypeFilter::Only)
                .ok_or_else(|| Error::UnknownType(n.to_owned())),
        }
    }

    /// The name that was interned as `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not handed out by this registry.
    pub fn type_name(&self, id: TypeId) -> &str {
        self.types.name(id)
    }

    /// Interns a property-key name, creating it if absent.
    pub fn intern_key(&mut self, name: &str) -> KeyId {
        self.keys.intern(name)
    }

    /// Looks up a property key for query planning; unknown names are an error.
    pub fn lookup_key(&self, name: &str) -> Result<KeyId, Error> {
        self.keys
            .get(name)
            .ok_or_else(|| Error::UnknownProperty(name.to_owned()))
    }

    /// The name that was interned as `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not handed out by this registry.
    pub fn key_name(&self, id: KeyId) -> &str {
        self.keys.name(id)
    }
}
