//! # Conflict Resolution
//!
//! Purpose: Hand the siblings of a conflicted object to application code and
//! bring the object back to a single value.
//!
//! ## Design Principles
//! 1. **Explicit Resolvers**: Resolution always goes through a `Resolver`
//!    the caller supplies; nothing is merged automatically.
//! 2. **Memory Only**: Resolving changes the in-memory object. Persisting the
//!    merge (and getting a dominating clock) takes another `store()`.
//! 3. **Failure Keeps Siblings**: A failing resolver leaves the object
//!    conflicted so the caller can retry.
//!
//! ## State Machine
//! ```text
//! Clean --fetch/reload with siblings--> Conflicted
//! Conflicted --resolve()--> Resolving --Ok--> Clean
//!                                     --Err--> Conflicted
//! ```

use tracing::{debug, info};

use crate::error::{ClientError, ClientResult};
use crate::object::{RObject, Sibling};

/// Where an object sits in the resolution cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictState {
    Clean,
    Conflicted,
    Resolving,
}

/// Application hook that turns a conflicted object into a single value.
///
/// `sibling_count` is the number of non-empty siblings. Implementations
/// typically call [`RObject::copy_siblings_into`] or
/// [`RObject::non_empty_siblings`] and then set `data` (and friends) on the
/// object.
pub trait Resolver {
    fn resolve(&mut self, object: &mut RObject, sibling_count: usize) -> ClientResult<()>;
}

impl<F> Resolver for F
where
    F: FnMut(&mut RObject, usize) -> ClientResult<()>,
{
    fn resolve(&mut self, object: &mut RObject, sibling_count: usize) -> ClientResult<()> {
        self(object, sibling_count)
    }
}

/// Resolver for types that never supply one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResolver;

impl Resolver for NoResolver {
    fn resolve(&mut self, _object: &mut RObject, _sibling_count: usize) -> ClientResult<()> {
        Err(ClientError::ResolveNotImplemented)
    }
}

impl RObject {
    /// True while the object holds unreconciled siblings.
    pub fn conflict(&self) -> bool {
        self.state != ConflictState::Clean
    }

    pub fn conflict_state(&self) -> ConflictState {
        self.state
    }

    /// Number of siblings that carry data.
    pub fn sibling_count(&self) -> usize {
        self.non_empty_siblings().count()
    }

    pub fn non_empty_siblings(&self) -> impl Iterator<Item = &Sibling> {
        self.siblings.iter().filter(|sibling| !sibling.is_empty())
    }

    /// Copies the non-empty siblings into `dest`, which must be exactly as
    /// long as [`sibling_count`](Self::sibling_count).
    pub fn copy_siblings_into(&self, dest: &mut [Sibling]) -> ClientResult<()> {
        let expected = self.sibling_count();
        if dest.len() != expected {
            return Err(ClientError::SiblingCountMismatch {
                expected,
                actual: dest.len(),
            });
        }
        for (slot, sibling) in dest.iter_mut().zip(self.non_empty_siblings()) {
            slot.clone_from(sibling);
        }
        Ok(())
    }

    /// Makes the non-empty sibling at `index` the object's value.
    ///
    /// Returns false when there is no such sibling.
    pub fn adopt_sibling(&mut self, index: usize) -> bool {
        let found = self.non_empty_siblings().nth(index).cloned();
        match found {
            Some(sibling) => {
                self.adopt(sibling);
                true
            }
            None => false,
        }
    }

    /// Runs `resolver` on a conflicted object. Clean objects are left alone.
    pub fn resolve<R: Resolver + ?Sized>(&mut self, resolver: &mut R) -> ClientResult<()> {
        if !self.conflict() {
            return Ok(());
        }
        let count = self.sibling_count();
        self.state = ConflictState::Resolving;
        match resolver.resolve(self, count) {
            Ok(()) => {
                self.siblings.clear();
                self.state = ConflictState::Clean;
                info!(bucket = self.bucket(), key = self.key(), siblings = count, "conflict resolved");
                Ok(())
            }
            Err(err) => {
                self.state = ConflictState::Conflicted;
                debug!(bucket = self.bucket(), key = self.key(), error = %err, "resolver failed");
                Err(err)
            }
        }
    }
}
