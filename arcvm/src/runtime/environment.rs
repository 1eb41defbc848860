// Environment frames for variable bindings and scope management

use crate::ast::Symbol;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::values::Value;
use indexmap::IndexMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A lexical scope: positional slots, a symbol-to-slot index and a fixed
/// parent link.
///
/// Frames only grow. Appends take the write lock, so a frame shared by
/// closures running in different execution contexts keeps a single append
/// order.
pub struct Environment {
    parent: Option<Arc<Environment>>,
    frame: RwLock<Slots>,
}

#[derive(Debug, Default, Clone)]
struct Slots {
    entries: Vec<(Symbol, Value)>,
    index: IndexMap<Symbol, usize>,
}

impl Slots {
    fn append(&mut self, symbol: Symbol, value: Value) {
        let slot = self.entries.len();
        self.entries.push((symbol.clone(), value));
        // A repeated name shadows the earlier slot.
        self.index.insert(symbol, slot);
    }
}

impl Environment {
    /// Creates a new, empty root environment.
    pub fn new() -> Self {
        Environment {
            parent: None,
            frame: RwLock::new(Slots::default()),
        }
    }

    /// Creates a new child environment that inherits from a parent.
    pub fn with_parent(parent: Arc<Environment>) -> Self {
        Environment {
            parent: Some(parent),
            frame: RwLock::new(Slots::default()),
        }
    }

    /// A new frame with the same parent and a copy of this frame's slots.
    /// Later appends or assignments to either frame are not seen by the
    /// other.
    pub fn fork(&self) -> RuntimeResult<Environment> {
        let slots = self.read()?.clone();
        Ok(Environment {
            parent: self.parent.clone(),
            frame: RwLock::new(slots),
        })
    }

    fn read(&self) -> RuntimeResult<RwLockReadGuard<'_, Slots>> {
        self.frame
            .read()
            .map_err(|e| RuntimeError::InternalError(format!("RwLock poisoned: {}", e)))
    }

    fn write(&self) -> RuntimeResult<RwLockWriteGuard<'_, Slots>> {
        self.frame
            .write()
            .map_err(|e| RuntimeError::InternalError(format!("RwLock poisoned: {}", e)))
    }

    pub fn parent(&self) -> Option<&Arc<Environment>> {
        self.parent.as_ref()
    }

    /// The outermost frame of this chain.
    pub fn root(self: &Arc<Self>) -> Arc<Environment> {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent.clone() {
            current = parent;
        }
        current
    }

    /// Adds the next positional binding to this frame.
    pub fn append(&self, symbol: Symbol, value: Value) -> RuntimeResult<()> {
        self.write()?.append(symbol, value);
        Ok(())
    }

    /// Looks up a symbol by searching this frame and then its parents.
    pub fn resolve(&self, symbol: &Symbol) -> RuntimeResult<Value> {
        let mut current = self;
        loop {
            if let Some(value) = current.lookup_local(symbol)? {
                return Ok(value);
            }
            match &current.parent {
                Some(parent) => current = parent.as_ref(),
                None => {
                    return Err(RuntimeError::UnboundVariable {
                        symbol: symbol.clone(),
                    })
                }
            }
        }
    }

    fn lookup_local(&self, symbol: &Symbol) -> RuntimeResult<Option<Value>> {
        let slots = self.read()?;
        Ok(slots
            .index
            .get(symbol)
            .map(|&slot| slots.entries[slot].1.clone()))
    }

    /// Binds `symbol` in this frame, replacing the value of an existing slot.
    pub fn define(&self, symbol: Symbol, value: Value) -> RuntimeResult<()> {
        let mut slots = self.write()?;
        match slots.index.get(&symbol).copied() {
            Some(slot) => slots.entries[slot].1 = value,
            None => slots.append(symbol, value),
        }
        Ok(())
    }

    /// Updates the nearest frame that binds `symbol`; unbound names are
    /// created in the root frame.
    pub fn assign(&self, symbol: Symbol, value: Value) -> RuntimeResult<()> {
        let mut current = self;
        loop {
            {
                let mut slots = current.write()?;
                if let Some(slot) = slots.index.get(&symbol).copied() {
                    slots.entries[slot].1 = value;
                    return Ok(());
                }
            }
            match &current.parent {
                Some(parent) => current = parent.as_ref(),
                None => return current.define(symbol, value),
            }
        }
    }

    /// Checks if a symbol is bound in this frame (not parent frames).
    pub fn contains(&self, symbol: &Symbol) -> RuntimeResult<bool> {
        Ok(self.read()?.index.contains_key(symbol))
    }

    /// Number of slots in this frame.
    pub fn len(&self) -> RuntimeResult<usize> {
        Ok(self.read()?.entries.len())
    }

    pub fn is_empty(&self) -> RuntimeResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Names bound in this frame, in binding order (for debugging)
    pub fn names(&self) -> RuntimeResult<Vec<Symbol>> {
        Ok(self.read()?.index.keys().cloned().collect())
    }

    /// Every slot of this frame in append order, shadowed ones included.
    pub fn bindings(&self) -> RuntimeResult<Vec<(Symbol, Value)>> {
        Ok(self.read()?.entries.clone())
    }
}

// Frames reference closures and captured continuations that reference frames
// again, so only the local names are printed.
impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = match self.frame.try_read() {
            Ok(slots) => slots.index.keys().map(|s| s.to_string()).collect(),
            Err(_) => vec!["<locked>".to_string()],
        };
        f.debug_struct("Environment")
            .field("names", &names)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
