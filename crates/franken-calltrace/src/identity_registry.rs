//! Identity bookkeeping for one instrumentation session.
//!
//! Three lookup tables, insert/lookup only:
//! - [`IdentityRegistry`]: original ↔ wrapper, so wrapping is idempotent and
//!   wrapped arguments can be unwrapped before delegation.
//! - [`MethodWrapperCache`]: real function → handed-out method wrapper.
//! - [`PrimitiveBoxCache`]: primitive → its box object.
//!
//! Entries hold strong references for the lifetime of the owning session.
//! Long-lived sessions over large graphs grow accordingly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::object_model::{JsValue, ObjectHandle};

/// Reasons a bookkeeping insert is refused. Never surfaced to callers of
/// instrumented handles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum RegistryError {
    #[error("{type_name} values carry no identity and cannot be registry keys")]
    NotIdentityBearing { type_name: String },
    #[error("{0} is already registered")]
    AlreadyRegistered(ObjectHandle),
    #[error("{type_name} values cannot be boxed")]
    NotPrimitive { type_name: String },
}

impl RegistryError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotIdentityBearing { .. } => "FE-CTRACE-0001",
            Self::AlreadyRegistered(_) => "FE-CTRACE-0002",
            Self::NotPrimitive { .. } => "FE-CTRACE-0003",
        }
    }
}

// ---------------------------------------------------------------------------
// IdentityRegistry
// ---------------------------------------------------------------------------

/// Bidirectional original ↔ wrapper association.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityRegistry {
    original_to_wrapper: BTreeMap<ObjectHandle, JsValue>,
    wrapper_to_original: BTreeMap<ObjectHandle, JsValue>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record which original a wrapper stands for. Any original (including
    /// primitives) can be recorded here.
    pub fn record_wrapper(
        &mut self,
        wrapper: ObjectHandle,
        original: JsValue,
    ) -> Result<(), RegistryError> {
        if self.wrapper_to_original.contains_key(&wrapper) {
            return Err(RegistryError::AlreadyRegistered(wrapper));
        }
        self.wrapper_to_original.insert(wrapper, original);
        Ok(())
    }

    /// Make `wrapper` the canonical wrapper of `original`. Only objects and
    /// functions qualify.
    pub fn register_original(
        &mut self,
        original: &JsValue,
        wrapper: JsValue,
    ) -> Result<(), RegistryError> {
        let Some(handle) = original.as_handle() else {
            return Err(RegistryError::NotIdentityBearing {
                type_name: original.type_name().to_string(),
            });
        };
        if self.original_to_wrapper.contains_key(&handle) {
            return Err(RegistryError::AlreadyRegistered(handle));
        }
        self.original_to_wrapper.insert(handle, wrapper);
        Ok(())
    }

    /// Existing wrapper for an original object or function.
    pub fn wrapper_for(&self, original: &JsValue) -> Option<&JsValue> {
        original
            .as_handle()
            .and_then(|h| self.original_to_wrapper.get(&h))
    }

    /// Original for a known wrapper, otherwise the value itself.
    pub fn resolve(&self, value: &JsValue) -> JsValue {
        value
            .as_handle()
            .and_then(|h| self.wrapper_to_original.get(&h))
            .cloned()
            .unwrap_or_else(|| value.clone())
    }

    pub fn is_wrapper(&self, value: &JsValue) -> bool {
        value
            .as_handle()
            .is_some_and(|h| self.wrapper_to_original.contains_key(&h))
    }

    /// Number of wrappers handed out.
    pub fn wrapper_count(&self) -> usize {
        self.wrapper_to_original.len()
    }
}

// ---------------------------------------------------------------------------
// MethodWrapperCache
// ---------------------------------------------------------------------------

/// Real function → method wrapper returned from property reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodWrapperCache {
    by_function: BTreeMap<ObjectHandle, JsValue>,
}

impl MethodWrapperCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, function: ObjectHandle) -> Option<&JsValue> {
        self.by_function.get(&function)
    }

    pub fn insert(&mut self, function: ObjectHandle, wrapper: JsValue) -> Result<(), RegistryError> {
        if self.by_function.contains_key(&function) {
            return Err(RegistryError::AlreadyRegistered(function));
        }
        self.by_function.insert(function, wrapper);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_function.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_function.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PrimitiveBoxCache
// ---------------------------------------------------------------------------

/// Primitive value → box object, keyed by value.
#[derive(Debug, Clone, Default)]
pub struct PrimitiveBoxCache {
    boxes: BTreeMap<JsValue, ObjectHandle>,
}

impl PrimitiveBoxCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, value: &JsValue) -> Option<ObjectHandle> {
        self.boxes.get(value).copied()
    }

    pub fn insert(&mut self, value: JsValue, boxed: ObjectHandle) -> Result<(), RegistryError> {
        if value.is_object() {
            return Err(RegistryError::NotPrimitive {
                type_name: value.type_name().to_string(),
            });
        }
        if let Some(existing) = self.boxes.get(&value) {
            return Err(RegistryError::AlreadyRegistered(*existing));
        }
        self.boxes.insert(value, boxed);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}
