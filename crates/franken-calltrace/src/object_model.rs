//! ES2020-style object model that instrumented handles are layered over.
//!
//! Key pieces:
//!
//! - **Property descriptors**: data vs accessor, configurable/enumerable/writable
//! - **Prototype chains**: `[[Prototype]]` internal slot with chain traversal
//! - **Callable objects**: native bodies and bound functions live in an
//!   object's call slot; the realm dispatches `[[Call]]`/`[[Construct]]`
//! - **Instrumented objects**: heap-resident handles whose every internal
//!   method is routed through the interception engine
//! - **Symbol keys**: property keys that are either strings or symbols
//!
//! `BTreeMap`/`BTreeSet` for deterministic ordering.
//! Operations that need to run user code (accessors, calls) live on
//! [`crate::realm::Realm`]; the heap only implements the pure slot algorithms.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::interceptor::InstrumentedObject;

/// Serialize/deserialize `BTreeMap<PropertyKey, PropertyDescriptor>` as a
/// sorted sequence of `[key, descriptor]` pairs.  serde_json requires string
/// keys for JSON maps but `PropertyKey` is an enum, so we use a vec-of-pairs
/// representation to preserve full round-trip fidelity.
mod properties_as_seq {
    use super::{BTreeMap, PropertyDescriptor, PropertyKey};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<PropertyKey, PropertyDescriptor>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&PropertyKey, &PropertyDescriptor)> = map.iter().collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<PropertyKey, PropertyDescriptor>, D::Error> {
        let pairs: Vec<(PropertyKey, PropertyDescriptor)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// PropertyKey: string or symbol
// ---------------------------------------------------------------------------

/// Unique symbol identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

/// A property key: either a string or a symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyKey {
    /// String key.
    String(String),
    /// Symbol key.
    Symbol(SymbolId),
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Symbol(id) => match WellKnownSymbol::from_id(*id) {
                Some(sym) => f.write_str(sym.name()),
                None => write!(f, "Symbol({})", id.0),
            },
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<WellKnownSymbol> for PropertyKey {
    fn from(sym: WellKnownSymbol) -> Self {
        sym.key()
    }
}

// ---------------------------------------------------------------------------
// Well-known symbols
// ---------------------------------------------------------------------------

/// Well-known symbol indices (fixed allocation, ids 1..=13).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WellKnownSymbol {
    Iterator,
    ToPrimitive,
    HasInstance,
    ToStringTag,
    Species,
    IsConcatSpreadable,
    Unscopables,
    AsyncIterator,
    Match,
    MatchAll,
    Replace,
    Search,
    Split,
}

impl WellKnownSymbol {
    const ALL: [Self; 13] = [
        Self::Iterator,
        Self::ToPrimitive,
        Self::HasInstance,
        Self::ToStringTag,
        Self::Species,
        Self::IsConcatSpreadable,
        Self::Unscopables,
        Self::AsyncIterator,
        Self::Match,
        Self::MatchAll,
        Self::Replace,
        Self::Search,
        Self::Split,
    ];

    /// Get the `SymbolId` for this well-known symbol.
    pub fn id(self) -> SymbolId {
        SymbolId(self as u32 + 1)
    }

    /// Reverse lookup of [`WellKnownSymbol::id`].
    pub fn from_id(id: SymbolId) -> Option<Self> {
        let index = usize::try_from(id.0.checked_sub(1)?).ok()?;
        Self::ALL.get(index).copied()
    }

    /// Get the property key for this well-known symbol.
    pub fn key(self) -> PropertyKey {
        PropertyKey::Symbol(self.id())
    }

    /// Display name (e.g. `@@iterator`).
    pub fn name(self) -> &'static str {
        match self {
            Self::Iterator => "@@iterator",
            Self::ToPrimitive => "@@toPrimitive",
            Self::HasInstance => "@@hasInstance",
            Self::ToStringTag => "@@toStringTag",
            Self::Species => "@@species",
            Self::IsConcatSpreadable => "@@isConcatSpreadable",
            Self::Unscopables => "@@unscopables",
            Self::AsyncIterator => "@@asyncIterator",
            Self::Match => "@@match",
            Self::MatchAll => "@@matchAll",
            Self::Replace => "@@replace",
            Self::Search => "@@search",
            Self::Split => "@@split",
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectHandle: typed reference to heap objects
// ---------------------------------------------------------------------------

/// Opaque handle referencing an object on the managed heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHandle(pub u32);

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Index into the realm's native function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NativeFunctionId(pub u32);

// ---------------------------------------------------------------------------
// JsValue: runtime value for the object model
// ---------------------------------------------------------------------------

/// Runtime value.
///
/// Callable objects are carried as `Function` so `typeof` can be answered
/// without a heap lookup; both object variants reference the same heap.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Symbol(SymbolId),
    Object(ObjectHandle),
    Function(ObjectHandle),
}

impl JsValue {
    /// Does this value carry an object identity (object or function)?
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Function(_))
    }

    pub fn is_primitive(&self) -> bool {
        !self.is_object()
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    /// Heap handle for object and function values.
    pub fn as_handle(&self) -> Option<ObjectHandle> {
        match self {
            Self::Object(h) | Self::Function(h) => Some(*h),
            _ => None,
        }
    }

    /// `typeof` result.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "number",
            Self::Str(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
        }
    }

    /// SameValue comparison (ES2020 §7.2.10).
    pub fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

impl fmt::Display for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
            Self::Object(h) => write!(f, "[object#{}]", h.0),
            Self::Function(h) => write!(f, "[function#{}]", h.0),
        }
    }
}

impl From<i64> for JsValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for JsValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for JsValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// PropertyDescriptor
// ---------------------------------------------------------------------------

/// ES2020 property descriptor (§6.2.5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyDescriptor {
    /// Data descriptor: has `value` and `writable`.
    Data {
        value: JsValue,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    /// Accessor descriptor: `get`/`set` reference callable heap objects.
    Accessor {
        get: Option<ObjectHandle>,
        set: Option<ObjectHandle>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// Create a default data descriptor (writable, enumerable, configurable).
    pub fn data(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Create a non-writable, non-enumerable, non-configurable data descriptor.
    pub fn data_frozen(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    /// Is this descriptor configurable?
    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    /// Is this descriptor enumerable?
    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    /// Is this a data descriptor?
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    /// Get the value if this is a data descriptor.
    pub fn value(&self) -> Option<&JsValue> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    /// Is this a data descriptor with writable=true?
    pub fn is_writable(&self) -> bool {
        match self {
            Self::Data { writable, .. } => *writable,
            Self::Accessor { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectError
// ---------------------------------------------------------------------------

/// Errors raised by real object operations.
///
/// These are the failures the interception layer must hand back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ObjectError {
    /// ECMAScript `TypeError`.
    #[error("TypeError: {0}")]
    TypeError(String),
    /// Object not found in the heap.
    #[error("{0} not found")]
    ObjectNotFound(ObjectHandle),
    /// Prototype chain cycle detected.
    #[error("TypeError: prototype chain cycle detected")]
    PrototypeCycleDetected,
    /// Maximum prototype chain depth exceeded.
    #[error("TypeError: prototype chain depth {depth} exceeds max {max}")]
    PrototypeChainTooDeep { depth: u32, max: u32 },
    /// A native function body raised a value.
    #[error("uncaught {0}")]
    Thrown(JsValue),
}

// ---------------------------------------------------------------------------
// OrdinaryObject: the core ES2020 object
// ---------------------------------------------------------------------------

/// Maximum prototype chain depth to prevent infinite loops.
pub const MAX_PROTOTYPE_CHAIN_DEPTH: u32 = 1024;

/// `[[Call]]` behaviour of a callable ordinary object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallBehavior {
    /// Body registered in the realm's native function table.
    Native(NativeFunctionId),
    /// `Function.prototype.bind` result.
    Bound {
        target: JsValue,
        bound_this: JsValue,
        bound_args: Vec<JsValue>,
    },
}

/// An ordinary ES2020 object with internal slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdinaryObject {
    /// `[[Prototype]]` internal slot (null means end of chain).
    pub prototype: Option<ObjectHandle>,
    /// `[[Extensible]]` internal slot.
    pub extensible: bool,
    /// Own properties with descriptors, keyed by PropertyKey.
    #[serde(with = "properties_as_seq")]
    pub properties: BTreeMap<PropertyKey, PropertyDescriptor>,
    /// `[[Class]]` tag for intrinsic identification.
    pub class_tag: Option<String>,
    /// `[[Call]]` slot; `Some` makes the object a function.
    pub call: Option<CallBehavior>,
    /// Is this object a constructor?
    pub constructable: bool,
    /// `[[PrimitiveValue]]` for boxed primitives.
    pub primitive: Option<JsValue>,
}

impl Default for OrdinaryObject {
    fn default() -> Self {
        Self {
            prototype: None,
            extensible: true,
            properties: BTreeMap::new(),
            class_tag: None,
            call: None,
            constructable: false,
            primitive: None,
        }
    }
}

impl OrdinaryObject {
    /// Create a new ordinary object with the given prototype.
    pub fn with_prototype(proto: Option<ObjectHandle>) -> Self {
        Self {
            prototype: proto,
            ..Self::default()
        }
    }

    pub fn is_callable(&self) -> bool {
        self.call.is_some()
    }

    /// `[[GetOwnProperty]](P)`.
    pub fn get_own_property(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.properties.get(key)
    }

    pub fn has_own_property(&self, key: &PropertyKey) -> bool {
        self.properties.contains_key(key)
    }

    // -- [[DefineOwnProperty]] (§9.1.6) ------------------------------------

    /// `[[DefineOwnProperty]](P, Desc)`: define or update a property.
    ///
    /// Returns `false` when the change is rejected (non-configurable conflict
    /// or non-extensible object).
    pub fn define_own_property(&mut self, key: PropertyKey, desc: PropertyDescriptor) -> bool {
        if let Some(current) = self.properties.get(&key) {
            if !current.is_configurable() {
                if desc.is_configurable() {
                    return false;
                }
                if desc.is_enumerable() != current.is_enumerable() {
                    return false;
                }
                // Cannot change data↔accessor type.
                if current.is_data() != desc.is_data() {
                    return false;
                }
                if let (
                    PropertyDescriptor::Data {
                        writable: current_w,
                        value: current_v,
                        ..
                    },
                    PropertyDescriptor::Data {
                        writable: new_w,
                        value: new_v,
                        ..
                    },
                ) = (current, &desc)
                    && !current_w
                    && (*new_w || !current_v.same_value(new_v))
                {
                    return false;
                }
                if let (
                    PropertyDescriptor::Accessor {
                        get: cur_get,
                        set: cur_set,
                        ..
                    },
                    PropertyDescriptor::Accessor {
                        get: new_get,
                        set: new_set,
                        ..
                    },
                ) = (current, &desc)
                    && (cur_get != new_get || cur_set != new_set)
                {
                    return false;
                }
            }
            self.properties.insert(key, desc);
            true
        } else {
            if !self.extensible {
                return false;
            }
            self.properties.insert(key, desc);
            true
        }
    }

    /// `[[Delete]](P)`: returns `false` if the property is non-configurable.
    pub fn delete(&mut self, key: &PropertyKey) -> bool {
        match self.properties.get(key) {
            Some(desc) if !desc.is_configurable() => false,
            Some(_) => {
                self.properties.remove(key);
                true
            }
            None => true,
        }
    }

    /// `[[OwnPropertyKeys]]()`: integer indices (ascending), then string
    /// keys (BTreeMap order), then symbol keys.
    pub fn own_property_keys(&self) -> Vec<PropertyKey> {
        let mut int_keys: Vec<(u64, PropertyKey)> = Vec::new();
        let mut str_keys: Vec<PropertyKey> = Vec::new();
        let mut sym_keys: Vec<PropertyKey> = Vec::new();

        for key in self.properties.keys() {
            match key {
                PropertyKey::String(s) => {
                    if let Ok(n) = s.parse::<u64>() {
                        int_keys.push((n, key.clone()));
                    } else {
                        str_keys.push(key.clone());
                    }
                }
                PropertyKey::Symbol(_) => sym_keys.push(key.clone()),
            }
        }

        int_keys.sort_by_key(|(n, _)| *n);
        let mut result: Vec<PropertyKey> = int_keys.into_iter().map(|(_, k)| k).collect();
        result.extend(str_keys);
        result.extend(sym_keys);
        result
    }
}

// ---------------------------------------------------------------------------
// ManagedObject: union of ordinary and instrumented
// ---------------------------------------------------------------------------

/// A managed object: either ordinary or an instrumented handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ManagedObject {
    Ordinary(OrdinaryObject),
    Instrumented(InstrumentedObject),
}

impl ManagedObject {
    pub fn as_ordinary(&self) -> Option<&OrdinaryObject> {
        match self {
            Self::Ordinary(o) => Some(o),
            Self::Instrumented(_) => None,
        }
    }

    pub fn as_ordinary_mut(&mut self) -> Option<&mut OrdinaryObject> {
        match self {
            Self::Ordinary(o) => Some(o),
            Self::Instrumented(_) => None,
        }
    }

    pub fn as_instrumented(&self) -> Option<&InstrumentedObject> {
        match self {
            Self::Instrumented(i) => Some(i),
            Self::Ordinary(_) => None,
        }
    }
}

fn dispatched_by_realm(operation: &str) -> ObjectError {
    ObjectError::TypeError(format!(
        "{operation} on an instrumented object must be dispatched by the realm"
    ))
}

// ---------------------------------------------------------------------------
// ObjectHeap: the managed object store
// ---------------------------------------------------------------------------

/// The object heap: arena of managed objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectHeap {
    objects: Vec<ManagedObject>,
    /// Next symbol id (after well-known symbols).
    next_symbol: u32,
}

impl ObjectHeap {
    /// Create a new empty heap.
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            // Well-known symbols occupy 1..=13.
            next_symbol: 14,
        }
    }

    fn push(&mut self, object: ManagedObject) -> ObjectHandle {
        let handle = ObjectHandle(self.objects.len() as u32);
        self.objects.push(object);
        handle
    }

    /// Allocate a new ordinary object with the given prototype.
    pub fn alloc(&mut self, proto: Option<ObjectHandle>) -> ObjectHandle {
        self.push(ManagedObject::Ordinary(OrdinaryObject::with_prototype(
            proto,
        )))
    }

    /// Allocate a new ordinary object with no prototype.
    pub fn alloc_plain(&mut self) -> ObjectHandle {
        self.alloc(None)
    }

    /// Allocate a function object with a non-writable, configurable `name`.
    pub fn alloc_function(
        &mut self,
        call: CallBehavior,
        constructable: bool,
        name: &str,
    ) -> ObjectHandle {
        let mut object = OrdinaryObject {
            call: Some(call),
            constructable,
            class_tag: Some("Function".to_string()),
            ..OrdinaryObject::default()
        };
        object.properties.insert(
            "name".into(),
            PropertyDescriptor::Data {
                value: JsValue::Str(name.to_string()),
                writable: false,
                enumerable: false,
                configurable: true,
            },
        );
        self.push(ManagedObject::Ordinary(object))
    }

    /// Allocate the object form of a primitive.
    ///
    /// `undefined`/`null` box to a plain empty object. String boxes carry a
    /// frozen `length`.
    pub fn alloc_box(&mut self, value: &JsValue) -> ObjectHandle {
        let class_tag = match value {
            JsValue::Bool(_) => Some("Boolean"),
            JsValue::Int(_) => Some("Number"),
            JsValue::Str(_) => Some("String"),
            JsValue::Symbol(_) => Some("Symbol"),
            _ => None,
        };
        let Some(class_tag) = class_tag else {
            return self.alloc_plain();
        };
        let mut object = OrdinaryObject {
            class_tag: Some(class_tag.to_string()),
            primitive: Some(value.clone()),
            ..OrdinaryObject::default()
        };
        if let JsValue::Str(s) = value {
            object.properties.insert(
                "length".into(),
                PropertyDescriptor::data_frozen(JsValue::Int(s.chars().count() as i64)),
            );
        }
        self.push(ManagedObject::Ordinary(object))
    }

    /// Allocate an instrumented handle.
    pub fn alloc_instrumented(&mut self, object: InstrumentedObject) -> ObjectHandle {
        self.push(ManagedObject::Instrumented(object))
    }

    /// Allocate a new unique symbol id.
    pub fn alloc_symbol(&mut self) -> SymbolId {
        let id = SymbolId(self.next_symbol);
        self.next_symbol += 1;
        id
    }

    /// Get a reference to a managed object.
    pub fn get(&self, handle: ObjectHandle) -> Result<&ManagedObject, ObjectError> {
        self.objects
            .get(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    /// Get a mutable reference to a managed object.
    pub fn get_mut(&mut self, handle: ObjectHandle) -> Result<&mut ManagedObject, ObjectError> {
        self.objects
            .get_mut(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    /// Number of objects allocated.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Value form of a handle: `Function` for callables, `Object` otherwise.
    pub fn value_of(&self, handle: ObjectHandle) -> JsValue {
        match self.get(handle) {
            Ok(ManagedObject::Ordinary(o)) if o.is_callable() => JsValue::Function(handle),
            Ok(ManagedObject::Instrumented(i)) if i.original.is_callable() => {
                JsValue::Function(handle)
            }
            _ => JsValue::Object(handle),
        }
    }

    /// Does `[[Call]]` exist for this handle?
    pub fn is_callable(&self, handle: ObjectHandle) -> bool {
        self.value_of(handle).is_callable()
    }

    /// Borrow an ordinary object, rejecting instrumented handles.
    pub fn ordinary(
        &self,
        handle: ObjectHandle,
        operation: &str,
    ) -> Result<&OrdinaryObject, ObjectError> {
        match self.get(handle)? {
            ManagedObject::Ordinary(o) => Ok(o),
            ManagedObject::Instrumented(_) => Err(dispatched_by_realm(operation)),
        }
    }

    pub fn ordinary_mut(
        &mut self,
        handle: ObjectHandle,
        operation: &str,
    ) -> Result<&mut OrdinaryObject, ObjectError> {
        match self.get_mut(handle)? {
            ManagedObject::Ordinary(o) => Ok(o),
            ManagedObject::Instrumented(_) => Err(dispatched_by_realm(operation)),
        }
    }

    // -- Slot algorithms that never run user code ----------------------------

    /// Own property descriptor of an ordinary object.
    pub fn get_own_property_descriptor(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        let o = self.ordinary(handle, "getOwnPropertyDescriptor")?;
        Ok(o.get_own_property(key).cloned())
    }

    /// `Object.defineProperty(O, P, Desc)`.
    pub fn define_property(
        &mut self,
        handle: ObjectHandle,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        let o = self.ordinary_mut(handle, "defineProperty")?;
        Ok(o.define_own_property(key, desc))
    }

    /// `[[Delete]](O, P)`.
    pub fn delete_property(
        &mut self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        let o = self.ordinary_mut(handle, "deleteProperty")?;
        Ok(o.delete(key))
    }

    /// `[[OwnPropertyKeys]](O)`.
    pub fn own_property_keys(&self, handle: ObjectHandle) -> Result<Vec<PropertyKey>, ObjectError> {
        let o = self.ordinary(handle, "ownKeys")?;
        Ok(o.own_property_keys())
    }

    /// `Object.getPrototypeOf(O)`.
    pub fn get_prototype_of(
        &self,
        handle: ObjectHandle,
    ) -> Result<Option<ObjectHandle>, ObjectError> {
        let o = self.ordinary(handle, "getPrototypeOf")?;
        Ok(o.prototype)
    }

    /// `Object.setPrototypeOf(O, proto)`.
    ///
    /// Cycle detection stops at instrumented objects: their chain is only
    /// observable through the realm.
    pub fn set_prototype_of(
        &mut self,
        handle: ObjectHandle,
        proto: Option<ObjectHandle>,
    ) -> Result<bool, ObjectError> {
        if let Some(p) = proto {
            let mut current = Some(p);
            let mut visited = BTreeSet::new();
            visited.insert(handle);
            while let Some(h) = current {
                if !visited.insert(h) {
                    return Err(ObjectError::PrototypeCycleDetected);
                }
                match self.get(h)? {
                    ManagedObject::Ordinary(o) => current = o.prototype,
                    ManagedObject::Instrumented(_) => break,
                }
            }
        }

        let o = self.ordinary_mut(handle, "setPrototypeOf")?;
        if !o.extensible {
            // Non-extensible: can only set prototype to current value.
            return Ok(o.prototype == proto);
        }
        o.prototype = proto;
        Ok(true)
    }

    /// `Object.isExtensible(O)`.
    pub fn is_extensible(&self, handle: ObjectHandle) -> Result<bool, ObjectError> {
        Ok(self.ordinary(handle, "isExtensible")?.extensible)
    }

    /// `Object.preventExtensions(O)`.
    pub fn prevent_extensions(&mut self, handle: ObjectHandle) -> Result<bool, ObjectError> {
        self.ordinary_mut(handle, "preventExtensions")?.extensible = false;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn str_key(s: &str) -> PropertyKey {
        PropertyKey::String(s.to_string())
    }

    fn int_val(n: i64) -> JsValue {
        JsValue::Int(n)
    }

    #[test]
    fn property_key_display_names_well_known_symbols() {
        assert_eq!(str_key("foo").to_string(), "foo");
        assert_eq!(WellKnownSymbol::ToPrimitive.key().to_string(), "@@toPrimitive");
        assert_eq!(PropertyKey::Symbol(SymbolId(42)).to_string(), "Symbol(42)");
    }

    #[test]
    fn well_known_symbol_from_id_roundtrips() {
        for sym in WellKnownSymbol::ALL {
            assert_eq!(WellKnownSymbol::from_id(sym.id()), Some(sym));
        }
        assert_eq!(WellKnownSymbol::from_id(SymbolId(0)), None);
        assert_eq!(WellKnownSymbol::from_id(SymbolId(14)), None);
    }

    #[test]
    fn js_value_type_name_mirrors_typeof() {
        assert_eq!(JsValue::Undefined.type_name(), "undefined");
        assert_eq!(JsValue::Null.type_name(), "null");
        assert_eq!(int_val(1).type_name(), "number");
        assert_eq!(JsValue::from("s").type_name(), "string");
        assert_eq!(JsValue::Object(ObjectHandle(0)).type_name(), "object");
        assert_eq!(JsValue::Function(ObjectHandle(0)).type_name(), "function");
    }

    #[test]
    fn js_value_identity_predicates() {
        assert!(JsValue::Object(ObjectHandle(1)).is_object());
        assert!(JsValue::Function(ObjectHandle(1)).is_object());
        assert!(JsValue::Null.is_primitive());
        assert_eq!(JsValue::Function(ObjectHandle(3)).as_handle(), Some(ObjectHandle(3)));
        assert_eq!(int_val(3).as_handle(), None);
    }

    #[test]
    fn define_own_property_non_extensible_rejects() {
        let mut obj = OrdinaryObject::default();
        obj.extensible = false;
        assert!(!obj.define_own_property(str_key("x"), PropertyDescriptor::data(int_val(1))));
    }

    #[test]
    fn define_own_property_non_configurable_allows_same_value() {
        let mut obj = OrdinaryObject::default();
        assert!(obj.define_own_property(str_key("x"), PropertyDescriptor::data_frozen(int_val(1))));
        assert!(obj.define_own_property(str_key("x"), PropertyDescriptor::data_frozen(int_val(1))));
        assert!(!obj.define_own_property(str_key("x"), PropertyDescriptor::data_frozen(int_val(2))));
        assert!(!obj.define_own_property(str_key("x"), PropertyDescriptor::data(int_val(1))));
    }

    #[test]
    fn delete_respects_configurability() {
        let mut obj = OrdinaryObject::default();
        obj.define_own_property(str_key("a"), PropertyDescriptor::data(int_val(1)));
        obj.define_own_property(str_key("b"), PropertyDescriptor::data_frozen(int_val(2)));
        assert!(obj.delete(&str_key("a")));
        assert!(!obj.delete(&str_key("b")));
        assert!(obj.delete(&str_key("missing")));
        assert!(obj.has_own_property(&str_key("b")));
    }

    #[test]
    fn own_property_keys_order() {
        let mut obj = OrdinaryObject::default();
        for key in ["b", "10", "a", "2"] {
            obj.define_own_property(str_key(key), PropertyDescriptor::data(int_val(0)));
        }
        obj.define_own_property(WellKnownSymbol::Iterator.key(), PropertyDescriptor::data(int_val(0)));
        let keys: Vec<String> = obj.own_property_keys().iter().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["2", "10", "a", "b", "@@iterator"]);
    }

    #[test]
    fn alloc_box_string_has_frozen_length() {
        let mut heap = ObjectHeap::new();
        let h = heap.alloc_box(&JsValue::from("héllo"));
        let desc = heap.get_own_property_descriptor(h, &str_key("length")).unwrap().unwrap();
        assert_eq!(desc.value(), Some(&int_val(5)));
        assert!(!desc.is_configurable());
        let o = heap.ordinary(h, "test").unwrap();
        assert_eq!(o.class_tag.as_deref(), Some("String"));
        assert_eq!(o.primitive, Some(JsValue::from("héllo")));
    }

    #[test]
    fn alloc_box_null_is_plain_object() {
        let mut heap = ObjectHeap::new();
        let h = heap.alloc_box(&JsValue::Null);
        let o = heap.ordinary(h, "test").unwrap();
        assert!(o.primitive.is_none());
        assert!(o.properties.is_empty());
    }

    #[test]
    fn value_of_distinguishes_callables() {
        let mut heap = ObjectHeap::new();
        let plain = heap.alloc_plain();
        let f = heap.alloc_function(CallBehavior::Native(NativeFunctionId(0)), false, "f");
        assert_eq!(heap.value_of(plain), JsValue::Object(plain));
        assert_eq!(heap.value_of(f), JsValue::Function(f));
        assert!(heap.is_callable(f));
    }

    #[test]
    fn set_prototype_cycle_detection() {
        let mut heap = ObjectHeap::new();
        let a = heap.alloc_plain();
        let b = heap.alloc(Some(a));
        assert_eq!(
            heap.set_prototype_of(a, Some(b)),
            Err(ObjectError::PrototypeCycleDetected)
        );
    }

    #[test]
    fn set_prototype_non_extensible_allows_same_only() {
        let mut heap = ObjectHeap::new();
        let proto = heap.alloc_plain();
        let other = heap.alloc_plain();
        let obj = heap.alloc(Some(proto));
        heap.prevent_extensions(obj).unwrap();
        assert!(heap.set_prototype_of(obj, Some(proto)).unwrap());
        assert!(!heap.set_prototype_of(obj, Some(other)).unwrap());
    }

    #[test]
    fn heap_get_invalid_handle() {
        let heap = ObjectHeap::new();
        assert_eq!(
            heap.get(ObjectHandle(9)).unwrap_err(),
            ObjectError::ObjectNotFound(ObjectHandle(9))
        );
    }

    #[test]
    fn error_display_coverage() {
        assert_eq!(
            ObjectError::ObjectNotFound(ObjectHandle(4)).to_string(),
            "object#4 not found"
        );
        assert_eq!(
            ObjectError::TypeError("boom".into()).to_string(),
            "TypeError: boom"
        );
        assert_eq!(
            ObjectError::Thrown(JsValue::from("bad")).to_string(),
            "uncaught bad"
        );
        assert_eq!(
            ObjectError::PrototypeChainTooDeep { depth: 5, max: 4 }.to_string(),
            "TypeError: prototype chain depth 5 exceeds max 4"
        );
    }

    #[test]
    fn ordinary_object_serde_roundtrip() {
        let mut obj = OrdinaryObject::default();
        obj.define_own_property(str_key("x"), PropertyDescriptor::data(int_val(7)));
        obj.define_own_property(WellKnownSymbol::ToStringTag.key(), PropertyDescriptor::data_frozen(JsValue::from("T")));
        let json = serde_json::to_string(&obj).unwrap();
        let back: OrdinaryObject = serde_json::from_str(&json).unwrap();
        assert_eq!(back.properties, obj.properties);
    }
}
