//! Realm: the object heap plus the operation surface callers use.
//!
//! Every operation (`get`, `set`, `has`, ..., `call`, `construct`) checks
//! whether the receiver is an instrumented handle. Handles go through the
//! interception engine in [`crate::interceptor`]; everything else runs the
//! ordinary ES2020 algorithm here. Callers never need to know which one
//! they are holding.
//!
//! The realm also owns the native function table and buffers structured
//! log events for instrumentation bookkeeping.

use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::interceptor::{InstrumentedObject, Session, SessionId};
use crate::object_model::{
    CallBehavior, JsValue, MAX_PROTOTYPE_CHAIN_DEPTH, ManagedObject, NativeFunctionId,
    ObjectError, ObjectHandle, ObjectHeap, PropertyDescriptor, PropertyKey, WellKnownSymbol,
};

const COMPONENT: &str = "calltrace_realm";

/// Body of a native function: `(realm, this, args) -> result`.
pub type NativeFn = Rc<dyn Fn(&mut Realm, JsValue, Vec<JsValue>) -> Result<JsValue, ObjectError>>;

/// Stable log envelope for instrumentation bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentationEvent {
    pub trace_id: String,
    pub component: String,
    pub event: String,
    pub outcome: String,
    pub error_code: Option<String>,
    pub session_id: u32,
    pub label: String,
}

/// Result of walking a prototype chain for one key.
enum PropertyLookup {
    Found {
        holder: ObjectHandle,
        desc: PropertyDescriptor,
    },
    /// The chain reached an instrumented object before finding the key.
    Instrumented(ObjectHandle),
    Absent,
}

fn not_a_function(value: &JsValue) -> ObjectError {
    ObjectError::TypeError(format!("{value} is not a function"))
}

fn not_a_constructor(value: &JsValue) -> ObjectError {
    ObjectError::TypeError(format!("{value} is not a constructor"))
}

fn require_object(value: &JsValue, operation: &str) -> Result<ObjectHandle, ObjectError> {
    value.as_handle().ok_or_else(|| {
        ObjectError::TypeError(format!(
            "{operation} called on non-object {}",
            value.type_name()
        ))
    })
}

/// Owner of the heap, native bodies, instrumentation sessions and event log.
pub struct Realm {
    heap: ObjectHeap,
    natives: Vec<NativeFn>,
    pub(crate) sessions: Vec<Session>,
    events: Vec<InstrumentationEvent>,
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("heap", &self.heap)
            .field("natives", &self.natives.len())
            .field("sessions", &self.sessions.len())
            .field("events", &self.events)
            .finish()
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

impl Realm {
    pub fn new() -> Self {
        Self {
            heap: ObjectHeap::new(),
            natives: Vec::new(),
            sessions: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn heap(&self) -> &ObjectHeap {
        &self.heap
    }

    pub(crate) fn heap_mut(&mut self) -> &mut ObjectHeap {
        &mut self.heap
    }

    // -----------------------------------------------------------------------
    // Value construction
    // -----------------------------------------------------------------------

    /// Fresh empty object with no prototype.
    pub fn new_object(&mut self) -> JsValue {
        JsValue::Object(self.heap.alloc_plain())
    }

    /// `Object.create(proto)`; `proto` must be an object or `null`.
    pub fn new_object_with_proto(&mut self, proto: &JsValue) -> Result<JsValue, ObjectError> {
        let proto = match proto {
            JsValue::Null => None,
            other => Some(require_object(other, "Object.create")?),
        };
        Ok(JsValue::Object(self.heap.alloc(proto)))
    }

    /// Fresh unique symbol.
    pub fn new_symbol(&mut self) -> JsValue {
        JsValue::Symbol(self.heap.alloc_symbol())
    }

    fn register_native(&mut self, body: NativeFn) -> NativeFunctionId {
        let id = NativeFunctionId(self.natives.len() as u32);
        self.natives.push(body);
        id
    }

    fn native(&self, id: NativeFunctionId) -> Result<NativeFn, ObjectError> {
        self.natives.get(id.0 as usize).cloned().ok_or_else(|| {
            ObjectError::TypeError(format!("native function {} is not registered", id.0))
        })
    }

    /// Constructor function. Gets a `prototype` object (writable,
    /// non-enumerable, non-configurable) whose `constructor` points back.
    pub fn new_function<F>(&mut self, name: &str, body: F) -> JsValue
    where
        F: Fn(&mut Realm, JsValue, Vec<JsValue>) -> Result<JsValue, ObjectError> + 'static,
    {
        let id = self.register_native(Rc::new(body));
        let function = self.heap.alloc_function(CallBehavior::Native(id), true, name);
        let prototype = self.heap.alloc_plain();
        if let Some(proto) = self.heap.get_mut(prototype).ok().and_then(ManagedObject::as_ordinary_mut) {
            proto.properties.insert(
                "constructor".into(),
                PropertyDescriptor::Data {
                    value: JsValue::Function(function),
                    writable: true,
                    enumerable: false,
                    configurable: true,
                },
            );
        }
        if let Some(object) = self.heap.get_mut(function).ok().and_then(ManagedObject::as_ordinary_mut) {
            object.properties.insert(
                "prototype".into(),
                PropertyDescriptor::Data {
                    value: JsValue::Object(prototype),
                    writable: true,
                    enumerable: false,
                    configurable: false,
                },
            );
        }
        JsValue::Function(function)
    }

    /// Plain callable without `[[Construct]]`.
    pub fn new_method<F>(&mut self, name: &str, body: F) -> JsValue
    where
        F: Fn(&mut Realm, JsValue, Vec<JsValue>) -> Result<JsValue, ObjectError> + 'static,
    {
        let id = self.register_native(Rc::new(body));
        JsValue::Function(self.heap.alloc_function(CallBehavior::Native(id), false, name))
    }

    // -----------------------------------------------------------------------
    // Structured events
    // -----------------------------------------------------------------------

    pub fn events(&self) -> &[InstrumentationEvent] {
        &self.events
    }

    /// Drain all pending events.
    pub fn drain_events(&mut self) -> Vec<InstrumentationEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn emit_event(
        &mut self,
        session: SessionId,
        label: &str,
        event: &str,
        outcome: &str,
        error_code: Option<&str>,
    ) {
        self.events.push(InstrumentationEvent {
            trace_id: format!("calltrace-session-{}", session.0),
            component: COMPONENT.to_string(),
            event: event.to_string(),
            outcome: outcome.to_string(),
            error_code: error_code.map(str::to_string),
            session_id: session.0,
            label: label.to_string(),
        });
    }

    // -----------------------------------------------------------------------
    // Dispatch helpers
    // -----------------------------------------------------------------------

    pub(crate) fn instrumented_site(&self, handle: ObjectHandle) -> Option<InstrumentedObject> {
        self.heap.get(handle).ok()?.as_instrumented().cloned()
    }

    /// Walk the prototype chain of an ordinary object looking for `key`.
    fn find_property(
        &self,
        start: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<PropertyLookup, ObjectError> {
        let mut current = Some(start);
        let mut depth: u32 = 0;
        let mut visited = BTreeSet::new();

        while let Some(h) = current {
            if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
                return Err(ObjectError::PrototypeChainTooDeep {
                    depth,
                    max: MAX_PROTOTYPE_CHAIN_DEPTH,
                });
            }
            if !visited.insert(h) {
                return Err(ObjectError::PrototypeCycleDetected);
            }
            match self.heap.get(h)? {
                ManagedObject::Instrumented(_) => return Ok(PropertyLookup::Instrumented(h)),
                ManagedObject::Ordinary(o) => {
                    if let Some(desc) = o.get_own_property(key) {
                        return Ok(PropertyLookup::Found {
                            holder: h,
                            desc: desc.clone(),
                        });
                    }
                    current = o.prototype;
                }
            }
            depth += 1;
        }
        Ok(PropertyLookup::Absent)
    }

    // -----------------------------------------------------------------------
    // [[Get]] / [[Set]]
    // -----------------------------------------------------------------------

    /// `target[key]`.
    pub fn get(&mut self, target: &JsValue, key: &PropertyKey) -> Result<JsValue, ObjectError> {
        self.get_with_receiver(target, key, target)
    }

    fn get_with_receiver(
        &mut self,
        target: &JsValue,
        key: &PropertyKey,
        receiver: &JsValue,
    ) -> Result<JsValue, ObjectError> {
        let Some(handle) = target.as_handle() else {
            return primitive_get(target, key);
        };
        if let Some(site) = self.instrumented_site(handle) {
            return self.intercept_get(&site, key);
        }
        match self.find_property(handle, key)? {
            PropertyLookup::Found {
                desc: PropertyDescriptor::Data { value, .. },
                ..
            } => Ok(value),
            PropertyLookup::Found {
                desc: PropertyDescriptor::Accessor { get, .. },
                ..
            } => match get {
                Some(getter) => self.call(&JsValue::Function(getter), receiver.clone(), Vec::new()),
                None => Ok(JsValue::Undefined),
            },
            PropertyLookup::Instrumented(proto) => {
                let proto = self.heap.value_of(proto);
                self.get_with_receiver(&proto, key, receiver)
            }
            PropertyLookup::Absent => Ok(JsValue::Undefined),
        }
    }

    /// `target[key] = value`. Returns `false` when the assignment is
    /// rejected (non-writable, non-extensible, missing setter).
    pub fn set(
        &mut self,
        target: &JsValue,
        key: PropertyKey,
        value: JsValue,
    ) -> Result<bool, ObjectError> {
        let Some(handle) = target.as_handle() else {
            return match target {
                JsValue::Undefined | JsValue::Null => Err(ObjectError::TypeError(format!(
                    "cannot set property '{key}' of {target}"
                ))),
                _ => Ok(false),
            };
        };
        if let Some(site) = self.instrumented_site(handle) {
            return self.intercept_set(&site, key, value);
        }

        match self.find_property(handle, &key)? {
            PropertyLookup::Found {
                desc: PropertyDescriptor::Accessor { set, .. },
                ..
            } => match set {
                Some(setter) => {
                    let receiver = self.heap.value_of(handle);
                    self.call(&JsValue::Function(setter), receiver, vec![value])?;
                    Ok(true)
                }
                None => Ok(false),
            },
            PropertyLookup::Found { desc, .. } if !desc.is_writable() => Ok(false),
            PropertyLookup::Found { holder, .. } if holder == handle => {
                let o = self.heap.ordinary_mut(handle, "set")?;
                if let Some(PropertyDescriptor::Data { value: slot, .. }) = o.properties.get_mut(&key) {
                    *slot = value;
                }
                Ok(true)
            }
            // Inherited writable data, instrumented prototype or absent:
            // create an own data property.
            _ => {
                let o = self.heap.ordinary_mut(handle, "set")?;
                Ok(o.define_own_property(key, PropertyDescriptor::data(value)))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Remaining internal methods
    // -----------------------------------------------------------------------

    /// `key in target`.
    pub fn has(&mut self, target: &JsValue, key: &PropertyKey) -> Result<bool, ObjectError> {
        let handle = require_object(target, "has")?;
        if let Some(site) = self.instrumented_site(handle) {
            return self.intercept_has(&site, key);
        }
        match self.find_property(handle, key)? {
            PropertyLookup::Found { .. } => Ok(true),
            PropertyLookup::Instrumented(proto) => {
                let proto = self.heap.value_of(proto);
                self.has(&proto, key)
            }
            PropertyLookup::Absent => Ok(false),
        }
    }

    /// `delete target[key]`.
    pub fn delete_property(
        &mut self,
        target: &JsValue,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        let handle = require_object(target, "deleteProperty")?;
        if let Some(site) = self.instrumented_site(handle) {
            return self.intercept_delete_property(&site, key);
        }
        self.heap.delete_property(handle, key)
    }

    /// `Reflect.ownKeys(target)`.
    pub fn own_keys(&mut self, target: &JsValue) -> Result<Vec<PropertyKey>, ObjectError> {
        let handle = require_object(target, "ownKeys")?;
        if let Some(site) = self.instrumented_site(handle) {
            return self.intercept_own_keys(&site);
        }
        self.heap.own_property_keys(handle)
    }

    /// `Reflect.getOwnPropertyDescriptor(target, key)`.
    pub fn get_own_property_descriptor(
        &mut self,
        target: &JsValue,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        let handle = require_object(target, "getOwnPropertyDescriptor")?;
        if let Some(site) = self.instrumented_site(handle) {
            return self.intercept_get_own_property_descriptor(&site, key);
        }
        self.heap.get_own_property_descriptor(handle, key)
    }

    /// `Reflect.defineProperty(target, key, desc)`.
    pub fn define_property(
        &mut self,
        target: &JsValue,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        let handle = require_object(target, "defineProperty")?;
        if let Some(site) = self.instrumented_site(handle) {
            return self.intercept_define_property(&site, key, desc);
        }
        self.heap.define_property(handle, key, desc)
    }

    /// `Reflect.getPrototypeOf(target)`; `Null` at the end of the chain.
    pub fn get_prototype_of(&mut self, target: &JsValue) -> Result<JsValue, ObjectError> {
        let handle = require_object(target, "getPrototypeOf")?;
        if let Some(site) = self.instrumented_site(handle) {
            return self.intercept_get_prototype_of(&site);
        }
        Ok(match self.heap.get_prototype_of(handle)? {
            Some(proto) => self.heap.value_of(proto),
            None => JsValue::Null,
        })
    }

    /// `Reflect.setPrototypeOf(target, proto)`.
    pub fn set_prototype_of(
        &mut self,
        target: &JsValue,
        proto: &JsValue,
    ) -> Result<bool, ObjectError> {
        let handle = require_object(target, "setPrototypeOf")?;
        if let Some(site) = self.instrumented_site(handle) {
            return self.intercept_set_prototype_of(&site, proto);
        }
        let proto = match proto {
            JsValue::Null => None,
            other => Some(other.as_handle().ok_or_else(|| {
                ObjectError::TypeError("object prototype may only be an object or null".to_string())
            })?),
        };
        self.heap.set_prototype_of(handle, proto)
    }

    /// `Reflect.isExtensible(target)`.
    pub fn is_extensible(&mut self, target: &JsValue) -> Result<bool, ObjectError> {
        let handle = require_object(target, "isExtensible")?;
        if let Some(site) = self.instrumented_site(handle) {
            return self.intercept_is_extensible(&site);
        }
        self.heap.is_extensible(handle)
    }

    /// `Reflect.preventExtensions(target)`.
    pub fn prevent_extensions(&mut self, target: &JsValue) -> Result<bool, ObjectError> {
        let handle = require_object(target, "preventExtensions")?;
        if let Some(site) = self.instrumented_site(handle) {
            return self.intercept_prevent_extensions(&site);
        }
        self.heap.prevent_extensions(handle)
    }

    // -----------------------------------------------------------------------
    // [[Call]] / [[Construct]]
    // -----------------------------------------------------------------------

    /// Does `value` have a `[[Construct]]` slot?
    pub fn is_constructor(&self, value: &JsValue) -> bool {
        let Some(handle) = value.as_handle() else {
            return false;
        };
        match self.heap.get(handle) {
            Ok(ManagedObject::Ordinary(o)) => o.is_callable() && o.constructable,
            Ok(ManagedObject::Instrumented(site)) => self.is_constructor(&site.original),
            Err(_) => false,
        }
    }

    /// `Reflect.apply(callee, this, args)`.
    pub fn call(
        &mut self,
        callee: &JsValue,
        this: JsValue,
        args: Vec<JsValue>,
    ) -> Result<JsValue, ObjectError> {
        let handle = callee.as_handle().ok_or_else(|| not_a_function(callee))?;
        if let Some(site) = self.instrumented_site(handle) {
            // Handles of non-callables have no [[Call]] at all.
            if !self.heap.is_callable(handle) {
                return Err(not_a_function(callee));
            }
            return self.intercept_apply(&site, this, args);
        }
        let behavior = self
            .heap
            .ordinary(handle, "call")?
            .call
            .clone()
            .ok_or_else(|| not_a_function(callee))?;
        match behavior {
            CallBehavior::Native(id) => {
                let body = self.native(id)?;
                body(self, this, args)
            }
            CallBehavior::Bound {
                target,
                bound_this,
                mut bound_args,
            } => {
                bound_args.extend(args);
                self.call(&target, bound_this, bound_args)
            }
        }
    }

    /// `Reflect.construct(callee, args)`.
    ///
    /// The new object's prototype is the constructor's `prototype`
    /// property; an object returned by the body replaces it.
    pub fn construct(
        &mut self,
        callee: &JsValue,
        args: Vec<JsValue>,
    ) -> Result<JsValue, ObjectError> {
        let handle = callee.as_handle().ok_or_else(|| not_a_constructor(callee))?;
        if let Some(site) = self.instrumented_site(handle) {
            if !self.is_constructor(&site.original) {
                return Err(not_a_constructor(callee));
            }
            return self.intercept_construct(&site, args);
        }
        if !self.is_constructor(callee) {
            return Err(not_a_constructor(callee));
        }
        let behavior = self
            .heap
            .ordinary(handle, "construct")?
            .call
            .clone()
            .ok_or_else(|| not_a_constructor(callee))?;
        match behavior {
            CallBehavior::Bound {
                target,
                mut bound_args,
                ..
            } => {
                bound_args.extend(args);
                self.construct(&target, bound_args)
            }
            CallBehavior::Native(id) => {
                let proto = self.get(callee, &"prototype".into())?.as_handle();
                let instance = JsValue::Object(self.heap.alloc(proto));
                let body = self.native(id)?;
                let result = body(self, instance.clone(), args)?;
                Ok(if result.is_object() { result } else { instance })
            }
        }
    }

    /// `Function.prototype.bind`.
    pub fn bind(
        &mut self,
        target: &JsValue,
        this: JsValue,
        args: Vec<JsValue>,
    ) -> Result<JsValue, ObjectError> {
        let handle = target
            .as_handle()
            .filter(|h| self.heap.is_callable(*h))
            .ok_or_else(|| ObjectError::TypeError("bind must be called on a function".to_string()))?;
        let name = match self.heap.get(handle) {
            Ok(ManagedObject::Ordinary(o)) => o
                .get_own_property(&"name".into())
                .and_then(PropertyDescriptor::value)
                .map(ToString::to_string)
                .unwrap_or_default(),
            _ => String::new(),
        };
        let constructable = self.is_constructor(target);
        let bound = self.heap.alloc_function(
            CallBehavior::Bound {
                target: JsValue::Function(handle),
                bound_this: this,
                bound_args: args,
            },
            constructable,
            &format!("bound {name}"),
        );
        Ok(JsValue::Function(bound))
    }

    /// `ToPrimitive(value, hint)`: honours `@@toPrimitive`, unwraps boxes,
    /// and falls back to the object tag string.
    pub fn to_primitive(&mut self, value: &JsValue, hint: &str) -> Result<JsValue, ObjectError> {
        let Some(handle) = value.as_handle() else {
            return Ok(value.clone());
        };
        let exotic = self.get(value, &WellKnownSymbol::ToPrimitive.key())?;
        match exotic {
            JsValue::Undefined | JsValue::Null => {}
            f if f.is_callable() => {
                let result = self.call(&f, value.clone(), vec![JsValue::from(hint)])?;
                if result.is_object() {
                    return Err(ObjectError::TypeError(
                        "cannot convert object to primitive value".to_string(),
                    ));
                }
                return Ok(result);
            }
            other => return Err(not_a_function(&other)),
        }
        match self.heap.get(handle)? {
            ManagedObject::Ordinary(o) => match &o.primitive {
                Some(primitive) => Ok(primitive.clone()),
                None => Ok(JsValue::Str(format!(
                    "[object {}]",
                    o.class_tag.as_deref().unwrap_or("Object")
                ))),
            },
            ManagedObject::Instrumented(_) => Ok(JsValue::from("[object Object]")),
        }
    }
}

/// Property read on a primitive without allocating a box.
fn primitive_get(value: &JsValue, key: &PropertyKey) -> Result<JsValue, ObjectError> {
    match value {
        JsValue::Undefined | JsValue::Null => Err(ObjectError::TypeError(format!(
            "cannot read property '{key}' of {value}"
        ))),
        JsValue::Str(s) if *key == PropertyKey::from("length") => {
            Ok(JsValue::Int(s.chars().count() as i64))
        }
        _ => Ok(JsValue::Undefined),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> PropertyKey {
        PropertyKey::from(s)
    }

    #[test]
    fn get_walks_prototype_chain() {
        let mut realm = Realm::new();
        let proto = realm.new_object();
        realm.set(&proto, key("inherited"), JsValue::Int(1)).unwrap();
        let child = realm.new_object_with_proto(&proto).unwrap();
        assert_eq!(realm.get(&child, &key("inherited")).unwrap(), JsValue::Int(1));
        assert_eq!(realm.get(&child, &key("missing")).unwrap(), JsValue::Undefined);
        assert!(realm.has(&child, &key("inherited")).unwrap());
        assert!(!realm.has(&child, &key("missing")).unwrap());
    }

    #[test]
    fn set_shadows_inherited_writable_property() {
        let mut realm = Realm::new();
        let proto = realm.new_object();
        realm.set(&proto, key("x"), JsValue::Int(1)).unwrap();
        let child = realm.new_object_with_proto(&proto).unwrap();
        assert!(realm.set(&child, key("x"), JsValue::Int(2)).unwrap());
        assert_eq!(realm.get(&child, &key("x")).unwrap(), JsValue::Int(2));
        assert_eq!(realm.get(&proto, &key("x")).unwrap(), JsValue::Int(1));
    }

    #[test]
    fn set_rejects_non_writable_and_non_extensible() {
        let mut realm = Realm::new();
        let obj = realm.new_object();
        realm
            .define_property(&obj, key("fixed"), PropertyDescriptor::data_frozen(JsValue::Int(1)))
            .unwrap();
        assert!(!realm.set(&obj, key("fixed"), JsValue::Int(2)).unwrap());
        realm.prevent_extensions(&obj).unwrap();
        assert!(!realm.set(&obj, key("fresh"), JsValue::Int(3)).unwrap());
        assert_eq!(realm.get(&obj, &key("fixed")).unwrap(), JsValue::Int(1));
    }

    #[test]
    fn accessors_run_with_receiver() {
        let mut realm = Realm::new();
        let obj = realm.new_object();
        realm.set(&obj, key("base"), JsValue::Int(20)).unwrap();
        let getter = realm.new_method("get total", |realm, this, _args| {
            match realm.get(&this, &"base".into())? {
                JsValue::Int(n) => Ok(JsValue::Int(n + 1)),
                other => Ok(other),
            }
        });
        let setter = realm.new_method("set total", |realm, this, args| {
            let value = args.into_iter().next().unwrap_or(JsValue::Undefined);
            realm.set(&this, "base".into(), value)?;
            Ok(JsValue::Undefined)
        });
        realm
            .define_property(
                &obj,
                key("total"),
                PropertyDescriptor::Accessor {
                    get: getter.as_handle(),
                    set: setter.as_handle(),
                    enumerable: true,
                    configurable: true,
                },
            )
            .unwrap();
        assert_eq!(realm.get(&obj, &key("total")).unwrap(), JsValue::Int(21));
        assert!(realm.set(&obj, key("total"), JsValue::Int(5)).unwrap());
        assert_eq!(realm.get(&obj, &key("base")).unwrap(), JsValue::Int(5));
    }

    #[test]
    fn construct_links_prototype_and_runs_body() {
        let mut realm = Realm::new();
        let point = realm.new_function("Point", |realm, this, args| {
            let x = args.first().cloned().unwrap_or(JsValue::Undefined);
            realm.set(&this, "x".into(), x)?;
            Ok(JsValue::Undefined)
        });
        let instance = realm.construct(&point, vec![JsValue::Int(3)]).unwrap();
        assert_eq!(realm.get(&instance, &key("x")).unwrap(), JsValue::Int(3));
        let proto = realm.get(&point, &key("prototype")).unwrap();
        assert_eq!(realm.get_prototype_of(&instance).unwrap(), proto);
        assert_eq!(realm.get(&proto, &key("constructor")).unwrap(), point);
    }

    #[test]
    fn methods_are_not_constructors() {
        let mut realm = Realm::new();
        let m = realm.new_method("m", |_, _, _| Ok(JsValue::Undefined));
        assert!(!realm.is_constructor(&m));
        assert!(matches!(
            realm.construct(&m, vec![]),
            Err(ObjectError::TypeError(_))
        ));
    }

    #[test]
    fn bind_fixes_this_and_prepends_args() {
        let mut realm = Realm::new();
        let obj = realm.new_object();
        realm.set(&obj, key("n"), JsValue::Int(10)).unwrap();
        let add = realm.new_method("add", |realm, this, args| {
            let mut total = match realm.get(&this, &"n".into())? {
                JsValue::Int(n) => n,
                _ => 0,
            };
            for arg in args {
                if let JsValue::Int(n) = arg {
                    total += n;
                }
            }
            Ok(JsValue::Int(total))
        });
        let bound = realm.bind(&add, obj, vec![JsValue::Int(1)]).unwrap();
        assert_eq!(
            realm.call(&bound, JsValue::Undefined, vec![JsValue::Int(2)]).unwrap(),
            JsValue::Int(13)
        );
        assert_eq!(
            realm.get(&bound, &key("name")).unwrap(),
            JsValue::from("bound add")
        );
    }

    #[test]
    fn bind_rejects_non_callables() {
        let mut realm = Realm::new();
        let obj = realm.new_object();
        assert!(realm.bind(&obj, JsValue::Undefined, vec![]).is_err());
        let fake = JsValue::Function(obj.as_handle().unwrap());
        assert!(realm.bind(&fake, JsValue::Undefined, vec![]).is_err());
    }

    #[test]
    fn call_non_function_is_type_error() {
        let mut realm = Realm::new();
        let obj = realm.new_object();
        assert_eq!(
            realm.call(&JsValue::Int(1), JsValue::Undefined, vec![]),
            Err(ObjectError::TypeError("1 is not a function".into()))
        );
        assert!(realm.call(&obj, JsValue::Undefined, vec![]).is_err());
    }

    #[test]
    fn thrown_values_propagate() {
        let mut realm = Realm::new();
        let boom = realm.new_method("boom", |_, _, _| Err(ObjectError::Thrown(JsValue::from("bad"))));
        assert_eq!(
            realm.call(&boom, JsValue::Undefined, vec![]),
            Err(ObjectError::Thrown(JsValue::from("bad")))
        );
    }

    #[test]
    fn primitive_reads() {
        let mut realm = Realm::new();
        assert_eq!(
            realm.get(&JsValue::from("abc"), &key("length")).unwrap(),
            JsValue::Int(3)
        );
        assert_eq!(realm.get(&JsValue::Int(1), &key("x")).unwrap(), JsValue::Undefined);
        assert!(realm.get(&JsValue::Undefined, &key("x")).is_err());
        assert!(!realm.set(&JsValue::Int(1), key("x"), JsValue::Int(2)).unwrap());
        assert!(realm.has(&JsValue::Int(1), &key("x")).is_err());
    }

    #[test]
    fn to_primitive_unwraps_boxes_and_honours_exotic_hook() {
        let mut realm = Realm::new();
        let boxed = JsValue::Object(realm.heap_mut().alloc_box(&JsValue::Int(7)));
        assert_eq!(realm.to_primitive(&boxed, "number").unwrap(), JsValue::Int(7));

        let obj = realm.new_object();
        assert_eq!(
            realm.to_primitive(&obj, "default").unwrap(),
            JsValue::from("[object Object]")
        );
        let f = realm.new_method("f", |_, _, _| Ok(JsValue::Undefined));
        assert_eq!(
            realm.to_primitive(&f, "default").unwrap(),
            JsValue::from("[object Function]")
        );
        let hook = realm.new_method("toPrimitive", |_, _, args| {
            Ok(args.into_iter().next().unwrap_or(JsValue::Undefined))
        });
        realm.set(&obj, WellKnownSymbol::ToPrimitive.key(), hook).unwrap();
        assert_eq!(realm.to_primitive(&obj, "string").unwrap(), JsValue::from("string"));
    }

    #[test]
    fn prototype_cycle_is_error() {
        let mut realm = Realm::new();
        let a = realm.new_object();
        let b = realm.new_object_with_proto(&a).unwrap();
        assert_eq!(
            realm.set_prototype_of(&a, &b),
            Err(ObjectError::PrototypeCycleDetected)
        );
        assert!(realm.set_prototype_of(&a, &JsValue::Int(1)).is_err());
        assert!(realm.set_prototype_of(&a, &JsValue::Null).unwrap());
    }

    #[test]
    fn events_drain() {
        let mut realm = Realm::new();
        realm.emit_event(SessionId(3), "root", "session_created", "ok", None);
        assert_eq!(realm.events().len(), 1);
        let events = realm.drain_events();
        assert_eq!(events[0].trace_id, "calltrace-session-3");
        assert_eq!(events[0].component, "calltrace_realm");
        assert!(realm.drain_events().is_empty());
    }
}
