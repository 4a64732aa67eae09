//! Interception engine for instrumented handles.
//!
//! A handle is a heap-resident [`InstrumentedObject`] that stands in for an
//! original value. The realm routes every internal method on a handle to one
//! of the `intercept_*` functions below. Each one pushes an operation node on
//! the session's active [`CallTree`], delegates to the real operation on the
//! unwrapped target, and pops the node on every exit path before handing the
//! outcome back.
//!
//! Values flowing out of reads, calls and constructions are wrapped lazily
//! into the same session, so the whole reachable graph is recorded.
//! Structural query results (descriptors, prototypes, key lists) are
//! returned as-is.
//!
//! Bookkeeping failures (registry refusals, rebind failures) are never
//! surfaced to callers; they end up as structured events on the realm.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::call_tree::{CallTree, CallTreeNode, Detail, DetailValue, OperationKind, TreeId};
use crate::identity_registry::{IdentityRegistry, MethodWrapperCache, PrimitiveBoxCache};
use crate::object_model::{
    JsValue, ManagedObject, ObjectError, ObjectHandle, PropertyDescriptor, PropertyKey,
    WellKnownSymbol,
};
use crate::options::{InstrumentOptions, TreeMode};
use crate::realm::Realm;

/// Label given to the root when the caller has no better name.
pub const DEFAULT_ROOT_LABEL: &str = "root";

/// Nesting limit for object snapshots inside detail payloads.
const MAX_DETAIL_DEPTH: usize = 4;

/// One call of [`Realm::create_instrumented_handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u32);

/// Heap state of an instrumented handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentedObject {
    pub session: SessionId,
    pub tree: TreeId,
    /// The value the handle stands for.
    pub original: JsValue,
    /// Object operations are delegated to: the original itself, or its box.
    pub target: ObjectHandle,
    pub label: String,
}

impl InstrumentedObject {
    fn target_value(&self) -> JsValue {
        match self.original {
            JsValue::Function(_) => JsValue::Function(self.target),
            _ => JsValue::Object(self.target),
        }
    }
}

/// Per-session state. Never shared between sessions.
#[derive(Debug)]
pub(crate) struct Session {
    options: InstrumentOptions,
    registry: IdentityRegistry,
    methods: MethodWrapperCache,
    boxes: PrimitiveBoxCache,
    trees: Vec<CallTree>,
    /// Shared `@@toPrimitive` replacement, allocated on first read.
    to_primitive_hook: Option<JsValue>,
}

impl Session {
    fn new(options: InstrumentOptions, label: &str, value_kind: &str) -> Self {
        let trees = match options.tree_mode {
            TreeMode::Shared => vec![CallTree::new(label, value_kind)],
            TreeMode::Isolated => Vec::new(),
        };
        Self {
            options,
            registry: IdentityRegistry::new(),
            methods: MethodWrapperCache::new(),
            boxes: PrimitiveBoxCache::new(),
            trees,
            to_primitive_hook: None,
        }
    }

    fn tree_for(&mut self, label: &str, value_kind: &str) -> TreeId {
        match self.options.tree_mode {
            TreeMode::Shared => TreeId(0),
            TreeMode::Isolated => {
                self.trees.push(CallTree::new(label, value_kind));
                TreeId(self.trees.len() as u32 - 1)
            }
        }
    }
}

/// Receivers tried, in order, when rebinding a method read off a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RebindStrategy {
    /// The target exactly as the handle delegates to it.
    AsSeen,
    /// The target after resolving any wrapper back to its original.
    Unwrapped,
}

const REBIND_ORDER: [RebindStrategy; 2] = [RebindStrategy::AsSeen, RebindStrategy::Unwrapped];

impl Realm {
    // -----------------------------------------------------------------------
    // Public surface
    // -----------------------------------------------------------------------

    /// Wrap `value` in a fresh session and return its handle.
    pub fn create_instrumented_handle(
        &mut self,
        value: JsValue,
        label: &str,
        options: InstrumentOptions,
    ) -> JsValue {
        let value = self.normalize(value);
        let id = SessionId(self.sessions.len() as u32);
        self.sessions
            .push(Session::new(options, label, value.type_name()));
        self.emit_event(id, label, "session_created", "ok", None);
        self.wrap(id, value, label)
    }

    /// [`Realm::create_instrumented_handle`] with the default label and options.
    pub fn instrument(&mut self, value: JsValue) -> JsValue {
        self.create_instrumented_handle(value, DEFAULT_ROOT_LABEL, InstrumentOptions::default())
    }

    /// Wrap `value` into the session `anchor` belongs to. `None` when
    /// `anchor` is not a handle.
    pub fn wrap_with(&mut self, anchor: &JsValue, value: JsValue, label: &str) -> Option<JsValue> {
        let session = self.site_of(anchor)?.session;
        let value = self.normalize(value);
        Some(self.wrap(session, value, label))
    }

    /// Snapshot of the tree `handle` records into. Read from the heap slot,
    /// so it is neither recorded nor reachable through property operations.
    pub fn get_call_tree(&self, handle: &JsValue) -> Option<CallTreeNode> {
        self.tree_of(handle).map(CallTree::root)
    }

    /// Whether every operation recorded for `handle`'s tree has completed.
    pub fn call_tree_is_balanced(&self, handle: &JsValue) -> Option<bool> {
        self.tree_of(handle).map(CallTree::is_balanced)
    }

    pub fn is_instrumented(&self, value: &JsValue) -> bool {
        self.site_of(value).is_some()
    }

    /// The value a handle stands for.
    pub fn original_of(&self, handle: &JsValue) -> Option<JsValue> {
        self.site_of(handle).map(|site| site.original.clone())
    }

    // -----------------------------------------------------------------------
    // Wrapping
    // -----------------------------------------------------------------------

    fn site_of(&self, value: &JsValue) -> Option<&InstrumentedObject> {
        self.heap().get(value.as_handle()?).ok()?.as_instrumented()
    }

    fn tree_of(&self, handle: &JsValue) -> Option<&CallTree> {
        let site = self.site_of(handle)?;
        self.sessions
            .get(site.session.0 as usize)?
            .trees
            .get(site.tree.0 as usize)
    }

    fn session(&self, id: SessionId) -> &Session {
        &self.sessions[id.0 as usize]
    }

    fn session_mut(&mut self, id: SessionId) -> &mut Session {
        &mut self.sessions[id.0 as usize]
    }

    fn tree_mut(&mut self, site: &InstrumentedObject) -> &mut CallTree {
        &mut self.session_mut(site.session).trees[site.tree.0 as usize]
    }

    /// `Function` for anything callable, so handles mirror callability.
    fn normalize(&self, value: JsValue) -> JsValue {
        match value.as_handle() {
            Some(handle) => self.heap().value_of(handle),
            None => value,
        }
    }

    /// Original for a handle of this session, otherwise the value itself.
    fn resolve(&self, session: SessionId, value: &JsValue) -> JsValue {
        self.session(session).registry.resolve(value)
    }

    /// Accessor slot form of [`Realm::resolve`]. A slot whose original is
    /// not an object keeps the handle.
    fn resolve_slot(&self, session: SessionId, slot: ObjectHandle) -> ObjectHandle {
        let value = self.heap().value_of(slot);
        self.resolve(session, &value).as_handle().unwrap_or(slot)
    }

    fn wrap(&mut self, session: SessionId, value: JsValue, label: &str) -> JsValue {
        if let Some(existing) = self.session(session).registry.wrapper_for(&value) {
            return existing.clone();
        }
        let tree = self.session_mut(session).tree_for(label, value.type_name());
        let target = match value.as_handle() {
            Some(handle) => handle,
            None => self.box_primitive(session, &value),
        };
        let handle = self.heap_mut().alloc_instrumented(InstrumentedObject {
            session,
            tree,
            original: value.clone(),
            target,
            label: label.to_string(),
        });
        let wrapper = if value.is_callable() {
            JsValue::Function(handle)
        } else {
            JsValue::Object(handle)
        };

        let registry = &mut self.session_mut(session).registry;
        let registered = registry
            .record_wrapper(handle, value.clone())
            .and_then(|()| registry.register_original(&value, wrapper.clone()));
        if let Err(err) = registered {
            self.emit_event(session, label, "identity_registration", "skipped", Some(err.code()));
        }
        wrapper
    }

    fn box_primitive(&mut self, session: SessionId, value: &JsValue) -> ObjectHandle {
        if let Some(boxed) = self.session(session).boxes.get(value) {
            return boxed;
        }
        let boxed = self.heap_mut().alloc_box(value);
        if matches!(value, JsValue::Undefined | JsValue::Null) {
            return boxed;
        }
        if let Err(err) = self.session_mut(session).boxes.insert(value.clone(), boxed) {
            self.emit_event(session, &value.to_string(), "primitive_box", "skipped", Some(err.code()));
        }
        boxed
    }

    /// Wrap object results; primitives pass through.
    fn wrap_result(&mut self, site: &InstrumentedObject, value: JsValue, label: String) -> JsValue {
        if value.is_primitive() {
            value
        } else {
            self.wrap(site.session, value, &label)
        }
    }

    /// Push, run, pop. The pop happens whatever `op` returns.
    fn record<T>(
        &mut self,
        site: &InstrumentedObject,
        action: OperationKind,
        detail: Option<Detail>,
        op: impl FnOnce(&mut Self) -> Result<T, ObjectError>,
    ) -> Result<T, ObjectError> {
        self.tree_mut(site).push(action, detail);
        let outcome = op(self);
        self.tree_mut(site).pop();
        outcome
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    pub(crate) fn intercept_get(
        &mut self,
        site: &InstrumentedObject,
        key: &PropertyKey,
    ) -> Result<JsValue, ObjectError> {
        let detail = Detail::scalar(key.to_string());
        self.record(site, OperationKind::Get, Some(detail), |realm| {
            realm.delegate_get(site, key)
        })
    }

    fn delegate_get(
        &mut self,
        site: &InstrumentedObject,
        key: &PropertyKey,
    ) -> Result<JsValue, ObjectError> {
        if *key == WellKnownSymbol::ToPrimitive.key() {
            return Ok(self.to_primitive_hook(site));
        }
        let base = site.target_value();
        let result = self.get(&base, key)?;
        // Invariants of non-configurable properties require the real value.
        if self
            .get_own_property_descriptor(&base, key)?
            .is_some_and(|desc| !desc.is_configurable())
        {
            return Ok(result);
        }
        match result {
            JsValue::Function(function) => Ok(self.instrument_method(site, &base, function, key)),
            other => Ok(self.wrap_result(site, other, format!("{}.{key}", site.label))),
        }
    }

    /// Replacement for `@@toPrimitive`, one per session. It finds the
    /// handle through its receiver, records the hint and yields the
    /// original value.
    fn to_primitive_hook(&mut self, site: &InstrumentedObject) -> JsValue {
        if let Some(hook) = &self.session(site.session).to_primitive_hook {
            return hook.clone();
        }
        let hook = self.new_method("[Symbol.toPrimitive]", |realm, this, args| {
            let Some(site) = this.as_handle().and_then(|h| realm.instrumented_site(h)) else {
                return Err(ObjectError::TypeError(format!(
                    "[Symbol.toPrimitive] called on {this}, which is not instrumented"
                )));
            };
            let hint = match args.first() {
                Some(JsValue::Str(hint)) => hint.clone(),
                Some(other) => other.to_string(),
                None => "default".to_string(),
            };
            let original = site.original.clone();
            realm.record(&site, OperationKind::ToPrimitive, Some(Detail::Scalar(hint)), |_| {
                Ok(original)
            })
        });
        self.session_mut(site.session).to_primitive_hook = Some(hook.clone());
        hook
    }

    fn instrument_method(
        &mut self,
        site: &InstrumentedObject,
        base: &JsValue,
        function: ObjectHandle,
        key: &PropertyKey,
    ) -> JsValue {
        if let Some(cached) = self.session(site.session).methods.get(function) {
            return cached.clone();
        }
        let original = JsValue::Function(function);
        let label = format!("{}.{key}()", site.label);

        let mut rebound = None;
        for strategy in REBIND_ORDER {
            let this = match strategy {
                RebindStrategy::AsSeen => base.clone(),
                RebindStrategy::Unwrapped => self.resolve(site.session, base),
            };
            if let Ok(bound) = self.bind(&original, this, Vec::new()) {
                rebound = Some(bound);
                break;
            }
        }
        let method = match rebound {
            Some(bound) => self.wrap(site.session, bound, &label),
            None => {
                self.emit_event(site.session, &label, "method_rebind", "fallback_raw", None);
                original
            }
        };

        if let Err(err) = self
            .session_mut(site.session)
            .methods
            .insert(function, method.clone())
        {
            self.emit_event(site.session, &label, "method_cache", "skipped", Some(err.code()));
        }
        method
    }

    pub(crate) fn intercept_set(
        &mut self,
        site: &InstrumentedObject,
        key: PropertyKey,
        value: JsValue,
    ) -> Result<bool, ObjectError> {
        let value = self.resolve(site.session, &value);
        let detail = Detail::Fields(vec![
            ("prop".to_string(), DetailValue::scalar(key.to_string())),
            ("newVal".to_string(), self.snapshot(&value)),
        ]);
        self.record(site, OperationKind::Set, Some(detail), |realm| {
            realm.set(&site.target_value(), key, value)
        })
    }

    pub(crate) fn intercept_has(
        &mut self,
        site: &InstrumentedObject,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        let detail = Detail::scalar(key.to_string());
        self.record(site, OperationKind::Has, Some(detail), |realm| {
            realm.has(&site.target_value(), key)
        })
    }

    pub(crate) fn intercept_delete_property(
        &mut self,
        site: &InstrumentedObject,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        let detail = Detail::scalar(key.to_string());
        self.record(site, OperationKind::DeleteProperty, Some(detail), |realm| {
            realm.delete_property(&site.target_value(), key)
        })
    }

    pub(crate) fn intercept_own_keys(
        &mut self,
        site: &InstrumentedObject,
    ) -> Result<Vec<PropertyKey>, ObjectError> {
        self.record(site, OperationKind::OwnKeys, None, |realm| {
            realm.own_keys(&site.target_value())
        })
    }

    pub(crate) fn intercept_get_own_property_descriptor(
        &mut self,
        site: &InstrumentedObject,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        let detail = Detail::scalar(key.to_string());
        self.record(site, OperationKind::GetOwnPropertyDescriptor, Some(detail), |realm| {
            realm.get_own_property_descriptor(&site.target_value(), key)
        })
    }

    pub(crate) fn intercept_define_property(
        &mut self,
        site: &InstrumentedObject,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        let desc = match desc {
            PropertyDescriptor::Data {
                value,
                writable,
                enumerable,
                configurable,
            } => PropertyDescriptor::Data {
                value: self.resolve(site.session, &value),
                writable,
                enumerable,
                configurable,
            },
            PropertyDescriptor::Accessor {
                get,
                set,
                enumerable,
                configurable,
            } => PropertyDescriptor::Accessor {
                get: get.map(|h| self.resolve_slot(site.session, h)),
                set: set.map(|h| self.resolve_slot(site.session, h)),
                enumerable,
                configurable,
            },
        };
        let detail = Detail::Fields(vec![
            ("prop".to_string(), DetailValue::scalar(key.to_string())),
            ("descriptor".to_string(), self.descriptor_snapshot(&desc)),
        ]);
        self.record(site, OperationKind::DefineProperty, Some(detail), |realm| {
            realm.define_property(&site.target_value(), key, desc)
        })
    }

    pub(crate) fn intercept_get_prototype_of(
        &mut self,
        site: &InstrumentedObject,
    ) -> Result<JsValue, ObjectError> {
        self.record(site, OperationKind::GetPrototypeOf, None, |realm| {
            realm.get_prototype_of(&site.target_value())
        })
    }

    pub(crate) fn intercept_set_prototype_of(
        &mut self,
        site: &InstrumentedObject,
        proto: &JsValue,
    ) -> Result<bool, ObjectError> {
        let proto = self.resolve(site.session, proto);
        let detail = match self.snapshot(&proto) {
            DetailValue::Scalar(text) => Detail::Scalar(text),
            DetailValue::Record(fields) => Detail::Fields(fields),
            DetailValue::Function => Detail::scalar("[Function]"),
            list @ DetailValue::List(_) => Detail::Fields(vec![("value".to_string(), list)]),
        };
        self.record(site, OperationKind::SetPrototypeOf, Some(detail), |realm| {
            realm.set_prototype_of(&site.target_value(), &proto)
        })
    }

    pub(crate) fn intercept_is_extensible(
        &mut self,
        site: &InstrumentedObject,
    ) -> Result<bool, ObjectError> {
        self.record(site, OperationKind::IsExtensible, None, |realm| {
            realm.is_extensible(&site.target_value())
        })
    }

    pub(crate) fn intercept_prevent_extensions(
        &mut self,
        site: &InstrumentedObject,
    ) -> Result<bool, ObjectError> {
        self.record(site, OperationKind::PreventExtensions, None, |realm| {
            realm.prevent_extensions(&site.target_value())
        })
    }

    pub(crate) fn intercept_apply(
        &mut self,
        site: &InstrumentedObject,
        this: JsValue,
        args: Vec<JsValue>,
    ) -> Result<JsValue, ObjectError> {
        let this = self.resolve(site.session, &this);
        let args: Vec<JsValue> = args.iter().map(|arg| self.resolve(site.session, arg)).collect();
        let detail = Detail::Fields(vec![
            ("thisArg".to_string(), self.snapshot(&this)),
            ("argList".to_string(), self.args_snapshot(&args)),
        ]);
        self.record(site, OperationKind::Apply, Some(detail), |realm| {
            let result = realm.call(&site.original, this, args)?;
            Ok(realm.wrap_result(site, result, format!("{}() result", site.label)))
        })
    }

    pub(crate) fn intercept_construct(
        &mut self,
        site: &InstrumentedObject,
        args: Vec<JsValue>,
    ) -> Result<JsValue, ObjectError> {
        let args: Vec<JsValue> = args.iter().map(|arg| self.resolve(site.session, arg)).collect();
        let detail = Detail::Fields(vec![("argList".to_string(), self.args_snapshot(&args))]);
        self.record(site, OperationKind::Construct, Some(detail), |realm| {
            let result = realm.construct(&site.original, args)?;
            Ok(realm.wrap_result(site, result, format!("new {}", site.label)))
        })
    }

    // -----------------------------------------------------------------------
    // Detail snapshots
    // -----------------------------------------------------------------------

    /// Record-time copy of a value for a detail payload. Reads the heap
    /// directly, so taking it records nothing.
    fn snapshot(&self, value: &JsValue) -> DetailValue {
        self.snapshot_at(value, 0, &mut BTreeSet::new())
    }

    fn snapshot_at(
        &self,
        value: &JsValue,
        depth: usize,
        visiting: &mut BTreeSet<ObjectHandle>,
    ) -> DetailValue {
        let handle = match value {
            JsValue::Function(_) => return DetailValue::Function,
            JsValue::Object(handle) => *handle,
            primitive => return DetailValue::scalar(primitive.to_string()),
        };
        let Some(object) = self.heap().get(handle).ok().and_then(ManagedObject::as_ordinary) else {
            return DetailValue::scalar(value.to_string());
        };
        if depth >= MAX_DETAIL_DEPTH || !visiting.insert(handle) {
            return DetailValue::scalar(value.to_string());
        }
        let mut fields = Vec::new();
        for key in object.own_property_keys() {
            let PropertyKey::String(name) = &key else {
                continue;
            };
            let Some(desc) = object.get_own_property(&key) else {
                continue;
            };
            if !desc.is_enumerable() {
                continue;
            }
            if let Some(inner) = desc.value() {
                fields.push((name.clone(), self.snapshot_at(inner, depth + 1, visiting)));
            }
        }
        visiting.remove(&handle);
        DetailValue::Record(fields)
    }

    fn args_snapshot(&self, args: &[JsValue]) -> DetailValue {
        DetailValue::List(args.iter().map(|arg| self.snapshot(arg)).collect())
    }

    fn descriptor_snapshot(&self, desc: &PropertyDescriptor) -> DetailValue {
        let flag = |name: &str, on: bool| (name.to_string(), DetailValue::scalar(on.to_string()));
        let accessor = |name: &str, slot: &Option<ObjectHandle>| {
            let value = match slot {
                Some(_) => DetailValue::Function,
                None => DetailValue::scalar("undefined"),
            };
            (name.to_string(), value)
        };
        let fields = match desc {
            PropertyDescriptor::Data {
                value,
                writable,
                enumerable,
                configurable,
            } => vec![
                ("value".to_string(), self.snapshot(value)),
                flag("writable", *writable),
                flag("enumerable", *enumerable),
                flag("configurable", *configurable),
            ],
            PropertyDescriptor::Accessor {
                get,
                set,
                enumerable,
                configurable,
            } => vec![
                accessor("get", get),
                accessor("set", set),
                flag("enumerable", *enumerable),
                flag("configurable", *configurable),
            ],
        };
        DetailValue::Record(fields)
    }
}
