#![forbid(unsafe_code)]

//! Transparent call-tree instrumentation over an ES2020-style object model.
//!
//! [`realm::Realm::create_instrumented_handle`] wraps a value in a handle
//! that behaves like the original while recording every structural
//! operation performed on it, and on everything reachable through it, into
//! a [`call_tree::CallTreeNode`] tree. Pull the tree with
//! [`realm::Realm::get_call_tree`] and print it with [`call_tree::render_tree`].

pub mod call_tree;
pub mod identity_registry;
pub mod interceptor;
pub mod object_model;
pub mod options;
pub mod realm;
