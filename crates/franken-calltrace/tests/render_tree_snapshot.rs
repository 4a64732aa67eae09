use frankenengine_calltrace::call_tree::{CallTree, CallTreeNode, Detail, DetailValue, OperationKind, render_tree};
use frankenengine_calltrace::object_model::{JsValue, PropertyKey};
use frankenengine_calltrace::realm::Realm;

// ---------------------------------------------------------------------------
// Pure rendering
// ---------------------------------------------------------------------------

#[test]
fn nested_records_and_functions_render_by_indent() {
    let mut tree = CallTree::new("root", "object");
    tree.push(
        OperationKind::Set,
        Some(Detail::Fields(vec![
            ("prop".into(), DetailValue::scalar("cfg")),
            (
                "newVal".into(),
                DetailValue::Record(vec![
                    ("port".into(), DetailValue::scalar("80")),
                    ("onReady".into(), DetailValue::Function),
                    (
                        "tls".into(),
                        DetailValue::Record(vec![("on".into(), DetailValue::scalar("true"))]),
                    ),
                ]),
            ),
        ])),
    );
    tree.pop();

    assert_eq!(
        render_tree(&tree.root(), ""),
        "root (object)\n  set\n    prop: cfg\n    newVal:\n      port: 80\n      onReady: [Function]\n      tls:\n        on: true"
    );
}

#[test]
fn caller_indent_prefixes_every_line() {
    let mut tree = CallTree::new("h", "number");
    tree.push(OperationKind::OwnKeys, None);
    tree.pop();
    assert_eq!(render_tree(&tree.root(), "> "), "> h (number)\n>   ownKeys");
}

// ---------------------------------------------------------------------------
// Recorded trees
// ---------------------------------------------------------------------------

#[test]
fn recorded_tree_exports_json() {
    let mut realm = Realm::new();
    let obj = realm.new_object();
    realm.set(&obj, PropertyKey::from("x"), JsValue::Int(1)).unwrap();
    let handle = realm.instrument(obj);
    realm.get(&handle, &PropertyKey::from("x")).unwrap();

    let json = realm.get_call_tree(&handle).unwrap().to_json();
    assert_eq!(
        json,
        serde_json::json!({
            "label": "root",
            "valueKind": "object",
            "children": [
                { "action": "get", "detail": "x", "children": [] }
            ]
        })
    );
}

#[test]
fn apply_detail_exports_as_object() {
    let mut realm = Realm::new();
    let double = realm.new_method("double", |_, _, args| match args.first() {
        Some(JsValue::Int(n)) => Ok(JsValue::Int(n * 2)),
        _ => Ok(JsValue::Undefined),
    });
    let handle = realm.instrument(double);
    realm.call(&handle, JsValue::Undefined, vec![JsValue::Int(21)]).unwrap();

    let node = realm.get_call_tree(&handle).unwrap();
    assert_eq!(
        node.to_json(),
        serde_json::json!({
            "label": "root",
            "valueKind": "function",
            "children": [{
                "action": "apply",
                "detail": { "thisArg": "undefined", "argList": ["21"] },
                "children": []
            }]
        })
    );
    let text = serde_json::to_string(&node).unwrap();
    assert!(text.contains(r#""detail":{"thisArg":"undefined","argList":["21"]}"#));
    let back: CallTreeNode = serde_json::from_str(&text).unwrap();
    assert_eq!(back, node);
}

#[test]
fn snapshot_is_detached_from_later_recording() {
    let mut realm = Realm::new();
    let obj = realm.new_object();
    let handle = realm.instrument(obj);
    let before = realm.get_call_tree(&handle).unwrap();
    realm.has(&handle, &PropertyKey::from("x")).unwrap();
    assert!(before.children().is_empty());
    assert_eq!(realm.get_call_tree(&handle).unwrap().children().len(), 1);
}
