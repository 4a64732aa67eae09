#![no_main]

use frankenengine_calltrace::object_model::{JsValue, ObjectError, PropertyDescriptor, PropertyKey};
use frankenengine_calltrace::options::{InstrumentOptions, TreeMode};
use frankenengine_calltrace::realm::Realm;
use libfuzzer_sys::fuzz_target;

const MAX_STEPS: usize = 128;
const KEYS: [&str; 4] = ["a", "b", "child", "run"];

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    run_operation_program(data);
});

fn run_operation_program(data: &[u8]) {
    let mut realm = Realm::new();
    let root = realm.new_object();
    let child = realm.new_object();
    let _ = realm.set(&root, "child".into(), child);
    let run = realm.new_method("run", |realm, this, args| {
        let key = args.first().map(ToString::to_string).unwrap_or_default();
        realm.get(&this, &PropertyKey::from(key))
    });
    let _ = realm.set(&root, "run".into(), run);
    let fail = realm.new_method("fail", |_, _, _| Err(ObjectError::Thrown(JsValue::from("fuzz"))));
    let _ = realm.set(&root, "fail".into(), fail);

    let options = InstrumentOptions {
        tree_mode: if byte(data, 0) % 2 == 0 {
            TreeMode::Shared
        } else {
            TreeMode::Isolated
        },
    };
    let handle = realm.create_instrumented_handle(root, "fuzz", options);
    let mut reachable = vec![handle.clone()];

    let mut cursor = 1usize;
    for _ in 0..MAX_STEPS {
        let opcode = byte(data, cursor);
        let target = reachable[usize::from(byte(data, cursor + 1)) % reachable.len()].clone();
        let key = PropertyKey::from(KEYS[usize::from(byte(data, cursor + 2)) % KEYS.len()]);
        cursor = cursor.saturating_add(3);

        match opcode % 10 {
            0 => {
                if let Ok(value) = realm.get(&target, &key)
                    && realm.is_instrumented(&value)
                {
                    reachable.push(value);
                }
            }
            1 => {
                let _ = realm.set(&target, key, JsValue::Int(i64::from(opcode)));
            }
            2 => {
                let fresh = realm.new_object();
                let _ = realm.set(&target, key, fresh);
            }
            3 => {
                let _ = realm.has(&target, &key);
                let _ = realm.own_keys(&target);
            }
            4 => {
                let _ = realm.delete_property(&target, &key);
            }
            5 => {
                let _ = realm.define_property(
                    &target,
                    key,
                    PropertyDescriptor::data_frozen(JsValue::Bool(opcode & 1 == 0)),
                );
            }
            6 => {
                let _ = realm.get_prototype_of(&target);
                let _ = realm.is_extensible(&target);
            }
            7 => {
                let name = JsValue::from(KEYS[usize::from(opcode) % KEYS.len()]);
                let _ = realm.call(&target, JsValue::Undefined, vec![name]);
                let _ = realm.construct(&target, Vec::new());
            }
            8 => {
                let _ = realm.to_primitive(&target, "default");
            }
            _ => {
                if let Ok(method) = realm.get(&target, &"fail".into()) {
                    let _ = realm.call(&method, JsValue::Undefined, Vec::new());
                }
                let _ = realm.drain_events();
            }
        }

        for value in &reachable {
            assert_eq!(realm.call_tree_is_balanced(value), Some(true));
        }
    }
}

fn byte(data: &[u8], index: usize) -> u8 {
    if data.is_empty() {
        return 0;
    }
    data[index % data.len()]
}
