//! End-to-end tests that run whole `.behl` programs through [`behl::Engine`],
//! one `#[test]` per fixture rather than a `datatest`-driven runner (no
//! `datatest` dependency, same idea as the teacher's `datatest_runner.rs`).

use behl::{Engine, EngineConfig, Value};

fn int_result(engine: &mut Engine, src: &str) -> i64 {
    match engine.eval(src, "<test>").unwrap() {
        Value::Int(i) => i,
        other => panic!("expected an integer result, got {other:?}"),
    }
}

fn str_result(engine: &mut Engine, src: &str) -> String {
    let value = engine.eval(src, "<test>").unwrap();
    engine.vm().display_string(value).unwrap()
}

#[test]
fn closures_share_upvalues() {
    let mut engine = Engine::new(EngineConfig::default());
    let src = "function make() { let n = 0; return function(){ n++; return n } }
let f = make(); return f()+f()+f()";
    assert_eq!(int_result(&mut engine, src), 6);
}

#[test]
fn for_in_over_array_like_table_yields_original_order() {
    let mut engine = Engine::new(EngineConfig::default());
    let src = "let t = {10,20,30}; let s = 0; for (v in pairs(t)) { s += v } return s";
    assert_eq!(int_result(&mut engine, src), 60);
}

#[test]
fn add_metamethod_dispatches_through_metatable() {
    let mut engine = Engine::new(EngineConfig::default());
    let src = "let a = setmetatable({v=3}, {__add = function(x,y){ return x.v + y }})
return a + 4";
    assert_eq!(int_result(&mut engine, src), 7);
}

#[test]
fn protected_call_captures_error() {
    let mut engine = Engine::new(EngineConfig::default());
    let src = "let ok,msg = pcall(function(){ error(\"boom\") })
return tostring(ok) + \":\" + msg";
    let result = str_result(&mut engine, src);
    assert!(result.starts_with("false:"), "got: {result}");
    assert!(result.contains("boom"), "got: {result}");
}

#[test]
fn defer_runs_in_lifo_order_even_on_error() {
    let mut engine = Engine::new(EngineConfig::default());
    let src = "let log = \"\"
let ok,_ = pcall(function(){
    defer { log += \"A\" }
    defer { log += \"B\" }
    error(\"x\")
})
return log";
    assert_eq!(str_result(&mut engine, src), "BA");
}

#[test]
fn module_import_returns_exports() {
    let dir = std::env::temp_dir().join(format!("behl-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let module_path = dir.join("m.behl");
    std::fs::write(&module_path, "module;\nexport const PI = 3;\nexport function id(x){ return x }\n").unwrap();

    let mut engine = Engine::new(EngineConfig::default());
    let main_path = dir.join("main.behl");
    std::fs::write(&main_path, "const m = import(\"m\"); return m.PI + m.id(4)").unwrap();

    let result = engine.run_file(&main_path).unwrap();
    assert!(matches!(result, Value::Int(7)), "got: {result:?}");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn numeric_key_identity_int_and_float_alias() {
    let mut engine = Engine::new(EngineConfig::default());
    let src = "let t = {}; t[5] = \"five\"; return t[5.0]";
    assert_eq!(str_result(&mut engine, src), "five");
}

#[test]
fn const_reassignment_is_a_compile_error() {
    let mut engine = Engine::new(EngineConfig::default());
    let err = engine.eval("const x = 1; x = 2; return x;", "<test>").unwrap_err();
    assert!(matches!(err, behl::ScriptError::Compile(_)));
}

#[test]
fn integer_division_by_zero_raises() {
    let mut engine = Engine::new(EngineConfig::default());
    let err = engine.eval("return 1 / 0;", "<test>");
    assert!(err.is_err());
}

#[test]
fn float_division_by_zero_yields_infinity() {
    let mut engine = Engine::new(EngineConfig::default());
    let src = "return 1.0 / 0.0;";
    match engine.eval(src, "<test>").unwrap() {
        Value::Float(f) => assert!(f.is_infinite()),
        other => panic!("expected a float, got {other:?}"),
    }
}

#[test]
fn plus_concatenates_strings() {
    let mut engine = Engine::new(EngineConfig::default());
    assert_eq!(str_result(&mut engine, "return \"a\" + \"b\";"), "ab");
}

#[test]
fn typeid_distinguishes_value_kinds() {
    let mut engine = Engine::new(EngineConfig::default());
    assert_eq!(int_result(&mut engine, "return typeid(1);"), int_result(&mut engine, "return typeid(2);"));
    assert_ne!(int_result(&mut engine, "return typeid(1);"), int_result(&mut engine, "return typeid(\"x\");"));
}

#[test]
fn bitwise_not_is_a_unary_prefix_operator() {
    let mut engine = Engine::new(EngineConfig::default());
    assert_eq!(int_result(&mut engine, "return ~0;"), -1);
}

#[test]
fn bnot_metamethod_dispatches_through_metatable() {
    let mut engine = Engine::new(EngineConfig::default());
    let src = "let a = setmetatable({v=3}, {__bnot = function(x){ return ~x.v }})
return ~a";
    assert_eq!(int_result(&mut engine, src), -4);
}

#[test]
fn call_metamethod_lets_a_table_be_invoked() {
    let mut engine = Engine::new(EngineConfig::default());
    let src = "let adder = setmetatable({step=10}, {__call = function(self, n){ return self.step + n }})
return adder(5)";
    assert_eq!(int_result(&mut engine, src), 15);
}

#[test]
fn pairs_metamethod_overrides_default_iteration() {
    let mut engine = Engine::new(EngineConfig::default());
    let src = "let t = setmetatable({1,2,3}, {__pairs = function(self){ return {100,200} }})
let s = 0
for (v in pairs(t)) { s += v }
return s";
    assert_eq!(int_result(&mut engine, src), 300);
}
