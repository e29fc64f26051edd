use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub fn compile_ir_to_js(request_json: &str) -> Result<String, JsValue> {
    compile_ir_to_js_with_options(request_json, true, false)
}

#[wasm_bindgen]
pub fn compile_ir_to_js_with_options(
    request_json: &str,
    supports_nullish_coalescing: bool,
    debug: bool,
) -> Result<String, JsValue> {
    let environment = crate::Environment {
        supports_nullish_coalescing,
        debug,
    };
    let mut compiler = crate::Compiler::with_environment(environment);
    compiler
        .compile_request_str(request_json)
        .map(|compiled| compiled.source)
        .map_err(|e| JsValue::from_str(&e.to_string()))
}
