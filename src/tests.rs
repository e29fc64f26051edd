use crate::extensions::imports::{TypeTag, TypedValue};
use crate::ir::{
    CompatNode, Expr, ExtensionNode, ListRef, ProcedureCall, ProcedureInfo, Script, Stmt,
    VariableRef, VariableScope,
};
use crate::jsgen::CompileContext;
use crate::{Compiler, CompiledScript, Environment};
use serde_json::json;
use std::collections::BTreeMap;

fn constant(value: serde_json::Value) -> Expr {
    Expr::Constant { value }
}

fn num(n: f64) -> Expr {
    constant(json!(n))
}

fn text(s: &str) -> Expr {
    constant(json!(s))
}

fn variable(id: &str) -> VariableRef {
    VariableRef {
        id: id.to_string(),
        name: id.to_string(),
        scope: VariableScope::Target,
    }
}

fn list(id: &str) -> ListRef {
    ListRef {
        id: id.to_string(),
        name: id.to_string(),
        scope: VariableScope::Target,
    }
}

fn report(expr: Expr) -> Stmt {
    Stmt::VisualReport {
        input: Box::new(expr),
    }
}

fn yielding(stack: Vec<Stmt>) -> Script {
    let mut script = Script::new(stack);
    script.yields = true;
    script
}

fn compile(script: &Script) -> CompiledScript {
    Compiler::new()
        .compile(script, &CompileContext::default())
        .expect("script should compile")
}

fn compile_err(script: &Script) -> String {
    Compiler::new()
        .compile(script, &CompileContext::default())
        .unwrap_err()
        .to_string()
}

#[test]
fn equals_of_numeric_looking_strings_uses_runtime_compare() {
    let script = Script::new(vec![report(Expr::Equals {
        left: Box::new(text("10")),
        right: Box::new(text("010")),
    })]);
    let compiled = compile(&script);
    assert!(compiled.source.contains("compareEqual("), "{}", compiled.source);
    assert!(!compiled.source.contains("==="), "{}", compiled.source);
}

#[test]
fn equals_safe_constant_against_arithmetic_is_strict() {
    let script = Script::new(vec![report(Expr::Equals {
        left: Box::new(num(5.0)),
        right: Box::new(Expr::Add {
            left: Box::new(num(2.0)),
            right: Box::new(num(3.0)),
        }),
    })]);
    let compiled = compile(&script);
    assert!(compiled.source.contains("(5 === (2 + 3))"), "{}", compiled.source);
}

#[test]
fn equals_on_tracked_string_variable_compares_lowercased() {
    let script = Script::new(vec![
        Stmt::VarSet {
            variable: variable("v"),
            value: Box::new(text("hello")),
        },
        report(Expr::Equals {
            left: Box::new(Expr::VarGet {
                variable: variable("v"),
            }),
            right: Box::new(text("world")),
        }),
    ]);
    let compiled = compile(&script);
    assert!(compiled.source.contains(".toLowerCase() ==="), "{}", compiled.source);
}

#[test]
fn variable_tracking_resets_at_stack_boundary() {
    let script = Script::new(vec![
        Stmt::VarSet {
            variable: variable("v"),
            value: Box::new(text("hello")),
        },
        Stmt::If {
            condition: Box::new(constant(json!(true))),
            when_true: vec![Stmt::LooksNextCostume],
            when_false: vec![],
        },
        report(Expr::Equals {
            left: Box::new(Expr::VarGet {
                variable: variable("v"),
            }),
            right: Box::new(num(3.0)),
        }),
    ]);
    let compiled = compile(&script);
    // With the tracker cleared the variable is unknown again, so the safe
    // constant drives a numeric comparison instead of a string one.
    assert!(compiled.source.contains("=== 3)"), "{}", compiled.source);
    assert!(!compiled.source.contains("toLowerCase() === \"3\""), "{}", compiled.source);
}

#[test]
fn repeat_counts_down_to_half() {
    let script = yielding(vec![Stmt::Repeat {
        times: Box::new(num(3.0)),
        stack: vec![Stmt::LooksChangeSize {
            size: Box::new(num(1.0)),
        }],
    }]);
    let compiled = compile(&script);
    assert!(compiled.source.contains("var a0 = 3;"), "{}", compiled.source);
    assert!(
        compiled.source.contains("for (; a0 >= 0.5; a0--) {"),
        "{}",
        compiled.source
    );
    assert!(
        compiled.source.contains("target.setSize(target.size + 1);"),
        "{}",
        compiled.source
    );
}

#[test]
fn zero_second_wait_still_yields_once() {
    let script = yielding(vec![Stmt::Wait {
        seconds: Box::new(num(0.0)),
    }]);
    let compiled = compile(&script);
    assert!(
        compiled.source.contains("runtime.requestRedraw();\nyield;\n"),
        "{}",
        compiled.source
    );
    assert!(
        compiled
            .source
            .contains("while (thread.timer.timeElapsed() < a0) {"),
        "{}",
        compiled.source
    );
    assert!(compiled.source.contains("thread.timer = null;"), "{}", compiled.source);
    assert!(compiled.source.contains("function* gen0("), "{}", compiled.source);
}

#[test]
fn list_get_last_uses_direct_indexing_under_nullish() {
    let script = Script::new(vec![report(Expr::ListGet {
        list: list("L"),
        index: Box::new(text("last")),
    })]);
    let compiled = compile(&script);
    assert!(
        compiled
            .source
            .contains("(b0.value[b0.value.length - 1] ?? \"\")"),
        "{}",
        compiled.source
    );
    assert!(
        compiled
            .source
            .contains("const b0 = target.variables[\"L\"];"),
        "{}",
        compiled.source
    );
}

#[test]
fn list_get_falls_back_without_nullish() {
    let script = Script::new(vec![report(Expr::ListGet {
        list: list("L"),
        index: Box::new(text("last")),
    })]);
    let mut compiler = Compiler::with_environment(Environment {
        supports_nullish_coalescing: false,
        debug: false,
    });
    let compiled = compiler
        .compile(&script, &CompileContext::default())
        .expect("script should compile");
    assert!(
        compiled.source.contains("listGet(b0.value, \"last\")"),
        "{}",
        compiled.source
    );
}

#[test]
fn list_get_numeric_index_is_direct() {
    let script = Script::new(vec![report(Expr::ListGet {
        list: list("L"),
        index: Box::new(num(2.0)),
    })]);
    let compiled = compile(&script);
    assert!(
        compiled.source.contains("(b0.value[(2 | 0) - 1] ?? \"\")"),
        "{}",
        compiled.source
    );
}

#[test]
fn cosine_rounds_near_zero_artifacts() {
    let script = Script::new(vec![report(Expr::Cos {
        value: Box::new(num(90.0)),
    })]);
    let compiled = compile(&script);
    assert!(
        compiled
            .source
            .contains("(Math.round(Math.cos((Math.PI * 90) / 180) * 1e10) / 1e10)"),
        "{}",
        compiled.source
    );
}

#[test]
fn modulo_in_position_input_resets_interpolation() {
    let script = Script::new(vec![Stmt::MotionSetXY {
        x: Box::new(Expr::Mod {
            left: Box::new(num(5.0)),
            right: Box::new(num(3.0)),
        }),
        y: Box::new(num(0.0)),
    }]);
    let compiled = compile(&script);
    assert!(
        compiled
            .source
            .contains("if (target.interpolationData) target.interpolationData = null;"),
        "{}",
        compiled.source
    );

    let plain = Script::new(vec![Stmt::MotionSetXY {
        x: Box::new(num(5.0)),
        y: Box::new(num(0.0)),
    }]);
    let compiled = compile(&plain);
    assert!(!compiled.source.contains("interpolationData"), "{}", compiled.source);
}

#[test]
fn yield_without_declaration_is_fatal() {
    let script = Script::new(vec![Stmt::Wait {
        seconds: Box::new(num(0.0)),
    }]);
    let error = compile_err(&script);
    assert!(error.contains("does not declare yields"), "{}", error);
}

#[test]
fn unknown_kinds_are_fatal() {
    let node = ExtensionNode {
        kind: "foo.bar".to_string(),
        inputs: BTreeMap::new(),
        fields: BTreeMap::new(),
    };
    let error = compile_err(&Script::new(vec![Stmt::Extension(node.clone())]));
    assert!(
        error.contains("Unknown statement kind 'foo.bar'"),
        "{}",
        error
    );
    let error = compile_err(&Script::new(vec![report(Expr::Extension(node))]));
    assert!(
        error.contains("Unknown expression kind 'foo.bar'"),
        "{}",
        error
    );
}

#[test]
fn extension_transformers_run_before_builtin_dispatch() {
    let mut compiler = Compiler::new();
    compiler.extensions_mut().register_expression(
        "fx",
        "sparkle",
        |_node: &ExtensionNode,
         _compiler: &mut crate::jsgen::ScriptCompiler<'_>|
         -> anyhow::Result<TypedValue> {
            Ok(TypedValue::typed("runtime.ext_fx.sparkle()", TypeTag::Number))
        },
    );
    assert!(compiler.extensions_mut().has_extension("fx"));
    let node = ExtensionNode {
        kind: "fx.sparkle".to_string(),
        inputs: BTreeMap::new(),
        fields: BTreeMap::new(),
    };
    let script = Script::new(vec![report(Expr::Extension(node))]);
    let compiled = compiler
        .compile(&script, &CompileContext::default())
        .expect("script should compile");
    assert!(
        compiled.source.contains("runtime.ext_fx.sparkle()"),
        "{}",
        compiled.source
    );
}

#[test]
fn failing_expression_transformer_becomes_empty_string() {
    let mut compiler = Compiler::new();
    compiler.extensions_mut().register_expression(
        "fx",
        "sparkle",
        |_node: &ExtensionNode,
         _compiler: &mut crate::jsgen::ScriptCompiler<'_>|
         -> anyhow::Result<TypedValue> { Err(anyhow::anyhow!("boom")) },
    );
    let node = ExtensionNode {
        kind: "fx.sparkle".to_string(),
        inputs: BTreeMap::new(),
        fields: BTreeMap::new(),
    };
    let script = Script::new(vec![report(Expr::Extension(node))]);
    let compiled = compiler
        .compile(&script, &CompileContext::default())
        .expect("failure is non-fatal");
    assert!(
        compiled.source.contains("runtime.visualReport(\"\", \"\");"),
        "{}",
        compiled.source
    );
}

#[test]
fn factory_shape_for_plain_scripts() {
    let script = Script::new(vec![report(num(1.0))]);
    let compiled = compile(&script);
    assert!(
        compiled.source.starts_with("(function factory0(thread) {"),
        "{}",
        compiled.source
    );
    assert!(compiled.source.contains("return function fun0() {"), "{}", compiled.source);
    assert!(
        compiled
            .source
            .contains("if (thread.spoofing) {\ntarget = thread.spoofTarget;\n}"),
        "{}",
        compiled.source
    );
    assert!(compiled.source.ends_with("retire();\n}; })"), "{}", compiled.source);
    assert_eq!(compiled.factory_name, "factory0");
    assert_eq!(compiled.script_name, "fun0");
}

#[test]
fn procedures_take_parameters_and_skip_the_terminal_retire() {
    let mut script = Script::new(vec![Stmt::StopScript]);
    script.is_procedure = true;
    script.arguments = vec!["a".to_string(), "b".to_string()];
    let compiled = compile(&script);
    assert!(compiled.source.contains("function fun0(p0,p1) {"), "{}", compiled.source);
    assert!(compiled.source.contains("return;"), "{}", compiled.source);
    assert!(!compiled.source.contains("retire()"), "{}", compiled.source);
}

#[test]
fn setup_bindings_are_emitted_once_per_expression() {
    let script = Script::new(vec![report(Expr::Add {
        left: Box::new(Expr::VarGet {
            variable: variable("v"),
        }),
        right: Box::new(Expr::VarGet {
            variable: variable("v"),
        }),
    })]);
    let compiled = compile(&script);
    let occurrences = compiled
        .source
        .matches("const b0 = target.variables[\"v\"];")
        .count();
    assert_eq!(occurrences, 1, "{}", compiled.source);
    assert!(!compiled.source.contains("const b1"), "{}", compiled.source);
}

#[test]
fn compat_blocks_reenter_only_as_the_last_block_of_a_loop() {
    let compat = || {
        Stmt::Compat(CompatNode {
            opcode: "motion_glideto".to_string(),
            inputs: BTreeMap::new(),
            fields: BTreeMap::new(),
            block_id: "blk".to_string(),
        })
    };
    let tail = yielding(vec![Stmt::Repeat {
        times: Box::new(num(2.0)),
        stack: vec![compat()],
    }]);
    let compiled = compile(&tail);
    assert!(
        compiled
            .source
            .contains("if (hasResumedFromPromise) {\nhasResumedFromPromise = false;\ncontinue;\n}"),
        "{}",
        compiled.source
    );
    assert!(compiled.source.contains(", true, \"blk\")"), "{}", compiled.source);

    let middle = yielding(vec![Stmt::Repeat {
        times: Box::new(num(2.0)),
        stack: vec![compat(), Stmt::LooksNextCostume],
    }]);
    let compiled = compile(&middle);
    assert!(!compiled.source.contains("hasResumedFromPromise"), "{}", compiled.source);
    assert!(compiled.source.contains(", false, \"blk\")"), "{}", compiled.source);
}

#[test]
fn inlined_list_mutations_invalidate_the_monitor() {
    let script = Script::new(vec![
        Stmt::ListAdd {
            list: list("L"),
            item: Box::new(num(1.0)),
        },
        Stmt::ListDelete {
            list: list("L"),
            index: Box::new(text("last")),
        },
        Stmt::ListDeleteAll { list: list("L") },
    ]);
    let compiled = compile(&script);
    assert!(
        compiled.source.contains("b0.value.push(1);\nb0._monitorUpToDate = false;"),
        "{}",
        compiled.source
    );
    assert!(
        compiled.source.contains("b0.value.pop();\nb0._monitorUpToDate = false;"),
        "{}",
        compiled.source
    );
    assert!(
        compiled.source.contains("b0.value = [];\nb0._monitorUpToDate = false;"),
        "{}",
        compiled.source
    );
}

#[test]
fn broadcast_and_wait_delegates_to_wait_threads() {
    let script = yielding(vec![Stmt::BroadcastAndWait {
        broadcast: Box::new(text("go")),
    }]);
    let compiled = compile(&script);
    assert!(
        compiled.source.contains(
            "yield* waitThreads(startHats(\"event_whenbroadcastreceived\", { BROADCAST_OPTION: \"go\" }));"
        ),
        "{}",
        compiled.source
    );
}

#[test]
fn stop_all_stops_the_runtime_then_retires() {
    let script = Script::new(vec![Stmt::StopAll]);
    let compiled = compile(&script);
    assert!(
        compiled.source.contains("runtime.stopAll();\nretire(); return;"),
        "{}",
        compiled.source
    );
}

fn recursive_script(is_warp: bool) -> Script {
    let mut script = yielding(vec![Stmt::ProcedureCall(ProcedureCall {
        code: "proc".to_string(),
        variant: "proc v".to_string(),
        arguments: vec![],
    })]);
    script.is_procedure = true;
    script.is_warp = is_warp;
    script.procedure_code = Some("proc".to_string());
    script.procedures.insert(
        "proc v".to_string(),
        ProcedureInfo {
            code: "proc".to_string(),
            yields: false,
            arguments: vec![],
            has_stack: true,
        },
    );
    script
}

#[test]
fn direct_recursion_yields_outside_warp() {
    let compiled = compile(&recursive_script(false));
    assert!(
        compiled
            .source
            .contains("yield;\nthread.procedures[\"proc v\"]();"),
        "{}",
        compiled.source
    );

    let compiled = compile(&recursive_script(true));
    assert!(!compiled.source.contains("yield;"), "{}", compiled.source);
}

#[test]
fn warp_loops_yield_only_when_stuck() {
    let mut script = yielding(vec![Stmt::Repeat {
        times: Box::new(num(2.0)),
        stack: vec![Stmt::LooksNextCostume],
    }]);
    script.is_warp = true;
    script.warp_timer = true;
    let compiled = compile(&script);
    assert!(compiled.source.contains("if (isStuck()) yield;"), "{}", compiled.source);

    let mut script = Script::new(vec![Stmt::Repeat {
        times: Box::new(num(2.0)),
        stack: vec![Stmt::LooksNextCostume],
    }]);
    script.is_warp = true;
    let compiled = compile(&script);
    assert!(!compiled.source.contains("yield"), "{}", compiled.source);
}

#[test]
fn all_at_once_compiles_the_branch_in_warp_mode() {
    let script = Script::new(vec![Stmt::AllAtOnce {
        stack: vec![Stmt::Repeat {
            times: Box::new(num(2.0)),
            stack: vec![Stmt::LooksNextCostume],
        }],
    }]);
    let compiled = compile(&script);
    assert!(!compiled.source.contains("yield"), "{}", compiled.source);
}

#[test]
fn inline_stacks_become_self_invoked_generators() {
    let script = yielding(vec![report(Expr::InlineStackOutput {
        stack: vec![Stmt::LooksNextCostume],
    })]);
    let compiled = compile(&script);
    assert!(
        compiled.source.contains("(yield* (function*() {"),
        "{}",
        compiled.source
    );
    assert!(
        compiled
            .source
            .contains("target.setCostume(target.currentCostume + 1);"),
        "{}",
        compiled.source
    );
}

#[test]
fn recompiling_the_same_ir_is_deterministic() {
    let script = yielding(vec![Stmt::Repeat {
        times: Box::new(num(3.0)),
        stack: vec![Stmt::LooksChangeSize {
            size: Box::new(num(1.0)),
        }],
    }]);
    let first = compile(&script);
    let second = compile(&script);
    assert_eq!(first.source, second.source);
}

#[test]
fn run_as_sprite_is_exception_safe() {
    let script = Script::new(vec![Stmt::RunAsSprite {
        sprite: Box::new(text("Sprite2")),
        stack: vec![Stmt::LooksNextCostume],
    }]);
    let compiled = compile(&script);
    assert!(compiled.source.contains("thread.spoofing = true;"), "{}", compiled.source);
    assert!(compiled.source.contains("try {"), "{}", compiled.source);
    assert!(
        compiled
            .source
            .contains("} finally {\nthread.target = a0;\nthread.spoofing = false;\nthread.spoofTarget = null;"),
        "{}",
        compiled.source
    );
}

#[test]
fn advanced_log_divides_right_by_left() {
    let script = Script::new(vec![report(Expr::AdvLog {
        left: Box::new(num(2.0)),
        right: Box::new(num(8.0)),
    })]);
    let compiled = compile(&script);
    assert!(
        compiled.source.contains("(Math.log(8) / Math.log(2))"),
        "{}",
        compiled.source
    );
}

#[test]
fn case_with_runs_next_falls_through() {
    let script = Script::new(vec![Stmt::Switch {
        test: Box::new(text("x")),
        cases: vec![
            Stmt::Case {
                condition: Box::new(text("a")),
                stack: vec![Stmt::LooksNextCostume],
                runs_next: true,
            },
            Stmt::Case {
                condition: Box::new(text("b")),
                stack: vec![Stmt::LooksGoToFront],
                runs_next: false,
            },
        ],
    }]);
    let compiled = compile(&script);
    assert!(
        compiled.source.contains("case \"a\":\ncase \"b\":"),
        "{}",
        compiled.source
    );
    assert!(compiled.source.contains("break;"), "{}", compiled.source);
}

#[test]
fn costume_name_collisions_stay_strings_at_safe_boundaries() {
    let script = Script::new(vec![Stmt::VarSet {
        variable: variable("v"),
        value: Box::new(text("2")),
    }]);
    let mut context = CompileContext::default();
    context.costume_and_sound_names.insert("2".to_string());
    let compiled = Compiler::new()
        .compile(&script, &context)
        .expect("script should compile");
    assert!(compiled.source.contains("b0.value = \"2\";"), "{}", compiled.source);

    let compiled = compile(&script);
    assert!(compiled.source.contains("b0.value = 2;"), "{}", compiled.source);
}

#[test]
fn ordering_comparisons_pick_nan_correct_forms() {
    let add = || Expr::Add {
        left: Box::new(num(1.0)),
        right: Box::new(num(2.0)),
    };
    let compiled = compile(&Script::new(vec![report(Expr::Greater {
        left: Box::new(num(5.0)),
        right: Box::new(add()),
    })]));
    assert!(compiled.source.contains("(5 > (1 + 2))"), "{}", compiled.source);

    let compiled = compile(&Script::new(vec![report(Expr::Less {
        left: Box::new(add()),
        right: Box::new(num(5.0)),
    })]));
    assert!(compiled.source.contains("((1 + 2) < 5)"), "{}", compiled.source);

    let compiled = compile(&Script::new(vec![report(Expr::Less {
        left: Box::new(num(5.0)),
        right: Box::new(add()),
    })]));
    assert!(compiled.source.contains("!(5 >= (1 + 2))"), "{}", compiled.source);
}

#[test]
fn wait_or_until_exits_on_either_signal() {
    let script = yielding(vec![Stmt::WaitOrUntil {
        seconds: Box::new(num(1.0)),
        condition: Box::new(Expr::MouseDown),
    }]);
    let compiled = compile(&script);
    assert!(
        compiled.source.contains(
            "while (!runtime.ioDevices.mouse.getIsDown() && thread.timer.timeElapsed() < a0) {"
        ),
        "{}",
        compiled.source
    );
}

#[test]
fn sensing_of_hoists_constant_sprite_lookups() {
    let script = Script::new(vec![report(Expr::SensingOf {
        object: Box::new(text("Sprite2")),
        property: "x position".to_string(),
    })]);
    let compiled = compile(&script);
    assert!(
        compiled
            .source
            .contains("const b0 = runtime.getSpriteTargetByName(\"Sprite2\");"),
        "{}",
        compiled.source
    );
    assert!(compiled.source.contains("(b0 ? b0.x : 0)"), "{}", compiled.source);

    let script = Script::new(vec![report(Expr::SensingOf {
        object: Box::new(text("Sprite2")),
        property: "score".to_string(),
    })]);
    let compiled = compile(&script);
    assert!(
        compiled
            .source
            .contains("lookupVariableByNameAndType(\"score\", \"\", true)"),
        "{}",
        compiled.source
    );
}

#[test]
fn loader_round_trips_a_compile_request() {
    let request = json!({
        "stack": [
            {
                "kind": "control.repeat",
                "times": 3,
                "do": [
                    { "kind": "looks.changeSize", "size": 10 }
                ]
            }
        ],
        "yields": true,
        "topBlockId": "top",
        "costumeAndSoundNames": ["pop"]
    })
    .to_string();
    let mut compiler = Compiler::new();
    let compiled = compiler
        .compile_request_str(&request)
        .expect("request should compile");
    assert!(
        compiled.source.contains("for (; a0 >= 0.5; a0--) {"),
        "{}",
        compiled.source
    );
    assert!(
        compiled.source.contains("target.setSize(target.size + 10);"),
        "{}",
        compiled.source
    );
}

#[test]
fn loader_rejects_unknown_plain_kinds_but_defers_dotted_ones() {
    let plain = json!({ "stack": [ { "kind": "frobnicate" } ] }).to_string();
    let error = Compiler::new().compile_request_str(&plain).unwrap_err();
    assert!(
        error.to_string().contains("Unknown statement kind 'frobnicate'"),
        "{}",
        error
    );

    let dotted = json!({ "stack": [ { "kind": "fx.sparkle" } ] }).to_string();
    let error = Compiler::new().compile_request_str(&dotted).unwrap_err();
    assert!(
        error.to_string().contains("Unknown statement kind 'fx.sparkle'"),
        "{}",
        error
    );
}
