use crate::extensions::ExtensionRegistry;
use crate::ir::{
    CompatNode, Expr, ExtensionNode, ListRef, ProcedureCall, RandomMode, Script, Stmt,
    VariableRef, VariableScope,
};
use crate::names::{NamePool, NamePools};
use crate::value::{
    js_number_to_string, js_to_number, js_value_to_string, sanitize, TrackedVariable, TypeTag,
    TypedValue,
};
use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

const PEN_EXT: &str = "runtime.ext_pen";
const PEN_STATE: &str = "runtime.ext_pen._getPenState(target)";

/// Capabilities of the evaluator that will run the emitted source.
#[derive(Debug, Clone, Copy)]
pub struct Environment {
    pub supports_nullish_coalescing: bool,
    pub debug: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            supports_nullish_coalescing: true,
            debug: false,
        }
    }
}

/// Per-target facts the lowerers need beyond the IR itself.
#[derive(Debug, Clone, Default)]
pub struct CompileContext {
    pub costume_and_sound_names: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct CompiledScript {
    pub factory_name: String,
    pub script_name: String,
    pub source: String,
}

#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub is_loop: bool,
    pub is_last_block: bool,
}

impl Frame {
    pub fn new(is_loop: bool) -> Self {
        Self {
            is_loop,
            is_last_block: false,
        }
    }
}

pub fn compile_script(
    script: &Script,
    context: &CompileContext,
    environment: Environment,
    pools: &mut NamePools,
    extensions: &ExtensionRegistry,
) -> Result<CompiledScript> {
    let mut compiler = ScriptCompiler::new(script, context, environment, extensions);
    let stack = &script.stack;
    compiler.descend_stack(stack, Frame::new(false))?;
    let compiled = compiler.assemble_factory(pools);
    if environment.debug {
        tracing::debug!(
            "compiled factory '{}':\n{}",
            compiled.factory_name,
            compiled.source
        );
    }
    Ok(compiled)
}

pub struct ScriptCompiler<'a> {
    script: &'a Script,
    context: &'a CompileContext,
    environment: Environment,
    extensions: &'a ExtensionRegistry,
    source: String,
    frames: Vec<Frame>,
    variable_inputs: HashMap<String, TrackedVariable>,
    setup_bindings: Vec<(String, String)>,
    local_names: NamePool,
    setup_names: NamePool,
    is_warp: bool,
    saw_modulo: bool,
}

impl<'a> ScriptCompiler<'a> {
    fn new(
        script: &'a Script,
        context: &'a CompileContext,
        environment: Environment,
        extensions: &'a ExtensionRegistry,
    ) -> Self {
        Self {
            script,
            context,
            environment,
            extensions,
            source: String::new(),
            frames: Vec::new(),
            variable_inputs: HashMap::new(),
            setup_bindings: Vec::new(),
            local_names: NamePool::new("a"),
            setup_names: NamePool::new("b"),
            is_warp: script.is_warp,
            saw_modulo: false,
        }
    }

    pub fn is_warp(&self) -> bool {
        self.is_warp
    }

    pub fn emit(&mut self, code: &str) {
        self.source.push_str(code);
        self.source.push('\n');
    }

    pub fn next_local(&mut self) -> String {
        self.local_names.next()
    }

    /// Hoists `expression` into the factory preamble so it evaluates once
    /// per script invocation; repeated requests share a binding.
    pub fn evaluate_once(&mut self, expression: &str) -> String {
        if let Some((_, name)) = self
            .setup_bindings
            .iter()
            .find(|(existing, _)| existing == expression)
        {
            return name.clone();
        }
        let name = self.setup_names.next();
        self.setup_bindings
            .push((expression.to_string(), name.clone()));
        name
    }

    fn reset_variable_inputs(&mut self) {
        self.variable_inputs.clear();
    }

    fn yielded(&mut self) -> Result<()> {
        if !self.script.yields {
            bail!("Script emitted a yield but its header does not declare yields.");
        }
        // Another thread may run while suspended, so tracked assignments
        // are no longer trustworthy.
        self.reset_variable_inputs();
        Ok(())
    }

    pub fn yield_not_warp(&mut self) -> Result<()> {
        if !self.is_warp {
            self.source.push_str("yield;\n");
            self.yielded()?;
        }
        Ok(())
    }

    pub fn yield_stuck_or_not_warp(&mut self) -> Result<()> {
        if self.is_warp {
            self.source.push_str("if (isStuck()) yield;\n");
        } else {
            self.source.push_str("yield;\n");
        }
        self.yielded()
    }

    pub fn yield_loop(&mut self) -> Result<()> {
        if self.script.warp_timer {
            self.yield_stuck_or_not_warp()
        } else {
            self.yield_not_warp()
        }
    }

    pub fn request_redraw(&mut self) {
        self.source.push_str("runtime.requestRedraw();\n");
    }

    fn retire(&mut self) {
        self.source.push_str("retire(); return;\n");
    }

    fn is_last_block_in_loop(&self) -> bool {
        for frame in self.frames.iter().rev() {
            if !frame.is_last_block {
                return false;
            }
            if frame.is_loop {
                return true;
            }
        }
        false
    }

    fn reference_variable(&mut self, variable: &VariableRef) -> String {
        let expression = match variable.scope {
            VariableScope::Target => {
                format!("target.variables[\"{}\"]", sanitize(&variable.id))
            }
            VariableScope::Stage => format!("stage.variables[\"{}\"]", sanitize(&variable.id)),
        };
        self.evaluate_once(&expression)
    }

    fn reference_list(&mut self, list: &ListRef) -> String {
        let expression = match list.scope {
            VariableScope::Target => format!("target.variables[\"{}\"]", sanitize(&list.id)),
            VariableScope::Stage => format!("stage.variables[\"{}\"]", sanitize(&list.id)),
        };
        self.evaluate_once(&expression)
    }

    fn descend_variable(&mut self, variable: &VariableRef) -> TypedValue {
        if let Some(slot) = self.variable_inputs.get(&variable.id) {
            return slot.as_value();
        }
        let reference = self.reference_variable(variable);
        let slot = TrackedVariable::new(format!("{}.value", reference));
        let value = slot.as_value();
        self.variable_inputs.insert(variable.id.clone(), slot);
        value
    }

    fn safe_constant_input(&self, value: &Value) -> TypedValue {
        let ambiguous = matches!(
            value,
            Value::String(text) if self.context.costume_and_sound_names.contains(text)
        );
        TypedValue::constant_with_safety(value.clone(), !ambiguous)
    }

    /// Walks one statement list: frame push, tracker clears at both
    /// boundaries, `is_last_block` maintained on the innermost frame.
    pub fn descend_stack(&mut self, nodes: &[Stmt], frame: Frame) -> Result<()> {
        self.reset_variable_inputs();
        self.frames.push(frame);
        let last = nodes.len().saturating_sub(1);
        for (index, node) in nodes.iter().enumerate() {
            if let Some(top) = self.frames.last_mut() {
                top.is_last_block = index == last;
            }
            self.descend_stacked_block(node)?;
        }
        self.reset_variable_inputs();
        self.frames.pop();
        Ok(())
    }

    pub fn descend_input(&mut self, node: &Expr) -> Result<TypedValue> {
        if self.environment.debug {
            tracing::debug!("lowering expression '{}'", node.kind());
        }
        match node {
            Expr::Extension(extension) => self.descend_extension_input(extension),

            Expr::ArgBoolean { index } => Ok(TypedValue::typed(
                format!("toBoolean(p{})", index),
                TypeTag::Boolean,
            )),
            Expr::ArgStringNumber { index } => {
                Ok(TypedValue::typed(format!("p{}", index), TypeTag::Unknown))
            }

            Expr::Compat(compat) => {
                let call = self.compatibility_layer_call(compat, false)?;
                Ok(TypedValue::typed(format!("({})", call), TypeTag::Unknown))
            }

            Expr::Constant { value } => Ok(self.safe_constant_input(value)),

            Expr::Polygon { points } => {
                let mut parts = Vec::with_capacity(points.len());
                for (x, y) in points {
                    let x = self.descend_input(x)?;
                    let y = self.descend_input(y)?;
                    parts.push(format!("{{x:{},y:{}}}", x.as_number(), y.as_number()));
                }
                Ok(TypedValue::typed(
                    format!("[{}]", parts.join(",")),
                    TypeTag::Unknown,
                ))
            }

            Expr::InlineStackOutput { stack } => {
                let outer = std::mem::take(&mut self.source);
                self.descend_stack(stack, Frame::new(false))?;
                let inner = std::mem::replace(&mut self.source, outer);
                self.yielded()?;
                Ok(TypedValue::typed(
                    format!("(yield* (function*() {{\n{}}})())", inner),
                    TypeTag::Unknown,
                ))
            }

            Expr::KeyPressed { key } => {
                let key = self.descend_input(key)?;
                Ok(TypedValue::typed(
                    format!(
                        "runtime.ioDevices.keyboard.getKeyIsDown({})",
                        key.as_safe()
                    ),
                    TypeTag::Boolean,
                ))
            }

            Expr::ListContains { list, item } => {
                let reference = self.reference_list(list);
                let item = self.descend_input(item)?;
                Ok(TypedValue::typed(
                    format!("listContains({}, {})", reference, item.as_unknown()),
                    TypeTag::Boolean,
                ))
            }
            Expr::ListContents { list } => {
                let reference = self.reference_list(list);
                Ok(TypedValue::typed(
                    format!("listContents({})", reference),
                    TypeTag::String,
                ))
            }
            Expr::ListGet { list, index } => {
                let reference = self.reference_list(list);
                let index = self.descend_input(index)?;
                if self.environment.supports_nullish_coalescing {
                    if index.is_always_number_or_nan() {
                        return Ok(TypedValue::typed(
                            format!(
                                "({}.value[({} | 0) - 1] ?? \"\")",
                                reference,
                                index.as_number()
                            ),
                            TypeTag::Unknown,
                        ));
                    }
                    if matches!(index.constant_literal(), Some(Value::String(text)) if text == "last")
                    {
                        return Ok(TypedValue::typed(
                            format!(
                                "({}.value[{}.value.length - 1] ?? \"\")",
                                reference, reference
                            ),
                            TypeTag::Unknown,
                        ));
                    }
                }
                Ok(TypedValue::typed(
                    format!("listGet({}.value, {})", reference, index.as_unknown()),
                    TypeTag::Unknown,
                ))
            }
            Expr::ListIndexOf { list, item } => {
                let reference = self.reference_list(list);
                let item = self.descend_input(item)?;
                Ok(TypedValue::typed(
                    format!("listIndexOf({}.value, {})", reference, item.as_unknown()),
                    TypeTag::Number,
                ))
            }
            Expr::ListLength { list } => {
                let reference = self.reference_list(list);
                Ok(TypedValue::typed(
                    format!("{}.value.length", reference),
                    TypeTag::Number,
                ))
            }

            Expr::LooksSize => Ok(TypedValue::typed(
                "Math.round(target.size)",
                TypeTag::Number,
            )),
            Expr::BackdropName => Ok(TypedValue::typed(
                "stage.getCostumes()[stage.currentCostume].name",
                TypeTag::String,
            )),
            Expr::BackdropNumber => Ok(TypedValue::typed(
                "(stage.currentCostume + 1)",
                TypeTag::Number,
            )),
            Expr::CostumeName => Ok(TypedValue::typed(
                "target.getCostumes()[target.currentCostume].name",
                TypeTag::String,
            )),
            Expr::CostumeNumber => Ok(TypedValue::typed(
                "(target.currentCostume + 1)",
                TypeTag::Number,
            )),

            Expr::MotionDirection => Ok(TypedValue::typed("target.direction", TypeTag::Number)),
            Expr::MotionX => Ok(TypedValue::typed(
                "limitPrecision(target.x)",
                TypeTag::Number,
            )),
            Expr::MotionY => Ok(TypedValue::typed(
                "limitPrecision(target.y)",
                TypeTag::Number,
            )),

            Expr::MouseDown => Ok(TypedValue::typed(
                "runtime.ioDevices.mouse.getIsDown()",
                TypeTag::Boolean,
            )),
            Expr::MouseX => Ok(TypedValue::typed(
                "runtime.ioDevices.mouse.getScratchX()",
                TypeTag::Number,
            )),
            Expr::MouseY => Ok(TypedValue::typed(
                "runtime.ioDevices.mouse.getScratchY()",
                TypeTag::Number,
            )),

            Expr::Abs { value } => {
                let value = self.descend_input(value)?;
                Ok(TypedValue::typed(
                    format!("Math.abs({})", value.as_number()),
                    TypeTag::Number,
                ))
            }
            Expr::Acos { value } => {
                let value = self.descend_input(value)?;
                Ok(TypedValue::typed(
                    format!("((Math.acos({}) * 180) / Math.PI)", value.as_number()),
                    TypeTag::NumberOrNaN,
                ))
            }
            Expr::Add { left, right } => {
                let left = self.descend_input(left)?;
                let right = self.descend_input(right)?;
                Ok(TypedValue::typed(
                    format!("({} + {})", left.as_number(), right.as_number()),
                    TypeTag::NumberOrNaN,
                ))
            }
            Expr::And { left, right } => {
                let left = self.descend_input(left)?;
                let right = self.descend_input(right)?;
                Ok(TypedValue::typed(
                    format!("({} && {})", left.as_boolean(), right.as_boolean()),
                    TypeTag::Boolean,
                ))
            }
            Expr::Asin { value } => {
                let value = self.descend_input(value)?;
                Ok(TypedValue::typed(
                    format!("((Math.asin({}) * 180) / Math.PI)", value.as_number()),
                    TypeTag::NumberOrNaN,
                ))
            }
            Expr::Atan { value } => {
                let value = self.descend_input(value)?;
                Ok(TypedValue::typed(
                    format!("((Math.atan({}) * 180) / Math.PI)", value.as_number()),
                    TypeTag::Number,
                ))
            }
            Expr::Ceiling { value } => {
                let value = self.descend_input(value)?;
                Ok(TypedValue::typed(
                    format!("Math.ceil({})", value.as_number()),
                    TypeTag::Number,
                ))
            }
            Expr::StringContains { string, contains } => {
                let string = self.descend_input(string)?;
                let contains = self.descend_input(contains)?;
                Ok(TypedValue::typed(
                    format!(
                        "({}.toLowerCase().indexOf({}.toLowerCase()) !== -1)",
                        string.as_string(),
                        contains.as_string()
                    ),
                    TypeTag::Boolean,
                ))
            }
            Expr::Cos { value } => {
                let value = self.descend_input(value)?;
                Ok(TypedValue::typed(
                    format!(
                        "(Math.round(Math.cos((Math.PI * {}) / 180) * 1e10) / 1e10)",
                        value.as_number()
                    ),
                    TypeTag::NumberOrNaN,
                ))
            }
            Expr::Divide { left, right } => {
                let left = self.descend_input(left)?;
                let right = self.descend_input(right)?;
                Ok(TypedValue::typed(
                    format!("({} / {})", left.as_number(), right.as_number()),
                    TypeTag::NumberOrNaN,
                ))
            }
            Expr::Equals { left, right } => self.descend_equals(left, right),
            Expr::Exp { value } => {
                let value = self.descend_input(value)?;
                Ok(TypedValue::typed(
                    format!("Math.exp({})", value.as_number()),
                    TypeTag::Number,
                ))
            }
            Expr::Floor { value } => {
                let value = self.descend_input(value)?;
                Ok(TypedValue::typed(
                    format!("Math.floor({})", value.as_number()),
                    TypeTag::Number,
                ))
            }
            Expr::Greater { left, right } => {
                let left = self.descend_input(left)?;
                let right = self.descend_input(right)?;
                if left.is_always_number() && right.is_always_number_or_nan() {
                    return Ok(TypedValue::typed(
                        format!("({} > {})", left.as_number(), right.as_number_or_nan()),
                        TypeTag::Boolean,
                    ));
                }
                if left.is_always_number_or_nan() && right.is_always_number() {
                    return Ok(TypedValue::typed(
                        format!("!({} <= {})", left.as_number_or_nan(), right.as_number()),
                        TypeTag::Boolean,
                    ));
                }
                if left.is_never_number() || right.is_never_number() {
                    return Ok(TypedValue::typed(
                        format!(
                            "({}.toLowerCase() > {}.toLowerCase())",
                            left.as_string(),
                            right.as_string()
                        ),
                        TypeTag::Boolean,
                    ));
                }
                Ok(TypedValue::typed(
                    format!(
                        "compareGreaterThan({}, {})",
                        left.as_unknown(),
                        right.as_unknown()
                    ),
                    TypeTag::Boolean,
                ))
            }
            Expr::Join { left, right } => {
                let left = self.descend_input(left)?;
                let right = self.descend_input(right)?;
                Ok(TypedValue::typed(
                    format!("({} + {})", left.as_string(), right.as_string()),
                    TypeTag::String,
                ))
            }
            Expr::LengthOf { string } => {
                let string = self.descend_input(string)?;
                Ok(TypedValue::typed(
                    format!("{}.length", string.as_string()),
                    TypeTag::Number,
                ))
            }
            Expr::Less { left, right } => {
                let left = self.descend_input(left)?;
                let right = self.descend_input(right)?;
                if left.is_always_number_or_nan() && right.is_always_number() {
                    return Ok(TypedValue::typed(
                        format!("({} < {})", left.as_number_or_nan(), right.as_number()),
                        TypeTag::Boolean,
                    ));
                }
                if left.is_always_number() && right.is_always_number_or_nan() {
                    return Ok(TypedValue::typed(
                        format!("!({} >= {})", left.as_number(), right.as_number_or_nan()),
                        TypeTag::Boolean,
                    ));
                }
                if left.is_never_number() || right.is_never_number() {
                    return Ok(TypedValue::typed(
                        format!(
                            "({}.toLowerCase() < {}.toLowerCase())",
                            left.as_string(),
                            right.as_string()
                        ),
                        TypeTag::Boolean,
                    ));
                }
                Ok(TypedValue::typed(
                    format!(
                        "compareLessThan({}, {})",
                        left.as_unknown(),
                        right.as_unknown()
                    ),
                    TypeTag::Boolean,
                ))
            }
            Expr::LetterOf { letter, string } => {
                let letter = self.descend_input(letter)?;
                let string = self.descend_input(string)?;
                Ok(TypedValue::typed(
                    format!(
                        "(({})[({} | 0) - 1] || \"\")",
                        string.as_string(),
                        letter.as_number()
                    ),
                    TypeTag::String,
                ))
            }
            Expr::Ln { value } => {
                let value = self.descend_input(value)?;
                Ok(TypedValue::typed(
                    format!("Math.log({})", value.as_number()),
                    TypeTag::NumberOrNaN,
                ))
            }
            Expr::Log { value } => {
                let value = self.descend_input(value)?;
                Ok(TypedValue::typed(
                    format!("(Math.log({}) / Math.LN10)", value.as_number()),
                    TypeTag::NumberOrNaN,
                ))
            }
            Expr::AdvLog { left, right } => {
                let left = self.descend_input(left)?;
                let right = self.descend_input(right)?;
                Ok(TypedValue::typed(
                    format!(
                        "(Math.log({}) / Math.log({}))",
                        right.as_number(),
                        left.as_number()
                    ),
                    TypeTag::NumberOrNaN,
                ))
            }
            Expr::Mod { left, right } => {
                self.saw_modulo = true;
                let left = self.descend_input(left)?;
                let right = self.descend_input(right)?;
                Ok(TypedValue::typed(
                    format!("mod({}, {})", left.as_number(), right.as_number()),
                    TypeTag::NumberOrNaN,
                ))
            }
            Expr::Multiply { left, right } => {
                let left = self.descend_input(left)?;
                let right = self.descend_input(right)?;
                Ok(TypedValue::typed(
                    format!("({} * {})", left.as_number(), right.as_number()),
                    TypeTag::NumberOrNaN,
                ))
            }
            Expr::Not { operand } => {
                let operand = self.descend_input(operand)?;
                Ok(TypedValue::typed(
                    format!("!{}", operand.as_boolean()),
                    TypeTag::Boolean,
                ))
            }
            Expr::Or { left, right } => {
                let left = self.descend_input(left)?;
                let right = self.descend_input(right)?;
                Ok(TypedValue::typed(
                    format!("({} || {})", left.as_boolean(), right.as_boolean()),
                    TypeTag::Boolean,
                ))
            }
            Expr::Random { low, high, mode } => {
                let low = self.descend_input(low)?;
                let high = self.descend_input(high)?;
                match mode {
                    RandomMode::Ints => Ok(TypedValue::typed(
                        format!("randomInt({}, {})", low.as_number(), high.as_number()),
                        TypeTag::Number,
                    )),
                    RandomMode::Floats => Ok(TypedValue::typed(
                        format!("randomFloat({}, {})", low.as_number(), high.as_number()),
                        TypeTag::Number,
                    )),
                    RandomMode::Dynamic => Ok(TypedValue::typed(
                        format!(
                            "runtime.ext_scratch3_operators._random({}, {})",
                            low.as_unknown(),
                            high.as_unknown()
                        ),
                        TypeTag::NumberOrNaN,
                    )),
                }
            }
            Expr::Round { value } => {
                let value = self.descend_input(value)?;
                Ok(TypedValue::typed(
                    format!("Math.round({})", value.as_number()),
                    TypeTag::Number,
                ))
            }
            Expr::Sin { value } => {
                let value = self.descend_input(value)?;
                Ok(TypedValue::typed(
                    format!(
                        "(Math.round(Math.sin((Math.PI * {}) / 180) * 1e10) / 1e10)",
                        value.as_number()
                    ),
                    TypeTag::NumberOrNaN,
                ))
            }
            Expr::Sqrt { value } => {
                let value = self.descend_input(value)?;
                Ok(TypedValue::typed(
                    format!("Math.sqrt({})", value.as_number()),
                    TypeTag::NumberOrNaN,
                ))
            }
            Expr::Subtract { left, right } => {
                let left = self.descend_input(left)?;
                let right = self.descend_input(right)?;
                Ok(TypedValue::typed(
                    format!("({} - {})", left.as_number(), right.as_number()),
                    TypeTag::NumberOrNaN,
                ))
            }
            Expr::Tan { value } => {
                let value = self.descend_input(value)?;
                Ok(TypedValue::typed(
                    format!("tan({})", value.as_number()),
                    TypeTag::NumberOrNaN,
                ))
            }
            Expr::Pow10 { value } => {
                let value = self.descend_input(value)?;
                Ok(TypedValue::typed(
                    format!("(10 ** {})", value.as_number()),
                    TypeTag::Number,
                ))
            }

            Expr::SensingAnswer => Ok(TypedValue::typed(
                "runtime.ext_scratch3_sensing._answer",
                TypeTag::String,
            )),
            Expr::ColorTouchingColor {
                target_color,
                mask_color,
            } => {
                let target_color = self.descend_input(target_color)?;
                let mask_color = self.descend_input(mask_color)?;
                Ok(TypedValue::typed(
                    format!(
                        "target.colorIsTouchingColor(colorToList({}), colorToList({}))",
                        target_color.as_color(),
                        mask_color.as_color()
                    ),
                    TypeTag::Boolean,
                ))
            }
            Expr::CurrentDate => Ok(TypedValue::typed("(new Date().getDate())", TypeTag::Number)),
            Expr::CurrentDayOfWeek => Ok(TypedValue::typed(
                "(new Date().getDay() + 1)",
                TypeTag::Number,
            )),
            Expr::DaysSince2000 => Ok(TypedValue::typed("daysSince2000()", TypeTag::Number)),
            Expr::Distance { target } => {
                let target = self.descend_input(target)?;
                Ok(TypedValue::typed(
                    format!("distance({})", target.as_string()),
                    TypeTag::Number,
                ))
            }
            Expr::CurrentHour => Ok(TypedValue::typed(
                "(new Date().getHours())",
                TypeTag::Number,
            )),
            Expr::CurrentMinute => Ok(TypedValue::typed(
                "(new Date().getMinutes())",
                TypeTag::Number,
            )),
            Expr::CurrentMonth => Ok(TypedValue::typed(
                "(new Date().getMonth() + 1)",
                TypeTag::Number,
            )),
            Expr::CurrentSecond => Ok(TypedValue::typed(
                "(new Date().getSeconds())",
                TypeTag::Number,
            )),
            Expr::CurrentYear => Ok(TypedValue::typed(
                "(new Date().getFullYear())",
                TypeTag::Number,
            )),
            Expr::SensingOf { object, property } => self.descend_sensing_of(object, property),
            Expr::Touching { object } => {
                let object = self.descend_input(object)?;
                Ok(TypedValue::typed(
                    format!("target.isTouchingObject({})", object.as_unknown()),
                    TypeTag::Boolean,
                ))
            }
            Expr::TouchingColor { color } => {
                let color = self.descend_input(color)?;
                Ok(TypedValue::typed(
                    format!("target.isTouchingColor(colorToList({}))", color.as_color()),
                    TypeTag::Boolean,
                ))
            }
            Expr::Username => Ok(TypedValue::typed(
                "runtime.ioDevices.userData.getUsername()",
                TypeTag::String,
            )),

            Expr::TimerGet => Ok(TypedValue::typed(
                "runtime.ioDevices.clock.projectTimer()",
                TypeTag::Number,
            )),
            Expr::LastKeyPressed => Ok(TypedValue::typed(
                "runtime.ioDevices.keyboard.getLastKeyPressed()",
                TypeTag::String,
            )),

            Expr::VarGet { variable } => Ok(self.descend_variable(variable)),

            Expr::ProcedureCall(call) => {
                let value = self.descend_procedure_call(call, true)?;
                Ok(value.unwrap_or_else(TypedValue::empty_string))
            }

            Expr::BroadcastFunction { broadcast } => {
                let broadcast = self.descend_input(broadcast)?;
                let fragment = format!(
                    "(yield* waitThreads(startHats(\"event_whenbroadcastreceived\", {{ BROADCAST_OPTION: {} }})))",
                    broadcast.as_safe()
                );
                self.yielded()?;
                Ok(TypedValue::typed(fragment, TypeTag::Unknown))
            }

            Expr::Noop => {
                tracing::warn!("unexpected noop");
                Ok(TypedValue::empty_string())
            }
        }
    }

    fn descend_equals(&mut self, left: &Expr, right: &Expr) -> Result<TypedValue> {
        let left = self.descend_input(left)?;
        let right = self.descend_input(right)?;
        // Sides that can never coerce to a number compare as lowercased
        // strings without any number parsing.
        if left.is_never_number() || right.is_never_number() {
            return Ok(TypedValue::typed(
                format!(
                    "({}.toLowerCase() === {}.toLowerCase())",
                    left.as_string(),
                    right.as_string()
                ),
                TypeTag::Boolean,
            ));
        }
        let left_always = left.is_always_number();
        let right_always = right.is_always_number();
        if left_always
            && right_always
            && constant_is_equals_safe(&left)
            && constant_is_equals_safe(&right)
        {
            return Ok(TypedValue::typed(
                format!("({} === {})", left.as_number(), right.as_number()),
                TypeTag::Boolean,
            ));
        }
        if left_always
            && is_safe_constant_for_equals(&left)
            && right.constant_literal().is_none()
        {
            return Ok(TypedValue::typed(
                format!("({} === {})", left.as_number(), right.as_number_or_nan()),
                TypeTag::Boolean,
            ));
        }
        if right_always
            && is_safe_constant_for_equals(&right)
            && left.constant_literal().is_none()
        {
            return Ok(TypedValue::typed(
                format!("({} === {})", left.as_number_or_nan(), right.as_number()),
                TypeTag::Boolean,
            ));
        }
        Ok(TypedValue::typed(
            format!(
                "compareEqual({}, {})",
                left.as_unknown(),
                right.as_unknown()
            ),
            TypeTag::Boolean,
        ))
    }

    fn descend_sensing_of(&mut self, object: &Expr, property: &str) -> Result<TypedValue> {
        let object = self.descend_input(object)?;
        let object_string = object.as_string();
        if let Some(literal) = object.constant_literal() {
            let is_stage = js_value_to_string(literal) == "_stage_";
            let reference = if is_stage {
                "stage".to_string()
            } else {
                self.evaluate_once(&format!("runtime.getSpriteTargetByName({})", object_string))
            };
            if property == "volume" {
                return Ok(TypedValue::typed(
                    format!("({} ? {}.volume : 0)", reference, reference),
                    TypeTag::Number,
                ));
            }
            if is_stage {
                match property {
                    "background #" | "backdrop #" => {
                        return Ok(TypedValue::typed(
                            format!("({}.currentCostume + 1)", reference),
                            TypeTag::Number,
                        ))
                    }
                    "backdrop name" => {
                        return Ok(TypedValue::typed(
                            format!(
                                "{}.getCostumes()[{}.currentCostume].name",
                                reference, reference
                            ),
                            TypeTag::String,
                        ))
                    }
                    _ => {}
                }
            } else {
                match property {
                    "x position" => {
                        return Ok(TypedValue::typed(
                            format!("({} ? {}.x : 0)", reference, reference),
                            TypeTag::Number,
                        ))
                    }
                    "y position" => {
                        return Ok(TypedValue::typed(
                            format!("({} ? {}.y : 0)", reference, reference),
                            TypeTag::Number,
                        ))
                    }
                    "direction" => {
                        return Ok(TypedValue::typed(
                            format!("({} ? {}.direction : 0)", reference, reference),
                            TypeTag::Number,
                        ))
                    }
                    "costume #" => {
                        return Ok(TypedValue::typed(
                            format!("({} ? {}.currentCostume + 1 : 0)", reference, reference),
                            TypeTag::Number,
                        ))
                    }
                    "costume name" => {
                        return Ok(TypedValue::typed(
                            format!(
                                "({} ? {}.getCostumes()[{}.currentCostume].name : \"\")",
                                reference, reference, reference
                            ),
                            TypeTag::String,
                        ))
                    }
                    "size" => {
                        return Ok(TypedValue::typed(
                            format!("({} ? {}.size : 0)", reference, reference),
                            TypeTag::Number,
                        ))
                    }
                    _ => {}
                }
            }
            let variable = self.evaluate_once(&format!(
                "{} && {}.lookupVariableByNameAndType(\"{}\", \"\", true)",
                reference,
                reference,
                sanitize(property)
            ));
            return Ok(TypedValue::typed(
                format!("({} ? {}.value : 0)", variable, variable),
                TypeTag::Unknown,
            ));
        }
        Ok(TypedValue::typed(
            format!(
                "runtime.ext_scratch3_sensing.getAttributeOf({{OBJECT: {}, PROPERTY: \"{}\" }})",
                object_string,
                sanitize(property)
            ),
            TypeTag::Unknown,
        ))
    }

    fn descend_extension_input(&mut self, node: &ExtensionNode) -> Result<TypedValue> {
        let provider = self.extensions;
        if let Some(transformer) = provider.expression(node.extension_id(), node.block_id()) {
            return match transformer.transform(node, self) {
                Ok(value) => Ok(value),
                Err(error) => {
                    tracing::warn!("extension transformer for '{}' failed: {}", node.kind, error);
                    Ok(TypedValue::empty_string())
                }
            };
        }
        bail!("Unknown expression kind '{}'.", node.kind);
    }

    fn descend_extension_statement(&mut self, node: &ExtensionNode) -> Result<()> {
        let provider = self.extensions;
        if let Some(transformer) = provider.statement(node.extension_id(), node.block_id()) {
            if let Err(error) = transformer.transform(node, self) {
                tracing::warn!("extension transformer for '{}' failed: {}", node.kind, error);
            }
            return Ok(());
        }
        bail!("Unknown statement kind '{}'.", node.kind);
    }

    /// Emits the suspendable compatibility-layer delegation for an
    /// uncompiled primitive. `set_flags` is the last-in-loop marker the
    /// layer uses to decide promise re-entry.
    fn compatibility_layer_call(&mut self, node: &CompatNode, set_flags: bool) -> Result<String> {
        let mut result = String::from("yield* executeInCompatibilityLayer({");
        for (name, input) in &node.inputs {
            let input = self.descend_input(input)?;
            result.push_str(&format!("\"{}\":{},", sanitize(name), input.as_safe()));
        }
        for (name, field) in &node.fields {
            result.push_str(&format!("\"{}\":\"{}\",", sanitize(name), sanitize(field)));
        }
        result.push_str(&format!(
            "}}, runtime.getOpcodeFunction(\"{}\"), {}, {}, \"{}\")",
            sanitize(&node.opcode),
            self.is_warp,
            set_flags,
            sanitize(&node.block_id)
        ));
        self.yielded()?;
        Ok(result)
    }

    fn descend_procedure_call(
        &mut self,
        call: &ProcedureCall,
        as_input: bool,
    ) -> Result<Option<TypedValue>> {
        let Some(procedure) = self.script.procedures.get(&call.variant) else {
            bail!("Unknown procedure variant '{}'.", call.variant);
        };
        if !procedure.has_stack {
            return Ok(if as_input {
                Some(TypedValue::empty_string())
            } else {
                None
            });
        }
        let yields = procedure.yields;
        let is_recursive = self
            .script
            .procedure_code
            .as_deref()
            .is_some_and(|code| code == call.code);
        // Direct recursion outside warp gets a yield so tight loops cannot
        // starve the sequencer.
        if !self.is_warp && is_recursive {
            self.yield_not_warp()?;
        }
        let mut arguments = Vec::with_capacity(call.arguments.len());
        for argument in &call.arguments {
            let argument = self.descend_input(argument)?;
            arguments.push(argument.as_safe());
        }
        let mut fragment = String::new();
        if as_input {
            fragment.push('(');
        }
        if yields {
            fragment.push_str("yield* ");
        }
        fragment.push_str(&format!(
            "thread.procedures[\"{}\"]({})",
            sanitize(&call.variant),
            arguments.join(",")
        ));
        if as_input {
            fragment.push(')');
        }
        if yields {
            self.yielded()?;
        }
        self.reset_variable_inputs();
        if as_input {
            Ok(Some(TypedValue::typed(fragment, TypeTag::Unknown)))
        } else {
            self.source.push_str(&fragment);
            self.source.push_str(";\n");
            Ok(None)
        }
    }

    fn emit_position_change(&mut self, statement: String) {
        self.source.push_str(&statement);
        if self.saw_modulo {
            self.source
                .push_str("if (target.interpolationData) target.interpolationData = null;\n");
        }
    }

    fn emit_monitor_checkbox(&mut self, monitor_id: &str, visible: bool) {
        self.source.push_str(&format!(
            "runtime.monitorBlocks.changeBlock({{ id: \"{}\", element: \"checkbox\", value: {} }}, runtime);\n",
            sanitize(monitor_id),
            visible
        ));
    }

    fn descend_stacked_block(&mut self, node: &Stmt) -> Result<()> {
        if self.environment.debug {
            tracing::debug!("lowering statement '{}'", node.kind());
        }
        match node {
            Stmt::Extension(extension) => self.descend_extension_statement(extension),

            Stmt::AddonCall {
                code,
                arguments,
                block_id,
            } => {
                let mut record = String::from("{");
                for (name, input) in arguments {
                    let input = self.descend_input(input)?;
                    record.push_str(&format!("\"{}\":{},", sanitize(name), input.as_safe()));
                }
                record.push('}');
                self.source.push_str(&format!(
                    "yield* executeInCompatibilityLayer({}, runtime.getAddonBlock(\"{}\").callback, {}, false, \"{}\");\n",
                    record,
                    sanitize(code),
                    self.is_warp,
                    sanitize(block_id)
                ));
                self.yielded()?;
                Ok(())
            }

            Stmt::Compat(compat) => {
                let is_last_in_loop = self.is_last_block_in_loop();
                let call = self.compatibility_layer_call(compat, is_last_in_loop)?;
                self.source.push_str(&call);
                self.source.push_str(";\n");
                if is_last_in_loop {
                    self.source.push_str(
                        "if (hasResumedFromPromise) {\nhasResumedFromPromise = false;\ncontinue;\n}\n",
                    );
                }
                Ok(())
            }

            Stmt::AllAtOnce { stack } => {
                let previous_warp = self.is_warp;
                self.is_warp = true;
                self.descend_stack(stack, Frame::new(false))?;
                self.is_warp = previous_warp;
                Ok(())
            }

            Stmt::CreateClone { target } => {
                let target = self.descend_input(target)?;
                self.source.push_str(&format!(
                    "runtime.ext_scratch3_control._createClone({}, target);\n",
                    target.as_string()
                ));
                Ok(())
            }
            Stmt::DeleteClone => {
                self.source.push_str("if (!target.isOriginal) {\n");
                self.source.push_str("runtime.disposeTarget(target);\n");
                self.source.push_str("runtime.stopForTarget(target);\n");
                self.retire();
                self.source.push_str("}\n");
                Ok(())
            }

            Stmt::Switch { test, cases } => {
                let test = self.descend_input(test)?;
                self.source
                    .push_str(&format!("switch ({}) {{\n", test.as_string()));
                self.descend_stack(cases, Frame::new(false))?;
                self.source.push_str("}\n");
                Ok(())
            }
            Stmt::Case {
                condition,
                stack,
                runs_next,
            } => {
                let condition = self.descend_input(condition)?;
                self.source
                    .push_str(&format!("case {}:\n", condition.as_string()));
                if !runs_next {
                    self.descend_stack(stack, Frame::new(false))?;
                    self.source.push_str("break;\n");
                }
                Ok(())
            }
            Stmt::ExitCase => {
                self.source.push_str("break;\n");
                Ok(())
            }

            Stmt::For {
                variable,
                count,
                stack,
            } => {
                self.reset_variable_inputs();
                let index = self.local_names.next();
                let count = self.descend_input(count)?;
                let reference = self.reference_variable(variable);
                self.source.push_str(&format!("var {} = 0;\n", index));
                self.source
                    .push_str(&format!("while ({} < {}) {{\n", index, count.as_number()));
                self.source.push_str(&format!("{}++;\n", index));
                self.source
                    .push_str(&format!("{}.value = {};\n", reference, index));
                self.descend_stack(stack, Frame::new(true))?;
                self.yield_loop()?;
                self.source.push_str("}\n");
                Ok(())
            }

            Stmt::If {
                condition,
                when_true,
                when_false,
            } => {
                let condition = self.descend_input(condition)?;
                self.source
                    .push_str(&format!("if ({}) {{\n", condition.as_boolean()));
                self.descend_stack(when_true, Frame::new(false))?;
                if !when_false.is_empty() {
                    self.source.push_str("} else {\n");
                    self.descend_stack(when_false, Frame::new(false))?;
                }
                self.source.push_str("}\n");
                Ok(())
            }

            Stmt::NewScript { branch_id } => {
                self.source.push_str(&format!(
                    "runtime._pushThread(\"{}\", target);\n",
                    sanitize(branch_id)
                ));
                Ok(())
            }

            Stmt::Repeat { times, stack } => {
                let index = self.local_names.next();
                let times = self.descend_input(times)?;
                self.source
                    .push_str(&format!("var {} = {};\n", index, times.as_number()));
                // >= 0.5 matches the interpreter's rounding of repeat counts.
                self.source
                    .push_str(&format!("for (; {} >= 0.5; {}--) {{\n", index, index));
                self.descend_stack(stack, Frame::new(true))?;
                self.yield_loop()?;
                self.source.push_str("}\n");
                Ok(())
            }

            Stmt::StopAll => {
                self.source.push_str("runtime.stopAll();\n");
                self.retire();
                Ok(())
            }
            Stmt::StopOthers => {
                self.source
                    .push_str("runtime.stopForTarget(target, thread);\n");
                Ok(())
            }
            Stmt::StopScript => {
                if self.script.is_procedure {
                    self.source.push_str("return;\n");
                } else {
                    self.retire();
                }
                Ok(())
            }

            Stmt::Wait { seconds } => {
                let duration = self.local_names.next();
                self.source.push_str("thread.timer = timer();\n");
                let seconds = self.descend_input(seconds)?;
                self.source.push_str(&format!(
                    "var {} = Math.max(0, 1000 * {});\n",
                    duration,
                    seconds.as_number()
                ));
                self.request_redraw();
                // One unconditional yield, even for a zero duration.
                self.source.push_str("yield;\n");
                self.yielded()?;
                self.source.push_str(&format!(
                    "while (thread.timer.timeElapsed() < {}) {{\n",
                    duration
                ));
                self.yield_stuck_or_not_warp()?;
                self.source.push_str("}\n");
                self.source.push_str("thread.timer = null;\n");
                Ok(())
            }

            Stmt::WaitUntil { condition } => {
                self.reset_variable_inputs();
                let condition = self.descend_input(condition)?;
                self.source
                    .push_str(&format!("while (!{}) {{\n", condition.as_boolean()));
                self.yield_stuck_or_not_warp()?;
                self.source.push_str("}\n");
                Ok(())
            }

            Stmt::WaitOrUntil { seconds, condition } => {
                self.reset_variable_inputs();
                let duration = self.local_names.next();
                self.source.push_str("thread.timer = timer();\n");
                let seconds = self.descend_input(seconds)?;
                let condition = self.descend_input(condition)?;
                self.source.push_str(&format!(
                    "var {} = Math.max(0, 1000 * {});\n",
                    duration,
                    seconds.as_number()
                ));
                self.request_redraw();
                self.source.push_str("yield;\n");
                self.yielded()?;
                self.source.push_str(&format!(
                    "while (!{} && thread.timer.timeElapsed() < {}) {{\n",
                    condition.as_boolean(),
                    duration
                ));
                self.yield_stuck_or_not_warp()?;
                self.source.push_str("}\n");
                self.source.push_str("thread.timer = null;\n");
                Ok(())
            }

            Stmt::While { condition, stack } => {
                let condition = self.descend_input(condition)?;
                self.source
                    .push_str(&format!("while ({}) {{\n", condition.as_boolean()));
                self.descend_stack(stack, Frame::new(true))?;
                self.yield_loop()?;
                self.source.push_str("}\n");
                Ok(())
            }

            Stmt::RunAsSprite { sprite, stack } => {
                let saved = self.local_names.next();
                let resolved = self.local_names.next();
                let sprite = self.descend_input(sprite)?;
                let sprite_string = sprite.as_string();
                self.source
                    .push_str(&format!("var {} = target;\n", saved));
                let is_stage_literal = sprite
                    .constant_literal()
                    .map(|literal| js_value_to_string(literal) == "_stage_")
                    .unwrap_or(false);
                if is_stage_literal {
                    self.source.push_str(&format!("var {} = stage;\n", resolved));
                } else {
                    self.source.push_str(&format!(
                        "var {} = {} === \"_stage_\" ? stage : runtime.getSpriteTargetByName({});\n",
                        resolved, sprite_string, sprite_string
                    ));
                }
                self.source.push_str(&format!("if ({}) {{\n", resolved));
                self.source.push_str("thread.spoofing = true;\n");
                self.source
                    .push_str(&format!("thread.spoofTarget = {};\n", resolved));
                self.source
                    .push_str(&format!("thread.target = {};\n", resolved));
                self.source.push_str(&format!("target = {};\n", resolved));
                self.source.push_str("try {\n");
                self.descend_stack(stack, Frame::new(false))?;
                self.source.push_str("} finally {\n");
                self.source
                    .push_str(&format!("thread.target = {};\n", saved));
                self.source.push_str("thread.spoofing = false;\n");
                self.source.push_str("thread.spoofTarget = null;\n");
                self.source.push_str(&format!("target = {};\n", saved));
                self.source.push_str("}\n}\n");
                Ok(())
            }

            Stmt::Broadcast { broadcast } => {
                let broadcast = self.descend_input(broadcast)?;
                self.source.push_str(&format!(
                    "startHats(\"event_whenbroadcastreceived\", {{ BROADCAST_OPTION: {} }});\n",
                    broadcast.as_safe()
                ));
                self.reset_variable_inputs();
                Ok(())
            }
            Stmt::BroadcastAndWait { broadcast } => {
                let broadcast = self.descend_input(broadcast)?;
                self.source.push_str(&format!(
                    "yield* waitThreads(startHats(\"event_whenbroadcastreceived\", {{ BROADCAST_OPTION: {} }}));\n",
                    broadcast.as_safe()
                ));
                self.yielded()?;
                Ok(())
            }

            Stmt::ListAdd { list, item } => {
                let item = self.descend_input(item)?;
                let reference = self.reference_list(list);
                self.source
                    .push_str(&format!("{}.value.push({});\n", reference, item.as_safe()));
                self.source
                    .push_str(&format!("{}._monitorUpToDate = false;\n", reference));
                Ok(())
            }
            Stmt::ListDelete { list, index } => {
                let index = self.descend_input(index)?;
                let reference = self.reference_list(list);
                match index.constant_literal() {
                    Some(literal) if js_value_to_string(literal) == "last" => {
                        self.source
                            .push_str(&format!("{}.value.pop();\n", reference));
                        self.source
                            .push_str(&format!("{}._monitorUpToDate = false;\n", reference));
                    }
                    Some(literal) if js_to_number(literal) == 1.0 => {
                        self.source
                            .push_str(&format!("{}.value.shift();\n", reference));
                        self.source
                            .push_str(&format!("{}._monitorUpToDate = false;\n", reference));
                    }
                    _ => {
                        self.source.push_str(&format!(
                            "listDelete({}, {});\n",
                            reference,
                            index.as_unknown()
                        ));
                    }
                }
                Ok(())
            }
            Stmt::ListDeleteAll { list } => {
                let reference = self.reference_list(list);
                self.source.push_str(&format!("{}.value = [];\n", reference));
                self.source
                    .push_str(&format!("{}._monitorUpToDate = false;\n", reference));
                Ok(())
            }
            Stmt::ListForEach {
                list,
                variable,
                stack,
            } => {
                self.reset_variable_inputs();
                let index = self.local_names.next();
                let list_reference = self.reference_list(list);
                let variable_reference = self.reference_variable(variable);
                self.source.push_str(&format!("var {} = 0;\n", index));
                self.source.push_str(&format!(
                    "while ({} < {}.value.length) {{\n",
                    index, list_reference
                ));
                self.source.push_str(&format!("{}++;\n", index));
                self.source.push_str(&format!(
                    "{}.value = {}.value[{} - 1];\n",
                    variable_reference, list_reference, index
                ));
                self.descend_stack(stack, Frame::new(true))?;
                self.yield_loop()?;
                self.source.push_str("}\n");
                Ok(())
            }
            Stmt::ListHide { list } => {
                self.emit_monitor_checkbox(&list.id, false);
                Ok(())
            }
            Stmt::ListInsert { list, index, item } => {
                let index = self.descend_input(index)?;
                let item = self.descend_input(item)?;
                let reference = self.reference_list(list);
                if matches!(index.constant_literal(), Some(literal) if js_to_number(literal) == 1.0)
                {
                    self.source.push_str(&format!(
                        "{}.value.unshift({});\n",
                        reference,
                        item.as_safe()
                    ));
                    self.source
                        .push_str(&format!("{}._monitorUpToDate = false;\n", reference));
                } else {
                    self.source.push_str(&format!(
                        "listInsert({}, {}, {});\n",
                        reference,
                        index.as_unknown(),
                        item.as_safe()
                    ));
                }
                Ok(())
            }
            Stmt::ListReplace { list, index, item } => {
                let index = self.descend_input(index)?;
                let item = self.descend_input(item)?;
                let reference = self.reference_list(list);
                self.source.push_str(&format!(
                    "listReplace({}, {}, {});\n",
                    reference,
                    index.as_unknown(),
                    item.as_safe()
                ));
                Ok(())
            }
            Stmt::ListShow { list } => {
                self.emit_monitor_checkbox(&list.id, true);
                Ok(())
            }

            Stmt::LooksBackwardLayers { layers } => {
                let layers = self.descend_input(layers)?;
                self.source.push_str(&format!(
                    "target.goBackwardLayers({});\n",
                    layers.as_number()
                ));
                Ok(())
            }
            Stmt::LooksChangeEffect { effect, value } => {
                let value = self.descend_input(value)?;
                let effect = sanitize(&effect.to_lowercase());
                self.request_redraw();
                self.source.push_str(&format!(
                    "target.setEffect(\"{}\", runtime.ext_scratch3_looks.clampEffect(\"{}\", {} + target.effects[\"{}\"]));\n",
                    effect,
                    effect,
                    value.as_number(),
                    effect
                ));
                Ok(())
            }
            Stmt::LooksChangeSize { size } => {
                let size = self.descend_input(size)?;
                self.request_redraw();
                self.source.push_str(&format!(
                    "target.setSize(target.size + {});\n",
                    size.as_number()
                ));
                Ok(())
            }
            Stmt::LooksClearEffects => {
                self.request_redraw();
                self.source.push_str("target.clearEffects();\n");
                Ok(())
            }
            Stmt::LooksForwardLayers { layers } => {
                let layers = self.descend_input(layers)?;
                self.source
                    .push_str(&format!("target.goForwardLayers({});\n", layers.as_number()));
                Ok(())
            }
            Stmt::LooksGoToBack => {
                self.source.push_str("target.goToBack();\n");
                Ok(())
            }
            Stmt::LooksGoToFront => {
                self.source.push_str("target.goToFront();\n");
                Ok(())
            }
            Stmt::LooksHide => {
                self.request_redraw();
                self.source.push_str("target.setVisible(false);\n");
                self.source
                    .push_str("runtime.ext_scratch3_looks._renderBubble(target);\n");
                Ok(())
            }
            Stmt::LooksNextBackdrop => {
                self.request_redraw();
                self.source.push_str(
                    "runtime.ext_scratch3_looks._setBackdrop(stage, stage.currentCostume + 1, true);\n",
                );
                Ok(())
            }
            Stmt::LooksNextCostume => {
                self.request_redraw();
                self.source
                    .push_str("target.setCostume(target.currentCostume + 1);\n");
                Ok(())
            }
            Stmt::LooksSetEffect { effect, value } => {
                let value = self.descend_input(value)?;
                let effect = sanitize(&effect.to_lowercase());
                self.request_redraw();
                self.source.push_str(&format!(
                    "target.setEffect(\"{}\", runtime.ext_scratch3_looks.clampEffect(\"{}\", {}));\n",
                    effect,
                    effect,
                    value.as_number()
                ));
                Ok(())
            }
            Stmt::LooksSetSize { size } => {
                let size = self.descend_input(size)?;
                self.request_redraw();
                self.source
                    .push_str(&format!("target.setSize({});\n", size.as_number()));
                Ok(())
            }
            Stmt::LooksShow => {
                self.request_redraw();
                self.source.push_str("target.setVisible(true);\n");
                self.source
                    .push_str("runtime.ext_scratch3_looks._renderBubble(target);\n");
                Ok(())
            }
            Stmt::LooksSwitchBackdrop { backdrop } => {
                let backdrop = self.descend_input(backdrop)?;
                self.request_redraw();
                self.source.push_str(&format!(
                    "runtime.ext_scratch3_looks._setBackdrop(stage, {});\n",
                    backdrop.as_unknown()
                ));
                Ok(())
            }
            Stmt::LooksSwitchCostume { costume } => {
                let costume = self.descend_input(costume)?;
                self.request_redraw();
                self.source.push_str(&format!(
                    "runtime.ext_scratch3_looks._setCostume(target, {});\n",
                    costume.as_unknown()
                ));
                Ok(())
            }

            Stmt::MotionChangeX { dx } => {
                self.saw_modulo = false;
                let dx = self.descend_input(dx)?;
                self.emit_position_change(format!(
                    "target.setXY(target.x + {}, target.y);\n",
                    dx.as_number()
                ));
                Ok(())
            }
            Stmt::MotionChangeY { dy } => {
                self.saw_modulo = false;
                let dy = self.descend_input(dy)?;
                self.emit_position_change(format!(
                    "target.setXY(target.x, target.y + {});\n",
                    dy.as_number()
                ));
                Ok(())
            }
            Stmt::MotionIfOnEdgeBounce => {
                self.source
                    .push_str("runtime.ext_scratch3_motion._ifOnEdgeBounce(target);\n");
                Ok(())
            }
            Stmt::MotionSetDirection { direction } => {
                let direction = self.descend_input(direction)?;
                self.source.push_str(&format!(
                    "target.setDirection({});\n",
                    direction.as_number()
                ));
                Ok(())
            }
            Stmt::MotionSetRotationStyle { style } => {
                self.source.push_str(&format!(
                    "target.setRotationStyle(\"{}\");\n",
                    sanitize(style)
                ));
                Ok(())
            }
            Stmt::MotionSetX { x } => {
                self.saw_modulo = false;
                let x = self.descend_input(x)?;
                self.emit_position_change(format!(
                    "target.setXY({}, target.y);\n",
                    x.as_number()
                ));
                Ok(())
            }
            Stmt::MotionSetY { y } => {
                self.saw_modulo = false;
                let y = self.descend_input(y)?;
                self.emit_position_change(format!(
                    "target.setXY(target.x, {});\n",
                    y.as_number()
                ));
                Ok(())
            }
            Stmt::MotionSetXY { x, y } => {
                self.saw_modulo = false;
                let x = self.descend_input(x)?;
                let y = self.descend_input(y)?;
                self.emit_position_change(format!(
                    "target.setXY({}, {});\n",
                    x.as_number(),
                    y.as_number()
                ));
                Ok(())
            }
            Stmt::MotionStep { steps } => {
                let steps = self.descend_input(steps)?;
                self.source.push_str(&format!(
                    "runtime.ext_scratch3_motion._moveSteps({}, target);\n",
                    steps.as_number()
                ));
                Ok(())
            }

            Stmt::PenClear => {
                self.request_redraw();
                self.source.push_str(&format!("{}.clear();\n", PEN_EXT));
                Ok(())
            }
            Stmt::PenDown => {
                self.request_redraw();
                self.source
                    .push_str(&format!("{}._penDown(target);\n", PEN_EXT));
                Ok(())
            }
            Stmt::PenUp => {
                self.source
                    .push_str(&format!("{}._penUp(target);\n", PEN_EXT));
                Ok(())
            }
            Stmt::PenStamp => {
                self.request_redraw();
                self.source
                    .push_str(&format!("{}._stamp(target);\n", PEN_EXT));
                Ok(())
            }
            Stmt::PenSetColor { color } => {
                let color = self.descend_input(color)?;
                self.source.push_str(&format!(
                    "{}._setPenColorToColor({}, target);\n",
                    PEN_EXT,
                    color.as_color()
                ));
                Ok(())
            }
            Stmt::PenChangeParam { param, value } => {
                let param = self.descend_input(param)?;
                let value = self.descend_input(value)?;
                self.source.push_str(&format!(
                    "{}._setOrChangeColorParam({}, {}, {}, true);\n",
                    PEN_EXT,
                    param.as_string(),
                    value.as_number(),
                    PEN_STATE
                ));
                Ok(())
            }
            Stmt::PenSetParam { param, value } => {
                let param = self.descend_input(param)?;
                let value = self.descend_input(value)?;
                self.source.push_str(&format!(
                    "{}._setOrChangeColorParam({}, {}, {}, false);\n",
                    PEN_EXT,
                    param.as_string(),
                    value.as_number(),
                    PEN_STATE
                ));
                Ok(())
            }
            Stmt::PenChangeSize { size } => {
                let size = self.descend_input(size)?;
                self.source.push_str(&format!(
                    "{}._changePenSizeBy({}, target);\n",
                    PEN_EXT,
                    size.as_number()
                ));
                Ok(())
            }
            Stmt::PenSetSize { size } => {
                let size = self.descend_input(size)?;
                self.source.push_str(&format!(
                    "{}._setPenSizeTo({}, target);\n",
                    PEN_EXT,
                    size.as_number()
                ));
                Ok(())
            }
            Stmt::PenLegacyChangeHue { hue } => {
                let hue = self.descend_input(hue)?;
                self.source.push_str(&format!(
                    "{}._changePenHueBy({}, target);\n",
                    PEN_EXT,
                    hue.as_number()
                ));
                Ok(())
            }
            Stmt::PenLegacySetHue { hue } => {
                let hue = self.descend_input(hue)?;
                self.source.push_str(&format!(
                    "{}._setPenHueToNumber({}, target);\n",
                    PEN_EXT,
                    hue.as_number()
                ));
                Ok(())
            }
            Stmt::PenLegacyChangeShade { shade } => {
                let shade = self.descend_input(shade)?;
                self.source.push_str(&format!(
                    "{}._changePenShadeBy({}, target);\n",
                    PEN_EXT,
                    shade.as_number()
                ));
                Ok(())
            }
            Stmt::PenLegacySetShade { shade } => {
                let shade = self.descend_input(shade)?;
                self.source.push_str(&format!(
                    "{}._setPenShadeToNumber({}, target);\n",
                    PEN_EXT,
                    shade.as_number()
                ));
                Ok(())
            }

            Stmt::ProcedureCall(call) => {
                self.descend_procedure_call(call, false)?;
                Ok(())
            }
            Stmt::ProcedureReturn { value } => {
                let value = self.descend_input(value)?;
                self.source
                    .push_str(&format!("return {};\n", value.as_unknown()));
                Ok(())
            }

            Stmt::TimerReset => {
                self.source
                    .push_str("runtime.ioDevices.clock.resetProjectTimer();\n");
                Ok(())
            }
            Stmt::Debugger => {
                self.source.push_str("debugger;\n");
                Ok(())
            }

            Stmt::VarHide { variable } => {
                self.emit_monitor_checkbox(&variable.id, false);
                Ok(())
            }
            Stmt::VarSet { variable, value } => {
                let value = self.descend_input(value)?;
                let reference = self.reference_variable(variable);
                let slot = self
                    .variable_inputs
                    .entry(variable.id.clone())
                    .or_insert_with(|| TrackedVariable::new(format!("{}.value", reference)));
                slot.set_input(value.clone());
                let assignment_target = slot.source.clone();
                self.source.push_str(&format!(
                    "{} = {};\n",
                    assignment_target,
                    value.as_safe()
                ));
                Ok(())
            }
            Stmt::VarShow { variable } => {
                self.emit_monitor_checkbox(&variable.id, true);
                Ok(())
            }

            Stmt::VisualReport { input } => {
                let input = self.descend_input(input)?;
                self.source.push_str(&format!(
                    "runtime.visualReport(\"{}\", {});\n",
                    sanitize(&self.script.top_block_id),
                    input.as_unknown()
                ));
                Ok(())
            }

            Stmt::SensingSetOf {
                object,
                property,
                value,
            } => self.descend_sensing_set_of(object, property, value),
        }
    }

    fn descend_sensing_set_of(
        &mut self,
        object: &Expr,
        property: &str,
        value: &Expr,
    ) -> Result<()> {
        let object = self.descend_input(object)?;
        let value = self.descend_input(value)?;
        let object_string = object.as_string();
        if let Some(literal) = object.constant_literal() {
            let is_stage = js_value_to_string(literal) == "_stage_";
            let reference = if is_stage {
                "stage".to_string()
            } else {
                self.evaluate_once(&format!("runtime.getSpriteTargetByName({})", object_string))
            };
            if property == "volume" {
                self.source.push_str(&format!(
                    "if ({}) {}.volume = {};\n",
                    reference,
                    reference,
                    value.as_number()
                ));
                return Ok(());
            }
            if !is_stage {
                match property {
                    "x position" => {
                        self.source.push_str(&format!(
                            "if ({}) {}.setXY({}, {}.y);\n",
                            reference,
                            reference,
                            value.as_number(),
                            reference
                        ));
                        return Ok(());
                    }
                    "y position" => {
                        self.source.push_str(&format!(
                            "if ({}) {}.setXY({}.x, {});\n",
                            reference,
                            reference,
                            reference,
                            value.as_number()
                        ));
                        return Ok(());
                    }
                    "direction" => {
                        self.source.push_str(&format!(
                            "if ({}) {}.setDirection({});\n",
                            reference,
                            reference,
                            value.as_number()
                        ));
                        return Ok(());
                    }
                    "size" => {
                        self.source.push_str(&format!(
                            "if ({}) {}.setSize({});\n",
                            reference,
                            reference,
                            value.as_number()
                        ));
                        return Ok(());
                    }
                    _ => {}
                }
            }
            let variable = self.evaluate_once(&format!(
                "{} && {}.lookupVariableByNameAndType(\"{}\", \"\", true)",
                reference,
                reference,
                sanitize(property)
            ));
            self.source.push_str(&format!(
                "if ({}) {}.value = {};\n",
                variable,
                variable,
                value.as_safe()
            ));
            return Ok(());
        }
        self.source.push_str(&format!(
            "runtime.ext_scratch3_sensing.setAttributeOf({{OBJECT: {}, PROPERTY: \"{}\", VALUE: {}}});\n",
            object_string,
            sanitize(property),
            value.as_safe()
        ));
        Ok(())
    }

    fn assemble_factory(&mut self, pools: &mut NamePools) -> CompiledScript {
        let factory_name = pools.factory.next();
        let script_name = if self.script.yields {
            pools.generator.next()
        } else {
            pools.plain.next()
        };
        let mut script = String::new();
        script.push_str(&format!("(function {}(thread) {{\n", factory_name));
        script.push_str("const __target = thread.target;\n");
        script.push_str("let target = __target;\n");
        script.push_str("const runtime = __target.runtime;\n");
        script.push_str("const stage = runtime.getTargetForStage();\n");
        for (expression, name) in &self.setup_bindings {
            script.push_str(&format!("const {} = {};\n", name, expression));
        }
        script.push_str("return function");
        if self.script.yields {
            script.push('*');
        }
        script.push_str(&format!(" {}(", script_name));
        let parameters = (0..self.script.arguments.len())
            .map(|index| format!("p{}", index))
            .collect::<Vec<_>>()
            .join(",");
        script.push_str(&parameters);
        script.push_str(") {\n");
        script.push_str("target = __target;\n");
        script.push_str("if (thread.spoofing) {\ntarget = thread.spoofTarget;\n}\n");
        script.push_str(&self.source);
        if !self.script.is_procedure {
            script.push_str("retire();\n");
        }
        script.push_str("}; })");
        CompiledScript {
            factory_name,
            script_name,
            source: script,
        }
    }
}

/// A constant is equals-safe when it is a non-zero number whose own text
/// survives the numeric round trip, so `===` against it cannot disagree
/// with the runtime compare helper.
fn is_safe_constant_for_equals(value: &TypedValue) -> bool {
    match value.constant_literal() {
        Some(literal) => {
            let number = js_to_number(literal);
            if number == 0.0 || number.is_nan() {
                return false;
            }
            js_number_to_string(number) == js_value_to_string(literal)
        }
        None => false,
    }
}

fn constant_is_equals_safe(value: &TypedValue) -> bool {
    value.constant_literal().is_none() || is_safe_constant_for_equals(value)
}
