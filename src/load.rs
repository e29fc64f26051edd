use crate::ir::{
    CompatNode, Expr, ExtensionNode, ListRef, ProcedureCall, ProcedureInfo, RandomMode, Script,
    Stmt, VariableRef, VariableScope,
};
use crate::jsgen::CompileContext;
use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub script: Script,
    pub context: CompileContext,
}

pub fn parse_request_str(text: &str) -> Result<CompileRequest> {
    let json: Value = serde_json::from_str(text)?;
    parse_request(&json)
}

pub fn parse_request(json: &Value) -> Result<CompileRequest> {
    let script = parse_script(json)?;
    let mut context = CompileContext::default();
    if let Some(names) = json.get("costumeAndSoundNames") {
        let names = names
            .as_array()
            .ok_or_else(|| anyhow!("'costumeAndSoundNames' must be an array."))?;
        for name in names {
            let name = name
                .as_str()
                .ok_or_else(|| anyhow!("'costumeAndSoundNames' entries must be strings."))?;
            context.costume_and_sound_names.insert(name.to_string());
        }
    }
    Ok(CompileRequest { script, context })
}

pub fn parse_script(json: &Value) -> Result<Script> {
    let stack = parse_statements(
        json.get("stack")
            .ok_or_else(|| anyhow!("Script is missing its 'stack'."))?,
    )?;
    let mut script = Script::new(stack);
    script.is_warp = bool_at(json, "isWarp");
    script.is_procedure = bool_at(json, "isProcedure");
    script.yields = bool_at(json, "yields");
    script.warp_timer = bool_at(json, "warpTimer");
    if let Some(arguments) = json.get("arguments") {
        script.arguments = string_array(arguments, "arguments")?;
    }
    script.procedure_code = json
        .get("procedureCode")
        .and_then(Value::as_str)
        .map(str::to_string);
    script.top_block_id = json
        .get("topBlockId")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if let Some(procedures) = json.get("procedures") {
        let procedures = procedures
            .as_object()
            .ok_or_else(|| anyhow!("'procedures' must be an object."))?;
        let mut table = HashMap::new();
        for (variant, info) in procedures {
            table.insert(variant.clone(), parse_procedure_info(variant, info)?);
        }
        script.procedures = table;
    }
    Ok(script)
}

fn parse_procedure_info(variant: &str, json: &Value) -> Result<ProcedureInfo> {
    let code = json
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or(variant)
        .to_string();
    let arguments = match json.get("arguments") {
        Some(arguments) => string_array(arguments, "arguments")?,
        None => Vec::new(),
    };
    Ok(ProcedureInfo {
        code,
        yields: bool_at(json, "yields"),
        arguments,
        has_stack: json
            .get("hasStack")
            .and_then(Value::as_bool)
            .unwrap_or(true),
    })
}

pub fn parse_statements(json: &Value) -> Result<Vec<Stmt>> {
    let nodes = json
        .as_array()
        .ok_or_else(|| anyhow!("A statement stack must be an array."))?;
    nodes.iter().map(parse_statement).collect()
}

pub fn parse_statement(json: &Value) -> Result<Stmt> {
    let kind = kind_of(json)?;
    let stmt = match kind {
        "addons.call" => Stmt::AddonCall {
            code: string_field(json, kind, "code")?,
            arguments: expr_record(json, kind, "arguments")?,
            block_id: string_field(json, kind, "blockId")?,
        },
        "compat" => Stmt::Compat(parse_compat(json, kind)?),
        "control.allAtOnce" => Stmt::AllAtOnce {
            stack: stack_field(json, kind, "do")?,
        },
        "control.createClone" => Stmt::CreateClone {
            target: boxed_expr(json, kind, "target")?,
        },
        "control.deleteClone" => Stmt::DeleteClone,
        "control.switch" => Stmt::Switch {
            test: boxed_expr(json, kind, "test")?,
            cases: stack_field(json, kind, "conditions")?,
        },
        "control.case" => Stmt::Case {
            condition: boxed_expr(json, kind, "condition")?,
            stack: opt_stack_field(json, "code")?,
            runs_next: bool_at(json, "runsNext"),
        },
        "control.exitCase" => Stmt::ExitCase,
        "control.for" => Stmt::For {
            variable: variable_field(json, kind, "variable")?,
            count: boxed_expr(json, kind, "count")?,
            stack: stack_field(json, kind, "do")?,
        },
        "control.if" => Stmt::If {
            condition: boxed_expr(json, kind, "condition")?,
            when_true: stack_field(json, kind, "whenTrue")?,
            when_false: opt_stack_field(json, "whenFalse")?,
        },
        "control.newScript" => Stmt::NewScript {
            branch_id: string_field(json, kind, "branchId")?,
        },
        "control.repeat" => Stmt::Repeat {
            times: boxed_expr(json, kind, "times")?,
            stack: stack_field(json, kind, "do")?,
        },
        "control.stopAll" => Stmt::StopAll,
        "control.stopOthers" => Stmt::StopOthers,
        "control.stopScript" => Stmt::StopScript,
        "control.wait" => Stmt::Wait {
            seconds: boxed_expr(json, kind, "seconds")?,
        },
        "control.waitUntil" => Stmt::WaitUntil {
            condition: boxed_expr(json, kind, "condition")?,
        },
        "control.waitOrUntil" => Stmt::WaitOrUntil {
            seconds: boxed_expr(json, kind, "seconds")?,
            condition: boxed_expr(json, kind, "condition")?,
        },
        "control.while" => Stmt::While {
            condition: boxed_expr(json, kind, "condition")?,
            stack: stack_field(json, kind, "do")?,
        },
        "control.runAsSprite" => Stmt::RunAsSprite {
            sprite: boxed_expr(json, kind, "sprite")?,
            stack: stack_field(json, kind, "do")?,
        },
        "event.broadcast" => Stmt::Broadcast {
            broadcast: boxed_expr(json, kind, "broadcast")?,
        },
        "event.broadcastAndWait" => Stmt::BroadcastAndWait {
            broadcast: boxed_expr(json, kind, "broadcast")?,
        },
        "list.add" => Stmt::ListAdd {
            list: list_field(json, kind)?,
            item: boxed_expr(json, kind, "item")?,
        },
        "list.delete" => Stmt::ListDelete {
            list: list_field(json, kind)?,
            index: boxed_expr(json, kind, "index")?,
        },
        "list.deleteAll" => Stmt::ListDeleteAll {
            list: list_field(json, kind)?,
        },
        "list.forEach" => Stmt::ListForEach {
            list: list_field(json, kind)?,
            variable: variable_field(json, kind, "variable")?,
            stack: stack_field(json, kind, "do")?,
        },
        "list.hide" => Stmt::ListHide {
            list: list_field(json, kind)?,
        },
        "list.insert" => Stmt::ListInsert {
            list: list_field(json, kind)?,
            index: boxed_expr(json, kind, "index")?,
            item: boxed_expr(json, kind, "item")?,
        },
        "list.replace" => Stmt::ListReplace {
            list: list_field(json, kind)?,
            index: boxed_expr(json, kind, "index")?,
            item: boxed_expr(json, kind, "item")?,
        },
        "list.show" => Stmt::ListShow {
            list: list_field(json, kind)?,
        },
        "looks.backwardLayers" => Stmt::LooksBackwardLayers {
            layers: boxed_expr(json, kind, "layers")?,
        },
        "looks.changeEffect" => Stmt::LooksChangeEffect {
            effect: string_field(json, kind, "effect")?,
            value: boxed_expr(json, kind, "value")?,
        },
        "looks.changeSize" => Stmt::LooksChangeSize {
            size: boxed_expr(json, kind, "size")?,
        },
        "looks.clearEffects" => Stmt::LooksClearEffects,
        "looks.forwardLayers" => Stmt::LooksForwardLayers {
            layers: boxed_expr(json, kind, "layers")?,
        },
        "looks.goToBack" => Stmt::LooksGoToBack,
        "looks.goToFront" => Stmt::LooksGoToFront,
        "looks.hide" => Stmt::LooksHide,
        "looks.nextBackdrop" => Stmt::LooksNextBackdrop,
        "looks.nextCostume" => Stmt::LooksNextCostume,
        "looks.setEffect" => Stmt::LooksSetEffect {
            effect: string_field(json, kind, "effect")?,
            value: boxed_expr(json, kind, "value")?,
        },
        "looks.setSize" => Stmt::LooksSetSize {
            size: boxed_expr(json, kind, "size")?,
        },
        "looks.show" => Stmt::LooksShow,
        "looks.switchBackdrop" => Stmt::LooksSwitchBackdrop {
            backdrop: boxed_expr(json, kind, "backdrop")?,
        },
        "looks.switchCostume" => Stmt::LooksSwitchCostume {
            costume: boxed_expr(json, kind, "costume")?,
        },
        "motion.changeX" => Stmt::MotionChangeX {
            dx: boxed_expr(json, kind, "dx")?,
        },
        "motion.changeY" => Stmt::MotionChangeY {
            dy: boxed_expr(json, kind, "dy")?,
        },
        "motion.ifOnEdgeBounce" => Stmt::MotionIfOnEdgeBounce,
        "motion.setDirection" => Stmt::MotionSetDirection {
            direction: boxed_expr(json, kind, "direction")?,
        },
        "motion.setRotationStyle" => Stmt::MotionSetRotationStyle {
            style: string_field(json, kind, "style")?,
        },
        "motion.setX" => Stmt::MotionSetX {
            x: boxed_expr(json, kind, "x")?,
        },
        "motion.setY" => Stmt::MotionSetY {
            y: boxed_expr(json, kind, "y")?,
        },
        "motion.setXY" => Stmt::MotionSetXY {
            x: boxed_expr(json, kind, "x")?,
            y: boxed_expr(json, kind, "y")?,
        },
        "motion.step" => Stmt::MotionStep {
            steps: boxed_expr(json, kind, "steps")?,
        },
        "pen.clear" => Stmt::PenClear,
        "pen.down" => Stmt::PenDown,
        "pen.up" => Stmt::PenUp,
        "pen.stamp" => Stmt::PenStamp,
        "pen.setColor" => Stmt::PenSetColor {
            color: boxed_expr(json, kind, "color")?,
        },
        "pen.changeParam" => Stmt::PenChangeParam {
            param: boxed_expr(json, kind, "param")?,
            value: boxed_expr(json, kind, "value")?,
        },
        "pen.setParam" => Stmt::PenSetParam {
            param: boxed_expr(json, kind, "param")?,
            value: boxed_expr(json, kind, "value")?,
        },
        "pen.changeSize" => Stmt::PenChangeSize {
            size: boxed_expr(json, kind, "size")?,
        },
        "pen.setSize" => Stmt::PenSetSize {
            size: boxed_expr(json, kind, "size")?,
        },
        "pen.legacyChangeHue" => Stmt::PenLegacyChangeHue {
            hue: boxed_expr(json, kind, "hue")?,
        },
        "pen.legacySetHue" => Stmt::PenLegacySetHue {
            hue: boxed_expr(json, kind, "hue")?,
        },
        "pen.legacyChangeShade" => Stmt::PenLegacyChangeShade {
            shade: boxed_expr(json, kind, "shade")?,
        },
        "pen.legacySetShade" => Stmt::PenLegacySetShade {
            shade: boxed_expr(json, kind, "shade")?,
        },
        "procedures.call" => Stmt::ProcedureCall(parse_procedure_call(json, kind)?),
        "procedures.return" => Stmt::ProcedureReturn {
            value: boxed_expr(json, kind, "value")?,
        },
        "timer.reset" => Stmt::TimerReset,
        "tw.debugger" => Stmt::Debugger,
        "var.hide" => Stmt::VarHide {
            variable: variable_field(json, kind, "variable")?,
        },
        "var.set" => Stmt::VarSet {
            variable: variable_field(json, kind, "variable")?,
            value: boxed_expr(json, kind, "value")?,
        },
        "var.show" => Stmt::VarShow {
            variable: variable_field(json, kind, "variable")?,
        },
        "visualReport" => Stmt::VisualReport {
            input: boxed_expr(json, kind, "input")?,
        },
        "sensing.set.of" => Stmt::SensingSetOf {
            object: boxed_expr(json, kind, "object")?,
            property: string_field(json, kind, "property")?,
            value: boxed_expr(json, kind, "value")?,
        },
        other if other.contains('.') => Stmt::Extension(parse_extension(json, other)?),
        other => bail!("Unknown statement kind '{}'.", other),
    };
    Ok(stmt)
}

pub fn parse_expression(json: &Value) -> Result<Expr> {
    // Bare scalars are constant shorthand.
    match json {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
            return Ok(Expr::Constant {
                value: json.clone(),
            })
        }
        _ => {}
    }
    let kind = kind_of(json)?;
    let expr = match kind {
        "args.boolean" => Expr::ArgBoolean {
            index: index_field(json, kind)?,
        },
        "args.stringNumber" => Expr::ArgStringNumber {
            index: index_field(json, kind)?,
        },
        "compat" => Expr::Compat(parse_compat(json, kind)?),
        "constant" => Expr::Constant {
            value: json
                .get("value")
                .cloned()
                .ok_or_else(|| anyhow!("Missing 'value' on 'constant' node."))?,
        },
        "math.polygon" => {
            let points = json
                .get("points")
                .and_then(Value::as_array)
                .ok_or_else(|| anyhow!("Missing 'points' on 'math.polygon' node."))?;
            let mut parsed = Vec::with_capacity(points.len());
            for point in points {
                parsed.push((
                    expr_field(point, kind, "x")?,
                    expr_field(point, kind, "y")?,
                ));
            }
            Expr::Polygon { points: parsed }
        }
        "control.inlineStackOutput" => Expr::InlineStackOutput {
            stack: stack_field(json, kind, "code")?,
        },
        "keyboard.pressed" => Expr::KeyPressed {
            key: boxed_expr(json, kind, "key")?,
        },
        "list.contains" => Expr::ListContains {
            list: list_field(json, kind)?,
            item: boxed_expr(json, kind, "item")?,
        },
        "list.contents" => Expr::ListContents {
            list: list_field(json, kind)?,
        },
        "list.get" => Expr::ListGet {
            list: list_field(json, kind)?,
            index: boxed_expr(json, kind, "index")?,
        },
        "list.indexOf" => Expr::ListIndexOf {
            list: list_field(json, kind)?,
            item: boxed_expr(json, kind, "item")?,
        },
        "list.length" => Expr::ListLength {
            list: list_field(json, kind)?,
        },
        "looks.size" => Expr::LooksSize,
        "looks.backdropName" => Expr::BackdropName,
        "looks.backdropNumber" => Expr::BackdropNumber,
        "looks.costumeName" => Expr::CostumeName,
        "looks.costumeNumber" => Expr::CostumeNumber,
        "motion.direction" => Expr::MotionDirection,
        "motion.x" => Expr::MotionX,
        "motion.y" => Expr::MotionY,
        "mouse.down" => Expr::MouseDown,
        "mouse.x" => Expr::MouseX,
        "mouse.y" => Expr::MouseY,
        "op.abs" => Expr::Abs {
            value: boxed_expr(json, kind, "value")?,
        },
        "op.acos" => Expr::Acos {
            value: boxed_expr(json, kind, "value")?,
        },
        "op.add" => Expr::Add {
            left: boxed_expr(json, kind, "left")?,
            right: boxed_expr(json, kind, "right")?,
        },
        "op.and" => Expr::And {
            left: boxed_expr(json, kind, "left")?,
            right: boxed_expr(json, kind, "right")?,
        },
        "op.asin" => Expr::Asin {
            value: boxed_expr(json, kind, "value")?,
        },
        "op.atan" => Expr::Atan {
            value: boxed_expr(json, kind, "value")?,
        },
        "op.ceiling" => Expr::Ceiling {
            value: boxed_expr(json, kind, "value")?,
        },
        "op.contains" => Expr::StringContains {
            string: boxed_expr(json, kind, "string")?,
            contains: boxed_expr(json, kind, "contains")?,
        },
        "op.cos" => Expr::Cos {
            value: boxed_expr(json, kind, "value")?,
        },
        "op.divide" => Expr::Divide {
            left: boxed_expr(json, kind, "left")?,
            right: boxed_expr(json, kind, "right")?,
        },
        "op.equals" => Expr::Equals {
            left: boxed_expr(json, kind, "left")?,
            right: boxed_expr(json, kind, "right")?,
        },
        "op.e^" => Expr::Exp {
            value: boxed_expr(json, kind, "value")?,
        },
        "op.floor" => Expr::Floor {
            value: boxed_expr(json, kind, "value")?,
        },
        "op.greater" => Expr::Greater {
            left: boxed_expr(json, kind, "left")?,
            right: boxed_expr(json, kind, "right")?,
        },
        "op.join" => Expr::Join {
            left: boxed_expr(json, kind, "left")?,
            right: boxed_expr(json, kind, "right")?,
        },
        "op.length" => Expr::LengthOf {
            string: boxed_expr(json, kind, "string")?,
        },
        "op.less" => Expr::Less {
            left: boxed_expr(json, kind, "left")?,
            right: boxed_expr(json, kind, "right")?,
        },
        "op.letterOf" => Expr::LetterOf {
            letter: boxed_expr(json, kind, "letter")?,
            string: boxed_expr(json, kind, "string")?,
        },
        "op.ln" => Expr::Ln {
            value: boxed_expr(json, kind, "value")?,
        },
        "op.log" => Expr::Log {
            value: boxed_expr(json, kind, "value")?,
        },
        "op.advlog" => Expr::AdvLog {
            left: boxed_expr(json, kind, "left")?,
            right: boxed_expr(json, kind, "right")?,
        },
        "op.mod" => Expr::Mod {
            left: boxed_expr(json, kind, "left")?,
            right: boxed_expr(json, kind, "right")?,
        },
        "op.multiply" => Expr::Multiply {
            left: boxed_expr(json, kind, "left")?,
            right: boxed_expr(json, kind, "right")?,
        },
        "op.not" => Expr::Not {
            operand: boxed_expr(json, kind, "operand")?,
        },
        "op.or" => Expr::Or {
            left: boxed_expr(json, kind, "left")?,
            right: boxed_expr(json, kind, "right")?,
        },
        "op.random" => Expr::Random {
            low: boxed_expr(json, kind, "low")?,
            high: boxed_expr(json, kind, "high")?,
            mode: match json.get("mode").and_then(Value::as_str) {
                Some("ints") => RandomMode::Ints,
                Some("floats") => RandomMode::Floats,
                _ => RandomMode::Dynamic,
            },
        },
        "op.round" => Expr::Round {
            value: boxed_expr(json, kind, "value")?,
        },
        "op.sin" => Expr::Sin {
            value: boxed_expr(json, kind, "value")?,
        },
        "op.sqrt" => Expr::Sqrt {
            value: boxed_expr(json, kind, "value")?,
        },
        "op.subtract" => Expr::Subtract {
            left: boxed_expr(json, kind, "left")?,
            right: boxed_expr(json, kind, "right")?,
        },
        "op.tan" => Expr::Tan {
            value: boxed_expr(json, kind, "value")?,
        },
        "op.10^" => Expr::Pow10 {
            value: boxed_expr(json, kind, "value")?,
        },
        "sensing.answer" => Expr::SensingAnswer,
        "sensing.colorTouchingColor" => Expr::ColorTouchingColor {
            target_color: boxed_expr(json, kind, "targetColor")?,
            mask_color: boxed_expr(json, kind, "maskColor")?,
        },
        "sensing.date" => Expr::CurrentDate,
        "sensing.dayofweek" => Expr::CurrentDayOfWeek,
        "sensing.daysSince2000" => Expr::DaysSince2000,
        "sensing.distance" => Expr::Distance {
            target: boxed_expr(json, kind, "target")?,
        },
        "sensing.hour" => Expr::CurrentHour,
        "sensing.minute" => Expr::CurrentMinute,
        "sensing.month" => Expr::CurrentMonth,
        "sensing.of" => Expr::SensingOf {
            object: boxed_expr(json, kind, "object")?,
            property: string_field(json, kind, "property")?,
        },
        "sensing.second" => Expr::CurrentSecond,
        "sensing.touching" => Expr::Touching {
            object: boxed_expr(json, kind, "object")?,
        },
        "sensing.touchingColor" => Expr::TouchingColor {
            color: boxed_expr(json, kind, "color")?,
        },
        "sensing.username" => Expr::Username,
        "sensing.year" => Expr::CurrentYear,
        "timer.get" => Expr::TimerGet,
        "tw.lastKeyPressed" => Expr::LastKeyPressed,
        "var.get" => Expr::VarGet {
            variable: variable_field(json, kind, "variable")?,
        },
        "procedures.call" => Expr::ProcedureCall(parse_procedure_call(json, kind)?),
        "pmEventsExpansion.broadcastFunction" => Expr::BroadcastFunction {
            broadcast: boxed_expr(json, kind, "broadcast")?,
        },
        "noop" => Expr::Noop,
        other if other.contains('.') => Expr::Extension(parse_extension(json, other)?),
        other => bail!("Unknown expression kind '{}'.", other),
    };
    Ok(expr)
}

fn parse_compat(json: &Value, kind: &str) -> Result<CompatNode> {
    let mut fields = BTreeMap::new();
    if let Some(raw) = json.get("fields") {
        let raw = raw
            .as_object()
            .ok_or_else(|| anyhow!("'fields' on '{}' node must be an object.", kind))?;
        for (name, value) in raw {
            let value = value
                .as_str()
                .ok_or_else(|| anyhow!("Field '{}' on '{}' node must be a string.", name, kind))?;
            fields.insert(name.clone(), value.to_string());
        }
    }
    Ok(CompatNode {
        opcode: string_field(json, kind, "opcode")?,
        inputs: match json.get("inputs") {
            Some(inputs) => parse_expr_record(inputs, kind)?,
            None => BTreeMap::new(),
        },
        fields,
        block_id: json
            .get("blockId")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
    })
}

fn parse_extension(json: &Value, kind: &str) -> Result<ExtensionNode> {
    let inputs = match json.get("inputs") {
        Some(inputs) => parse_expr_record(inputs, kind)?,
        None => BTreeMap::new(),
    };
    let mut fields = BTreeMap::new();
    if let Some(raw) = json.get("fields") {
        let raw = raw
            .as_object()
            .ok_or_else(|| anyhow!("'fields' on '{}' node must be an object.", kind))?;
        for (name, value) in raw {
            fields.insert(name.clone(), value.clone());
        }
    }
    Ok(ExtensionNode {
        kind: kind.to_string(),
        inputs,
        fields,
    })
}

fn parse_procedure_call(json: &Value, kind: &str) -> Result<ProcedureCall> {
    let arguments = match json.get("arguments") {
        Some(arguments) => {
            let arguments = arguments
                .as_array()
                .ok_or_else(|| anyhow!("'arguments' on '{}' node must be an array.", kind))?;
            arguments
                .iter()
                .map(parse_expression)
                .collect::<Result<Vec<_>>>()?
        }
        None => Vec::new(),
    };
    Ok(ProcedureCall {
        code: string_field(json, kind, "code")?,
        variant: string_field(json, kind, "variant")?,
        arguments,
    })
}

fn parse_expr_record(json: &Value, kind: &str) -> Result<BTreeMap<String, Expr>> {
    let record = json
        .as_object()
        .ok_or_else(|| anyhow!("'inputs' on '{}' node must be an object.", kind))?;
    let mut out = BTreeMap::new();
    for (name, value) in record {
        out.insert(name.clone(), parse_expression(value)?);
    }
    Ok(out)
}

fn kind_of(json: &Value) -> Result<&str> {
    json.get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("IR node is missing its 'kind' tag."))
}

fn field<'v>(json: &'v Value, kind: &str, key: &str) -> Result<&'v Value> {
    json.get(key)
        .ok_or_else(|| anyhow!("Missing '{}' on '{}' node.", key, kind))
}

fn expr_field(json: &Value, kind: &str, key: &str) -> Result<Expr> {
    parse_expression(field(json, kind, key)?)
}

fn boxed_expr(json: &Value, kind: &str, key: &str) -> Result<Box<Expr>> {
    Ok(Box::new(expr_field(json, kind, key)?))
}

fn expr_record(json: &Value, kind: &str, key: &str) -> Result<BTreeMap<String, Expr>> {
    parse_expr_record(field(json, kind, key)?, kind)
}

fn stack_field(json: &Value, kind: &str, key: &str) -> Result<Vec<Stmt>> {
    parse_statements(field(json, kind, key)?)
}

fn opt_stack_field(json: &Value, key: &str) -> Result<Vec<Stmt>> {
    match json.get(key) {
        Some(stack) => parse_statements(stack),
        None => Ok(Vec::new()),
    }
}

fn string_field(json: &Value, kind: &str, key: &str) -> Result<String> {
    field(json, kind, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("'{}' on '{}' node must be a string.", key, kind))
}

fn bool_at(json: &Value, key: &str) -> bool {
    json.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn index_field(json: &Value, kind: &str) -> Result<usize> {
    field(json, kind, "index")?
        .as_u64()
        .map(|index| index as usize)
        .ok_or_else(|| anyhow!("'index' on '{}' node must be a non-negative integer.", kind))
}

fn variable_field(json: &Value, kind: &str, key: &str) -> Result<VariableRef> {
    let node = field(json, kind, key)?;
    Ok(VariableRef {
        id: string_field(node, kind, "id")?,
        name: node
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        scope: parse_scope(node),
    })
}

fn list_field(json: &Value, kind: &str) -> Result<ListRef> {
    let node = field(json, kind, "list")?;
    Ok(ListRef {
        id: string_field(node, kind, "id")?,
        name: node
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        scope: parse_scope(node),
    })
}

fn parse_scope(node: &Value) -> VariableScope {
    match node.get("scope").and_then(Value::as_str) {
        Some("stage") => VariableScope::Stage,
        _ => VariableScope::Target,
    }
}

fn string_array(json: &Value, key: &str) -> Result<Vec<String>> {
    let array = json
        .as_array()
        .ok_or_else(|| anyhow!("'{}' must be an array.", key))?;
    array
        .iter()
        .map(|value| {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("'{}' entries must be strings.", key))
        })
        .collect()
}
