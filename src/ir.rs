use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableScope {
    Target,
    Stage,
}

#[derive(Debug, Clone)]
pub struct VariableRef {
    pub id: String,
    pub name: String,
    pub scope: VariableScope,
}

#[derive(Debug, Clone)]
pub struct ListRef {
    pub id: String,
    pub name: String,
    pub scope: VariableScope,
}

/// A block kind with no built-in lowering. The first dot-segment of `kind`
/// names the extension expected to provide a transformer.
#[derive(Debug, Clone)]
pub struct ExtensionNode {
    pub kind: String,
    pub inputs: BTreeMap<String, Expr>,
    pub fields: BTreeMap<String, Value>,
}

impl ExtensionNode {
    pub fn extension_id(&self) -> &str {
        match self.kind.split_once('.') {
            Some((extension, _)) => extension,
            None => &self.kind,
        }
    }

    pub fn block_id(&self) -> &str {
        match self.kind.split_once('.') {
            Some((_, block)) => block,
            None => "",
        }
    }
}

/// An uncompiled primitive routed through the runtime's compatibility
/// layer.
#[derive(Debug, Clone)]
pub struct CompatNode {
    pub opcode: String,
    pub inputs: BTreeMap<String, Expr>,
    pub fields: BTreeMap<String, String>,
    pub block_id: String,
}

#[derive(Debug, Clone)]
pub struct ProcedureCall {
    pub code: String,
    pub variant: String,
    pub arguments: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomMode {
    Ints,
    Floats,
    Dynamic,
}

#[derive(Debug, Clone)]
pub enum Expr {
    ArgBoolean { index: usize },
    ArgStringNumber { index: usize },
    Compat(CompatNode),
    Constant { value: Value },
    Polygon { points: Vec<(Expr, Expr)> },
    InlineStackOutput { stack: Vec<Stmt> },
    KeyPressed { key: Box<Expr> },
    ListContains { list: ListRef, item: Box<Expr> },
    ListContents { list: ListRef },
    ListGet { list: ListRef, index: Box<Expr> },
    ListIndexOf { list: ListRef, item: Box<Expr> },
    ListLength { list: ListRef },
    LooksSize,
    BackdropName,
    BackdropNumber,
    CostumeName,
    CostumeNumber,
    MotionDirection,
    MotionX,
    MotionY,
    MouseDown,
    MouseX,
    MouseY,
    Abs { value: Box<Expr> },
    Acos { value: Box<Expr> },
    Add { left: Box<Expr>, right: Box<Expr> },
    And { left: Box<Expr>, right: Box<Expr> },
    Asin { value: Box<Expr> },
    Atan { value: Box<Expr> },
    Ceiling { value: Box<Expr> },
    StringContains { string: Box<Expr>, contains: Box<Expr> },
    Cos { value: Box<Expr> },
    Divide { left: Box<Expr>, right: Box<Expr> },
    Equals { left: Box<Expr>, right: Box<Expr> },
    Exp { value: Box<Expr> },
    Floor { value: Box<Expr> },
    Greater { left: Box<Expr>, right: Box<Expr> },
    Join { left: Box<Expr>, right: Box<Expr> },
    LengthOf { string: Box<Expr> },
    Less { left: Box<Expr>, right: Box<Expr> },
    LetterOf { letter: Box<Expr>, string: Box<Expr> },
    Ln { value: Box<Expr> },
    Log { value: Box<Expr> },
    AdvLog { left: Box<Expr>, right: Box<Expr> },
    Mod { left: Box<Expr>, right: Box<Expr> },
    Multiply { left: Box<Expr>, right: Box<Expr> },
    Not { operand: Box<Expr> },
    Or { left: Box<Expr>, right: Box<Expr> },
    Random { low: Box<Expr>, high: Box<Expr>, mode: RandomMode },
    Round { value: Box<Expr> },
    Sin { value: Box<Expr> },
    Sqrt { value: Box<Expr> },
    Subtract { left: Box<Expr>, right: Box<Expr> },
    Tan { value: Box<Expr> },
    Pow10 { value: Box<Expr> },
    SensingAnswer,
    ColorTouchingColor { target_color: Box<Expr>, mask_color: Box<Expr> },
    CurrentDate,
    CurrentDayOfWeek,
    DaysSince2000,
    Distance { target: Box<Expr> },
    CurrentHour,
    CurrentMinute,
    CurrentMonth,
    SensingOf { object: Box<Expr>, property: String },
    CurrentSecond,
    Touching { object: Box<Expr> },
    TouchingColor { color: Box<Expr> },
    Username,
    CurrentYear,
    TimerGet,
    LastKeyPressed,
    VarGet { variable: VariableRef },
    ProcedureCall(ProcedureCall),
    BroadcastFunction { broadcast: Box<Expr> },
    Noop,
    Extension(ExtensionNode),
}

impl Expr {
    pub fn kind(&self) -> &str {
        match self {
            Expr::ArgBoolean { .. } => "args.boolean",
            Expr::ArgStringNumber { .. } => "args.stringNumber",
            Expr::Compat(_) => "compat",
            Expr::Constant { .. } => "constant",
            Expr::Polygon { .. } => "math.polygon",
            Expr::InlineStackOutput { .. } => "control.inlineStackOutput",
            Expr::KeyPressed { .. } => "keyboard.pressed",
            Expr::ListContains { .. } => "list.contains",
            Expr::ListContents { .. } => "list.contents",
            Expr::ListGet { .. } => "list.get",
            Expr::ListIndexOf { .. } => "list.indexOf",
            Expr::ListLength { .. } => "list.length",
            Expr::LooksSize => "looks.size",
            Expr::BackdropName => "looks.backdropName",
            Expr::BackdropNumber => "looks.backdropNumber",
            Expr::CostumeName => "looks.costumeName",
            Expr::CostumeNumber => "looks.costumeNumber",
            Expr::MotionDirection => "motion.direction",
            Expr::MotionX => "motion.x",
            Expr::MotionY => "motion.y",
            Expr::MouseDown => "mouse.down",
            Expr::MouseX => "mouse.x",
            Expr::MouseY => "mouse.y",
            Expr::Abs { .. } => "op.abs",
            Expr::Acos { .. } => "op.acos",
            Expr::Add { .. } => "op.add",
            Expr::And { .. } => "op.and",
            Expr::Asin { .. } => "op.asin",
            Expr::Atan { .. } => "op.atan",
            Expr::Ceiling { .. } => "op.ceiling",
            Expr::StringContains { .. } => "op.contains",
            Expr::Cos { .. } => "op.cos",
            Expr::Divide { .. } => "op.divide",
            Expr::Equals { .. } => "op.equals",
            Expr::Exp { .. } => "op.e^",
            Expr::Floor { .. } => "op.floor",
            Expr::Greater { .. } => "op.greater",
            Expr::Join { .. } => "op.join",
            Expr::LengthOf { .. } => "op.length",
            Expr::Less { .. } => "op.less",
            Expr::LetterOf { .. } => "op.letterOf",
            Expr::Ln { .. } => "op.ln",
            Expr::Log { .. } => "op.log",
            Expr::AdvLog { .. } => "op.advlog",
            Expr::Mod { .. } => "op.mod",
            Expr::Multiply { .. } => "op.multiply",
            Expr::Not { .. } => "op.not",
            Expr::Or { .. } => "op.or",
            Expr::Random { .. } => "op.random",
            Expr::Round { .. } => "op.round",
            Expr::Sin { .. } => "op.sin",
            Expr::Sqrt { .. } => "op.sqrt",
            Expr::Subtract { .. } => "op.subtract",
            Expr::Tan { .. } => "op.tan",
            Expr::Pow10 { .. } => "op.10^",
            Expr::SensingAnswer => "sensing.answer",
            Expr::ColorTouchingColor { .. } => "sensing.colorTouchingColor",
            Expr::CurrentDate => "sensing.date",
            Expr::CurrentDayOfWeek => "sensing.dayofweek",
            Expr::DaysSince2000 => "sensing.daysSince2000",
            Expr::Distance { .. } => "sensing.distance",
            Expr::CurrentHour => "sensing.hour",
            Expr::CurrentMinute => "sensing.minute",
            Expr::CurrentMonth => "sensing.month",
            Expr::SensingOf { .. } => "sensing.of",
            Expr::CurrentSecond => "sensing.second",
            Expr::Touching { .. } => "sensing.touching",
            Expr::TouchingColor { .. } => "sensing.touchingColor",
            Expr::Username => "sensing.username",
            Expr::CurrentYear => "sensing.year",
            Expr::TimerGet => "timer.get",
            Expr::LastKeyPressed => "tw.lastKeyPressed",
            Expr::VarGet { .. } => "var.get",
            Expr::ProcedureCall(_) => "procedures.call",
            Expr::BroadcastFunction { .. } => "pmEventsExpansion.broadcastFunction",
            Expr::Noop => "noop",
            Expr::Extension(node) => &node.kind,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    AddonCall { code: String, arguments: BTreeMap<String, Expr>, block_id: String },
    Compat(CompatNode),
    AllAtOnce { stack: Vec<Stmt> },
    CreateClone { target: Box<Expr> },
    DeleteClone,
    Switch { test: Box<Expr>, cases: Vec<Stmt> },
    Case { condition: Box<Expr>, stack: Vec<Stmt>, runs_next: bool },
    ExitCase,
    For { variable: VariableRef, count: Box<Expr>, stack: Vec<Stmt> },
    If { condition: Box<Expr>, when_true: Vec<Stmt>, when_false: Vec<Stmt> },
    NewScript { branch_id: String },
    Repeat { times: Box<Expr>, stack: Vec<Stmt> },
    StopAll,
    StopOthers,
    StopScript,
    Wait { seconds: Box<Expr> },
    WaitUntil { condition: Box<Expr> },
    WaitOrUntil { seconds: Box<Expr>, condition: Box<Expr> },
    While { condition: Box<Expr>, stack: Vec<Stmt> },
    RunAsSprite { sprite: Box<Expr>, stack: Vec<Stmt> },
    Broadcast { broadcast: Box<Expr> },
    BroadcastAndWait { broadcast: Box<Expr> },
    ListAdd { list: ListRef, item: Box<Expr> },
    ListDelete { list: ListRef, index: Box<Expr> },
    ListDeleteAll { list: ListRef },
    ListForEach { list: ListRef, variable: VariableRef, stack: Vec<Stmt> },
    ListHide { list: ListRef },
    ListInsert { list: ListRef, index: Box<Expr>, item: Box<Expr> },
    ListReplace { list: ListRef, index: Box<Expr>, item: Box<Expr> },
    ListShow { list: ListRef },
    LooksBackwardLayers { layers: Box<Expr> },
    LooksChangeEffect { effect: String, value: Box<Expr> },
    LooksChangeSize { size: Box<Expr> },
    LooksClearEffects,
    LooksForwardLayers { layers: Box<Expr> },
    LooksGoToBack,
    LooksGoToFront,
    LooksHide,
    LooksNextBackdrop,
    LooksNextCostume,
    LooksSetEffect { effect: String, value: Box<Expr> },
    LooksSetSize { size: Box<Expr> },
    LooksShow,
    LooksSwitchBackdrop { backdrop: Box<Expr> },
    LooksSwitchCostume { costume: Box<Expr> },
    MotionChangeX { dx: Box<Expr> },
    MotionChangeY { dy: Box<Expr> },
    MotionIfOnEdgeBounce,
    MotionSetDirection { direction: Box<Expr> },
    MotionSetRotationStyle { style: String },
    MotionSetX { x: Box<Expr> },
    MotionSetY { y: Box<Expr> },
    MotionSetXY { x: Box<Expr>, y: Box<Expr> },
    MotionStep { steps: Box<Expr> },
    PenClear,
    PenDown,
    PenUp,
    PenStamp,
    PenSetColor { color: Box<Expr> },
    PenChangeParam { param: Box<Expr>, value: Box<Expr> },
    PenSetParam { param: Box<Expr>, value: Box<Expr> },
    PenChangeSize { size: Box<Expr> },
    PenSetSize { size: Box<Expr> },
    PenLegacyChangeHue { hue: Box<Expr> },
    PenLegacySetHue { hue: Box<Expr> },
    PenLegacyChangeShade { shade: Box<Expr> },
    PenLegacySetShade { shade: Box<Expr> },
    ProcedureCall(ProcedureCall),
    ProcedureReturn { value: Box<Expr> },
    TimerReset,
    Debugger,
    VarHide { variable: VariableRef },
    VarSet { variable: VariableRef, value: Box<Expr> },
    VarShow { variable: VariableRef },
    VisualReport { input: Box<Expr> },
    SensingSetOf { object: Box<Expr>, property: String, value: Box<Expr> },
    Extension(ExtensionNode),
}

impl Stmt {
    pub fn kind(&self) -> &str {
        match self {
            Stmt::AddonCall { .. } => "addons.call",
            Stmt::Compat(_) => "compat",
            Stmt::AllAtOnce { .. } => "control.allAtOnce",
            Stmt::CreateClone { .. } => "control.createClone",
            Stmt::DeleteClone => "control.deleteClone",
            Stmt::Switch { .. } => "control.switch",
            Stmt::Case { .. } => "control.case",
            Stmt::ExitCase => "control.exitCase",
            Stmt::For { .. } => "control.for",
            Stmt::If { .. } => "control.if",
            Stmt::NewScript { .. } => "control.newScript",
            Stmt::Repeat { .. } => "control.repeat",
            Stmt::StopAll => "control.stopAll",
            Stmt::StopOthers => "control.stopOthers",
            Stmt::StopScript => "control.stopScript",
            Stmt::Wait { .. } => "control.wait",
            Stmt::WaitUntil { .. } => "control.waitUntil",
            Stmt::WaitOrUntil { .. } => "control.waitOrUntil",
            Stmt::While { .. } => "control.while",
            Stmt::RunAsSprite { .. } => "control.runAsSprite",
            Stmt::Broadcast { .. } => "event.broadcast",
            Stmt::BroadcastAndWait { .. } => "event.broadcastAndWait",
            Stmt::ListAdd { .. } => "list.add",
            Stmt::ListDelete { .. } => "list.delete",
            Stmt::ListDeleteAll { .. } => "list.deleteAll",
            Stmt::ListForEach { .. } => "list.forEach",
            Stmt::ListHide { .. } => "list.hide",
            Stmt::ListInsert { .. } => "list.insert",
            Stmt::ListReplace { .. } => "list.replace",
            Stmt::ListShow { .. } => "list.show",
            Stmt::LooksBackwardLayers { .. } => "looks.backwardLayers",
            Stmt::LooksChangeEffect { .. } => "looks.changeEffect",
            Stmt::LooksChangeSize { .. } => "looks.changeSize",
            Stmt::LooksClearEffects => "looks.clearEffects",
            Stmt::LooksForwardLayers { .. } => "looks.forwardLayers",
            Stmt::LooksGoToBack => "looks.goToBack",
            Stmt::LooksGoToFront => "looks.goToFront",
            Stmt::LooksHide => "looks.hide",
            Stmt::LooksNextBackdrop => "looks.nextBackdrop",
            Stmt::LooksNextCostume => "looks.nextCostume",
            Stmt::LooksSetEffect { .. } => "looks.setEffect",
            Stmt::LooksSetSize { .. } => "looks.setSize",
            Stmt::LooksShow => "looks.show",
            Stmt::LooksSwitchBackdrop { .. } => "looks.switchBackdrop",
            Stmt::LooksSwitchCostume { .. } => "looks.switchCostume",
            Stmt::MotionChangeX { .. } => "motion.changeX",
            Stmt::MotionChangeY { .. } => "motion.changeY",
            Stmt::MotionIfOnEdgeBounce => "motion.ifOnEdgeBounce",
            Stmt::MotionSetDirection { .. } => "motion.setDirection",
            Stmt::MotionSetRotationStyle { .. } => "motion.setRotationStyle",
            Stmt::MotionSetX { .. } => "motion.setX",
            Stmt::MotionSetY { .. } => "motion.setY",
            Stmt::MotionSetXY { .. } => "motion.setXY",
            Stmt::MotionStep { .. } => "motion.step",
            Stmt::PenClear => "pen.clear",
            Stmt::PenDown => "pen.down",
            Stmt::PenUp => "pen.up",
            Stmt::PenStamp => "pen.stamp",
            Stmt::PenSetColor { .. } => "pen.setColor",
            Stmt::PenChangeParam { .. } => "pen.changeParam",
            Stmt::PenSetParam { .. } => "pen.setParam",
            Stmt::PenChangeSize { .. } => "pen.changeSize",
            Stmt::PenSetSize { .. } => "pen.setSize",
            Stmt::PenLegacyChangeHue { .. } => "pen.legacyChangeHue",
            Stmt::PenLegacySetHue { .. } => "pen.legacySetHue",
            Stmt::PenLegacyChangeShade { .. } => "pen.legacyChangeShade",
            Stmt::PenLegacySetShade { .. } => "pen.legacySetShade",
            Stmt::ProcedureCall(_) => "procedures.call",
            Stmt::ProcedureReturn { .. } => "procedures.return",
            Stmt::TimerReset => "timer.reset",
            Stmt::Debugger => "tw.debugger",
            Stmt::VarHide { .. } => "var.hide",
            Stmt::VarSet { .. } => "var.set",
            Stmt::VarShow { .. } => "var.show",
            Stmt::VisualReport { .. } => "visualReport",
            Stmt::SensingSetOf { .. } => "sensing.set.of",
            Stmt::Extension(node) => &node.kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcedureInfo {
    pub code: String,
    pub yields: bool,
    pub arguments: Vec<String>,
    pub has_stack: bool,
}

/// One script's worth of IR plus the header flags the lowerers consult.
#[derive(Debug, Clone)]
pub struct Script {
    pub stack: Vec<Stmt>,
    pub is_warp: bool,
    pub is_procedure: bool,
    pub yields: bool,
    pub warp_timer: bool,
    pub arguments: Vec<String>,
    pub procedure_code: Option<String>,
    pub top_block_id: String,
    pub procedures: HashMap<String, ProcedureInfo>,
}

impl Script {
    pub fn new(stack: Vec<Stmt>) -> Self {
        Self {
            stack,
            is_warp: false,
            is_procedure: false,
            yields: false,
            warp_timer: false,
            arguments: Vec::new(),
            procedure_code: None,
            top_block_id: String::new(),
            procedures: HashMap::new(),
        }
    }
}
