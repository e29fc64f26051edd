use crate::ir::ExtensionNode;
use crate::jsgen::ScriptCompiler;
use crate::value::TypedValue;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Lowers an extension expression node to a typed value. Implemented for
/// plain closures; the compiler handle exposes input descent, source
/// emission, setup-binding hoists and temporary names.
pub trait ExpressionTransformer: Send + Sync {
    fn transform(
        &self,
        node: &ExtensionNode,
        compiler: &mut ScriptCompiler<'_>,
    ) -> Result<TypedValue>;
}

impl<F> ExpressionTransformer for F
where
    F: Fn(&ExtensionNode, &mut ScriptCompiler<'_>) -> Result<TypedValue> + Send + Sync,
{
    fn transform(
        &self,
        node: &ExtensionNode,
        compiler: &mut ScriptCompiler<'_>,
    ) -> Result<TypedValue> {
        self(node, compiler)
    }
}

/// Lowers an extension statement node by appending to the emitted body.
pub trait StatementTransformer: Send + Sync {
    fn transform(&self, node: &ExtensionNode, compiler: &mut ScriptCompiler<'_>) -> Result<()>;
}

impl<F> StatementTransformer for F
where
    F: Fn(&ExtensionNode, &mut ScriptCompiler<'_>) -> Result<()> + Send + Sync,
{
    fn transform(&self, node: &ExtensionNode, compiler: &mut ScriptCompiler<'_>) -> Result<()> {
        self(node, compiler)
    }
}

/// Extension identifier -> block identifier -> transformer. Queried before
/// built-in dispatch. Mutation is only supported between compilations.
#[derive(Default, Clone)]
pub struct ExtensionRegistry {
    expressions: HashMap<String, HashMap<String, Arc<dyn ExpressionTransformer>>>,
    statements: HashMap<String, HashMap<String, Arc<dyn StatementTransformer>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_expression(
        &mut self,
        extension: &str,
        block: &str,
        transformer: impl ExpressionTransformer + 'static,
    ) {
        self.expressions
            .entry(extension.to_string())
            .or_default()
            .insert(block.to_string(), Arc::new(transformer));
    }

    pub fn register_statement(
        &mut self,
        extension: &str,
        block: &str,
        transformer: impl StatementTransformer + 'static,
    ) {
        self.statements
            .entry(extension.to_string())
            .or_default()
            .insert(block.to_string(), Arc::new(transformer));
    }

    pub fn has_extension(&self, extension: &str) -> bool {
        self.expressions.contains_key(extension) || self.statements.contains_key(extension)
    }

    pub fn expression(
        &self,
        extension: &str,
        block: &str,
    ) -> Option<Arc<dyn ExpressionTransformer>> {
        self.expressions.get(extension)?.get(block).cloned()
    }

    pub fn statement(&self, extension: &str, block: &str) -> Option<Arc<dyn StatementTransformer>> {
        self.statements.get(extension)?.get(block).cloned()
    }
}

/// What transformer authors get to build analyzable values with: the typed
/// value constructors and the type tag constants.
pub mod imports {
    pub use crate::value::{TypeTag, TypedValue};
}
