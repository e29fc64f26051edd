pub mod extensions;
pub mod interpolate;
pub mod ir;
pub mod jsgen;
pub mod load;
pub mod names;
pub mod value;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

#[cfg(all(target_arch = "wasm32", feature = "wasm-bindings"))]
pub mod wasm;

#[cfg(test)]
mod tests;

use anyhow::Result;
use extensions::ExtensionRegistry;
use names::NamePools;

pub use jsgen::{CompileContext, CompiledScript, Environment};

/// Per-process compiler service: owns the durable name pools and the
/// extension registry, and carries the evaluator environment.
pub struct Compiler {
    environment: Environment,
    pools: NamePools,
    extensions: ExtensionRegistry,
}

impl Compiler {
    pub fn new() -> Self {
        Self::with_environment(Environment::default())
    }

    pub fn with_environment(environment: Environment) -> Self {
        Self {
            environment,
            pools: NamePools::new(),
            extensions: ExtensionRegistry::new(),
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn extensions_mut(&mut self) -> &mut ExtensionRegistry {
        &mut self.extensions
    }

    /// Restarts factory and script naming from zero, for deterministic
    /// output across runs.
    pub fn reset_names(&mut self) {
        self.pools.reset();
    }

    pub fn compile(
        &mut self,
        script: &ir::Script,
        context: &CompileContext,
    ) -> Result<CompiledScript> {
        jsgen::compile_script(
            script,
            context,
            self.environment,
            &mut self.pools,
            &self.extensions,
        )
    }

    pub fn compile_request_str(&mut self, text: &str) -> Result<CompiledScript> {
        let request = load::parse_request_str(text)?;
        self.compile(&request.script, &request.context)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn run_cli(args: &cli::Args) -> Result<()> {
    let text = std::fs::read_to_string(&args.input)
        .map_err(|e| anyhow::anyhow!("Failed to read '{}': {}.", args.input.display(), e))?;
    let environment = Environment {
        supports_nullish_coalescing: !args.no_nullish,
        debug: args.debug_emit,
    };
    let mut compiler = Compiler::with_environment(environment);
    let compiled = compiler.compile_request_str(&text)?;
    match &args.output {
        Some(output) => std::fs::write(output, compiled.source.as_bytes())?,
        None => println!("{}", compiled.source),
    }
    Ok(())
}
