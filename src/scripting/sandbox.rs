//! Tiered Rhai engines and the supervised script worker.

use super::api::{self, ScriptApi};
use super::deadline::Deadline;
use super::stats;
use super::SandboxMode;
use crate::error::{AppResult, DaqError};
use rhai::module_resolvers::{DummyModuleResolver, FileModuleResolver};
use rhai::packages::{
    BasicArrayPackage, BasicMapPackage, BasicMathPackage, CorePackage, MoreStringPackage, Package,
};
use rhai::{Array, CallFnOptions, Dynamic, Engine, EvalAltResult, ParseError, Scope, AST};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn, Span};

/// Entry points tried after the script body, in order.
pub const ENTRY_POINTS: [&str; 2] = ["sequence", "main"];

/// Default wall-clock budget for one script.
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Expression nesting limits (global, inside functions), identical in debug and release builds.
pub const MAX_EXPR_DEPTHS: (usize, usize) = (64, 32);

/// Restricted tier: core language, strings, arrays, maps. No imports, no `eval`.
pub fn restricted_engine() -> Engine {
    let mut engine = Engine::new_raw();
    engine.register_global_module(CorePackage::new().as_shared_module());
    engine.register_global_module(MoreStringPackage::new().as_shared_module());
    engine.register_global_module(BasicArrayPackage::new().as_shared_module());
    engine.register_global_module(BasicMapPackage::new().as_shared_module());
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");
    engine.disable_symbol("import");
    engine.set_max_expr_depths(MAX_EXPR_DEPTHS.0, MAX_EXPR_DEPTHS.1);
    engine
}

/// Trusted tier: restricted plus math and statistics.
pub fn trusted_engine() -> Engine {
    let mut engine = restricted_engine();
    engine.register_global_module(BasicMathPackage::new().as_shared_module());
    stats::register(&mut engine);
    engine
}

/// Developer tier: the full standard engine, importing modules relative to `base_dir`.
pub fn developer_engine(base_dir: Option<&Path>) -> Engine {
    let mut engine = Engine::new();
    let resolver = match base_dir {
        Some(dir) => FileModuleResolver::new_with_path(dir),
        None => FileModuleResolver::new(),
    };
    engine.set_module_resolver(resolver);
    engine.set_max_expr_depths(MAX_EXPR_DEPTHS.0, MAX_EXPR_DEPTHS.1);
    stats::register(&mut engine);
    engine
}

/// Runs scripts under one capability tier.
#[derive(Debug, Clone)]
pub struct ScriptSandbox {
    mode: SandboxMode,
    base_dir: Option<PathBuf>,
}

impl ScriptSandbox {
    /// Sandbox for `mode`.
    pub fn new(mode: SandboxMode) -> Self {
        if mode == SandboxMode::Developer {
            warn!("Developer scripting mode grants file imports; do not run untrusted scripts");
        }
        Self {
            mode,
            base_dir: None,
        }
    }

    /// Resolve developer-mode imports relative to `dir`.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Capability tier.
    pub fn mode(&self) -> SandboxMode {
        self.mode
    }

    /// Build the engine for this tier. With a deadline, evaluation stops once it expires.
    pub fn build_engine(&self, deadline: Option<Deadline>) -> Engine {
        let mut engine = match self.mode {
            SandboxMode::Restricted => restricted_engine(),
            SandboxMode::Trusted => trusted_engine(),
            SandboxMode::Developer => developer_engine(self.base_dir.as_deref()),
        };

        api::register(&mut engine);
        engine.on_print(|text| info!(target: "script", "{text}"));
        engine.on_debug(|text, source, pos| {
            debug!(target: "script", source = source.unwrap_or_default(), %pos, "{text}");
        });
        if let Some(deadline) = deadline {
            engine.on_progress(move |_ops| deadline.is_expired().then_some(Dynamic::UNIT));
        }
        engine
    }

    /// Compile `source` without running it.
    pub fn validate(&self, source: &str) -> AppResult<()> {
        self.build_engine(None)
            .compile(source)
            .map(|_| ())
            .map_err(compile_error)
    }

    /// Read and run a script file. Developer imports resolve next to the file.
    pub async fn execute_file(
        &self,
        path: impl AsRef<Path>,
        api: &ScriptApi,
        timeout: Duration,
    ) -> AppResult<Dynamic> {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path).await?;
        let mut sandbox = self.clone();
        if sandbox.base_dir.is_none() {
            sandbox.base_dir = path.parent().map(Path::to_path_buf);
        }
        info!(script = %path.display(), mode = %self.mode, "Running script");
        sandbox.execute(&source, api, timeout).await
    }

    /// Run `source` with a wall-clock budget of `timeout`.
    ///
    /// The body runs first, then `sequence(api)` or `main(api)`. Without either entry
    /// point the accumulated results are returned. Expiry yields
    /// [`DaqError::ScriptTimeout`]; the worker stops at its next operation or
    /// capability call.
    pub async fn execute(
        &self,
        source: &str,
        api: &ScriptApi,
        timeout: Duration,
    ) -> AppResult<Dynamic> {
        let deadline = Deadline::after(timeout);
        let _disarm = deadline.guard();

        let sandbox = self.clone();
        let source = source.to_string();
        let worker_api = api.with_deadline(deadline.clone());
        let worker_deadline = deadline.clone();
        let span = Span::current();
        let worker = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            sandbox.run_worker(&source, worker_api, worker_deadline)
        });

        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                error!(error = %join_err, "Script worker failed");
                Err(DaqError::Script(format!("script worker failed: {join_err}")))
            }
            Err(_) => {
                deadline.cancel();
                warn!(?timeout, "Script exceeded its time budget");
                Err(DaqError::ScriptTimeout(timeout))
            }
        }
    }

    fn run_worker(&self, source: &str, api: ScriptApi, deadline: Deadline) -> AppResult<Dynamic> {
        let engine = self.build_engine(Some(deadline.clone()));
        let ast = engine
            .compile(source)
            .map_err(compile_error)?;

        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|err| script_error(*err, &deadline))?;

        let Some(entry) = find_entry_point(&ast) else {
            warn!("Script defines neither sequence(api) nor main(api); returning results");
            let results: Array = api.results().into_iter().map(Dynamic::from_float).collect();
            return Ok(Dynamic::from_array(results));
        };

        debug!(entry, "Calling script entry point");
        let options = CallFnOptions::new().eval_ast(false);
        engine
            .call_fn_with_options::<Dynamic>(options, &mut scope, &ast, entry, (api,))
            .map_err(|err| script_error(*err, &deadline))
    }
}

fn find_entry_point(ast: &AST) -> Option<&'static str> {
    ENTRY_POINTS.into_iter().find(|name| {
        ast.iter_functions()
            .any(|f| f.name == *name && f.params.len() == 1)
    })
}

fn is_termination(err: &EvalAltResult) -> bool {
    match err {
        EvalAltResult::ErrorTerminated(..) => true,
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _)
        | EvalAltResult::ErrorInModule(_, inner, _) => is_termination(inner),
        _ => false,
    }
}

fn compile_error(err: ParseError) -> DaqError {
    error!(error = %err, "Script failed to compile");
    DaqError::Script(format!("compile error: {err}"))
}

fn script_error(err: EvalAltResult, deadline: &Deadline) -> DaqError {
    if is_termination(&err) {
        DaqError::ScriptTimeout(deadline.budget())
    } else {
        error!(error = %err, "Script failed");
        DaqError::Script(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_restricted_blocks_eval_and_import() {
        let sandbox = ScriptSandbox::new(SandboxMode::Restricted);
        assert!(sandbox.validate(r#"eval("1 + 1")"#).is_err());
        assert!(sandbox.validate(r#"import "helpers" as h;"#).is_err());
        assert!(sandbox.validate("let x = [1, 2, 3]; x.len()").is_ok());
    }

    #[test]
    fn test_tier_functions() {
        let restricted = restricted_engine();
        assert!(restricted.eval::<f64>("sqrt(4.0)").is_err());
        assert!(restricted.eval::<Dynamic>("mean([1.0])").is_err());

        let trusted = trusted_engine();
        assert_eq!(trusted.eval::<f64>("sqrt(4.0)").unwrap(), 2.0);
        assert_eq!(trusted.eval::<f64>("mean([1.0, 3.0])").unwrap(), 2.0);
        assert!(trusted.eval::<i64>(r#"eval("1")"#).is_err());
    }

    #[test]
    fn test_restricted_has_string_functions() {
        let engine = restricted_engine();
        let script = r#"
            let s = `ch${1}:range`;
            [s.len(), s.contains("range"), s.sub_string(0, 3)]
        "#;
        let values = engine.eval::<Array>(script).unwrap();
        assert_eq!(values[0].as_int().unwrap(), 9);
        assert!(values[1].as_bool().unwrap());
        assert_eq!(values[2].clone().into_string().unwrap(), "ch1");
    }

    #[test]
    fn test_nesting_limits_match_release_defaults() {
        for engine in [restricted_engine(), trusted_engine(), developer_engine(None)] {
            assert_eq!(engine.max_expr_depth(), MAX_EXPR_DEPTHS.0);
            assert_eq!(engine.max_function_expr_depth(), MAX_EXPR_DEPTHS.1);
        }
    }

    #[test]
    #[traced_test]
    fn test_compile_error_is_logged() {
        let sandbox = ScriptSandbox::new(SandboxMode::Restricted);
        let err = sandbox.validate("let x = ;").unwrap_err();
        assert!(matches!(err, DaqError::Script(message) if message.starts_with("compile error")));
        assert!(logs_contain("Script failed to compile"));
    }

    #[test]
    fn test_entry_point_lookup() {
        let engine = restricted_engine();
        let both = engine.compile("fn main(a) {} fn sequence(a) {}").unwrap();
        assert_eq!(find_entry_point(&both), Some("sequence"));
        let main_only = engine.compile("fn main(a) {}").unwrap();
        assert_eq!(find_entry_point(&main_only), Some("main"));
        let wrong_arity = engine.compile("fn main() {}").unwrap();
        assert_eq!(find_entry_point(&wrong_arity), None);
    }
}
