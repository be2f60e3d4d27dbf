//! Loader/Evaluator Dispatch
//!
//! Every public entry point picks its tier from `policy::tier_for`, builds a
//! fresh context for that tier and hands source plus context to the
//! interpreter. Untrusted input goes to the data gate instead and never
//! reaches the interpreter. Dispatch methods take `&mut self`, so one engine
//! runs one evaluation at a time and collection never overlaps with one.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::capability::{CapabilityRegistry, TrustTier};
use crate::config::WardenConfig;
use crate::context::ContextBuilder;
use crate::error::{WardenError, WardenResult};
use crate::gate::{DataGate, PlainValue, UntrustedValue};
use crate::lifecycle::{CollectStats, GcStats, Lifecycle};
use crate::policy::{tier_for, EntryPoint};
use crate::script::{parse, Heap, HeapObject, Interpreter, Program, Scope, ScopeRef, SourceText, Value};

/// What `load_mixin` does when the target already has a member of the same name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MixinMode {
    /// Fail with `Collision` and leave the target untouched
    #[default]
    Reject,
    /// Replace the target's member
    Overwrite,
}

/// Options for `eval_sandbox`
#[derive(Debug, Clone, Default)]
pub struct SandboxOptions {
    /// Plain data copied into the sandbox scope under the given names
    pub inject: BTreeMap<String, PlainValue>,
    /// Run the bootstrap extensions script inside the sandbox first
    pub with_extensions: bool,
}

impl SandboxOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject_value(mut self, name: impl Into<String>, value: PlainValue) -> Self {
        self.inject.insert(name.into(), value);
        self
    }

    pub fn extensions(mut self, enabled: bool) -> Self {
        self.with_extensions = enabled;
        self
    }
}

/// Capability-scoped script engine
pub struct Engine {
    config: WardenConfig,
    registry: CapabilityRegistry,
    heap: Heap,
    globals: ScopeRef,
    gate: DataGate,
    lifecycle: Lifecycle,
    extensions: Option<Program>,
}

impl Engine {
    /// Take ownership of a fully populated registry and run the bootstrap scripts.
    pub fn new(config: WardenConfig, registry: CapabilityRegistry) -> WardenResult<Self> {
        info!(capabilities = registry.len(), "engine starting");

        let mut engine = Engine {
            heap: Heap::new(config.interpreter.max_heap_objects),
            globals: Scope::root(),
            gate: DataGate::new(config.gate.clone()),
            lifecycle: Lifecycle::new(&config.gc),
            extensions: None,
            registry,
            config,
        };

        if let Some(path) = engine.config.bootstrap.extensions.clone() {
            let program = engine.compile_file(&path)?;
            engine.run_global(&program)?;
            engine.extensions = Some(program);
            info!(path = %path.display(), "extensions loaded");
        }
        if let Some(path) = engine.config.bootstrap.autoexec.clone() {
            let program = engine.compile_file(&path)?;
            engine.run_global(&program)?;
            info!(path = %path.display(), "autoexec finished");
        }
        Ok(engine)
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Run a trusted script file in the global scope.
    pub fn load_script(&mut self, path: impl AsRef<Path>) -> WardenResult<Value> {
        let program = self.compile_file(path.as_ref())?;
        debug!(source = %program.source.name, "load_script");
        let result = self.evaluate(&program, &self.globals.clone(), tier_for(EntryPoint::LoadScript));
        self.finish(result)
    }

    /// Evaluate trusted inline text in the global scope.
    pub fn eval_string(&mut self, text: &str) -> WardenResult<Value> {
        let program = self.compile(SourceText::new("<eval>", text))?;
        let result = self.evaluate(&program, &self.globals.clone(), tier_for(EntryPoint::EvalString));
        self.finish(result)
    }

    /// Run a module file in a fresh sandbox and return a record of its exports.
    ///
    /// Like every heap value handed to the host, the record only survives later
    /// collections while it is pinned or reachable from a global.
    pub fn load_module(&mut self, path: impl AsRef<Path>) -> WardenResult<Value> {
        let program = self.compile_file(path.as_ref())?;
        debug!(source = %program.source.name, "load_module");
        let result = self
            .run_module(&program, tier_for(EntryPoint::LoadModule))
            .and_then(|exports| self.heap.alloc_record(exports));
        self.finish(result)
    }

    /// Run a module file in a fresh sandbox and copy its exports onto `target`.
    ///
    /// Every export is checked for a collision before any member is written.
    pub fn load_mixin(&mut self, path: impl AsRef<Path>, target: &Value, mode: MixinMode) -> WardenResult<Value> {
        self.record_fields(target)?;
        let program = self.compile_file(path.as_ref())?;
        debug!(source = %program.source.name, ?mode, "load_mixin");

        let result = self
            .run_module(&program, tier_for(EntryPoint::LoadMixin))
            .and_then(|exports| self.merge_into(target, exports, mode))
            .map(|()| target.clone());
        self.finish(result)
    }

    /// Evaluate inline text in a fresh sandbox.
    pub fn eval_sandbox(&mut self, text: &str, options: &SandboxOptions) -> WardenResult<Value> {
        let program = self.compile(SourceText::new("<sandbox>", text))?;
        let tier = tier_for(EntryPoint::EvalSandbox);
        let scope = Scope::root();

        let result = self.prepare_sandbox(&scope, options, tier).and_then(|()| self.evaluate(&program, &scope, tier));
        self.finish(result)
    }

    /// Parse untrusted text as plain data. Never executes anything.
    pub fn eval_untrusted_string(&mut self, text: &str) -> WardenResult<UntrustedValue> {
        self.enter_restricted(EntryPoint::EvalUntrustedString);
        self.gate.parse(text)
    }

    /// Parse an untrusted file as plain data; oversized files are rejected before reading.
    pub fn load_json(&mut self, path: impl AsRef<Path>) -> WardenResult<UntrustedValue> {
        self.enter_restricted(EntryPoint::LoadJson);
        let path = self.config.resolve_path(path.as_ref());
        let metadata = fs::metadata(&path).map_err(|e| file_error(&path, e))?;
        self.gate.check_size(metadata.len())?;
        let bytes = fs::read(&path).map_err(|e| file_error(&path, e))?;
        self.gate.parse_bytes(&bytes)
    }

    /// Collect unreachable heap objects now.
    pub fn collect(&mut self) -> CollectStats {
        self.lifecycle.collect(&mut self.heap, &[self.globals.clone()], &[])
    }

    /// Collect only if enough has been allocated since the last collection.
    pub fn collect_if_needed(&mut self) -> Option<CollectStats> {
        self.lifecycle.collect_if_needed(&mut self.heap, &[self.globals.clone()], &[])
    }

    pub fn gc_stats(&self) -> GcStats {
        self.lifecycle.stats()
    }

    pub fn live_objects(&self) -> usize {
        self.heap.live()
    }

    /// Keep a value alive across collections while the host holds it.
    pub fn pin(&mut self, value: &Value) -> WardenResult<()> {
        match value.as_object() {
            Some(r) => self.heap.pin(r),
            None => Ok(()),
        }
    }

    pub fn unpin(&mut self, value: &Value) {
        if let Some(r) = value.as_object() {
            self.heap.unpin(r);
        }
    }

    /// Empty record on the heap. Pin it or store it in a global to keep it
    /// across dispatch calls, which may collect.
    pub fn new_object(&mut self) -> WardenResult<Value> {
        self.heap.alloc_record(BTreeMap::new())
    }

    pub fn get_member(&self, object: &Value, name: &str) -> WardenResult<Value> {
        Ok(self.record_fields(object)?.get(name).cloned().unwrap_or(Value::Null))
    }

    pub fn set_member(&mut self, object: &Value, name: &str, value: Value) -> WardenResult<()> {
        self.record_fields(object)?;
        if let Some(HeapObject::Record(fields)) = object.as_object().map(|r| self.heap.get_mut(r)).transpose()? {
            fields.insert(name.to_string(), value);
        }
        Ok(())
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().get_local(name)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.borrow_mut().declare(name, value);
    }

    /// Deep copy of a heap value as plain data.
    pub fn export(&self, value: &Value) -> WardenResult<PlainValue> {
        self.heap.export(value)
    }

    /// Fresh heap copy of plain data.
    pub fn import(&mut self, value: &PlainValue) -> WardenResult<Value> {
        self.heap.import(value)
    }

    pub fn render(&self, value: &Value) -> String {
        self.heap.render(value)
    }

    pub fn type_name(&self, value: &Value) -> &'static str {
        self.heap.type_name(value)
    }

    fn compile(&self, source: SourceText) -> WardenResult<Program> {
        parse(source, self.config.interpreter.max_nesting)
    }

    fn compile_file(&self, path: &Path) -> WardenResult<Program> {
        let path = self.config.resolve_path(path);
        let text = fs::read_to_string(&path).map_err(|e| file_error(&path, e))?;
        self.compile(SourceText::new(path.display().to_string(), text))
    }

    fn evaluate(&mut self, program: &Program, scope: &ScopeRef, tier: TrustTier) -> WardenResult<Value> {
        let context = ContextBuilder::new(&self.registry).build(tier);
        let mut interpreter = Interpreter::new(&mut self.heap, &context, &self.config.interpreter);
        interpreter.run(program, scope)
    }

    fn run_global(&mut self, program: &Program) -> WardenResult<Value> {
        let result = self.evaluate(program, &self.globals.clone(), TrustTier::Trusted);
        self.finish(result)
    }

    /// Run a module in its own root scope and read back its exports.
    fn run_module(&mut self, program: &Program, tier: TrustTier) -> WardenResult<BTreeMap<String, Value>> {
        let scope = Scope::root();
        self.evaluate(program, &scope, tier)?;
        let scope = scope.borrow();
        let exports = program
            .exports
            .iter()
            .map(|name| (name.clone(), scope.get_local(name).unwrap_or(Value::Null)))
            .collect();
        Ok(exports)
    }

    fn prepare_sandbox(&mut self, scope: &ScopeRef, options: &SandboxOptions, tier: TrustTier) -> WardenResult<()> {
        if options.with_extensions {
            if let Some(extensions) = self.extensions.clone() {
                self.evaluate(&extensions, scope, tier)?;
            }
        }
        for (name, plain) in &options.inject {
            let value = self.heap.import(plain)?;
            scope.borrow_mut().declare(name.as_str(), value);
        }
        Ok(())
    }

    fn merge_into(&mut self, target: &Value, exports: BTreeMap<String, Value>, mode: MixinMode) -> WardenResult<()> {
        let existing = self.record_fields(target)?;
        if mode == MixinMode::Reject {
            if let Some(member) = exports.keys().find(|name| existing.contains_key(*name)) {
                return Err(WardenError::Collision { member: member.clone() });
            }
        }
        if let Some(HeapObject::Record(fields)) = target.as_object().map(|r| self.heap.get_mut(r)).transpose()? {
            fields.extend(exports);
        }
        Ok(())
    }

    fn record_fields(&self, value: &Value) -> WardenResult<&BTreeMap<String, Value>> {
        let object = match value.as_object() {
            Some(r) => self.heap.get(r)?,
            None => return Err(WardenError::InvalidTarget(format!("{} is not a record", value.type_name()))),
        };
        match object {
            HeapObject::Record(fields) => Ok(fields),
            other => Err(WardenError::InvalidTarget(format!("{} is not a record", other.type_name()))),
        }
    }

    fn enter_restricted(&self, entry: EntryPoint) {
        let context = ContextBuilder::new(&self.registry).build(tier_for(entry));
        debug!(?entry, bound = context.len(), "restricted context");
    }

    /// Post-dispatch housekeeping: maybe collect, keeping the result alive.
    fn finish(&mut self, result: WardenResult<Value>) -> WardenResult<Value> {
        let extra: &[Value] = match &result {
            Ok(value) => std::slice::from_ref(value),
            Err(_) => &[],
        };
        self.lifecycle.collect_if_needed(&mut self.heap, &[self.globals.clone()], extra);
        result
    }
}

fn file_error(path: &Path, err: io::Error) -> WardenError {
    if err.kind() == io::ErrorKind::NotFound {
        WardenError::NotFound(path.display().to_string())
    } else {
        WardenError::Io(format!("{}: {}", path.display(), err))
    }
}
