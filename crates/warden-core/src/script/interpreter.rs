//! Tree-walking evaluator
//!
//! Runs a parsed program against one `ExecutionContext`. Every capability
//! call is resolved through the context at the tier of the code currently
//! running, so a function defined under a lower tier stays at that tier no
//! matter who calls it.

use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::debug;

use super::ast::{BinaryOp, Expr, ExprKind, FnDef, Pos, Program, SourceText, Stmt, StmtKind, UnaryOp};
use super::heap::{Function, Heap, HeapObject, Scope, ScopeRef};
use super::value::Value;
use crate::capability::{CapabilityTag, TrustTier};
use crate::config::InterpreterLimits;
use crate::context::ExecutionContext;
use crate::error::{WardenError, WardenResult};

/// Non-local exits
enum Unwind {
    Return(Value),
    Throw { value: Value, pos: Pos, source: Rc<SourceText> },
    Fault(WardenError),
}

impl From<WardenError> for Unwind {
    fn from(err: WardenError) -> Self {
        Unwind::Fault(err)
    }
}

type Flow<T> = Result<T, Unwind>;

/// State of the code currently running
#[derive(Clone)]
struct Frame {
    scope: ScopeRef,
    tier: TrustTier,
    source: Rc<SourceText>,
}

impl Frame {
    fn error(&self, pos: Pos, message: impl Into<String>) -> Unwind {
        Unwind::Fault(self.source.error(pos, message))
    }

    fn child(&self) -> Frame {
        Frame { scope: Scope::child(&self.scope), ..self.clone() }
    }
}

pub struct Interpreter<'a, 'r> {
    heap: &'a mut Heap,
    context: &'a ExecutionContext<'r>,
    max_call_depth: usize,
    depth: usize,
    /// Statements, expressions and calls currently on the host stack
    max_eval_depth: usize,
    eval_depth: usize,
}

impl<'a, 'r> Interpreter<'a, 'r> {
    pub fn new(heap: &'a mut Heap, context: &'a ExecutionContext<'r>, limits: &InterpreterLimits) -> Self {
        Interpreter {
            heap,
            context,
            max_call_depth: limits.max_call_depth,
            depth: 0,
            max_eval_depth: limits.max_eval_depth,
            eval_depth: 0,
        }
    }

    /// Run `program` directly in `scope` at the context's tier and return its
    /// completion value (the value of the last expression statement).
    pub fn run(&mut self, program: &Program, scope: &ScopeRef) -> WardenResult<Value> {
        let frame = Frame {
            scope: scope.clone(),
            tier: self.context.tier(),
            source: program.source.clone(),
        };
        match self.exec_stmts(&program.body, &frame) {
            Ok(completion) => Ok(completion.unwrap_or(Value::Null)),
            Err(Unwind::Return(value)) => Ok(value),
            Err(Unwind::Throw { value, pos, source }) => {
                let text = self.heap.render(&value);
                Err(source.error(pos, format!("uncaught exception: {}", text)))
            }
            Err(Unwind::Fault(err)) => Err(err),
        }
    }

    fn exec_stmts(&mut self, stmts: &[Stmt], frame: &Frame) -> Flow<Option<Value>> {
        let mut completion = None;
        for stmt in stmts {
            if let Some(value) = self.exec_stmt(stmt, frame)? {
                completion = Some(value);
            }
        }
        Ok(completion)
    }

    fn exec_block(&mut self, stmts: &[Stmt], frame: &Frame) -> Flow<Option<Value>> {
        self.exec_stmts(stmts, &frame.child())
    }

    /// Every recursive step of the evaluator passes through here, so nesting
    /// inside recursion cannot multiply past one ceiling.
    fn descend(&mut self) -> Flow<()> {
        if self.eval_depth >= self.max_eval_depth {
            return Err(WardenError::LimitExceeded { what: "evaluation depth", limit: self.max_eval_depth }.into());
        }
        self.eval_depth += 1;
        Ok(())
    }

    fn exec_stmt(&mut self, stmt: &Stmt, frame: &Frame) -> Flow<Option<Value>> {
        self.descend()?;
        let result = self.run_stmt(stmt, frame);
        self.eval_depth -= 1;
        result
    }

    fn run_stmt(&mut self, stmt: &Stmt, frame: &Frame) -> Flow<Option<Value>> {
        match &stmt.kind {
            StmtKind::Let { name, init } => {
                let value = match init {
                    Some(expr) => self.eval(expr, frame)?,
                    None => Value::Null,
                };
                frame.scope.borrow_mut().declare(name.as_str(), value);
                Ok(None)
            }

            StmtKind::Export { name, init } => {
                let value = self.eval(init, frame)?;
                frame.scope.borrow_mut().declare(name.as_str(), value);
                Ok(None)
            }

            StmtKind::Fn { name, def } => {
                let function = self.make_function(def, frame)?;
                frame.scope.borrow_mut().declare(name.as_str(), function);
                Ok(None)
            }

            StmtKind::Assign { target, value } => {
                self.assign(target, value, frame)?;
                Ok(None)
            }

            StmtKind::If { cond, then, otherwise } => {
                if self.eval(cond, frame)?.truthy() {
                    self.exec_block(then, frame)
                } else if let Some(otherwise) = otherwise {
                    self.exec_block(otherwise, frame)
                } else {
                    Ok(None)
                }
            }

            StmtKind::While { cond, body } => {
                let mut completion = None;
                while self.eval(cond, frame)?.truthy() {
                    if let Some(value) = self.exec_block(body, frame)? {
                        completion = Some(value);
                    }
                }
                Ok(completion)
            }

            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, frame)?,
                    None => Value::Null,
                };
                Err(Unwind::Return(value))
            }

            StmtKind::Throw(expr) => {
                let value = self.eval(expr, frame)?;
                Err(Unwind::Throw { value, pos: stmt.pos, source: frame.source.clone() })
            }

            StmtKind::Try { body, binding, handler } => {
                let caught = match self.exec_block(body, frame) {
                    Err(Unwind::Throw { value, .. }) => value,
                    Err(Unwind::Fault(err)) if err.is_catchable() => self.error_record(&err)?,
                    other => return other,
                };
                debug!(binding = binding.as_str(), "exception caught");
                let handler_frame = frame.child();
                handler_frame.scope.borrow_mut().declare(binding.as_str(), caught);
                self.exec_stmts(handler, &handler_frame)
            }

            StmtKind::Expr(expr) => self.eval(expr, frame).map(Some),
        }
    }

    fn eval(&mut self, expr: &Expr, frame: &Frame) -> Flow<Value> {
        self.descend()?;
        let result = self.eval_expr(expr, frame);
        self.eval_depth -= 1;
        result
    }

    fn eval_expr(&mut self, expr: &Expr, frame: &Frame) -> Flow<Value> {
        match &expr.kind {
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),

            ExprKind::Ident(name) => Scope::lookup(&frame.scope, name)
                .ok_or_else(|| frame.error(expr.pos, format!("`{}` is not defined", name))),

            ExprKind::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, frame)?);
                }
                Ok(self.heap.alloc_list(values)?)
            }

            ExprKind::Record(fields) => {
                let mut map = BTreeMap::new();
                for (key, item) in fields {
                    let value = self.eval(item, frame)?;
                    map.insert(key.clone(), value);
                }
                Ok(self.heap.alloc_record(map)?)
            }

            ExprKind::Member { object, name } => {
                let target = self.eval(object, frame)?;
                self.member(&target, name, expr.pos, frame)
            }

            ExprKind::Index { object, index } => {
                let target = self.eval(object, frame)?;
                let key = self.eval(index, frame)?;
                self.index(&target, &key, expr.pos, frame)
            }

            ExprKind::Call { callee, args } => self.call(callee, args, expr.pos, frame),

            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand, frame)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                    UnaryOp::Neg => match value {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        other => Err(frame.error(
                            expr.pos,
                            format!("cannot negate {}", self.heap.type_name(&other)),
                        )),
                    },
                }
            }

            ExprKind::Binary { op: BinaryOp::And, lhs, rhs } => {
                let left = self.eval(lhs, frame)?;
                if left.truthy() {
                    self.eval(rhs, frame)
                } else {
                    Ok(left)
                }
            }

            ExprKind::Binary { op: BinaryOp::Or, lhs, rhs } => {
                let left = self.eval(lhs, frame)?;
                if left.truthy() {
                    Ok(left)
                } else {
                    self.eval(rhs, frame)
                }
            }

            ExprKind::Binary { op, lhs, rhs } => {
                let left = self.eval(lhs, frame)?;
                let right = self.eval(rhs, frame)?;
                self.binary(*op, left, right, expr.pos, frame)
            }

            ExprKind::Function(def) => self.make_function(def, frame),
        }
    }

    fn call(&mut self, callee: &Expr, args: &[Expr], pos: Pos, frame: &Frame) -> Flow<Value> {
        let function = match &callee.kind {
            ExprKind::Member { object, name } => {
                // `tag.method(...)` where `tag` is no variable: a capability call
                if let ExprKind::Ident(tag) = &object.kind {
                    if Scope::lookup(&frame.scope, tag).is_none() {
                        return self.capability_call(tag, name, args, frame);
                    }
                }

                let target = self.eval(object, frame)?;
                let is_list = matches!(
                    target.as_object().and_then(|r| self.heap.get(r).ok()),
                    Some(HeapObject::List(_))
                );
                if is_list && name == "push" {
                    return self.list_push(&target, args, frame);
                }
                self.member(&target, name, callee.pos, frame)?
            }
            _ => self.eval(callee, frame)?,
        };

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, frame)?);
        }
        self.call_function(&function, values, pos, frame)
    }

    fn call_function(&mut self, function: &Value, args: Vec<Value>, pos: Pos, frame: &Frame) -> Flow<Value> {
        let (def, env, origin, source) = match function.as_object().map(|r| self.heap.get(r)) {
            Some(Ok(HeapObject::Function(f))) => (f.def.clone(), f.env.clone(), f.origin, f.source.clone()),
            Some(Err(err)) => return Err(err.into()),
            _ => {
                return Err(frame.error(
                    pos,
                    format!("{} is not a function", self.heap.type_name(function)),
                ))
            }
        };

        if self.depth >= self.max_call_depth {
            return Err(WardenError::LimitExceeded { what: "call depth", limit: self.max_call_depth }.into());
        }

        let scope = Scope::child(&env);
        {
            let mut vars = scope.borrow_mut();
            let mut args = args.into_iter();
            for param in &def.params {
                vars.declare(param.as_str(), args.next().unwrap_or(Value::Null));
            }
        }
        let callee_frame = Frame { scope, tier: frame.tier.min(origin), source };

        self.descend()?;
        self.depth += 1;
        let result = self.exec_stmts(&def.body, &callee_frame);
        self.depth -= 1;
        self.eval_depth -= 1;

        match result {
            Ok(_) => Ok(Value::Null),
            Err(Unwind::Return(value)) => Ok(value),
            Err(other) => Err(other),
        }
    }

    fn capability_call(&mut self, name: &str, method: &str, args: &[Expr], frame: &Frame) -> Flow<Value> {
        let tag = CapabilityTag::from_script_name(name);
        let capability = self.context.resolve_at(&tag, frame.tier)?;

        let mut plain = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.eval(arg, frame)?;
            plain.push(self.heap.export(&value)?);
        }

        debug!(tag = tag.as_str(), method, tier = %frame.tier, "capability call");
        let result = capability.invoke(method, &plain)?;
        Ok(self.heap.import(&result)?)
    }

    fn list_push(&mut self, list: &Value, args: &[Expr], frame: &Frame) -> Flow<Value> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, frame)?);
        }
        let Some(r) = list.as_object() else {
            return Ok(Value::Null);
        };
        match self.heap.get_mut(r)? {
            HeapObject::List(items) => {
                items.extend(values);
                Ok(Value::Number(items.len() as f64))
            }
            _ => Ok(Value::Null),
        }
    }

    fn make_function(&mut self, def: &Rc<FnDef>, frame: &Frame) -> Flow<Value> {
        let function = Function {
            def: def.clone(),
            env: frame.scope.clone(),
            origin: frame.tier,
            source: frame.source.clone(),
        };
        Ok(Value::Ref(self.heap.alloc(HeapObject::Function(function))?))
    }

    fn member(&mut self, target: &Value, name: &str, pos: Pos, frame: &Frame) -> Flow<Value> {
        match target {
            Value::Str(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
            Value::Ref(r) => match self.heap.get(*r)? {
                HeapObject::Record(fields) => Ok(fields.get(name).cloned().unwrap_or(Value::Null)),
                HeapObject::List(items) if name == "length" => Ok(Value::Number(items.len() as f64)),
                other => Err(frame.error(pos, format!("{} has no member `{}`", other.type_name(), name))),
            },
            other => Err(frame.error(
                pos,
                format!("cannot read member `{}` of {}", name, other.type_name()),
            )),
        }
    }

    fn index(&mut self, target: &Value, key: &Value, pos: Pos, frame: &Frame) -> Flow<Value> {
        match (target, key) {
            (Value::Str(s), Value::Number(n)) => Ok(list_index(*n, s.chars().count())
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::str(c.encode_utf8(&mut [0; 4])))
                .unwrap_or(Value::Null)),
            (Value::Ref(r), _) => match (self.heap.get(*r)?, key) {
                (HeapObject::List(items), Value::Number(n)) => Ok(list_index(*n, items.len())
                    .map(|i| items[i].clone())
                    .unwrap_or(Value::Null)),
                (HeapObject::Record(fields), Value::Str(k)) => {
                    Ok(fields.get(&**k).cloned().unwrap_or(Value::Null))
                }
                (other, _) => Err(frame.error(
                    pos,
                    format!("cannot index {} with {}", other.type_name(), self.heap.type_name(key)),
                )),
            },
            _ => Err(frame.error(
                pos,
                format!(
                    "cannot index {} with {}",
                    self.heap.type_name(target),
                    self.heap.type_name(key)
                ),
            )),
        }
    }

    fn assign(&mut self, target: &Expr, value: &Expr, frame: &Frame) -> Flow<()> {
        match &target.kind {
            ExprKind::Ident(name) => {
                let value = self.eval(value, frame)?;
                if !Scope::assign(&frame.scope, name, value) {
                    return Err(frame.error(target.pos, format!("`{}` is not declared", name)));
                }
                Ok(())
            }

            ExprKind::Member { object, name } => {
                let object = self.eval(object, frame)?;
                let value = self.eval(value, frame)?;
                self.store(&object, Value::str(name), value, target.pos, frame)
            }

            ExprKind::Index { object, index } => {
                let object = self.eval(object, frame)?;
                let key = self.eval(index, frame)?;
                let value = self.eval(value, frame)?;
                self.store(&object, key, value, target.pos, frame)
            }

            _ => Err(frame.error(target.pos, "invalid assignment target")),
        }
    }

    fn store(&mut self, object: &Value, key: Value, value: Value, pos: Pos, frame: &Frame) -> Flow<()> {
        let Some(r) = object.as_object() else {
            return Err(frame.error(pos, format!("cannot set a member on {}", object.type_name())));
        };
        match (self.heap.get_mut(r)?, &key) {
            (HeapObject::Record(fields), Value::Str(k)) => {
                fields.insert(k.to_string(), value);
                Ok(())
            }
            (HeapObject::List(items), Value::Number(n)) => match list_index(*n, items.len() + 1) {
                Some(i) if i == items.len() => {
                    items.push(value);
                    Ok(())
                }
                Some(i) => {
                    items[i] = value;
                    Ok(())
                }
                None => Err(frame.error(pos, format!("list index {} out of range", n))),
            },
            (other, _) => {
                let kind = other.type_name();
                Err(frame.error(pos, format!("cannot set {} on {}", self.heap.type_name(&key), kind)))
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, left: Value, right: Value, pos: Pos, frame: &Frame) -> Flow<Value> {
        let value = match (op, &left, &right) {
            (BinaryOp::Eq, _, _) => Value::Bool(left.strict_eq(&right)),
            (BinaryOp::Ne, _, _) => Value::Bool(!left.strict_eq(&right)),

            (BinaryOp::Add, Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (BinaryOp::Add, Value::Str(_), _) | (BinaryOp::Add, _, Value::Str(_)) => {
                let mut text = self.heap.render(&left);
                text.push_str(&self.heap.render(&right));
                Value::Str(Rc::from(text))
            }
            (BinaryOp::Sub, Value::Number(a), Value::Number(b)) => Value::Number(a - b),
            (BinaryOp::Mul, Value::Number(a), Value::Number(b)) => Value::Number(a * b),
            (BinaryOp::Div, Value::Number(a), Value::Number(b)) => Value::Number(a / b),
            (BinaryOp::Rem, Value::Number(a), Value::Number(b)) => Value::Number(a % b),

            (BinaryOp::Lt, Value::Number(a), Value::Number(b)) => Value::Bool(a < b),
            (BinaryOp::Le, Value::Number(a), Value::Number(b)) => Value::Bool(a <= b),
            (BinaryOp::Gt, Value::Number(a), Value::Number(b)) => Value::Bool(a > b),
            (BinaryOp::Ge, Value::Number(a), Value::Number(b)) => Value::Bool(a >= b),
            (BinaryOp::Lt, Value::Str(a), Value::Str(b)) => Value::Bool(a < b),
            (BinaryOp::Le, Value::Str(a), Value::Str(b)) => Value::Bool(a <= b),
            (BinaryOp::Gt, Value::Str(a), Value::Str(b)) => Value::Bool(a > b),
            (BinaryOp::Ge, Value::Str(a), Value::Str(b)) => Value::Bool(a >= b),

            _ => {
                return Err(frame.error(
                    pos,
                    format!(
                        "cannot apply `{}` to {} and {}",
                        op.symbol(),
                        self.heap.type_name(&left),
                        self.heap.type_name(&right)
                    ),
                ))
            }
        };
        Ok(value)
    }

    /// Value bound by `catch` for an engine error.
    fn error_record(&mut self, err: &WardenError) -> Flow<Value> {
        let message = match err {
            WardenError::Source(source) => source.message.clone(),
            other => other.to_string(),
        };
        let mut fields = BTreeMap::new();
        fields.insert("kind".to_string(), Value::str(err.kind()));
        fields.insert("message".to_string(), Value::Str(Rc::from(message)));
        Ok(self.heap.alloc_record(fields)?)
    }
}

/// Integer index within `0..len`, if `n` is one.
fn list_index(n: f64, len: usize) -> Option<usize> {
    if n.fract() == 0.0 && n >= 0.0 && n < len as f64 {
        Some(n as usize)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityRegistry, NativeResource};
    use crate::context::ContextBuilder;
    use crate::gate::PlainValue;
    use crate::script::parser::parse;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<PlainValue>>>);

    impl NativeResource for Recorder {
        fn kind(&self) -> &str {
            "recorder"
        }

        fn invoke(&self, method: &str, args: &[PlainValue]) -> WardenResult<PlainValue> {
            match method {
                "log" => {
                    if let Ok(mut log) = self.0.lock() {
                        log.extend(args.iter().cloned());
                    }
                    Ok(PlainValue::Null)
                }
                "echo" => Ok(args.first().cloned().unwrap_or(PlainValue::Null)),
                other => Err(WardenError::NotFound(format!("method `{}`", other))),
            }
        }
    }

    struct Fixture {
        registry: CapabilityRegistry,
        heap: Heap,
        limits: InterpreterLimits,
        log: Arc<Mutex<Vec<PlainValue>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let log = Arc::new(Mutex::new(Vec::new()));
            let mut registry = CapabilityRegistry::new();
            registry
                .register("console", TrustTier::Sandboxed, Box::new(Recorder(log.clone())))
                .expect("console");
            registry
                .register("process-exec", TrustTier::Trusted, Box::new(Recorder(log.clone())))
                .expect("process-exec");
            Fixture { registry, heap: Heap::new(10_000), limits: InterpreterLimits::default(), log }
        }

        fn run_in(&mut self, tier: TrustTier, scope: &ScopeRef, text: &str) -> WardenResult<Value> {
            let program = parse(SourceText::new("<test>", text), self.limits.max_nesting)?;
            let context = ContextBuilder::new(&self.registry).build(tier);
            Interpreter::new(&mut self.heap, &context, &self.limits).run(&program, scope)
        }

        fn run(&mut self, tier: TrustTier, text: &str) -> WardenResult<Value> {
            self.run_in(tier, &Scope::root(), text)
        }

        fn plain(&mut self, tier: TrustTier, text: &str) -> PlainValue {
            let value = self.run(tier, text).expect("runs");
            self.heap.export(&value).expect("plain")
        }
    }

    #[test]
    fn arithmetic_and_strings() {
        let mut fx = Fixture::new();
        assert_eq!(fx.plain(TrustTier::Trusted, "1 + 2 * 3 - 4 / 2"), PlainValue::Number(5.0));
        assert_eq!(fx.plain(TrustTier::Trusted, "'n=' + 3"), PlainValue::from("n=3"));
        assert_eq!(fx.plain(TrustTier::Trusted, "'abc'.length + [1, 2].length"), PlainValue::Number(5.0));
        assert_eq!(fx.plain(TrustTier::Trusted, "null || 'x'"), PlainValue::from("x"));
        assert_eq!(fx.plain(TrustTier::Trusted, "1 == '1'"), PlainValue::Bool(false));
    }

    #[test]
    fn closures_capture_their_scope() {
        let mut fx = Fixture::new();
        let value = fx.plain(
            TrustTier::Trusted,
            "fn counter() { let n = 0; return fn() { n = n + 1; return n; }; }
             let c = counter(); c(); c(); c()",
        );
        assert_eq!(value, PlainValue::Number(3.0));
    }

    #[test]
    fn loops_records_and_lists() {
        let mut fx = Fixture::new();
        let value = fx.plain(
            TrustTier::Trusted,
            "let out = []; let i = 0;
             while (i < 4) { out.push(i * i); i = i + 1; }
             let r = { squares: out, 'count': out.length };
             r.last = out[3];
             r",
        );
        assert_eq!(value.to_json(), r#"{"count":4,"last":9,"squares":[0,1,4,9]}"#);
    }

    #[test]
    fn sandboxed_code_cannot_call_trusted_capability() {
        let mut fx = Fixture::new();
        assert!(fx.run(TrustTier::Sandboxed, "console.log('hi')").is_ok());
        assert!(matches!(
            fx.run(TrustTier::Sandboxed, "process_exec.log('x')"),
            Err(WardenError::CapabilityDenied { ref tag }) if tag == "process-exec"
        ));
        assert!(fx.run(TrustTier::Trusted, "process_exec.log('x')").is_ok());
        assert_eq!(fx.log.lock().expect("log").len(), 2);
    }

    #[test]
    fn sandboxed_closure_keeps_its_tier_when_called_from_trusted_code() {
        let mut fx = Fixture::new();
        let scope = Scope::root();
        fx.run_in(TrustTier::Sandboxed, &scope, "fn sneak() { return process_exec.echo('x'); }")
            .expect("defines");
        let err = fx.run_in(TrustTier::Trusted, &scope, "sneak()").expect_err("still sandboxed");
        assert!(matches!(err, WardenError::CapabilityDenied { .. }));
    }

    #[test]
    fn try_catch_handles_throws_and_denials() {
        let mut fx = Fixture::new();
        assert_eq!(
            fx.plain(TrustTier::Trusted, "let r; try { throw {code: 7}; } catch (e) { r = e.code; } r"),
            PlainValue::Number(7.0)
        );
        assert_eq!(
            fx.plain(TrustTier::Sandboxed, "let k; try { process_exec.echo(1); } catch (e) { k = e.kind; } k"),
            PlainValue::from("CapabilityDenied")
        );
        assert_eq!(
            fx.plain(TrustTier::Trusted, "let m; try { missing(); } catch (e) { m = e.kind; } m"),
            PlainValue::from("SourceError")
        );
    }

    #[test]
    fn uncaught_throw_becomes_source_error() {
        let mut fx = Fixture::new();
        match fx.run(TrustTier::Trusted, "let a = 1;\nthrow 'boom';") {
            Err(WardenError::Source(e)) => {
                assert_eq!(e.location.line, 2);
                assert_eq!(e.message, "uncaught exception: boom");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn functions_are_not_plain_data() {
        let mut fx = Fixture::new();
        assert!(matches!(
            fx.run(TrustTier::Sandboxed, "console.log(fn() { return 1; })"),
            Err(WardenError::NotPlainData(_))
        ));
    }

    #[test]
    fn capability_results_are_imported() {
        let mut fx = Fixture::new();
        assert_eq!(
            fx.plain(TrustTier::Sandboxed, "let r = console.echo({a: [1, 2]}); r.a[1]"),
            PlainValue::Number(2.0)
        );
    }

    #[test]
    fn call_depth_is_limited() {
        let mut fx = Fixture::new();
        fx.limits.max_call_depth = 32;
        assert!(matches!(
            fx.run(TrustTier::Trusted, "fn f(n) { return f(n + 1); } f(0)"),
            Err(WardenError::LimitExceeded { what: "call depth", .. })
        ));
    }

    #[test]
    fn recursion_through_nested_literals_hits_one_ceiling() {
        let mut fx = Fixture::new();
        let text = format!("fn f(n) {{ return {}f(n + 1){}; }} f(0)", "[".repeat(100), "]".repeat(100));
        let err = fx.run(TrustTier::Sandboxed, &text).expect_err("bounded");
        assert!(matches!(err, WardenError::LimitExceeded { what: "evaluation depth", .. }));
        assert!(!err.is_catchable());
    }

    #[test]
    fn evaluation_depth_is_released_after_each_call() {
        let mut fx = Fixture::new();
        fx.limits.max_eval_depth = 24;
        let value = fx.plain(
            TrustTier::Trusted,
            "fn one() { return 1; } let s = 0; let i = 0; while (i < 50) { s = s + one(); i = i + 1; } s",
        );
        assert_eq!(value, PlainValue::Number(50.0));
    }

    #[test]
    fn runtime_errors_carry_location() {
        let mut fx = Fixture::new();
        match fx.run(TrustTier::Trusted, "let a = null;\nlet b = a.x;") {
            Err(WardenError::Source(e)) => {
                assert_eq!(e.location.line, 2);
                assert_eq!(e.context.as_deref(), Some("let b = a.x;"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
