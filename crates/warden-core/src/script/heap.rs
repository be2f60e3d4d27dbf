//! Interpreter Memory Model
//!
//! Index-based object heap with generation-checked references, plus the
//! scope chain used for variables. Records, lists and functions live in heap
//! slots and are reclaimed by mark-and-sweep; scopes are reference counted
//! and traced through during marking.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use super::ast::{FnDef, SourceText};
use super::value::{ObjectRef, Value};
use crate::capability::TrustTier;
use crate::error::{WardenError, WardenResult};
use crate::gate::{format_number, PlainValue};

/// Deepest structure `export`/`render` will walk
const MAX_WALK_DEPTH: usize = 512;

pub type ScopeRef = Rc<RefCell<Scope>>;

/// Variable storage for one block, function call or sandbox
#[derive(Debug, Default)]
pub struct Scope {
    vars: HashMap<String, Value>,
    parent: Option<ScopeRef>,
}

impl Scope {
    /// Scope with no parent: the global scope, or a sandbox root.
    pub fn root() -> ScopeRef {
        Rc::new(RefCell::new(Scope::default()))
    }

    pub fn child(parent: &ScopeRef) -> ScopeRef {
        Rc::new(RefCell::new(Scope { vars: HashMap::new(), parent: Some(parent.clone()) }))
    }

    pub fn declare(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.vars.get(name).cloned()
    }

    /// Look `name` up along the scope chain.
    pub fn lookup(scope: &ScopeRef, name: &str) -> Option<Value> {
        let mut current = scope.clone();
        loop {
            if let Some(value) = current.borrow().vars.get(name) {
                return Some(value.clone());
            }
            let parent = current.borrow().parent.clone()?;
            current = parent;
        }
    }

    /// Overwrite an existing binding along the chain; false if none exists.
    pub fn assign(scope: &ScopeRef, name: &str, value: Value) -> bool {
        let mut current = scope.clone();
        loop {
            if let Some(slot) = current.borrow_mut().vars.get_mut(name) {
                *slot = value;
                return true;
            }
            let Some(parent) = current.borrow().parent.clone() else {
                return false;
            };
            current = parent;
        }
    }
}

/// Closure: shared definition, captured scope and the tier it was created under
#[derive(Debug)]
pub struct Function {
    pub def: Rc<FnDef>,
    pub env: ScopeRef,
    pub origin: TrustTier,
    pub source: Rc<SourceText>,
}

#[derive(Debug)]
pub enum HeapObject {
    Record(BTreeMap<String, Value>),
    List(Vec<Value>),
    Function(Function),
}

impl HeapObject {
    pub fn type_name(&self) -> &'static str {
        match self {
            HeapObject::Record(_) => "record",
            HeapObject::List(_) => "list",
            HeapObject::Function(_) => "function",
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    object: Option<HeapObject>,
    marked: bool,
}

/// Object heap
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    max_objects: usize,
    allocated_since_collect: usize,
    pins: HashMap<ObjectRef, usize>,
}

impl Heap {
    pub fn new(max_objects: usize) -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            max_objects,
            allocated_since_collect: 0,
            pins: HashMap::new(),
        }
    }

    /// Number of live objects
    pub fn live(&self) -> usize {
        self.live
    }

    pub fn allocated_since_collect(&self) -> usize {
        self.allocated_since_collect
    }

    pub fn alloc(&mut self, object: HeapObject) -> WardenResult<ObjectRef> {
        if self.live >= self.max_objects {
            return Err(WardenError::LimitExceeded { what: "heap objects", limit: self.max_objects });
        }
        self.live += 1;
        self.allocated_since_collect += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            return Ok(ObjectRef { index, generation: slot.generation });
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, object: Some(object), marked: false });
        Ok(ObjectRef { index, generation: 0 })
    }

    pub fn alloc_record(&mut self, fields: BTreeMap<String, Value>) -> WardenResult<Value> {
        self.alloc(HeapObject::Record(fields)).map(Value::Ref)
    }

    pub fn alloc_list(&mut self, items: Vec<Value>) -> WardenResult<Value> {
        self.alloc(HeapObject::List(items)).map(Value::Ref)
    }

    pub fn get(&self, r: ObjectRef) -> WardenResult<&HeapObject> {
        self.slots
            .get(r.index as usize)
            .filter(|slot| slot.generation == r.generation)
            .and_then(|slot| slot.object.as_ref())
            .ok_or(WardenError::StaleObject { index: r.index })
    }

    pub fn get_mut(&mut self, r: ObjectRef) -> WardenResult<&mut HeapObject> {
        self.slots
            .get_mut(r.index as usize)
            .filter(|slot| slot.generation == r.generation)
            .and_then(|slot| slot.object.as_mut())
            .ok_or(WardenError::StaleObject { index: r.index })
    }

    pub fn contains(&self, r: ObjectRef) -> bool {
        self.get(r).is_ok()
    }

    /// Type name of any value, looking through references.
    pub fn type_name(&self, value: &Value) -> &'static str {
        match value {
            Value::Ref(r) => self.get(*r).map(HeapObject::type_name).unwrap_or("stale"),
            other => other.type_name(),
        }
    }

    /// Keep `r` alive across collections until a matching `unpin`.
    pub fn pin(&mut self, r: ObjectRef) -> WardenResult<()> {
        self.get(r)?;
        *self.pins.entry(r).or_insert(0) += 1;
        Ok(())
    }

    pub fn unpin(&mut self, r: ObjectRef) {
        if let Some(count) = self.pins.get_mut(&r) {
            *count -= 1;
            if *count == 0 {
                self.pins.remove(&r);
            }
        }
    }

    pub fn pinned(&self) -> usize {
        self.pins.len()
    }

    /// Mark from the given scopes, pinned objects and extra roots, then sweep.
    /// Returns the number of reclaimed objects.
    pub fn collect(&mut self, scopes: &[ScopeRef], extra: &[Value]) -> usize {
        let mut objects: Vec<ObjectRef> = self.pins.keys().copied().collect();
        objects.extend(extra.iter().filter_map(Value::as_object));
        let mut scopes: Vec<ScopeRef> = scopes.to_vec();
        let mut seen_scopes: HashSet<*const RefCell<Scope>> = HashSet::new();

        while !objects.is_empty() || !scopes.is_empty() {
            if let Some(scope) = scopes.pop() {
                if !seen_scopes.insert(Rc::as_ptr(&scope)) {
                    continue;
                }
                let scope = scope.borrow();
                objects.extend(scope.vars.values().filter_map(Value::as_object));
                if let Some(parent) = &scope.parent {
                    scopes.push(parent.clone());
                }
                continue;
            }

            let Some(r) = objects.pop() else { break };
            let Some(slot) = self.slots.get_mut(r.index as usize) else { continue };
            if slot.generation != r.generation || slot.marked || slot.object.is_none() {
                continue;
            }
            slot.marked = true;
            match &slot.object {
                Some(HeapObject::Record(fields)) => objects.extend(fields.values().filter_map(Value::as_object)),
                Some(HeapObject::List(items)) => objects.extend(items.iter().filter_map(Value::as_object)),
                Some(HeapObject::Function(f)) => scopes.push(f.env.clone()),
                None => {}
            }
        }

        let mut reclaimed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.object.is_none() {
                continue;
            }
            if slot.marked {
                slot.marked = false;
                continue;
            }
            slot.object = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index as u32);
            reclaimed += 1;
        }

        self.live -= reclaimed;
        self.allocated_since_collect = 0;
        reclaimed
    }

    /// Deep copy of a value into plain data.
    ///
    /// Functions and cyclic structures are not plain data.
    pub fn export(&self, value: &Value) -> WardenResult<PlainValue> {
        let mut path = Vec::new();
        self.export_inner(value, &mut path)
    }

    fn export_inner(&self, value: &Value, path: &mut Vec<ObjectRef>) -> WardenResult<PlainValue> {
        let r = match value {
            Value::Null => return Ok(PlainValue::Null),
            Value::Bool(b) => return Ok(PlainValue::Bool(*b)),
            Value::Number(n) => return Ok(PlainValue::Number(*n)),
            Value::Str(s) => return Ok(PlainValue::String(s.to_string())),
            Value::Ref(r) => *r,
        };
        if path.contains(&r) {
            return Err(WardenError::NotPlainData("cyclic structure".into()));
        }
        if path.len() >= MAX_WALK_DEPTH {
            return Err(WardenError::LimitExceeded { what: "export depth", limit: MAX_WALK_DEPTH });
        }

        path.push(r);
        let plain = match self.get(r)? {
            HeapObject::Record(fields) => {
                let mut map = BTreeMap::new();
                for (key, item) in fields {
                    map.insert(key.clone(), self.export_inner(item, path)?);
                }
                PlainValue::Object(map)
            }
            HeapObject::List(items) => PlainValue::Array(
                items
                    .iter()
                    .map(|item| self.export_inner(item, path))
                    .collect::<WardenResult<_>>()?,
            ),
            HeapObject::Function(f) => {
                let name = f.def.name.as_deref().unwrap_or("anonymous");
                return Err(WardenError::NotPlainData(format!("function `{}`", name)));
            }
        };
        path.pop();
        Ok(plain)
    }

    /// Fresh heap copy of plain data. Never aliases anything already on the heap.
    pub fn import(&mut self, plain: &PlainValue) -> WardenResult<Value> {
        Ok(match plain {
            PlainValue::Null => Value::Null,
            PlainValue::Bool(b) => Value::Bool(*b),
            PlainValue::Number(n) => Value::Number(*n),
            PlainValue::String(s) => Value::str(s),
            PlainValue::Array(items) => {
                let items = items.iter().map(|item| self.import(item)).collect::<WardenResult<_>>()?;
                self.alloc_list(items)?
            }
            PlainValue::Object(map) => {
                let mut fields = BTreeMap::new();
                for (key, item) in map {
                    fields.insert(key.clone(), self.import(item)?);
                }
                self.alloc_record(fields)?
            }
        })
    }

    /// Display text: strings bare at the top level, structures JSON-like.
    pub fn render(&self, value: &Value) -> String {
        match value {
            Value::Str(s) => s.to_string(),
            other => {
                let mut out = String::new();
                self.render_into(other, &mut Vec::new(), &mut out);
                out
            }
        }
    }

    fn render_into(&self, value: &Value, path: &mut Vec<ObjectRef>, out: &mut String) {
        let r = match value {
            Value::Str(s) => {
                out.push_str(&PlainValue::String(s.to_string()).to_json());
                return;
            }
            Value::Number(n) => {
                out.push_str(&format_number(*n));
                return;
            }
            Value::Ref(r) => *r,
            scalar => {
                out.push_str(&scalar.scalar_text().unwrap_or_default());
                return;
            }
        };
        if path.contains(&r) || path.len() >= MAX_WALK_DEPTH {
            out.push_str("[cyclic]");
            return;
        }

        path.push(r);
        match self.get(r) {
            Ok(HeapObject::Record(fields)) => {
                out.push('{');
                for (i, (key, item)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(key);
                    out.push_str(": ");
                    self.render_into(item, path, out);
                }
                out.push('}');
            }
            Ok(HeapObject::List(items)) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.render_into(item, path, out);
                }
                out.push(']');
            }
            Ok(HeapObject::Function(f)) => {
                out.push_str(&format!("[function {}]", f.def.name.as_deref().unwrap_or("anonymous")));
            }
            Err(_) => out.push_str("[stale]"),
        }
        path.pop();
    }
}
