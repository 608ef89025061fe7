use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{
    diagnostics::{Diagnostic, Fault, QuillError, Result, SourceSpan},
    value::{Value, ValueKind},
};

/// Released-but-held scopes tolerated before the first cycle sweep.
const SWEEP_THRESHOLD: usize = 256;

/// Handle to a scope record stored in a [`ScopeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

impl ScopeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Built-ins. Readable from everywhere, never written by assignment.
    Prelude,
    Root,
    Block,
    Iteration,
    Call,
}

#[derive(Debug)]
struct Scope {
    parent: Option<ScopeId>,
    kind: ScopeKind,
    bindings: IndexMap<String, Value>,
    /// Leases and child scopes pointing here.
    holds: usize,
    /// Not yet released by the code that pushed it.
    active: bool,
    live: bool,
}

impl Scope {
    fn new(parent: Option<ScopeId>, kind: ScopeKind, bindings: IndexMap<String, Value>) -> Self {
        Self {
            parent,
            kind,
            bindings,
            holds: 0,
            active: true,
            live: true,
        }
    }
}

/// Keeps a scope alive for a closure. Dropping the last clone queues the
/// scope for [`ScopeArena::collect`]; the lease itself cannot reach the
/// arena.
#[derive(Debug)]
pub struct ScopeLease {
    id: ScopeId,
    dropped: Rc<RefCell<Vec<ScopeId>>>,
}

impl ScopeLease {
    pub fn id(&self) -> ScopeId {
        self.id
    }
}

impl Drop for ScopeLease {
    fn drop(&mut self) {
        if let Ok(mut dropped) = self.dropped.try_borrow_mut() {
            dropped.push(self.id);
        }
    }
}

/// Scope chain stored as records in a vector and linked by parent handles.
/// Closures keep a counted [`ScopeLease`] instead of an owning pointer. A
/// record is freed once it is released and nothing holds it; a scope that
/// holds a closure capturing itself is left to [`ScopeArena::sweep`].
#[derive(Debug)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
    free: Vec<ScopeId>,
    dropped: Rc<RefCell<Vec<ScopeId>>>,
    /// Live scopes that have been released.
    parked: usize,
    sweep_at: usize,
}

impl Default for ScopeArena {
    fn default() -> Self {
        Self {
            scopes: Vec::new(),
            free: Vec::new(),
            dropped: Rc::default(),
            parked: 0,
            sweep_at: SWEEP_THRESHOLD,
        }
    }
}

impl ScopeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// An arena with a read-only prelude holding `builtins` and an empty
    /// root scope beneath it. Returns the root.
    pub fn with_prelude(builtins: IndexMap<String, Value>) -> (Self, ScopeId) {
        let mut arena = Self::new();
        let mut prelude = Scope::new(None, ScopeKind::Prelude, builtins);
        prelude.holds = 1;
        arena.scopes.push(prelude);
        let root = ScopeId(1);
        arena
            .scopes
            .push(Scope::new(Some(ScopeId(0)), ScopeKind::Root, IndexMap::new()));
        (arena, root)
    }

    pub fn push(&mut self, parent: Option<ScopeId>, kind: ScopeKind) -> Result<ScopeId> {
        self.push_with(parent, kind, IndexMap::new())
    }

    /// Like [`ScopeArena::push`], with initial bindings.
    pub fn push_with(
        &mut self,
        parent: Option<ScopeId>,
        kind: ScopeKind,
        bindings: IndexMap<String, Value>,
    ) -> Result<ScopeId> {
        if let Some(parent) = parent {
            self.scope_mut(parent)?.holds += 1;
        }
        let scope = Scope::new(parent, kind, bindings);
        if let Some(id) = self.free.pop() {
            self.scopes[id.index()] = scope;
            return Ok(id);
        }
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(scope);
        Ok(id)
    }

    /// Ends the active lifetime of a scope. The record (and any ancestors
    /// only it was holding) is freed unless a closure still leases it.
    pub fn release(&mut self, id: ScopeId) -> Result<()> {
        let scope = self.scope_mut(id)?;
        if !scope.active {
            return Err(QuillError::from(Fault::Internal(format!(
                "scope {} released twice",
                id.0
            ))));
        }
        scope.active = false;
        self.parked += 1;
        self.reclaim(id)?;
        self.collect()?;
        if self.parked >= self.sweep_at {
            self.sweep()?;
            self.sweep_at = (self.parked * 2).max(SWEEP_THRESHOLD);
        }
        Ok(())
    }

    /// Keeps `id` and its ancestors alive until every clone of the returned
    /// lease is dropped.
    pub fn lease(&mut self, id: ScopeId) -> Result<Rc<ScopeLease>> {
        self.scope_mut(id)?.holds += 1;
        Ok(Rc::new(ScopeLease {
            id,
            dropped: Rc::clone(&self.dropped),
        }))
    }

    /// Frees scopes whose last lease has been dropped since the previous
    /// collection.
    pub fn collect(&mut self) -> Result<()> {
        loop {
            let dropped = std::mem::take(&mut *self.dropped.borrow_mut());
            if dropped.is_empty() {
                return Ok(());
            }
            for id in dropped {
                self.unhold(id)?;
                self.reclaim(id)?;
            }
        }
    }

    fn unhold(&mut self, id: ScopeId) -> Result<()> {
        let scope = self.scope_mut(id)?;
        scope.holds = scope.holds.checked_sub(1).ok_or_else(|| {
            QuillError::from(Fault::Internal(format!("scope {} has no holds left", id.0)))
        })?;
        Ok(())
    }

    /// Frees `id` if it is inactive and unheld, then walks up to each parent
    /// that the freed scope was the last to hold.
    fn reclaim(&mut self, id: ScopeId) -> Result<()> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let scope = self.scope_mut(current)?;
            if scope.active || scope.holds > 0 {
                break;
            }
            scope.live = false;
            let parent = scope.parent.take();
            // dropping bindings may drop closures, which queue more leases
            let bindings = std::mem::take(&mut scope.bindings);
            self.free.push(current);
            self.parked = self.parked.saturating_sub(1);
            drop(bindings);
            if let Some(parent) = parent {
                self.unhold(parent)?;
            }
            cursor = parent;
        }
        Ok(())
    }

    pub fn define(&mut self, id: ScopeId, name: impl Into<String>, value: Value) -> Result<()> {
        self.scope_mut(id)?.bindings.insert(name.into(), value);
        Ok(())
    }

    pub fn get(&self, id: ScopeId, name: &str, span: SourceSpan) -> Result<Value> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let scope = self.scope(current)?;
            if let Some(value) = scope.bindings.get(name) {
                return Ok(value.clone());
            }
            cursor = scope.parent;
        }
        Err(QuillError::from(Diagnostic::runtime(
            format!("undefined variable `{name}`"),
            span,
        )))
    }

    /// Writes `name` in the nearest writable scope that already binds it,
    /// or creates the binding in `id` itself.
    pub fn assign(&mut self, id: ScopeId, name: &str, value: Value) -> Result<()> {
        let owner = self.resolve_writable(id, name)?.unwrap_or(id);
        self.define(owner, name, value)
    }

    /// Mutable access to an existing, writable binding.
    pub fn binding_mut(
        &mut self,
        id: ScopeId,
        name: &str,
        span: SourceSpan,
    ) -> Result<&mut Value> {
        let Some(owner) = self.resolve_writable(id, name)? else {
            return Err(QuillError::from(Diagnostic::runtime(
                format!("undefined variable `{name}`"),
                span,
            )));
        };
        self.scope_mut(owner)?
            .bindings
            .get_mut(name)
            .ok_or_else(|| QuillError::from(Fault::Internal(format!("binding `{name}` vanished"))))
    }

    /// Frees released scopes that are only reachable from other released
    /// scopes, such as an iteration scope whose own binding holds a closure
    /// over it.
    ///
    /// Trial deletion: every reference found inside the released region is
    /// subtracted from the reference counts. Whatever still has a count left
    /// is held from outside (an active scope, or a value the evaluator is
    /// working with), and everything reachable from it survives.
    pub fn sweep(&mut self) -> Result<()> {
        self.collect()?;
        let garbage: HashSet<ScopeId> = {
            let candidates: Vec<ScopeId> = (0..self.scopes.len())
                .map(|idx| ScopeId(idx as u32))
                .filter(|id| self.is_parked(*id))
                .collect();
            if candidates.is_empty() {
                return Ok(());
            }
            let mut census = Census::default();
            for id in &candidates {
                census.scope(&self.scopes[id.index()]);
            }
            let alive = census.alive(self, &candidates);
            candidates
                .into_iter()
                .filter(|id| !alive.contains(id))
                .collect()
        };
        if garbage.is_empty() {
            return Ok(());
        }

        let mut doomed = Vec::with_capacity(garbage.len());
        let mut survivors = Vec::new();
        for id in &garbage {
            let scope = &mut self.scopes[id.index()];
            scope.live = false;
            scope.holds = 0;
            let parent = scope.parent.take();
            doomed.push(std::mem::take(&mut scope.bindings));
            self.free.push(*id);
            self.parked = self.parked.saturating_sub(1);
            if let Some(parent) = parent {
                if !garbage.contains(&parent) {
                    self.unhold(parent)?;
                    survivors.push(parent);
                }
            }
        }
        drop(doomed);
        // leases on freed scopes were just dropped along with the bindings
        self.dropped.borrow_mut().retain(|id| !garbage.contains(id));
        for parent in survivors {
            if self.is_live(parent) {
                self.reclaim(parent)?;
            }
        }
        self.collect()
    }

    fn is_parked(&self, id: ScopeId) -> bool {
        self.scopes
            .get(id.index())
            .is_some_and(|scope| scope.live && !scope.active)
    }

    fn is_live(&self, id: ScopeId) -> bool {
        self.scopes.get(id.index()).is_some_and(|scope| scope.live)
    }

    /// Scope records not yet freed, leased ones included.
    pub fn live_scopes(&self) -> usize {
        self.scopes.iter().filter(|scope| scope.live).count()
    }

    fn resolve_writable(&self, id: ScopeId, name: &str) -> Result<Option<ScopeId>> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let scope = self.scope(current)?;
            if scope.kind == ScopeKind::Prelude {
                break;
            }
            if scope.bindings.contains_key(name) {
                return Ok(Some(current));
            }
            cursor = scope.parent;
        }
        Ok(None)
    }

    fn scope(&self, id: ScopeId) -> Result<&Scope> {
        match self.scopes.get(id.index()) {
            Some(scope) if scope.live => Ok(scope),
            _ => Err(dangling(id)),
        }
    }

    fn scope_mut(&mut self, id: ScopeId) -> Result<&mut Scope> {
        match self.scopes.get_mut(id.index()) {
            Some(scope) if scope.live => Ok(scope),
            _ => Err(dangling(id)),
        }
    }
}

/// References counted from inside the released region during a sweep.
#[derive(Default)]
struct Census<'a> {
    values: HashMap<*const ValueKind, (usize, &'a Rc<ValueKind>)>,
    leases: HashMap<*const ScopeLease, (usize, &'a Rc<ScopeLease>)>,
    scopes: HashMap<ScopeId, usize>,
}

enum Reach<'a> {
    Value(&'a Rc<ValueKind>),
    Lease(&'a Rc<ScopeLease>),
    Scope(ScopeId),
}

impl<'a> Census<'a> {
    fn scope(&mut self, scope: &'a Scope) {
        if let Some(parent) = scope.parent {
            *self.scopes.entry(parent).or_default() += 1;
        }
        for value in scope.bindings.values() {
            self.value(value);
        }
    }

    fn value(&mut self, value: &'a Value) {
        let mut pending = vec![&value.0];
        while let Some(payload) = pending.pop() {
            if !has_references(payload) {
                continue;
            }
            let (count, _) = self
                .values
                .entry(Rc::as_ptr(payload))
                .or_insert((0, payload));
            *count += 1;
            if *count > 1 {
                continue;
            }
            match &**payload {
                ValueKind::Array(items) => pending.extend(items.iter().map(|item| &item.0)),
                ValueKind::Struct(fields) => pending.extend(fields.values().map(|item| &item.0)),
                ValueKind::Function(closure) => {
                    let (count, _) = self
                        .leases
                        .entry(Rc::as_ptr(&closure.env))
                        .or_insert((0, &closure.env));
                    *count += 1;
                    if *count == 1 {
                        *self.scopes.entry(closure.env.id()).or_default() += 1;
                    }
                }
                _ => {}
            }
        }
    }

    /// Candidates reachable from something the region does not account for.
    fn alive(&self, arena: &'a ScopeArena, candidates: &[ScopeId]) -> HashSet<ScopeId> {
        let mut pending: Vec<Reach<'a>> = Vec::new();
        for &(count, payload) in self.values.values() {
            if Rc::strong_count(payload) > count {
                pending.push(Reach::Value(payload));
            }
        }
        for &(count, lease) in self.leases.values() {
            if Rc::strong_count(lease) > count {
                pending.push(Reach::Lease(lease));
            }
        }
        for id in candidates {
            let internal = self.scopes.get(id).copied().unwrap_or(0);
            if arena.scopes[id.index()].holds > internal {
                pending.push(Reach::Scope(*id));
            }
        }

        let mut seen_values = HashSet::new();
        let mut seen_leases = HashSet::new();
        let mut alive = HashSet::new();
        while let Some(next) = pending.pop() {
            match next {
                Reach::Value(payload) => {
                    if !seen_values.insert(Rc::as_ptr(payload)) {
                        continue;
                    }
                    match &**payload {
                        ValueKind::Array(items) => {
                            pending.extend(items.iter().map(|item| Reach::Value(&item.0)))
                        }
                        ValueKind::Struct(fields) => {
                            pending.extend(fields.values().map(|item| Reach::Value(&item.0)))
                        }
                        ValueKind::Function(closure) => pending.push(Reach::Lease(&closure.env)),
                        _ => {}
                    }
                }
                Reach::Lease(lease) => {
                    if seen_leases.insert(Rc::as_ptr(lease)) {
                        pending.push(Reach::Scope(lease.id()));
                    }
                }
                Reach::Scope(id) => {
                    if !arena.is_parked(id) || !alive.insert(id) {
                        continue;
                    }
                    let scope = &arena.scopes[id.index()];
                    if let Some(parent) = scope.parent {
                        pending.push(Reach::Scope(parent));
                    }
                    pending.extend(scope.bindings.values().map(|value| Reach::Value(&value.0)));
                }
            }
        }
        alive
    }
}

fn has_references(payload: &ValueKind) -> bool {
    matches!(
        payload,
        ValueKind::Array(_) | ValueKind::Struct(_) | ValueKind::Function(_)
    )
}

fn dangling(id: ScopeId) -> QuillError {
    QuillError::from(Fault::Internal(format!("dangling scope handle {}", id.0)))
}
