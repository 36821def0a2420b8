/* Fluent accessor chains
 *
 * Every fluent call appends one node that points back at its parent, so a
 * chain is a singly linked list from the newest node to the root. `call()`
 * walks back to the root and runs the nodes parent first, which replays the
 * operations in the order they were written.
 *
 * The scope depth is tracked in the type: `with_child` wraps the scope type
 * in `Nested`, and only a nested accessor has `and()`.
 */

use crate::control::{ControlBinding, ControlTree};
use crate::errors::{AccessError, AccessResult, TimeoutError};
use crate::state::{AccessorState, Scope, Target};
use native_layout::{split_path, FieldError, FieldKind, Value};
use native_struct::BoundStruct;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Scope marker for a chain at its root.
pub struct Root;

/// Scope marker for a chain inside a child of scope `P`.
///
/// A chain that leaves a scope it never entered does not compile:
///
/// ```compile_fail
/// fn chain(control: &native_control::QueryControl) {
///     let _ = control.access().and();
/// }
/// ```
///
/// ```
/// fn chain(control: &native_control::QueryControl) {
///     let _ = control.access().with_child("a").write(1).and().get();
/// }
/// ```
pub struct Nested<P>(PhantomData<P>);

type ReadHandler = Arc<dyn Fn(&Value) + Send + Sync>;
type Supplier = Arc<dyn Fn() -> Value + Send + Sync>;
type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

enum Mutator {
    Read(ReadHandler),
    Write(Value),
    Supply(Supplier),
    Update(Transform),
    /* +1 for increase, -1 for decrease, scaled by the control's step */
    Step(i128),
    EnterChild(String),
    ExitChild,
    Get,
    Commit,
    Pull,
    Push,
}

impl Mutator {
    fn name(&self) -> &'static str {
        match self {
            Mutator::Read(_) => "read",
            Mutator::Write(_) => "write",
            Mutator::Supply(_) => "write_with",
            Mutator::Update(_) => "update",
            Mutator::Step(_) => "step",
            Mutator::EnterChild(_) => "with_child",
            Mutator::ExitChild => "and",
            Mutator::Get => "get",
            Mutator::Commit => "commit",
            Mutator::Pull => "pull",
            Mutator::Push => "push",
        }
    }
}

struct AccessorNode {
    parent: Option<Arc<AccessorNode>>,
    timeout: Option<Duration>,
    op: Option<Mutator>,
}

pub struct Accessor<S = Root> {
    binding: Arc<ControlBinding>,
    node: Arc<AccessorNode>,
    _scope: PhantomData<fn() -> S>,
}

impl<S> Clone for Accessor<S> {
    fn clone(&self) -> Self {
        Self {
            binding: Arc::clone(&self.binding),
            node: Arc::clone(&self.node),
            _scope: PhantomData,
        }
    }
}

impl Accessor<Root> {
    pub(crate) fn new(binding: Arc<ControlBinding>) -> Self {
        Self {
            binding,
            node: Arc::new(AccessorNode {
                parent: None,
                timeout: None,
                op: None,
            }),
            _scope: PhantomData,
        }
    }

    /// Runs the chain against a freshly allocated instance of the control's
    /// struct and returns the `get()` result, or the root value if the chain
    /// never called `get()`.
    pub fn call(self) -> AccessResult<Value> {
        let mut bound = BoundStruct::bind_owned(Arc::clone(&self.binding.prototype))?;
        let result = self
            .stamp_size(&bound)
            .and_then(|_| self.run(&bound));
        bound.close();
        result
    }

    /// Runs the chain against a caller-supplied instance.
    pub fn call_with(self, bound: &BoundStruct) -> AccessResult<Value> {
        self.run(bound)
    }

    fn run(&self, bound: &BoundStruct) -> AccessResult<Value> {
        let mut state = AccessorState::new(bound);
        self.execute(&mut state)?;
        state.finish()
    }

    /* Query structs lead with their own size, which native components check */
    fn stamp_size(&self, bound: &BoundStruct) -> AccessResult<()> {
        let prototype = &self.binding.prototype;
        if let Some(first) = prototype.fields().first() {
            let integer = matches!(first.kind, FieldKind::Primitive(ty) if ty.is_integer());
            if first.name == "size" && integer {
                bound.put(&["size"], Value::Int(prototype.size() as i128))?;
            }
        }
        Ok(())
    }
}

impl<P> Accessor<Nested<P>> {
    /// Leaves the current child scope, storing its value if it was written.
    pub fn and(self) -> Accessor<P> {
        self.chain(Some(Mutator::ExitChild))
    }
}

impl<S> Accessor<S> {
    fn chain<T>(self, op: Option<Mutator>) -> Accessor<T> {
        let timeout = self.node.timeout;
        self.chain_with_timeout(op, timeout)
    }

    fn chain_with_timeout<T>(self, op: Option<Mutator>, timeout: Option<Duration>) -> Accessor<T> {
        Accessor {
            binding: self.binding,
            node: Arc::new(AccessorNode {
                parent: Some(self.node),
                timeout,
                op,
            }),
            _scope: PhantomData,
        }
    }

    /// Passes the current value to `handler`.
    pub fn read(self, handler: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.chain(Some(Mutator::Read(Arc::new(handler))))
    }

    /// Replaces the current value. It reaches memory when the scope is left
    /// with `and()`, on `commit()`/`push()`, or at the end of the call.
    pub fn write(self, value: impl Into<Value>) -> Self {
        self.chain(Some(Mutator::Write(value.into())))
    }

    /// Like `write`, with the value produced when the node runs.
    pub fn write_with(self, supplier: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.chain(Some(Mutator::Supply(Arc::new(supplier))))
    }

    pub fn update(self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.chain(Some(Mutator::Update(Arc::new(f))))
    }

    /// Adds the control's step to an integer value. Any other value fails
    /// with `AccessError::NotNumeric`.
    pub fn increase(self) -> Self {
        self.chain(Some(Mutator::Step(1)))
    }

    pub fn decrease(self) -> Self {
        self.chain(Some(Mutator::Step(-1)))
    }

    /// Records the current value as the chain's result.
    pub fn get(self) -> Self {
        self.chain(Some(Mutator::Get))
    }

    /// Stores the current value into memory without leaving the scope.
    pub fn commit(self) -> Self {
        self.chain(Some(Mutator::Commit))
    }

    /// Refreshes the whole struct from the native endpoint.
    pub fn pull(self) -> Self {
        self.chain(Some(Mutator::Pull))
    }

    /// Commits pending values and sends the whole struct to the endpoint.
    pub fn push(self) -> Self {
        self.chain(Some(Mutator::Push))
    }

    /// Bounds every later push and pull in this chain.
    pub fn set_timeout(self, timeout: Duration) -> Self {
        self.chain_with_timeout(None, Some(timeout))
    }

    /// Enters a child by control name, or by field path when no control of
    /// that name exists in the current scope.
    pub fn with_child(self, name: impl Into<String>) -> Accessor<Nested<S>> {
        self.chain(Some(Mutator::EnterChild(name.into())))
    }

    /// Writes `value` into a single child and returns to this scope.
    pub fn set_child(self, value: impl Into<Value>, name: impl Into<String>) -> Self {
        self.with_child(name).write(value).and()
    }

    /// Runs every node of the chain, parent first, against `state`. Stops at
    /// the first failing node and leaves `state` as that node found it.
    pub fn execute(&self, state: &mut AccessorState<'_>) -> AccessResult<()> {
        let mut nodes = Vec::new();
        let mut cursor = Some(&self.node);
        while let Some(node) = cursor {
            nodes.push(node);
            cursor = node.parent.as_ref();
        }

        for node in nodes.iter().rev() {
            if let Some(op) = &node.op {
                let timeout = node.timeout.or(self.binding.config.default_timeout);
                if self.binding.config.trace_calls {
                    trace!(
                        "{}: {} at depth {}",
                        self.binding.name,
                        op.name(),
                        state.depth()
                    );
                }
                self.apply(op, timeout, state)?;
            }
        }
        Ok(())
    }

    fn apply(
        &self,
        op: &Mutator,
        timeout: Option<Duration>,
        state: &mut AccessorState<'_>,
    ) -> AccessResult<()> {
        match op {
            Mutator::Read(handler) => {
                let value = state.load()?;
                handler(&value);
            }
            Mutator::Write(value) => state.set(value.clone()),
            Mutator::Supply(supplier) => state.set(supplier()),
            Mutator::Update(f) => {
                let value = state.load()?;
                state.set(f(value));
            }
            Mutator::Step(direction) => match state.load()? {
                Value::Int(v) => {
                    let step = state.top().step;
                    state.set(Value::Int(v.saturating_add(direction * step)));
                }
                other => {
                    return Err(AccessError::NotNumeric {
                        path: state.top().name.clone(),
                        found: other.kind_name(),
                    })
                }
            },
            Mutator::EnterChild(name) => self.enter(name, state)?,
            Mutator::ExitChild => state.exit()?,
            Mutator::Get => {
                let value = state.load()?;
                state.set_result(value);
            }
            Mutator::Commit => state.commit_top()?,
            Mutator::Pull => self.pull_from_endpoint(timeout, state)?,
            Mutator::Push => self.push_to_endpoint(timeout, state)?,
        }
        Ok(())
    }

    fn enter(&self, name: &str, state: &mut AccessorState<'_>) -> AccessResult<()> {
        let top = state.top();
        let tree = top
            .tree
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.binding.tree));
        let (path, step, children) = match tree.get(name) {
            Some(node) => (node.path.clone(), node.step, Arc::clone(&node.children)),
            None => (
                split_path(name).into_iter().map(str::to_string).collect(),
                1,
                Arc::new(ControlTree::default()),
            ),
        };

        let bound = top.bound().ok_or_else(|| FieldError::NotAggregate {
            path: top.name.clone(),
        })?;
        let segments: Vec<&str> = path.iter().map(String::as_str).collect();
        let field = bound.prototype().resolve(&segments)?;

        let (target, remote) = match &field.kind {
            FieldKind::Primitive(_) | FieldKind::Array { .. } => (Target::Field, false),
            FieldKind::Struct(_) | FieldKind::Union(_) => {
                (Target::Child(bound.wrap_child_embedded(&field.path)?), false)
            }
            FieldKind::Pointer { .. } => {
                if !self.binding.allow_remote {
                    return Err(AccessError::RemoteDisabled { path: field.path });
                }
                /* SAFETY: the control was opted into remote children, whose
                 * contract covers every pointer field its chains reach */
                let child = unsafe { bound.wrap_child_remote(&field.path)? };
                (Target::Child(child), true)
            }
        };

        let mut scope = Scope::new(name.to_string(), path, target);
        scope.tree = Some(children);
        scope.step = step;
        scope.remote = remote;
        state.push(scope);
        Ok(())
    }

    fn check_elapsed(&self, started: Instant, timeout: Option<Duration>) -> AccessResult<()> {
        if let Some(timeout) = timeout {
            let elapsed = started.elapsed();
            if elapsed > timeout {
                return Err(TimeoutError {
                    query: self.binding.name.clone(),
                    timeout,
                    elapsed,
                }
                .into());
            }
        }
        Ok(())
    }

    fn pull_from_endpoint(
        &self,
        timeout: Option<Duration>,
        state: &mut AccessorState<'_>,
    ) -> AccessResult<()> {
        let endpoint = self
            .binding
            .endpoint
            .as_ref()
            .ok_or_else(|| AccessError::NoEndpoint {
                control: self.binding.name.clone(),
                op: "pull",
            })?;
        let started = Instant::now();
        state
            .root()
            .with_bytes_mut(|buf| {
                endpoint
                    .endpoint
                    .pull(endpoint.index, endpoint.kind, buf, timeout)
            })?
            .map_err(|source| AccessError::Endpoint {
                query: self.binding.name.clone(),
                source,
            })?;
        self.check_elapsed(started, timeout)?;
        state.invalidate();
        Ok(())
    }

    fn push_to_endpoint(
        &self,
        timeout: Option<Duration>,
        state: &mut AccessorState<'_>,
    ) -> AccessResult<()> {
        let endpoint = self
            .binding
            .endpoint
            .as_ref()
            .ok_or_else(|| AccessError::NoEndpoint {
                control: self.binding.name.clone(),
                op: "push",
            })?;
        state.commit_all()?;
        let started = Instant::now();
        state
            .root()
            .with_bytes(|buf| {
                endpoint
                    .endpoint
                    .push(endpoint.index, endpoint.kind, buf, timeout)
            })?
            .map_err(|source| AccessError::Endpoint {
                query: self.binding.name.clone(),
                source,
            })?;
        self.check_elapsed(started, timeout)
    }
}
