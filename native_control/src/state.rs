/* Shared state of one accessor chain execution
 *
 * The state is a stack of scopes. The bottom scope is the root struct; each
 * `with_child` pushes a scope for a nested struct, a remote struct or a
 * single field, and `and` pops it again, committing a written value into
 * the parent. Scope values load lazily from memory on first use.
 */

use crate::control::ControlTree;
use crate::errors::{AccessError, AccessResult};
use native_layout::{FieldError, FieldKind, Value};
use native_struct::BoundStruct;
use std::sync::Arc;

pub(crate) enum Target<'a> {
    Root(&'a BoundStruct),
    Child(BoundStruct),
    /// A primitive or array field of the struct in the scope below.
    Field,
}

impl Target<'_> {
    fn bound(&self) -> Option<&BoundStruct> {
        match self {
            Target::Root(bound) => Some(bound),
            Target::Child(bound) => Some(bound),
            Target::Field => None,
        }
    }
}

pub(crate) struct Scope<'a> {
    pub(crate) name: String,
    /* path relative to the scope below */
    pub(crate) path: Vec<String>,
    pub(crate) target: Target<'a>,
    /* controls visible inside this scope; None means the control's own tree */
    pub(crate) tree: Option<Arc<ControlTree>>,
    pub(crate) step: i128,
    pub(crate) remote: bool,
    value: Option<Value>,
    dirty: bool,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(name: String, path: Vec<String>, target: Target<'a>) -> Self {
        Self {
            name,
            path,
            target,
            tree: None,
            step: 1,
            remote: false,
            value: None,
            dirty: false,
        }
    }

    pub(crate) fn bound(&self) -> Option<&BoundStruct> {
        self.target.bound()
    }
}

/// Scope stack and result of a chain run against one bound struct.
///
/// After a failed run the state keeps whatever the executed nodes produced,
/// so callers can see how far the chain got.
pub struct AccessorState<'a> {
    root: &'a BoundStruct,
    scopes: Vec<Scope<'a>>,
    result: Option<Value>,
}

impl<'a> AccessorState<'a> {
    pub fn new(root: &'a BoundStruct) -> Self {
        let name = root.prototype().display_name().to_string();
        Self {
            root,
            scopes: vec![Scope::new(name, Vec::new(), Target::Root(root))],
            result: None,
        }
    }

    /// Value recorded by `get()`, if any.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Value of the innermost scope, if it was loaded or written.
    pub fn current_value(&self) -> Option<&Value> {
        self.scopes.last().and_then(|s| s.value.as_ref())
    }

    /// Number of open scopes, counting the root.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub(crate) fn root(&self) -> &'a BoundStruct {
        self.root
    }

    pub(crate) fn top(&self) -> &Scope<'a> {
        let last = self.scopes.len() - 1;
        &self.scopes[last]
    }

    pub(crate) fn push(&mut self, scope: Scope<'a>) {
        self.scopes.push(scope);
    }

    pub(crate) fn set_result(&mut self, value: Value) {
        self.result = Some(value);
    }

    pub(crate) fn set(&mut self, value: Value) {
        let last = self.scopes.len() - 1;
        let scope = &mut self.scopes[last];
        scope.value = Some(value);
        scope.dirty = true;
    }

    pub(crate) fn load(&mut self) -> AccessResult<Value> {
        self.load_at(self.scopes.len() - 1)
    }

    fn load_at(&mut self, i: usize) -> AccessResult<Value> {
        if let Some(value) = &self.scopes[i].value {
            return Ok(value.clone());
        }
        let value = match &self.scopes[i].target {
            Target::Root(bound) => bound.snapshot()?,
            Target::Child(bound) => bound.snapshot()?,
            Target::Field => {
                let owner = self.owner(i)?;
                owner.get(&segments(&self.scopes[i].path))?
            }
        };
        self.scopes[i].value = Some(value.clone());
        Ok(value)
    }

    fn owner(&self, i: usize) -> AccessResult<&BoundStruct> {
        i.checked_sub(1)
            .and_then(|below| self.scopes[below].bound())
            .ok_or_else(|| {
                FieldError::NotAggregate {
                    path: self.scopes[i].name.clone(),
                }
                .into()
            })
    }

    /// Stores the innermost scope's value into memory.
    pub(crate) fn commit_top(&mut self) -> AccessResult<()> {
        self.commit_at(self.scopes.len() - 1)
    }

    /// Commits every dirty scope, innermost first.
    pub(crate) fn commit_all(&mut self) -> AccessResult<()> {
        for i in (0..self.scopes.len()).rev() {
            self.commit_at(i)?;
        }
        Ok(())
    }

    fn commit_at(&mut self, i: usize) -> AccessResult<()> {
        let scope = &self.scopes[i];
        if !scope.dirty {
            return Ok(());
        }
        let Some(value) = scope.value.clone() else {
            return Ok(());
        };

        match &scope.target {
            Target::Field => {
                let owner = self.owner(i)?;
                let path = segments(&scope.path);
                match &value {
                    Value::Address(addr) => owner.put_address(&path, *addr)?,
                    other => owner.put(&path, other.clone())?,
                }
            }
            Target::Root(_) | Target::Child(_) => {
                let Value::Struct(members) = &value else {
                    return Err(AccessError::Uncommittable {
                        path: scope.name.clone(),
                        found: value.kind_name(),
                    });
                };
                if let Some(bound) = scope.bound() {
                    bound.put_all(members)?;
                }
            }
        }

        self.scopes[i].dirty = false;
        /* Reload from memory on next use; the bytes are the truth now */
        self.scopes[i].value = None;
        if i > 0 && !self.scopes[i].remote {
            let (path, fresh) = self.committed_view(i, value)?;
            self.refresh_ancestors(i, path, fresh);
        }
        Ok(())
    }

    /* What scope `i` changed, as seen from the scope below it. A write
     * inside a union changes every member of that union, so the whole
     * union is reread; anything else is just the committed value. */
    fn committed_view(&self, i: usize, value: Value) -> AccessResult<(Vec<String>, Value)> {
        let path = &self.scopes[i].path;
        let owner = self.owner(i)?;
        for k in 1..=path.len() {
            let prefix = segments(&path[..k]);
            if let Ok(field) = owner.prototype().resolve(&prefix) {
                if matches!(field.kind, FieldKind::Union(_)) {
                    let fresh = owner.wrap_child_embedded(&field.path)?.snapshot()?;
                    return Ok((path[..k].to_vec(), fresh));
                }
            }
        }
        Ok((path.clone(), value))
    }

    /* Keeps the cached values below scope `i` in step with memory. Clean
     * caches are dropped and reload on next use. Written ones get `value`
     * patched in at `path` (relative to scope `i - 1`). A remote scope
     * lives in other memory and stops the walk. */
    fn refresh_ancestors(&mut self, i: usize, mut path: Vec<String>, value: Value) {
        let mut j = i - 1;
        loop {
            let below = &mut self.scopes[j];
            if below.dirty {
                if let Some(cached) = below.value.as_mut() {
                    patch(cached, &path, value.clone());
                }
            } else {
                below.value = None;
            }
            if j == 0 || below.remote {
                break;
            }
            path.splice(0..0, below.path.iter().cloned());
            j -= 1;
        }
    }

    /// Pops the innermost scope, committing it first if it was written.
    pub(crate) fn exit(&mut self) -> AccessResult<()> {
        if self.scopes.len() <= 1 {
            return Ok(());
        }
        self.commit_top()?;
        self.scopes.pop();
        Ok(())
    }

    /// Drops every cached value after memory changed underneath.
    pub(crate) fn invalidate(&mut self) {
        for scope in &mut self.scopes {
            scope.value = None;
            scope.dirty = false;
        }
    }

    /// Final step of `call()`: commits a written root struct and yields the
    /// `get()` result, or the root value when nothing was requested.
    pub(crate) fn finish(mut self) -> AccessResult<Value> {
        if matches!(self.scopes[0].value, Some(Value::Struct(_))) {
            self.commit_at(0)?;
        }
        match self.result.take() {
            Some(value) => Ok(value),
            None => self.load_at(0),
        }
    }
}

fn segments(path: &[String]) -> Vec<&str> {
    path.iter().map(String::as_str).collect()
}

/* Replaces the member at `path` inside a struct or array value, if present */
fn patch(target: &mut Value, path: &[String], new: Value) {
    let Some((first, rest)) = path.split_first() else {
        *target = new;
        return;
    };
    let slot = match target {
        Value::Struct(members) => members.get_mut(first),
        Value::Array(items) => first.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
        _ => None,
    };
    if let Some(slot) = slot {
        patch(slot, rest, new);
    }
}
