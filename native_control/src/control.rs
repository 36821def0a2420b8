/* Controls: named views over the fields of a query struct */

use crate::accessor::{Accessor, Root};
use crate::config::ControlConfig;
use crate::endpoint::{NativeEndpoint, ParamKind};
use native_layout::{split_path, ControlKind, QueryDefinition, StructPrototype};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A named control mapped onto a field path, possibly with sub-controls.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlNode {
    pub name: String,
    pub path: Vec<String>,
    pub kind: ControlKind,
    /// Amount applied by `increase`/`decrease`.
    pub step: i128,
    /// Value names for enum controls.
    pub values: Vec<String>,
    pub children: Arc<ControlTree>,
}

impl ControlNode {
    pub fn new(name: impl Into<String>, path: &str) -> Self {
        Self {
            name: name.into(),
            path: split_path(path).into_iter().map(str::to_string).collect(),
            kind: ControlKind::Number,
            step: 1,
            values: Vec::new(),
            children: Arc::new(ControlTree::default()),
        }
    }

    pub fn with_step(mut self, step: i128) -> Self {
        self.step = step;
        self
    }

    pub fn with_values(mut self, values: Vec<String>) -> Self {
        self.kind = ControlKind::Enum;
        self.values = values;
        self
    }

    pub fn with_children(mut self, children: ControlTree) -> Self {
        self.children = Arc::new(children);
        self
    }

    /// Index of an enum value name.
    pub fn value_of(&self, name: &str) -> Option<i128> {
        self.values.iter().position(|v| v == name).map(|i| i as i128)
    }
}

/// Control names at one level, resolved relative to the enclosing scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlTree {
    nodes: BTreeMap<String, ControlNode>,
}

impl ControlTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, node: ControlNode) -> Self {
        self.insert(node);
        self
    }

    pub fn insert(&mut self, node: ControlNode) {
        self.nodes.insert(node.name.clone(), node);
    }

    pub fn get(&self, name: &str) -> Option<&ControlNode> {
        self.nodes.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn from_definition(definition: &QueryDefinition) -> Self {
        let mut tree = ControlTree::new();
        for mapping in &definition.controls {
            tree.insert(ControlNode {
                name: mapping.name.clone(),
                path: mapping.path.clone(),
                kind: mapping.kind,
                step: 1,
                values: mapping.values.clone(),
                children: Arc::new(ControlTree::default()),
            });
        }
        tree
    }
}

#[derive(Clone)]
pub(crate) struct QueryEndpoint {
    pub(crate) index: u32,
    pub(crate) kind: ParamKind,
    pub(crate) endpoint: Arc<dyn NativeEndpoint>,
}

/* Everything an accessor chain needs at execution time */
#[derive(Clone)]
pub(crate) struct ControlBinding {
    pub(crate) name: String,
    pub(crate) prototype: Arc<StructPrototype>,
    pub(crate) tree: Arc<ControlTree>,
    pub(crate) endpoint: Option<QueryEndpoint>,
    pub(crate) config: ControlConfig,
    pub(crate) allow_remote: bool,
}

/// A control over one query struct. Each `access()` starts a fresh chain.
#[derive(Clone)]
pub struct QueryControl {
    binding: Arc<ControlBinding>,
}

impl QueryControl {
    pub fn new(name: impl Into<String>, prototype: Arc<StructPrototype>) -> Self {
        Self {
            binding: Arc::new(ControlBinding {
                name: name.into(),
                prototype,
                tree: Arc::new(ControlTree::default()),
                endpoint: None,
                config: ControlConfig::default(),
                allow_remote: false,
            }),
        }
    }

    /// Builds a control from a loaded query definition.
    pub fn from_definition(
        definition: &QueryDefinition,
        kind: ParamKind,
        endpoint: Arc<dyn NativeEndpoint>,
    ) -> Self {
        Self::new(definition.name.clone(), Arc::clone(&definition.prototype))
            .with_tree(ControlTree::from_definition(definition))
            .with_endpoint(definition.index, kind, endpoint)
    }

    fn edit(self, f: impl FnOnce(&mut ControlBinding)) -> Self {
        let mut binding = Arc::unwrap_or_clone(self.binding);
        f(&mut binding);
        Self {
            binding: Arc::new(binding),
        }
    }

    pub fn with_tree(self, tree: ControlTree) -> Self {
        self.edit(|b| b.tree = Arc::new(tree))
    }

    pub fn with_endpoint(self, index: u32, kind: ParamKind, endpoint: Arc<dyn NativeEndpoint>) -> Self {
        self.edit(|b| {
            b.endpoint = Some(QueryEndpoint {
                index,
                kind,
                endpoint,
            })
        })
    }

    pub fn with_config(self, config: ControlConfig) -> Self {
        self.edit(|b| b.config = config)
    }

    /// Lets `with_child` follow pointer fields into remote memory.
    ///
    /// # Safety
    ///
    /// Every pointer field reached through this control's chains must hold
    /// null or the address of a live struct of the field's target type.
    pub unsafe fn allow_remote_children(self) -> Self {
        self.edit(|b| b.allow_remote = true)
    }

    pub fn name(&self) -> &str {
        &self.binding.name
    }

    pub fn prototype(&self) -> &Arc<StructPrototype> {
        &self.binding.prototype
    }

    pub fn tree(&self) -> &ControlTree {
        &self.binding.tree
    }

    pub fn query_index(&self) -> Option<u32> {
        self.binding.endpoint.as_ref().map(|e| e.index)
    }

    /// Starts an accessor chain over this control.
    pub fn access(&self) -> Accessor<Root> {
        Accessor::new(Arc::clone(&self.binding))
    }
}

impl fmt::Debug for QueryControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryControl")
            .field("name", &self.binding.name)
            .field("prototype", &self.binding.prototype.display_name())
            .field("query", &self.query_index())
            .field("allow_remote", &self.binding.allow_remote)
            .finish()
    }
}
