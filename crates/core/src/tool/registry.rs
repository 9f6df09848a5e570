use std::collections::HashMap;
use std::fmt::{self, Debug};

use rapport_model::ModelTool;

use crate::tool::ToolObject;

/// A fixed mapping from tool names to the tools the model may call.
///
/// The set is closed once the registry is built. Descriptors are listed in
/// registration order.
#[derive(Default)]
pub struct Registry {
    tools: Vec<Box<dyn ToolObject>>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub(crate) fn with_tools(tools: Vec<Box<dyn ToolObject>>) -> Self {
        let mut registry = Self {
            tools: Vec::with_capacity(tools.len()),
            index: HashMap::with_capacity(tools.len()),
        };
        for tool in tools {
            let name = tool.name().to_owned();
            if registry.index.contains_key(&name) {
                warn!("ignoring duplicated tool: {name}");
                continue;
            }
            registry.index.insert(name, registry.tools.len());
            registry.tools.push(tool);
        }
        registry
    }

    /// Returns the tool registered under `name`.
    #[inline]
    pub fn lookup(&self, name: &str) -> Option<&dyn ToolObject> {
        self.index.get(name).map(|idx| self.tools[*idx].as_ref())
    }

    /// Returns the descriptors advertised to the model on every request.
    #[inline]
    pub fn descriptors(&self) -> Vec<ModelTool> {
        self.tools.iter().map(|tool| tool.descriptor()).collect()
    }

    /// Returns the number of registered tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tool is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|tool| tool.name()))
            .finish()
    }
}
