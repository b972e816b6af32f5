//! Tools: the capabilities a reasoning run can invoke.
//!
//! A registry entry is either a **leaf** tool, which wraps a direct call
//! (an API query, a calculation), or a **composite** tool, which wraps a
//! nested reasoning run over its own registry. Composite registries may
//! contain further composites to any depth, but never a cycle: both
//! [`ToolRegistry::register`] and [`ToolCatalog::build_registry`] refuse a
//! tool that would (directly or transitively) contain itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{RegistryError, ToolError};
use crate::schema::InputSchema;

/// Name, description, and argument shape of a tool. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: InputSchema) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// The textual block concatenated into the planning prompt.
    pub fn render(&self) -> String {
        format!(
            "{}: {}, args: {}",
            self.name,
            self.description,
            self.input_schema.render_args()
        )
    }
}

/// A leaf capability.
///
/// Arguments have already been validated against `spec().input_schema`
/// when `invoke` is called.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    /// Run the tool and return its observation text.
    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError>;
}

/// A tool backed by a nested reasoning run.
#[derive(Clone)]
pub struct CompositeTool {
    pub spec: ToolSpec,
    /// Tools available to the nested run
    pub registry: Arc<ToolRegistry>,
    /// System persona of the nested run
    pub persona: Option<String>,
    /// Step cap of the nested run (falls back to the parent config)
    pub max_steps: Option<u32>,
}

impl CompositeTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, registry: Arc<ToolRegistry>) -> Self {
        let description = description.into();
        Self {
            spec: ToolSpec::new(
                name,
                description,
                InputSchema::single_input(
                    "Complete question for the assistant, with all the context needed to answer it",
                ),
            ),
            registry,
            persona: None,
            max_steps: None,
        }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    pub fn with_max_steps(mut self, max: u32) -> Self {
        self.max_steps = Some(max);
        self
    }
}

impl std::fmt::Debug for CompositeTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeTool")
            .field("name", &self.spec.name)
            .field("tools", &self.registry.tool_names())
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

/// A registry entry, tagged by how it is executed.
#[derive(Clone)]
pub enum ToolEntry {
    Leaf(Arc<dyn Tool>),
    Composite(Arc<CompositeTool>),
}

impl ToolEntry {
    pub fn leaf(tool: impl Tool + 'static) -> Self {
        ToolEntry::Leaf(Arc::new(tool))
    }

    pub fn composite(tool: CompositeTool) -> Self {
        ToolEntry::Composite(Arc::new(tool))
    }

    pub fn spec(&self) -> &ToolSpec {
        match self {
            ToolEntry::Leaf(tool) => tool.spec(),
            ToolEntry::Composite(tool) => &tool.spec,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec().name
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, ToolEntry::Composite(_))
    }
}

/// Name-keyed set of tools available to one reasoning run.
///
/// Ordered by name so the rendered prompt is stable between runs.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    ///
    /// Fails if the name is taken, or if the entry is a composite whose
    /// subtree contains a tool with its own name.
    pub fn register(&mut self, entry: ToolEntry) -> Result<(), RegistryError> {
        let name = entry.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        if let ToolEntry::Composite(composite) = &entry {
            let mut path = vec![name.clone()];
            if find_in_subtree(&composite.registry, &name, &mut path) {
                return Err(RegistryError::Cycle { path });
            }
        }
        self.tools.insert(name, entry);
        Ok(())
    }

    /// Builder-style registration.
    pub fn with(mut self, entry: ToolEntry) -> Result<Self, RegistryError> {
        self.register(entry)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ToolEntry> {
        self.tools.values()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn specs(&self) -> Vec<&ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    /// One line per tool, as shown to the model.
    pub fn render_descriptions(&self) -> String {
        self.tools
            .values()
            .map(|t| t.spec().render())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Depth-first search for `target` among the tools reachable from `registry`.
/// On success `path` holds the chain of names leading to it.
fn find_in_subtree(registry: &ToolRegistry, target: &str, path: &mut Vec<String>) -> bool {
    for entry in registry.entries() {
        path.push(entry.name().to_string());
        if entry.name() == target {
            return true;
        }
        if let ToolEntry::Composite(inner) = entry
            && find_in_subtree(&inner.registry, target, path)
        {
            return true;
        }
        path.pop();
    }
    false
}

/// Declarative definition of a composite tool, as found in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeDef {
    pub name: String,
    pub description: String,
    /// Names of the tools (leaf or composite) the nested run may use
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
}

/// Named leaf tools plus composite definitions that refer to each other
/// by name. Resolving a set of root names yields a [`ToolRegistry`].
#[derive(Default)]
pub struct ToolCatalog {
    leaves: HashMap<String, Arc<dyn Tool>>,
    composites: HashMap<String, CompositeDef>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_leaf(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.spec().name.clone();
        if self.contains(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.leaves.insert(name, tool);
        Ok(())
    }

    pub fn add_composite(&mut self, def: CompositeDef) -> Result<(), RegistryError> {
        if self.contains(&def.name) {
            return Err(RegistryError::Duplicate(def.name));
        }
        self.composites.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.leaves.contains_key(name) || self.composites.contains_key(name)
    }

    /// All defined names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .leaves
            .keys()
            .chain(self.composites.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Resolve `roots` (and everything they reference) into a registry.
    pub fn build_registry(&self, roots: &[String]) -> Result<ToolRegistry, RegistryError> {
        let mut memo: HashMap<String, ToolEntry> = HashMap::new();
        let mut stack: Vec<String> = Vec::new();
        let mut registry = ToolRegistry::new();
        for name in roots {
            let entry = self.resolve(name, &mut stack, &mut memo)?;
            registry.register(entry)?;
        }
        Ok(registry)
    }

    fn resolve(
        &self,
        name: &str,
        stack: &mut Vec<String>,
        memo: &mut HashMap<String, ToolEntry>,
    ) -> Result<ToolEntry, RegistryError> {
        if let Some(pos) = stack.iter().position(|n| n == name) {
            let mut path = stack[pos..].to_vec();
            path.push(name.to_string());
            return Err(RegistryError::Cycle { path });
        }
        if let Some(entry) = memo.get(name) {
            return Ok(entry.clone());
        }
        if let Some(leaf) = self.leaves.get(name) {
            return Ok(ToolEntry::Leaf(leaf.clone()));
        }
        let def = self
            .composites
            .get(name)
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))?;

        stack.push(name.to_string());
        let mut inner = ToolRegistry::new();
        for child in &def.tools {
            let entry = self.resolve(child, stack, memo)?;
            inner.register(entry)?;
        }
        stack.pop();

        let mut composite = CompositeTool::new(&def.name, &def.description, Arc::new(inner));
        composite.persona = def.persona.clone();
        composite.max_steps = def.max_steps;
        let entry = ToolEntry::composite(composite);
        memo.insert(name.to_string(), entry.clone());
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;

    /// A simple test tool for unit tests.
    struct EchoTool {
        spec: ToolSpec,
    }

    impl EchoTool {
        fn named(name: &str) -> Self {
            Self {
                spec: ToolSpec::new(
                    name,
                    "Echoes back the input",
                    InputSchema::new().required("text", FieldKind::String, "Text to echo"),
                ),
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> &ToolSpec {
            &self.spec
        }

        async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
            Ok(arguments["text"].as_str().unwrap_or("").to_string())
        }
    }

    fn def(name: &str, tools: &[&str]) -> CompositeDef {
        CompositeDef {
            name: name.into(),
            description: format!("{name} expert"),
            tools: tools.iter().map(|t| t.to_string()).collect(),
            persona: None,
            max_steps: None,
        }
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolEntry::leaf(EchoTool::named("echo"))).unwrap();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolEntry::leaf(EchoTool::named("echo"))).unwrap();
        let err = registry
            .register(ToolEntry::leaf(EchoTool::named("echo")))
            .unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("echo".into()));
    }

    #[test]
    fn registry_accepts_nested_composites() {
        let inner = ToolRegistry::new()
            .with(ToolEntry::leaf(EchoTool::named("echo")))
            .unwrap();
        let middle = ToolRegistry::new()
            .with(ToolEntry::composite(CompositeTool::new("inner", "inner agent", Arc::new(inner))))
            .unwrap();
        let mut outer = ToolRegistry::new();
        outer
            .register(ToolEntry::composite(CompositeTool::new(
                "outer_agent",
                "outer agent",
                Arc::new(middle),
            )))
            .unwrap();
        assert!(outer.get("outer_agent").unwrap().is_composite());
    }

    #[test]
    fn registry_rejects_self_containing_composite() {
        let inner = ToolRegistry::new()
            .with(ToolEntry::composite(CompositeTool::new(
                "expert",
                "shadow",
                Arc::new(ToolRegistry::new()),
            )))
            .unwrap();
        let err = ToolRegistry::new()
            .with(ToolEntry::composite(CompositeTool::new("expert", "expert", Arc::new(inner))))
            .err()
            .unwrap();
        assert_eq!(
            err,
            RegistryError::Cycle {
                path: names(&["expert", "expert"])
            }
        );
    }

    #[test]
    fn render_descriptions_includes_args() {
        let registry = ToolRegistry::new()
            .with(ToolEntry::leaf(EchoTool::named("echo")))
            .unwrap();
        let rendered = registry.render_descriptions();
        assert!(rendered.starts_with("echo: Echoes back the input, args: "));
        assert!(rendered.contains(r#""text""#));
    }

    #[tokio::test]
    async fn leaf_invocation() {
        let entry = ToolEntry::leaf(EchoTool::named("echo"));
        let ToolEntry::Leaf(tool) = entry else {
            panic!("expected leaf");
        };
        let out = tool.invoke(serde_json::json!({"text": "hello"})).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn catalog_builds_acyclic_tree() {
        let mut catalog = ToolCatalog::new();
        catalog.add_leaf(Arc::new(EchoTool::named("echo"))).unwrap();
        catalog.add_composite(def("thermo", &["echo"])).unwrap();
        catalog.add_composite(def("lead", &["thermo", "echo"])).unwrap();

        let registry = catalog.build_registry(&names(&["lead", "thermo"])).unwrap();
        assert_eq!(registry.tool_names(), vec!["lead", "thermo"]);
        let Some(ToolEntry::Composite(lead)) = registry.get("lead") else {
            panic!("lead should be composite");
        };
        assert_eq!(lead.registry.tool_names(), vec!["echo", "thermo"]);
    }

    #[test]
    fn catalog_detects_transitive_cycle() {
        let mut catalog = ToolCatalog::new();
        catalog.add_composite(def("a", &["b"])).unwrap();
        catalog.add_composite(def("b", &["a"])).unwrap();

        let err = catalog.build_registry(&names(&["a"])).err().unwrap();
        assert_eq!(
            err,
            RegistryError::Cycle {
                path: names(&["a", "b", "a"])
            }
        );
    }

    #[test]
    fn catalog_detects_direct_self_reference() {
        let mut catalog = ToolCatalog::new();
        catalog.add_composite(def("loop", &["loop"])).unwrap();
        assert!(matches!(
            catalog.build_registry(&names(&["loop"])),
            Err(RegistryError::Cycle { .. })
        ));
    }

    #[test]
    fn catalog_reports_unknown_tools() {
        let mut catalog = ToolCatalog::new();
        catalog.add_composite(def("a", &["missing"])).unwrap();
        assert_eq!(
            catalog.build_registry(&names(&["a"])).err().unwrap(),
            RegistryError::Unknown("missing".into())
        );
    }

    #[test]
    fn catalog_rejects_duplicate_names() {
        let mut catalog = ToolCatalog::new();
        catalog.add_leaf(Arc::new(EchoTool::named("echo"))).unwrap();
        assert!(catalog.add_composite(def("echo", &[])).is_err());
    }
}
