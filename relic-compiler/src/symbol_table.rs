//! Hierarchical namespaces with import edges.
//!
//! A scope owns a name → definition map plus an ordered list of imported
//! sibling scopes. Lookup is local-first, imports deduplicated; unqualified
//! lookup walks ancestors until the first scope with any result. Scope
//! names beginning with `%` denote anonymous blocks and never contribute to
//! qualified names.

use std::collections::HashMap;
use std::sync::Arc;

use relic_types::{DefinitionId, SourceLocation};

use crate::definition::{Definition, DefinitionKind, DefinitionPool};
use crate::report::{Report, ReportErrorFlags};

/// Stable handle to a scope in a [`ScopePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub u32);

impl ScopeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One scope: a namespace, module, function body or anonymous block.
#[derive(Debug)]
pub struct SymbolTable {
    parent: Option<ScopeId>,
    namespace_name: Arc<str>,
    definitions: HashMap<Arc<str>, DefinitionId>,
    /// Insertion order, for deterministic iteration in debug output.
    ordered: Vec<DefinitionId>,
    imports: Vec<ScopeId>,
}

impl SymbolTable {
    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    pub fn name(&self) -> &Arc<str> {
        &self.namespace_name
    }

    /// Definitions in insertion order.
    pub fn definitions(&self) -> &[DefinitionId] {
        &self.ordered
    }

    pub fn imports(&self) -> &[ScopeId] {
        &self.imports
    }
}

/// Arena owning every scope of one compilation.
#[derive(Debug, Default)]
pub struct ScopePool {
    scopes: Vec<SymbolTable>,
}

impl ScopePool {
    pub fn new() -> ScopePool {
        ScopePool::default()
    }

    /// Creates a scope under `parent` (or a root scope when `None`).
    pub fn create(&mut self, parent: Option<ScopeId>, namespace_name: Arc<str>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(SymbolTable {
            parent,
            namespace_name,
            definitions: HashMap::new(),
            ordered: Vec::new(),
            imports: Vec::new(),
        });
        id
    }

    pub fn get(&self, id: ScopeId) -> &SymbolTable {
        &self.scopes[id.index()]
    }

    /// Interns `definition` into `scope`, diagnosing redefinitions with
    /// both source locations. Returns the new handle on success.
    pub fn add_definition(
        &mut self,
        definitions: &mut DefinitionPool,
        report: &mut Report,
        scope: ScopeId,
        mut definition: Definition,
    ) -> Option<DefinitionId> {
        if let Some(existing) = self.find_local_member_definition(scope, &definition.name) {
            let previous = definitions.get(existing);
            report.error(
                format!("redefinition of symbol `{}`", definition.name),
                definition.declaration.clone(),
                ReportErrorFlags::CONTINUED,
            );
            report.plain_error(
                format!(
                    "`{}` was previously defined here, by {}",
                    definition.name, previous.description
                ),
                previous.declaration.clone(),
            );
            return None;
        }
        definition.parent_scope = Some(scope);
        let name = definition.name.clone();
        let id = definitions.add(definition);
        let table = &mut self.scopes[scope.index()];
        table.definitions.insert(name, id);
        table.ordered.push(id);
        Some(id)
    }

    /// The definition of `name` in `scope` itself, ignoring imports.
    pub fn find_local_member_definition(&self, scope: ScopeId, name: &str) -> Option<DefinitionId> {
        self.scopes[scope.index()].definitions.get(name).copied()
    }

    /// Definitions of `name` in directly imported scopes, deduplicated.
    pub fn find_imported_member_definitions(&self, scope: ScopeId, name: &str) -> Vec<DefinitionId> {
        let mut results = Vec::new();
        for &import in &self.scopes[scope.index()].imports {
            if let Some(found) = self.find_local_member_definition(import, name) {
                if !results.contains(&found) {
                    results.push(found);
                }
            }
        }
        results
    }

    /// Local definition first, then imported ones, deduplicated.
    pub fn find_member_definitions(&self, scope: ScopeId, name: &str) -> Vec<DefinitionId> {
        let mut results = self.find_imported_member_definitions(scope, name);
        if let Some(local) = self.find_local_member_definition(scope, name) {
            if !results.contains(&local) {
                results.insert(0, local);
            }
        }
        results
    }

    /// Member lookup in `scope` and its ancestors, stopping at the first
    /// scope that yields any result.
    pub fn find_unqualified_definitions(&self, scope: ScopeId, name: &str) -> Vec<DefinitionId> {
        let results = self.find_member_definitions(scope, name);
        if results.is_empty() {
            if let Some(parent) = self.scopes[scope.index()].parent {
                return self.find_unqualified_definitions(parent, name);
            }
        }
        results
    }

    /// Adds a lookup edge. Idempotent; self-imports are rejected.
    pub fn add_import(&mut self, scope: ScopeId, import: ScopeId) -> bool {
        if scope == import {
            return false;
        }
        let table = &mut self.scopes[scope.index()];
        if table.imports.contains(&import) {
            return false;
        }
        table.imports.push(import);
        true
    }

    /// Adds an import edge, then pairs up namespace members of the same
    /// name and recursively imports their inner scopes. Safe under shared
    /// substructure because plain adds are idempotent.
    pub fn add_recursive_import(
        &mut self,
        definitions: &DefinitionPool,
        scope: ScopeId,
        import: ScopeId,
    ) -> bool {
        let mut worklist = vec![(scope, import)];
        let mut added_any = false;
        while let Some((scope, import)) = worklist.pop() {
            if !self.add_import(scope, import) {
                continue;
            }
            added_any = true;
            let members: Vec<(Arc<str>, DefinitionId)> = {
                let table = &self.scopes[scope.index()];
                table
                    .ordered
                    .iter()
                    .map(|&id| (definitions.get(id).name.clone(), id))
                    .collect()
            };
            for (name, id) in members {
                let DefinitionKind::Namespace { environment } = definitions.get(id).kind else {
                    continue;
                };
                if let Some(imported) = self.find_local_member_definition(import, &name) {
                    if let DefinitionKind::Namespace {
                        environment: imported_environment,
                    } = definitions.get(imported).kind
                    {
                        worklist.push((environment, imported_environment));
                    }
                }
            }
        }
        added_any
    }

    /// Dotted path of named ancestors. Anonymous (`%`-prefixed) scopes
    /// print bare, without their parents.
    pub fn full_name(&self, scope: ScopeId) -> String {
        let table = &self.scopes[scope.index()];
        match table.parent {
            None => table.namespace_name.to_string(),
            Some(parent) => {
                if table.namespace_name.starts_with('%') {
                    return table.namespace_name.to_string();
                }
                let parent_name = self.full_name(parent);
                if parent_name.is_empty() {
                    table.namespace_name.to_string()
                } else {
                    format!("{}.{}", parent_name, table.namespace_name)
                }
            }
        }
    }
}

/// Builds the diagnostic-friendly declaration used when tests or builtins
/// need a definition without a source statement.
pub fn synthetic_definition(
    kind: DefinitionKind,
    name: &str,
    location: SourceLocation,
    description: &str,
) -> Definition {
    Definition::new(kind, Arc::from(name), location, Arc::from(description))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::CollectingSink;

    fn fixture() -> (ScopePool, DefinitionPool, Report, CollectingSink) {
        let sink = CollectingSink::new();
        (
            ScopePool::new(),
            DefinitionPool::new(),
            Report::new(Box::new(sink.clone())),
            sink,
        )
    }

    fn let_definition(name: &str, line: usize) -> Definition {
        synthetic_definition(
            DefinitionKind::Let(crate::definition::LetDefinition {
                parameters: Vec::new(),
                expression: crate::ast::Expression::integer(
                    0,
                    SourceLocation::line("test.wiz", line),
                ),
                evaluated: true,
            }),
            name,
            SourceLocation::line("test.wiz", line),
            &format!("let declaration `{}`", name),
        )
    }

    #[test]
    fn redefinition_is_diagnosed_with_both_locations() {
        let (mut scopes, mut definitions, mut report, sink) = fixture();
        let root = scopes.create(None, Arc::from(""));
        assert!(scopes
            .add_definition(&mut definitions, &mut report, root, let_definition("x", 1))
            .is_some());
        assert!(scopes
            .add_definition(&mut definitions, &mut report, root, let_definition("x", 2))
            .is_none());
        let rendered = sink.rendered();
        assert_eq!(rendered.len(), 2);
        assert!(rendered[0].contains("test.wiz:2"));
        assert!(rendered[0].contains("redefinition of symbol `x`"));
        assert!(rendered[1].contains("test.wiz:1"));
        assert!(rendered[1].contains("previously defined here"));
    }

    #[test]
    fn unqualified_lookup_stops_at_first_scope_with_results() {
        let (mut scopes, mut definitions, mut report, _sink) = fixture();
        let root = scopes.create(None, Arc::from(""));
        let inner = scopes.create(Some(root), Arc::from("inner"));
        let outer_x = scopes
            .add_definition(&mut definitions, &mut report, root, let_definition("x", 1))
            .unwrap();
        let inner_x = scopes
            .add_definition(&mut definitions, &mut report, inner, let_definition("x", 2))
            .unwrap();
        assert_eq!(scopes.find_unqualified_definitions(inner, "x"), vec![inner_x]);
        assert_eq!(scopes.find_unqualified_definitions(root, "x"), vec![outer_x]);
        assert!(scopes.find_unqualified_definitions(inner, "y").is_empty());
    }

    #[test]
    fn imports_are_idempotent_and_reject_self() {
        let (mut scopes, mut definitions, mut report, _sink) = fixture();
        let a = scopes.create(None, Arc::from("a"));
        let b = scopes.create(None, Arc::from("b"));
        assert!(!scopes.add_import(a, a));
        assert!(scopes.add_import(a, b));
        assert!(!scopes.add_import(a, b));

        let b_x = scopes
            .add_definition(&mut definitions, &mut report, b, let_definition("x", 5))
            .unwrap();
        assert_eq!(scopes.find_member_definitions(a, "x"), vec![b_x]);
        // Local definitions shadow to the front of the result list.
        let a_x = scopes
            .add_definition(&mut definitions, &mut report, a, let_definition("x", 6))
            .unwrap();
        assert_eq!(scopes.find_member_definitions(a, "x"), vec![a_x, b_x]);
    }

    #[test]
    fn recursive_import_links_matching_namespaces() {
        let (mut scopes, mut definitions, mut report, _sink) = fixture();
        let module_a = scopes.create(None, Arc::from(""));
        let module_b = scopes.create(None, Arc::from(""));
        let a_audio = scopes.create(Some(module_a), Arc::from("audio"));
        let b_audio = scopes.create(Some(module_b), Arc::from("audio"));
        scopes
            .add_definition(
                &mut definitions,
                &mut report,
                module_a,
                synthetic_definition(
                    DefinitionKind::Namespace { environment: a_audio },
                    "audio",
                    SourceLocation::line("a.wiz", 1),
                    "namespace `audio`",
                ),
            )
            .unwrap();
        scopes
            .add_definition(
                &mut definitions,
                &mut report,
                module_b,
                synthetic_definition(
                    DefinitionKind::Namespace { environment: b_audio },
                    "audio",
                    SourceLocation::line("b.wiz", 1),
                    "namespace `audio`",
                ),
            )
            .unwrap();
        let inner = scopes
            .add_definition(&mut definitions, &mut report, b_audio, let_definition("volume", 2))
            .unwrap();

        assert!(scopes.add_recursive_import(&definitions, module_a, module_b));
        assert_eq!(scopes.find_member_definitions(a_audio, "volume"), vec![inner]);
        // Re-importing is a no-op.
        assert!(!scopes.add_recursive_import(&definitions, module_a, module_b));
    }

    #[test]
    fn full_names_skip_anonymous_blocks() {
        let (mut scopes, _definitions, _report, _sink) = fixture();
        let root = scopes.create(None, Arc::from(""));
        let audio = scopes.create(Some(root), Arc::from("audio"));
        let channel = scopes.create(Some(audio), Arc::from("channel"));
        let block = scopes.create(Some(channel), Arc::from("%1A%"));
        assert_eq!(scopes.full_name(channel), "audio.channel");
        assert_eq!(scopes.full_name(block), "%1A%");
    }
}
