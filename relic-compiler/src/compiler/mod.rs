//! The multi-pass compiler driver.
//!
//! Passes run in fixed order, each gated on [`Report::validate`]:
//!
//! 1. reserve definitions — scopes, names, imports (this module);
//! 2. resolve definition types — canonical types, `let` evaluation
//!    ([`types`]);
//! 3. reserve storage — bank placement and initializer serialization
//!    ([`storage`]);
//! 4. emit IR — statement lowering and instruction selection ([`emit`]);
//! 5. generate code — layout to fixpoint, then byte emission
//!    ([`codegen`]).

mod emit;
mod fold;
mod codegen;
mod storage;
mod types;

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use relic_asm::ModeFlags;
use relic_types::{DefinitionId, Qualifiers, SourceLocation};

use crate::ast::{Attribute, Expression, Statement, StatementKind};
use crate::bank::{BankId, BankPool};
use crate::builtins::{Builtins, FunctionAttribute};
use crate::config::Config;
use crate::definition::{
    BankDefinition, Definition, DefinitionKind, DefinitionPool, EnumDefinition,
    EnumMemberDefinition, FuncDefinition, FuncReturnKind, LetDefinition, StructDefinition,
    StructMemberDefinition, VarDefinition,
};
use crate::ir::IrNode;
use crate::platform::{Platform, PlatformContext};
use crate::report::{DiagnosticSink, Report};
use crate::symbol_table::{ScopeId, ScopePool};

/// Loads `embed "path"` payloads; the file-system-backed implementation
/// lives with the host's resource manager.
pub trait EmbedLoader {
    /// The raw bytes of `path`, or `None` when unreadable.
    fn load(&mut self, path: &str) -> Option<Vec<u8>>;
}

/// An [`EmbedLoader`] for hosts that do not support embeds.
#[derive(Debug, Default)]
pub struct NullEmbedLoader;

impl EmbedLoader for NullEmbedLoader {
    fn load(&mut self, _path: &str) -> Option<Vec<u8>> {
        None
    }
}

/// Maximum nesting of `let` evaluation before a recursive definition is
/// assumed.
pub(crate) const MAX_LET_RECURSION_DEPTH: usize = 128;

/// Attributes collected for the directly attributed statement.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PendingFunctionAttributes {
    pub fallthrough: bool,
    pub return_kind: Option<FuncReturnKind>,
}

fn statement_key(statement: &Statement) -> usize {
    statement as *const Statement as usize
}

/// The compiler instance: owns every pool and drives the passes over one
/// program tree.
pub struct Compiler {
    program: Rc<Statement>,
    pub(crate) platform: Box<dyn Platform>,
    pub(crate) report: Report,
    pub(crate) builtins: Builtins,
    pub(crate) scopes: ScopePool,
    pub(crate) definitions: DefinitionPool,
    pub(crate) banks: BankPool,
    pub(crate) config: Config,

    pub(crate) module_scopes: HashMap<Arc<str>, ScopeId>,
    /// Scope bound per (inline site, statement); inline expansion gives the
    /// same statements fresh scopes at each site.
    statement_scopes: HashMap<(usize, usize), ScopeId>,
    pub(crate) current_scope: ScopeId,
    scope_stack: Vec<ScopeId>,

    inline_site_count: usize,
    pub(crate) current_inline_site: usize,
    inline_site_stack: Vec<usize>,

    pub(crate) let_stack: Vec<(Arc<str>, SourceLocation)>,
    /// Definitions currently being resolved, for cycle detection.
    pub(crate) type_resolution_stack: Vec<DefinitionId>,
    /// When nonzero, folding suppresses its diagnostics (speculative
    /// reductions such as `#[if]` checks).
    pub(crate) quiet_depth: usize,

    pub(crate) mode_flags: ModeFlags,
    mode_flags_stack: Vec<ModeFlags>,

    pub(crate) current_bank: Option<BankId>,
    bank_stack: Vec<Option<BankId>>,

    pub(crate) current_function: Option<DefinitionId>,
    pub(crate) break_label: Option<DefinitionId>,
    pub(crate) continue_label: Option<DefinitionId>,
    /// Set inside inline expansions: `return` jumps here instead of
    /// emitting a return instruction.
    pub(crate) return_label: Option<DefinitionId>,

    pub(crate) ir: Vec<IrNode>,

    block_counter: usize,
    anonymous_label_counter: usize,

    pub(crate) embed_loader: Box<dyn EmbedLoader>,
    pub(crate) embed_cache: HashMap<Arc<str>, Vec<u8>>,
}

impl Compiler {
    /// Builds a compiler over an already-parsed program.
    pub fn new(
        program: Rc<Statement>,
        mut platform: Box<dyn Platform>,
        sink: Box<dyn DiagnosticSink>,
        defines: HashMap<Arc<str>, Expression>,
        embed_loader: Box<dyn EmbedLoader>,
    ) -> Compiler {
        let mut report = Report::new(sink);
        let mut scopes = ScopePool::new();
        let mut definitions = DefinitionPool::new();
        let mut builtins = Builtins::new(&mut scopes, &mut definitions, &mut report, defines);
        platform.reserve_definitions(&mut PlatformContext {
            builtins: &mut builtins,
            scopes: &mut scopes,
            definitions: &mut definitions,
            report: &mut report,
        });
        let builtin_scope = builtins.scope();
        Compiler {
            program,
            platform,
            report,
            builtins,
            scopes,
            definitions,
            banks: BankPool::new(),
            config: Config::new(),
            module_scopes: HashMap::new(),
            statement_scopes: HashMap::new(),
            current_scope: builtin_scope,
            scope_stack: Vec::new(),
            inline_site_count: 1,
            current_inline_site: 0,
            inline_site_stack: Vec::new(),
            let_stack: Vec::new(),
            type_resolution_stack: Vec::new(),
            quiet_depth: 0,
            mode_flags: ModeFlags::NONE,
            mode_flags_stack: Vec::new(),
            current_bank: None,
            bank_stack: Vec::new(),
            current_function: None,
            break_label: None,
            continue_label: None,
            return_label: None,
            ir: Vec::new(),
            block_counter: 0,
            anonymous_label_counter: 0,
            embed_loader,
            embed_cache: HashMap::new(),
        }
    }

    /// Runs every pass. Returns whether compilation succeeded.
    pub fn compile(&mut self) -> bool {
        let program = self.program.clone();

        tracing::debug!(target: "relic", "pass 1: reserve definitions");
        self.register_module_scopes(&program);
        self.reserve_definitions(&program, PendingFunctionAttributes::default());
        if !self.report.validate() {
            return false;
        }

        tracing::debug!(target: "relic", "pass 2: resolve definition types");
        self.resolve_definition_types();
        if !self.report.validate() {
            return false;
        }

        tracing::debug!(target: "relic", "pass 3: reserve storage");
        self.reserve_storage(&program);
        if !self.report.validate() {
            return false;
        }

        tracing::debug!(target: "relic", "pass 4: emit IR");
        self.emit_program_ir(&program);
        if !self.report.validate() {
            return false;
        }

        tracing::debug!(target: "relic", "pass 5: generate code");
        self.generate_code();
        self.report.validate()
    }

    /// The diagnostic report.
    pub fn report(&self) -> &Report {
        &self.report
    }

    /// The registered banks, in declaration order.
    pub fn banks(&self) -> &BankPool {
        &self.banks
    }

    /// Every definition created during compilation.
    pub fn definitions(&self) -> &DefinitionPool {
        &self.definitions
    }

    /// The scope pool, for qualified-name formatting.
    pub fn scopes(&self) -> &ScopePool {
        &self.scopes
    }

    /// The folded `config { ... }` map.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The current CPU mode flag set.
    pub fn mode_flags(&self) -> ModeFlags {
        self.mode_flags
    }

    /// Split borrows for output and debug format generation.
    pub fn output_parts(
        &mut self,
    ) -> (
        &mut Report,
        &Config,
        &BankPool,
        &DefinitionPool,
        &ScopePool,
    ) {
        (
            &mut self.report,
            &self.config,
            &self.banks,
            &self.definitions,
            &self.scopes,
        )
    }

    // ----- scope and stack plumbing -------------------------------------

    pub(crate) fn generate_block_name(&mut self) -> Arc<str> {
        let name = format!("%{:X}%", self.block_counter);
        self.block_counter += 1;
        Arc::from(name)
    }

    pub(crate) fn generate_anonymous_label_name(&mut self) -> Arc<str> {
        let name = format!("${:X}", self.anonymous_label_counter);
        self.anonymous_label_counter += 1;
        Arc::from(name)
    }

    pub(crate) fn enter_scope(&mut self, next: ScopeId) {
        self.scope_stack.push(self.current_scope);
        self.current_scope = next;
    }

    pub(crate) fn exit_scope(&mut self) {
        self.current_scope = self
            .scope_stack
            .pop()
            .expect("scope stack underflow");
    }

    pub(crate) fn enter_inline_site(&mut self) -> usize {
        let site = self.inline_site_count;
        self.inline_site_count += 1;
        self.inline_site_stack.push(self.current_inline_site);
        self.current_inline_site = site;
        site
    }

    pub(crate) fn exit_inline_site(&mut self) {
        self.current_inline_site = self
            .inline_site_stack
            .pop()
            .expect("inline site stack underflow");
    }

    /// How deeply inline expansions are currently nested.
    pub(crate) fn inline_depth(&self) -> usize {
        self.inline_site_stack.len()
    }

    pub(crate) fn push_mode_flags(&mut self, next: ModeFlags) {
        self.mode_flags_stack.push(self.mode_flags);
        self.mode_flags = next;
    }

    pub(crate) fn pop_mode_flags(&mut self) {
        self.mode_flags = self
            .mode_flags_stack
            .pop()
            .expect("mode flag stack underflow");
    }

    pub(crate) fn push_bank(&mut self, next: Option<BankId>) {
        self.bank_stack.push(self.current_bank);
        self.current_bank = next;
    }

    pub(crate) fn pop_bank(&mut self) {
        self.current_bank = self.bank_stack.pop().expect("bank stack underflow");
    }

    /// The scope bound to `statement` at the current inline site, creating
    /// an anonymous block scope on first visit.
    pub(crate) fn get_or_create_statement_scope(&mut self, statement: &Statement) -> ScopeId {
        let key = (self.current_inline_site, statement_key(statement));
        if let Some(&scope) = self.statement_scopes.get(&key) {
            return scope;
        }
        let name = self.generate_block_name();
        let scope = self.scopes.create(Some(self.current_scope), name);
        self.statement_scopes.insert(key, scope);
        scope
    }

    /// Binds `statement` to an existing scope (namespace and function
    /// bodies reuse their owner's scope).
    pub(crate) fn bind_statement_scope(&mut self, statement: &Statement, scope: ScopeId) {
        let key = (self.current_inline_site, statement_key(statement));
        self.statement_scopes.insert(key, scope);
    }

    pub(crate) fn find_statement_scope(&self, statement: &Statement) -> Option<ScopeId> {
        self.statement_scopes
            .get(&(self.current_inline_site, statement_key(statement)))
            .copied()
    }

    // ----- pass 1: reserve definitions ----------------------------------

    /// Registers a module scope for every `File` statement so imports can
    /// resolve regardless of splice order.
    fn register_module_scopes(&mut self, statement: &Statement) {
        if let StatementKind::File {
            statements,
            canonical_path,
            ..
        } = &statement.kind
        {
            if !self.module_scopes.contains_key(canonical_path) {
                let scope = self.scopes.create(Some(self.builtins.scope()), Arc::from(""));
                self.module_scopes.insert(canonical_path.clone(), scope);
            }
            for child in statements {
                self.register_module_scopes(child);
            }
        }
    }

    /// Whether `#[if(...)]` attributes allow this statement to exist.
    /// Checked identically by every pass so the statement vanishes
    /// everywhere or nowhere.
    pub(crate) fn conditional_compilation_enabled(&mut self, attributes: &[Attribute]) -> bool {
        for attribute in attributes {
            if &*attribute.name != "if" {
                continue;
            }
            match attribute.arguments.first() {
                Some(argument) => {
                    let argument = argument.clone();
                    let folded = self.reduce_expression_quiet(&argument);
                    match folded.as_ref().and_then(|e| e.as_boolean_literal()) {
                        Some(false) => return false,
                        Some(true) => {}
                        None => {
                            self.report.plain_error(
                                "`if` attribute requires a compile-time boolean argument".into(),
                                attribute.location.clone(),
                            );
                            return false;
                        }
                    }
                }
                None => {
                    self.report.plain_error(
                        "`if` attribute requires an argument".into(),
                        attribute.location.clone(),
                    );
                    return false;
                }
            }
        }
        true
    }

    fn collect_function_attributes(
        &mut self,
        attributes: &[Attribute],
        pending: &mut PendingFunctionAttributes,
    ) {
        for attribute in attributes {
            match Builtins::find_function_attribute(&attribute.name) {
                Some(FunctionAttribute::Fallthrough) => pending.fallthrough = true,
                Some(FunctionAttribute::Irq) => pending.return_kind = Some(FuncReturnKind::Irq),
                Some(FunctionAttribute::Nmi) => pending.return_kind = Some(FuncReturnKind::Nmi),
                None => {}
            }
        }
    }

    pub(crate) fn reserve_definitions(
        &mut self,
        statement: &Statement,
        pending: PendingFunctionAttributes,
    ) {
        if !self.report.alive() {
            return;
        }
        match &statement.kind {
            StatementKind::Attribution { attributes, body } => {
                if !self.conditional_compilation_enabled(attributes) {
                    return;
                }
                let mut pending = pending;
                self.collect_function_attributes(attributes, &mut pending);
                self.reserve_definitions(body, pending);
            }
            StatementKind::File {
                statements,
                canonical_path,
                ..
            } => {
                let scope = self.module_scopes[canonical_path];
                self.bind_statement_scope(statement, scope);
                self.enter_scope(scope);
                for child in statements {
                    self.reserve_definitions(child, PendingFunctionAttributes::default());
                }
                self.exit_scope();
            }
            StatementKind::ImportReference {
                canonical_path,
                description,
                ..
            } => match self.module_scopes.get(canonical_path).copied() {
                Some(imported) => {
                    self.scopes.add_recursive_import(
                        &self.definitions,
                        self.current_scope,
                        imported,
                    );
                }
                None => {
                    self.report.plain_error(
                        format!("could not resolve {}", description),
                        statement.location.clone(),
                    );
                }
            },
            StatementKind::Block(children) => {
                let scope = match self.find_statement_scope(statement) {
                    Some(bound) => bound,
                    None => self.get_or_create_statement_scope(statement),
                };
                self.enter_scope(scope);
                for child in children {
                    self.reserve_definitions(child, PendingFunctionAttributes::default());
                }
                self.exit_scope();
            }
            StatementKind::Namespace { name, body } => {
                let scope = match self
                    .scopes
                    .find_local_member_definition(self.current_scope, name)
                {
                    Some(existing) => match &self.definitions.get(existing).kind {
                        DefinitionKind::Namespace { environment } => *environment,
                        _ => {
                            let previous = self.definitions.get(existing);
                            self.report.error(
                                format!("redefinition of symbol `{}`", name),
                                statement.location.clone(),
                                crate::report::ReportErrorFlags::CONTINUED,
                            );
                            let (description, declaration) =
                                (previous.description.clone(), previous.declaration.clone());
                            self.report.plain_error(
                                format!(
                                    "`{}` was previously defined here, by {}",
                                    name, description
                                ),
                                declaration,
                            );
                            return;
                        }
                    },
                    None => {
                        let environment =
                            self.scopes.create(Some(self.current_scope), name.clone());
                        self.scopes.add_definition(
                            &mut self.definitions,
                            &mut self.report,
                            self.current_scope,
                            Definition::new(
                                DefinitionKind::Namespace { environment },
                                name.clone(),
                                statement.location.clone(),
                                Arc::from(statement.description()),
                            ),
                        );
                        environment
                    }
                };
                self.bind_statement_scope(body, scope);
                self.reserve_definitions(body, PendingFunctionAttributes::default());
            }
            StatementKind::Func {
                far,
                inline,
                name,
                parameters,
                return_type,
                body,
            } => {
                let environment = self.scopes.create(Some(self.current_scope), name.clone());
                let mut parameter_ids = Vec::with_capacity(parameters.len());
                for parameter in parameters {
                    let id = self.scopes.add_definition(
                        &mut self.definitions,
                        &mut self.report,
                        environment,
                        Definition::new(
                            DefinitionKind::Var(VarDefinition {
                                qualifiers: Qualifiers::LVALUE,
                                type_expression: Some(parameter.ty.clone()),
                                ..VarDefinition::default()
                            }),
                            parameter.name.clone(),
                            parameter.location.clone(),
                            Arc::from(format!("parameter `{}`", parameter.name)),
                        ),
                    );
                    if let Some(id) = id {
                        parameter_ids.push(id);
                    }
                }
                self.scopes.add_definition(
                    &mut self.definitions,
                    &mut self.report,
                    self.current_scope,
                    Definition::new(
                        DefinitionKind::Func(FuncDefinition {
                            far: *far,
                            inline: *inline,
                            fallthrough: pending.fallthrough,
                            return_kind: pending.return_kind.unwrap_or_default(),
                            parameters: parameter_ids,
                            return_type: return_type.clone(),
                            resolved_signature: None,
                            body: Some(body.clone()),
                            environment: Some(environment),
                            address: None,
                        }),
                        name.clone(),
                        statement.location.clone(),
                        Arc::from(statement.description()),
                    ),
                );
                self.bind_statement_scope(body, environment);
                self.enter_scope(environment);
                self.reserve_definitions(body, PendingFunctionAttributes::default());
                self.exit_scope();
            }
            StatementKind::Var {
                qualifiers,
                names,
                addresses,
                ty,
                value,
            } => {
                for (index, name) in names.iter().enumerate() {
                    let address_expression = addresses.get(index).cloned().flatten();
                    self.scopes.add_definition(
                        &mut self.definitions,
                        &mut self.report,
                        self.current_scope,
                        Definition::new(
                            DefinitionKind::Var(VarDefinition {
                                qualifiers: *qualifiers | Qualifiers::LVALUE,
                                type_expression: ty.clone(),
                                address_expression,
                                initializer: value.as_deref().cloned(),
                                ..VarDefinition::default()
                            }),
                            name.clone(),
                            statement.location.clone(),
                            Arc::from(statement.description()),
                        ),
                    );
                }
            }
            StatementKind::Let {
                name,
                parameters,
                value,
            } => {
                self.scopes.add_definition(
                    &mut self.definitions,
                    &mut self.report,
                    self.current_scope,
                    Definition::new(
                        DefinitionKind::Let(LetDefinition {
                            parameters: parameters.clone(),
                            expression: (**value).clone(),
                            evaluated: false,
                        }),
                        name.clone(),
                        statement.location.clone(),
                        Arc::from(statement.description()),
                    ),
                );
            }
            StatementKind::Enum {
                name,
                underlying_type,
                items,
            } => {
                let environment = self.scopes.create(Some(self.current_scope), name.clone());
                let mut members = Vec::with_capacity(items.len());
                for item in items {
                    let id = self.scopes.add_definition(
                        &mut self.definitions,
                        &mut self.report,
                        environment,
                        Definition::new(
                            DefinitionKind::EnumMember(EnumMemberDefinition {
                                expression: item.value.clone(),
                                value: None,
                            }),
                            item.name.clone(),
                            item.location.clone(),
                            Arc::from(format!("enum member `{}`", item.name)),
                        ),
                    );
                    if let Some(id) = id {
                        members.push(id);
                    }
                }
                self.scopes.add_definition(
                    &mut self.definitions,
                    &mut self.report,
                    self.current_scope,
                    Definition::new(
                        DefinitionKind::Enum(EnumDefinition {
                            environment,
                            underlying_type: underlying_type.clone(),
                            resolved_underlying_type: None,
                            members,
                        }),
                        name.clone(),
                        statement.location.clone(),
                        Arc::from(statement.description()),
                    ),
                );
            }
            StatementKind::Struct { kind, name, items } => {
                let environment = self.scopes.create(Some(self.current_scope), name.clone());
                let mut members = Vec::with_capacity(items.len());
                for item in items {
                    let id = self.scopes.add_definition(
                        &mut self.definitions,
                        &mut self.report,
                        environment,
                        Definition::new(
                            DefinitionKind::StructMember(StructMemberDefinition {
                                type_expression: item.ty.clone(),
                                resolved_type: None,
                                offset: None,
                            }),
                            item.name.clone(),
                            item.location.clone(),
                            Arc::from(format!("member `{}`", item.name)),
                        ),
                    );
                    if let Some(id) = id {
                        members.push(id);
                    }
                }
                self.scopes.add_definition(
                    &mut self.definitions,
                    &mut self.report,
                    self.current_scope,
                    Definition::new(
                        DefinitionKind::Struct(StructDefinition {
                            kind: *kind,
                            environment,
                            members,
                            size: None,
                        }),
                        name.clone(),
                        statement.location.clone(),
                        Arc::from(statement.description()),
                    ),
                );
            }
            StatementKind::TypeAlias { name, ty } => {
                self.scopes.add_definition(
                    &mut self.definitions,
                    &mut self.report,
                    self.current_scope,
                    Definition::new(
                        DefinitionKind::TypeAlias {
                            type_expression: ty.clone(),
                            resolved_type: None,
                        },
                        name.clone(),
                        statement.location.clone(),
                        Arc::from(statement.description()),
                    ),
                );
            }
            StatementKind::Bank {
                names,
                addresses,
                ty,
            } => {
                for (index, name) in names.iter().enumerate() {
                    let address_expression = addresses.get(index).cloned().flatten();
                    self.scopes.add_definition(
                        &mut self.definitions,
                        &mut self.report,
                        self.current_scope,
                        Definition::new(
                            DefinitionKind::Bank(BankDefinition {
                                type_expression: ty.clone(),
                                address_expression,
                                bank: None,
                                kind: None,
                            }),
                            name.clone(),
                            statement.location.clone(),
                            Arc::from(format!("bank `{}`", name)),
                        ),
                    );
                }
            }
            StatementKind::Label { name, .. } => {
                self.scopes.add_definition(
                    &mut self.definitions,
                    &mut self.report,
                    self.current_scope,
                    Definition::new(
                        DefinitionKind::Func(FuncDefinition::default()),
                        name.clone(),
                        statement.location.clone(),
                        Arc::from(statement.description()),
                    ),
                );
            }
            StatementKind::In { body, .. } => {
                self.reserve_definitions(body, PendingFunctionAttributes::default());
            }
            StatementKind::If {
                body, alternative, ..
            } => {
                self.reserve_definitions(body, PendingFunctionAttributes::default());
                if let Some(alternative) = alternative {
                    self.reserve_definitions(alternative, PendingFunctionAttributes::default());
                }
            }
            StatementKind::While { body, .. }
            | StatementKind::DoWhile { body, .. }
            | StatementKind::For { body, .. } => {
                self.reserve_definitions(body, PendingFunctionAttributes::default());
            }
            // Inline-for bodies are expanded per iteration during IR
            // emission; their contents cannot declare storage.
            StatementKind::InlineFor { .. } => {}
            StatementKind::Branch { .. }
            | StatementKind::Config { .. }
            | StatementKind::ExpressionStatement(..) => {}
        }
    }
}
