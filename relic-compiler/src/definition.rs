//! Named entities and the arena that owns them.
//!
//! Definitions are created in pass 1, type-completed in pass 2, and
//! address-assigned in pass 3 or at IR layout. They are immutable by
//! identity once interned: a [`DefinitionId`] stays valid for the life of
//! the compilation, and cross-references between definitions are always by
//! handle, never by ownership.

use std::rc::Rc;
use std::sync::Arc;

use relic_types::{DefinitionId, Qualifiers, SourceLocation};

use crate::ast::{Expression, Statement, StructKind, TypeExpression};
use crate::bank::{BankId, BankKind};
use crate::symbol_table::ScopeId;

/// A storage location: a position relative to a bank, and the absolute
/// address when the bank's origin is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Address {
    pub relative_position: Option<usize>,
    pub absolute_position: Option<usize>,
    pub bank: Option<BankId>,
}

/// Payload of a builtin integer type such as `u8` or `i16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinIntegerType {
    pub size: usize,
    pub min: i128,
    pub max: i128,
}

impl BuiltinIntegerType {
    pub fn unsigned(size: usize) -> BuiltinIntegerType {
        BuiltinIntegerType {
            size,
            min: 0,
            max: (1i128 << (size * 8)) - 1,
        }
    }

    pub fn signed(size: usize) -> BuiltinIntegerType {
        let half = 1i128 << (size * 8 - 1);
        BuiltinIntegerType {
            size,
            min: -half,
            max: half - 1,
        }
    }
}

/// Payload of a `var`-like definition.
#[derive(Debug, Clone, Default)]
pub struct VarDefinition {
    pub qualifiers: Qualifiers,
    /// Declared type, possibly with an inferred array length hole.
    pub type_expression: Option<TypeExpression>,
    /// Canonical type after pass 2.
    pub resolved_type: Option<TypeExpression>,
    /// Explicit `@` placement expression, resolved in pass 3.
    pub address_expression: Option<Expression>,
    /// Declared initializer, shared across the statement's names.
    pub initializer: Option<Expression>,
    pub address: Option<Address>,
    pub storage_size: Option<usize>,
    /// Serialized initializer bytes for stored banks, produced in pass 3.
    pub init_data: Option<Vec<u8>>,
    /// Whether pass 3 already reserved this var's bytes; vars interleaved
    /// with code defer to IR layout instead.
    pub reserved: bool,
}

/// Payload of a `func` or label definition; labels carry no body.
#[derive(Debug, Clone, Default)]
pub struct FuncDefinition {
    pub far: bool,
    pub inline: bool,
    /// Implicit final return suppressed by `#[fallthrough]`.
    pub fallthrough: bool,
    /// IRQ/NMI handlers return with their dedicated instructions.
    pub return_kind: FuncReturnKind,
    /// Parameter var definitions, in order, living in the function scope.
    pub parameters: Vec<DefinitionId>,
    pub return_type: Option<TypeExpression>,
    /// Resolved `func(...)` type after pass 2.
    pub resolved_signature: Option<TypeExpression>,
    pub body: Option<Rc<Statement>>,
    pub environment: Option<ScopeId>,
    pub address: Option<Address>,
}

/// How control leaves a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FuncReturnKind {
    #[default]
    Subroutine,
    Irq,
    Nmi,
}

/// Payload of a `let` definition.
#[derive(Debug, Clone)]
pub struct LetDefinition {
    /// Parameter names for `let f(a, b) = ...` forms.
    pub parameters: Vec<Arc<str>>,
    pub expression: Expression,
    /// Whether `expression` already holds the folded value.
    pub evaluated: bool,
}

/// Payload of a struct or union definition.
#[derive(Debug, Clone)]
pub struct StructDefinition {
    pub kind: StructKind,
    pub environment: ScopeId,
    /// Members in declaration order.
    pub members: Vec<DefinitionId>,
    /// Total size in bytes, computed in pass 2.
    pub size: Option<usize>,
}

/// Payload of one struct/union member.
#[derive(Debug, Clone)]
pub struct StructMemberDefinition {
    pub type_expression: TypeExpression,
    pub resolved_type: Option<TypeExpression>,
    pub offset: Option<usize>,
}

/// Payload of an enum definition.
#[derive(Debug, Clone)]
pub struct EnumDefinition {
    pub environment: ScopeId,
    pub underlying_type: TypeExpression,
    pub resolved_underlying_type: Option<TypeExpression>,
    pub members: Vec<DefinitionId>,
}

/// Payload of one enum member.
#[derive(Debug, Clone)]
pub struct EnumMemberDefinition {
    /// Explicit value expression, if any.
    pub expression: Option<Expression>,
    /// Folded value, assigned in pass 2.
    pub value: Option<i128>,
}

/// Payload of a bank definition.
#[derive(Debug, Clone)]
pub struct BankDefinition {
    pub type_expression: TypeExpression,
    /// Declared `@` origin expression, resolved in pass 3.
    pub address_expression: Option<Expression>,
    /// The registered bank, created in pass 2.
    pub bank: Option<BankId>,
    pub kind: Option<BankKind>,
}

/// Payload of a register definition contributed by the platform.
#[derive(Debug, Clone, Copy)]
pub struct RegisterDefinition {
    /// The register's value type (a builtin integer or bool type).
    pub value_type: DefinitionId,
    /// Bit width shortcut for operand sizing.
    pub size: usize,
}

/// What a definition is.
#[derive(Debug, Clone)]
pub enum DefinitionKind {
    /// `vardata`, `prgdata`, `constdata`, `chrdata`, `varinitdata`.
    BuiltinBankType(BankKind),
    BuiltinBoolType,
    BuiltinIntegerType(BuiltinIntegerType),
    /// `iexpr`: an integer whose width is only constrained by use.
    BuiltinIntegerExpressionType,
    BuiltinLetType,
    BuiltinRangeType,
    BuiltinTypeOfType,
    /// A machine register.
    BuiltinRegister(RegisterDefinition),
    /// A platform intrinsic called for effect (`cmp`, `bit`, `push`, ...).
    BuiltinVoidIntrinsic,
    /// A platform intrinsic producing a value into its destination.
    BuiltinLoadIntrinsic,
    Bank(BankDefinition),
    Enum(EnumDefinition),
    EnumMember(EnumMemberDefinition),
    Func(FuncDefinition),
    Let(LetDefinition),
    Namespace { environment: ScopeId },
    Struct(StructDefinition),
    StructMember(StructMemberDefinition),
    TypeAlias {
        type_expression: TypeExpression,
        resolved_type: Option<TypeExpression>,
    },
    Var(VarDefinition),
}

/// A named, possibly addressable entity.
#[derive(Debug, Clone)]
pub struct Definition {
    pub kind: DefinitionKind,
    pub name: Arc<str>,
    pub declaration: SourceLocation,
    /// Back-edge to the owning scope; never followed during teardown.
    pub parent_scope: Option<ScopeId>,
    /// Noun phrase for diagnostics, e.g. ``function `main` ``.
    pub description: Arc<str>,
}

impl Definition {
    pub fn new(
        kind: DefinitionKind,
        name: Arc<str>,
        declaration: SourceLocation,
        description: Arc<str>,
    ) -> Definition {
        Definition {
            kind,
            name,
            declaration,
            parent_scope: None,
            description,
        }
    }

    /// The storage address, for kinds that carry one.
    pub fn address(&self) -> Option<Address> {
        match &self.kind {
            DefinitionKind::Var(var) => var.address,
            DefinitionKind::Func(func) => func.address,
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&VarDefinition> {
        match &self.kind {
            DefinitionKind::Var(var) => Some(var),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<&FuncDefinition> {
        match &self.kind {
            DefinitionKind::Func(func) => Some(func),
            _ => None,
        }
    }

    /// Whether this definition names a type.
    pub fn is_type(&self) -> bool {
        matches!(
            &self.kind,
            DefinitionKind::BuiltinBankType(..)
                | DefinitionKind::BuiltinBoolType
                | DefinitionKind::BuiltinIntegerType(..)
                | DefinitionKind::BuiltinIntegerExpressionType
                | DefinitionKind::BuiltinLetType
                | DefinitionKind::BuiltinRangeType
                | DefinitionKind::BuiltinTypeOfType
                | DefinitionKind::Enum(..)
                | DefinitionKind::Struct(..)
                | DefinitionKind::TypeAlias { .. }
        )
    }
}

/// Arena owning every definition of one compilation.
#[derive(Debug, Default)]
pub struct DefinitionPool {
    definitions: Vec<Definition>,
}

impl relic_asm::RegisterNamer for DefinitionPool {
    fn register_name(&self, id: DefinitionId) -> String {
        self.get(id).name.to_string()
    }
}

impl DefinitionPool {
    pub fn new() -> DefinitionPool {
        DefinitionPool::default()
    }

    /// Interns a definition and returns its stable handle.
    pub fn add(&mut self, definition: Definition) -> DefinitionId {
        let id = DefinitionId(self.definitions.len() as u32);
        self.definitions.push(definition);
        id
    }

    pub fn get(&self, id: DefinitionId) -> &Definition {
        &self.definitions[id.index()]
    }

    pub fn get_mut(&mut self, id: DefinitionId) -> &mut Definition {
        &mut self.definitions[id.index()]
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Handles in insertion order; pass 2 resolves in this order.
    pub fn ids(&self) -> impl Iterator<Item = DefinitionId> {
        (0..self.definitions.len() as u32).map(DefinitionId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (DefinitionId, &Definition)> {
        self.definitions
            .iter()
            .enumerate()
            .map(|(index, definition)| (DefinitionId(index as u32), definition))
    }
}
