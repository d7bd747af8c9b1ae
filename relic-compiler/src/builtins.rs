//! The builtin root scope (primitive types, bank kinds, `has_def` /
//! `get_def`), command-line defines, the shared instruction registry, and
//! the mode-attribute table platforms extend.

use std::collections::HashMap;
use std::sync::Arc;

use relic_asm::{InstructionSet, ModeFlags};
use relic_types::{DefinitionId, SourceLocation};

use crate::ast::Expression;
use crate::bank::BankKind;
use crate::definition::{BuiltinIntegerType, Definition, DefinitionKind};
use crate::report::Report;
use crate::symbol_table::{ScopeId, ScopePool};

/// Handles to the builtin type definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinType {
    Bool,
    U8,
    U16,
    U24,
    U32,
    U64,
    I8,
    I16,
    I24,
    I32,
    I64,
    IExpr,
    Let,
    Range,
    TypeOf,
    HasDef,
    GetDef,
}

/// Function attributes understood by the IR emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionAttribute {
    Irq,
    Nmi,
    Fallthrough,
}

/// Compile-time properties reachable through member access on types and
/// sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    Len,
    MinValue,
    MaxValue,
}

/// A named CPU mode attribute registered by the platform. Attributes in
/// the same group are mutually exclusive (e.g. `mem8` vs `mem16`).
#[derive(Debug, Clone)]
pub struct BuiltinModeAttribute {
    pub name: Arc<str>,
    pub group_index: usize,
    /// Bit position inside [`ModeFlags`].
    pub bit: u32,
}

/// Shared builtin state owned by the compiler.
#[derive(Debug)]
pub struct Builtins {
    scope: ScopeId,
    declaration: SourceLocation,
    types: HashMap<BuiltinType, DefinitionId>,
    defines: HashMap<Arc<str>, Expression>,
    /// The pattern/encoding/instruction registry platforms populate.
    pub instruction_set: InstructionSet,
    mode_attributes: Vec<BuiltinModeAttribute>,
    mode_attributes_by_name: HashMap<Arc<str>, usize>,
}

impl Builtins {
    /// Creates the builtin scope and registers the primitive types and
    /// bank kinds into it.
    pub fn new(
        scopes: &mut ScopePool,
        definitions: &mut crate::definition::DefinitionPool,
        report: &mut Report,
        defines: HashMap<Arc<str>, Expression>,
    ) -> Builtins {
        let scope = scopes.create(None, Arc::from(""));
        let declaration = SourceLocation::file("<builtin>");
        let mut builtins = Builtins {
            scope,
            declaration: declaration.clone(),
            types: HashMap::new(),
            defines,
            instruction_set: InstructionSet::new(),
            mode_attributes: Vec::new(),
            mode_attributes_by_name: HashMap::new(),
        };

        let mut register = |builtins: &mut Builtins,
                            key: BuiltinType,
                            name: &str,
                            kind: DefinitionKind| {
            let definition = Definition::new(
                kind,
                Arc::from(name),
                declaration.clone(),
                Arc::from(format!("built-in `{}`", name)),
            );
            let id = scopes
                .add_definition(definitions, report, scope, definition)
                .expect("builtin scope starts empty");
            builtins.types.insert(key, id);
        };

        register(&mut builtins, BuiltinType::Bool, "bool", DefinitionKind::BuiltinBoolType);
        for (key, name, size) in [
            (BuiltinType::U8, "u8", 1),
            (BuiltinType::U16, "u16", 2),
            (BuiltinType::U24, "u24", 3),
            (BuiltinType::U32, "u32", 4),
            (BuiltinType::U64, "u64", 8),
        ] {
            register(
                &mut builtins,
                key,
                name,
                DefinitionKind::BuiltinIntegerType(BuiltinIntegerType::unsigned(size)),
            );
        }
        for (key, name, size) in [
            (BuiltinType::I8, "i8", 1),
            (BuiltinType::I16, "i16", 2),
            (BuiltinType::I24, "i24", 3),
            (BuiltinType::I32, "i32", 4),
            (BuiltinType::I64, "i64", 8),
        ] {
            register(
                &mut builtins,
                key,
                name,
                DefinitionKind::BuiltinIntegerType(BuiltinIntegerType::signed(size)),
            );
        }
        register(
            &mut builtins,
            BuiltinType::IExpr,
            "iexpr",
            DefinitionKind::BuiltinIntegerExpressionType,
        );
        register(&mut builtins, BuiltinType::Let, "let", DefinitionKind::BuiltinLetType);
        register(&mut builtins, BuiltinType::Range, "range", DefinitionKind::BuiltinRangeType);
        register(
            &mut builtins,
            BuiltinType::TypeOf,
            "typeof",
            DefinitionKind::BuiltinTypeOfType,
        );
        register(
            &mut builtins,
            BuiltinType::HasDef,
            "has_def",
            DefinitionKind::BuiltinLoadIntrinsic,
        );
        register(
            &mut builtins,
            BuiltinType::GetDef,
            "get_def",
            DefinitionKind::BuiltinLoadIntrinsic,
        );

        for (name, kind) in [
            ("vardata", BankKind::UninitializedRam),
            ("varinitdata", BankKind::InitializedRam),
            ("prgdata", BankKind::ProgramRom),
            ("constdata", BankKind::DataRom),
            ("chrdata", BankKind::CharacterRom),
        ] {
            let definition = Definition::new(
                DefinitionKind::BuiltinBankType(kind),
                Arc::from(name),
                declaration.clone(),
                Arc::from(format!("built-in bank type `{}`", name)),
            );
            scopes
                .add_definition(definitions, report, scope, definition)
                .expect("builtin scope starts empty");
        }

        builtins
    }

    /// The root scope holding builtin and platform definitions.
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// The `<builtin>` location attached to synthesized definitions.
    pub fn declaration(&self) -> &SourceLocation {
        &self.declaration
    }

    /// Handle of a builtin type definition.
    pub fn get(&self, key: BuiltinType) -> DefinitionId {
        self.types[&key]
    }

    /// Command-line define for `key`, if any.
    pub fn define_expression(&self, key: &str) -> Option<&Expression> {
        self.defines.get(key)
    }

    /// Maps an attribute name to the function attributes the emitter
    /// understands.
    pub fn find_function_attribute(name: &str) -> Option<FunctionAttribute> {
        match name {
            "irq" => Some(FunctionAttribute::Irq),
            "nmi" => Some(FunctionAttribute::Nmi),
            "fallthrough" => Some(FunctionAttribute::Fallthrough),
            _ => None,
        }
    }

    /// Maps a member name to a compile-time property.
    pub fn find_property(name: &str) -> Option<Property> {
        match name {
            "len" => Some(Property::Len),
            "min_value" => Some(Property::MinValue),
            "max_value" => Some(Property::MaxValue),
            _ => None,
        }
    }

    /// Registers a named mode attribute and returns its bit position.
    /// Attributes sharing `group_index` are mutually exclusive.
    pub fn add_mode_attribute(&mut self, name: &str, group_index: usize) -> u32 {
        let bit = self.mode_attributes.len() as u32;
        debug_assert!(bit < 32, "mode flag bits exhausted");
        self.mode_attributes.push(BuiltinModeAttribute {
            name: Arc::from(name),
            group_index,
            bit,
        });
        self.mode_attributes_by_name
            .insert(Arc::from(name), bit as usize);
        bit
    }

    /// Looks up a mode attribute by source name.
    pub fn find_mode_attribute(&self, name: &str) -> Option<&BuiltinModeAttribute> {
        self.mode_attributes_by_name
            .get(name)
            .map(|&index| &self.mode_attributes[index])
    }

    /// Applies a mode attribute to a flag set: clears the rest of its
    /// group, then sets its own bit.
    pub fn apply_mode_attribute(&self, flags: ModeFlags, attribute: &BuiltinModeAttribute) -> ModeFlags {
        let mut result = flags;
        for other in &self.mode_attributes {
            if other.group_index == attribute.group_index {
                result = result.difference(ModeFlags::bit(other.bit));
            }
        }
        result.union(ModeFlags::bit(attribute.bit))
    }

    /// All registered mode attributes.
    pub fn mode_attributes(&self) -> &[BuiltinModeAttribute] {
        &self.mode_attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::DefinitionPool;
    use crate::report::CollectingSink;

    #[test]
    fn mode_attribute_groups_are_exclusive() {
        let sink = CollectingSink::new();
        let mut report = Report::new(Box::new(sink));
        let mut scopes = ScopePool::new();
        let mut definitions = DefinitionPool::new();
        let mut builtins = Builtins::new(&mut scopes, &mut definitions, &mut report, HashMap::new());

        let mem8 = builtins.add_mode_attribute("mem8", 0);
        let mem16 = builtins.add_mode_attribute("mem16", 0);
        let idx8 = builtins.add_mode_attribute("idx8", 1);

        let flags = ModeFlags::bit(mem8).union(ModeFlags::bit(idx8));
        let attribute = builtins.find_mode_attribute("mem16").unwrap().clone();
        let switched = builtins.apply_mode_attribute(flags, &attribute);
        assert!(switched.contains(ModeFlags::bit(mem16)));
        assert!(!switched.contains(ModeFlags::bit(mem8)));
        assert!(switched.contains(ModeFlags::bit(idx8)));
    }

    #[test]
    fn builtin_scope_resolves_primitive_types() {
        let sink = CollectingSink::new();
        let mut report = Report::new(Box::new(sink));
        let mut scopes = ScopePool::new();
        let mut definitions = DefinitionPool::new();
        let builtins = Builtins::new(&mut scopes, &mut definitions, &mut report, HashMap::new());

        let u8_id = builtins.get(BuiltinType::U8);
        assert_eq!(
            scopes.find_unqualified_definitions(builtins.scope(), "u8"),
            vec![u8_id]
        );
        match &definitions.get(u8_id).kind {
            DefinitionKind::BuiltinIntegerType(ty) => {
                assert_eq!((ty.size, ty.min, ty.max), (1, 0, 255));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }
}
