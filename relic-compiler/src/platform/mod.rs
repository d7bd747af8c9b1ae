//! The target abstraction: each platform contributes register and
//! intrinsic definitions, operand patterns, instruction encodings, and
//! compare-then-branch lowerings to the shared [`Builtins`] registry.

mod encodings;
mod gb;
mod mos6502;
mod spc700;
mod wdc65816;
mod z80;

pub use encodings::*;
pub use gb::GameBoyPlatform;
pub use mos6502::{Mos6502Platform, Mos6502Revision};
pub use spc700::Spc700Platform;
pub use wdc65816::Wdc65816Platform;
pub use z80::Z80Platform;

use std::collections::HashMap;

use relic_asm::InstructionType;
use relic_types::{BinaryOperator, DefinitionId};

use crate::ast::{DistanceHint, Expression};
use crate::builtins::Builtins;
use crate::definition::{Definition, DefinitionKind, DefinitionPool, RegisterDefinition};
use crate::report::Report;
use crate::symbol_table::ScopePool;

/// Everything a platform touches while registering itself.
pub struct PlatformContext<'a> {
    pub builtins: &'a mut Builtins,
    pub scopes: &'a mut ScopePool,
    pub definitions: &'a mut DefinitionPool,
    pub report: &'a mut Report,
}

impl PlatformContext<'_> {
    /// Registers a machine register in the builtin scope.
    pub fn add_register(&mut self, name: &str, value_type: DefinitionId, size: usize) -> DefinitionId {
        let definition = Definition::new(
            DefinitionKind::BuiltinRegister(RegisterDefinition { value_type, size }),
            name.into(),
            self.builtins.declaration().clone(),
            format!("register `{}`", name).into(),
        );
        self.scopes
            .add_definition(self.definitions, self.report, self.builtins.scope(), definition)
            .expect("platform register names are unique")
    }

    /// Registers an intrinsic called for effect (`cmp`, `push`, `nop`, ...).
    pub fn add_void_intrinsic(&mut self, name: &str) -> DefinitionId {
        let definition = Definition::new(
            DefinitionKind::BuiltinVoidIntrinsic,
            name.into(),
            self.builtins.declaration().clone(),
            format!("intrinsic `{}`", name).into(),
        );
        self.scopes
            .add_definition(self.definitions, self.report, self.builtins.scope(), definition)
            .expect("platform intrinsic names are unique")
    }

    /// Registers an intrinsic that produces a value into its destination.
    pub fn add_load_intrinsic(&mut self, name: &str) -> DefinitionId {
        let definition = Definition::new(
            DefinitionKind::BuiltinLoadIntrinsic,
            name.into(),
            self.builtins.declaration().clone(),
            format!("intrinsic `{}`", name).into(),
        );
        self.scopes
            .add_definition(self.definitions, self.report, self.builtins.scope(), definition)
            .expect("platform intrinsic names are unique")
    }
}

/// One conditional branch of a test-and-branch lowering: branch when
/// `flag == value`; `success` selects whether it targets the success label
/// or the fall-through label.
#[derive(Debug, Clone, Copy)]
pub struct PlatformBranch {
    pub flag: DefinitionId,
    pub value: bool,
    pub success: bool,
}

impl PlatformBranch {
    pub fn new(flag: DefinitionId, value: bool, success: bool) -> PlatformBranch {
        PlatformBranch {
            flag,
            value,
            success,
        }
    }
}

/// How a compare-plus-conditional-jump pair lowers on a platform: an
/// optional test instruction over cloned operand expressions, then one or
/// more flag branches.
#[derive(Debug, Clone)]
pub struct PlatformTestAndBranch {
    pub test: Option<(InstructionType, Vec<Expression>)>,
    pub branches: Vec<PlatformBranch>,
}

/// A CPU target. Implementations register their definitions and
/// instruction tables once, during pass 1.
pub trait Platform {
    /// Canonical platform name (`"6502"`, `"gb"`, ...).
    fn name(&self) -> &'static str;

    /// Adds registers, flags, intrinsics, mode attributes and the
    /// instruction table to the shared builtins.
    fn reserve_definitions(&mut self, context: &mut PlatformContext<'_>);

    /// Default integer type for near addresses.
    fn pointer_sized_type(&self) -> DefinitionId;

    /// Default integer type for far addresses.
    fn far_pointer_sized_type(&self) -> DefinitionId;

    /// Lowers `left op right` into a test instruction and flag branches,
    /// or `None` when the platform has no specialized lowering for this
    /// operand combination.
    fn get_test_and_branch(
        &self,
        op: BinaryOperator,
        operand_size: usize,
        left: &Expression,
        right: &Expression,
        distance_hint: DistanceHint,
    ) -> Option<PlatformTestAndBranch>;

    /// The condition-code register used by generic boolean tests.
    fn zero_flag(&self) -> DefinitionId;

    /// Representative value for link-time operands during encoding
    /// selection; fits the platform's typical address immediate range.
    fn placeholder_value(&self) -> i128;
}

type PlatformFactory = fn() -> Box<dyn Platform>;

/// Name, alias and file-extension registry over the supported platforms.
pub struct PlatformCollection {
    factories: Vec<(&'static str, PlatformFactory)>,
    by_name: HashMap<&'static str, usize>,
    by_extension: HashMap<&'static str, usize>,
}

impl PlatformCollection {
    /// The standard registry of every supported target.
    pub fn new() -> PlatformCollection {
        let mut collection = PlatformCollection {
            factories: Vec::new(),
            by_name: HashMap::new(),
            by_extension: HashMap::new(),
        };
        collection.add("6502", || {
            Box::new(Mos6502Platform::new(Mos6502Revision::Base6502))
        });
        collection.add("65c02", || {
            Box::new(Mos6502Platform::new(Mos6502Revision::Base65C02))
        });
        collection.add("rockwell65c02", || {
            Box::new(Mos6502Platform::new(Mos6502Revision::Rockwell65C02))
        });
        collection.add("wdc65c02", || {
            Box::new(Mos6502Platform::new(Mos6502Revision::Wdc65C02))
        });
        collection.add("huc6280", || {
            Box::new(Mos6502Platform::new(Mos6502Revision::Huc6280))
        });
        collection.add("z80", || Box::new(Z80Platform::new()));
        collection.add("gb", || Box::new(GameBoyPlatform::new()));
        collection.add("wdc65816", || Box::new(Wdc65816Platform::new()));
        collection.add("spc700", || Box::new(Spc700Platform::new()));

        collection.add_file_extension("nes", "6502");
        collection.add_file_extension("a26", "6502");
        collection.add_file_extension("pce", "huc6280");
        collection.add_file_extension("sms", "z80");
        collection.add_file_extension("gg", "z80");
        collection.add_file_extension("gb", "gb");
        collection.add_file_extension("smc", "wdc65816");
        collection.add_file_extension("sfc", "wdc65816");
        collection
    }

    fn add(&mut self, name: &'static str, factory: PlatformFactory) {
        let index = self.factories.len();
        self.factories.push((name, factory));
        self.by_name.insert(name, index);
    }

    /// Registers an alternate name for an existing platform.
    pub fn add_platform_alias(&mut self, alias: &'static str, original: &'static str) {
        if let Some(&index) = self.by_name.get(original) {
            self.by_name.insert(alias, index);
        }
    }

    fn add_file_extension(&mut self, extension: &'static str, name: &'static str) {
        if let Some(&index) = self.by_name.get(name) {
            self.by_extension.insert(extension, index);
        }
    }

    /// All registered canonical names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.iter().map(|(name, _)| *name)
    }

    /// Instantiates the platform registered under `name`.
    pub fn create_by_name(&self, name: &str) -> Option<Box<dyn Platform>> {
        self.by_name
            .get(name)
            .map(|&index| (self.factories[index].1)())
    }

    /// Instantiates the platform registered for an output file extension.
    pub fn create_by_file_extension(&self, extension: &str) -> Option<Box<dyn Platform>> {
        self.by_extension
            .get(extension)
            .map(|&index| (self.factories[index].1)())
    }
}

impl Default for PlatformCollection {
    fn default() -> Self {
        PlatformCollection::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_registry_matches_targets() {
        let collection = PlatformCollection::new();
        assert_eq!(
            collection.create_by_file_extension("nes").unwrap().name(),
            "6502"
        );
        assert_eq!(
            collection.create_by_file_extension("gb").unwrap().name(),
            "gb"
        );
        assert_eq!(
            collection.create_by_file_extension("sfc").unwrap().name(),
            "wdc65816"
        );
        assert_eq!(
            collection.create_by_file_extension("gg").unwrap().name(),
            "z80"
        );
        assert!(collection.create_by_file_extension("exe").is_none());
    }

    #[test]
    fn aliases_resolve_to_the_original() {
        let mut collection = PlatformCollection::new();
        collection.add_platform_alias("sm83", "gb");
        assert_eq!(collection.create_by_name("sm83").unwrap().name(), "gb");
    }
}
