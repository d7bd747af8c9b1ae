//! Banks: named address regions with per-byte ownership bookkeeping.
//!
//! Every byte of a bank is either free or owned by the reservation that
//! claimed it, so overlapping placements and writes without a prior
//! reservation are caught with diagnostics naming both parties.

use std::collections::HashMap;
use std::sync::Arc;

use relic_types::{int, DefinitionId, SourceLocation};

use crate::definition::Address;
use crate::report::{Report, ReportErrorFlags};

/// Stable handle to a bank in a [`BankPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BankId(pub u32);

/// What a bank stores and how it may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr)]
pub enum BankKind {
    None,
    /// `vardata`: RAM without initial contents.
    UninitializedRam,
    /// `varinitdata`: RAM with contents copied from the ROM image.
    InitializedRam,
    /// `prgdata`: executable ROM.
    ProgramRom,
    /// `constdata`: read-only data ROM.
    DataRom,
    /// `chrdata`: character/tile ROM kept out of the CPU address space.
    CharacterRom,
}

impl BankKind {
    /// Whether the bank contributes bytes to the output image.
    pub fn is_stored(self) -> bool {
        matches!(
            self,
            BankKind::InitializedRam
                | BankKind::ProgramRom
                | BankKind::DataRom
                | BankKind::CharacterRom
        )
    }

    /// Whether the bank accepts run-time writable storage.
    pub fn is_writable(self) -> bool {
        matches!(self, BankKind::UninitializedRam | BankKind::InitializedRam)
    }
}

/// What reserved a byte range: a storage-bearing definition, or an IR code
/// node identified by its index in the compiler's IR stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservationNode {
    Definition(DefinitionId),
    Ir(usize),
}

#[derive(Debug, Clone)]
struct BankRegionOwner {
    description: Arc<str>,
    location: SourceLocation,
}

/// A named, sized address region. See the module docs for the ownership
/// rules; positions advance on every reserve or write.
#[derive(Debug)]
pub struct Bank {
    id: BankId,
    name: Arc<str>,
    kind: BankKind,
    origin: Option<usize>,
    relative_position: usize,
    capacity: usize,
    data: Vec<u8>,
    /// Per byte: 0 when free, else a 1-based index into `owners`.
    ownership: Vec<u32>,
    owners: Vec<BankRegionOwner>,
    nodes_to_owners: HashMap<ReservationNode, u32>,
}

impl Bank {
    /// Fill byte for unreserved space in stored banks.
    pub const DEFAULT_PAD_VALUE: u8 = 0xFF;

    fn new(
        id: BankId,
        name: Arc<str>,
        kind: BankKind,
        origin: Option<usize>,
        capacity: usize,
        pad_value: u8,
    ) -> Bank {
        Bank {
            id,
            name,
            kind,
            origin,
            relative_position: 0,
            capacity,
            data: if kind.is_stored() {
                vec![pad_value; capacity]
            } else {
                Vec::new()
            },
            ownership: vec![0; capacity],
            owners: Vec::new(),
            nodes_to_owners: HashMap::new(),
        }
    }

    pub fn id(&self) -> BankId {
        self.id
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn kind(&self) -> BankKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn origin(&self) -> Option<usize> {
        self.origin
    }

    /// Sets the origin directly (used when a bank declaration carries an
    /// explicit `@` address).
    pub fn set_origin(&mut self, origin: usize) {
        self.origin = Some(origin);
    }

    /// The current position as an address.
    pub fn address(&self) -> Address {
        Address {
            relative_position: Some(self.relative_position),
            absolute_position: self.origin.map(|origin| origin + self.relative_position),
            bank: Some(self.id),
        }
    }

    pub fn relative_position(&self) -> usize {
        self.relative_position
    }

    /// Moves the position without touching ownership; layout uses this to
    /// replay the IR.
    pub fn set_relative_position(&mut self, dest: usize) {
        self.relative_position = dest;
    }

    /// Full contents, padded to capacity. Empty for unstored banks.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Contents up to the last owned byte.
    pub fn used_data(&self) -> &[u8] {
        &self.data[..self.calculate_used_size()]
    }

    /// Resets the position to the start of the bank without releasing any
    /// reservations.
    pub fn rewind(&mut self) {
        self.relative_position = 0;
    }

    /// Reserves `size` bytes of run-time storage; only writable kinds
    /// accept this.
    pub fn reserve_ram(
        &mut self,
        report: &mut Report,
        description: &str,
        node: ReservationNode,
        location: SourceLocation,
        size: usize,
    ) -> bool {
        if !self.kind.is_writable() {
            report.error(
                format!(
                    "{} requires a writable region, which is not allowed in readonly bank `{}`",
                    description, self.name
                ),
                location,
                ReportErrorFlags::FATAL,
            );
            false
        } else {
            self.reserve(report, description, node, location, size)
        }
    }

    /// Reserves `size` bytes of initialized data; only stored kinds accept
    /// this.
    pub fn reserve_rom(
        &mut self,
        report: &mut Report,
        description: &str,
        node: ReservationNode,
        location: SourceLocation,
        size: usize,
    ) -> bool {
        if !self.kind.is_stored() {
            report.error(
                format!(
                    "{} requires initialized data, which is not allowed in volatile bank `{}`",
                    description, self.name
                ),
                location,
                ReportErrorFlags::FATAL,
            );
            false
        } else {
            self.reserve(report, description, node, location, size)
        }
    }

    /// Common reservation path: bounds check, owner bookkeeping, per-byte
    /// overlap detection. Advances the position by `size` on success.
    pub fn reserve(
        &mut self,
        report: &mut Report,
        description: &str,
        node: ReservationNode,
        location: SourceLocation,
        size: usize,
    ) -> bool {
        if self.relative_position + size > self.capacity {
            report.error(
                format!(
                    "{} needs {} byte(s), which exceeds the remaining space in bank `{}` by {} byte(s)",
                    description,
                    size,
                    self.name,
                    self.relative_position + size - self.capacity
                ),
                location,
                ReportErrorFlags::FATAL,
            );
            return false;
        }

        let owner_id = match self.nodes_to_owners.get(&node) {
            Some(&owner_id) => owner_id,
            None => {
                self.owners.push(BankRegionOwner {
                    description: Arc::from(description),
                    location: location.clone(),
                });
                let owner_id = self.owners.len() as u32;
                self.nodes_to_owners.insert(node, owner_id);
                owner_id
            }
        };

        for index in 0..size {
            let offset = self.relative_position + index;
            let previous_id = self.ownership[offset];
            if previous_id != 0 {
                let previous = self.owners[previous_id as usize - 1].clone();
                report.error(
                    format!(
                        "overlap conflict encountered at {} while reserving byte {} of {} byte(s) needed for {}",
                        self.address_description(offset),
                        index,
                        size,
                        description
                    ),
                    location,
                    ReportErrorFlags::CONTINUED,
                );
                report.error(
                    format!(
                        "address was previously reserved here, by {}",
                        previous.description
                    ),
                    previous.location,
                    ReportErrorFlags::FATAL,
                );
                return false;
            }
            self.ownership[offset] = owner_id;
        }

        self.relative_position += size;
        true
    }

    /// Writes bytes previously reserved by `node` at the current position,
    /// advancing past them. Writing without a reservation is an internal
    /// error; writing over someone else's bytes names the other party.
    pub fn write(
        &mut self,
        report: &mut Report,
        description: &str,
        node: ReservationNode,
        location: SourceLocation,
        values: &[u8],
    ) -> bool {
        let size = values.len();
        if self.relative_position + size > self.capacity {
            report.error(
                format!(
                    "{} needs {} byte(s), which exceeds the remaining space in bank `{}` by {} byte(s)",
                    description,
                    size,
                    self.name,
                    self.relative_position + size - self.capacity
                ),
                location,
                ReportErrorFlags::FATAL,
            );
            return false;
        }

        let Some(&owner_id) = self.nodes_to_owners.get(&node) else {
            report.error(
                format!(
                    "attempt to write to {} in bank `{}`, with {} that never reserved any space for itself",
                    self.address_description(self.relative_position),
                    self.name,
                    description
                ),
                location,
                ReportErrorFlags::FATAL | ReportErrorFlags::INTERNAL_ERROR,
            );
            return false;
        };

        for index in 0..size {
            let offset = self.relative_position + index;
            if self.ownership[offset] != owner_id {
                report.error(
                    format!(
                        "write conflict encountered at {} while attempting to write byte {} of {} byte(s) for {}",
                        self.address_description(offset),
                        index,
                        size,
                        description
                    ),
                    location.clone(),
                    ReportErrorFlags::INTERNAL_ERROR | ReportErrorFlags::CONTINUED,
                );
                let previous_id = self.ownership[offset];
                if previous_id != 0 {
                    let previous = self.owners[previous_id as usize - 1].clone();
                    report.error(
                        format!(
                            "address was supposed to be reserved here, by {}",
                            previous.description
                        ),
                        previous.location,
                        ReportErrorFlags::FATAL,
                    );
                } else {
                    report.error(
                        "address was never reserved when it was supposed to be".into(),
                        location,
                        ReportErrorFlags::FATAL,
                    );
                }
                return false;
            }
        }

        self.data[self.relative_position..self.relative_position + size].copy_from_slice(values);
        self.relative_position += size;
        true
    }

    /// Seeks to an absolute address. The first seek on an origin-less bank
    /// adopts `dest` as the origin.
    pub fn absolute_seek(
        &mut self,
        report: &mut Report,
        dest: usize,
        location: &SourceLocation,
    ) -> bool {
        match self.origin {
            Some(origin) => {
                if dest < origin || dest >= origin + self.capacity {
                    report.error(
                        format!(
                            "attempt to seek to invalid address `0x{}` in bank `{}`, which exceeds its address range of `0x{}` .. `0x{}`",
                            int::to_string_radix(dest as i128, 16),
                            self.name,
                            int::to_string_radix(origin as i128, 16),
                            int::to_string_radix((origin + self.capacity - 1) as i128, 16)
                        ),
                        location.clone(),
                        ReportErrorFlags::FATAL,
                    );
                    return false;
                }
                self.relative_position = dest - origin;
                true
            }
            None => {
                self.origin = Some(dest);
                true
            }
        }
    }

    /// Highest owned offset + 1, or 0 when nothing was reserved.
    pub fn calculate_used_size(&self) -> usize {
        for offset in (0..self.ownership.len()).rev() {
            if self.ownership[offset] != 0 {
                return offset + 1;
            }
        }
        0
    }

    fn address_description(&self, offset: usize) -> String {
        match self.origin {
            Some(origin) => format!(
                "absolute address 0x{}",
                int::to_string_radix((origin + offset) as i128, 16)
            ),
            None => format!("relative position {}", offset),
        }
    }
}

/// Arena owning every bank of one compilation, in declaration order.
#[derive(Debug, Default)]
pub struct BankPool {
    banks: Vec<Bank>,
}

impl BankPool {
    pub fn new() -> BankPool {
        BankPool::default()
    }

    /// Registers a bank and returns its handle.
    pub fn create(
        &mut self,
        name: Arc<str>,
        kind: BankKind,
        origin: Option<usize>,
        capacity: usize,
        pad_value: u8,
    ) -> BankId {
        let id = BankId(self.banks.len() as u32);
        self.banks
            .push(Bank::new(id, name, kind, origin, capacity, pad_value));
        id
    }

    pub fn get(&self, id: BankId) -> &Bank {
        &self.banks[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: BankId) -> &mut Bank {
        &mut self.banks[id.0 as usize]
    }

    /// Banks in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Bank> {
        self.banks.iter()
    }

    pub fn len(&self) -> usize {
        self.banks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::CollectingSink;

    fn fixture(kind: BankKind, origin: Option<usize>, capacity: usize) -> (BankPool, BankId, Report, CollectingSink) {
        let sink = CollectingSink::new();
        let report = Report::new(Box::new(sink.clone()));
        let mut pool = BankPool::new();
        let id = pool.create(Arc::from("test"), kind, origin, capacity, Bank::DEFAULT_PAD_VALUE);
        (pool, id, report, sink)
    }

    fn node(index: usize) -> ReservationNode {
        ReservationNode::Ir(index)
    }

    #[test]
    fn reserve_tags_exactly_the_requested_range() {
        let (mut pool, id, mut report, _sink) = fixture(BankKind::ProgramRom, Some(0x8000), 0x100);
        let bank = pool.get_mut(id);
        assert!(bank.reserve_rom(&mut report, "data", node(0), SourceLocation::empty(), 4));
        assert!(bank.reserve_rom(&mut report, "more data", node(1), SourceLocation::empty(), 2));
        assert_eq!(bank.calculate_used_size(), 6);
        assert_eq!(bank.relative_position(), 6);
    }

    #[test]
    fn overlap_is_diagnosed_with_previous_owner() {
        let (mut pool, id, mut report, sink) = fixture(BankKind::ProgramRom, Some(0x8000), 0x100);
        let bank = pool.get_mut(id);
        assert!(bank.reserve_rom(&mut report, "table `a`", node(0), SourceLocation::line("a.wiz", 1), 8));
        bank.set_relative_position(4);
        assert!(!bank.reserve_rom(&mut report, "table `b`", node(1), SourceLocation::line("a.wiz", 2), 8));
        let rendered = sink.rendered();
        assert!(rendered[0].contains("overlap conflict encountered at absolute address 0x8004"));
        assert!(rendered[1].contains("previously reserved here, by table `a`"));
        assert!(rendered[1].contains("a.wiz:1"));
    }

    #[test]
    fn same_node_may_span_multiple_reservations() {
        let (mut pool, id, mut report, _sink) = fixture(BankKind::UninitializedRam, None, 16);
        let bank = pool.get_mut(id);
        assert!(bank.reserve_ram(&mut report, "var `x`", node(0), SourceLocation::empty(), 2));
        assert!(bank.reserve_ram(&mut report, "var `x`", node(0), SourceLocation::empty(), 2));
        // Distinct ranges, one owner entry.
        assert_eq!(bank.calculate_used_size(), 4);
    }

    #[test]
    fn write_requires_reservation_by_the_same_node() {
        let (mut pool, id, mut report, sink) = fixture(BankKind::ProgramRom, Some(0), 16);
        let bank = pool.get_mut(id);
        assert!(!bank.write(&mut report, "code", node(7), SourceLocation::empty(), &[1, 2]));
        assert!(sink.rendered()[0].contains("never reserved any space for itself"));
        assert!(!report.alive());
    }

    #[test]
    fn write_lands_reserved_bytes() {
        let (mut pool, id, mut report, _sink) = fixture(BankKind::ProgramRom, Some(0x8000), 16);
        let bank = pool.get_mut(id);
        assert!(bank.reserve_rom(&mut report, "code", node(0), SourceLocation::empty(), 3));
        bank.set_relative_position(0);
        assert!(bank.write(&mut report, "code", node(0), SourceLocation::empty(), &[0xA9, 0x55, 0x60]));
        assert_eq!(&bank.data()[0..3], &[0xA9, 0x55, 0x60]);
        assert_eq!(bank.relative_position(), 3);
    }

    #[test]
    fn ram_and_rom_kind_checks() {
        let (mut pool, id, mut report, sink) = fixture(BankKind::ProgramRom, Some(0), 16);
        assert!(!pool.get_mut(id).reserve_ram(
            &mut report,
            "var `x`",
            node(0),
            SourceLocation::empty(),
            1
        ));
        assert!(sink.rendered()[0].contains("readonly bank `test`"));

        let (mut pool, id, mut report, sink) = fixture(BankKind::UninitializedRam, Some(0), 16);
        assert!(!pool.get_mut(id).reserve_rom(
            &mut report,
            "const `t`",
            node(0),
            SourceLocation::empty(),
            1
        ));
        assert!(sink.rendered()[0].contains("volatile bank `test`"));
    }

    #[test]
    fn seek_checks_range_and_first_seek_defines_origin() {
        let (mut pool, id, mut report, sink) = fixture(BankKind::ProgramRom, Some(0x8000), 0x100);
        let bank = pool.get_mut(id);
        assert!(bank.absolute_seek(&mut report, 0x8040, &SourceLocation::empty()));
        assert_eq!(bank.relative_position(), 0x40);
        assert!(!bank.absolute_seek(&mut report, 0x4000, &SourceLocation::empty()));
        assert!(sink.rendered()[0].contains("invalid address `0x4000`"));

        let (mut pool, id, mut report, _sink) = fixture(BankKind::ProgramRom, None, 0x100);
        let bank = pool.get_mut(id);
        assert!(bank.absolute_seek(&mut report, 0xC000, &SourceLocation::empty()));
        assert_eq!(bank.origin(), Some(0xC000));
        drop(report);
    }

    #[test]
    fn bank_overflow_is_fatal() {
        let (mut pool, id, mut report, sink) = fixture(BankKind::ProgramRom, Some(0), 4);
        assert!(!pool.get_mut(id).reserve_rom(
            &mut report,
            "table `big`",
            node(0),
            SourceLocation::empty(),
            9
        ));
        assert!(sink.rendered()[0].contains("exceeds the remaining space in bank `test` by 5 byte(s)"));
        assert!(!report.alive());
    }
}
