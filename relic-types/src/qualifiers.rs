use bitflags::bitflags;

bitflags! {
    /// Storage and access qualifiers attached to types and expression info.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Qualifiers: u8 {
        /// Read-only data placed in a stored bank.
        const CONST = 0x01;
        /// Memory-mapped output; reads are meaningless.
        const WRITE_ONLY = 0x02;
        /// Declared elsewhere; storage is never reserved.
        const EXTERN = 0x04;
        /// Reached through a long/far pointer.
        const FAR = 0x08;
        /// Denotes an addressable location rather than a value.
        const LVALUE = 0x10;
    }
}
