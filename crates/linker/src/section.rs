//! Section and Fragment model (§3).
//!
//! Sections own an ordered list of fragments; a fragment is a contiguous,
//! alignment-aware chunk of output bytes. Both kinds are closed sets, so
//! they are modeled as tagged variants rather than via dynamic dispatch, per
//! the §9 design note.

use enumflags2::{bitflags, BitFlags};

use crate::ids::{FragmentId, InputId, SectionId};

/// What a [`Section`] is, closed per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// A regular, data-bearing section.
    Regular,
    /// `SHF_MERGE | SHF_STRINGS`: a table of null-terminated strings, merged
    /// by content.
    MergeString,
    /// `SHT_REL` / `SHT_RELA`.
    Relocation,
    /// `SHT_GROUP`: a COMDAT section group.
    Group,
    /// `SHN_COMMON`-backed: a tentative definition awaiting allocation.
    Common,
    /// `SHT_NOBITS`: occupies no file space, a single zero-fill fragment.
    Nobits,
    /// `SHT_NOTE`.
    Note,
    /// The null section at index 0.
    Null,
    /// A linker-internal, target-specific section (GOT, PLT, …).
    Target,
    /// Matched by `/DISCARD/` or otherwise dropped; contributes no bytes.
    Discard,
}

/// `Section` flag, matching the ELF `SHF_*` bits the engine cares about.
#[bitflags]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SectionFlag {
    /// `SHF_ALLOC`.
    Alloc = 1 << 0,
    /// `SHF_WRITE`.
    Write = 1 << 1,
    /// `SHF_EXECINSTR`.
    ExecInstr = 1 << 2,
    /// `SHF_MERGE`.
    Merge = 1 << 3,
    /// `SHF_STRINGS`.
    Strings = 1 << 4,
    /// `SHF_GROUP`.
    Group = 1 << 5,
    /// `SHF_TLS`.
    Tls = 1 << 6,
    /// `SHF_EXCLUDE`.
    Exclude = 1 << 7,
    /// `SHF_GNU_RETAIN`: a GC root even with no visible reference.
    GnuRetain = 1 << 8,
}

/// `Section` flags.
pub type SectionFlags = BitFlags<SectionFlag>;

/// An input (or linker-synthesized) section, per §3.
#[derive(Debug, Clone)]
pub struct Section {
    /// Section name, as it appears in the input's `.shstrtab`.
    pub name: String,
    pub kind: SectionKind,
    pub flags: SectionFlags,
    /// `sh_entsize`; zero when not applicable.
    pub entry_size: u64,
    pub alignment: u64,
    /// Total size in bytes; the sum of its fragments' sizes once fragments
    /// are assigned, but tracked independently for `Nobits` sections.
    pub size: u64,
    /// Offset assigned during layout; `None` until `afterLayout`.
    pub offset: Option<u64>,
    /// Address assigned during layout; `None` until `afterLayout`.
    pub address: Option<u64>,
    /// `sh_link` / `sh_info`, kept as the raw input values until the section
    /// map rewrites them for the output file.
    pub link: u32,
    pub info: u32,
    /// Fragments contributed to this section, in layout order.
    pub fragments: Vec<FragmentId>,
    /// The owning input file.
    pub owner: InputId,
    /// Index of the linker-script (or synthesized) output section this
    /// input section has been matched into, if layout has run.
    pub matched_output: Option<SectionId>,
    /// Set by the garbage collector: excluded from layout and its defined
    /// symbols marked `should_ignore`.
    pub ignore: bool,
    /// Byte value used to pad gaps inside this section (`FILL(expr)` /
    /// `=fill` in the owning `SECTIONS` output-section command); `0` unless
    /// the script says otherwise.
    pub fill: u8,
    /// Load address (`AT(lma)` / `AT>region`), when it diverges from
    /// `address` (the VMA). `None` means the LMA equals the VMA.
    pub lma: Option<u64>,
}

impl Section {
    /// Create a new, not-yet-laid-out section.
    pub fn new(name: impl Into<String>, kind: SectionKind, flags: SectionFlags, owner: InputId) -> Self {
        Self {
            name: name.into(),
            kind,
            flags,
            entry_size: 0,
            alignment: 1,
            size: 0,
            offset: None,
            address: None,
            link: 0,
            info: 0,
            fragments: Vec::new(),
            owner,
            matched_output: None,
            ignore: false,
            fill: 0,
            lma: None,
        }
    }

    /// Whether the section should contribute bytes to the output at all.
    pub fn is_allocatable(&self) -> bool {
        self.kind != SectionKind::Discard && !self.ignore && self.flags.contains(SectionFlag::Alloc)
    }
}

/// What a [`Fragment`] is, closed per §3.
#[derive(Debug, Clone)]
pub enum FragmentKind {
    /// Verbatim bytes copied from the input.
    Region(Vec<u8>),
    /// `size` bytes, each set to `value`.
    Fill { value: u8, size: u64 },
    /// A deduplicated string table: `strings[i]` is written once at
    /// `offsets[i]`.
    MergeString { strings: Vec<Vec<u8>>, offsets: Vec<u64> },
    /// A branch-island trampoline, synthesized by §4.6.
    Stub(Vec<u8>),
    /// A target-specific fragment (e.g. a relaxed instruction sequence).
    Target(Vec<u8>),
    /// One PLT stub's bytes.
    Plt(Vec<u8>),
    /// One GOT slot, pre-zeroed; filled in during relocation apply.
    Got,
    /// `.eh_frame_hdr`'s synthesized binary-search table.
    EhFrameHeader(Vec<u8>),
    /// A region-descriptor table (used by some target backends).
    RegionTable(Vec<u8>),
    /// The build-id note's payload, patched in after staging (§6).
    BuildId { algorithm: BuildIdAlgorithm, size: usize },
    /// A linker-internal timing/telemetry fragment; contributes no bytes to
    /// program memory footprint analyses but occupies file space.
    Timing(Vec<u8>),
}

/// Build-id checksum algorithms (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildIdAlgorithm {
    /// 20-byte SHA-1 digest.
    Sha1,
    /// 16-byte MD5 digest.
    Md5,
    /// 16-byte random UUID.
    Uuid,
    /// A fast, non-cryptographic 8-byte hash (xxhash-style).
    Fast,
}

impl BuildIdAlgorithm {
    /// The digest's byte length, i.e. the space the note's payload reserves
    /// during layout, before the Writer (§6) fills it in.
    pub fn digest_size(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Md5 | Self::Uuid => 16,
            Self::Fast => 8,
        }
    }
}

/// A fragment, per §3: alignment-aware, with its offset assigned only once
/// layout runs.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub kind: FragmentKind,
    pub alignment: u64,
    /// Padding inserted before this fragment to satisfy `alignment`,
    /// recorded once layout assigns `offset`.
    pub padding_size: u64,
    /// Offset within the owning section; `None` until layout runs.
    pub offset: Option<u64>,
    pub owner: SectionId,
}

impl Fragment {
    /// Create a new, not-yet-laid-out fragment.
    pub fn new(kind: FragmentKind, alignment: u64, owner: SectionId) -> Self {
        Self { kind, alignment: alignment.max(1), padding_size: 0, offset: None, owner }
    }

    /// The fragment's size in bytes, independent of layout.
    pub fn size(&self) -> u64 {
        match &self.kind {
            FragmentKind::Region(bytes) | FragmentKind::Stub(bytes) | FragmentKind::Target(bytes) => {
                bytes.len() as u64
            }
            FragmentKind::Fill { size, .. } => *size,
            FragmentKind::MergeString { strings, .. } => {
                strings.iter().map(|string| string.len() as u64 + 1).sum()
            }
            FragmentKind::Plt(bytes) => bytes.len() as u64,
            FragmentKind::Got => 8,
            FragmentKind::EhFrameHeader(bytes)
            | FragmentKind::RegionTable(bytes)
            | FragmentKind::Timing(bytes) => bytes.len() as u64,
            FragmentKind::BuildId { size, .. } => *size as u64,
        }
    }
}

/// A `(fragment, offset)` pair identifying a byte within the output.
///
/// The two C++ sentinels (`null`, meaning "no target", and `discard`,
/// meaning "the target section was dropped") become the two `None` arms of
/// this type, disambiguated by the `discarded` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentRef {
    target: Option<FragmentId>,
    offset: u64,
    discarded: bool,
}

impl FragmentRef {
    /// A ref that points at a real fragment.
    pub fn new(fragment: FragmentId, offset: u64) -> Self {
        Self { target: Some(fragment), offset, discarded: false }
    }

    /// The `null` sentinel: no target (e.g. an absolute or undefined symbol).
    pub fn null() -> Self {
        Self { target: None, offset: 0, discarded: false }
    }

    /// The `discard` sentinel: the target section was dropped by GC or
    /// `/DISCARD/`.
    pub fn discard() -> Self {
        Self { target: None, offset: 0, discarded: true }
    }

    /// The referenced fragment, if this isn't a sentinel.
    pub fn fragment(&self) -> Option<FragmentId> {
        self.target
    }

    /// The in-fragment byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether this ref points at a section GC or `/DISCARD/` dropped.
    pub fn is_discarded(&self) -> bool {
        self.discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Arena;

    #[test]
    fn fragment_size_matches_its_kind() {
        let mut sections: Arena<Section> = Arena::new();
        let mut inputs: Arena<crate::input::InputFile> = Arena::new();
        let owner_input = inputs.alloc(crate::input::InputFile::Internal);
        let owner =
            sections.alloc(Section::new(".text", SectionKind::Regular, SectionFlag::Alloc.into(), owner_input));

        let region = Fragment::new(FragmentKind::Region(vec![0xDE, 0xAD, 0xBE, 0xEF]), 4, owner);
        assert_eq!(region.size(), 4);

        let fill = Fragment::new(FragmentKind::Fill { value: 0, size: 16 }, 1, owner);
        assert_eq!(fill.size(), 16);

        let merged = Fragment::new(
            FragmentKind::MergeString { strings: vec![b"hi".to_vec(), b"bye".to_vec()], offsets: vec![0, 3] },
            1,
            owner,
        );
        assert_eq!(merged.size(), 3 + 4);
    }

    #[test]
    fn fragment_ref_sentinels_are_distinct() {
        assert_ne!(FragmentRef::null(), FragmentRef::discard());
        assert!(FragmentRef::null().fragment().is_none());
        assert!(FragmentRef::discard().is_discarded());
        assert!(!FragmentRef::null().is_discarded());
    }
}
