//! Input / InputFile (§3).

use std::{path::PathBuf, sync::Arc};

use crate::ids::SectionId;

/// An input's attribute set, carried from the command-line or `INPUT`/`GROUP`
/// linker-script commands down to the archive parser and resolver.
#[derive(Debug, Clone, Default)]
pub struct InputAttributes {
    /// `--whole-archive`: pull every member, not just the ones resolving an
    /// undefined symbol.
    pub whole_archive: bool,
    /// `--as-needed`: drop the `DT_NEEDED` entry if nothing uses it.
    pub as_needed: bool,
    /// Consult this input's symbol table only, not its section contents.
    pub just_symbols: bool,
    /// This input is a patch-base image (§6 patch base).
    pub patch_base: bool,
    /// Prefer a static archive member over a shared one when both exist.
    pub static_preference: bool,
}

/// A named handle with an attribute set and an ordinal assigned in
/// command-line order. Resolves to a [`MemoryArea`].
#[derive(Debug, Clone)]
pub struct Input {
    /// Position in command-line order; used to break resolution ties and to
    /// order output symbol tables reproducibly.
    pub ordinal: usize,
    /// Path as given on the command line.
    pub path: PathBuf,
    /// Path after `SEARCH_DIR`/`-L` resolution.
    pub resolved_path: PathBuf,
    pub attributes: InputAttributes,
}

/// A reference-counted, read-only byte buffer identified by a path or
/// synthetic name (§2 item 1, §3's Memory Area).
///
/// Reference-counted rather than copied per archive member: every member
/// drawn from the same archive file shares one `MemoryArea`, per
/// `original_source/include/eld/Support/MemoryArea.h`.
#[derive(Debug, Clone)]
pub struct MemoryArea {
    pub name: String,
    pub bytes: Arc<[u8]>,
}

impl MemoryArea {
    /// Wrap already-read bytes under `name`.
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self { name: name.into(), bytes: bytes.into() }
    }
}

/// Tagged variant over an [`Input`] (§2 item 3).
#[derive(Debug)]
pub enum InputFile {
    /// A relocatable ELF object (`ET_REL`).
    ElfRelocatable { input: Input, memory: MemoryArea, sections: Vec<SectionId> },
    /// A shared object (`ET_DYN`) consulted for symbol resolution.
    ElfDynamic { input: Input, memory: MemoryArea, soname: Option<String> },
    /// An ELF executable, only legal as a `--just-symbols` input.
    ElfExecutable { input: Input, memory: MemoryArea },
    /// A `!<arch>\n`/`!<thin>\n` archive: a lazy symbol index plus lazily
    /// materialized members.
    Archive { input: Input, memory: MemoryArea, archive: Archive },
    /// One member of an `Archive`, materialized once pulled.
    ArchiveMember { parent: PathBuf, member_name: String, sections: Vec<SectionId> },
    /// A bitcode module. LTO is out of scope (§1); this tag exists so the
    /// archive parser and resolver can still classify and skip it uniformly.
    Bitcode { input: Input, memory: MemoryArea },
    /// A parsed linker script, consumed by `INPUT`/`GROUP`/direct `-T`.
    LinkerScript { input: Input },
    /// A sym-def file: contributes name→address pairs with no code or data.
    SymDef { input: Input, symbols: Vec<(String, u64)> },
    /// Raw binary data included via `.incbin`-style linker-script directives.
    Binary { input: Input, memory: MemoryArea },
    /// A linker-internal input, owning synthesized sections (common symbols,
    /// script-defined symbols, trampolines, plugin-created content — §4.7
    /// phase 1).
    Internal,
}

impl InputFile {
    /// The sections this input file directly contributed, if any.
    pub fn sections(&self) -> &[SectionId] {
        match self {
            Self::ElfRelocatable { sections, .. } | Self::ArchiveMember { sections, .. } => sections,
            _ => &[],
        }
    }

    /// Append a freshly ingested section to this input file's list.
    pub fn push_section(&mut self, section: SectionId) {
        match self {
            Self::ElfRelocatable { sections, .. } | Self::ArchiveMember { sections, .. } => {
                sections.push(section)
            }
            other => panic!("input file {other:?} cannot own sections"),
        }
    }
}

/// The lazy state of an [`InputFile::Archive`]: the armap and which members
/// have been pulled so far.
#[derive(Debug, Default)]
pub struct Archive {
    /// Count of passes the iterative pull loop has run, for diagnostics and
    /// the idempotency property of §8.
    pub passes: usize,
    /// Header offsets of members already pulled, so a re-seen armap entry
    /// for an already-pulled member is skipped.
    pub pulled: std::collections::HashSet<u64>,
}
