use std::{num::NonZeroUsize, path::PathBuf, str::FromStr};

use enumflags2::{bitflags, BitFlags};
use thiserror::Error;

pub use crate::section::BuildIdAlgorithm;
use crate::{target::Triple, Linker};

/// The parallel fan-out units named in §5, each independently togglable.
///
/// This revision's [`crate::pipeline`] still runs every phase on the calling
/// thread: the arena model (§9) shares one `Vec`-backed [`crate::ids::Arena`]
/// per kind rather than the lock-split-per-region structure real concurrent
/// mutation of it would need, so flipping a bit off here only skips the
/// phase's *toggle check* — there is no thread fan-out to cancel yet. The
/// bits exist so a [`Configuration`] can already name and disable each unit
/// by the vocabulary §5 gives it, ahead of that arena work landing.
#[bitflags]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkUnit {
    /// Matching input sections to output sections and assigning them their
    /// final ordering.
    AssignOutputSections = 1 << 0,
    /// The relocation scan pass that reserves GOT/PLT/copy slots.
    ScanRelocations = 1 << 1,
    /// Propagating reservations made for one symbol to every input that
    /// references it.
    SyncRelocations = 1 << 2,
    /// Validating cross-references the garbage collector and layout depend
    /// on before committing to a section map.
    CheckCrossRefs = 1 << 3,
    /// Materializing the synthesized output sections (GOT, PLT, …).
    CreateOutputSections = 1 << 4,
    /// Writing relocated bytes into fragment storage.
    ApplyRelocations = 1 << 5,
    /// The branch-island/trampoline insertion pass.
    LinkerRelaxation = 1 << 6,
}

/// Error returned when parsing a [`BuildIdAlgorithm`] from a string fails.
#[derive(Debug, Error)]
#[error("`{0}` is not one of `sha1`, `md5`, `uuid`, or `fast`")]
pub struct BuildIdAlgorithmParseError(String);

impl FromStr for BuildIdAlgorithm {
    type Err = BuildIdAlgorithmParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "sha1" => Ok(Self::Sha1),
            "md5" => Ok(Self::Md5),
            "uuid" => Ok(Self::Uuid),
            "fast" => Ok(Self::Fast),
            _ => Err(BuildIdAlgorithmParseError(input.to_string())),
        }
    }
}

/// How an input section matched by no linker-script rule should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanHandling {
    /// Raise a fatal diagnostic.
    Error,
    /// Place the section, but warn about it.
    Warn,
    /// Place the section after the last compatible output section, silently.
    Place,
}

impl Default for OrphanHandling {
    fn default() -> Self {
        Self::Place
    }
}

/// Error returned when parsing an [`OrphanHandling`] from a string fails.
#[derive(Debug, Error)]
#[error("`{0}` is not one of `error`, `warn`, or `place`")]
pub struct OrphanHandlingParseError(String);

impl FromStr for OrphanHandling {
    type Err = OrphanHandlingParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "place" => Ok(Self::Place),
            _ => Err(OrphanHandlingParseError(input.to_string())),
        }
    }
}

/// How symbols left undefined at the end of resolution are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedSymbols {
    /// Report them as a fatal error (the default for executables).
    ReportAll,
    /// Silently ignore them (useful when producing a partial-link object).
    IgnoreAll,
    /// Only ignore them in shared objects.
    IgnoreInSharedLibs,
}

impl Default for UnresolvedSymbols {
    fn default() -> Self {
        Self::ReportAll
    }
}

/// Error returned when parsing an [`UnresolvedSymbols`] from a string fails.
#[derive(Debug, Error)]
#[error("`{0}` is not one of `report-all`, `ignore-all`, or `ignore-in-shared-libs`")]
pub struct UnresolvedSymbolsParseError(String);

impl FromStr for UnresolvedSymbols {
    type Err = UnresolvedSymbolsParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "report-all" => Ok(Self::ReportAll),
            "ignore-all" => Ok(Self::IgnoreAll),
            "ignore-in-shared-libs" => Ok(Self::IgnoreInSharedLibs),
            _ => Err(UnresolvedSymbolsParseError(input.to_string())),
        }
    }
}

/// An input file plus the attributes it was given on the command-line.
#[derive(Debug, Clone)]
pub struct InputSpec {
    /// Path to the input, as given on the command-line.
    pub path: PathBuf,
    /// Whether every member of an archive input must be pulled in, instead of
    /// only the members that resolve an undefined symbol.
    pub whole_archive: bool,
    /// Whether the input is an `--as-needed` shared object (dropped from the
    /// dynamic table if nothing uses it).
    pub as_needed: bool,
    /// Whether only this input's symbol table should be consulted, and not
    /// its contents.
    pub just_symbols: bool,
    /// Whether this input is a patch-base image (see [`crate::patch_base`]).
    pub patch_base: bool,
}

impl InputSpec {
    /// Create a plain input spec with no special attribute set.
    pub fn new(path: PathBuf) -> Self {
        Self { path, whole_archive: false, as_needed: false, just_symbols: false, patch_base: false }
    }
}

/// The fully resolved set of options a [`Linker`] acts on.
#[derive(Debug)]
pub struct Configuration {
    /// Target triple to link for.
    pub target: Triple,
    /// Inputs, in command-line order.
    pub input_files: Vec<PathBuf>,
    /// Path of the file to produce.
    pub output_file: PathBuf,
    /// Number of worker threads used for the parallel phases.
    pub threads: NonZeroUsize,
    /// Allow multiple strong definitions of the same symbol instead of
    /// raising a fatal diagnostic.
    pub allow_multiple_definition: bool,
    /// How to handle input sections matched by no linker-script rule.
    pub orphan_handling: OrphanHandling,
    /// How to report symbols that remain undefined after resolution.
    pub unresolved_symbols: UnresolvedSymbols,
    /// Run the garbage collector to discard unreachable sections.
    pub gc_sections: bool,
    /// Symbols to keep even if otherwise unreferenced (`-u NAME`).
    pub undefined_symbols: Vec<String>,
    /// `--wrap=SYM`: redirect references to `SYM` to `__wrap_SYM`.
    pub wrapped_symbols: Vec<String>,
    /// Path to a linker script, if any.
    pub linker_script: Option<PathBuf>,
    /// Produce a partial-link (relocatable) object instead of an executable.
    pub relocatable: bool,
    /// Which parallel fan-out units (§5) are enabled; see [`WorkUnit`]'s doc
    /// comment for the current, sequential-by-default state of this wiring.
    pub work_units: BitFlags<WorkUnit>,
    /// Emit a `.note.gnu.build-id` computed with this algorithm, if any
    /// (`--build-id`, §6).
    pub build_id: Option<BuildIdAlgorithm>,
}

impl Configuration {
    /// Create a new `Self` with every option but the required ones set to
    /// its default.
    pub fn new(target: Triple, input_files: Vec<PathBuf>, output_file: PathBuf) -> Self {
        Self {
            target,
            input_files,
            output_file,
            threads: std::thread::available_parallelism()
                .unwrap_or(NonZeroUsize::new(1).unwrap()),
            allow_multiple_definition: false,
            orphan_handling: OrphanHandling::default(),
            unresolved_symbols: UnresolvedSymbols::default(),
            gc_sections: false,
            undefined_symbols: Vec::new(),
            wrapped_symbols: Vec::new(),
            linker_script: None,
            relocatable: false,
            work_units: BitFlags::all(),
            build_id: None,
        }
    }

    /// Build a [`Linker`] ready to [`Linker::link`] with this configuration.
    pub fn linker(self) -> Linker {
        Linker::with_configuration(self)
    }
}
