//! The `Module`: one link's arenas and the indices tying them together
//! (§3).
//!
//! Grounded in `original_source/include/eld/Core/Module.h`, which plays the
//! same "owns everything, handed by reference to every phase" role; the
//! raw-pointer graph it builds there becomes the typed-handle arenas named
//! in §9 here.

use crate::{
    diagnostics::DiagnosticEngine,
    gc::{self, EdgeKind},
    ids::{Arena, FragmentId, InputId, SectionId, SymbolId},
    input::InputFile,
    relocator::Relocation,
    resolve::{LDSymbol, NamePool, ResolveInfo},
    script::ast::Script,
    section::{Fragment, Section},
    trampoline::IslandTable,
};

/// One link's full state: every arena named in §9, plus the cross-cutting
/// tables (name pool, island table, diagnostics) and the parsed linker
/// script, if any.
#[derive(Debug, Default)]
pub struct Module {
    pub inputs: Arena<InputFile>,
    pub sections: Arena<Section>,
    pub fragments: Arena<Fragment>,
    /// Canonical, arena-owned symbol identities. A [`SymbolId`] indexes
    /// both this arena and [`Self::symbols`] at once — the two are always
    /// allocated together by [`Self::define_symbol`], mirroring how
    /// `ResolveInfo` and `LDSymbol` are two views of one symbol node in
    /// `original_source/include/eld/Core`.
    pub resolve_infos: Arena<ResolveInfo>,
    /// The canonical, output-participating symbol instances, keyed by the
    /// same [`SymbolId`] as [`Self::resolve_infos`] (via [`crate::ids::Id::cast`]).
    pub symbols: Arena<LDSymbol>,
    pub relocations: Arena<Relocation>,
    pub name_pool: NamePool,
    pub islands: IslandTable,
    pub diagnostics: DiagnosticEngine,
    /// Parsed `SECTIONS`/`MEMORY`/`PHDRS`/`VERSION` commands, if a linker
    /// script was given.
    pub script: Option<Script>,
    /// Names the command line (or `-u`) forced undefined, keeping them live
    /// through GC and archive pulls even with no other reference (§4.3).
    pub required_undefined: Vec<String>,
    /// `--wrap=S` requests: `S -> __wrap_S`/`__real_S` redirection is
    /// resolved by [`crate::archive::plan_pull`] and by the relocation-scan
    /// phase consulting this set directly.
    pub wrapped_symbols: Vec<String>,
}

impl Module {
    /// Create an empty module with resolution history recording as given
    /// (§4.1: "costly for large links", so off by default).
    pub fn new(record_resolution_history: bool) -> Self {
        Self { name_pool: NamePool::new(record_resolution_history), ..Default::default() }
    }

    /// Register a freshly read input file, returning its id.
    pub fn add_input(&mut self, input: InputFile) -> InputId {
        self.inputs.alloc(input)
    }

    /// Register a section contributed by `owner`, appending it to that
    /// input's section list when the input kind tracks one.
    pub fn add_section(&mut self, owner: InputId, section: Section) -> SectionId {
        let id = self.sections.alloc(section);
        if matches!(self.inputs[owner], InputFile::ElfRelocatable { .. } | InputFile::ArchiveMember { .. }) {
            self.inputs[owner].push_section(id);
        }
        id
    }

    /// Append a fragment to `section`, updating the section's fragment list
    /// and running byte size total (layout still assigns the fragment's
    /// final in-section offset separately, §4.4).
    pub fn push_fragment(&mut self, section: SectionId, fragment: Fragment) -> FragmentId {
        let size = fragment.size();
        let id = self.fragments.alloc(fragment);
        self.sections[section].fragments.push(id);
        self.sections[section].size += size;
        id
    }

    /// Mint a canonical output symbol: allocates `info`, then builds and
    /// allocates its paired [`LDSymbol`] (via `build_ld_symbol`, which
    /// receives the freshly minted [`SymbolId`] to store in
    /// [`LDSymbol::info`]) so one id indexes both arenas (see
    /// [`Self::resolve_infos`]'s doc comment).
    pub fn define_symbol(&mut self, info: ResolveInfo, build_ld_symbol: impl FnOnce(SymbolId) -> LDSymbol) -> SymbolId {
        let info_id = self.resolve_infos.alloc(info);
        let ld_id = self.symbols.alloc(build_ld_symbol(info_id));
        debug_assert_eq!(info_id.cast::<LDSymbol>(), ld_id, "resolve_infos and symbols must stay in lockstep");
        info_id
    }

    /// The [`LDSymbol`] paired with a canonical [`SymbolId`].
    pub fn ld_symbol(&self, symbol: SymbolId) -> &LDSymbol {
        &self.symbols[symbol.cast()]
    }

    /// The [`LDSymbol`] paired with a canonical [`SymbolId`], mutably.
    pub fn ld_symbol_mut(&mut self, symbol: SymbolId) -> &mut LDSymbol {
        &mut self.symbols[symbol.cast()]
    }

    /// The output section a symbol's definition lives in, if it has a
    /// canonical out-symbol with a real (non-sentinel) fragment reference.
    /// This is the adjacency function the garbage collector (§4.3) and the
    /// relocator both need: "which section does this symbol belong to".
    pub fn symbol_section(&self, symbol: SymbolId) -> Option<SectionId> {
        let fragment = self.ld_symbol(symbol).fragment_ref.fragment()?;
        Some(self.fragments[fragment].owner)
    }

    /// Build the root set for garbage collection (§4.3): the entry symbol,
    /// every `KEEP(...)` section named in the linker script, any section
    /// flagged `SHF_GNU_RETAIN`, and anything named in `required_undefined`.
    pub fn gc_roots(&self, entry_symbol: Option<&str>) -> Vec<SectionId> {
        let mut roots = Vec::new();

        if let Some(name) = entry_symbol {
            if let Some(symbol) = self.name_pool.find_symbol(name) {
                roots.extend(self.symbol_section(symbol));
            }
        }

        for name in &self.required_undefined {
            if let Some(symbol) = self.name_pool.find_symbol(name) {
                roots.extend(self.symbol_section(symbol));
            }
        }

        roots.extend(crate::layout::script_keep_roots(self));

        for (id, section) in self.sections.iter() {
            if section.flags.contains(crate::section::SectionFlag::GnuRetain) {
                roots.push(id);
            }
        }

        roots.sort_unstable();
        roots.dedup();
        roots
    }

    /// Run the garbage collector over this module's relocation graph,
    /// marking unreachable allocatable sections `ignore`d (§4.3). A no-op
    /// (every allocatable section is a root) when `enabled` is `false`,
    /// matching `--gc-sections`'s opt-in default.
    pub fn collect_garbage(&mut self, entry_symbol: Option<&str>, enabled: bool) -> Vec<SectionId> {
        let roots: Vec<SectionId> = if enabled {
            self.gc_roots(entry_symbol)
        } else {
            self.sections.ids().filter(|&id| self.sections[id].is_allocatable()).collect()
        };

        let edges = gc::relocation_edges(&self.relocations, &|symbol| self.symbol_section(symbol));
        let reached = gc::mark_reachable(roots, &edges);
        let swept = gc::sweep(&mut self.sections, &reached);
        self.ignore_symbols_in(&swept);
        swept
    }

    /// Mark every symbol defined by a swept (GC'd-away) section
    /// `should_ignore`, so the Writer (§6) drops it from the output symbol
    /// table. Kept here, outside [`gc::sweep`], since it needs the
    /// fragment-to-section lookup that a pure graph function shouldn't
    /// carry (see `gc.rs`'s doc comment).
    pub fn ignore_symbols_in(&mut self, swept_sections: &[SectionId]) {
        let swept: std::collections::HashSet<_> = swept_sections.iter().copied().collect();
        for ld_symbol in self.symbols.iter_mut().map(|(_, symbol)| symbol) {
            if let Some(fragment) = ld_symbol.fragment_ref.fragment() {
                if swept.contains(&self.fragments[fragment].owner) {
                    ld_symbol.should_ignore = true;
                }
            }
        }
    }

    /// Classify every relocation's edge kind once GC has run, useful for
    /// `--why-live`-style diagnostics; not wired to a CLI flag yet (out of
    /// scope per §1's driver-surface boundary) but kept as a building block.
    pub fn edge_kinds(&self) -> std::collections::HashMap<SectionId, EdgeKind> {
        self.relocations
            .iter()
            .filter_map(|(_, reloc)| self.symbol_section(reloc.symbol).map(|target| (target, EdgeKind::Relocation)))
            .collect()
    }

    /// Every input file that's still an unexpanded archive, for the
    /// resolver's iterative pull loop (§4.2) to drive.
    pub fn archive_inputs(&self) -> Vec<InputId> {
        self.inputs.ids().filter(|&id| matches!(self.inputs[id], InputFile::Archive { .. })).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        resolve::{Binding, Desc, Flags, SymbolType, Source, Visibility},
        section::{FragmentKind, FragmentRef, SectionFlag, SectionKind},
    };

    #[test]
    fn push_fragment_updates_section_size() {
        let mut module = Module::new(false);
        let input = module.add_input(InputFile::Internal);
        let section =
            module.add_section(input, Section::new(".text", SectionKind::Regular, SectionFlag::Alloc.into(), input));

        module.push_fragment(section, Fragment::new(FragmentKind::Region(vec![0; 16]), 4, section));
        assert_eq!(module.sections[section].size, 16);
    }

    #[test]
    fn gc_sections_disabled_keeps_everything() {
        let mut module = Module::new(false);
        let input = module.add_input(InputFile::Internal);
        let live =
            module.add_section(input, Section::new(".text", SectionKind::Regular, SectionFlag::Alloc.into(), input));
        let dead = module.add_section(
            input,
            Section::new(".text.unused", SectionKind::Regular, SectionFlag::Alloc.into(), input),
        );

        module.collect_garbage(None, false);
        assert!(!module.sections[live].ignore);
        assert!(!module.sections[dead].ignore);
    }

    #[test]
    fn gc_sections_enabled_sweeps_unreachable_and_ignores_its_symbols() {
        let mut module = Module::new(false);
        let input = module.add_input(InputFile::Internal);
        let live =
            module.add_section(input, Section::new(".text", SectionKind::Regular, SectionFlag::Alloc.into(), input));
        let dead = module.add_section(
            input,
            Section::new(".text.unused", SectionKind::Regular, SectionFlag::Alloc.into(), input),
        );

        let entry_fragment = module.push_fragment(live, Fragment::new(FragmentKind::Region(vec![0; 4]), 1, live));
        let dead_fragment = module.push_fragment(dead, Fragment::new(FragmentKind::Region(vec![0; 4]), 1, dead));

        let symbol = module.define_symbol(
            ResolveInfo {
                name: "_start".into(),
                binding: Binding::Global,
                desc: Desc::Defined,
                visibility: Visibility::Default,
                r#type: SymbolType::Function,
                source: Source::Regular,
                flags: Flags { is_symbol: true, ..Default::default() },
                size: 4,
                value: 0,
                common_alignment: 1,
                origin: input,
                out_symbol: None,
                alias: None,
            },
            |info| LDSymbol {
                fragment_ref: FragmentRef::new(entry_fragment, 0),
                value: 0,
                section_index: None,
                symbol_index: None,
                should_ignore: false,
                info,
            },
        );
        let mut entry_info = module.resolve_infos[symbol].clone();
        entry_info.out_symbol = Some(symbol);
        module.name_pool.insert_non_local(entry_info, false).unwrap();

        let dead_symbol = module.define_symbol(
            ResolveInfo {
                name: "unused".into(),
                binding: Binding::Global,
                desc: Desc::Defined,
                visibility: Visibility::Default,
                r#type: SymbolType::Function,
                source: Source::Regular,
                flags: Flags { is_symbol: true, ..Default::default() },
                size: 4,
                value: 0,
                common_alignment: 1,
                origin: input,
                out_symbol: None,
                alias: None,
            },
            |info| LDSymbol {
                fragment_ref: FragmentRef::new(dead_fragment, 0),
                value: 0,
                section_index: None,
                symbol_index: None,
                should_ignore: false,
                info,
            },
        );

        let swept = module.collect_garbage(Some("_start"), true);
        assert_eq!(swept, vec![dead]);
        assert!(module.sections[dead].ignore);
        assert!(!module.sections[live].ignore);
        assert!(module.ld_symbol(dead_symbol).should_ignore);
        assert!(!module.ld_symbol(symbol).should_ignore);
    }

    #[test]
    fn script_keep_protects_an_otherwise_unreachable_section() {
        use crate::script::ast::{
            InputSectionSpec, OutputSection, OutputSectionCommand, Script, SectionContentCommand, SortChain,
            SortedPattern,
        };

        let mut module = Module::new(false);
        let input = module.add_input(InputFile::Internal);
        let kept = module.add_section(
            input,
            Section::new(".text.vectors", SectionKind::Regular, SectionFlag::Alloc.into(), input),
        );
        let dead = module.add_section(
            input,
            Section::new(".text.unused", SectionKind::Regular, SectionFlag::Alloc.into(), input),
        );
        module.push_fragment(kept, Fragment::new(FragmentKind::Region(vec![0; 4]), 1, kept));
        module.push_fragment(dead, Fragment::new(FragmentKind::Region(vec![0; 4]), 1, dead));

        let mut script = Script::default();
        script.sections.push(OutputSectionCommand::Output(OutputSection {
            name: ".text".into(),
            vma: None,
            at_lma: None,
            align: None,
            subalign: None,
            contents: vec![SectionContentCommand::Input(InputSectionSpec {
                file_pattern: "*".into(),
                exclude_file: Vec::new(),
                section_patterns: vec![SortedPattern { pattern: ".text.vectors".into(), sort: SortChain::default() }],
                keep: true,
            })],
            region: None,
            lma_region: None,
            phdrs: Vec::new(),
            fill: None,
        }));
        module.script = Some(script);

        let swept = module.collect_garbage(None, true);
        assert_eq!(swept, vec![dead]);
        assert!(!module.sections[kept].ignore);
        assert!(module.sections[dead].ignore);
    }
}
