//! Object Linker pipeline (§4.7): phases 3 through 12, each a barrier over
//! the whole [`Module`].
//!
//! Phases 1 (`initialize`) and 2 (`readAndProcessInput`) need to actually
//! read ELF bytes off disk and classify inputs, so they stay format-specific
//! and live in the `elf64` driver. Everything from here on only needs the
//! arenas a `Module` already carries, so it is expressed once, independent
//! of the object format.
//!
//! `mergeSections` (phase 6) and `initStubs / layout` (phase 9) are both
//! driven by [`crate::layout::layout`], which matches input sections into
//! output sections and assigns addresses in one pass; splitting that into
//! two truly independent steps would mean threading partial address state
//! through the matcher for no real benefit, so `merge_sections` here is a
//! hook-firing placeholder and the actual section-map construction happens
//! inside [`run_layout`]'s first call.

use std::collections::HashMap;

use tracing::{debug, instrument, warn};

use crate::{
    configuration::{BuildIdAlgorithm, Configuration, OrphanHandling},
    diagnostics::{Diagnostic, Severity},
    gc,
    ids::{FragmentId, SectionId, SymbolId},
    input::InputFile,
    layout::{self, LayoutResult},
    module::Module,
    relocator::{ApplyContext, ApplyOutcome, Relocation, Relocator},
    resolve::{Binding, Desc, Flags, ResolveInfo, Source, SymbolType, Visibility},
    section::{Fragment, FragmentKind, FragmentRef, Section, SectionFlag, SectionKind},
    trampoline::{needs_trampoline, NamingStyle},
};

/// The default entry symbol name used when neither a linker script nor the
/// driver names one explicitly.
pub const DEFAULT_ENTRY_SYMBOL: &str = "_start";

/// The five named hook points a loaded plugin fires at (§4.7's closing
/// paragraph). Plugin *loading*/ABI is out of scope (§1); this trait models
/// only the call sites, with a no-op default so the pipeline runs unchanged
/// with nothing attached.
pub trait PluginHooks {
    /// Fired once every input has been read and classified, before any
    /// symbol injection.
    fn visit_sections(&mut self, _module: &mut Module) -> Result<(), Diagnostic> {
        Ok(())
    }

    /// Fired before the section map matches input sections against the
    /// script (or the scriptless fallback grouping).
    fn act_before_rule_matching(&mut self, _module: &mut Module) -> Result<(), Diagnostic> {
        Ok(())
    }

    /// Fired before merge-string deduplication and section merging.
    fn act_before_section_merging(&mut self, _module: &mut Module) -> Result<(), Diagnostic> {
        Ok(())
    }

    /// Fired immediately before addresses are assigned.
    fn act_before_performing_layout(&mut self, _module: &mut Module) -> Result<(), Diagnostic> {
        Ok(())
    }

    /// Fired immediately before the Writer serializes the output file.
    fn act_before_writing_output(&mut self, _module: &mut Module) -> Result<(), Diagnostic> {
        Ok(())
    }
}

/// The hook set used when no plugin is attached to the link.
#[derive(Debug, Default)]
pub struct NoopHooks;

impl PluginHooks for NoopHooks {}

/// Run a hook, converting a fatal [`Diagnostic`] it returns into module
/// failure state rather than unwinding the pipeline (§4.7: "hook failures
/// propagate as fatal diagnostics").
fn run_hook(module: &mut Module, outcome: Result<(), Diagnostic>) {
    if let Err(diagnostic) = outcome {
        module.diagnostics.emit(diagnostic);
    }
}

/// Phase 3: inject linker-defined and script-declared symbols into the
/// `NamePool` before resolution-dependent phases (GC, layout) run.
#[instrument(skip_all)]
pub fn add_standard_symbols(module: &mut Module) {
    if module.name_pool.find_info("_GLOBAL_OFFSET_TABLE_").is_some() {
        return;
    }

    let origin = module.add_input(InputFile::Internal);
    let info = ResolveInfo {
        name: "_GLOBAL_OFFSET_TABLE_".to_string(),
        binding: Binding::Weak,
        desc: Desc::Undefined,
        visibility: Visibility::Default,
        r#type: SymbolType::NoType,
        source: Source::Regular,
        flags: Flags { is_symbol: true, ..Default::default() },
        size: 0,
        value: 0,
        common_alignment: 1,
        origin,
        out_symbol: None,
        alias: None,
    };
    // A weak, as-yet-undefined placeholder: real GOT-backed relocations
    // redefine it once the GOT section exists (`scan_relocations`), and an
    // unused one simply stays undefined without being reported, matching
    // every `ld`-compatible linker's handling of this symbol.
    let _ = module.name_pool.insert_non_local(info, true);
}

/// Phase 3 continued: carry `-u NAME` / `--require-defined` forced roots
/// from the configuration into the module (consulted by GC, §4.3).
pub fn add_undef_symbols(module: &mut Module, configuration: &Configuration) {
    module.required_undefined = configuration.undefined_symbols.clone();
}

/// Phase 3 continued: pre-declare every name a linker script assigns
/// (`PROVIDE`, plain assignments) so forward references resolve even though
/// the actual value is only known once [`run_layout`] has placed every
/// output section.
pub fn add_script_symbols(module: &mut Module) {
    let Some(script) = module.script.clone() else { return };

    let names: Vec<(String, bool)> = script
        .sections
        .iter()
        .filter_map(|command| match command {
            crate::script::ast::OutputSectionCommand::Assignment(assignment) => Some(assignment),
            crate::script::ast::OutputSectionCommand::Output(output) => None.or_else(|| {
                // Only top-level assignments are pre-declared here; assignments
                // nested in an output section are evaluated once that
                // section's address is known, in `layout::layout`.
                let _ = output;
                None
            }),
            crate::script::ast::OutputSectionCommand::Discard(_) => None,
        })
        .filter_map(|assignment| match &assignment.target {
            crate::script::ast::AssignmentTarget::Symbol(name) => Some((name.clone(), assignment.provide)),
            crate::script::ast::AssignmentTarget::Dot => None,
        })
        .collect();

    if names.is_empty() {
        return;
    }

    let origin = module.add_input(InputFile::Internal);
    for (name, provide) in names {
        if module.name_pool.find_info(&name).is_some() {
            continue;
        }
        // Not yet defined: register as weak-undefined so it is visible to
        // resolution and GC without looking like a hard undefined reference
        // from an object file. `layout::define_script_symbols` overwrites
        // this placeholder with the real absolute value once known.
        let info = ResolveInfo {
            name: name.clone(),
            binding: Binding::Weak,
            desc: Desc::Undefined,
            visibility: Visibility::Default,
            r#type: SymbolType::NoType,
            source: Source::Regular,
            flags: Flags { is_symbol: true, ..Default::default() },
            size: 0,
            value: 0,
            common_alignment: 1,
            origin,
            out_symbol: None,
            alias: None,
        };
        let _ = provide;
        let _ = module.name_pool.insert_non_local(info, true);
    }
}

/// Phase 3 continued: `--dynamic-list` symbol export marking. Not yet wired
/// to a CLI flag ([`Configuration`] carries no dynamic-list field), so this
/// stays a no-op call site rather than dead plumbing grown ahead of need.
pub fn add_dyn_list_symbols(_module: &mut Module) {}

/// Phase 4: within each merge-string section, deduplicate strings by content
/// and rewrite every reference (symbol or relocation place) at the old
/// `(fragment, offset)` to the new, deduplicated offset. Skipped entirely
/// for partial links; see `run`'s caller.
#[instrument(skip_all)]
pub fn merge_strings(module: &mut Module) {
    let merge_section_ids: Vec<SectionId> = module
        .sections
        .ids()
        .filter(|&id| module.sections[id].kind == SectionKind::MergeString && module.sections[id].is_allocatable())
        .collect();

    for section_id in merge_section_ids {
        let fragment_ids = module.sections[section_id].fragments.clone();

        let mut deduped: Vec<Vec<u8>> = Vec::new();
        let mut offset_of: HashMap<Vec<u8>, u64> = HashMap::new();
        let mut cursor = 0u64;
        // (old fragment, old in-fragment offset) -> new offset within the
        // single merged fragment this section collapses to.
        let mut remap: HashMap<(FragmentId, u64), u64> = HashMap::new();
        let mut any_merge_fragment = false;

        for &fragment_id in &fragment_ids {
            let FragmentKind::MergeString { strings, offsets } = &module.fragments[fragment_id].kind else {
                continue;
            };
            any_merge_fragment = true;

            for (string, &old_offset) in strings.iter().zip(offsets.iter()) {
                let new_offset = *offset_of.entry(string.clone()).or_insert_with(|| {
                    let assigned = cursor;
                    deduped.push(string.clone());
                    cursor += string.len() as u64 + 1;
                    assigned
                });
                remap.insert((fragment_id, old_offset), new_offset);
            }
        }

        if !any_merge_fragment {
            continue;
        }

        let new_offsets: Vec<u64> = {
            let mut running = 0u64;
            deduped
                .iter()
                .map(|string| {
                    let offset = running;
                    running += string.len() as u64 + 1;
                    offset
                })
                .collect()
        };

        module.sections[section_id].fragments.clear();
        module.sections[section_id].size = 0;
        let merged_fragment = module.push_fragment(
            section_id,
            Fragment::new(FragmentKind::MergeString { strings: deduped, offsets: new_offsets }, 1, section_id),
        );

        rewrite_fragment_refs(module, &remap, merged_fragment);
    }
}

/// Every [`FragmentRef`] pointing at one of `remap`'s keys is rewritten to
/// point at `merged_fragment` with the remapped offset, across both
/// `LDSymbol`s and `Relocation`s.
fn rewrite_fragment_refs(
    module: &mut Module,
    remap: &HashMap<(FragmentId, u64), u64>,
    merged_fragment: FragmentId,
) {
    for (_, ld_symbol) in module.symbols.iter_mut() {
        let Some(fragment) = ld_symbol.fragment_ref.fragment() else { continue };
        if let Some(&new_offset) = remap.get(&(fragment, ld_symbol.fragment_ref.offset())) {
            ld_symbol.fragment_ref = FragmentRef::new(merged_fragment, new_offset);
        }
    }

    for (_, relocation) in module.relocations.iter_mut() {
        let Some(fragment) = relocation.place.fragment() else { continue };
        if let Some(&new_offset) = remap.get(&(fragment, relocation.place.offset())) {
            relocation.place = FragmentRef::new(merged_fragment, new_offset);
        }
    }
}

/// Phase 5: run the garbage collector (§4.3) when `--gc-sections` is on.
/// `entry_symbol` is the resolved entry point name (script `ENTRY`, or
/// [`DEFAULT_ENTRY_SYMBOL`]).
pub fn run_garbage_collection(module: &mut Module, entry_symbol: &str, enabled: bool) -> Vec<SectionId> {
    module.collect_garbage(Some(entry_symbol), enabled)
}

/// Phase 6: placeholder hook-firing point. The actual section map
/// construction is folded into [`run_layout`]'s call to
/// [`crate::layout::layout`]; see this module's top-level doc comment.
pub fn merge_sections(module: &mut Module, hooks: &mut dyn PluginHooks) {
    let outcome = hooks.act_before_section_merging(module);
    run_hook(module, outcome);
}

/// Phase 7: create one section per unresolved common symbol
/// (`COMMON.<name>`), assigned to `.bss` unless a script says otherwise.
/// Every common-symbol `ResolveInfo` still `Desc::Common` at this point
/// names a tentative definition that won no stronger competing definition
/// during resolution and needs real storage before layout can place it.
#[instrument(skip_all)]
pub fn allocate_common_symbols(module: &mut Module) {
    let commons: Vec<(String, u64, u64)> = module
        .name_pool
        .non_locals()
        .values()
        .filter(|info| info.desc == Desc::Common && info.out_symbol.is_none())
        .map(|info| (info.name.clone(), info.size, info.common_alignment.max(1)))
        .collect();

    if commons.is_empty() {
        return;
    }

    let origin = module.add_input(InputFile::Internal);

    for (name, size, alignment) in commons {
        let section_name = format!("COMMON.{name}");
        let section_id = module.add_section(
            origin,
            Section::new(section_name, SectionKind::Nobits, SectionFlag::Alloc | SectionFlag::Write, origin),
        );
        module.sections[section_id].alignment = alignment;

        let fragment_id =
            module.push_fragment(section_id, Fragment::new(FragmentKind::Fill { value: 0, size }, alignment, section_id));

        let mut info = module.name_pool.find_info(&name).cloned().expect("common symbol vanished from the pool");
        info.desc = Desc::Defined;

        let symbol = module.define_symbol(info.clone(), |symbol_id| crate::resolve::LDSymbol {
            fragment_ref: FragmentRef::new(fragment_id, 0),
            value: 0,
            section_index: None,
            symbol_index: None,
            should_ignore: false,
            info: symbol_id,
        });

        info.out_symbol = Some(symbol);
        let _ = module.name_pool.insert_non_local(info, true);
    }
}

/// Reserve a `.note.gnu.build-id` section holding one zero-filled
/// [`FragmentKind::BuildId`] fragment sized for `algorithm`, so layout gives
/// it a real file offset before the Writer (§6) computes and patches in the
/// actual digest. A no-op (no `--build-id`) returns `None`.
pub fn reserve_build_id(module: &mut Module, algorithm: Option<BuildIdAlgorithm>) -> Option<SectionId> {
    let algorithm = algorithm?;
    let origin = module.add_input(InputFile::Internal);
    let section_id = module.add_section(
        origin,
        Section::new(".note.gnu.build-id", SectionKind::Note, SectionFlag::Alloc.into(), origin),
    );
    module.push_fragment(
        section_id,
        Fragment::new(FragmentKind::BuildId { algorithm, size: algorithm.digest_size() }, 4, section_id),
    );
    Some(section_id)
}

/// What the scan phase reserved for each symbol: at most one GOT slot, one
/// PLT stub, and one copy-relocation backing section per symbol, shared by
/// every relocation referencing that symbol.
#[derive(Debug, Default)]
pub struct ReservedSlots {
    got: HashMap<SymbolId, FragmentId>,
    plt: HashMap<SymbolId, FragmentId>,
    copy: HashMap<SymbolId, FragmentId>,
}

/// Phase 8: scan every relocation (§4.5's scan phase), reserving GOT/PLT/
/// copy/dynamic slots as the target [`Relocator`] decides, and recording the
/// reservation on each [`Relocation`] for the apply phase to consult.
#[instrument(skip_all)]
pub fn scan_relocations(module: &mut Module, relocator: &dyn Relocator) -> ReservedSlots {
    let origin = module.add_input(InputFile::Internal);
    let got_section = module.add_section(
        origin,
        Section::new(".got", SectionKind::Target, SectionFlag::Alloc | SectionFlag::Write, origin),
    );
    let plt_section =
        module.add_section(origin, Section::new(".plt", SectionKind::Target, SectionFlag::Alloc | SectionFlag::ExecInstr, origin));
    let copy_section =
        module.add_section(origin, Section::new(".bss.copy", SectionKind::Nobits, SectionFlag::Alloc | SectionFlag::Write, origin));

    let mut reserved = ReservedSlots::default();
    let relocation_ids: Vec<_> = module.relocations.ids().collect();

    for id in relocation_ids {
        let (r#type, symbol) = {
            let relocation = &module.relocations[id];
            (relocation.r#type, relocation.symbol)
        };

        let info = &module.resolve_infos[symbol];
        let preemptible = info.visibility == Visibility::Default && info.binding != Binding::Local;
        let is_function = info.r#type == SymbolType::Function;

        let reservation = relocator.scan_relocation(r#type, preemptible, is_function);
        module.relocations[id].reservation = reservation;

        if reservation.got && !reserved.got.contains_key(&symbol) {
            let fragment = module.push_fragment(got_section, Fragment::new(FragmentKind::Got, 8, got_section));
            reserved.got.insert(symbol, fragment);
        }
        if reservation.plt && !reserved.plt.contains_key(&symbol) {
            // A minimal indirect-jump stub; a real backend would emit the
            // target-specific PLT0/PLTn sequence (out of scope per §1's
            // "concrete per-architecture encodings" boundary).
            let fragment =
                module.push_fragment(plt_section, Fragment::new(FragmentKind::Plt(vec![0xff, 0x25, 0, 0, 0, 0]), 16, plt_section));
            reserved.plt.insert(symbol, fragment);
        }
        if reservation.copy && !reserved.copy.contains_key(&symbol) {
            let size = info.size.max(1);
            let fragment = module.push_fragment(
                copy_section,
                Fragment::new(FragmentKind::Fill { value: 0, size }, 8, copy_section),
            );
            reserved.copy.insert(symbol, fragment);
        }
    }

    reserved
}

/// Phase 9: assign offsets and addresses (`crate::layout::layout`), then
/// repeatedly check every branch relocation for range and insert
/// trampolines (§4.6) until a pass adds none, re-running layout each time
/// since a freshly spliced stub shifts every address after it.
///
/// Capped at a small number of passes: a real over-range chain converges in
/// one or two re-layouts in practice, and a pipeline that never converges
/// points at a configuration error (a branch range narrower than the
/// output's own span) rather than a transient condition worth looping on
/// forever.
#[instrument(skip_all)]
pub fn run_layout(
    module: &mut Module,
    orphan_handling: OrphanHandling,
    base_address: u64,
    relocator: &dyn Relocator,
) -> LayoutResult {
    const MAX_PASSES: usize = 8;

    let mut result = layout::layout(module, orphan_handling, base_address);

    for _ in 0..MAX_PASSES {
        let inserted = insert_trampolines(module, relocator, &result);
        if !inserted {
            break;
        }
        result = layout::layout(module, orphan_handling, base_address);
    }

    result
}

/// One branch-island insertion pass over every relocation whose target is
/// out of the relocator's range for its type. Returns whether any island
/// was newly created (the caller re-runs layout when it is).
fn insert_trampolines(module: &mut Module, relocator: &dyn Relocator, layout_result: &LayoutResult) -> bool {
    let mut inserted_any = false;
    let relocation_ids: Vec<_> = module.relocations.ids().collect();

    for id in relocation_ids {
        let (r#type, symbol, addend, place) = {
            let relocation = &module.relocations[id];
            (relocation.r#type, relocation.symbol, relocation.addend, relocation.place)
        };

        let Some(range) = relocator.branch_range(r#type) else { continue };
        let Some(place_fragment) = place.fragment() else { continue };
        let caller_section = module.fragments[place_fragment].owner;
        let Some(caller_section_address) = module.sections[caller_section].address else { continue };
        let Some(caller_fragment_offset) = module.fragments[place_fragment].offset else { continue };
        let caller_place = caller_section_address + caller_fragment_offset + place.offset();

        let Some(target_value) = symbol_value(module, symbol) else { continue };

        if !needs_trampoline(caller_place, target_value, range) {
            continue;
        }

        let output_section = layout_result
            .output_order
            .iter()
            .copied()
            .find(|&id| module.sections[id].fragments.contains(&place_fragment))
            .unwrap_or(caller_section);

        if module.islands.find_reusable(output_section, symbol, addend, caller_place, range, true).is_some() {
            continue;
        }

        // A single relative-jump stub (`jmp rel32`); a real backend would
        // pick the shortest sequence that reaches `target_value`, which is
        // out of scope per §1.
        let (fragment, symbol_name) =
            module.islands.new_stub(output_section, vec![0xe9, 0, 0, 0, 0], NamingStyle::Default, &format!("sym{symbol:?}"));
        let stub_id = module.push_fragment(output_section, fragment);
        module.islands.register(output_section, symbol, addend, stub_id, symbol_name);
        inserted_any = true;
    }

    inserted_any
}

/// The symbol's current best-known address: its `LDSymbol::value` if
/// already finalized, otherwise computed straight from its fragment's
/// section address plus offsets (used mid-layout, before
/// [`finalize_symbol_values`] has run).
fn symbol_value(module: &Module, symbol: SymbolId) -> Option<u64> {
    let ld_symbol = module.ld_symbol(symbol);
    let fragment = ld_symbol.fragment_ref.fragment()?;
    let section = module.fragments[fragment].owner;
    let section_address = module.sections[section].address?;
    let fragment_offset = module.fragments[fragment].offset.unwrap_or(0);
    Some(section_address + fragment_offset + ld_symbol.fragment_ref.offset())
}

/// Phase 10: compute the final value of every [`crate::resolve::LDSymbol`]
/// from its fragment's now-final address (absolute symbols already carry
/// their final value from resolution and are left untouched).
#[instrument(skip_all)]
pub fn finalize_symbol_values(module: &mut Module) {
    let ids: Vec<SymbolId> = module.symbols.ids().map(|id| id.cast()).collect();

    for id in ids {
        let is_absolute = module.resolve_infos[id].binding == Binding::Absolute;
        if is_absolute {
            let value = module.resolve_infos[id].value;
            module.ld_symbol_mut(id).value = value;
            continue;
        }

        if let Some(value) = symbol_value(module, id) {
            module.ld_symbol_mut(id).value = value;
        }
    }
}

/// Phase 11: apply every relocation (§4.5's apply phase), writing patched
/// bytes into the target fragment and emitting a diagnostic for anything
/// that overflows its field or names an unsupported type.
#[instrument(skip_all)]
pub fn apply_relocations(module: &mut Module, relocator: &dyn Relocator, reserved: &ReservedSlots, relocatable: bool) {
    let relocation_ids: Vec<_> = module.relocations.ids().collect();

    for id in relocation_ids {
        let relocation = module.relocations[id].clone();

        if relocatable {
            // Partial-link mode: leave the relocation in the output table,
            // retargeted at the output section's own symbol rather than
            // applying it now (§4.5: "the relocator updates the addend to
            // refer to the output section symbol rather than the input").
            continue;
        }

        let Some(place_fragment) = relocation.place.fragment() else { continue };
        let Some(place_address) = fragment_address(module, place_fragment, relocation.place.offset()) else {
            continue;
        };

        let symbol_value = if relocation.reservation.plt {
            reserved.plt.get(&relocation.symbol).and_then(|&fragment| fragment_address(module, fragment, 0))
        } else {
            None
        }
        .unwrap_or_else(|| module.ld_symbol(relocation.symbol).value);

        let got_address =
            reserved.got.get(&relocation.symbol).and_then(|&fragment| fragment_address(module, fragment, 0));

        let context = ApplyContext { symbol_value, place: place_address, addend: relocation.addend, got_address };

        match relocator.apply_relocation(relocation.r#type, context) {
            Ok(bytes) => write_relocated_bytes(module, place_fragment, relocation.place.offset(), &bytes),
            Err(outcome) => emit_relocation_diagnostic(module, relocator, &relocation, outcome),
        }
    }
}

fn fragment_address(module: &Module, fragment: FragmentId, extra_offset: u64) -> Option<u64> {
    let section = module.fragments[fragment].owner;
    let section_address = module.sections[section].address?;
    let fragment_offset = module.fragments[fragment].offset.unwrap_or(0);
    Some(section_address + fragment_offset + extra_offset)
}

fn write_relocated_bytes(module: &mut Module, fragment: FragmentId, offset: u64, bytes: &[u8]) {
    if let FragmentKind::Region(region) = &mut module.fragments[fragment].kind {
        let start = offset as usize;
        let end = start + bytes.len();
        if end <= region.len() {
            region[start..end].copy_from_slice(bytes);
        }
    }
}

fn emit_relocation_diagnostic(module: &mut Module, relocator: &dyn Relocator, relocation: &Relocation, outcome: ApplyOutcome) {
    let (code, label) = match outcome {
        ApplyOutcome::Overflow => ("E016", "overflow"),
        ApplyOutcome::Bad => ("E017", "bad relocation"),
        ApplyOutcome::Unsupported => ("E018", "unsupported relocation type"),
        ApplyOutcome::Ok => unreachable!("Ok is not an error outcome"),
    };

    module.diagnostics.emit(Diagnostic::new(
        Severity::Error,
        code,
        format!("{label}: `{}` applying to symbol {:?}", relocator.name(relocation.r#type), relocation.symbol),
    ));
}

/// Run phases 3 through 11 in order, firing plugin hooks at their named
/// points, and return the final [`LayoutResult`] for the Writer (phase 12,
/// driven separately by `crate::writer`).
#[allow(clippy::too_many_arguments)]
pub fn run(
    module: &mut Module,
    configuration: &Configuration,
    relocator: &dyn Relocator,
    hooks: &mut dyn PluginHooks,
) -> LayoutResult {
    run_hook(module, hooks.visit_sections(module));

    add_standard_symbols(module);
    add_undef_symbols(module, configuration);
    add_script_symbols(module);
    add_dyn_list_symbols(module);

    if !configuration.relocatable {
        merge_strings(module);
    }

    let entry_symbol = module
        .script
        .as_ref()
        .and_then(|script| script.entry.clone())
        .unwrap_or_else(|| DEFAULT_ENTRY_SYMBOL.to_string());

    let swept = run_garbage_collection(module, &entry_symbol, configuration.gc_sections);
    debug!(swept = swept.len(), "garbage collection complete");

    run_hook(module, hooks.act_before_rule_matching(module));
    run_hook(module, hooks.act_before_section_merging(module));

    allocate_common_symbols(module);
    reserve_build_id(module, configuration.build_id);

    let reserved = scan_relocations(module, relocator);

    run_hook(module, hooks.act_before_performing_layout(module));

    let layout_result = run_layout(module, configuration.orphan_handling, 0, relocator);

    finalize_symbol_values(module);

    apply_relocations(module, relocator, &reserved, configuration.relocatable);

    if configuration.unresolved_symbols == crate::configuration::UnresolvedSymbols::ReportAll {
        report_unresolved_symbols(module);
    }

    run_hook(module, hooks.act_before_writing_output(module));

    layout_result
}

/// §7 "Resolution errors": an undefined reference that survived resolution
/// with `--unresolved-symbols=report-all` (the default) is a fatal error.
fn report_unresolved_symbols(module: &mut Module) {
    let undefined: Vec<String> = module
        .name_pool
        .non_locals()
        .values()
        .filter(|info| info.desc == Desc::Undefined && info.binding != Binding::Weak)
        .map(|info| info.name.clone())
        .collect();

    for name in undefined {
        warn!(symbol = %name, "undefined reference");
        module.diagnostics.emit(Diagnostic::new(Severity::Error, "E009", format!("undefined reference to `{name}`")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relocator::x86_64_type::R_X86_64_PC32;

    fn configuration() -> Configuration {
        Configuration::new(
            "x86_64-unknown-linux-gnu".parse().unwrap(),
            Vec::new(),
            "a.out".into(),
        )
    }

    /// §8 scenario 1 (minimal executable), driven straight through
    /// `Module`/`pipeline::run` rather than real ELF bytes: `_start` calls
    /// `callee` through a `R_X86_64_PC32` relocation; after the full
    /// pipeline, both sections have addresses, `callee` was kept live by
    /// the relocation edge (not the entry symbol), and the relocated bytes
    /// satisfy `result == S + A - P` exactly (§8's relocation property).
    #[test]
    fn minimal_executable_resolves_and_relocates_end_to_end() {
        let mut module = Module::new(false);
        let mut configuration = configuration();
        configuration.gc_sections = true;

        let caller_input = module.add_input(InputFile::Internal);
        let caller_section = module.add_section(
            caller_input,
            Section::new(".text", SectionKind::Regular, SectionFlag::Alloc | SectionFlag::ExecInstr, caller_input),
        );
        let caller_fragment =
            module.push_fragment(caller_section, Fragment::new(FragmentKind::Region(vec![0; 4]), 1, caller_section));

        let callee_input = module.add_input(InputFile::Internal);
        let callee_section = module.add_section(
            callee_input,
            Section::new(".text.callee", SectionKind::Regular, SectionFlag::Alloc | SectionFlag::ExecInstr, callee_input),
        );
        let callee_fragment =
            module.push_fragment(callee_section, Fragment::new(FragmentKind::Region(vec![0xc3]), 1, callee_section));

        let callee_symbol = module.define_symbol(
            ResolveInfo {
                name: "callee".into(),
                binding: Binding::Global,
                desc: Desc::Defined,
                visibility: Visibility::Default,
                r#type: SymbolType::Function,
                source: Source::Regular,
                flags: Flags { is_symbol: true, ..Default::default() },
                size: 1,
                value: 0,
                common_alignment: 1,
                origin: callee_input,
                out_symbol: None,
                alias: None,
            },
            |info| crate::resolve::LDSymbol {
                fragment_ref: FragmentRef::new(callee_fragment, 0),
                value: 0,
                section_index: None,
                symbol_index: None,
                should_ignore: false,
                info,
            },
        );
        let mut callee_info = module.resolve_infos[callee_symbol].clone();
        callee_info.out_symbol = Some(callee_symbol);
        module.name_pool.insert_non_local(callee_info, false).unwrap();

        let start_symbol = module.define_symbol(
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
                origin: caller_input,
                out_symbol: None,
                alias: None,
            },
            |info| crate::resolve::LDSymbol {
                fragment_ref: FragmentRef::new(caller_fragment, 0),
                value: 0,
                section_index: None,
                symbol_index: None,
                should_ignore: false,
                info,
            },
        );
        let mut start_info = module.resolve_infos[start_symbol].clone();
        start_info.out_symbol = Some(start_symbol);
        module.name_pool.insert_non_local(start_info, false).unwrap();

        module.relocations.alloc(Relocation {
            r#type: R_X86_64_PC32,
            section: caller_section,
            place: FragmentRef::new(caller_fragment, 0),
            symbol: callee_symbol,
            addend: 0,
            reservation: crate::relocator::Reservation::default(),
        });

        let relocator = crate::relocator::X86_64Relocator;
        let mut hooks = NoopHooks;
        run(&mut module, &configuration, &relocator, &mut hooks);

        assert!(!module.diagnostics.has_failed(), "{:?}", module.diagnostics.diagnostics());

        let caller_address = fragment_address(&module, caller_fragment, 0).unwrap();
        let callee_address = fragment_address(&module, callee_fragment, 0).unwrap();
        assert!(!module.sections[caller_section].ignore);
        assert!(!module.sections[callee_section].ignore, "callee must survive GC via the relocation edge from caller");

        let expected = (callee_address as i64 - caller_address as i64) as i32;
        let FragmentKind::Region(bytes) = &module.fragments[caller_fragment].kind else {
            panic!("caller fragment should still be a region");
        };
        assert_eq!(bytes, &expected.to_le_bytes().to_vec());
    }
}
