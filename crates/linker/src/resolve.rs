//! Name Pool & Symbol Resolver (§4.1).
//!
//! The bit-packed attribute semantics (binding/visibility/desc combined
//! by "most constrained wins" for visibility) are grounded in
//! `examples/original_source/lib/SymbolResolver/ResolveInfo.cpp`'s
//! `ResolveInfo::override*` family.

use std::collections::HashMap;

use crate::{
    ids::{InputId, SymbolId},
    section::FragmentRef,
};

/// `ResolveInfo::Binding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Binding {
    /// Not externally visible; never participates in cross-file resolution.
    Local,
    /// Weakly defined or weakly undefined.
    Weak,
    /// Globally visible.
    Global,
    /// An absolute value, not tied to any section; behaves like a define for
    /// override purposes (§4.1 rule 2).
    Absolute,
}

/// `ResolveInfo::Desc`: whether (and how) the symbol is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Desc {
    Undefined,
    Defined,
    /// A tentative definition with size/alignment but no section yet.
    Common,
}

/// `ResolveInfo::Visibility`, ordered from least to most constrained so
/// `max` implements "most constrained wins" (§4.1 rule 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Visibility {
    Default,
    Protected,
    Hidden,
    Internal,
}

/// `ResolveInfo::Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    NoType,
    Object,
    Function,
    Section,
    File,
    CommonBlock,
    Tls,
}

/// Which kind of input defined the incumbent (§4.1 rule 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Regular,
    Dynamic,
}

/// Non-exclusive boolean attributes on a [`ResolveInfo`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// Set once inserted; distinguishes a real symbol slot from bookkeeping.
    pub is_symbol: bool,
    /// Exported to the dynamic symbol table.
    pub export_to_dyn: bool,
    /// Eligible for patch-base absolute-PLT treatment (§6).
    pub patchable: bool,
    /// Came from a bitcode input (LTO itself is out of scope, §1).
    pub bitcode: bool,
    /// Preserved for LTO even though a later candidate would otherwise
    /// override it (§4.1 rule 6).
    pub preserve: bool,
}

/// The name-pool entry for one symbol name (§3).
#[derive(Debug, Clone)]
pub struct ResolveInfo {
    pub name: String,
    pub binding: Binding,
    pub desc: Desc,
    pub visibility: Visibility,
    pub r#type: SymbolType,
    pub source: Source,
    pub flags: Flags,
    pub size: u64,
    pub value: u64,
    /// Alignment, meaningful only while `desc == Common`.
    pub common_alignment: u64,
    /// The input file that currently owns this definition.
    pub origin: InputId,
    /// The canonical output-participating instance, once one exists.
    pub out_symbol: Option<SymbolId>,
    /// An alias name sharing this same definition (e.g. a weak alias).
    pub alias: Option<String>,
}

impl ResolveInfo {
    /// Whether this entry currently represents a definition (regular define,
    /// common, or absolute).
    pub fn is_defined(&self) -> bool {
        matches!(self.desc, Desc::Defined | Desc::Common) || self.binding == Binding::Absolute
    }
}

/// The canonical symbol instance participating in the output (§3).
#[derive(Debug, Clone)]
pub struct LDSymbol {
    pub fragment_ref: FragmentRef,
    pub value: u64,
    /// Output section index, assigned once the section map exists.
    pub section_index: Option<u32>,
    /// Index into the output symbol table, assigned by the Writer.
    pub symbol_index: Option<u32>,
    /// Set by GC: excluded from the output symbol table.
    pub should_ignore: bool,
    pub info: SymbolId,
}

/// The outcome of inserting a non-local candidate (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Whether a `ResolveInfo` with this name already existed.
    pub existent: bool,
    /// Whether the candidate overrode the incumbent's definition.
    pub overridden: bool,
}

/// A fatal resolution conflict (§4.1 rule 1, §7 "multiple definition").
#[derive(Debug, Clone)]
pub struct MultipleDefinition {
    pub name: String,
    pub first: InputId,
    pub second: InputId,
}

/// One entry in the optional, opt-in resolution history log.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub input: InputId,
    pub candidate: ResolveInfoSnapshot,
}

/// A cheap, owned snapshot of a [`ResolveInfo`] for the history log, so the
/// log doesn't have to keep every superseded `ResolveInfo` fully alive.
#[derive(Debug, Clone)]
pub struct ResolveInfoSnapshot {
    pub binding: Binding,
    pub desc: Desc,
    pub visibility: Visibility,
}

impl From<&ResolveInfo> for ResolveInfoSnapshot {
    fn from(info: &ResolveInfo) -> Self {
        Self { binding: info.binding, desc: info.desc, visibility: info.visibility }
    }
}

/// Process-wide symbol table (§3, §4.1).
///
/// Non-local inserts are conceptually behind one mutex (§5); within a single
/// link this type itself is not `Sync`, callers serialize access the same
/// way the teacher's `ThreadPool`-driven phases barrier between stages.
#[derive(Debug, Default)]
pub struct NamePool {
    non_locals: HashMap<String, ResolveInfo>,
    /// Preserves first-insertion order for reproducible output, since
    /// `HashMap` iteration order is not.
    insertion_order: Vec<String>,
    locals: Vec<ResolveInfo>,
    /// Opt-in: costly for large links, per §4.1.
    pub record_history: bool,
    history: HashMap<String, Vec<HistoryEntry>>,
}

impl NamePool {
    /// Create an empty name pool.
    pub fn new(record_history: bool) -> Self {
        Self { record_history, ..Default::default() }
    }

    /// `insertLocal`: locals need no global lock and never participate in
    /// override resolution.
    pub fn insert_local(&mut self, info: ResolveInfo) {
        self.locals.push(info);
    }

    /// `findInfo`.
    pub fn find_info(&self, name: &str) -> Option<&ResolveInfo> {
        self.non_locals.get(name)
    }

    /// `insertNonLocal`: apply the seven-step precedence contract of §4.1.
    ///
    /// Returns the resolution outcome, or a fatal [`MultipleDefinition`] when
    /// two non-weak, incompatible definitions collide and
    /// `allow_multiple_definition` is `false`.
    pub fn insert_non_local(
        &mut self,
        mut candidate: ResolveInfo,
        allow_multiple_definition: bool,
    ) -> Result<Resolution, MultipleDefinition> {
        if self.record_history {
            self.history
                .entry(candidate.name.clone())
                .or_default()
                .push(HistoryEntry { input: candidate.origin, candidate: (&candidate).into() });
        }

        let Some(incumbent) = self.non_locals.get(&candidate.name) else {
            let name = candidate.name.clone();
            self.insertion_order.push(name.clone());
            self.non_locals.insert(name, candidate);
            return Ok(Resolution { existent: false, overridden: false });
        };

        // Rule 5 runs independently of who wins: always take the more
        // constrained visibility.
        let combined_visibility = incumbent.visibility.max(candidate.visibility);

        // Rule 6: bitcode preservation blocks override outright.
        if incumbent.flags.bitcode && incumbent.is_defined() && candidate.desc == Desc::Undefined {
            let incumbent = self.non_locals.get_mut(&candidate.name).unwrap();
            incumbent.flags.preserve = true;
            incumbent.visibility = combined_visibility;
            return Ok(Resolution { existent: true, overridden: false });
        }

        let overridden = self.decide_override(incumbent, &mut candidate, allow_multiple_definition)?;

        let slot = self.non_locals.get_mut(&candidate.name).unwrap();
        slot.visibility = combined_visibility;
        if overridden {
            let alias = slot.alias.take();
            *slot = candidate;
            slot.alias = alias.or(slot.alias.take());
        }

        Ok(Resolution { existent: true, overridden })
    }

    /// Rules 1–4 and 7: decide whether `candidate` overrides `incumbent`.
    /// Returns `Ok(true)` if it does, `Ok(false)` if the incumbent survives.
    fn decide_override(
        &self,
        incumbent: &ResolveInfo,
        candidate: &mut ResolveInfo,
        allow_multiple_definition: bool,
    ) -> Result<bool, MultipleDefinition> {
        // Rule 7: patch-base symbols were already converted to sym-def
        // provides or absolutes by the patch_base module before reaching
        // the pool, so by the time they arrive here they're handled by the
        // ordinary rules below.

        // Rule 4: common merging.
        if incumbent.desc == Desc::Common && candidate.desc == Desc::Common {
            let candidate_wins = candidate.size > incumbent.size
                || (candidate.size == incumbent.size && candidate.common_alignment > incumbent.common_alignment);
            return Ok(candidate_wins);
        }
        if incumbent.desc == Desc::Common && candidate.desc == Desc::Defined {
            return Ok(true);
        }
        if incumbent.desc == Desc::Defined && candidate.desc == Desc::Common {
            // incumbent (defined) wins; candidate stays on record as
            // "referenced by common" so LTO keeps the bitcode definition.
            return Ok(false);
        }

        // Rule 1: type guard for defined-vs-defined.
        if incumbent.is_defined() && candidate.is_defined() {
            match (incumbent.binding, candidate.binding) {
                (Binding::Weak, Binding::Weak) => return Ok(false), // first wins
                (Binding::Weak, _) => return Ok(true),               // strong overrides weak
                (_, Binding::Weak) => return Ok(false),               // weak does not override strong
                _ => {
                    if !allow_multiple_definition {
                        return Err(MultipleDefinition {
                            name: candidate.name.clone(),
                            first: incumbent.origin,
                            second: candidate.origin,
                        });
                    }
                    // Allowed: first strong definition wins, matching the
                    // common linker convention.
                    return Ok(false);
                }
            }
        }

        // Rule 2: binding order, global > weak > undefined; absolute acts
        // like a define.
        let incumbent_rank = binding_rank(incumbent);
        let candidate_rank = binding_rank(candidate);
        if candidate_rank != incumbent_rank {
            return Ok(candidate_rank > incumbent_rank);
        }

        // Rule 3: a regular-object define outranks a dynamic-object define
        // of equal rank; the dynamic entry is kept only for symtab emission,
        // which the resolver signals by leaving `source` on the candidate
        // untouched (the Writer decides what to emit).
        if incumbent.is_defined() && candidate.is_defined() {
            return Ok(match (incumbent.source, candidate.source) {
                (Source::Dynamic, Source::Regular) => true,
                (Source::Regular, Source::Dynamic) => false,
                _ => false, // equal source, first wins
            });
        }

        // Neither side is a stronger definition than the other: keep the
        // incumbent (first-seen wins for undefined-vs-undefined, etc.)
        Ok(false)
    }

    /// `findSymbol`: resolve a name to its `out_symbol`, if resolution has
    /// produced one.
    pub fn find_symbol(&self, name: &str) -> Option<SymbolId> {
        self.non_locals.get(name).and_then(|info| info.out_symbol)
    }

    /// Attach the canonical [`SymbolId`] to an already-resolved name, once
    /// the finalize-symbols phase mints its defining `LDSymbol`. Resolution
    /// itself (`insert_non_local`) never runs again for this name afterwards,
    /// so this is a plain setter rather than another override decision.
    pub fn bind_out_symbol(&mut self, name: &str, symbol: SymbolId) {
        if let Some(info) = self.non_locals.get_mut(name) {
            info.out_symbol = Some(symbol);
        }
    }

    /// `addSharedLibSymbol`: insert (or merge) a symbol sourced from a
    /// dynamic object.
    pub fn add_shared_lib_symbol(
        &mut self,
        info: ResolveInfo,
        allow_multiple_definition: bool,
    ) -> Result<Resolution, MultipleDefinition> {
        self.insert_non_local(info, allow_multiple_definition)
    }

    /// Names in first-insertion order, for reproducible symbol table
    /// emission.
    pub fn names_in_order(&self) -> impl Iterator<Item = &str> {
        self.insertion_order.iter().map(String::as_str)
    }

    /// Non-local entries, keyed by name.
    pub fn non_locals(&self) -> &HashMap<String, ResolveInfo> {
        &self.non_locals
    }

    /// Local symbols, in insertion order.
    pub fn locals(&self) -> &[ResolveInfo] {
        &self.locals
    }

    /// The resolution history for `name`, if history recording was enabled.
    pub fn history(&self, name: &str) -> &[HistoryEntry] {
        self.history.get(name).map_or(&[], Vec::as_slice)
    }
}

fn binding_rank(info: &ResolveInfo) -> u8 {
    match info.binding {
        Binding::Global | Binding::Absolute => 2,
        Binding::Weak => 1,
        Binding::Local => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Arena;

    fn info(name: &str, binding: Binding, desc: Desc, origin: InputId) -> ResolveInfo {
        ResolveInfo {
            name: name.to_string(),
            binding,
            desc,
            visibility: Visibility::Default,
            r#type: SymbolType::Function,
            source: Source::Regular,
            flags: Flags { is_symbol: true, ..Default::default() },
            size: 0,
            value: 0,
            common_alignment: 1,
            origin,
            out_symbol: None,
            alias: None,
        }
    }

    fn two_inputs() -> (Arena<crate::input::InputFile>, InputId, InputId) {
        let mut inputs = Arena::new();
        let a = inputs.alloc(crate::input::InputFile::Internal);
        let b = inputs.alloc(crate::input::InputFile::Internal);
        (inputs, a, b)
    }

    #[test]
    fn weak_then_strong_strong_wins_silently() {
        let (_inputs, a, b) = two_inputs();
        let mut pool = NamePool::new(false);

        pool.insert_non_local(info("f", Binding::Weak, Desc::Defined, a), false).unwrap();
        let resolution =
            pool.insert_non_local(info("f", Binding::Global, Desc::Defined, b), false).unwrap();

        assert!(resolution.overridden);
        assert_eq!(pool.find_info("f").unwrap().origin, b);
    }

    #[test]
    fn strong_then_weak_incumbent_survives() {
        let (_inputs, a, b) = two_inputs();
        let mut pool = NamePool::new(false);

        pool.insert_non_local(info("f", Binding::Global, Desc::Defined, a), false).unwrap();
        let resolution = pool.insert_non_local(info("f", Binding::Weak, Desc::Defined, b), false).unwrap();

        assert!(!resolution.overridden);
        assert_eq!(pool.find_info("f").unwrap().origin, a);
    }

    #[test]
    fn two_strong_definitions_conflict_unless_allowed() {
        let (_inputs, a, b) = two_inputs();
        let mut pool = NamePool::new(false);

        pool.insert_non_local(info("f", Binding::Global, Desc::Defined, a), false).unwrap();
        let error = pool.insert_non_local(info("f", Binding::Global, Desc::Defined, b), false).unwrap_err();
        assert_eq!(error.name, "f");

        let mut pool = NamePool::new(false);
        pool.insert_non_local(info("f", Binding::Global, Desc::Defined, a), true).unwrap();
        let resolution =
            pool.insert_non_local(info("f", Binding::Global, Desc::Defined, b), true).unwrap();
        assert!(!resolution.overridden);
    }

    #[test]
    fn common_merging_keeps_larger_size_then_stricter_alignment() {
        let (_inputs, a, b) = two_inputs();
        let mut pool = NamePool::new(false);

        let mut x_small = info("x", Binding::Global, Desc::Common, a);
        x_small.size = 4;
        x_small.common_alignment = 4;
        pool.insert_non_local(x_small, false).unwrap();

        let mut x_large = info("x", Binding::Global, Desc::Common, b);
        x_large.size = 16;
        x_large.common_alignment = 16;
        let resolution = pool.insert_non_local(x_large, false).unwrap();

        assert!(resolution.overridden);
        let winner = pool.find_info("x").unwrap();
        assert_eq!(winner.size, 16);
        assert_eq!(winner.common_alignment, 16);
    }

    #[test]
    fn defined_beats_common() {
        let (_inputs, a, b) = two_inputs();
        let mut pool = NamePool::new(false);

        pool.insert_non_local(info("x", Binding::Global, Desc::Common, a), false).unwrap();
        let resolution = pool.insert_non_local(info("x", Binding::Global, Desc::Defined, b), false).unwrap();

        assert!(resolution.overridden);
        assert_eq!(pool.find_info("x").unwrap().desc, Desc::Defined);
    }

    #[test]
    fn visibility_always_takes_the_most_constrained() {
        let (_inputs, a, b) = two_inputs();
        let mut pool = NamePool::new(false);

        let mut first = info("f", Binding::Weak, Desc::Defined, a);
        first.visibility = Visibility::Hidden;
        pool.insert_non_local(first, false).unwrap();

        let mut second = info("f", Binding::Global, Desc::Defined, b);
        second.visibility = Visibility::Default;
        pool.insert_non_local(second, false).unwrap();

        assert_eq!(pool.find_info("f").unwrap().visibility, Visibility::Hidden);
    }

    #[test]
    fn history_log_is_opt_in() {
        let (_inputs, a, b) = two_inputs();
        let mut pool = NamePool::new(true);

        pool.insert_non_local(info("f", Binding::Weak, Desc::Defined, a), false).unwrap();
        pool.insert_non_local(info("f", Binding::Global, Desc::Defined, b), false).unwrap();

        assert_eq!(pool.history("f").len(), 2);
    }
}
