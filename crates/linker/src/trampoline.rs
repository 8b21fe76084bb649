//! Branch-Island Factory (§4.6), grounded in
//! `original_source/lib/BranchIsland/BranchIslandFactory.cpp` for the
//! reuse-search-then-synthesize algorithm and the
//! `<targetSymbol>@island@<n>` naming scheme.

use std::collections::HashMap;

use crate::{
    ids::{FragmentId, SectionId, SymbolId},
    section::{Fragment, FragmentKind},
};

/// Naming style for synthesized trampoline symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingStyle {
    /// `<targetSymbol>@island@<n>`.
    #[default]
    Default,
    /// `__<targetSymbol>_veneer_<n>` (the legacy style mentioned in §4.6).
    Legacy,
}

/// One synthesized (or reused) island for a given `(output section,
/// target symbol, addend)` triple.
#[derive(Debug, Clone)]
pub struct Island {
    pub stub: FragmentId,
    pub symbol_name: String,
    /// This island's place, assigned once it's spliced into a section and
    /// laid out; used to range-check further reuse and the stub's own
    /// relocation.
    pub place: Option<u64>,
}

/// Key identifying reuse candidates: an island bridges calls to the same
/// target symbol with the same addend.
type IslandKey = (SectionId, SymbolId, i64);

/// Per-output-section island bookkeeping: a stable naming counter, and the
/// islands created so far, keyed by `(output section, target, addend)` for
/// reuse lookup.
#[derive(Debug, Default)]
pub struct IslandTable {
    next_index: HashMap<SectionId, u32>,
    islands: HashMap<IslandKey, Vec<Island>>,
}

impl IslandTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Find an existing island for `target`/`addend` in `output_section`
    /// whose `place` is within `range` of `caller_place` (§4.6: "search for
    /// an existing reusable island ... AND the relocation is in range of
    /// it"), if reuse is allowed.
    pub fn find_reusable(
        &self,
        output_section: SectionId,
        target: SymbolId,
        addend: i64,
        caller_place: u64,
        range: i64,
        allow_reuse: bool,
    ) -> Option<&Island> {
        if !allow_reuse {
            return None;
        }

        self.islands.get(&(output_section, target, addend))?.iter().find(|island| {
            island.place.is_some_and(|place| (place as i64 - caller_place as i64).unsigned_abs() as i64 <= range)
        })
    }

    /// Build a new island's stub fragment, deterministically named, ready
    /// to be allocated by the caller. Splicing it into the section's
    /// fragment list, and into the arena, is the caller's job (it owns both
    /// arenas); call [`Self::register`] with the resulting id to make the
    /// island visible to future reuse lookups.
    pub fn new_stub(
        &mut self,
        output_section: SectionId,
        stub_bytes: Vec<u8>,
        naming: NamingStyle,
        target_name: &str,
    ) -> (Fragment, String) {
        let index = self.next_index.entry(output_section).or_insert(0);
        let n = *index;
        *index += 1;

        let symbol_name = match naming {
            NamingStyle::Default => format!("{target_name}@island@{n}"),
            NamingStyle::Legacy => format!("__{target_name}_veneer_{n}"),
        };

        (Fragment::new(FragmentKind::Stub(stub_bytes), 4, output_section), symbol_name)
    }

    /// Register a freshly allocated stub fragment as a reusable island.
    pub fn register(
        &mut self,
        output_section: SectionId,
        target: SymbolId,
        addend: i64,
        stub: FragmentId,
        symbol_name: String,
    ) {
        self.islands
            .entry((output_section, target, addend))
            .or_default()
            .push(Island { stub, symbol_name, place: None });
    }

    /// Record a registered island's place once layout assigns one, so later
    /// reuse lookups (and the stub's own out-of-range check) can use it.
    pub fn set_place(&mut self, output_section: SectionId, target: SymbolId, addend: i64, stub: FragmentId, place: u64) {
        if let Some(islands) = self.islands.get_mut(&(output_section, target, addend)) {
            if let Some(island) = islands.iter_mut().find(|island| island.stub == stub) {
                island.place = Some(place);
            }
        }
    }
}

/// Whether a relocation from `caller_place` to `target_value` is in range.
pub fn needs_trampoline(caller_place: u64, target_value: u64, range: i64) -> bool {
    (target_value as i64 - caller_place as i64).unsigned_abs() as i64 > range
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Arena;

    #[test]
    fn detects_out_of_range_calls() {
        assert!(!needs_trampoline(0, 100, 128));
        assert!(needs_trampoline(0, 1_000_000, 128));
    }

    #[test]
    fn synthesizes_then_reuses_within_range() {
        let mut fragments: Arena<Fragment> = Arena::new();
        let mut sections: Arena<crate::section::Section> = Arena::new();
        let mut inputs: Arena<crate::input::InputFile> = Arena::new();
        let owner = inputs.alloc(crate::input::InputFile::Internal);
        let output_section = sections.alloc(crate::section::Section::new(
            ".text",
            crate::section::SectionKind::Regular,
            crate::section::SectionFlag::Alloc.into(),
            owner,
        ));

        let mut symbols: Arena<crate::resolve::ResolveInfo> = Arena::new();
        let target = symbols.alloc(crate::resolve::ResolveInfo {
            name: "callee".into(),
            binding: crate::resolve::Binding::Global,
            desc: crate::resolve::Desc::Defined,
            visibility: crate::resolve::Visibility::Default,
            r#type: crate::resolve::SymbolType::Function,
            source: crate::resolve::Source::Regular,
            flags: crate::resolve::Flags::default(),
            size: 0,
            value: 0,
            common_alignment: 1,
            origin: owner,
            out_symbol: None,
            alias: None,
        });

        let mut table = IslandTable::new();

        assert!(table.find_reusable(output_section, target, 0, 0, 128, true).is_none());

        let (fragment, symbol_name) =
            table.new_stub(output_section, vec![0xE9, 0, 0, 0, 0], NamingStyle::Default, "callee");
        assert_eq!(symbol_name, "callee@island@0");

        let stub_id = fragments.alloc(fragment);
        table.register(output_section, target, 0, stub_id, symbol_name);
        table.set_place(output_section, target, 0, stub_id, 1000);

        let reused = table.find_reusable(output_section, target, 0, 1000 + 50, 128, true);
        assert!(reused.is_some());
        assert_eq!(reused.unwrap().stub, stub_id);

        let too_far = table.find_reusable(output_section, target, 0, 1_000_000, 128, true);
        assert!(too_far.is_none());
    }
}
