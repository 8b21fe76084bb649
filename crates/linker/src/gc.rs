//! Garbage Collector (§4.3): from a root set, reach every live section over
//! relocation edges.

use std::collections::{HashSet, VecDeque};

use crate::{
    ids::{Arena, SectionId},
    relocator::Relocation,
    section::Section,
};

/// An edge source, kept only for diagnostics (`why is this section live`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// A relocation in the source section targets a symbol defined in the
    /// destination section.
    Relocation,
    /// The linker script named the destination inside a `KEEP(...)`.
    ScriptKeep,
    /// A target backend declared an implicit edge (e.g. exception table to
    /// code).
    Backend,
}

/// Run the mark phase: starting from `roots`, follow `edges` until no more
/// sections are newly reached. Sections not reached end up `ignore`d.
///
/// `edges` is an adjacency list: `edges[i]` holds every `(destination,
/// kind)` reachable directly from section `i`. Building it is the caller's
/// job (it walks relocations/KEEP/backend-declared edges, §4.3), so this
/// function stays a pure graph traversal and is easy to test without a full
/// `Module`.
pub fn mark_reachable(
    roots: impl IntoIterator<Item = SectionId>,
    edges: &impl Fn(SectionId) -> Vec<(SectionId, EdgeKind)>,
) -> HashSet<SectionId> {
    let mut reached = HashSet::new();
    let mut queue = VecDeque::new();

    for root in roots {
        if reached.insert(root) {
            queue.push_back(root);
        }
    }

    while let Some(section) = queue.pop_front() {
        for (destination, _kind) in edges(section) {
            if reached.insert(destination) {
                queue.push_back(destination);
            }
        }
    }

    reached
}

/// Build the relocation-edge adjacency function described in §4.3: for each
/// section `S`, for each relocation `R` in `S` whose resolved symbol's
/// `out_symbol` fragment belongs to section `S'`, there is an edge `S → S'`.
pub fn relocation_edges<'a>(
    relocations: &'a Arena<Relocation>,
    symbol_sections: &'a impl Fn(crate::ids::SymbolId) -> Option<SectionId>,
) -> impl Fn(SectionId) -> Vec<(SectionId, EdgeKind)> + 'a {
    move |section_id: SectionId| {
        relocations
            .iter()
            .filter(|(_, reloc)| reloc.section == section_id)
            .filter_map(|(_, reloc)| symbol_sections(reloc.symbol).map(|target| (target, EdgeKind::Relocation)))
            .collect()
    }
}

/// Apply the mark-phase result: any allocatable section not in `reached` is
/// marked `ignore`, and its defined symbols should be marked
/// `should_ignore` by the caller (which owns the `NamePool`/`LDSymbol`
/// arena and is better placed to do that cross-cutting update).
pub fn sweep(sections: &mut Arena<Section>, reached: &HashSet<SectionId>) -> Vec<SectionId> {
    let mut swept = Vec::new();

    for id in sections.ids() {
        let section = &mut sections[id];
        if section.is_allocatable() && !reached.contains(&id) {
            section.ignore = true;
            swept.push(id);
        }
    }

    swept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ids::Arena,
        input::InputFile,
        section::{SectionFlag, SectionKind},
    };

    #[test]
    fn reaches_transitively_and_ignores_the_rest() {
        let mut sections: Arena<Section> = Arena::new();
        let mut inputs: Arena<InputFile> = Arena::new();
        let owner = inputs.alloc(InputFile::Internal);

        let root = sections.alloc(Section::new(".text.start", SectionKind::Regular, SectionFlag::Alloc.into(), owner));
        let reachable =
            sections.alloc(Section::new(".text.helper", SectionKind::Regular, SectionFlag::Alloc.into(), owner));
        let dead = sections.alloc(Section::new(".text.unused", SectionKind::Regular, SectionFlag::Alloc.into(), owner));

        let graph = move |id: SectionId| if id == root { vec![(reachable, EdgeKind::Relocation)] } else { vec![] };

        let reached = mark_reachable([root], &graph);
        assert!(reached.contains(&root));
        assert!(reached.contains(&reachable));
        assert!(!reached.contains(&dead));

        let swept = sweep(&mut sections, &reached);
        assert_eq!(swept, vec![dead]);
        assert!(sections[dead].ignore);
        assert!(!sections[reachable].ignore);
    }
}
