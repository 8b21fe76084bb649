//! Patch-base symbol conversion (§6).
//!
//! A patch-base link carries forward a previous build's addresses so a
//! binary patch can be applied without relocating everything: every symbol
//! the base image defined is pinned absolute at its old address, unless the
//! new sources also define it, in which case the new definition wins and
//! the base's value is kept only as a diagnostic breadcrumb.
//!
//! Grounded in `original_source/lib/Support/PatchELF*` parsing of a
//! sym-def-style `name = address` list and its override-only-if-undefined
//! merge rule into the resolver.

use crate::{
    diagnostics::{Diagnostic, Severity},
    ids::InputId,
    module::Module,
    resolve::{Binding, Desc, Flags, ResolveInfo, Source, SymbolType, Visibility},
};

/// One symbol the base image defined, as read from its sym-def input.
#[derive(Debug, Clone)]
pub struct BaseSymbol {
    pub name: String,
    pub address: u64,
}

/// Outcome of converting one base symbol (§6, §7 diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Nothing in the new link defines this name: pinned absolute at the
    /// base image's address.
    Pinned,
    /// The new link already defines this name: the base's value is
    /// superseded and only recorded as a note.
    Superseded,
}

/// Apply patch-base conversion: for every `base` symbol, either pin it
/// absolute (if undefined in the current resolution state) or note that the
/// new build's definition supersedes it. `origin` identifies the
/// linker-internal input the pinned symbols are attributed to.
pub fn apply(module: &mut Module, origin: InputId, base: &[BaseSymbol]) -> Vec<(String, Disposition)> {
    let mut outcomes = Vec::with_capacity(base.len());

    for symbol in base {
        let already_defined = module.name_pool.find_info(&symbol.name).is_some_and(ResolveInfo::is_defined);

        if already_defined {
            module.diagnostics.emit(Diagnostic::new(
                Severity::Note,
                "E015",
                format!("`{}` is redefined by the new build; patch-base address 0x{:x} superseded", symbol.name, symbol.address),
            ));
            outcomes.push((symbol.name.clone(), Disposition::Superseded));
            continue;
        }

        let info = ResolveInfo {
            name: symbol.name.clone(),
            binding: Binding::Absolute,
            desc: Desc::Defined,
            visibility: Visibility::Default,
            r#type: SymbolType::NoType,
            source: Source::Regular,
            flags: Flags { is_symbol: true, patchable: true, ..Default::default() },
            size: 0,
            value: symbol.address,
            common_alignment: 1,
            origin,
            out_symbol: None,
            alias: None,
        };

        // Patch-base symbols never conflict fatally with each other or
        // with a later weak definition: they sit beneath ordinary
        // resolution rules as a floor, not a competing strong definition.
        let _ = module.name_pool.insert_non_local(info, true);
        outcomes.push((symbol.name.clone(), Disposition::Pinned));
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        input::InputFile,
        resolve::{Binding as B, Desc as D, SymbolType as T, Source as S, Visibility as V},
    };

    fn defined(name: &str, origin: InputId) -> ResolveInfo {
        ResolveInfo {
            name: name.to_string(),
            binding: B::Global,
            desc: D::Defined,
            visibility: V::Default,
            r#type: T::Function,
            source: S::Regular,
            flags: Flags { is_symbol: true, ..Default::default() },
            size: 4,
            value: 0x4000,
            common_alignment: 1,
            origin,
            out_symbol: None,
            alias: None,
        }
    }

    #[test]
    fn undefined_base_symbols_are_pinned_absolute() {
        let mut module = Module::new(false);
        let origin = module.add_input(InputFile::Internal);

        let outcomes = apply(&mut module, origin, &[BaseSymbol { name: "old_fn".into(), address: 0x1000 }]);

        assert_eq!(outcomes, vec![("old_fn".to_string(), Disposition::Pinned)]);
        let info = module.name_pool.find_info("old_fn").unwrap();
        assert_eq!(info.binding, Binding::Absolute);
        assert_eq!(info.value, 0x1000);
    }

    #[test]
    fn already_defined_symbols_are_superseded() {
        let mut module = Module::new(false);
        let origin = module.add_input(InputFile::Internal);
        module.name_pool.insert_non_local(defined("relocated_fn", origin), false).unwrap();

        let outcomes = apply(&mut module, origin, &[BaseSymbol { name: "relocated_fn".into(), address: 0x1000 }]);

        assert_eq!(outcomes, vec![("relocated_fn".to_string(), Disposition::Superseded)]);
        assert_eq!(module.name_pool.find_info("relocated_fn").unwrap().value, 0x4000);
    }
}
