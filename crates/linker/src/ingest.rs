//! ELF object and archive ingestion (§4.7 phases 1–2): turning raw bytes off
//! disk into `Module` arena entries.
//!
//! [`crate::pipeline`]'s own doc comment defers "reading and classifying
//! inputs" to "the elf64 driver" — this module is that driver. It reads
//! every [`crate::Configuration::input_files`] entry in command-line order
//! (archives are resolved to a fixed point against their own armap before
//! moving on, per the classical single-pass pull model [`crate::archive`]
//! already implements), folding sections into [`Section`]/[`Fragment`]s and
//! symbols into [`ResolveInfo`]/[`LDSymbol`] pairs through
//! [`Module::define_symbol`] and [`crate::resolve::NamePool::insert_non_local`].

use std::{collections::HashSet, path::PathBuf, sync::Arc};

use ferrum_errors::error;
use ferrum_file::{FileReader, Picker};
use ferrum_object::{
    archive::{Archive as RawArchive, MAGIC as ARCHIVE_MAGIC, THIN_MAGIC as THIN_ARCHIVE_MAGIC},
    elf64::{
        File as ElfFile, FileType, SectionFlag as ElfSectionFlag, SectionIndex as ElfSectionIndex,
        SectionType, SymbolBinding as ElfSymbolBinding, SymbolType as ElfSymbolType,
    },
};

use crate::{
    archive::plan_pull,
    configuration::Configuration,
    ids::{InputId, SectionId, SymbolId},
    input::{Archive as ArchiveBookkeeping, Input, InputAttributes, InputFile, MemoryArea},
    module::Module,
    resolve::{Binding, Desc, Flags, LDSymbol, ResolveInfo, Source, SymbolType, Visibility},
    section::{Fragment, FragmentKind, FragmentRef, Section, SectionFlag, SectionFlags, SectionKind},
};

error! {
    #[doc = "Errors raised while reading and classifying input files."]
    pub enum Error {
        #[code = E010]
        #[message = "I was not able to read an input file."]
        #[formatted_message("I was not able to read `{0}` from disk.")]
        #[help = "Double check the path exists and is readable."]
        Io(PathBuf),

        #[code = E011]
        #[message = "I was not able to parse an ELF64 object."]
        #[formatted_message("`{0}` doesn't look like a valid ELF64 relocatable object.")]
        #[help = "Is this really an ELF64 object file, built for the target you asked for?"]
        ParseObject(PathBuf),

        #[code = E012]
        #[message = "I was given a file that isn't a relocatable object."]
        #[formatted_message("`{0}` is an ELF64 file, but not a relocatable object (`ET_REL`).")]
        #[help = "Only relocatable objects and archives of relocatable objects can be linked."]
        NotRelocatable(PathBuf),

        #[code = E013]
        #[message = "I was not able to parse an archive."]
        #[formatted_message("`{0}` doesn't look like a valid `ar` archive.")]
        #[help = "Is this really a static archive, produced by `ar` or a compatible tool?"]
        ParseArchive(PathBuf),

        #[code = E014]
        #[message = "An archive referenced a member I could not find."]
        #[formatted_message("`{0}` references an armap member at an offset I could not find.")]
        #[help = "This archive's armap may be corrupt."]
        MissingMember(PathBuf),

        #[code = E015]
        #[message = "Two strong definitions of the same symbol collide."]
        #[formatted_message("{0}")]
        #[help = "Pass `--allow-multiple-definition` if this is intentional."]
        MultipleDefinition(String),

        #[code = E016]
        #[message = "A thin archive member path could not be resolved."]
        #[formatted_message("`{0}` is a thin archive member and the underlying file could not be read.")]
        #[help = "Thin archive members are paths relative to the archive; make sure they still exist."]
        ThinMember(String),
    }
}

/// Read and ingest every [`Configuration::input_files`] entry, in order,
/// into `module`.
pub fn ingest_all(module: &mut Module, configuration: &Configuration) -> Result<(), Error> {
    let wrapped: HashSet<&str> = configuration.wrapped_symbols.iter().map(String::as_str).collect();

    for (ordinal, path) in configuration.input_files.iter().enumerate() {
        let bytes = read_file(path)?;

        if bytes.starts_with(ARCHIVE_MAGIC) || bytes.starts_with(THIN_ARCHIVE_MAGIC) {
            ingest_archive(module, ordinal, path, bytes, &wrapped, configuration.allow_multiple_definition)?;
        } else {
            let origin = module.add_input(InputFile::ElfRelocatable {
                input: make_input(ordinal, path),
                memory: MemoryArea::new(path.display().to_string(), Arc::clone(&bytes)),
                sections: Vec::new(),
            });
            ingest_object(module, origin, path, &bytes, configuration.allow_multiple_definition)?;
        }
    }

    Ok(())
}

fn read_file(path: &std::path::Path) -> Result<Arc<[u8]>, Error> {
    let reader = Picker::open(path).map_err(|_| Error::Io(path.to_path_buf()))?;
    let bytes = futures_lite::future::block_on(reader.read_as_bytes()).map_err(|_| Error::Io(path.to_path_buf()))?;
    Ok(Arc::from(bytes.as_ref()))
}

fn make_input(ordinal: usize, path: &std::path::Path) -> Input {
    Input {
        ordinal,
        path: path.to_path_buf(),
        resolved_path: path.to_path_buf(),
        attributes: InputAttributes::default(),
    }
}

/// Ingest one archive: repeatedly run the classical pull (§4.2) against its
/// own armap until a full sweep pulls nothing new, ingesting each pulled
/// member as it is queued.
fn ingest_archive(
    module: &mut Module,
    ordinal: usize,
    path: &std::path::Path,
    bytes: Arc<[u8]>,
    wrapped: &HashSet<&str>,
    allow_multiple_definition: bool,
) -> Result<(), Error> {
    let raw = RawArchive::parse(&bytes).map_err(|_| Error::ParseArchive(path.to_path_buf()))?;

    let origin = module.add_input(InputFile::Archive {
        input: make_input(ordinal, path),
        memory: MemoryArea::new(path.display().to_string(), Arc::clone(&bytes)),
        archive: ArchiveBookkeeping::default(),
    });

    loop {
        let already_pulled = match &module.inputs[origin] {
            InputFile::Archive { archive, .. } => archive.pulled.clone(),
            _ => unreachable!("just inserted as InputFile::Archive"),
        };

        let (queue, passes) = plan_pull(&raw, &module.name_pool, &already_pulled, wrapped);

        if let InputFile::Archive { archive, .. } = &mut module.inputs[origin] {
            archive.passes = passes;
        }

        if queue.is_empty() {
            break;
        }

        for member_offset in queue {
            if let InputFile::Archive { archive, .. } = &mut module.inputs[origin] {
                archive.pulled.insert(member_offset);
            }

            let member =
                raw.member_at(member_offset).ok_or_else(|| Error::MissingMember(path.to_path_buf()))?;
            let member_name = String::from_utf8_lossy(member.name).into_owned();

            let member_bytes: Arc<[u8]> = if matches!(raw.kind, ferrum_object::archive::Kind::Thin) {
                let member_path = path.with_file_name(&member_name);
                read_file(&member_path).map_err(|_| Error::ThinMember(member_name.clone()))?
            } else {
                Arc::from(member.data)
            };

            let member_origin = module.add_input(InputFile::ArchiveMember {
                parent: path.to_path_buf(),
                member_name: member_name.clone(),
                sections: Vec::new(),
            });

            ingest_object(module, member_origin, &path.join(&member_name), &member_bytes, allow_multiple_definition)?;
        }
    }

    Ok(())
}

/// Ingest one ELF64 relocatable object's sections and symbols into `module`,
/// under the already-registered `origin` input.
fn ingest_object(
    module: &mut Module,
    origin: InputId,
    path: &std::path::Path,
    bytes: &[u8],
    allow_multiple_definition: bool,
) -> Result<(), Error> {
    let (rest, mut file) =
        ElfFile::read::<()>(bytes).map_err(|_| Error::ParseObject(path.to_path_buf()))?;
    debug_assert!(rest.is_empty(), "`{}` was not read until the end", path.display());

    if file.r#type != FileType::RelocatableFile {
        return Err(Error::NotRelocatable(path.to_path_buf()));
    }

    file.fetch_section_names();
    let strings_section = file.strings_section();

    // One slot per ELF section index; `None` for sections that contribute no
    // engine `Section` (symbol/string/relocation tables, the null section).
    let mut section_ids: Vec<Option<SectionId>> = vec![None; file.sections.len()];

    for (index, section) in file.sections.iter().enumerate() {
        let kind = match section.r#type {
            SectionType::Null
            | SectionType::SymbolTable
            | SectionType::StringTable
            | SectionType::RelocationWithAddends
            | SectionType::Relocation
            | SectionType::SymbolHashTable
            | SectionType::DynamicLinkingTable
            | SectionType::DynamicLoaderSymbolTable => continue,
            SectionType::NoBits => SectionKind::Nobits,
            SectionType::Note => SectionKind::Note,
            SectionType::Group => SectionKind::Group,
            _ => SectionKind::Regular,
        };

        let name = section
            .name
            .as_ref()
            .map(|name| name.to_string())
            .unwrap_or_default();

        let mut engine_section = Section::new(name, kind, convert_section_flags(section.flags), origin);
        engine_section.alignment = section.alignment.0.map(std::num::NonZeroU64::get).unwrap_or(1);
        engine_section.link = 0;
        engine_section.info = section.information;

        let section_id = module.add_section(origin, engine_section);
        section_ids[index] = Some(section_id);

        let fragment = match kind {
            SectionKind::Nobits => FragmentKind::Fill { value: 0, size: section.segment_size_in_file_image.0 },
            _ => {
                let data: &[u8] = &section.data;
                FragmentKind::Region(data.to_vec())
            }
        };

        module.push_fragment(section_id, Fragment::new(fragment, engine_section_alignment(section), section_id));
    }

    // Index 0 is always `STN_UNDEF`, the ELF null symbol; no relocation ever
    // legitimately targets it with a non-zero addend standing alone, but we
    // still need a slot to keep indices aligned.
    let mut symbol_ids: Vec<Option<SymbolId>> = vec![None];

    for section in file.sections.iter().filter(|section| section.r#type == SectionType::SymbolTable) {
        let symbols = match section.data.symbols::<()>(strings_section) {
            Some(symbols) => symbols,
            None => continue,
        };

        for symbol in symbols {
            let symbol = symbol.map_err(|_| Error::ParseObject(path.to_path_buf()))?;
            let name = symbol.name.as_ref().map(|name| name.to_string()).unwrap_or_default();

            let id = ingest_symbol(
                module,
                origin,
                &name,
                &symbol,
                &section_ids,
                allow_multiple_definition,
            )?;
            symbol_ids.push(id);
        }
    }

    // Relocations refer to their target section (`sh_info`) and their symbol
    // table (`sh_link`, implicitly the one just walked above, since a
    // relocatable object carries exactly one `.symtab`).
    for section in file.sections.iter().filter(|section| section.r#type == SectionType::RelocationWithAddends) {
        let Some(target_section_id) = section_ids.get(section.information as usize).copied().flatten() else {
            continue;
        };

        let relocations = match section.data.relocations::<()>() {
            Some(relocations) => relocations,
            None => continue,
        };

        for relocation in relocations {
            let relocation = relocation.map_err(|_| Error::ParseObject(path.to_path_buf()))?;

            let Some(symbol_id) = symbol_ids.get(relocation.symbol as usize).copied().flatten() else {
                continue;
            };

            let place = FragmentRef::new(
                module.sections[target_section_id].fragments[0],
                relocation.offset,
            );

            module.relocations.alloc(crate::relocator::Relocation {
                r#type: relocation.r#type,
                section: target_section_id,
                place,
                symbol: symbol_id,
                addend: relocation.addend,
                reservation: crate::relocator::Reservation::default(),
            });
        }
    }

    Ok(())
}

fn engine_section_alignment(section: &ferrum_object::elf64::Section) -> u64 {
    section.alignment.0.map(std::num::NonZeroU64::get).unwrap_or(1)
}

fn convert_section_flags(flags: ferrum_object::elf64::SectionFlags) -> SectionFlags {
    let mut result = SectionFlags::empty();

    for flag in flags.iter() {
        result |= match flag {
            ElfSectionFlag::Writable => SectionFlag::Write,
            ElfSectionFlag::Allocable => SectionFlag::Alloc,
            ElfSectionFlag::Executable => SectionFlag::ExecInstr,
            ElfSectionFlag::Merge => SectionFlag::Merge,
            ElfSectionFlag::Strings => SectionFlag::Strings,
            ElfSectionFlag::IsPartOfAGroup => SectionFlag::Group,
            ElfSectionFlag::HasThreadLocalData => SectionFlag::Tls,
            // `InfoLink`, `LinkOrder`, `OsNonConforming` have no engine-level
            // counterpart: they affect how `sh_link`/`sh_info` are
            // interpreted, which the engine already threads through
            // `Section::link`/`Section::info` directly.
            _ => continue,
        };
    }

    result
}

/// Ingest one symbol-table entry: mint its `ResolveInfo`/`LDSymbol` pair and,
/// for non-local bindings, resolve it against the shared name pool.
///
/// Returns the [`SymbolId`] this file's relocations should bind to for this
/// symbol-table index: for a non-local name, that's always whichever
/// definition currently wins resolution (not necessarily this one), since a
/// relocation referencing symbol table entry `i` really means "whatever `i`'s
/// name resolves to globally" (§4.1).
fn ingest_symbol(
    module: &mut Module,
    origin: InputId,
    name: &str,
    symbol: &ferrum_object::elf64::Symbol,
    section_ids: &[Option<SectionId>],
    allow_multiple_definition: bool,
) -> Result<Option<SymbolId>, Error> {
    if symbol.r#type == ElfSymbolType::File {
        return Ok(None);
    }

    let binding = match symbol.binding {
        ElfSymbolBinding::Local => Binding::Local,
        ElfSymbolBinding::Weak => Binding::Weak,
        _ => Binding::Global,
    };

    let (desc, fragment_ref, value, common_alignment) = match symbol.section_index_where_symbol_is_defined {
        ElfSectionIndex::Undefined => (Desc::Undefined, FragmentRef::null(), 0, 1),
        ElfSectionIndex::Common => (Desc::Common, FragmentRef::null(), 0, symbol.value.0.max(1)),
        ElfSectionIndex::Absolute => (Desc::Defined, FragmentRef::null(), symbol.value.0, 1),
        ElfSectionIndex::Ok(index) => match section_ids.get(index).copied().flatten() {
            Some(section_id) => {
                let fragment = module.sections[section_id].fragments[0];
                (Desc::Defined, FragmentRef::new(fragment, symbol.value.0), 0, 1)
            }
            // The symbol is defined in a section we dropped at ingest time
            // (e.g. a discarded metadata section); treat as undefined rather
            // than panic.
            None => (Desc::Undefined, FragmentRef::null(), 0, 1),
        },
        _ => (Desc::Undefined, FragmentRef::null(), 0, 1),
    };

    let is_absolute = symbol.section_index_where_symbol_is_defined == ElfSectionIndex::Absolute;

    let info = ResolveInfo {
        name: name.to_string(),
        binding: if is_absolute { Binding::Absolute } else { binding },
        desc,
        visibility: Visibility::Default,
        r#type: convert_symbol_type(symbol.r#type),
        source: Source::Regular,
        flags: Flags { is_symbol: true, ..Default::default() },
        size: symbol.size,
        value,
        common_alignment,
        origin,
        out_symbol: None,
        alias: None,
    };

    if binding == Binding::Local {
        let symbol_id = module.define_symbol(info.clone(), |id| LDSymbol {
            fragment_ref,
            value,
            section_index: None,
            symbol_index: None,
            should_ignore: false,
            info: id,
        });
        module.name_pool.insert_local(info);
        return Ok(Some(symbol_id));
    }

    // Commons get their backing fragment only if they currently are (or
    // would become) the winning definition for this name, so a losing
    // candidate never reserves storage nobody references (§4.1 rule 4).
    if desc == Desc::Common {
        if let Some(incumbent) = module.name_pool.find_info(name) {
            if incumbent.desc == Desc::Common
                && !(symbol.size > incumbent.size
                    || (symbol.size == incumbent.size && common_alignment > incumbent.common_alignment))
            {
                return Ok(incumbent.out_symbol);
            }
        }

        let section_name = format!("COMMON.{name}");
        let section_id = module.add_section(
            origin,
            Section::new(section_name, SectionKind::Common, SectionFlag::Alloc | SectionFlag::Write, origin),
        );
        module.sections[section_id].alignment = common_alignment;
        let fragment_id =
            module.push_fragment(section_id, Fragment::new(FragmentKind::Fill { value: 0, size: symbol.size }, common_alignment, section_id));

        let symbol_id = module.define_symbol(info.clone(), |id| LDSymbol {
            fragment_ref: FragmentRef::new(fragment_id, 0),
            value: 0,
            section_index: None,
            symbol_index: None,
            should_ignore: false,
            info: id,
        });

        let mut candidate = info;
        candidate.out_symbol = Some(symbol_id);
        let resolution = module
            .name_pool
            .insert_non_local(candidate, allow_multiple_definition)
            .map_err(|error| Error::MultipleDefinition(error.to_string()))?;
        let _ = resolution;

        return Ok(module.name_pool.find_symbol(name));
    }

    let symbol_id = module.define_symbol(info.clone(), |id| LDSymbol {
        fragment_ref,
        value,
        section_index: None,
        symbol_index: None,
        should_ignore: false,
        info: id,
    });

    let mut candidate = info;
    candidate.out_symbol = Some(symbol_id);
    module
        .name_pool
        .insert_non_local(candidate, allow_multiple_definition)
        .map_err(|error| Error::MultipleDefinition(error.to_string()))?;

    Ok(module.name_pool.find_symbol(name))
}

fn convert_symbol_type(r#type: ElfSymbolType) -> SymbolType {
    match r#type {
        ElfSymbolType::NoType => SymbolType::NoType,
        ElfSymbolType::Object => SymbolType::Object,
        ElfSymbolType::Function => SymbolType::Function,
        ElfSymbolType::Section => SymbolType::Section,
        ElfSymbolType::File => SymbolType::File,
        _ => SymbolType::NoType,
    }
}

impl std::fmt::Display for crate::resolve::MultipleDefinition {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "`{}` is defined more than once (first in {:?}, again in {:?})",
            self.name, self.first, self.second
        )
    }
}
