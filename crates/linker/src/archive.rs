//! Archive Parser (§4.2): decides which members of an archive get pulled
//! into the link.
//!
//! Byte-level parsing (the `!<arch>\n` container, the armap, extended
//! names) lives in [`ferrum_object::archive`]; this module is the iterative
//! pull algorithm that decides, given the current state of the
//! [`NamePool`], which members still need to be read.

use std::collections::HashSet;

use ferrum_object::archive::Archive as RawArchive;

use crate::resolve::{Desc, NamePool};

/// One decision the pull loop made about an armap entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullDecision {
    /// The member resolves a currently-undefined (or common-referenced)
    /// symbol and should be read.
    Pull,
    /// Nothing currently needs this member.
    Skip,
}

/// Run the classical iterative pull (§4.2): scan the armap; for every
/// symbol it defines, check whether the current incumbent in `name_pool` is
/// undefined (or common, when the armap symbol is itself a common
/// definition) and the member hasn't been pulled yet; queue it if so.
/// Repeat until a full pass queues nothing new.
///
/// `wrapped` lists symbols under `--wrap=SYM`: while a wrap is active for
/// `S`, members are only pulled for `S` when `__real_S` is still undefined
/// (§4.2 edge case).
///
/// Returns the header offsets of members to read, in the order they were
/// queued, and the number of passes performed.
pub fn plan_pull(
    archive: &RawArchive,
    name_pool: &NamePool,
    already_pulled: &HashSet<u64>,
    wrapped: &HashSet<&str>,
) -> (Vec<u64>, usize) {
    let mut pulled = already_pulled.clone();
    let mut queue = Vec::new();
    let mut passes = 0;

    loop {
        passes += 1;
        let mut queued_this_pass = false;

        for entry in &archive.armap {
            if pulled.contains(&entry.member_offset) {
                continue;
            }

            let name = String::from_utf8_lossy(entry.name);
            let lookup_name = if wrapped.contains(name.as_ref()) {
                // §4.2: pull for the real symbol, not the wrapped alias,
                // since `__wrap_S` (not `S`) is what the relocator will
                // actually bind references to.
                format!("__real_{name}")
            } else {
                name.to_string()
            };

            let decision = match name_pool.find_info(&lookup_name) {
                None => PullDecision::Skip,
                Some(incumbent) => match incumbent.desc {
                    Desc::Undefined => PullDecision::Pull,
                    Desc::Common => PullDecision::Pull,
                    Desc::Defined => PullDecision::Skip,
                },
            };

            if decision == PullDecision::Pull {
                pulled.insert(entry.member_offset);
                queue.push(entry.member_offset);
                queued_this_pass = true;
            }
        }

        if !queued_this_pass {
            break;
        }
    }

    (queue, passes)
}

/// Detect repeated members (same content hash), warned when the
/// `archive-file` warning class is enabled (§4.2 edge case).
pub fn repeated_members(archive: &RawArchive) -> Vec<(&[u8], &[u8])> {
    let mut seen: std::collections::HashMap<u64, &[u8]> = std::collections::HashMap::new();
    let mut repeats = Vec::new();

    for member in &archive.members {
        let hash = content_hash(member.data);
        if let Some(&first_name) = seen.get(&hash) {
            repeats.push((first_name, member.name));
        } else {
            seen.insert(hash, member.name);
        }
    }

    repeats
}

fn content_hash(bytes: &[u8]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ids::Arena,
        input::InputFile,
        resolve::{Binding, Flags, ResolveInfo, SymbolType, Source, Visibility},
    };

    fn undefined(name: &str, origin: crate::ids::InputId) -> ResolveInfo {
        ResolveInfo {
            name: name.to_string(),
            binding: Binding::Global,
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
        }
    }

    #[test]
    fn pulls_members_that_resolve_undefined_symbols() {
        let mut archive_bytes = ferrum_object::archive::MAGIC.to_vec();

        let mut armap = Vec::new();
        armap.extend(1u32.to_be_bytes());
        armap.extend(0u32.to_be_bytes());
        armap.extend(b"foo\0");

        let mut header = vec![b' '; 60];
        header[0..1].copy_from_slice(b"/");
        let size = armap.len().to_string();
        header[48..48 + size.len()].copy_from_slice(size.as_bytes());
        header[58] = b'`';
        header[59] = b'\n';
        archive_bytes.extend(header);
        archive_bytes.extend(&armap);
        if armap.len() % 2 != 0 {
            archive_bytes.push(b'\n');
        }

        let mut member_header = vec![b' '; 60];
        member_header[0..6].copy_from_slice(b"foo.o/");
        member_header[48..49].copy_from_slice(b"1");
        member_header[58] = b'`';
        member_header[59] = b'\n';
        archive_bytes.extend(member_header);
        archive_bytes.extend([0u8]);
        archive_bytes.push(b'\n');

        let archive = RawArchive::parse(&archive_bytes).unwrap();

        let mut inputs: Arena<InputFile> = Arena::new();
        let origin = inputs.alloc(InputFile::Internal);
        let mut pool = NamePool::new(false);
        pool.insert_non_local(undefined("foo", origin), false).unwrap();

        let (queue, passes) = plan_pull(&archive, &pool, &HashSet::new(), &HashSet::new());
        assert_eq!(queue.len(), 1);
        assert_eq!(passes, 1);
    }

    #[test]
    fn pull_is_idempotent_once_symbol_is_defined() {
        let mut inputs: Arena<InputFile> = Arena::new();
        let origin = inputs.alloc(InputFile::Internal);
        let mut pool = NamePool::new(false);
        let mut defined = undefined("foo", origin);
        defined.desc = Desc::Defined;
        pool.insert_non_local(defined, false).unwrap();

        let archive = RawArchive { kind: ferrum_object::archive::Kind::Regular, armap: Vec::new(), members: Vec::new() };
        let (queue, _) = plan_pull(&archive, &pool, &HashSet::new(), &HashSet::new());
        assert!(queue.is_empty());
    }
}
