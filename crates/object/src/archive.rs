//! System V (`ar`) archive format, with the BSD and GNU extended-name
//! variants, and thin archives.
//!
//! An archive is a global magic (`!<arch>\n` for a regular archive,
//! `!<thin>\n` for a thin archive), followed by a sequence of members. Each
//! member starts with a fixed 60-byte ASCII header, followed by its data
//! padded to an even number of bytes.

use std::fmt;

use bstr::ByteSlice;

/// Magic bytes at the start of a regular archive.
pub const MAGIC: &[u8; 8] = b"!<arch>\n";

/// Magic bytes at the start of a thin archive (GNU extension): members are
/// not embedded, they are external files named by the member header.
pub const THIN_MAGIC: &[u8; 8] = b"!<thin>\n";

const HEADER_LEN: usize = 60;
const HEADER_TERMINATOR: &[u8; 2] = b"`\n";

/// GNU extended filename table member name.
const GNU_NAME_TABLE: &[u8] = b"//";
/// GNU 32-bit symbol table (archive map) member name.
const GNU_SYMBOL_TABLE_32: &[u8] = b"/";
/// GNU 64-bit symbol table (archive map) member name, used once the archive
/// no longer fits 32-bit member offsets.
const GNU_SYMBOL_TABLE_64: &[u8] = b"/SYM64/";

/// Errors produced while parsing an archive.
#[derive(Debug)]
pub enum Error {
    /// The file doesn't start with `!<arch>\n` or `!<thin>\n`.
    BadMagic,
    /// A member header is truncated or doesn't end in the expected
    /// `` `\n `` terminator.
    BadHeader,
    /// A member header's numeric field (size, timestamp, …) isn't valid
    /// ASCII decimal.
    BadHeaderField(&'static str),
    /// A member's declared size runs past the end of the file.
    TruncatedMember,
    /// A GNU extended name offset points outside the name table.
    BadExtendedName,
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadMagic => write!(formatter, "not an archive (bad magic)"),
            Self::BadHeader => write!(formatter, "malformed archive member header"),
            Self::BadHeaderField(field) => write!(formatter, "malformed `{field}` header field"),
            Self::TruncatedMember => write!(formatter, "archive member data runs past end of file"),
            Self::BadExtendedName => write!(formatter, "extended filename offset out of range"),
        }
    }
}

impl std::error::Error for Error {}

/// Whether an archive is regular (members embedded) or thin (members are
/// external paths).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Regular archive: member data is embedded after its header.
    Regular,
    /// Thin archive: the member header's `data` is the path, relative to the
    /// archive, of an external file.
    Thin,
}

/// One entry in the archive's symbol index (the "armap"): a symbol name and
/// the byte offset, from the start of the archive, of the member header that
/// defines it.
#[derive(Debug, Clone)]
pub struct ArmapEntry<'a> {
    /// The symbol name, as found in the armap.
    pub name: &'a [u8],
    /// Offset of the defining member's header, from the start of the file.
    pub member_offset: u64,
}

/// One member of an archive: a name and its data (embedded, or read from an
/// external file for a thin archive).
#[derive(Debug, Clone)]
pub struct Member<'a> {
    /// The member's name, after extended-name-table resolution.
    pub name: &'a [u8],
    /// Byte offset of this member's header from the start of the archive.
    /// Armap entries reference members by this offset.
    pub header_offset: u64,
    /// The member's data. For a thin archive this is empty: resolve `name`
    /// to an external path instead.
    pub data: &'a [u8],
}

/// A parsed archive: its kind, optional armap, and members in file order.
#[derive(Debug, Clone)]
pub struct Archive<'a> {
    /// Regular or thin.
    pub kind: Kind,
    /// The symbol index, if the archive carries one. `ar` always writes one
    /// for a linker-usable archive; absence means "treat as whole-archive".
    pub armap: Vec<ArmapEntry<'a>>,
    /// Members, in file order, excluding the special `//` and `/`/`/SYM64/`
    /// bookkeeping members.
    pub members: Vec<Member<'a>>,
}

impl<'a> Archive<'a> {
    /// Parse an archive from its raw bytes.
    pub fn parse(input: &'a [u8]) -> Result<Self, Error> {
        let (kind, mut cursor) = if input.starts_with(MAGIC) {
            (Kind::Regular, MAGIC.len())
        } else if input.starts_with(THIN_MAGIC) {
            (Kind::Thin, THIN_MAGIC.len())
        } else {
            return Err(Error::BadMagic);
        };

        let mut armap = Vec::new();
        let mut name_table: &[u8] = &[];
        let mut members = Vec::new();

        while cursor < input.len() {
            // Members are 2-byte aligned; a lone padding byte between two
            // members is skipped.
            if cursor % 2 != 0 {
                cursor += 1;
                continue;
            }

            if input.len() - cursor < HEADER_LEN {
                break;
            }

            let header_offset = cursor as u64;
            let header = &input[cursor..cursor + HEADER_LEN];

            if &header[58..60] != HEADER_TERMINATOR {
                return Err(Error::BadHeader);
            }

            let raw_name = trim_field(&header[0..16]);
            let size = parse_decimal(trim_field(&header[48..58]), "size")? as usize;

            let data_offset = cursor + HEADER_LEN;
            if data_offset + size > input.len() {
                return Err(Error::TruncatedMember);
            }
            let data = &input[data_offset..data_offset + size];

            if raw_name == GNU_SYMBOL_TABLE_32 || raw_name == GNU_SYMBOL_TABLE_64 {
                armap = parse_armap(data, raw_name == GNU_SYMBOL_TABLE_64)?;
            } else if raw_name == GNU_NAME_TABLE {
                name_table = data;
            } else {
                let name = resolve_name(raw_name, name_table)?;
                members.push(Member { name, header_offset, data });
            }

            cursor = data_offset + size;
        }

        Ok(Self { kind, armap, members })
    }

    /// Look up a member by the header offset an [`ArmapEntry`] points to.
    pub fn member_at(&self, header_offset: u64) -> Option<&Member<'a>> {
        self.members.iter().find(|member| member.header_offset == header_offset)
    }
}

/// BSD extended name (`#1/<len>`): the real name is the first `len` bytes of
/// the member's data, and the member's actual content follows.
fn resolve_name<'a>(raw_name: &'a [u8], gnu_name_table: &'a [u8]) -> Result<&'a [u8], Error> {
    if let Some(offset) = raw_name.strip_prefix(b"/") {
        if offset.is_empty() || !offset.iter().all(u8::is_ascii_digit) {
            // A plain short name such as `foo.o/` (GNU terminator) or `foo.o`.
            return Ok(raw_name.strip_suffix(b"/").unwrap_or(raw_name));
        }

        let offset: usize =
            std::str::from_utf8(offset).ok().and_then(|s| s.parse().ok()).ok_or(Error::BadExtendedName)?;

        let rest = gnu_name_table.get(offset..).ok_or(Error::BadExtendedName)?;
        let end = rest.find_byte(b'\n').unwrap_or(rest.len());
        let name = &rest[..end];

        Ok(name.strip_suffix(b"/").unwrap_or(name))
    } else {
        Ok(raw_name.strip_suffix(b"/").unwrap_or(raw_name))
    }
}

fn parse_armap(data: &[u8], is_64_bit: bool) -> Result<Vec<ArmapEntry<'_>>, Error> {
    if is_64_bit {
        if data.len() < 8 {
            return Err(Error::BadHeaderField("armap count"));
        }
        let count = u64::from_be_bytes(data[0..8].try_into().unwrap()) as usize;
        let offsets_end = 8 + count * 8;
        let offsets = data.get(8..offsets_end).ok_or(Error::BadHeaderField("armap offsets"))?;
        let names = &data[offsets_end..];

        read_armap_entries(offsets.chunks_exact(8).map(|chunk| {
            u64::from_be_bytes(chunk.try_into().unwrap())
        }), names)
    } else {
        if data.len() < 4 {
            return Err(Error::BadHeaderField("armap count"));
        }
        let count = u32::from_be_bytes(data[0..4].try_into().unwrap()) as usize;
        let offsets_end = 4 + count * 4;
        let offsets = data.get(4..offsets_end).ok_or(Error::BadHeaderField("armap offsets"))?;
        let names = &data[offsets_end..];

        read_armap_entries(offsets.chunks_exact(4).map(|chunk| {
            u32::from_be_bytes(chunk.try_into().unwrap()) as u64
        }), names)
    }
}

fn read_armap_entries(
    offsets: impl Iterator<Item = u64>,
    names: &[u8],
) -> Result<Vec<ArmapEntry<'_>>, Error> {
    let mut entries = Vec::new();
    let mut cursor = 0usize;

    for member_offset in offsets {
        let rest = names.get(cursor..).ok_or(Error::BadHeaderField("armap names"))?;
        let end = rest.find_byte(b'\0').unwrap_or(rest.len());
        entries.push(ArmapEntry { name: &rest[..end], member_offset });
        cursor += end + 1;
    }

    Ok(entries)
}

fn trim_field(field: &[u8]) -> &[u8] {
    let field = field.trim_end_with(|c| c == ' ');
    field
}

fn parse_decimal(field: &[u8], name: &'static str) -> Result<u64, Error> {
    let field = field.trim_with(|c| c == ' ');
    if field.is_empty() {
        return Ok(0);
    }
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(Error::BadHeaderField(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member_header(name: &str, size: usize) -> Vec<u8> {
        let mut header = vec![b' '; HEADER_LEN];
        header[0..name.len()].copy_from_slice(name.as_bytes());
        let size_field = size.to_string();
        header[48..48 + size_field.len()].copy_from_slice(size_field.as_bytes());
        header[58] = b'`';
        header[59] = b'\n';
        header
    }

    fn pad(mut data: Vec<u8>) -> Vec<u8> {
        if data.len() % 2 != 0 {
            data.push(b'\n');
        }
        data
    }

    #[test]
    fn parses_a_minimal_archive_with_one_member() {
        let mut archive = MAGIC.to_vec();
        archive.extend(member_header("foo.o/", 4));
        archive.extend(pad(vec![1, 2, 3, 4]));

        let parsed = Archive::parse(&archive).unwrap();
        assert_eq!(parsed.kind, Kind::Regular);
        assert_eq!(parsed.members.len(), 1);
        assert_eq!(parsed.members[0].name, b"foo.o");
        assert_eq!(parsed.members[0].data, &[1, 2, 3, 4]);
    }

    #[test]
    fn resolves_gnu_extended_names() {
        let mut archive = MAGIC.to_vec();

        let name_table = b"a_very_long_member_name.o/\n".to_vec();
        archive.extend(member_header(GNU_NAME_TABLE.to_str().unwrap(), name_table.len()));
        archive.extend(pad(name_table));

        archive.extend(member_header("/0", 2));
        archive.extend(pad(vec![0xAB, 0xCD]));

        let parsed = Archive::parse(&archive).unwrap();
        assert_eq!(parsed.members.len(), 1);
        assert_eq!(parsed.members[0].name, b"a_very_long_member_name.o");
    }

    #[test]
    fn parses_a_32_bit_armap() {
        let mut archive = MAGIC.to_vec();

        let mut armap_data = Vec::new();
        armap_data.extend(2u32.to_be_bytes());
        armap_data.extend(0u32.to_be_bytes());
        armap_data.extend(0u32.to_be_bytes());
        armap_data.extend(b"foo\0bar\0");

        archive.extend(member_header("/", armap_data.len()));
        archive.extend(pad(armap_data));

        archive.extend(member_header("foo.o/", 1));
        archive.extend(pad(vec![0]));

        let parsed = Archive::parse(&archive).unwrap();
        assert_eq!(parsed.armap.len(), 2);
        assert_eq!(parsed.armap[0].name, b"foo");
        assert_eq!(parsed.armap[1].name, b"bar");

        let member = parsed.member_at(parsed.armap[0].member_offset).unwrap();
        assert_eq!(member.name, b"foo.o");
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(matches!(Archive::parse(b"not an archive"), Err(Error::BadMagic)));
    }
}
