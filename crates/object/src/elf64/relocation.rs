use std::{marker::PhantomData, num::NonZeroU64, result::Result as StdResult};

use nom::Offset;

use crate::{
    combinators::*, BigEndian, Endianness, Input, LittleEndian, Number, Read, Result, Write,
};

/// One `Elf64_Rela` entry: a relocation with an explicit addend
/// (`SHT_RELA`, the only relocation section type the engine needs to
/// read/write — `SHT_REL` objects are out of scope for the x86_64 target
/// this crate's `Writer` targets).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rela {
    /// Offset, within the target section, the relocation patches.
    pub offset: u64,
    /// Index into the associated symbol table (`sh_link` of the
    /// relocation section) of the symbol this relocation refers to.
    pub symbol: u32,
    /// Relocation type, architecture-specific (e.g. `R_X86_64_*`).
    pub r#type: u32,
    /// The constant addend used to compute the relocated value.
    pub addend: i64,
}

impl Read for Rela {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, (offset, info, addend)) =
            tuple((N::read_u64, N::read_u64, N::read_u64))(input)?;

        Ok((
            input,
            Self { offset, symbol: (info >> 32) as u32, r#type: info as u32, addend: addend as i64 },
        ))
    }
}

impl Write for Rela {
    fn write<N, B>(&self, buffer: &mut B) -> std::io::Result<()>
    where
        N: Number,
        B: std::io::Write,
    {
        let info = (u64::from(self.symbol) << 32) | u64::from(self.r#type);

        buffer.write_all(&N::write_u64(self.offset))?;
        buffer.write_all(&N::write_u64(info))?;
        buffer.write_all(&N::write_u64(self.addend as u64))
    }
}

/// An iterator producing [`Rela`] entries out of a `SHT_RELA` section's raw
/// bytes, mirroring [`super::SymbolIterator`]'s shape.
pub struct RelaIterator<'a, E>
where
    E: ParseError<Input<'a>>,
{
    input: Input<'a>,
    endianness: Endianness,
    entity_size: Option<NonZeroU64>,
    _phantom: PhantomData<E>,
}

impl<'a, E> RelaIterator<'a, E>
where
    E: ParseError<Input<'a>>,
{
    pub(super) fn new(
        input: Input<'a>,
        endianness: Endianness,
        entity_size: Option<NonZeroU64>,
    ) -> Self {
        Self { input, endianness, entity_size, _phantom: PhantomData }
    }
}

impl<'a, E> Iterator for RelaIterator<'a, E>
where
    E: ParseError<Input<'a>>,
{
    type Item = StdResult<Rela, Err<E>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.input.is_empty() {
            return None;
        }

        let read = match self.endianness {
            Endianness::Big => Rela::read::<BigEndian, E>(self.input),
            Endianness::Little => Rela::read::<LittleEndian, E>(self.input),
        };

        match read {
            Ok((next_input, rela)) => {
                if let Some(entity_size) = self.entity_size {
                    let offset = self.input.offset(next_input);
                    let entity_size: usize = entity_size
                        .get()
                        .try_into()
                        .expect("Failed to cast the entity size from `u64` to `usize`");

                    if offset != entity_size {
                        return Some(Err(Err::Error(E::from_error_kind(
                            self.input,
                            ErrorKind::LengthValue,
                        ))));
                    }
                }

                self.input = next_input;

                Some(Ok(rela))
            }

            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_one_rela_entry() {
        #[rustfmt::skip]
        let input: &[u8] = &[
            // r_offset.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00,
            // r_info: symbol 1, type 2.
            0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02,
            // r_addend: -4.
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfc,
        ];

        let (rest, rela) = Rela::read::<BigEndian, ()>(input).unwrap();
        assert!(rest.is_empty());
        assert_eq!(rela, Rela { offset: 0x1000, symbol: 1, r#type: 2, addend: -4 });
    }

    #[test]
    fn iterates_multiple_entries() {
        let mut bytes = Vec::new();
        let one = Rela { offset: 0, symbol: 1, r#type: 2, addend: 0 };
        let two = Rela { offset: 8, symbol: 3, r#type: 4, addend: -1 };
        one.write::<BigEndian, _>(&mut bytes).unwrap();
        two.write::<BigEndian, _>(&mut bytes).unwrap();

        let mut iterator = RelaIterator::<()>::new(&bytes, Endianness::Big, None);
        assert_eq!(iterator.next(), Some(Ok(one)));
        assert_eq!(iterator.next(), Some(Ok(two)));
        assert_eq!(iterator.next(), None);
    }
}
