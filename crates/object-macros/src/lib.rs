use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DataEnum, DeriveInput, Generics, Ident};

/// Derives `read`/`write` inherent methods for `repr`-based enums, reading
/// and writing the enum's discriminant through a [`Number`][crate::Number]
/// implementation.
#[proc_macro_derive(ReadWrite)]
pub fn derive_read_write(input: TokenStream) -> TokenStream {
    let derive_input = parse_macro_input!(input as DeriveInput);

    match derive_input.data {
        Data::Enum(ref enum_data) => derive_enum_read_write_impl(
            &derive_input.ident,
            enum_data,
            &derive_input.generics,
            fetch_repr(&derive_input.attrs),
        ),
        Data::Struct(_) | Data::Union(_) => {
            panic!("`ReadWrite` cannot be derived onto `struct` or `union`")
        }
    }
}

fn derive_enum_read_write_impl(
    enum_name: &Ident,
    data: &DataEnum,
    generics: &Generics,
    repr: Option<Ident>,
) -> TokenStream {
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let repr = repr.expect("A `#repr(…)` attribute must be present");
    let (read_combinator, write_combinator) = match repr.to_string().as_str() {
        "u8" => ("read_u8", "write_u8"),
        "u16" => ("read_u16", "write_u16"),
        "u32" => ("read_u32", "write_u32"),
        repr => panic!("`ReadWrite` does not handle the `{repr}` representation yet"),
    };
    let read_combinator = proc_macro2::Ident::new(read_combinator, proc_macro2::Span::call_site());
    let write_combinator =
        proc_macro2::Ident::new(write_combinator, proc_macro2::Span::call_site());

    let mut read_arms = Vec::new();
    let mut write_arms = Vec::new();
    let mut variants = Vec::new();

    for variant in &data.variants {
        let name = &variant.ident;
        let discriminant = match &variant.discriminant {
            Some((_, syn::Expr::Lit(syn::ExprLit { lit: syn::Lit::Int(int), .. }))) => int,
            _ => panic!("All variants must have a discriminant, and it must represent an integer"),
        };

        read_arms.push(quote! { #discriminant => Self::#name });
        write_arms.push(quote! { Self::#name => #discriminant });
        variants.push(quote! { #name });
    }

    let test_name = proc_macro2::Ident::new(
        &format!("test_{}", enum_name.to_string().to_lowercase()),
        proc_macro2::Span::call_site(),
    );

    quote! {
        impl #impl_generics #enum_name #ty_generics
        #where_clause
        {
            pub fn read<'a, N, E>(input: crate::Input<'a>) -> crate::Result<'a, Self, E>
            where
                N: crate::Number,
                E: ::nom::error::ParseError<crate::Input<'a>>,
            {
                let (input, discriminant) = N::#read_combinator(input)?;

                Ok((
                    input,
                    match discriminant {
                        #( #read_arms, )*
                        _ => return Err(::nom::Err::Error(E::from_error_kind(input, ::nom::error::ErrorKind::Alt))),
                    }
                ))
            }

            pub fn write<N, B>(&self, buffer: &mut B) -> ::std::io::Result<()>
            where
                N: crate::Number,
                B: ::std::io::Write,
            {
                let discriminant: #repr = match self {
                    #( #write_arms, )*
                };

                buffer.write_all(&N::#write_combinator(discriminant))
            }
        }

        #[test]
        fn #test_name() {
            #(
                {
                    let input: #repr = #enum_name::#variants as _;

                    assert_eq!(
                        #enum_name::read::<crate::LittleEndian, ()>(&input.to_le_bytes()[..]),
                        Ok((&[] as &[u8], #enum_name::#variants))
                    );
                    assert_eq!(
                        #enum_name::read::<crate::BigEndian, ()>(&input.to_be_bytes()[..]),
                        Ok((&[] as &[u8], #enum_name::#variants))
                    );

                    let mut little_endian_buffer = Vec::new();
                    #enum_name::#variants.write::<crate::LittleEndian, _>(&mut little_endian_buffer).unwrap();
                    assert_eq!(little_endian_buffer, input.to_le_bytes());

                    let mut big_endian_buffer = Vec::new();
                    #enum_name::#variants.write::<crate::BigEndian, _>(&mut big_endian_buffer).unwrap();
                    assert_eq!(big_endian_buffer, input.to_be_bytes());
                }
            )*
        }
    }
    .into()
}

fn fetch_repr(attrs: &[Attribute]) -> Option<Ident> {
    attrs.iter().find_map(|attr| {
        if !attr.path().is_ident("repr") {
            return None;
        }

        attr.parse_args::<Ident>().ok()
    })
}
