//! Procedural macros used by the `adc16` register definitions.
//!
//! Both macros expand to paths rooted at `crate::`, so they are only meant to be used from
//! inside the `adc16` crate itself.

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    parse,
    parse_macro_input,
    DeriveInput,
};

#[proc_macro_derive(CasperSerde)]
/// Derived on a packed_struct to shim in our serde methods on packed structs
pub fn derive_casper_serde(tokens: TokenStream) -> TokenStream {
    let input = parse_macro_input!(tokens as DeriveInput);
    let block_name = input.ident;
    let generated = quote! {
        impl crate::transport::Serialize for #block_name {
            type Chunk = <Self as packed_struct::PackedStruct>::ByteArray;

            fn serialize(&self) -> Result<Self::Chunk, packed_struct::PackingError> {
                packed_struct::PackedStruct::pack(self)
            }
        }

        impl crate::transport::Deserialize for #block_name {
            type Chunk = <Self as packed_struct::PackedStruct>::ByteArray;

            fn deserialize(chunk: Self::Chunk) -> Result<Self, packed_struct::PackingError> {
                <Self as packed_struct::PackedStruct>::unpack(&chunk)
            }
        }
    };
    TokenStream::from(generated)
}

#[proc_macro_attribute]
/// Attaches a fixed address to a register struct. For controller words this is the byte offset
/// into the controller device, for HMCAD1511 registers it is the 8-bit 3-wire register address.
pub fn address(attr: TokenStream, item: TokenStream) -> TokenStream {
    let num = match parse::<syn::Lit>(attr) {
        Ok(syn::Lit::Int(v)) => v,
        Ok(other) => {
            return syn::Error::new_spanned(other, "The address must be a literal integer")
                .to_compile_error()
                .into()
        }
        Err(e) => return e.to_compile_error().into(),
    };
    // Get the struct name this address is for
    let item = parse_macro_input!(item as DeriveInput);
    let ident = item.ident.clone();

    let generated = quote! {
        impl crate::yellow_blocks::Address for #ident {
            fn addr() -> u8 {
                #num
            }
        }
        #item
    };
    TokenStream::from(generated)
}
