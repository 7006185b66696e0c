use proc_macro::TokenStream;
use quote::quote;
use syn::{parse, parse_macro_input, DeriveInput};

#[proc_macro_derive(RegisterWord)]
/// Derived on a 4 byte packed_struct so it can be read from and written to a 32-bit register
pub fn derive_register_word(tokens: TokenStream) -> TokenStream {
    let input = parse_macro_input!(tokens as DeriveInput);
    let reg_name = input.ident;
    let generated = quote! {
        impl crate::transport::RegisterWord for #reg_name {
            fn from_word(word: u32) -> crate::error::Result<Self> {
                Ok(<Self as ::packed_struct::PackedStruct>::unpack(&word.to_be_bytes())?)
            }

            fn to_word(&self) -> crate::error::Result<u32> {
                Ok(u32::from_be_bytes(<Self as ::packed_struct::PackedStruct>::pack(self)?))
            }
        }
    };
    TokenStream::from(generated)
}

#[proc_macro_attribute]
/// Attach the byte offset of a register inside a channel's register block
pub fn register(attr: TokenStream, item: TokenStream) -> TokenStream {
    let offset = match parse::<syn::Lit>(attr).expect("Error parsing attribute") {
        syn::Lit::Int(v) => v,
        _ => panic!("The register offset must be a literal integer"),
    };
    let item = parse_macro_input!(item as DeriveInput);
    let ident = item.clone().ident;

    let generated = quote! {
        impl crate::registers::ChannelRegister for #ident {
            const OFFSET: u32 = #offset;
        }
        #item
    };
    TokenStream::from(generated)
}
