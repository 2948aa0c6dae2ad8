//! Procedural macros for glucofit
//!
//! This crate provides a derive macro for flat, named parameter structs:
//!
//! - `#[derive(Params)]` - Named access, flattening to and from `&[f64]`
//!
//! # Example
//!
//! ```ignore
//! use glucofit::Params;
//!
//! #[derive(Params)]
//! struct Absorption {
//!     k_base_raw: f64,
//!     su_raw: f64,
//! }
//!
//! assert_eq!(Absorption::field_names(), &["k_base_raw", "su_raw"]);
//! let p = Absorption::from_slice(&[0.0, 0.1]);
//! assert_eq!(p.to_vec(), vec![0.0, 0.1]);
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields};

/// Derive macro for parameter structs whose fields are all `f64`.
///
/// Generates:
/// - `Params` trait implementation (field order is the flattening order)
/// - `From<&[f64]>` implementation (using field order)
#[proc_macro_derive(Params)]
pub fn derive_params(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => panic!("Params can only be derived for structs with named fields"),
        },
        _ => panic!("Params can only be derived for structs"),
    };

    let field_names: Vec<_> = fields.iter().map(|f| f.ident.as_ref().unwrap()).collect();
    let field_strings: Vec<_> = field_names.iter().map(|n| n.to_string()).collect();
    let field_indices: Vec<_> = (0..field_names.len()).collect();
    let num_fields = field_names.len();

    let expanded = quote! {
        impl glucofit::Params for #name {
            fn field_names() -> &'static [&'static str] {
                &[#(#field_strings),*]
            }

            fn num_params() -> usize {
                #num_fields
            }

            fn from_slice(values: &[f64]) -> Self {
                assert_eq!(values.len(), #num_fields,
                    "Expected {} parameters, got {}", #num_fields, values.len());
                Self {
                    #(#field_names: values[#field_indices]),*
                }
            }

            fn to_vec(&self) -> Vec<f64> {
                vec![#(self.#field_names),*]
            }
        }

        impl From<&[f64]> for #name {
            fn from(slice: &[f64]) -> Self {
                <#name as glucofit::Params>::from_slice(slice)
            }
        }
    };

    TokenStream::from(expanded)
}
