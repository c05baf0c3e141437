use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Expr, ExprLit, Fields, Ident, Lit, Meta, Type};

use crate::types::{is_byte, is_sequence};

/// One struct member as seen by `#[derive(Record)]`.
struct Member<'a> {
    ident: &'a Ident,
    ty: &'a Type,
    tag: Option<String>,
    flatten: bool,
}

/// Expands the `#[derive(Record)]` macro.
///
/// Generates:
/// 1. `field_specs`, describing each mapped member in declaration order.
/// 2. `param_at` / `scan_at`, reading and writing members by index path.
/// 3. An `impl ToParam` so the struct can be bound with `?`.
pub fn expand(ast: DeriveInput) -> syn::Result<TokenStream> {
    let name = &ast.ident;

    let members = match &ast.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => fields.named.iter().map(parse_member).collect::<syn::Result<Vec<_>>>()?,
            Fields::Unit => Vec::new(),
            Fields::Unnamed(_) => {
                return Err(syn::Error::new_spanned(name, "Record requires named fields"));
            }
        },
        _ => return Err(syn::Error::new_spanned(name, "Record can only be derived for structs")),
    };

    // Members tagged "-" are not mapped at all.
    let members: Vec<_> = members.into_iter().filter(|m| m.tag.as_deref() != Some("-")).collect();

    let mut specs = Vec::with_capacity(members.len());
    let mut param_arms = Vec::with_capacity(members.len());
    let mut scan_arms = Vec::with_capacity(members.len());

    for (i, member) in members.iter().enumerate() {
        let ident = member.ident;
        let ty = member.ty;
        let member_name = ident.to_string();
        let tag = match &member.tag {
            Some(tag) => quote! { ::std::option::Option::Some(#tag) },
            None => quote! { ::std::option::Option::None },
        };

        if member.flatten {
            specs.push(quote! {
                ::sequel::FieldSpec::embedded(#member_name, #tag, <#ty as ::sequel::Record>::shape)
            });
            param_arms.push(quote! {
                [#i, rest @ ..] => ::sequel::Record::param_at(&self.#ident, rest),
            });
            scan_arms.push(quote! {
                [#i, rest @ ..] => ::sequel::Record::scan_at(&mut self.#ident, rest, value),
            });
        } else if is_sequence(ty) {
            let type_name = quote!(#ty).to_string();
            specs.push(quote! {
                ::sequel::FieldSpec::sequence(#member_name, #tag, #type_name)
            });
        } else {
            specs.push(quote! {
                ::sequel::FieldSpec::column(#member_name, #tag)
            });
            // u8 has no ToParam impl, it would collide with Vec<u8> blobs.
            let param = if is_byte(ty) {
                quote! { ::sequel::byte_param(self.#ident) }
            } else {
                quote! { ::sequel::ToParam::to_param(&self.#ident) }
            };
            param_arms.push(quote! {
                [#i] => ::std::option::Option::Some(#param),
            });
            scan_arms.push(quote! {
                [#i] => {
                    self.#ident = ::sequel::FromValue::from_value(value)?;
                    ::std::result::Result::Ok(())
                }
            });
        }
    }

    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::sequel::Record for #name #ty_generics #where_clause {
            fn field_specs() -> ::std::vec::Vec<::sequel::FieldSpec> {
                ::std::vec![#(#specs),*]
            }

            fn record_shape(&self) -> ::sequel::Shape {
                ::sequel::Shape::of::<Self>()
            }

            fn param_at(&self, path: &[usize]) -> ::std::option::Option<::sequel::Param<'_>> {
                match path {
                    #(#param_arms)*
                    _ => ::std::option::Option::None,
                }
            }

            #[allow(unused_variables)]
            fn scan_at(
                &mut self,
                path: &[usize],
                value: ::sequel::Value,
            ) -> ::std::result::Result<(), ::sequel::DecodeError> {
                match path {
                    #(#scan_arms)*
                    _ => ::std::result::Result::Err(::sequel::DecodeError::new(
                        "a mapped member",
                        ::std::format!("no member of {} at {:?}", ::std::stringify!(#name), path),
                    )),
                }
            }
        }

        impl #impl_generics ::sequel::ToParam for #name #ty_generics #where_clause {
            fn to_param(&self) -> ::sequel::Param<'_> {
                ::sequel::Param::Record(self)
            }
        }
    })
}

fn parse_member(field: &syn::Field) -> syn::Result<Member<'_>> {
    let Some(ident) = field.ident.as_ref() else {
        return Err(syn::Error::new_spanned(field, "Record requires named fields"));
    };
    let mut member = Member { ident, ty: &field.ty, tag: None, flatten: false };

    // Parse attributes #[db = "..."] and #[db(flatten)]
    for attr in &field.attrs {
        if !attr.path().is_ident("db") {
            continue;
        }
        match &attr.meta {
            Meta::NameValue(nv) => match &nv.value {
                Expr::Lit(ExprLit { lit: Lit::Str(tag), .. }) => member.tag = Some(tag.value()),
                other => {
                    return Err(syn::Error::new_spanned(other, "expected a string tag, e.g. #[db = \"name,pk\"]"));
                }
            },
            Meta::List(_) => attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("flatten") {
                    member.flatten = true;
                    Ok(())
                } else {
                    Err(meta.error("unsupported db attribute, expected `flatten`"))
                }
            })?,
            Meta::Path(_) => {
                return Err(syn::Error::new_spanned(attr, "expected #[db = \"...\"] or #[db(flatten)]"));
            }
        }
    }
    Ok(member)
}
