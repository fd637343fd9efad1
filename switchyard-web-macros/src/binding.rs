use crate::utils::{extract_rename, extract_rule_names, option_inner};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields};

/// 按类型名后缀决定聚合在处理器参数中的角色
enum Role {
    Path,
    Query,
    Form,
    Body,
    Plain,
}

impl Role {
    fn of(name: &str) -> Self {
        if name.ends_with("Param") {
            Role::Path
        } else if name.ends_with("Query") {
            Role::Query
        } else if name.ends_with("Form") {
            Role::Form
        } else if name.ends_with("Body") {
            Role::Body
        } else {
            Role::Plain
        }
    }

    fn wrapper(&self) -> Option<TokenStream2> {
        match self {
            Role::Path => Some(quote! { ::switchyard_web::handler::Param }),
            Role::Query => Some(quote! { ::switchyard_web::handler::Query }),
            Role::Form => Some(quote! { ::switchyard_web::handler::Form }),
            Role::Body => Some(quote! { ::switchyard_web::handler::Body }),
            Role::Plain => None,
        }
    }
}

/// 把角色聚合本身变成处理器参数，委托给对应的包装类型
fn input_impl(name: &syn::Ident, wrapper: TokenStream2) -> TokenStream2 {
    quote! {
        impl ::switchyard_web::handler::Input for #name {
            const PHASE: ::switchyard_web::handler::Phase =
                <#wrapper<#name> as ::switchyard_web::handler::Input>::PHASE;

            fn slot(
                injector: &::switchyard_web::handler::RequestInjector,
            ) -> ::std::result::Result<
                ::switchyard_web::descriptor::InputSlot,
                ::switchyard_web::error::DescriptorError,
            > {
                <#wrapper<#name> as ::switchyard_web::handler::Input>::slot(injector)
            }

            fn extract(
                ctx: &mut ::switchyard_web::context::Context,
                injector: &::switchyard_web::handler::RequestInjector,
            ) -> ::std::result::Result<::std::option::Option<Self>, ::switchyard_web::error::Error> {
                <#wrapper<#name> as ::switchyard_web::handler::Input>::extract(ctx, injector)
                    .map(|bound| bound.map(|wrapped| wrapped.0))
            }
        }
    }
}

pub fn derive_binding_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let type_name = name.to_string();
    let role = Role::of(&type_name);

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Binding cannot be derived for generic types",
        ));
    }

    let role_impl = role.wrapper().map(|wrapper| input_impl(name, wrapper));

    // JSON 请求体整体反序列化，不需要逐字段绑定
    if let Role::Body = role {
        return Ok(quote! { #role_impl });
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Binding only supports structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Binding can only be derived for structs",
            ))
        }
    };

    let mut descriptors = Vec::new();
    let mut extractions = Vec::new();

    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let ident_str = ident.to_string();
        let external = extract_rename(&field.attrs)?.unwrap_or_else(|| ident_str.clone());
        let rules = extract_rule_names(&field.attrs)?;
        let ty = &field.ty;
        let optional = option_inner(ty).is_some();

        descriptors.push(quote! {
            ::switchyard_web::binding::FieldBinding {
                name: #external,
                ident: #ident_str,
                kind: <#ty as ::switchyard_web::binding::FieldValue>::KIND,
                optional: #optional,
                rules: &[#(#rules),*],
            }
        });
        extractions.push(quote! {
            #ident: source.field::<#ty>(#external)?,
        });
    }

    Ok(quote! {
        impl ::switchyard_web::binding::Binding for #name {
            const TYPE_NAME: &'static str = #type_name;

            fn fields() -> &'static [::switchyard_web::binding::FieldBinding] {
                const FIELDS: &[::switchyard_web::binding::FieldBinding] = &[#(#descriptors),*];
                FIELDS
            }

            fn bind(
                source: &::switchyard_web::binding::FieldSource<'_>,
            ) -> ::std::result::Result<Self, ::switchyard_web::error::ParseError> {
                Ok(Self {
                    #(#extractions)*
                })
            }
        }

        #role_impl
    })
}
