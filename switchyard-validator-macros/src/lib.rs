use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::{parse_macro_input, Data, DeriveInput, Expr, Field, Fields, LitInt, LitStr, Type};

// 检测类型是否是 Option<T>
fn is_option(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "Option";
        }
    }
    false
}

enum Rule {
    Required,
    NotBlank,
    Alpha,
    Alphanumeric,
    Numeric,
    Email,
    Length { min: Option<usize>, max: Option<usize> },
    Range { min: Option<Expr>, max: Option<Expr> },
    Pattern(String),
}

struct FieldRule {
    rule: Rule,
    message: Option<String>,
}

/// 解析 `(message = "...")` 形式的可选参数
fn parse_message_only(meta: &ParseNestedMeta, message: &mut Option<String>) -> syn::Result<()> {
    if meta.input.peek(syn::token::Paren) {
        meta.parse_nested_meta(|inner| {
            if inner.path.is_ident("message") {
                *message = Some(inner.value()?.parse::<LitStr>()?.value());
                Ok(())
            } else {
                Err(inner.error("expected `message = \"...\"`"))
            }
        })?;
    }
    Ok(())
}

fn parse_field_rules(field: &Field) -> syn::Result<Vec<FieldRule>> {
    let mut rules = Vec::new();

    for attr in field.attrs.iter().filter(|a| a.path().is_ident("validate")) {
        attr.parse_nested_meta(|meta| {
            let Some(ident) = meta.path.get_ident() else {
                return Err(meta.error("expected a validation rule name"));
            };
            let mut message = None;

            let rule = match ident.to_string().as_str() {
                "required" => Rule::Required,
                "not_blank" => Rule::NotBlank,
                "alpha" => Rule::Alpha,
                "alphanumeric" | "alphanum" => Rule::Alphanumeric,
                "numeric" => Rule::Numeric,
                "email" => Rule::Email,
                "length" => {
                    let (mut min, mut max) = (None, None);
                    meta.parse_nested_meta(|inner| {
                        if inner.path.is_ident("min") {
                            min = Some(inner.value()?.parse::<LitInt>()?.base10_parse()?);
                        } else if inner.path.is_ident("max") {
                            max = Some(inner.value()?.parse::<LitInt>()?.base10_parse()?);
                        } else if inner.path.is_ident("message") {
                            message = Some(inner.value()?.parse::<LitStr>()?.value());
                        } else {
                            return Err(inner.error("expected `min`, `max` or `message`"));
                        }
                        Ok(())
                    })?;
                    Rule::Length { min, max }
                }
                "range" => {
                    let (mut min, mut max) = (None, None);
                    meta.parse_nested_meta(|inner| {
                        if inner.path.is_ident("min") {
                            min = Some(inner.value()?.parse::<Expr>()?);
                        } else if inner.path.is_ident("max") {
                            max = Some(inner.value()?.parse::<Expr>()?);
                        } else if inner.path.is_ident("message") {
                            message = Some(inner.value()?.parse::<LitStr>()?.value());
                        } else {
                            return Err(inner.error("expected `min`, `max` or `message`"));
                        }
                        Ok(())
                    })?;
                    Rule::Range { min, max }
                }
                "pattern" => {
                    // pattern = "..." 或 pattern(regex = "...", message = "...")
                    if meta.input.peek(syn::Token![=]) {
                        Rule::Pattern(meta.value()?.parse::<LitStr>()?.value())
                    } else {
                        let mut regex = None;
                        meta.parse_nested_meta(|inner| {
                            if inner.path.is_ident("regex") {
                                regex = Some(inner.value()?.parse::<LitStr>()?.value());
                            } else if inner.path.is_ident("message") {
                                message = Some(inner.value()?.parse::<LitStr>()?.value());
                            } else {
                                return Err(inner.error("expected `regex` or `message`"));
                            }
                            Ok(())
                        })?;
                        Rule::Pattern(regex.ok_or_else(|| meta.error("pattern requires `regex`"))?)
                    }
                }
                other => {
                    return Err(meta.error(format!("unknown validation rule `{}`", other)));
                }
            };

            if !matches!(rule, Rule::Length { .. } | Rule::Range { .. } | Rule::Pattern(_)) {
                parse_message_only(&meta, &mut message)?;
            }

            rules.push(FieldRule { rule, message });
            Ok(())
        })?;
    }

    Ok(rules)
}

fn optional(value: &Option<impl quote::ToTokens>) -> TokenStream2 {
    match value {
        Some(v) => quote! { Some(#v) },
        None => quote! { None },
    }
}

fn expand_rule(field: &Field, rule: &FieldRule) -> TokenStream2 {
    let Some(field_name) = field.ident.as_ref() else {
        return TokenStream2::new();
    };
    let field_name_str = field_name.to_string();
    let message = optional(&rule.message);
    let rules = quote! { ::switchyard_validator::ValidationRules };

    // required 作用在字段本身（Option 检查 is_some），其余规则作用在内部值上
    if let Rule::Required = rule.rule {
        return quote! {
            validator.add_result(#rules::required_with_message(&self.#field_name, #field_name_str, #message));
        };
    }

    let check = |value: TokenStream2| match &rule.rule {
        Rule::Required => TokenStream2::new(),
        Rule::NotBlank => quote! { #rules::not_blank_with_message(#value, #field_name_str, #message) },
        Rule::Alpha => quote! { #rules::alpha_with_message(#value, #field_name_str, #message) },
        Rule::Alphanumeric => {
            quote! { #rules::alphanumeric_with_message(#value, #field_name_str, #message) }
        }
        Rule::Numeric => quote! { #rules::numeric_with_message(#value, #field_name_str, #message) },
        Rule::Email => quote! { #rules::email_with_message(#value, #field_name_str, #message) },
        Rule::Length { min, max } => {
            let (min, max) = (optional(min), optional(max));
            quote! { #rules::length_with_message(#value, #field_name_str, #min, #max, #message) }
        }
        Rule::Range { min, max } => {
            let (min, max) = (optional(min), optional(max));
            quote! { #rules::range_with_message(*#value, #field_name_str, #min, #max, #message) }
        }
        Rule::Pattern(pattern) => quote! {
            {
                static PATTERN: ::switchyard_validator::CompiledPattern =
                    ::switchyard_validator::CompiledPattern::new(#pattern);
                #rules::compiled_pattern_with_message(#value, #field_name_str, &PATTERN, #message)
            }
        },
    };

    if is_option(&field.ty) {
        let call = check(quote! { __val });
        quote! {
            if let Some(__val) = self.#field_name.as_ref() {
                validator.add_result(#call);
            }
        }
    } else {
        let call = check(quote! { &self.#field_name });
        quote! {
            validator.add_result(#call);
        }
    }
}

/// `#[derive(Validate)]`
///
/// 支持的字段规则：`required`、`not_blank`、`alpha`、`alphanumeric`（`alphanum`）、
/// `numeric`、`email`、`length(min = .., max = ..)`、`range(min = .., max = ..)`、
/// `pattern = ".."`，都可以附带 `message = ".."`。
#[proc_macro_derive(Validate, attributes(validate))]
pub fn derive_validate(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => fields.named.iter().collect::<Vec<_>>(),
            Fields::Unit => Vec::new(),
            Fields::Unnamed(_) => {
                return syn::Error::new_spanned(name, "Validate requires named fields")
                    .to_compile_error()
                    .into();
            }
        },
        _ => {
            return syn::Error::new_spanned(name, "Validate can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let mut checks = Vec::new();
    for field in fields {
        match parse_field_rules(field) {
            Ok(rules) => checks.extend(rules.iter().map(|rule| expand_rule(field, rule))),
            Err(e) => return e.to_compile_error().into(),
        }
    }

    let expanded = quote! {
        impl #impl_generics ::switchyard_validator::Validate for #name #ty_generics #where_clause {
            fn validate(&self) -> ::switchyard_validator::ValidationResult<()> {
                #[allow(unused_mut)]
                let mut validator = ::switchyard_validator::ValidatorBuilder::new();
                #(#checks)*
                validator.build()
            }
        }
    };

    TokenStream::from(expanded)
}
