use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitStr, Type, parse_macro_input, spanned::Spanned};

/// Implements `memobond::Entity` (and, unless `custom_hooks` is given, an
/// empty `memobond::Hooks`).
///
/// ```ignore
/// #[derive(Serialize, Deserialize, Entity)]
/// #[entity(collection = "accounts")]
/// struct Account {
///     #[db("id,omitempty,pk")]
///     id: i64,
///     name: String,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(entity, db))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_entity(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

struct EntityOptions {
    collection: Option<String>,
    custom_hooks: bool,
}

struct EntityField {
    ident: Ident,
    ty: Type,
    tag: String,
}

impl EntityField {
    fn is_primary_key(&self) -> bool {
        self.tag.split(',').skip(1).any(|option| option.trim() == "pk")
    }
}

fn expand_entity(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.generics,
            "Entity does not support generic structs",
        ));
    }

    let options = parse_entity_options(&input.attrs)?;

    let data_struct = match input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Entity can only be derived for structs",
            ));
        }
    };

    let named_fields = match data_struct.fields {
        Fields::Named(fields) => fields,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Entity requires named fields",
            ));
        }
    };

    let mut fields = Vec::<EntityField>::new();
    for field in named_fields.named {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new(field.span(), "Entity requires named fields"))?;
        let tag = match parse_db_tag(&field.attrs)? {
            Some(tag) => tag,
            None => ident.to_string().trim_start_matches("r#").to_string(),
        };
        fields.push(EntityField {
            ident,
            ty: field.ty,
            tag,
        });
    }

    let keys: Vec<&EntityField> = fields.iter().filter(|f| f.is_primary_key()).collect();
    let key = match keys.as_slice() {
        [key] => *key,
        [] => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Entity requires one field tagged as primary key, e.g. #[db(\"id,omitempty,pk\")]",
            ));
        }
        [_, second, ..] => {
            return Err(syn::Error::new(
                second.ident.span(),
                "Entity allows only one primary key field",
            ));
        }
    };

    let key_ident = &key.ident;
    let key_ty = &key.ty;
    let collection = options
        .collection
        .unwrap_or_else(|| to_snake_case(&struct_name.to_string()));
    let tags = fields.iter().map(|f| f.tag.as_str());

    let hooks_impl = if options.custom_hooks {
        quote!()
    } else {
        quote! {
            impl ::memobond::Hooks for #struct_name {}
        }
    };

    Ok(quote! {
        impl ::memobond::Entity for #struct_name {
            type Id = #key_ty;

            fn collection_name() -> &'static str {
                #collection
            }

            fn columns() -> &'static [&'static str] {
                &[#(#tags),*]
            }

            fn id(&self) -> Self::Id {
                ::core::clone::Clone::clone(&self.#key_ident)
            }

            fn set_id(&mut self, id: Self::Id) {
                self.#key_ident = id;
            }
        }

        #hooks_impl
    })
}

fn parse_entity_options(attrs: &[syn::Attribute]) -> syn::Result<EntityOptions> {
    let mut options = EntityOptions {
        collection: None,
        custom_hooks: false,
    };

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                if lit.value().is_empty() {
                    return Err(meta.error("collection name cannot be empty"));
                }
                options.collection = Some(lit.value());
                return Ok(());
            }

            if meta.path.is_ident("custom_hooks") {
                options.custom_hooks = true;
                return Ok(());
            }

            Err(meta.error(
                "Unsupported entity attribute. Supported: collection = \"...\", custom_hooks",
            ))
        })?;
    }

    Ok(options)
}

fn parse_db_tag(attrs: &[syn::Attribute]) -> syn::Result<Option<String>> {
    let mut tag = None;

    for attr in attrs {
        if !attr.path().is_ident("db") {
            continue;
        }

        if tag.is_some() {
            return Err(syn::Error::new(
                attr.span(),
                "Duplicate #[db(...)] attribute on field",
            ));
        }

        let lit: LitStr = attr.parse_args().map_err(|_| {
            syn::Error::new(
                attr.span(),
                "Expected a tag string, e.g. #[db(\"id,omitempty,pk\")]",
            )
        })?;
        tag = Some(lit.value());
    }

    Ok(tag)
}

fn to_snake_case(value: &str) -> String {
    let mut out = String::new();
    for (i, ch) in value.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
