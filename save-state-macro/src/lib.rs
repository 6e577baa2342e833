use proc_macro::TokenStream;
use quote::quote;

/// How a single field takes part in the save state
enum FieldMode {
    Plain,
    /// `#[state(skip)]`: the field is not part of the generated layout
    Skip,
    /// `#[state(width = u32)]`: the integer field is stored with the given width
    Width(syn::Type),
}

fn field_mode(field: &syn::Field) -> syn::Result<FieldMode> {
    let mut mode = FieldMode::Plain;
    for attr in field.attrs.iter().filter(|attr| attr.path.is_ident("state")) {
        mode = attr.parse_args_with(|input: syn::parse::ParseStream<'_>| {
            let key: syn::Ident = input.parse()?;
            if key == "skip" {
                Ok(FieldMode::Skip)
            } else if key == "width" {
                input.parse::<syn::Token![=]>()?;
                Ok(FieldMode::Width(input.parse()?))
            } else {
                Err(syn::Error::new(
                    key.span(),
                    "expected `skip` or `width = <integer type>`",
                ))
            }
        })?;
    }
    Ok(mode)
}

fn field_accessors(
    fields: &syn::Fields,
) -> syn::Result<(Vec<proc_macro2::TokenStream>, Vec<proc_macro2::TokenStream>)> {
    let mut ser = vec![];
    let mut deser = vec![];
    for (i, field) in fields.iter().enumerate() {
        let member = match &field.ident {
            Some(ident) => quote!(#ident),
            None => {
                let index = syn::Index::from(i);
                quote!(#index)
            }
        };
        match field_mode(field)? {
            FieldMode::Skip => (),
            FieldMode::Plain => {
                ser.push(quote! {
                    save_state::InSaveState::serialize(&self.#member, state)
                });
                deser.push(quote! {
                    save_state::InSaveState::deserialize(&mut self.#member, state)?
                });
            }
            FieldMode::Width(ty) => {
                ser.push(quote! {
                    save_state::InSaveState::serialize(&(self.#member as #ty), state)
                });
                deser.push(quote! {{
                    let mut value: #ty = 0;
                    save_state::InSaveState::deserialize(&mut value, state)?;
                    self.#member = value as _;
                }});
            }
        }
    }
    Ok((ser, deser))
}

#[proc_macro_derive(InSaveState, attributes(state))]
pub fn derive_in_save_state(input: TokenStream) -> TokenStream {
    let derive_input = match syn::parse::<syn::DeriveInput>(input) {
        Ok(derive_input) => derive_input,
        Err(err) => return err.to_compile_error().into(),
    };
    let (impl_generics, ty_generics, where_clause) = derive_input.generics.split_for_impl();
    let ty_name = &derive_input.ident;
    let fields = match &derive_input.data {
        syn::Data::Struct(data) => &data.fields,
        _ => {
            let text = format!("expected struct, got `{}`", ty_name);
            return syn::Error::new_spanned(&derive_input, text)
                .into_compile_error()
                .into();
        }
    };
    let (ser, deser) = match field_accessors(fields) {
        Ok(accessors) => accessors,
        Err(err) => return err.into_compile_error().into(),
    };
    quote!(
        impl #impl_generics save_state::InSaveState for #ty_name #ty_generics #where_clause {
            fn serialize(&self, state: &mut save_state::SaveStateSerializer) {
                #(#ser;)*
            }

            fn deserialize(
                &mut self,
                state: &mut save_state::SaveStateDeserializer,
            ) -> Result<(), save_state::Error> {
                #(#deser;)*
                Ok(())
            }
        }
    )
    .into()
}

#[proc_macro_derive(DefaultByNew)]
pub fn derive_default_by_new(input: TokenStream) -> TokenStream {
    let derive_input = match syn::parse::<syn::DeriveInput>(input) {
        Ok(derive_input) => derive_input,
        Err(err) => return err.to_compile_error().into(),
    };
    let (impl_generics, ty_generics, where_clause) = derive_input.generics.split_for_impl();
    let ty_name = &derive_input.ident;
    quote! {
        impl #impl_generics Default for #ty_name #ty_generics #where_clause {
            fn default() -> Self {
                Self::new()
            }
        }
    }
    .into()
}
