/* src/server/core/rust-macros/src/server_fn.rs */

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::parse::{Parse, ParseStream};
use syn::{FnArg, ItemFn, LitStr, Pat, ReturnType, Token};

#[derive(Default)]
pub(crate) struct ServerFnAttr {
  pub name: Option<String>,
  pub id: Option<String>,
  pub method: Option<LitStr>,
}

impl Parse for ServerFnAttr {
  fn parse(input: ParseStream) -> syn::Result<Self> {
    let mut attr = ServerFnAttr::default();

    while !input.is_empty() {
      let ident: syn::Ident = input.parse()?;
      input.parse::<Token![=]>()?;
      let lit: LitStr = input.parse()?;
      if ident == "name" {
        attr.name = Some(lit.value());
      } else if ident == "id" {
        attr.id = Some(lit.value());
      } else if ident == "method" {
        attr.method = Some(lit);
      } else {
        return Err(syn::Error::new_spanned(ident, "expected `name`, `id` or `method`"));
      }
      // consume optional trailing comma
      let _ = input.parse::<Token![,]>();
    }

    Ok(attr)
  }
}

fn method_tokens(method: Option<&LitStr>) -> syn::Result<TokenStream> {
  let Some(lit) = method else {
    return Ok(quote! { trellis_server::Method::Post });
  };
  match lit.value().to_ascii_uppercase().as_str() {
    "GET" => Ok(quote! { trellis_server::Method::Get }),
    "POST" => Ok(quote! { trellis_server::Method::Post }),
    _ => Err(syn::Error::new_spanned(lit, "method must be \"GET\" or \"POST\"")),
  }
}

fn check_signature(item: &ItemFn) -> syn::Result<()> {
  if item.sig.asyncness.is_none() {
    return Err(syn::Error::new_spanned(&item.sig.fn_token, "server functions must be async"));
  }
  if item.sig.inputs.len() != 1 {
    return Err(syn::Error::new_spanned(&item.sig.inputs, "server functions take exactly one `ServerFnCtx`"));
  }
  match &item.sig.inputs[0] {
    FnArg::Typed(pat_type) if matches!(&*pat_type.pat, Pat::Ident(_) | Pat::Wild(_)) => {}
    FnArg::Typed(pat_type) => {
      return Err(syn::Error::new_spanned(&pat_type.pat, "expected a simple identifier pattern"));
    }
    arg @ FnArg::Receiver(_) => return Err(syn::Error::new_spanned(arg, "server functions cannot take self")),
  }
  if let ReturnType::Default = item.sig.output {
    return Err(syn::Error::new_spanned(&item.sig, "server functions must return Result<Value, ServerFnError>"));
  }
  Ok(())
}

pub fn expand(attr: TokenStream, item: ItemFn) -> syn::Result<TokenStream> {
  let attr: ServerFnAttr = syn::parse2(attr)?;
  check_signature(&item)?;

  let fn_name = &item.sig.ident;
  let vis = &item.vis;
  let factory_name = format_ident!("{}_server_fn", fn_name);
  let name_str = attr.name.unwrap_or_else(|| fn_name.to_string());
  let method = method_tokens(attr.method.as_ref())?;
  let with_id = attr.id.map(|id| quote! { .with_id(#id) });

  Ok(quote! {
    #item

    #vis fn #factory_name() -> trellis_server::ServerFnDef {
      trellis_server::ServerFnDef::new(#name_str, #method, #fn_name) #with_id
    }
  })
}
