/* src/server/core/rust-macros/src/lib.rs */

mod server_fn;

use proc_macro::TokenStream;

/// Turn `async fn name(ctx: ServerFnCtx) -> Result<Value, ServerFnError>`
/// into a `name_server_fn()` factory returning a `ServerFnDef`.
///
/// Arguments: `name = "..."` (defaults to the function name), `id = "..."`
/// (defaults to the name), `method = "GET" | "POST"` (defaults to POST).
#[proc_macro_attribute]
pub fn server_fn(attr: TokenStream, item: TokenStream) -> TokenStream {
  let attr = proc_macro2::TokenStream::from(attr);
  let item = syn::parse_macro_input!(item as syn::ItemFn);
  match server_fn::expand(attr, item) {
    Ok(tokens) => tokens.into(),
    Err(e) => e.to_compile_error().into(),
  }
}
