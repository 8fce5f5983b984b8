/* demo/backend/rust/src/server_fns/greet.rs */

use trellis_server::{ServerFnCtx, ServerFnError, Value, server_fn};

#[server_fn(name = "greet")]
pub async fn greet(ctx: ServerFnCtx) -> Result<Value, ServerFnError> {
  let name = ctx.data.get("name").and_then(Value::as_str).unwrap_or("stranger");
  let greeting = match ctx.context.get("requestId").and_then(Value::as_str) {
    Some(id) => format!("Hello, {name}! (request {id})"),
    None => format!("Hello, {name}!"),
  };
  Ok(Value::from(greeting))
}
