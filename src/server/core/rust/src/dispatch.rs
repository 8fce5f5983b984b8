/* src/server/core/rust/src/dispatch.rs */

use std::sync::Arc;

use crate::errors::StartError;
use crate::middleware::{Stage, StageCtx, StageOutput, Terminal, execute, flatten};
use crate::server::StartParts;
use crate::server_fn::{ServerFnCtx, ServerFnDef};
use crate::transport::{ServerFnRequest, ServerFnResponse, decode_request, encode_outcome};

/// Serve one server-function call: decode the payload, run request,
/// global-function and per-function middleware around the handler, encode
/// the outcome.
pub async fn handle_server_fn(parts: &StartParts, req: ServerFnRequest) -> ServerFnResponse {
  let Some(def) = parts.server_fns.get(&req.function_id).cloned() else {
    tracing::debug!(function = %req.function_id, "unknown server function");
    return ServerFnResponse::error(&StartError::not_found(format!(
      "server function '{}' not found",
      req.function_id
    )));
  };
  if def.method != req.method {
    return ServerFnResponse::error(&StartError::validation(format!(
      "server function '{}' expects {}, got {}",
      def.id,
      def.method.as_str(),
      req.method.as_str()
    )));
  }

  let payload = match decode_request(&parts.serializer, &req, parts.config.server_fn.max_get_payload) {
    Ok(payload) => payload,
    Err(err) => {
      tracing::debug!(function = %def.id, error = %err, "rejected server function payload");
      return ServerFnResponse::error(&err);
    }
  };

  let chain = flatten([
    parts.request_middleware.as_slice(),
    parts.function_middleware.as_slice(),
    def.middleware.as_slice(),
  ]);
  let ctx = StageCtx::new(def.id.clone(), req.method, payload.data).with_context(&payload.context);
  let outcome = execute(&chain, Stage::Server, ctx, handler_terminal(Arc::clone(&def))).await;
  encode_outcome(&parts.serializer, &def.id, outcome)
}

fn handler_terminal(def: Arc<ServerFnDef>) -> Terminal {
  Arc::new(move |ctx: StageCtx| {
    let def = Arc::clone(&def);
    Box::pin(async move {
      let input = ServerFnCtx { data: ctx.data, context: ctx.context.clone(), method: ctx.method };
      let result = (def.handler)(input).await;
      if let Err(err) = &result {
        tracing::debug!(function = %def.id, error = %err, "server function returned an error");
      }
      Ok(StageOutput { context: ctx.context, send_context: ctx.send_context, result: result? })
    })
  })
}
