/* src/server/core/rust/src/transport.rs */

//! HTTP encoding of server-function calls.
//!
//! Requests carry `{ data, context }` as one serializer chunk: in the
//! `payload` query parameter for GET, in the body for POST. Responses always
//! answer 200 for data, redirects and not-found; the `x-trellis-response`
//! header says which one it is so the calling router can act on it.

use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, stream};
use trellis_router::{BoxStream, RawStream, RouteError, StreamHint, Value};
use trellis_serializer::{
  FormData, FrameLimits, SerializationError, Serializer, deserialize, follow_ups, frame_stream, read_frames,
};

use crate::errors::{ServerFnError, StartError};
use crate::middleware::{Method, StageOutput};

pub const SERVER_FN_HEADER: &str = "x-trellis-server-fn";
pub const PAYLOAD_MODE_HEADER: &str = "x-trellis-payload-mode";
pub const RESPONSE_HEADER: &str = "x-trellis-response";
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_FRAMED: &str = "application/x-trellis-framed";
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";
/// Form field carrying the serialized client context in `formData` mode.
pub const FORM_CONTEXT_FIELD: &str = "_trellis_context";
pub const DEFAULT_MAX_GET_PAYLOAD: usize = 1_000_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PayloadMode {
  #[default]
  Payload,
  FormData,
  /// The raw body is handed to the function untouched.
  Request,
}

impl PayloadMode {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Payload => "payload",
      Self::FormData => "formData",
      Self::Request => "request",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "payload" => Some(Self::Payload),
      "formData" => Some(Self::FormData),
      "request" => Some(Self::Request),
      _ => None,
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseKind {
  Data,
  Redirect,
  NotFound,
  Error,
}

impl ResponseKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Data => "data",
      Self::Redirect => "redirect",
      Self::NotFound => "notFound",
      Self::Error => "error",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "data" => Some(Self::Data),
      "redirect" => Some(Self::Redirect),
      "notFound" => Some(Self::NotFound),
      "error" => Some(Self::Error),
      _ => None,
    }
  }
}

/// Decoded call input.
#[derive(Clone, Debug, PartialEq)]
pub struct Payload {
  pub data: Value,
  pub context: Value,
}

impl Payload {
  pub fn new(data: Value, context: Value) -> Self {
    Self { data, context }
  }

  fn from_value(value: &Value) -> Self {
    Self {
      data: value.get("data").cloned().unwrap_or_default(),
      context: value.get("context").cloned().unwrap_or_else(Value::empty_object),
    }
  }
}

/// A server-function request with the HTTP details already extracted.
#[derive(Clone, Debug)]
pub struct ServerFnRequest {
  pub method: Method,
  pub function_id: String,
  pub mode: PayloadMode,
  pub query: Option<String>,
  pub content_type: Option<String>,
  pub body: Bytes,
}

pub enum ResponseBody {
  Full(Bytes),
  Framed(BoxStream<Result<Bytes, SerializationError>>),
}

impl std::fmt::Debug for ResponseBody {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Full(bytes) => f.debug_tuple("Full").field(bytes).finish(),
      Self::Framed(_) => f.write_str("Framed(..)"),
    }
  }
}

#[derive(Debug)]
pub struct ServerFnResponse {
  pub status: u16,
  pub kind: ResponseKind,
  pub content_type: &'static str,
  pub body: ResponseBody,
}

impl ServerFnResponse {
  pub fn error(err: &StartError) -> Self {
    Self {
      status: err.status(),
      kind: ResponseKind::Error,
      content_type: CONTENT_TYPE_JSON,
      body: ResponseBody::Full(Bytes::from(err.to_json().to_string())),
    }
  }

  pub fn headers(&self) -> [(&'static str, &'static str); 2] {
    [("content-type", self.content_type), (RESPONSE_HEADER, self.kind.as_str())]
  }
}

// -- client side: requests -------------------------------------------------

/// One chunk holding `{ data, context }`. Deferred values and streams cannot
/// travel from the client, so a payload that needs follow-ups is rejected.
pub fn encode_payload(serializer: &Serializer, scope_id: &str, payload: &Payload) -> Result<String, StartError> {
  let value = Value::object([("data", payload.data.clone()), ("context", payload.context.clone())]);
  encode_single(serializer, scope_id, &value)
}

fn encode_single(serializer: &Serializer, scope_id: &str, value: &Value) -> Result<String, StartError> {
  let mut scope = serializer.encode_scope(scope_id);
  let chunk = scope.encode_chunk(value).map_err(|e| StartError::validation(e.to_string()))?;
  if scope.has_pending() {
    return Err(StartError::validation("deferred values and streams cannot be sent to a server function"));
  }
  Ok(chunk)
}

pub fn payload_query(chunk: &str) -> Result<String, StartError> {
  serde_urlencoded::to_string([("payload", chunk)]).map_err(|e| StartError::internal(e.to_string()))
}

/// Urlencoded form body; the client context rides along in [`FORM_CONTEXT_FIELD`].
pub fn encode_form(
  serializer: &Serializer,
  scope_id: &str,
  form: &FormData,
  context: &Value,
) -> Result<String, StartError> {
  let mut fields: Vec<(String, String)> = form.0.clone();
  if context.as_object().is_some_and(|m| !m.is_empty()) {
    fields.push((FORM_CONTEXT_FIELD.to_string(), encode_single(serializer, scope_id, context)?));
  }
  serde_urlencoded::to_string(&fields).map_err(|e| StartError::internal(e.to_string()))
}

// -- server side: requests -------------------------------------------------

fn decode_chunk(serializer: &Serializer, scope_id: &str, text: &str) -> Result<Value, StartError> {
  let mut scope = serializer.decode_scope(scope_id);
  scope
    .apply_chunk(text)
    .map_err(|e| StartError::validation(format!("malformed payload: {e}")))?
    .ok_or_else(|| StartError::validation("payload chunk carries no value"))
}

/// Extract `{ data, context }` from a request. GET payloads longer than
/// `max_get_payload` bytes are refused before decoding.
pub fn decode_request(
  serializer: &Serializer,
  req: &ServerFnRequest,
  max_get_payload: usize,
) -> Result<Payload, StartError> {
  let empty = || Payload::new(Value::Null, Value::empty_object());
  match (req.method, req.mode) {
    (Method::Get, PayloadMode::Payload) => {
      let query = req.query.as_deref().unwrap_or_default();
      let pairs: Vec<(String, String)> =
        serde_urlencoded::from_str(query).map_err(|e| StartError::validation(e.to_string()))?;
      let Some((_, chunk)) = pairs.into_iter().find(|(k, _)| k == "payload") else {
        return Ok(empty());
      };
      if chunk.len() > max_get_payload {
        return Err(StartError::validation(format!(
          "payload of {} bytes exceeds the {max_get_payload} byte limit",
          chunk.len()
        )));
      }
      Ok(Payload::from_value(&decode_chunk(serializer, &req.function_id, &chunk)?))
    }
    (Method::Get, mode) => Err(StartError::validation(format!("{} payloads require POST", mode.as_str()))),
    (Method::Post, PayloadMode::Payload) => {
      if req.body.is_empty() {
        return Ok(empty());
      }
      let text = std::str::from_utf8(&req.body).map_err(|_| StartError::validation("payload is not UTF-8"))?;
      Ok(Payload::from_value(&decode_chunk(serializer, &req.function_id, text)?))
    }
    (Method::Post, PayloadMode::FormData) => {
      let mut fields: Vec<(String, String)> =
        serde_urlencoded::from_bytes(&req.body).map_err(|e| StartError::validation(e.to_string()))?;
      let mut context = Value::empty_object();
      if let Some(pos) = fields.iter().position(|(k, _)| k == FORM_CONTEXT_FIELD) {
        let (_, chunk) = fields.remove(pos);
        let decoded = decode_chunk(serializer, &req.function_id, &chunk)?;
        // malformed context is dropped, the form itself still goes through
        if decoded.as_object().is_some() {
          context = decoded;
        } else {
          tracing::debug!(function = %req.function_id, "ignoring non-object form context");
        }
      }
      Ok(Payload::new(Value::opaque(FormData(fields)), context))
    }
    (Method::Post, PayloadMode::Request) => {
      let body = req.body.clone();
      let source = stream::once(async move { Ok::<_, String>(body) });
      let data = Value::object([
        ("contentType", req.content_type.clone().map_or(Value::Null, Value::from)),
        ("body", Value::Stream(RawStream::new(StreamHint::Binary, source))),
      ]);
      Ok(Payload::new(data, Value::empty_object()))
    }
  }
}

// -- server side: responses ------------------------------------------------

/// Encode a finished call. Data responses that still carry deferred values
/// or streams switch to the framed content type.
pub fn encode_outcome(
  serializer: &Serializer,
  scope_id: &str,
  outcome: Result<StageOutput, ServerFnError>,
) -> ServerFnResponse {
  let (kind, value) = match outcome {
    Ok(out) => (ResponseKind::Data, Value::object([("result", out.result), ("context", out.send_context)])),
    Err(ServerFnError::Redirect(r)) => (ResponseKind::Redirect, RouteError::Redirect(r).to_value()),
    Err(ServerFnError::NotFound(n)) => (ResponseKind::NotFound, RouteError::NotFound(n).to_value()),
    Err(ServerFnError::Failed(err)) => return ServerFnResponse::error(&err),
  };
  let mut scope = serializer.encode_scope(scope_id);
  let first = match scope.encode_chunk(&value) {
    Ok(first) => first,
    Err(err) => {
      tracing::error!(function = %scope_id, error = %err, "failed to serialize server function result");
      return ServerFnResponse::error(&StartError::internal(err.to_string()));
    }
  };
  if !scope.has_pending() {
    return ServerFnResponse {
      status: 200,
      kind,
      content_type: CONTENT_TYPE_JSON,
      body: ResponseBody::Full(Bytes::from(first)),
    };
  }
  let chunks = stream::once(async move { Ok(first) }).chain(follow_ups(scope));
  ServerFnResponse {
    status: 200,
    kind,
    content_type: CONTENT_TYPE_FRAMED,
    body: ResponseBody::Framed(frame_stream(chunks)),
  }
}

// -- client side: responses ------------------------------------------------

/// Raw response as seen by the client transport.
pub struct FetchedResponse {
  pub status: u16,
  pub kind: Option<ResponseKind>,
  pub content_type: String,
  pub body: BoxStream<Result<Bytes, String>>,
}

/// Decoded data response: the function result and the context the server
/// middleware sent back.
#[derive(Debug)]
pub struct CallOutput {
  pub result: Value,
  pub context: Value,
}

async fn collect_body(mut body: BoxStream<Result<Bytes, String>>) -> Result<Bytes, StartError> {
  let mut buf = BytesMut::new();
  while let Some(chunk) = body.next().await {
    buf.extend_from_slice(&chunk.map_err(StartError::internal)?);
  }
  Ok(buf.freeze())
}

async fn body_text(body: BoxStream<Result<Bytes, String>>) -> Result<String, StartError> {
  let bytes = collect_body(body).await?;
  String::from_utf8(bytes.to_vec()).map_err(|_| StartError::internal("response body is not UTF-8"))
}

/// Turn a response back into the call result. Deferred values in framed
/// responses keep settling on a spawned task, so this must run inside a
/// tokio runtime.
pub async fn decode_response(
  serializer: &Serializer,
  scope_id: &str,
  response: FetchedResponse,
  limits: FrameLimits,
) -> Result<CallOutput, ServerFnError> {
  let kind = match response.kind {
    Some(kind) => kind,
    None if response.status >= 400 => ResponseKind::Error,
    None => ResponseKind::Data,
  };
  match kind {
    ResponseKind::Error => {
      let text = body_text(response.body).await?;
      let json: serde_json::Value = serde_json::from_str(&text).unwrap_or_default();
      let err = if json.get("code").is_some() {
        StartError::from_json(&json)
      } else {
        StartError::new("INTERNAL_ERROR", text, response.status)
      };
      Err(ServerFnError::Failed(err))
    }
    ResponseKind::Redirect | ResponseKind::NotFound => {
      let text = body_text(response.body).await?;
      let value = decode_chunk(serializer, scope_id, &text)?;
      Err(ServerFnError::from(RouteError::from_value(&value)))
    }
    ResponseKind::Data if response.content_type.starts_with(CONTENT_TYPE_FRAMED) => {
      let frames = read_frames(response.body, limits);
      let hydration = deserialize(serializer.decode_scope(scope_id), frames)
        .await
        .map_err(|e| StartError::internal(e.to_string()))?;
      let function = scope_id.to_string();
      tokio::spawn(async move {
        if let Err(err) = hydration.pump.await {
          tracing::warn!(function = %function, error = %err, "server function stream ended early");
        }
      });
      Ok(output_from(&hydration.value))
    }
    ResponseKind::Data => {
      let text = body_text(response.body).await?;
      Ok(output_from(&decode_chunk(serializer, scope_id, &text)?))
    }
  }
}

fn output_from(value: &Value) -> CallOutput {
  CallOutput {
    result: value.get("result").cloned().unwrap_or_default(),
    context: value.get("context").cloned().unwrap_or_else(Value::empty_object),
  }
}
