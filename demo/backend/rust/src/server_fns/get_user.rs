/* demo/backend/rust/src/server_fns/get_user.rs */

use trellis_server::{ServerFnCtx, ServerFnError, StartError, Value, server_fn};

struct UserData {
  id: u32,
  name: &'static str,
  email: &'static str,
  avatar: Option<&'static str>,
}

const USERS: &[UserData] = &[
  UserData {
    id: 1,
    name: "Alice",
    email: "alice@example.com",
    avatar: Some("https://example.com/alice.png"),
  },
  UserData { id: 2, name: "Bob", email: "bob@example.com", avatar: None },
  UserData { id: 3, name: "Charlie", email: "charlie@example.com", avatar: None },
];

pub fn find_user(id: u32) -> Option<Value> {
  USERS.iter().find(|u| u.id == id).map(|user| {
    Value::object([
      ("id", Value::from(i64::from(user.id))),
      ("name", Value::from(user.name)),
      ("email", Value::from(user.email)),
      ("avatar", user.avatar.map_or(Value::Null, Value::from)),
    ])
  })
}

#[server_fn(name = "getUser", method = "GET")]
pub async fn get_user(ctx: ServerFnCtx) -> Result<Value, ServerFnError> {
  let id = ctx.data.get("id").and_then(Value::as_f64).ok_or_else(|| StartError::validation("missing id"))?;
  #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
  let id = id as u32;
  find_user(id).ok_or_else(|| StartError::not_found(format!("User {id} not found")).into())
}
