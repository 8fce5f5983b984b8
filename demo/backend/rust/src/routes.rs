/* demo/backend/rust/src/routes.rs */

use std::sync::Arc;
use std::time::Duration;

use trellis_server::trellis_router::{Deferred, Route, RouteError, RouteTree, RouteTreeError};
use trellis_server::Value;

use crate::server_fns::get_user::find_user;

pub fn tree() -> Result<Arc<RouteTree>, RouteTreeError> {
  let home = Route::new("/").loader(|ctx| async move {
    Ok(Value::object([("requestId", ctx.context.get("requestId").cloned().unwrap_or_default())]))
  });

  let user = Route::new("users/$id").loader(|ctx| async move {
    let user = ctx.params["id"].parse::<u32>().ok().and_then(find_user).ok_or_else(RouteError::not_found)?;
    // activity arrives after the shell has been flushed
    let activity = Deferred::new(async {
      tokio::time::sleep(Duration::from_millis(250)).await;
      Ok(Value::array(vec![Value::from("signed in"), Value::from("updated avatar")]))
    });
    Ok(Value::object([("user", user), ("activity", Value::Deferred(activity))]))
  });

  let old_profile = Route::new("profile/$id").before_load(|ctx| async move {
    Err(RouteError::redirect(format!("/users/{}", ctx.params["id"])))
  });

  Ok(Arc::new(RouteTree::build(Route::root().children([home, user, old_profile]))?))
}
