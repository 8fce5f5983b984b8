/* demo/backend/rust/src/server_fns/mod.rs */

pub mod get_user;
pub mod greet;
