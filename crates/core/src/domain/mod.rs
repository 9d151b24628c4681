pub mod conversation;
pub mod intent;
pub mod result;
pub mod schema;
