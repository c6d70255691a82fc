pub mod middleware;
pub mod password;

pub use middleware::{parse_basic_credentials, require_basic_auth, BasicCredentials};
pub use password::{hash_password, verify_password};
