pub mod user_service;

pub use user_service::{AddProject, CreateUser, UpdateUser, UserService};
