pub mod project;
pub mod user;

pub use project::ExternalProject;
pub use user::{AuthenticatedUser, NewUser, User, UserChanges, UserWithProjects};
