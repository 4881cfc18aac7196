pub mod hash;

pub use hash::{HashError, PasswordHasher};
