use validator::Validate;

pub type Id = String;

/// A user as stored in the database.
///
/// `id` and `created_at` are assigned by the database, so a `User` without
/// an `id` has not been persisted yet. Before insertion `password` holds the
/// plaintext; once read back it holds the hash.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct User {
    pub email: String,
    pub id: Option<Id>,
    pub created_at: Option<String>,
    pub notes: Option<String>,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

impl core::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Don't print the password
        f.debug_struct("User")
            .field("email", &self.email)
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("notes", &self.notes)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .finish()
    }
}

/// The outward facing view of a [`User`]: everything but the password.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedUser {
    pub email: String,
    pub id: Option<Id>,
    pub created_at: Option<String>,
    pub notes: Option<String>,
    pub first_name: String,
    pub last_name: String,
}

impl From<User> for RedactedUser {
    fn from(user: User) -> Self {
        RedactedUser {
            email: user.email,
            id: user.id,
            created_at: user.created_at,
            notes: user.notes,
            first_name: user.first_name,
            last_name: user.last_name,
        }
    }
}

/// One page of users plus the number of users in the whole table.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct GetUsersResult {
    pub users: Vec<RedactedUser>,
    pub total: i64,
}

#[derive(Clone, serde::Deserialize, Validate)]
pub struct AddUserRequest {
    #[validate(email)]
    pub email: String,
    #[serde(rename = "firstname")]
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[serde(rename = "lastname")]
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[serde(default)]
    pub notes: Option<String>,
    /// The (**unhashed**) password
    #[validate(length(min = 1))]
    pub password: String,
}

impl core::fmt::Debug for AddUserRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddUserRequest")
            .field("email", &self.email)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("notes", &self.notes)
            .finish()
    }
}

impl From<AddUserRequest> for User {
    fn from(request: AddUserRequest) -> Self {
        User {
            email: request.email,
            id: None,
            created_at: None,
            notes: request.notes,
            password: request.password,
            first_name: request.first_name,
            last_name: request.last_name,
        }
    }
}

#[derive(Clone, Debug, serde::Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1))]
    pub id: String,
    #[validate(email)]
    pub email: String,
    #[serde(rename = "firstname")]
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[serde(rename = "lastname")]
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[serde(default)]
    pub notes: Option<String>,
}
