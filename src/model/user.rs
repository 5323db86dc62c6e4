use super::{Resource, ResourceMeta, VersionedResource};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub bio: Option<String>,
    pub birthday: Option<String>,
    pub is_bot: bool,
    pub is_deleted: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub has_premium: bool,
    pub username: Option<String>,
    #[serde(default)]
    pub other_usernames: Vec<String>,
}

impl User {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => format!("{} {}", f, l),
            (Some(f), None) => f.clone(),
            (None, Some(l)) => l.clone(),
            (None, None) => format!("user {}", self.meta.resource_id),
        }
    }
}

impl Resource for User {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
}

impl VersionedResource for User {
    fn equivalent(&self, other: &Self) -> bool {
        self.bio == other.bio
            && self.birthday == other.birthday
            && self.is_bot == other.is_bot
            && self.is_deleted == other.is_deleted
            && self.first_name == other.first_name
            && self.last_name == other.last_name
            && self.phone == other.phone
            && self.has_premium == other.has_premium
            && self.username == other.username
            && self.other_usernames == other.other_usernames
    }
}
