use std::sync::Arc;

use tracing::info;

use crate::data_types::User;
use crate::error::Result;
use crate::repository::interface::{Repositories, Storage};

#[derive(Clone)]
pub struct UserService {
    storage: Arc<dyn Storage>,
}

impl UserService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn register(&self) -> Result<User> {
        let user = self.storage.users().create().await?;
        info!("Registered user {}", user.id);
        Ok(user)
    }
}
