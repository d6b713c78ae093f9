use std::sync::Arc;

use serenity::{async_trait, client};

use crate::{admin::AdminService, cases::CaseService, database::Database};

#[async_trait]
pub trait ClientContextExt {
    async fn get_db(&self) -> Arc<Database>;
    async fn get_case_service(&self) -> Arc<CaseService>;
    async fn get_admin_service(&self) -> Arc<AdminService>;
}

#[async_trait]
impl ClientContextExt for client::Context {
    async fn get_db(&self) -> Arc<Database> {
        self.data.read().await.get::<Database>().unwrap().clone()
    }

    async fn get_case_service(&self) -> Arc<CaseService> {
        self.data.read().await.get::<CaseService>().unwrap().clone()
    }

    async fn get_admin_service(&self) -> Arc<AdminService> {
        self.data.read().await.get::<AdminService>().unwrap().clone()
    }
}
