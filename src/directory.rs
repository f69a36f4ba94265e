use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use crate::{
    db::PgPool,
    models::{Document, User},
    schema::{documents, knowledge_bases, organization_members, users},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeBaseRef {
    pub id: Uuid,
    pub name: String,
}

/// Narrow view onto the user/org/knowledge-base management system, which is
/// maintained elsewhere. The trace path only ever asks three questions:
/// who is this user, which knowledge bases may they see, and what is this
/// document.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    async fn user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Personal knowledge bases plus those of every organization the user
    /// belongs to.
    async fn knowledge_bases_for_user(&self, user_id: Uuid) -> Result<Vec<KnowledgeBaseRef>>;

    async fn document(&self, document_id: Uuid) -> Result<Option<Document>>;
}

pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("directory pool error: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("directory task panicked")?
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            users::table
                .filter(users::username.eq(&username))
                .first::<User>(conn)
                .optional()
                .context("failed to load user")
        })
        .await
    }

    async fn knowledge_bases_for_user(&self, user_id: Uuid) -> Result<Vec<KnowledgeBaseRef>> {
        self.with_conn(move |conn| {
            let personal: Vec<(Uuid, String)> = knowledge_bases::table
                .filter(knowledge_bases::owner_user_id.eq(user_id))
                .select((knowledge_bases::id, knowledge_bases::name))
                .load(conn)
                .context("failed to load personal knowledge bases")?;

            let organizational: Vec<(Uuid, String)> = knowledge_bases::table
                .inner_join(
                    organization_members::table.on(organization_members::organization_id
                        .nullable()
                        .eq(knowledge_bases::organization_id)),
                )
                .filter(organization_members::user_id.eq(user_id))
                .select((knowledge_bases::id, knowledge_bases::name))
                .load(conn)
                .context("failed to load organizational knowledge bases")?;

            let mut refs: Vec<KnowledgeBaseRef> = Vec::new();
            for (id, name) in personal.into_iter().chain(organizational) {
                if !refs.iter().any(|existing| existing.id == id) {
                    refs.push(KnowledgeBaseRef { id, name });
                }
            }
            Ok(refs)
        })
        .await
    }

    async fn document(&self, document_id: Uuid) -> Result<Option<Document>> {
        self.with_conn(move |conn| {
            documents::table
                .find(document_id)
                .first::<Document>(conn)
                .optional()
                .context("failed to load document")
        })
        .await
    }
}
