use std::collections::HashMap;

use uuid::Uuid;

use crate::{
    directory::Directory,
    error::{AppError, AppResult},
};

/// Immutable snapshot of the knowledge bases one user may query, resolved
/// once per request. Carries names alongside ids so responses never go back
/// to the directory.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeScope {
    names: HashMap<Uuid, String>,
}

impl KnowledgeScope {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, knowledge_base_id: Uuid) -> bool {
        self.names.contains_key(&knowledge_base_id)
    }

    pub fn name_of(&self, knowledge_base_id: Uuid) -> Option<&str> {
        self.names.get(&knowledge_base_id).map(String::as_str)
    }

    /// Sorted for reproducible collaborator queries.
    pub fn ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.names.keys().copied().collect();
        ids.sort();
        ids
    }
}

pub async fn resolve_scope(
    directory: &dyn Directory,
    user_id: Uuid,
) -> AppResult<KnowledgeScope> {
    let refs = directory
        .knowledge_bases_for_user(user_id)
        .await
        .map_err(AppError::internal)?;

    let mut names = HashMap::with_capacity(refs.len());
    for kb in refs {
        names.insert(kb.id, kb.name);
    }
    Ok(KnowledgeScope { names })
}
