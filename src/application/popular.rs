//! Comment popularity service.
//!
//! Thin facade used by comment action handlers: rankings are always keyed by
//! the asset a comment belongs to, with the action type as the category.

use std::sync::Arc;

use crate::cache::{PopularError, PopularityCache};
use crate::domain::entities::RankedSlice;
use crate::domain::types::ItemType;

#[derive(Clone)]
pub struct CommentPopularityService {
    cache: Arc<PopularityCache>,
}

impl CommentPopularityService {
    pub fn new(cache: Arc<PopularityCache>) -> Self {
        Self { cache }
    }

    /// Build the service and register store scripts before handing it out.
    pub async fn start(cache: Arc<PopularityCache>) -> Result<Self, PopularError> {
        let service = Self::new(cache);
        service.init().await?;
        Ok(service)
    }

    /// Register store scripts. Must succeed before actions are recorded.
    pub async fn init(&self) -> Result<(), PopularError> {
        self.cache.initialize().await
    }

    /// Record a new action of `action_type` on `comment_id`.
    pub async fn increment_comment_action(
        &self,
        asset_id: &str,
        action_type: &str,
        comment_id: &str,
    ) -> Result<Option<i64>, PopularError> {
        self.cache
            .on_action_created(action_type, ItemType::Assets, asset_id, comment_id)
            .await
    }

    /// Record the removal of an action of `action_type` on `comment_id`.
    pub async fn decrement_comment_action(
        &self,
        asset_id: &str,
        action_type: &str,
        comment_id: &str,
    ) -> Result<Option<i64>, PopularError> {
        self.cache
            .on_action_deleted(action_type, ItemType::Assets, asset_id, comment_id)
            .await
    }

    /// Wait for background ranking persists; call before dropping the runtime.
    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
    }

    /// Most popular comment ids of an asset for `action_type`.
    pub async fn get_by_action_type(
        &self,
        asset_id: &str,
        action_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<RankedSlice, PopularError> {
        self.cache
            .get_ranking(action_type, ItemType::Assets, asset_id, limit, offset)
            .await
    }
}
