use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};

use crate::{
    application::repos::{RepoError, ScoreSource},
    domain::{entities::ScoreEntry, types::ItemType},
};

use super::{PostgresRepositories, map_sqlx_error};

/// Which comments of an asset take part in a ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeFilter {
    /// Only comments without a parent.
    #[default]
    TopLevelOnly,
    /// Every comment on the asset, replies included.
    AllComments,
}

#[derive(sqlx::FromRow)]
struct ScoreRow {
    item_id: String,
    count: i64,
}

impl From<ScoreRow> for ScoreEntry {
    fn from(row: ScoreRow) -> Self {
        Self {
            item_id: row.item_id,
            count: row.count,
        }
    }
}

impl PostgresRepositories {
    fn build_scores_query<'q>(
        scope_filter: ScopeFilter,
        asset_id: &'q str,
        action_type: &'q str,
    ) -> QueryBuilder<'q, Postgres> {
        let mut qb = QueryBuilder::new(
            "SELECT a.item_id, COUNT(*) AS count \
             FROM actions a \
             INNER JOIN comments c ON c.id = a.item_id \
             WHERE a.item_type = ",
        );
        qb.push_bind(ItemType::Comments.as_str());
        qb.push(" AND c.asset_id = ");
        qb.push_bind(asset_id);
        qb.push(" AND a.action_type = ");
        qb.push_bind(action_type);

        if scope_filter == ScopeFilter::TopLevelOnly {
            qb.push(" AND c.parent_id IS NULL");
        }

        qb.push(" GROUP BY a.item_id ORDER BY count DESC, a.item_id");
        qb
    }
}

#[async_trait]
impl ScoreSource for PostgresRepositories {
    async fn compute_scores(
        &self,
        scope_id: &str,
        action_type: &str,
    ) -> Result<Vec<ScoreEntry>, RepoError> {
        let mut qb = Self::build_scores_query(self.scope_filter, scope_id, action_type);
        let rows = qb
            .build_query_as::<ScoreRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ScoreEntry::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_scope_filters_replies() {
        let qb = PostgresRepositories::build_scores_query(ScopeFilter::TopLevelOnly, "a", "LIKE");
        let sql = qb.sql();
        assert!(sql.contains("c.parent_id IS NULL"));
        assert!(sql.contains("GROUP BY a.item_id"));
    }

    #[test]
    fn all_comments_scope_keeps_replies() {
        let qb = PostgresRepositories::build_scores_query(ScopeFilter::AllComments, "a", "LIKE");
        assert!(!qb.sql().contains("parent_id"));
    }
}
