use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use taskmanager_domain::{
    apply_node_modifications, NodeFilter, NodeModification, NodeObject, NodeRepository,
};
use taskmanager_errors::{TaskManagerError, TaskManagerResult};
use tracing::debug;
use uuid::Uuid;

use super::map_insert_error;

pub struct SqliteNodeRepository {
    pool: SqlitePool,
}

impl SqliteNodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_node(row: &SqliteRow) -> TaskManagerResult<NodeObject> {
        let oid: String = row.try_get("oid")?;
        let body: String = row.try_get("body")?;
        let mut node: NodeObject = serde_json::from_str(&body)?;
        node.oid = Some(oid);
        Ok(node)
    }
}

#[async_trait]
impl NodeRepository for SqliteNodeRepository {
    async fn get_node(&self, oid: &str) -> TaskManagerResult<NodeObject> {
        let row = sqlx::query("SELECT oid, body FROM nodes WHERE oid = ?")
            .bind(oid)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_node(&row),
            None => Err(TaskManagerError::node_not_found(oid)),
        }
    }

    async fn search_nodes(&self, filter: &NodeFilter) -> TaskManagerResult<Vec<NodeObject>> {
        let rows = match &filter.node_identifier {
            Some(identifier) => {
                sqlx::query("SELECT oid, body FROM nodes WHERE node_identifier = ?")
                    .bind(identifier)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT oid, body FROM nodes ORDER BY node_identifier ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut nodes = Vec::with_capacity(rows.len());
        for row in &rows {
            let node = Self::row_to_node(row)?;
            if filter.matches(&node) {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    async fn count_nodes(&self, filter: &NodeFilter) -> TaskManagerResult<usize> {
        Ok(self.search_nodes(filter).await?.len())
    }

    async fn add_node(&self, node: &NodeObject) -> TaskManagerResult<String> {
        let oid = node
            .oid
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut stored = node.clone();
        stored.oid = Some(oid.clone());
        let body = serde_json::to_string(&stored)?;

        sqlx::query("INSERT INTO nodes (oid, node_identifier, body) VALUES (?, ?, ?)")
            .bind(&oid)
            .bind(&stored.node_identifier)
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error(e, &format!("节点 {}", stored.node_identifier)))?;

        debug!("注册节点成功: {} ({})", stored.node_identifier, oid);
        Ok(oid)
    }

    async fn modify_node(
        &self,
        oid: &str,
        modifications: &[NodeModification],
    ) -> TaskManagerResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT oid, body FROM nodes WHERE oid = ?")
            .bind(oid)
            .fetch_optional(&mut *tx)
            .await?;
        let mut node = match row {
            Some(row) => Self::row_to_node(&row)?,
            None => return Err(TaskManagerError::node_not_found(oid)),
        };

        apply_node_modifications(&mut node, modifications)?;
        let body = serde_json::to_string(&node)?;

        sqlx::query("UPDATE nodes SET body = ? WHERE oid = ?")
            .bind(body)
            .bind(oid)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_node(&self, oid: &str) -> TaskManagerResult<()> {
        let result = sqlx::query("DELETE FROM nodes WHERE oid = ?")
            .bind(oid)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(TaskManagerError::node_not_found(oid));
        }
        Ok(())
    }
}
