//! Node repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - CRUD over `nodes`, always loading the optional `nodes_external` row.
//! - Own the write gate for `ExternalIdentity`.
//!
//! # Invariants
//! - Deleting a node cascades to its external identity (FK `ON DELETE
//!   CASCADE`), so callers must read `external_id` before `delete_node`.
//! - `delete_node_with` commits the pre-delete writes and the delete as one
//!   unit; if either fails, neither is kept.
//! - `update_node` never touches the external identity; it is written only
//!   through `save_external_identity`.

use crate::model::external::ExternalIdentity;
use crate::model::layer::LayerId;
use crate::model::node::{Node, NodeId};
use crate::repo::{parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};

const NODE_SELECT_SQL: &str = "SELECT
    n.id,
    n.layer_id,
    n.name,
    n.slug,
    n.latitude,
    n.longitude,
    n.elevation,
    n.address,
    n.description,
    x.node_id AS external_node_id,
    x.external_id,
    x.extra_data
FROM nodes n
LEFT JOIN nodes_external x ON x.node_id = n.id";

/// Repository interface for node persistence.
pub trait NodeRepository {
    /// Inserts a node and, when present, its external identity.
    fn create_node(&self, node: &Node) -> RepoResult<NodeId>;
    /// Updates node fields. The external identity is left untouched.
    fn update_node(&self, node: &Node) -> RepoResult<()>;
    fn get_node(&self, id: NodeId) -> RepoResult<Option<Node>>;
    fn list_layer_nodes(&self, layer_id: LayerId) -> RepoResult<Vec<Node>>;
    /// Hard-deletes a node together with its external identity.
    fn delete_node(&self, id: NodeId) -> RepoResult<()>;
    /// Runs `before_delete` while the node is still stored, then deletes it.
    ///
    /// Writes `before_delete` makes through the same storage are rolled back
    /// when the delete fails.
    fn delete_node_with<T, F>(&self, id: NodeId, before_delete: F) -> RepoResult<T>
    where
        F: FnOnce() -> RepoResult<T>;
    /// Validates, normalizes and upserts the external identity of a node.
    ///
    /// Returns the identity as persisted.
    fn save_external_identity(
        &self,
        node_id: NodeId,
        identity: &ExternalIdentity,
    ) -> RepoResult<ExternalIdentity>;
}

/// SQLite-backed node repository.
pub struct SqliteNodeRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNodeRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl NodeRepository for SqliteNodeRepository<'_> {
    fn create_node(&self, node: &Node) -> RepoResult<NodeId> {
        node.validate()?;
        let identity = node
            .external
            .as_ref()
            .map(|identity| {
                let mut cleaned = identity.clone();
                cleaned.clean().map(|()| cleaned)
            })
            .transpose()?;

        let tx = self.conn.unchecked_transaction()?;
        let layer_exists: i64 = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM layers WHERE id = ?1);",
            [node.layer_id.to_string()],
            |row| row.get(0),
        )?;
        if layer_exists == 0 {
            return Err(RepoError::LayerNotFound(node.layer_id));
        }

        tx.execute(
            "INSERT INTO nodes (
                id,
                layer_id,
                name,
                slug,
                latitude,
                longitude,
                elevation,
                address,
                description
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                node.id.to_string(),
                node.layer_id.to_string(),
                node.name.trim(),
                node.slug.as_str(),
                node.latitude,
                node.longitude,
                node.elevation,
                node.address.as_deref(),
                node.description.as_deref(),
            ],
        )?;
        if let Some(identity) = identity {
            upsert_identity(&tx, node.id, &identity)?;
        }
        tx.commit()?;

        Ok(node.id)
    }

    fn update_node(&self, node: &Node) -> RepoResult<()> {
        node.validate()?;

        let changed = self.conn.execute(
            "UPDATE nodes
             SET
                layer_id = ?2,
                name = ?3,
                slug = ?4,
                latitude = ?5,
                longitude = ?6,
                elevation = ?7,
                address = ?8,
                description = ?9,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                node.id.to_string(),
                node.layer_id.to_string(),
                node.name.trim(),
                node.slug.as_str(),
                node.latitude,
                node.longitude,
                node.elevation,
                node.address.as_deref(),
                node.description.as_deref(),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NodeNotFound(node.id));
        }
        Ok(())
    }

    fn get_node(&self, id: NodeId) -> RepoResult<Option<Node>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{NODE_SELECT_SQL} WHERE n.id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_node_row(row)?));
        }
        Ok(None)
    }

    fn list_layer_nodes(&self, layer_id: LayerId) -> RepoResult<Vec<Node>> {
        let mut stmt = self.conn.prepare(&format!(
            "{NODE_SELECT_SQL} WHERE n.layer_id = ?1 ORDER BY n.slug ASC, n.id ASC;"
        ))?;
        let mut rows = stmt.query([layer_id.to_string()])?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next()? {
            nodes.push(parse_node_row(row)?);
        }
        Ok(nodes)
    }

    fn delete_node(&self, id: NodeId) -> RepoResult<()> {
        delete_row(self.conn, id)
    }

    fn delete_node_with<T, F>(&self, id: NodeId, before_delete: F) -> RepoResult<T>
    where
        F: FnOnce() -> RepoResult<T>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let value = before_delete()?;
        delete_row(&tx, id)?;
        tx.commit()?;
        Ok(value)
    }

    fn save_external_identity(
        &self,
        node_id: NodeId,
        identity: &ExternalIdentity,
    ) -> RepoResult<ExternalIdentity> {
        let mut cleaned = identity.clone();
        cleaned.clean()?;

        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE id = ?1);",
            [node_id.to_string()],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(RepoError::NodeNotFound(node_id));
        }

        upsert_identity(self.conn, node_id, &cleaned)?;
        Ok(cleaned)
    }
}

fn delete_row(conn: &Connection, id: NodeId) -> RepoResult<()> {
    let changed = conn.execute("DELETE FROM nodes WHERE id = ?1;", [id.to_string()])?;
    if changed == 0 {
        return Err(RepoError::NodeNotFound(id));
    }
    Ok(())
}

fn upsert_identity(conn: &Connection, node_id: NodeId, identity: &ExternalIdentity) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO nodes_external (node_id, external_id, extra_data)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (node_id) DO UPDATE SET
            external_id = excluded.external_id,
            extra_data = excluded.extra_data;",
        params![
            node_id.to_string(),
            identity.external_id.as_str(),
            identity.extra_data.as_str(),
        ],
    )?;
    Ok(())
}

fn parse_node_row(row: &Row<'_>) -> RepoResult<Node> {
    let id_text: String = row.get("id")?;
    let layer_text: String = row.get("layer_id")?;

    let external = match row.get::<_, Option<String>>("external_node_id")? {
        Some(_) => Some(ExternalIdentity {
            external_id: row.get("external_id")?,
            extra_data: row.get("extra_data")?,
        }),
        None => None,
    };

    Ok(Node {
        id: parse_uuid(&id_text, "nodes.id")?,
        layer_id: parse_uuid(&layer_text, "nodes.layer_id")?,
        name: row.get("name")?,
        slug: row.get("slug")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        elevation: row.get("elevation")?,
        address: row.get("address")?,
        description: row.get("description")?,
        external,
    })
}
