//! Layer repository contracts and SQLite implementation.
//!
//! # Invariants
//! - A layer and its external config are written in one transaction.
//! - Layers are always loaded together with their optional external config.

use crate::model::layer::{ExternalLayerConfig, Layer, LayerId};
use crate::repo::{bool_to_int, parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};

const LAYER_SELECT_SQL: &str = "SELECT
    l.id,
    l.name,
    l.slug,
    l.is_external,
    e.layer_id AS external_layer_id,
    e.interoperability,
    e.config
FROM layers l
LEFT JOIN layers_external e ON e.layer_id = l.id";

/// Repository interface for layer persistence.
pub trait LayerRepository {
    fn create_layer(&self, layer: &Layer) -> RepoResult<LayerId>;
    fn get_layer(&self, id: LayerId) -> RepoResult<Option<Layer>>;
    fn list_layers(&self) -> RepoResult<Vec<Layer>>;
    /// Toggles whether nodes of the layer are mirrored externally.
    fn set_layer_external(&self, id: LayerId, is_external: bool) -> RepoResult<()>;
    /// Inserts or replaces the external config of an existing layer.
    fn save_external_config(&self, config: &ExternalLayerConfig) -> RepoResult<()>;
    /// Removes the external config row, if any.
    fn clear_external_config(&self, id: LayerId) -> RepoResult<()>;
}

/// SQLite-backed layer repository.
pub struct SqliteLayerRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLayerRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl LayerRepository for SqliteLayerRepository<'_> {
    fn create_layer(&self, layer: &Layer) -> RepoResult<LayerId> {
        layer.validate()?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO layers (id, name, slug, is_external) VALUES (?1, ?2, ?3, ?4);",
            params![
                layer.id.to_string(),
                layer.name.trim(),
                layer.slug.as_str(),
                bool_to_int(layer.is_external),
            ],
        )?;
        if let Some(external) = &layer.external {
            upsert_external_config(&tx, external)?;
        }
        tx.commit()?;

        Ok(layer.id)
    }

    fn get_layer(&self, id: LayerId) -> RepoResult<Option<Layer>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{LAYER_SELECT_SQL} WHERE l.id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_layer_row(row)?));
        }
        Ok(None)
    }

    fn list_layers(&self) -> RepoResult<Vec<Layer>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{LAYER_SELECT_SQL} ORDER BY l.slug ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut layers = Vec::new();
        while let Some(row) = rows.next()? {
            layers.push(parse_layer_row(row)?);
        }
        Ok(layers)
    }

    fn set_layer_external(&self, id: LayerId, is_external: bool) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE layers
             SET
                is_external = ?2,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![id.to_string(), bool_to_int(is_external)],
        )?;
        if changed == 0 {
            return Err(RepoError::LayerNotFound(id));
        }
        Ok(())
    }

    fn save_external_config(&self, config: &ExternalLayerConfig) -> RepoResult<()> {
        config.validate()?;
        if !layer_exists(self.conn, config.layer_id)? {
            return Err(RepoError::LayerNotFound(config.layer_id));
        }
        upsert_external_config(self.conn, config)
    }

    fn clear_external_config(&self, id: LayerId) -> RepoResult<()> {
        self.conn.execute(
            "DELETE FROM layers_external WHERE layer_id = ?1;",
            [id.to_string()],
        )?;
        Ok(())
    }
}

fn upsert_external_config(conn: &Connection, config: &ExternalLayerConfig) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO layers_external (layer_id, interoperability, config)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (layer_id) DO UPDATE SET
            interoperability = excluded.interoperability,
            config = excluded.config;",
        params![
            config.layer_id.to_string(),
            config.interoperability.as_deref(),
            config.config.as_str(),
        ],
    )?;
    Ok(())
}

fn layer_exists(conn: &Connection, id: LayerId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM layers WHERE id = ?1);",
        [id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn parse_layer_row(row: &Row<'_>) -> RepoResult<Layer> {
    let id_text: String = row.get("id")?;
    let id = parse_uuid(&id_text, "layers.id")?;

    let is_external = match row.get::<_, i64>("is_external")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid is_external value `{other}` in layers.is_external"
            )));
        }
    };

    let external = match row.get::<_, Option<String>>("external_layer_id")? {
        Some(_) => Some(ExternalLayerConfig {
            layer_id: id,
            interoperability: row.get("interoperability")?,
            config: row.get("config")?,
        }),
        None => None,
    };

    Ok(Layer {
        id,
        name: row.get("name")?,
        slug: row.get("slug")?,
        is_external,
        external,
    })
}
