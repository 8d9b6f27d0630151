//! Taxonomy tree repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist taxonomies and taxon nodes.
//! - Maintain hierarchy/product stale markers alongside structural writes.
//!
//! # Invariants
//! - Taxon lookups are scoped to their taxonomy.
//! - Child listing is deterministic: `position ASC, taxon_uuid ASC`.
//! - New taxons are appended after their last sibling.

use crate::db::migrations::ensure_current;
use crate::model::taxonomy::{Taxon, TaxonId, Taxonomy, TaxonomyId};
use crate::repo::{
    bool_to_int, parse_flag, parse_uuid, RepoError, RepoResult, StaleWorkRepository,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

const TAXON_SELECT_SQL: &str = "SELECT
    taxon_uuid,
    taxonomy_uuid,
    parent_uuid,
    name,
    slug,
    position,
    automatic,
    marked_for_regenerate_products
FROM taxons";

/// Repository interface for taxonomy tree operations.
pub trait TaxonomyRepository {
    /// Inserts a taxonomy together with its root taxon.
    fn create_taxonomy(&self, taxonomy: &Taxonomy, root: &Taxon) -> RepoResult<()>;
    fn get_taxonomy(&self, taxonomy_uuid: TaxonomyId) -> RepoResult<Option<Taxonomy>>;
    /// Loads one taxon, only if it belongs to `taxonomy_uuid`.
    fn get_taxon(
        &self,
        taxonomy_uuid: TaxonomyId,
        taxon_uuid: TaxonId,
    ) -> RepoResult<Option<Taxon>>;
    fn list_children(
        &self,
        taxonomy_uuid: TaxonomyId,
        parent_uuid: TaxonId,
    ) -> RepoResult<Vec<Taxon>>;
    fn has_children(&self, taxon_uuid: TaxonId) -> RepoResult<bool>;
    /// Whether another sibling under `parent_uuid` already uses `name`.
    fn sibling_name_exists(
        &self,
        taxonomy_uuid: TaxonomyId,
        parent_uuid: Option<TaxonId>,
        name: &str,
        exclude: Option<TaxonId>,
    ) -> RepoResult<bool>;
    /// Appends a taxon under its parent and marks the taxonomy stale.
    fn create_taxon(&self, taxon: &Taxon) -> RepoResult<Taxon>;
    /// Persists taxon fields; optionally marks the taxonomy stale.
    fn update_taxon(&self, taxon: &Taxon, hierarchy_changed: bool) -> RepoResult<()>;
    /// Deletes one taxon (rules cascade) and marks the taxonomy stale.
    fn delete_taxon(&self, taxonomy_uuid: TaxonomyId, taxon_uuid: TaxonId) -> RepoResult<()>;
}

/// SQLite-backed taxonomy repository.
pub struct SqliteTaxonomyRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaxonomyRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_current(conn)?;
        Ok(Self { conn })
    }
}

impl TaxonomyRepository for SqliteTaxonomyRepository<'_> {
    fn create_taxonomy(&self, taxonomy: &Taxonomy, root: &Taxon) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO taxonomies (taxonomy_uuid, name, marked_for_rebuild)
             VALUES (?1, ?2, ?3);",
            params![
                taxonomy.uuid.to_string(),
                taxonomy.name.as_str(),
                bool_to_int(taxonomy.marked_for_rebuild),
            ],
        )?;
        insert_taxon_row(&tx, root, 0)?;
        tx.commit()?;
        Ok(())
    }

    fn get_taxonomy(&self, taxonomy_uuid: TaxonomyId) -> RepoResult<Option<Taxonomy>> {
        let row = self
            .conn
            .query_row(
                "SELECT name, marked_for_rebuild
                 FROM taxonomies
                 WHERE taxonomy_uuid = ?1;",
                [taxonomy_uuid.to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        row.map(|(name, marked)| {
            Ok(Taxonomy {
                uuid: taxonomy_uuid,
                name,
                marked_for_rebuild: parse_flag(marked, "taxonomies.marked_for_rebuild")?,
            })
        })
        .transpose()
    }

    fn get_taxon(
        &self,
        taxonomy_uuid: TaxonomyId,
        taxon_uuid: TaxonId,
    ) -> RepoResult<Option<Taxon>> {
        load_taxon(self.conn, taxonomy_uuid, taxon_uuid)
    }

    fn list_children(
        &self,
        taxonomy_uuid: TaxonomyId,
        parent_uuid: TaxonId,
    ) -> RepoResult<Vec<Taxon>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TAXON_SELECT_SQL}
             WHERE taxonomy_uuid = ?1
               AND parent_uuid = ?2
             ORDER BY position ASC, taxon_uuid ASC;"
        ))?;
        let mut rows = stmt.query(params![taxonomy_uuid.to_string(), parent_uuid.to_string()])?;
        let mut children = Vec::new();
        while let Some(row) = rows.next()? {
            children.push(parse_taxon_row(row)?);
        }
        Ok(children)
    }

    fn has_children(&self, taxon_uuid: TaxonId) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM taxons WHERE parent_uuid = ?1);",
            [taxon_uuid.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn sibling_name_exists(
        &self,
        taxonomy_uuid: TaxonomyId,
        parent_uuid: Option<TaxonId>,
        name: &str,
        exclude: Option<TaxonId>,
    ) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM taxons
                WHERE taxonomy_uuid = ?1
                  AND parent_uuid IS ?2
                  AND name = ?3
                  AND taxon_uuid IS NOT ?4
            );",
            params![
                taxonomy_uuid.to_string(),
                parent_uuid.map(|value| value.to_string()),
                name,
                exclude.map(|value| value.to_string()),
            ],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn create_taxon(&self, taxon: &Taxon) -> RepoResult<Taxon> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let position = next_position(&tx, taxon.taxonomy_uuid, taxon.parent_uuid)?;
        insert_taxon_row(&tx, taxon, position)?;
        mark_hierarchy_stale(&tx, taxon.taxonomy_uuid)?;
        tx.commit()?;

        load_taxon(self.conn, taxon.taxonomy_uuid, taxon.uuid)?
            .ok_or(RepoError::TaxonNotFound(taxon.uuid))
    }

    fn update_taxon(&self, taxon: &Taxon, hierarchy_changed: bool) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE taxons
             SET parent_uuid = ?3,
                 name = ?4,
                 slug = ?5,
                 position = ?6,
                 automatic = ?7,
                 marked_for_regenerate_products = ?8,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE taxon_uuid = ?1
               AND taxonomy_uuid = ?2;",
            params![
                taxon.uuid.to_string(),
                taxon.taxonomy_uuid.to_string(),
                taxon.parent_uuid.map(|value| value.to_string()),
                taxon.name.as_str(),
                taxon.slug.as_str(),
                taxon.position,
                bool_to_int(taxon.automatic),
                bool_to_int(taxon.marked_for_regenerate_products),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::TaxonNotFound(taxon.uuid));
        }
        if hierarchy_changed {
            mark_hierarchy_stale(&tx, taxon.taxonomy_uuid)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_taxon(&self, taxonomy_uuid: TaxonomyId, taxon_uuid: TaxonId) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "DELETE FROM taxons
             WHERE taxon_uuid = ?1
               AND taxonomy_uuid = ?2;",
            params![taxon_uuid.to_string(), taxonomy_uuid.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::TaxonNotFound(taxon_uuid));
        }
        mark_hierarchy_stale(&tx, taxonomy_uuid)?;
        tx.commit()?;
        Ok(())
    }
}

impl StaleWorkRepository for SqliteTaxonomyRepository<'_> {
    fn stale_hierarchies(&self) -> RepoResult<Vec<TaxonomyId>> {
        list_uuids(
            self.conn,
            "SELECT taxonomy_uuid
             FROM taxonomies
             WHERE marked_for_rebuild = 1
             ORDER BY taxonomy_uuid ASC;",
            "taxonomies.taxonomy_uuid",
        )
    }

    fn stale_product_sets(&self) -> RepoResult<Vec<TaxonId>> {
        list_uuids(
            self.conn,
            "SELECT taxon_uuid
             FROM taxons
             WHERE marked_for_regenerate_products = 1
             ORDER BY taxon_uuid ASC;",
            "taxons.taxon_uuid",
        )
    }

    fn clear_hierarchy_marker(&self, taxonomy_uuid: TaxonomyId) -> RepoResult<()> {
        self.conn.execute(
            "UPDATE taxonomies
             SET marked_for_rebuild = 0,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE taxonomy_uuid = ?1
               AND marked_for_rebuild = 1;",
            [taxonomy_uuid.to_string()],
        )?;
        Ok(())
    }

    fn clear_product_marker(&self, taxon_uuid: TaxonId) -> RepoResult<()> {
        self.conn.execute(
            "UPDATE taxons
             SET marked_for_regenerate_products = 0,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE taxon_uuid = ?1
               AND marked_for_regenerate_products = 1;",
            [taxon_uuid.to_string()],
        )?;
        Ok(())
    }
}

fn insert_taxon_row(conn: &Connection, taxon: &Taxon, position: i64) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO taxons (
            taxon_uuid,
            taxonomy_uuid,
            parent_uuid,
            name,
            slug,
            position,
            automatic,
            marked_for_regenerate_products
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
        params![
            taxon.uuid.to_string(),
            taxon.taxonomy_uuid.to_string(),
            taxon.parent_uuid.map(|value| value.to_string()),
            taxon.name.as_str(),
            taxon.slug.as_str(),
            position,
            bool_to_int(taxon.automatic),
            bool_to_int(taxon.marked_for_regenerate_products),
        ],
    )?;
    Ok(())
}

fn load_taxon(
    conn: &Connection,
    taxonomy_uuid: TaxonomyId,
    taxon_uuid: TaxonId,
) -> RepoResult<Option<Taxon>> {
    let mut stmt = conn.prepare(&format!(
        "{TAXON_SELECT_SQL}
         WHERE taxon_uuid = ?1
           AND taxonomy_uuid = ?2;"
    ))?;
    let mut rows = stmt.query(params![taxon_uuid.to_string(), taxonomy_uuid.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_taxon_row(row)?));
    }
    Ok(None)
}

fn next_position(
    conn: &Connection,
    taxonomy_uuid: TaxonomyId,
    parent_uuid: Option<TaxonId>,
) -> RepoResult<i64> {
    let next = conn.query_row(
        "SELECT COALESCE(MAX(position), -1) + 1
         FROM taxons
         WHERE taxonomy_uuid = ?1
           AND parent_uuid IS ?2;",
        params![
            taxonomy_uuid.to_string(),
            parent_uuid.map(|value| value.to_string()),
        ],
        |row| row.get(0),
    )?;
    Ok(next)
}

fn mark_hierarchy_stale(conn: &Connection, taxonomy_uuid: TaxonomyId) -> RepoResult<()> {
    let changed = conn.execute(
        "UPDATE taxonomies
         SET marked_for_rebuild = 1,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE taxonomy_uuid = ?1;",
        [taxonomy_uuid.to_string()],
    )?;
    if changed == 0 {
        return Err(RepoError::TaxonomyNotFound(taxonomy_uuid));
    }
    Ok(())
}

fn list_uuids(
    conn: &Connection,
    sql: &str,
    column: &'static str,
) -> RepoResult<Vec<uuid::Uuid>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        ids.push(parse_uuid(&value, column)?);
    }
    Ok(ids)
}

fn parse_taxon_row(row: &Row<'_>) -> RepoResult<Taxon> {
    let uuid_text: String = row.get("taxon_uuid")?;
    let taxonomy_text: String = row.get("taxonomy_uuid")?;
    let parent_uuid = row
        .get::<_, Option<String>>("parent_uuid")?
        .map(|value| parse_uuid(&value, "taxons.parent_uuid"))
        .transpose()?;

    Ok(Taxon {
        uuid: parse_uuid(&uuid_text, "taxons.taxon_uuid")?,
        taxonomy_uuid: parse_uuid(&taxonomy_text, "taxons.taxonomy_uuid")?,
        parent_uuid,
        name: row.get("name")?,
        slug: row.get("slug")?,
        position: row.get("position")?,
        automatic: parse_flag(row.get("automatic")?, "taxons.automatic")?,
        marked_for_regenerate_products: parse_flag(
            row.get("marked_for_regenerate_products")?,
            "taxons.marked_for_regenerate_products",
        )?,
    })
}
