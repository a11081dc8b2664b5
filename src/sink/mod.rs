//! Hand-off of validated knowledge graphs to a graph database.

mod db;

pub use db::{applied_migrations, run_migrations, Db};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::{OntoKgError, Result};
use crate::run::RunId;
use crate::schema::{Entity, KnowledgeGraph, Triple};
use crate::validate::validate_kg;

/// What a sink stored for one scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReceipt {
    pub namespace: String,
    pub entities: usize,
    pub triples: usize,
}

/// Receives a validated graph together with the run and scenario it belongs to.
///
/// Writing the same scenario again replaces its previous contents.
#[async_trait]
pub trait GraphSink: Send + Sync {
    async fn write_graph(&self, run_id: &RunId, scenario: &str, kg: &KnowledgeGraph) -> Result<SinkReceipt>;
}

/// SQLite-backed sink. One database file per run; each scenario is a namespace.
pub struct SqliteGraphSink {
    db: Db,
}

impl SqliteGraphSink {
    pub async fn open(path: &Path) -> Result<Self> {
        let db = Db::new(path);
        db.migrate().await?;
        Ok(Self { db })
    }

    /// Read a namespace back as a graph.
    pub async fn load_graph(&self, namespace: &str) -> Result<KnowledgeGraph> {
        let namespace = namespace.to_string();
        self.db
            .with_connection(move |conn| {
                let mut kg = KnowledgeGraph::new();
                let mut stmt = conn.prepare(
                    "SELECT entity_id, label, entity_type, aliases_json, attributes_json
                     FROM entities WHERE namespace = ?1",
                )?;
                let rows = stmt.query_map(params![namespace], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })?;
                for row in rows {
                    let (id, label, entity_type, aliases, attributes) = row?;
                    let aliases: BTreeSet<String> = match aliases {
                        Some(json) => serde_json::from_str(&json)?,
                        None => BTreeSet::new(),
                    };
                    let attributes: BTreeMap<String, String> = match attributes {
                        Some(json) => serde_json::from_str(&json)?,
                        None => BTreeMap::new(),
                    };
                    kg.insert_entity(Entity {
                        id,
                        label,
                        entity_type,
                        aliases,
                        attributes,
                    });
                }

                let mut stmt = conn.prepare(
                    "SELECT subject_id, relation, object_id FROM relations WHERE namespace = ?1",
                )?;
                let triples = stmt.query_map(params![namespace], |row| {
                    Ok(Triple::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?;
                for triple in triples {
                    kg.insert_triple(triple?);
                }
                Ok(kg)
            })
            .await
    }
}

#[async_trait]
impl GraphSink for SqliteGraphSink {
    async fn write_graph(&self, run_id: &RunId, scenario: &str, kg: &KnowledgeGraph) -> Result<SinkReceipt> {
        let validation = validate_kg(kg, None);
        if !validation.passed {
            return Err(OntoKgError::Conformance(format!(
                "refusing to hand off scenario {}: {} violations",
                scenario,
                validation.violations.len()
            )));
        }

        let namespace = scenario.to_string();
        let run_id = run_id.to_string();
        let kg = kg.clone();
        let receipt = self
            .db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM relations WHERE namespace = ?1", params![namespace])?;
                tx.execute("DELETE FROM entities WHERE namespace = ?1", params![namespace])?;
                {
                    let mut insert_entity = tx.prepare(
                        "INSERT INTO entities (namespace, entity_id, label, entity_type, aliases_json, attributes_json)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )?;
                    for entity in kg.entities() {
                        let aliases = (!entity.aliases.is_empty())
                            .then(|| serde_json::to_string(&entity.aliases))
                            .transpose()?;
                        let attributes = (!entity.attributes.is_empty())
                            .then(|| serde_json::to_string(&entity.attributes))
                            .transpose()?;
                        insert_entity.execute(params![
                            namespace,
                            entity.id,
                            entity.label,
                            entity.entity_type,
                            aliases,
                            attributes
                        ])?;
                    }
                    let mut insert_relation = tx.prepare(
                        "INSERT INTO relations (namespace, subject_id, relation, object_id) VALUES (?1, ?2, ?3, ?4)",
                    )?;
                    for triple in kg.triples() {
                        insert_relation.execute(params![
                            namespace,
                            triple.subject,
                            triple.relation,
                            triple.object
                        ])?;
                    }
                }
                tx.execute(
                    "INSERT OR REPLACE INTO handoffs (namespace, run_id, entity_count, triple_count, written_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        namespace,
                        run_id,
                        kg.entity_count() as i64,
                        kg.triple_count() as i64,
                        Utc::now().to_rfc3339()
                    ],
                )?;
                tx.commit()?;
                Ok(SinkReceipt {
                    namespace,
                    entities: kg.entity_count(),
                    triples: kg.triple_count(),
                })
            })
            .await?;

        log::info!(
            "Graph sink: {} entities, {} triples written to namespace {}",
            receipt.entities,
            receipt.triples,
            receipt.namespace
        );
        Ok(receipt)
    }
}
