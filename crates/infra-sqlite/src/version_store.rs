// SQLite Version Store
//
// Published versions, groups, comparisons, transformations and package
// transitions. Finalizer writes go through [`SqlitePublishTransaction`].

use crate::error::{from_json, map_sqlx_error};
use apihub_core::domain::{
    ApiType, BuildType, ChangeSummary, ComparisonKey, ComparisonResult, Document, GroupTemplate,
    Operation, OperationGroup, PackageRef, TransformedDocuments, VersionInfo, VersionRef,
    VersionStatus,
};
use apihub_core::error::{AppError, Result};
use apihub_core::port::{
    ComparisonRepository, GroupRepository, PackageTransitionRepository, PublishTransaction,
    TimeProvider, Transaction, TransactionalVersionRepository, VersionRepository,
};
use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool, Transaction as SqlxTransaction};
use std::sync::Arc;

pub struct SqliteVersionStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteVersionStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    /// Register a package without publishing anything into it
    pub async fn ensure_package(&self, package_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO packages (package_id, created_at) VALUES (?, ?) ON CONFLICT(package_id) DO NOTHING",
        )
        .bind(package_id)
        .bind(self.time_provider.now_millis())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl VersionRepository for SqliteVersionStore {
    async fn package_exists(&self, package_id: &str) -> Result<bool> {
        let found: Option<String> =
            sqlx::query_scalar("SELECT package_id FROM packages WHERE package_id = ?")
                .bind(package_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(found.is_some())
    }

    async fn latest_revision(&self, package_id: &str, version: &str) -> Result<Option<i32>> {
        sqlx::query_scalar(
            "SELECT MAX(revision) FROM versions WHERE package_id = ? AND version = ?",
        )
        .bind(package_id)
        .bind(version)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn get_version(&self, version: &VersionRef) -> Result<Option<VersionInfo>> {
        let row = sqlx::query_as::<_, VersionRow>(
            "SELECT * FROM versions WHERE package_id = ? AND version = ? AND revision = ?",
        )
        .bind(&version.package_id)
        .bind(&version.version)
        .bind(version.revision)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(VersionRow::into_info).transpose()
    }

    async fn list_documents(&self, version: &VersionRef) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT slug, file_id, format, api_type, title, hash FROM documents
            WHERE package_id = ? AND version = ? AND revision = ?
            ORDER BY rowid
            "#,
        )
        .bind(&version.package_id)
        .bind(&version.version)
        .bind(version.revision)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(DocumentRow::into_document).collect()
    }

    async fn list_operations(&self, version: &VersionRef) -> Result<Vec<Operation>> {
        let rows = sqlx::query_as::<_, OperationRow>(
            r#"
            SELECT operation_id, api_type, document_slug, method, path, title, hash
            FROM operations
            WHERE package_id = ? AND version = ? AND revision = ?
            ORDER BY rowid
            "#,
        )
        .bind(&version.package_id)
        .bind(&version.version)
        .bind(version.revision)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(OperationRow::into_operation).collect()
    }

    async fn list_ref_edges(&self, from: &VersionRef) -> Result<Vec<VersionRef>> {
        let rows: Vec<(String, String, i32)> = sqlx::query_as(
            r#"
            SELECT to_package_id, to_version, to_revision FROM ref_edges
            WHERE from_package_id = ? AND from_version = ? AND from_revision = ?
            ORDER BY rowid
            "#,
        )
        .bind(&from.package_id)
        .bind(&from.version)
        .bind(from.revision)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows
            .into_iter()
            .map(|(package_id, version, revision)| VersionRef::new(package_id, version, revision))
            .collect())
    }

    async fn get_transformed(
        &self,
        version: &VersionRef,
        api_type: ApiType,
        group_name: &str,
        build_type: BuildType,
        format: &str,
    ) -> Result<Option<TransformedDocuments>> {
        let row = sqlx::query_as::<_, TransformedRow>(
            r#"
            SELECT * FROM transformed_documents
            WHERE package_id = ? AND version = ? AND revision = ?
              AND api_type = ? AND group_name = ? AND build_type = ? AND format = ?
            "#,
        )
        .bind(&version.package_id)
        .bind(&version.version)
        .bind(version.revision)
        .bind(api_type.as_str())
        .bind(group_name)
        .bind(build_type.as_str())
        .bind(format)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(TransformedRow::into_documents).transpose()
    }
}

#[async_trait]
impl GroupRepository for SqliteVersionStore {
    async fn get_group(
        &self,
        package_id: &str,
        version: &str,
        api_type: ApiType,
        group_name: &str,
    ) -> Result<Option<OperationGroup>> {
        let row = sqlx::query_as::<_, GroupRow>(
            r#"
            SELECT * FROM operation_groups
            WHERE package_id = ? AND version = ? AND api_type = ? AND group_name = ?
            "#,
        )
        .bind(package_id)
        .bind(version)
        .bind(api_type.as_str())
        .bind(group_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(GroupRow::into_group).transpose()
    }

    async fn list_groups(
        &self,
        package_id: &str,
        version: &str,
        api_type: ApiType,
    ) -> Result<Vec<OperationGroup>> {
        let rows = sqlx::query_as::<_, GroupRow>(
            r#"
            SELECT * FROM operation_groups
            WHERE package_id = ? AND version = ? AND api_type = ?
            ORDER BY group_name
            "#,
        )
        .bind(package_id)
        .bind(version)
        .bind(api_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(GroupRow::into_group).collect()
    }

    async fn upsert_group(&self, group: &OperationGroup) -> Result<()> {
        upsert_group(&self.pool, group).await
    }

    async fn delete_group(
        &self,
        package_id: &str,
        version: &str,
        api_type: ApiType,
        group_name: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM operation_groups
            WHERE package_id = ? AND version = ? AND api_type = ? AND group_name = ?
            "#,
        )
        .bind(package_id)
        .bind(version)
        .bind(api_type.as_str())
        .bind(group_name)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ComparisonRepository for SqliteVersionStore {
    async fn get_comparison(&self, key: &ComparisonKey) -> Result<Option<ComparisonResult>> {
        let row = sqlx::query_as::<_, ComparisonRow>(
            r#"
            SELECT * FROM comparisons
            WHERE package_id = ? AND version = ? AND revision = ?
              AND previous_version_package_id = ? AND previous_version = ? AND previous_revision = ?
            "#,
        )
        .bind(&key.package_id)
        .bind(&key.version)
        .bind(key.revision)
        .bind(&key.previous_version_package_id)
        .bind(&key.previous_version)
        .bind(key.previous_revision)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(ComparisonRow::into_result))
    }
}

#[async_trait]
impl PackageTransitionRepository for SqliteVersionStore {
    async fn find_transition(&self, old_package_id: &str) -> Result<Option<String>> {
        sqlx::query_scalar(
            "SELECT new_package_id FROM package_transitions WHERE old_package_id = ?",
        )
        .bind(old_package_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn record_transition(&self, old_package_id: &str, new_package_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO package_transitions (old_package_id, new_package_id, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(old_package_id) DO UPDATE SET
                new_package_id = excluded.new_package_id,
                created_at = excluded.created_at
            "#,
        )
        .bind(old_package_id)
        .bind(new_package_id)
        .bind(self.time_provider.now_millis())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl TransactionalVersionRepository for SqliteVersionStore {
    async fn begin_publish(&self) -> Result<Box<dyn PublishTransaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(SqlitePublishTransaction::new(
            tx,
            Arc::clone(&self.time_provider),
        )))
    }
}

async fn upsert_group<'e, E>(executor: E, group: &OperationGroup) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let operation_ids = serde_json::to_string(&group.operation_ids)?;
    sqlx::query(
        r#"
        INSERT INTO operation_groups (
            package_id, version, api_type, group_name, description,
            operation_ids, template_file_name, template_ref
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(package_id, version, api_type, group_name) DO UPDATE SET
            description = excluded.description,
            operation_ids = excluded.operation_ids,
            template_file_name = excluded.template_file_name,
            template_ref = excluded.template_ref
        "#,
    )
    .bind(&group.package_id)
    .bind(&group.version)
    .bind(group.api_type.as_str())
    .bind(&group.group_name)
    .bind(&group.description)
    .bind(&operation_ids)
    .bind(group.template.as_ref().map(|t| t.file_name.as_str()))
    .bind(group.template.as_ref().map(|t| t.artifact_ref.as_str()))
    .execute(executor)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

/// Finalizer writes for one build, applied on commit
pub struct SqlitePublishTransaction {
    tx: SqlxTransaction<'static, Sqlite>,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqlitePublishTransaction {
    pub fn new(tx: SqlxTransaction<'static, Sqlite>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self { tx, time_provider }
    }
}

#[async_trait]
impl Transaction for SqlitePublishTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl PublishTransaction for SqlitePublishTransaction {
    async fn next_revision(&mut self, package_id: &str, version: &str) -> Result<i32> {
        // Write first so the transaction holds the write lock before reading
        sqlx::query(
            "INSERT INTO packages (package_id, created_at) VALUES (?, ?) ON CONFLICT(package_id) DO NOTHING",
        )
        .bind(package_id)
        .bind(self.time_provider.now_millis())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        let latest: Option<i32> = sqlx::query_scalar(
            "SELECT MAX(revision) FROM versions WHERE package_id = ? AND version = ?",
        )
        .bind(package_id)
        .bind(version)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(latest.unwrap_or(0) + 1)
    }

    async fn insert_version(&mut self, info: &VersionInfo) -> Result<()> {
        let vref = &info.version_ref;
        sqlx::query(
            "INSERT INTO packages (package_id, created_at) VALUES (?, ?) ON CONFLICT(package_id) DO NOTHING",
        )
        .bind(&vref.package_id)
        .bind(info.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO versions (
                package_id, version, revision, status, previous_version,
                previous_version_package_id, labels, refs, created_by, created_at, build_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&vref.package_id)
        .bind(&vref.version)
        .bind(vref.revision)
        .bind(info.status.as_str())
        .bind(&info.previous_version)
        .bind(&info.previous_version_package_id)
        .bind(serde_json::to_string(&info.labels)?)
        .bind(serde_json::to_string(&info.refs)?)
        .bind(&info.created_by)
        .bind(info.created_at)
        .bind(&info.build_id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn insert_documents(&mut self, version: &VersionRef, docs: &[Document]) -> Result<()> {
        for doc in docs {
            sqlx::query(
                r#"
                INSERT INTO documents (
                    package_id, version, revision, slug, file_id, format, api_type, title, hash
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&version.package_id)
            .bind(&version.version)
            .bind(version.revision)
            .bind(&doc.slug)
            .bind(&doc.file_id)
            .bind(&doc.format)
            .bind(doc.api_type.map(|t| t.as_str()))
            .bind(&doc.title)
            .bind(&doc.hash)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        Ok(())
    }

    async fn insert_operations(&mut self, version: &VersionRef, ops: &[Operation]) -> Result<()> {
        for op in ops {
            sqlx::query(
                r#"
                INSERT INTO operations (
                    package_id, version, revision, api_type, operation_id,
                    document_slug, method, path, title, hash
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&version.package_id)
            .bind(&version.version)
            .bind(version.revision)
            .bind(op.api_type.as_str())
            .bind(&op.operation_id)
            .bind(&op.document_slug)
            .bind(&op.method)
            .bind(&op.path)
            .bind(&op.title)
            .bind(&op.hash)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        Ok(())
    }

    async fn insert_ref_edges(&mut self, from: &VersionRef, to: &[VersionRef]) -> Result<()> {
        for target in to {
            sqlx::query(
                r#"
                INSERT INTO ref_edges (
                    from_package_id, from_version, from_revision,
                    to_package_id, to_version, to_revision
                ) VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&from.package_id)
            .bind(&from.version)
            .bind(from.revision)
            .bind(&target.package_id)
            .bind(&target.version)
            .bind(target.revision)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        Ok(())
    }

    async fn upsert_group(&mut self, group: &OperationGroup) -> Result<()> {
        upsert_group(&mut *self.tx, group).await
    }

    async fn invalidate_comparisons(&mut self, package_id: &str, version: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE comparisons SET valid = 0
            WHERE valid = 1 AND (
                (package_id = ? AND version = ?)
                OR (previous_version_package_id = ? AND previous_version = ?)
            )
            "#,
        )
        .bind(package_id)
        .bind(version)
        .bind(package_id)
        .bind(version)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn upsert_comparison(&mut self, result: &ComparisonResult) -> Result<()> {
        let key = &result.key;
        sqlx::query(
            r#"
            INSERT INTO comparisons (
                package_id, version, revision,
                previous_version_package_id, previous_version, previous_revision,
                valid, added, removed, changed, artifact_ref, build_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(package_id, version, revision,
                        previous_version_package_id, previous_version, previous_revision)
            DO UPDATE SET
                valid = excluded.valid,
                added = excluded.added,
                removed = excluded.removed,
                changed = excluded.changed,
                artifact_ref = excluded.artifact_ref,
                build_id = excluded.build_id,
                created_at = excluded.created_at
            "#,
        )
        .bind(&key.package_id)
        .bind(&key.version)
        .bind(key.revision)
        .bind(&key.previous_version_package_id)
        .bind(&key.previous_version)
        .bind(key.previous_revision)
        .bind(if result.valid { 1 } else { 0 })
        .bind(result.summary.added as i64)
        .bind(result.summary.removed as i64)
        .bind(result.summary.changed as i64)
        .bind(&result.artifact_ref)
        .bind(&result.build_id)
        .bind(result.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn upsert_transformed(&mut self, docs: &TransformedDocuments) -> Result<()> {
        let vref = &docs.version_ref;
        sqlx::query(
            r#"
            INSERT INTO transformed_documents (
                package_id, version, revision, api_type, group_name,
                build_type, format, artifact_ref, build_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(package_id, version, revision, api_type, group_name, build_type, format)
            DO UPDATE SET
                artifact_ref = excluded.artifact_ref,
                build_id = excluded.build_id,
                created_at = excluded.created_at
            "#,
        )
        .bind(&vref.package_id)
        .bind(&vref.version)
        .bind(vref.revision)
        .bind(docs.api_type.as_str())
        .bind(&docs.group_name)
        .bind(&docs.build_type)
        .bind(&docs.format)
        .bind(&docs.artifact_ref)
        .bind(&docs.build_id)
        .bind(docs.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

// Row types

fn parse_api_type(raw: &str) -> Result<ApiType> {
    ApiType::parse(raw).map_err(|_| AppError::Database(format!("Unknown API type '{}'", raw)))
}

#[derive(Debug, sqlx::FromRow)]
struct VersionRow {
    package_id: String,
    version: String,
    revision: i32,
    status: String,
    previous_version: Option<String>,
    previous_version_package_id: Option<String>,
    labels: String,
    refs: String,
    created_by: String,
    created_at: i64,
    build_id: String,
}

impl VersionRow {
    fn into_info(self) -> Result<VersionInfo> {
        let status = VersionStatus::parse(&self.status).ok_or_else(|| {
            AppError::Database(format!("Unknown version status '{}'", self.status))
        })?;
        let labels: Vec<String> = from_json("labels", &self.labels)?;
        let refs: Vec<PackageRef> = from_json("refs", &self.refs)?;
        Ok(VersionInfo {
            version_ref: VersionRef::new(self.package_id, self.version, self.revision),
            status,
            previous_version: self.previous_version,
            previous_version_package_id: self.previous_version_package_id,
            labels,
            refs,
            created_by: self.created_by,
            created_at: self.created_at,
            build_id: self.build_id,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    slug: String,
    file_id: String,
    format: String,
    api_type: Option<String>,
    title: Option<String>,
    hash: String,
}

impl DocumentRow {
    fn into_document(self) -> Result<Document> {
        Ok(Document {
            slug: self.slug,
            file_id: self.file_id,
            format: self.format,
            api_type: self.api_type.as_deref().map(parse_api_type).transpose()?,
            title: self.title,
            hash: self.hash,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OperationRow {
    operation_id: String,
    api_type: String,
    document_slug: String,
    method: String,
    path: String,
    title: Option<String>,
    hash: String,
}

impl OperationRow {
    fn into_operation(self) -> Result<Operation> {
        Ok(Operation {
            operation_id: self.operation_id,
            api_type: parse_api_type(&self.api_type)?,
            document_slug: self.document_slug,
            method: self.method,
            path: self.path,
            title: self.title,
            hash: self.hash,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct GroupRow {
    package_id: String,
    version: String,
    api_type: String,
    group_name: String,
    description: Option<String>,
    operation_ids: String,
    template_file_name: Option<String>,
    template_ref: Option<String>,
}

impl GroupRow {
    fn into_group(self) -> Result<OperationGroup> {
        let template = match (self.template_file_name, self.template_ref) {
            (Some(file_name), Some(artifact_ref)) => Some(GroupTemplate {
                file_name,
                artifact_ref,
            }),
            _ => None,
        };
        Ok(OperationGroup {
            package_id: self.package_id,
            version: self.version,
            api_type: parse_api_type(&self.api_type)?,
            group_name: self.group_name,
            description: self.description,
            operation_ids: from_json("operation_ids", &self.operation_ids)?,
            template,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ComparisonRow {
    package_id: String,
    version: String,
    revision: i32,
    previous_version_package_id: String,
    previous_version: String,
    previous_revision: i32,
    valid: i64,
    added: i64,
    removed: i64,
    changed: i64,
    artifact_ref: String,
    build_id: String,
    created_at: i64,
}

impl ComparisonRow {
    fn into_result(self) -> ComparisonResult {
        ComparisonResult {
            key: ComparisonKey {
                package_id: self.package_id,
                version: self.version,
                revision: self.revision,
                previous_version_package_id: self.previous_version_package_id,
                previous_version: self.previous_version,
                previous_revision: self.previous_revision,
            },
            valid: self.valid != 0,
            summary: ChangeSummary {
                added: self.added as u32,
                removed: self.removed as u32,
                changed: self.changed as u32,
            },
            artifact_ref: self.artifact_ref,
            build_id: self.build_id,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransformedRow {
    package_id: String,
    version: String,
    revision: i32,
    api_type: String,
    group_name: String,
    build_type: String,
    format: String,
    artifact_ref: String,
    build_id: String,
    created_at: i64,
}

impl TransformedRow {
    fn into_documents(self) -> Result<TransformedDocuments> {
        Ok(TransformedDocuments {
            version_ref: VersionRef::new(self.package_id, self.version, self.revision),
            api_type: parse_api_type(&self.api_type)?,
            group_name: self.group_name,
            build_type: self.build_type,
            format: self.format,
            artifact_ref: self.artifact_ref,
            build_id: self.build_id,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_pool;
    use apihub_core::port::time_provider::SystemTimeProvider;

    async fn setup() -> SqliteVersionStore {
        SqliteVersionStore::new(memory_pool().await, Arc::new(SystemTimeProvider))
    }

    fn info(vref: VersionRef) -> VersionInfo {
        VersionInfo {
            version_ref: vref,
            status: VersionStatus::Release,
            previous_version: None,
            previous_version_package_id: None,
            labels: vec!["stable".into()],
            refs: vec![PackageRef::pinned("lib", "v1", 1)],
            created_by: "alice".into(),
            created_at: 10,
            build_id: "b1".into(),
        }
    }

    fn op(id: &str) -> Operation {
        Operation {
            operation_id: id.into(),
            api_type: ApiType::Rest,
            document_slug: "petstore".into(),
            method: "get".into(),
            path: "/pets".into(),
            title: None,
            hash: "h".into(),
        }
    }

    async fn publish(store: &SqliteVersionStore, package_id: &str, version: &str) -> VersionRef {
        let mut tx = store.begin_publish().await.unwrap();
        let revision = tx.next_revision(package_id, version).await.unwrap();
        let vref = VersionRef::new(package_id, version, revision);
        tx.insert_version(&info(vref.clone())).await.unwrap();
        tx.insert_documents(
            &vref,
            &[Document {
                slug: "petstore".into(),
                file_id: "petstore.yaml".into(),
                format: "yaml".into(),
                api_type: Some(ApiType::Rest),
                title: Some("Petstore".into()),
                hash: "abc".into(),
            }],
        )
        .await
        .unwrap();
        tx.insert_operations(&vref, &[op("get-pets"), op("post-pets")])
            .await
            .unwrap();
        tx.commit().await.unwrap();
        vref
    }

    #[tokio::test]
    async fn test_publish_round_trip() {
        let store = setup().await;
        let v1 = publish(&store, "pkg", "v1").await;
        let v2 = publish(&store, "pkg", "v1").await;
        assert_eq!(v1.revision, 1);
        assert_eq!(v2.revision, 2);
        assert_eq!(store.latest_revision("pkg", "v1").await.unwrap(), Some(2));
        assert_eq!(store.latest_revision("pkg", "v9").await.unwrap(), None);
        assert!(store.package_exists("pkg").await.unwrap());

        let loaded = store.get_version(&v2).await.unwrap().unwrap();
        assert_eq!(loaded, info(v2.clone()));
        let docs = store.list_documents(&v2).await.unwrap();
        assert_eq!(docs[0].api_type, Some(ApiType::Rest));
        let ops: Vec<_> = store
            .list_operations(&v2)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.operation_id)
            .collect();
        assert_eq!(ops, vec!["get-pets", "post-pets"]);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = setup().await;
        let mut tx = store.begin_publish().await.unwrap();
        let revision = tx.next_revision("pkg", "v1").await.unwrap();
        tx.insert_version(&info(VersionRef::new("pkg", "v1", revision)))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.latest_revision("pkg", "v1").await.unwrap(), None);
        assert!(!store.package_exists("pkg").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishes_get_consecutive_revisions() {
        const PUBLISHERS: i32 = 8;
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("hub.db").display());
        let pool = crate::create_pool(&url, PUBLISHERS as u32).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        let store = Arc::new(SqliteVersionStore::new(pool, Arc::new(SystemTimeProvider)));

        let tasks: Vec<_> = (0..PUBLISHERS)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let mut tx = store.begin_publish().await.unwrap();
                    let revision = tx.next_revision("pkg", "v1").await.unwrap();
                    tx.insert_version(&info(VersionRef::new("pkg", "v1", revision)))
                        .await
                        .unwrap();
                    tx.commit().await.unwrap();
                    revision
                })
            })
            .collect();
        let mut revisions = Vec::new();
        for task in tasks {
            revisions.push(task.await.unwrap());
        }
        revisions.sort_unstable();

        assert_eq!(revisions, (1..=PUBLISHERS).collect::<Vec<_>>());
        assert_eq!(
            store.latest_revision("pkg", "v1").await.unwrap(),
            Some(PUBLISHERS)
        );
    }

    #[tokio::test]
    async fn test_comparison_invalidation() {
        let store = setup().await;
        let key = ComparisonKey::new(
            &VersionRef::new("pkg", "v2", 1),
            &VersionRef::new("pkg", "v1", 1),
        );
        let result = ComparisonResult {
            key: key.clone(),
            valid: true,
            summary: ChangeSummary {
                added: 1,
                removed: 0,
                changed: 2,
            },
            artifact_ref: "log".into(),
            build_id: "b1".into(),
            created_at: 10,
        };
        let mut tx = store.begin_publish().await.unwrap();
        tx.upsert_comparison(&result).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.get_comparison(&key).await.unwrap().unwrap(), result);

        // A new revision of the previous side invalidates it
        let mut tx = store.begin_publish().await.unwrap();
        assert_eq!(tx.invalidate_comparisons("pkg", "v1").await.unwrap(), 1);
        tx.commit().await.unwrap();
        assert!(!store.get_comparison(&key).await.unwrap().unwrap().valid);
    }

    #[tokio::test]
    async fn test_groups_and_transitions() {
        let store = setup().await;
        let group = OperationGroup {
            package_id: "pkg".into(),
            version: "v1".into(),
            api_type: ApiType::Rest,
            group_name: "public".into(),
            description: Some("Public API".into()),
            operation_ids: vec!["get-pets".into()],
            template: Some(GroupTemplate {
                file_name: "tpl.md".into(),
                artifact_ref: "t".into(),
            }),
        };
        GroupRepository::upsert_group(&store, &group).await.unwrap();
        let mut changed = group.clone();
        changed.template = None;
        GroupRepository::upsert_group(&store, &changed).await.unwrap();

        let loaded = store
            .get_group("pkg", "v1", ApiType::Rest, "public")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, changed);
        assert_eq!(store.list_groups("pkg", "v1", ApiType::Rest).await.unwrap().len(), 1);
        assert!(store
            .delete_group("pkg", "v1", ApiType::Rest, "public")
            .await
            .unwrap());

        store.record_transition("old", "new").await.unwrap();
        assert_eq!(
            store.find_transition("old").await.unwrap().as_deref(),
            Some("new")
        );
        assert!(store.find_transition("new").await.unwrap().is_none());
    }
}
