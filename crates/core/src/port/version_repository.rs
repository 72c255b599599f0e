// Version Store Ports (read side)
//
// Split into capability sets; the SQL store implements all of them.

use crate::domain::{
    ApiType, BuildType, ComparisonKey, ComparisonResult, Document, Operation, OperationGroup,
    TransformedDocuments, VersionInfo, VersionRef,
};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait VersionRepository: Send + Sync {
    async fn package_exists(&self, package_id: &str) -> Result<bool>;

    /// Highest revision of (package, version), if published
    async fn latest_revision(&self, package_id: &str, version: &str) -> Result<Option<i32>>;

    async fn get_version(&self, version: &VersionRef) -> Result<Option<VersionInfo>>;

    async fn list_documents(&self, version: &VersionRef) -> Result<Vec<Document>>;

    async fn list_operations(&self, version: &VersionRef) -> Result<Vec<Operation>>;

    /// Direct reference edges out of `from`
    async fn list_ref_edges(&self, from: &VersionRef) -> Result<Vec<VersionRef>>;

    async fn get_transformed(
        &self,
        version: &VersionRef,
        api_type: ApiType,
        group_name: &str,
        build_type: BuildType,
        format: &str,
    ) -> Result<Option<TransformedDocuments>>;
}

#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn get_group(
        &self,
        package_id: &str,
        version: &str,
        api_type: ApiType,
        group_name: &str,
    ) -> Result<Option<OperationGroup>>;

    async fn list_groups(
        &self,
        package_id: &str,
        version: &str,
        api_type: ApiType,
    ) -> Result<Vec<OperationGroup>>;

    async fn upsert_group(&self, group: &OperationGroup) -> Result<()>;

    async fn delete_group(
        &self,
        package_id: &str,
        version: &str,
        api_type: ApiType,
        group_name: &str,
    ) -> Result<bool>;
}

#[async_trait]
pub trait ComparisonRepository: Send + Sync {
    /// Stored comparison for the key, valid or not
    async fn get_comparison(&self, key: &ComparisonKey) -> Result<Option<ComparisonResult>>;
}

#[async_trait]
pub trait PackageTransitionRepository: Send + Sync {
    /// Direct successor of a renamed/moved package
    async fn find_transition(&self, old_package_id: &str) -> Result<Option<String>>;

    async fn record_transition(&self, old_package_id: &str, new_package_id: &str) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use crate::port::transaction::{
        PublishTransaction, Transaction, TransactionalVersionRepository,
    };
    use std::collections::{BTreeSet, HashMap};
    use std::sync::{Arc, Mutex};

    type GroupKey = (String, String, ApiType, String);
    type TransformedKey = (VersionRef, ApiType, String, BuildType, String);

    #[derive(Default, Clone)]
    struct State {
        packages: BTreeSet<String>,
        versions: HashMap<VersionRef, VersionInfo>,
        documents: HashMap<VersionRef, Vec<Document>>,
        operations: HashMap<VersionRef, Vec<Operation>>,
        edges: HashMap<VersionRef, Vec<VersionRef>>,
        groups: HashMap<GroupKey, OperationGroup>,
        comparisons: HashMap<ComparisonKey, ComparisonResult>,
        transformed: HashMap<TransformedKey, TransformedDocuments>,
        transitions: HashMap<String, String>,
    }

    impl State {
        fn latest_revision(&self, package_id: &str, version: &str) -> Option<i32> {
            self.versions
                .keys()
                .filter(|v| v.package_id == package_id && v.version == version)
                .map(|v| v.revision)
                .max()
        }
    }

    fn group_key(g: &OperationGroup) -> GroupKey {
        (
            g.package_id.clone(),
            g.version.clone(),
            g.api_type,
            g.group_name.clone(),
        )
    }

    /// In-memory version store; transactions stage a copy and swap it in on commit
    #[derive(Default, Clone)]
    pub struct InMemoryVersionStore {
        state: Arc<Mutex<State>>,
        fail_commit: Arc<Mutex<bool>>,
    }

    impl InMemoryVersionStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the next commit fail (transaction atomicity tests)
        pub fn fail_next_commit(&self) {
            *self.fail_commit.lock().unwrap() = true;
        }

        pub fn add_package(&self, package_id: &str) {
            self.state
                .lock()
                .unwrap()
                .packages
                .insert(package_id.to_string());
        }

        /// Seed a published revision directly
        pub fn seed_version(&self, info: VersionInfo, docs: Vec<Document>, ops: Vec<Operation>) {
            let mut state = self.state.lock().unwrap();
            let vref = info.version_ref.clone();
            state.packages.insert(vref.package_id.clone());
            state.documents.insert(vref.clone(), docs);
            state.operations.insert(vref.clone(), ops);
            state.versions.insert(vref, info);
        }

        pub fn seed_edges(&self, from: VersionRef, to: Vec<VersionRef>) {
            self.state.lock().unwrap().edges.insert(from, to);
        }

        pub fn version_count(&self) -> usize {
            self.state.lock().unwrap().versions.len()
        }

        pub fn comparison_count(&self) -> usize {
            self.state.lock().unwrap().comparisons.len()
        }
    }

    #[async_trait]
    impl VersionRepository for InMemoryVersionStore {
        async fn package_exists(&self, package_id: &str) -> Result<bool> {
            Ok(self.state.lock().unwrap().packages.contains(package_id))
        }

        async fn latest_revision(&self, package_id: &str, version: &str) -> Result<Option<i32>> {
            Ok(self.state.lock().unwrap().latest_revision(package_id, version))
        }

        async fn get_version(&self, version: &VersionRef) -> Result<Option<VersionInfo>> {
            Ok(self.state.lock().unwrap().versions.get(version).cloned())
        }

        async fn list_documents(&self, version: &VersionRef) -> Result<Vec<Document>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .documents
                .get(version)
                .cloned()
                .unwrap_or_default())
        }

        async fn list_operations(&self, version: &VersionRef) -> Result<Vec<Operation>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .operations
                .get(version)
                .cloned()
                .unwrap_or_default())
        }

        async fn list_ref_edges(&self, from: &VersionRef) -> Result<Vec<VersionRef>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .edges
                .get(from)
                .cloned()
                .unwrap_or_default())
        }

        async fn get_transformed(
            &self,
            version: &VersionRef,
            api_type: ApiType,
            group_name: &str,
            build_type: BuildType,
            format: &str,
        ) -> Result<Option<TransformedDocuments>> {
            let key = (
                version.clone(),
                api_type,
                group_name.to_string(),
                build_type,
                format.to_string(),
            );
            Ok(self.state.lock().unwrap().transformed.get(&key).cloned())
        }
    }

    #[async_trait]
    impl GroupRepository for InMemoryVersionStore {
        async fn get_group(
            &self,
            package_id: &str,
            version: &str,
            api_type: ApiType,
            group_name: &str,
        ) -> Result<Option<OperationGroup>> {
            let key = (
                package_id.to_string(),
                version.to_string(),
                api_type,
                group_name.to_string(),
            );
            Ok(self.state.lock().unwrap().groups.get(&key).cloned())
        }

        async fn list_groups(
            &self,
            package_id: &str,
            version: &str,
            api_type: ApiType,
        ) -> Result<Vec<OperationGroup>> {
            let mut groups: Vec<_> = self
                .state
                .lock()
                .unwrap()
                .groups
                .values()
                .filter(|g| {
                    g.package_id == package_id && g.version == version && g.api_type == api_type
                })
                .cloned()
                .collect();
            groups.sort_by(|a, b| a.group_name.cmp(&b.group_name));
            Ok(groups)
        }

        async fn upsert_group(&self, group: &OperationGroup) -> Result<()> {
            self.state
                .lock()
                .unwrap()
                .groups
                .insert(group_key(group), group.clone());
            Ok(())
        }

        async fn delete_group(
            &self,
            package_id: &str,
            version: &str,
            api_type: ApiType,
            group_name: &str,
        ) -> Result<bool> {
            let key = (
                package_id.to_string(),
                version.to_string(),
                api_type,
                group_name.to_string(),
            );
            Ok(self.state.lock().unwrap().groups.remove(&key).is_some())
        }
    }

    #[async_trait]
    impl ComparisonRepository for InMemoryVersionStore {
        async fn get_comparison(&self, key: &ComparisonKey) -> Result<Option<ComparisonResult>> {
            Ok(self.state.lock().unwrap().comparisons.get(key).cloned())
        }
    }

    #[async_trait]
    impl PackageTransitionRepository for InMemoryVersionStore {
        async fn find_transition(&self, old_package_id: &str) -> Result<Option<String>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .transitions
                .get(old_package_id)
                .cloned())
        }

        async fn record_transition(&self, old_package_id: &str, new_package_id: &str) -> Result<()> {
            self.state
                .lock()
                .unwrap()
                .transitions
                .insert(old_package_id.to_string(), new_package_id.to_string());
            Ok(())
        }
    }

    pub struct InMemoryPublishTransaction {
        store: InMemoryVersionStore,
        staged: State,
    }

    #[async_trait]
    impl TransactionalVersionRepository for InMemoryVersionStore {
        async fn begin_publish(&self) -> Result<Box<dyn PublishTransaction>> {
            let staged = self.state.lock().unwrap().clone();
            Ok(Box::new(InMemoryPublishTransaction {
                store: self.clone(),
                staged,
            }))
        }
    }

    #[async_trait]
    impl Transaction for InMemoryPublishTransaction {
        async fn commit(self: Box<Self>) -> Result<()> {
            let InMemoryPublishTransaction { store, staged } = *self;
            {
                let mut fail = store.fail_commit.lock().unwrap();
                if *fail {
                    *fail = false;
                    return Err(AppError::Database("injected commit failure".into()));
                }
            }
            *store.state.lock().unwrap() = staged;
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl PublishTransaction for InMemoryPublishTransaction {
        async fn next_revision(&mut self, package_id: &str, version: &str) -> Result<i32> {
            Ok(self.staged.latest_revision(package_id, version).unwrap_or(0) + 1)
        }

        async fn insert_version(&mut self, info: &VersionInfo) -> Result<()> {
            let vref = info.version_ref.clone();
            if self.staged.versions.contains_key(&vref) {
                return Err(AppError::Conflict(format!("revision {} exists", vref)));
            }
            self.staged.packages.insert(vref.package_id.clone());
            self.staged.versions.insert(vref, info.clone());
            Ok(())
        }

        async fn insert_documents(&mut self, version: &VersionRef, docs: &[Document]) -> Result<()> {
            self.staged
                .documents
                .entry(version.clone())
                .or_default()
                .extend(docs.iter().cloned());
            Ok(())
        }

        async fn insert_operations(
            &mut self,
            version: &VersionRef,
            ops: &[Operation],
        ) -> Result<()> {
            self.staged
                .operations
                .entry(version.clone())
                .or_default()
                .extend(ops.iter().cloned());
            Ok(())
        }

        async fn insert_ref_edges(&mut self, from: &VersionRef, to: &[VersionRef]) -> Result<()> {
            self.staged
                .edges
                .entry(from.clone())
                .or_default()
                .extend(to.iter().cloned());
            Ok(())
        }

        async fn upsert_group(&mut self, group: &OperationGroup) -> Result<()> {
            self.staged.groups.insert(group_key(group), group.clone());
            Ok(())
        }

        async fn invalidate_comparisons(&mut self, package_id: &str, version: &str) -> Result<u64> {
            let mut count = 0;
            for result in self.staged.comparisons.values_mut().filter(|c| c.valid) {
                let k = &result.key;
                if (k.package_id == package_id && k.version == version)
                    || (k.previous_version_package_id == package_id
                        && k.previous_version == version)
                {
                    result.valid = false;
                    count += 1;
                }
            }
            Ok(count)
        }

        async fn upsert_comparison(&mut self, result: &ComparisonResult) -> Result<()> {
            self.staged
                .comparisons
                .insert(result.key.clone(), result.clone());
            Ok(())
        }

        async fn upsert_transformed(&mut self, docs: &TransformedDocuments) -> Result<()> {
            let build_type = BuildType::parse(&docs.build_type).ok_or_else(|| {
                AppError::InvalidState(format!("unknown build type {}", docs.build_type))
            })?;
            let key = (
                docs.version_ref.clone(),
                docs.api_type,
                docs.group_name.clone(),
                build_type,
                docs.format.clone(),
            );
            self.staged.transformed.insert(key, docs.clone());
            Ok(())
        }
    }
}
