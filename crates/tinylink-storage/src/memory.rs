use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use tinylink_core::{
    DeletionOutcome, DeletionTicket, Error, Repository, Result, SaveOutcome, ShortCode, UserLink,
};
use tracing::debug;

/// What [`LinkIndex::insert`] changed, so the change can be reverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Insertion {
    /// A new link was allocated.
    Created { id: u64 },
    /// The URL was already stored. `new_owner` is set if the user was not an
    /// owner before.
    Existing { id: u64, new_owner: bool },
}

impl Insertion {
    pub(crate) fn id(&self) -> u64 {
        match *self {
            Insertion::Created { id } | Insertion::Existing { id, .. } => id,
        }
    }

    /// Returns `true` if anything was written to the index.
    pub(crate) fn changed(&self) -> bool {
        !matches!(
            self,
            Insertion::Existing {
                new_owner: false,
                ..
            }
        )
    }

    pub(crate) fn outcome(&self) -> SaveOutcome {
        let code = ShortCode::from_id(self.id());
        match self {
            Insertion::Created { .. } => SaveOutcome::created(code),
            Insertion::Existing { .. } => SaveOutcome::existing(code),
        }
    }
}

/// The in-process link tables shared by the memory and file backends.
///
/// The next id is one past the highest id ever inserted or restored, so a
/// replayed journal with gaps never hands out an id twice. Callers must hold
/// exclusive access across [`LinkIndex::insert`].
#[derive(Debug, Default)]
pub(crate) struct LinkIndex {
    last_id: u64,
    links: HashMap<u64, String>,
    by_url: HashMap<String, u64>,
    owners: HashMap<String, BTreeSet<u64>>,
}

impl LinkIndex {
    pub(crate) fn len(&self) -> usize {
        self.links.len()
    }

    pub(crate) fn insert(&mut self, original_url: &str, user_id: &str) -> Insertion {
        if let Some(&id) = self.by_url.get(original_url) {
            let new_owner = self.add_owner(user_id, id);
            return Insertion::Existing { id, new_owner };
        }

        let id = self.last_id + 1;
        self.last_id = id;
        self.links.insert(id, original_url.to_string());
        self.by_url.insert(original_url.to_string(), id);
        self.add_owner(user_id, id);
        Insertion::Created { id }
    }

    /// Undoes an [`insert`](Self::insert) that has not been followed by another write.
    pub(crate) fn revert(&mut self, insertion: Insertion, original_url: &str, user_id: &str) {
        match insertion {
            Insertion::Created { id } => {
                if self.last_id == id {
                    self.last_id = id - 1;
                }
                self.links.remove(&id);
                self.by_url.remove(original_url);
                self.remove_owner(user_id, id);
            }
            Insertion::Existing {
                id,
                new_owner: true,
            } => self.remove_owner(user_id, id),
            Insertion::Existing { .. } => {}
        }
    }

    /// Applies a previously persisted `(id, user, url)` triple.
    ///
    /// Re-applying a known triple only records the ownership. A triple that
    /// contradicts the index is rejected.
    pub(crate) fn restore(
        &mut self,
        id: u64,
        original_url: &str,
        user_id: &str,
    ) -> std::result::Result<(), String> {
        match (self.links.get(&id), self.by_url.get(original_url)) {
            (Some(url), _) if url != original_url => {
                return Err(format!("id {id} is already bound to another url"));
            }
            (_, Some(&known)) if known != id => {
                return Err(format!("url is already bound to id {known}, not {id}"));
            }
            (None, _) => {
                self.links.insert(id, original_url.to_string());
                self.by_url.insert(original_url.to_string(), id);
                self.last_id = self.last_id.max(id);
            }
            _ => {}
        }
        self.add_owner(user_id, id);
        Ok(())
    }

    pub(crate) fn resolve(&self, code: &str) -> Result<String> {
        let code = ShortCode::parse(code)?;
        self.links
            .get(&code.id())
            .cloned()
            .ok_or_else(|| Error::NotFound(code.to_string()))
    }

    pub(crate) fn list_by_user(&self, user_id: &str) -> Result<Vec<UserLink>> {
        let ids = self
            .owners
            .get(user_id)
            .ok_or_else(|| Error::NoLinksForUser(user_id.to_string()))?;

        Ok(ids
            .iter()
            .filter_map(|id| {
                self.links.get(id).map(|url| UserLink {
                    code: ShortCode::from_id(*id),
                    original_url: url.clone(),
                })
            })
            .collect())
    }

    fn add_owner(&mut self, user_id: &str, id: u64) -> bool {
        self.owners.entry(user_id.to_string()).or_default().insert(id)
    }

    fn remove_owner(&mut self, user_id: &str, id: u64) {
        if let Some(ids) = self.owners.get_mut(user_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.owners.remove(user_id);
            }
        }
    }
}

/// In-memory implementation of the [`Repository`] contract.
///
/// A single reader/writer lock guards all tables: lookups run concurrently,
/// saves are serialized so id allocation stays strictly increasing. Deletion is
/// not supported; this backend is meant for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    index: RwLock<LinkIndex>,
}

impl InMemoryRepository {
    /// Creates a new in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored links.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn resolve(&self, code: &str) -> Result<String> {
        self.index.read().resolve(code)
    }

    async fn save(&self, original_url: &str, user_id: &str) -> Result<SaveOutcome> {
        let insertion = self.index.write().insert(original_url, user_id);
        Ok(insertion.outcome())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<UserLink>> {
        self.index.read().list_by_user(user_id)
    }

    fn request_deletion(&self, user_id: &str, codes: Vec<String>) -> DeletionTicket {
        debug!(user_id, count = codes.len(), "Deletion is not supported by the in-memory backend");
        DeletionTicket::resolved(DeletionOutcome::Unsupported)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tinylink_core::{BatchItem, SaveStatus};

    #[tokio::test]
    async fn save_and_resolve() {
        let repo = InMemoryRepository::new();

        let outcome = repo.save("https://example.com", "u1").await.unwrap();
        assert_eq!(outcome.status, SaveStatus::Created);
        assert_eq!(outcome.code.as_str(), "1");

        let url = repo.resolve(outcome.code.as_str()).await.unwrap();
        assert_eq!(url, "https://example.com");
    }

    #[tokio::test]
    async fn resolve_unknown_code() {
        let repo = InMemoryRepository::new();

        let err = repo.resolve("abc").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn resolve_invalid_code() {
        let repo = InMemoryRepository::new();

        let err = repo.resolve("not/valid").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCode { .. }));
    }

    #[tokio::test]
    async fn sequential_saves_get_increasing_ids() {
        let repo = InMemoryRepository::new();

        let mut last = 0;
        for i in 0..100 {
            let outcome = repo
                .save(&format!("https://example{i}.com"), "u1")
                .await
                .unwrap();
            assert!(outcome.code.id() > last);
            last = outcome.code.id();
        }
        assert_eq!(repo.len(), 100);
    }

    #[tokio::test]
    async fn resave_returns_existing_code() {
        let repo = InMemoryRepository::new();

        let first = repo.save("https://example.com", "u1").await.unwrap();
        let second = repo.save("https://example.com", "u2").await.unwrap();

        assert_eq!(first.code, second.code);
        assert!(second.already_existed());
        assert_eq!(repo.len(), 1);

        // both users own it now
        assert_eq!(repo.list_by_user("u1").await.unwrap().len(), 1);
        assert_eq!(repo.list_by_user("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_by_user_in_id_order() {
        let repo = InMemoryRepository::new();

        repo.save("https://a.example", "u1").await.unwrap();
        repo.save("https://b.example", "u2").await.unwrap();
        repo.save("https://c.example", "u1").await.unwrap();
        repo.save("https://b.example", "u1").await.unwrap();

        let links = repo.list_by_user("u1").await.unwrap();
        let urls: Vec<_> = links.iter().map(|l| l.original_url.as_str()).collect();
        assert_eq!(
            urls,
            ["https://a.example", "https://b.example", "https://c.example"]
        );
        assert_eq!(links[0].code.as_str(), "1");
    }

    #[tokio::test]
    async fn list_by_user_without_links() {
        let repo = InMemoryRepository::new();
        repo.save("https://a.example", "u1").await.unwrap();

        let err = repo.list_by_user("u2").await.unwrap_err();
        assert!(matches!(err, Error::NoLinksForUser(user) if user == "u2"));
    }

    #[tokio::test]
    async fn save_batch_preserves_order_and_correlation() {
        let repo = InMemoryRepository::new();
        let items = vec![
            BatchItem {
                correlation_id: "c1".into(),
                original_url: "https://a".into(),
            },
            BatchItem {
                correlation_id: "c2".into(),
                original_url: "https://b".into(),
            },
        ];

        let results = repo.save_batch(items, "u1").await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].correlation_id, "c1");
        assert_eq!(repo.resolve(results[0].code.as_str()).await.unwrap(), "https://a");
        assert_eq!(results[1].correlation_id, "c2");
        assert_eq!(repo.resolve(results[1].code.as_str()).await.unwrap(), "https://b");
    }

    #[test]
    fn insert_after_gapped_restore_skips_used_ids() {
        let mut index = LinkIndex::default();
        index.restore(5, "https://old", "u1").unwrap();

        let ids: Vec<u64> = (0..4)
            .map(|i| index.insert(&format!("https://n{i}"), "u1").id())
            .collect();

        assert_eq!(ids, [6, 7, 8, 9]);
        assert_eq!(index.resolve("5").unwrap(), "https://old");
        assert_eq!(
            index.insert("https://old", "u1"),
            Insertion::Existing {
                id: 5,
                new_owner: false
            }
        );
    }

    #[test]
    fn revert_releases_the_last_id() {
        let mut index = LinkIndex::default();
        index.insert("https://a", "u1");
        let second = index.insert("https://b", "u1");

        index.revert(second, "https://b", "u1");

        assert_eq!(index.insert("https://c", "u1"), Insertion::Created { id: 2 });
        assert!(matches!(index.resolve("2"), Ok(url) if url == "https://c"));
    }

    #[tokio::test]
    async fn deletion_is_unsupported() {
        let repo = InMemoryRepository::new();
        let outcome = repo.save("https://example.com", "u1").await.unwrap();

        let ticket = repo.request_deletion("u1", vec![outcome.code.to_string()]);

        assert_eq!(ticket.outcome().await, Some(DeletionOutcome::Unsupported));
        assert!(repo.resolve(outcome.code.as_str()).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_saves_allocate_distinct_ids() {
        let repo = Arc::new(InMemoryRepository::new());
        let mut handles = vec![];

        for i in 0..50u64 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                repo.save(&format!("https://example{i}.com"), "u1")
                    .await
                    .unwrap()
                    .code
                    .id()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();

        assert_eq!(ids, (1..=50).collect::<Vec<_>>());
    }

    #[test]
    fn revert_created_insertion() {
        let mut index = LinkIndex::default();
        let insertion = index.insert("https://a", "u1");

        index.revert(insertion, "https://a", "u1");

        assert_eq!(index.len(), 0);
        assert!(matches!(index.list_by_user("u1"), Err(Error::NoLinksForUser(_))));
        assert_eq!(index.insert("https://a", "u1"), Insertion::Created { id: 1 });
    }

    #[test]
    fn revert_new_owner_keeps_link() {
        let mut index = LinkIndex::default();
        index.insert("https://a", "u1");
        let insertion = index.insert("https://a", "u2");
        assert_eq!(insertion, Insertion::Existing { id: 1, new_owner: true });

        index.revert(insertion, "https://a", "u2");

        assert_eq!(index.len(), 1);
        assert!(index.list_by_user("u1").is_ok());
        assert!(index.list_by_user("u2").is_err());
    }

    #[test]
    fn restore_rejects_conflicting_records() {
        let mut index = LinkIndex::default();
        index.restore(1, "https://a", "u1").unwrap();
        index.restore(1, "https://a", "u2").unwrap();

        assert!(index.restore(1, "https://b", "u1").is_err());
        assert!(index.restore(2, "https://a", "u1").is_err());
        assert_eq!(index.list_by_user("u2").unwrap().len(), 1);
    }
}
