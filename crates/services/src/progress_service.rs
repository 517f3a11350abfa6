use std::sync::Arc;

use kasten_core::AnswerOutcome;
use kasten_core::model::{CardLevel, DeckId, NewProgress, Progress, ProgressId, Revision, UserId};
use serde_json::json;
use storage::document::ProgressDocument;
use storage::keys::{ViewKey, ViewName};
use storage::repository::{DocumentStore, Storage, StorageError, ViewQuery};
use storage::views::{LEVEL_BY_CARD, PROGRESS_BY_DECK, PROGRESS_BY_USER, PROGRESS_BY_USER_DECK};

use crate::error::ProgressError;

/// Reads and updates learning progress through the store's views.
///
/// Construct it once with the store handles and share it; it holds no other
/// state, so concurrent callers need no coordination here. Nothing guards the
/// read-modify-write in [`ProgressService::record_answer`] beyond the store's
/// own revision check.
#[derive(Clone)]
pub struct ProgressService {
    documents: Arc<dyn DocumentStore>,
    views: Arc<dyn ViewQuery>,
}

impl ProgressService {
    #[must_use]
    pub fn new(documents: Arc<dyn DocumentStore>, views: Arc<dyn ViewQuery>) -> Self {
        Self { documents, views }
    }

    #[must_use]
    pub fn from_storage(storage: &Storage) -> Self {
        Self::new(Arc::clone(&storage.documents), Arc::clone(&storage.views))
    }

    //
    // ─── READS ─────────────────────────────────────────────────────────────────
    //

    /// Fetch a progress record by its store id.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` if no document has this id.
    /// Returns `ProgressError::Storage` if the store fails or the document is malformed.
    pub async fn fetch_by_id(&self, id: &ProgressId) -> Result<Progress, ProgressError> {
        let document = self
            .documents
            .fetch_by_id(id.value())
            .await?
            .ok_or_else(|| ProgressError::NotFound(format!("progress {id} not found")))?;
        Ok(ProgressDocument::from_value(document)?.into_progress()?)
    }

    /// Fetch the learner's progress for one deck.
    ///
    /// At most one record should exist per (user, deck). If the index holds
    /// several, the first in index order (lowest record id) is returned.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` if the user has not started the deck.
    /// Returns `ProgressError::Storage` if the store fails.
    pub async fn fetch_by_user_and_deck(
        &self,
        user: &UserId,
        deck: &DeckId,
    ) -> Result<Progress, ProgressError> {
        let ids = self
            .ids_for(
                &PROGRESS_BY_USER_DECK,
                &ViewKey::tuple([user.value(), deck.value()]),
            )
            .await?;
        let Some(first) = ids.first() else {
            return Err(ProgressError::NotFound(format!(
                "user {user} has not studied deck {deck}"
            )));
        };
        if ids.len() > 1 {
            tracing::warn!(
                %user,
                %deck,
                records = ids.len(),
                chosen = %first,
                "duplicate progress records for user and deck"
            );
        }
        self.fetch_by_id(first).await
    }

    /// All progress records of a learner, in index order.
    ///
    /// # Errors
    ///
    /// Fails on the first record that cannot be fetched; no partial result is returned.
    pub async fn fetch_all_by_user(&self, user: &UserId) -> Result<Vec<Progress>, ProgressError> {
        self.fetch_all(&PROGRESS_BY_USER, &ViewKey::scalar(user.value()))
            .await
    }

    /// All progress records for a deck, in index order.
    ///
    /// # Errors
    ///
    /// Fails on the first record that cannot be fetched; no partial result is returned.
    pub async fn fetch_all_by_deck(&self, deck: &DeckId) -> Result<Vec<Progress>, ProgressError> {
        self.fetch_all(&PROGRESS_BY_DECK, &ViewKey::scalar(deck.value()))
            .await
    }

    /// The compartment a card currently sits in for this learner.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` if no row exists for the card, which
    /// also covers indexes past the end of the deck.
    /// Returns `ProgressError::Storage` if the store fails or the row is malformed.
    pub async fn fetch_card_subject(
        &self,
        user: &UserId,
        deck: &DeckId,
        card_index: usize,
    ) -> Result<CardLevel, ProgressError> {
        let key = ViewKey::tuple([json!(user.value()), json!(deck.value()), json!(card_index)]);
        let rows = self.views.query_view_by_key(&LEVEL_BY_CARD, &key).await?;
        let row = rows.into_iter().next().ok_or_else(|| {
            ProgressError::NotFound(format!(
                "no card {card_index} in deck {deck} for user {user}"
            ))
        })?;
        serde_json::from_value(row.value)
            .map_err(|e| ProgressError::from(StorageError::Serialization(e.to_string())))
    }

    //
    // ─── WRITES ────────────────────────────────────────────────────────────────
    //

    /// Store a new progress record and return its assigned id.
    ///
    /// Existing records for the same (user, deck) are not checked; callers
    /// must not start a deck twice.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if persistence fails.
    pub async fn create(&self, progress: &NewProgress) -> Result<ProgressId, ProgressError> {
        let document = ProgressDocument::from_new(progress).to_value()?;
        let meta = self.documents.insert(document).await?;
        tracing::debug!(id = %meta.id, user = %progress.user, deck = %progress.deck, "created progress");
        Ok(ProgressId::new(meta.id))
    }

    /// Overwrite the stored record with `progress` as a whole and return the
    /// new revision.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if persistence fails, including
    /// `StorageError::Conflict` when the store holds a newer revision.
    pub async fn replace(&self, progress: &Progress) -> Result<Revision, ProgressError> {
        let document = ProgressDocument::from_progress(progress).to_value()?;
        let meta = self.documents.insert(document).await?;
        tracing::debug!(id = %meta.id, rev = %meta.rev, "replaced progress");
        Ok(Revision::new(meta.rev))
    }

    /// Replace each record in order and return how many were written.
    ///
    /// # Errors
    ///
    /// Stops at the first failure with `ProgressError::Interrupted`; earlier
    /// records stay replaced and later ones are untouched.
    pub async fn replace_all(&self, records: &[Progress]) -> Result<usize, ProgressError> {
        for (completed, progress) in records.iter().enumerate() {
            if let Err(source) = self.replace(progress).await {
                return Err(interrupted("replace_all", completed, source));
            }
        }
        Ok(records.len())
    }

    /// # Errors
    ///
    /// Returns `ProgressError::Storage` with `StorageError::NotFound` if the
    /// record does not exist, or other storage errors.
    pub async fn delete_by_id(&self, id: &ProgressId) -> Result<(), ProgressError> {
        self.documents.delete(id.value()).await?;
        tracing::debug!(%id, "deleted progress");
        Ok(())
    }

    /// Delete every progress record of a deck, one by one, and return how
    /// many were removed.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the index lookup fails. Stops at
    /// the first failed deletion with `ProgressError::Interrupted`; records
    /// deleted so far stay deleted, so the call can simply be repeated.
    pub async fn delete_all_by_deck(&self, deck: &DeckId) -> Result<usize, ProgressError> {
        let ids = self
            .ids_for(&PROGRESS_BY_DECK, &ViewKey::scalar(deck.value()))
            .await?;
        for (completed, id) in ids.iter().enumerate() {
            if let Err(source) = self.delete_by_id(id).await {
                return Err(interrupted("delete_all_by_deck", completed, source));
            }
        }
        tracing::debug!(%deck, deleted = ids.len(), "deleted deck progress");
        Ok(ids.len())
    }

    //
    // ─── ANSWERS ───────────────────────────────────────────────────────────────
    //

    /// Record the learner's answer for one card and persist the whole record.
    ///
    /// A correct answer moves the card one level up (capped at 4), a wrong
    /// one resets it to 0. Returns the card's new level.
    ///
    /// # Errors
    ///
    /// Returns errors from [`ProgressService::fetch_by_user_and_deck`].
    /// Returns `ProgressError::IndexOutOfRange` unless `0 <= card_index < card count`;
    /// nothing is written in that case.
    /// Returns `ProgressError::Storage` if the replace fails.
    pub async fn record_answer(
        &self,
        user: &UserId,
        deck: &DeckId,
        card_index: i64,
        success: bool,
    ) -> Result<CardLevel, ProgressError> {
        let mut progress = self.fetch_by_user_and_deck(user, deck).await?;
        let level = progress.record_answer(card_index, AnswerOutcome::from(success))?;
        self.replace(&progress).await?;
        tracing::debug!(%user, %deck, card_index, success, %level, "recorded answer");
        Ok(level)
    }

    //
    // ─── HELPERS ───────────────────────────────────────────────────────────────
    //

    async fn ids_for(
        &self,
        view: &ViewName,
        key: &ViewKey,
    ) -> Result<Vec<ProgressId>, ProgressError> {
        let rows = self.views.query_view_by_key(view, key).await?;
        Ok(rows.into_iter().map(|row| ProgressId::new(row.id)).collect())
    }

    async fn fetch_all(
        &self,
        view: &ViewName,
        key: &ViewKey,
    ) -> Result<Vec<Progress>, ProgressError> {
        let ids = self.ids_for(view, key).await?;
        let mut records = Vec::with_capacity(ids.len());
        for id in &ids {
            records.push(self.fetch_by_id(id).await?);
        }
        Ok(records)
    }
}

fn interrupted(operation: &'static str, completed: usize, source: ProgressError) -> ProgressError {
    tracing::warn!(operation, completed, error = %source, "bulk operation interrupted");
    ProgressError::Interrupted {
        completed,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;
    use storage::keys::ViewRow;
    use storage::memory::InMemoryStore;
    use storage::repository::DocumentMeta;

    fn service(store: &InMemoryStore) -> ProgressService {
        ProgressService::new(Arc::new(store.clone()), Arc::new(store.clone()))
    }

    fn levels(progress: &Progress) -> Vec<u8> {
        progress.card_levels().iter().map(|l| l.value()).collect()
    }

    async fn start(service: &ProgressService, user: &str, deck: &str, cards: usize) -> ProgressId {
        service
            .create(&NewProgress::fresh(UserId::new(user), DeckId::new(deck), cards))
            .await
            .unwrap()
    }

    /// Delegates to an in-memory store but fails writes and deletes once
    /// `budget` of them have succeeded.
    struct FailingStore {
        inner: InMemoryStore,
        budget: AtomicUsize,
    }

    impl FailingStore {
        fn new(inner: InMemoryStore, budget: usize) -> Self {
            Self {
                inner,
                budget: AtomicUsize::new(budget),
            }
        }

        fn take(&self) -> Result<(), StorageError> {
            self.budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .map(|_| ())
                .map_err(|_| StorageError::Connection("injected failure".into()))
        }
    }

    #[async_trait]
    impl DocumentStore for FailingStore {
        async fn fetch_by_id(&self, id: &str) -> Result<Option<Value>, StorageError> {
            self.inner.fetch_by_id(id).await
        }

        async fn insert(&self, document: Value) -> Result<DocumentMeta, StorageError> {
            self.take()?;
            self.inner.insert(document).await
        }

        async fn delete(&self, id: &str) -> Result<(), StorageError> {
            self.take()?;
            self.inner.delete(id).await
        }
    }

    #[async_trait]
    impl ViewQuery for FailingStore {
        async fn query_view_by_key(
            &self,
            view: &ViewName,
            key: &ViewKey,
        ) -> Result<Vec<ViewRow>, StorageError> {
            self.inner.query_view_by_key(view, key).await
        }
    }

    /// Index that lists one extra row whose document no longer exists.
    struct DanglingIndex {
        inner: InMemoryStore,
    }

    #[async_trait]
    impl ViewQuery for DanglingIndex {
        async fn query_view_by_key(
            &self,
            view: &ViewName,
            key: &ViewKey,
        ) -> Result<Vec<ViewRow>, StorageError> {
            let mut rows = self.inner.query_view_by_key(view, key).await?;
            rows.push(ViewRow {
                id: "zzz-gone".into(),
                key: Value::Null,
                value: Value::Null,
            });
            Ok(rows)
        }
    }

    #[tokio::test]
    async fn create_then_fetch_by_id_round_trips() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let draft = NewProgress::fresh(UserId::new("U1"), DeckId::new("D1"), 3);

        let id = service.create(&draft).await.unwrap();
        let fetched = service.fetch_by_id(&id).await.unwrap();

        assert_eq!(fetched.id(), &id);
        assert_eq!(fetched.user(), &draft.user);
        assert_eq!(fetched.deck(), &draft.deck);
        assert_eq!(fetched.card_levels(), draft.card_levels.as_slice());
    }

    #[tokio::test]
    async fn fetch_by_id_missing_is_not_found() {
        let service = service(&InMemoryStore::new());
        let err = service
            .fetch_by_id(&ProgressId::new("nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn fetch_all_fails_whole_when_one_record_is_missing() {
        let store = InMemoryStore::new();
        let healthy = service(&store);
        start(&healthy, "U1", "D1", 2).await;
        start(&healthy, "U1", "D2", 2).await;

        let service = ProgressService::new(
            Arc::new(store.clone()),
            Arc::new(DanglingIndex { inner: store }),
        );

        let by_user = service.fetch_all_by_user(&UserId::new("U1")).await;
        match by_user {
            Err(ProgressError::NotFound(msg)) => assert_eq!(msg, "progress zzz-gone not found"),
            other => panic!("expected not found, got {other:?}"),
        }

        let by_deck = service.fetch_all_by_deck(&DeckId::new("D1")).await;
        assert!(matches!(by_deck, Err(ref err) if err.is_not_found()), "{by_deck:?}");
    }

    #[tokio::test]
    async fn delete_missing_record_is_not_found() {
        let service = service(&InMemoryStore::new());
        let err = service
            .delete_by_id(&ProgressId::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::Storage(StorageError::NotFound)));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn fetch_by_user_and_deck_reports_unstudied_deck() {
        let store = InMemoryStore::new();
        let service = service(&store);
        start(&service, "U1", "D2", 2).await;

        let err = service
            .fetch_by_user_and_deck(&UserId::new("U1"), &DeckId::new("D1"))
            .await
            .unwrap_err();
        match err {
            ProgressError::NotFound(msg) => assert_eq!(msg, "user U1 has not studied deck D1"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_records_resolve_to_lowest_id() {
        let store = InMemoryStore::new();
        store
            .insert(json!({"_id": "b", "user": "U1", "deck": "D1", "card_levels": [4]}))
            .await
            .unwrap();
        store
            .insert(json!({"_id": "a", "user": "U1", "deck": "D1", "card_levels": [1]}))
            .await
            .unwrap();

        let progress = service(&store)
            .fetch_by_user_and_deck(&UserId::new("U1"), &DeckId::new("D1"))
            .await
            .unwrap();
        assert_eq!(progress.id(), &ProgressId::new("a"));
        assert_eq!(levels(&progress), vec![1]);
    }

    #[tokio::test]
    async fn fetch_all_by_user_and_deck_filter_records() {
        let store = InMemoryStore::new();
        let service = service(&store);
        start(&service, "U1", "D1", 1).await;
        start(&service, "U1", "D2", 2).await;
        start(&service, "U2", "D1", 3).await;

        let by_user = service.fetch_all_by_user(&UserId::new("U1")).await.unwrap();
        assert_eq!(by_user.len(), 2);
        assert!(by_user.iter().all(|p| p.user() == &UserId::new("U1")));
        let mut ids: Vec<_> = by_user.iter().map(|p| p.id().clone()).collect();
        let listed = ids.clone();
        ids.sort();
        assert_eq!(listed, ids, "index order is record id order");

        let by_deck = service.fetch_all_by_deck(&DeckId::new("D1")).await.unwrap();
        assert_eq!(by_deck.len(), 2);
        assert!(by_deck.iter().all(|p| p.deck() == &DeckId::new("D1")));

        let none = service.fetch_all_by_deck(&DeckId::new("D9")).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn record_answer_applies_bounded_counter() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let id = start(&service, "U1", "D1", 2).await;
        let (user, deck) = (UserId::new("U1"), DeckId::new("D1"));

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(service.record_answer(&user, &deck, 0, true).await.unwrap().value());
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 4]);

        for _ in 0..2 {
            let level = service.record_answer(&user, &deck, 0, false).await.unwrap();
            assert_eq!(level, CardLevel::ZERO);
        }

        let stored = service.fetch_by_id(&id).await.unwrap();
        assert_eq!(levels(&stored), vec![0, 0]);
    }

    #[tokio::test]
    async fn record_answer_rejects_bad_index_without_writing() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let id = start(&service, "U1", "D1", 3).await;
        let before = service.fetch_by_id(&id).await.unwrap();
        let (user, deck) = (UserId::new("U1"), DeckId::new("D1"));

        for index in [3, -1] {
            let err = service
                .record_answer(&user, &deck, index, true)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                ProgressError::IndexOutOfRange { index: i, len: 3 } if i == index
            ));
        }

        let after = service.fetch_by_id(&id).await.unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn record_answer_for_unstarted_deck_is_not_found() {
        let service = service(&InMemoryStore::new());
        let err = service
            .record_answer(&UserId::new("U1"), &DeckId::new("D1"), 0, true)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn stale_replace_surfaces_store_conflict() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let id = start(&service, "U1", "D1", 2).await;
        let stale = service.fetch_by_id(&id).await.unwrap();

        service
            .record_answer(&UserId::new("U1"), &DeckId::new("D1"), 1, true)
            .await
            .unwrap();

        let err = service.replace(&stale).await.unwrap_err();
        assert!(matches!(err, ProgressError::Storage(StorageError::Conflict)));
        let stored = service.fetch_by_id(&id).await.unwrap();
        assert_eq!(levels(&stored), vec![0, 1]);
    }

    #[tokio::test]
    async fn fetch_card_subject_reads_level_index() {
        let store = InMemoryStore::new();
        let service = service(&store);
        start(&service, "U1", "D1", 3).await;
        let (user, deck) = (UserId::new("U1"), DeckId::new("D1"));
        service.record_answer(&user, &deck, 2, true).await.unwrap();

        let subject = service.fetch_card_subject(&user, &deck, 2).await.unwrap();
        assert_eq!(subject.value(), 1);

        let err = service.fetch_card_subject(&user, &deck, 3).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_all_by_deck_spares_other_decks() {
        let store = InMemoryStore::new();
        let service = service(&store);
        start(&service, "U1", "D1", 1).await;
        start(&service, "U2", "D1", 1).await;
        let kept = start(&service, "U1", "D2", 1).await;

        let deleted = service.delete_all_by_deck(&DeckId::new("D1")).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(service
            .fetch_all_by_deck(&DeckId::new("D1"))
            .await
            .unwrap()
            .is_empty());
        assert!(service.fetch_by_id(&kept).await.is_ok());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_all_by_deck_stops_at_first_failure() {
        let store = InMemoryStore::new();
        let plain = service(&store);
        for user in ["U1", "U2", "U3"] {
            start(&plain, user, "D1", 1).await;
        }

        let failing = Arc::new(FailingStore::new(store.clone(), 1));
        let service = ProgressService::new(failing.clone(), failing);
        let err = service
            .delete_all_by_deck(&DeckId::new("D1"))
            .await
            .unwrap_err();

        assert_eq!(err.completed(), 1);
        match err {
            ProgressError::Interrupted { source, .. } => {
                assert!(matches!(*source, ProgressError::Storage(StorageError::Connection(_))));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.len().unwrap(), 2);

        // resuming with a healthy store finishes the job
        assert_eq!(plain.delete_all_by_deck(&DeckId::new("D1")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn replace_all_writes_in_order_and_stops_on_failure() {
        let store = InMemoryStore::new();
        let plain = service(&store);
        let ids = [
            start(&plain, "U1", "D1", 1).await,
            start(&plain, "U2", "D1", 1).await,
            start(&plain, "U3", "D1", 1).await,
        ];

        let mut records = Vec::new();
        for id in &ids {
            let mut progress = plain.fetch_by_id(id).await.unwrap();
            progress.record_answer(0, AnswerOutcome::Success).unwrap();
            records.push(progress);
        }

        let failing = Arc::new(FailingStore::new(store.clone(), 2));
        let service = ProgressService::new(failing.clone(), failing);
        let err = service.replace_all(&records).await.unwrap_err();
        assert_eq!(err.completed(), 2);

        let stored: Vec<Vec<u8>> = {
            let mut out = Vec::new();
            for id in &ids {
                out.push(levels(&plain.fetch_by_id(id).await.unwrap()));
            }
            out
        };
        assert_eq!(stored, vec![vec![1], vec![1], vec![0]]);

        assert_eq!(plain.replace_all(&records[2..]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replace_all_empty_is_noop() {
        let service = service(&InMemoryStore::new());
        assert_eq!(service.replace_all(&[]).await.unwrap(), 0);
    }
}
