use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::ProcessingResult;

#[derive(Debug)]
pub struct ProcessingRequest {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub result: ProcessingResult,
}

/// JSON shape of a request for the preview screen.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview<'a> {
    pub request_id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: &'a ProcessingResult,
}

impl ProcessingRequest {
    pub fn preview(&self) -> Preview<'_> {
        Preview {
            request_id: self.id,
            created_at: self.created_at,
            result: &self.result,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at >= ttl
    }
}

/// Finished processing results, readable until discarded or expired.
///
/// Each id is written once. Stored results are never mutated, so readers
/// share them through `Arc` without holding the lock.
#[derive(Debug)]
pub struct ResultStore {
    ttl: Duration,
    entries: RwLock<HashMap<Uuid, Arc<ProcessingRequest>>>,
}

impl ResultStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn put(&self, id: Uuid, result: ProcessingResult) -> Result<Arc<ProcessingRequest>, StoreError> {
        self.put_at(id, result, Utc::now())
    }

    pub fn put_at(
        &self,
        id: Uuid,
        result: ProcessingResult,
        now: DateTime<Utc>,
    ) -> Result<Arc<ProcessingRequest>, StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&id) {
            return Err(StoreError::AlreadyStored(id));
        }
        let request = Arc::new(ProcessingRequest {
            id,
            created_at: now,
            result,
        });
        entries.insert(id, Arc::clone(&request));
        Ok(request)
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<ProcessingRequest>, StoreError> {
        self.get_at(id, Utc::now())
    }

    pub fn get_at(&self, id: Uuid, now: DateTime<Utc>) -> Result<Arc<ProcessingRequest>, StoreError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&id)
            .filter(|request| !request.is_expired(now, self.ttl))
            .cloned()
            .ok_or(StoreError::RequestNotFound(id))
    }

    /// Returns whether the id was present.
    pub fn discard(&self, id: Uuid) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, request| !request.is_expired(now, self.ttl));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::{self, UploadRequest};
    use std::thread;

    fn sample_result() -> ProcessingResult {
        let upload = UploadRequest {
            enrollments: b"email;full_name\na@x.com;Ana\n".to_vec(),
            grades: b"email;grade\na@x.com;8\n".to_vec(),
            progress: b"email;progress\n".to_vec(),
        };
        pipeline::process(&upload, &PipelineConfig::default()).unwrap()
    }

    #[test]
    fn stores_and_reads_back() {
        let store = ResultStore::new(Duration::minutes(5));
        let id = Uuid::new_v4();
        store.put(id, sample_result()).unwrap();

        let request = store.get(id).unwrap();
        assert_eq!(request.id, id);
        assert_eq!(request.result.valid_students.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn ids_are_written_once() {
        let store = ResultStore::new(Duration::minutes(5));
        let id = Uuid::new_v4();
        store.put(id, sample_result()).unwrap();
        assert_eq!(
            store.put(id, sample_result()).unwrap_err(),
            StoreError::AlreadyStored(id)
        );
    }

    #[test]
    fn unknown_and_discarded_ids_are_not_found() {
        let store = ResultStore::new(Duration::minutes(5));
        let id = Uuid::new_v4();
        assert_eq!(store.get(id).unwrap_err(), StoreError::RequestNotFound(id));

        store.put(id, sample_result()).unwrap();
        assert!(store.discard(id));
        assert!(!store.discard(id));
        assert!(store.is_empty());
        assert_eq!(store.get(id).unwrap_err(), StoreError::RequestNotFound(id));
    }

    #[test]
    fn expired_requests_are_hidden_and_purged() {
        let store = ResultStore::new(Duration::minutes(10));
        let created = Utc::now();
        let old = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        store.put_at(old, sample_result(), created - Duration::minutes(30)).unwrap();
        store.put_at(fresh, sample_result(), created).unwrap();

        assert!(store.get_at(old, created).is_err());
        assert!(store.get_at(fresh, created + Duration::minutes(9)).is_ok());
        assert_eq!(store.purge_expired(created), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_readers_share_one_result() {
        let store = ResultStore::new(Duration::minutes(5));
        let id = Uuid::new_v4();
        store.put(id, sample_result()).unwrap();

        thread::scope(|scope| {
            let readers: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| store.get(id).map(|request| request.result.valid_students.len())))
                .collect();
            for reader in readers {
                assert_eq!(reader.join().unwrap(), Ok(1));
            }
        });
    }

    #[test]
    fn preview_uses_camel_case_collections() {
        let store = ResultStore::new(Duration::minutes(5));
        let id = Uuid::new_v4();
        let request = store.put(id, sample_result()).unwrap();

        let json = serde_json::to_value(request.preview()).unwrap();
        assert_eq!(json["requestId"], id.to_string());
        assert_eq!(json["validStudents"][0]["email"], "a@x.com");
        assert_eq!(json["validStudents"][0]["situation"], "approved");
        assert!(json["enrollmentErrors"].as_array().unwrap().is_empty());
        assert!(json["gradeErrors"].is_array());
        assert!(json["progressErrors"].is_array());
    }
}
