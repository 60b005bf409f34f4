//! Snapshot of the backend's installed models, classified by residency.

use chrono::Utc;

use crate::error::Result;
use crate::models::catalog::CatalogEntry;
use crate::residency::ResidencyPolicy;
use crate::store::Store;
use crate::upstream::Upstream;

/// Re-read the backend's tag listing and replace the stored catalog.
///
/// Returns the number of entries written.
pub async fn refresh_catalog(
    upstream: &dyn Upstream,
    policy: &ResidencyPolicy,
    store: &Store,
) -> Result<usize> {
    let available = upstream.list_available().await?;
    let now = Utc::now();

    let entries: Vec<CatalogEntry> = available
        .into_iter()
        .map(|model| CatalogEntry {
            residency: policy.classify(&model.name),
            name: model.name,
            size_bytes: model.size_bytes,
            last_seen: now,
        })
        .collect();

    store.replace_catalog(&entries)?;
    tracing::info!(models = entries.len(), "Model catalog refreshed");
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::residency::ResidencyClass;
    use crate::test_util::FakeUpstream;
    use crate::upstream::AvailableModel;

    #[tokio::test]
    async fn test_refresh_classifies_and_stores() {
        let upstream = FakeUpstream::with_resident(&[]);
        upstream.set_available(vec![
            AvailableModel {
                name: "qwen2:7b".to_string(),
                size_bytes: Some(4_400_000_000),
            },
            AvailableModel {
                name: "llama3.2:3b".to_string(),
                size_bytes: None,
            },
        ]);
        let store = Store::new(":memory:").unwrap();
        let policy = ResidencyPolicy::new(vec!["llama3.2:3b".to_string()]);

        let count = refresh_catalog(&upstream, &policy, &store).await.unwrap();
        assert_eq!(count, 2);

        let catalog = store.list_catalog().unwrap();
        assert_eq!(catalog[0].name, "llama3.2:3b");
        assert_eq!(catalog[0].residency, ResidencyClass::Pinned);
        assert_eq!(catalog[1].residency, ResidencyClass::Transient);
        assert_eq!(catalog[1].size_bytes, Some(4_400_000_000));
    }

    #[tokio::test]
    async fn test_unreachable_backend_keeps_previous_catalog() {
        let upstream = FakeUpstream::with_resident(&[]);
        upstream.set_available(vec![AvailableModel {
            name: "qwen2:7b".to_string(),
            size_bytes: None,
        }]);
        let store = Store::new(":memory:").unwrap();
        let policy = ResidencyPolicy::new(vec![]);
        refresh_catalog(&upstream, &policy, &store).await.unwrap();

        upstream.set_unreachable(true);
        assert!(refresh_catalog(&upstream, &policy, &store).await.is_err());
        assert_eq!(store.list_catalog().unwrap().len(), 1);
    }
}
