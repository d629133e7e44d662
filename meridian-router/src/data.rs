//! Data Access Router
//!
//! The read surface over tenant objects. Each call decides between the
//! object cache and a direct fetch from the external source:
//!
//! ```text
//! get_objects(tenant, type, query)
//!     │
//!     ├─ use_cache && tenant ActiveSync && cache has `type`?
//!     │       └─ YES: filter → slice [offset, offset+limit) → return (no I/O)
//!     │
//!     └─ direct fetch
//!             ├─ server paging (and filtering, if filters given): fetch_page
//!             └─ otherwise: fetch_all → filter → slice client-side
//! ```
//!
//! Limits are capped at the configured page size. Direct fetches never
//! write into the cache; the refresh pass is its only writer.

use chrono::Utc;
use meridian_admission::AdmissionController;
use meridian_cache::ObjectCache;
use meridian_core::{
    ExternalSource, FilterExpr, FilterMatcher, MeridianResult, ObjectCacheEntry, ObjectType,
    PageQuery, RemoteObject, SourceError, TenantId, TenantInfo, TenantRegistry,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Paging and filtering for [`DataAccessRouter::get_objects`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectQuery {
    /// Consult the cache first (default `true`).
    pub use_cache: bool,
    pub offset: usize,
    /// Requested page size; `None` or anything above the page size is capped.
    pub limit: Option<usize>,
    pub filters: Vec<FilterExpr>,
}

impl Default for ObjectQuery {
    fn default() -> Self {
        Self {
            use_cache: true,
            offset: 0,
            limit: None,
            filters: Vec::new(),
        }
    }
}

impl ObjectQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always go to the external source.
    pub fn bypass_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filters.push(filter);
        self
    }

    /// The limit actually applied under `page_size`.
    pub fn effective_limit(&self, page_size: usize) -> usize {
        self.limit.map_or(page_size, |l| l.min(page_size))
    }
}

/// Where a page was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataOrigin {
    Cache,
    Remote,
}

/// One page of objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPage {
    pub items: Vec<ObjectCacheEntry>,
    /// Total matching objects, when known.
    pub total: Option<usize>,
    pub offset: usize,
    pub limit: usize,
    pub origin: DataOrigin,
}

impl ObjectPage {
    /// Whether more matching objects exist past this page. `None` when the
    /// total is unknown.
    pub fn has_more(&self) -> Option<bool> {
        self.total.map(|t| self.offset + self.items.len() < t)
    }
}

/// Cache-or-fetch read surface for tenant objects.
pub struct DataAccessRouter {
    admission: Arc<AdmissionController>,
    cache: Arc<ObjectCache>,
    source: Arc<dyn ExternalSource>,
    registry: Arc<dyn TenantRegistry>,
    page_size: usize,
}

impl std::fmt::Debug for DataAccessRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataAccessRouter")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl DataAccessRouter {
    pub fn new(
        cache: Arc<ObjectCache>,
        source: Arc<dyn ExternalSource>,
        registry: Arc<dyn TenantRegistry>,
        page_size: usize,
    ) -> Self {
        Self {
            admission: Arc::clone(cache.admission()),
            cache,
            source,
            registry,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// A page of objects of `object_type`.
    ///
    /// Served from the cache without any external call when `use_cache` is
    /// set, the tenant is `ActiveSync` and the cache holds at least one
    /// object of the type. Fetch failures are logged and returned.
    pub async fn get_objects(
        &self,
        tenant_id: &TenantId,
        object_type: ObjectType,
        query: &ObjectQuery,
    ) -> MeridianResult<ObjectPage> {
        let limit = query.effective_limit(self.page_size);

        if let Some(cached) = self.cached_collection(tenant_id, object_type, query.use_cache) {
            if cached.is_empty() {
                self.cache.record_miss(tenant_id);
                return self.get_remote(tenant_id, object_type, query, limit).await;
            }
            self.cache.record_hit(tenant_id);

            let matcher = FilterMatcher::new(&query.filters);
            let matching: Vec<ObjectCacheEntry> = cached
                .into_iter()
                .filter(|e| matcher.matches(&e.data))
                .collect();
            let total = matching.len();
            let items = slice(matching, query.offset, limit);
            debug!(%tenant_id, %object_type, returned = items.len(), total, "Served from cache");
            return Ok(ObjectPage {
                items,
                total: Some(total),
                offset: query.offset,
                limit,
                origin: DataOrigin::Cache,
            });
        }

        self.get_remote(tenant_id, object_type, query, limit).await
    }

    /// One object by id, cache first.
    ///
    /// Falls back to a point lookup, or to scanning the full collection
    /// when the source has no point lookup for the type.
    pub async fn get_object(
        &self,
        tenant_id: &TenantId,
        object_type: ObjectType,
        id: &str,
    ) -> MeridianResult<Option<ObjectCacheEntry>> {
        if self.admission.is_active(tenant_id) {
            if let Some(entry) = self.cache.get_object(tenant_id, object_type, id) {
                self.cache.record_hit(tenant_id);
                return Ok(Some(entry));
            }
            self.cache.record_miss(tenant_id);
        }

        let result = self.fetch_remote_one(tenant_id, object_type, id).await;
        result.map_err(|e| {
            warn!(%tenant_id, %object_type, id, error = %e, "Direct lookup failed");
            e.into()
        })
    }

    /// Number of objects of `object_type` matching `filters`.
    ///
    /// Advisory: any failure is logged and reported as `0`. Counts do not
    /// touch the cache hit/miss statistics.
    pub async fn get_object_count(
        &self,
        tenant_id: &TenantId,
        object_type: ObjectType,
        filters: &[FilterExpr],
    ) -> usize {
        if let Some(cached) = self
            .cached_collection(tenant_id, object_type, true)
            .filter(|c| !c.is_empty())
        {
            let matcher = FilterMatcher::new(filters);
            return cached.iter().filter(|e| matcher.matches(&e.data)).count();
        }

        match self.fetch_remote_count(tenant_id, object_type, filters).await {
            Ok(count) => count,
            Err(e) => {
                warn!(%tenant_id, %object_type, error = %e, "Count failed; reporting 0");
                0
            }
        }
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// The cached collection when the cache may serve this read. `None`
    /// when the cache is bypassed or the tenant is not hot; an empty list
    /// when the cache holds nothing of the type.
    fn cached_collection(
        &self,
        tenant_id: &TenantId,
        object_type: ObjectType,
        use_cache: bool,
    ) -> Option<Vec<ObjectCacheEntry>> {
        if !use_cache || !self.admission.is_active(tenant_id) {
            return None;
        }
        Some(self.cache.get_objects_by_type(tenant_id, object_type))
    }

    async fn get_remote(
        &self,
        tenant_id: &TenantId,
        object_type: ObjectType,
        query: &ObjectQuery,
        limit: usize,
    ) -> MeridianResult<ObjectPage> {
        let result = self
            .fetch_remote_page(tenant_id, object_type, query, limit)
            .await;
        result.map_err(|e| {
            warn!(%tenant_id, %object_type, error = %e, "Direct fetch failed");
            e.into()
        })
    }

    async fn fetch_remote_page(
        &self,
        tenant_id: &TenantId,
        object_type: ObjectType,
        query: &ObjectQuery,
        limit: usize,
    ) -> Result<ObjectPage, SourceError> {
        let tenant = self.registry.require(tenant_id).await?;
        let caps = self.source.capabilities(object_type);

        let (items, total) = if caps.server_paging
            && (query.filters.is_empty() || caps.server_filtering)
        {
            let page_query = PageQuery {
                offset: query.offset,
                limit,
                filters: query.filters.clone(),
                include_total: caps.server_count,
            };
            let page = self
                .source
                .fetch_page(&tenant, object_type, &page_query)
                .await?;
            (page.items, page.total)
        } else {
            let matching = self
                .fetch_filtered(&tenant, object_type, &query.filters)
                .await?;
            let total = matching.len();
            (slice(matching, query.offset, limit), Some(total))
        };

        debug!(%tenant_id, %object_type, returned = items.len(), "Served from source");
        Ok(ObjectPage {
            items: stamp(items, object_type),
            total,
            offset: query.offset,
            limit,
            origin: DataOrigin::Remote,
        })
    }

    async fn fetch_remote_one(
        &self,
        tenant_id: &TenantId,
        object_type: ObjectType,
        id: &str,
    ) -> Result<Option<ObjectCacheEntry>, SourceError> {
        let tenant = self.registry.require(tenant_id).await?;
        let found = if self.source.capabilities(object_type).point_lookup {
            self.source.fetch_one(&tenant, object_type, id).await?
        } else {
            self.source
                .fetch_all(&tenant, object_type)
                .await?
                .into_iter()
                .find(|item| item.id == id)
        };
        Ok(found.map(|item| item.into_entry(object_type, Utc::now())))
    }

    async fn fetch_remote_count(
        &self,
        tenant_id: &TenantId,
        object_type: ObjectType,
        filters: &[FilterExpr],
    ) -> Result<usize, SourceError> {
        let tenant = self.registry.require(tenant_id).await?;
        let caps = self.source.capabilities(object_type);

        if caps.server_paging && caps.server_count && (filters.is_empty() || caps.server_filtering)
        {
            let query = PageQuery {
                offset: 0,
                limit: 1,
                filters: filters.to_vec(),
                include_total: true,
            };
            if let Some(total) = self
                .source
                .fetch_page(&tenant, object_type, &query)
                .await?
                .total
            {
                return Ok(total);
            }
        }

        Ok(self.fetch_filtered(&tenant, object_type, filters).await?.len())
    }

    async fn fetch_filtered(
        &self,
        tenant: &TenantInfo,
        object_type: ObjectType,
        filters: &[FilterExpr],
    ) -> Result<Vec<RemoteObject>, SourceError> {
        let mut items = self.source.fetch_all(tenant, object_type).await?;
        let matcher = FilterMatcher::new(filters);
        items.retain(|item| matcher.matches(&item.data));
        Ok(items)
    }
}

fn slice<T>(items: Vec<T>, offset: usize, limit: usize) -> Vec<T> {
    items.into_iter().skip(offset).take(limit).collect()
}

fn stamp(items: Vec<RemoteObject>, object_type: ObjectType) -> Vec<ObjectCacheEntry> {
    let fetched_at = Utc::now();
    items
        .into_iter()
        .map(|item| item.into_entry(object_type, fetched_at))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{EventBus, MeridianError, SourceCapabilities};
    use meridian_test_utils::{fixtures, MockRegistry, MockSource};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        router: DataAccessRouter,
        cache: Arc<ObjectCache>,
        source: Arc<MockSource>,
    }

    fn harness(source: MockSource, page_size: usize) -> Harness {
        let admission = Arc::new(AdmissionController::with_limits(
            4,
            Duration::from_secs(60),
            EventBus::new(64),
        ));
        let source = Arc::new(source);
        let registry = Arc::new(MockRegistry::with_tenants(["t1"]));
        let cache = Arc::new(ObjectCache::new(
            admission,
            source.clone(),
            registry.clone(),
        ));
        let router = DataAccessRouter::new(cache.clone(), source.clone(), registry, page_size);
        Harness {
            router,
            cache,
            source,
        }
    }

    fn t1() -> TenantId {
        TenantId::from("t1")
    }

    impl Harness {
        async fn make_hot(&self) {
            self.cache.admission().register_tenant(&t1());
            assert!(self.cache.admission().resume_sync(&t1()));
            self.cache
                .refresh_tenant_state(&t1(), false)
                .await
                .expect("refresh ok");
        }
    }

    #[test]
    fn test_effective_limit_is_capped() {
        assert_eq!(ObjectQuery::new().effective_limit(250), 250);
        assert_eq!(ObjectQuery::new().with_limit(10).effective_limit(250), 10);
        assert_eq!(ObjectQuery::new().with_limit(1000).effective_limit(250), 250);
    }

    #[tokio::test]
    async fn test_hot_tenant_served_from_cache_without_io() {
        let h = harness(
            MockSource::new().with_objects(ObjectType::Rules, fixtures::objects(10)),
            250,
        );
        h.make_hot().await;
        let calls = h.source.total_calls();

        let page = h
            .router
            .get_objects(&t1(), ObjectType::Rules, &ObjectQuery::new().with_offset(2).with_limit(3))
            .await
            .expect("page");

        assert_eq!(page.origin, DataOrigin::Cache);
        assert_eq!(page.total, Some(10));
        let ids: Vec<_> = page.items.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["obj-2", "obj-3", "obj-4"]);
        assert_eq!(h.source.total_calls(), calls);
        assert_eq!(page.has_more(), Some(true));
    }

    #[tokio::test]
    async fn test_cache_filters_before_slicing() {
        let h = harness(
            MockSource::new().with_objects(ObjectType::Alerts, fixtures::objects(10)),
            250,
        );
        h.make_hot().await;

        let query = ObjectQuery::new()
            .with_filter(FilterExpr::eq("enabled", json!(true)))
            .with_offset(1)
            .with_limit(2);
        let page = h
            .router
            .get_objects(&t1(), ObjectType::Alerts, &query)
            .await
            .expect("page");
        let ids: Vec<_> = page.items.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["obj-2", "obj-4"]);
        assert_eq!(page.total, Some(5));
    }

    #[tokio::test]
    async fn test_paused_tenant_goes_direct() {
        let h = harness(
            MockSource::new().with_objects(ObjectType::Rules, fixtures::objects(3)),
            250,
        );
        h.make_hot().await;
        h.cache.admission().pause_sync(&t1());
        let before = h.source.fetch_all_calls();

        let page = h
            .router
            .get_objects(&t1(), ObjectType::Rules, &ObjectQuery::new())
            .await
            .expect("page");
        assert_eq!(page.origin, DataOrigin::Remote);
        assert_eq!(page.items.len(), 3);
        assert_eq!(h.source.fetch_all_calls(), before + 1);
    }

    #[tokio::test]
    async fn test_empty_cache_type_falls_back() {
        let h = harness(
            MockSource::new().with_objects(ObjectType::Rules, fixtures::objects(3)),
            250,
        );
        h.make_hot().await;

        let page = h
            .router
            .get_objects(&t1(), ObjectType::Users, &ObjectQuery::new())
            .await
            .expect("page");
        assert_eq!(page.origin, DataOrigin::Remote);
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_server_paging_used_when_supported() {
        let source = MockSource::new()
            .with_objects(ObjectType::Dashboards, fixtures::objects(20))
            .with_capabilities(ObjectType::Dashboards, SourceCapabilities::full());
        let h = harness(source, 5);

        let page = h
            .router
            .get_objects(
                &t1(),
                ObjectType::Dashboards,
                &ObjectQuery::new().with_offset(5).with_limit(50),
            )
            .await
            .expect("page");
        assert_eq!(page.limit, 5);
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.items[0].id, "obj-5");
        assert_eq!(page.total, Some(20));
        assert_eq!(h.source.fetch_page_calls(), 1);
        assert_eq!(h.source.fetch_all_calls(), 0);
    }

    #[tokio::test]
    async fn test_filters_force_client_side_when_server_cannot_filter() {
        let caps = SourceCapabilities {
            server_paging: true,
            server_filtering: false,
            server_count: true,
            point_lookup: false,
        };
        let source = MockSource::new()
            .with_objects(ObjectType::Parsers, fixtures::objects(6))
            .with_capabilities(ObjectType::Parsers, caps);
        let h = harness(source, 250);

        let query = ObjectQuery::new().with_filter(FilterExpr::eq("enabled", json!(false)));
        let page = h
            .router
            .get_objects(&t1(), ObjectType::Parsers, &query)
            .await
            .expect("page");
        assert_eq!(page.total, Some(3));
        assert_eq!(h.source.fetch_page_calls(), 0);
        assert_eq!(h.source.fetch_all_calls(), 1);
    }

    #[tokio::test]
    async fn test_direct_fetch_does_not_populate_cache() {
        let h = harness(
            MockSource::new().with_objects(ObjectType::Rules, fixtures::objects(3)),
            250,
        );
        h.router
            .get_objects(&t1(), ObjectType::Rules, &ObjectQuery::new())
            .await
            .expect("page");
        assert!(h.cache.get_objects_by_type(&t1(), ObjectType::Rules).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_returned() {
        let h = harness(MockSource::new().failing_on(ObjectType::Rules), 250);
        let result = h
            .router
            .get_objects(&t1(), ObjectType::Rules, &ObjectQuery::new())
            .await;
        assert!(matches!(
            result,
            Err(MeridianError::Source(SourceError::FetchFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_get_object_point_lookup_and_scan() {
        let source = MockSource::new()
            .with_objects(ObjectType::Users, fixtures::objects(4))
            .with_objects(ObjectType::Sources, fixtures::objects(4))
            .with_capabilities(ObjectType::Users, SourceCapabilities::full());
        let h = harness(source, 250);

        let user = h
            .router
            .get_object(&t1(), ObjectType::Users, "obj-3")
            .await
            .expect("lookup");
        assert_eq!(user.map(|e| e.id), Some("obj-3".to_string()));
        assert_eq!(h.source.fetch_one_calls(), 1);

        let source_obj = h
            .router
            .get_object(&t1(), ObjectType::Sources, "obj-1")
            .await
            .expect("scan");
        assert!(source_obj.is_some());
        assert_eq!(h.source.fetch_all_calls(), 1);

        let missing = h
            .router
            .get_object(&t1(), ObjectType::Sources, "nope")
            .await
            .expect("scan");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_get_object_cache_hit() {
        let h = harness(
            MockSource::new().with_objects(ObjectType::Rules, fixtures::objects(3)),
            250,
        );
        h.make_hot().await;
        let calls = h.source.total_calls();

        let entry = h
            .router
            .get_object(&t1(), ObjectType::Rules, "obj-1")
            .await
            .expect("lookup");
        assert!(entry.is_some());
        assert_eq!(h.source.total_calls(), calls);
        let stats = h.cache.get_cache_stats(&t1()).expect("store");
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_count_paths() {
        let source = MockSource::new()
            .with_objects(ObjectType::Rules, fixtures::objects(7))
            .with_objects(ObjectType::Alerts, fixtures::objects(9))
            .with_capabilities(ObjectType::Alerts, SourceCapabilities::full());
        let h = harness(source, 250);

        assert_eq!(h.router.get_object_count(&t1(), ObjectType::Rules, &[]).await, 7);
        assert_eq!(h.router.get_object_count(&t1(), ObjectType::Alerts, &[]).await, 9);
        assert_eq!(h.source.fetch_page_calls(), 1);

        let enabled = [FilterExpr::eq("enabled", json!(true))];
        assert_eq!(h.router.get_object_count(&t1(), ObjectType::Rules, &enabled).await, 4);
    }

    #[tokio::test]
    async fn test_counts_leave_hit_stats_alone() {
        let h = harness(
            MockSource::new().with_objects(ObjectType::Rules, fixtures::objects(5)),
            250,
        );
        h.make_hot().await;

        assert_eq!(h.router.get_object_count(&t1(), ObjectType::Rules, &[]).await, 5);
        assert_eq!(h.router.get_object_count(&t1(), ObjectType::Users, &[]).await, 0);
        let stats = h.cache.get_cache_stats(&t1()).expect("store");
        assert_eq!((stats.hits, stats.misses), (0, 0));

        h.router
            .get_objects(&t1(), ObjectType::Rules, &ObjectQuery::new())
            .await
            .expect("cached page");
        h.router
            .get_objects(&t1(), ObjectType::Users, &ObjectQuery::new())
            .await
            .expect("direct page");
        let stats = h.cache.get_cache_stats(&t1()).expect("store");
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_count_failure_reports_zero() {
        let h = harness(MockSource::new().failing_on(ObjectType::Rules), 250);
        assert_eq!(h.router.get_object_count(&t1(), ObjectType::Rules, &[]).await, 0);
        assert_eq!(
            h.router
                .get_object_count(&TenantId::from("unknown"), ObjectType::Users, &[])
                .await,
            0
        );
    }
}
