// End-to-end tests: read path, write events and cache consistency together

use std::sync::Arc;

use serde_json::json;

use super::cache::CacheService;
use super::events::{EventBus, EventBusConfig};
use super::observers::register_cache_observers;
use super::pre_generation::PreGenerationService;
use super::source::InMemoryProjectSource;
use super::store::KeyValueStore;
use super::testing::{sample_source, RecordingStore};
use super::workflow_cache::WorkflowCache;
use crate::models::event::{CONTENTBASE_INSTRUCTION_ACTIVITY, PROJECT_ACTIVITY};
use crate::models::{ActionType, CacheType, Event, GuardrailsData, TeamMember};
use crate::RouterCacheError;

struct Router {
    store: Arc<RecordingStore>,
    cache: Arc<CacheService>,
    source: Arc<InMemoryProjectSource>,
    bus: EventBus,
    pre_generation: PreGenerationService,
}

fn router() -> Router {
    let store = Arc::new(RecordingStore::default());
    let cache = Arc::new(CacheService::new(store.clone()));
    let source = Arc::new(sample_source("proj-1", "BedrockBackend"));
    let bus = EventBus::init(EventBusConfig {
        worker_threads: 2,
        ..Default::default()
    })
    .unwrap();
    register_cache_observers(&bus, cache.clone(), source.clone());
    let pre_generation = PreGenerationService::new(cache.clone(), source.clone());

    Router {
        store,
        cache,
        source,
        bus,
        pre_generation,
    }
}

#[tokio::test]
async fn test_instruction_update_reaches_next_turn() {
    let r = router();
    let before = r.pre_generation.fetch_pre_generation_data("proj-1").await.unwrap();
    assert_eq!(before.instructions, vec!["Be polite", "Answer in English"]);

    r.source
        .update("proj-1", |record| {
            record.instructions.push("Never share prices".to_string());
        })
        .await;
    r.bus.publish(
        Event::new(CONTENTBASE_INSTRUCTION_ACTIVITY)
            .with(
                "content_base_instruction",
                json!({"id": 9, "content_base": {"project_uuid": "proj-1"}}),
            )
            .with_action(ActionType::Update),
    );
    r.bus.shutdown().await.unwrap();

    let after = r.pre_generation.fetch_pre_generation_data("proj-1").await.unwrap();
    assert_eq!(after.instructions.len(), 3);
    // One fetch by the first turn, one by the observer, none by the second turn
    assert_eq!(r.source.fetch_count_for(CacheType::Instructions), 2);
}

#[tokio::test]
async fn test_guardrails_refresh_rebuilds_composite() {
    let r = router();
    let backend = Some("OpenAIBackend");
    r.cache
        .get_project_data("proj-1", |uuid| async move {
            Ok(crate::models::ProjectData::new(uuid, "Support").with_agents_backend("OpenAIBackend"))
        })
        .await
        .unwrap();
    r.cache
        .get_content_base_data("proj-1", |_| async {
            Ok(crate::models::ContentBaseData::new("cb-1", "Docs"))
        })
        .await
        .unwrap();
    r.cache
        .get_team_data("proj-1", "OpenAIBackend", |_, _| async {
            Ok(vec![TeamMember::new("a")])
        })
        .await
        .unwrap();
    assert!(r.store.inner().get("project:proj-1:all").await.unwrap().is_none());

    let guardrails = GuardrailsData::new("gr-42", "3");
    let expected = guardrails.clone();
    r.cache
        .refresh_guardrails_cache("proj-1", |_| async move { Ok(guardrails) }, backend)
        .await
        .unwrap();

    let composite = r
        .store
        .inner()
        .get("project:proj-1:all")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(composite["guardrails"], serde_json::to_value(&expected).unwrap());
}

#[tokio::test]
async fn test_project_create_event_touches_nothing() {
    let r = router();
    r.bus.publish(
        Event::new(PROJECT_ACTIVITY)
            .with("project", json!({"uuid": "proj-1"}))
            .with_action(ActionType::Create),
    );
    r.bus.shutdown().await.unwrap();

    assert_eq!(r.source.fetch_count(), 0);
    assert!(r.store.sets().is_empty());
    assert!(r.store.inner().is_empty());
}

#[tokio::test]
async fn test_team_refresh_keeps_composite_consistent() {
    let r = router();
    r.cache
        .get_all_project_data("proj-1", None, r.source.as_ref())
        .await
        .unwrap();

    let roster = r
        .cache
        .refresh_team_cache("proj-1", "BedrockBackend", |_, _| async {
            Ok(vec![TeamMember::new("only-one")])
        })
        .await
        .unwrap();
    assert_eq!(roster.len(), 1);

    let bundle = r
        .cache
        .get_all_project_data("proj-1", None, r.source.as_ref())
        .await
        .unwrap();
    assert_eq!(bundle.team, vec![TeamMember::new("only-one")]);
}

#[tokio::test]
async fn test_read_path_surfaces_store_independent_errors() {
    let r = router();
    r.source.set_failing(CacheType::Team, true).await;

    let err = r
        .pre_generation
        .fetch_pre_generation_data("proj-1")
        .await
        .unwrap_err();
    assert!(matches!(err, RouterCacheError::Fetch { .. }));

    // Projections fetched before the failure stay cached
    assert!(r.store.inner().get("project:proj-1:data").await.unwrap().is_some());
    assert!(r
        .store
        .inner()
        .get("project:proj-1:team:BedrockBackend")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_workflow_keys_survive_project_flush() {
    let r = router();
    let workflows = WorkflowCache::new(r.store.clone());
    workflows.set("wf-1", "state", &json!({"step": 1})).await.unwrap();
    r.cache
        .get_all_project_data("proj-1", None, r.source.as_ref())
        .await
        .unwrap();

    r.cache.invalidate_all_project_cache("proj-1").await.unwrap();

    assert_eq!(r.store.inner().keys(), vec!["workflow:wf-1:state".to_string()]);
}
