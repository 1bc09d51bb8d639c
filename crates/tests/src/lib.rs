//! # Integration Tests
//!
//! Cross-crate end-to-end tests for the dispatch pipeline, driven through
//! `DispatchRuntime` with in-process dispatchers.

#[cfg(test)]
mod support {
    use std::path::Path;
    use std::sync::Arc;

    use contracts::{
        Barrier, BarrierScope, BarrierState, ConsentConfiguration, ConsentManager, CoreError,
        CoreSettings, Dispatch, DispatchCompletion, Dispatcher, SdkSettings, TrackResult,
    };
    use parking_lot::Mutex;
    use pubsub::{Observable, StateSubject};
    use queue::{ManualClock, QueueManager, SqliteQueueRepository};
    use std::collections::BTreeSet;
    use tokio::time::{sleep, timeout, Duration};

    /// Records delivered batches, acknowledging them only when asked to
    pub struct RecordingDispatcher {
        id: String,
        limit: usize,
        auto_complete: bool,
        delivered: Mutex<Vec<Dispatch>>,
    }

    impl RecordingDispatcher {
        pub fn new(id: &str, limit: usize) -> Arc<Self> {
            Self::build(id, limit, true)
        }

        /// Never acknowledges anything it receives
        pub fn silent(id: &str, limit: usize) -> Arc<Self> {
            Self::build(id, limit, false)
        }

        fn build(id: &str, limit: usize, auto_complete: bool) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                limit,
                auto_complete,
                delivered: Mutex::new(Vec::new()),
            })
        }

        pub fn delivered(&self) -> Vec<Dispatch> {
            self.delivered.lock().clone()
        }

        pub fn delivered_count(&self) -> usize {
            self.delivered.lock().len()
        }
    }

    impl Dispatcher for RecordingDispatcher {
        fn id(&self) -> &str {
            &self.id
        }

        fn dispatch_limit(&self) -> usize {
            self.limit
        }

        fn dispatch(&self, dispatches: Vec<Dispatch>, completion: DispatchCompletion) {
            self.delivered.lock().extend(dispatches.iter().cloned());
            if self.auto_complete {
                completion.complete(dispatches);
            }
        }
    }

    /// Flushable barrier controlled by the test
    pub struct ManualBarrier {
        open: StateSubject<bool>,
    }

    impl ManualBarrier {
        pub const ID: &'static str = "ManualBarrier";

        pub fn closed() -> Arc<Self> {
            Arc::new(Self {
                open: StateSubject::new(false),
            })
        }

        pub fn set_open(&self, open: bool) {
            self.open.publish_distinct(open);
        }
    }

    impl Barrier for ManualBarrier {
        fn id(&self) -> &str {
            Self::ID
        }

        fn on_state(&self, _dispatcher_id: &str) -> Observable<BarrierState> {
            let (state, subscription) =
                pubsub::map_distinct(self.open.subscribe(), |open| BarrierState::from_open(*open));
            subscription.detach();
            state
        }

        fn default_scopes(&self) -> Option<Vec<BarrierScope>> {
            Some(vec![BarrierScope::All])
        }
    }

    /// Stores accepted dispatches itself; a dispatcher receives a dispatch
    /// only if the loaded configuration lists it under `allowed`
    pub struct ListConsent {
        queue: Mutex<Option<QueueManager>>,
        processors: BTreeSet<String>,
        configuration: StateSubject<Option<ConsentConfiguration>>,
    }

    impl ListConsent {
        pub fn new(processors: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                queue: Mutex::new(None),
                processors: processors.iter().map(|p| p.to_string()).collect(),
                configuration: StateSubject::new(None),
            })
        }

        pub fn attach(&self, queue: QueueManager) {
            *self.queue.lock() = Some(queue);
        }

        pub fn load(&self, allowed: &[&str]) {
            let mut data = contracts::DataObject::new();
            data.insert("allowed".into(), serde_json::json!(allowed));
            self.configuration.publish(Some(ConsentConfiguration(data)));
        }
    }

    impl ConsentManager for ListConsent {
        fn configuration(&self) -> Observable<Option<ConsentConfiguration>> {
            self.configuration.subscribe()
        }

        fn sdk_purpose_explicitly_blocked(&self) -> bool {
            false
        }

        fn apply_consent(&self, dispatch: Dispatch) -> Result<TrackResult, CoreError> {
            let queue = self.queue.lock().clone();
            match queue {
                Some(queue) => {
                    queue.store_dispatches(std::slice::from_ref(&dispatch), &self.processors)?;
                    Ok(TrackResult::accepted(dispatch, "Queued after consent"))
                }
                None => Ok(TrackResult::dropped(dispatch, "Consent not ready")),
            }
        }

        fn matches_configuration(
            &self,
            _dispatch: &Dispatch,
            configuration: &ConsentConfiguration,
            dispatcher_id: &str,
        ) -> bool {
            configuration
                .0
                .get("allowed")
                .and_then(|v| v.as_array())
                .is_some_and(|ids| ids.iter().any(|id| id.as_str() == Some(dispatcher_id)))
        }
    }

    pub fn memory_repository(core: &CoreSettings) -> SqliteQueueRepository {
        SqliteQueueRepository::open_in_memory(Arc::new(ManualClock::new(1_000)), core).unwrap()
    }

    pub fn file_repository(path: &Path, core: &CoreSettings) -> SqliteQueueRepository {
        SqliteQueueRepository::open(path, Arc::new(ManualClock::new(1_000)), core).unwrap()
    }

    pub fn settings_subject(settings: SdkSettings) -> StateSubject<SdkSettings> {
        StateSubject::new(settings)
    }

    pub async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(3), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;

    use contracts::{
        async_trait, keys, AppStatus, BarrierScope, BarrierSettings, DataObject, Dispatch,
        DispatchScope, DispatchType, Mappings, QueueMetrics, SdkSettings, TrackStatus, TransformationScope,
        TransformationSettings, Transformer,
    };
    use dispatch::{BatchingBarrier, DispatchRuntime, RuntimeOptions};
    use pubsub::StateSubject;
    use serde_json::{json, Value};
    use tokio::time::{sleep, Duration};

    use crate::support::*;

    fn event(name: &str) -> Dispatch {
        let mut data = DataObject::new();
        data.insert("page".into(), Value::String(format!("/{name}")));
        Dispatch::new(name, DispatchType::Event, data)
    }

    /// Drops events named "secret"; tags others with the transformation id
    struct Redactor;

    #[async_trait]
    impl Transformer for Redactor {
        fn id(&self) -> &str {
            "redactor"
        }

        async fn apply_transformation(
            &self,
            transformation: &TransformationSettings,
            mut dispatch: Dispatch,
            _scope: &DispatchScope,
        ) -> Option<Dispatch> {
            if dispatch.event_name() == Some("secret") {
                return None;
            }
            let mut data = DataObject::new();
            data.insert(transformation.id.clone(), Value::Bool(true));
            dispatch.add_all(data);
            Some(dispatch)
        }
    }

    /// track -> queue -> deliver -> acknowledge -> queue empty, with mapping
    #[tokio::test]
    async fn test_e2e_track_deliver_and_map() {
        let mut settings = SdkSettings::default();
        let mut mappings = Mappings::new();
        mappings.map_from("page", "screen");
        mappings.map_from(keys::EVENT_NAME, "name");
        settings.mappings.insert("mapped".into(), mappings.build());

        let subject = settings_subject(settings.clone());
        let runtime = DispatchRuntime::new(
            subject.subscribe(),
            memory_repository(&settings.core),
            RuntimeOptions::default(),
        )
        .unwrap();

        let plain = RecordingDispatcher::new("plain", 2);
        let mapped = RecordingDispatcher::new("mapped", 1);
        runtime.dispatchers().insert(plain.clone());
        runtime.dispatchers().insert(mapped.clone());
        runtime.manager().start();

        for name in ["home", "cart", "checkout"] {
            let result = runtime.manager().track(event(name)).await.unwrap();
            assert_eq!(result.status, TrackStatus::Accepted);
        }

        // "plain" batches two at a time; the flush releases the odd one out
        wait_until(|| plain.delivered_count() == 2).await;
        runtime.manager().flush();
        wait_until(|| plain.delivered_count() == 3 && mapped.delivered_count() == 3).await;
        wait_until(|| runtime.queue().size().unwrap() == 0).await;

        let names: Vec<_> = plain
            .delivered()
            .iter()
            .filter_map(|d| d.event_name().map(str::to_string))
            .collect();
        assert_eq!(names, vec!["home", "cart", "checkout"]);

        let first = &mapped.delivered()[0];
        assert_eq!(first.payload().get("screen"), Some(&json!("/home")));
        assert_eq!(first.payload().get("name"), Some(&json!("home")));
        assert!(first.payload().get("page").is_none());

        let metrics = runtime.manager().metrics();
        assert_eq!(metrics["plain"].completed_count, 3);
        assert_eq!(metrics["mapped"].sent_count, 3);

        runtime.manager().stop().await;
    }

    /// A non-flushable barrier holds dispatches until connectivity returns
    #[tokio::test]
    async fn test_e2e_connectivity_gates_delivery() {
        let settings = SdkSettings::default();
        let connected = StateSubject::new(false);
        let subject = settings_subject(settings.clone());
        let runtime = DispatchRuntime::new(
            subject.subscribe(),
            memory_repository(&settings.core),
            RuntimeOptions {
                connectivity: Some(connected.subscribe()),
                ..Default::default()
            },
        )
        .unwrap();

        let dispatcher = RecordingDispatcher::new("collect", 1);
        runtime.dispatchers().insert(dispatcher.clone());
        runtime.manager().start();
        runtime.manager().track(event("offline")).await.unwrap();

        runtime.manager().flush();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.delivered_count(), 0);
        assert_eq!(*runtime.queue().pending_count("collect").borrow(), 1);

        connected.publish(true);
        wait_until(|| dispatcher.delivered_count() == 1).await;
        wait_until(|| runtime.queue().size().unwrap() == 0).await;

        runtime.manager().stop().await;
    }

    /// A closed flushable barrier is bypassed by a flush until drained
    #[tokio::test]
    async fn test_e2e_flush_bypasses_closed_barrier() {
        let settings = SdkSettings::default();
        let barrier = ManualBarrier::closed();
        let subject = settings_subject(settings.clone());
        let runtime = DispatchRuntime::new(
            subject.subscribe(),
            memory_repository(&settings.core),
            RuntimeOptions {
                barriers: vec![barrier.clone()],
                ..Default::default()
            },
        )
        .unwrap();

        let dispatcher = RecordingDispatcher::new("collect", 1);
        runtime.dispatchers().insert(dispatcher.clone());
        runtime.manager().start();
        for name in ["a", "b"] {
            runtime.manager().track(event(name)).await.unwrap();
        }
        sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.delivered_count(), 0);

        runtime.manager().flush();
        wait_until(|| dispatcher.delivered_count() == 2).await;
        wait_until(|| *runtime.queue().pending_count("collect").borrow() == 0).await;
        sleep(Duration::from_millis(50)).await;

        // Flushing ended once drained: new events wait for the barrier again
        runtime.manager().track(event("c")).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.delivered_count(), 2);

        barrier.set_open(true);
        wait_until(|| dispatcher.delivered_count() == 3).await;

        runtime.manager().stop().await;
    }

    /// Backgrounding the app flushes a partially filled batch
    #[tokio::test]
    async fn test_e2e_batching_released_on_background() {
        let mut settings = SdkSettings::default();
        settings.barriers.insert(
            BatchingBarrier::ID.to_string(),
            BarrierSettings {
                scopes: Some(vec![BarrierScope::All]),
                configuration: json!({"batch_size": 4}).as_object().cloned().unwrap(),
            },
        );
        let app_status = StateSubject::new(AppStatus::Foreground);
        let subject = settings_subject(settings.clone());
        let runtime = DispatchRuntime::new(
            subject.subscribe(),
            memory_repository(&settings.core),
            RuntimeOptions {
                app_status: Some(app_status.subscribe()),
                ..Default::default()
            },
        )
        .unwrap();

        let dispatcher = RecordingDispatcher::new("batch", 10);
        runtime.dispatchers().insert(dispatcher.clone());
        runtime.manager().start();

        for name in ["a", "b", "c"] {
            runtime.manager().track(event(name)).await.unwrap();
        }
        sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.delivered_count(), 0);

        app_status.publish(AppStatus::Background);
        wait_until(|| dispatcher.delivered_count() == 3).await;

        // A full batch goes out without any flush
        app_status.publish(AppStatus::Foreground);
        wait_until(|| runtime.queue().size().unwrap() == 0).await;
        sleep(Duration::from_millis(50)).await;
        for name in ["d", "e", "f", "g"] {
            runtime.manager().track(event(name)).await.unwrap();
        }
        wait_until(|| dispatcher.delivered_count() == 7).await;

        runtime.manager().stop().await;
    }

    /// Delivery waits for consent, then only allowed dispatchers receive it
    #[tokio::test]
    async fn test_e2e_consent_filters_dispatchers() {
        let settings = SdkSettings::default();
        let consent = ListConsent::new(&["allowed", "denied"]);
        let subject = settings_subject(settings.clone());
        let runtime = DispatchRuntime::new(
            subject.subscribe(),
            memory_repository(&settings.core),
            RuntimeOptions {
                consent: Some(consent.clone()),
                ..Default::default()
            },
        )
        .unwrap();
        consent.attach(runtime.queue().clone());

        let allowed = RecordingDispatcher::new("allowed", 1);
        let denied = RecordingDispatcher::new("denied", 1);
        runtime.dispatchers().insert(allowed.clone());
        runtime.dispatchers().insert(denied.clone());
        runtime.manager().start();

        let result = runtime.manager().track(event("consented")).await.unwrap();
        assert_eq!(result.status, TrackStatus::Accepted);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(allowed.delivered_count(), 0);

        consent.load(&["allowed"]);
        wait_until(|| allowed.delivered_count() == 1).await;
        wait_until(|| runtime.queue().size().unwrap() == 0).await;
        assert_eq!(denied.delivered_count(), 0);
        wait_until(|| runtime.manager().metrics()["denied"].dropped_count == 1).await;

        runtime.manager().stop().await;
    }

    /// Transformations drop before queueing and per dispatcher
    #[tokio::test]
    async fn test_e2e_transformations() {
        let mut settings = SdkSettings::default();
        settings.transformations = vec![
            TransformationSettings {
                id: "collected".into(),
                transformer_id: "redactor".into(),
                scopes: vec![TransformationScope::AfterCollectors],
                configuration: DataObject::new(),
            },
            TransformationSettings {
                id: "for_audit".into(),
                transformer_id: "redactor".into(),
                scopes: vec![TransformationScope::Dispatcher("audit".into())],
                configuration: DataObject::new(),
            },
        ];
        let subject = settings_subject(settings.clone());
        let runtime = DispatchRuntime::new(
            subject.subscribe(),
            memory_repository(&settings.core),
            RuntimeOptions::default(),
        )
        .unwrap();
        runtime.transformers().insert(Arc::new(Redactor));

        let audit = RecordingDispatcher::new("audit", 1);
        let other = RecordingDispatcher::new("other", 1);
        runtime.dispatchers().insert(audit.clone());
        runtime.dispatchers().insert(other.clone());
        runtime.manager().start();

        let dropped = runtime.manager().track(event("secret")).await.unwrap();
        assert_eq!(dropped.status, TrackStatus::Dropped);
        assert_eq!(runtime.queue().size().unwrap(), 0);

        runtime.manager().track(event("public")).await.unwrap();
        wait_until(|| audit.delivered_count() == 1 && other.delivered_count() == 1).await;

        let audited = &audit.delivered()[0];
        assert_eq!(audited.payload().get("collected"), Some(&Value::Bool(true)));
        assert_eq!(audited.payload().get("for_audit"), Some(&Value::Bool(true)));
        let passed = &other.delivered()[0];
        assert_eq!(passed.payload().get("collected"), Some(&Value::Bool(true)));
        assert!(passed.payload().get("for_audit").is_none());

        runtime.manager().stop().await;
    }

    /// Unacknowledged dispatches survive a restart and are redelivered
    #[tokio::test]
    async fn test_e2e_restart_redelivers_unacknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("queue.db");
        let settings = SdkSettings::default();

        {
            let subject = settings_subject(settings.clone());
            let runtime = DispatchRuntime::new(
                subject.subscribe(),
                file_repository(&db, &settings.core),
                RuntimeOptions::default(),
            )
            .unwrap();
            let silent = RecordingDispatcher::silent("durable", 1);
            runtime.dispatchers().insert(silent.clone());
            runtime.manager().start();
            for name in ["one", "two"] {
                runtime.manager().track(event(name)).await.unwrap();
            }
            wait_until(|| silent.delivered_count() == 2).await;
            runtime.manager().stop().await;
        }

        let subject = settings_subject(settings.clone());
        let runtime = DispatchRuntime::new(
            subject.subscribe(),
            file_repository(&db, &settings.core),
            RuntimeOptions::default(),
        )
        .unwrap();
        assert_eq!(runtime.queue().size().unwrap(), 2);

        let acking = RecordingDispatcher::new("durable", 1);
        runtime.dispatchers().insert(acking.clone());
        runtime.manager().start();
        wait_until(|| acking.delivered_count() == 2).await;
        wait_until(|| runtime.queue().size().unwrap() == 0).await;

        runtime.manager().stop().await;
    }

    /// Settings parsed from TOML drive a runtime with built-in dispatchers
    #[tokio::test]
    async fn test_e2e_settings_file_with_file_dispatcher() {
        let dir = tempfile::tempdir().unwrap();
        let content = format!(
            r#"
[core]
max_queue_size = 100

[[mappings.archive]]
reference = "page"
destination = "screen"

[[dispatchers]]
id = "archive"
kind = "file"
dispatch_limit = 3
params = {{ path = "{}" }}
"#,
            dir.path().display()
        );
        let settings =
            config_loader::ConfigLoader::load_from_str(&content, config_loader::ConfigFormat::Toml)
                .unwrap();
        let subject = settings_subject(settings.clone());
        let runtime = DispatchRuntime::new(
            subject.subscribe(),
            memory_repository(&settings.core),
            RuntimeOptions::default(),
        )
        .unwrap();
        for config in &settings.dispatchers {
            runtime
                .dispatchers()
                .insert(dispatch::create_dispatcher(config).unwrap());
        }
        runtime.manager().start();

        for name in ["a", "b", "c", "d"] {
            runtime.manager().track(event(name)).await.unwrap();
        }
        wait_until(|| runtime.queue().size().unwrap() == 1).await;
        runtime.manager().flush();
        wait_until(|| runtime.queue().size().unwrap() == 0).await;

        let written = std::fs::read_to_string(dir.path().join("archive.jsonl")).unwrap();
        let lines: Vec<Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["payload"]["screen"], json!("/a"));

        runtime.manager().stop().await;
    }
}
