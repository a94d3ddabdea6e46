//! Unit tests for the controller module
//!
//! The controller is driven through a hand-fed watch stream and a mock Service
//! store, with tokio's clock paused so backoff and timeouts run instantly.

#[cfg(test)]
mod tests {
    use crate::backoff::RateLimiterConfig;
    use crate::cache::LocalCache;
    use crate::config::ControllerConfig;
    use crate::controller::{process_next_item, Controller};
    use crate::error::ControllerError;
    use crate::key::ResourceKey;
    use crate::queue::EventQueue;
    use crate::reconciler::Reconciler;
    use crate::test_utils::{create_test_deployment, initial_list, test_feed, FeedItem};
    use futures::channel::mpsc::UnboundedSender;
    use kube_runtime::watcher;
    use service_client::{MockFailure, MockServiceClient};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout};

    fn config(workers: usize) -> ControllerConfig {
        ControllerConfig {
            workers,
            cache_sync_timeout: Duration::from_secs(5),
            ..ControllerConfig::default()
        }
    }

    struct Running {
        feed: UnboundedSender<FeedItem>,
        stop: oneshot::Sender<()>,
        handle: JoinHandle<Result<(), ControllerError>>,
    }

    impl Running {
        fn send(&self, item: FeedItem) {
            self.feed.unbounded_send(item).unwrap();
        }

        async fn stop(self) -> Result<(), ControllerError> {
            let _ = self.stop.send(());
            timeout(Duration::from_secs(30), self.handle)
                .await
                .expect("controller did not stop")
                .unwrap()
        }
    }

    fn start(config: ControllerConfig, services: MockServiceClient) -> Running {
        let (feed, rx) = test_feed();
        let (stop, stopped) = oneshot::channel::<()>();
        let controller = Controller::new(config, services);
        let handle = tokio::spawn(controller.run(rx, async move {
            let _ = stopped.await;
        }));
        Running { feed, stop, handle }
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(60), async {
            while !condition() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_timeout_fails_before_any_reconcile() {
        let services = MockServiceClient::new();
        let running = start(config(2), services.clone());
        // Events arrive but the initial list never completes
        running.send(Ok(watcher::Event::Init));
        running.send(Ok(watcher::Event::InitApply(create_test_deployment("ns1", "web", &[]))));

        let result = timeout(Duration::from_secs(30), running.handle).await.unwrap().unwrap();

        assert!(matches!(
            result,
            Err(ControllerError::CacheSyncTimeout(d)) if d == Duration::from_secs(5)
        ));
        assert_eq!(services.get_calls(), 0);
        assert_eq!(services.create_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_list_is_exposed() {
        let services = MockServiceClient::new();
        let running = start(config(2), services.clone());
        for item in initial_list(vec![
            create_test_deployment("ns1", "web", &[("app", "web")]),
            create_test_deployment("ns1", "api", &[("app", "api")]),
            create_test_deployment("ns2", "web", &[("app", "web")]),
        ]) {
            running.send(item);
        }

        eventually(|| services.service_count() == 3).await;
        running.stop().await.unwrap();

        let selector = services.service("ns1", "api").unwrap().spec.unwrap().selector.unwrap();
        assert_eq!(selector.get("app").map(String::as_str), Some("api"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interleaved_creates_and_deletes() {
        let services = MockServiceClient::new().with_latency(Duration::from_millis(3));
        let running = start(config(4), services.clone());
        for item in initial_list(vec![]) {
            running.send(item);
        }

        let names: Vec<String> = (0..20).map(|i| format!("app-{i}")).collect();
        for (i, name) in names.iter().enumerate() {
            let deployment = create_test_deployment("ns1", name, &[("app", name.as_str())]);
            running.send(Ok(watcher::Event::Apply(deployment.clone())));
            if i % 2 == 0 {
                running.send(Ok(watcher::Event::Delete(deployment)));
            }
            sleep(Duration::from_millis(1)).await;
        }
        let live: Vec<&String> = names.iter().skip(1).step_by(2).collect();

        eventually(|| live.iter().all(|name| services.service("ns1", name).is_some())).await;
        // Let any in-flight work for the deleted ones drain
        sleep(Duration::from_secs(1)).await;
        running.stop().await.unwrap();

        for name in &names {
            let Some(service) = services.service("ns1", name) else {
                assert!(!live.contains(&name), "live Deployment {name} has no Service");
                continue;
            };
            let selector = service.spec.unwrap().selector.unwrap();
            assert_eq!(selector.len(), 1, "{name}");
            assert_eq!(selector.get("app"), Some(name), "{name} selects another Deployment's pods");
        }
        assert_eq!(services.create_calls(), services.service_count(), "no Service created twice");
        assert_eq!(services.max_in_flight_per_key(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_updates_never_overlap_on_one_key() {
        let services = MockServiceClient::new().with_latency(Duration::from_millis(20));
        let running = start(config(4), services.clone());
        for item in initial_list(vec![create_test_deployment("ns1", "web", &[("app", "web")])]) {
            running.send(item);
        }

        for _ in 0..50 {
            let deployment = create_test_deployment("ns1", "web", &[("app", "web")]);
            running.send(Ok(watcher::Event::Apply(deployment)));
            sleep(Duration::from_millis(5)).await;
        }

        eventually(|| services.service("ns1", "web").is_some()).await;
        sleep(Duration::from_secs(1)).await;
        running.stop().await.unwrap();

        assert_eq!(services.max_in_flight_per_key(), 1);
        assert_eq!(services.create_calls(), 1);
        assert!(services.get_calls() < 50, "bursts of updates should be coalesced");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_create_is_retried_until_it_succeeds() {
        let services = MockServiceClient::new();
        services.fail_next_create(MockFailure::Unavailable);
        services.fail_next_create(MockFailure::Unavailable);
        let running = start(config(1), services.clone());
        for item in initial_list(vec![create_test_deployment("ns1", "web", &[])]) {
            running.send(item);
        }

        eventually(|| services.service("ns1", "web").is_some()).await;
        running.stop().await.unwrap();

        assert_eq!(services.create_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_cleanly() {
        let services = MockServiceClient::new();
        let running = start(config(3), services.clone());
        for item in initial_list(vec![create_test_deployment("ns1", "web", &[])]) {
            running.send(item);
        }
        eventually(|| services.service_count() == 1).await;

        assert!(running.stop().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_sync_returns_ok() {
        let services = MockServiceClient::new();
        let running = start(config(1), services.clone());
        tokio::task::yield_now().await;

        assert!(running.stop().await.is_ok());
        assert_eq!(services.get_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_ending_after_sync_is_an_error() {
        let services = MockServiceClient::new();
        let running = start(config(1), services.clone());
        for item in initial_list(vec![]) {
            running.send(item);
        }
        sleep(Duration::from_millis(10)).await;
        let Running { feed, stop, handle } = running;
        drop(feed);

        let result = timeout(Duration::from_secs(30), handle).await.unwrap().unwrap();
        assert!(matches!(result, Err(ControllerError::Watch(_))));
        drop(stop);
    }

    fn worker_parts(services: &MockServiceClient) -> (EventQueue, Reconciler<MockServiceClient>) {
        let cache = LocalCache::new();
        let deployment = create_test_deployment("ns1", "web", &[("app", "web")]);
        cache.apply(ResourceKey::from_resource(&deployment).unwrap(), deployment);
        let queue = EventQueue::new("test", &RateLimiterConfig::default());
        (queue, Reconciler::new(cache, services.clone()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_next_item_requeues_with_backoff_on_failure() {
        let services = MockServiceClient::new();
        services.fail_next_get(MockFailure::Unavailable);
        let (queue, reconciler) = worker_parts(&services);
        let key = ResourceKey::new("ns1", "web");
        queue.add(key.clone());

        assert!(process_next_item(&queue, &reconciler).await);
        assert_eq!(queue.num_requeues(&key), 1);
        assert_eq!(queue.in_flight(), 0);
        assert!(services.service("ns1", "web").is_none());

        // The requeued key comes back after its backoff delay
        assert!(process_next_item(&queue, &reconciler).await);
        assert_eq!(queue.num_requeues(&key), 0);
        assert!(services.service("ns1", "web").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_next_item_treats_already_exists_as_success() {
        let services = MockServiceClient::new();
        services.fail_next_create(MockFailure::AlreadyExists);
        let (queue, reconciler) = worker_parts(&services);
        let key = ResourceKey::new("ns1", "web");
        queue.add(key.clone());

        assert!(process_next_item(&queue, &reconciler).await);

        assert_eq!(queue.num_requeues(&key), 0);
        assert_eq!(queue.len(), 0);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(queue.len(), 0, "success must not schedule a retry");
    }

    #[tokio::test]
    async fn test_process_next_item_stops_after_shutdown() {
        let services = MockServiceClient::new();
        let (queue, reconciler) = worker_parts(&services);
        queue.shut_down();

        assert!(!process_next_item(&queue, &reconciler).await);
    }
}
