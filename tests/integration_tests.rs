// Include the #[ignore] macro on slow tests.
// That way, 'cargo test' does not run them by default.
// To run just these tests, use 'cargo test -- --ignored'
// To run all tests, use 'cargo test -- --include-ignored'
//
// These tests assume there is already kubernetes running and you have a context configured.
// They also assume a citus cluster with labeled pods is deployed in the target namespace.

#[cfg(test)]
mod test {
    use k8s_openapi::api::core::v1::Pod;
    use kube::{
        api::{Api, ListParams},
        runtime::wait::{await_condition, conditions},
        Client,
    };
    use manager::watcher::CITUS_TYPE_LABEL;
    use std::time::Duration;

    #[tokio::test]
    #[ignore]
    async fn functional_test_labeled_pods_become_ready() {
        let client = Client::try_default()
            .await
            .expect("could not create kube client");
        let namespace = std::env::var("NAMESPACE").expect("NAMESPACE must be set");

        let pods: Api<Pod> = Api::namespaced(client, &namespace);
        let lp = ListParams::default().labels(CITUS_TYPE_LABEL);
        let pod_list = pods.list(&lp).await.expect("could not list citus pods");
        assert!(
            !pod_list.items.is_empty(),
            "expected labeled citus pods in namespace {namespace}"
        );

        for pod in pod_list.items {
            let name = pod.metadata.name.expect("all pods should have a name");
            let ready = await_condition(pods.clone(), &name, conditions::is_pod_running());
            tokio::time::timeout(Duration::from_secs(120), ready)
                .await
                .unwrap_or_else(|_| panic!("pod {name} did not become ready"))
                .unwrap();
        }
    }
}
