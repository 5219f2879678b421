//! Live fetch tests against a real upstream server
//!
//! Gated behind the `live-tests` feature; set NNTP_HOST (and optionally
//! NNTP_PORT, NNTP_USER, NNTP_PASS, NNTP_GROUP) before running:
//!
//! ```text
//! NNTP_HOST=news.example.com cargo test --features live-tests
//! ```

#[cfg(feature = "live-tests")]
mod live_fetch_tests {
    use newspool::{RelayConfig, ServerConfig, ShutdownFlag, Spool, UpstreamClient, fetch};
    use std::sync::Arc;
    use std::time::Duration;

    fn live_server() -> ServerConfig {
        let host = std::env::var("NNTP_HOST").expect("NNTP_HOST not set");
        let port = std::env::var("NNTP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(119);
        let mut config = ServerConfig::new(host, port, port == 563);
        if let (Ok(user), Ok(pass)) = (std::env::var("NNTP_USER"), std::env::var("NNTP_PASS")) {
            config = config.with_credentials(user, pass);
        }
        config
    }

    fn live_group() -> String {
        std::env::var("NNTP_GROUP").unwrap_or_else(|_| "alt.test".to_string())
    }

    #[tokio::test]
    async fn test_select_group_live() {
        let mut client = UpstreamClient::connect(Arc::new(live_server())).await.unwrap();
        client.mode_reader().await.unwrap();
        client.authenticate().await.unwrap();

        let info = client.select_group(&live_group()).await.unwrap();
        assert!(info.last >= info.first || info.count == 0);
        client.quit().await;
    }

    #[tokio::test]
    async fn test_fetch_run_live() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = RelayConfig::new("relay.test.invalid");
        config.initial_fetch_limit = 5;
        let mut spool =
            Spool::open(dir.path(), Arc::new(config), Duration::from_secs(5)).unwrap();
        spool.mark_interesting(&live_group()).unwrap();

        let shutdown = ShutdownFlag::new();
        let summary = fetch::run_server(&mut spool, &live_server(), None, &shutdown)
            .await
            .unwrap();

        // The initial-fetch cap bounds what a first run may store
        assert!(summary.fetched <= 5);
        spool.close().unwrap();
    }
}
