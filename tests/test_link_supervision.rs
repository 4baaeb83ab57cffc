//! Link manager and watchdog tests against a scripted driver

use gateway_node::link::{LinkEvent, LinkState, LinkWatchdog, NetworkLinkManager, WatchdogVerdict};
use gateway_node::testing::MockLinkDriver;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const MAX_RETRIES: u32 = 5;

async fn wait_for_state(link: &NetworkLinkManager, wanted: LinkState) {
    let mut rx = link.subscribe();
    timeout(Duration::from_secs(2), async {
        while *rx.borrow_and_update() != wanted {
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("link never reached {wanted:?}, stuck in {:?}", link.state()));
}

#[tokio::test]
async fn test_drop_and_recovery_resets_retry_counter() {
    let driver = Arc::new(MockLinkDriver::associating().with_signal(-60));
    let link = NetworkLinkManager::new(driver.clone(), MAX_RETRIES);
    link.attach(Duration::from_secs(1)).await.unwrap();
    assert_eq!(link.signal_strength(), Some(-60));

    assert!(driver.inject(LinkEvent::Lost {
        reason: "beacon timeout".to_string()
    }));

    // The associating driver answers the retry straight away
    wait_for_state(&link, LinkState::Attached).await;
    assert!(driver.association_requests() >= 2);
    assert_eq!(link.retry_count(), 0);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let driver = Arc::new(MockLinkDriver::failing());
    let link = NetworkLinkManager::new(driver.clone(), MAX_RETRIES);

    let err = link.attach(Duration::from_millis(500)).await.unwrap_err();
    assert!(err.to_string().contains("500ms"));

    wait_for_state(&link, LinkState::Failed).await;
    assert!(link.retry_count() <= MAX_RETRIES);
    assert!(driver.association_requests() <= MAX_RETRIES + 1);
}

#[tokio::test]
async fn test_watchdog_rearms_failed_link() {
    let driver = Arc::new(MockLinkDriver::failing());
    let link = NetworkLinkManager::new(driver.clone(), MAX_RETRIES);
    let _ = link.attach(Duration::from_millis(200)).await;
    wait_for_state(&link, LinkState::Failed).await;
    let before = driver.association_requests();

    let watchdog = LinkWatchdog::new(link.clone(), Duration::from_secs(30));
    assert_eq!(watchdog.check_once(), WatchdogVerdict::Rearmed);

    wait_for_state(&link, LinkState::Failed).await;
    assert!(driver.association_requests() > before);
    assert!(link.retry_count() <= MAX_RETRIES);
}

#[tokio::test]
async fn test_watchdog_leaves_healthy_link_alone() {
    let driver = Arc::new(MockLinkDriver::associating());
    let link = NetworkLinkManager::new(driver.clone(), MAX_RETRIES);
    let watchdog = LinkWatchdog::new(link.clone(), Duration::from_secs(30));
    assert_eq!(watchdog.check_once(), WatchdogVerdict::Dormant);

    link.attach(Duration::from_secs(1)).await.unwrap();

    assert_eq!(watchdog.check_once(), WatchdogVerdict::Healthy);
    assert_eq!(driver.association_requests(), 1);
}
