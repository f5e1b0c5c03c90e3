use super::*;

#[tokio::test(start_paused = true)]
async fn test_admits_up_to_count() {
    let mut limiter = RateLimiter::new(Duration::from_secs(60), 3);

    assert!(limiter.event().is_ok());
    assert!(limiter.event().is_ok());
    assert!(limiter.event().is_ok());

    let err = limiter.event().unwrap_err();
    assert_eq!(err.count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_window_slides() {
    let mut limiter = RateLimiter::new(Duration::from_secs(60), 2);

    limiter.event().unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;
    limiter.event().unwrap();
    assert!(limiter.event().is_err());

    // First admission falls out of the window, second is still inside.
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(limiter.event().is_ok());
    assert!(limiter.event().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_rejections_do_not_consume_capacity() {
    let mut limiter = RateLimiter::new(Duration::from_secs(10), 1);

    limiter.event().unwrap();
    for _ in 0..100 {
        assert!(limiter.event().is_err());
    }

    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(limiter.event().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_zero_count_rejects_everything() {
    let mut limiter = RateLimiter::new(Duration::from_secs(1), 0);
    assert!(limiter.event().is_err());
}
