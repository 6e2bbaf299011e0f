use bytes::Bytes;

use crate::tap::BroadcastTap;

fn chunk(i: u8) -> Bytes {
    Bytes::from(vec![i; 4])
}

#[tokio::test]
async fn test_every_subscriber_sees_every_chunk_in_order() -> anyhow::Result<()> {
    let tap = BroadcastTap::new(64);
    let mut subs: Vec<_> = (0..5).map(|_| tap.subscribe()).collect();

    for i in 0..20 {
        assert_eq!(tap.push(chunk(i)), 5);
    }

    for sub in subs.iter_mut() {
        for i in 0..20 {
            assert_eq!(sub.recv().await, Some(chunk(i)));
        }
        assert!(sub.try_recv().is_none());
        assert_eq!(sub.dropped(), 0);
    }
    Ok(())
}

#[tokio::test]
async fn test_late_subscriber_only_sees_later_chunks() -> anyhow::Result<()> {
    let tap = BroadcastTap::new(16);
    let mut early = tap.subscribe();
    tap.push(chunk(1));
    let mut late = tap.subscribe();
    tap.push(chunk(2));

    assert_eq!(early.recv().await, Some(chunk(1)));
    assert_eq!(early.recv().await, Some(chunk(2)));
    assert_eq!(late.recv().await, Some(chunk(2)));
    assert!(late.try_recv().is_none());
    Ok(())
}

#[tokio::test]
async fn test_unsubscribe_does_not_disturb_others() -> anyhow::Result<()> {
    let tap = BroadcastTap::new(16);
    let a = tap.subscribe();
    let mut b = tap.subscribe();
    assert_eq!(tap.subscriber_count(), 2);

    tap.push(chunk(1));
    a.unsubscribe();
    assert_eq!(tap.subscriber_count(), 1);
    tap.push(chunk(2));

    assert_eq!(b.recv().await, Some(chunk(1)));
    assert_eq!(b.recv().await, Some(chunk(2)));
    Ok(())
}

#[tokio::test]
async fn test_slow_subscriber_drops_oldest_without_blocking() -> anyhow::Result<()> {
    let tap = BroadcastTap::new(4);
    let mut slow = tap.subscribe();
    let mut fast = tap.subscribe();

    for i in 0..10 {
        tap.push(chunk(i));
        assert_eq!(fast.recv().await, Some(chunk(i)));
    }

    // Only the newest four survive for the subscriber that never read.
    for i in 6..10 {
        assert_eq!(slow.recv().await, Some(chunk(i)));
    }
    assert_eq!(slow.dropped(), 6);
    assert_eq!(fast.dropped(), 0);
    Ok(())
}

#[tokio::test]
async fn test_push_without_subscribers() -> anyhow::Result<()> {
    let tap = BroadcastTap::default();
    assert_eq!(tap.push(chunk(1)), 0);
    assert_eq!(tap.push(Bytes::new()), 0);
    Ok(())
}

#[tokio::test]
async fn test_closed_tap_ends_subscription() -> anyhow::Result<()> {
    let tap = BroadcastTap::new(4);
    let mut sub = tap.subscribe();
    tap.push(chunk(7));
    drop(tap);
    assert_eq!(sub.recv().await, Some(chunk(7)));
    assert_eq!(sub.recv().await, None);
    Ok(())
}
