use proptest::prelude::*;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tollgate::common::test_utils::ScriptedTrafficLimiter;
use tollgate::{RateLimitedStream, TrafficLimiter};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: every byte read through the overrun buffer arrives once and in order
    #[test]
    fn overrun_preserves_data(
        data in prop::collection::vec(any::<u8>(), 1..4096),
        grants in prop::collection::vec(1usize..512, 1..16),
        read_size in 1usize..1024,
    ) {
        tokio_test::block_on(async {
            let (near, mut far) = tokio::io::duplex(8192);
            let source: Arc<dyn TrafficLimiter> =
                Arc::new(ScriptedTrafficLimiter::new(Some(grants.clone()), None));
            let mut stream = RateLimitedStream::new(near, source);

            far.write_all(&data).await
                .map_err(|e| TestCaseError::fail(format!("write failed: {e}")))?;
            drop(far);

            let mut received = Vec::with_capacity(data.len());
            let mut buf = vec![0u8; read_size];
            loop {
                let n = stream.read(&mut buf).await
                    .map_err(|e| TestCaseError::fail(format!("read failed: {e}")))?;
                if n == 0 {
                    break;
                }
                prop_assert!(n <= read_size);
                received.extend_from_slice(&buf[..n]);
            }

            prop_assert_eq!(received, data);
            prop_assert_eq!(stream.buffered(), 0);
            Ok(())
        })?;
    }

    /// Property: writes through the output limiter deliver exactly the input
    #[test]
    fn limited_writes_preserve_data(
        data in prop::collection::vec(any::<u8>(), 1..4096),
        grants in prop::collection::vec(1usize..512, 1..16),
    ) {
        tokio_test::block_on(async {
            let (near, mut far) = tokio::io::duplex(8192);
            let source: Arc<dyn TrafficLimiter> =
                Arc::new(ScriptedTrafficLimiter::new(None, Some(grants.clone())));
            let mut stream = RateLimitedStream::new(near, source);

            stream.write_all(&data).await
                .map_err(|e| TestCaseError::fail(format!("write failed: {e}")))?;
            stream.shutdown().await
                .map_err(|e| TestCaseError::fail(format!("shutdown failed: {e}")))?;

            let mut received = Vec::new();
            far.read_to_end(&mut received).await
                .map_err(|e| TestCaseError::fail(format!("read failed: {e}")))?;

            prop_assert_eq!(received, data);
            Ok(())
        })?;
    }
}
