//! Collaborators used when no capture pipeline is linked into the host.
//!
//! Every connection attempt fails, so sessions created against a
//! detached host end in `error` and are abandoned by the reaper once
//! their reconnect window closes. Pairing, health and maintenance all
//! work normally.

use async_trait::async_trait;

use daisy_core::{
    Codec, ConnectionType, DaisyError, Handshake, MediaPipeline, RawCounters, SessionId,
    StreamQuality, Transport,
};

const DETACHED: &str = "no capture pipeline attached";

#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedTransport;

#[async_trait]
impl Transport for DetachedTransport {
    async fn open_connection(
        &self,
        session: &SessionId,
        connection_type: ConnectionType,
    ) -> Result<Handshake, DaisyError> {
        tracing::debug!(session = %session, %connection_type, "refusing connection");
        Err(DaisyError::TransportFailure(DETACHED.into()))
    }

    async fn close_connection(&self, _session: &SessionId) -> Result<RawCounters, DaisyError> {
        Ok(RawCounters::default())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedPipeline;

#[async_trait]
impl MediaPipeline for DetachedPipeline {
    async fn negotiate(
        &self,
        _session: &SessionId,
        _connection_type: ConnectionType,
    ) -> Result<Codec, DaisyError> {
        Err(DaisyError::TransportFailure(DETACHED.into()))
    }

    async fn apply_quality(
        &self,
        _session: &SessionId,
        _quality: &StreamQuality,
    ) -> Result<(), DaisyError> {
        Ok(())
    }

    fn frames_sent(&self, _session: &SessionId) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connections_are_refused() {
        let err = tokio_test::assert_err!(
            DetachedTransport
                .open_connection(&"s1".into(), ConnectionType::Usb)
                .await
        );
        assert!(matches!(err, DaisyError::TransportFailure(_)));
        let counters = tokio_test::assert_ok!(DetachedTransport.close_connection(&"s1".into()).await);
        assert_eq!(counters, RawCounters::default());
    }
}
