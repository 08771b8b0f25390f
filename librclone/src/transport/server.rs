//! QUIC server for the rclone driver.
//!
//! Every bi-stream carries one JSON-encoded [`CsiMessage`] request; the reply
//! is written back on the same stream before it is finished.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;

use super::MAX_MESSAGE_SIZE;

/// Accepts QUIC connections and serves identity, controller and node RPCs
/// from a single handler.
pub struct CsiServer<T> {
    endpoint: quinn::Endpoint,
    handler: Arc<T>,
}

/// Wrap a handler result into its response message.
fn reply<V>(result: Result<V, CsiError>, wrap: impl FnOnce(V) -> CsiMessage) -> CsiMessage {
    match result {
        Ok(value) => wrap(value),
        Err(e) => {
            debug!(code = ?e.code(), error = %e, "request failed");
            CsiMessage::Error(e)
        }
    }
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + CsiNode + 'static,
{
    /// Bind a QUIC endpoint on `addr`.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        handler: Arc<T>,
    ) -> Result<Self, CsiError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(CsiError::transport)?;
        info!(%addr, "rclone CSI server listening");
        Ok(Self { endpoint, handler })
    }

    /// Accept connections until the endpoint is closed.
    pub async fn serve(&self) -> Result<(), CsiError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "connection accepted");
                        if let Err(e) = Self::handle_connection(conn, handler).await {
                            warn!(%remote, error = %e, "connection error");
                        }
                    }
                    Err(e) => warn!(error = %e, "incoming connection failed"),
                }
            });
        }
        Ok(())
    }

    async fn handle_connection(conn: quinn::Connection, handler: Arc<T>) -> Result<(), CsiError> {
        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(quinn::ConnectionError::ApplicationClosed(_)) => return Ok(()),
                Err(e) => return Err(CsiError::transport(e)),
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_stream(send, recv, &handler).await {
                    error!(error = %e, "stream handler error");
                }
            });
        }
    }

    #[instrument(skip_all)]
    async fn handle_stream(
        mut send: quinn::SendStream,
        mut recv: quinn::RecvStream,
        handler: &T,
    ) -> Result<(), CsiError> {
        let buf = recv
            .read_to_end(MAX_MESSAGE_SIZE)
            .await
            .map_err(CsiError::transport)?;

        let request: CsiMessage = serde_json::from_slice(&buf)
            .map_err(|e| CsiError::TransportError(format!("malformed request: {e}")))?;
        debug!(%request, "request received");

        let response = dispatch(handler, request).await;

        let payload = serde_json::to_vec(&response).map_err(CsiError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        send.finish().map_err(CsiError::transport)?;
        Ok(())
    }

    /// Local address of the endpoint.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}

/// Route a request to the matching handler method.
///
/// Response variants arriving as requests are answered with
/// [`CsiError::InvalidArgument`].
pub async fn dispatch<T>(handler: &T, request: CsiMessage) -> CsiMessage
where
    T: CsiIdentity + CsiController + CsiNode,
{
    match request {
        CsiMessage::Probe => reply(handler.probe().await, CsiMessage::ProbeResult),
        CsiMessage::GetPluginInfo => {
            reply(handler.get_plugin_info().await, CsiMessage::PluginInfoResponse)
        }
        CsiMessage::GetPluginCapabilities => reply(
            handler.get_plugin_capabilities().await,
            CsiMessage::PluginCapabilitiesResponse,
        ),

        CsiMessage::CreateVolume(req) => {
            reply(handler.create_volume(req).await, CsiMessage::VolumeCreated)
        }
        CsiMessage::DeleteVolume(req) => reply(handler.delete_volume(req).await, |()| CsiMessage::Ok),
        CsiMessage::ValidateVolumeCapabilities(req) => reply(
            handler.validate_volume_capabilities(req).await,
            CsiMessage::CapabilitiesValidated,
        ),
        CsiMessage::ControllerGetVolume(id) => {
            reply(handler.controller_get_volume(&id).await, CsiMessage::VolumeCreated)
        }
        CsiMessage::ControllerGetCapabilities => reply(
            handler.controller_get_capabilities().await,
            CsiMessage::ControllerCapabilitiesResponse,
        ),
        CsiMessage::ControllerPublishVolume(req) => {
            reply(handler.controller_publish_volume(req).await, |()| CsiMessage::Ok)
        }
        CsiMessage::ControllerUnpublishVolume(req) => {
            reply(handler.controller_unpublish_volume(req).await, |()| CsiMessage::Ok)
        }
        CsiMessage::ControllerExpandVolume(req) => {
            reply(handler.controller_expand_volume(req).await, CsiMessage::Capacity)
        }

        CsiMessage::StageVolume(req) => reply(handler.stage_volume(req).await, |()| CsiMessage::Ok),
        CsiMessage::UnstageVolume {
            volume_id,
            staging_target_path,
        } => reply(
            handler.unstage_volume(&volume_id, &staging_target_path).await,
            |()| CsiMessage::Ok,
        ),
        CsiMessage::PublishVolume(req) => {
            reply(handler.publish_volume(req).await, |()| CsiMessage::Ok)
        }
        CsiMessage::UnpublishVolume {
            volume_id,
            target_path,
        } => reply(
            handler.unpublish_volume(&volume_id, &target_path).await,
            |()| CsiMessage::Ok,
        ),
        CsiMessage::NodeExpandVolume(req) => {
            reply(handler.expand_volume(req).await, CsiMessage::Capacity)
        }
        CsiMessage::GetNodeInfo => reply(handler.get_info().await, CsiMessage::NodeInfoResponse),

        other => {
            warn!(msg = %other, "unexpected message variant received as request");
            CsiMessage::Error(CsiError::InvalidArgument(format!(
                "unexpected message: {other}"
            )))
        }
    }
}
