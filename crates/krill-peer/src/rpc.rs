use std::sync::Arc;

use krill_net::{Connector, Request, Response};
use krill_ring::{KeySpace, RingError, RingRpc};
use krill_types::{NodeRef, RingId};

/// [`RingRpc`] over the wire protocol.
///
/// Node ids are never carried on the wire; both sides derive them from
/// the advertised address, so the connector only needs to move bytes.
pub struct NetRingRpc {
    key_space: KeySpace,
    connector: Arc<dyn Connector>,
}

impl NetRingRpc {
    pub fn new(key_space: KeySpace, connector: Arc<dyn Connector>) -> Self {
        Self {
            key_space,
            connector,
        }
    }

    async fn exchange(&self, target: NodeRef, request: &Request) -> Result<Response, RingError> {
        let raw = self
            .connector
            .request(target.addr, &request.encode())
            .await
            .map_err(|e| RingError::Unreachable(format!("{target}: {e}")))?;
        Response::parse(&raw).map_err(|e| RingError::Protocol(e.to_string()))
    }
}

#[async_trait::async_trait]
impl RingRpc for NetRingRpc {
    async fn find_successor(&self, target: NodeRef, id: RingId) -> Result<NodeRef, RingError> {
        match self.exchange(target, &Request::FindSuccessor { id }).await? {
            Response::Node { addr } => Ok(self.key_space.node_ref(addr)),
            other => Err(RingError::Protocol(format!(
                "unexpected FINDSUCCESSOR reply: {other:?}"
            ))),
        }
    }

    async fn get_predecessor(&self, target: NodeRef) -> Result<Option<NodeRef>, RingError> {
        match self.exchange(target, &Request::GetPredecessor).await? {
            Response::Node { addr } => Ok(Some(self.key_space.node_ref(addr))),
            Response::NoPredecessor => Ok(None),
            other => Err(RingError::Protocol(format!(
                "unexpected GETPREDECESSOR reply: {other:?}"
            ))),
        }
    }

    async fn notify(&self, target: NodeRef, candidate: NodeRef) -> Result<(), RingError> {
        // NOTIFY carries no reply; the exchange ends when the remote closes.
        self.connector
            .request(
                target.addr,
                &Request::Notify {
                    addr: candidate.addr,
                }
                .encode(),
            )
            .await
            .map_err(|e| RingError::Unreachable(format!("{target}: {e}")))?;
        Ok(())
    }

    async fn probe(&self, target: NodeRef) -> bool {
        self.exchange(target, &Request::GetPredecessor).await.is_ok()
    }
}
