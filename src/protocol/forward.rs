//! Forward connector - passthrough without any protocol handling

use async_trait::async_trait;

use crate::common::{Address, Network, Result, Stream};

use super::Connector;

/// A hop that relays bytes as they are.
///
/// Used for port-forwarding nodes whose far side already points at the next
/// address, so the requested target is not sent anywhere.
pub struct ForwardConnector;

#[async_trait]
impl Connector for ForwardConnector {
    async fn connect(&self, stream: Stream, _network: Network, _addr: &Address) -> Result<Stream> {
        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "forward"
    }
}
