use std::time::Duration;

use bytes::{Buf, BufMut};
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

use crate::error::ExtractError;

/// A `Codec` that treats both the request and response as opaque protobuf
/// bytes. `tonic`'s built-in `ProstCodec` requires `Message + Default`,
/// which a `prost_reflect::DynamicMessage` cannot implement generically (it
/// needs a descriptor to be constructed at all) — so encoding/decoding the
/// actual message is left to the caller, which already holds the descriptor.
#[derive(Debug, Clone, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Encode = Vec<u8>;
    type Decode = Vec<u8>;
    type Encoder = RawCodec;
    type Decoder = RawCodec;

    fn encoder(&mut self) -> Self::Encoder {
        RawCodec
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawCodec
    }
}

impl Encoder for RawCodec {
    type Item = Vec<u8>;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        dst.put_slice(&item);
        Ok(())
    }
}

impl Decoder for RawCodec {
    type Item = Vec<u8>;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut buf = vec![0u8; src.remaining()];
        src.copy_to_slice(&mut buf);
        Ok(Some(buf))
    }
}

/// A connected CosmosSDK peer. Holds the raw `tonic` channel; method
/// dispatch is entirely dynamic and lives in [`crate::reflect::Resolver`].
#[derive(Debug, Clone)]
pub struct PeerClient {
    channel: Channel,
    max_recv_msg_size: usize,
}

impl PeerClient {
    pub async fn connect(
        addr: &str,
        insecure: bool,
        max_recv_msg_size: usize,
    ) -> anyhow::Result<Self> {
        let mut endpoint = Endpoint::from_shared(addr.to_string())?
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .http2_keep_alive_interval(Duration::from_secs(60))
            .keep_alive_timeout(Duration::from_secs(30))
            .keep_alive_while_idle(true);

        if !insecure {
            endpoint = endpoint.tls_config(tonic::transport::ClientTlsConfig::new().with_native_roots())?;
        }

        let channel = endpoint.connect().await?;
        Ok(Self {
            channel,
            max_recv_msg_size,
        })
    }

    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// Calls `method_fqn` (e.g. `cosmos.tx.v1beta1.Service/GetTx`) with the
    /// already-encoded request bytes and returns the raw response bytes.
    pub async fn invoke(&self, method_fqn: &str, request_bytes: Vec<u8>) -> Result<Vec<u8>, ExtractError> {
        let path = http::uri::PathAndQuery::try_from(format!("/{method_fqn}"))
            .map_err(|e| ExtractError::UnknownMethod(format!("{method_fqn}: {e}")))?;

        let mut grpc = tonic::client::Grpc::new(self.channel.clone())
            .max_decoding_message_size(self.max_recv_msg_size);

        grpc.ready()
            .await
            .map_err(|e| ExtractError::Transport {
                method: method_fqn.to_string(),
                source: Status::unavailable(e.to_string()),
            })?;

        let response = grpc
            .unary(Request::new(request_bytes), path, RawCodec)
            .await
            .map_err(|source| ExtractError::Transport {
                method: method_fqn.to_string(),
                source,
            })?;

        Ok(response.into_inner())
    }
}
