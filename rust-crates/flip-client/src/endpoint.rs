use crate::{
    error::{
        FlipError,
        Result,
    },
    rpc::RpcTransport,
};
use serde_json::json;
use std::fmt;
use tracing::{
    info,
    warn,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EndpointState {
    Untested,
    Live,
    Failed,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    url: String,
    state: EndpointState,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: EndpointState::Untested,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Ordered list of candidate RPC endpoints with a sticky last-known-good
/// index. Selection starts at that index and wraps around the list once.
#[derive(Clone, Debug)]
pub struct EndpointSelector {
    endpoints: Vec<Endpoint>,
    current: usize,
}

impl EndpointSelector {
    pub fn new<I, S>(urls: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints: Vec<Endpoint> = urls.into_iter().map(Endpoint::new).collect();
        if endpoints.is_empty() {
            return Err(FlipError::Config("endpoint list is empty".into()));
        }
        Ok(Self {
            endpoints,
            current: 0,
        })
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// The endpoint the next `select` call will probe first.
    pub fn current(&self) -> &Endpoint {
        &self.endpoints[self.current]
    }

    pub async fn select<T: RpcTransport>(&mut self, transport: &T) -> Result<Endpoint> {
        let len = self.endpoints.len();
        for offset in 0..len {
            let index = (self.current + offset) % len;
            let url = self.endpoints[index].url.clone();
            match probe(transport, &url).await {
                Ok(slot) => {
                    self.endpoints[index].state = EndpointState::Live;
                    if index != self.current {
                        info!(endpoint = %url, slot, "switched RPC endpoint");
                    }
                    self.current = index;
                    return Ok(self.endpoints[index].clone());
                }
                Err(reason) => {
                    warn!(endpoint = %url, %reason, "RPC endpoint failed liveness probe");
                    self.endpoints[index].state = EndpointState::Failed;
                }
            }
        }
        Err(FlipError::NoReachableEndpoint { tried: len })
    }

    /// Records a failed query against the active endpoint so the next
    /// selection starts at the following candidate.
    pub fn mark_failed(&mut self) {
        let failed = &mut self.endpoints[self.current];
        failed.state = EndpointState::Failed;
        warn!(endpoint = %failed.url, "marking RPC endpoint as failed");
        self.current = (self.current + 1) % self.endpoints.len();
    }

    /// Probes every endpoint once without moving the active index.
    pub async fn probe_all<T: RpcTransport>(&mut self, transport: &T) -> &[Endpoint] {
        for endpoint in &mut self.endpoints {
            endpoint.state = match probe(transport, &endpoint.url).await {
                Ok(_) => EndpointState::Live,
                Err(reason) => {
                    warn!(endpoint = %endpoint.url, %reason, "RPC endpoint failed liveness probe");
                    EndpointState::Failed
                }
            };
        }
        &self.endpoints
    }
}

async fn probe<T: RpcTransport>(transport: &T, url: &str) -> Result<u64, String> {
    let value = transport
        .call(url, "getSlot", json!([]))
        .await
        .map_err(|e| e.to_string())?;
    value
        .as_u64()
        .ok_or_else(|| format!("unexpected getSlot result {value}"))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::ScriptedTransport;

    const A: &str = "http://a.invalid";
    const B: &str = "http://b.invalid";
    const C: &str = "http://c.invalid";

    #[tokio::test]
    async fn select__skips_failing_endpoints_and_sticks_to_live_one() {
        // given
        let transport = ScriptedTransport::new();
        transport.fail(A, "getSlot", "connection refused");
        transport.fail(B, "getSlot", "timeout");
        transport.respond(C, "getSlot", json!(42));
        let mut selector = EndpointSelector::new([A, B, C]).unwrap();

        // when
        let first = selector.select(&transport).await.unwrap();
        let probes_after_first = transport.call_count();
        let second = selector.select(&transport).await.unwrap();

        // then
        assert_eq!(first.url(), C);
        assert_eq!(second.url(), C);
        assert_eq!(probes_after_first, 3);
        let later: Vec<String> = transport
            .calls()
            .into_iter()
            .skip(probes_after_first)
            .map(|call| call.endpoint)
            .collect();
        assert_eq!(later, vec![C.to_string()]);
        assert_eq!(selector.endpoints()[0].state(), EndpointState::Failed);
        assert_eq!(selector.endpoints()[2].state(), EndpointState::Live);
    }

    #[tokio::test]
    async fn select__fails_when_every_endpoint_is_down() {
        // given
        let transport = ScriptedTransport::new();
        transport.fail(A, "getSlot", "down");
        transport.fail(B, "getSlot", "down");
        let mut selector = EndpointSelector::new([A, B]).unwrap();

        // when
        let err = selector.select(&transport).await.unwrap_err();

        // then
        assert!(matches!(err, FlipError::NoReachableEndpoint { tried: 2 }));
    }

    #[tokio::test]
    async fn mark_failed__wraps_around_to_first_candidate() {
        // given
        let transport = ScriptedTransport::new();
        transport.fail(A, "getSlot", "down");
        transport.respond(B, "getSlot", json!(7));
        let mut selector = EndpointSelector::new([A, B]).unwrap();
        assert_eq!(selector.select(&transport).await.unwrap().url(), B);

        // when
        selector.mark_failed();

        // then
        assert_eq!(selector.current().url(), A);
    }

    #[test]
    fn new__rejects_empty_list() {
        let err = EndpointSelector::new(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, FlipError::Config(_)));
    }
}
