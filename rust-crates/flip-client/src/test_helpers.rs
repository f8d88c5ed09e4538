//! In-memory JSON-RPC transport and response fixtures for driving the client
//! without a node.

use crate::{
    config::{
        ClientConfig,
        NetworkProfile,
    },
    program::{
        FlipProgram,
        GameState,
    },
    rpc::{
        RpcError,
        RpcTransport,
    },
};
use base64::{
    Engine,
    engine::general_purpose::STANDARD as BASE64,
};
use serde_json::{
    Value,
    json,
};
use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::Keypair,
    signer::keypair::keypair_from_seed,
};
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::Mutex,
};

/// Endpoint key matching any URL that has no script of its own.
pub const ANY_ENDPOINT: &str = "*";

#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub endpoint: String,
    pub method: String,
    pub params: Value,
}

#[derive(Default)]
struct Script {
    once: VecDeque<Result<Value, RpcError>>,
    always: Option<Result<Value, RpcError>>,
}

/// Answers calls from per-(endpoint, method) scripts. One-shot responses are
/// consumed in order before the standing response is used.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<(String, String), Script>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, endpoint: &str, method: &str, value: Value) {
        self.script(endpoint, method, |s| s.always = Some(Ok(value)));
    }

    pub fn respond_once(&self, endpoint: &str, method: &str, value: Value) {
        self.script(endpoint, method, |s| s.once.push_back(Ok(value)));
    }

    pub fn respond_error(&self, endpoint: &str, method: &str, err: RpcError) {
        self.script(endpoint, method, |s| s.always = Some(Err(err)));
    }

    pub fn fail(&self, endpoint: &str, method: &str, reason: &str) {
        self.respond_error(endpoint, method, RpcError::Transport(reason.to_string()));
    }

    pub fn fail_once(&self, endpoint: &str, method: &str, reason: &str) {
        let err = RpcError::Transport(reason.to_string());
        self.script(endpoint, method, |s| s.once.push_back(Err(err)));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.calls().iter().filter(|c| c.method == method).count()
    }

    fn script(&self, endpoint: &str, method: &str, edit: impl FnOnce(&mut Script)) {
        if let Ok(mut scripts) = self.scripts.lock() {
            edit(
                scripts
                    .entry((endpoint.to_string(), method.to_string()))
                    .or_default(),
            );
        }
    }

    fn next_response(&self, endpoint: &str, method: &str) -> Result<Value, RpcError> {
        let mut scripts = self
            .scripts
            .lock()
            .map_err(|_| RpcError::Transport("script lock poisoned".into()))?;
        for key in [endpoint, ANY_ENDPOINT] {
            if let Some(script) = scripts.get_mut(&(key.to_string(), method.to_string())) {
                if let Some(next) = script.once.pop_front() {
                    return next;
                }
                if let Some(always) = &script.always {
                    return always.clone();
                }
            }
        }
        Err(RpcError::Transport(format!(
            "no scripted response for {method} at {endpoint}"
        )))
    }
}

impl RpcTransport for ScriptedTransport {
    async fn call(&self, endpoint: &str, method: &str, params: Value) -> Result<Value, RpcError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                endpoint: endpoint.to_string(),
                method: method.to_string(),
                params,
            });
        }
        self.next_response(endpoint, method)
    }
}

pub fn test_keypair(seed: u8) -> Keypair {
    match keypair_from_seed(&[seed; 32]) {
        Ok(keypair) => keypair,
        Err(err) => panic!("seed of 32 bytes is always accepted: {err}"),
    }
}

pub fn test_program() -> FlipProgram {
    let config = test_config(&[ANY_ENDPOINT]);
    FlipProgram {
        program_id: config.program_id,
        mint: config.mint,
        vault_wallet: config.vault_wallet,
        game_state: Pubkey::new_from_array([31u8; 32]),
        vault_token_account: Pubkey::new_from_array([32u8; 32]),
    }
}

/// Local-network config with no waiting between polls.
pub fn test_config(endpoints: &[&str]) -> ClientConfig {
    let mut config = ClientConfig::new(
        NetworkProfile::Local,
        Pubkey::new_from_array([21u8; 32]),
        Pubkey::new_from_array([22u8; 32]),
        Pubkey::new_from_array([23u8; 32]),
    );
    config.endpoints = endpoints.iter().map(|e| e.to_string()).collect();
    config.decimals = 0;
    config.settle_delay_ms = 0;
    config.confirm_poll_ms = 0;
    config.confirm_attempts = 2;
    config.record_attempts = 2;
    config
}

pub fn slot_response(slot: u64) -> Value {
    json!(slot)
}

pub fn token_accounts_response(token_account: Pubkey, amount: u64, decimals: u8) -> Value {
    json!({
        "context": { "slot": 1 },
        "value": [{
            "pubkey": token_account.to_string(),
            "account": {
                "data": {
                    "program": "spl-token",
                    "parsed": {
                        "type": "account",
                        "info": {
                            "tokenAmount": {
                                "amount": amount.to_string(),
                                "decimals": decimals,
                            },
                        },
                    },
                    "space": 165,
                },
                "lamports": 2_039_280,
            },
        }],
    })
}

pub fn empty_token_accounts_response() -> Value {
    json!({ "context": { "slot": 1 }, "value": [] })
}

pub fn blockhash_response(hash: [u8; 32]) -> Value {
    json!({
        "context": { "slot": 1 },
        "value": {
            "blockhash": Hash::new_from_array(hash).to_string(),
            "lastValidBlockHeight": 100,
        },
    })
}

pub fn signature_status_response(confirmation_status: &str) -> Value {
    json!({
        "context": { "slot": 1 },
        "value": [{ "confirmationStatus": confirmation_status, "err": null }],
    })
}

pub fn transaction_response(logs: &[String]) -> Value {
    json!({
        "slot": 1,
        "meta": { "err": null, "logMessages": logs },
    })
}

pub fn game_state_response(state: &GameState) -> Value {
    json!({
        "context": { "slot": 1 },
        "value": {
            "data": [BASE64.encode(state.encode()), "base64"],
            "executable": false,
            "lamports": 1_000_000,
        },
    })
}
